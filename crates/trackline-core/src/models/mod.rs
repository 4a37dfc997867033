pub mod event;
pub mod job;
pub mod outcome;
pub mod release;
pub mod track;

pub use event::ProgressEvent;
pub use job::{JobDecodeError, JobMessage, StageKind, StageStatuses};
pub use outcome::{Progress, WorkerOutcome};
pub use release::Release;
pub use track::{ArtifactUpdate, Track, TrackArtifacts, TrackStatus, TrackView};
