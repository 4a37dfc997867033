//! Trackline worker
//!
//! Bounded worker pool, the per-queue orchestrators that feed it from the
//! broker, the stage handlers they dispatch to, and the pipeline assembly.

pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod stages;

pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineSettings};
pub use pool::{OutcomeSender, WorkerPool};
pub use registry::{StageContext, StageHandler, StageRegistry};
pub use retry::{RetryDecision, RetryPolicy};
