//! Trackline broker plumbing
//!
//! AMQP-style broker traits, an in-process durable broker, the publisher with
//! its offline buffer, and the connection supervisor that keeps both alive
//! across broker outages.

pub mod buffer;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod supervisor;
pub mod traits;

pub use buffer::{BufferedMessage, OfflineBuffer};
pub use error::{BrokerError, BrokerResult, ACCESS_REFUSED, CONNECTION_FORCED};
pub use memory::MemoryBroker;
pub use publisher::{PublishOutcome, Publisher};
pub use supervisor::{wait_for_state, ConnectionState, ConnectionSupervisor, ConsumerFactory};
pub use traits::{Acker, Broker, BrokerConnection, Channel, Consumer, Delivery};
