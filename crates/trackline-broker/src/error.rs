use thiserror::Error;
use trackline_core::AppError;

/// Reply code a broker sends when it closes a connection on purpose.
pub const CONNECTION_FORCED: u16 = 320;
pub const ACCESS_REFUSED: u16 = 403;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Connection closed by broker ({code}): {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Spool error: {0}")]
    Spool(#[from] std::io::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Errors after which reconnecting cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionClosed { code, .. }
                if *code == CONNECTION_FORCED || *code == ACCESS_REFUSED
        )
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        AppError::Broker(err.to_string())
    }
}
