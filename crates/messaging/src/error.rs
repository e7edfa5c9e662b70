use thiserror::Error;

/// Errors raised by bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Commit failed: {0}")]
    Commit(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
