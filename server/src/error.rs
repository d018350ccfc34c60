use shared::message::MessageError;
use thiserror::Error;

/// Startup and infrastructure failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}
