//! Error types for the Sonic Sense system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Ranging engine returned status {status}")]
    RangingEngine { status: i32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Log export failed: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Command channel closed")]
    ChannelClosed,

    #[error("Sampling worker failed: {0}")]
    WorkerFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Map a native status code (0 = success) onto a `Result`.
pub fn check_status(status: i32) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(Error::RangingEngine { status })
    }
}
