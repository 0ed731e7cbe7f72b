use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("Amount should be in range 1 to 10^13")]
    AmountOutOfRange,

    #[error("Invalid mode to make transaction")]
    InvalidPaymentMode,

    #[error("Unexpected headers in file")]
    UnexpectedHeaders,

    #[error("{what} not found")]
    NotFound { what: &'static str },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
