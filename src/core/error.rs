use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Error, Debug)]
pub enum SkewError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization failure: {0}")]
    Serialization(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid color '{0}'")]
    InvalidColor(String),

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Unable to complete serializable transaction after {attempts} retries: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<SkewError>,
    },
}

impl SkewError {
    /// Commit-time conflict the database expects the client to retry.
    pub fn is_serialization_failure(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Errors the caller must not paper over with another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Connection(_)
                | Self::InvalidColor(_)
                | Self::InvalidIdentifier(_)
                | Self::RetryExhausted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SkewError>;

impl From<tokio_postgres::Error> for SkewError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.code() {
            Some(code)
                if *code == SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == SqlState::T_R_DEADLOCK_DETECTED =>
            {
                Self::Serialization(err.to_string())
            }
            _ if err.is_closed() => Self::Connection(err.to_string()),
            _ => Self::Execution(err.to_string()),
        }
    }
}
