//! Error types for the job execution engine.

use thiserror::Error;

/// Engine operation result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine supervisor, job state machine, and
/// condition evaluator. `JobFailure` (a user callable's error) is
/// deliberately not a variant here: it is never raised by the
/// supervisor, only ever surfaced through [`crate::job::JobFuture::exception`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown status literal, malformed duration/clock/weekday string,
    /// or invalid timepoint comparison field.
    #[error("validation error: {0}")]
    Validation(String),

    /// A transition was requested from a state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Resource counters underflowed or overflowed; a programming bug.
    #[error("resource accounting error: {0}")]
    Resource(String),

    /// A launcher awaited a job that was cancelled.
    #[error("job {0} was cancelled")]
    Cancellation(String),

    /// Engine started twice, submit before start, or similar misuse.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure reading or writing the on-disk job store.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Failure (de)serializing a job snapshot.
    #[error("serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
