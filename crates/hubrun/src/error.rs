//! # Error Definitions
//!
//! Everything an invocation, registration or hub operation can fail with.

use hubwire::ErrorKind;
use hubwire::RemoteError;

use crate::transport::TransportError;

/// The message sent instead of the real one when generic error messages are on.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred on the remote peer.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The call could not be dispatched: unknown target or method, wrong arity,
    /// bad argument or return type.
    #[error("invalid call: {0}")]
    InvalidCall(String),
    /// The method ran and failed.
    #[error("call failed: {0}")]
    CallFailed(String),
    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,
    /// The caller's cancellation token fired before a response arrived.
    #[error("request cancelled")]
    Cancelled,
    /// The hub has been disposed.
    #[error("hub has been disposed")]
    Disposed,
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wire(#[from] hubwire::Error),
}

impl Error {
    /// Shorthand for handlers reporting a failure.
    pub fn call_failed(message: impl Into<String>) -> Self {
        Self::CallFailed(message.into())
    }

    pub fn invalid_call(message: impl Into<String>) -> Self {
        Self::InvalidCall(message.into())
    }

    /// Converts an error raised while executing a call into what the caller sees.
    ///
    /// `InvalidCall` and `CallFailed` pass through; anything else is a failure of
    /// unknown origin.
    pub(crate) fn into_remote(self, generic: bool) -> RemoteError {
        let (kind, message) = match self {
            Self::InvalidCall(m) => (ErrorKind::InvalidCall, m),
            Self::CallFailed(m) => (ErrorKind::CallFailed, m),
            other => (ErrorKind::CallFailed, format!("Unknown exception occurred. {}", other)),
        };

        let message = match generic {
            true => GENERIC_ERROR_MESSAGE.to_owned(),
            false => message,
        };

        RemoteError { kind, message }
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e.kind {
            ErrorKind::InvalidCall => Self::InvalidCall(e.message),
            ErrorKind::CallFailed => Self::CallFailed(e.message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
