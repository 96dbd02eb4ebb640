//! # Error Definitions
//!
//! Every way a frame can fail to encode or decode.

/// Wire-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Buffer exhausted while reading.
    #[error("buffer ended unexpectedly")]
    UnexpectedEnd,
    /// String data is not valid UTF-8.
    #[error("string data is not valid UTF-8")]
    InvalidUtf8,
    /// Target or method name does not fit in a one byte length prefix.
    #[error("name of {0} bytes exceeds the 255 byte limit")]
    NameTooLong(usize),
    /// Blob length exceeds `u32::MAX`.
    #[error("blob of {0} bytes is too large to frame")]
    PayloadTooLarge(usize),
    /// The flag byte or frame layout is not one this codec understands.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The frame names a call this side cannot resolve.
    #[error("invalid call: {0}")]
    InvalidCall(String),
    /// Two descriptors declare the same method on the same target.
    #[error("method {method} is declared twice on {target}")]
    DuplicateMethod { target: String, method: String },
    /// The optimization table ran out of ids.
    #[error("optimization table is full; at most {} methods can be optimized", crate::MAX_OPTIMIZED_ID - 1)]
    TableFull,
    /// Encoding in optimized mode for a pair the table does not contain.
    #[error("{target}.{method} is not part of the optimization table")]
    NotOptimized { target: String, method: String },
}

impl Error {
    /// True when the remote side should see this as a bad call rather than a broken frame.
    pub fn is_invalid_call(&self) -> bool {
        matches!(self, Self::InvalidCall(_) | Self::NotOptimized { .. })
    }
}

/// Specialized `Result` for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
