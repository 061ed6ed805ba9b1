//! Error types for the wireline runtime.

/// A specialized Result type for wireline operations.
pub type Result<T> = std::result::Result<T, NetError>;

/// Errors produced by the wireline runtime.
///
/// Every variant is `Clone` so errors can be delivered through signals and
/// retained by retry machinery; platform I/O errors are captured as a message
/// plus the raw OS error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    /// Malformed address or other unparseable input.
    #[error("parse error: {0}")]
    Parse(String),

    /// Name resolution failed.
    #[error("resolution of '{name}' failed: {message}")]
    Resolution {
        /// The name that could not be resolved.
        name: String,
        /// The underlying resolver error.
        message: String,
    },

    /// Truncated or invalid framing, or a payload too large for the
    /// configured length width.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A socket syscall failed.
    #[error("i/o error: {message}")]
    Io {
        /// Human-readable description of the failure.
        message: String,
        /// Raw OS error code, when one was reported.
        code: Option<i32>,
    },

    /// Operation attempted in the wrong channel or retrier state.
    #[error("invalid state: {0}")]
    State(String),

    /// Invalid socket or option configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl NetError {
    /// Shorthand for the truncated-framing condition.
    pub(crate) fn truncated(what: &str) -> Self {
        Self::Protocol(format!("truncated {what}"))
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            code: err.raw_os_error(),
        }
    }
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
