use thiserror::Error;

/// Service-level error taxonomy. This is the contract an HTTP adapter
/// would map to status codes; internal call sites that don't need a
/// specific variant use `anyhow::Result` instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("io error: {0}")]
    IoError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error represents a degraded-but-recoverable condition
    /// that a retry loop should attempt again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::IoError(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Unavailable("x".into()).is_transient());
        assert!(Error::IoError("x".into()).is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
        assert!(!Error::Conflict("x".into()).is_transient());
    }

    #[test]
    fn display_messages_carry_context() {
        let e = Error::NotFound("vm python-17".into());
        assert_eq!(e.to_string(), "not found: vm python-17");
    }
}
