//! Error taxonomy for the dm client
//!
//! Errors fall into resolution, client, transport, integrity and session
//! classes. Only transport-class errors (DNS failures and read/write/dial
//! network operation failures) are retried; everything else propagates
//! immediately.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Network operation that failed, used for retry classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkOp {
    Read,
    Write,
    Dial,
    Other(String),
}

impl std::fmt::Display for NetworkOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkOp::Read => write!(f, "read"),
            NetworkOp::Write => write!(f, "write"),
            NetworkOp::Dial => write!(f, "dial"),
            NetworkOp::Other(op) => write!(f, "{op}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // Resolution errors
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No host configuration matches: {0}")]
    NoMatchingHost(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),

    // Client errors
    #[error("Unable to initialize client for {url}: {message}")]
    ClientInit { url: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Auth(String),

    // Transport errors (retryable)
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("Network {op} failed: {message}")]
    Network { op: NetworkOp, message: String },

    // Integrity errors (never retried)
    #[error("Checksum mismatch: expected {expected}, computed {computed}")]
    Integrity { expected: String, computed: String },

    #[error("Transfer failed after {attempts} attempt(s): {source}")]
    TransferFailed { attempts: u32, source: Box<Error> },

    // Session errors
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Session directory does not exist: {0}")]
    SessionDirMissing(String),

    // Watch capability
    #[error("Client does not support the watch capability")]
    NoWatcherCapability,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context { context: String, source: Box<Error> },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl Error {
    /// Wrap an error with additional context, preserving its retry class.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is a transient transport failure worth retrying.
    ///
    /// DNS failures and network operation failures with op read/write/dial
    /// are retryable. Integrity mismatches, auth and semantic errors are not.
    /// Wrapped errors keep the classification of their source.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Dns(_) => true,
            Error::Network { op, .. } => {
                matches!(op, NetworkOp::Read | NetworkOp::Write | NetworkOp::Dial)
            }
            Error::Context { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_is_retryable() {
        assert!(Error::Dns("no such host".to_string()).is_retryable());
    }

    #[test]
    fn test_network_op_classification() {
        for op in [NetworkOp::Read, NetworkOp::Write, NetworkOp::Dial] {
            let err = Error::Network {
                op,
                message: "connection reset".to_string(),
            };
            assert!(err.is_retryable());
        }

        let err = Error::Network {
            op: NetworkOp::Other("foo".to_string()),
            message: "unknown".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_generic_errors_not_retryable() {
        assert!(!Error::General("boom".to_string()).is_retryable());
        assert!(!Error::Auth("denied".to_string()).is_retryable());
        assert!(
            !Error::Integrity {
                expected: "aa".to_string(),
                computed: "bb".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_wrapped_retryable_stays_retryable() {
        let err = Error::Dns("lookup failed".to_string()).context("while uploading a.txt");
        assert!(err.is_retryable());

        let err = err.context("copy item 3");
        assert!(err.is_retryable());

        let err = Error::NotFound("gone".to_string()).context("while uploading");
        assert!(!err.is_retryable());
    }
}
