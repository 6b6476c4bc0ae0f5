//! Error types for bedrock-usage

use thiserror::Error;

/// Result type alias using bedrock-usage's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// The caller's time window or arguments were rejected before any network call
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The log store could not be read
    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Raw input could not be iterated at the top level
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failures talking to the remote log store
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The store asked us to slow down
    #[error("log store throttled the request: {0}")]
    Throttled(String),

    /// The store could not be reached or reported a server-side fault
    #[error("log store unavailable: {0}")]
    Unavailable(String),

    /// Credentials were rejected or lack permission
    #[error("access denied by log store: {0}")]
    AccessDenied(String),

    /// The log group or stream does not exist
    #[error("log group not found: {0}")]
    NotFound(String),

    /// The store rejected the request as malformed
    #[error("log store rejected the request: {0}")]
    InvalidRequest(String),

    /// A page could not be interpreted
    #[error("log store returned a malformed page: {0}")]
    MalformedPage(String),

    /// Transient faults persisted past the retry budget
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RetrievalError>,
    },
}

impl RetrievalError {
    /// Whether the fault is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RetrievalError::Throttled("slow down".into()).is_transient());
        assert!(RetrievalError::Unavailable("503".into()).is_transient());
        assert!(!RetrievalError::AccessDenied("nope".into()).is_transient());
        assert!(!RetrievalError::NotFound("/aws/bedrock".into()).is_transient());
        assert!(!RetrievalError::InvalidRequest("bad".into()).is_transient());
        assert!(!RetrievalError::MalformedPage("bad".into()).is_transient());
    }

    #[test]
    fn test_exhausted_keeps_cause() {
        let err = RetrievalError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RetrievalError::Throttled("rate exceeded".into())),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("rate exceeded"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
