//! Error types for heatpilot

use thiserror::Error;

/// Result type alias for heatpilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the control loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Hub unreachable, connection refused/reset or call timed out
    #[error("network error: {0}")]
    Network(String),

    /// Hub rejected the credentials (or none were configured)
    #[error("auth error: {0}")]
    Auth(String),

    /// Session stayed expired after one transparent re-login
    #[error("session error: {0}")]
    Session(String),

    /// Hub answered with a JSON-RPC error that is not session related
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Hub error code
        code: i64,
        /// Hub error message
        message: String,
    },

    /// Hub answered with a payload of unexpected shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Persisted device directory could not be written
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether the failure clears up on its own and the next cycle should simply retry
    ///
    /// Auth failures persist until the configuration changes and storage
    /// failures are escalated, so neither counts as transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Session(_) | Self::Http(_))
    }

    /// Whether the failure must end the process
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_session_are_transient() {
        assert!(Error::Network("refused".into()).is_transient());
        assert!(Error::Session("expired twice".into()).is_transient());
    }

    #[test]
    fn auth_is_not_transient() {
        assert!(!Error::Auth("bad password".into()).is_transient());
        assert!(!Error::Auth("bad password".into()).is_fatal());
    }

    #[test]
    fn only_storage_is_fatal() {
        assert!(Error::Storage("disk full".into()).is_fatal());
        assert!(!Error::Protocol("bad shape".into()).is_fatal());
        assert!(!Error::Network("timeout".into()).is_fatal());
    }

    #[test]
    fn rpc_error_display() {
        let err = Error::Rpc {
            code: 501,
            message: "unknown method".into(),
        };
        assert_eq!(err.to_string(), "rpc error 501: unknown method");
    }
}
