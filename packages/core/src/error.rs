//! Error taxonomy for secret retrieval.
//!
//! Configuration and authentication failures end the run. Not-found and
//! request failures are scoped to a single secret lookup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    /// A required configuration value is missing or invalid.
    #[error("{0}")]
    Configuration(String),

    /// The credential chain could not produce an access token.
    #[error("{0}")]
    Authentication(String),

    /// The store has no secret under this name.
    #[error("secret '{name}' not found")]
    SecretNotFound { name: String },

    /// Any other failure of a single lookup (network, status, body).
    #[error("{0}")]
    Request(String),

    /// The HTTP client could not be built.
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl KeyVaultError {
    /// Whether this error aborts the whole run rather than one lookup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Authentication(_) | Self::Client(_) | Self::Output(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_secret_errors_are_not_fatal() {
        let not_found = KeyVaultError::SecretNotFound {
            name: "rosina-username-dev".to_string(),
        };
        assert!(!not_found.is_fatal());
        assert!(!KeyVaultError::Request("timeout".to_string()).is_fatal());
    }

    #[test]
    fn test_run_level_errors_are_fatal() {
        assert!(KeyVaultError::Configuration("missing".to_string()).is_fatal());
        assert!(KeyVaultError::Authentication("denied".to_string()).is_fatal());
        assert!(KeyVaultError::Client("tls".to_string()).is_fatal());
    }

    #[test]
    fn test_not_found_message_names_secret() {
        let err = KeyVaultError::SecretNotFound {
            name: "api-key".to_string(),
        };
        assert_eq!(err.to_string(), "secret 'api-key' not found");
    }
}
