//! Configuration error model.

use thiserror::Error;

/// Result type used by everything that is validated at startup.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-level error.
///
/// These are raised while the collector is being assembled (rule tables,
/// destination definitions, credentials). Nothing in this enum is ever produced
/// while handling a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A routing pattern uses wildcards in an unsupported way.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A destination name or type is not known to the registry.
    #[error("unknown destination `{0}`")]
    UnknownDestination(String),

    /// A destination cannot be built because a credential is missing.
    #[error("missing {what} for {destination} destination; pass it as option or set {env_var}")]
    MissingCredential {
        destination: String,
        what: String,
        env_var: String,
    },

    /// A configuration value could not be parsed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_credential(
        destination: impl Into<String>,
        what: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::MissingCredential {
            destination: destination.into(),
            what: what.into(),
            env_var: env_var.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
