//! Configuration error types and handling
//!
//! Every configuration problem is reported before the first database
//! connection is attempted.

/// Errors raised while loading and validating a profile
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO-related errors (file access, permissions, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// INI syntax errors
    #[error("INI parsing error: {0}")]
    Parse(String),

    /// Configuration file not found
    #[error("Configuration not found: {0}")]
    NotFound(String),

    /// The requested profile has no section in the file
    #[error("Profile '{profile}' not found in {path}")]
    ProfileNotFound { profile: String, path: String },

    /// A mandatory key is absent from the profile section
    #[error("Mandatory parameter '{key}' not found in profile '{profile}'")]
    MissingKey { profile: String, key: String },

    /// A key the tool does not understand
    #[error("Unknown parameter '{key}' in profile '{profile}'")]
    UnknownKey { profile: String, key: String },

    /// Configuration validation errors
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a validation error with context
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error with context
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::Io(e) => format!("Failed to access configuration file: {}", e),
            ConfigError::Parse(msg) => format!("Configuration file format error: {}", msg),
            ConfigError::NotFound(msg) => format!("Configuration file {} not found", msg),
            ConfigError::ProfileNotFound { profile, path } => {
                format!("Profile '{}' is not defined in {}", profile, path)
            }
            ConfigError::MissingKey { profile, key } => format!(
                "Mandatory parameter {} not found in profile {}",
                key, profile
            ),
            ConfigError::UnknownKey { profile, key } => {
                format!("Parameter {} in profile {} is not recognized", key, profile)
            }
            ConfigError::Validation(msg) => format!("Configuration validation failed: {}", msg),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
