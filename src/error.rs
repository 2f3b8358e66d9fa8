//! Error types for cairn
//!
//! All modules use `CairnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cairn operations
pub type CairnResult<T> = Result<T, CairnError>;

/// All errors that can occur in cairn
#[derive(Error, Debug)]
pub enum CairnError {
    // Transport errors
    #[error("Remote call {operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("Remote call {operation} timed out after {secs:.1}s")]
    Timeout { operation: String, secs: f64 },

    #[error("Remote backend not supported: {0}")]
    UnsupportedRemote(String),

    // Remote build outcomes
    #[error("Image build failed: {0}")]
    BuildFailed(String),

    #[error("Unexpected build status {0} from remote")]
    UnexpectedStatus(i32),

    #[error("Image has not been realized yet")]
    NotRealized,

    // Registration stream contract
    #[error("Registration response out of order: expected {expected}, received {received}")]
    RegistrationMismatch { expected: String, received: String },

    #[error("Registration stream ended with {pending} file(s) unanswered")]
    RegistrationIncomplete { pending: usize },

    #[error("Registration response for {path} has no matching request")]
    RegistrationUnexpected { path: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid image manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {root}: {message}")]
    Walk { root: PathBuf, message: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl CairnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a transport error for a named remote operation
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if error is retryable.
    ///
    /// Only transport-level failures qualify. A failed build or a protocol
    /// violation is a terminal answer from the remote and must surface as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedRemote(_) => Some("Set remote.backend = \"local\" in config.toml"),
            Self::ConfigInvalid { .. } => Some("Run: cairn config show"),
            Self::NotRealized => Some("Realize the image before joining it"),
            Self::UnexpectedStatus(_) => Some("Client and remote disagree on the protocol; upgrade cairn"),
            _ => None,
        }
    }
}
