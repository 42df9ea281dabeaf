//! Error types for Warden
//!
//! Policy outcomes (a rejected install proposal, a refused downgrade) are
//! not errors and never surface here. These variants are for operations
//! that could not be carried out at all.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in Warden
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("Invalid extension id: {0}")]
    InvalidId(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Unknown blocklist state: {0}")]
    InvalidBlocklistState(String),

    /// A management policy provider refused the action.
    #[error("Policy forbids {action} for extension '{id}'")]
    PolicyForbids { id: String, action: &'static str },

    #[error("Manifest not found in {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest in {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Failed to load prefs: {0}")]
    PrefsLoad(String),

    #[error("Failed to save prefs: {0}")]
    PrefsSave(String),

    #[error("Blocklist fetch failed: {0}")]
    BlocklistFetch(String),

    #[error("Install of '{id}' failed: {message}")]
    InstallFailed { id: String, message: String },

    #[error("External provider '{name}' failed: {message}")]
    ProviderFailed { name: String, message: String },

    /// The orchestrator task is gone.
    #[error("Extension service is not running")]
    ServiceClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias for Warden operations
pub type WardenResult<T> = Result<T, WardenError>;
