//! Installed extension bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! ExtensionRegistry
//! ├── enabled / disabled / blocklisted   (one classification per id)
//! └── terminated / blocked               (reversible overlays)
//!
//! ExtensionPrefs (persisted, per profile)
//! ├── state + disable_reasons
//! ├── location, granted permissions, blocklist verdicts per source
//! └── external-uninstall markers
//! ```
//!
//! The registry is what is loaded right now; the prefs are what survives a
//! restart. The orchestrator in [`crate::service`] keeps the two in step.

mod disable_reason;
mod install_source;
pub mod manifest;
pub mod permissions;
pub mod prefs;
pub mod registry;
mod version;

use serde::{Deserialize, Serialize};

pub use disable_reason::{DisableReason, DisableReasonSet};
pub use install_source::InstallSource;
pub use manifest::ExtensionManifest;
pub use permissions::PermissionSet;
pub use prefs::{ExtensionPrefs, ExtensionState, PersistedExtension};
pub use registry::{ExtensionRegistry, IncludeFlags, Membership};
pub use version::Version;

/// Unique identifier for an extension.
pub type ExtensionId = String;

const ID_LENGTH: usize = 32;

/// Ids are 32 characters drawn from `a..=p` (a hex digest re-alphabeted).
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| (b'a'..=b'p').contains(&b))
}

/// Flags a provider or installer attaches to a new install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationFlags {
    #[serde(default)]
    pub from_webstore: bool,
    #[serde(default)]
    pub was_installed_by_default: bool,
    #[serde(default)]
    pub was_installed_by_oem: bool,
}

/// A materialized extension.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub id: ExtensionId,
    pub name: String,
    pub version: Version,
    pub location: InstallSource,
    pub is_theme: bool,
    /// Permissions the current version requires.
    pub permissions: PermissionSet,
    pub creation_flags: CreationFlags,
}

impl Extension {
    pub fn is_component(&self) -> bool {
        self.location.is_component()
    }
}
