//! External install providers.
//!
//! A provider is any program-controlled source of extensions: a directory
//! of JSON descriptors, enterprise policy, a registry. Providers do not
//! install anything themselves. They report what they want installed and
//! the orchestrator runs each report through arbitration.
//!
//! ```text
//! ExternalProvider::visit_registered_extensions()  (full re-scan)
//!   └── Vec<ExternalInstallInfo>  ──► ExtensionService::on_provider_scanned
//! ProviderDelta { updated, removed }  ──► ExtensionService::on_provider_updated
//! ```

mod policy;
mod pref_dir;

use std::path::PathBuf;

pub use policy::PolicyForcelistProvider;
pub use pref_dir::PrefDirProvider;

use crate::error::WardenResult;
use crate::extensions::{CreationFlags, ExtensionId, InstallSource, Version};

/// "File found": a local package an external provider wants installed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalInstallInfoFile {
    pub id: ExtensionId,
    pub version: Version,
    pub path: PathBuf,
    pub source: InstallSource,
    pub creation_flags: CreationFlags,
    pub mark_acknowledged: bool,
}

/// "Update url found": install whatever the url serves.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalInstallInfoUpdateUrl {
    pub id: ExtensionId,
    pub install_parameter: Option<String>,
    pub update_url: String,
    pub source: InstallSource,
    pub creation_flags: CreationFlags,
    pub mark_acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalInstallInfo {
    File(ExternalInstallInfoFile),
    UpdateUrl(ExternalInstallInfoUpdateUrl),
}

impl ExternalInstallInfo {
    pub fn id(&self) -> &str {
        match self {
            ExternalInstallInfo::File(info) => &info.id,
            ExternalInstallInfo::UpdateUrl(info) => &info.id,
        }
    }

    pub fn source(&self) -> InstallSource {
        match self {
            ExternalInstallInfo::File(info) => info.source,
            ExternalInstallInfo::UpdateUrl(info) => info.source,
        }
    }

    /// `None` for update urls.
    pub fn version(&self) -> Option<&Version> {
        match self {
            ExternalInstallInfo::File(info) => Some(&info.version),
            ExternalInstallInfo::UpdateUrl(_) => None,
        }
    }
}

/// Incremental change reported by a provider between full scans.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderDelta {
    pub updated: Vec<ExternalInstallInfo>,
    pub removed: Vec<ExtensionId>,
}

impl ProviderDelta {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// A source of external install requests.
///
/// `visit_registered_extensions` may touch the disk; the service runs it
/// off the actor task. The query methods answer from the last scan.
pub trait ExternalProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Re-scan and report every extension this provider wants installed.
    /// Malformed entries are skipped, never fatal.
    fn visit_registered_extensions(&self) -> WardenResult<Vec<ExternalInstallInfo>>;

    /// Whether the last scan listed `id`.
    fn has_extension(&self, id: &str) -> bool;

    /// Location and version (if pinned) from the last scan.
    fn get_extension_details(&self, id: &str) -> Option<(InstallSource, Option<Version>)>;
}

/// Answer the provider query methods from a list of install infos.
pub(crate) fn details_from(
    infos: &[ExternalInstallInfo],
    id: &str,
) -> Option<(InstallSource, Option<Version>)> {
    infos
        .iter()
        .find(|info| info.id() == id)
        .map(|info| (info.source(), info.version().cloned()))
}
