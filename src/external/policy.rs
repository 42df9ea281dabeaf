//! Provider for extensions enterprise policy force-installs.

use std::sync::RwLock;

use super::{details_from, ExternalInstallInfo, ExternalInstallInfoUpdateUrl, ExternalProvider, ProviderDelta};
use crate::config::ForcelistEntry;
use crate::error::WardenResult;
use crate::extensions::{is_valid_id, CreationFlags, InstallSource, Version};

pub struct PolicyForcelistProvider {
    entries: RwLock<Vec<ForcelistEntry>>,
}

impl PolicyForcelistProvider {
    pub const NAME: &'static str = "policy-forcelist";

    pub fn new(entries: Vec<ForcelistEntry>) -> Self {
        Self {
            entries: RwLock::new(Self::valid(entries)),
        }
    }

    fn valid(entries: Vec<ForcelistEntry>) -> Vec<ForcelistEntry> {
        entries
            .into_iter()
            .filter(|entry| {
                let ok = is_valid_id(&entry.id) && !entry.update_url.is_empty();
                if !ok {
                    tracing::warn!("Skipping malformed forcelist entry '{}'", entry.id);
                }
                ok
            })
            .collect()
    }

    fn to_info(entry: &ForcelistEntry) -> ExternalInstallInfo {
        ExternalInstallInfo::UpdateUrl(ExternalInstallInfoUpdateUrl {
            id: entry.id.clone(),
            install_parameter: None,
            update_url: entry.update_url.clone(),
            source: InstallSource::ExternalPolicyDownload,
            creation_flags: CreationFlags::default(),
            mark_acknowledged: true,
        })
    }

    fn infos(&self) -> Vec<ExternalInstallInfo> {
        let to_infos = |entries: &[ForcelistEntry]| -> Vec<ExternalInstallInfo> {
            entries.iter().map(Self::to_info).collect()
        };
        match self.entries.read() {
            Ok(entries) => to_infos(&entries),
            Err(poisoned) => to_infos(&poisoned.into_inner()),
        }
    }

    /// Replace the forcelist after a policy change and report what changed.
    pub fn set_forcelist(&self, entries: Vec<ForcelistEntry>) -> ProviderDelta {
        let entries = Self::valid(entries);
        let mut guard = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let updated = entries
            .iter()
            .filter(|entry| !guard.contains(entry))
            .map(Self::to_info)
            .collect();
        let removed = guard
            .iter()
            .filter(|old| !entries.iter().any(|entry| entry.id == old.id))
            .map(|old| old.id.clone())
            .collect();

        *guard = entries;
        ProviderDelta { updated, removed }
    }
}

impl ExternalProvider for PolicyForcelistProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn visit_registered_extensions(&self) -> WardenResult<Vec<ExternalInstallInfo>> {
        Ok(self.infos())
    }

    fn has_extension(&self, id: &str) -> bool {
        self.get_extension_details(id).is_some()
    }

    fn get_extension_details(&self, id: &str) -> Option<(InstallSource, Option<Version>)> {
        details_from(&self.infos(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn entry(id: &str, url: &str) -> ForcelistEntry {
        ForcelistEntry {
            id: id.to_string(),
            update_url: url.to_string(),
        }
    }

    #[test]
    fn test_forcelist_is_policy_download() {
        let provider = PolicyForcelistProvider::new(vec![entry(A, "https://a"), entry("bad", "https://b")]);
        let infos = provider.visit_registered_extensions().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].source(), InstallSource::ExternalPolicyDownload);
        match &infos[0] {
            ExternalInstallInfo::UpdateUrl(url) => assert!(url.mark_acknowledged),
            other => panic!("expected an update url, got {:?}", other),
        }
        assert!(provider.has_extension(A));
        assert!(!provider.has_extension("bad"));
    }

    #[test]
    fn test_set_forcelist_reports_delta() {
        let provider = PolicyForcelistProvider::new(vec![entry(A, "https://a")]);

        let delta = provider.set_forcelist(vec![entry(B, "https://b")]);
        assert_eq!(delta.removed, vec![A.to_string()]);
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].id(), B);

        let delta = provider.set_forcelist(vec![entry(B, "https://b")]);
        assert!(delta.is_empty());

        // A changed url counts as an update.
        let delta = provider.set_forcelist(vec![entry(B, "https://b2")]);
        assert_eq!(delta.updated.len(), 1);
        assert!(delta.removed.is_empty());
    }
}
