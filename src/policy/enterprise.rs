//! Policy provider backed by the `[policy]` config section.

use std::collections::{HashMap, HashSet};

use super::ManagementPolicyProvider;
use crate::config::PolicyConfig;
use crate::extensions::{Extension, ExtensionId, InstallSource};

const WILDCARD: &str = "*";

/// Enterprise policy: block/allow lists, forced installs, allowed install
/// sources and locked settings. Component extensions are exempt.
#[derive(Debug, Clone, Default)]
pub struct EnterprisePolicyProvider {
    block_all: bool,
    blocklist: HashSet<ExtensionId>,
    allowlist: HashSet<ExtensionId>,
    forcelist: HashMap<ExtensionId, String>,
    allowed_install_sources: Option<HashSet<InstallSource>>,
    settings_locked: HashSet<ExtensionId>,
}

impl EnterprisePolicyProvider {
    pub const NAME: &'static str = "enterprise";

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            block_all: config.blocklist.iter().any(|id| id == WILDCARD),
            blocklist: config
                .blocklist
                .iter()
                .filter(|id| *id != WILDCARD)
                .cloned()
                .collect(),
            allowlist: config.allowlist.iter().cloned().collect(),
            forcelist: config
                .forcelist
                .iter()
                .map(|entry| (entry.id.clone(), entry.update_url.clone()))
                .collect(),
            allowed_install_sources: config
                .allowed_install_sources
                .as_ref()
                .map(|sources| sources.iter().copied().collect()),
            settings_locked: config.settings_locked.iter().cloned().collect(),
        }
    }

    /// Forced by policy and actually installed through policy.
    fn is_forced(&self, extension: &Extension) -> bool {
        extension.location.is_policy() && self.forcelist.contains_key(&extension.id)
    }

    fn is_blocklisted(&self, id: &str) -> bool {
        if self.allowlist.contains(id) || self.forcelist.contains_key(id) {
            return false;
        }
        self.block_all || self.blocklist.contains(id)
    }

    fn source_allowed(&self, location: InstallSource) -> bool {
        location.is_policy()
            || self
                .allowed_install_sources
                .as_ref()
                .map_or(true, |allowed| allowed.contains(&location))
    }
}

impl ManagementPolicyProvider for EnterprisePolicyProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn user_may_load(&self, extension: &Extension) -> bool {
        if extension.is_component() || self.is_forced(extension) {
            return true;
        }
        !self.is_blocklisted(&extension.id) && self.source_allowed(extension.location)
    }

    fn user_may_modify_settings(&self, extension: &Extension) -> bool {
        if extension.is_component() || self.is_forced(extension) {
            return false;
        }
        !self.settings_locked.contains(&extension.id)
    }

    fn must_remain_enabled(&self, extension: &Extension) -> bool {
        extension.is_component() || self.is_forced(extension)
    }

    fn must_remain_installed(&self, extension: &Extension) -> bool {
        extension.is_component() || self.is_forced(extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForcelistEntry;
    use crate::extensions::{CreationFlags, PermissionSet};

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn ext(id: &str, location: InstallSource) -> Extension {
        Extension {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0".parse().unwrap(),
            location,
            is_theme: false,
            permissions: PermissionSet::new(),
            creation_flags: CreationFlags::default(),
        }
    }

    #[test]
    fn test_blocklist_by_id() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            blocklist: vec![A.to_string()],
            ..PolicyConfig::default()
        });
        assert!(!provider.user_may_load(&ext(A, InstallSource::Internal)));
        assert!(provider.user_may_load(&ext(B, InstallSource::Internal)));
    }

    #[test]
    fn test_wildcard_respects_allowlist() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            blocklist: vec!["*".to_string()],
            allowlist: vec![B.to_string()],
            ..PolicyConfig::default()
        });
        assert!(!provider.user_may_load(&ext(A, InstallSource::Internal)));
        assert!(provider.user_may_load(&ext(B, InstallSource::Internal)));
    }

    #[test]
    fn test_components_are_exempt() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            blocklist: vec!["*".to_string()],
            allowed_install_sources: Some(vec![InstallSource::Internal]),
            ..PolicyConfig::default()
        });
        let component = ext(A, InstallSource::Component);
        assert!(provider.user_may_load(&component));
        assert!(provider.must_remain_enabled(&component));
        assert!(provider.must_remain_installed(&component));
        assert!(!provider.user_may_modify_settings(&component));
    }

    #[test]
    fn test_forcelist_requires_policy_location() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            blocklist: vec!["*".to_string()],
            forcelist: vec![ForcelistEntry {
                id: A.to_string(),
                update_url: "https://example.com/update".to_string(),
            }],
            ..PolicyConfig::default()
        });

        let forced = ext(A, InstallSource::ExternalPolicyDownload);
        assert!(provider.user_may_load(&forced));
        assert!(provider.must_remain_enabled(&forced));
        assert!(provider.must_remain_installed(&forced));
        assert!(!provider.user_may_modify_settings(&forced));

        // Same id installed by the user is loadable but not forced.
        let user_copy = ext(A, InstallSource::Internal);
        assert!(provider.user_may_load(&user_copy));
        assert!(!provider.must_remain_installed(&user_copy));
    }

    #[test]
    fn test_allowed_install_sources() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            allowed_install_sources: Some(vec![InstallSource::Internal]),
            ..PolicyConfig::default()
        });
        assert!(provider.user_may_load(&ext(A, InstallSource::Internal)));
        assert!(!provider.user_may_load(&ext(A, InstallSource::ExternalPref)));
        assert!(provider.user_may_load(&ext(A, InstallSource::ExternalPolicy)));
    }

    #[test]
    fn test_settings_locked() {
        let provider = EnterprisePolicyProvider::from_config(&PolicyConfig {
            settings_locked: vec![A.to_string()],
            ..PolicyConfig::default()
        });
        assert!(!provider.user_may_modify_settings(&ext(A, InstallSource::Internal)));
        assert!(provider.user_may_modify_settings(&ext(B, InstallSource::Internal)));
    }
}
