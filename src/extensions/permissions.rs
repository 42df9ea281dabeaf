//! Permission sets and escalation checks.
//!
//! An extension declares API permissions and host patterns. The set the
//! user last granted is persisted in prefs; when an update asks for more
//! than that, the extension is disabled until the user accepts. Internal
//! APIs the user never sees a prompt for do not count.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::manifest::PermissionsConfig;

/// APIs that never produce a user-visible permission warning.
const INTERNAL_ONLY_APIS: &[&str] = &[
    "alarms",
    "idle",
    "runtime",
    "storage",
    "unlimitedStorage",
    "contextMenus",
    "i18n",
];

/// The API permissions and host patterns an extension requests or holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionSet {
    /// API permission names (e.g. "tabs", "history").
    #[serde(default)]
    pub apis: BTreeSet<String>,

    /// Host patterns ("api.github.com", "*.example.com", "*").
    #[serde(default)]
    pub hosts: BTreeSet<String>,
}

impl PermissionSet {
    /// Create a new empty permission set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a permission set from manifest permissions config.
    pub fn from_manifest(config: &PermissionsConfig) -> Self {
        Self {
            apis: config.apis.iter().cloned().collect(),
            hosts: config.hosts.iter().cloned().collect(),
        }
    }

    pub fn with_apis<I, S>(mut self, apis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apis.extend(apis.into_iter().map(Into::into));
        self
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty() && self.hosts.is_empty()
    }

    /// Merge another set into this one.
    pub fn extend(&mut self, other: &PermissionSet) {
        self.apis.extend(other.apis.iter().cloned());
        self.hosts.extend(other.hosts.iter().cloned());
    }

    /// Check if a host pattern is covered by this set.
    fn covers_host(&self, requested: &str) -> bool {
        // "*" grants every host
        if self.hosts.iter().any(|h| h == "*") {
            return true;
        }

        self.hosts.iter().any(|pattern| {
            if pattern == requested {
                return true;
            }
            if let Some(suffix) = pattern.strip_prefix("*.") {
                // "*.example.com" covers the apex, any subdomain and any
                // narrower wildcard beneath it
                let requested = requested.strip_prefix("*.").unwrap_or(requested);
                requested == suffix || requested.ends_with(&format!(".{}", suffix))
            } else {
                false
            }
        })
    }

    /// Permissions in `self` that `granted` does not cover and that the
    /// user would be warned about.
    pub fn missing_from(&self, granted: &PermissionSet) -> PermissionSet {
        PermissionSet {
            apis: self
                .apis
                .iter()
                .filter(|api| !is_internal_api(api) && !granted.apis.contains(*api))
                .cloned()
                .collect(),
            hosts: self
                .hosts
                .iter()
                .filter(|host| !granted.covers_host(host))
                .cloned()
                .collect(),
        }
    }

    /// Whether requesting `self` after `granted` was accepted needs a new
    /// user approval.
    pub fn is_escalation_over(&self, granted: &PermissionSet) -> bool {
        !self.missing_from(granted).is_empty()
    }

    /// Get a list of all user-visible permissions.
    pub fn visible_permissions(&self) -> Vec<&str> {
        self.apis
            .iter()
            .map(String::as_str)
            .filter(|api| !is_internal_api(api))
            .chain(self.hosts.iter().map(String::as_str))
            .collect()
    }
}

/// Whether an API permission is internal-only.
pub fn is_internal_api(api: &str) -> bool {
    INTERNAL_ONLY_APIS.contains(&api)
}
