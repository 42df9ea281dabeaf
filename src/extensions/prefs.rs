//! Persisted per-profile extension state.
//!
//! Stored as JSON in `<profile>/extension_prefs.json`. Every installed
//! extension has one [`PersistedExtension`] record. External-uninstall
//! markers outlive the record they belong to: they keep an external
//! provider from reinstalling something the user removed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::permissions::PermissionSet;
use super::{CreationFlags, DisableReason, DisableReasonSet, Extension, ExtensionId};
use super::{InstallSource, Version};
use crate::blocklist::{BlocklistSource, BlocklistState, BlocklistVerdicts};
use crate::error::{WardenError, WardenResult};

pub const PREFS_FILE: &str = "extension_prefs.json";

/// The persisted primary classification. Blocklisted, blocked and
/// terminated are computed overlays and never stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    Enabled,
    Disabled,
}

/// Everything that survives a restart for one extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedExtension {
    pub state: ExtensionState,

    #[serde(default)]
    pub disable_reasons: DisableReasonSet,

    /// The subset of `disable_reasons` the last policy check contributed.
    #[serde(default)]
    pub policy_reasons: DisableReasonSet,

    pub location: InstallSource,

    pub name: String,

    pub version: Version,

    #[serde(default)]
    pub is_theme: bool,

    /// Permissions the installed version requires.
    #[serde(default)]
    pub required_permissions: PermissionSet,

    /// Permissions the user has accepted.
    #[serde(default)]
    pub granted_permissions: PermissionSet,

    #[serde(default)]
    pub blocklist: BlocklistVerdicts,

    #[serde(default)]
    pub creation_flags: CreationFlags,

    /// Whether the user allowed access to file URLs. This is the only
    /// source of truth for file access.
    #[serde(default)]
    pub file_access: bool,

    /// Unix timestamp of the last install or update.
    #[serde(default)]
    pub updated_at: u64,
}

impl PersistedExtension {
    /// Rebuild the extension record this entry describes.
    pub fn to_extension(&self, id: &str) -> Extension {
        Extension {
            id: id.to_string(),
            name: self.name.clone(),
            version: self.version.clone(),
            location: self.location,
            is_theme: self.is_theme,
            permissions: self.required_permissions.clone(),
            creation_flags: self.creation_flags,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrefsFile {
    #[serde(default)]
    extensions: BTreeMap<ExtensionId, PersistedExtension>,

    /// Id -> location the extension had when the user removed it.
    #[serde(default)]
    external_uninstalls: BTreeMap<ExtensionId, InstallSource>,
}

/// Persistent store of extension prefs.
pub struct ExtensionPrefs {
    /// Backing file; `None` keeps everything in memory.
    path: Option<PathBuf>,

    data: PrefsFile,

    /// Whether the cache has unsaved changes.
    dirty: bool,
}

impl ExtensionPrefs {
    /// Open the prefs file in a profile directory, starting empty if it does
    /// not exist yet.
    pub fn open(profile_dir: &Path) -> WardenResult<Self> {
        let path = profile_dir.join(PREFS_FILE);
        let data = Self::load_from_path(&path)?;
        Ok(Self {
            path: Some(path),
            data,
            dirty: false,
        })
    }

    /// Prefs that are never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: PrefsFile::default(),
            dirty: false,
        }
    }

    fn load_from_path(path: &Path) -> WardenResult<PrefsFile> {
        if !path.exists() {
            return Ok(PrefsFile::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| WardenError::PrefsLoad(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| WardenError::PrefsLoad(format!("{}: {}", path.display(), e)))
    }

    pub fn get(&self, id: &str) -> Option<&PersistedExtension> {
        self.data.extensions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.data.extensions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ExtensionId> {
        self.data.extensions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ExtensionId, &PersistedExtension)> {
        self.data.extensions.iter()
    }

    /// Record an install or update.
    ///
    /// Granted permissions, blocklist verdicts and file access carry over
    /// from a previous record for the same id.
    pub fn on_extension_installed(
        &mut self,
        extension: &Extension,
        state: ExtensionState,
        disable_reasons: DisableReasonSet,
    ) {
        let previous = self.data.extensions.remove(&extension.id);
        let record = PersistedExtension {
            state,
            disable_reasons,
            policy_reasons: previous.as_ref().map(|p| p.policy_reasons).unwrap_or_default(),
            location: extension.location,
            name: extension.name.clone(),
            version: extension.version.clone(),
            is_theme: extension.is_theme,
            required_permissions: extension.permissions.clone(),
            granted_permissions: previous
                .as_ref()
                .map(|p| p.granted_permissions.clone())
                .unwrap_or_default(),
            blocklist: previous.as_ref().map(|p| p.blocklist).unwrap_or_default(),
            creation_flags: extension.creation_flags,
            file_access: previous.as_ref().map(|p| p.file_access).unwrap_or(false),
            updated_at: unix_now(),
        };

        self.data.extensions.insert(extension.id.clone(), record);
        self.dirty = true;
    }

    /// Delete the record for an uninstalled extension.
    pub fn remove(&mut self, id: &str) -> Option<PersistedExtension> {
        let removed = self.data.extensions.remove(id);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn state(&self, id: &str) -> Option<ExtensionState> {
        self.get(id).map(|p| p.state)
    }

    pub fn set_state(&mut self, id: &str, state: ExtensionState) {
        if let Some(record) = self.data.extensions.get_mut(id) {
            if record.state != state {
                record.state = state;
                self.dirty = true;
            }
        }
    }

    pub fn disable_reasons(&self, id: &str) -> DisableReasonSet {
        self.get(id).map(|p| p.disable_reasons).unwrap_or_default()
    }

    pub fn policy_reasons(&self, id: &str) -> DisableReasonSet {
        self.get(id).map(|p| p.policy_reasons).unwrap_or_default()
    }

    pub fn set_policy_reasons(&mut self, id: &str, reasons: DisableReasonSet) {
        if let Some(record) = self.data.extensions.get_mut(id) {
            if record.policy_reasons != reasons {
                record.policy_reasons = reasons;
                self.dirty = true;
            }
        }
    }

    pub fn add_disable_reasons(&mut self, id: &str, reasons: DisableReasonSet) -> bool {
        self.modify_disable_reasons(id, |set| *set = set.union(reasons))
    }

    pub fn remove_disable_reason(&mut self, id: &str, reason: DisableReason) -> bool {
        self.modify_disable_reasons(id, |set| {
            set.remove(reason);
        })
    }

    pub fn set_disable_reasons(&mut self, id: &str, reasons: DisableReasonSet) -> bool {
        self.modify_disable_reasons(id, |set| *set = reasons)
    }

    fn modify_disable_reasons(
        &mut self,
        id: &str,
        modify: impl FnOnce(&mut DisableReasonSet),
    ) -> bool {
        let Some(record) = self.data.extensions.get_mut(id) else {
            return false;
        };
        let before = record.disable_reasons;
        modify(&mut record.disable_reasons);
        let changed = before != record.disable_reasons;
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn blocklist(&self, id: &str) -> BlocklistVerdicts {
        self.get(id).map(|p| p.blocklist).unwrap_or_default()
    }

    /// Record a verdict from one source. Returns whether it changed.
    pub fn set_blocklist_verdict(
        &mut self,
        id: &str,
        source: BlocklistSource,
        state: BlocklistState,
    ) -> bool {
        let Some(record) = self.data.extensions.get_mut(id) else {
            return false;
        };
        let changed = record.blocklist.set(source, state);
        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn granted_permissions(&self, id: &str) -> PermissionSet {
        self.get(id)
            .map(|p| p.granted_permissions.clone())
            .unwrap_or_default()
    }

    /// Add permissions to the granted set.
    pub fn grant_permissions(&mut self, id: &str, permissions: &PermissionSet) {
        if let Some(record) = self.data.extensions.get_mut(id) {
            record.granted_permissions.extend(permissions);
            self.dirty = true;
        }
    }

    pub fn file_access(&self, id: &str) -> bool {
        self.get(id).map(|p| p.file_access).unwrap_or(false)
    }

    pub fn set_file_access(&mut self, id: &str, allowed: bool) {
        if let Some(record) = self.data.extensions.get_mut(id) {
            if record.file_access != allowed {
                record.file_access = allowed;
                self.dirty = true;
            }
        }
    }

    /// Remember that the user removed an externally installed extension.
    pub fn mark_external_uninstalled(&mut self, id: &str, location: InstallSource) {
        self.data
            .external_uninstalls
            .insert(id.to_string(), location);
        self.dirty = true;
    }

    /// The location recorded when the user removed the extension, if any.
    pub fn external_uninstall_marker(&self, id: &str) -> Option<InstallSource> {
        self.data.external_uninstalls.get(id).copied()
    }

    pub fn clear_external_uninstalled(&mut self, id: &str) -> bool {
        let removed = self.data.external_uninstalls.remove(id).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Save prefs to disk.
    pub fn save(&mut self) -> WardenResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WardenError::PrefsSave(format!("Failed to create directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(&self.data)
            .map_err(|e| WardenError::PrefsSave(format!("Serialization failed: {}", e)))?;

        fs::write(path, contents)
            .map_err(|e| WardenError::PrefsSave(format!("Write failed: {}", e)))?;

        self.dirty = false;
        Ok(())
    }

    /// Reload prefs from disk, dropping unsaved changes.
    pub fn reload(&mut self) -> WardenResult<()> {
        if let Some(path) = &self.path {
            self.data = Self::load_from_path(path)?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for ExtensionPrefs {
    fn drop(&mut self) {
        // Best-effort save on drop
        if let Err(e) = self.save() {
            tracing::warn!("Failed to save extension prefs on shutdown: {}", e);
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn extension(version: &str) -> Extension {
        Extension {
            id: ID.to_string(),
            name: "Test".to_string(),
            version: version.parse().unwrap(),
            location: InstallSource::ExternalPref,
            is_theme: false,
            permissions: PermissionSet::new().with_apis(["tabs"]),
            creation_flags: CreationFlags::default(),
        }
    }

    #[test]
    fn test_prefs_round_trip_through_disk() {
        let temp_dir = TempDir::new().unwrap();

        let mut prefs = ExtensionPrefs::open(temp_dir.path()).unwrap();
        prefs.on_extension_installed(
            &extension("1.0"),
            ExtensionState::Disabled,
            DisableReason::UserAction.into(),
        );
        prefs.set_blocklist_verdict(ID, BlocklistSource::Telemetry, BlocklistState::Malware);
        prefs.mark_external_uninstalled("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", InstallSource::ExternalPref);
        prefs.save().unwrap();

        let reopened = ExtensionPrefs::open(temp_dir.path()).unwrap();
        let record = reopened.get(ID).unwrap();
        assert_eq!(record.state, ExtensionState::Disabled);
        assert!(record.disable_reasons.contains(DisableReason::UserAction));
        assert_eq!(record.blocklist.telemetry, BlocklistState::Malware);
        assert_eq!(
            reopened.external_uninstall_marker("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            Some(InstallSource::ExternalPref)
        );
    }

    #[test]
    fn test_update_keeps_grants_and_verdicts() {
        let mut prefs = ExtensionPrefs::in_memory();
        prefs.on_extension_installed(&extension("1.0"), ExtensionState::Enabled, DisableReasonSet::empty());
        prefs.grant_permissions(ID, &PermissionSet::new().with_apis(["tabs"]));
        prefs.set_file_access(ID, true);
        prefs.set_blocklist_verdict(ID, BlocklistSource::Database, BlocklistState::PolicyViolation);

        prefs.on_extension_installed(&extension("2.0"), ExtensionState::Enabled, DisableReasonSet::empty());

        let record = prefs.get(ID).unwrap();
        assert_eq!(record.version, "2.0".parse().unwrap());
        assert!(record.granted_permissions.apis.contains("tabs"));
        assert!(record.file_access);
        assert_eq!(record.blocklist.database, BlocklistState::PolicyViolation);
    }

    #[test]
    fn test_disable_reason_edits() {
        let mut prefs = ExtensionPrefs::in_memory();
        prefs.on_extension_installed(&extension("1.0"), ExtensionState::Enabled, DisableReasonSet::empty());

        assert!(prefs.add_disable_reasons(ID, DisableReason::Corrupted.into()));
        assert!(!prefs.add_disable_reasons(ID, DisableReason::Corrupted.into()));
        assert!(prefs.remove_disable_reason(ID, DisableReason::Corrupted));
        assert!(prefs.disable_reasons(ID).is_empty());

        // Unknown ids are ignored
        assert!(!prefs.add_disable_reasons("nope", DisableReason::Corrupted.into()));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(PREFS_FILE), "{not json").unwrap();
        assert!(matches!(
            ExtensionPrefs::open(temp_dir.path()),
            Err(WardenError::PrefsLoad(_))
        ));
    }

    #[test]
    fn test_marker_survives_record_removal() {
        let mut prefs = ExtensionPrefs::in_memory();
        prefs.on_extension_installed(&extension("1.0"), ExtensionState::Enabled, DisableReasonSet::empty());
        prefs.mark_external_uninstalled(ID, InstallSource::ExternalPref);
        prefs.remove(ID);

        assert!(!prefs.contains(ID));
        assert_eq!(prefs.external_uninstall_marker(ID), Some(InstallSource::ExternalPref));
        assert!(prefs.clear_external_uninstalled(ID));
        assert!(prefs.external_uninstall_marker(ID).is_none());
    }
}
