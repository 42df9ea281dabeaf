//! Extension manifest parsing.
//!
//! Each unpacked extension directory carries a `manifest.toml` that names
//! the extension and lists what it asks for:
//! - Extension metadata (id, name, version, theme flag)
//! - Permissions (API names and host patterns)
//!
//! Full manifest schema validation belongs to the installer; this is the
//! subset the lifecycle code needs to materialize an [`Extension`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::permissions::PermissionSet;
use super::{is_valid_id, CreationFlags, Extension, InstallSource, Version};
use crate::error::{WardenError, WardenResult};

pub const MANIFEST_FILE: &str = "manifest.toml";

/// Complete extension manifest parsed from `manifest.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub extension: ExtensionMeta,

    #[serde(default)]
    pub permissions: PermissionsConfig,
}

impl ExtensionManifest {
    /// Load manifest from a directory containing `manifest.toml`.
    pub fn load(extension_dir: &Path) -> WardenResult<Self> {
        let manifest_path = extension_dir.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            return Err(WardenError::ManifestNotFound(extension_dir.to_path_buf()));
        }

        let content = std::fs::read_to_string(&manifest_path)?;

        toml::from_str(&content).map_err(|e| WardenError::ManifestInvalid {
            path: manifest_path,
            message: e.to_string(),
        })
    }

    /// Validate the manifest for required fields and constraints.
    pub fn validate(&self) -> WardenResult<()> {
        if !is_valid_id(&self.extension.id) {
            return Err(WardenError::ManifestInvalid {
                path: MANIFEST_FILE.into(),
                message: format!("'{}' is not a valid extension id", self.extension.id),
            });
        }

        if self.extension.name.is_empty() {
            return Err(WardenError::ManifestInvalid {
                path: MANIFEST_FILE.into(),
                message: "extension.name is required".to_string(),
            });
        }

        if self.extension.version.parse::<Version>().is_err() {
            return Err(WardenError::ManifestInvalid {
                path: MANIFEST_FILE.into(),
                message: format!("'{}' is not a valid version", self.extension.version),
            });
        }

        Ok(())
    }

    /// Materialize the manifest into an extension record.
    pub fn into_extension(
        self,
        location: InstallSource,
        creation_flags: CreationFlags,
    ) -> WardenResult<Extension> {
        self.validate()?;
        let version = self.extension.version.parse()?;
        Ok(Extension {
            id: self.extension.id,
            name: self.extension.name,
            version,
            location,
            is_theme: self.extension.theme,
            permissions: PermissionSet::from_manifest(&self.permissions),
            creation_flags,
        })
    }
}

/// Extension metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMeta {
    /// 32-character id in `a..=p`.
    pub id: String,

    /// Human-readable display name.
    pub name: String,

    /// Dotted version (e.g., "1.0.0.2").
    pub version: String,

    /// Themes carry no code and are arbitrated separately by sync.
    #[serde(default)]
    pub theme: bool,
}

/// Permission configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// API permission names.
    #[serde(default)]
    pub apis: Vec<String>,

    /// Host patterns (supports wildcards like "*.github.com").
    #[serde(default)]
    pub hosts: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ID: &str = "abcdefghijklmnopabcdefghijklmnop";

    fn write_manifest(dir: &Path, body: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn test_load_and_materialize() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            &format!(
                r#"
[extension]
id = "{ID}"
name = "Reader"
version = "1.2"

[permissions]
apis = ["tabs"]
hosts = ["*.example.com"]
"#
            ),
        );

        let manifest = ExtensionManifest::load(temp.path()).unwrap();
        let ext = manifest
            .into_extension(InstallSource::ExternalPref, CreationFlags::default())
            .unwrap();

        assert_eq!(ext.id, ID);
        assert_eq!(ext.version, "1.2.0".parse().unwrap());
        assert_eq!(ext.location, InstallSource::ExternalPref);
        assert!(!ext.is_theme);
        assert!(ext.permissions.apis.contains("tabs"));
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            ExtensionManifest::load(temp.path()),
            Err(WardenError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_manifest_rejected() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            "[extension]\nid = \"short\"\nname = \"x\"\nversion = \"1\"\n",
        );
        let manifest = ExtensionManifest::load(temp.path()).unwrap();
        assert!(manifest.validate().is_err());

        write_manifest(temp.path(), "[extension\n");
        assert!(matches!(
            ExtensionManifest::load(temp.path()),
            Err(WardenError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn test_bad_version_rejected() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            &format!("[extension]\nid = \"{ID}\"\nname = \"x\"\nversion = \"one\"\n"),
        );
        let manifest = ExtensionManifest::load(temp.path()).unwrap();
        assert!(manifest.validate().is_err());
    }
}
