//! Provider reading `<id>.json` descriptors from a directory.
//!
//! Each descriptor names either a local package and its version, or an
//! update url:
//!
//! ```json
//! { "external_crx": "x.crx", "external_version": "1.0" }
//! { "external_update_url": "https://example.com/update" }
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;
use walkdir::WalkDir;

use super::{
    details_from, ExternalInstallInfo, ExternalInstallInfoFile, ExternalInstallInfoUpdateUrl,
    ExternalProvider,
};
use crate::error::WardenResult;
use crate::extensions::{is_valid_id, CreationFlags, InstallSource, Version};

#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    external_crx: Option<PathBuf>,
    external_version: Option<String>,
    external_update_url: Option<String>,
    install_parameter: Option<String>,
    #[serde(default)]
    was_installed_by_oem: bool,
    #[serde(default)]
    was_installed_by_default: bool,
}

pub struct PrefDirProvider {
    name: String,
    dir: PathBuf,
    crx_location: InstallSource,
    download_location: InstallSource,
    last_scan: RwLock<Vec<ExternalInstallInfo>>,
}

impl PrefDirProvider {
    /// `source` is the location of file installs; update url installs get
    /// the matching download location.
    pub fn new(dir: impl Into<PathBuf>, source: InstallSource) -> Self {
        let dir = dir.into();
        Self {
            name: format!("pref-dir:{}", dir.display()),
            dir,
            crx_location: source,
            download_location: download_location_for(source),
            last_scan: RwLock::new(Vec::new()),
        }
    }

    fn parse_descriptor(&self, path: &Path) -> Option<ExternalInstallInfo> {
        let id = path.file_stem()?.to_string_lossy().to_string();
        if !is_valid_id(&id) {
            tracing::warn!("Skipping {}: '{}' is not a valid extension id", path.display(), id);
            return None;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };
        let descriptor: Descriptor = match serde_json::from_str(&content) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                return None;
            }
        };

        let creation_flags = CreationFlags {
            from_webstore: false,
            was_installed_by_default: descriptor.was_installed_by_default,
            was_installed_by_oem: descriptor.was_installed_by_oem,
        };

        match (
            descriptor.external_crx,
            descriptor.external_version,
            descriptor.external_update_url,
        ) {
            (Some(crx), Some(version), None) => {
                let version: Version = match version.parse() {
                    Ok(version) => version,
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", path.display(), e);
                        return None;
                    }
                };
                let crx = if crx.is_absolute() { crx } else { self.dir.join(crx) };
                Some(ExternalInstallInfo::File(ExternalInstallInfoFile {
                    id,
                    version,
                    path: crx,
                    source: self.crx_location,
                    creation_flags,
                    mark_acknowledged: false,
                }))
            }
            (None, None, Some(update_url)) if !update_url.is_empty() => {
                Some(ExternalInstallInfo::UpdateUrl(ExternalInstallInfoUpdateUrl {
                    id,
                    install_parameter: descriptor.install_parameter,
                    update_url,
                    source: self.download_location,
                    creation_flags,
                    mark_acknowledged: false,
                }))
            }
            _ => {
                tracing::warn!(
                    "Skipping {}: needs external_crx with external_version, or external_update_url alone",
                    path.display()
                );
                None
            }
        }
    }
}

fn download_location_for(source: InstallSource) -> InstallSource {
    match source {
        InstallSource::ExternalPref => InstallSource::ExternalPrefDownload,
        InstallSource::ExternalPolicy => InstallSource::ExternalPolicyDownload,
        InstallSource::ExternalRegistry => InstallSource::ExternalPrefDownload,
        other => other,
    }
}

impl ExternalProvider for PrefDirProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn visit_registered_extensions(&self) -> WardenResult<Vec<ExternalInstallInfo>> {
        let mut infos = Vec::new();

        if self.dir.is_dir() {
            for entry in WalkDir::new(&self.dir)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "json") {
                    continue;
                }
                if let Some(info) = self.parse_descriptor(path) {
                    infos.push(info);
                }
            }
        } else {
            tracing::debug!("External pref dir {} does not exist", self.dir.display());
        }

        tracing::info!("{} listed {} extension(s)", self.name, infos.len());

        match self.last_scan.write() {
            Ok(mut last) => *last = infos.clone(),
            Err(poisoned) => *poisoned.into_inner() = infos.clone(),
        }
        Ok(infos)
    }

    fn has_extension(&self, id: &str) -> bool {
        self.get_extension_details(id).is_some()
    }

    fn get_extension_details(&self, id: &str) -> Option<(InstallSource, Option<Version>)> {
        match self.last_scan.read() {
            Ok(last) => details_from(&last, id),
            Err(poisoned) => details_from(&poisoned.into_inner(), id),
        }
    }
}
