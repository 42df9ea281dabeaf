use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{WardenError, WardenResult};
use crate::extensions::InstallSource;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub profile: ProfileConfig,
    pub blocklist: BlocklistConfig,
    pub service: ServiceConfig,
    pub policy: PolicyConfig,
    pub external: ExternalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocklistConfig {
    /// How long a remote state fetch may take before it resolves clean.
    pub fetch_timeout_ms: u64,
    /// Optional local snapshot file (see `SnapshotDatabase::load`).
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Depth of the orchestrator's command queue.
    pub command_buffer: usize,
}

/// Enterprise policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Ids that may not be loaded. `"*"` blocks everything not allowlisted.
    pub blocklist: Vec<String>,
    /// Ids exempt from a `"*"` blocklist.
    pub allowlist: Vec<String>,
    /// Extensions that must be installed, and from where.
    pub forcelist: Vec<ForcelistEntry>,
    /// When set, only these sources may provide extensions.
    pub allowed_install_sources: Option<Vec<InstallSource>>,
    /// Ids whose settings users may not change.
    pub settings_locked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForcelistEntry {
    pub id: String,
    pub update_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub pref_dirs: Vec<PrefDirConfig>,
}

/// A directory of `<id>.json` external extension descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefDirConfig {
    pub path: PathBuf,
    #[serde(default = "default_pref_dir_source")]
    pub source: InstallSource,
}

fn default_pref_dir_source() -> InstallSource {
    InstallSource::ExternalPref
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .map(|d| d.join("warden").join("default"))
                .unwrap_or_else(|| PathBuf::from("/tmp/warden/default")),
        }
    }
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5000,
            snapshot: None,
        }
    }
}

impl BlocklistConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { command_buffer: 64 }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("warden")
            .join("config.toml")
    }

    /// Load config from the default path, or return defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::error!("Failed to parse config {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read config {}: {}", path.display(), e);
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate();
        config
    }

    /// Validate and clamp config values to acceptable ranges
    fn validate(&mut self) {
        self.blocklist.fetch_timeout_ms = self.blocklist.fetch_timeout_ms.clamp(100, 60_000);
        self.service.command_buffer = self.service.command_buffer.clamp(1, 4096);
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> WardenResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| WardenError::PrefsSave(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)?;
        Ok(())
    }
}
