//! Per-profile context.
//!
//! Everything that would otherwise be a process-wide singleton (prefs
//! location, config, the event bus) hangs off a [`ProfileContext`] that is
//! passed to constructors. Two profiles never share state.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::WardenResult;
use crate::events::EventBus;
use crate::extensions::ExtensionPrefs;

#[derive(Debug, Clone)]
pub struct ProfileContext {
    /// `None` for a profile that never touches the disk.
    data_dir: Option<PathBuf>,
    config: Config,
    events: EventBus,
}

impl ProfileContext {
    /// A profile persisted under `config.profile.data_dir`.
    pub fn new(config: Config) -> Self {
        Self {
            data_dir: Some(config.profile.data_dir.clone()),
            config,
            events: EventBus::default(),
        }
    }

    /// A profile kept entirely in memory.
    pub fn ephemeral(config: Config) -> Self {
        Self {
            data_dir: None,
            config,
            events: EventBus::default(),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Open this profile's extension prefs.
    pub fn open_prefs(&self) -> WardenResult<ExtensionPrefs> {
        match &self.data_dir {
            Some(dir) => ExtensionPrefs::open(dir),
            None => Ok(ExtensionPrefs::in_memory()),
        }
    }
}
