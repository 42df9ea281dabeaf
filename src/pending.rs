//! Install requests that have not materialized yet.
//!
//! Any number of authorities may ask for the same id: a user click, sync,
//! several external providers, enterprise policy. [`PendingExtensionManager`]
//! keeps at most one request per id and decides which one wins.
//!
//! Arbitration, in order:
//! 1. An external proposal for an id the user removed from an external
//!    source is rejected while the uninstall marker stands.
//! 2. Sync never proposes something already installed.
//! 3. Against an installed extension, a lower-priority source loses, and
//!    an equal-priority source needs a strictly newer version. A
//!    version-less proposal has nothing to compare and may proceed.
//! 4. Against a pending request, sync always loses to non-sync and
//!    non-sync always beats sync. Otherwise a lower-priority source loses,
//!    a strictly higher one wins, and within a tier the strictly newer
//!    version wins (a version-less proposal beats a versioned one).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::external::{ExternalInstallInfoFile, ExternalInstallInfoUpdateUrl};
use crate::extensions::{CreationFlags, Extension, ExtensionId, InstallSource, Version};

/// Check applied to the extension once it materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShouldAllowInstall {
    #[default]
    Any,
    MustBeTheme,
    MustNotBeTheme,
}

impl ShouldAllowInstall {
    pub fn allows(self, extension: &Extension) -> bool {
        match self {
            ShouldAllowInstall::Any => true,
            ShouldAllowInstall::MustBeTheme => extension.is_theme,
            ShouldAllowInstall::MustNotBeTheme => !extension.is_theme,
        }
    }
}

/// Shared flag an in-flight install checks to learn its request is gone.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }

    fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }
}

/// A registered intent to install one id.
#[derive(Debug, Clone)]
pub struct PendingExtensionInfo {
    pub id: ExtensionId,
    /// `None` means "whatever the update url serves".
    pub version: Option<Version>,
    pub install_source: InstallSource,
    pub should_allow_install: ShouldAllowInstall,
    pub is_from_sync: bool,
    pub update_url: Option<String>,
    pub install_parameter: Option<String>,
    /// Local file to install from, for file proposals.
    pub path: Option<PathBuf>,
    pub creation_flags: CreationFlags,
    pub mark_acknowledged: bool,
    generation: u64,
    cancel: CancelFlag,
}

impl PendingExtensionInfo {
    fn new(id: &str, install_source: InstallSource) -> Self {
        Self {
            id: id.to_string(),
            version: None,
            install_source,
            should_allow_install: ShouldAllowInstall::Any,
            is_from_sync: false,
            update_url: None,
            install_parameter: None,
            path: None,
            creation_flags: CreationFlags::default(),
            mark_acknowledged: false,
            generation: 0,
            cancel: CancelFlag::default(),
        }
    }

    /// Identifies this particular request; a replacement for the same id
    /// gets a new generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// What the caller knows about an installed copy of the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledInfo {
    pub location: InstallSource,
    pub version: Version,
}

/// State outside the pending table that arbitration depends on.
#[derive(Debug, Clone, Default)]
pub struct ProposalContext {
    pub installed: Option<InstalledInfo>,
    /// Location recorded when the user removed an external install.
    pub uninstall_marker: Option<InstallSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidId,
    ExternallyUninstalled,
    AlreadyInstalled,
    HigherPriorityInstalled,
    HigherPriorityPending,
    /// Sync does not override a request from any other authority.
    SyncYields,
    NotNewer,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidId => "invalid-id",
            RejectReason::ExternallyUninstalled => "externally-uninstalled",
            RejectReason::AlreadyInstalled => "already-installed",
            RejectReason::HigherPriorityInstalled => "higher-priority-installed",
            RejectReason::HigherPriorityPending => "higher-priority-pending",
            RejectReason::SyncYields => "sync-yields",
            RejectReason::NotNewer => "not-newer",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of proposing an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalOutcome {
    Accepted,
    /// Accepted, superseding a pending request from `previous`.
    Replaced { previous: InstallSource },
    Rejected(RejectReason),
}

impl ProposalOutcome {
    pub fn is_accepted(self) -> bool {
        !matches!(self, ProposalOutcome::Rejected(_))
    }
}

/// Pending install requests, one per id.
#[derive(Debug, Default)]
pub struct PendingExtensionManager {
    pending: BTreeMap<ExtensionId, PendingExtensionInfo>,
    next_generation: u64,
}

impl PendingExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose an install requested through sync. Sync carries the
    /// internal location.
    pub fn add_from_sync(
        &mut self,
        id: &str,
        update_url: &str,
        version: Option<Version>,
        should_allow_install: ShouldAllowInstall,
        context: &ProposalContext,
    ) -> ProposalOutcome {
        let mut info = PendingExtensionInfo::new(id, InstallSource::Internal);
        info.is_from_sync = true;
        info.version = version;
        info.update_url = Some(update_url.to_string());
        info.should_allow_install = should_allow_install;
        self.add(info, context)
    }

    /// Propose installing a local file found by an external provider.
    pub fn add_from_external_file(
        &mut self,
        proposal: &ExternalInstallInfoFile,
        context: &ProposalContext,
    ) -> ProposalOutcome {
        let mut info = PendingExtensionInfo::new(&proposal.id, proposal.source);
        info.version = Some(proposal.version.clone());
        info.path = Some(proposal.path.clone());
        info.creation_flags = proposal.creation_flags;
        info.mark_acknowledged = proposal.mark_acknowledged;
        self.add(info, context)
    }

    /// Propose installing from an update url found by an external
    /// provider. The version is whatever the url serves.
    pub fn add_from_external_update_url(
        &mut self,
        proposal: &ExternalInstallInfoUpdateUrl,
        context: &ProposalContext,
    ) -> ProposalOutcome {
        let mut info = PendingExtensionInfo::new(&proposal.id, proposal.source);
        info.update_url = Some(proposal.update_url.clone());
        info.install_parameter = proposal.install_parameter.clone();
        info.creation_flags = proposal.creation_flags;
        info.mark_acknowledged = proposal.mark_acknowledged;
        self.add(info, context)
    }

    /// Propose a user install of a local file.
    pub fn add_from_user(
        &mut self,
        id: &str,
        version: Option<Version>,
        path: PathBuf,
        context: &ProposalContext,
    ) -> ProposalOutcome {
        let mut info = PendingExtensionInfo::new(id, InstallSource::Internal);
        info.version = version;
        info.path = Some(path);
        self.add(info, context)
    }

    fn add(&mut self, mut info: PendingExtensionInfo, context: &ProposalContext) -> ProposalOutcome {
        if !crate::extensions::is_valid_id(&info.id) {
            return self.reject(&info, RejectReason::InvalidId);
        }

        let previous = match self.arbitrate(&info, context) {
            Ok(previous) => previous,
            Err(reason) => return self.reject(&info, reason),
        };

        self.next_generation += 1;
        info.generation = self.next_generation;

        tracing::debug!(
            "Pending install of {} from {} (version {})",
            info.id,
            info.install_source,
            info.version
                .as_ref()
                .map_or_else(|| "any".to_string(), Version::to_string)
        );

        let id = info.id.clone();
        if let Some(old) = self.pending.insert(id, info) {
            old.cancel.cancel();
        }

        match previous {
            Some(previous) => ProposalOutcome::Replaced { previous },
            None => ProposalOutcome::Accepted,
        }
    }

    fn reject(&self, info: &PendingExtensionInfo, reason: RejectReason) -> ProposalOutcome {
        tracing::debug!(
            "Rejected install of {} from {}: {}",
            info.id,
            info.install_source,
            reason
        );
        ProposalOutcome::Rejected(reason)
    }

    /// `Ok(Some(source))` when the proposal replaces a pending request.
    fn arbitrate(
        &self,
        proposal: &PendingExtensionInfo,
        context: &ProposalContext,
    ) -> Result<Option<InstallSource>, RejectReason> {
        if proposal.install_source.is_external() && context.uninstall_marker.is_some() {
            return Err(RejectReason::ExternallyUninstalled);
        }

        if let Some(installed) = &context.installed {
            if proposal.is_from_sync {
                return Err(RejectReason::AlreadyInstalled);
            }
            match proposal.install_source.compare_priority(installed.location) {
                std::cmp::Ordering::Less => return Err(RejectReason::HigherPriorityInstalled),
                std::cmp::Ordering::Greater => {}
                std::cmp::Ordering::Equal => match &proposal.version {
                    Some(version) if *version <= installed.version => {
                        return Err(RejectReason::NotNewer)
                    }
                    _ => {}
                },
            }
        }

        let Some(existing) = self.pending.get(&proposal.id) else {
            return Ok(None);
        };

        match (existing.is_from_sync, proposal.is_from_sync) {
            (false, true) => return Err(RejectReason::SyncYields),
            (true, false) => return Ok(Some(existing.install_source)),
            _ => {}
        }

        match proposal
            .install_source
            .compare_priority(existing.install_source)
        {
            std::cmp::Ordering::Less => Err(RejectReason::HigherPriorityPending),
            std::cmp::Ordering::Greater => Ok(Some(existing.install_source)),
            std::cmp::Ordering::Equal => match (&proposal.version, &existing.version) {
                (Some(new), Some(old)) if new > old => Ok(Some(existing.install_source)),
                (None, Some(_)) => Ok(Some(existing.install_source)),
                _ => Err(RejectReason::NotNewer),
            },
        }
    }

    /// Drop a request. An install already under way for it will discard
    /// its result.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.pending.remove(id) {
            Some(info) => {
                info.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Hand over the request an install just completed for, if it is
    /// still the current one.
    pub fn take_if_current(&mut self, id: &str, generation: u64) -> Option<PendingExtensionInfo> {
        match self.pending.get(id) {
            Some(info) if info.generation == generation && !info.cancel.is_cancelled() => {
                self.pending.remove(id)
            }
            _ => None,
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<&PendingExtensionInfo> {
        self.pending.get(id)
    }

    pub fn is_id_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn has_pending_from_sync(&self) -> bool {
        self.pending.values().any(|info| info.is_from_sync)
    }

    pub fn ids(&self) -> Vec<ExtensionId> {
        self.pending.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingExtensionInfo> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
