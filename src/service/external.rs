//! Install proposals, install completion, and external providers.

use std::path::PathBuf;
use std::sync::Arc;

use super::ExtensionService;
use crate::blocklist::BlocklistVerdict;
use crate::error::{WardenError, WardenResult};
use crate::events::{DiscardReason, ExtensionEvent, UninstallReason};
use crate::external::{
    ExternalInstallInfo, ExternalInstallInfoFile, ExternalInstallInfoUpdateUrl, ExternalProvider,
    ProviderDelta,
};
use crate::extensions::{CreationFlags, Extension, ExtensionId, InstallSource, Membership, Version};
use crate::pending::{
    CancelFlag, InstalledInfo, ProposalContext, ProposalOutcome, ShouldAllowInstall,
};

/// Work for the installer: materialize one accepted pending request.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub id: ExtensionId,
    /// Echoed back on completion so a superseded install can be recognised.
    pub generation: u64,
    pub source: InstallSource,
    pub expected_version: Option<Version>,
    pub path: Option<PathBuf>,
    pub update_url: Option<String>,
    pub install_parameter: Option<String>,
    pub creation_flags: CreationFlags,
    pub cancel: CancelFlag,
}

impl ExtensionService {
    fn proposal_context(&self, id: &str) -> ProposalContext {
        ProposalContext {
            installed: self
                .registry
                .get_installed_extension(id)
                .map(|extension| InstalledInfo {
                    location: extension.location,
                    version: extension.version.clone(),
                }),
            uninstall_marker: self.prefs.external_uninstall_marker(id),
        }
    }

    fn after_proposal(
        &mut self,
        id: &str,
        source: InstallSource,
        outcome: ProposalOutcome,
    ) -> ProposalOutcome {
        match outcome {
            ProposalOutcome::Rejected(reason) => {
                self.emit(ExtensionEvent::ProposalRejected {
                    id: id.to_string(),
                    source,
                    reason,
                });
            }
            ProposalOutcome::Accepted | ProposalOutcome::Replaced { .. } => {
                if let ProposalOutcome::Replaced { previous } = outcome {
                    tracing::info!("{}: request from {} supersedes {}", id, source, previous);
                }
                if let Some(info) = self.pending.get_by_id(id) {
                    self.install_queue.push(InstallRequest {
                        id: info.id.clone(),
                        generation: info.generation(),
                        source: info.install_source,
                        expected_version: info.version.clone(),
                        path: info.path.clone(),
                        update_url: info.update_url.clone(),
                        install_parameter: info.install_parameter.clone(),
                        creation_flags: info.creation_flags,
                        cancel: info.cancel_flag(),
                    });
                }
                self.emit(ExtensionEvent::PendingAdded {
                    id: id.to_string(),
                    source,
                });
            }
        }
        outcome
    }

    pub fn on_external_extension_file_found(
        &mut self,
        info: &ExternalInstallInfoFile,
    ) -> ProposalOutcome {
        let context = self.proposal_context(&info.id);
        let outcome = self.pending.add_from_external_file(info, &context);
        self.after_proposal(&info.id, info.source, outcome)
    }

    pub fn on_external_extension_update_url_found(
        &mut self,
        info: &ExternalInstallInfoUpdateUrl,
    ) -> ProposalOutcome {
        let context = self.proposal_context(&info.id);
        let outcome = self.pending.add_from_external_update_url(info, &context);
        self.after_proposal(&info.id, info.source, outcome)
    }

    pub fn add_from_sync(
        &mut self,
        id: &str,
        update_url: &str,
        version: Option<Version>,
        should_allow_install: ShouldAllowInstall,
    ) -> ProposalOutcome {
        let context = self.proposal_context(id);
        let outcome =
            self.pending
                .add_from_sync(id, update_url, version, should_allow_install, &context);
        self.after_proposal(id, InstallSource::Internal, outcome)
    }

    /// The user asked to install a local package.
    pub fn install_from_user(
        &mut self,
        id: &str,
        version: Option<Version>,
        path: PathBuf,
    ) -> ProposalOutcome {
        let context = self.proposal_context(id);
        let outcome = self.pending.add_from_user(id, version, path, &context);
        self.after_proposal(id, InstallSource::Internal, outcome)
    }

    /// Drop a pending request. An install already under way for it will
    /// be discarded when it completes.
    pub fn cancel_pending(&mut self, id: &str) -> bool {
        let removed = self.pending.remove(id);
        if removed {
            tracing::debug!("Cancelled pending install of {}", id);
            self.emit(ExtensionEvent::PendingRemoved { id: id.to_string() });
        }
        removed
    }

    /// Installs accepted since the last call.
    pub fn take_install_requests(&mut self) -> Vec<InstallRequest> {
        std::mem::take(&mut self.install_queue)
    }

    /// An installer finished. Returns the new membership, or `None` if the
    /// result was discarded.
    pub fn on_install_complete(
        &mut self,
        id: &str,
        generation: u64,
        result: WardenResult<Extension>,
        verdict: Option<BlocklistVerdict>,
    ) -> Option<Membership> {
        let Some(pending) = self.pending.take_if_current(id, generation) else {
            tracing::debug!("Discarding install of {}: request no longer current", id);
            return self.discard(id, DiscardReason::Cancelled);
        };
        self.emit(ExtensionEvent::PendingRemoved { id: id.to_string() });

        let mut extension = match result {
            Ok(extension) => extension,
            Err(e) => {
                tracing::warn!("Install of {} failed: {}", id, e);
                return self.discard(id, DiscardReason::Failed);
            }
        };

        if extension.id != pending.id {
            tracing::warn!("Install of {} produced {}", pending.id, extension.id);
            return self.discard(id, DiscardReason::IdMismatch);
        }
        if let Some(expected) = &pending.version {
            if extension.version != *expected {
                tracing::warn!(
                    "Install of {} expected version {}, got {}",
                    id,
                    expected,
                    extension.version
                );
                return self.discard(id, DiscardReason::Failed);
            }
        }
        if !pending.should_allow_install.allows(&extension) {
            tracing::debug!("Install of {} fails its theme check", id);
            return self.discard(id, DiscardReason::ThemeMismatch);
        }

        extension.location = pending.install_source;
        extension.creation_flags = pending.creation_flags;

        match self.add_extension(extension, pending.mark_acknowledged, verdict) {
            Ok(membership) => Some(membership),
            Err(WardenError::PolicyForbids {
                action: "install", ..
            }) => self.discard(id, DiscardReason::Blocklisted),
            Err(e) => {
                tracing::warn!("Could not register {}: {}", id, e);
                self.discard(id, DiscardReason::Failed)
            }
        }
    }

    fn discard(&self, id: &str, reason: DiscardReason) -> Option<Membership> {
        self.emit(ExtensionEvent::InstallDiscarded {
            id: id.to_string(),
            reason,
        });
        None
    }

    /// Clear the user's "removed an external install" marker. Only an
    /// authority at least as strong as the source it was removed from may.
    pub fn clear_external_uninstall(&mut self, id: &str, authority: InstallSource) -> bool {
        let Some(marker) = self.prefs.external_uninstall_marker(id) else {
            return false;
        };
        if authority.compare_priority(marker).is_lt() {
            tracing::debug!(
                "{} may not clear the uninstall marker {} set for {}",
                authority,
                marker,
                id
            );
            return false;
        }
        self.prefs.clear_external_uninstalled(id)
    }

    // -- providers --------------------------------------------------------------

    pub fn register_external_provider(&mut self, provider: Arc<dyn ExternalProvider>) {
        tracing::debug!("Registered external provider '{}'", provider.name());
        self.providers
            .retain(|existing| existing.name() != provider.name());
        self.ready_providers.remove(provider.name());
        self.providers.push(provider);
    }

    pub fn external_providers(&self) -> Vec<Arc<dyn ExternalProvider>> {
        self.providers.clone()
    }

    pub fn all_providers_ready(&self) -> bool {
        self.providers
            .iter()
            .all(|provider| self.ready_providers.contains(provider.name()))
    }

    fn propose_external(&mut self, info: &ExternalInstallInfo) -> ProposalOutcome {
        match info {
            ExternalInstallInfo::File(file) => self.on_external_extension_file_found(file),
            ExternalInstallInfo::UpdateUrl(url) => self.on_external_extension_update_url_found(url),
        }
    }

    /// A full provider scan finished. A provider whose scan failed is not
    /// ready, which holds back orphan cleanup.
    pub fn on_provider_scanned(
        &mut self,
        provider: &str,
        result: WardenResult<Vec<ExternalInstallInfo>>,
    ) {
        let infos = match result {
            Ok(infos) => infos,
            Err(e) => {
                tracing::warn!("External provider '{}' failed: {}", provider, e);
                return;
            }
        };

        for info in &infos {
            self.propose_external(info);
        }

        self.ready_providers.insert(provider.to_string());
        if self.all_providers_ready() {
            self.on_all_external_providers_ready();
        }
    }

    /// Incremental change from a provider between full scans.
    pub fn on_provider_updated(&mut self, provider: &str, delta: ProviderDelta) {
        tracing::debug!(
            "External provider '{}': {} updated, {} removed",
            provider,
            delta.updated.len(),
            delta.removed.len()
        );
        for info in &delta.updated {
            self.propose_external(info);
        }
        for id in &delta.removed {
            self.check_external_uninstall(id);
        }
    }

    fn on_all_external_providers_ready(&mut self) {
        tracing::info!("All external providers ready");
        for extension in self.installed() {
            self.check_external_uninstall(&extension.id);
        }
    }

    /// Uninstall an external extension no provider lists any more.
    fn check_external_uninstall(&mut self, id: &str) {
        if self
            .providers
            .iter()
            .any(|provider| provider.has_extension(id))
        {
            return;
        }

        let pending_external = self
            .pending
            .get_by_id(id)
            .is_some_and(|info| info.install_source.is_external());
        if pending_external {
            self.cancel_pending(id);
        }

        let Some(extension) = self.registry.get_installed_extension(id) else {
            return;
        };
        if !extension.location.is_external() || extension.is_component() {
            return;
        }
        if self.policy.must_remain_installed(&extension) {
            tracing::debug!("Keeping orphaned {}: policy requires it", id);
            return;
        }

        tracing::info!("Uninstalling {}: no external provider lists it", id);
        if let Err(e) = self.uninstall_extension(id, UninstallReason::OrphanedExternal) {
            tracing::warn!("Failed to uninstall orphaned {}: {}", id, e);
        }
    }
}
