//! Single-task driver for [`ExtensionService`].
//!
//! The runner owns the service on one tokio task and applies commands in
//! the order they arrive, so no two operations on the same extension ever
//! interleave. Slow work runs on spawned tasks:
//! - Blocklist rounds query [`Blocklist`] and come back as results
//! - Installs run the [`ExtensionInstaller`] plus an install-time check
//! - Provider scans run on the blocking pool
//!
//! Each finishes by queueing a completion command behind whatever is
//! already waiting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{ExtensionService, InstallRequest, ServiceSnapshot};
use crate::blocklist::{Blocklist, BlocklistState, BlocklistVerdict};
use crate::error::{WardenError, WardenResult};
use crate::events::{ExtensionEvent, EventBus, UninstallReason};
use crate::external::{
    ExternalInstallInfo, ExternalInstallInfoFile, ExternalInstallInfoUpdateUrl, ExternalProvider,
    ProviderDelta,
};
use crate::extensions::{
    DisableReason, DisableReasonSet, Extension, ExtensionId, ExtensionManifest, InstallSource,
    Membership, Version,
};
use crate::pending::{ProposalOutcome, ShouldAllowInstall};
use crate::policy::ManagementPolicyProvider;

/// Turns an accepted install request into an extension.
#[async_trait]
pub trait ExtensionInstaller: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> WardenResult<Extension>;
}

/// Installer that reads an unpacked extension's `manifest.toml`.
///
/// File requests install from their path. Update url requests install from
/// `<update_cache_dir>/<id>`, where a downloader is expected to have put
/// the package.
#[derive(Debug, Clone, Default)]
pub struct ManifestInstaller {
    update_cache_dir: Option<PathBuf>,
}

impl ManifestInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_cache(dir: impl Into<PathBuf>) -> Self {
        Self {
            update_cache_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl ExtensionInstaller for ManifestInstaller {
    async fn install(&self, request: &InstallRequest) -> WardenResult<Extension> {
        let dir = match (&request.path, &request.update_url, &self.update_cache_dir) {
            (Some(path), _, _) => path.clone(),
            (None, Some(_), Some(cache)) => cache.join(&request.id),
            _ => {
                return Err(WardenError::InstallFailed {
                    id: request.id.clone(),
                    message: "no package to install from".to_string(),
                })
            }
        };

        let id = request.id.clone();
        let location = request.source;
        let flags = request.creation_flags;
        tokio::task::spawn_blocking(move || {
            ExtensionManifest::load(&dir)?.into_extension(location, flags)
        })
        .await
        .map_err(|e| WardenError::InstallFailed {
            id,
            message: e.to_string(),
        })?
    }
}

type Reply<T> = oneshot::Sender<T>;

/// Messages understood by the runner.
enum ServiceCommand {
    Enable {
        id: ExtensionId,
        reply: Reply<WardenResult<Membership>>,
    },
    Disable {
        id: ExtensionId,
        reasons: DisableReasonSet,
        reply: Reply<WardenResult<Membership>>,
    },
    RemoveDisableReason {
        id: ExtensionId,
        reason: DisableReason,
        reply: Reply<WardenResult<Membership>>,
    },
    SetEnabledByExtension {
        initiator: ExtensionId,
        target: ExtensionId,
        enabled: bool,
        reply: Reply<WardenResult<Membership>>,
    },
    Reload {
        id: ExtensionId,
        reply: Reply<WardenResult<Membership>>,
    },
    Terminate {
        id: ExtensionId,
        reply: Reply<bool>,
    },
    Uninstall {
        id: ExtensionId,
        reply: Reply<WardenResult<()>>,
    },
    AcknowledgeExternal {
        id: ExtensionId,
        reply: Reply<WardenResult<Membership>>,
    },
    GrantPermissions {
        id: ExtensionId,
        reply: Reply<WardenResult<()>>,
    },
    SetFileAccess {
        id: ExtensionId,
        allowed: bool,
        reply: Reply<WardenResult<()>>,
    },
    SetTelemetryVerdict {
        id: ExtensionId,
        state: BlocklistState,
        reply: Reply<WardenResult<Membership>>,
    },
    BlockAll {
        reply: Reply<()>,
    },
    UnblockAll {
        reply: Reply<()>,
    },
    CheckManagementPolicy {
        reply: Reply<Vec<ExtensionId>>,
    },
    RegisterPolicyProvider {
        provider: Arc<dyn ManagementPolicyProvider>,
        reply: Reply<()>,
    },
    UnregisterPolicyProvider {
        name: String,
        reply: Reply<bool>,
    },
    RegisterExternalProvider {
        provider: Arc<dyn ExternalProvider>,
        reply: Reply<()>,
    },
    ProviderUpdated {
        name: String,
        delta: ProviderDelta,
        reply: Reply<()>,
    },
    FileFound {
        info: ExternalInstallInfoFile,
        reply: Reply<ProposalOutcome>,
    },
    UpdateUrlFound {
        info: ExternalInstallInfoUpdateUrl,
        reply: Reply<ProposalOutcome>,
    },
    AddFromSync {
        id: ExtensionId,
        update_url: String,
        version: Option<Version>,
        should_allow_install: ShouldAllowInstall,
        reply: Reply<ProposalOutcome>,
    },
    InstallFromUser {
        id: ExtensionId,
        version: Option<Version>,
        path: PathBuf,
        reply: Reply<ProposalOutcome>,
    },
    CancelPending {
        id: ExtensionId,
        reply: Reply<bool>,
    },
    ClearExternalUninstall {
        id: ExtensionId,
        authority: InstallSource,
        reply: Reply<bool>,
    },
    CheckBlocklist {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<ServiceSnapshot>,
    },
    WhenIdle {
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<WardenResult<()>>,
    },

    // Completions from spawned work.
    BlocklistChecked {
        queried: Vec<ExtensionId>,
        results: HashMap<ExtensionId, BlocklistVerdict>,
    },
    InstallComplete {
        id: ExtensionId,
        generation: u64,
        result: WardenResult<Extension>,
        verdict: Option<BlocklistVerdict>,
    },
    ProviderScanned {
        name: String,
        result: WardenResult<Vec<ExternalInstallInfo>>,
    },
}

/// Cloneable client of a running [`ServiceRunner`].
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<ServiceCommand>,
    events: EventBus,
}

impl ServiceHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ServiceCommand,
    ) -> WardenResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| WardenError::ServiceClosed)?;
        rx.await.map_err(|_| WardenError::ServiceClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.events.subscribe()
    }

    pub async fn enable_extension(&self, id: &str) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Enable { id, reply })
            .await?
    }

    pub async fn disable_extension(
        &self,
        id: &str,
        reasons: DisableReasonSet,
    ) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Disable { id, reasons, reply })
            .await?
    }

    pub async fn remove_disable_reason(
        &self,
        id: &str,
        reason: DisableReason,
    ) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::RemoveDisableReason { id, reason, reply })
            .await?
    }

    pub async fn set_enabled_by_extension(
        &self,
        initiator: &str,
        target: &str,
        enabled: bool,
    ) -> WardenResult<Membership> {
        let initiator = initiator.to_string();
        let target = target.to_string();
        self.request(|reply| ServiceCommand::SetEnabledByExtension {
            initiator,
            target,
            enabled,
            reply,
        })
        .await?
    }

    pub async fn reload_extension(&self, id: &str) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Reload { id, reply })
            .await?
    }

    pub async fn terminate_extension(&self, id: &str) -> WardenResult<bool> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Terminate { id, reply })
            .await
    }

    /// User uninstall.
    pub async fn uninstall_extension(&self, id: &str) -> WardenResult<()> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::Uninstall { id, reply })
            .await?
    }

    pub async fn acknowledge_external_extension(&self, id: &str) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::AcknowledgeExternal { id, reply })
            .await?
    }

    pub async fn grant_permissions(&self, id: &str) -> WardenResult<()> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::GrantPermissions { id, reply })
            .await?
    }

    pub async fn set_file_access(&self, id: &str, allowed: bool) -> WardenResult<()> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::SetFileAccess { id, allowed, reply })
            .await?
    }

    pub async fn set_telemetry_verdict(
        &self,
        id: &str,
        state: BlocklistState,
    ) -> WardenResult<Membership> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::SetTelemetryVerdict { id, state, reply })
            .await?
    }

    pub async fn block_all_extensions(&self) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::BlockAll { reply }).await
    }

    pub async fn unblock_all_extensions(&self) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::UnblockAll { reply }).await
    }

    pub async fn check_management_policy(&self) -> WardenResult<Vec<ExtensionId>> {
        self.request(|reply| ServiceCommand::CheckManagementPolicy { reply })
            .await
    }

    pub async fn register_policy_provider(
        &self,
        provider: Arc<dyn ManagementPolicyProvider>,
    ) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::RegisterPolicyProvider { provider, reply })
            .await
    }

    pub async fn unregister_policy_provider(&self, name: &str) -> WardenResult<bool> {
        let name = name.to_string();
        self.request(|reply| ServiceCommand::UnregisterPolicyProvider { name, reply })
            .await
    }

    /// Register a provider and start its first scan.
    pub async fn register_external_provider(
        &self,
        provider: Arc<dyn ExternalProvider>,
    ) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::RegisterExternalProvider { provider, reply })
            .await
    }

    pub async fn on_provider_updated(&self, name: &str, delta: ProviderDelta) -> WardenResult<()> {
        let name = name.to_string();
        self.request(|reply| ServiceCommand::ProviderUpdated { name, delta, reply })
            .await
    }

    pub async fn on_external_extension_file_found(
        &self,
        info: ExternalInstallInfoFile,
    ) -> WardenResult<ProposalOutcome> {
        self.request(|reply| ServiceCommand::FileFound { info, reply })
            .await
    }

    pub async fn on_external_extension_update_url_found(
        &self,
        info: ExternalInstallInfoUpdateUrl,
    ) -> WardenResult<ProposalOutcome> {
        self.request(|reply| ServiceCommand::UpdateUrlFound { info, reply })
            .await
    }

    pub async fn add_from_sync(
        &self,
        id: &str,
        update_url: &str,
        version: Option<Version>,
        should_allow_install: ShouldAllowInstall,
    ) -> WardenResult<ProposalOutcome> {
        let id = id.to_string();
        let update_url = update_url.to_string();
        self.request(|reply| ServiceCommand::AddFromSync {
            id,
            update_url,
            version,
            should_allow_install,
            reply,
        })
        .await
    }

    pub async fn install_from_user(
        &self,
        id: &str,
        version: Option<Version>,
        path: PathBuf,
    ) -> WardenResult<ProposalOutcome> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::InstallFromUser {
            id,
            version,
            path,
            reply,
        })
        .await
    }

    pub async fn cancel_pending(&self, id: &str) -> WardenResult<bool> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::CancelPending { id, reply })
            .await
    }

    pub async fn clear_external_uninstall(
        &self,
        id: &str,
        authority: InstallSource,
    ) -> WardenResult<bool> {
        let id = id.to_string();
        self.request(|reply| ServiceCommand::ClearExternalUninstall {
            id,
            authority,
            reply,
        })
        .await
    }

    /// Start a blocklist round over every installed extension.
    pub async fn check_blocklist(&self) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::CheckBlocklist { reply })
            .await
    }

    pub async fn snapshot(&self) -> WardenResult<ServiceSnapshot> {
        self.request(|reply| ServiceCommand::Snapshot { reply })
            .await
    }

    /// Resolves once no spawned work is outstanding.
    pub async fn when_idle(&self) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::WhenIdle { reply })
            .await
    }

    /// Save prefs and stop the runner.
    pub async fn shutdown(&self) -> WardenResult<()> {
        self.request(|reply| ServiceCommand::Shutdown { reply })
            .await?
    }
}

/// Owns an [`ExtensionService`] on a dedicated task.
pub struct ServiceRunner {
    service: ExtensionService,
    blocklist: Arc<Blocklist>,
    installer: Arc<dyn ExtensionInstaller>,
    completions: mpsc::WeakSender<ServiceCommand>,
    in_flight: usize,
    idle_waiters: Vec<Reply<()>>,
}

impl ServiceRunner {
    /// Start driving `service`. The runner scans the providers already
    /// registered on it, and runs a blocklist round as soon as the
    /// database is ready; it stops when every handle is dropped or on
    /// [`ServiceHandle::shutdown`].
    pub fn spawn(
        service: ExtensionService,
        blocklist: Arc<Blocklist>,
        installer: Arc<dyn ExtensionInstaller>,
    ) -> (ServiceHandle, JoinHandle<()>) {
        let buffer = service.profile().config().service.command_buffer;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = ServiceHandle {
            tx: tx.clone(),
            events: service.profile().events().clone(),
        };

        let runner = Self {
            service,
            blocklist,
            installer,
            completions: tx.downgrade(),
            in_flight: 0,
            idle_waiters: Vec::new(),
        };
        let task = tokio::spawn(runner.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ServiceCommand>) {
        let mut updates = self.blocklist.subscribe_updates();
        let mut updates_open = true;

        for provider in self.service.external_providers() {
            self.scan_provider(provider);
        }
        if self.blocklist.is_database_ready().await {
            self.start_blocklist_check();
        }
        self.after_command();

        loop {
            tokio::select! {
                biased;

                changed = updates.changed(), if updates_open => {
                    match changed {
                        Ok(()) => self.start_blocklist_check(),
                        Err(_) => updates_open = false,
                    }
                }
                command = rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle(command) {
                        break;
                    }
                }
            }
            self.after_command();
        }

        if let Err(e) = self.service.save_prefs() {
            tracing::error!("Failed to save extension prefs: {}", e);
        }
        tracing::debug!("Extension service stopped");
    }

    /// Apply one command. Returns false when the runner should stop.
    fn handle(&mut self, command: ServiceCommand) -> bool {
        match command {
            ServiceCommand::Enable { id, reply } => {
                let _ = reply.send(self.service.enable_extension(&id));
            }
            ServiceCommand::Disable { id, reasons, reply } => {
                let _ = reply.send(self.service.disable_extension(&id, reasons));
            }
            ServiceCommand::RemoveDisableReason { id, reason, reply } => {
                let _ = reply.send(self.service.remove_disable_reason(&id, reason));
            }
            ServiceCommand::SetEnabledByExtension {
                initiator,
                target,
                enabled,
                reply,
            } => {
                let _ = reply.send(
                    self.service
                        .set_enabled_by_extension(&initiator, &target, enabled),
                );
            }
            ServiceCommand::Reload { id, reply } => {
                let _ = reply.send(self.service.reload_extension(&id));
            }
            ServiceCommand::Terminate { id, reply } => {
                let _ = reply.send(self.service.terminate_extension(&id));
            }
            ServiceCommand::Uninstall { id, reply } => {
                let _ = reply.send(self.service.uninstall_extension(&id, UninstallReason::User));
            }
            ServiceCommand::AcknowledgeExternal { id, reply } => {
                let _ = reply.send(self.service.acknowledge_external_extension(&id));
            }
            ServiceCommand::GrantPermissions { id, reply } => {
                let _ = reply.send(self.service.grant_permissions(&id));
            }
            ServiceCommand::SetFileAccess { id, allowed, reply } => {
                let _ = reply.send(self.service.set_file_access(&id, allowed));
            }
            ServiceCommand::SetTelemetryVerdict { id, state, reply } => {
                let _ = reply.send(self.service.set_telemetry_verdict(&id, state));
            }
            ServiceCommand::BlockAll { reply } => {
                self.service.block_all_extensions();
                let _ = reply.send(());
            }
            ServiceCommand::UnblockAll { reply } => {
                self.service.unblock_all_extensions();
                let _ = reply.send(());
            }
            ServiceCommand::CheckManagementPolicy { reply } => {
                let _ = reply.send(self.service.check_management_policy());
            }
            ServiceCommand::RegisterPolicyProvider { provider, reply } => {
                self.service.register_policy_provider(provider);
                let _ = reply.send(());
            }
            ServiceCommand::UnregisterPolicyProvider { name, reply } => {
                let _ = reply.send(self.service.unregister_policy_provider(&name));
            }
            ServiceCommand::RegisterExternalProvider { provider, reply } => {
                self.service.register_external_provider(Arc::clone(&provider));
                self.scan_provider(provider);
                let _ = reply.send(());
            }
            ServiceCommand::ProviderUpdated { name, delta, reply } => {
                self.service.on_provider_updated(&name, delta);
                let _ = reply.send(());
            }
            ServiceCommand::FileFound { info, reply } => {
                let _ = reply.send(self.service.on_external_extension_file_found(&info));
            }
            ServiceCommand::UpdateUrlFound { info, reply } => {
                let _ = reply.send(self.service.on_external_extension_update_url_found(&info));
            }
            ServiceCommand::AddFromSync {
                id,
                update_url,
                version,
                should_allow_install,
                reply,
            } => {
                let outcome = self.service.add_from_sync(&id, &update_url, version, should_allow_install);
                let _ = reply.send(outcome);
            }
            ServiceCommand::InstallFromUser {
                id,
                version,
                path,
                reply,
            } => {
                let _ = reply.send(self.service.install_from_user(&id, version, path));
            }
            ServiceCommand::CancelPending { id, reply } => {
                let _ = reply.send(self.service.cancel_pending(&id));
            }
            ServiceCommand::ClearExternalUninstall {
                id,
                authority,
                reply,
            } => {
                let _ = reply.send(self.service.clear_external_uninstall(&id, authority));
            }
            ServiceCommand::CheckBlocklist { reply } => {
                self.start_blocklist_check();
                let _ = reply.send(());
            }
            ServiceCommand::Snapshot { reply } => {
                let _ = reply.send(self.service.snapshot());
            }
            ServiceCommand::WhenIdle { reply } => {
                self.idle_waiters.push(reply);
            }
            ServiceCommand::Shutdown { reply } => {
                let _ = reply.send(self.service.save_prefs());
                return false;
            }
            ServiceCommand::BlocklistChecked { queried, results } => {
                self.in_flight -= 1;
                let changed = self.service.on_blocklist_results(&queried, &results);
                tracing::debug!(
                    "Blocklist round over {} extension(s), {} changed",
                    queried.len(),
                    changed.len()
                );
            }
            ServiceCommand::InstallComplete {
                id,
                generation,
                result,
                verdict,
            } => {
                self.in_flight -= 1;
                self.service.on_install_complete(&id, generation, result, verdict);
            }
            ServiceCommand::ProviderScanned { name, result } => {
                self.in_flight -= 1;
                self.service.on_provider_scanned(&name, result);
            }
        }
        true
    }

    /// Dispatch installs queued by the last command, persist, and wake
    /// idle waiters if nothing is outstanding.
    fn after_command(&mut self) {
        for request in self.service.take_install_requests() {
            self.spawn_install(request);
        }

        if let Err(e) = self.service.save_prefs() {
            tracing::error!("Failed to save extension prefs: {}", e);
        }

        if self.in_flight == 0 {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn start_blocklist_check(&mut self) {
        let queried = self.service.blocklist_candidates();
        if queried.is_empty() {
            return;
        }

        self.in_flight += 1;
        let blocklist = Arc::clone(&self.blocklist);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let results = blocklist.get_blocklisted_ids(&queried).await;
            complete(&completions, ServiceCommand::BlocklistChecked { queried, results }).await;
        });
    }

    fn spawn_install(&mut self, request: InstallRequest) {
        self.in_flight += 1;
        let blocklist = Arc::clone(&self.blocklist);
        let installer = Arc::clone(&self.installer);
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let result = if request.cancel.is_cancelled() {
                Err(WardenError::InstallFailed {
                    id: request.id.clone(),
                    message: "cancelled".to_string(),
                })
            } else {
                installer.install(&request).await
            };

            let verdict = if result.is_ok() && !request.source.is_component() {
                blocklist
                    .get_blocklisted_ids(std::slice::from_ref(&request.id))
                    .await
                    .remove(&request.id)
            } else {
                None
            };

            complete(
                &completions,
                ServiceCommand::InstallComplete {
                    id: request.id,
                    generation: request.generation,
                    result,
                    verdict,
                },
            )
            .await;
        });
    }

    fn scan_provider(&mut self, provider: Arc<dyn ExternalProvider>) {
        self.in_flight += 1;
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let name = provider.name().to_string();
            let result = tokio::task::spawn_blocking(move || provider.visit_registered_extensions())
                .await
                .unwrap_or_else(|e| {
                    Err(WardenError::ProviderFailed {
                        name: name.clone(),
                        message: e.to_string(),
                    })
                });
            complete(&completions, ServiceCommand::ProviderScanned { name, result }).await;
        });
    }
}

/// Queue a completion. Dropped if every handle is gone.
async fn complete(completions: &mpsc::WeakSender<ServiceCommand>, command: ServiceCommand) {
    if let Some(tx) = completions.upgrade() {
        let _ = tx.send(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::{extension, A, B};
    use super::*;
    use crate::blocklist::{SnapshotDatabase, TableFetcher, DEFAULT_FETCH_TIMEOUT};
    use crate::config::Config;
    use crate::external::PrefDirProvider;
    use crate::policy::ManagementPolicy;
    use crate::profile::ProfileContext;
    use std::path::Path;
    use tempfile::TempDir;

    /// Materializes whatever was asked for.
    struct StubInstaller;

    #[async_trait]
    impl ExtensionInstaller for StubInstaller {
        async fn install(&self, request: &InstallRequest) -> WardenResult<Extension> {
            let version = request
                .expected_version
                .as_ref()
                .map_or_else(|| "1.0".to_string(), |v| v.to_string());
            Ok(extension(&request.id, request.source, &version))
        }
    }

    fn blocklist(db: SnapshotDatabase) -> Arc<Blocklist> {
        Arc::new(Blocklist::new(
            Arc::new(db),
            Arc::new(TableFetcher::default()),
            DEFAULT_FETCH_TIMEOUT,
        ))
    }

    fn spawn(blocklist: Arc<Blocklist>) -> (ServiceHandle, JoinHandle<()>) {
        let service = ExtensionService::new(
            ProfileContext::ephemeral(Config::default()),
            ManagementPolicy::new(),
        )
        .unwrap();
        ServiceRunner::spawn(service, blocklist, Arc::new(StubInstaller))
    }

    fn membership(snapshot: &ServiceSnapshot, id: &str) -> Option<Membership> {
        snapshot
            .extensions
            .iter()
            .find(|summary| summary.id == id)
            .map(|summary| summary.membership)
    }

    #[tokio::test]
    async fn test_user_install_through_handle() {
        let (handle, task) = spawn(blocklist(SnapshotDatabase::new()));

        let outcome = handle
            .install_from_user(A, None, PathBuf::from("/ext/a"))
            .await
            .unwrap();
        assert!(outcome.is_accepted());
        handle.when_idle().await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(membership(&snapshot, A), Some(Membership::Enabled));
        assert!(snapshot.pending.is_empty());

        assert_eq!(
            handle
                .disable_extension(A, DisableReason::UserAction.into())
                .await
                .unwrap(),
            Membership::Disabled
        );
        assert_eq!(handle.enable_extension(A).await.unwrap(), Membership::Enabled);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_blocklist_round_after_database_update() {
        let blocklist = blocklist(SnapshotDatabase::new());
        let (handle, _task) = spawn(Arc::clone(&blocklist));

        handle
            .install_from_user(B, None, PathBuf::from("/ext/b"))
            .await
            .unwrap();
        handle.when_idle().await.unwrap();
        handle
            .set_telemetry_verdict(B, BlocklistState::Malware)
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(membership(&snapshot, B), Some(Membership::Blocklisted));

        blocklist.on_database_updated();
        handle.when_idle().await.unwrap();
        // Database round finds nothing; telemetry still holds it.
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(membership(&snapshot, B), Some(Membership::Blocklisted));

        handle
            .set_telemetry_verdict(B, BlocklistState::NotBlocklisted)
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(membership(&snapshot, B), Some(Membership::Enabled));
    }

    fn write_unpacked(dir: &Path, id: &str, version: &str) -> PathBuf {
        let package = dir.join(format!("pkg-{}", &id[..4]));
        std::fs::create_dir_all(&package).unwrap();
        std::fs::write(
            package.join(crate::extensions::manifest::MANIFEST_FILE),
            format!(
                "[extension]\nid = \"{id}\"\nname = \"Sample\"\nversion = \"{version}\"\n\n[permissions]\napis = [\"tabs\"]\n"
            ),
        )
        .unwrap();
        package
    }

    #[tokio::test]
    async fn test_provider_scan_installs_from_manifests() {
        let temp = TempDir::new().unwrap();
        let prefs_dir = temp.path().join("external");
        std::fs::create_dir_all(&prefs_dir).unwrap();
        let package = write_unpacked(temp.path(), A, "1.2");
        std::fs::write(
            prefs_dir.join(format!("{A}.json")),
            format!(
                "{{ \"external_crx\": {:?}, \"external_version\": \"1.2\" }}",
                package.display().to_string()
            ),
        )
        .unwrap();

        let service = ExtensionService::new(
            ProfileContext::ephemeral(Config::default()),
            ManagementPolicy::new(),
        )
        .unwrap();
        let (handle, _task) = ServiceRunner::spawn(
            service,
            blocklist(SnapshotDatabase::new()),
            Arc::new(ManifestInstaller::new()),
        );

        handle
            .register_external_provider(Arc::new(PrefDirProvider::new(
                &prefs_dir,
                InstallSource::ExternalPref,
            )))
            .await
            .unwrap();
        handle.when_idle().await.unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        let summary = snapshot.extensions.iter().find(|s| s.id == A).unwrap();
        assert_eq!(summary.location, InstallSource::ExternalPref);
        assert_eq!(summary.version.to_string(), "1.2");
        // Not acknowledged yet.
        assert_eq!(summary.membership, Membership::Disabled);

        assert_eq!(
            handle.acknowledge_external_extension(A).await.unwrap(),
            Membership::Enabled
        );
    }

    #[tokio::test]
    async fn test_install_time_blocklist_check() {
        let blocklist = blocklist(SnapshotDatabase::new().with_state(A, BlocklistState::Malware));
        blocklist.on_database_updated();
        let (handle, _task) = spawn(blocklist);
        let mut events = handle.subscribe();

        handle
            .install_from_user(A, None, PathBuf::from("/ext/a"))
            .await
            .unwrap();
        handle.when_idle().await.unwrap();

        assert!(handle.snapshot().await.unwrap().extensions.is_empty());
        let mut discarded = false;
        while let Ok(event) = events.try_recv() {
            if let ExtensionEvent::InstallDiscarded { reason, .. } = event {
                assert_eq!(reason, crate::events::DiscardReason::Blocklisted);
                discarded = true;
            }
        }
        assert!(discarded);
    }

    #[tokio::test]
    async fn test_manifest_installer_without_source() {
        let request = InstallRequest {
            id: A.to_string(),
            generation: 1,
            source: InstallSource::ExternalPrefDownload,
            expected_version: None,
            path: None,
            update_url: Some("https://example.com/update".to_string()),
            install_parameter: None,
            creation_flags: Default::default(),
            cancel: Default::default(),
        };
        assert!(matches!(
            ManifestInstaller::new().install(&request).await,
            Err(WardenError::InstallFailed { .. })
        ));

        let temp = TempDir::new().unwrap();
        write_unpacked(temp.path(), A, "2.0");
        std::fs::rename(temp.path().join(format!("pkg-{}", &A[..4])), temp.path().join(A)).unwrap();
        let extension = ManifestInstaller::with_update_cache(temp.path())
            .install(&request)
            .await
            .unwrap();
        assert_eq!(extension.location, InstallSource::ExternalPrefDownload);
        assert_eq!(extension.version.to_string(), "2.0");
    }

    #[tokio::test]
    async fn test_closed_service() {
        let (handle, task) = spawn(blocklist(SnapshotDatabase::new()));
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.snapshot().await,
            Err(WardenError::ServiceClosed)
        ));
    }
}
