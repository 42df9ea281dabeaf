//! The extension lifecycle orchestrator.
//!
//! [`ExtensionService`] owns the registry, the prefs, the pending manager
//! and the policy of one profile, and is the only thing that mutates them.
//! It is synchronous: everything slow (installs, blocklist queries,
//! provider scans) happens elsewhere and comes back as a completion call.
//! [`ServiceRunner`] drives it from a single tokio task.
//!
//! ```text
//! persisted:  state (enabled|disabled) + disable reasons + verdicts
//!                            │
//!                desired_membership()
//!                            │
//! registry:   blocklisted > blocked > disabled | enabled
//!                          (terminated sticks until reload/disable)
//! ```

mod actor;
mod blocklist;
mod external;

use std::collections::HashSet;
use std::sync::Arc;

pub use actor::{ExtensionInstaller, ManifestInstaller, ServiceHandle, ServiceRunner};
pub use external::InstallRequest;

use crate::blocklist::{BlocklistState, BlocklistVerdict};
use crate::error::{WardenError, WardenResult};
use crate::events::{ExtensionEvent, UninstallReason, UnloadReason};
use crate::external::ExternalProvider;
use crate::extensions::{
    DisableReason, DisableReasonSet, Extension, ExtensionId, ExtensionPrefs, ExtensionRegistry,
    ExtensionState, InstallSource, Membership, Version,
};
use crate::pending::PendingExtensionManager;
use crate::policy::{ManagementPolicy, ManagementPolicyProvider};
use crate::profile::ProfileContext;

/// One row of [`ServiceSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionSummary {
    pub id: ExtensionId,
    pub name: String,
    pub version: Version,
    pub location: InstallSource,
    pub membership: Membership,
    pub disable_reasons: DisableReasonSet,
    pub blocklist_state: BlocklistState,
}

/// Point-in-time view of a profile's extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSnapshot {
    pub extensions: Vec<ExtensionSummary>,
    pub pending: Vec<(ExtensionId, InstallSource)>,
    pub blocked: bool,
}

pub struct ExtensionService {
    profile: ProfileContext,
    prefs: ExtensionPrefs,
    registry: ExtensionRegistry,
    pending: PendingExtensionManager,
    policy: ManagementPolicy,
    providers: Vec<Arc<dyn ExternalProvider>>,
    ready_providers: HashSet<String>,
    install_queue: Vec<InstallRequest>,
    /// Global freeze: everything but components sits in `blocked`.
    block_extensions: bool,
}

impl ExtensionService {
    /// Open the profile's prefs and load every installed extension.
    pub fn new(profile: ProfileContext, policy: ManagementPolicy) -> WardenResult<Self> {
        let prefs = profile.open_prefs()?;
        let mut service = Self {
            profile,
            prefs,
            registry: ExtensionRegistry::new(),
            pending: PendingExtensionManager::new(),
            policy,
            providers: Vec::new(),
            ready_providers: HashSet::new(),
            install_queue: Vec::new(),
            block_extensions: false,
        };
        service.load_installed();
        Ok(service)
    }

    fn load_installed(&mut self) {
        let records: Vec<Extension> = self
            .prefs
            .iter()
            .map(|(id, record)| record.to_extension(id))
            .collect();

        for extension in records {
            if !crate::extensions::is_valid_id(&extension.id) {
                tracing::warn!("Ignoring persisted extension with invalid id '{}'", extension.id);
                continue;
            }
            let extension = Arc::new(extension);
            let membership = self.desired_membership(&extension);
            self.registry.insert(Arc::clone(&extension), membership);
            if membership == Membership::Enabled {
                self.emit(ExtensionEvent::Loaded {
                    id: extension.id.clone(),
                });
            }
        }

        tracing::info!("Loaded {} installed extension(s)", self.registry.len());
        self.check_management_policy();
    }

    // -- membership engine --------------------------------------------------

    /// Where an extension belongs given what is persisted and whether the
    /// profile is frozen. Terminated is never derived, only kept.
    fn desired_membership(&self, extension: &Extension) -> Membership {
        if !extension.is_component() {
            if self.prefs.blocklist(&extension.id).effective().is_blocklisted() {
                return Membership::Blocklisted;
            }
            if self.block_extensions {
                return Membership::Blocked;
            }
        }
        if self.prefs.disable_reasons(&extension.id).is_empty() {
            Membership::Enabled
        } else {
            Membership::Disabled
        }
    }

    /// Move an extension to the set it belongs in and report transitions.
    fn refresh(&mut self, extension: &Extension, keep_terminated: bool) -> Membership {
        let mut desired = self.desired_membership(extension);
        let Some(current) = self.registry.membership(&extension.id) else {
            return desired;
        };
        if keep_terminated && current == Membership::Terminated && desired == Membership::Enabled {
            desired = Membership::Terminated;
        }
        if desired != current {
            self.transition(&extension.id, current, desired);
        }
        desired
    }

    fn transition(&mut self, id: &str, from: Membership, to: Membership) {
        self.registry.move_to(id, to);
        tracing::info!("{}: {} -> {}", id, from, to);

        if from == Membership::Enabled {
            let reason = match to {
                Membership::Disabled => UnloadReason::Disable,
                Membership::Blocklisted => UnloadReason::Blocklist,
                Membership::Blocked => UnloadReason::Block,
                Membership::Terminated => UnloadReason::Terminate,
                Membership::Enabled => return,
            };
            self.emit(ExtensionEvent::Unloaded {
                id: id.to_string(),
                reason,
            });
        }
        if to == Membership::Enabled {
            self.emit(ExtensionEvent::Loaded { id: id.to_string() });
        }
    }

    /// Persist a new reason set, keeping the enabled/disabled flag in step.
    fn update_disable_reasons(&mut self, id: &str, reasons: DisableReasonSet) -> bool {
        if !self.prefs.set_disable_reasons(id, reasons) {
            return false;
        }
        let state = if reasons.is_empty() {
            ExtensionState::Enabled
        } else {
            ExtensionState::Disabled
        };
        self.prefs.set_state(id, state);
        tracing::debug!("{}: disable reasons now {}", id, reasons);
        self.emit(ExtensionEvent::DisableReasonsChanged {
            id: id.to_string(),
            reasons,
        });
        true
    }

    fn emit(&self, event: ExtensionEvent) {
        self.profile.events().publish(event);
    }

    fn installed_or_err(&self, id: &str) -> WardenResult<Arc<Extension>> {
        self.registry
            .get_installed_extension(id)
            .ok_or_else(|| WardenError::ExtensionNotFound(id.to_string()))
    }

    fn installed(&self) -> Vec<Arc<Extension>> {
        self.registry
            .installed_ids()
            .iter()
            .filter_map(|id| self.registry.get_installed_extension(id))
            .collect()
    }

    // -- transitions ----------------------------------------------------------

    /// Register a materialized extension, new or updated.
    ///
    /// Starts disabled when policy requires it, when an update asks for
    /// visible permissions the user never granted, or when an external
    /// install has not been acknowledged. A blocklisted verdict refuses a
    /// new install outright. An update to an installed extension is kept
    /// and lands in the blocklisted set with the verdict recorded.
    pub fn add_extension(
        &mut self,
        extension: Extension,
        mark_acknowledged: bool,
        verdict: Option<BlocklistVerdict>,
    ) -> WardenResult<Membership> {
        let component = extension.is_component();
        let had_record = self.prefs.contains(&extension.id);
        if let Some(verdict) = verdict {
            if verdict.state.is_blocklisted() && !component && !had_record {
                tracing::warn!(
                    "Refusing to install {}: blocklisted ({})",
                    extension.id,
                    verdict.state
                );
                return Err(WardenError::PolicyForbids {
                    id: extension.id,
                    action: "install",
                });
            }
        }

        let id = extension.id.clone();
        let previous_membership = self.registry.membership(&id);

        let mut reasons = if had_record {
            self.prefs.disable_reasons(&id)
        } else {
            DisableReasonSet::empty()
        };

        let escalated = had_record
            && !component
            && !extension.location.is_policy()
            && extension
                .permissions
                .is_escalation_over(&self.prefs.granted_permissions(&id));
        reasons.remove(DisableReason::PermissionsIncrease);
        if escalated {
            reasons.insert(DisableReason::PermissionsIncrease);
        }

        let flags = extension.creation_flags;
        if !had_record
            && extension.location.needs_acknowledgement()
            && !mark_acknowledged
            && !flags.was_installed_by_default
            && !flags.was_installed_by_oem
        {
            reasons.insert(DisableReason::ExternalExtension);
        }

        let policy_reasons = if component {
            reasons = DisableReasonSet::empty();
            DisableReasonSet::empty()
        } else {
            let previous = self.prefs.policy_reasons(&id);
            let (merged, current) = self.apply_policy_reasons(&extension, reasons, previous);
            reasons = merged;
            current
        };

        let state = if reasons.is_empty() {
            ExtensionState::Enabled
        } else {
            ExtensionState::Disabled
        };
        self.prefs.on_extension_installed(&extension, state, reasons);
        self.prefs.set_policy_reasons(&id, policy_reasons);
        if !escalated {
            self.prefs.grant_permissions(&id, &extension.permissions);
        }
        if !extension.location.is_external() && self.prefs.clear_external_uninstalled(&id) {
            tracing::debug!("{}: reinstalled by the user, external uninstall marker cleared", id);
        }

        self.emit(ExtensionEvent::Installed {
            id: id.clone(),
            version: extension.version.clone(),
            location: extension.location,
            is_update: previous_membership.is_some(),
        });
        if !reasons.is_empty() {
            self.emit(ExtensionEvent::DisableReasonsChanged {
                id: id.clone(),
                reasons,
            });
        }

        if !component {
            if let Some(verdict) = verdict {
                self.prefs.set_blocklist_verdict(&id, verdict.source, verdict.state);
            }
            self.sync_reputation_reasons(&id);
        }

        if previous_membership == Some(Membership::Enabled) {
            self.emit(ExtensionEvent::Unloaded {
                id: id.clone(),
                reason: UnloadReason::Update,
            });
        }

        let extension = Arc::new(extension);
        let membership = self.desired_membership(&extension);
        self.registry.insert(Arc::clone(&extension), membership);
        if membership == Membership::Enabled {
            self.emit(ExtensionEvent::Loaded { id: id.clone() });
        }

        tracing::info!(
            "Installed {} {} from {} ({})",
            id,
            extension.version,
            extension.location,
            membership
        );
        Ok(membership)
    }

    /// Clear every reason a user may clear and grant the current
    /// permissions. Reasons owned by policy or the reputation service stay,
    /// so the extension may remain disabled.
    pub fn enable_extension(&mut self, id: &str) -> WardenResult<Membership> {
        let extension = self.installed_or_err(id)?;
        let reasons = self.prefs.disable_reasons(id);
        let remaining = reasons.authority_owned();

        self.prefs.grant_permissions(id, &extension.permissions);
        self.update_disable_reasons(id, remaining);

        if !remaining.is_empty() {
            tracing::debug!("{} stays disabled: {}", id, remaining);
        }
        Ok(self.refresh(&extension, true))
    }

    /// Add disable reasons. Extensions policy keeps enabled, components, and
    /// extensions whose settings are locked only accept authority reasons
    /// and corruption.
    pub fn disable_extension(
        &mut self,
        id: &str,
        reasons: DisableReasonSet,
    ) -> WardenResult<Membership> {
        let extension = self.installed_or_err(id)?;

        let user_reasons = reasons
            .user_clearable()
            .difference(DisableReason::Corrupted.into());
        if !user_reasons.is_empty()
            && (extension.is_component()
                || self.policy.must_remain_enabled(&extension)
                || !self.policy.user_may_modify_settings(&extension))
        {
            tracing::debug!("Policy keeps {} enabled, ignoring disable {}", id, reasons);
            return Err(WardenError::PolicyForbids {
                id: id.to_string(),
                action: "disable",
            });
        }

        let merged = self.prefs.disable_reasons(id).union(reasons);
        self.update_disable_reasons(id, merged);
        Ok(self.refresh(&extension, false))
    }

    /// Enable or disable `target` on behalf of another installed
    /// extension, as a management API call would. Every policy provider
    /// must let `initiator` touch `target`.
    pub fn set_enabled_by_extension(
        &mut self,
        initiator: &str,
        target: &str,
        enabled: bool,
    ) -> WardenResult<Membership> {
        let initiator_ext = self.installed_or_err(initiator)?;
        let target_ext = self.installed_or_err(target)?;
        if !self
            .policy
            .extension_may_modify_settings(&initiator_ext, &target_ext)
        {
            tracing::debug!("Policy forbids {} from changing {}", initiator, target);
            return Err(WardenError::PolicyForbids {
                id: target.to_string(),
                action: "modify settings",
            });
        }
        if enabled {
            self.enable_extension(target)
        } else {
            self.disable_extension(target, DisableReason::UserAction.into())
        }
    }

    /// Remove exactly one reason, leaving any others in place.
    pub fn remove_disable_reason(
        &mut self,
        id: &str,
        reason: DisableReason,
    ) -> WardenResult<Membership> {
        let extension = self.installed_or_err(id)?;
        let mut reasons = self.prefs.disable_reasons(id);
        if reasons.remove(reason) {
            self.update_disable_reasons(id, reasons);
        }
        Ok(self.refresh(&extension, true))
    }

    /// Clear `terminated` and re-evaluate. A permissions-increase reason is
    /// dropped once everything it was waiting for has been granted.
    pub fn reload_extension(&mut self, id: &str) -> WardenResult<Membership> {
        let extension = self.installed_or_err(id)?;
        let mut reasons = self.prefs.disable_reasons(id);

        if reasons.contains(DisableReason::PermissionsIncrease)
            && !extension
                .permissions
                .is_escalation_over(&self.prefs.granted_permissions(id))
        {
            reasons.remove(DisableReason::PermissionsIncrease);
            self.update_disable_reasons(id, reasons);
        }

        Ok(self.refresh(&extension, false))
    }

    /// The host process of an enabled extension went away. Returns false,
    /// changing nothing, for an extension that was not running.
    pub fn terminate_extension(&mut self, id: &str) -> bool {
        if !self.registry.is_enabled(id) {
            tracing::debug!("Ignoring termination of {}: not running", id);
            return false;
        }
        self.transition(id, Membership::Enabled, Membership::Terminated);
        self.emit(ExtensionEvent::Terminated { id: id.to_string() });
        true
    }

    /// Freeze every non-component extension.
    pub fn block_all_extensions(&mut self) {
        if self.block_extensions {
            return;
        }
        self.block_extensions = true;
        tracing::info!("Blocking all extensions");
        for extension in self.installed() {
            self.refresh(&extension, false);
        }
    }

    /// Undo [`block_all_extensions`](Self::block_all_extensions).
    pub fn unblock_all_extensions(&mut self) {
        if !self.block_extensions {
            return;
        }
        self.block_extensions = false;
        tracing::info!("Unblocking all extensions");
        for extension in self.installed() {
            self.refresh(&extension, false);
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.block_extensions
    }

    /// Remove an installed extension. Refused for components and for
    /// extensions policy requires, unless they are blocklisted.
    pub fn uninstall_extension(&mut self, id: &str, reason: UninstallReason) -> WardenResult<()> {
        let extension = self.installed_or_err(id)?;
        let membership = self.registry.membership(id);

        if membership != Some(Membership::Blocklisted)
            && (extension.is_component() || self.policy.must_remain_installed(&extension))
        {
            return Err(WardenError::PolicyForbids {
                id: id.to_string(),
                action: "uninstall",
            });
        }

        if reason == UninstallReason::User && extension.location.is_external() {
            self.prefs.mark_external_uninstalled(id, extension.location);
        }
        if self.pending.remove(id) {
            self.emit(ExtensionEvent::PendingRemoved { id: id.to_string() });
        }

        self.registry.remove(id);
        self.prefs.remove(id);

        if membership == Some(Membership::Enabled) {
            self.emit(ExtensionEvent::Unloaded {
                id: id.to_string(),
                reason: UnloadReason::Uninstall,
            });
        }
        self.emit(ExtensionEvent::Uninstalled {
            id: id.to_string(),
            reason,
        });
        tracing::info!("Uninstalled {} ({:?})", id, reason);
        Ok(())
    }

    /// The user accepted a new external install.
    pub fn acknowledge_external_extension(&mut self, id: &str) -> WardenResult<Membership> {
        self.remove_disable_reason(id, DisableReason::ExternalExtension)
    }

    /// Grant whatever the installed version requires. Takes effect on the
    /// next reload or enable.
    pub fn grant_permissions(&mut self, id: &str) -> WardenResult<()> {
        let extension = self.installed_or_err(id)?;
        self.prefs.grant_permissions(id, &extension.permissions);
        Ok(())
    }

    pub fn set_file_access(&mut self, id: &str, allowed: bool) -> WardenResult<()> {
        let extension = self.installed_or_err(id)?;
        if !self.policy.user_may_modify_settings(&extension) {
            return Err(WardenError::PolicyForbids {
                id: id.to_string(),
                action: "change file access",
            });
        }
        self.prefs.set_file_access(id, allowed);
        Ok(())
    }

    pub fn file_access(&self, id: &str) -> bool {
        self.prefs.file_access(id)
    }

    // -- policy -----------------------------------------------------------------

    /// Re-apply every policy to every installed extension. Safe to run any
    /// number of times; extensions no longer prohibited come back.
    /// Returns the ids whose disable reasons changed.
    pub fn check_management_policy(&mut self) -> Vec<ExtensionId> {
        let mut changed = Vec::new();
        for extension in self.installed() {
            if extension.is_component() {
                continue;
            }

            let previous = self.prefs.policy_reasons(&extension.id);
            let (mut reasons, current) = self.apply_policy_reasons(
                &extension,
                self.prefs.disable_reasons(&extension.id),
                previous,
            );
            if self.policy.must_remain_enabled(&extension) {
                reasons.remove(DisableReason::UserAction);
            }

            if self.update_disable_reasons(&extension.id, reasons) {
                changed.push(extension.id.clone());
            }
            self.prefs.set_policy_reasons(&extension.id, current);
            self.refresh(&extension, true);
        }
        changed
    }

    /// Swap the reasons the last check contributed for the ones policy
    /// demands now. Returns the merged set and the new policy subset.
    fn apply_policy_reasons(
        &self,
        extension: &Extension,
        reasons: DisableReasonSet,
        previous: DisableReasonSet,
    ) -> (DisableReasonSet, DisableReasonSet) {
        let current = self.policy.must_remain_disabled(extension);
        let mut reasons = reasons.difference(previous.difference(current));
        reasons.remove(DisableReason::BlockedByPolicy);
        (reasons.union(current), current)
    }

    pub fn register_policy_provider(&mut self, provider: Arc<dyn ManagementPolicyProvider>) {
        self.policy.register_provider(provider);
        self.check_management_policy();
    }

    pub fn unregister_policy_provider(&mut self, name: &str) -> bool {
        let removed = self.policy.unregister_provider(name);
        if removed {
            self.check_management_policy();
        }
        removed
    }

    // -- queries ----------------------------------------------------------------

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn prefs(&self) -> &ExtensionPrefs {
        &self.prefs
    }

    pub fn pending(&self) -> &PendingExtensionManager {
        &self.pending
    }

    pub fn policy(&self) -> &ManagementPolicy {
        &self.policy
    }

    pub fn profile(&self) -> &ProfileContext {
        &self.profile
    }

    pub fn membership(&self, id: &str) -> Option<Membership> {
        self.registry.membership(id)
    }

    pub fn disable_reasons(&self, id: &str) -> DisableReasonSet {
        self.prefs.disable_reasons(id)
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let extensions = self
            .installed()
            .into_iter()
            .filter_map(|extension| {
                let membership = self.registry.membership(&extension.id)?;
                Some(ExtensionSummary {
                    id: extension.id.clone(),
                    name: extension.name.clone(),
                    version: extension.version.clone(),
                    location: extension.location,
                    membership,
                    disable_reasons: self.prefs.disable_reasons(&extension.id),
                    blocklist_state: self.prefs.blocklist(&extension.id).effective(),
                })
            })
            .collect();

        ServiceSnapshot {
            extensions,
            pending: self
                .pending
                .iter()
                .map(|info| (info.id.clone(), info.install_source))
                .collect(),
            blocked: self.block_extensions,
        }
    }

    pub fn save_prefs(&mut self) -> WardenResult<()> {
        self.prefs.save()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use crate::config::Config;
    use crate::extensions::PermissionSet;
    use crate::policy::test_util::FixedPolicyProvider;
    use tempfile::TempDir;

    #[test]
    fn test_install_enables_and_publishes() {
        let mut service = service();
        let mut rx = service.profile().events().subscribe();

        install(&mut service, A);

        let events = drain(&mut rx);
        assert!(matches!(events[0], ExtensionEvent::Installed { is_update: false, .. }));
        assert_eq!(events.last(), Some(&ExtensionEvent::Loaded { id: A.to_string() }));
        assert_eq!(service.prefs().state(A), Some(ExtensionState::Enabled));
    }

    #[test]
    fn test_unacknowledged_external_install_starts_disabled() {
        let mut service = service();
        let membership = service
            .add_extension(extension(A, InstallSource::ExternalPref, "1.0"), false, None)
            .unwrap();
        assert_eq!(membership, Membership::Disabled);
        assert!(service
            .disable_reasons(A)
            .contains(DisableReason::ExternalExtension));

        assert_eq!(
            service.acknowledge_external_extension(A).unwrap(),
            Membership::Enabled
        );

        // Policy installs are never prompted.
        let membership = service
            .add_extension(extension(B, InstallSource::ExternalPolicyDownload, "1.0"), false, None)
            .unwrap();
        assert_eq!(membership, Membership::Enabled);
    }

    #[test]
    fn test_disable_reasons_are_independent() {
        let mut service = service();
        install(&mut service, A);

        service
            .disable_extension(A, DisableReason::UserAction.into())
            .unwrap();
        service
            .disable_extension(A, DisableReason::Corrupted.into())
            .unwrap();

        assert_eq!(
            service
                .remove_disable_reason(A, DisableReason::UserAction)
                .unwrap(),
            Membership::Disabled
        );
        assert!(service.disable_reasons(A).contains(DisableReason::Corrupted));

        assert_eq!(
            service
                .remove_disable_reason(A, DisableReason::Corrupted)
                .unwrap(),
            Membership::Enabled
        );
        assert!(service.disable_reasons(A).is_empty());
    }

    #[test]
    fn test_enable_leaves_authority_reasons() {
        let mut service = service();
        install(&mut service, A);
        service
            .disable_extension(
                A,
                [DisableReason::UserAction, DisableReason::RemoteMalwareVerdict]
                    .into_iter()
                    .collect(),
            )
            .unwrap();

        assert_eq!(service.enable_extension(A).unwrap(), Membership::Disabled);
        let reasons = service.disable_reasons(A);
        assert_eq!(reasons.len(), 1);
        assert!(reasons.contains(DisableReason::RemoteMalwareVerdict));
    }

    #[test]
    fn test_permission_escalation_on_update() {
        let mut service = service();
        install(&mut service, A);

        // Internal-only additions are not an escalation.
        let mut quiet = extension(A, InstallSource::Internal, "1.1");
        quiet.permissions = PermissionSet::new().with_apis(["tabs", "storage"]);
        assert_eq!(
            service.add_extension(quiet, true, None).unwrap(),
            Membership::Enabled
        );

        let mut louder = extension(A, InstallSource::Internal, "2.0");
        louder.permissions = PermissionSet::new().with_apis(["tabs", "history"]);
        assert_eq!(
            service.add_extension(louder, true, None).unwrap(),
            Membership::Disabled
        );
        assert!(service
            .disable_reasons(A)
            .contains(DisableReason::PermissionsIncrease));

        service
            .disable_extension(A, DisableReason::UserAction.into())
            .unwrap();

        // Reload before granting changes nothing.
        service.reload_extension(A).unwrap();
        assert!(service
            .disable_reasons(A)
            .contains(DisableReason::PermissionsIncrease));

        service.grant_permissions(A).unwrap();
        assert_eq!(service.reload_extension(A).unwrap(), Membership::Disabled);
        let reasons = service.disable_reasons(A);
        assert!(!reasons.contains(DisableReason::PermissionsIncrease));
        assert!(reasons.contains(DisableReason::UserAction));
    }

    #[test]
    fn test_policy_check_is_idempotent_and_reversible() {
        let mut service = service();
        install(&mut service, A);
        install(&mut service, B);
        service
            .add_extension(extension(C, InstallSource::Component, "1.0"), true, None)
            .unwrap();
        service
            .disable_extension(B, DisableReason::UserAction.into())
            .unwrap();

        service.register_policy_provider(Arc::new(FixedPolicyProvider::prohibit_load()));
        assert_eq!(service.membership(A), Some(Membership::Disabled));
        assert!(service
            .disable_reasons(A)
            .contains(DisableReason::BlockedByPolicy));
        assert!(service
            .disable_reasons(B)
            .contains(DisableReason::BlockedByPolicy));
        assert_eq!(service.membership(C), Some(Membership::Enabled));

        assert!(service.check_management_policy().is_empty());

        assert!(service.unregister_policy_provider("fixed"));
        assert_eq!(service.membership(A), Some(Membership::Enabled));
        assert_eq!(service.membership(B), Some(Membership::Disabled));
        assert_eq!(
            service.disable_reasons(B),
            DisableReason::UserAction.into()
        );
        assert_eq!(service.membership(C), Some(Membership::Enabled));
    }

    struct VerificationPolicy;

    impl ManagementPolicyProvider for VerificationPolicy {
        fn name(&self) -> &str {
            "verification"
        }

        fn must_remain_disabled(&self, _extension: &Extension) -> Option<DisableReason> {
            Some(DisableReason::NotVerified)
        }
    }

    /// No extension may change `B`.
    struct ProtectsB;

    impl ManagementPolicyProvider for ProtectsB {
        fn name(&self) -> &str {
            "protects-b"
        }

        fn extension_may_modify_settings(&self, _initiator: &Extension, target: &Extension) -> bool {
            target.id != B
        }
    }

    #[test]
    fn test_provider_removal_clears_its_own_reasons() {
        let mut service = service();
        install(&mut service, A);
        service
            .disable_extension(A, DisableReason::Corrupted.into())
            .unwrap();

        service.register_policy_provider(Arc::new(VerificationPolicy));
        assert_eq!(service.membership(A), Some(Membership::Disabled));
        assert!(service.disable_reasons(A).contains(DisableReason::NotVerified));

        assert!(service.unregister_policy_provider("verification"));
        assert_eq!(service.disable_reasons(A), DisableReason::Corrupted.into());
        assert!(service.prefs().policy_reasons(A).is_empty());

        service
            .remove_disable_reason(A, DisableReason::Corrupted)
            .unwrap();
        assert_eq!(service.membership(A), Some(Membership::Enabled));
    }

    #[test]
    fn test_policy_reasons_follow_an_update() {
        let mut service = service();
        install(&mut service, A);
        service.register_policy_provider(Arc::new(VerificationPolicy));

        service
            .add_extension(extension(A, InstallSource::Internal, "2.0"), true, None)
            .unwrap();
        assert_eq!(service.prefs().policy_reasons(A), DisableReason::NotVerified.into());

        service.unregister_policy_provider("verification");
        assert_eq!(service.membership(A), Some(Membership::Enabled));
    }

    #[test]
    fn test_extension_initiated_changes_respect_policy() {
        let mut service = service();
        install(&mut service, A);
        install(&mut service, B);
        install(&mut service, C);

        assert_eq!(
            service.set_enabled_by_extension(A, C, false).unwrap(),
            Membership::Disabled
        );
        assert_eq!(
            service.set_enabled_by_extension(A, C, true).unwrap(),
            Membership::Enabled
        );

        service.register_policy_provider(Arc::new(ProtectsB));
        assert!(matches!(
            service.set_enabled_by_extension(A, B, false),
            Err(WardenError::PolicyForbids { action: "modify settings", .. })
        ));
        assert_eq!(service.membership(B), Some(Membership::Enabled));
        assert!(matches!(
            service.set_enabled_by_extension(A, "dddddddddddddddddddddddddddddddd", false),
            Err(WardenError::ExtensionNotFound(_))
        ));
    }

    #[test]
    fn test_must_remain_enabled_refuses_user_disable() {
        let mut service = service();
        install(&mut service, A);
        service.register_policy_provider(Arc::new(FixedPolicyProvider::must_remain_enabled()));

        assert!(matches!(
            service.disable_extension(A, DisableReason::UserAction.into()),
            Err(WardenError::PolicyForbids { action: "disable", .. })
        ));
        // Corruption still disables.
        assert_eq!(
            service
                .disable_extension(A, DisableReason::Corrupted.into())
                .unwrap(),
            Membership::Disabled
        );
    }

    #[test]
    fn test_must_remain_installed_refuses_uninstall() {
        let mut service = service();
        install(&mut service, A);
        service.register_policy_provider(Arc::new(FixedPolicyProvider::must_remain_installed()));

        assert!(matches!(
            service.uninstall_extension(A, UninstallReason::User),
            Err(WardenError::PolicyForbids { action: "uninstall", .. })
        ));
        assert!(service.registry().is_installed(A));
    }

    #[test]
    fn test_component_cannot_be_disabled_or_uninstalled() {
        let mut service = service();
        service
            .add_extension(extension(A, InstallSource::Component, "1.0"), false, None)
            .unwrap();
        assert!(service
            .disable_extension(A, DisableReason::UserAction.into())
            .is_err());
        assert!(service.uninstall_extension(A, UninstallReason::User).is_err());
    }

    #[test]
    fn test_freeze_is_reversible_and_quiet_for_disabled() {
        let mut service = service();
        install(&mut service, A);
        install(&mut service, B);
        service
            .add_extension(extension(C, InstallSource::Component, "1.0"), true, None)
            .unwrap();
        service
            .disable_extension(B, DisableReason::UserAction.into())
            .unwrap();

        let mut rx = service.profile().events().subscribe();
        service.block_all_extensions();

        assert_eq!(service.membership(A), Some(Membership::Blocked));
        assert_eq!(service.membership(B), Some(Membership::Blocked));
        assert_eq!(service.membership(C), Some(Membership::Enabled));
        assert_eq!(
            drain(&mut rx),
            vec![ExtensionEvent::Unloaded {
                id: A.to_string(),
                reason: UnloadReason::Block
            }]
        );

        // Installed while frozen: straight to blocked.
        let third = "dddddddddddddddddddddddddddddddd";
        assert_eq!(
            service
                .add_extension(extension(third, InstallSource::Internal, "1.0"), true, None)
                .unwrap(),
            Membership::Blocked
        );

        service.unblock_all_extensions();
        assert_eq!(service.membership(A), Some(Membership::Enabled));
        assert_eq!(service.membership(B), Some(Membership::Disabled));
        assert_eq!(service.disable_reasons(B), DisableReason::UserAction.into());
        assert_eq!(service.membership(third), Some(Membership::Enabled));
    }

    #[test]
    fn test_terminate_and_reload() {
        let mut service = service();
        install(&mut service, A);
        install(&mut service, B);
        service
            .disable_extension(B, DisableReason::UserAction.into())
            .unwrap();

        assert!(service.terminate_extension(A));
        assert_eq!(service.membership(A), Some(Membership::Terminated));
        assert_eq!(service.prefs().state(A), Some(ExtensionState::Enabled));
        assert!(!service.terminate_extension(B));
        assert!(!service.terminate_extension(A));

        // Enabling does not restart a crashed extension; reload does.
        assert_eq!(service.enable_extension(A).unwrap(), Membership::Terminated);
        assert_eq!(service.reload_extension(A).unwrap(), Membership::Enabled);

        service.terminate_extension(A);
        assert_eq!(
            service
                .disable_extension(A, DisableReason::UserAction.into())
                .unwrap(),
            Membership::Disabled
        );
    }

    #[test]
    fn test_uninstall() {
        let mut service = service();
        install(&mut service, A);
        let mut rx = service.profile().events().subscribe();

        service.uninstall_extension(A, UninstallReason::User).unwrap();
        assert!(!service.registry().is_installed(A));
        assert!(!service.prefs().contains(A));
        assert_eq!(
            drain(&mut rx),
            vec![
                ExtensionEvent::Unloaded {
                    id: A.to_string(),
                    reason: UnloadReason::Uninstall
                },
                ExtensionEvent::Uninstalled {
                    id: A.to_string(),
                    reason: UninstallReason::User
                },
            ]
        );
        // Not external: no marker.
        assert!(service.prefs().external_uninstall_marker(A).is_none());
        assert!(matches!(
            service.uninstall_extension(A, UninstallReason::User),
            Err(WardenError::ExtensionNotFound(_))
        ));
    }

    #[test]
    fn test_state_survives_restart() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.profile.data_dir = temp.path().to_path_buf();

        {
            let mut service =
                ExtensionService::new(ProfileContext::new(config.clone()), ManagementPolicy::new())
                    .unwrap();
            install(&mut service, A);
            install(&mut service, B);
            service
                .disable_extension(B, DisableReason::UserAction.into())
                .unwrap();
            service.save_prefs().unwrap();
        }

        let service =
            ExtensionService::new(ProfileContext::new(config), ManagementPolicy::new()).unwrap();
        assert_eq!(service.membership(A), Some(Membership::Enabled));
        assert_eq!(service.membership(B), Some(Membership::Disabled));
        assert_eq!(service.disable_reasons(B), DisableReason::UserAction.into());
    }

    #[test]
    fn test_startup_applies_policy() {
        let mut policy = ManagementPolicy::new();
        policy.register_provider(Arc::new(FixedPolicyProvider::prohibit_load()));

        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.profile.data_dir = temp.path().to_path_buf();
        {
            let mut service =
                ExtensionService::new(ProfileContext::new(config.clone()), ManagementPolicy::new())
                    .unwrap();
            install(&mut service, A);
        }

        let service = ExtensionService::new(ProfileContext::new(config), policy).unwrap();
        assert_eq!(service.membership(A), Some(Membership::Disabled));
    }

    #[test]
    fn test_file_access_respects_locked_settings() {
        let mut service = service();
        install(&mut service, A);
        service.set_file_access(A, true).unwrap();
        assert!(service.file_access(A));

        service.register_policy_provider(Arc::new(FixedPolicyProvider {
            prohibit_modify: true,
            ..FixedPolicyProvider::default()
        }));
        assert!(service.set_file_access(A, false).is_err());
        assert!(service.file_access(A));
    }

    #[test]
    fn test_snapshot() {
        let mut service = service();
        install(&mut service, A);
        let snapshot = service.snapshot();
        assert_eq!(snapshot.extensions.len(), 1);
        assert_eq!(snapshot.extensions[0].membership, Membership::Enabled);
        assert_eq!(snapshot.extensions[0].blocklist_state, BlocklistState::NotBlocklisted);
        assert!(!snapshot.blocked);
    }
}
