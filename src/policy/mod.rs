//! Management policy aggregation.
//!
//! Any number of providers can weigh in on what may happen to an
//! extension. An action is permitted only if every provider permits it;
//! a requirement ("must remain installed") holds if any provider asserts
//! it. When one provider demands an extension stay enabled and another
//! demands it stay disabled, disabled wins.

mod enterprise;

use std::sync::Arc;

pub use enterprise::EnterprisePolicyProvider;

use crate::extensions::{DisableReason, DisableReasonSet, Extension};

/// One source of management decisions.
///
/// Every method has a permissive default so a provider only overrides
/// what it cares about.
pub trait ManagementPolicyProvider: Send + Sync {
    /// Stable name, used to unregister the provider.
    fn name(&self) -> &str;

    fn user_may_load(&self, _extension: &Extension) -> bool {
        true
    }

    fn user_may_modify_settings(&self, _extension: &Extension) -> bool {
        true
    }

    fn must_remain_enabled(&self, _extension: &Extension) -> bool {
        false
    }

    /// The reason the extension must stay disabled, if it must.
    fn must_remain_disabled(&self, _extension: &Extension) -> Option<DisableReason> {
        None
    }

    fn must_remain_installed(&self, _extension: &Extension) -> bool {
        false
    }

    fn extension_may_modify_settings(&self, _initiator: &Extension, _target: &Extension) -> bool {
        true
    }
}

/// The registered providers of one profile.
#[derive(Default, Clone)]
pub struct ManagementPolicy {
    providers: Vec<Arc<dyn ManagementPolicyProvider>>,
}

impl ManagementPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider with the same name.
    pub fn register_provider(&mut self, provider: Arc<dyn ManagementPolicyProvider>) {
        self.providers.retain(|p| p.name() != provider.name());
        tracing::debug!("Registered management policy provider '{}'", provider.name());
        self.providers.push(provider);
    }

    /// Remove a provider by name. Returns whether one was registered.
    pub fn unregister_provider(&mut self, name: &str) -> bool {
        let before = self.providers.len();
        self.providers.retain(|p| p.name() != name);
        before != self.providers.len()
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn user_may_load(&self, extension: &Extension) -> bool {
        self.providers.iter().all(|p| p.user_may_load(extension))
    }

    pub fn user_may_modify_settings(&self, extension: &Extension) -> bool {
        self.providers
            .iter()
            .all(|p| p.user_may_modify_settings(extension))
    }

    /// Every reason some provider demands the extension stay disabled.
    /// A provider that refuses to load the extension contributes
    /// `BlockedByPolicy`.
    pub fn must_remain_disabled(&self, extension: &Extension) -> DisableReasonSet {
        let mut reasons = DisableReasonSet::empty();
        for provider in &self.providers {
            if !provider.user_may_load(extension) {
                reasons.insert(DisableReason::BlockedByPolicy);
            }
            if let Some(reason) = provider.must_remain_disabled(extension) {
                reasons.insert(reason);
            }
        }
        reasons
    }

    /// Holds only if no provider also demands the extension stay disabled.
    pub fn must_remain_enabled(&self, extension: &Extension) -> bool {
        self.providers.iter().any(|p| p.must_remain_enabled(extension))
            && self.must_remain_disabled(extension).is_empty()
    }

    pub fn must_remain_installed(&self, extension: &Extension) -> bool {
        self.providers
            .iter()
            .any(|p| p.must_remain_installed(extension))
    }

    pub fn extension_may_modify_settings(&self, initiator: &Extension, target: &Extension) -> bool {
        self.providers
            .iter()
            .all(|p| p.extension_may_modify_settings(initiator, target))
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Provider with fixed answers, the way a test harness would stub an
    /// enterprise policy.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FixedPolicyProvider {
        pub prohibit_load: bool,
        pub prohibit_modify: bool,
        pub must_remain_enabled: bool,
        pub must_remain_disabled: bool,
        pub must_remain_installed: bool,
    }

    impl FixedPolicyProvider {
        pub fn prohibit_load() -> Self {
            Self {
                prohibit_load: true,
                ..Self::default()
            }
        }

        pub fn must_remain_enabled() -> Self {
            Self {
                must_remain_enabled: true,
                ..Self::default()
            }
        }

        pub fn must_remain_disabled() -> Self {
            Self {
                must_remain_disabled: true,
                ..Self::default()
            }
        }

        pub fn must_remain_installed() -> Self {
            Self {
                must_remain_installed: true,
                ..Self::default()
            }
        }
    }

    impl ManagementPolicyProvider for FixedPolicyProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn user_may_load(&self, _extension: &Extension) -> bool {
            !self.prohibit_load
        }

        fn user_may_modify_settings(&self, _extension: &Extension) -> bool {
            !self.prohibit_modify
        }

        fn must_remain_enabled(&self, _extension: &Extension) -> bool {
            self.must_remain_enabled
        }

        fn must_remain_disabled(&self, _extension: &Extension) -> Option<DisableReason> {
            self.must_remain_disabled
                .then_some(DisableReason::BlockedByPolicy)
        }

        fn must_remain_installed(&self, _extension: &Extension) -> bool {
            self.must_remain_installed
        }
    }

    /// Same answers as [`FixedPolicyProvider`] under a different name, so
    /// two can be registered at once.
    pub struct Named(pub &'static str, pub FixedPolicyProvider);

    impl ManagementPolicyProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn user_may_load(&self, extension: &Extension) -> bool {
            self.1.user_may_load(extension)
        }

        fn must_remain_enabled(&self, extension: &Extension) -> bool {
            self.1.must_remain_enabled(extension)
        }

        fn must_remain_disabled(&self, extension: &Extension) -> Option<DisableReason> {
            self.1.must_remain_disabled(extension)
        }

        fn must_remain_installed(&self, extension: &Extension) -> bool {
            self.1.must_remain_installed(extension)
        }
    }
}
