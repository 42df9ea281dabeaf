//! Set membership of installed extensions.
//!
//! Every installed extension sits in exactly one set at a time. Moving
//! between sets goes through [`ExtensionRegistry::move_to`], so an id can
//! never be in two sets at once. Persisted classification and disable
//! reasons live in prefs, which is what lets `blocked` and `terminated`
//! be undone without losing anything.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{Extension, ExtensionId};

/// The set an installed extension is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    Enabled,
    Disabled,
    Terminated,
    Blocklisted,
    Blocked,
}

impl Membership {
    pub const ALL: [Membership; 5] = [
        Membership::Enabled,
        Membership::Disabled,
        Membership::Terminated,
        Membership::Blocklisted,
        Membership::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Membership::Enabled => "enabled",
            Membership::Disabled => "disabled",
            Membership::Terminated => "terminated",
            Membership::Blocklisted => "blocklisted",
            Membership::Blocked => "blocked",
        }
    }

    fn flag(self) -> IncludeFlags {
        match self {
            Membership::Enabled => IncludeFlags::ENABLED,
            Membership::Disabled => IncludeFlags::DISABLED,
            Membership::Terminated => IncludeFlags::TERMINATED,
            Membership::Blocklisted => IncludeFlags::BLOCKLISTED,
            Membership::Blocked => IncludeFlags::BLOCKED,
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sets a lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeFlags(u8);

impl IncludeFlags {
    pub const NONE: IncludeFlags = IncludeFlags(0);
    pub const ENABLED: IncludeFlags = IncludeFlags(1 << 0);
    pub const DISABLED: IncludeFlags = IncludeFlags(1 << 1);
    pub const TERMINATED: IncludeFlags = IncludeFlags(1 << 2);
    pub const BLOCKLISTED: IncludeFlags = IncludeFlags(1 << 3);
    pub const BLOCKED: IncludeFlags = IncludeFlags(1 << 4);
    pub const EVERYTHING: IncludeFlags = IncludeFlags(0b1_1111);

    pub fn contains(self, other: IncludeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for IncludeFlags {
    type Output = IncludeFlags;

    fn bitor(self, rhs: IncludeFlags) -> IncludeFlags {
        IncludeFlags(self.0 | rhs.0)
    }
}

/// Partition of installed extensions into mutually exclusive sets.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    sets: BTreeMap<ExtensionId, (Membership, Arc<Extension>)>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an extension in the given set, removing it from
    /// whichever set held it before. Returns the previous membership.
    pub fn insert(&mut self, extension: Arc<Extension>, membership: Membership) -> Option<Membership> {
        self.sets
            .insert(extension.id.clone(), (membership, extension))
            .map(|(previous, _)| previous)
    }

    /// Move an installed extension to another set. Returns the previous
    /// membership, or `None` if the id is not installed.
    pub fn move_to(&mut self, id: &str, membership: Membership) -> Option<Membership> {
        let entry = self.sets.get_mut(id)?;
        let previous = entry.0;
        entry.0 = membership;
        Some(previous)
    }

    /// Forget an extension entirely.
    pub fn remove(&mut self, id: &str) -> Option<(Membership, Arc<Extension>)> {
        self.sets.remove(id)
    }

    pub fn membership(&self, id: &str) -> Option<Membership> {
        self.sets.get(id).map(|(m, _)| *m)
    }

    /// Look an extension up in the sets named by `flags`.
    pub fn get_extension_by_id(&self, id: &str, flags: IncludeFlags) -> Option<Arc<Extension>> {
        self.sets
            .get(id)
            .filter(|(m, _)| flags.contains(m.flag()))
            .map(|(_, ext)| Arc::clone(ext))
    }

    /// Any installed extension, whatever its set.
    pub fn get_installed_extension(&self, id: &str) -> Option<Arc<Extension>> {
        self.get_extension_by_id(id, IncludeFlags::EVERYTHING)
    }

    pub fn is_installed(&self, id: &str) -> bool {
        self.sets.contains_key(id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.membership(id) == Some(Membership::Enabled)
    }

    /// Ids in one set, in id order.
    pub fn ids_in(&self, membership: Membership) -> Vec<ExtensionId> {
        self.sets
            .iter()
            .filter(|(_, (m, _))| *m == membership)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every installed id.
    pub fn installed_ids(&self) -> Vec<ExtensionId> {
        self.sets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
