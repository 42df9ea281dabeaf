//! Reasons an extension is administratively disabled.
//!
//! A disabled extension carries a set of independent reasons. Each reason
//! is added and removed on its own; the extension may run again only once
//! the set is empty. Some reasons are owned by an authority (enterprise
//! policy, the reputation service, the telemetry service) and a plain
//! "enable" request must leave them in place.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single disable reason. The discriminant is its bit in the persisted
/// mask and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DisableReason {
    UserAction = 1 << 0,
    PermissionsIncrease = 1 << 1,
    /// An external install the user has not acknowledged yet.
    ExternalExtension = 1 << 2,
    Corrupted = 1 << 3,
    BlockedByPolicy = 1 << 4,
    RemoteMalwareVerdict = 1 << 5,
    NotVerified = 1 << 6,
    /// Reputation verdict short of malware (policy violation, known
    /// vulnerability).
    Greylist = 1 << 7,
}

impl DisableReason {
    pub const ALL: [DisableReason; 8] = [
        DisableReason::UserAction,
        DisableReason::PermissionsIncrease,
        DisableReason::ExternalExtension,
        DisableReason::Corrupted,
        DisableReason::BlockedByPolicy,
        DisableReason::RemoteMalwareVerdict,
        DisableReason::NotVerified,
        DisableReason::Greylist,
    ];

    fn bit(self) -> u32 {
        self as u32
    }

    /// Reasons only their owning authority may clear.
    pub fn is_authority_owned(self) -> bool {
        matches!(
            self,
            DisableReason::BlockedByPolicy
                | DisableReason::RemoteMalwareVerdict
                | DisableReason::Greylist
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisableReason::UserAction => "user-action",
            DisableReason::PermissionsIncrease => "permissions-increase",
            DisableReason::ExternalExtension => "external-extension",
            DisableReason::Corrupted => "corrupted",
            DisableReason::BlockedByPolicy => "blocked-by-policy",
            DisableReason::RemoteMalwareVerdict => "remote-malware-verdict",
            DisableReason::NotVerified => "not-verified",
            DisableReason::Greylist => "greylist",
        }
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of disable reasons, persisted as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisableReasonSet(u32);

impl DisableReasonSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a set from a persisted mask. Unknown bits are dropped.
    pub fn from_bits(bits: u32) -> Self {
        let known = DisableReason::ALL.iter().fold(0, |acc, r| acc | r.bit());
        Self(bits & known)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, reason: DisableReason) -> bool {
        self.0 & reason.bit() != 0
    }

    /// Add a reason. Returns whether the set changed.
    pub fn insert(&mut self, reason: DisableReason) -> bool {
        let before = self.0;
        self.0 |= reason.bit();
        before != self.0
    }

    /// Remove exactly one reason. Returns whether the set changed.
    pub fn remove(&mut self, reason: DisableReason) -> bool {
        let before = self.0;
        self.0 &= !reason.bit();
        before != self.0
    }

    pub fn union(self, other: DisableReasonSet) -> Self {
        Self(self.0 | other.0)
    }

    pub fn difference(self, other: DisableReasonSet) -> Self {
        Self(self.0 & !other.0)
    }

    /// The subset only an owning authority may clear.
    pub fn authority_owned(self) -> Self {
        self.iter()
            .filter(|r| r.is_authority_owned())
            .collect()
    }

    /// The subset a generic enable request clears.
    pub fn user_clearable(self) -> Self {
        self.difference(self.authority_owned())
    }

    pub fn iter(self) -> impl Iterator<Item = DisableReason> {
        DisableReason::ALL
            .into_iter()
            .filter(move |r| self.contains(*r))
    }
}

impl From<DisableReason> for DisableReasonSet {
    fn from(reason: DisableReason) -> Self {
        Self(reason.bit())
    }
}

impl FromIterator<DisableReason> for DisableReasonSet {
    fn from_iter<I: IntoIterator<Item = DisableReason>>(iter: I) -> Self {
        let mut set = Self::empty();
        for reason in iter {
            set.insert(reason);
        }
        set
    }
}

impl fmt::Display for DisableReasonSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(DisableReason::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
