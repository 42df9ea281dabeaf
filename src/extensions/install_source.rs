//! Install sources and their priority ranking.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The channel an extension was (or is proposed to be) installed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallSource {
    /// Installed by the user, or through sync.
    Internal,
    /// Loaded from a directory by a developer.
    Unpacked,
    /// A crx file dropped next to the browser by another program.
    ExternalFile,
    ExternalRegistry,
    ExternalPref,
    ExternalPrefDownload,
    ExternalPolicyDownload,
    ExternalPolicy,
    ExternalComponent,
    Component,
}

impl InstallSource {
    pub const ALL: [InstallSource; 10] = [
        InstallSource::Internal,
        InstallSource::Unpacked,
        InstallSource::ExternalFile,
        InstallSource::ExternalRegistry,
        InstallSource::ExternalPref,
        InstallSource::ExternalPrefDownload,
        InstallSource::ExternalPolicyDownload,
        InstallSource::ExternalPolicy,
        InstallSource::ExternalComponent,
        InstallSource::Component,
    ];

    /// Arbitration rank. Sources sharing a rank form one priority tier.
    pub fn rank(self) -> u8 {
        match self {
            InstallSource::Component => 9,
            InstallSource::ExternalComponent => 8,
            InstallSource::ExternalRegistry => 7,
            InstallSource::ExternalPolicy | InstallSource::ExternalPolicyDownload => 6,
            InstallSource::ExternalPrefDownload => 5,
            InstallSource::ExternalPref => 4,
            InstallSource::Unpacked => 3,
            InstallSource::ExternalFile | InstallSource::Internal => 1,
        }
    }

    /// Compare priority tiers. `Greater` means `self` outranks `other`.
    pub fn compare_priority(self, other: InstallSource) -> Ordering {
        self.rank().cmp(&other.rank())
    }

    /// Component and external-component extensions skip blocklist and
    /// enterprise checks entirely.
    pub fn is_component(self) -> bool {
        matches!(
            self,
            InstallSource::Component | InstallSource::ExternalComponent
        )
    }

    /// Installed at the request of some program other than the user.
    pub fn is_external(self) -> bool {
        matches!(
            self,
            InstallSource::ExternalFile
                | InstallSource::ExternalRegistry
                | InstallSource::ExternalPref
                | InstallSource::ExternalPrefDownload
                | InstallSource::ExternalPolicyDownload
                | InstallSource::ExternalPolicy
                | InstallSource::ExternalComponent
        )
    }

    /// Installed because enterprise policy requires it.
    pub fn is_policy(self) -> bool {
        matches!(
            self,
            InstallSource::ExternalPolicy | InstallSource::ExternalPolicyDownload
        )
    }

    /// External sources whose installs must be acknowledged by the user
    /// before they run.
    pub fn needs_acknowledgement(self) -> bool {
        self.is_external() && !self.is_policy() && !self.is_component()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallSource::Internal => "internal",
            InstallSource::Unpacked => "unpacked",
            InstallSource::ExternalFile => "external-file",
            InstallSource::ExternalRegistry => "external-registry",
            InstallSource::ExternalPref => "external-pref",
            InstallSource::ExternalPrefDownload => "external-pref-download",
            InstallSource::ExternalPolicyDownload => "external-policy-download",
            InstallSource::ExternalPolicy => "external-policy",
            InstallSource::ExternalComponent => "external-component",
            InstallSource::Component => "component",
        }
    }
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
