//! Reputation verdicts and where they came from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WardenError;

/// A reputation verdict for one extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlocklistState {
    #[default]
    NotBlocklisted,
    Malware,
    SecurityVulnerability,
    PolicyViolation,
    PotentiallyUnwanted,
}

impl BlocklistState {
    /// Used to pick the effective verdict when sources disagree.
    pub fn severity(self) -> u8 {
        match self {
            BlocklistState::NotBlocklisted => 0,
            BlocklistState::SecurityVulnerability => 1,
            BlocklistState::PolicyViolation => 2,
            BlocklistState::PotentiallyUnwanted => 3,
            BlocklistState::Malware => 4,
        }
    }

    /// Verdicts that unload the extension (the blocklisted overlay).
    pub fn is_blocklisted(self) -> bool {
        matches!(
            self,
            BlocklistState::Malware | BlocklistState::PotentiallyUnwanted
        )
    }

    /// Verdicts that leave the extension installed but disabled.
    pub fn is_greylisted(self) -> bool {
        matches!(
            self,
            BlocklistState::SecurityVulnerability | BlocklistState::PolicyViolation
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlocklistState::NotBlocklisted => "not-blocklisted",
            BlocklistState::Malware => "malware",
            BlocklistState::SecurityVulnerability => "security-vulnerability",
            BlocklistState::PolicyViolation => "policy-violation",
            BlocklistState::PotentiallyUnwanted => "potentially-unwanted",
        }
    }
}

impl fmt::Display for BlocklistState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlocklistState {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            BlocklistState::NotBlocklisted,
            BlocklistState::Malware,
            BlocklistState::SecurityVulnerability,
            BlocklistState::PolicyViolation,
            BlocklistState::PotentiallyUnwanted,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| WardenError::InvalidBlocklistState(s.to_string()))
    }
}

/// The authority a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlocklistSource {
    /// Detailed state carried by the local database snapshot.
    Database,
    /// Per-id fetch from the remote reputation service.
    RemoteFetch,
    /// Verdict attached by the telemetry/update service.
    Telemetry,
}

/// A verdict tagged with its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocklistVerdict {
    pub state: BlocklistState,
    pub source: BlocklistSource,
}

/// Verdicts held per source for one extension, as persisted in prefs.
///
/// Sources are independent: the extension is clear only when all of them
/// report `NotBlocklisted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistVerdicts {
    #[serde(default)]
    pub database: BlocklistState,
    #[serde(default)]
    pub remote_fetch: BlocklistState,
    #[serde(default)]
    pub telemetry: BlocklistState,
}

impl BlocklistVerdicts {
    pub fn get(&self, source: BlocklistSource) -> BlocklistState {
        match source {
            BlocklistSource::Database => self.database,
            BlocklistSource::RemoteFetch => self.remote_fetch,
            BlocklistSource::Telemetry => self.telemetry,
        }
    }

    /// Record a verdict. Returns whether it changed.
    pub fn set(&mut self, source: BlocklistSource, state: BlocklistState) -> bool {
        let slot = match source {
            BlocklistSource::Database => &mut self.database,
            BlocklistSource::RemoteFetch => &mut self.remote_fetch,
            BlocklistSource::Telemetry => &mut self.telemetry,
        };
        let changed = *slot != state;
        *slot = state;
        changed
    }

    /// The most severe verdict across all sources.
    pub fn effective(&self) -> BlocklistState {
        [self.database, self.remote_fetch, self.telemetry]
            .into_iter()
            .max_by_key(|state| state.severity())
            .unwrap_or_default()
    }
}
