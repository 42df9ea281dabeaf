//! Seams to the reputation authority.
//!
//! The local snapshot answers "which of these ids are unsafe" cheaply; the
//! remote fetcher answers "what exactly is wrong with this one" slowly.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::BlocklistState;
use crate::error::{WardenError, WardenResult};
use crate::extensions::ExtensionId;

/// Local reputation database snapshot.
#[async_trait]
pub trait ReputationDatabase: Send + Sync {
    /// The subset of `ids` the snapshot lists as unsafe.
    async fn get_unsafe_ids(&self, ids: &[ExtensionId]) -> HashSet<ExtensionId>;

    /// Detailed state, when the snapshot carries one for this id.
    fn detailed_state(&self, _id: &str) -> Option<BlocklistState> {
        None
    }
}

/// Remote per-id state lookup.
#[async_trait]
pub trait BlocklistStateFetcher: Send + Sync {
    async fn request(&self, id: &str) -> WardenResult<BlocklistState>;
}

/// On-disk shape of a snapshot file.
#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    unsafe_ids: Vec<ExtensionId>,
    #[serde(default)]
    states: HashMap<ExtensionId, BlocklistState>,
}

/// A snapshot held in memory, optionally loaded from a JSON file of the
/// form `{ "unsafe_ids": [...], "states": { "<id>": "malware" } }`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDatabase {
    unsafe_ids: HashSet<ExtensionId>,
    states: HashMap<ExtensionId, BlocklistState>,
}

impl SnapshotDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> WardenResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&content)?;
        for id in file.unsafe_ids.iter().chain(file.states.keys()) {
            if !crate::extensions::is_valid_id(id) {
                return Err(WardenError::InvalidId(id.clone()));
            }
        }
        // An id with a detailed state is unsafe even if the list omits it
        let unsafe_ids = file
            .unsafe_ids
            .into_iter()
            .chain(file.states.keys().cloned())
            .collect();
        Ok(Self {
            unsafe_ids,
            states: file.states,
        })
    }

    /// List an id as unsafe without a detailed state.
    pub fn with_unsafe(mut self, id: &str) -> Self {
        self.unsafe_ids.insert(id.to_string());
        self
    }

    /// List an id as unsafe with a detailed state.
    pub fn with_state(mut self, id: &str, state: BlocklistState) -> Self {
        self.unsafe_ids.insert(id.to_string());
        self.states.insert(id.to_string(), state);
        self
    }
}

#[async_trait]
impl ReputationDatabase for SnapshotDatabase {
    async fn get_unsafe_ids(&self, ids: &[ExtensionId]) -> HashSet<ExtensionId> {
        ids.iter()
            .filter(|id| self.unsafe_ids.contains(*id))
            .cloned()
            .collect()
    }

    fn detailed_state(&self, id: &str) -> Option<BlocklistState> {
        self.states.get(id).copied()
    }
}

/// Fetcher that answers from a fixed table; ids it does not know are
/// reported clean.
#[derive(Debug, Clone, Default)]
pub struct TableFetcher {
    states: HashMap<ExtensionId, BlocklistState>,
}

impl TableFetcher {
    pub fn new(states: HashMap<ExtensionId, BlocklistState>) -> Self {
        Self { states }
    }
}

#[async_trait]
impl BlocklistStateFetcher for TableFetcher {
    async fn request(&self, id: &str) -> WardenResult<BlocklistState> {
        Ok(self.states.get(id).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[tokio::test]
    async fn test_snapshot_filters_requested_ids() {
        let db = SnapshotDatabase::new().with_unsafe(A);
        let unsafe_ids = db.get_unsafe_ids(&[A.to_string(), B.to_string()]).await;
        assert_eq!(unsafe_ids.len(), 1);
        assert!(unsafe_ids.contains(A));
        assert_eq!(db.detailed_state(A), None);
    }

    #[test]
    fn test_snapshot_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snapshot.json");
        std::fs::write(
            &path,
            format!(r#"{{"unsafe_ids": ["{A}"], "states": {{"{B}": "policy-violation"}}}}"#),
        )
        .unwrap();

        let db = SnapshotDatabase::load(&path).unwrap();
        assert_eq!(db.detailed_state(B), Some(BlocklistState::PolicyViolation));
        assert!(db.unsafe_ids.contains(A));
        assert!(db.unsafe_ids.contains(B));
    }

    #[test]
    fn test_snapshot_rejects_bad_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("snapshot.json");
        std::fs::write(&path, r#"{"unsafe_ids": ["nope"]}"#).unwrap();
        assert!(matches!(
            SnapshotDatabase::load(&path),
            Err(WardenError::InvalidId(_))
        ));
    }
}
