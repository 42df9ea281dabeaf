//! Blocklist cache and async query.
//!
//! [`Blocklist`] answers "which of these ids are blocklisted" without
//! blocking the caller:
//! - The local database snapshot decides which ids are unsafe at all
//! - A detailed state comes from the snapshot, the cache, or a remote fetch
//! - Concurrent queries for the same id share one outstanding fetch
//!
//! ```text
//! Blocklist
//! ├── cache:     HashMap<ExtensionId, BlocklistState>   (successful fetches only)
//! ├── in_flight: HashMap<ExtensionId, Vec<oneshot::Sender>>
//! ├── ready:     watch<bool>  (first snapshot load done)
//! └── updates:   watch<u64>   (bumped on every snapshot update)
//! ```
//!
//! The cache and the in-flight table are private; callers go through the
//! query methods, which is what makes coalescing hold.

mod database;
mod state;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};

pub use database::{BlocklistStateFetcher, ReputationDatabase, SnapshotDatabase, TableFetcher};
pub use state::{BlocklistSource, BlocklistState, BlocklistVerdict, BlocklistVerdicts};

use crate::extensions::ExtensionId;

/// Default time a remote fetch may take before it resolves clean.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CacheState {
    cache: HashMap<ExtensionId, BlocklistState>,
    in_flight: HashMap<ExtensionId, Vec<oneshot::Sender<BlocklistState>>>,
}

/// Per-profile blocklist cache in front of the reputation authority.
pub struct Blocklist {
    database: Arc<dyn ReputationDatabase>,
    fetcher: Arc<dyn BlocklistStateFetcher>,
    state: Arc<Mutex<CacheState>>,
    fetch_timeout: Duration,
    ready: watch::Sender<bool>,
    updates: watch::Sender<u64>,
}

impl Blocklist {
    pub fn new(
        database: Arc<dyn ReputationDatabase>,
        fetcher: Arc<dyn BlocklistStateFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        let (updates, _) = watch::channel(0);
        Self {
            database,
            fetcher,
            state: Arc::new(Mutex::new(CacheState::default())),
            fetch_timeout,
            ready,
            updates,
        }
    }

    /// Resolve the blocklist state of each id. Ids that resolve to
    /// `NotBlocklisted` are left out of the result.
    pub async fn get_blocklisted_ids(
        &self,
        ids: &[ExtensionId],
    ) -> HashMap<ExtensionId, BlocklistVerdict> {
        let unsafe_ids = self.database.get_unsafe_ids(ids).await;

        let mut resolved = HashMap::new();
        let mut waiting = Vec::new();
        let mut to_fetch = Vec::new();
        let mut seen = HashSet::new();

        {
            let mut state = self.state.lock().await;
            for id in ids.iter().filter(|id| unsafe_ids.contains(*id)) {
                if !seen.insert(id.as_str()) {
                    continue;
                }

                if let Some(detail) = self.database.detailed_state(id) {
                    resolved.insert(
                        id.clone(),
                        BlocklistVerdict {
                            state: detail,
                            source: BlocklistSource::Database,
                        },
                    );
                    continue;
                }

                if let Some(cached) = state.cache.get(id) {
                    resolved.insert(
                        id.clone(),
                        BlocklistVerdict {
                            state: *cached,
                            source: BlocklistSource::RemoteFetch,
                        },
                    );
                    continue;
                }

                let (tx, rx) = oneshot::channel();
                match state.in_flight.get_mut(id) {
                    Some(waiters) => waiters.push(tx),
                    None => {
                        state.in_flight.insert(id.clone(), vec![tx]);
                        to_fetch.push(id.clone());
                    }
                }
                waiting.push((id.clone(), rx));
            }
        }

        for id in to_fetch {
            self.spawn_fetch(id);
        }

        for (id, rx) in waiting {
            // A dropped sender means the fetch task died; treat as clean.
            let fetched = rx.await.unwrap_or_default();
            resolved.insert(
                id,
                BlocklistVerdict {
                    state: fetched,
                    source: BlocklistSource::RemoteFetch,
                },
            );
        }

        resolved.retain(|_, verdict| verdict.state != BlocklistState::NotBlocklisted);
        resolved
    }

    /// Resolve a single id.
    pub async fn is_blocklisted(&self, id: &str) -> BlocklistState {
        self.get_blocklisted_ids(&[id.to_string()])
            .await
            .remove(id)
            .map(|verdict| verdict.state)
            .unwrap_or_default()
    }

    fn spawn_fetch(&self, id: ExtensionId) {
        let fetcher = Arc::clone(&self.fetcher);
        let state = Arc::clone(&self.state);
        let timeout = self.fetch_timeout;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, fetcher.request(&id)).await;

            let mut state = state.lock().await;
            let fetched = match outcome {
                Ok(Ok(fetched)) => {
                    state.cache.insert(id.clone(), fetched);
                    fetched
                }
                Ok(Err(e)) => {
                    tracing::warn!("Blocklist fetch for {} failed: {}", id, e);
                    BlocklistState::NotBlocklisted
                }
                Err(_) => {
                    tracing::warn!("Blocklist fetch for {} timed out after {:?}", id, timeout);
                    BlocklistState::NotBlocklisted
                }
            };

            let waiters = state.in_flight.remove(&id).unwrap_or_default();
            tracing::debug!(
                "Blocklist fetch for {} resolved {} for {} waiter(s)",
                id,
                fetched,
                waiters.len()
            );
            for waiter in waiters {
                let _ = waiter.send(fetched);
            }
        });
    }

    /// Whether the local snapshot has finished its first load.
    pub async fn is_database_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the local snapshot has finished its first load.
    pub async fn wait_for_database_ready(&self) {
        let mut rx = self.ready.subscribe();
        // Only fails if the sender is gone, and `self` owns the sender.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Called by the snapshot owner whenever a new snapshot is in place.
    /// The first call also marks the database ready.
    pub fn on_database_updated(&self) {
        self.ready.send_replace(true);
        self.updates.send_modify(|generation| *generation += 1);
        tracing::debug!("Blocklist database updated");
    }

    /// Receiver that changes on every snapshot update.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }
}
