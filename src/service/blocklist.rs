//! Applying reputation verdicts to installed extensions.
//!
//! Three sources hold verdicts independently: the local database, remote
//! per-id fetches, and the telemetry service. The extension is blocklisted
//! while any of them says malware or potentially unwanted. Lesser verdicts
//! from the reputation service disable it with `Greylist`; a telemetry
//! malware verdict also records `RemoteMalwareVerdict`. Neither touches the
//! persisted enabled/disabled flag beyond those reasons, so clearing every
//! source restores the extension as it was.

use std::collections::HashMap;

use super::ExtensionService;
use crate::blocklist::{BlocklistSource, BlocklistState, BlocklistVerdict};
use crate::error::WardenResult;
use crate::extensions::{DisableReason, ExtensionId, Membership};

impl ExtensionService {
    /// Ids a blocklist round should ask about. Components are exempt.
    pub fn blocklist_candidates(&self) -> Vec<ExtensionId> {
        self.installed()
            .into_iter()
            .filter(|extension| !extension.is_component())
            .map(|extension| extension.id.clone())
            .collect()
    }

    /// Apply one blocklist round. Every queried id absent from `results`
    /// is clean as far as the database and remote fetches are concerned.
    /// Returns the ids whose verdicts changed.
    pub fn on_blocklist_results(
        &mut self,
        queried: &[ExtensionId],
        results: &HashMap<ExtensionId, BlocklistVerdict>,
    ) -> Vec<ExtensionId> {
        let mut changed = Vec::new();

        for id in queried {
            let Some(extension) = self.registry.get_installed_extension(id) else {
                continue;
            };
            if extension.is_component() {
                continue;
            }

            let (database, remote) = match results.get(id) {
                Some(verdict) if verdict.source == BlocklistSource::Database => {
                    (verdict.state, BlocklistState::NotBlocklisted)
                }
                Some(verdict) if verdict.source == BlocklistSource::RemoteFetch => {
                    (BlocklistState::NotBlocklisted, verdict.state)
                }
                _ => (BlocklistState::NotBlocklisted, BlocklistState::NotBlocklisted),
            };

            let mut updated = self
                .prefs
                .set_blocklist_verdict(id, BlocklistSource::Database, database);
            updated |= self
                .prefs
                .set_blocklist_verdict(id, BlocklistSource::RemoteFetch, remote);

            if updated {
                tracing::info!(
                    "{}: reputation verdict now {}",
                    id,
                    self.prefs.blocklist(id).effective()
                );
                self.sync_reputation_reasons(id);
                self.refresh(&extension, true);
                changed.push(id.clone());
            }
        }

        changed
    }

    /// Record the telemetry service's verdict for one extension.
    pub fn set_telemetry_verdict(
        &mut self,
        id: &str,
        state: BlocklistState,
    ) -> WardenResult<Membership> {
        let extension = self.installed_or_err(id)?;
        if extension.is_component() {
            tracing::debug!("Ignoring telemetry verdict for component {}", id);
            return Ok(self.refresh(&extension, true));
        }

        if self
            .prefs
            .set_blocklist_verdict(id, BlocklistSource::Telemetry, state)
        {
            tracing::info!("{}: telemetry verdict now {}", id, state);
            self.sync_reputation_reasons(id);
        }
        Ok(self.refresh(&extension, true))
    }

    /// Effective verdict across all sources.
    pub fn blocklist_state(&self, id: &str) -> BlocklistState {
        self.prefs.blocklist(id).effective()
    }

    /// Make the authority-owned reputation reasons match the verdicts.
    pub(super) fn sync_reputation_reasons(&mut self, id: &str) {
        let verdicts = self.prefs.blocklist(id);
        let greylisted = verdicts.get(BlocklistSource::Database).is_greylisted()
            || verdicts.get(BlocklistSource::RemoteFetch).is_greylisted();
        let telemetry_malware = verdicts.get(BlocklistSource::Telemetry) == BlocklistState::Malware;

        let mut reasons = self.prefs.disable_reasons(id);
        if greylisted {
            reasons.insert(DisableReason::Greylist);
        } else {
            reasons.remove(DisableReason::Greylist);
        }
        if telemetry_malware {
            reasons.insert(DisableReason::RemoteMalwareVerdict);
        } else {
            reasons.remove(DisableReason::RemoteMalwareVerdict);
        }
        self.update_disable_reasons(id, reasons);
    }
}
