//! Warden - extension lifecycle, install arbitration and blocklist state.
//!
//! Warden tracks every installed and pending extension of a profile
//! through enabled, disabled (with reasons), terminated, blocklisted and
//! blocked, and reconciles what several independent authorities say about
//! them: the user, enterprise policy, external install providers, and a
//! remote reputation service.
//!
//! # Architecture
//!
//! - [`extensions`] - Identity, versions, install sources, disable reasons,
//!   the registry sets and the persisted prefs
//! - [`blocklist`] - Reputation verdicts and the coalescing query cache
//! - [`policy`] - Management policy aggregation and the enterprise provider
//! - [`pending`] - Pending install requests and source-priority arbitration
//! - [`external`] - External install providers
//! - [`service`] - The orchestrator and the task that drives it
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden::{Config, ExtensionService, ManagementPolicy, ProfileContext};
//!
//! let profile = ProfileContext::new(Config::load());
//! let service = ExtensionService::new(profile, ManagementPolicy::new())?;
//! let (handle, _task) = ServiceRunner::spawn(service, blocklist, Arc::new(ManifestInstaller::new()));
//! handle.enable_extension("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").await?;
//! ```

pub mod blocklist;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod extensions;
pub mod external;
pub mod pending;
pub mod policy;
pub mod profile;
pub mod service;

pub use blocklist::{Blocklist, BlocklistState};
pub use config::Config;
pub use error::{WardenError, WardenResult};
pub use events::{EventBus, ExtensionEvent};
pub use extensions::{DisableReason, DisableReasonSet, Extension, InstallSource, Membership};
pub use pending::{PendingExtensionManager, ProposalOutcome};
pub use policy::{ManagementPolicy, ManagementPolicyProvider};
pub use profile::ProfileContext;
pub use service::{ExtensionService, ManifestInstaller, ServiceHandle, ServiceRunner};
