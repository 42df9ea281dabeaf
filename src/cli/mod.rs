//! CLI commands for Warden.
//!
//! Each command opens the profile named by the config, reconciles it
//! (policy, then a blocklist round), applies one change and saves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::blocklist::{Blocklist, BlocklistState, SnapshotDatabase, TableFetcher};
use crate::config::Config;
use crate::extensions::DisableReason;
use crate::external::{PolicyForcelistProvider, PrefDirProvider};
use crate::policy::{EnterprisePolicyProvider, ManagementPolicy};
use crate::profile::ProfileContext;
use crate::service::{ExtensionService, ManifestInstaller, ServiceHandle, ServiceRunner};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Extension lifecycle and blocklist manager", long_about = None)]
pub struct Cli {
    /// Config file (default: <config_dir>/warden/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show every installed extension and where it stands
    Status,

    /// Run the external providers and install what they list
    Scan,

    /// Enable an extension
    Enable { id: String },

    /// Disable an extension on behalf of the user
    Disable { id: String },

    /// Uninstall an extension
    Uninstall { id: String },

    /// Record a telemetry verdict (e.g. malware, not-blocklisted)
    SetVerdict { id: String, state: String },
}

/// Parse arguments and run the command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_command(config, cli.command))
}

async fn run_command(config: Config, command: Commands) -> Result<()> {
    // Parse before touching the profile.
    let verdict = match &command {
        Commands::SetVerdict { state, .. } => Some(state.parse::<BlocklistState>()?),
        _ => None,
    };

    let (handle, task) = open(config.clone())?;
    handle.when_idle().await?;

    match command {
        Commands::Status => {}
        Commands::Scan => {
            for dir in &config.external.pref_dirs {
                handle
                    .register_external_provider(Arc::new(PrefDirProvider::new(&dir.path, dir.source)))
                    .await?;
            }
            handle
                .register_external_provider(Arc::new(PolicyForcelistProvider::new(
                    config.policy.forcelist.clone(),
                )))
                .await?;
            handle.when_idle().await?;
        }
        Commands::Enable { id } => {
            let membership = handle.enable_extension(&id).await?;
            println!("{id}: {membership}");
        }
        Commands::Disable { id } => {
            let membership = handle
                .disable_extension(&id, DisableReason::UserAction.into())
                .await?;
            println!("{id}: {membership}");
        }
        Commands::Uninstall { id } => {
            handle.uninstall_extension(&id).await?;
            println!("{id}: uninstalled");
        }
        Commands::SetVerdict { id, .. } => {
            let state = verdict.unwrap_or_default();
            let membership = handle.set_telemetry_verdict(&id, state).await?;
            println!("{id}: {membership}");
        }
    }

    print_status(&handle).await?;
    handle.shutdown().await?;
    task.await.context("Extension service task failed")?;
    Ok(())
}

fn open(config: Config) -> Result<(ServiceHandle, tokio::task::JoinHandle<()>)> {
    let mut policy = ManagementPolicy::new();
    policy.register_provider(Arc::new(EnterprisePolicyProvider::from_config(&config.policy)));

    let database = match &config.blocklist.snapshot {
        Some(path) => SnapshotDatabase::load(path)
            .with_context(|| format!("Failed to load blocklist snapshot {}", path.display()))?,
        None => SnapshotDatabase::new(),
    };
    let blocklist = Arc::new(Blocklist::new(
        Arc::new(database),
        Arc::new(TableFetcher::default()),
        config.blocklist.fetch_timeout(),
    ));
    blocklist.on_database_updated();

    let update_cache = config.profile.data_dir.join("updates");
    let profile = ProfileContext::new(config);
    let service = ExtensionService::new(profile, policy).context("Failed to open profile")?;

    Ok(ServiceRunner::spawn(
        service,
        blocklist,
        Arc::new(ManifestInstaller::with_update_cache(update_cache)),
    ))
}

async fn print_status(handle: &ServiceHandle) -> Result<()> {
    let snapshot = handle.snapshot().await?;

    if snapshot.blocked {
        println!("(all extensions blocked)");
    }
    for summary in &snapshot.extensions {
        let reasons = if summary.disable_reasons.is_empty() {
            String::new()
        } else {
            format!(" [{}]", summary.disable_reasons)
        };
        println!(
            "{}  {:<12} {:<24} {:<11} {}{}",
            summary.id,
            summary.version,
            summary.name,
            summary.membership,
            summary.location,
            reasons
        );
        if summary.blocklist_state != BlocklistState::NotBlocklisted {
            println!("    reputation: {}", summary.blocklist_state);
        }
    }
    for (id, source) in &snapshot.pending {
        println!("{id}  pending from {source}");
    }
    Ok(())
}
