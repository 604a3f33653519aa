//! spoolbridge - slicer filament to Spoolman bridge
//!
//! Subcommands cover the whole workflow: import the slicer presets, refresh
//! the spool list, reconcile the two, report finished jobs, or run the HTTP
//! service that does the same for remote clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};

use spoolbridge::accounting::{ConsumptionAccountant, PrintJob};
use spoolbridge::catalog::{normalize_slicer_presets, slicer_preset_entries, Catalog};
use spoolbridge::console::ConsoleDecisionSource;
use spoolbridge::history::JobHistory;
use spoolbridge::mapping::{MappingChange, MappingStore};
use spoolbridge::matcher::Matcher;
use spoolbridge::reconcile::{mapping_status, AutoAccept, DecisionSource, ReconciliationSession};
use spoolbridge::spoolman::SpoolmanClient;
use spoolbridge::AppState;
use spoolbridge_common::config::{self, ConfigSource, DataPaths, TomlConfig};
use spoolbridge_common::logging::init_tracing;

/// Command-line arguments for spoolbridge
#[derive(Parser, Debug)]
#[command(name = "spoolbridge")]
#[command(about = "Keep slicer filaments and Spoolman spools in sync")]
#[command(version)]
struct Args {
    /// Data folder (overrides SPOOLBRIDGE_DATA_DIR and the config file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, global = true, env = "SPOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store slicer presets (JSON) as the slicer catalog snapshot
    ImportPresets {
        /// Preset list or slicer settings response
        file: PathBuf,
    },
    /// Fetch spools from Spoolman into the spool catalog snapshot
    RefreshSpools,
    /// Match unmapped slicer filaments to unused spools
    Reconcile {
        /// Accept every suggestion without prompting
        #[arg(long)]
        auto: bool,
    },
    /// Map a slicer filament to a spool, taking the spool from any other filament
    Map { source: String, target: String },
    /// Remove the mapping of a slicer filament
    Unmap { source: String },
    /// Show mapping coverage
    Status,
    /// Deduct a finished job's consumption from the mapped spools
    Report {
        /// Print job JSON
        job: PathBuf,
    },
    /// Run the HTTP service
    Serve {
        /// Listen address (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let (toml_config, config_source) = TomlConfig::load_with_source(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    init_tracing(&toml_config.logging).context("Failed to initialize logging")?;
    match config_source {
        ConfigSource::File => info!("Loaded config from {}", config_path.display()),
        ConfigSource::Defaults => warn!(
            "Config file {} not found, using built-in defaults",
            config_path.display()
        ),
    }

    let paths = DataPaths::new(config::resolve_data_dir(
        args.data_dir.as_deref(),
        &toml_config,
    ));
    paths
        .ensure_exists()
        .with_context(|| format!("Failed to create data folder {}", paths.root.display()))?;
    info!("Data folder: {}", paths.root.display());

    match args.command {
        Command::ImportPresets { file } => import_presets(&paths, &file),
        Command::RefreshSpools => refresh_spools(&paths, &toml_config).await,
        Command::Reconcile { auto } => reconcile(&paths, &toml_config, auto),
        Command::Map { source, target } => {
            let store = MappingStore::new(paths.mapping_file());
            if let MappingChange::Mapped(outcome) = store.update(&source, Some(target.as_str()))? {
                if let Some(displaced) = outcome.stolen_from {
                    println!("Spool {} moved from {} to {}", target, displaced, source);
                } else if !outcome.changed {
                    println!("{} already mapped to {}", source, target);
                } else {
                    println!("{} -> {}", source, target);
                }
            }
            Ok(())
        }
        Command::Unmap { source } => {
            let store = MappingStore::new(paths.mapping_file());
            match store.remove(&source)? {
                Some(target) => println!("{} no longer mapped (was {})", source, target),
                None => println!("{} was not mapped", source),
            }
            Ok(())
        }
        Command::Status => status(&paths),
        Command::Report { job } => report(&paths, &toml_config, &job).await,
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| toml_config.server.bind.clone());
            serve(paths, &toml_config, &bind).await
        }
    }
}

fn import_presets(paths: &DataPaths, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", file.display()))?;

    let catalog = normalize_slicer_presets(slicer_preset_entries(&document));
    catalog.save_snapshot(&paths.slicer_catalog_file())?;
    info!(count = catalog.len(), "Slicer filaments saved");
    println!("{} slicer filaments imported", catalog.len());
    Ok(())
}

async fn refresh_spools(paths: &DataPaths, toml_config: &TomlConfig) -> Result<()> {
    let client = SpoolmanClient::new(&toml_config.spoolman)?;
    let catalog = client
        .fetch_spools()
        .await
        .context("Failed to fetch spools from Spoolman")?;
    catalog.save_snapshot(&paths.spoolman_catalog_file())?;
    info!(count = catalog.len(), "Spools saved");
    println!("{} spools fetched", catalog.len());
    Ok(())
}

fn reconcile(paths: &DataPaths, toml_config: &TomlConfig, auto: bool) -> Result<()> {
    let catalog_a = Catalog::load_snapshot(&paths.slicer_catalog_file());
    let catalog_b = Catalog::load_snapshot(&paths.spoolman_catalog_file());
    if catalog_a.is_empty() || catalog_b.is_empty() {
        bail!("Both catalogs are needed; run import-presets and refresh-spools first");
    }

    let store = MappingStore::new(paths.mapping_file());
    let matcher = Matcher::from_config(&toml_config.matching);
    let mut session = ReconciliationSession::new(&catalog_a, &catalog_b, &store, &matcher);

    let mut console;
    let mut auto_accept = AutoAccept;
    let decisions: &mut dyn DecisionSource = if auto {
        &mut auto_accept
    } else {
        console = ConsoleDecisionSource::stdio();
        &mut console
    };

    let report = session.run(decisions)?;
    println!("{} filaments mapped", report.mapped.len());
    if !report.is_complete() {
        println!("Still unmapped: {}", report.unresolved.join(", "));
    }
    Ok(())
}

fn status(paths: &DataPaths) -> Result<()> {
    let catalog_a = Catalog::load_snapshot(&paths.slicer_catalog_file());
    let catalog_b = Catalog::load_snapshot(&paths.spoolman_catalog_file());
    let mapping = MappingStore::new(paths.mapping_file()).load();

    let status = mapping_status(&catalog_a, &catalog_b, &mapping);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn report(paths: &DataPaths, toml_config: &TomlConfig, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut job: PrintJob =
        serde_json::from_str(&text).with_context(|| format!("Invalid job in {}", file.display()))?;

    let client = SpoolmanClient::new(&toml_config.spoolman)?;
    if !client.is_configured() {
        warn!("spoolman.url is not set, deductions will fail");
    }

    let accountant = ConsumptionAccountant::new(MappingStore::new(paths.mapping_file()));
    let report = accountant.apply(&mut job, &client).await;
    JobHistory::new(paths.job_history_file()).append(&job)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(paths: DataPaths, toml_config: &TomlConfig, bind: &str) -> Result<()> {
    let client = SpoolmanClient::new(&toml_config.spoolman)?;
    let configured = client.is_configured();
    if !configured {
        warn!("spoolman.url is not set, job deductions will fail");
    }

    let state = AppState::new(
        paths,
        Matcher::from_config(&toml_config.matching),
        Arc::new(client),
        configured,
    );
    let app = spoolbridge::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("Listening on http://{}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
