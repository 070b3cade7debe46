// src/main.rs

use anyhow::{Context, Result};
use artpack::db::models::Setting;
use artpack::events::Event;
use artpack::repository::ProviderDownloader;
use artpack::resolver::latest_compatible;
use artpack::{AddonManager, AppVersion, Channel, Config, db};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Settings key remembering the application version between runs
const APP_VERSION_SETTING: &str = "app_version";

#[derive(Parser)]
#[command(name = "artpack")]
#[command(author, version, about = "Add-on package manager with verified downloads and atomic installs", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalOpts {
    /// User data directory; add-ons are installed into <DATA_DIR>/addons
    #[arg(long, global = true, default_value = "/var/lib/artpack")]
    data_dir: PathBuf,

    /// Directory of add-ons bundled with the application (read-only)
    #[arg(long, global = true)]
    system_dir: Option<PathBuf>,

    /// Database path (default: <DATA_DIR>/artpack.db)
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Running application version; remembered once given
    #[arg(long, global = true)]
    app_version: Option<String>,

    /// Add-on catalog URL
    #[arg(long, global = true)]
    catalog_url: Option<String>,

    /// Application release feed URL
    #[arg(long, global = true)]
    release_feed_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Artpack database
    Init,
    /// List installed add-ons
    List,
    /// Install an add-on from a local archive
    Install {
        /// Path to the add-on archive
        archive: PathBuf,
    },
    /// Download and install an add-on from the catalog
    Download {
        /// Catalog key of the add-on
        key: String,
        /// Version to install (default: newest compatible)
        version: Option<u32>,
    },
    /// Remove an installed add-on
    Uninstall {
        /// Add-on id
        id: String,
    },
    /// Show catalog add-ons compatible with this application
    Catalog,
    /// Update every outdated add-on
    UpdateAll,
    /// Re-fetch the baseline add-on if it is missing or outdated
    Resync,
    /// Report required add-ons that are missing or too old
    Missing {
        /// Requirements as <id>=<version>
        required: Vec<String>,
    },
    /// Show changeset history
    History,
    /// Add an explicit add-on folder, scanned before all other roots
    AddPath { path: PathBuf },
    /// Forget an explicit add-on folder
    RemovePath { path: PathBuf },
    /// Show or set the update channel (stable, beta, dev)
    Channel { channel: Option<String> },
    /// Check the release feed for a newer application version
    CheckUpdate,
}

fn db_path(global: &GlobalOpts) -> PathBuf {
    global
        .db_path
        .clone()
        .unwrap_or_else(|| global.data_dir.join("artpack.db"))
}

/// Resolve the application version from the flag or the settings table
fn app_version(global: &GlobalOpts) -> Result<AppVersion> {
    let conn = db::open_or_init(&db_path(global))?;

    let raw = match &global.app_version {
        Some(raw) => {
            Setting::set(&conn, APP_VERSION_SETTING, raw)?;
            raw.clone()
        }
        None => Setting::get(&conn, APP_VERSION_SETTING)?
            .context("Application version unknown; pass --app-version once")?,
    };

    AppVersion::new(&raw).with_context(|| format!("Invalid application version {}", raw))
}

fn build_config(global: &GlobalOpts) -> Result<Config> {
    let mut config = Config::new(global.data_dir.clone(), app_version(global)?);
    config.db_path = db_path(global);
    config.system_dir = global.system_dir.clone();
    if let Some(url) = &global.catalog_url {
        config.catalog_url = url.clone();
    }
    if let Some(url) = &global.release_feed_url {
        config.release_feed_url = url.clone();
    }
    Ok(config)
}

/// Print manager events as they arrive
fn spawn_reporter(mut rx: mpsc::UnboundedReceiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::DownloadProgress { id, bytes, total } => match total {
                    Some(total) => debug!("{}: {} / {} bytes", id, bytes, total),
                    None => debug!("{}: {} bytes", id, bytes),
                },
                Event::InstallComplete { id } => println!("Installed add-on: {}", id),
                Event::UninstallComplete { id } => println!("Removed add-on: {}", id),
                Event::ChecksumFailed { id } => println!("Checksum mismatch for {}", id),
                Event::BaselineResynced { id, version } => {
                    println!("Restored baseline add-on {} v{}", id, version)
                }
                Event::UpdateBatchComplete { updated } => {
                    println!("Updated {} add-on(s)", updated.len())
                }
            }
        }
    })
}

/// Render a SQLite UTC timestamp in local time
fn display_timestamp(raw: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|utc| {
            utc.and_utc()
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

fn parse_requirement(spec: &str) -> Result<(String, u32)> {
    let (id, version) = spec
        .split_once('=')
        .with_context(|| format!("Expected <id>=<version>, got {}", spec))?;
    let version = version
        .parse()
        .with_context(|| format!("Invalid version in {}", spec))?;
    Ok((id.to_string(), version))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        // No command provided, show help
        println!("Artpack Add-on Manager v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'artpack --help' for usage information");
        return Ok(());
    };

    if let Commands::Init = command {
        let path = db_path(&cli.global);
        info!("Initializing Artpack database at: {}", path.display());
        db::init(&path)?;
        println!("Database initialized successfully at: {}", path.display());
        return Ok(());
    }

    let config = build_config(&cli.global)?;
    let source = Arc::new(ProviderDownloader::from_config(&config)?);
    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = spawn_reporter(rx);
    let mut manager = AddonManager::open(config, source, Arc::new(tx))?;

    run(&mut manager, command).await?;

    // Dropping the manager closes the event channel
    drop(manager);
    reporter.await?;
    Ok(())
}

async fn run(manager: &mut AddonManager, command: Commands) -> Result<()> {
    match command {
        Commands::Init => Ok(()),
        Commands::List => {
            let registry = manager.load().await?;
            if registry.is_empty() {
                println!("No add-ons installed.");
                return Ok(());
            }

            println!("Installed add-ons:");
            for package in registry.iter() {
                print!("  {} v{} - {}", package.id, package.version, package.title);
                if !package.removable {
                    print!(" [builtin]");
                }
                if package.outdated {
                    print!(" [outdated]");
                }
                if let Some(error) = &package.error {
                    print!(" [error: {}]", error);
                }
                println!();
            }
            println!("\nTotal: {} add-on(s)", registry.len());
            Ok(())
        }
        Commands::Install { archive } => {
            manager.load().await?;
            let package = manager.install_archive(&archive).await?;
            println!("  Version: {}", package.version);
            println!("  Artworks: {}", package.artworks.len());
            Ok(())
        }
        Commands::Download { key, version } => {
            manager.load().await?;
            let version = match version {
                Some(version) => version,
                None => {
                    let versions = manager
                        .refresh_catalog()
                        .await?
                        .iter()
                        .find(|entry| entry.key == key)
                        .map(|entry| entry.versions.clone())
                        .with_context(|| format!("No compatible catalog entry for {}", key))?;
                    latest_compatible(&manager.config().app_version, &versions)
                        .with_context(|| format!("No compatible version of {}", key))?
                        .version
                }
            };

            match manager.install_downloadable(&key, version).await? {
                Some(package) => println!("  Version: {}", package.version),
                None => println!("{} is already at v{} or newer", key, version),
            }
            Ok(())
        }
        Commands::Uninstall { id } => {
            manager.load().await?;
            manager.uninstall(&id)?;
            Ok(())
        }
        Commands::Catalog => {
            manager.reload()?;
            let catalog = manager.refresh_catalog().await?.to_vec();
            if catalog.is_empty() {
                println!("No compatible add-ons in catalog.");
                return Ok(());
            }

            println!("Available add-ons:");
            for entry in &catalog {
                let versions: Vec<String> =
                    entry.versions.iter().map(|v| format!("v{}", v.version)).collect();
                let installed = manager
                    .registry()
                    .get(&entry.key)
                    .map(|p| format!(" (installed v{})", p.version))
                    .unwrap_or_default();
                println!("  {} {}{}", entry.key, versions.join(", "), installed);
            }
            Ok(())
        }
        Commands::UpdateAll => {
            manager.load().await?;
            let report = manager.update_all().await?;
            if report.is_empty() {
                println!("All add-ons are up to date.");
            }
            for (id, cause) in &report.failed {
                println!("Failed to update {}: {}", id, cause);
            }
            Ok(())
        }
        Commands::Resync => {
            manager.load().await?;
            let baseline = &manager.config().baseline;
            match manager.registry().get(&baseline.id) {
                Some(package) if !package.outdated && package.is_usable() => {
                    println!("Baseline add-on {} v{} is current", package.id, package.version);
                }
                _ => println!("Baseline add-on {} is unavailable", baseline.id),
            }
            Ok(())
        }
        Commands::Missing { required } => {
            let required = required
                .iter()
                .map(|spec| parse_requirement(spec))
                .collect::<Result<BTreeMap<_, _>>>()?;
            manager.load().await?;

            let missing = manager.find_missing(&required);
            if missing.is_empty() {
                println!("All required add-ons are installed.");
            } else {
                println!("Missing add-ons:");
                for id in &missing {
                    println!("  {}", id);
                }
            }
            Ok(())
        }
        Commands::History => {
            let changesets = manager.history()?;
            if changesets.is_empty() {
                println!("No changeset history.");
                return Ok(());
            }

            println!("Changeset history:");
            for changeset in &changesets {
                let timestamp = changeset
                    .applied_at
                    .as_ref()
                    .or(changeset.created_at.as_ref())
                    .map(|s| display_timestamp(s))
                    .unwrap_or_else(|| "pending".to_string());

                println!(
                    "  [{}] {} - {} ({})",
                    changeset.id.unwrap_or_default(),
                    timestamp,
                    changeset.description,
                    changeset.status.as_str()
                );
            }
            println!("\nTotal: {} changeset(s)", changesets.len());
            Ok(())
        }
        Commands::AddPath { path } => {
            let path = std::fs::canonicalize(&path)
                .with_context(|| format!("Cannot resolve {}", path.display()))?;
            manager.add_user_path(&path)?;
            println!("Added add-on path: {}", path.display());
            Ok(())
        }
        Commands::RemovePath { path } => {
            if manager.remove_user_path(&path)? {
                println!("Removed add-on path: {}", path.display());
            } else {
                println!("Path was not registered: {}", path.display());
            }
            Ok(())
        }
        Commands::Channel { channel } => {
            match channel {
                Some(name) => {
                    let channel = Channel::parse(&name);
                    manager.set_channel(channel)?;
                    println!("Update channel set to {}", channel);
                }
                None => println!("Update channel: {}", manager.channel()?),
            }
            Ok(())
        }
        Commands::CheckUpdate => {
            match manager.check_for_update().await? {
                Some(release) => {
                    println!("Update available: {}", release.tag);
                    for (platform, url) in [
                        ("Windows", &release.assets.exe),
                        ("macOS", &release.assets.dmg),
                        ("Linux", &release.assets.app_image),
                    ] {
                        if let Some(url) = url {
                            println!("  {}: {}", platform, url);
                        }
                    }
                }
                None => println!("No update available."),
            }
            Ok(())
        }
    }
}
