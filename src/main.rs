//! mpd-stats - Main entry point
//!
//! Runs the statistics server and MPD watcher, imports the MPD database and
//! handles configuration and database maintenance.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::FutureExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mpd_stats::module::{ModuleRegistry, StatsModule};
use mpd_stats::mpd::{MpdClient, Watcher};
use mpd_stats::protocol::Dispatcher;
use mpd_stats::server::Server;
use mpd_stats::{Config, Database};

#[derive(Parser)]
#[command(name = "mpd-stats")]
#[command(author, version, about = "Listening statistics daemon for MPD")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stats server and watch MPD (runs in foreground)
    Serve,

    /// Add every song in the MPD database without counting plays
    Import {
        /// Only import below these MPD paths
        paths: Vec<String>,
    },

    /// Show or edit configuration
    Config {
        /// Print current configuration
        #[arg(long)]
        show: bool,

        /// Create default configuration file
        #[arg(long)]
        init: bool,
    },

    /// Database operations
    Db {
        /// Show database path, schema version and row counts
        #[arg(long)]
        info: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load and validate configuration
    let config = if let Some(ref path) = cli.config {
        Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        Config::load()?
    };
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(config.general.log_level.to_lowercase())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match cli.command {
            Some(Commands::Serve) | None => run_server(config).await,

            Some(Commands::Import { paths }) => run_import(config, paths).await,

            Some(Commands::Config { show, init }) => {
                if init {
                    let default_config = Config::default();
                    default_config.save()?;
                    println!(
                        "Created default configuration at {}",
                        Config::config_path()?.display()
                    );
                } else if show {
                    let contents = toml::to_string_pretty(&config)?;
                    println!("{contents}");
                } else {
                    println!("Configuration path: {}", Config::config_path()?.display());
                }
                Ok(())
            }

            Some(Commands::Db { info }) => {
                let db = open_database(&config).await?;
                if info {
                    let info = db.info().await?;
                    println!("Database path: {}", config.database_path()?.display());
                    println!("Schema version: {}", info.version);
                    for (kind, rows) in info.rows {
                        println!("{:>8}: {rows}", kind.table());
                    }
                } else {
                    println!("Database path: {}", config.database_path()?.display());
                }
                Ok(())
            }
        }
    })
}

async fn open_database(config: &Config) -> anyhow::Result<Database> {
    let data_dir = config.data_dir()?;
    Database::new(&config.database, &data_dir)
        .await
        .with_context(|| format!("failed to open {}", config.database_path().unwrap_or_default().display()))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let db = open_database(&config).await?;

    let dispatcher = Dispatcher::new(db.clone(), config.server.passwords.clone());
    let server = Server::bind(&config.server, dispatcher).await?;

    let mut modules = ModuleRegistry::new();
    modules.register(Box::new(StatsModule::new(db)));
    let mut watcher = Watcher::new(
        config.mpd.clone(),
        config.mpd_reconnect_interval()?,
        modules,
    );

    let shutdown = shutdown_signal().boxed().shared();
    let watch = async {
        tokio::select! {
            () = watcher.run() => {}
            () = shutdown.clone() => {}
        }
        watcher.shutdown().await;
    };
    tokio::join!(server.run(shutdown.clone()), watch);

    info!("Stopped");
    Ok(())
}

async fn run_import(config: Config, paths: Vec<String>) -> anyhow::Result<()> {
    let db = open_database(&config).await?;
    let mut mpd = MpdClient::connect(&config.mpd)
        .await
        .with_context(|| format!("failed to connect to MPD at {}:{}", config.mpd.host, config.mpd.port))?;

    let mut songs = Vec::new();
    if paths.is_empty() {
        songs = mpd.list_all_info(None).await?;
    } else {
        for path in &paths {
            songs.extend(mpd.list_all_info(Some(path)).await?);
        }
    }
    info!("Fetched {} songs from MPD", songs.len());

    let summary = db.import(&songs).await?;
    println!(
        "Imported {} songs ({} skipped without artist or title)",
        summary.processed, summary.skipped
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Received shutdown signal");
}
