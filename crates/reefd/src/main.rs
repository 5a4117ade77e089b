//! `reefd`: the reef authority daemon.
//!
//! Runs the coherence authority for a grid of nodes, listening for node
//! connections over TCP.
//!
//! # Usage
//!
//! ```text
//! reefd start                               # start the authority
//! reefd start -c reef.toml                  # start with a config file
//! reefd start -d ./backup --backup-only     # run as a backup authority
//! reefd dump                                # print every stored line
//! reefd max-id                              # print the highest line id
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reef_cluster::{ClusterState, watch_membership};
use reef_home::{AuthorityMonitor, CountingMonitor, HomeNode, NoopMonitor};
use reef_net::{PeerEvent, TcpTransport};
use reef_store::{FjallStore, LineStore, MemoryStore};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "reefd", version, about = "reef coherence authority daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the authority.
    Start {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Override the node listen address (e.g. "127.0.0.1:4830").
        #[arg(short = 'l', long)]
        listen_addr: Option<String>,

        /// Keep lines in memory only (no disk persistence).
        #[arg(short, long)]
        memory: bool,

        /// Start as a backup authority; the allocator is not seeded.
        #[arg(long)]
        backup_only: bool,
    },

    /// Print every stored line.
    Dump {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the highest stored line id.
    MaxId {
        /// Override data directory.
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Start {
            data_dir,
            listen_addr,
            memory,
            backup_only,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            if let Some(addr) = listen_addr {
                config.node.listen_addr = addr;
            }
            if memory {
                config.store.backend = "memory".to_string();
            }
            if backup_only {
                config.node.primary = false;
            }
            cmd_start(config).await
        }
        Commands::Dump { data_dir } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            cmd_dump(&config)
        }
        Commands::MaxId { data_dir } => {
            if let Some(dir) = data_dir {
                config.node.data_dir = dir;
            }
            cmd_max_id(&config)
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(config: &CliConfig) -> Result<Arc<dyn LineStore>> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "fjall" => {
            std::fs::create_dir_all(&config.node.data_dir)
                .context("failed to create data directory")?;
            let path = config.store_path();
            let store = FjallStore::open(&path)
                .with_context(|| format!("failed to open line store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        other => bail!("unknown store backend {other:?} (expected \"fjall\" or \"memory\")"),
    }
}

/// Open the existing on-disk store for the offline commands.
fn open_existing_store(config: &CliConfig) -> Result<FjallStore> {
    let path = config.store_path();
    if !path.exists() {
        bail!("no line store at {}", path.display());
    }
    FjallStore::open(&path)
        .with_context(|| format!("cannot open line store at {}. Is reefd running?", path.display()))
}

// -----------------------------------------------------------------------
// reefd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    info!("starting reefd");
    info!(
        data_dir = %config.node.data_dir.display(),
        listen_addr = %config.node.listen_addr,
        backend = %config.store.backend,
        primary = config.node.primary,
        cas_retry_limit = ?config.home.cas_retry_limit,
        "authority configuration"
    );

    let store = open_store(&config)?;
    let cluster = ClusterState::new(config.node.primary);
    let transport = TcpTransport::bind(config.node.listen_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.node.listen_addr))?;

    let counters = config.monitor.enabled.then(|| Arc::new(CountingMonitor::new()));
    let monitor: Arc<dyn AuthorityMonitor> = match &counters {
        Some(c) => c.clone(),
        None => Arc::new(NoopMonitor),
    };

    let home = HomeNode::new(
        config.home_config(),
        store,
        transport.clone(),
        cluster.clone(),
        monitor,
    );
    home.start(config.node.primary)
        .context("failed to start authority")?;
    home.attach();

    // Membership follows live node connections.
    let watcher = watch_membership(&cluster, home.clone());
    let membership = tokio::spawn(track_connections(transport.clone(), cluster.clone()));

    info!(addr = %transport.local_addr(), "authority ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    membership.abort();
    transport.shutdown().await;
    watcher.abort();
    home.shutdown().context("failed to close line store")?;

    if let Some(c) = counters {
        let s = c.snapshot();
        info!(
            owner_writes = s.owner_writes,
            objects_served = s.objects_served,
            owners_served = s.owners_served,
            transactions = s.transactions,
            transaction_entries = s.transaction_entries,
            "authority totals"
        );
    }
    Ok(())
}

/// Mirror node connections into cluster membership.
async fn track_connections(transport: Arc<TcpTransport>, cluster: Arc<ClusterState>) {
    let mut events = transport.subscribe_peers();
    loop {
        let result = match events.recv().await {
            Ok(PeerEvent::Connected(node)) => {
                if cluster.is_member(node).await {
                    continue;
                }
                cluster.add_member(node).await
            }
            Ok(PeerEvent::Disconnected(node)) => cluster.remove_member(node).await,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "connection tracker lagged, membership may be stale");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if let Err(e) = result {
            warn!(%e, "membership update rejected");
        }
    }
}

// -----------------------------------------------------------------------
// reefd dump / max-id
// -----------------------------------------------------------------------

fn cmd_dump(config: &CliConfig) -> Result<()> {
    let store = open_existing_store(config)?;
    let lines = store.dump().context("failed to read line store")?;

    println!("{:<20} {:<12} {:>10} {:>10}", "LINE", "OWNER", "VERSION", "BYTES");
    for (line, entry) in &lines {
        println!(
            "{:<20} {:<12} {:>10} {:>10}",
            line.to_string(),
            entry.owner.to_string(),
            entry.version,
            entry.data.len()
        );
    }
    println!("{} line(s)", lines.len());

    store.close().context("failed to close line store")?;
    Ok(())
}

fn cmd_max_id(config: &CliConfig) -> Result<()> {
    let store = open_existing_store(config)?;
    match store.max_id().context("failed to read line store")? {
        Some(id) => println!("{id}"),
        None => println!("(empty)"),
    }
    store.close().context("failed to close line store")?;
    Ok(())
}
