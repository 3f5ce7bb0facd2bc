//! tablegridd: the TableGrid operator tool.
//!
//! Opens the embedded document store named in `tablegrid.toml` and runs
//! administrative commands against the membership and reminder tables:
//! - provisioning (`init`)
//! - membership and gateway listings
//! - defunct-silo cleanup
//! - reminder listings by grain or ring range
//!
//! # Usage
//!
//! ```text
//! tablegridd init-config --cluster-id prod --service-id billing > tablegrid.toml
//! tablegridd --config tablegrid.toml init
//! tablegridd --config tablegrid.toml members
//! tablegridd --config tablegrid.toml cleanup --older-than 24h
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use tablegrid_clustering::{GatewayDirectory, MembershipTable};
use tablegrid_core::config::parse_duration;
use tablegrid_core::{GrainId, ReminderEntry, TableGridConfig};
use tablegrid_reminders::{ReminderTable, format_period};
use tablegrid_store::{DocumentStore, RedbDocumentStore};

#[derive(Parser)]
#[command(name = "tablegridd", about = "TableGrid membership and reminder tables")]
struct Cli {
    /// Path to tablegrid.toml.
    #[arg(long, global = true, default_value = "tablegrid.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a default configuration.
    InitConfig {
        #[arg(long)]
        cluster_id: String,

        #[arg(long)]
        service_id: String,
    },

    #[command(flatten)]
    Table(TableCommand),
}

/// Commands that run against the configured store.
#[derive(Subcommand)]
enum TableCommand {
    /// Provision both tables and the cluster version document.
    Init,

    /// List every silo row and the table version.
    Members,

    /// List client gateways.
    Gateways,

    /// Delete dead silo rows whose last heartbeat is older than the given age.
    Cleanup {
        /// Age such as "30m", "24h".
        #[arg(long, default_value = "24h")]
        older_than: String,
    },

    /// List reminders: all, for one grain, or for a ring range (begin, end].
    Reminders {
        #[arg(long, conflicts_with_all = ["begin", "end"])]
        grain: Option<String>,

        #[arg(long, requires = "end")]
        begin: Option<u32>,

        #[arg(long, requires = "begin")]
        end: Option<u32>,
    },

    /// Delete every membership row and the version document of the cluster.
    Reset {
        /// Also delete every reminder of the service.
        #[arg(long)]
        reminders: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tablegrid=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let command = match cli.command {
        Command::InitConfig {
            cluster_id,
            service_id,
        } => {
            let config = TableGridConfig::scaffold(&cluster_id, &service_id);
            print!("{}", config.to_toml_string()?);
            return Ok(());
        }
        Command::Table(command) => command,
    };

    let config = TableGridConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let tables = Tables::open(&config)?;

    match command {
        TableCommand::Init => run_init(&tables).await,
        TableCommand::Members => run_members(&tables).await,
        TableCommand::Gateways => run_gateways(&tables).await,
        TableCommand::Cleanup { older_than } => run_cleanup(&tables, &older_than).await,
        TableCommand::Reminders { grain, begin, end } => run_reminders(&tables, grain, begin.zip(end)).await,
        TableCommand::Reset { reminders } => run_reset(&tables, reminders).await,
    }
}

/// The protocol tables over one shared store.
struct Tables {
    membership: MembershipTable,
    gateways: GatewayDirectory,
    reminders: ReminderTable,
}

impl Tables {
    fn open(config: &TableGridConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn DocumentStore> = match &config.store.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let store = RedbDocumentStore::open(path)
                    .with_context(|| format!("opening store {}", path.display()))?;
                info!(path = ?path, "document store opened");
                Arc::new(store)
            }
            None => {
                warn!("no store.path configured; using an in-memory store that is discarded on exit");
                Arc::new(RedbDocumentStore::open_in_memory()?)
            }
        };

        let cluster = &config.cluster;
        Ok(Self {
            membership: MembershipTable::new(store.clone(), &cluster.cluster_id, config.membership.clone()),
            gateways: GatewayDirectory::new(store.clone(), &cluster.cluster_id, &config.membership)?,
            reminders: ReminderTable::new(store, &cluster.service_id, config.reminders.clone()),
        })
    }
}

async fn run_init(tables: &Tables) -> anyhow::Result<()> {
    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling initialization");
            let _ = shutdown_tx.send(true);
        }
    });

    tables.membership.initialize_with_shutdown(true, shutdown_rx).await?;
    tables.reminders.initialize().await?;
    info!(cluster_id = %tables.membership.cluster_id(), service_id = %tables.reminders.service_id(), "tables ready");
    Ok(())
}

async fn run_members(tables: &Tables) -> anyhow::Result<()> {
    let data = tables.membership.read_all().await?;
    let members: Vec<_> = data
        .members
        .iter()
        .map(|(entry, etag)| {
            json!({
                "silo": entry.silo_address.to_parsable_string(),
                "name": entry.silo_name,
                "host": entry.host_name,
                "status": entry.status.as_str(),
                "proxy_port": entry.proxy_port,
                "start_time": entry.start_time,
                "i_am_alive_time": entry.i_am_alive_time,
                "suspicions": entry.suspect_times.len(),
                "etag": etag,
            })
        })
        .collect();
    let report = json!({
        "version": data.version.as_ref().map(|v| v.version),
        "members": members,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_gateways(tables: &Tables) -> anyhow::Result<()> {
    for uri in tables.gateways.get_gateway_uris().await? {
        println!("{uri}");
    }
    info!(max_staleness = ?tables.gateways.max_staleness(), "gateway list refresh period");
    Ok(())
}

async fn run_cleanup(tables: &Tables, older_than: &str) -> anyhow::Result<()> {
    let Some(age) = parse_duration(older_than) else {
        bail!("--older-than {older_than:?} is not a duration");
    };
    let before = Utc::now() - chrono::Duration::from_std(age)?;
    let deleted = tables.membership.cleanup_defunct_silo_entries(before).await?;
    println!("deleted {deleted} defunct silo entries");
    Ok(())
}

async fn run_reminders(
    tables: &Tables,
    grain: Option<String>,
    range: Option<(u32, u32)>,
) -> anyhow::Result<()> {
    let data = match (grain, range) {
        (Some(grain), _) => tables.reminders.read_rows_for_grain(&GrainId::new(grain)).await?,
        (None, Some((begin, end))) => tables.reminders.read_rows_in_range(begin, end).await?,
        (None, None) => tables.reminders.read_all_rows().await?,
    };
    let rows: Vec<_> = data.iter().map(reminder_json).collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn reminder_json(entry: &ReminderEntry) -> serde_json::Value {
    json!({
        "grain": entry.grain_id.key(),
        "hash": format!("{:08X}", entry.grain_id.uniform_hash()),
        "name": entry.reminder_name,
        "start_at": entry.start_at,
        "period": format_period(entry.period),
        "etag": entry.etag,
    })
}

async fn run_reset(tables: &Tables, reminders: bool) -> anyhow::Result<()> {
    let cluster_id = tables.membership.cluster_id().to_string();
    let deleted = tables.membership.delete_membership_table_entries(&cluster_id).await?;
    println!("deleted {deleted} membership documents for cluster {cluster_id}");
    if reminders {
        let cleared = tables.reminders.test_only_clear_table().await?;
        println!("deleted {cleared} reminders for service {}", tables.reminders.service_id());
    }
    Ok(())
}
