use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use pgherd_core::{Cluster, ReconcileSession};
use pgherd_kubehub::{KubeStatusClient, MemoryStatusClient, StatusClient};
use pgherd_plugin::{apply_plugin_status, StaticPluginClient};
use pgherd_status::register_phase;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "pgherdctl", version, about = "Record cluster phases and plugin status")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace of the Cluster
    #[arg(long = "ns", global = true, env = "PGHERD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Work against an in-memory store seeded from --from-file instead of the API server
    #[arg(long = "dry-run", global = true, action = ArgAction::SetTrue)]
    dry_run: bool,

    /// Cluster manifest (JSON) used to seed the in-memory store in --dry-run mode
    #[arg(long = "from-file", global = true, requires = "dry_run")]
    from_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a phase (and the readiness condition derived from it)
    Phase {
        cluster: String,
        phase: String,
        reason: String,
    },
    /// Merge plugin status values from a JSON file of {"plugin": "payload"}
    PluginStatus {
        cluster: String,
        #[arg(long = "statuses")]
        statuses: PathBuf,
    },
    /// Record a phase, then merge plugin status, in one session
    Pass {
        cluster: String,
        phase: String,
        reason: String,
        #[arg(long = "statuses")]
        statuses: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env = std::env::var("PGHERD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("PGHERD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid PGHERD_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_statuses(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} as a name -> status map", path.display()))
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn StatusClient>> {
    if !cli.dry_run {
        let client = KubeStatusClient::try_default().await.context("connecting to the API server")?;
        return Ok(Arc::new(client));
    }
    let store = MemoryStatusClient::new();
    if let Some(path) = &cli.from_file {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut cluster: Cluster = serde_json::from_str(&raw).context("parsing Cluster manifest")?;
        if cluster.metadata.namespace.is_none() {
            cluster.metadata.namespace = Some(cli.namespace.clone());
        }
        store.insert(&cluster)?;
    }
    Ok(Arc::new(store))
}

fn session_for(statuses: Option<BTreeMap<String, String>>, cancel: CancellationToken) -> ReconcileSession {
    let plugins = StaticPluginClient::new("pgherdctl").with_statuses(statuses.unwrap_or_default());
    ReconcileSession::with_cancellation(cancel).with_plugin_client(Arc::new(plugins))
}

fn print_cluster(output: Output, cluster: &Cluster) -> Result<()> {
    let Some(status) = &cluster.status else {
        println!("(no status)");
        return Ok(());
    };
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(status)?),
        Output::Human => {
            println!("phase: {} ({})", status.phase, status.phase_reason);
            for c in &status.conditions {
                println!("condition {} = {} • {} • {}", c.type_, c.status, c.reason, c.message);
            }
            for p in &status.plugin_status {
                println!("plugin {} • {}", p.name, if p.status.is_empty() { "-" } else { p.status.as_str() });
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        }
    });

    let store = open_store(&cli).await?;
    let ns = cli.namespace.as_str();

    match &cli.command {
        Commands::Phase { cluster, phase, reason } => {
            info!(cluster = %cluster, ns = %ns, phase = %phase, "phase invoked");
            let session = session_for(None, cancel);
            let mut obj = store.get_cluster(ns, cluster).await?;
            if let Err(e) = register_phase(&session, store.as_ref(), &mut obj, phase, reason).await {
                error!(error = %e, conflict = e.is_conflict(), "register phase failed");
                return Err(e.into());
            }
            print_cluster(cli.output, &obj)?;
        }
        Commands::PluginStatus { cluster, statuses } => {
            info!(cluster = %cluster, ns = %ns, "plugin-status invoked");
            let session = session_for(Some(read_statuses(statuses)?), cancel);
            let mut obj = store.get_cluster(ns, cluster).await?;
            let requeue = apply_plugin_status(&session, store.as_ref(), &mut obj).await?;
            print_cluster(cli.output, &obj)?;
            match requeue {
                Some(d) => println!("requeue after {}s", d.as_secs()),
                None => println!("no plugin status reported"),
            }
        }
        Commands::Pass { cluster, phase, reason, statuses } => {
            info!(cluster = %cluster, ns = %ns, phase = %phase, "pass invoked");
            let statuses = statuses.as_deref().map(read_statuses).transpose()?;
            let session = session_for(statuses, cancel);
            let mut obj = store.get_cluster(ns, cluster).await?;
            register_phase(&session, store.as_ref(), &mut obj, phase, reason).await?;
            let requeue = apply_plugin_status(&session, store.as_ref(), &mut obj).await?;
            print_cluster(cli.output, &obj)?;
            if let Some(d) = requeue {
                println!("requeue after {}s", d.as_secs());
            }
        }
    }
    Ok(())
}
