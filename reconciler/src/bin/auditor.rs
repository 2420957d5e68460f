//! Ledger auditor binary

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use chain_source::{EpochGate, JsonRpcClient, OnChainSource};
use clap::{Parser, Subcommand};
use ledger_core::{Address, Asset};
use reconciler::{
    AuditMode, AuditorConfig, CheckpointReconciler, DualSourceMonitor, DualSourceReconciler,
    EpochSpec, EscalationSink, LogFormat, Metrics, TracingSink,
};
use replay::{AccountResolver, MySqlLedgerStore, ReplayAdapter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ledger-auditor", version, about = "Audits exchange ledgers against custody contracts")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "AUDITOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Continuous conservation audit of every configured asset
    Conservation {
        /// First epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true, default_value = "-10")]
        epoch: EpochSpec,

        /// Epochs per baseline round (defaults to the configured value)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// One full conservation audit of an asset
    Baseline {
        /// Asset name
        #[arg(long)]
        asset: String,

        /// Epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true, default_value = "-10")]
        epoch: EpochSpec,

        /// Print every holder's balance
        #[arg(long)]
        details: bool,
    },

    /// Decode the custody events of one epoch
    Events {
        /// Epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true, default_value = "-10")]
        epoch: EpochSpec,

        /// Print every changed account
        #[arg(long)]
        details: bool,
    },

    /// Reconcile one window of on-chain and off-chain changes
    Reconcile {
        /// First epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true)]
        from: EpochSpec,

        /// Last epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true)]
        to: EpochSpec,

        /// Diff every holder instead of only event-touched ones
        #[arg(long)]
        full: bool,
    },

    /// Compare every holder's off-chain balance with the chain
    Initial {
        /// Epoch (`N`, or `-N` behind the confirmed epoch)
        #[arg(long, allow_hyphen_values = true, default_value = "-0")]
        epoch: EpochSpec,

        /// Also write the report to this file (JSON)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Continuous dual-source reconciliation
    Monitor {
        /// Run the initial balance audit first and stop on any mismatch
        #[arg(long)]
        initial: bool,
    },
}

/// Shared collaborators built from configuration
struct Runtime {
    config: AuditorConfig,
    source: OnChainSource,
    gate: EpochGate,
    sink: Arc<dyn EscalationSink>,
    metrics: Arc<Metrics>,
}

impl Runtime {
    fn new(config: AuditorConfig) -> anyhow::Result<Self> {
        let client = Arc::new(JsonRpcClient::new(&config.chain)?);
        let source = OnChainSource::new(client.clone(), config.core.executor());
        let gate = EpochGate::from_config(client, &config.chain);
        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);
        let sink = Arc::new(TracingSink::new(config.dual_source.halt_window));
        Ok(Self {
            config,
            source,
            gate,
            sink,
            metrics,
        })
    }

    async fn resolve(&self, spec: EpochSpec) -> u64 {
        match spec {
            EpochSpec::Absolute(epoch) => epoch,
            relative => relative.resolve(self.gate.confirmed_epoch().await),
        }
    }

    async fn dual_source(&self) -> anyhow::Result<DualSourceReconciler> {
        let operator = self.config.dual_source.operator()?.clone();
        let store = Arc::new(MySqlLedgerStore::connect(&self.config.store).await?);
        let resolver = Arc::new(AccountResolver::new(store, self.config.store.cache_limit));
        let replay = ReplayAdapter::new(
            resolver,
            self.source.client().clone(),
            self.config.core.executor(),
            operator,
            self.config.store.page_size,
        )
        .with_decimals(self.config.decimals());

        Ok(DualSourceReconciler::new(
            self.source.clone(),
            replay,
            self.sink.clone(),
            self.metrics.clone(),
            self.config.dual_source.pausable,
        ))
    }
}

#[derive(Serialize)]
struct BaselineSummary<'a> {
    asset: &'a str,
    epoch: u64,
    total_supply: String,
    accounts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    balances: Option<BTreeMap<String, String>>,
}

#[derive(Serialize)]
struct EventSummary {
    asset: String,
    increased: BTreeMap<String, String>,
    decreased: BTreeMap<String, String>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> Result<String, (StatusCode, String)> {
    metrics
        .export()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)))
}

async fn serve_metrics(addr: SocketAddr, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
    info!(%addr, "Serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Flip the shutdown flag on Ctrl-C
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ledger_strings<'a>(entries: impl Iterator<Item = (&'a Address, &'a ledger_core::BigInt)>) -> BTreeMap<String, String> {
    entries
        .map(|(account, amount)| (account.to_string(), amount.to_string()))
        .collect()
}

async fn run_conservation(rt: Runtime, epoch: EpochSpec, interval: Option<u64>) -> anyhow::Result<()> {
    let interval = interval.unwrap_or(rt.config.conservation.interval_epochs);
    let since = rt.resolve(epoch).await;
    let reconciler = CheckpointReconciler::from_config(
        &rt.config,
        rt.source.clone(),
        rt.gate.clone(),
        rt.sink.clone(),
        rt.metrics.clone(),
    )?;

    let handles = reconciler.start_continuous(since, interval, shutdown_on_ctrl_c())?;
    for handle in handles {
        handle.await.context("conservation task panicked")?;
    }
    Ok(())
}

async fn run_baseline(rt: Runtime, asset: &str, epoch: EpochSpec, details: bool) -> anyhow::Result<()> {
    rt.config.asset(asset)?;
    let epoch = rt.resolve(epoch).await;
    let mut reconciler = CheckpointReconciler::from_config(
        &rt.config,
        rt.source.clone(),
        rt.gate.clone(),
        rt.sink.clone(),
        rt.metrics.clone(),
    )?;

    let baseline = reconciler.establish_baseline(asset, epoch).await?;
    print_json(&BaselineSummary {
        asset,
        epoch: baseline.epoch,
        total_supply: baseline.total_supply.to_string(),
        accounts: baseline.ledger.len(),
        balances: details.then(|| ledger_strings(baseline.ledger.iter())),
    })
}

async fn run_events(rt: Runtime, epoch: EpochSpec, details: bool) -> anyhow::Result<()> {
    let epoch = rt.resolve(epoch).await;
    let contracts: Vec<Address> = rt
        .config
        .assets
        .iter()
        .map(|a| a.custody_contract.clone())
        .collect();
    let window = rt
        .source
        .event_window(epoch, epoch, &contracts, &rt.config.conservation.privileged_set())
        .await?;

    info!(
        epoch,
        logs = window.log_count,
        contracts = window.deltas.len(),
        privileged_withdrawals = window.privileged_withdrawals.len(),
        "Decoded custody events"
    );

    let summaries: Vec<EventSummary> = rt
        .config
        .assets
        .iter()
        .filter_map(|asset: &Asset| {
            let delta = window.deltas.get(&asset.custody_contract)?;
            let (increased, decreased) = if details {
                (
                    ledger_strings(delta.increased.iter()),
                    ledger_strings(delta.decreased.iter()),
                )
            } else {
                (BTreeMap::new(), BTreeMap::new())
            };
            info!(
                asset = %asset.name,
                increased = delta.increased.len(),
                decreased = delta.decreased.len(),
                "Balances changed"
            );
            Some(EventSummary {
                asset: asset.name.clone(),
                increased,
                decreased,
            })
        })
        .collect();
    print_json(&summaries)
}

async fn run_reconcile(rt: Runtime, from: EpochSpec, to: EpochSpec, full: bool) -> anyhow::Result<()> {
    let from = rt.resolve(from).await;
    let to = rt.resolve(to).await;
    let mode = if full { AuditMode::Full } else { AuditMode::Partial };

    let reconciler = rt.dual_source().await?;
    let report = reconciler
        .reconcile_window(&rt.config.assets, from, to, mode)
        .await?;
    print_json(&report)?;
    report.into_result()?;
    Ok(())
}

async fn run_initial(rt: Runtime, epoch: EpochSpec, output: Option<PathBuf>) -> anyhow::Result<()> {
    let epoch = rt.resolve(epoch).await;
    let reconciler = rt.dual_source().await?;
    let report = reconciler.initial_audit(&rt.config.assets, epoch).await?;
    print_json(&report)?;
    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Initial audit report written");
    }
    report.into_result()?;
    Ok(())
}

async fn run_monitor(rt: Runtime, initial: bool) -> anyhow::Result<()> {
    let reconciler = rt.dual_source().await?;
    if initial {
        let epoch = rt.gate.confirmed_epoch().await;
        reconciler
            .initial_audit(&rt.config.assets, epoch)
            .await?
            .into_result()?;
    }
    let monitor = DualSourceMonitor::from_config(&rt.config, reconciler, rt.gate.clone(), rt.sink.clone())?;
    monitor.run(shutdown_on_ctrl_c()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AuditorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(config.log_format);

    info!(assets = config.assets.len(), dialect = ?config.chain.dialect, "Starting ledger auditor");

    let rt = Runtime::new(config)?;
    if let Some(addr) = &rt.config.metrics_listen_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics_listen_addr '{}'", addr))?;
        let metrics = rt.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, metrics).await {
                error!(error = %e, "Metrics endpoint stopped");
            }
        });
    }

    let result = match cli.command {
        Command::Conservation { epoch, interval } => run_conservation(rt, epoch, interval).await,
        Command::Baseline {
            asset,
            epoch,
            details,
        } => run_baseline(rt, &asset, epoch, details).await,
        Command::Events { epoch, details } => run_events(rt, epoch, details).await,
        Command::Reconcile { from, to, full } => run_reconcile(rt, from, to, full).await,
        Command::Initial { epoch, output } => run_initial(rt, epoch, output).await,
        Command::Monitor { initial } => run_monitor(rt, initial).await,
    };

    if let Err(e) = &result {
        error!(error = %e, "Ledger auditor failed");
    }
    result
}
