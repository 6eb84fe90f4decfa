//! CLI & process bootstrap (C9): a single long-running daemon with two
//! diagnostic subcommands. Constructs every adapter, the orchestrator, the
//! notification broker, and the dashboard server, then runs until a stop
//! signal or fatal error.

mod adapters_registry;
mod dashboard;
mod notifier;
mod orchestrator;
mod realtime;
mod state;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use common::adapters::StatusFilter;
use common::{Config, EvaluatorConfig, ManualMapping, Opportunity};
use tracing_subscriber::EnvFilter;

use adapters_registry::build_adapters;
use dashboard::DashboardState;
use notifier::NotificationBroker;
use orchestrator::Orchestrator;
use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "arb-scanner")]
#[command(about = "Cross-venue prediction-market arbitrage scanner")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml", global = true)]
    config: String,

    /// Override the RUST_LOG-style filter.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override `dashboard.port` from the config file.
    #[arg(long, global = true)]
    dashboard_port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the long-lived daemon: orchestrator, realtime workers, dashboard. Default.
    Serve,
    /// Perform exactly one scan cycle, print the opportunities, exit.
    ScanOnce,
    /// Attempt one `list_markets` call against every configured venue; report reachability.
    Probe,
}

fn init_logging(override_filter: Option<&str>) {
    let filter = match override_filter {
        Some(f) => EnvFilter::new(f),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn load_manual_mappings(path: &str) -> Vec<ManualMapping> {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_yaml::from_str::<common::config::ManualMappingFile>(&raw) {
            Ok(file) => file.mappings,
            Err(e) => {
                tracing::warn!("failed to parse manual mappings at {path}: {e}");
                Vec::new()
            }
        },
        Err(_) => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let mut config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("fatal configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.dashboard_port {
        config.dashboard.port = port;
    }

    let manual_mappings = load_manual_mappings("manual_mappings.yaml");
    let evaluator_config = EvaluatorConfig {
        trading_fee: config.arbitrage.trading_fee,
        min_edge_pct: config.arbitrage.min_arbitrage_threshold,
        derived_quote_penalty_pct: config.arbitrage.derived_quote_penalty_pct,
        max_end_time_gap_days: 30,
    };

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config, manual_mappings, evaluator_config).await,
        Command::ScanOnce => run_scan_once(config, manual_mappings, evaluator_config).await,
        Command::Probe => run_probe(config).await,
    }
}

async fn run_serve(
    config: Config,
    manual_mappings: Vec<ManualMapping>,
    evaluator_config: EvaluatorConfig,
) -> anyhow::Result<()> {
    let app_state = AppState::new(evaluator_config.min_edge_pct);
    let dashboard_state = DashboardState::new(app_state.clone());
    let broker = Arc::new(NotificationBroker::from_config(&config));

    let dashboard_for_cb = dashboard_state.clone();
    let broker_for_cb = broker.clone();
    let state_for_cb = app_state.clone();
    let on_new_opportunity: Arc<dyn Fn(Opportunity) + Send + Sync> = Arc::new(move |opp: Opportunity| {
        let broker = broker_for_cb.clone();
        let state = state_for_cb.clone();
        tokio::spawn(async move {
            let key = opp.key();
            let dispatched = broker.notify(&opp).await;
            if dispatched {
                let now = chrono::Utc::now();
                let _guard = state.opportunities_merge_lock.lock().unwrap();
                let mut opportunities = (*state.opportunities.load_full()).clone();
                if let Some(stored) = opportunities.get_mut(&key) {
                    stored.last_notified_at = Some(now);
                    state.opportunities.store(Arc::new(opportunities));
                }
            }
        });
        dashboard_for_cb.notify_state_changed();
    });

    let adapters = build_adapters(&config);
    let orchestrator = Arc::new(Orchestrator {
        state: app_state.clone(),
        adapters: adapters.clone(),
        manual_mappings,
        evaluator_config,
        config: config.clone(),
        on_new_opportunity: on_new_opportunity.clone(),
        dashboard: Some(dashboard_state.clone()),
    });

    for handle in &adapters {
        if handle.adapter.supports_realtime() {
            let worker = realtime::RealtimeWorker {
                adapter: handle.clone(),
                state: app_state.clone(),
                evaluator_config,
                on_new_opportunity: on_new_opportunity.clone(),
            };
            tokio::spawn(worker.run());
        }
    }

    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await });
    }

    let dashboard_host = config.dashboard.host.clone();
    let dashboard_port = config.dashboard.port;
    let dashboard_task = tokio::spawn(async move {
        if let Err(e) = dashboard::serve(&dashboard_host, dashboard_port, dashboard_state).await {
            tracing::error!("dashboard server exited: {e}");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            dashboard_task.abort();
        }
        _ = dashboard_task => {
            tracing::warn!("dashboard server task ended unexpectedly");
        }
    }

    Ok(())
}

async fn run_scan_once(
    config: Config,
    manual_mappings: Vec<ManualMapping>,
    evaluator_config: EvaluatorConfig,
) -> anyhow::Result<()> {
    let app_state = AppState::new(evaluator_config.min_edge_pct);
    let adapters = build_adapters(&config);
    let orchestrator = Orchestrator {
        state: app_state.clone(),
        adapters,
        manual_mappings,
        evaluator_config,
        config,
        on_new_opportunity: Arc::new(|_| {}),
        dashboard: None,
    };

    orchestrator.scan_once().await?;

    for opp in app_state.top_opportunities(usize::MAX) {
        println!(
            "{} / {} vs {} / {} -- {:?} edge={:.2}% combined={:.3} confidence={:.2}",
            opp.market_a.venue,
            opp.market_a.title,
            opp.market_b.venue,
            opp.market_b.title,
            opp.direction,
            opp.edge_pct,
            opp.combined_price,
            opp.confidence,
        );
    }
    Ok(())
}

async fn run_probe(config: Config) -> anyhow::Result<()> {
    let adapters = build_adapters(&config);
    let mut any_reachable = false;

    for handle in &adapters {
        let venue = handle.adapter.venue();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            handle.adapter.list_markets(StatusFilter::Open),
        )
        .await;

        match result {
            Ok(Ok(markets)) => {
                println!("{venue}: OK ({} markets)", markets.len());
                any_reachable = true;
            }
            Ok(Err(common::AdapterError::AuthenticationFailed { .. })) => {
                println!("{venue}: AUTH FAILED");
            }
            Ok(Err(e)) => {
                println!("{venue}: ERROR ({e})");
            }
            Err(_) => {
                println!("{venue}: TIMEOUT");
            }
        }
    }

    if any_reachable {
        Ok(())
    } else {
        std::process::exit(2);
    }
}
