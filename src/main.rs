use std::sync::Arc;

use alloy::primitives::U256;
use eyre::WrapErr;
use tokio::sync::watch;

use lock_relayer::attestor::Attestor;
use lock_relayer::chain::{ChainClient, EvmChainClient};
use lock_relayer::checkpoint::CheckpointStore;
use lock_relayer::config::{ChainConfig, Config, LogFormat};
use lock_relayer::health::HealthMonitor;
use lock_relayer::metrics::Metrics;
use lock_relayer::processor::{EventProcessor, LockSource};
use lock_relayer::scheduler::{BackoffConfig, ChainPoller, PollerSettings, RelayScheduler};
use lock_relayer::server;
use lock_relayer::types::{ChainSide, Direction, GasParams};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // Load configuration (also reads .env, which may set RUST_LOG / LOG_FORMAT)
    let config = Config::load()?;

    init_logging(config.log_format);

    tracing::info!("Starting CL8Y Lock Relayer");
    tracing::info!(
        chain_a = %config.chain_a.name,
        chain_a_id = config.chain_a.chain_id,
        chain_b = %config.chain_b.name,
        chain_b_id = config.chain_b.chain_id,
        checkpoint = %config.checkpoint.path.display(),
        "Configuration loaded"
    );

    // A bad credential must stop us before any polling starts
    let attestor = Arc::new(
        Attestor::from_private_key(&config.relayer_private_key)
            .wrap_err("Relayer credential rejected")?,
    );
    tracing::info!(relayer = %attestor.address(), "Relayer credential loaded");

    let chain_a: Arc<dyn ChainClient> = Arc::new(
        EvmChainClient::connect(ChainSide::A, &config.chain_a, attestor.signer()).await?,
    );
    let chain_b: Arc<dyn ChainClient> = Arc::new(
        EvmChainClient::connect(ChainSide::B, &config.chain_b, attestor.signer()).await?,
    );

    let store = Arc::new(
        CheckpointStore::open(&config.checkpoint.path, config.checkpoint.retention())
            .wrap_err("Failed to open checkpoint")?,
    );
    let metrics = Arc::new(Metrics::new());

    // Locked on A -> relayLock on B
    let lock_processor = EventProcessor::new(
        Direction::Lock,
        chain_b.clone(),
        store.clone(),
        metrics.clone(),
    )
    .with_attestor(
        attestor.clone(),
        LockSource {
            bridge: config.chain_a.bridge()?,
            token: config.chain_a.token()?,
        },
    )
    .with_gas(gas_params(&config.chain_b))
    .with_failure_alert_threshold(config.failure_alert_threshold);

    // Unlocked on B -> relayUnlock on A
    let unlock_processor = EventProcessor::new(
        Direction::Unlock,
        chain_a.clone(),
        store.clone(),
        metrics.clone(),
    )
    .with_gas(gas_params(&config.chain_a))
    .with_failure_alert_threshold(config.failure_alert_threshold);

    let lock_poller = ChainPoller::new(
        chain_a.clone(),
        lock_processor,
        store.clone(),
        metrics.clone(),
        poller_settings(&config.chain_a),
    )?;
    let unlock_poller = ChainPoller::new(
        chain_b.clone(),
        unlock_processor,
        store.clone(),
        metrics.clone(),
        poller_settings(&config.chain_b),
    )?;

    let health = HealthMonitor::new(
        store.clone(),
        metrics.clone(),
        config.health.max_lag_blocks,
        config.health.interval(),
    )
    .with_chain(chain_a.clone(), U256::from(config.chain_a.min_balance_wei))
    .with_chain(chain_b.clone(), U256::from(config.chain_b.min_balance_wei));

    // Start status server
    let server_store = store.clone();
    let server_metrics = metrics.clone();
    let server_health = health.latest_report();
    let bind_address = config.status_bind_address.clone();
    let port = config.status_port;
    tokio::spawn(async move {
        if let Err(e) = server::start_server(
            &bind_address,
            port,
            server_store,
            server_metrics,
            server_health,
        )
        .await
        {
            tracing::error!(error = %e, "Status server error");
        }
    });

    // Setup signal handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let scheduler = RelayScheduler::new(store, metrics, config.checkpoint.interval())
        .with_poller(lock_poller)
        .with_poller(unlock_poller)
        .with_health_monitor(health);

    tracing::info!("Relay tasks initialized, starting processing");
    scheduler.run(shutdown_rx).await?;

    tracing::info!("CL8Y Lock Relayer stopped");
    Ok(())
}

fn gas_params(chain: &ChainConfig) -> GasParams {
    GasParams {
        gas_limit: Some(chain.gas_limit),
        ..GasParams::default()
    }
}

fn poller_settings(chain: &ChainConfig) -> PollerSettings {
    PollerSettings {
        poll_interval: chain.poll_interval(),
        max_block_range: chain.max_block_range,
        start_block: chain.start_block,
        backoff: BackoffConfig::default(),
    }
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lock_relayer=debug"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
