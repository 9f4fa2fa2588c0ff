//! CRU ESDT Relayer
//!
//! Watches finalized blocks of the Substrate source chain for chainBridge
//! fungible transfers and pays each one out on MultiversX as an ESDT
//! transfer from the custody account.

use std::sync::Arc;
use std::time::Duration;

use esdt_relayer::amount::AmountConverter;
use esdt_relayer::api::{self, AppState};
use esdt_relayer::config::Config;
use esdt_relayer::confirmation::ConfirmationPoller;
use esdt_relayer::coordinator::RelayCoordinator;
use esdt_relayer::db::{self, AttemptStore, PgAttemptStore};
use esdt_relayer::decoder::EventDecoder;
use esdt_relayer::destination_client::GatewayClient;
use esdt_relayer::executor::TransferExecutor;
use esdt_relayer::metrics;
use esdt_relayer::observer::TracingObserver;
use esdt_relayer::signer::CustodySigner;
use esdt_relayer::source_client::SidecarClient;
use esdt_relayer::watcher::SourceChainWatcher;
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Finalized blocks buffered between the watcher and the coordinator
const BLOCK_CHANNEL_CAPACITY: usize = 64;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting CRU ESDT Relayer");

    let config = Config::load()?;
    info!(
        source_api = %config.source.api_url,
        gateway = %config.destination.gateway_url,
        token = %config.destination.token_identifier,
        event = %config.source.event_method,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    info!("Database connected");
    db::run_migrations(&pool).await?;
    info!("Database migrations complete");
    let store: Arc<dyn AttemptStore> = Arc::new(PgAttemptStore::new(pool));

    let signer = CustodySigner::from_hex(
        &config.custody.secret_key,
        &config.destination.address_hrp,
    )
    .wrap_err("Failed to load custody key")?;
    info!(custody = %signer.address(), "Custody account loaded");

    let source = Arc::new(SidecarClient::new(
        &config.source.api_url,
        Duration::from_millis(config.source.request_timeout_ms),
    )?);
    let gateway = Arc::new(GatewayClient::new(
        &config.destination.gateway_url,
        Duration::from_millis(config.destination.request_timeout_ms),
    )?);

    let executor = Arc::new(TransferExecutor::new(
        gateway,
        signer,
        config.destination.token_identifier.clone(),
        config.destination.gas_limit,
    ));
    if let Err(e) = executor.sync().await {
        // Retried lazily on the first transfer
        warn!(error = %e, "Initial custody account sync failed");
    }

    let converter = AmountConverter::new(config.source.decimals, config.destination.decimals)?;
    let decoder = EventDecoder::new(
        config.source.event_method.clone(),
        config.source.transfer_discriminant.clone(),
        config.destination.address_hrp.clone(),
    );
    let retry = config.relay.retry();
    let coordinator = RelayCoordinator::new(
        decoder,
        converter,
        executor,
        store.clone(),
        Arc::new(TracingObserver),
        retry.clone(),
        ConfirmationPoller::new(
            config.relay.confirmation_poll_interval(),
            config.relay.confirmation_timeout(),
        ),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });

    metrics::UP.set(1.0);

    let api_state = AppState::new(store.clone());
    let api_addr = config.api.bind_addr.clone();
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = api::start_server(&api_addr, api_state, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    let cursor = store
        .last_processed_block()
        .await
        .wrap_err("Failed to read block cursor")?;
    info!(last_processed_block = ?cursor, "Starting source chain watcher");

    let (block_tx, block_rx) = tokio::sync::mpsc::channel(BLOCK_CHANNEL_CAPACITY);
    let watcher = SourceChainWatcher::new(
        source,
        Duration::from_millis(config.source.poll_interval_ms),
        retry,
        config.source.max_backfill_blocks,
    )
    .resume_after(cursor);

    let watcher_shutdown = shutdown.clone();
    let watcher_handle = tokio::spawn(async move {
        let result = watcher.run(block_tx, watcher_shutdown.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "Source chain watcher stopped");
            watcher_shutdown.cancel();
        }
        result
    });

    let relay_result = coordinator.run(block_rx, shutdown.clone()).await;
    shutdown.cancel();
    let watcher_result = watcher_handle.await.wrap_err("Watcher task panicked")?;

    metrics::UP.set(0.0);
    relay_result.wrap_err("Relay coordinator failed")?;
    watcher_result.wrap_err("Source chain unavailable")?;

    info!("CRU ESDT Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output. LOG_FORMAT=json
/// switches to one JSON object per line.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,esdt_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
