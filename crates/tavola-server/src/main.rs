//! Tavola - Email delivery service entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tavola_api::AppState;
use tavola_common::config::{Config, LoggingConfig};
use tavola_core::{ConfiguredTransportFactory, EmailService, Outbox, ServiceOptions, Stores};
use tavola_storage::DatabasePool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Tavola email delivery service...");

    // Initialize storage
    let (stores, db_pool) = match config.database.url {
        Some(_) => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            (Stores::database(db_pool.clone()), Some(db_pool))
        }
        None => {
            warn!("No database configured, using in-process stores; state is lost on restart");
            if config.email.provider != "log" {
                warn!(
                    provider = %config.email.provider,
                    "In-process stores start without templates or settings"
                );
            }
            (Stores::in_memory(), None)
        }
    };

    // Initialize delivery service
    let service = Arc::new(EmailService::new(
        stores,
        Arc::new(ConfiguredTransportFactory::new(config.email.clone())),
        ServiceOptions::from_config(&config),
    ));
    info!(provider = %config.email.provider, "Email service initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start outbox worker
    let (outbox, worker) = Outbox::new(service.clone(), &config.outbox);
    let outbox_handle = tokio::spawn(worker.run(wait_for_shutdown(shutdown_rx.clone())));

    // Start sweep loop if enabled
    let sweep_handle = if config.sweep.interval_secs > 0 || config.sweep.run_on_startup {
        let service = service.clone();
        let interval_secs = config.sweep.interval_secs;
        let run_on_startup = config.sweep.run_on_startup;
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            run_sweeps(service, interval_secs, run_on_startup, shutdown).await;
        }))
    } else {
        info!("Periodic sweeps disabled, trigger them through the API");
        None
    };

    // Start API server if enabled
    let api_handle = if config.api.enabled {
        let state = Arc::new(AppState {
            service: service.clone(),
            outbox,
            db_pool,
        });
        let app = tavola_api::create_router(state);
        let listener = tokio::net::TcpListener::bind(&config.api.bind)
            .await
            .with_context(|| format!("Failed to bind API server on {}", config.api.bind))?;
        info!("Starting API server on {}", config.api.bind);

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        info!("API server disabled");
        None
    };

    info!("Tavola started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stop taking requests, then let the workers wind down
    if let Some(handle) = api_handle {
        handle.abort();
    }
    let _ = shutdown_tx.send(true);

    if let Err(e) = outbox_handle.await {
        error!("Outbox worker failed: {}", e);
    }

    if let Some(mut handle) = sweep_handle {
        let grace = Duration::from_secs(config.outbox.shutdown_grace_secs);
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("Sweep did not finish in time, aborting it");
            handle.abort();
        }
    }

    info!("Tavola shutdown complete");

    Ok(())
}

/// Run both reconciliation sweeps on a fixed interval
///
/// Each sweep is awaited before the next tick, so sweeps never overlap. A
/// shutdown request is only observed between sweeps.
async fn run_sweeps(
    service: Arc<EmailService>,
    interval_secs: u64,
    run_on_startup: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    if run_on_startup {
        sweep_once(&service).await;
    }

    if interval_secs == 0 {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    info!(interval_secs, "Sweep loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => sweep_once(&service).await,
        }
    }

    info!("Sweep loop stopped");
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn sweep_once(service: &EmailService) {
    let report = service.process_stuck_emails().await;
    if report.processed > 0 {
        info!(
            processed = report.processed,
            success = report.success,
            failed = report.failed,
            "Sweep completed"
        );
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tavola=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
