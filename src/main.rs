//! service-guard - composition root
//!
//! Wires the datastore pool, circuit breaker, operation tracker and the two
//! orchestrator-facing listeners, then runs until SIGTERM/Ctrl+C and drains.

use service_guard::adapters::inbound::{ControlListener, HealthEndpoint};
use service_guard::adapters::outbound::RedisConnectionPool;
use service_guard::application::{status_monitor, DatastoreService};
use service_guard::config::load_config;
use service_guard::domain::ports::Pingable;
use service_guard::infrastructure::{
    shutdown_signal, CircuitBreaker, ConnectionValidator, GuardedPool, OperationTracker,
    ServiceState, ShutdownController,
};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults, JSON file, environment)
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting {} control={} health={} datastore={}",
        cfg.service_name,
        cfg.control_listen_addr,
        cfg.health_listen_addr,
        cfg.datastore_addr
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound: datastore pool behind breaker + validator
    let breaker = Arc::new(CircuitBreaker::new("datastore", cfg.breaker_config()));
    let source = Arc::new(RedisConnectionPool::new(
        cfg.datastore_addr.clone(),
        cfg.pool_config(),
    ));
    let validator = ConnectionValidator::new(breaker.clone(), cfg.ping_timeout());
    let pool = GuardedPool::new(source, validator);

    // 2. Lifecycle state
    let tracker = Arc::new(OperationTracker::new());
    let state = ServiceState::new();
    let shutdown = ShutdownController::new();

    // 3. Application service
    let datastore = DatastoreService::new(pool, tracker.clone())
        .with_operation_timeout(cfg.operation_timeout());

    // 4. Inbound: bind both sockets before reporting ready
    let control = ControlListener::bind(&cfg.control_listen_addr, tracker.clone(), state.clone())
        .await?
        .with_read_timeout(cfg.control_read_timeout());
    let health = HealthEndpoint::bind(&cfg.health_listen_addr, state.clone()).await?;

    let monitor = status_monitor::spawn(
        breaker.clone(),
        state.clone(),
        cfg.status_check_interval(),
        shutdown.clone(),
    );
    let control_task = tokio::spawn(control.run(shutdown.clone()));
    let health_task = tokio::spawn(health.run(shutdown.clone()));

    // Startup probe: warms a connection and primes the breaker
    match datastore.execute(|mut conn| async move { conn.ping().await }).await {
        Ok(()) => tracing::info!("datastore {} reachable", cfg.datastore_addr),
        Err(e) => tracing::warn!("datastore {} not reachable at startup: {}", cfg.datastore_addr, e),
    }

    shutdown_signal().await;

    // Stop advertising readiness, let in-flight work finish, then close listeners
    state.begin_drain();
    if !tracker.wait_for_drain(cfg.drain_timeout()).await {
        tracing::warn!(
            "{} datastore operations still active after drain timeout",
            tracker.count()
        );
    }
    shutdown.shutdown();

    let (control_res, health_res, monitor_res) = tokio::join!(control_task, health_task, monitor);
    control_res??;
    health_res??;
    monitor_res?;

    tracing::info!("{} stopped", cfg.service_name);
    Ok(())
}
