//! Process entrypoint: parses configuration, wires collaborators, and runs
//! ingestion + maintenance on one local task alongside a normal `Send`
//! health-endpoint task, shutting both down cleanly on SIGTERM/SIGINT.

use std::rc::Rc;

use clap::Parser;
use coldchain_telemetry_proc::bus::{MessageBus, TcpLineBus};
use coldchain_telemetry_proc::clock::{Clock, SystemClock};
use coldchain_telemetry_proc::config::Settings;
use coldchain_telemetry_proc::engine::Engine;
use coldchain_telemetry_proc::health;
use coldchain_telemetry_proc::maintenance;
use coldchain_telemetry_proc::store::{HttpStore, Store};
use coldchain_telemetry_proc::webhook::{HttpWebhook, Webhook};
use log::{info, warn};
use tokio::task::LocalSet;

fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    env_logger::Builder::new().parse_filters(&settings.log_level).init();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let health_port = settings.health_port;
    let settings = Rc::new(settings);
    let clock: Rc<dyn Clock> = Rc::new(SystemClock);
    let store: Rc<dyn Store> = Rc::new(HttpStore::new(settings.store_url.clone(), settings.store_key.clone()));
    let webhook: Rc<dyn Webhook> = Rc::new(HttpWebhook::new(settings.webhook_url.clone()));

    let engine = Rc::new(Engine::new(Rc::clone(&settings), clock, store, webhook));

    engine.bootstrap_door_state().await;
    engine.refresh_config_cache().await;
    engine.reseed_heartbeats().await;

    let health_router = health::router(engine.health_handle());
    let health_listener = tokio::net::TcpListener::bind(("127.0.0.1", health_port)).await?;
    let health_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(health_listener, health_router).await {
            log::error!("health server exited: {err}");
        }
    });
    info!("health endpoint listening on 127.0.0.1:{health_port}");

    let local = LocalSet::new();
    let bus = TcpLineBus::new(settings.bus_url.clone(), settings.bus_topic.clone());
    local.run_until(run_local(engine, bus)).await;

    health_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!("failed to install SIGTERM handler: {err}");
            let _ = ctrl_c.await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm.recv() => {},
    }
}

/// Runs ingestion and every maintenance loop concurrently on this local
/// task via a `moro_local` nursery, racing it against the shutdown signal:
/// a loop never returns on its own, so dropping the scope on shutdown is
/// what actually stops everything, including the bus subscription.
async fn run_local(engine: Rc<Engine>, mut bus: TcpLineBus) {
    let ingestion = async {
        loop {
            match bus.recv().await {
                Ok(Some(bytes)) => engine.handle_payload(&bytes),
                Ok(None) => break,
                Err(err) => warn!("bus error: {err:#}"),
            }
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining telemetry queue");
        }
        _ = moro_local::async_scope!(|scope| {
            scope.spawn(ingestion);
            scope.spawn(maintenance::telemetry_drain_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::door_drain_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::webhook_drain_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::config_refresh_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::heartbeat_reseed_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::gateway_offline_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::gc_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::watchlist_gc_loop(Rc::clone(&engine)));
            scope.spawn(maintenance::health_refresh_loop(Rc::clone(&engine)));
        }) => {}
    }

    engine.flush_on_shutdown().await;
}
