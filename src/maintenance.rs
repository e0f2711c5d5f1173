//! Periodic maintenance: one independent timer-driven loop per background
//! task, each awaiting only its own I/O and
//! never blocking the ingestion path. Scheduled together from `main` inside
//! the same local task as ingestion via `moro_local::async_scope!`.

use std::rc::Rc;
use std::time::Duration;

use tokio::time::interval;

use crate::engine::Engine;

const TELEMETRY_DRAIN_PERIOD: Duration = Duration::from_secs(10);
const DOOR_DRAIN_PERIOD: Duration = Duration::from_secs(10);
const WEBHOOK_DRAIN_PERIOD: Duration = Duration::from_secs(5 * 60);
const CONFIG_REFRESH_PERIOD: Duration = Duration::from_secs(10 * 60);
const HEARTBEAT_RESEED_PERIOD: Duration = Duration::from_secs(30 * 60);
const GATEWAY_OFFLINE_CHECK_PERIOD: Duration = Duration::from_secs(60);
const GC_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
const WATCHLIST_GC_PERIOD: Duration = Duration::from_secs(30 * 60);
const HEALTH_REFRESH_PERIOD: Duration = Duration::from_secs(5);

async fn run_forever<F>(period: Duration, mut tick: F)
where
    F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()>>>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        tick().await;
    }
}

pub async fn telemetry_drain_loop(engine: Rc<Engine>) {
    run_forever(TELEMETRY_DRAIN_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.drain_telemetry().await })
    })
    .await
}

pub async fn door_drain_loop(engine: Rc<Engine>) {
    run_forever(DOOR_DRAIN_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.drain_doors().await })
    })
    .await
}

pub async fn webhook_drain_loop(engine: Rc<Engine>) {
    run_forever(WEBHOOK_DRAIN_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.drain_webhook().await })
    })
    .await
}

pub async fn config_refresh_loop(engine: Rc<Engine>) {
    run_forever(CONFIG_REFRESH_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.refresh_config_cache().await })
    })
    .await
}

pub async fn heartbeat_reseed_loop(engine: Rc<Engine>) {
    run_forever(HEARTBEAT_RESEED_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.reseed_heartbeats().await })
    })
    .await
}

pub async fn gateway_offline_loop(engine: Rc<Engine>) {
    run_forever(GATEWAY_OFFLINE_CHECK_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.check_gateways_offline() })
    })
    .await
}

pub async fn gc_loop(engine: Rc<Engine>) {
    run_forever(GC_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.evict_stale() })
    })
    .await
}

pub async fn watchlist_gc_loop(engine: Rc<Engine>) {
    run_forever(WATCHLIST_GC_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.prune_watchlist() })
    })
    .await
}

pub async fn health_refresh_loop(engine: Rc<Engine>) {
    run_forever(HEALTH_REFRESH_PERIOD, move || {
        let engine = Rc::clone(&engine);
        Box::pin(async move { engine.refresh_health_snapshot() })
    })
    .await
}
