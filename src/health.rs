//! Observability surface: a read-only HTTP health endpoint served on
//! `settings.health_port`, the same `axum` the daemon uses for its own
//! status API while the rest of the outbound stack stays on raw `hyper`
//! ("axum in, raw hyper out").
//!
//! The snapshot is republished by the maintenance loop on a fixed tick
//! rather than computed per-request, so a burst of health checks never
//! touches the `Rc<RefCell<_>>` engine state from outside its owning task.

use std::sync::{Arc, RwLock};

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::error::ProcError;
use crate::mac::Mac;

#[derive(Debug, Clone, Serialize)]
pub struct SensorSummary {
    pub mac: Mac,
    pub display_name: String,
    pub temp: f64,
    pub hum: f64,
    pub status: String,
    pub ago_secs: i64,
    pub slope: Option<f64>,
    pub r2: Option<f64>,
    pub variance: Option<f64>,
    pub is_defrosting: bool,
    pub defrost_start_temp: Option<f64>,
    pub defrost_peak_temp: Option<f64>,
    pub door_open: bool,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewaySummary {
    pub mac: Mac,
    pub ago_secs: i64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct HealthSnapshot {
    pub status: String,
    pub uptime_secs: i64,
    pub sensors: Vec<SensorSummary>,
    pub gateways: Vec<GatewaySummary>,
    pub telemetry_queue_len: usize,
    pub door_queue_len: usize,
    pub alert_queue_len: usize,
    pub sensors_defrosting: usize,
    pub sensors_door_open: usize,
    pub sensors_in_maintenance: usize,
}

type SharedSnapshot = Arc<RwLock<HealthSnapshot>>;

/// Builds the router served by the health task. `/health` mirrors the full
/// snapshot; `/healthz` is the cheap liveness probe other services poll.
pub fn router(snapshot: SharedSnapshot) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/healthz", get(get_healthz))
        .route("/health/sensors/:mac", get(get_sensor))
        .with_state(snapshot)
}

async fn get_health(State(snapshot): State<SharedSnapshot>) -> Json<HealthSnapshot> {
    let guard = snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    Json(guard.clone())
}

async fn get_healthz(State(snapshot): State<SharedSnapshot>) -> &'static str {
    let guard = snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.status == "OK" {
        "ok"
    } else {
        "degraded"
    }
}

/// Single-sensor drill-down over the same published snapshot, for operators
/// chasing one MAC instead of scraping the full projection. The one
/// endpoint on this read-only surface that can fail (an unknown MAC), hence
/// the only caller of [`ProcError`].
async fn get_sensor(
    State(snapshot): State<SharedSnapshot>,
    Path(mac): Path<String>,
) -> Result<Json<SensorSummary>, ProcError> {
    let canonical = crate::mac::canonicalize_mac(&mac);
    let guard = snapshot.read().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard
        .sensors
        .iter()
        .find(|s| s.mac == canonical)
        .cloned()
        .map(Json)
        .ok_or(ProcError::NotFound { msg: format!("no sensor with mac {canonical}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_serialises_to_empty_collections() {
        let snapshot = HealthSnapshot::default();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["sensors"], serde_json::json!([]));
        assert_eq!(json["gateways"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn get_sensor_errors_on_unknown_mac() {
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(HealthSnapshot::default()));
        let result = get_sensor(State(snapshot), Path("AA:BB:CC:DD:EE:FF".to_string())).await;
        assert!(result.is_err());
    }
}
