//! Persistent store collaborator: insert rows into a table, run the handful
//! of cached lookups the engine needs. The concrete adapter below treats the
//! store as a small internal HTTP service (`POST /insert/<table>`,
//! `GET /query/<table>`), built on the same raw `hyper` + `hyper-util` +
//! `http-body-util` stack the daemon uses for its own outbound HTTP calls
//! rather than pulling in a database driver crate.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::mac::Mac;
use crate::model::{DoorLogRecord, SensorConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Narrow persistence seam: insert a batch of rows, or run one of the two
/// cached lookups the engine's periodic jobs need. `?Send` for the same
/// reason as [`crate::bus::MessageBus`] — driven from the single local
/// ingestion/maintenance task.
#[async_trait(?Send)]
pub trait Store {
    /// `store.insert(table, batch)` — `rows` is already JSON-serialisable.
    async fn insert(&self, table: &str, rows: &[Value]) -> Result<()>;

    /// Reads the full `sensor_configs` table for the 10-min cache refresh.
    async fn load_sensor_configs(&self) -> Result<Vec<(Mac, SensorConfig)>>;

    /// Reads recent `telemetry_logs` rows for the 30-min gateway-heartbeat
    /// reseed (captures gateways active before process start).
    async fn recent_gateway_macs(&self, since_ms: i64) -> Result<Vec<Mac>>;

    /// Reads the most recent `door_logs` row per sensor for the startup
    /// bootstrap of `last_virtual_state` (prevents a phantom open→close
    /// right after restart).
    async fn last_door_states(&self) -> Result<Vec<(Mac, bool)>>;
}

pub struct HttpStore {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    key: String,
}

impl HttpStore {
    pub fn new(base_url: String, key: String) -> Self {
        Self { client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()), base_url, key }
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Value> {
        let uri: hyper::Uri = format!("{}{path}", self.base_url).parse().context("building store URI")?;
        let payload = serde_json::to_vec(body)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.key))
            .body(Full::new(Bytes::from(payload)))
            .context("building store request")?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .context("store request timed out")?
            .context("store request failed")?;

        if !response.status().is_success() {
            bail!("store responded with {}", response.status());
        }
        let bytes = response.into_body().collect().await.context("reading store response body")?.to_bytes();
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).context("decoding store response")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let uri: hyper::Uri = format!("{}{path}", self.base_url).parse().context("building store URI")?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.key))
            .body(Full::new(Bytes::new()))
            .context("building store request")?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.request(request))
            .await
            .context("store request timed out")?
            .context("store request failed")?;

        if !response.status().is_success() {
            bail!("store responded with {}", response.status());
        }
        let bytes = response.into_body().collect().await.context("reading store response body")?.to_bytes();
        serde_json::from_slice(&bytes).context("decoding store response")
    }
}

#[async_trait(?Send)]
impl Store for HttpStore {
    async fn insert(&self, table: &str, rows: &[Value]) -> Result<()> {
        self.post_json(&format!("/insert/{table}"), &rows).await?;
        Ok(())
    }

    async fn load_sensor_configs(&self) -> Result<Vec<(Mac, SensorConfig)>> {
        #[derive(serde::Deserialize)]
        struct Row {
            mac: String,
            display_name: String,
            temp_max: Option<f64>,
            temp_min: Option<f64>,
            hum_max: Option<f64>,
            hum_min: Option<f64>,
            em_manutencao: bool,
            sensor_porta_vinculado: Option<String>,
        }
        let rows: Vec<Row> = self.get_json("/query/sensor_configs").await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let mac = crate::mac::canonicalize_mac(&r.mac);
                let config = SensorConfig {
                    display_name: r.display_name,
                    temp_max: r.temp_max,
                    temp_min: r.temp_min,
                    hum_max: r.hum_max,
                    hum_min: r.hum_min,
                    em_manutencao: r.em_manutencao,
                    sensor_porta_vinculado: r.sensor_porta_vinculado.map(|m| crate::mac::canonicalize_mac(&m)),
                };
                (mac, config)
            })
            .collect())
    }

    async fn recent_gateway_macs(&self, since_ms: i64) -> Result<Vec<Mac>> {
        let rows: Vec<String> =
            self.get_json(&format!("/query/telemetry_logs/gateways?since_ms={since_ms}")).await?;
        Ok(rows.into_iter().map(|m| crate::mac::canonicalize_mac(&m)).collect())
    }

    async fn last_door_states(&self) -> Result<Vec<(Mac, bool)>> {
        #[derive(serde::Deserialize)]
        struct Row {
            sensor_mac: String,
            is_open: bool,
        }
        let rows: Vec<Row> = self.get_json("/query/door_logs/latest").await?;
        Ok(rows.into_iter().map(|r| (crate::mac::canonicalize_mac(&r.sensor_mac), r.is_open)).collect())
    }
}

/// Serialises a [`DoorLogRecord`]/telemetry record the way `store.insert`
/// expects: a `serde_json::Value` per row, with RFC 3339 timestamps.
pub fn door_log_to_row(record: &DoorLogRecord) -> Value {
    serde_json::json!({
        "gateway_mac": record.gateway_mac,
        "sensor_mac": record.sensor_mac,
        "timestamp_read": crate::ingest::format_for_persistence(record.timestamp_read),
        "is_open": record.is_open,
        "alarm_code": record.alarm_code,
        "battery_percent": record.battery_percent,
        "rssi": record.rssi,
    })
}

pub fn telemetry_log_to_row(record: &crate::model::TelemetryLogRecord) -> Value {
    serde_json::json!({
        "gw": record.gw,
        "mac": record.mac,
        "ts": crate::ingest::format_for_persistence(record.ts),
        "temp": record.temp,
        "hum": record.hum,
        "batt": record.batt,
        "rssi": record.rssi,
    })
}
