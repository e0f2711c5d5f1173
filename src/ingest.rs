//! Ingestion dispatcher: parses the inbound bus payload and produces one
//! [`SensorSample`] per accepted sensor entry, ready to be fed through the
//! per-sensor state machine. Filtering against blocklists and the
//! config cache happens in [`crate::engine`], which owns those maps; this
//! module only knows how to turn bytes into typed samples.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::mac::{battery_percent, canonicalize_mac, looks_like_mac, Mac};

const ACCEPTED_ENTRY_TYPE: i64 = 1;

#[derive(Debug, Clone, Deserialize)]
struct GatewayPayload {
    gmac: String,
    #[serde(default)]
    obj: Vec<SensorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SensorEntry {
    dmac: String,
    #[serde(rename = "type")]
    entry_type: i64,
    temp: f64,
    humidity: f64,
    vbatt: f64,
    #[serde(default)]
    rssi: Option<i32>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    #[allow(dead_code)] // not consumed downstream; kept for wire fidelity.
    alarm: Option<i64>,
}

/// One accepted inbound reading, MACs already canonicalised and voltage
/// already converted to a battery percentage.
#[derive(Debug, Clone)]
pub struct SensorSample {
    pub gateway_mac: Mac,
    pub sensor_mac: Mac,
    pub temp: f64,
    pub hum: f64,
    pub battery_pct: u8,
    pub rssi: Option<i32>,
    /// Wall-clock millis parsed from the payload's `time` field, if present.
    pub sample_ts_ms: Option<i64>,
}

/// One gateway's worth of accepted samples, plus its canonical MAC so the
/// caller can record a heartbeat even if every sensor entry was filtered out.
#[derive(Debug, Clone)]
pub struct GatewayBatch {
    pub gateway_mac: Mac,
    pub samples: Vec<SensorSample>,
}

/// Decodes the outer JSON (single object, array, or the historical
/// nested-array form, flattened until the first element is an object) into
/// one [`GatewayBatch`] per gateway. Non-`type == 1` entries are silently
/// dropped (routine, not an error).
pub fn parse_payload(bytes: &[u8]) -> Result<Vec<GatewayBatch>> {
    let mut value: Value = serde_json::from_slice(bytes).context("invalid JSON payload")?;

    loop {
        match &value {
            Value::Array(arr) if arr.first().is_some_and(Value::is_array) => {
                value = arr[0].clone();
            }
            _ => break,
        }
    }

    let gateways: Vec<GatewayPayload> = match value {
        Value::Array(_) => serde_json::from_value(value).context("malformed gateway array")?,
        Value::Object(_) => vec![serde_json::from_value(value).context("malformed gateway object")?],
        other => bail!("unexpected payload shape: {other}"),
    };

    Ok(gateways.into_iter().filter_map(gateway_batch_from).collect())
}

/// Returns `None` for a gateway whose `gmac` isn't plausibly a MAC at all
/// (garbage payload) rather than canonicalising junk into the heartbeat map.
fn gateway_batch_from(gw: GatewayPayload) -> Option<GatewayBatch> {
    if !looks_like_mac(&gw.gmac) {
        return None;
    }
    let gateway_mac = canonicalize_mac(&gw.gmac);
    let samples = gw
        .obj
        .into_iter()
        .filter(|entry| entry.entry_type == ACCEPTED_ENTRY_TYPE && looks_like_mac(&entry.dmac))
        .map(|entry| SensorSample {
            gateway_mac: gateway_mac.clone(),
            sensor_mac: canonicalize_mac(&entry.dmac),
            temp: entry.temp,
            hum: entry.humidity,
            battery_pct: battery_percent(entry.vbatt),
            rssi: entry.rssi,
            sample_ts_ms: entry.time.as_deref().and_then(parse_sample_time),
        })
        .collect();
    Some(GatewayBatch { gateway_mac, samples })
}

/// Parses the payload's `"YYYY-MM-DD HH:MM:SS.sss"` format. Returns `None`
/// (falls back to ingestion-time `now`) rather than erroring on a malformed
/// timestamp — a parse failure here should never drop an otherwise-valid
/// reading.
fn parse_sample_time(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// "YYYY-MM-DD HH:MM:SS.sss" with the space replaced by "T", as persisted
/// into `telemetry_logs`/`door_logs`.
pub fn format_for_persistence(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_gateway_object() {
        let payload = br#"{"gmac":"aabbccddeeff","obj":[{"dmac":"112233445566","type":1,"temp":-18.2,"humidity":55.0,"vbatt":3200,"rssi":-60}]}"#;
        let batches = parse_payload(payload).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].gateway_mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(batches[0].samples.len(), 1);
        assert_eq!(batches[0].samples[0].sensor_mac, "11:22:33:44:55:66");
    }

    #[test]
    fn parses_gateway_array() {
        let payload = br#"[{"gmac":"AA:BB:CC:DD:EE:FF","obj":[]}]"#;
        let batches = parse_payload(payload).unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].samples.is_empty());
    }

    #[test]
    fn flattens_historical_nested_array() {
        let payload = br#"[[{"gmac":"AABBCCDDEEFF","obj":[]}]]"#;
        let batches = parse_payload(payload).unwrap();
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn drops_non_type_1_entries() {
        let payload = br#"{"gmac":"AABBCCDDEEFF","obj":[{"dmac":"112233445566","type":2,"temp":-18.0,"humidity":50.0,"vbatt":3000}]}"#;
        let batches = parse_payload(payload).unwrap();
        assert!(batches[0].samples.is_empty());
    }

    #[test]
    fn drops_gateway_with_malformed_mac() {
        let payload = br#"{"gmac":"not-a-mac","obj":[]}"#;
        let batches = parse_payload(payload).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn drops_sensor_entry_with_malformed_mac() {
        let payload = br#"{"gmac":"aabbccddeeff","obj":[{"dmac":"bogus","type":1,"temp":-18.0,"humidity":50.0,"vbatt":3000}]}"#;
        let batches = parse_payload(payload).unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].samples.is_empty());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_payload(b"not json").is_err());
    }

    #[test]
    fn parses_payload_timestamp() {
        let ms = parse_sample_time("2026-07-27 10:15:30.250").unwrap();
        assert!(ms > 0);
    }
}
