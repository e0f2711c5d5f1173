//! The top-level engine: owns every shared map the process needs and is the
//! sole mutator of each — ambient runtime state as explicit struct fields
//! rather than module-level statics. Lives on one local task — every
//! interior map is `Rc<RefCell<_>>`, a single-threaded design rather than
//! per-MAC locking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono_tz::Tz;
use hashlink::LinkedHashMap;
use log::{error, info, warn};

use crate::alert::resolve_timezone;
use crate::clock::{Clock, MS_PER_MIN};
use crate::config::{
    Settings, GATEWAY_HEARTBEAT_TTL_MS, GATEWAY_OFFLINE_AFTER_MS, GATEWAY_SISTEMA_ALERT_COOLDOWN_MS,
    SENSOR_STATE_TTL_MS, SOAK_ALTA_MS, WATCHLIST_PRUNE_FACTOR,
};
use crate::health::{GatewaySummary, HealthSnapshot, SensorSummary};
use crate::ingest::{self, GatewayBatch};
use crate::mac::Mac;
use crate::model::{
    Alert, DoorLogRecord, GatewayHeartbeat, HeartbeatSource, Priority, ProblemKind, SensorConfig,
    SensorState, TelemetryLogRecord, WatchlistEntry, WatchlistKey,
};
use crate::sensor::{self, SampleInput};
use crate::store::Store;
use crate::webhook::Webhook;

/// MACs known to be test fixtures or decommissioned hardware, checked
/// before the config-driven blocklists since it's cheaper and independent
/// of cache staleness.
const HARDCODED_BLOCKLIST: &[&str] = &["00:00:00:00:00:00", "FF:FF:FF:FF:FF:FF"];

pub struct Engine {
    settings: Rc<Settings>,
    clock: Rc<dyn Clock>,
    store: Rc<dyn Store>,
    webhook: Rc<dyn Webhook>,
    tz: Tz,
    started_at_ms: i64,

    sensor_configs: RefCell<LinkedHashMap<Mac, SensorConfig>>,
    secondary_blocklist: RefCell<std::collections::HashSet<Mac>>,
    sensor_states: RefCell<LinkedHashMap<Mac, SensorState>>,
    gateway_heartbeats: RefCell<LinkedHashMap<Mac, GatewayHeartbeat>>,
    watchlist: RefCell<std::collections::HashMap<WatchlistKey, WatchlistEntry>>,
    /// Bootstrapped from `door_logs` at startup; consulted the first time a
    /// sensor's [`SensorState`] is created so a restart never fabricates a
    /// phantom open→close transition.
    door_state_bootstrap: RefCell<std::collections::HashMap<Mac, bool>>,

    telemetry_queue: RefCell<VecDeque<TelemetryLogRecord>>,
    door_queue: RefCell<VecDeque<DoorLogRecord>>,
    alert_queue: RefCell<VecDeque<Alert>>,
    webhook_retry_count: std::cell::Cell<u32>,

    health: Arc<RwLock<HealthSnapshot>>,
}

impl Engine {
    pub fn new(settings: Rc<Settings>, clock: Rc<dyn Clock>, store: Rc<dyn Store>, webhook: Rc<dyn Webhook>) -> Self {
        let tz = resolve_timezone(&settings.timezone);
        let started_at_ms = clock.now_ms();
        Self {
            settings,
            clock,
            store,
            webhook,
            tz,
            started_at_ms,
            sensor_configs: RefCell::new(LinkedHashMap::new()),
            secondary_blocklist: RefCell::new(std::collections::HashSet::new()),
            sensor_states: RefCell::new(LinkedHashMap::new()),
            gateway_heartbeats: RefCell::new(LinkedHashMap::new()),
            watchlist: RefCell::new(std::collections::HashMap::new()),
            door_state_bootstrap: RefCell::new(std::collections::HashMap::new()),
            telemetry_queue: RefCell::new(VecDeque::new()),
            door_queue: RefCell::new(VecDeque::new()),
            alert_queue: RefCell::new(VecDeque::new()),
            webhook_retry_count: std::cell::Cell::new(0),
            health: Arc::new(RwLock::new(HealthSnapshot::default())),
        }
    }

    pub fn health_handle(&self) -> Arc<RwLock<HealthSnapshot>> {
        Arc::clone(&self.health)
    }

    fn is_blocklisted(&self, mac: &Mac) -> bool {
        HARDCODED_BLOCKLIST.contains(&mac.as_str()) || self.secondary_blocklist.borrow().contains(mac)
    }

    // ---- Ingestion dispatcher -------------------------------------------

    /// Parses and dispatches one inbound bus payload. Never awaits a store
    /// or webhook call; side effects land in the in-memory queues drained
    /// by the periodic tasks.
    pub fn handle_payload(&self, bytes: &[u8]) {
        let batches = match ingest::parse_payload(bytes) {
            Ok(batches) => batches,
            Err(err) => {
                let preview_len = bytes.len().min(200);
                let preview = String::from_utf8_lossy(&bytes[..preview_len]);
                error!("dropping malformed payload: {err:#} (preview: {preview})");
                return;
            }
        };
        for batch in batches {
            self.handle_gateway_batch(batch);
        }
    }

    fn handle_gateway_batch(&self, batch: GatewayBatch) {
        let now_ms = self.clock.now_ms();
        if self.is_blocklisted(&batch.gateway_mac) {
            return;
        }
        self.gateway_heartbeats
            .borrow_mut()
            .entry(batch.gateway_mac.clone())
            .and_modify(|hb| hb.last_seen_ms = now_ms)
            .or_insert(GatewayHeartbeat {
                last_seen_ms: now_ms,
                source: HeartbeatSource::Live,
                last_sistema_alert_ms: None,
            });

        for sample in batch.samples {
            if self.is_blocklisted(&sample.sensor_mac) {
                continue;
            }
            let Some(config) = self.sensor_configs.borrow().get(&sample.sensor_mac).cloned() else {
                continue; // unknown MAC / missing config: silently ignore
            };
            // The payload's self-reported `time`, if present, only ever
            // labels a persisted record's timestamp field (§6). Window
            // pruning, soak, cooldown, and defrost timing always run off
            // the wall clock below (`now_ms`), never a gateway-supplied
            // value a replay or clock-skewed device could forge.
            let event_ts_ms = sample.sample_ts_ms.unwrap_or(now_ms);
            self.process_one_sample(&batch.gateway_mac, &sample.sensor_mac, &config, &sample, event_ts_ms, now_ms);
        }
    }

    fn process_one_sample(
        &self,
        gateway_mac: &Mac,
        sensor_mac: &Mac,
        config: &SensorConfig,
        sample: &ingest::SensorSample,
        event_ts_ms: i64,
        now_ms: i64,
    ) {
        let mut states = self.sensor_states.borrow_mut();
        let state = states.entry(sensor_mac.clone()).or_insert_with(|| {
            let mut fresh =
                SensorState::new(sensor_mac.clone(), now_ms, sample.temp, sample.hum, sample.rssi, sample.battery_pct);
            if let Some(&is_open) = self.door_state_bootstrap.borrow().get(sensor_mac) {
                fresh.last_virtual_state = is_open;
            }
            fresh
        });

        let input = SampleInput {
            gateway_mac: gateway_mac.clone(),
            temp: sample.temp,
            hum: sample.hum,
            battery_pct: sample.battery_pct,
            rssi: sample.rssi,
            event_ts_ms,
        };
        let mut watchlist = self.watchlist.borrow_mut();
        let outcome =
            sensor::process_sample(state, config, &mut watchlist, &self.settings.thresholds, self.tz, &input, now_ms);
        drop(watchlist);
        drop(states);

        if let Some(record) = outcome.telemetry_record {
            self.telemetry_queue.borrow_mut().push_back(record);
        }
        if let Some(record) = outcome.door_record {
            self.door_queue.borrow_mut().push_back(record);
        }
        for alert in outcome.alerts {
            self.alert_queue.borrow_mut().push_back(alert);
        }
    }

    // ---- Periodic maintenance --------------------------------------------

    /// Refreshes the sensor-config cache and the derived paired-door
    /// blocklist by atomic whole-map swap; on failure, keeps the previous
    /// cache rather than blanking it out.
    pub async fn refresh_config_cache(&self) {
        match self.store.load_sensor_configs().await {
            Ok(rows) => {
                let mut configs = LinkedHashMap::new();
                let mut secondary = std::collections::HashSet::new();
                for (mac, config) in rows {
                    if let Some(paired) = &config.sensor_porta_vinculado {
                        secondary.insert(paired.clone());
                    }
                    configs.insert(mac, config);
                }
                *self.sensor_configs.borrow_mut() = configs;
                *self.secondary_blocklist.borrow_mut() = secondary;
                info!("sensor config cache refreshed");
            }
            Err(err) => warn!("config refresh failed, keeping previous cache: {err:#}"),
        }
    }

    /// Re-seeds gateway heartbeats from recent telemetry so a gateway that
    /// was active before process start isn't immediately flagged offline.
    pub async fn reseed_heartbeats(&self) {
        let since_ms = self.clock.now_ms() - GATEWAY_OFFLINE_AFTER_MS;
        match self.store.recent_gateway_macs(since_ms).await {
            Ok(macs) => {
                let now_ms = self.clock.now_ms();
                let mut heartbeats = self.gateway_heartbeats.borrow_mut();
                for mac in macs {
                    heartbeats.entry(mac).or_insert(GatewayHeartbeat {
                        last_seen_ms: now_ms,
                        source: HeartbeatSource::Db,
                        last_sistema_alert_ms: None,
                    });
                }
            }
            Err(err) => warn!("gateway heartbeat reseed failed: {err:#}"),
        }
    }

    /// Loads the most recent `door_logs` row per sensor at startup.
    pub async fn bootstrap_door_state(&self) {
        match self.store.last_door_states().await {
            Ok(rows) => {
                let mut bootstrap = self.door_state_bootstrap.borrow_mut();
                for (mac, is_open) in rows {
                    bootstrap.insert(mac, is_open);
                }
                info!("bootstrapped door state for {} sensors", bootstrap.len());
            }
            Err(err) => warn!("door-state bootstrap failed, starting cold: {err:#}"),
        }
    }

    /// Every minute: gateways silent > 15 min whose last SISTEMA alert is
    /// older than an hour get exactly one "GATEWAY OFFLINE" alert enqueued.
    pub fn check_gateways_offline(&self) {
        let now_ms = self.clock.now_ms();
        let mut heartbeats = self.gateway_heartbeats.borrow_mut();
        for (mac, hb) in heartbeats.iter_mut() {
            let silent_for = now_ms - hb.last_seen_ms;
            if silent_for <= GATEWAY_OFFLINE_AFTER_MS {
                continue;
            }
            let due = match hb.last_sistema_alert_ms {
                None => true,
                Some(last) => now_ms - last >= GATEWAY_SISTEMA_ALERT_COOLDOWN_MS,
            };
            if !due {
                continue;
            }
            hb.last_sistema_alert_ms = Some(now_ms);
            self.alert_queue.borrow_mut().push_back(Alert {
                id: uuid::Uuid::new_v4(),
                sensor_name: mac.clone(),
                sensor_mac: mac.clone(),
                priority: Priority::Sistema,
                messages: vec![format!(
                    "GATEWAY OFFLINE ha {} min",
                    silent_for / MS_PER_MIN
                )],
                timestamp: chrono::Utc::now(),
                context: None,
            });
        }
    }

    /// Every 24 h: evict sensor state silent > 24 h and gateway heartbeats
    /// silent > 48 h.
    pub fn evict_stale(&self) {
        let now_ms = self.clock.now_ms();
        self.sensor_states.borrow_mut().retain(|_, state| now_ms - state.last_reading_ms <= SENSOR_STATE_TTL_MS);
        self.gateway_heartbeats.borrow_mut().retain(|_, hb| now_ms - hb.last_seen_ms <= GATEWAY_HEARTBEAT_TTL_MS);
    }

    /// Every 30 min: prune watchlist entries older than twice the longest
    /// soak window. The distilled spec ties the prune age to "2x soak" per
    /// problem kind; this implementation uses the longest soak (ALTA's)
    /// as a conservative upper bound rather than tracking per-entry soak,
    /// an explicit simplification recorded in DESIGN.md.
    pub fn prune_watchlist(&self) {
        let now_ms = self.clock.now_ms();
        let max_age = WATCHLIST_PRUNE_FACTOR * SOAK_ALTA_MS;
        self.watchlist.borrow_mut().retain(|_, entry| now_ms - entry.first_seen_ms <= max_age);
    }

    // ---- Buffer drains -----------------------------------------------------

    pub async fn drain_telemetry(&self) {
        let batch: Vec<_> = self.telemetry_queue.borrow_mut().drain(..).collect();
        if batch.is_empty() {
            return;
        }
        let rows: Vec<_> = batch.iter().map(crate::store::telemetry_log_to_row).collect();
        if let Err(err) = self.store.insert("telemetry_logs", &rows).await {
            error!("telemetry insert failed, re-queueing {} rows: {err:#}", batch.len());
            let mut queue = self.telemetry_queue.borrow_mut();
            for row in batch.into_iter().rev() {
                queue.push_front(row);
            }
        }
    }

    pub async fn drain_doors(&self) {
        let batch: Vec<_> = self.door_queue.borrow_mut().drain(..).collect();
        if batch.is_empty() {
            return;
        }
        let rows: Vec<_> = batch.iter().map(crate::store::door_log_to_row).collect();
        if let Err(err) = self.store.insert("door_logs", &rows).await {
            error!("door log insert failed, re-queueing {} rows: {err:#}", batch.len());
            let mut queue = self.door_queue.borrow_mut();
            for row in batch.into_iter().rev() {
                queue.push_front(row);
            }
        }
    }

    /// Drains the outbound alert queue. On failure the batch is
    /// re-prepended, but only up to `webhook_max_retries` consecutive
    /// failures — beyond that it's dropped with a loud log rather than
    /// retried forever.
    pub async fn drain_webhook(&self) {
        let batch: Vec<_> = self.alert_queue.borrow_mut().drain(..).collect();
        if batch.is_empty() {
            return;
        }
        match self.webhook.post_alerts(chrono::Utc::now(), &batch).await {
            Ok(()) => self.webhook_retry_count.set(0),
            Err(err) => {
                let retries = self.webhook_retry_count.get() + 1;
                self.webhook_retry_count.set(retries);
                if retries > self.settings.thresholds.webhook_max_retries {
                    error!(
                        "webhook dropped {} alerts after {retries} failed attempts: {err:#}",
                        batch.len()
                    );
                    self.webhook_retry_count.set(0);
                } else {
                    warn!("webhook post failed (attempt {retries}), re-queueing {} alerts: {err:#}", batch.len());
                    let mut queue = self.alert_queue.borrow_mut();
                    for alert in batch.into_iter().rev() {
                        queue.push_front(alert);
                    }
                }
            }
        }
    }

    /// Best-effort final flush on shutdown: telemetry only — the outbound
    /// alert and door queues are abandoned rather than risk hanging the
    /// shutdown path on a slow store/webhook.
    pub async fn flush_on_shutdown(&self) {
        self.drain_telemetry().await;
    }

    // ---- Health projection -------------------------------------------------

    pub fn refresh_health_snapshot(&self) {
        let now_ms = self.clock.now_ms();
        let configs = self.sensor_configs.borrow();
        let states = self.sensor_states.borrow();

        let mut sensors = Vec::with_capacity(states.len());
        let mut sensors_defrosting = 0usize;
        let mut sensors_door_open = 0usize;
        let mut sensors_in_maintenance = 0usize;

        for (mac, state) in states.iter() {
            let config = configs.get(mac);
            if config.is_some_and(|c| c.em_manutencao) {
                sensors_in_maintenance += 1;
            }
            if state.defrost.is_defrosting {
                sensors_defrosting += 1;
            }
            if state.last_virtual_state {
                sensors_door_open += 1;
            }

            let samples: Vec<(i64, f64)> = state.history.samples().iter().copied().collect();
            let profile = config.map(|c| c.profile()).unwrap_or(crate::model::Profile::Normal);
            let metrics = crate::analyzer::analyze(&samples, profile.tunings());

            sensors.push(SensorSummary {
                mac: mac.clone(),
                display_name: config.map(|c| c.display_name.clone()).unwrap_or_else(|| mac.clone()),
                temp: state.last_temp,
                hum: state.last_hum,
                status: sensor_status_tag(state, config),
                ago_secs: (now_ms - state.last_reading_ms) / 1_000,
                slope: metrics.as_ref().map(|m| m.slope),
                r2: metrics.as_ref().map(|m| m.r2),
                variance: metrics.as_ref().map(|m| m.variance),
                is_defrosting: state.defrost.is_defrosting,
                defrost_start_temp: state.defrost.defrost_start_temp,
                defrost_peak_temp: state.defrost.defrost_peak_temp,
                door_open: state.last_virtual_state,
                temp_min: config.and_then(|c| c.temp_min),
                temp_max: config.and_then(|c| c.temp_max),
            });
        }

        let gateways = self
            .gateway_heartbeats
            .borrow()
            .iter()
            .map(|(mac, hb)| GatewaySummary {
                mac: mac.clone(),
                ago_secs: (now_ms - hb.last_seen_ms) / 1_000,
                source: format!("{:?}", hb.source).to_uppercase(),
            })
            .collect();

        let snapshot = HealthSnapshot {
            status: "OK".to_string(),
            uptime_secs: (now_ms - self.started_at_ms) / 1_000,
            sensors,
            gateways,
            telemetry_queue_len: self.telemetry_queue.borrow().len(),
            door_queue_len: self.door_queue.borrow().len(),
            alert_queue_len: self.alert_queue.borrow().len(),
            sensors_defrosting,
            sensors_door_open,
            sensors_in_maintenance,
        };

        if let Ok(mut guard) = self.health.write() {
            *guard = snapshot;
        }
    }
}

fn sensor_status_tag(state: &SensorState, config: Option<&SensorConfig>) -> String {
    if config.is_some_and(|c| c.em_manutencao) {
        "MAINTENANCE".to_string()
    } else if state.defrost.is_defrosting {
        "DEFROST".to_string()
    } else if state.last_virtual_state {
        "DOOR_OPEN".to_string()
    } else {
        "NORMAL".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::store::Store;
    use crate::webhook::Webhook;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::cell::RefCell as StdRefCell;

    struct NullStore;
    #[async_trait(?Send)]
    impl Store for NullStore {
        async fn insert(&self, _table: &str, _rows: &[Value]) -> Result<()> {
            Ok(())
        }
        async fn load_sensor_configs(&self) -> Result<Vec<(Mac, SensorConfig)>> {
            Ok(vec![(
                "AA:BB:CC:DD:EE:FF".to_string(),
                SensorConfig {
                    display_name: "Freezer 1".into(),
                    temp_max: Some(-10.0),
                    temp_min: Some(-25.0),
                    hum_max: None,
                    hum_min: None,
                    em_manutencao: false,
                    sensor_porta_vinculado: None,
                },
            )])
        }
        async fn recent_gateway_macs(&self, _since_ms: i64) -> Result<Vec<Mac>> {
            Ok(vec![])
        }
        async fn last_door_states(&self) -> Result<Vec<(Mac, bool)>> {
            Ok(vec![])
        }
    }

    struct RecordingWebhook {
        calls: StdRefCell<u32>,
    }
    #[async_trait(?Send)]
    impl Webhook for RecordingWebhook {
        async fn post_alerts(&self, _timestamp: chrono::DateTime<chrono::Utc>, _alerts: &[Alert]) -> Result<()> {
            *self.calls.borrow_mut() += 1;
            Ok(())
        }
    }

    fn test_settings() -> Settings {
        Settings {
            bus_url: "127.0.0.1:9999".into(),
            bus_topic: "topic".into(),
            store_url: "http://localhost".into(),
            store_key: "key".into(),
            webhook_url: "http://localhost/webhook".into(),
            health_port: 9125,
            log_level: "info".into(),
            timezone: "America/Sao_Paulo".into(),
            thresholds: crate::config::Thresholds {
                default_temp_min: -30.0,
                default_temp_max: -5.0,
                high_traffic_temp_max: -2.0,
                high_traffic_weekdays: vec![3, 4],
                door_max_open_minutes: 5,
                webhook_max_retries: 10,
            },
        }
    }

    #[tokio::test]
    async fn steady_state_produces_no_alert_and_one_telemetry_row() {
        let clock = Rc::new(FakeClock::new(0));
        let engine = Engine::new(
            Rc::new(test_settings()),
            clock.clone() as Rc<dyn Clock>,
            Rc::new(NullStore) as Rc<dyn Store>,
            Rc::new(RecordingWebhook { calls: StdRefCell::new(0) }) as Rc<dyn Webhook>,
        );
        engine.refresh_config_cache().await;

        for i in 0..30 {
            let payload = format!(
                r#"{{"gmac":"112233445566","obj":[{{"dmac":"aabbccddeeff","type":1,"temp":{:.2},"humidity":55.0,"vbatt":3200}}]}}"#,
                -18.0 + (i % 2) as f64 * 0.05
            );
            engine.handle_payload(payload.as_bytes());
            clock.advance_secs(10);
        }

        assert_eq!(engine.alert_queue.borrow().len(), 0);
        assert_eq!(engine.telemetry_queue.borrow().len(), 1);
        assert_eq!(engine.door_queue.borrow().len(), 0);
        let states = engine.sensor_states.borrow();
        let state = states.get("AA:BB:CC:DD:EE:FF").unwrap();
        assert!(!state.defrost.is_defrosting);
        assert!(!state.last_virtual_state);
    }

    #[tokio::test]
    async fn blocklisted_gateway_never_creates_heartbeat() {
        let clock = Rc::new(FakeClock::new(0));
        let engine = Engine::new(
            Rc::new(test_settings()),
            clock as Rc<dyn Clock>,
            Rc::new(NullStore) as Rc<dyn Store>,
            Rc::new(RecordingWebhook { calls: StdRefCell::new(0) }) as Rc<dyn Webhook>,
        );
        engine.refresh_config_cache().await;
        engine.handle_payload(br#"{"gmac":"000000000000","obj":[]}"#);
        assert!(engine.gateway_heartbeats.borrow().is_empty());
    }

    fn send_sample(engine: &Engine, temp: f64) {
        let payload = format!(
            r#"{{"gmac":"112233445566","obj":[{{"dmac":"aabbccddeeff","type":1,"temp":{temp:.2},"humidity":55.0,"vbatt":3200}}]}}"#
        );
        engine.handle_payload(payload.as_bytes());
    }

    #[tokio::test]
    async fn defrost_start_suppresses_door_and_alert_pipeline() {
        let clock = Rc::new(FakeClock::new(0));
        let engine = Engine::new(
            Rc::new(test_settings()),
            clock.clone() as Rc<dyn Clock>,
            Rc::new(NullStore) as Rc<dyn Store>,
            Rc::new(RecordingWebhook { calls: StdRefCell::new(0) }) as Rc<dyn Webhook>,
        );
        engine.refresh_config_cache().await;

        // This sensor's config (from `NullStore`) has temp_min = -25.0,
        // which makes it an ULTRA profile sensor, so the rise below reaches
        // defrost-start criterion 3 (slope > 0.3, r2 > 0.88, std_error <
        // 0.6) as soon as the analyzer has enough samples to run (10), well
        // before temp approaches any configured limit.
        let mut temp = -18.0;
        for _ in 0..12 {
            send_sample(&engine, temp);
            clock.advance_secs(10);
            temp += 0.3;
        }

        {
            let states = engine.sensor_states.borrow();
            let state = states.get("AA:BB:CC:DD:EE:FF").unwrap();
            assert!(state.defrost.is_defrosting, "defrost should have started during the rise");
        }

        assert_eq!(engine.door_queue.borrow().len(), 0, "door stays forced-closed during a defrost cycle");
        assert_eq!(engine.alert_queue.borrow().len(), 0, "no alert while still well inside configured limits");
    }

    #[tokio::test]
    async fn gateway_offline_raises_exactly_one_sistema_alert_per_hour() {
        let clock = Rc::new(FakeClock::new(0));
        let engine = Engine::new(
            Rc::new(test_settings()),
            clock.clone() as Rc<dyn Clock>,
            Rc::new(NullStore) as Rc<dyn Store>,
            Rc::new(RecordingWebhook { calls: StdRefCell::new(0) }) as Rc<dyn Webhook>,
        );
        engine.refresh_config_cache().await;
        engine.handle_payload(br#"{"gmac":"112233445566","obj":[]}"#);

        clock.advance_ms(GATEWAY_OFFLINE_AFTER_MS + 1_000);
        engine.check_gateways_offline();
        assert_eq!(engine.alert_queue.borrow().len(), 1);
        assert_eq!(engine.alert_queue.borrow()[0].priority, Priority::Sistema);

        engine.alert_queue.borrow_mut().clear();
        clock.advance_ms(30 * MS_PER_MIN);
        engine.check_gateways_offline();
        assert!(engine.alert_queue.borrow().is_empty(), "no second SISTEMA alert within the cooldown hour");
    }
}
