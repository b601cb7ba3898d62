/**
 * PUBLISH GATE - Point de passage unique de tout le trafic sortant
 *
 * RÔLE : Décide si un message (telemetry / alert / status) part vers le broker
 * selon l'état de connectivité, l'enrichit (timestamp, device_id, location,
 * analytics, météo) puis le remet au Transport.
 *
 * RÈGLES :
 * - Déconnecté → no-op silencieux : pas de file d'attente, pas de retry.
 * - Exception : le status DISCONNECTING passe toujours (notification finale
 *   best-effort avant un arrêt volontaire).
 * - Échec d'envoi → loggé et avalé, le pipeline continue.
 */

use crate::alerts::AlertEvent;
use crate::pipeline::PassReport;
use crate::ports::{Clock, EventSink, SystemStatus, Transport, WeatherContext};
use crate::state::Connectivity;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    Telemetry,
    Alert,
    Status,
}

impl PublishKind {
    /// Suffixe du topic MQTT
    pub fn channel(&self) -> &'static str {
        match self {
            PublishKind::Telemetry => "telemetry",
            PublishKind::Alert => "alerts",
            PublishKind::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Connected,
    ShuttingDown,
    Disconnecting,
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Dropped,
    Failed,
}

/// Position du site, recopiée dans chaque message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub struct PublishGate {
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
    clock: Arc<dyn Clock>,
    device_id: String,
    location: SiteLocation,
    weather: Option<Arc<dyn WeatherContext>>,
    status: Option<Arc<dyn SystemStatus>>,
    started: Instant,
}

impl PublishGate {
    pub fn new(
        transport: Arc<dyn Transport>,
        connectivity: Connectivity,
        clock: Arc<dyn Clock>,
        device_id: impl Into<String>,
        location: SiteLocation,
    ) -> Self {
        Self {
            transport,
            connectivity,
            clock,
            device_id: device_id.into(),
            location,
            weather: None,
            status: None,
            started: Instant::now(),
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherContext>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_status(mut self, status: Arc<dyn SystemStatus>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    /// Publication générique : enveloppe `timestamp, device_id` + champs du payload
    pub fn publish(&self, kind: PublishKind, payload: Value) -> PublishOutcome {
        self.send(kind, payload, false)
    }

    pub fn publish_telemetry(&self, report: &PassReport) -> PublishOutcome {
        if !self.is_connected() {
            return PublishOutcome::Dropped;
        }

        let sensors: Map<String, Value> = report
            .samples
            .iter()
            .filter(|s| s.node_id == report.node_id)
            .map(|s| (s.sensor_key.to_string(), json!(s.raw_value)))
            .collect();
        let readings: Map<String, Value> = report
            .readings
            .iter()
            .map(|v| (v.sensor_key.to_string(), json!(v.value)))
            .collect();

        let mut payload = json!({
            "node_id": report.node_id,
            "node_kind": report.kind,
            "location": self.location,
            "sensors": sensors,
            "readings": readings,
            "analytics": report.analytics,
        });
        if let Some(weather) = self
            .weather
            .as_ref()
            .and_then(|w| w.lookup(self.location.lat, self.location.lng))
        {
            payload["weather"] = json!(weather);
        }

        let outcome = self.send(PublishKind::Telemetry, payload, false);
        if outcome == PublishOutcome::Sent {
            info!(node = %report.node_id, "telemetry published");
        }
        outcome
    }

    pub fn publish_alert(&self, event: &AlertEvent) -> PublishOutcome {
        if !self.is_connected() {
            return PublishOutcome::Dropped;
        }

        let mut payload = match serde_json::to_value(event) {
            Ok(v) => v,
            Err(e) => {
                warn!("alert {} not serializable: {}", event.alert_type, e);
                return PublishOutcome::Failed;
            }
        };
        payload["location"] = json!(self.location);

        let outcome = self.send(PublishKind::Alert, payload, false);
        if outcome == PublishOutcome::Sent {
            info!(alert = %event.alert_type, "alert published");
        }
        outcome
    }

    /// Status avec l'instantané système courant
    pub fn publish_status(&self, status: StatusKind) -> PublishOutcome {
        if status != StatusKind::Disconnecting && !self.is_connected() {
            debug!(status = ?status, "offline, status dropped");
            return PublishOutcome::Dropped;
        }
        let info = self.status.as_ref().map(|s| s.snapshot()).unwrap_or(Value::Null);
        self.publish_status_report(status, info)
    }

    pub fn publish_status_report(&self, status: StatusKind, system_info: Value) -> PublishOutcome {
        let payload = json!({
            "status": status,
            "system_info": system_info,
            "uptime": self.started.elapsed().as_secs(),
        });
        self.send(PublishKind::Status, payload, status == StatusKind::Disconnecting)
    }

    fn send(&self, kind: PublishKind, payload: Value, bypass_gate: bool) -> PublishOutcome {
        if !bypass_gate && !self.is_connected() {
            debug!(kind = kind.channel(), "offline, message dropped");
            return PublishOutcome::Dropped;
        }

        let payload = self.enrich(payload);
        if self.transport.send_outbound(kind, &payload) {
            PublishOutcome::Sent
        } else {
            warn!(kind = kind.channel(), "transport send failed");
            PublishOutcome::Failed
        }
    }

    fn enrich(&self, payload: Value) -> Value {
        let mut obj = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("payload".into(), other);
                map
            }
        };
        if !obj.contains_key("timestamp") {
            let now = self.clock.now().format(&Rfc3339).unwrap_or_default();
            obj.insert("timestamp".into(), Value::String(now));
        }
        obj.insert("device_id".into(), Value::String(self.device_id.clone()));
        Value::Object(obj)
    }
}

/// Sink cloud : télémétrie puis alertes de la passe, via le gate
pub struct CloudSink {
    gate: Arc<PublishGate>,
}

impl CloudSink {
    pub fn new(gate: Arc<PublishGate>) -> Self {
        Self { gate }
    }
}

impl EventSink for CloudSink {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn on_pass(&self, report: &PassReport) {
        self.gate.publish_telemetry(report);
        for alert in &report.alerts {
            self.gate.publish_alert(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(PublishKind, Value)>>,
        fail: bool,
    }

    impl Transport for Recorder {
        fn send_outbound(&self, kind: PublishKind, payload: &Value) -> bool {
            self.calls.lock().push((kind, payload.clone()));
            !self.fail
        }
    }

    fn gate(transport: Arc<Recorder>, connectivity: Connectivity) -> PublishGate {
        let location = SiteLocation { lat: 45.76, lng: 4.84, name: None };
        PublishGate::new(transport, connectivity, Arc::new(SystemClock::default()), "farm-01", location)
    }

    #[test]
    fn test_disconnected_publish_is_noop() {
        let transport = Arc::new(Recorder::default());
        let gate = gate(transport.clone(), Connectivity::new());
        assert_eq!(gate.publish(PublishKind::Alert, json!({"x": 1})), PublishOutcome::Dropped);
        assert_eq!(gate.publish_status(StatusKind::ShuttingDown), PublishOutcome::Dropped);
        assert!(transport.calls.lock().is_empty());
    }

    #[test]
    fn test_connected_publish_enriches_once() {
        let transport = Arc::new(Recorder::default());
        let connectivity = Connectivity::new();
        connectivity.mark_connected();
        let gate = gate(transport.clone(), connectivity);

        assert_eq!(gate.publish(PublishKind::Alert, json!({"x": 1})), PublishOutcome::Sent);
        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PublishKind::Alert);
        assert_eq!(calls[0].1["device_id"], "farm-01");
        assert_eq!(calls[0].1["x"], 1);
        assert!(calls[0].1["timestamp"].is_string());
    }

    #[test]
    fn test_disconnecting_status_bypasses_gate() {
        let transport = Arc::new(Recorder::default());
        let gate = gate(transport.clone(), Connectivity::new());
        assert_eq!(gate.publish_status(StatusKind::Disconnecting), PublishOutcome::Sent);
        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["status"], "DISCONNECTING");
    }

    #[derive(Default)]
    struct CountingStatus {
        snapshots: Mutex<u32>,
    }

    impl SystemStatus for CountingStatus {
        fn snapshot(&self) -> Value {
            *self.snapshots.lock() += 1;
            json!({"ok": true})
        }
    }

    #[test]
    fn test_offline_status_skips_snapshot() {
        let transport = Arc::new(Recorder::default());
        let status = Arc::new(CountingStatus::default());
        let gate = gate(transport.clone(), Connectivity::new()).with_status(status.clone());

        assert_eq!(gate.publish_status(StatusKind::ShuttingDown), PublishOutcome::Dropped);
        assert_eq!(*status.snapshots.lock(), 0);

        assert_eq!(gate.publish_status(StatusKind::Disconnecting), PublishOutcome::Sent);
        assert_eq!(*status.snapshots.lock(), 1);
        assert_eq!(transport.calls.lock()[0].1["system_info"]["ok"], true);
    }

    #[test]
    fn test_transport_failure_is_swallowed() {
        let transport = Arc::new(Recorder { fail: true, ..Default::default() });
        let connectivity = Connectivity::new();
        connectivity.mark_connected();
        let gate = gate(transport.clone(), connectivity);
        assert_eq!(gate.publish(PublishKind::Telemetry, json!(3)), PublishOutcome::Failed);
        assert_eq!(transport.calls.lock()[0].1["payload"], 3);
    }

    #[test]
    fn test_channels() {
        assert_eq!(PublishKind::Alert.channel(), "alerts");
        assert_eq!(PublishKind::Telemetry.channel(), "telemetry");
        assert_eq!(serde_json::to_value(StatusKind::ShuttingDown).unwrap(), "SHUTTING_DOWN");
    }
}
