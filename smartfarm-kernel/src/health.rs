/**
 * HEALTH - Compteurs de santé du kernel et instantané système
 *
 * RÔLE : HealthTracker (uptime, état MQTT, reconnexions, passes, alertes,
 * commandes) branché comme EventSink ; KernelStatus assemble l'instantané
 * SystemStatus servi aux SYSTEM_QUERY, aux publications status et à /status.
 */

use crate::alerts::AlertEngine;
use crate::commands::CommandRecord;
use crate::nodes::NodeRegistry;
use crate::pipeline::PassReport;
use crate::ports::{EventSink, SystemStatus};
use crate::state::Connectivity;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub passes_processed: u64,
    pub alerts_emitted: u64,
    pub commands_handled: u64,
    pub commands_failed: u64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    passes: Arc<AtomicU64>,
    alerts: Arc<AtomicU64>,
    commands: Arc<AtomicU64>,
    commands_failed: Arc<AtomicU64>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
            passes: Arc::new(AtomicU64::new(0)),
            alerts: Arc::new(AtomicU64::new(0)),
            commands: Arc::new(AtomicU64::new(0)),
            commands_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn mark_mqtt_disabled(&self) {
        *self.mqtt_status.lock() = "disabled".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            passes_processed: self.passes.load(Ordering::Relaxed),
            alerts_emitted: self.alerts.load(Ordering::Relaxed),
            commands_handled: self.commands.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for HealthTracker {
    fn name(&self) -> &'static str {
        "health"
    }

    fn on_pass(&self, report: &PassReport) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.alerts.fetch_add(report.alerts.len() as u64, Ordering::Relaxed);
    }

    fn on_command(&self, record: &CommandRecord) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if !record.success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Instantané système complet (SYSTEM_QUERY get_status, GET /status)
pub struct KernelStatus {
    device_id: String,
    endpoint: String,
    health: HealthTracker,
    connectivity: Connectivity,
    nodes: NodeRegistry,
    engine: Arc<AlertEngine>,
}

impl KernelStatus {
    pub fn new(
        device_id: impl Into<String>,
        endpoint: impl Into<String>,
        health: HealthTracker,
        connectivity: Connectivity,
        nodes: NodeRegistry,
        engine: Arc<AlertEngine>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            endpoint: endpoint.into(),
            health,
            connectivity,
            nodes,
            engine,
        }
    }
}

impl SystemStatus for KernelStatus {
    fn snapshot(&self) -> serde_json::Value {
        let nodes: Vec<_> = self
            .nodes
            .list()
            .into_iter()
            .map(|n| {
                serde_json::json!({
                    "node_id": n.node_id,
                    "kind": n.kind,
                    "sensors": n.readings.len(),
                    "last_seen": n.readings.timestamp
                        .format(&time::format_description::well_known::Rfc3339)
                        .unwrap_or_default(),
                })
            })
            .collect();

        serde_json::json!({
            "device_id": self.device_id,
            "health": self.health.get_health(),
            "broker": {
                "connected": self.connectivity.is_connected(),
                "endpoint": self.endpoint,
                "thing_name": self.device_id,
            },
            "nodes": nodes,
            "alert_fire_counts": self.engine.fire_counts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandSource;
    use time::macros::datetime;

    #[test]
    fn test_counters_follow_events() {
        let health = HealthTracker::new();
        health.increment_reconnects();
        health.on_command(&CommandRecord {
            command_id: "c1".into(),
            source: CommandSource::Cloud,
            command: "RELAY:1".into(),
            success: false,
            timestamp: datetime!(2025-06-01 10:00 UTC),
        });
        let h = health.get_health();
        assert_eq!(h.mqtt_reconnects, 1);
        assert_eq!(h.mqtt_status, "reconnecting");
        assert_eq!(h.commands_handled, 1);
        assert_eq!(h.commands_failed, 1);

        health.mark_mqtt_connected();
        assert_eq!(health.get_health().mqtt_status, "connected");
    }

    #[test]
    fn test_snapshot_shape() {
        let connectivity = Connectivity::new();
        connectivity.mark_connected();
        let status = KernelStatus::new(
            "farm-01",
            "broker.local:8883",
            HealthTracker::new(),
            connectivity,
            NodeRegistry::new(),
            Arc::new(AlertEngine::default()),
        );
        let snap = status.snapshot();
        assert_eq!(snap["device_id"], "farm-01");
        assert_eq!(snap["broker"]["connected"], true);
        assert_eq!(snap["health"]["mqtt_status"], "connecting");
        assert!(snap["nodes"].as_array().unwrap().is_empty());
    }
}
