/*!
Test Harness pour le kernel smartfarm

Assemble le pipeline complet (gate, moteur d'alertes, commandes, sinks) sur
des collaborateurs simulés :
- connectivité pilotée par le test (connect / disconnect)
- horloge fixe qu'on fait avancer
- assertions sur les messages sortis du publish gate
*/

use crate::message_builders::ReadingBuilder;
use crate::transport_stub::{FixedClock, MockActuator, RecordingTransport};
use anyhow::Result;
use serde_json::Value;
use smartfarm_kernel::commands::{CommandOutcome, CommandRequest, CommandService, CommandSource};
use smartfarm_kernel::gate::SiteLocation;
use smartfarm_kernel::health::{HealthTracker, KernelStatus};
use smartfarm_kernel::nodes::NodeRegistry;
use smartfarm_kernel::pipeline::apply_automation;
use smartfarm_kernel::ports::WeatherContext;
use smartfarm_kernel::{
    AlertEngine, AlertSettings, CloudSink, Connectivity, PassReport, Pipeline, PublishGate, PublishKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use time::Duration;

pub const TEST_DEVICE_ID: &str = "farm-test";

/// Harness complet : même câblage que le binaire, sans réseau
pub struct TestHarness {
    pub transport: RecordingTransport,
    pub actuator: MockActuator,
    pub clock: FixedClock,
    pub connectivity: Connectivity,
    pub nodes: NodeRegistry,
    pub health: HealthTracker,
    pub engine: Arc<AlertEngine>,
    pub gate: Arc<PublishGate>,
    pub pipeline: Arc<Pipeline>,
    pub commands: Arc<CommandService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(AlertSettings::default(), None)
    }

    pub fn with_settings(settings: AlertSettings) -> Self {
        Self::build(settings, None)
    }

    pub fn with_weather(weather: Arc<dyn WeatherContext>) -> Self {
        Self::build(AlertSettings::default(), Some(weather))
    }

    fn build(settings: AlertSettings, weather: Option<Arc<dyn WeatherContext>>) -> Self {
        env_logger::try_init().ok();

        let transport = RecordingTransport::new();
        let actuator = MockActuator::new();
        let clock = FixedClock::default();
        let connectivity = Connectivity::new();
        let nodes = NodeRegistry::new();
        let health = HealthTracker::new();
        let engine = Arc::new(AlertEngine::new(settings));

        let status = Arc::new(KernelStatus::new(
            TEST_DEVICE_ID,
            "mock-broker:1883",
            health.clone(),
            connectivity.clone(),
            nodes.clone(),
            engine.clone(),
        ));

        let location = SiteLocation {
            lat: 45.76,
            lng: 4.84,
            name: Some("Test plot".into()),
        };
        let mut gate = PublishGate::new(
            Arc::new(transport.clone()),
            connectivity.clone(),
            Arc::new(clock.clone()),
            TEST_DEVICE_ID,
            location,
        )
        .with_status(status.clone());
        if let Some(weather) = weather {
            gate = gate.with_weather(weather);
        }
        let gate = Arc::new(gate);

        let pipeline = Pipeline::new(engine.clone(), Arc::new(clock.clone()))
            .with_sink(Arc::new(nodes.clone()))
            .with_sink(Arc::new(health.clone()))
            .with_sink(Arc::new(CloudSink::new(gate.clone())));
        let commands = CommandService::new(
            Arc::new(actuator.clone()),
            gate.clone(),
            status,
            Arc::new(clock.clone()),
        )
        .with_sink(Arc::new(health.clone()));

        Self {
            transport,
            actuator,
            clock,
            connectivity,
            nodes,
            health,
            engine,
            gate,
            pipeline: Arc::new(pipeline),
            commands: Arc::new(commands),
        }
    }

    /// Simule le callback de connexion du transport
    pub fn connect(&self) -> &Self {
        self.connectivity.mark_connected();
        self.health.mark_mqtt_connected();
        self
    }

    pub fn disconnect(&self) -> &Self {
        self.connectivity.mark_disconnected();
        self.health.mark_mqtt_disconnected();
        self
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// Une passe pipeline complète, automatisation comprise
    pub async fn feed(&self, reading: &ReadingBuilder) -> PassReport {
        let report = self.pipeline.process_batch(reading.batch());
        apply_automation(&self.pipeline, &self.commands, &report).await;
        log::info!("🌱 Fed {} ({} alerts)", report.node_id, report.alerts.len());
        report
    }

    /// Commande entrante ; `None` si le payload est rejeté au parsing
    pub async fn command(&self, payload: Value, source: CommandSource) -> Option<CommandOutcome> {
        let request = CommandRequest::from_value(payload, || "unknown".to_string())?;
        Some(self.commands.handle(&request, source).await)
    }

    pub fn last_of(&self, kind: PublishKind) -> Option<Value> {
        self.transport.sent_of(kind).pop()
    }

    /// Assert qu'un champ du dernier message d'un canal a une valeur donnée
    pub fn assert_field_equals(&self, kind: PublishKind, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.last_of(kind) else {
            anyhow::bail!("no {} message published", kind.channel());
        };
        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => {
                log::info!("✅ Field '{}' = {:?} on {}", field_path, expected, kind.channel());
                Ok(())
            }
            Some(actual) => anyhow::bail!(
                "Field '{}' mismatch: expected {:?}, got {:?}",
                field_path,
                expected,
                actual
            ),
            None => anyhow::bail!("Field '{}' not found on {}", field_path, kind.channel()),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut channel_counts = HashMap::new();
        for msg in self.transport.sent() {
            *channel_counts.entry(msg.kind.channel().to_string()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: self.transport.count(),
            channel_counts,
            actuator_lines: self.actuator.lines(),
        }
    }

    pub fn reset(&self) {
        self.transport.clear();
        log::info!("🧹 Test harness reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub channel_counts: HashMap<String, usize>,
    pub actuator_lines: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_harness_basic_functionality() {
        let harness = TestHarness::new();
        harness.connect();

        harness.feed(&ReadingBuilder::garden().temp(22.0).humid(50.0)).await;

        harness
            .assert_field_equals(PublishKind::Telemetry, "node_id", &json!("NODE1"))
            .unwrap();
        harness
            .assert_field_equals(PublishKind::Telemetry, "device_id", &json!(TEST_DEVICE_ID))
            .unwrap();
        harness
            .assert_field_equals(PublishKind::Telemetry, "analytics.environmental.comfort_index", &json!("optimal"))
            .unwrap();
        assert!(harness
            .assert_field_equals(PublishKind::Telemetry, "analytics.soil_analysis", &json!(null))
            .is_err());

        let stats = harness.get_stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.channel_counts["telemetry"], 1);

        harness.reset();
        assert_eq!(harness.transport.count(), 0);
    }

    #[test]
    fn test_nested_field_lookup() {
        let v = json!({"a": {"b": {"c": 3}}});
        assert_eq!(get_nested_field(&v, "a.b.c"), Some(&json!(3)));
        assert!(get_nested_field(&v, "a.x").is_none());
        assert!(get_nested_field(&v, "a.b.c.d").is_none());
    }
}
