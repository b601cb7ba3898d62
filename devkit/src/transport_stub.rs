/*!
Collaborateurs simulés pour tester le kernel sans broker ni contrôleur

- RecordingTransport : enregistre chaque envoi du publish gate
- MockActuator : enregistre les lignes envoyées, succès configurable
- FixedClock : horloge pilotée par le test
- StaticWeather : météo figée
*/

use async_trait::async_trait;
use serde_json::Value;
use smartfarm_kernel::commands::ActuatorDirective;
use smartfarm_kernel::ports::{Actuator, Clock, Transport, WeatherContext};
use smartfarm_kernel::weather::WeatherReport;
use smartfarm_kernel::PublishKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: PublishKind,
    pub payload: Value,
}

/// Transport qui garde tous les messages reçus du gate
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les envois suivants échouent (mais restent enregistrés)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_of(&self, kind: PublishKind) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Alertes envoyées, par `alert_type`
    pub fn alerts_of_type(&self, alert_type: &str) -> Vec<Value> {
        self.sent_of(PublishKind::Alert)
            .into_iter()
            .filter(|p| p["alert_type"] == alert_type)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn send_outbound(&self, kind: PublishKind, payload: &Value) -> bool {
        log::info!("📤 [MOCK] {} message: {}", kind.channel(), payload);
        self.sent.lock().unwrap().push(SentMessage {
            kind,
            payload: payload.clone(),
        });
        !self.failing.load(Ordering::SeqCst)
    }
}

/// Actionneur simulé : mémorise les lignes `RELAY:1`, `GATE:OPEN`...
#[derive(Clone)]
pub struct MockActuator {
    lines: Arc<Mutex<Vec<String>>>,
    succeed: Arc<AtomicBool>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            succeed: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn dispatch(&self, directive: &ActuatorDirective) -> bool {
        self.lines.lock().unwrap().push(directive.to_line().to_string());
        log::info!("🔌 [MOCK] actuator <- {}", directive);
        self.succeed.load(Ordering::SeqCst)
    }
}

/// Horloge de test, 2025-06-01 10:00 UTC par défaut
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl FixedClock {
    pub fn at(now: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(datetime!(2025-06-01 10:00 UTC))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

pub struct StaticWeather(pub Option<WeatherReport>);

impl StaticWeather {
    pub fn sunny() -> Self {
        Self(Some(WeatherReport {
            temperature: 24.0,
            humidity: 45.0,
            description: "clear sky".into(),
            pressure: 1015.0,
            wind_speed: 2.1,
        }))
    }
}

impl WeatherContext for StaticWeather {
    fn lookup(&self, _lat: f64, _lng: f64) -> Option<WeatherReport> {
        self.0.clone()
    }
}
