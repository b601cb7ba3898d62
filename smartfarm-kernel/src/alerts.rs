/**
 * ALERT RULE ENGINE - Évaluation des règles d'alerte par type de nœud
 *
 * RÔLE : Transforme analytics + mesures calibrées en 0..n AlertEvent, avec
 * un état par clé (node_id, alert_type) pour les cooldowns.
 *
 * FONCTIONNEMENT :
 * - Nœud garden : cascade exclusive (sol critique → stress thermique → conditions
 *   optimales), première règle satisfaite = fin de la cascade. Lumière faible en
 *   journée évaluée à part, toujours.
 * - Nœud security : mouvement et portail ouvert, indépendants.
 * - Une règle en erreur (capteur manquant) est sautée, les suivantes tournent.
 * - Cooldown = intervalle minimal entre deux déclenchements d'une même clé.
 */

use crate::analytics::AnalyticsResult;
use crate::models::{NodeKind, ReadingSet, SensorKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

pub const CRITICAL_SOIL_BELOW: f64 = 15.0;
pub const HIGH_TEMPERATURE_ABOVE: f64 = 38.0;
pub const LOW_LIGHT_BELOW: f64 = 20.0;
pub const DEFAULT_OPTIMAL_COOLDOWN_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    CriticalSoilMoisture,
    HighTemperatureStress,
    OptimalConditions,
    LowLightWarning,
    MotionDetected,
    GateStatus,
    CommandExecuted,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::CriticalSoilMoisture => "CRITICAL_SOIL_MOISTURE",
            AlertType::HighTemperatureStress => "HIGH_TEMPERATURE_STRESS",
            AlertType::OptimalConditions => "OPTIMAL_CONDITIONS",
            AlertType::LowLightWarning => "LOW_LIGHT_WARNING",
            AlertType::MotionDetected => "MOTION_DETECTED",
            AlertType::GateStatus => "GATE_STATUS",
            AlertType::CommandExecuted => "COMMAND_EXECUTED",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AlertType::CriticalSoilMoisture,
            AlertType::HighTemperatureStress,
            AlertType::OptimalConditions,
            AlertType::LowLightWarning,
            AlertType::MotionDetected,
            AlertType::GateStatus,
            AlertType::CommandExecuted,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| format!("unknown alert type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Événement d'alerte, immuable une fois créé
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub alert_type: AlertType,
    pub message: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AlertEvent {
    /// Accusé d'exécution d'une directive actionneur (hors moteur de règles)
    pub fn command_executed(command: &str, source: &str, timestamp: OffsetDateTime) -> Self {
        Self {
            alert_type: AlertType::CommandExecuted,
            message: format!("Actuator command executed: {command}"),
            severity: Severity::Info,
            node_id: None,
            data: json!({
                "command": command,
                "source": source,
                "status": "success",
            }),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AlertRuleState {
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_fired_at: Option<OffsetDateTime>,
    pub fire_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("{rule}: missing input {sensor}")]
    MissingInput { rule: AlertType, sensor: SensorKey },
}

/// Paramètres du moteur, issus de la config kernel
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub cooldowns: HashMap<AlertType, Duration>,
    pub node_kinds: HashMap<String, NodeKind>,
    pub perimeter_label: String,
    pub auto_irrigation: bool,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            cooldowns: HashMap::from([(
                AlertType::OptimalConditions,
                Duration::seconds(DEFAULT_OPTIMAL_COOLDOWN_SECS),
            )]),
            node_kinds: HashMap::from([
                ("NODE1".to_string(), NodeKind::Garden),
                ("NODE2".to_string(), NodeKind::Security),
            ]),
            perimeter_label: "Farm perimeter".to_string(),
            auto_irrigation: true,
        }
    }
}

impl AlertSettings {
    pub fn cooldown_for(&self, alert_type: AlertType) -> Duration {
        self.cooldowns.get(&alert_type).copied().unwrap_or(Duration::ZERO)
    }

    pub fn node_kind(&self, node_id: &str) -> NodeKind {
        self.node_kinds.get(node_id).copied().unwrap_or_default()
    }
}

/// Alerte candidate, avant passage par le cooldown
struct Candidate {
    alert_type: AlertType,
    severity: Severity,
    message: String,
    data: Value,
}

struct RuleContext<'a> {
    node_id: &'a str,
    readings: &'a ReadingSet,
    analytics: &'a AnalyticsResult,
    settings: &'a AlertSettings,
    hour: u8,
}

impl RuleContext<'_> {
    fn require(&self, rule: AlertType, sensor: SensorKey) -> Result<f64, RuleError> {
        self.readings
            .get(sensor)
            .ok_or(RuleError::MissingInput { rule, sensor })
    }
}

type Rule = fn(&RuleContext<'_>) -> Result<Option<Candidate>, RuleError>;

const GARDEN_CASCADE: [Rule; 3] = [critical_soil, high_temperature, optimal_conditions];
const GARDEN_INDEPENDENT: [Rule; 1] = [low_light];
const SECURITY_RULES: [Rule; 2] = [motion, gate_open];

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn critical_soil(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let soil = ctx
        .analytics
        .soil_analysis
        .as_ref()
        .map(|s| s.moisture_percent)
        .ok_or(RuleError::MissingInput {
            rule: AlertType::CriticalSoilMoisture,
            sensor: SensorKey::Soil,
        })?;

    if soil >= CRITICAL_SOIL_BELOW {
        return Ok(None);
    }

    Ok(Some(Candidate {
        alert_type: AlertType::CriticalSoilMoisture,
        severity: Severity::Critical,
        message: format!("CRITICAL: Soil moisture critically low at {soil:.1}%"),
        data: json!({
            "soil_moisture": round1(soil),
            "node_id": ctx.node_id,
            "recommended_action": "Immediate irrigation required",
            "auto_irrigation": if ctx.settings.auto_irrigation { "activated" } else { "disabled" },
        }),
    }))
}

/// Approximation grossière de l'indice de chaleur
pub fn heat_index(temp: f64, humidity: Option<f64>) -> f64 {
    match humidity {
        Some(h) if h > 40.0 => temp + 0.5 * (h - 40.0),
        _ => temp,
    }
}

fn high_temperature(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let temp = ctx.require(AlertType::HighTemperatureStress, SensorKey::Temp)?;
    if temp <= HIGH_TEMPERATURE_ABOVE {
        return Ok(None);
    }
    let humidity = ctx.readings.get(SensorKey::Humid);

    Ok(Some(Candidate {
        alert_type: AlertType::HighTemperatureStress,
        severity: Severity::Warning,
        message: format!("WARNING: High temperature stress at {temp:.1}°C"),
        data: json!({
            "temperature": temp,
            "humidity": humidity,
            "heat_index": round1(heat_index(temp, humidity)),
            "node_id": ctx.node_id,
            "recommended_action": "Increase irrigation frequency",
        }),
    }))
}

fn optimal_conditions(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let rule = AlertType::OptimalConditions;
    let temp = ctx.require(rule, SensorKey::Temp)?;
    let humidity = ctx.require(rule, SensorKey::Humid)?;
    let soil = ctx.require(rule, SensorKey::Soil)?;

    let optimal = (20.0..=30.0).contains(&temp) && (40.0..=70.0).contains(&humidity) && soil > 40.0;
    if !optimal {
        return Ok(None);
    }

    let mut data = json!({
        "temperature": temp,
        "humidity": humidity,
        "soil_moisture": round1(soil),
        "node_id": ctx.node_id,
        "status": "optimal",
    });
    if let Some(light) = ctx.readings.get(SensorKey::Light) {
        data["light_level"] = json!(light);
    }

    Ok(Some(Candidate {
        alert_type: rule,
        severity: Severity::Info,
        message: format!(
            "Optimal growing conditions: Temp {temp:.1}°C, Humidity {humidity:.1}%, Soil {soil:.1}%"
        ),
        data,
    }))
}

fn low_light(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let light = ctx.require(AlertType::LowLightWarning, SensorKey::Light)?;
    if !(6..=18).contains(&ctx.hour) || light >= LOW_LIGHT_BELOW {
        return Ok(None);
    }

    Ok(Some(Candidate {
        alert_type: AlertType::LowLightWarning,
        severity: Severity::Warning,
        message: format!("Low light levels during daytime: {light:.1}%"),
        data: json!({
            "light_level": light,
            "hour": ctx.hour,
            "node_id": ctx.node_id,
            "recommended_action": "Check for obstructions or weather conditions",
        }),
    }))
}

fn motion(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let detected = ctx
        .analytics
        .security
        .as_ref()
        .map(|s| s.motion_detected)
        .ok_or(RuleError::MissingInput {
            rule: AlertType::MotionDetected,
            sensor: SensorKey::Pir,
        })?;
    if !detected {
        return Ok(None);
    }

    let mut data = json!({
        "motion_detected": true,
        "node_id": ctx.node_id,
        "location": ctx.settings.perimeter_label,
        "recommended_action": "Check security cameras if available",
    });
    if let Some(gate) = ctx.readings.get(SensorKey::Gate) {
        data["gate_status"] = json!(if gate == 1.0 { "open" } else { "closed" });
    }

    Ok(Some(Candidate {
        alert_type: AlertType::MotionDetected,
        severity: Severity::Warning,
        message: "Security Alert: Motion detected in monitored area".to_string(),
        data,
    }))
}

fn gate_open(ctx: &RuleContext<'_>) -> Result<Option<Candidate>, RuleError> {
    let gate = ctx.require(AlertType::GateStatus, SensorKey::Gate)?;
    if gate != 1.0 {
        return Ok(None);
    }

    Ok(Some(Candidate {
        alert_type: AlertType::GateStatus,
        severity: Severity::Info,
        message: "Gate is currently open".to_string(),
        data: json!({
            "gate_status": "open",
            "node_id": ctx.node_id,
            "security_level": "reduced",
        }),
    }))
}

/// Moteur de règles. Seul propriétaire des AlertRuleState.
pub struct AlertEngine {
    settings: AlertSettings,
    state: Mutex<HashMap<(String, AlertType), AlertRuleState>>,
}

impl AlertEngine {
    pub fn new(settings: AlertSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }

    /// Évalue les règles du nœud. Ne retourne jamais d'erreur : une règle en
    /// échec est journalisée puis ignorée.
    pub fn evaluate(
        &self,
        node_id: &str,
        readings: &ReadingSet,
        analytics: &AnalyticsResult,
        now: OffsetDateTime,
    ) -> Vec<AlertEvent> {
        let ctx = RuleContext {
            node_id,
            readings,
            analytics,
            settings: &self.settings,
            hour: now.hour(),
        };

        let mut events = Vec::new();
        match self.settings.node_kind(node_id) {
            NodeKind::Garden => {
                for rule in GARDEN_CASCADE {
                    match rule(&ctx) {
                        Ok(Some(candidate)) => {
                            events.extend(self.fire(node_id, candidate, now));
                            break;
                        }
                        Ok(None) => {}
                        Err(e) => debug!(node = node_id, "rule skipped: {}", e),
                    }
                }
                self.run_independent(&ctx, &GARDEN_INDEPENDENT, now, &mut events);
            }
            NodeKind::Security => self.run_independent(&ctx, &SECURITY_RULES, now, &mut events),
            NodeKind::Generic => {}
        }
        events
    }

    fn run_independent(&self, ctx: &RuleContext<'_>, rules: &[Rule], now: OffsetDateTime, events: &mut Vec<AlertEvent>) {
        for rule in rules {
            match rule(ctx) {
                Ok(Some(candidate)) => events.extend(self.fire(ctx.node_id, candidate, now)),
                Ok(None) => {}
                Err(e) => debug!(node = ctx.node_id, "rule skipped: {}", e),
            }
        }
    }

    /// Applique le cooldown de la clé et crée l'événement si autorisé
    fn fire(&self, node_id: &str, candidate: Candidate, now: OffsetDateTime) -> Option<AlertEvent> {
        let cooldown = self.settings.cooldown_for(candidate.alert_type);
        let mut state = self.state.lock();
        let entry = state
            .entry((node_id.to_string(), candidate.alert_type))
            .or_default();

        // horloge revenue en arrière : le cooldown est considéré expiré
        if let Some(last) = entry.last_fired_at.filter(|_| cooldown > Duration::ZERO) {
            let elapsed = now - last;
            if elapsed >= Duration::ZERO && elapsed < cooldown {
                debug!(node = node_id, alert = %candidate.alert_type, "suppressed by cooldown");
                return None;
            }
        }

        entry.last_fired_at = Some(now);
        entry.fire_count += 1;
        info!(node = node_id, alert = %candidate.alert_type, "alert fired: {}", candidate.message);

        Some(AlertEvent {
            alert_type: candidate.alert_type,
            message: candidate.message,
            severity: candidate.severity,
            node_id: Some(node_id.to_string()),
            data: candidate.data,
            timestamp: now,
        })
    }

    pub fn rule_state(&self, node_id: &str, alert_type: AlertType) -> Option<AlertRuleState> {
        self.state.lock().get(&(node_id.to_string(), alert_type)).copied()
    }

    /// Compteurs de déclenchement par `NODE/ALERT_TYPE`, pour l'instantané status
    pub fn fire_counts(&self) -> Value {
        let state = self.state.lock();
        let mut entries: Vec<_> = state.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let map: serde_json::Map<String, Value> = entries
            .into_iter()
            .map(|((node, alert), st)| (format!("{node}/{alert}"), json!(st.fire_count)))
            .collect();
        Value::Object(map)
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(AlertSettings::default())
    }
}
