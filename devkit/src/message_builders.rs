/*!
Builders de messages pour les tests

ReadingBuilder produit des lots de mesures *brutes* à partir de valeurs
physiques lisibles (le sol est donné en pourcentage et reconverti en valeur
de sonde). CommandBuilder produit les payloads JSON de commande.
*/

use serde_json::{json, Value};
use smartfarm_kernel::normalizer::{SOIL_RAW_DRY, SOIL_RAW_SPAN};
use smartfarm_kernel::ReadingBatch;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Valeur brute de sonde correspondant à un pourcentage d'humidité du sol
pub fn soil_raw_for_percent(percent: f64) -> f64 {
    SOIL_RAW_DRY - percent / 100.0 * SOIL_RAW_SPAN
}

#[derive(Debug, Clone)]
pub struct ReadingBuilder {
    node_id: String,
    readings: BTreeMap<String, f64>,
    timestamp: Option<OffsetDateTime>,
}

impl ReadingBuilder {
    pub fn node(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            readings: BTreeMap::new(),
            timestamp: None,
        }
    }

    pub fn garden() -> Self {
        Self::node("NODE1")
    }

    pub fn security() -> Self {
        Self::node("NODE2")
    }

    pub fn raw(mut self, key: &str, value: f64) -> Self {
        self.readings.insert(key.to_string(), value);
        self
    }

    pub fn soil_percent(self, percent: f64) -> Self {
        self.raw("SOIL", soil_raw_for_percent(percent))
    }

    pub fn temp(self, celsius: f64) -> Self {
        self.raw("TEMP", celsius)
    }

    pub fn humid(self, percent: f64) -> Self {
        self.raw("HUMID", percent)
    }

    pub fn light(self, percent: f64) -> Self {
        self.raw("LIGHT", percent)
    }

    pub fn motion(self, detected: bool) -> Self {
        self.raw("PIR", if detected { 1.0 } else { 0.0 })
    }

    pub fn gate_open(self, open: bool) -> Self {
        self.raw("GATE", if open { 1.0 } else { 0.0 })
    }

    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Conditions optimales : 25°C, 55%, sol 60%, lumière 80%
    pub fn optimal_garden() -> Self {
        Self::garden().temp(25.0).humid(55.0).soil_percent(60.0).light(80.0)
    }

    pub fn batch(&self) -> ReadingBatch {
        ReadingBatch {
            node_id: self.node_id.clone(),
            readings: self.readings.clone(),
            timestamp: self.timestamp,
        }
    }
}

pub struct CommandBuilder;

impl CommandBuilder {
    pub fn actuator(id: &str, actuator: &str, action: &str) -> Value {
        json!({ "id": id, "type": "actuator", "actuator": actuator, "action": action })
    }

    pub fn actuator_without_id(actuator: &str, action: &str) -> Value {
        json!({ "type": "actuator", "actuator": actuator, "action": action })
    }

    pub fn get_status(id: &str) -> Value {
        json!({ "id": id, "type": "system", "action": "get_status" })
    }
}
