/**
 * MODÈLES - Types de données échangés dans le pipeline capteurs
 *
 * RÔLE : RawSample (mesure brute d'un nœud), CalibratedValue (valeur physique),
 * ReadingSet (jeu de mesures d'un nœud à un instant = unité d'analyse).
 *
 * FORMAT ENTRANT : `ReadingBatch` = `{node_id, readings: {"SOIL": 512, ...}, timestamp?}`
 * tel que livré par la couche transport (liaison série, API HTTP locale).
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::debug;

/// Capteurs connus des nœuds terrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorKey {
    Soil,
    Temp,
    Humid,
    Light,
    Pir,
    Gate,
    Relay,
    Buzzer,
}

impl SensorKey {
    pub const ALL: [SensorKey; 8] = [
        SensorKey::Soil,
        SensorKey::Temp,
        SensorKey::Humid,
        SensorKey::Light,
        SensorKey::Pir,
        SensorKey::Gate,
        SensorKey::Relay,
        SensorKey::Buzzer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKey::Soil => "SOIL",
            SensorKey::Temp => "TEMP",
            SensorKey::Humid => "HUMID",
            SensorKey::Light => "LIGHT",
            SensorKey::Pir => "PIR",
            SensorKey::Gate => "GATE",
            SensorKey::Relay => "RELAY",
            SensorKey::Buzzer => "BUZZER",
        }
    }

    /// Capteurs tout-ou-rien (0/1, sans unité)
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            SensorKey::Pir | SensorKey::Gate | SensorKey::Relay | SensorKey::Buzzer
        )
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor key: {0}")]
pub struct UnknownSensorKey(pub String);

impl FromStr for SensorKey {
    type Err = UnknownSensorKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        SensorKey::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(key))
            .ok_or_else(|| UnknownSensorKey(key.to_string()))
    }
}

/// Type de nœud, détermine le jeu de règles d'alerte appliqué
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Garden,
    Security,
    #[default]
    Generic,
}

/// Mesure brute telle que reçue du nœud. Immuable une fois capturée.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSample {
    pub node_id: String,
    pub sensor_key: SensorKey,
    pub raw_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl RawSample {
    pub fn new(node_id: impl Into<String>, sensor_key: SensorKey, raw_value: f64, timestamp: OffsetDateTime) -> Self {
        Self {
            node_id: node_id.into(),
            sensor_key,
            raw_value,
            timestamp,
        }
    }
}

/// Valeur calibrée en unité physique, toujours bornée à la plage valide du capteur
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibratedValue {
    pub sensor_key: SensorKey,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
}

/// Jeu de mesures calibrées d'un nœud à un instant donné
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingSet {
    pub node_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub values: BTreeMap<SensorKey, CalibratedValue>,
}

impl ReadingSet {
    pub fn new(node_id: impl Into<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Insère (ou remplace) la valeur d'un capteur
    pub fn insert(&mut self, value: CalibratedValue) {
        self.values.insert(value.sensor_key, value);
    }

    pub fn get(&self, key: SensorKey) -> Option<f64> {
        self.values.get(&key).map(|v| v.value)
    }

    pub fn contains(&self, key: SensorKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CalibratedValue> {
        self.values.values()
    }
}

/// Lot de mesures brutes entrant (transport série / API HTTP)
#[derive(Debug, Clone, Deserialize)]
pub struct ReadingBatch {
    pub node_id: String,
    pub readings: BTreeMap<String, f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl ReadingBatch {
    /// Convertit le lot en RawSamples. Les clés inconnues sont ignorées, pas rejetées.
    pub fn into_samples(self, received_at: OffsetDateTime) -> Vec<RawSample> {
        let ts = self.timestamp.unwrap_or(received_at);
        let node_id = self.node_id;
        self.readings
            .into_iter()
            .filter_map(|(key, raw)| match key.parse::<SensorKey>() {
                Ok(sensor_key) => Some(RawSample::new(node_id.clone(), sensor_key, raw, ts)),
                Err(e) => {
                    debug!(node = %node_id, "skipping reading: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_sensor_key_parsing() {
        assert_eq!("SOIL".parse::<SensorKey>().unwrap(), SensorKey::Soil);
        assert_eq!(" humid ".parse::<SensorKey>().unwrap(), SensorKey::Humid);
        assert!("CO2".parse::<SensorKey>().is_err());
    }

    #[test]
    fn test_batch_skips_unknown_keys() {
        let batch: ReadingBatch = serde_json::from_str(
            r#"{"node_id":"NODE1","readings":{"SOIL":600,"TEMP":24.5,"CO2":410}}"#,
        )
        .unwrap();
        let samples = batch.into_samples(datetime!(2025-06-01 10:00 UTC));
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.node_id == "NODE1"));
        assert!(samples.iter().any(|s| s.sensor_key == SensorKey::Temp && s.raw_value == 24.5));
    }

    #[test]
    fn test_batch_keeps_node_timestamp() {
        let batch: ReadingBatch = serde_json::from_str(
            r#"{"node_id":"NODE2","readings":{"PIR":1},"timestamp":"2025-06-01T08:30:00Z"}"#,
        )
        .unwrap();
        let samples = batch.into_samples(datetime!(2025-06-01 10:00 UTC));
        assert_eq!(samples[0].timestamp, datetime!(2025-06-01 08:30 UTC));
    }

    #[test]
    fn test_reading_set_serializes_by_key() {
        let mut set = ReadingSet::new("NODE1", datetime!(2025-06-01 10:00 UTC));
        set.insert(CalibratedValue { sensor_key: SensorKey::Temp, value: 25.0, unit: Some("celsius") });
        set.insert(CalibratedValue { sensor_key: SensorKey::Pir, value: 1.0, unit: None });
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["values"]["TEMP"]["unit"], "celsius");
        assert!(json["values"]["PIR"].get("unit").is_none());
        assert_eq!(set.get(SensorKey::Temp), Some(25.0));
        assert!(!set.contains(SensorKey::Soil));
    }
}
