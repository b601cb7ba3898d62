/**
 * ANALYTICS - Indicateurs dérivés d'un ReadingSet
 *
 * RÔLE : Fonction pure. Un sous-bloc (sol, environnement, sécurité) n'existe
 * que si tous les capteurs dont il a besoin sont présents ; des données
 * partielles ne font jamais échouer l'analyse.
 */

use crate::models::{ReadingSet, SensorKey};
use serde::Serialize;

pub const SOIL_DRY_BELOW: f64 = 30.0;
pub const SOIL_WET_ABOVE: f64 = 70.0;
pub const HEAT_STRESS_ABOVE: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilCondition {
    Dry,
    Optimal,
    Wet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComfortIndex {
    Optimal,
    Acceptable,
    Stress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    High,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SoilAnalysis {
    pub moisture_percent: f64,
    pub condition: SoilCondition,
    pub irrigation_recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Environmental {
    pub temperature_celsius: f64,
    pub humidity_percent: f64,
    pub comfort_index: ComfortIndex,
    pub heat_stress: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Security {
    pub motion_detected: bool,
    pub alert_level: AlertLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_analysis: Option<SoilAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environmental: Option<Environmental>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
}

impl AnalyticsResult {
    pub fn is_empty(&self) -> bool {
        self.soil_analysis.is_none() && self.environmental.is_none() && self.security.is_none()
    }
}

pub fn soil_condition(moisture: f64) -> SoilCondition {
    if moisture < SOIL_DRY_BELOW {
        SoilCondition::Dry
    } else if moisture > SOIL_WET_ABOVE {
        SoilCondition::Wet
    } else {
        SoilCondition::Optimal
    }
}

/// Confort des plantes d'après température et humidité de l'air
pub fn comfort_index(temp: f64, humidity: f64) -> ComfortIndex {
    if (20.0..=30.0).contains(&temp) && (40.0..=70.0).contains(&humidity) {
        ComfortIndex::Optimal
    } else if (15.0..=35.0).contains(&temp) && (30.0..=80.0).contains(&humidity) {
        ComfortIndex::Acceptable
    } else {
        ComfortIndex::Stress
    }
}

pub fn analyze(readings: &ReadingSet) -> AnalyticsResult {
    let soil_analysis = readings.get(SensorKey::Soil).map(|moisture| SoilAnalysis {
        moisture_percent: moisture,
        condition: soil_condition(moisture),
        irrigation_recommended: moisture < SOIL_DRY_BELOW,
    });

    let environmental = match (readings.get(SensorKey::Temp), readings.get(SensorKey::Humid)) {
        (Some(temp), Some(humidity)) => Some(Environmental {
            temperature_celsius: temp,
            humidity_percent: humidity,
            comfort_index: comfort_index(temp, humidity),
            heat_stress: temp > HEAT_STRESS_ABOVE,
        }),
        _ => None,
    };

    let security = readings.get(SensorKey::Pir).map(|pir| {
        let motion = pir == 1.0;
        Security {
            motion_detected: motion,
            alert_level: if motion { AlertLevel::High } else { AlertLevel::Normal },
        }
    });

    AnalyticsResult {
        soil_analysis,
        environmental,
        security,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use time::macros::datetime;

    fn set(values: &[(SensorKey, f64)]) -> ReadingSet {
        let mut set = ReadingSet::new("NODE1", datetime!(2025-06-01 10:00 UTC));
        for (key, raw) in values {
            set.insert(normalize(*key, *raw));
        }
        set
    }

    #[test]
    fn test_soil_condition_bands() {
        assert_eq!(soil_condition(10.0), SoilCondition::Dry);
        assert_eq!(soil_condition(29.9), SoilCondition::Dry);
        assert_eq!(soil_condition(30.0), SoilCondition::Optimal);
        assert_eq!(soil_condition(70.0), SoilCondition::Optimal);
        assert_eq!(soil_condition(70.1), SoilCondition::Wet);
    }

    #[test]
    fn test_comfort_index_bands() {
        assert_eq!(comfort_index(25.0, 55.0), ComfortIndex::Optimal);
        assert_eq!(comfort_index(20.0, 70.0), ComfortIndex::Optimal);
        assert_eq!(comfort_index(33.0, 55.0), ComfortIndex::Acceptable);
        assert_eq!(comfort_index(25.0, 75.0), ComfortIndex::Acceptable);
        assert_eq!(comfort_index(36.0, 55.0), ComfortIndex::Stress);
        assert_eq!(comfort_index(25.0, 20.0), ComfortIndex::Stress);
    }

    #[test]
    fn test_full_garden_set() {
        // brut 1023 - 0.2 * 723 = 878.4 -> 20% d'humidité
        let result = analyze(&set(&[
            (SensorKey::Soil, 878.4),
            (SensorKey::Temp, 36.0),
            (SensorKey::Humid, 50.0),
        ]));
        let soil = result.soil_analysis.unwrap();
        assert_eq!(soil.condition, SoilCondition::Dry);
        assert!(soil.irrigation_recommended);
        let env = result.environmental.unwrap();
        assert!(env.heat_stress);
        assert_eq!(env.comfort_index, ComfortIndex::Stress);
        assert!(result.security.is_none());
    }

    #[test]
    fn test_missing_sensors_omit_sub_records() {
        let result = analyze(&set(&[(SensorKey::Temp, 25.0)]));
        assert!(result.is_empty());

        let json = serde_json::to_value(analyze(&set(&[(SensorKey::Pir, 1.0)]))).unwrap();
        assert_eq!(json["security"]["alert_level"], "high");
        assert!(json.get("soil_analysis").is_none());
        assert!(json.get("environmental").is_none());
    }

    #[test]
    fn test_analyze_is_pure() {
        let readings = set(&[(SensorKey::Soil, 500.0), (SensorKey::Pir, 0.0)]);
        assert_eq!(analyze(&readings), analyze(&readings));
        assert_eq!(analyze(&readings).security.unwrap().alert_level, AlertLevel::Normal);
    }
}
