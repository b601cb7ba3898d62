/**
 * NORMALIZER - Mesures brutes des nœuds → valeurs physiques calibrées
 *
 * RÔLE : Conversion totale, jamais en échec. Valeur hors plage → bornée à la
 * plage valide du capteur ; NaN → borne basse. Un capteur bruité n'interrompt
 * jamais une passe du pipeline.
 */

use crate::models::{CalibratedValue, RawSample, ReadingSet, SensorKey};
use time::OffsetDateTime;

/// Valeur ADC de la sonde dans un sol complètement sec
pub const SOIL_RAW_DRY: f64 = 1023.0;
/// Écart ADC entre sol sec et sol saturé
pub const SOIL_RAW_SPAN: f64 = 723.0;

/// Plage physique valide de chaque capteur, bornes incluses
pub fn valid_range(key: SensorKey) -> (f64, f64) {
    match key {
        SensorKey::Soil | SensorKey::Humid | SensorKey::Light => (0.0, 100.0),
        // plage de fonctionnement DHT22
        SensorKey::Temp => (-40.0, 80.0),
        SensorKey::Pir | SensorKey::Gate | SensorKey::Relay | SensorKey::Buzzer => (0.0, 1.0),
    }
}

pub fn unit_for(key: SensorKey) -> Option<&'static str> {
    match key {
        SensorKey::Soil | SensorKey::Humid | SensorKey::Light => Some("percent"),
        SensorKey::Temp => Some("celsius"),
        _ => None,
    }
}

/// Convertit une valeur brute en valeur calibrée pour `key`
pub fn normalize(key: SensorKey, raw: f64) -> CalibratedValue {
    let (min, max) = valid_range(key);

    let value = match key {
        // sonde inversée : brut élevé = plus sec
        SensorKey::Soil => (SOIL_RAW_DRY - raw) / SOIL_RAW_SPAN * 100.0,
        SensorKey::Temp | SensorKey::Humid | SensorKey::Light => raw,
        SensorKey::Pir | SensorKey::Gate | SensorKey::Relay | SensorKey::Buzzer => {
            if raw >= 0.5 {
                1.0
            } else {
                0.0
            }
        }
    };

    let value = if value.is_nan() { min } else { value.clamp(min, max) };

    CalibratedValue {
        sensor_key: key,
        value,
        unit: unit_for(key),
    }
}

pub fn normalize_sample(sample: &RawSample) -> CalibratedValue {
    normalize(sample.sensor_key, sample.raw_value)
}

/// ReadingSet d'un nœud à partir de ses échantillons. Un échantillon plus
/// récent du même capteur remplace le précédent ; ceux d'un autre nœud sont
/// ignorés.
pub fn normalize_set(node_id: &str, samples: &[RawSample], fallback_ts: OffsetDateTime) -> ReadingSet {
    let timestamp = samples
        .iter()
        .filter(|s| s.node_id == node_id)
        .map(|s| s.timestamp)
        .max()
        .unwrap_or(fallback_ts);

    let mut set = ReadingSet::new(node_id, timestamp);
    for sample in samples.iter().filter(|s| s.node_id == node_id) {
        set.insert(normalize_sample(sample));
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    #[test]
    fn test_soil_reference_points() {
        assert_eq!(normalize(SensorKey::Soil, 1023.0).value, 0.0);
        assert_eq!(normalize(SensorKey::Soil, 300.0).value, 100.0);
        // 1023 - 661.5 = 361.5 -> pile la moitié de l'écart
        assert!((normalize(SensorKey::Soil, 661.5).value - 50.0).abs() < 1e-9);
        assert_eq!(normalize(SensorKey::Soil, 0.0).value, 100.0);
        assert_eq!(normalize(SensorKey::Soil, 2000.0).value, 0.0);
    }

    #[test]
    fn test_pass_through_sensors() {
        let t = normalize(SensorKey::Temp, 24.6);
        assert_eq!(t.value, 24.6);
        assert_eq!(t.unit, Some("celsius"));
        assert_eq!(normalize(SensorKey::Humid, 55.0).value, 55.0);
        assert_eq!(normalize(SensorKey::Light, 140.0).value, 100.0);
        assert_eq!(normalize(SensorKey::Light, -3.0).value, 0.0);
        assert_eq!(normalize(SensorKey::Temp, 120.0).value, 80.0);
    }

    #[test]
    fn test_boolean_sensors() {
        assert_eq!(normalize(SensorKey::Pir, 1.0).value, 1.0);
        assert_eq!(normalize(SensorKey::Pir, 0.0).value, 0.0);
        assert_eq!(normalize(SensorKey::Gate, 7.0).value, 1.0);
        assert_eq!(normalize(SensorKey::Gate, -1.0).value, 0.0);
        assert_eq!(normalize(SensorKey::Pir, 1.0).unit, None);
    }

    #[test]
    fn test_nan_maps_to_lower_bound() {
        assert_eq!(normalize(SensorKey::Soil, f64::NAN).value, 0.0);
        assert_eq!(normalize(SensorKey::Temp, f64::NAN).value, -40.0);
        assert_eq!(normalize(SensorKey::Pir, f64::NAN).value, 0.0);
        assert_eq!(normalize(SensorKey::Humid, f64::INFINITY).value, 100.0);
    }

    #[test]
    fn test_normalize_set_last_sample_wins() {
        let ts = datetime!(2025-06-01 10:00 UTC);
        let samples = vec![
            RawSample::new("NODE1", SensorKey::Temp, 21.0, ts),
            RawSample::new("NODE1", SensorKey::Temp, 22.5, ts),
            RawSample::new("NODE2", SensorKey::Pir, 1.0, ts),
        ];
        let set = normalize_set("NODE1", &samples, ts);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(SensorKey::Temp), Some(22.5));
        assert!(!set.contains(SensorKey::Pir));
    }

    proptest! {
        #[test]
        fn prop_soil_percent_in_range(raw in 0.0f64..=1023.0) {
            let v = normalize(SensorKey::Soil, raw).value;
            prop_assert!((0.0..=100.0).contains(&v));
        }

        #[test]
        fn prop_soil_monotonically_decreasing(a in 0.0f64..=1023.0, b in 0.0f64..=1023.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(normalize(SensorKey::Soil, lo).value >= normalize(SensorKey::Soil, hi).value);
        }

        #[test]
        fn prop_every_sensor_clamped(raw in proptest::num::f64::ANY, idx in 0usize..8) {
            let key = SensorKey::ALL[idx];
            let (min, max) = valid_range(key);
            let v = normalize(key, raw).value;
            prop_assert!(v >= min && v <= max);
        }
    }
}
