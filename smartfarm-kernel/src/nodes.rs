/**
 * NODE REGISTRY - Dernier jeu de mesures connu par nœud
 *
 * RÔLE : EventSink qui garde la passe la plus récente de chaque nœud (pas
 * d'historique), lue par l'instantané status et l'API HTTP locale.
 * Vue HTTP : `stale` si aucune mesure depuis plus de 90s.
 */

use crate::analytics::AnalyticsResult;
use crate::models::{NodeKind, ReadingSet};
use crate::pipeline::PassReport;
use crate::ports::EventSink;
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};

pub const STALE_AFTER_SECS: i64 = 90;

#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub kind: NodeKind,
    pub readings: ReadingSet,
    pub analytics: AnalyticsResult,
    pub alerts_last_pass: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub kind: NodeKind,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    pub stale: bool,
    pub stale_for_seconds: i64,
    pub readings: ReadingSet,
    pub analytics: AnalyticsResult,
    pub alerts_last_pass: usize,
}

impl NodeSnapshot {
    pub fn view(&self, now: OffsetDateTime) -> NodeView {
        let age = now - self.readings.timestamp;
        NodeView {
            node_id: self.node_id.clone(),
            kind: self.kind,
            last_seen: self.readings.timestamp,
            stale: age > Duration::seconds(STALE_AFTER_SECS),
            stale_for_seconds: age.whole_seconds().max(0),
            readings: self.readings.clone(),
            analytics: self.analytics.clone(),
            alerts_last_pass: self.alerts_last_pass,
        }
    }
}

#[derive(Clone, Default)]
pub struct NodeRegistry {
    latest: Shared<HashMap<String, NodeSnapshot>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            latest: new_state(HashMap::new()),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.latest.lock().get(node_id).cloned()
    }

    /// Nœuds triés par identifiant
    pub fn list(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<_> = self.latest.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.latest.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for NodeRegistry {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn on_pass(&self, report: &PassReport) {
        // une passe vide n'écrase pas la dernière mesure connue
        if report.readings.is_empty() {
            return;
        }
        let snapshot = NodeSnapshot {
            node_id: report.node_id.clone(),
            kind: report.kind,
            readings: report.readings.clone(),
            analytics: report.analytics.clone(),
            alerts_last_pass: report.alerts.len(),
        };
        self.latest.lock().insert(report.node_id.clone(), snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::analyze;
    use crate::models::SensorKey;
    use crate::normalizer::normalize;
    use time::macros::datetime;

    fn report(node: &str, at: OffsetDateTime, temp: Option<f64>) -> PassReport {
        let mut readings = ReadingSet::new(node, at);
        if let Some(t) = temp {
            readings.insert(normalize(SensorKey::Temp, t));
        }
        PassReport {
            node_id: node.into(),
            kind: NodeKind::Garden,
            samples: Vec::new(),
            analytics: analyze(&readings),
            readings,
            alerts: Vec::new(),
        }
    }

    #[test]
    fn test_keeps_only_latest() {
        let registry = NodeRegistry::new();
        let t0 = datetime!(2025-06-01 10:00 UTC);
        registry.on_pass(&report("NODE1", t0, Some(20.0)));
        registry.on_pass(&report("NODE1", t0 + Duration::seconds(5), Some(21.0)));
        registry.on_pass(&report("NODE1", t0 + Duration::seconds(10), None));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("NODE1").unwrap().readings.get(SensorKey::Temp), Some(21.0));
    }

    #[test]
    fn test_stale_view() {
        let registry = NodeRegistry::new();
        let t0 = datetime!(2025-06-01 10:00 UTC);
        registry.on_pass(&report("NODE2", t0, Some(18.0)));
        registry.on_pass(&report("NODE1", t0, Some(18.0)));
        let list = registry.list();
        assert_eq!(list[0].node_id, "NODE1");

        let fresh = list[0].view(t0 + Duration::seconds(30));
        assert!(!fresh.stale);
        let old = list[0].view(t0 + Duration::seconds(120));
        assert!(old.stale);
        assert_eq!(old.stale_for_seconds, 120);
    }
}
