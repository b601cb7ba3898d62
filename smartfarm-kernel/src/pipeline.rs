/**
 * PIPELINE - Passe complète ingest → normalize → analyze → evaluate → sinks
 *
 * RÔLE : Orchestration d'une passe par jeu de mesures d'un nœud. Les
 * observateurs (cloud, journal, registre des nœuds, santé) sont branchés
 * comme EventSinks et ne sont jamais connus de la logique d'évaluation.
 *
 * CONCURRENCE : un seul worker d'ingestion consomme la file des lots, les
 * passes d'un même nœud sont donc sérialisées. Les commandes ont leur propre
 * worker (état disjoint).
 */

use crate::alerts::{AlertEngine, AlertEvent, AlertType};
use crate::analytics::{analyze, AnalyticsResult};
use crate::commands::{ActuatorDirective, CommandService, CommandSource};
use crate::models::{NodeKind, RawSample, ReadingBatch, ReadingSet};
use crate::normalizer::normalize_set;
use crate::ports::{Clock, EventSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Résultat d'une passe, remis à chaque sink
#[derive(Debug, Clone)]
pub struct PassReport {
    pub node_id: String,
    pub kind: NodeKind,
    pub samples: Vec<RawSample>,
    pub readings: ReadingSet,
    pub analytics: AnalyticsResult,
    pub alerts: Vec<AlertEvent>,
}

pub struct Pipeline {
    engine: Arc<AlertEngine>,
    sinks: Vec<Arc<dyn EventSink>>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(engine: Arc<AlertEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            sinks: Vec::new(),
            clock,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        debug!("pipeline sink registered: {}", sink.name());
        self.sinks.push(sink);
        self
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn process(&self, node_id: &str, samples: Vec<RawSample>) -> PassReport {
        let now = self.clock.now();
        let readings = normalize_set(node_id, &samples, now);
        let analytics = analyze(&readings);
        let alerts = self.engine.evaluate(node_id, &readings, &analytics, now);

        let report = PassReport {
            node_id: node_id.to_string(),
            kind: self.engine.settings().node_kind(node_id),
            samples,
            readings,
            analytics,
            alerts,
        };

        for sink in &self.sinks {
            sink.on_pass(&report);
        }
        report
    }

    pub fn process_batch(&self, batch: ReadingBatch) -> PassReport {
        let node_id = batch.node_id.clone();
        let samples = batch.into_samples(self.clock.now());
        self.process(&node_id, samples)
    }

    /// Directives déclenchées automatiquement par les alertes de la passe
    pub fn automation_directives(&self, report: &PassReport) -> Vec<ActuatorDirective> {
        if !self.engine.settings().auto_irrigation {
            return Vec::new();
        }
        report
            .alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::CriticalSoilMoisture)
            .map(|_| ActuatorDirective::irrigation_on())
            .take(1)
            .collect()
    }
}

/// Exécute les directives automatiques d'une passe via le service de commandes
pub async fn apply_automation(pipeline: &Pipeline, commands: &CommandService, report: &PassReport) -> usize {
    let mut executed = 0;
    for directive in pipeline.automation_directives(report) {
        let id = format!("auto-{}", Uuid::new_v4());
        info!(node = %report.node_id, "automation: {}", directive);
        if commands.dispatch(directive, CommandSource::Automation, &id).await {
            executed += 1;
        }
    }
    executed
}

/// Worker d'ingestion : une passe à la fois, dans l'ordre de la file
pub fn spawn_ingest_worker(
    pipeline: Arc<Pipeline>,
    commands: Arc<CommandService>,
    mut rx: mpsc::Receiver<ReadingBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let report = pipeline.process_batch(batch);
            debug!(
                node = %report.node_id,
                readings = report.readings.len(),
                alerts = report.alerts.len(),
                "pass complete"
            );
            apply_automation(&pipeline, &commands, &report).await;
        }
        debug!("ingest queue closed");
    })
}
