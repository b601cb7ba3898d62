/**
 * SMARTFARM KERNEL - Pipeline capteurs → analytics → alertes → publication
 *
 * RÔLE : Bibliothèque du cœur (normalisation, analytics, règles d'alerte,
 * traduction de commandes, publish gate) et des adaptateurs (MQTT, HTTP,
 * météo, liaison actionneurs, journal local) assemblés par le binaire.
 */

pub mod actuator;
pub mod alerts;
pub mod analytics;
pub mod commands;
pub mod config;
pub mod gate;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod nodes;
pub mod normalizer;
pub mod pipeline;
pub mod ports;
pub mod state;
pub mod weather;

pub use alerts::{AlertEngine, AlertEvent, AlertSettings, AlertType, Severity};
pub use analytics::{analyze, AnalyticsResult};
pub use commands::{translate, ActuatorDirective, CommandRequest, CommandService, CommandSource, Translation};
pub use gate::{CloudSink, PublishGate, PublishKind, PublishOutcome, StatusKind};
pub use models::{NodeKind, RawSample, ReadingBatch, ReadingSet, SensorKey};
pub use normalizer::normalize;
pub use pipeline::{PassReport, Pipeline};
pub use state::Connectivity;
