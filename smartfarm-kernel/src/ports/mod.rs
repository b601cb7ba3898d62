/**
 * PORTS - Interfaces des collaborateurs externes du pipeline
 *
 * RÔLE :
 * Le cœur (normalizer → analytics → alertes → gate) ne parle jamais
 * directement au broker, à la liaison série ou à une API météo. Il passe par
 * ces traits, injectés au démarrage par le binaire et remplacés par des
 * mocks enregistreurs dans le devkit.
 *
 * FONCTIONNEMENT :
 * - Transport : envoi best-effort d'un payload JSON sur un canal (telemetry/alerts/status)
 * - Actuator : exécution d'une directive physique, succès signalé par le retour
 * - SystemStatus : instantané de santé du système (SYSTEM_QUERY, publications status)
 * - WeatherContext : enrichissement optionnel de la télémétrie
 * - EventSink : observateurs branchés sur chaque passe et chaque commande
 * - Clock : source de temps injectée (cooldowns, heure locale du site)
 */

pub mod journal;

use crate::commands::{ActuatorDirective, CommandRecord};
use crate::gate::PublishKind;
use crate::pipeline::PassReport;
use crate::weather::WeatherReport;
use async_trait::async_trait;
use time::{OffsetDateTime, UtcOffset};

/// Envoi sortant vers le broker. `false` = échec transport, jamais une panique.
pub trait Transport: Send + Sync {
    fn send_outbound(&self, kind: PublishKind, payload: &serde_json::Value) -> bool;
}

/// Exécution physique d'une directive (relais, portail, buzzer)
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn dispatch(&self, directive: &ActuatorDirective) -> bool;
}

pub trait SystemStatus: Send + Sync {
    fn snapshot(&self) -> serde_json::Value;
}

/// Contexte météo optionnel. `None` ne doit jamais bloquer une publication.
pub trait WeatherContext: Send + Sync {
    fn lookup(&self, lat: f64, lng: f64) -> Option<WeatherReport>;
}

/// Observateur du pipeline (cloud, journal local, registre des nœuds...)
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_pass(&self, _report: &PassReport) {}

    fn on_command(&self, _record: &CommandRecord) {}
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Horloge système, heure exprimée dans le fuseau du site
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    /// Décalage en heures ; hors plage (> ±25h) on retombe sur UTC
    pub fn with_offset_hours(hours: i8) -> Self {
        let offset = UtcOffset::from_hms(hours, 0, 0).unwrap_or(UtcOffset::UTC);
        Self::new(offset)
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_offset() {
        let clock = SystemClock::with_offset_hours(2);
        assert_eq!(clock.now().offset(), UtcOffset::from_hms(2, 0, 0).unwrap());
        assert_eq!(SystemClock::default().now().offset(), UtcOffset::UTC);
        assert_eq!(SystemClock::with_offset_hours(100).now().offset(), UtcOffset::UTC);
    }
}
