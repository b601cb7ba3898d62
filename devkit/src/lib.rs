/*!
# Smartfarm DevKit - Stubs et Utilitaires de test

Bibliothèque facilitant les tests du kernel smartfarm avec:
- Transport et actionneur simulés (aucun broker, aucun contrôleur série)
- Horloge fixe pour piloter cooldowns et plages horaires
- Builders de mesures brutes et de commandes JSON
- Harness câblant le pipeline complet
*/

pub mod message_builders;
pub mod test_utils;
pub mod transport_stub;

pub use message_builders::{CommandBuilder, ReadingBuilder};
pub use test_utils::TestHarness;
pub use transport_stub::{FixedClock, MockActuator, RecordingTransport, StaticWeather};
