/*!
# CP Simu DevKit - Stubs et Utilitaires pour tester la borne simulée

Bibliothèque facilitant les tests de la borne avec:
- Stub MQTT (`Publisher`) pour tests sans broker
- Constructeur des messages entrants (véhicule, badge, défaut, commandes)
- Harness pilotant une borne complète tick par tick
*/

pub mod mqtt_stub;
pub mod test_utils;

#[cfg(test)]
mod scenarios;

pub use mqtt_stub::{ChargePointMessageBuilder, MockMqttClient};
pub use test_utils::TestHarness;
