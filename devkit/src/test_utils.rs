/*!
Test Harness pour la borne simulée

Assemble une borne complète sans broker ni central system :
- `StandaloneStack` comme pile OCPP
- `MockMqttClient` comme client MQTT
- horloge manuelle, un tick = un appel explicite
*/

use crate::mqtt_stub::{ChargePointMessageBuilder, MockMqttClient};
use anyhow::Result;
use cp_simu_chargepoint::config::SimulatorConfig;
use cp_simu_chargepoint::models::{ChargePointStatusMessage, ConnectorStatus, ConnectorTelemetry};
use cp_simu_chargepoint::mqtt::{Command, Inbox};
use cp_simu_chargepoint::ocpp::OcppStack;
use cp_simu_chargepoint::{build_connectors, EventsHandler, SimulatedChargePoint, StandaloneStack};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Harness de test complet pour la borne
pub struct TestHarness {
    pub mqtt_client: MockMqttClient,
    pub stack: Arc<StandaloneStack>,
    pub events: Arc<EventsHandler>,
    pub inbox: Inbox,
    pub chargepoint: SimulatedChargePoint,
    messages: ChargePointMessageBuilder,
    identifier: String,
    now: Instant,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    topic: String,
    expected_count: usize,
}

impl TestHarness {
    /// Borne par défaut (1 connecteur AC triphasé, 32 A)
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    pub fn with_connectors(count: u32) -> Self {
        let mut config = SimulatorConfig::default();
        config.ocpp.number_of_connectors = count;
        Self::with_config(config)
    }

    pub fn with_config(config: SimulatorConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let identifier = config.charge_point.identifier.clone();
        let connectors = build_connectors(&config);
        let events = Arc::new(EventsHandler::new(
            connectors.iter().map(|c| c.meter.handle().clone()).collect(),
        ));
        let stack = Arc::new(StandaloneStack::new(events.clone(), config.standalone.clone()));
        let inbox = Inbox::new(&identifier, config.connector_count());
        let mqtt_client = MockMqttClient::new();
        let chargepoint = SimulatedChargePoint::new(
            config,
            connectors,
            stack.clone(),
            events.clone(),
            inbox.clone(),
            Arc::new(mqtt_client.clone()),
        );

        Self {
            mqtt_client,
            stack,
            events,
            inbox,
            chargepoint,
            messages: ChargePointMessageBuilder::new(identifier.clone()),
            identifier,
            now: Instant::now(),
            expectations: Vec::new(),
        }
    }

    /// Enregistre la borne auprès de la pile (BootNotification acceptée)
    pub fn boot(&mut self) -> &mut Self {
        self.stack.start();
        log::info!("🚀 Charge point {} registered", self.identifier);
        self
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn tick(&mut self) -> &mut Self {
        self.chargepoint.tick(self.now);
        self
    }

    pub fn ticks(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            self.tick();
        }
        self
    }

    /// Avance l'horloge puis exécute un tick
    pub fn advance(&mut self, duration: Duration) -> &mut Self {
        self.now += duration;
        self.tick()
    }

    fn send(&self, topic: String, payload: &Value) -> Result<Option<Command>> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(self.mqtt_client.simulate_incoming(&self.inbox, topic, bytes)?)
    }

    pub fn send_raw(&self, connector_id: u32, suffix: &str, payload: &[u8]) -> Result<()> {
        let topic = self.messages.connector_topic(connector_id, suffix);
        self.mqtt_client.simulate_incoming(&self.inbox, topic, payload.to_vec())?;
        Ok(())
    }

    /// Branche un véhicule
    pub fn plug(
        &self,
        connector_id: u32,
        cable: f32,
        ready: bool,
        consumption: [f32; 3],
    ) -> Result<()> {
        let payload = ChargePointMessageBuilder::car(cable, ready, consumption);
        self.send(self.messages.connector_topic(connector_id, "car"), &payload)?;
        log::info!("🔌 Car plugged on connector {} (cable {} A)", connector_id, cable);
        Ok(())
    }

    pub fn unplug(&self, connector_id: u32) -> Result<()> {
        let payload = ChargePointMessageBuilder::unplugged();
        self.send(self.messages.connector_topic(connector_id, "car"), &payload)?;
        Ok(())
    }

    pub fn set_car_ready(&self, connector_id: u32, ready: bool) -> Result<()> {
        let payload = ChargePointMessageBuilder::car_ready(ready);
        self.send(self.messages.connector_topic(connector_id, "car"), &payload)?;
        Ok(())
    }

    /// Présente un badge
    pub fn badge(&self, connector_id: u32, id_tag: &str) -> Result<()> {
        let payload = ChargePointMessageBuilder::id_tag(id_tag);
        self.send(self.messages.connector_topic(connector_id, "id_tag"), &payload)?;
        log::info!("🪪 Badge {} on connector {}", id_tag, connector_id);
        Ok(())
    }

    pub fn fault(&self, connector_id: u32, faulted: bool) -> Result<()> {
        let payload = ChargePointMessageBuilder::faulted(faulted);
        self.send(self.messages.connector_topic(connector_id, "faulted"), &payload)?;
        Ok(())
    }

    pub fn command(&self, kind: &str) -> Result<Option<Command>> {
        self.send(self.messages.cmd_topic(), &ChargePointMessageBuilder::command(kind))
    }

    /// Statut du connecteur tel que vu par la boucle de contrôle
    pub fn status(&self, connector_id: u32) -> Option<ConnectorStatus> {
        self.chargepoint.connector(connector_id).map(|c| c.status)
    }

    /// Statut du connecteur tel que tenu par la pile OCPP
    pub fn stack_status(&self, connector_id: u32) -> ConnectorStatus {
        self.stack.connector_status(connector_id)
    }

    pub fn connector_topic(&self, connector_id: u32) -> String {
        self.messages.connector_topic(connector_id, "status")
    }

    pub fn status_topic(&self) -> String {
        format!("cp_simu/cps/{}/status", self.identifier)
    }

    /// Dernière télémétrie publiée pour un connecteur
    pub fn telemetry(&self, connector_id: u32) -> Result<ConnectorTelemetry> {
        let topic = self.connector_topic(connector_id);
        self.mqtt_client
            .get_last_json_message(&topic)?
            .ok_or_else(|| anyhow::anyhow!("No telemetry published on {}", topic))
    }

    pub fn charge_point_status(&self) -> Result<ChargePointStatusMessage> {
        let topic = self.status_topic();
        self.mqtt_client
            .get_last_json_message(&topic)?
            .ok_or_else(|| anyhow::anyhow!("No status published on {}", topic))
    }

    /// Ajoute une expectation: on s'attend à N messages sur un topic
    pub fn expect_messages(&mut self, topic: &str, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            topic: topic.to_string(),
            expected_count: count,
        });
        self
    }

    /// Vérifie toutes les expectations configurées
    pub fn verify_expectations(&self) -> Result<()> {
        log::info!("🔍 Verifying {} expectations...", self.expectations.len());

        for expectation in &self.expectations {
            let actual_count = self.mqtt_client.find_messages_by_topic(&expectation.topic).len();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for topic '{}': expected {} messages, got {}",
                    expectation.topic, expectation.expected_count, actual_count
                );
            }
        }
        Ok(())
    }

    pub fn assert_status(&self, connector_id: u32, expected: ConnectorStatus) -> Result<()> {
        let telemetry = self.telemetry(connector_id)?;
        if telemetry.status != expected.as_str() {
            anyhow::bail!(
                "Connector {} status mismatch: expected {}, got {}",
                connector_id, expected, telemetry.status
            );
        }
        Ok(())
    }

    /// Assert qu'un champ a une valeur spécifique dans le dernier message d'un topic
    pub fn assert_field_equals(
        &self,
        topic: &str,
        field_path: &str,
        expected: &Value,
    ) -> Result<()> {
        if let Some(msg) = self.mqtt_client.get_last_json_message::<Value>(topic)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!(
                    "Field '{}' mismatch: expected {:?}, got {:?}",
                    field_path,
                    expected,
                    actual
                );
            }
        }
        anyhow::bail!("Field '{}' not found for comparison in {}", field_path, topic);
    }

    /// Vérifie les bornes des consignes de chaque connecteur.
    /// L'allocation précède la lecture des données véhicule : après un tick
    /// qui a reçu un nouveau câble, la borne `setpoint <= cable` ne vaut qu'au tick suivant.
    pub fn assert_setpoints_bounded(&self) -> Result<()> {
        for c in self.chargepoint.connectors() {
            let bounded = 0.0 <= c.setpoint
                && c.setpoint <= c.ocpp_setpoint
                && c.ocpp_setpoint <= c.max_setpoint
                && c.setpoint <= c.car_cable_capacity.max(0.0);
            if !bounded {
                anyhow::bail!(
                    "Connector {} setpoints out of bounds: setpoint={} ocpp={} max={} cable={}",
                    c.id, c.setpoint, c.ocpp_setpoint, c.max_setpoint, c.car_cable_capacity
                );
            }
        }
        Ok(())
    }

    /// Somme des consignes des connecteurs en charge
    pub fn charging_setpoint_sum(&self) -> f32 {
        self.chargepoint
            .connectors()
            .iter()
            .filter(|c| c.status == ConnectorStatus::Charging)
            .map(|c| c.setpoint)
            .sum()
    }

    /// Stats sur les messages collectés
    pub fn get_stats(&self) -> TestStats {
        let messages = self.mqtt_client.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            received_messages: self.mqtt_client.get_received_messages().len(),
            topic_counts,
        }
    }

    /// Reset les messages et expectations
    pub fn reset(&mut self) {
        self.mqtt_client.clear();
        self.expectations.clear();
        log::info!("🧹 Test harness reset");
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub received_messages: usize,
    pub topic_counts: HashMap<String, usize>,
}

impl TestStats {
    pub fn print(&self) {
        println!("📊 Test Statistics:");
        println!("  Published messages: {}", self.total_messages);
        println!("  Received messages: {}", self.received_messages);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
    }
}

/// Macro pour écrire un scénario de borne ; le corps reçoit `&mut TestHarness`
#[macro_export]
macro_rules! chargepoint_test {
    ($name:ident, $body:expr) => {
        #[test]
        fn $name() {
            use $crate::test_utils::TestHarness;

            let mut harness = TestHarness::new();
            harness.boot();
            let test_fn: fn(&mut TestHarness) -> anyhow::Result<()> = $body;

            match test_fn(&mut harness) {
                Ok(_) => {
                    harness.get_stats().print();
                    println!("✅ Test '{}' passed", stringify!($name));
                }
                Err(e) => {
                    eprintln!("❌ Test '{}' failed: {}", stringify!($name), e);
                    panic!("Test failed: {}", e);
                }
            }
        }
    };
}
