/*!
Mock MQTT Client pour tester la borne sans broker

Implémente `Publisher` : enregistre tous les messages publiés par la borne et
permet de simuler les messages entrants (véhicule, badge, défaut, commandes)
en les injectant directement dans l'`Inbox`.
*/

use anyhow::Result;
use cp_simu_chargepoint::mqtt::{BusError, Command, Inbox, Publisher};
use cp_simu_chargepoint::state::{new_state, Shared};
use rumqttc::QoS;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client, même contrat que `MqttManager`
#[derive(Clone)]
pub struct MockMqttClient {
    published_messages: Shared<Vec<MockMessage>>,
    received_messages: Shared<Vec<MockMessage>>,
    connected: Arc<AtomicBool>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            published_messages: new_state(Vec::new()),
            received_messages: new_state(Vec::new()),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simule une coupure (ou un retour) du broker : les publications échouent
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        log::info!("🔌 [MOCK] Broker {}", if connected { "reachable" } else { "unreachable" });
    }

    /// Simule la réception d'un message et le transmet à l'inbox de la borne
    pub fn simulate_incoming<S, V>(
        &self,
        inbox: &Inbox,
        topic: S,
        payload: V,
    ) -> Result<Option<Command>, BusError>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        self.received_messages.lock().push(message.clone());

        log::info!("📨 [MOCK] Simulated incoming: {}", message.topic);
        inbox.handle_message(&message.topic, &message.payload)
    }

    /// Récupère tous les messages publiés (pour assertions de tests)
    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn get_received_messages(&self) -> Vec<MockMessage> {
        self.received_messages.lock().clone()
    }

    /// Trouve les messages publiés sur un topic donné
    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse le dernier message d'un topic en JSON
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    /// Reset tous les messages enregistrés
    pub fn clear(&self) {
        self.published_messages.lock().clear();
        self.received_messages.lock().clear();
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for MockMqttClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        if !self.is_connected() {
            log::warn!("📤 [MOCK] Dropped publish to {}: broker unreachable", topic);
            return false;
        }
        log::debug!("📤 [MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().push(MockMessage {
            topic: topic.to_string(),
            payload,
            qos: QoS::AtMostOnce,
            retain,
        });
        true
    }
}

/// Helper pour créer les messages entrants d'une borne (`cp_simu/cps/<id>/...`)
pub struct ChargePointMessageBuilder {
    base_topic: String,
}

impl ChargePointMessageBuilder {
    pub fn new<S: Into<String>>(charge_point_id: S) -> Self {
        Self {
            base_topic: format!("cp_simu/cps/{}", charge_point_id.into()),
        }
    }

    pub fn cmd_topic(&self) -> String {
        format!("{}/cmd", self.base_topic)
    }

    pub fn connector_topic(&self, connector_id: u32, suffix: &str) -> String {
        format!("{}/connectors/{}/{}", self.base_topic, connector_id, suffix)
    }

    /// Véhicule branché : capacité du câble, état prêt, consommation par phase
    pub fn car(cable: f32, ready: bool, consumption: [f32; 3]) -> Value {
        serde_json::json!({
            "cable": cable,
            "ready": ready,
            "consumption_l1": consumption[0],
            "consumption_l2": consumption[1],
            "consumption_l3": consumption[2]
        })
    }

    pub fn unplugged() -> Value {
        serde_json::json!({ "cable": 0 })
    }

    pub fn car_ready(ready: bool) -> Value {
        serde_json::json!({ "ready": ready })
    }

    pub fn id_tag<S: Into<String>>(id: S) -> Value {
        serde_json::json!({ "id": id.into() })
    }

    pub fn faulted(faulted: bool) -> Value {
        serde_json::json!({ "faulted": faulted })
    }

    pub fn command<S: Into<String>>(kind: S) -> Value {
        serde_json::json!({ "type": kind.into() })
    }
}
