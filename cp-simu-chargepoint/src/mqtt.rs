//! MQTT side-channel of the simulator.
//!
//! Incoming messages (car, id tag, fault, commands) are decoded by [`Inbox`]
//! into a per-connector staging buffer that the control loop copies once per
//! tick. Outgoing telemetry goes through the [`Publisher`] trait so the loop
//! can be driven by the real broker client ([`MqttManager`]) or by a mock.

use crate::models::{CarUpdate, CommandIn, FaultUpdate, IdTagUpdate};
use crate::state::{connector_index, per_connector, Shared};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const TOPIC_ROOT: &str = "cp_simu/cps";
pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("topic outside of this charge point: {0}")]
    ForeignTopic(String),
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("invalid connector in topic: {0}")]
    InvalidConnector(String),
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid cable capacity: {0}")]
    CableCapacity(f32),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid broker url: {0}")]
    BrokerUrl(String),
}

/// Sortie de télémétrie
pub trait Publisher: Send + Sync {
    fn is_connected(&self) -> bool;
    /// `false` si le message n'a pas pu être mis en file
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool;
}

/// Noms des topics d'une borne
#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(charge_point_id: &str) -> Self {
        Self { base: format!("{TOPIC_ROOT}/{charge_point_id}/") }
    }

    pub fn status(&self) -> String {
        format!("{}status", self.base)
    }

    pub fn cmd(&self) -> String {
        format!("{}cmd", self.base)
    }

    pub fn ocpp_config(&self) -> String {
        format!("{}ocpp_config", self.base)
    }

    pub fn connector_status(&self, connector_id: u32) -> String {
        format!("{}connectors/{connector_id}/status", self.base)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.cmd(),
            format!("{}connectors/+/car", self.base),
            format!("{}connectors/+/id_tag", self.base),
            format!("{}connectors/+/faulted", self.base),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Close,
    OcppConfig,
}

/// Entrées MQTT en attente pour un connecteur
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedInputs {
    /// Cumul des mises à jour véhicule reçues
    pub car: CarUpdate,
    pub faulted: bool,
    pub id_tag: Option<String>,
}

/// Tampon partagé entre la tâche MQTT et la boucle de contrôle
#[derive(Clone)]
pub struct Inbox {
    topics: Topics,
    slots: Shared<Vec<StagedInputs>>,
    end: Arc<AtomicBool>,
}

impl Inbox {
    pub fn new(charge_point_id: &str, connector_count: usize) -> Self {
        Self {
            topics: Topics::new(charge_point_id),
            slots: per_connector(connector_count),
            end: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Décode un message entrant ; un message invalide est ignoré en entier
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Option<Command>, BusError> {
        let rest = topic
            .strip_prefix(self.topics.base.as_str())
            .ok_or_else(|| BusError::ForeignTopic(topic.to_string()))?;

        if rest == "cmd" {
            let cmd: CommandIn = serde_json::from_slice(payload)?;
            return match cmd.kind.as_str() {
                "close" => {
                    info!("close command received");
                    self.request_end();
                    Ok(Some(Command::Close))
                }
                "ocpp_config" => Ok(Some(Command::OcppConfig)),
                other => Err(BusError::UnknownCommand(other.to_string())),
            };
        }

        let mut parts = rest.split('/');
        let (Some("connectors"), Some(number), Some(kind), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(BusError::UnknownTopic(topic.to_string()));
        };
        let mut slots = self.slots.lock();
        let index = number
            .parse::<u32>()
            .ok()
            .and_then(|id| connector_index(id, slots.len()))
            .ok_or_else(|| BusError::InvalidConnector(topic.to_string()))?;

        match kind {
            "car" => {
                let update: CarUpdate = serde_json::from_slice(payload)?;
                if let Some(cable) = update.cable.filter(|c| !c.is_finite() || *c < 0.0) {
                    return Err(BusError::CableCapacity(cable));
                }
                merge_car(&mut slots[index].car, update);
            }
            "id_tag" => {
                let update: IdTagUpdate = serde_json::from_slice(payload)?;
                slots[index].id_tag = (!update.id.is_empty()).then_some(update.id);
            }
            "faulted" => {
                let update: FaultUpdate = serde_json::from_slice(payload)?;
                slots[index].faulted = update.faulted;
            }
            _ => return Err(BusError::UnknownTopic(topic.to_string())),
        }
        debug!(topic, "connector data updated");
        Ok(None)
    }

    /// Copie des entrées, un élément par connecteur
    pub fn snapshot(&self) -> Vec<StagedInputs> {
        self.slots.lock().clone()
    }

    /// Acquitte le badge du connecteur s'il n'a pas été remplacé entre-temps
    pub fn consume_id_tag(&self, connector_id: u32, id_tag: &str) {
        let mut slots = self.slots.lock();
        if let Some(index) = connector_index(connector_id, slots.len()) {
            if slots[index].id_tag.as_deref() == Some(id_tag) {
                slots[index].id_tag = None;
            }
        }
    }

    pub fn request_end(&self) {
        self.end.store(true, Ordering::Relaxed);
    }

    pub fn is_end_of_application(&self) -> bool {
        self.end.load(Ordering::Relaxed)
    }
}

fn merge_car(into: &mut CarUpdate, update: CarUpdate) {
    if update.cable.is_some() {
        into.cable = update.cable;
    }
    if update.ready.is_some() {
        into.ready = update.ready;
    }
    if update.consumption_l1.is_some() {
        into.consumption_l1 = update.consumption_l1;
    }
    if update.consumption_l2.is_some() {
        into.consumption_l2 = update.consumption_l2;
    }
    if update.consumption_l3.is_some() {
        into.consumption_l3 = update.consumption_l3;
    }
}

/// `tcp://host:port`, `mqtt://host` ou `host[:port]`
pub fn parse_broker_url(url: &str) -> Result<(String, u16), BusError> {
    let address = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url)
        .trim_end_matches('/');
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (
            host,
            port.parse::<u16>().map_err(|_| BusError::BrokerUrl(url.to_string()))?,
        ),
        None => (address, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() {
        return Err(BusError::BrokerUrl(url.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Paramètres de connexion au broker
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub broker_url: String,
    pub keep_alive: Duration,
    pub retry_delay: Duration,
    /// Statut publié par le broker si la connexion est perdue
    pub last_will: Vec<u8>,
    /// Contenu du topic `ocpp_config`
    pub ocpp_config: BTreeMap<String, String>,
}

/// Client MQTT réel (rumqttc) : boucle d'événements dans sa propre tâche,
/// reconnexion avec délai fixe, réabonnement à chaque ConnAck
pub struct MqttManager {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MqttManager {
    pub fn spawn(settings: MqttSettings, inbox: Inbox) -> Result<Self, BusError> {
        let (host, port) = parse_broker_url(&settings.broker_url)?;
        let topics = inbox.topics().clone();

        let mut opts = MqttOptions::new(settings.client_id.clone(), host, port);
        opts.set_keep_alive(settings.keep_alive);
        opts.set_last_will(LastWill::new(
            topics.status(),
            settings.last_will.clone(),
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        let connected = Arc::new(AtomicBool::new(false));

        let task_client = client.clone();
        let task_connected = connected.clone();
        info!(broker = %settings.broker_url, "connecting to the broker");
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("connected to the broker");
                        task_connected.store(true, Ordering::Relaxed);
                        for topic in topics.subscriptions() {
                            let subscribed =
                                task_client.try_subscribe(topic.as_str(), QoS::AtLeastOnce);
                            if let Err(e) = subscribed {
                                error!(%topic, "subscribe failed: {e:?}");
                            }
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        match inbox.handle_message(&p.topic, &p.payload) {
                            Ok(Some(Command::OcppConfig)) => {
                                publish_ocpp_config(&task_client, &topics, &settings.ocpp_config)
                            }
                            Ok(_) => {}
                            Err(e) => warn!(topic = %p.topic, "message dropped: {e}"),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        task_connected.store(false, Ordering::Relaxed);
                        if inbox.is_end_of_application() {
                            break;
                        }
                        warn!(
                            "broker connection error: {e:?}, next retry in {}s",
                            settings.retry_delay.as_secs()
                        );
                        tokio::time::sleep(settings.retry_delay).await;
                    }
                }
            }
        });

        Ok(Self { client, connected, task })
    }

    /// Déconnexion propre après la publication du statut final
    pub async fn shutdown(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("disconnect: {e:?}");
        }
        if tokio::time::timeout(Duration::from_secs(2), self.task).await.is_err() {
            debug!("mqtt task still running at shutdown");
        }
    }
}

impl Publisher for MqttManager {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.client.try_publish(topic, QoS::AtMostOnce, retain, payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, "publish failed: {e:?}");
                false
            }
        }
    }
}

fn publish_ocpp_config(client: &AsyncClient, topics: &Topics, values: &BTreeMap<String, String>) {
    match serde_json::to_vec(values) {
        Ok(payload) => {
            let topic = topics.ocpp_config();
            if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, true, payload) {
                warn!("failed to publish ocpp config: {e:?}");
            } else {
                info!("ocpp config published");
            }
        }
        Err(e) => warn!("failed to encode ocpp config: {e}"),
    }
}
