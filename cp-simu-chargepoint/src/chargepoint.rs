/**
 * BORNE SIMULÉE - Boucle de contrôle
 *
 * RÔLE : à chaque tick (500 ms), dans cet ordre :
 * 1. statut global publié s'il a changé ; tant que la pile n'est pas enregistrée
 *    on ne fait que publier statut et télémétrie
 * 2. statuts des connecteurs relus depuis la pile (actions d'entrée)
 * 3. allocation des consignes (smart charging)
 * 4. copie des entrées MQTT et des requêtes distantes
 * 5. machine d'états de chaque connecteur, effets appliqués, consommation au compteur
 * 6. publication de la télémétrie
 */

use crate::allocator::allocate;
use crate::config::SimulatorConfig;
use crate::connector::ConnectorState;
use crate::meter::MeterError;
use crate::models::RegistrationStatus;
use crate::mqtt::{Inbox, Publisher, Topics};
use crate::ocpp::{EventsHandler, OcppStack};
use crate::state_machine::{Effect, PendingInputs, StatusMachine, Step};
use crate::status::StatusTracker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const TICK_PERIOD: Duration = Duration::from_millis(500);

/// Crée les connecteurs et initialise leurs compteurs (tension, facteur de puissance)
pub fn build_connectors(config: &SimulatorConfig) -> Vec<ConnectorState> {
    let phases = config.nb_phases();
    (1..=config.ocpp.number_of_connectors)
        .map(|id| {
            let connector = ConnectorState::new(
                id,
                config.electrical.max_connector_setpoint,
                phases,
                config.electrical.connector_type,
            );
            let meter = connector.meter.handle();
            meter.set_voltages(&vec![config.charge_point.voltage; phases]);
            meter.set_power_factor(config.electrical.power_factor);
            connector
        })
        .collect()
}

pub struct SimulatedChargePoint {
    config: SimulatorConfig,
    connectors: Vec<ConnectorState>,
    machine: StatusMachine,
    stack: Arc<dyn OcppStack>,
    events: Arc<EventsHandler>,
    inbox: Inbox,
    publisher: Arc<dyn Publisher>,
    topics: Topics,
    status: StatusTracker,
}

impl SimulatedChargePoint {
    pub fn new(
        config: SimulatorConfig,
        connectors: Vec<ConnectorState>,
        stack: Arc<dyn OcppStack>,
        events: Arc<EventsHandler>,
        inbox: Inbox,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let topics = inbox.topics().clone();
        let status = StatusTracker::new(&config, &topics);
        let machine = StatusMachine::new(
            config.ocpp.connection_timeout(),
            config.ocpp.authorize_remote_tx_requests,
        );
        Self { config, connectors, machine, stack, events, inbox, publisher, topics, status }
    }

    pub fn connectors(&self) -> &[ConnectorState] {
        &self.connectors
    }

    pub fn connector(&self, connector_id: u32) -> Option<&ConnectorState> {
        self.connectors.iter().find(|c| c.id == connector_id)
    }

    pub fn charge_point_status(&self) -> &str {
        self.status.status()
    }

    /// Démarre les compteurs puis la pile OCPP
    pub fn start(&mut self) -> Result<(), MeterError> {
        for connector in &mut self.connectors {
            connector.meter.start()?;
        }
        if !self.stack.start() {
            warn!("ocpp stack failed to start");
        }
        info!(
            connectors = self.connectors.len(),
            phases = self.config.electrical.nb_phases,
            kind = self.config.electrical.connector_type.as_str(),
            "charge point started"
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.status.publish_dead(&*self.publisher);
        self.stack.stop();
        for connector in &mut self.connectors {
            connector.meter.stop();
        }
        info!("charge point stopped");
    }

    /// Boucle principale, jusqu'à la commande `close` ou Ctrl-C
    pub async fn run(&mut self) {
        let mut interval = tokio::time::interval(TICK_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.inbox.is_end_of_application() {
            interval.tick().await;
            self.tick(tokio::time::Instant::now().into_std());
        }
        info!("end of application requested");
    }

    pub fn tick(&mut self, now: Instant) {
        let registration = self.stack.registration_status();
        self.status
            .update(&*self.publisher, self.events.is_connected(), registration);
        if registration != RegistrationStatus::Accepted {
            self.publish_connectors();
            return;
        }

        for connector in &mut self.connectors {
            let status = self.stack.connector_status(connector.id);
            if status != connector.status {
                info!(
                    connector = connector.id,
                    from = %connector.status,
                    to = %status,
                    "status changed"
                );
                connector.enter(status, now);
            }
        }

        let unit = self.config.electrical.connector_type.rate_unit();
        let limits: Vec<_> = self
            .connectors
            .iter()
            .map(|c| self.stack.setpoint(c.id, unit))
            .collect();
        allocate(self.config.electrical.max_charge_point_setpoint, &mut self.connectors, &limits);

        let staged = self.inbox.snapshot();
        let requests = self.events.pending();
        let rows = self.connectors.iter_mut().zip(&staged).zip(&requests);
        for ((connector, inputs), request) in rows {
            connector.apply_car(&inputs.car);
            connector.fault_pending = inputs.faulted;
            connector.unavailable_pending = request.unavailable_pending;
        }

        let nb_phases = self.config.nb_phases();
        for index in 0..self.connectors.len() {
            let inputs = PendingInputs {
                local_id_tag: staged.get(index).and_then(|s| s.id_tag.clone()),
                remote_start: requests.get(index).and_then(|r| r.remote_start.clone()),
                remote_stop: requests.get(index).is_some_and(|r| r.remote_stop),
            };
            let step = self
                .machine
                .evaluate(&self.connectors[index], &inputs, &*self.stack, now);
            self.apply(index, step, now);

            let connector = &self.connectors[index];
            connector.meter.handle().set_consumptions(&connector.consumption(nb_phases));
        }

        self.publish_connectors();
    }

    fn apply(&mut self, index: usize, step: Step, now: Instant) {
        let connector = &mut self.connectors[index];
        let id = connector.id;
        for effect in step.effects {
            match effect {
                Effect::Notify { status, error_code } => {
                    debug!(connector = id, %status, ?error_code, "status notification");
                    if !self.stack.status_notification(id, status, error_code) {
                        warn!(connector = id, %status, "status notification failed");
                    }
                }
                Effect::StopTransaction { id_tag, reason } => {
                    info!(connector = id, reason = reason.as_str(), "stopping transaction");
                    if !self.stack.stop_transaction(id, &id_tag, reason) {
                        warn!(connector = id, "stop transaction failed");
                    }
                }
                Effect::SetIdTag { id_tag, parent_id_tag } => {
                    connector.id_tag = id_tag;
                    connector.parent_id_tag = parent_id_tag;
                }
                Effect::ClearIdTag => {
                    connector.id_tag.clear();
                    connector.parent_id_tag.clear();
                }
                Effect::RestartPreparingTimer => connector.preparing_start = now,
                Effect::ConsumeLocalIdTag(id_tag) => self.inbox.consume_id_tag(id, &id_tag),
                Effect::ConsumeRemoteStart => self.events.consume_remote_start(id),
                Effect::ConsumeRemoteStop => self.events.consume_remote_stop(id),
                Effect::ClearUnavailablePending => {
                    connector.unavailable_pending = false;
                    self.events.clear_unavailable_pending(id);
                }
            }
        }
    }

    fn publish_connectors(&self) {
        let nb_phases = self.config.nb_phases();
        for connector in &self.connectors {
            self.events
                .publish_view(connector.id, connector.status, connector.setpoint);
            match serde_json::to_vec(&connector.telemetry(nb_phases)) {
                Ok(payload) => {
                    self.publisher
                        .publish(&self.topics.connector_status(connector.id), payload, false);
                }
                Err(e) => warn!(connector = connector.id, "failed to encode telemetry: {e}"),
            }
        }
    }
}
