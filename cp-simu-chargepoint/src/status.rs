use crate::config::SimulatorConfig;
use crate::models::{ChargePointStatusMessage, RegistrationStatus};
use crate::mqtt::{Publisher, Topics};
use tracing::{debug, warn};

pub const DISCONNECTED: &str = "Disconnected";
pub const DEAD: &str = "Dead";

/// Suivi du statut global de la borne publié sur `cp_simu/cps/<id>/status`.
///
/// Le statut vaut `Disconnected` tant que la pile OCPP n'est pas connectée,
/// sinon le statut d'enregistrement. Il n'est republié que s'il change, ou si
/// la publication précédente a échoué.
pub struct StatusTracker {
    template: ChargePointStatusMessage,
    topic: String,
    connected: bool,
    registration: Option<RegistrationStatus>,
    status: String,
    published: bool,
}

impl StatusTracker {
    pub fn new(config: &SimulatorConfig, topics: &Topics) -> Self {
        Self {
            template: status_message(config, DISCONNECTED),
            topic: topics.status(),
            connected: false,
            registration: None,
            status: DISCONNECTED.to_string(),
            published: false,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Prend en compte l'état de la pile puis publie si nécessaire
    pub fn update(
        &mut self,
        publisher: &dyn Publisher,
        connected: bool,
        registration: RegistrationStatus,
    ) -> bool {
        if connected != self.connected || Some(registration) != self.registration {
            self.connected = connected;
            self.registration = Some(registration);
            self.published = false;
            self.status = if connected {
                registration.as_str().to_string()
            } else {
                DISCONNECTED.to_string()
            };
            debug!(status = %self.status, "charge point status changed");
        }

        if !self.published {
            self.published = self.publish(publisher, &self.status);
        }
        self.published
    }

    /// Dernier message avant l'arrêt
    pub fn publish_dead(&mut self, publisher: &dyn Publisher) -> bool {
        self.status = DEAD.to_string();
        self.publish(publisher, DEAD)
    }

    fn publish(&self, publisher: &dyn Publisher, status: &str) -> bool {
        let message = ChargePointStatusMessage {
            status: status.to_string(),
            ..self.template.clone()
        };
        match serde_json::to_vec(&message) {
            Ok(payload) => publisher.publish(&self.topic, payload, true),
            Err(e) => {
                warn!("failed to encode charge point status: {e}");
                false
            }
        }
    }
}

/// Message de statut de la borne ; avec `DEAD` c'est aussi le testament MQTT
pub fn status_message(config: &SimulatorConfig, status: &str) -> ChargePointStatusMessage {
    ChargePointStatusMessage {
        pid: std::process::id(),
        status: status.to_string(),
        vendor: config.charge_point.vendor.clone(),
        model: config.charge_point.model.clone(),
        serial: config.charge_point.serial_number.clone(),
        nb_phases: config.electrical.nb_phases,
        max_setpoint: config.electrical.max_charge_point_setpoint,
        central_system: config.charge_point.central_system_url.clone(),
        kind: config.electrical.connector_type.as_str().to_string(),
        voltage: config.charge_point.voltage,
    }
}
