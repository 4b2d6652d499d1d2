use crate::meter::MeterHandle;
use crate::models::{
    AvailabilityStatus, AvailabilityType, ConnectorStatus, ConnectorType, Measurand,
    RegistrationStatus, SampledValue,
};
use crate::state::{connector_index, per_connector, Shared};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Requêtes distantes en attente pour un connecteur
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRequests {
    pub remote_start: Option<String>,
    pub remote_stop: bool,
    pub unavailable_pending: bool,
}

#[derive(Debug, Clone)]
struct ConnectorSlot {
    requests: RemoteRequests,
    /// Vue publiée par la boucle à chaque tick
    status: ConnectorStatus,
    setpoint: f32,
}

impl Default for ConnectorSlot {
    fn default() -> Self {
        Self {
            requests: RemoteRequests::default(),
            status: ConnectorStatus::Available,
            setpoint: 0.0,
        }
    }
}

/// Récepteur des événements de la pile OCPP
pub struct EventsHandler {
    connected: AtomicBool,
    slots: Shared<Vec<ConnectorSlot>>,
    meters: Vec<MeterHandle>,
}

impl EventsHandler {
    /// `meters[i]` est le compteur du connecteur `i + 1`
    pub fn new(meters: Vec<MeterHandle>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            slots: per_connector(meters.len()),
            meters,
        }
    }

    pub fn connector_count(&self) -> usize {
        self.meters.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    // --- Callbacks de la pile ---

    pub fn connection_state_changed(&self, connected: bool) {
        info!(connected, "connection state changed");
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn connection_failed(&self, previous: RegistrationStatus) {
        warn!(previous = previous.as_str(), "connection failed");
    }

    pub fn boot_notification(&self, status: RegistrationStatus) {
        info!(status = status.as_str(), "boot notification");
    }

    /// Inoperative sur un connecteur occupé : différé jusqu'à la fin de session.
    /// Le connecteur 0 désigne toute la borne.
    pub fn change_availability_requested(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> AvailabilityStatus {
        info!(connector = connector_id, ?availability, "change availability requested");
        let mut slots = self.slots.lock();
        let targets: Vec<usize> = if connector_id == 0 {
            (0..slots.len()).collect()
        } else {
            match connector_index(connector_id, slots.len()) {
                Some(index) => vec![index],
                None => return AvailabilityStatus::Rejected,
            }
        };

        let mut result = AvailabilityStatus::Accepted;
        for index in targets {
            let slot = &mut slots[index];
            match availability {
                AvailabilityType::Inoperative => {
                    if !matches!(
                        slot.status,
                        ConnectorStatus::Available
                            | ConnectorStatus::Reserved
                            | ConnectorStatus::Faulted
                    ) {
                        slot.requests.unavailable_pending = true;
                        result = AvailabilityStatus::Scheduled;
                    }
                }
                AvailabilityType::Operative => slot.requests.unavailable_pending = false,
            }
        }
        result
    }

    /// Index du compteur en Wh pour Start/StopTransaction
    pub fn tx_start_stop_meter_value(&self, connector_id: u32) -> u32 {
        let value = connector_index(connector_id, self.meters.len())
            .map(|index| self.meters[index].energy().clamp(0, u32::MAX as i64) as u32)
            .unwrap_or(0);
        debug!(connector = connector_id, value, "start/stop meter value");
        value
    }

    pub fn reservation_started(&self, connector_id: u32) {
        info!(connector = connector_id, "reservation started");
    }

    pub fn reservation_ended(&self, connector_id: u32, canceled: bool) {
        info!(connector = connector_id, canceled, "reservation ended");
    }

    pub fn remote_start_transaction_requested(&self, connector_id: u32, id_tag: &str) -> bool {
        info!(connector = connector_id, id_tag, "remote start transaction");
        let mut slots = self.slots.lock();
        match connector_index(connector_id, slots.len()) {
            Some(index) => {
                slots[index].requests.remote_start = Some(id_tag.to_string());
                true
            }
            None => false,
        }
    }

    pub fn remote_stop_transaction_requested(&self, connector_id: u32) -> bool {
        info!(connector = connector_id, "remote stop transaction");
        let mut slots = self.slots.lock();
        match connector_index(connector_id, slots.len()) {
            Some(index) => {
                slots[index].requests.remote_stop = true;
                true
            }
            None => false,
        }
    }

    /// La transaction a perdu son autorisation : on l'arrête comme un arrêt distant
    pub fn transaction_deauthorized(&self, connector_id: u32) {
        warn!(connector = connector_id, "transaction deauthorized");
        let mut slots = self.slots.lock();
        if let Some(index) = connector_index(connector_id, slots.len()) {
            slots[index].requests.remote_stop = true;
        }
    }

    /// Échantillons pour un MeterValues ; `phase` est 1-based, `None` = toutes les phases.
    /// `None` si le connecteur, la phase ou la grandeur n'est pas disponible.
    pub fn meter_value(
        &self,
        connector_id: u32,
        measurand: Measurand,
        phase: Option<u8>,
    ) -> Option<Vec<SampledValue>> {
        let index = connector_index(connector_id, self.meters.len())?;
        let meter = &self.meters[index];
        let setpoint = self.slots.lock()[index].setpoint;

        let per_phase = |values: Vec<f32>| -> Option<Vec<SampledValue>> {
            match phase {
                Some(p) => {
                    let value = values.get(usize::from(p).checked_sub(1)?)?;
                    Some(vec![SampledValue { measurand, phase: Some(p), value: value.to_string() }])
                }
                None => Some(
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, value)| SampledValue {
                            measurand,
                            phase: Some(i as u8 + 1),
                            value: value.to_string(),
                        })
                        .collect(),
                ),
            }
        };
        let global = |value: String| Some(vec![SampledValue { measurand, phase: None, value }]);

        match measurand {
            Measurand::CurrentImport => per_phase(meter.consumptions()),
            Measurand::PowerActiveImport => per_phase(meter.instant_powers()),
            Measurand::Voltage => per_phase(meter.voltages()),
            Measurand::CurrentOffered => global((setpoint as u32).to_string()),
            Measurand::EnergyActiveImportRegister => global(meter.energy().to_string()),
            Measurand::PowerFactor => global(meter.power_factor().to_string()),
            Measurand::PowerOffered => {
                let offered = match meter.connector_type() {
                    ConnectorType::AC => meter.voltages().iter().map(|v| v * setpoint).sum::<f32>(),
                    ConnectorType::DC => setpoint,
                };
                global((offered as u32).to_string())
            }
        }
    }

    // --- Côté boucle de contrôle ---

    /// Copie des requêtes en attente, un élément par connecteur
    pub fn pending(&self) -> Vec<RemoteRequests> {
        self.slots.lock().iter().map(|s| s.requests.clone()).collect()
    }

    pub fn consume_remote_start(&self, connector_id: u32) {
        self.with_slot(connector_id, |slot| slot.requests.remote_start = None);
    }

    pub fn consume_remote_stop(&self, connector_id: u32) {
        self.with_slot(connector_id, |slot| slot.requests.remote_stop = false);
    }

    pub fn clear_unavailable_pending(&self, connector_id: u32) {
        self.with_slot(connector_id, |slot| slot.requests.unavailable_pending = false);
    }

    /// Statut et consigne vus par les callbacks (ChangeAvailability, MeterValues)
    pub fn publish_view(&self, connector_id: u32, status: ConnectorStatus, setpoint: f32) {
        self.with_slot(connector_id, |slot| {
            slot.status = status;
            slot.setpoint = setpoint;
        });
    }

    fn with_slot(&self, connector_id: u32, f: impl FnOnce(&mut ConnectorSlot)) {
        let mut slots = self.slots.lock();
        if let Some(index) = connector_index(connector_id, slots.len()) {
            f(&mut slots[index]);
        }
    }
}
