//! In-process stand-in for a central system.
//!
//! Lets the simulator run without any OCPP backend: it accepts the boot
//! notification, authorizes from a local list, keeps the connector status
//! table and transaction records, and serves static smart-charging limits.
//! Operator actions (remote start/stop, availability, reservations, limits)
//! reach the charge point through the [`EventsHandler`] just like requests
//! from a real central system would.

use super::{EventsHandler, OcppStack};
use crate::config::StandaloneConf;
use crate::models::{
    Authorization, AuthorizationStatus, AvailabilityStatus, AvailabilityType,
    ChargePointErrorCode, ConnectorStatus, RateUnit, Reason, RegistrationStatus,
    SmartChargingLimits,
};
use crate::state::{connector_index, new_state, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    /// Index compteur en Wh
    pub meter_start: u32,
    pub meter_stop: Option<u32>,
    pub stop_reason: Option<Reason>,
}

#[derive(Debug)]
struct StackState {
    running: bool,
    registration: RegistrationStatus,
    statuses: Vec<ConnectorStatus>,
    error_codes: Vec<ChargePointErrorCode>,
    open: Vec<Option<Transaction>>,
    closed: Vec<Transaction>,
    next_transaction_id: i32,
    station_limit: Option<f32>,
    connector_limits: HashMap<u32, f32>,
}

pub struct StandaloneStack {
    events: Arc<EventsHandler>,
    config: StandaloneConf,
    state: Shared<StackState>,
}

impl StandaloneStack {
    pub fn new(events: Arc<EventsHandler>, config: StandaloneConf) -> Self {
        let count = events.connector_count();
        let state = StackState {
            running: false,
            registration: RegistrationStatus::Pending,
            statuses: vec![ConnectorStatus::Available; count],
            error_codes: vec![ChargePointErrorCode::NoError; count],
            open: vec![None; count],
            closed: Vec::new(),
            next_transaction_id: 1,
            station_limit: config.station_limit,
            connector_limits: config.connector_limits.clone(),
        };
        Self { events, config, state: new_state(state) }
    }

    fn lookup(&self, id_tag: &str) -> Authorization {
        match self.config.id_tags.iter().find(|t| t.id == id_tag) {
            Some(entry) => Authorization {
                status: entry.status,
                parent_id_tag: entry.parent.clone().unwrap_or_default(),
            },
            None if self.config.accept_unknown_id_tags => Authorization {
                status: AuthorizationStatus::Accepted,
                parent_id_tag: String::new(),
            },
            None => Authorization::rejected(AuthorizationStatus::Invalid),
        }
    }

    // --- Actions opérateur (équivalents des requêtes du central system) ---

    pub fn remote_start(&self, connector_id: u32, id_tag: &str) -> bool {
        self.events.remote_start_transaction_requested(connector_id, id_tag)
    }

    /// Refusé s'il n'y a pas de transaction en cours sur le connecteur
    pub fn remote_stop(&self, connector_id: u32) -> bool {
        if self.transaction(connector_id).is_none() {
            warn!(connector = connector_id, "remote stop without transaction");
            return false;
        }
        self.events.remote_stop_transaction_requested(connector_id)
    }

    /// Retire l'autorisation de la transaction en cours
    pub fn deauthorize(&self, connector_id: u32) -> bool {
        if self.transaction(connector_id).is_none() {
            return false;
        }
        self.events.transaction_deauthorized(connector_id);
        true
    }

    pub fn change_availability(
        &self,
        connector_id: u32,
        availability: AvailabilityType,
    ) -> AvailabilityStatus {
        let result = self.events.change_availability_requested(connector_id, availability);
        if result == AvailabilityStatus::Rejected {
            return result;
        }
        // les connecteurs occupés passeront Unavailable en fin de session
        let pending = self.events.pending();

        let mut state = self.state.lock();
        let count = state.statuses.len();
        let targets: Vec<usize> = if connector_id == 0 {
            (0..count).collect()
        } else {
            connector_index(connector_id, count).into_iter().collect()
        };
        for index in targets {
            let status = &mut state.statuses[index];
            match availability {
                AvailabilityType::Inoperative if !pending[index].unavailable_pending => {
                    *status = ConnectorStatus::Unavailable
                }
                AvailabilityType::Inoperative => {}
                AvailabilityType::Operative if *status == ConnectorStatus::Unavailable => {
                    *status = ConnectorStatus::Available
                }
                AvailabilityType::Operative => {}
            }
        }
        result
    }

    pub fn reserve_now(&self, connector_id: u32, id_tag: &str) -> bool {
        let mut state = self.state.lock();
        let Some(index) = connector_index(connector_id, state.statuses.len()) else {
            return false;
        };
        if state.statuses[index] != ConnectorStatus::Available {
            return false;
        }
        state.statuses[index] = ConnectorStatus::Reserved;
        drop(state);
        debug!(connector = connector_id, id_tag, "reserved");
        self.events.reservation_started(connector_id);
        true
    }

    pub fn cancel_reservation(&self, connector_id: u32) -> bool {
        let mut state = self.state.lock();
        let Some(index) = connector_index(connector_id, state.statuses.len()) else {
            return false;
        };
        if state.statuses[index] != ConnectorStatus::Reserved {
            return false;
        }
        state.statuses[index] = ConnectorStatus::Available;
        drop(state);
        self.events.reservation_ended(connector_id, true);
        true
    }

    /// Coupe ou rétablit la liaison avec le central system
    pub fn set_link(&self, up: bool) {
        let registration = self.state.lock().registration;
        if !up {
            self.events.connection_failed(registration);
        }
        self.events.connection_state_changed(up);
    }

    pub fn set_station_limit(&self, limit: Option<f32>) {
        self.state.lock().station_limit = limit;
    }

    pub fn set_connector_limit(&self, connector_id: u32, limit: Option<f32>) {
        let mut state = self.state.lock();
        match limit {
            Some(value) => state.connector_limits.insert(connector_id, value),
            None => state.connector_limits.remove(&connector_id),
        };
    }

    // --- Consultation ---

    pub fn transaction(&self, connector_id: u32) -> Option<Transaction> {
        let state = self.state.lock();
        let index = connector_index(connector_id, state.open.len())?;
        state.open[index].clone()
    }

    pub fn closed_transactions(&self) -> Vec<Transaction> {
        self.state.lock().closed.clone()
    }

    pub fn error_code(&self, connector_id: u32) -> Option<ChargePointErrorCode> {
        let state = self.state.lock();
        let index = connector_index(connector_id, state.error_codes.len())?;
        Some(state.error_codes[index])
    }
}

impl OcppStack for StandaloneStack {
    fn start(&self) -> bool {
        {
            let mut state = self.state.lock();
            state.running = true;
            state.registration = RegistrationStatus::Accepted;
        }
        info!("standalone central system started");
        self.events.connection_state_changed(true);
        self.events.boot_notification(RegistrationStatus::Accepted);
        true
    }

    fn stop(&self) -> bool {
        let was_running = std::mem::replace(&mut self.state.lock().running, false);
        if was_running {
            self.events.connection_state_changed(false);
        }
        was_running
    }

    fn registration_status(&self) -> RegistrationStatus {
        let state = self.state.lock();
        if state.running {
            state.registration
        } else {
            RegistrationStatus::Pending
        }
    }

    fn connector_status(&self, connector_id: u32) -> ConnectorStatus {
        let state = self.state.lock();
        connector_index(connector_id, state.statuses.len())
            .map(|index| state.statuses[index])
            .unwrap_or(ConnectorStatus::Unavailable)
    }

    fn status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: ChargePointErrorCode,
    ) -> bool {
        let mut state = self.state.lock();
        let Some(index) = connector_index(connector_id, state.statuses.len()) else {
            return false;
        };
        info!(connector = connector_id, %status, ?error_code, "status notification");
        state.statuses[index] = status;
        state.error_codes[index] = error_code;
        true
    }

    fn authorize(&self, connector_id: u32, id_tag: &str) -> Authorization {
        let authorization = self.lookup(id_tag);
        debug!(connector = connector_id, id_tag, status = ?authorization.status, "authorize");
        authorization
    }

    fn start_transaction(&self, connector_id: u32, id_tag: &str) -> AuthorizationStatus {
        let authorization = self.lookup(id_tag);
        if !authorization.status.is_accepted() {
            return authorization.status;
        }
        let meter_start = self.events.tx_start_stop_meter_value(connector_id);

        let mut state = self.state.lock();
        let Some(index) = connector_index(connector_id, state.open.len()) else {
            return AuthorizationStatus::Invalid;
        };
        if let Some(current) = &state.open[index] {
            return if current.id_tag == id_tag {
                AuthorizationStatus::Accepted
            } else {
                AuthorizationStatus::ConcurrentTx
            };
        }
        let busy_elsewhere = state.open.iter().flatten().any(|t| t.id_tag == id_tag);

        let id = state.next_transaction_id;
        state.next_transaction_id += 1;
        state.open[index] = Some(Transaction {
            id,
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            meter_stop: None,
            stop_reason: None,
        });
        info!(
            connector = connector_id,
            transaction = id,
            id_tag,
            meter_start,
            "transaction started"
        );

        if busy_elsewhere {
            AuthorizationStatus::ConcurrentTx
        } else {
            AuthorizationStatus::Accepted
        }
    }

    fn stop_transaction(&self, connector_id: u32, id_tag: &str, reason: Reason) -> bool {
        let meter_stop = self.events.tx_start_stop_meter_value(connector_id);
        let mut state = self.state.lock();
        let Some(index) = connector_index(connector_id, state.open.len()) else {
            return false;
        };
        let Some(mut transaction) = state.open[index].take() else {
            warn!(connector = connector_id, reason = reason.as_str(), "no transaction to stop");
            return false;
        };
        transaction.meter_stop = Some(meter_stop);
        transaction.stop_reason = Some(reason);
        info!(
            connector = connector_id,
            transaction = transaction.id,
            id_tag,
            reason = reason.as_str(),
            meter_stop,
            "transaction stopped"
        );
        state.closed.push(transaction);
        true
    }

    fn setpoint(&self, connector_id: u32, _unit: RateUnit) -> Option<SmartChargingLimits> {
        let state = self.state.lock();
        let limits = SmartChargingLimits {
            station: state.station_limit,
            connector: state.connector_limits.get(&connector_id).copied(),
        };
        (limits.station.is_some() || limits.connector.is_some()).then_some(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdTagConf;
    use crate::meter::MeterHandle;
    use crate::models::ConnectorType;

    fn stack(count: usize, config: StandaloneConf) -> (StandaloneStack, Arc<EventsHandler>) {
        let meters = (0..count).map(|_| MeterHandle::new(3, ConnectorType::AC)).collect();
        let events = Arc::new(EventsHandler::new(meters));
        (StandaloneStack::new(events.clone(), config), events)
    }

    fn strict_config() -> StandaloneConf {
        StandaloneConf {
            accept_unknown_id_tags: false,
            id_tags: vec![
                IdTagConf {
                    id: "AABB".into(),
                    parent: Some("FAMILY".into()),
                    status: AuthorizationStatus::Accepted,
                },
                IdTagConf {
                    id: "CCDD".into(),
                    parent: None,
                    status: AuthorizationStatus::Blocked,
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_start_registers_and_connects() {
        let (stack, events) = stack(1, StandaloneConf::default());
        assert_eq!(stack.registration_status(), RegistrationStatus::Pending);
        assert!(stack.start());
        assert_eq!(stack.registration_status(), RegistrationStatus::Accepted);
        assert!(events.is_connected());

        assert!(stack.stop());
        assert!(!events.is_connected());
        assert!(!stack.stop());
    }

    #[test]
    fn test_local_authorization_list() {
        let (strict, _) = stack(1, strict_config());
        let auth = OcppStack::authorize(&strict, 1, "AABB");
        assert_eq!(auth.status, AuthorizationStatus::Accepted);
        assert_eq!(auth.parent_id_tag, "FAMILY");
        assert_eq!(OcppStack::authorize(&strict, 1, "CCDD").status, AuthorizationStatus::Blocked);
        assert_eq!(OcppStack::authorize(&strict, 1, "NOPE").status, AuthorizationStatus::Invalid);

        let (lenient, _) = stack(1, StandaloneConf::default());
        assert_eq!(OcppStack::authorize(&lenient, 1, "NOPE").status, AuthorizationStatus::Accepted);
    }

    #[test]
    fn test_transaction_lifecycle() {
        let (stack, _) = stack(2, StandaloneConf::default());
        assert_eq!(OcppStack::start_transaction(&stack, 1, "X"), AuthorizationStatus::Accepted);
        // idempotent pour le même badge
        assert_eq!(OcppStack::start_transaction(&stack, 1, "X"), AuthorizationStatus::Accepted);
        assert_eq!(OcppStack::start_transaction(&stack, 2, "X"), AuthorizationStatus::ConcurrentTx);

        let tx = stack.transaction(1).unwrap();
        assert_eq!(tx.id, 1);
        assert_eq!(tx.meter_start, 0);

        assert!(stack.stop_transaction(1, "", Reason::EVDisconnected));
        assert!(!stack.stop_transaction(1, "", Reason::EVDisconnected));
        let closed = stack.closed_transactions();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].stop_reason, Some(Reason::EVDisconnected));
        assert_eq!(closed[0].meter_stop, Some(0));
    }

    #[test]
    fn test_blocked_tag_cannot_start() {
        let (stack, _) = stack(1, strict_config());
        assert_eq!(OcppStack::start_transaction(&stack, 1, "CCDD"), AuthorizationStatus::Blocked);
        assert!(stack.transaction(1).is_none());
    }

    #[test]
    fn test_status_table() {
        let (stack, _) = stack(1, StandaloneConf::default());
        let fault = ChargePointErrorCode::OtherError;
        assert!(stack.status_notification(1, ConnectorStatus::Faulted, fault));
        assert_eq!(stack.connector_status(1), ConnectorStatus::Faulted);
        assert_eq!(stack.error_code(1), Some(ChargePointErrorCode::OtherError));
        let no_error = ChargePointErrorCode::NoError;
        assert!(!stack.status_notification(2, ConnectorStatus::Available, no_error));
        assert_eq!(stack.connector_status(2), ConnectorStatus::Unavailable);
    }

    #[test]
    fn test_availability_changes() {
        let (stack, events) = stack(2, StandaloneConf::default());
        let status = stack.change_availability(1, AvailabilityType::Inoperative);
        assert_eq!(status, AvailabilityStatus::Accepted);
        assert_eq!(stack.connector_status(1), ConnectorStatus::Unavailable);

        events.publish_view(2, ConnectorStatus::Charging, 32.0);
        let status = stack.change_availability(2, AvailabilityType::Inoperative);
        assert_eq!(status, AvailabilityStatus::Scheduled);
        assert_eq!(stack.connector_status(2), ConnectorStatus::Available);
        assert!(events.pending()[1].unavailable_pending);

        let status = stack.change_availability(1, AvailabilityType::Operative);
        assert_eq!(status, AvailabilityStatus::Accepted);
        assert_eq!(stack.connector_status(1), ConnectorStatus::Available);
    }

    #[test]
    fn test_reservation() {
        let (stack, _) = stack(1, StandaloneConf::default());
        assert!(stack.reserve_now(1, "X"));
        assert_eq!(stack.connector_status(1), ConnectorStatus::Reserved);
        assert!(!stack.reserve_now(1, "Y"));
        assert!(stack.cancel_reservation(1));
        assert_eq!(stack.connector_status(1), ConnectorStatus::Available);
        assert!(!stack.cancel_reservation(1));
    }

    #[test]
    fn test_remote_stop_requires_transaction() {
        let (stack, events) = stack(1, StandaloneConf::default());
        assert!(!stack.remote_stop(1));
        assert!(!stack.deauthorize(1));
        OcppStack::start_transaction(&stack, 1, "X");
        assert!(stack.remote_stop(1));
        assert!(events.pending()[0].remote_stop);
    }

    #[test]
    fn test_setpoint_limits() {
        let mut config = StandaloneConf::default();
        config.connector_limits.insert(2, 16.0);
        let (stack, _) = stack(2, config);
        assert_eq!(stack.setpoint(1, RateUnit::A), None);
        assert_eq!(
            stack.setpoint(2, RateUnit::A),
            Some(SmartChargingLimits { station: None, connector: Some(16.0) })
        );

        stack.set_station_limit(Some(20.0));
        stack.set_connector_limit(2, None);
        assert_eq!(
            stack.setpoint(2, RateUnit::A),
            Some(SmartChargingLimits { station: Some(20.0), connector: None })
        );
    }
}
