/**
 * PILE OCPP - Contrat entre la boucle de contrôle et la pile protocolaire
 *
 * RÔLE :
 * La boucle ne parle jamais le protocole : elle appelle `OcppStack` (notifications
 * de statut, transactions, autorisations, limites de smart charging) et la pile
 * remonte ses requêtes (RemoteStart, ChangeAvailability...) via `EventsHandler`.
 *
 * - events.rs : callbacks appelés par la pile, tampon des requêtes par connecteur
 * - standalone.rs : central system embarqué pour faire tourner le simulateur seul
 */

pub mod events;
pub mod standalone;

pub use events::{EventsHandler, RemoteRequests};
pub use standalone::{StandaloneStack, Transaction};

use crate::models::{
    Authorization, AuthorizationStatus, ChargePointErrorCode, ConnectorStatus, RateUnit, Reason,
    RegistrationStatus, SmartChargingLimits,
};
use crate::state_machine::Authority;

/// Pile OCPP côté borne
pub trait OcppStack: Send + Sync {
    fn start(&self) -> bool;
    fn stop(&self) -> bool;
    fn registration_status(&self) -> RegistrationStatus;
    fn connector_status(&self, connector_id: u32) -> ConnectorStatus;
    fn status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
        error_code: ChargePointErrorCode,
    ) -> bool;
    fn authorize(&self, connector_id: u32, id_tag: &str) -> Authorization;
    fn start_transaction(&self, connector_id: u32, id_tag: &str) -> AuthorizationStatus;
    fn stop_transaction(&self, connector_id: u32, id_tag: &str, reason: Reason) -> bool;
    /// Limites courantes (borne, connecteur) exprimées dans `unit`
    fn setpoint(&self, connector_id: u32, unit: RateUnit) -> Option<SmartChargingLimits>;
}

impl<T: OcppStack + ?Sized> Authority for T {
    fn authorize(&self, connector_id: u32, id_tag: &str) -> Authorization {
        OcppStack::authorize(self, connector_id, id_tag)
    }

    fn start_transaction(&self, connector_id: u32, id_tag: &str) -> AuthorizationStatus {
        OcppStack::start_transaction(self, connector_id, id_tag)
    }
}
