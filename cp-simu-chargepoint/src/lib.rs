/**
 * CP SIMU CHARGEPOINT - Borne de recharge OCPP 1.6 simulée
 *
 * RÔLE : connecteurs pilotés par une machine d'états, consignes de smart charging,
 * compteurs simulés, et canal MQTT pour piloter la borne (véhicule, badge, défaut)
 * et observer sa télémétrie.
 */

pub mod allocator;
pub mod chargepoint;
pub mod cli;
pub mod config;
pub mod connector;
pub mod meter;
pub mod models;
pub mod mqtt;
pub mod ocpp;
pub mod state;
pub mod state_machine;
pub mod status;

pub use chargepoint::{build_connectors, SimulatedChargePoint};
pub use config::SimulatorConfig;
pub use mqtt::{Inbox, Publisher};
pub use ocpp::{EventsHandler, OcppStack, StandaloneStack};
