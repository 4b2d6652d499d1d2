/**
 * MODÈLES - Types partagés du simulateur de borne
 *
 * RÔLE : énumérations OCPP 1.6 manipulées par la machine d'états et l'allocateur,
 * plus les charges utiles JSON échangées sur le bus MQTT (entrée et télémétrie).
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Statut d'un connecteur (OCPP 1.6 ChargePointStatus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectorStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorStatus::Available => "Available",
            ConnectorStatus::Preparing => "Preparing",
            ConnectorStatus::Charging => "Charging",
            ConnectorStatus::SuspendedEV => "SuspendedEV",
            ConnectorStatus::SuspendedEVSE => "SuspendedEVSE",
            ConnectorStatus::Finishing => "Finishing",
            ConnectorStatus::Reserved => "Reserved",
            ConnectorStatus::Unavailable => "Unavailable",
            ConnectorStatus::Faulted => "Faulted",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointErrorCode {
    NoError,
    OtherError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

impl AuthorizationStatus {
    /// Accepted et ConcurrentTx autorisent tous deux la session
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthorizationStatus::Accepted | AuthorizationStatus::ConcurrentTx)
    }
}

/// Résultat d'une demande d'autorisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub status: AuthorizationStatus,
    pub parent_id_tag: String,
}

impl Authorization {
    pub fn rejected(status: AuthorizationStatus) -> Self {
        Self { status, parent_id_tag: String::new() }
    }
}

/// Motif de fin de transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    Local,
    Remote,
    EVDisconnected,
    DeAuthorized,
    Other,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Local => "Local",
            Reason::Remote => "Remote",
            Reason::EVDisconnected => "EVDisconnected",
            Reason::DeAuthorized => "DeAuthorized",
            Reason::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Accepted => "Accepted",
            RegistrationStatus::Pending => "Pending",
            RegistrationStatus::Rejected => "Rejected",
        }
    }
}

/// Type de courant délivré par les connecteurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectorType {
    #[default]
    AC,
    DC,
}

impl ConnectorType {
    /// Unité des consignes : ampères en AC, watts en DC
    pub fn rate_unit(&self) -> RateUnit {
        match self {
            ConnectorType::AC => RateUnit::A,
            ConnectorType::DC => RateUnit::W,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::AC => "AC",
            ConnectorType::DC => "DC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    A,
    W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityType {
    Operative,
    Inoperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    Accepted,
    Rejected,
    Scheduled,
}

/// Grandeurs échantillonnables par le central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Current.Import")]
    CurrentImport,
    #[serde(rename = "Current.Offered")]
    CurrentOffered,
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Power.Offered")]
    PowerOffered,
    #[serde(rename = "Power.Factor")]
    PowerFactor,
    Voltage,
}

/// Échantillon de valeur de compteur
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledValue {
    pub measurand: Measurand,
    /// Phase 1-based, `None` pour une valeur globale
    pub phase: Option<u8>,
    pub value: String,
}

/// Limites de smart charging remontées par la pile OCPP, toutes deux optionnelles
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SmartChargingLimits {
    pub station: Option<f32>,
    pub connector: Option<f32>,
}

// --- Charges utiles MQTT entrantes ---

/// `cp_simu/cps/<id>/connectors/<n>/car` : chaque champ absent garde la valeur précédente
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CarUpdate {
    pub cable: Option<f32>,
    pub ready: Option<bool>,
    pub consumption_l1: Option<f32>,
    pub consumption_l2: Option<f32>,
    pub consumption_l3: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdTagUpdate {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaultUpdate {
    pub faulted: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandIn {
    #[serde(rename = "type")]
    pub kind: String,
}

// --- Charges utiles MQTT sortantes ---

/// Télémétrie publiée pour chaque connecteur à chaque tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTelemetry {
    pub status: String,
    pub id_tag: String,
    pub max_setpoint: f32,
    pub ocpp_setpoint: f32,
    pub setpoint: f32,
    pub car_consumption_l1: f32,
    pub car_consumption_l2: f32,
    pub car_consumption_l3: f32,
    pub car_cable_capacity: f32,
    pub car_ready: bool,
    pub consumption_l1: f32,
    pub consumption_l2: f32,
    pub consumption_l3: f32,
}

/// Statut global de la borne (`cp_simu/cps/<id>/status`, retenu)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePointStatusMessage {
    pub pid: u32,
    pub status: String,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub nb_phases: u32,
    pub max_setpoint: f32,
    pub central_system: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub voltage: f32,
}
