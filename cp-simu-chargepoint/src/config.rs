use crate::models::{AuthorizationStatus, ConnectorType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::warn;

pub const CONFIG_ENV: &str = "CP_SIMU_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "chargepoint.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("number of phases must be between 1 and 3, got {0}")]
    InvalidPhases(u32),
    #[error("a charge point needs at least one connector")]
    NoConnector,
    #[error("setpoint `{0}` must be a non-negative number")]
    InvalidSetpoint(&'static str),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    pub charge_point: ChargePointConf,
    pub ocpp: OcppConf,
    pub mqtt: MqttConf,
    pub electrical: ElectricalConf,
    pub standalone: StandaloneConf,
}

/// Identité de la borne
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChargePointConf {
    pub identifier: String,
    pub vendor: String,
    pub model: String,
    pub serial_number: String,
    pub central_system_url: String,
    /// Tension de fonctionnement en V
    pub voltage: f32,
    pub working_dir: Option<PathBuf>,
}

impl Default for ChargePointConf {
    fn default() -> Self {
        Self {
            identifier: "simu_cp".into(),
            vendor: "Open OCPP".into(),
            model: "Simulated CP".into(),
            serial_number: "S/N0123456789".into(),
            central_system_url: "ws://127.0.0.1:8080/openocpp/".into(),
            voltage: 230.0,
            working_dir: None,
        }
    }
}

/// Clés de configuration OCPP exposées par le simulateur
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OcppConf {
    pub number_of_connectors: u32,
    pub connection_timeout_secs: u64,
    pub authorize_remote_tx_requests: bool,
}

impl Default for OcppConf {
    fn default() -> Self {
        Self {
            number_of_connectors: 1,
            connection_timeout_secs: 30,
            authorize_remote_tx_requests: false,
        }
    }
}

impl OcppConf {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub broker_url: String,
    pub keep_alive_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".into(),
            keep_alive_secs: 30,
            retry_delay_secs: 5,
        }
    }
}

/// Caractéristiques électriques ; les consignes sont en A (AC) ou en W (DC)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ElectricalConf {
    pub nb_phases: u32,
    pub max_charge_point_setpoint: f32,
    pub max_connector_setpoint: f32,
    pub connector_type: ConnectorType,
    pub power_factor: f32,
}

impl Default for ElectricalConf {
    fn default() -> Self {
        Self {
            nb_phases: 3,
            max_charge_point_setpoint: 32.0,
            max_connector_setpoint: 32.0,
            connector_type: ConnectorType::AC,
            power_factor: 1.0,
        }
    }
}

/// Central system embarqué, utilisé quand aucune pile OCPP externe n'est branchée
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StandaloneConf {
    pub accept_unknown_id_tags: bool,
    pub id_tags: Vec<IdTagConf>,
    pub station_limit: Option<f32>,
    pub connector_limits: HashMap<u32, f32>,
}

impl Default for StandaloneConf {
    fn default() -> Self {
        Self {
            accept_unknown_id_tags: true,
            id_tags: Vec::new(),
            station_limit: None,
            connector_limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IdTagConf {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "accepted")]
    pub status: AuthorizationStatus,
}

fn accepted() -> AuthorizationStatus {
    AuthorizationStatus::Accepted
}

fn is_setpoint(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.electrical.nb_phases) {
            return Err(ConfigError::InvalidPhases(self.electrical.nb_phases));
        }
        if self.ocpp.number_of_connectors == 0 {
            return Err(ConfigError::NoConnector);
        }
        if !is_setpoint(self.electrical.max_charge_point_setpoint) {
            return Err(ConfigError::InvalidSetpoint("max_charge_point_setpoint"));
        }
        if !is_setpoint(self.electrical.max_connector_setpoint) {
            return Err(ConfigError::InvalidSetpoint("max_connector_setpoint"));
        }
        Ok(())
    }

    pub fn connector_count(&self) -> usize {
        self.ocpp.number_of_connectors as usize
    }

    pub fn nb_phases(&self) -> usize {
        self.electrical.nb_phases as usize
    }

    /// Valeurs publiées sur le topic `ocpp_config`
    pub fn ocpp_key_values(&self) -> BTreeMap<String, String> {
        let connectors = self.ocpp.number_of_connectors;
        let kind = self.electrical.connector_type;

        let (sampled_data, rate_unit) = match kind {
            ConnectorType::AC => (
                "Current.Import,Energy.Active.Import.Register,Current.Offered",
                "Current",
            ),
            ConnectorType::DC => (
                "Energy.Active.Import.Register,Power.Active.Import,Power.Factor,Voltage,Power.Offered",
                "Power",
            ),
        };
        let rotation = if kind == ConnectorType::DC || self.electrical.nb_phases == 1 {
            "NotApplicable"
        } else {
            "RST"
        };
        let phase_rotation = (1..=connectors)
            .map(|i| format!("{i}.{rotation}"))
            .collect::<Vec<_>>()
            .join(",");

        let mut values = BTreeMap::new();
        values.insert("NumberOfConnectors".into(), connectors.to_string());
        values.insert("ConnectionTimeOut".into(), self.ocpp.connection_timeout_secs.to_string());
        values.insert(
            "AuthorizeRemoteTxRequests".into(),
            self.ocpp.authorize_remote_tx_requests.to_string(),
        );
        values.insert("MeterValuesSampledData".into(), sampled_data.into());
        values.insert("ChargingScheduleAllowedChargingRateUnit".into(), rate_unit.into());
        values.insert("ConnectorPhaseRotation".into(), phase_rotation);
        values.insert("ConnectorPhaseRotationMaxLength".into(), connectors.to_string());
        values
    }
}

/// Chemin du fichier : argument explicite, sinon `CP_SIMU_CONFIG`, sinon `chargepoint.yaml`
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::var(CONFIG_ENV)
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into())
            .into(),
    }
}

/// Charge la config YAML ; fichier absent, vide ou invalide => valeurs par défaut
pub async fn load_config(explicit: Option<&Path>) -> SimulatorConfig {
    let path = config_path(explicit);
    if !path.exists() {
        warn!(path = %path.display(), "no config file, using defaults");
        return SimulatorConfig::default();
    }
    let txt = fs::read_to_string(&path).await.unwrap_or_default();
    if txt.trim().is_empty() {
        return SimulatorConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!(path = %path.display(), "invalid config: {e}");
        SimulatorConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = SimulatorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.mqtt.broker_url, "tcp://localhost:1883");
        assert_eq!(cfg.electrical.nb_phases, 3);
        assert_eq!(cfg.connector_count(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let mut cfg = SimulatorConfig::default();
        cfg.electrical.nb_phases = 4;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPhases(4))));

        let mut cfg = SimulatorConfig::default();
        cfg.ocpp.number_of_connectors = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoConnector)));

        let mut cfg = SimulatorConfig::default();
        cfg.electrical.max_connector_setpoint = f32::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidSetpoint(_))));
    }

    #[test]
    fn test_ocpp_key_values_ac() {
        let mut cfg = SimulatorConfig::default();
        cfg.ocpp.number_of_connectors = 2;
        let values = cfg.ocpp_key_values();
        assert_eq!(values["NumberOfConnectors"], "2");
        assert_eq!(values["ConnectorPhaseRotation"], "1.RST,2.RST");
        assert_eq!(values["ConnectorPhaseRotationMaxLength"], "2");
        assert_eq!(values["ChargingScheduleAllowedChargingRateUnit"], "Current");
        assert_eq!(values["AuthorizeRemoteTxRequests"], "false");
    }

    #[test]
    fn test_ocpp_key_values_dc() {
        let mut cfg = SimulatorConfig::default();
        cfg.electrical.connector_type = ConnectorType::DC;
        let values = cfg.ocpp_key_values();
        assert_eq!(values["ConnectorPhaseRotation"], "1.NotApplicable");
        assert_eq!(values["ChargingScheduleAllowedChargingRateUnit"], "Power");
        assert!(values["MeterValuesSampledData"].contains("Power.Offered"));
    }

    #[tokio::test]
    async fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "charge_point:\n  identifier: cp42\nelectrical:\n  connector_type: DC\n  nb_phases: 1\nstandalone:\n  accept_unknown_id_tags: false\n  id_tags:\n    - id: AABB\n      parent: FAMILY\n    - id: BLOCKED\n      status: Blocked"
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).await;
        assert_eq!(cfg.charge_point.identifier, "cp42");
        assert_eq!(cfg.charge_point.vendor, "Open OCPP");
        assert_eq!(cfg.electrical.connector_type, ConnectorType::DC);
        assert_eq!(cfg.ocpp.connection_timeout_secs, 30);
        assert!(!cfg.standalone.accept_unknown_id_tags);
        assert_eq!(cfg.standalone.id_tags[0].parent.as_deref(), Some("FAMILY"));
        assert_eq!(cfg.standalone.id_tags[0].status, AuthorizationStatus::Accepted);
        assert_eq!(cfg.standalone.id_tags[1].status, AuthorizationStatus::Blocked);
    }

    #[tokio::test]
    async fn test_invalid_or_missing_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "electrical: [not, a, map]").unwrap();
        let cfg = load_config(Some(file.path())).await;
        assert_eq!(cfg.electrical.nb_phases, 3);

        let cfg = load_config(Some(Path::new("/nonexistent/cp.yaml"))).await;
        assert_eq!(cfg.charge_point.identifier, "simu_cp");
    }
}
