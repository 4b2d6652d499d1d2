use crate::config::SimulatorConfig;
use crate::models::ConnectorType;
use clap::Parser;
use std::path::PathBuf;

/// Ligne de commande ; chaque option renseignée écrase la valeur du fichier YAML
#[derive(Debug, Parser)]
#[command(
    name = "cp-simu-chargepoint",
    version,
    about = "Simulated OCPP 1.6 charge point driven over MQTT"
)]
pub struct Cli {
    /// Configuration file (defaults to $CP_SIMU_CONFIG, then ./chargepoint.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Working directory for the charge point's files
    #[arg(short = 'w', long)]
    pub working_dir: Option<PathBuf>,

    /// Central system URL
    #[arg(short = 't', long)]
    pub central_system_url: Option<String>,

    /// Charge point identifier
    #[arg(short = 'c', long)]
    pub chargepoint_id: Option<String>,

    #[arg(short = 's', long)]
    pub serial_number: Option<String>,

    #[arg(short = 'n', long)]
    pub connectors: Option<u32>,

    /// Number of phases (1 to 3)
    #[arg(short = 'p', long)]
    pub phases: Option<u32>,

    /// MQTT broker URL
    #[arg(short = 'b', long)]
    pub broker_url: Option<String>,

    /// Charge point setpoint ceiling (A for AC, W for DC)
    #[arg(short = 'm', long)]
    pub max_charge_point_setpoint: Option<f32>,

    /// Per-connector setpoint ceiling (A for AC, W for DC)
    #[arg(short = 'i', long)]
    pub max_connector_setpoint: Option<f32>,

    /// AC or DC
    #[arg(short = 'e', long, value_parser = parse_connector_type)]
    pub connector_type: Option<ConnectorType>,

    /// Vendor name, may span several words
    #[arg(short = 'v', long, num_args = 1..)]
    pub vendor: Option<Vec<String>>,

    /// Operating voltage in V
    #[arg(short = 'o', long)]
    pub voltage: Option<f32>,
}

impl Cli {
    pub fn apply(&self, config: &mut SimulatorConfig) {
        if let Some(dir) = &self.working_dir {
            config.charge_point.working_dir = Some(dir.clone());
        }
        if let Some(url) = &self.central_system_url {
            config.charge_point.central_system_url = url.clone();
        }
        if let Some(id) = &self.chargepoint_id {
            config.charge_point.identifier = id.clone();
        }
        if let Some(serial) = &self.serial_number {
            config.charge_point.serial_number = serial.clone();
        }
        if let Some(count) = self.connectors {
            config.ocpp.number_of_connectors = count;
        }
        if let Some(phases) = self.phases {
            config.electrical.nb_phases = phases;
        }
        if let Some(url) = &self.broker_url {
            config.mqtt.broker_url = url.clone();
        }
        if let Some(max) = self.max_charge_point_setpoint {
            config.electrical.max_charge_point_setpoint = max;
        }
        if let Some(max) = self.max_connector_setpoint {
            config.electrical.max_connector_setpoint = max;
        }
        if let Some(kind) = self.connector_type {
            config.electrical.connector_type = kind;
        }
        if let Some(words) = &self.vendor {
            config.charge_point.vendor = words.join(" ");
        }
        if let Some(voltage) = self.voltage {
            config.charge_point.voltage = voltage;
        }
    }
}

fn parse_connector_type(value: &str) -> Result<ConnectorType, String> {
    match value.to_ascii_uppercase().as_str() {
        "AC" => Ok(ConnectorType::AC),
        "DC" => Ok(ConnectorType::DC),
        other => Err(format!("unknown connector type `{other}`, expected AC or DC")),
    }
}
