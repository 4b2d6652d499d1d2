/**
 * CP SIMU CHARGEPOINT - Point d'entrée
 *
 * RÔLE : configuration (YAML + ligne de commande), pile OCPP embarquée,
 * client MQTT, puis boucle de la borne jusqu'à `close` ou Ctrl-C.
 */

use anyhow::{Context, Result};
use clap::Parser;
use cp_simu_chargepoint::cli::Cli;
use cp_simu_chargepoint::config::load_config;
use cp_simu_chargepoint::mqtt::{MqttManager, MqttSettings};
use cp_simu_chargepoint::ocpp::OcppStack;
use cp_simu_chargepoint::status::{status_message, DEAD};
use cp_simu_chargepoint::{
    build_connectors, EventsHandler, Inbox, SimulatedChargePoint, StandaloneStack,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cp_simu_chargepoint=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).await;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if let Some(dir) = &config.charge_point.working_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create working directory {}", dir.display()))?;
    }

    info!(
        id = %config.charge_point.identifier,
        central_system = %config.charge_point.central_system_url,
        broker = %config.mqtt.broker_url,
        "starting simulated charge point"
    );

    // connecteurs et compteurs
    let connectors = build_connectors(&config);
    let events = Arc::new(EventsHandler::new(
        connectors.iter().map(|c| c.meter.handle().clone()).collect(),
    ));
    let stack: Arc<dyn OcppStack> =
        Arc::new(StandaloneStack::new(events.clone(), config.standalone.clone()));

    // bus MQTT
    let inbox = Inbox::new(&config.charge_point.identifier, config.connector_count());
    let settings = MqttSettings {
        client_id: config.charge_point.identifier.clone(),
        broker_url: config.mqtt.broker_url.clone(),
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        retry_delay: Duration::from_secs(config.mqtt.retry_delay_secs),
        last_will: serde_json::to_vec(&status_message(&config, DEAD))
            .context("cannot encode last will")?,
        ocpp_config: config.ocpp_key_values(),
    };
    let mqtt = MqttManager::spawn(settings, inbox.clone()).context("cannot start mqtt client")?;
    let mqtt = Arc::new(mqtt);

    let mut chargepoint =
        SimulatedChargePoint::new(config, connectors, stack, events, inbox.clone(), mqtt.clone());
    chargepoint.start().context("cannot start meters")?;

    let signal_inbox = inbox.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            signal_inbox.request_end();
        }
    });

    chargepoint.run().await;
    chargepoint.stop();
    drop(chargepoint);

    match Arc::try_unwrap(mqtt) {
        Ok(mqtt) => mqtt.shutdown().await,
        Err(_) => warn!("mqtt client still in use, not disconnecting"),
    }
    Ok(())
}
