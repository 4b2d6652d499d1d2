//! Simulated electrical meter, one per connector.
//!
//! Readings live behind a [`Shared`] lock so that the control loop (writer of
//! voltages and consumptions), the periodic update task and the OCPP events
//! handler (readers) can all hold a [`MeterHandle`].

use crate::models::ConnectorType;
use crate::state::{new_state, Shared};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Période de mise à jour des mesures
pub const UPDATE_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("no tokio runtime available to drive the meter timer")]
    NoRuntime,
    #[error("meter for connector {0} already started")]
    AlreadyStarted(u32),
}

#[derive(Debug, Clone)]
struct Readings {
    voltages: Vec<f32>,
    consumptions: Vec<f32>,
    powers: Vec<f32>,
    /// Énergie cumulée en mWh
    energy_mwh: i64,
    power_factor: f32,
}

/// Accès partagé aux mesures d'un compteur
#[derive(Debug, Clone)]
pub struct MeterHandle {
    readings: Shared<Readings>,
    kind: ConnectorType,
}

impl MeterHandle {
    pub fn new(phases: usize, kind: ConnectorType) -> Self {
        Self {
            readings: new_state(Readings {
                voltages: vec![0.0; phases],
                consumptions: vec![0.0; phases],
                powers: vec![0.0; phases],
                energy_mwh: 0,
                power_factor: 1.0,
            }),
            kind,
        }
    }

    /// Tensions en V ; les valeurs au-delà du nombre de phases sont ignorées
    pub fn set_voltages(&self, values: &[f32]) {
        let mut r = self.readings.lock();
        for (slot, value) in r.voltages.iter_mut().zip(values) {
            *slot = *value;
        }
    }

    /// Consommations (A en AC, W en DC)
    pub fn set_consumptions(&self, values: &[f32]) {
        let mut r = self.readings.lock();
        for (slot, value) in r.consumptions.iter_mut().zip(values) {
            *slot = *value;
        }
    }

    pub fn set_power_factor(&self, value: f32) {
        self.readings.lock().power_factor = value;
    }

    pub fn power_factor(&self) -> f32 {
        self.readings.lock().power_factor
    }

    pub fn voltages(&self) -> Vec<f32> {
        self.readings.lock().voltages.clone()
    }

    pub fn consumptions(&self) -> Vec<f32> {
        self.readings.lock().consumptions.clone()
    }

    /// Puissances instantanées en W
    pub fn instant_powers(&self) -> Vec<f32> {
        self.readings.lock().powers.clone()
    }

    /// Énergie cumulée en Wh (tronquée)
    pub fn energy(&self) -> i64 {
        self.readings.lock().energy_mwh / 1000
    }

    pub fn connector_type(&self) -> ConnectorType {
        self.kind
    }

    /// Recalcule les puissances puis intègre l'énergie sur `period`.
    ///
    /// Chaque phase contribue `trunc(trunc(P) * period_ms / 3600)` mWh ; le reste
    /// fractionnaire est perdu d'une mise à jour à l'autre.
    pub fn update(&self, period: Duration) {
        let mut guard = self.readings.lock();
        let r = &mut *guard;

        match self.kind {
            ConnectorType::AC => {
                for ((power, voltage), current) in
                    r.powers.iter_mut().zip(&r.voltages).zip(&r.consumptions)
                {
                    *power = voltage * current;
                }
            }
            // en DC la consommation est déjà une puissance, sur un seul rail
            ConnectorType::DC => {
                let first = (r.powers.first_mut(), r.consumptions.first());
                if let (Some(power), Some(consumption)) = first {
                    *power = *consumption;
                }
            }
        }

        let period_ms = period.as_millis() as i64;
        let added: i64 = r
            .powers
            .iter()
            .map(|p| ((*p as i64) * period_ms / 3600).max(0))
            .sum();
        r.energy_mwh += added;
    }
}

/// Compteur simulé : les mesures plus la tâche de mise à jour périodique
pub struct Meter {
    connector_id: u32,
    handle: MeterHandle,
    task: Option<JoinHandle<()>>,
}

impl Meter {
    pub fn new(connector_id: u32, phases: usize, kind: ConnectorType) -> Self {
        Self {
            connector_id,
            handle: MeterHandle::new(phases, kind),
            task: None,
        }
    }

    pub fn handle(&self) -> &MeterHandle {
        &self.handle
    }

    /// Démarre la mise à jour toutes les [`UPDATE_PERIOD`] sur le runtime courant
    pub fn start(&mut self) -> Result<(), MeterError> {
        if self.task.is_some() {
            return Err(MeterError::AlreadyStarted(self.connector_id));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MeterError::NoRuntime)?;
        let handle = self.handle.clone();
        self.task = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval(UPDATE_PERIOD);
            // le premier tick est immédiat
            interval.tick().await;
            loop {
                interval.tick().await;
                handle.update(UPDATE_PERIOD);
            }
        }));
        debug!(connector = self.connector_id, "meter started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(connector = self.connector_id, "meter stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Meter {
    fn drop(&mut self) {
        self.stop();
    }
}
