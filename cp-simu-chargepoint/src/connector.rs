use crate::meter::Meter;
use crate::models::{CarUpdate, ConnectorStatus, ConnectorTelemetry, ConnectorType};
use std::time::Instant;

/// Données d'un connecteur physique, possédées par la boucle de contrôle
pub struct ConnectorState {
    pub id: u32,
    pub status: ConnectorStatus,
    pub id_tag: String,
    pub parent_id_tag: String,
    pub max_setpoint: f32,
    pub ocpp_setpoint: f32,
    pub setpoint: f32,
    pub car_consumption: [f32; 3],
    /// 0 = pas de câble branché
    pub car_cable_capacity: f32,
    pub car_ready: bool,
    pub fault_pending: bool,
    pub unavailable_pending: bool,
    pub preparing_start: Instant,
    pub meter: Meter,
}

impl ConnectorState {
    pub fn new(id: u32, max_setpoint: f32, phases: usize, kind: ConnectorType) -> Self {
        Self {
            id,
            status: ConnectorStatus::Available,
            id_tag: String::new(),
            parent_id_tag: String::new(),
            max_setpoint,
            ocpp_setpoint: max_setpoint,
            setpoint: 0.0,
            car_consumption: [0.0; 3],
            car_cable_capacity: 0.0,
            car_ready: true,
            fault_pending: false,
            unavailable_pending: false,
            preparing_start: Instant::now(),
            meter: Meter::new(id, phases, kind),
        }
    }

    pub fn cable_plugged(&self) -> bool {
        self.car_cable_capacity != 0.0
    }

    /// Actions d'entrée dans un statut
    pub fn enter(&mut self, status: ConnectorStatus, now: Instant) {
        match status {
            ConnectorStatus::Available => {
                self.id_tag.clear();
                self.parent_id_tag.clear();
            }
            ConnectorStatus::Preparing => self.preparing_start = now,
            _ => {}
        }
        self.status = status;
    }

    /// Applique une mise à jour véhicule ; les champs absents sont conservés
    pub fn apply_car(&mut self, update: &CarUpdate) {
        if let Some(cable) = update.cable {
            self.car_cable_capacity = cable;
        }
        if let Some(ready) = update.ready {
            self.car_ready = ready;
        }
        let phases = [update.consumption_l1, update.consumption_l2, update.consumption_l3];
        for (slot, value) in self.car_consumption.iter_mut().zip(phases) {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    /// Courant (ou puissance en DC) réellement tiré par phase : min(véhicule, consigne)
    /// en charge, 0 sinon
    pub fn consumption(&self, nb_phases: usize) -> Vec<f32> {
        let phases = match self.meter.handle().connector_type() {
            ConnectorType::AC => nb_phases.min(3),
            ConnectorType::DC => 1,
        };
        (0..nb_phases)
            .map(|i| {
                if self.status == ConnectorStatus::Charging && i < phases {
                    self.car_consumption[i].min(self.setpoint)
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn telemetry(&self, nb_phases: usize) -> ConnectorTelemetry {
        let measured = self.meter.handle().consumptions();
        let phase = |values: &[f32], i: usize| -> f32 {
            if i < nb_phases {
                values.get(i).copied().unwrap_or(0.0)
            } else {
                0.0
            }
        };
        ConnectorTelemetry {
            status: self.status.as_str().to_string(),
            id_tag: self.id_tag.clone(),
            max_setpoint: self.max_setpoint,
            ocpp_setpoint: self.ocpp_setpoint,
            setpoint: self.setpoint,
            car_consumption_l1: phase(&self.car_consumption, 0),
            car_consumption_l2: phase(&self.car_consumption, 1),
            car_consumption_l3: phase(&self.car_consumption, 2),
            car_cable_capacity: self.car_cable_capacity,
            car_ready: self.car_ready,
            consumption_l1: phase(&measured, 0),
            consumption_l2: phase(&measured, 1),
            consumption_l3: phase(&measured, 2),
        }
    }
}
