//! Per-connector status state machine.
//!
//! [`StatusMachine::evaluate`] is a pure decision step: it reads one connector,
//! the one-shot inputs staged for it this tick and asks the [`Authority`] about
//! id tags. Everything it wants done is returned as a list of [`Effect`]s, in
//! order, which the control loop applies (protocol notifications, acknowledging
//! staged inputs, updating the connector's tags).

use crate::connector::ConnectorState;
use crate::models::{
    Authorization, AuthorizationStatus, ChargePointErrorCode, ConnectorStatus, Reason,
};
use std::time::{Duration, Instant};

/// Source des décisions d'autorisation (pile OCPP ou double de test)
pub trait Authority {
    fn authorize(&self, connector_id: u32, id_tag: &str) -> Authorization;
    fn start_transaction(&self, connector_id: u32, id_tag: &str) -> AuthorizationStatus;
}

/// Entrées ponctuelles en attente pour un connecteur, copiées une fois par tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingInputs {
    /// Badge présenté localement (MQTT `id_tag`)
    pub local_id_tag: Option<String>,
    /// Badge d'un RemoteStartTransaction
    pub remote_start: Option<String>,
    pub remote_stop: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Notify {
        status: ConnectorStatus,
        error_code: ChargePointErrorCode,
    },
    StopTransaction {
        id_tag: String,
        reason: Reason,
    },
    SetIdTag {
        id_tag: String,
        parent_id_tag: String,
    },
    ClearIdTag,
    RestartPreparingTimer,
    /// Acquitte le badge local, seulement s'il n'a pas changé depuis la copie
    ConsumeLocalIdTag(String),
    ConsumeRemoteStart,
    ConsumeRemoteStop,
    ClearUnavailablePending,
}

/// Résultat d'une évaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    pub effects: Vec<Effect>,
}

impl Step {
    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    fn notify(&mut self, status: ConnectorStatus) {
        self.notify_with(status, ChargePointErrorCode::NoError);
    }

    fn notify_with(&mut self, status: ConnectorStatus, error_code: ChargePointErrorCode) {
        self.push(Effect::Notify { status, error_code });
    }

    fn fault(&mut self) {
        self.notify_with(ConnectorStatus::Faulted, ChargePointErrorCode::OtherError);
    }

    /// Statut demandé à la pile pendant ce tick, s'il y en a un
    pub fn requested_status(&self) -> Option<ConnectorStatus> {
        self.effects.iter().rev().find_map(|e| match e {
            Effect::Notify { status, .. } => Some(*status),
            _ => None,
        })
    }

    pub fn stop_reason(&self) -> Option<Reason> {
        self.effects.iter().find_map(|e| match e {
            Effect::StopTransaction { reason, .. } => Some(*reason),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StatusMachine {
    pub connection_timeout: Duration,
    pub authorize_remote_tx_requests: bool,
}

impl StatusMachine {
    pub fn new(connection_timeout: Duration, authorize_remote_tx_requests: bool) -> Self {
        Self { connection_timeout, authorize_remote_tx_requests }
    }

    /// Calcule le prochain statut d'un connecteur
    pub fn evaluate<A: Authority + ?Sized>(
        &self,
        connector: &ConnectorState,
        inputs: &PendingInputs,
        authority: &A,
        now: Instant,
    ) -> Step {
        let mut step = Step::default();
        match connector.status {
            ConnectorStatus::Available => {
                self.on_available(connector, inputs, authority, &mut step)
            }
            ConnectorStatus::Preparing => {
                self.on_preparing(connector, inputs, authority, now, &mut step)
            }
            ConnectorStatus::SuspendedEVSE => {
                if self.stop_condition(connector, inputs, authority, &mut step) {
                    step.notify(ConnectorStatus::Finishing);
                } else if connector.setpoint != 0.0 {
                    if !connector.car_ready {
                        step.notify(ConnectorStatus::SuspendedEV);
                    } else {
                        step.notify(ConnectorStatus::Charging);
                    }
                }
            }
            ConnectorStatus::SuspendedEV => {
                if self.stop_condition(connector, inputs, authority, &mut step) {
                    step.notify(ConnectorStatus::Finishing);
                } else if connector.setpoint == 0.0 {
                    step.notify(ConnectorStatus::SuspendedEVSE);
                } else if connector.car_ready {
                    step.notify(ConnectorStatus::Charging);
                }
            }
            ConnectorStatus::Charging => {
                if self.stop_condition(connector, inputs, authority, &mut step) {
                    step.notify(ConnectorStatus::Finishing);
                } else if connector.setpoint == 0.0 {
                    step.notify(ConnectorStatus::SuspendedEVSE);
                } else if !connector.car_ready {
                    step.notify(ConnectorStatus::SuspendedEV);
                }
            }
            ConnectorStatus::Finishing => {
                if connector.fault_pending {
                    step.fault();
                } else if !connector.cable_plugged() {
                    step.notify(ConnectorStatus::Available);
                }
            }
            ConnectorStatus::Reserved => {
                if self.valid_id_tag(connector, inputs, authority, &mut step).is_some() {
                    step.notify(ConnectorStatus::Preparing);
                } else if connector.fault_pending {
                    step.fault();
                } else if connector.unavailable_pending {
                    step.push(Effect::ClearUnavailablePending);
                    step.notify(ConnectorStatus::Unavailable);
                }
            }
            ConnectorStatus::Faulted => {
                if !connector.fault_pending {
                    step.notify(ConnectorStatus::Available);
                }
            }
            // ne sort que sur ChangeAvailability
            ConnectorStatus::Unavailable => {}
        }
        step
    }

    fn on_available<A: Authority + ?Sized>(
        &self,
        connector: &ConnectorState,
        inputs: &PendingInputs,
        authority: &A,
        step: &mut Step,
    ) {
        if connector.cable_plugged() {
            step.notify(ConnectorStatus::Preparing);
        } else if self.valid_id_tag(connector, inputs, authority, step).is_some() {
            step.notify(ConnectorStatus::Preparing);
        } else if connector.fault_pending {
            step.fault();
        } else if connector.unavailable_pending {
            step.push(Effect::ClearUnavailablePending);
            step.notify(ConnectorStatus::Unavailable);
        }
    }

    fn on_preparing<A: Authority + ?Sized>(
        &self,
        connector: &ConnectorState,
        inputs: &PendingInputs,
        authority: &A,
        now: Instant,
        step: &mut Step,
    ) {
        let mut id_tag = connector.id_tag.clone();
        let mut preparing_start = connector.preparing_start;
        if id_tag.is_empty() {
            if let Some(tag) = self.valid_id_tag(connector, inputs, authority, step) {
                step.push(Effect::RestartPreparingTimer);
                preparing_start = now;
                id_tag = tag;
            }
        }

        if connector.cable_plugged() && !id_tag.is_empty() {
            let status = authority.start_transaction(connector.id, &id_tag);
            if status.is_accepted() {
                if connector.setpoint == 0.0 {
                    step.notify(ConnectorStatus::SuspendedEVSE);
                } else if !connector.car_ready {
                    step.notify(ConnectorStatus::SuspendedEV);
                } else {
                    step.notify(ConnectorStatus::Charging);
                }
            } else {
                step.push(Effect::ClearIdTag);
            }
        } else if !connector.cable_plugged() && id_tag.is_empty() {
            step.notify(ConnectorStatus::Available);
        } else if connector.fault_pending {
            step.notify_with(ConnectorStatus::Preparing, ChargePointErrorCode::OtherError);
        } else if now.saturating_duration_since(preparing_start) >= self.connection_timeout {
            step.notify(ConnectorStatus::Available);
        }
    }

    /// Badge local puis badge distant ; retourne le badge accepté
    fn valid_id_tag<A: Authority + ?Sized>(
        &self,
        connector: &ConnectorState,
        inputs: &PendingInputs,
        authority: &A,
        step: &mut Step,
    ) -> Option<String> {
        let (tag, authorization) = if let Some(tag) = &inputs.local_id_tag {
            step.push(Effect::ConsumeLocalIdTag(tag.clone()));
            (tag, authority.authorize(connector.id, tag))
        } else if let Some(tag) = &inputs.remote_start {
            step.push(Effect::ConsumeRemoteStart);
            let authorization = if self.authorize_remote_tx_requests {
                authority.authorize(connector.id, tag)
            } else {
                Authorization {
                    status: AuthorizationStatus::Accepted,
                    parent_id_tag: connector.parent_id_tag.clone(),
                }
            };
            (tag, authorization)
        } else {
            return None;
        };

        if !authorization.status.is_accepted() {
            return None;
        }
        step.push(Effect::SetIdTag {
            id_tag: tag.clone(),
            parent_id_tag: authorization.parent_id_tag,
        });
        Some(tag.clone())
    }

    /// Conditions d'arrêt, dans l'ordre : badge local, arrêt distant, câble retiré, défaut
    fn stop_condition<A: Authority + ?Sized>(
        &self,
        connector: &ConnectorState,
        inputs: &PendingInputs,
        authority: &A,
        step: &mut Step,
    ) -> bool {
        let stop = if let Some(tag) = &inputs.local_id_tag {
            step.push(Effect::ConsumeLocalIdTag(tag.clone()));
            let valid = *tag == connector.id_tag || {
                let auth = authority.authorize(connector.id, tag);
                auth.status.is_accepted()
                    && !auth.parent_id_tag.is_empty()
                    && auth.parent_id_tag == connector.parent_id_tag
            };
            valid.then(|| (tag.clone(), Reason::Local))
        } else if inputs.remote_stop {
            step.push(Effect::ConsumeRemoteStop);
            Some((String::new(), Reason::Remote))
        } else if !connector.cable_plugged() {
            Some((String::new(), Reason::EVDisconnected))
        } else if connector.fault_pending {
            Some((String::new(), Reason::Other))
        } else {
            None
        };

        match stop {
            Some((id_tag, reason)) => {
                step.push(Effect::StopTransaction { id_tag, reason });
                true
            }
            None => false,
        }
    }
}
