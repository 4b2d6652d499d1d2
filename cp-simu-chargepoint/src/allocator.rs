/**
 * ALLOCATEUR DE CONSIGNES - Smart charging entre connecteurs d'une même borne
 *
 * Pour chaque tick :
 * 1. consigne OCPP = max du connecteur, abaissée par la limite connecteur éventuelle
 * 2. plafond borne = max borne, abaissé par la plus petite limite borne reçue
 * 3. consigne = min(consigne OCPP, capacité du câble)
 * 4. si la somme des connecteurs en charge dépasse le plafond borne, toutes les
 *    consignes positives sont réduites du même ratio
 * 5. arrondi à l'entier inférieur, jamais négatif
 */

use crate::connector::ConnectorState;
use crate::models::{ConnectorStatus, SmartChargingLimits};

/// Une limite n'est retenue que si elle est exploitable (ni NaN, ni négative)
fn usable(limit: Option<f32>) -> Option<f32> {
    limit.filter(|value| *value >= 0.0)
}

/// Calcule les consignes de tous les connecteurs. `limits[i]` correspond à
/// `connectors[i]`. Retourne le plafond borne retenu pour ce tick.
pub fn allocate(
    station_max: f32,
    connectors: &mut [ConnectorState],
    limits: &[Option<SmartChargingLimits>],
) -> f32 {
    let mut station_ceiling = station_max;

    for (index, connector) in connectors.iter_mut().enumerate() {
        connector.ocpp_setpoint = connector.max_setpoint;

        let Some(limits) = limits.get(index).copied().flatten() else {
            continue;
        };
        if let Some(station) = usable(limits.station) {
            if station < station_ceiling {
                station_ceiling = station;
            }
        }
        if let Some(limit) = usable(limits.connector) {
            if limit < connector.max_setpoint {
                connector.ocpp_setpoint = limit;
            }
        }
    }

    for connector in connectors.iter_mut() {
        connector.setpoint = connector.ocpp_setpoint.min(connector.car_cable_capacity);
    }

    let total: f32 = connectors
        .iter()
        .filter(|c| c.status == ConnectorStatus::Charging && c.setpoint > 0.0)
        .map(|c| c.setpoint)
        .sum();
    if total > station_ceiling {
        let ratio = station_ceiling / total;
        for connector in connectors.iter_mut().filter(|c| c.setpoint > 0.0) {
            connector.setpoint *= ratio;
        }
    }

    for connector in connectors.iter_mut() {
        connector.setpoint = connector.setpoint.floor().max(0.0);
    }

    station_ceiling
}
