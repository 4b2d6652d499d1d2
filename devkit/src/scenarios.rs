//! Scénarios de bout en bout : borne complète, pile embarquée, MQTT simulé.

use crate::chargepoint_test;
use crate::test_utils::TestHarness;
use cp_simu_chargepoint::config::{IdTagConf, SimulatorConfig};
use cp_simu_chargepoint::models::{
    AuthorizationStatus, AvailabilityStatus, AvailabilityType, ChargePointErrorCode,
    ConnectorStatus, Measurand, Reason,
};
use cp_simu_chargepoint::mqtt::Command;
use std::time::Duration;

/// Branche, badge et amène le connecteur en charge (3 ticks)
fn charge(
    harness: &mut TestHarness,
    connector_id: u32,
    id_tag: &str,
    cable: f32,
    consumption: f32,
) {
    harness.plug(connector_id, cable, true, [consumption; 3]).unwrap();
    harness.tick();
    harness.badge(connector_id, id_tag).unwrap();
    harness.ticks(2);
}

fn member(id: &str, parent: &str) -> IdTagConf {
    IdTagConf {
        id: id.into(),
        parent: Some(parent.into()),
        status: AuthorizationStatus::Accepted,
    }
}

fn two_connectors(max_charge_point_setpoint: f32) -> TestHarness {
    let mut config = SimulatorConfig::default();
    config.ocpp.number_of_connectors = 2;
    config.electrical.max_charge_point_setpoint = max_charge_point_setpoint;
    let mut harness = TestHarness::with_config(config);
    harness.boot();
    harness
}

fn last_stop_reason(harness: &TestHarness) -> Option<Reason> {
    harness.stack.closed_transactions().last().and_then(|t| t.stop_reason)
}

chargepoint_test!(test_plugging_cable_moves_to_preparing, |harness: &mut TestHarness| {
    harness.plug(1, 32.0, true, [0.0; 3])?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Preparing);

    harness.tick();
    assert_eq!(harness.status(1), Some(ConnectorStatus::Preparing));
    let connector = harness.chargepoint.connector(1).unwrap();
    assert_eq!(connector.preparing_start, harness.now());
    harness.assert_status(1, ConnectorStatus::Preparing)?;
    Ok(())
});

#[test]
fn test_fair_share_between_charging_and_suspended_connectors() {
    let mut harness = two_connectors(32.0);
    harness.stack.set_station_limit(Some(20.0));

    harness.plug(1, 16.0, true, [16.0; 3]).unwrap();
    harness.plug(2, 16.0, false, [16.0; 3]).unwrap();
    harness.tick();
    harness.badge(1, "X").unwrap();
    harness.badge(2, "Y").unwrap();
    harness.ticks(2);

    assert_eq!(harness.status(1), Some(ConnectorStatus::Charging));
    assert_eq!(harness.status(2), Some(ConnectorStatus::SuspendedEV));
    assert_eq!(harness.chargepoint.connector(1).unwrap().setpoint, 16.0);

    harness.set_car_ready(2, true).unwrap();
    harness.ticks(2);

    assert_eq!(harness.status(2), Some(ConnectorStatus::Charging));
    for id in [1, 2] {
        let telemetry = harness.telemetry(id).unwrap();
        assert_eq!(telemetry.setpoint, 10.0);
        assert_eq!(telemetry.consumption_l1, 10.0);
    }
    assert!(harness.charging_setpoint_sum() <= 20.0);
    harness.assert_setpoints_bounded().unwrap();
}

chargepoint_test!(test_unplug_stops_transaction, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    assert_eq!(harness.status(1), Some(ConnectorStatus::Charging));
    assert!(harness.stack.transaction(1).is_some());

    harness.unplug(1)?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(last_stop_reason(harness), Some(Reason::EVDisconnected));
    assert!(harness.stack.transaction(1).is_none());

    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Available);
    harness.tick();
    let connector = harness.chargepoint.connector(1).unwrap();
    assert_eq!(connector.status, ConnectorStatus::Available);
    assert!(connector.id_tag.is_empty());
    assert_eq!(harness.telemetry(1)?.consumption_l1, 0.0);
    Ok(())
});

#[test]
fn test_station_ceiling_scales_both_connectors() {
    let mut harness = two_connectors(40.0);
    harness.plug(1, 32.0, true, [32.0; 3]).unwrap();
    harness.plug(2, 32.0, true, [32.0; 3]).unwrap();
    harness.tick();
    harness.badge(1, "A").unwrap();
    harness.badge(2, "B").unwrap();
    harness.ticks(2);

    for id in [1, 2] {
        assert_eq!(harness.status(id), Some(ConnectorStatus::Charging));
        let telemetry = harness.telemetry(id).unwrap();
        assert_eq!(telemetry.ocpp_setpoint, 32.0);
        assert_eq!(telemetry.setpoint, 20.0);
        assert_eq!(telemetry.consumption_l2, 20.0);
    }
    assert_eq!(harness.charging_setpoint_sum(), 40.0);
}

#[test]
fn test_steady_charging_is_idempotent() {
    let mut harness = two_connectors(40.0);
    charge(&mut harness, 1, "A", 32.0, 32.0);
    harness.tick();

    let topic = harness.connector_topic(1);
    harness.ticks(2);
    let messages = harness.mqtt_client.find_messages_by_topic(&topic);
    let last_two = &messages[messages.len() - 2..];
    assert_eq!(last_two[0].payload, last_two[1].payload);
    assert_eq!(harness.stack_status(1), ConnectorStatus::Charging);
    assert!(harness.stack.closed_transactions().is_empty());
}

#[test]
fn test_setpoint_bounds_hold_through_a_session() {
    let mut harness = two_connectors(40.0);
    harness.stack.set_connector_limit(2, Some(12.0));
    harness.plug(1, 32.0, true, [32.0; 3]).unwrap();
    harness.plug(2, 16.0, true, [16.0; 3]).unwrap();
    harness.tick();
    harness.badge(1, "A").unwrap();
    harness.badge(2, "B").unwrap();
    for _ in 0..4 {
        harness.tick();
        harness.assert_setpoints_bounded().unwrap();
        assert!(harness.charging_setpoint_sum() <= 40.0);
    }
    let connector = harness.chargepoint.connector(2).unwrap();
    assert_eq!(connector.ocpp_setpoint, 12.0);
    assert!(connector.setpoint <= 12.0);

    harness.stack.set_station_limit(Some(10.0));
    harness.ticks(2);
    harness.assert_setpoints_bounded().unwrap();
    assert!(harness.charging_setpoint_sum() <= 10.0);
}

chargepoint_test!(test_unplug_without_tag_leaves_preparing, |harness: &mut TestHarness| {
    harness.plug(1, 32.0, true, [0.0; 3])?;
    harness.ticks(2);
    harness.unplug(1)?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Available);
    Ok(())
});

chargepoint_test!(test_preparing_times_out, |harness: &mut TestHarness| {
    harness.plug(1, 32.0, true, [0.0; 3])?;
    harness.ticks(2);
    harness.advance(Duration::from_secs(29));
    assert_eq!(harness.stack_status(1), ConnectorStatus::Preparing);

    harness.advance(Duration::from_secs(1));
    assert_eq!(harness.stack_status(1), ConnectorStatus::Available);
    Ok(())
});

chargepoint_test!(test_same_badge_stops_locally, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    harness.badge(1, "AABB")?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(last_stop_reason(harness), Some(Reason::Local));
    assert_eq!(harness.inbox.snapshot()[0].id_tag, None);
    Ok(())
});

#[test]
fn test_badge_from_same_group_stops_session() {
    let mut config = SimulatorConfig::default();
    config.standalone.accept_unknown_id_tags = false;
    config.standalone.id_tags = vec![
        member("X", "G"),
        member("Z", "G"),
        member("W", "H"),
    ];
    let mut harness = TestHarness::with_config(config);
    harness.boot();
    charge(&mut harness, 1, "X", 32.0, 16.0);
    assert_eq!(harness.chargepoint.connector(1).unwrap().parent_id_tag, "G");

    harness.badge(1, "W").unwrap();
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Charging);

    harness.badge(1, "Z").unwrap();
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(harness.stack.closed_transactions()[0].stop_reason, Some(Reason::Local));
}

#[test]
fn test_unknown_badge_is_rejected() {
    let mut config = SimulatorConfig::default();
    config.standalone.accept_unknown_id_tags = false;
    let mut harness = TestHarness::with_config(config);
    harness.boot();

    harness.plug(1, 32.0, true, [16.0; 3]).unwrap();
    harness.tick();
    harness.badge(1, "NOPE").unwrap();
    harness.ticks(2);

    assert_eq!(harness.status(1), Some(ConnectorStatus::Preparing));
    assert!(harness.stack.transaction(1).is_none());
    assert_eq!(harness.inbox.snapshot()[0].id_tag, None);
}

chargepoint_test!(test_remote_start_then_remote_stop, |harness: &mut TestHarness| {
    assert!(harness.stack.remote_start(1, "REMOTE"));
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Preparing);
    assert_eq!(harness.chargepoint.connector(1).unwrap().id_tag, "REMOTE");

    harness.plug(1, 32.0, true, [16.0; 3])?;
    harness.tick();
    // la capacité du câble ne borne la consigne qu'au tick suivant
    assert_eq!(harness.stack_status(1), ConnectorStatus::SuspendedEVSE);
    assert_eq!(harness.stack.transaction(1).unwrap().id_tag, "REMOTE");
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Charging);

    harness.tick();
    assert!(harness.stack.remote_stop(1));
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(last_stop_reason(harness), Some(Reason::Remote));
    assert!(!harness.events.pending()[0].remote_stop);
    Ok(())
});

chargepoint_test!(test_deauthorized_transaction_is_stopped, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    assert!(harness.stack.deauthorize(1));
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(last_stop_reason(harness), Some(Reason::Remote));
    Ok(())
});

chargepoint_test!(test_car_not_ready_suspends, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    harness.set_car_ready(1, false)?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::SuspendedEV);

    harness.tick();
    assert_eq!(harness.telemetry(1)?.consumption_l1, 0.0);

    harness.set_car_ready(1, true)?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Charging);
    Ok(())
});

chargepoint_test!(test_zero_limit_suspends_evse, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    harness.stack.set_connector_limit(1, Some(0.0));
    harness.ticks(2);
    assert_eq!(harness.status(1), Some(ConnectorStatus::SuspendedEVSE));

    harness.stack.set_connector_limit(1, None);
    harness.ticks(2);
    assert_eq!(harness.status(1), Some(ConnectorStatus::Charging));
    Ok(())
});

chargepoint_test!(test_fault_during_charge, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    harness.fault(1, true)?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Finishing);
    assert_eq!(last_stop_reason(harness), Some(Reason::Other));

    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Faulted);
    assert_eq!(harness.stack.error_code(1), Some(ChargePointErrorCode::OtherError));

    harness.fault(1, false)?;
    harness.ticks(2);
    assert_eq!(harness.status(1), Some(ConnectorStatus::Available));
    Ok(())
});

chargepoint_test!(test_unavailable_deferred_until_session_ends, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    let result = harness.stack.change_availability(1, AvailabilityType::Inoperative);
    assert_eq!(result, AvailabilityStatus::Scheduled);

    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Charging);

    harness.unplug(1)?;
    harness.ticks(3);
    assert_eq!(harness.stack_status(1), ConnectorStatus::Unavailable);
    assert!(!harness.events.pending()[0].unavailable_pending);

    harness.tick();
    harness.assert_status(1, ConnectorStatus::Unavailable)?;

    let result = harness.stack.change_availability(1, AvailabilityType::Operative);
    assert_eq!(result, AvailabilityStatus::Accepted);
    harness.tick();
    assert_eq!(harness.status(1), Some(ConnectorStatus::Available));
    Ok(())
});

chargepoint_test!(test_reserved_connector_accepts_badge, |harness: &mut TestHarness| {
    assert!(harness.stack.reserve_now(1, "RES"));
    harness.tick();
    assert_eq!(harness.status(1), Some(ConnectorStatus::Reserved));

    harness.badge(1, "RES")?;
    harness.tick();
    assert_eq!(harness.stack_status(1), ConnectorStatus::Preparing);
    Ok(())
});

chargepoint_test!(test_meter_values_follow_connector, |harness: &mut TestHarness| {
    charge(harness, 1, "AABB", 32.0, 16.0);
    harness.tick();

    let current = harness.events.meter_value(1, Measurand::CurrentImport, Some(2)).unwrap();
    assert_eq!(current[0].value, "16");
    let offered = harness.events.meter_value(1, Measurand::CurrentOffered, None).unwrap();
    assert_eq!(offered[0].value, "32");
    assert!(harness.events.meter_value(1, Measurand::CurrentImport, Some(4)).is_none());
    Ok(())
});

chargepoint_test!(test_link_loss_reported_as_disconnected, |harness: &mut TestHarness| {
    harness.tick();
    assert_eq!(harness.charge_point_status()?.status, "Accepted");

    harness.stack.set_link(false);
    harness.tick();
    assert_eq!(harness.charge_point_status()?.status, "Disconnected");

    harness.stack.set_link(true);
    harness.tick();
    assert_eq!(harness.charge_point_status()?.status, "Accepted");
    Ok(())
});

chargepoint_test!(test_commands, |harness: &mut TestHarness| {
    assert_eq!(harness.command("ocpp_config")?, Some(Command::OcppConfig));
    assert!(!harness.inbox.is_end_of_application());
    assert_eq!(harness.command("close")?, Some(Command::Close));
    assert!(harness.inbox.is_end_of_application());
    Ok(())
});

chargepoint_test!(test_malformed_car_update_is_dropped, |harness: &mut TestHarness| {
    harness.plug(1, 32.0, true, [16.0; 3])?;
    assert!(harness.send_raw(1, "car", br#"{"cable": "lots"}"#).is_err());
    harness.tick();
    assert_eq!(harness.telemetry(1)?.car_cable_capacity, 32.0);
    Ok(())
});

#[tokio::test(start_paused = true)]
async fn test_meter_energy_accumulates_while_charging() {
    let mut harness = TestHarness::new();
    harness.chargepoint.start().unwrap();
    charge(&mut harness, 1, "AABB", 32.0, 16.0);

    tokio::time::sleep(Duration::from_millis(1250)).await;

    let meter = harness.chargepoint.connector(1).unwrap().meter.handle().clone();
    assert_eq!(meter.instant_powers(), vec![3680.0; 3]);
    // 2 mises à jour * 3 phases * trunc(3680 * 500 / 3600) mWh
    assert_eq!(meter.energy(), 3066 / 1000);

    harness.unplug(1).unwrap();
    harness.tick();
    assert_eq!(harness.stack.closed_transactions()[0].meter_stop, Some(3));
}

#[tokio::test]
async fn test_close_ends_run_loop() {
    let mut harness = TestHarness::new();
    harness.boot();
    harness.command("close").unwrap();

    harness.chargepoint.run().await;
    harness.chargepoint.stop();
    assert_eq!(harness.charge_point_status().unwrap().status, "Dead");
}
