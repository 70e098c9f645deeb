//! Transaction lifecycle: StartTransaction, MeterValues, StopTransaction

mod common;

use std::time::Duration;

use common::*;
use csms_adapter_ocpp::ocpp::AuthorizationStatus;
use csms_adapter_ocpp::services::{SiteArea, UserRole};
use csms_adapter_ocpp::{EngineConfig, Storage, TenantComponents, TransactionPhase};
use csms_core::{ConnectorStatus, InactivityStatus};
use serde_json::json;

#[tokio::test]
async fn test_session_round_trip() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);

    let started = h.start(1, "TAG1", 0.0, 0).await;
    assert_eq!(started.id_tag_info.status, AuthorizationStatus::Accepted);
    let id = started.transaction_id;
    assert!(h.recorder.contains(&Event::SessionStarted(id)));

    let connector = h.station().await.connector(1).cloned().unwrap();
    assert_eq!(connector.current_transaction_id, id);
    assert_eq!(connector.current_tag_id.as_deref(), Some("TAG1"));
    assert_eq!(connector.current_user_id.as_deref(), Some("U1"));

    h.energy(1, id, 1000.0, 60).await;
    h.energy(1, id, 2000.0, 120).await;
    assert_eq!(
        h.station().await.connector(1).unwrap().current_total_consumption_wh,
        2000.0
    );

    let stopped = h.stop(id, Some("TAG1"), 3000.0, 180).await;
    assert!(is_accepted(&stopped.id_tag_info));

    let transaction = h.transaction(id).await;
    let stop = transaction.stop.as_ref().unwrap();
    assert_eq!(stop.total_consumption_wh, 3000.0);
    assert_eq!(stop.total_duration_secs, 180);
    assert_eq!(stop.total_inactivity_secs, 0);
    assert_eq!(stop.meter_stop, 3000.0);
    assert_eq!(stop.tag_id.as_deref(), Some("TAG1"));
    assert_eq!(stop.user_id.as_deref(), Some("U1"));
    assert_eq!(transaction.number_of_meter_values, 2);

    let deltas: Vec<f64> = h
        .storage
        .consumptions(TENANT, id)
        .iter()
        .map(|c| c.consumption_wh)
        .collect();
    assert_eq!(deltas, vec![0.0, 1000.0, 1000.0, 1000.0]);

    let connector = h.station().await.connector(1).cloned().unwrap();
    assert_eq!(connector.current_transaction_id, 0);
    assert_eq!(connector.current_total_consumption_wh, 0.0);
    assert!(h.recorder.contains(&Event::SessionEnded(id)));
}

#[tokio::test]
async fn test_energy_only_moves_forward() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    let readings: Vec<_> = [0.0, 1000.0, 2500.0, 2500.0, 4000.0]
        .iter()
        .enumerate()
        .map(|(i, wh)| {
            json!({
                "timestamp": at(i as i64 * 60),
                "sampledValue": [{"value": wh.to_string(), "measurand": "Energy.Active.Import.Register", "unit": "Wh"}]
            })
        })
        .collect();
    h.meter_values(json!({"connectorId": 1, "transactionId": id, "meterValue": readings}))
        .await;

    let consumptions = h.storage.consumptions(TENANT, id);
    let deltas: Vec<f64> = consumptions.iter().skip(1).map(|c| c.consumption_wh).collect();
    assert_eq!(deltas, vec![1000.0, 1500.0, 0.0, 1500.0]);
    assert_eq!(consumptions[3].inactivity_secs, 60);

    let transaction = h.transaction(id).await;
    assert_eq!(transaction.current_total_consumption_wh, 4000.0);
    assert_eq!(transaction.current_total_inactivity_secs, 60);

    // late and repeated readings change nothing
    h.energy(1, id, 3000.0, 120).await;
    h.energy(1, id, 4000.0, 240).await;
    assert_eq!(h.storage.consumptions(TENANT, id).len(), consumptions.len());
    assert_eq!(h.transaction(id).await.current_total_consumption_wh, 4000.0);
}

#[tokio::test]
async fn test_kwh_readings_are_scaled() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.meter_values(json!({
        "connectorId": 1,
        "transactionId": id,
        "meterValue": [{"timestamp": at(60), "sampledValue": [{"value": "1.5", "unit": "kWh"}]}]
    }))
    .await;

    assert_eq!(h.transaction(id).await.current_total_consumption_wh, 1500.0);
}

#[tokio::test]
async fn test_phase_totals_reconciled() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.meter_values(json!({
        "connectorId": 1,
        "transactionId": id,
        "meterValue": [{
            "timestamp": at(60),
            "sampledValue": [
                {"value": "50", "unit": "Wh"},
                {"value": "500", "measurand": "Power.Active.Import", "unit": "W"},
                {"value": "1000", "measurand": "Power.Active.Import", "unit": "W", "phase": "L1"},
                {"value": "1000", "measurand": "Power.Active.Import", "unit": "W", "phase": "L2"},
                {"value": "1000", "measurand": "Power.Active.Import", "unit": "W", "phase": "L3"}
            ]
        }]
    }))
    .await;

    let transaction = h.transaction(id).await;
    assert_eq!(transaction.current_instant.watts.total, Some(3000.0));
    assert_eq!(
        h.station().await.connector(1).unwrap().current_instant.watts.total,
        Some(3000.0)
    );
}

#[tokio::test]
async fn test_resent_start_returns_same_transaction() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);

    let first = h.start(1, "TAG1", 100.0, 0).await;
    let second = h.start(1, "TAG1", 100.0, 0).await;

    assert_eq!(first.transaction_id, second.transaction_id);
    assert_eq!(second.id_tag_info.status, AuthorizationStatus::Accepted);
    assert_eq!(h.storage.transactions(TENANT, STATION, 1).len(), 1);
}

#[tokio::test]
async fn test_new_start_closes_previous_session() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    h.seed_tag("TAG2", "U2", UserRole::Basic);

    let first = h.start(1, "TAG1", 1000.0, 0).await.transaction_id;
    h.energy(1, first, 1500.0, 60).await;
    let second = h.start(1, "TAG2", 1500.0, 120).await.transaction_id;
    assert_ne!(first, second);

    let previous = h.transaction(first).await;
    let stop = previous.stop.expect("closed by the new start");
    assert_eq!(stop.meter_stop, 1500.0);
    assert_eq!(stop.total_consumption_wh, 500.0);

    let open: Vec<_> = h
        .storage
        .transactions(TENANT, STATION, 1)
        .into_iter()
        .filter(|tx| tx.is_active())
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, second);
    assert_eq!(h.station().await.connector(1).unwrap().current_transaction_id, second);
}

#[tokio::test]
async fn test_start_rejected_for_invalid_input() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);

    let on_zero = h.start(0, "TAG1", 0.0, 0).await;
    assert_eq!(on_zero.transaction_id, 0);
    assert_eq!(on_zero.id_tag_info.status, AuthorizationStatus::Invalid);

    let unknown = h.start(1, "NOPE", 0.0, 0).await;
    assert_eq!(unknown.transaction_id, 0);
    assert_eq!(unknown.id_tag_info.status, AuthorizationStatus::Invalid);

    assert!(h.storage.transactions(TENANT, STATION, 1).is_empty());
}

#[tokio::test]
async fn test_meter_values_without_transaction_are_kept_only() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.meter_values(json!({
        "connectorId": 1,
        "meterValue": [{"timestamp": at(60), "sampledValue": [{"value": "900"}]}]
    }))
    .await;
    h.energy(1, 0, 800.0, 90).await;

    assert_eq!(h.storage.meter_values(TENANT).len(), 2);
    assert_eq!(h.transaction(id).await.current_total_consumption_wh, 0.0);
    assert_eq!(h.storage.consumptions(TENANT, id).len(), 1);
}

#[tokio::test]
async fn test_meter_values_for_stopped_transaction_ignored() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;
    h.stop(id, None, 500.0, 60).await;

    h.energy(1, id, 900.0, 120).await;

    let transaction = h.transaction(id).await;
    assert_eq!(transaction.current_total_consumption_wh, 500.0);
    assert_eq!(transaction.stop.unwrap().total_consumption_wh, 500.0);
}

#[tokio::test]
async fn test_stop_twice_is_refused() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    assert!(is_accepted(&h.stop(id, None, 500.0, 60).await.id_tag_info));
    assert!(!is_accepted(&h.stop(id, None, 900.0, 90).await.id_tag_info));
    assert!(!is_accepted(&h.stop(42, None, 900.0, 90).await.id_tag_info));

    assert_eq!(h.transaction(id).await.stop.unwrap().meter_stop, 500.0);
    assert_eq!(h.recorder.count(|e| matches!(e, Event::SessionEnded(_))), 1);
}

#[tokio::test]
async fn test_stop_without_new_reading_still_closes() {
    let h = Harness::with_config(EngineConfig::default());
    h.enable(TenantComponents {
        pricing: true,
        ..Default::default()
    });
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;
    h.energy(1, id, 800.0, 60).await;

    h.stop(id, None, 800.0, 60).await;

    let consumptions = h.storage.consumptions(TENANT, id);
    let last = consumptions.last().unwrap();
    assert_eq!(last.consumption_wh, 0.0);
    assert_eq!(last.cumulated_consumption_wh, 800.0);
    assert!(h.recorder.contains(&Event::Priced(id, TransactionPhase::Stop)));
    assert_eq!(h.transaction(id).await.stop.unwrap().price, Some(0.2));
}

#[tokio::test]
async fn test_stop_transaction_data_folded() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    let request = serde_json::from_value(json!({
        "transactionId": id,
        "meterStop": 2000,
        "timestamp": at(120),
        "transactionData": [
            {"timestamp": at(60), "sampledValue": [{"value": "1200", "unit": "Wh"}]},
            {"timestamp": at(120), "sampledValue": [
                {"value": "0x5A17", "format": "SignedData", "context": "Transaction.End"},
                {"value": "64", "measurand": "SoC", "unit": "Percent"}
            ]}
        ]
    }))
    .unwrap();
    let response = h.engine.stop_transaction(&h.headers, request).await;
    assert!(is_accepted(&response.id_tag_info));

    let transaction = h.transaction(id).await;
    let stop = transaction.stop.unwrap();
    assert_eq!(stop.total_consumption_wh, 2000.0);
    assert_eq!(stop.signed_data.as_deref(), Some("0x5A17"));
    assert_eq!(stop.state_of_charge, Some(64.0));
    let deltas: Vec<f64> = h
        .storage
        .consumptions(TENANT, id)
        .iter()
        .map(|c| c.consumption_wh)
        .collect();
    assert_eq!(deltas, vec![0.0, 1200.0, 800.0]);
}

#[tokio::test]
async fn test_long_inactivity_raises_status() {
    let h = Harness::with_config(
        EngineConfig::default().with_inactivity_notification_interval(Duration::from_secs(600)),
    );
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.energy(1, id, 1000.0, 60).await;
    h.energy(1, id, 1000.0, 60 + 1200).await;

    let transaction = h.transaction(id).await;
    assert_eq!(transaction.current_total_inactivity_secs, 1200);
    assert_ne!(transaction.current_inactivity_status, InactivityStatus::Info);
}

// ============================================================================
// Stop authorization
// ============================================================================

#[tokio::test]
async fn test_stop_tag_rules() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    h.seed_tag("TAG2", "U2", UserRole::Basic);
    h.seed_tag("BADGE", "ADMIN", UserRole::Admin);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    // someone else's badge
    assert!(!is_accepted(&h.stop(id, Some("TAG2"), 500.0, 60).await.id_tag_info));
    assert!(h.transaction(id).await.is_active());

    // an admin may stop anything
    assert!(is_accepted(&h.stop(id, Some("BADGE"), 500.0, 60).await.id_tag_info));
    let stop = h.transaction(id).await.stop.unwrap();
    assert_eq!(stop.tag_id.as_deref(), Some("BADGE"));
    assert_eq!(stop.user_id.as_deref(), Some("ADMIN"));
}

#[tokio::test]
async fn test_stop_with_another_tag_of_the_same_user() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    h.seed_tag("TAG1-BIS", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    assert!(is_accepted(&h.stop(id, Some("TAG1-BIS"), 500.0, 60).await.id_tag_info));
    assert_eq!(
        h.transaction(id).await.stop.unwrap().tag_id.as_deref(),
        Some("TAG1-BIS")
    );
}

#[tokio::test]
async fn test_stop_without_tag_uses_start_tag() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    assert!(is_accepted(&h.stop(id, Some(""), 500.0, 60).await.id_tag_info));
    let stop = h.transaction(id).await.stop.unwrap();
    assert_eq!(stop.tag_id.as_deref(), Some("TAG1"));
    assert_eq!(stop.user_id.as_deref(), Some("U1"));
}

#[tokio::test]
async fn test_recent_remote_stop_wins() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    h.seed_tag("OPS", "OPERATOR", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.engine.record_remote_stop(TENANT, id, "OPS").await.unwrap();
    assert!(is_accepted(&h.stop(id, Some("TAG-UNKNOWN"), 500.0, 60).await.id_tag_info));

    let stop = h.transaction(id).await.stop.unwrap();
    assert_eq!(stop.tag_id.as_deref(), Some("OPS"));
    assert_eq!(stop.user_id.as_deref(), Some("OPERATOR"));
}

#[tokio::test]
async fn test_expired_remote_stop_ignored() {
    let h = Harness::with_config(
        EngineConfig::default().with_remote_stop_validity(Duration::from_secs(0)),
    );
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.engine.record_remote_stop(TENANT, id, "OPS").await.unwrap();
    assert!(!is_accepted(&h.stop(id, Some("TAG-UNKNOWN"), 500.0, 60).await.id_tag_info));
    assert!(h.transaction(id).await.is_active());
}

// ============================================================================
// Pricing, billing, smart charging
// ============================================================================

#[tokio::test]
async fn test_pricing_and_billing_phases() {
    let h = Harness::new();
    h.enable(TenantComponents {
        pricing: true,
        billing: true,
        ..Default::default()
    });
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);

    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;
    h.energy(1, id, 1000.0, 60).await;
    h.energy(1, id, 2000.0, 120).await;
    h.stop(id, None, 3000.0, 180).await;

    let priced: Vec<_> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Priced(_, phase) => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        priced,
        vec![
            TransactionPhase::Start,
            TransactionPhase::Update,
            TransactionPhase::Update,
            TransactionPhase::Stop
        ]
    );
    assert!(h.recorder.contains(&Event::Billed(id, TransactionPhase::Start)));
    assert!(h.recorder.contains(&Event::Billed(id, TransactionPhase::Stop)));

    let stop = h.transaction(id).await.stop.unwrap();
    assert_eq!(stop.price, Some(0.75));
    assert_eq!(stop.price_unit.as_deref(), Some("EUR"));
    assert_eq!(stop.billing_reference.as_deref(), Some("INV-1"));

    let consumptions = h.storage.consumptions(TENANT, id);
    assert!(consumptions.iter().all(|c| c.currency.as_deref() == Some("EUR")));
    assert_eq!(consumptions.last().unwrap().cumulated_amount, Some(0.75));
}

#[tokio::test]
async fn test_no_pricing_when_component_disabled() {
    let h = Harness::new();
    h.install_station().await;
    h.seed_tag("TAG1", "U1", UserRole::Basic);

    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;
    h.stop(id, None, 1000.0, 60).await;

    assert_eq!(h.recorder.count(|e| matches!(e, Event::Priced(..) | Event::Billed(..))), 0);
    assert_eq!(h.transaction(id).await.stop.unwrap().price, None);
}

async fn smart_charging_site(h: &Harness) {
    h.enable(TenantComponents {
        smart_charging: true,
        ..Default::default()
    });
    h.storage.insert_site_area(
        TENANT,
        SiteArea {
            id: "SA1".to_string(),
            site_id: "S1".to_string(),
            smart_charging: true,
        },
    );
    let mut station = h.install_station().await;
    station.site_area_id = Some("SA1".to_string());
    h.storage.save_charging_station(TENANT, &station).await.unwrap();
    h.seed_tag("TAG1", "U1", UserRole::Basic);
}

#[tokio::test]
async fn test_single_phase_car_triggers_smart_charging() {
    let h = Harness::new();
    smart_charging_site(&h).await;
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;
    assert_eq!(h.transaction(id).await.site_area_id.as_deref(), Some("SA1"));

    h.meter_values(json!({
        "connectorId": 1,
        "transactionId": id,
        "meterValue": [{
            "timestamp": at(60),
            "sampledValue": [
                {"value": "60", "unit": "Wh"},
                {"value": "16", "measurand": "Current.Import", "unit": "A", "phase": "L1"},
                {"value": "0", "measurand": "Current.Import", "unit": "A", "phase": "L2"},
                {"value": "0", "measurand": "Current.Import", "unit": "A", "phase": "L3"}
            ]
        }]
    }))
    .await;

    assert_eq!(h.transaction(id).await.phases_used, Some(1));
    assert!(h.recorder.wait_for(&Event::SmartCharging("SA1".to_string())).await);
}

#[tokio::test]
async fn test_three_phase_car_does_not_trigger() {
    let h = Harness::new();
    smart_charging_site(&h).await;
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.meter_values(json!({
        "connectorId": 1,
        "transactionId": id,
        "meterValue": [{
            "timestamp": at(60),
            "sampledValue": [
                {"value": "60", "unit": "Wh"},
                {"value": "16", "measurand": "Current.Import", "unit": "A", "phase": "L1"},
                {"value": "16", "measurand": "Current.Import", "unit": "A", "phase": "L2"},
                {"value": "16", "measurand": "Current.Import", "unit": "A", "phase": "L3"}
            ]
        }]
    }))
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.transaction(id).await.phases_used, Some(3));
    assert_eq!(h.recorder.count(|e| matches!(e, Event::SmartCharging(_))), 0);
}

#[tokio::test]
async fn test_stop_clears_profile_and_recomputes_site_area() {
    let h = Harness::with_config(
        EngineConfig::default().with_smart_charging(Duration::ZERO, Duration::from_secs(5)),
    );
    smart_charging_site(&h).await;
    h.status(1, ConnectorStatus::Charging, 0).await;
    let id = h.start(1, "TAG1", 0.0, 0).await.transaction_id;

    h.stop(id, None, 1000.0, 60).await;

    assert!(h.recorder.contains(&Event::ProfileCleared(id)));
    assert!(h.recorder.wait_for(&Event::SmartCharging("SA1".to_string())).await);
}
