//! Shared fixtures: a recording fake for every collaborator and an engine
//! wired to in-memory storage.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use csms_adapter_ocpp::ocpp::*;
use csms_adapter_ocpp::services::{
    BillingService, NotificationService, PricedConsumption, PricingService, RoamingService,
    SmartChargingService, StationClient, UserRole,
};
use csms_adapter_ocpp::{
    CollaboratorError, Collaborators, EngineConfig, MemoryStorage, OcppEngine, OcppHeaders,
    Storage, Tag, TenantComponents, TransactionPhase, User,
};
use csms_core::{
    ChargePointErrorCode, ChargingStation, Connector, ConnectorId, ConnectorStatus, Consumption,
    OcppProtocol, OcppVersion, Transaction, TransactionId,
};
use parking_lot::Mutex;
use serde_json::json;

pub const TENANT: &str = "tenant-a";
pub const STATION: &str = "CS001";
pub const VENDOR: &str = "Vendor";
pub const MODEL: &str = "Model";

/// Fixed start of every scenario
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

// ============================================================================
// Recording collaborators
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Priced(TransactionId, TransactionPhase),
    Billed(TransactionId, TransactionPhase),
    SmartCharging(String),
    ProfileCleared(TransactionId),
    StationRegistered(String),
    SessionStarted(TransactionId),
    SessionEnded(TransactionId),
    StatusError(String, ConnectorId),
    RoamingAuthorize(String),
    RoamingStart(TransactionId),
    RoamingUpdate(TransactionId),
    RoamingStop(TransactionId),
    RoamingCdr(TransactionId),
    ConfigurationRequested(String),
}

/// Implements every collaborator and records what it was asked
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    /// EUR per kWh
    pub rate: f64,
    pub roaming_accepts: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            rate: 0.25,
            roaming_accepts: true,
        }
    }
}

impl Recorder {
    /// Issuing operators refuse every foreign tag
    pub fn refusing_roaming() -> Self {
        Self {
            roaming_accepts: false,
            ..Self::default()
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.events.lock().contains(event)
    }

    /// Wait for a spawned task to report
    pub async fn wait_for(&self, event: &Event) -> bool {
        for _ in 0..200 {
            if self.contains(event) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl PricingService for Recorder {
    async fn price_transaction(
        &self,
        _tenant_id: &str,
        transaction: &Transaction,
        consumption: &Consumption,
        phase: TransactionPhase,
    ) -> Result<Option<PricedConsumption>, CollaboratorError> {
        self.record(Event::Priced(transaction.id, phase));
        Ok(Some(PricedConsumption {
            amount: consumption.consumption_wh / 1000.0 * self.rate,
            cumulated_amount: consumption.cumulated_consumption_wh / 1000.0 * self.rate,
            currency: "EUR".to_string(),
        }))
    }
}

#[async_trait]
impl BillingService for Recorder {
    async fn bill_transaction(
        &self,
        _tenant_id: &str,
        transaction: &Transaction,
        phase: TransactionPhase,
    ) -> Result<Option<String>, CollaboratorError> {
        self.record(Event::Billed(transaction.id, phase));
        Ok((phase == TransactionPhase::Stop).then(|| format!("INV-{}", transaction.id)))
    }
}

#[async_trait]
impl SmartChargingService for Recorder {
    async fn compute_and_apply_charging_profiles(
        &self,
        _tenant_id: &str,
        site_area_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::SmartCharging(site_area_id.to_string()));
        Ok(())
    }

    async fn clear_transaction_profile(
        &self,
        _tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::ProfileCleared(transaction.id));
        Ok(())
    }
}

#[async_trait]
impl NotificationService for Recorder {
    async fn station_registered(
        &self,
        _tenant_id: &str,
        station: &ChargingStation,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::StationRegistered(station.id.clone()));
        Ok(())
    }

    async fn session_started(
        &self,
        _tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::SessionStarted(transaction.id));
        Ok(())
    }

    async fn session_ended(
        &self,
        _tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::SessionEnded(transaction.id));
        Ok(())
    }

    async fn status_error(
        &self,
        _tenant_id: &str,
        station: &ChargingStation,
        connector: &Connector,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::StatusError(station.id.clone(), connector.connector_id));
        Ok(())
    }
}

#[async_trait]
impl RoamingService for Recorder {
    async fn authorize(
        &self,
        _tenant_id: &str,
        _station: &ChargingStation,
        tag_id: &str,
    ) -> Result<bool, CollaboratorError> {
        self.record(Event::RoamingAuthorize(tag_id.to_string()));
        Ok(self.roaming_accepts)
    }

    async fn start_session(&self, _tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        self.record(Event::RoamingStart(transaction.id));
        Ok(())
    }

    async fn update_session(&self, _tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        self.record(Event::RoamingUpdate(transaction.id));
        Ok(())
    }

    async fn stop_session(&self, _tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        self.record(Event::RoamingStop(transaction.id));
        Ok(())
    }

    async fn post_cdr(&self, _tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        self.record(Event::RoamingCdr(transaction.id));
        Ok(())
    }
}

#[async_trait]
impl StationClient for Recorder {
    async fn request_configuration(
        &self,
        _tenant_id: &str,
        station_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.record(Event::ConfigurationRequested(station_id.to_string()));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub engine: OcppEngine,
    pub storage: Arc<MemoryStorage>,
    pub recorder: Arc<Recorder>,
    pub headers: OcppHeaders,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, Recorder::default())
    }

    pub fn build(config: EngineConfig, recorder: Recorder) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let recorder = Arc::new(recorder);
        let services = Collaborators::noop()
            .with_pricing(recorder.clone())
            .with_billing(recorder.clone())
            .with_smart_charging(recorder.clone())
            .with_notification(recorder.clone())
            .with_roaming(recorder.clone())
            .with_station_client(recorder.clone());
        let engine = OcppEngine::new(config, storage.clone(), services);

        Self {
            engine,
            storage,
            recorder,
            headers: OcppHeaders::new(TENANT, STATION),
        }
    }

    pub fn enable(&self, components: TenantComponents) {
        self.storage.set_tenant_components(TENANT, components);
    }

    /// Store a known station directly, bypassing registration
    pub async fn install_station(&self) -> ChargingStation {
        let station = ChargingStation::new(
            STATION,
            VENDOR,
            MODEL,
            OcppVersion::V16,
            OcppProtocol::Json,
            t0(),
        );
        self.storage
            .save_charging_station(TENANT, &station)
            .await
            .unwrap();
        station
    }

    /// Active local tag owned by an active user
    pub fn seed_tag(&self, tag_id: &str, user_id: &str, role: UserRole) {
        self.storage.insert_user(TENANT, User::new(user_id, role));
        self.storage.insert_tag(TENANT, Tag::local(tag_id, user_id));
    }

    pub async fn station(&self) -> ChargingStation {
        self.storage
            .get_charging_station(TENANT, STATION)
            .await
            .unwrap()
            .expect("station stored")
    }

    pub async fn transaction(&self, id: TransactionId) -> Transaction {
        self.storage
            .get_transaction(TENANT, id)
            .await
            .unwrap()
            .expect("transaction stored")
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    pub async fn status(&self, connector_id: ConnectorId, status: ConnectorStatus, secs: i64) {
        self.status_with_error(connector_id, status, ChargePointErrorCode::NoError, secs)
            .await;
    }

    pub async fn status_with_error(
        &self,
        connector_id: ConnectorId,
        status: ConnectorStatus,
        error_code: ChargePointErrorCode,
        secs: i64,
    ) {
        self.engine
            .status_notification(
                &self.headers,
                StatusNotificationRequest {
                    connector_id,
                    error_code,
                    status,
                    info: None,
                    timestamp: Some(at(secs)),
                    vendor_id: None,
                    vendor_error_code: None,
                },
            )
            .await;
    }

    pub async fn start(
        &self,
        connector_id: ConnectorId,
        tag_id: &str,
        meter_start: f64,
        secs: i64,
    ) -> StartTransactionResponse {
        self.engine
            .start_transaction(
                &self.headers,
                StartTransactionRequest {
                    connector_id,
                    id_tag: tag_id.to_string(),
                    meter_start,
                    timestamp: at(secs),
                    reservation_id: None,
                },
            )
            .await
    }

    /// One energy register reading in Wh
    pub async fn energy(&self, connector_id: ConnectorId, transaction_id: TransactionId, wh: f64, secs: i64) {
        self.meter_values(json!({
            "connectorId": connector_id,
            "transactionId": transaction_id,
            "meterValue": [{
                "timestamp": at(secs),
                "sampledValue": [{"value": wh.to_string(), "unit": "Wh"}]
            }]
        }))
        .await;
    }

    pub async fn meter_values(&self, payload: serde_json::Value) {
        let request: MeterValuesRequest = serde_json::from_value(payload).unwrap();
        self.engine.meter_values(&self.headers, request).await;
    }

    pub async fn stop(
        &self,
        transaction_id: TransactionId,
        tag_id: Option<&str>,
        meter_stop: f64,
        secs: i64,
    ) -> StopTransactionResponse {
        self.engine
            .stop_transaction(
                &self.headers,
                StopTransactionRequest {
                    transaction_id,
                    id_tag: tag_id.map(str::to_string),
                    meter_stop,
                    timestamp: at(secs),
                    reason: Some("Local".to_string()),
                    transaction_data: None,
                },
            )
            .await
    }
}

pub fn is_accepted(info: &Option<IdTagInfo>) -> bool {
    matches!(info, Some(info) if info.status == AuthorizationStatus::Accepted)
}
