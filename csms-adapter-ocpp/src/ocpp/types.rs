//! OCPP 1.5/1.6 message types
//!
//! Payloads of the actions a charging station sends to the central system:
//! - BootNotification / Heartbeat
//! - StatusNotification
//! - Authorize
//! - StartTransaction / MeterValues / StopTransaction
//! - FirmwareStatusNotification / DiagnosticsStatusNotification
//!
//! Field names are the OCPP wire names (`idTag`, `meterStart`, ...).

use chrono::{DateTime, Utc};
use csms_core::{
    ChargePointErrorCode, ConnectorId, ConnectorStatus, OneOrMany, RawMeterValue15,
    RawMeterValue16, RawMeterValues, TransactionId,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Registration status for BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Authorization status of an idTag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

// ============================================================================
// Complex Types
// ============================================================================

/// Authorization verdict returned with Authorize/Start/Stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
}

impl IdTagInfo {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }
}

/// OCPP 1.5 transaction data entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData15 {
    pub values: OneOrMany<RawMeterValue15>,
}

/// Meter values attached to a StopTransaction, shape depends on the version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionData {
    V16(RawMeterValue16),
    V15(TransactionData15),
}

// ============================================================================
// Request Messages
// ============================================================================

/// BootNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

/// Heartbeat request (CP -> CSMS)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

/// StatusNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: ConnectorId,
    pub error_code: ChargePointErrorCode,
    pub status: ConnectorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
}

/// Authorize request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

/// StartTransaction request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: ConnectorId,
    pub id_tag: String,
    pub meter_start: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<i64>,
}

/// MeterValues request (CP -> CSMS)
///
/// 1.6 stations send `meterValue`, 1.5 stations send `values`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesRequest {
    pub connector_id: ConnectorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_value: Option<Vec<RawMeterValue16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<OneOrMany<RawMeterValue15>>,
}

impl MeterValuesRequest {
    /// Tag the payload by protocol shape
    pub fn raw(&self) -> RawMeterValues {
        match (&self.meter_value, &self.values) {
            (Some(meter_value), _) => RawMeterValues::V16(meter_value.clone()),
            (None, Some(values)) => RawMeterValues::V15(values.iter().cloned().collect()),
            (None, None) => RawMeterValues::V16(Vec::new()),
        }
    }

    /// Transaction the values belong to, `0` counts as none
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction_id.filter(|id| *id != 0)
    }
}

/// StopTransaction request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    pub transaction_id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag: Option<String>,
    pub meter_stop: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_data: Option<Vec<TransactionData>>,
}

impl StopTransactionRequest {
    /// Trailing meter values as one tagged payload per entry
    pub fn raw_transaction_data(&self) -> Vec<RawMeterValues> {
        self.transaction_data
            .iter()
            .flatten()
            .map(|data| match data {
                TransactionData::V16(mv) => RawMeterValues::V16(vec![mv.clone()]),
                TransactionData::V15(data) => {
                    RawMeterValues::V15(data.values.iter().cloned().collect())
                }
            })
            .collect()
    }
}

/// FirmwareStatusNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationRequest {
    pub status: String,
}

/// DiagnosticsStatusNotification request (CP -> CSMS)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationRequest {
    pub status: String,
}

// ============================================================================
// Response Messages
// ============================================================================

/// BootNotification response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: RegistrationStatus,
    pub current_time: DateTime<Utc>,
    pub interval: u64,
}

/// Heartbeat response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub current_time: DateTime<Utc>,
}

/// StatusNotification response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusNotificationResponse {}

/// Authorize response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

/// StartTransaction response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub transaction_id: TransactionId,
    pub id_tag_info: IdTagInfo,
}

/// MeterValues response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterValuesResponse {}

/// StopTransaction response (CSMS -> CP)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_tag_info: Option<IdTagInfo>,
}

/// FirmwareStatusNotification response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareStatusNotificationResponse {}

/// DiagnosticsStatusNotification response (CSMS -> CP)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsStatusNotificationResponse {}
