//! Charging station snapshot and connector state machine
//!
//! A station is loaded from storage, mutated by one request and written
//! back. Nothing in here is shared between requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::readings::InstantReadings;
use crate::types::*;

/// Status input from a StatusNotification
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ConnectorStatus,
    pub error_code: ChargePointErrorCode,
    pub info: Option<String>,
    pub vendor_error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of applying a [`StatusUpdate`] to a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// Same `(status, errorCode)` as stored, nothing to persist
    Unchanged,
    Changed {
        previous: ConnectorStatus,
        current: ConnectorStatus,
    },
}

impl StatusTransition {
    pub fn is_changed(&self) -> bool {
        matches!(self, StatusTransition::Changed { .. })
    }

    /// `Finishing -> Available`: the driver unplugged after the session ended
    pub fn closes_extra_inactivity(&self) -> bool {
        matches!(
            self,
            StatusTransition::Changed {
                previous: ConnectorStatus::Finishing,
                current: ConnectorStatus::Available,
            }
        )
    }

    /// `Charging -> Available` without a Finishing step: no extra inactivity
    pub fn skips_extra_inactivity(&self) -> bool {
        matches!(
            self,
            StatusTransition::Changed {
                previous: ConnectorStatus::Charging,
                current: ConnectorStatus::Available,
            }
        )
    }
}

/// One physical socket of a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub connector_id: ConnectorId,
    pub status: ConnectorStatus,
    pub error_code: ChargePointErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_last_changed_on: Option<DateTime<Utc>>,

    // Electrical characteristics
    pub current_type: CurrentType,
    pub number_of_connected_phase: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    /// Limit currently enforced by smart charging, all phases together
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amperage_limit: Option<f64>,

    // Ongoing session
    pub current_transaction_id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_transaction_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tag_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_id: Option<String>,

    // Live metering snapshot
    pub current_instant: InstantReadings,
    pub current_total_consumption_wh: f64,
    pub current_total_inactivity_secs: i64,
    pub current_inactivity_status: InactivityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state_of_charge: Option<f64>,
}

impl Connector {
    /// A connector seen for the first time
    pub fn new(connector_id: ConnectorId) -> Self {
        Self {
            connector_id,
            status: ConnectorStatus::Unavailable,
            error_code: ChargePointErrorCode::NoError,
            info: None,
            vendor_error_code: None,
            status_last_changed_on: None,
            current_type: CurrentType::AC,
            number_of_connected_phase: 3,
            voltage: None,
            amperage_limit: None,
            current_transaction_id: 0,
            current_transaction_date: None,
            current_tag_id: None,
            current_user_id: None,
            current_instant: InstantReadings::default(),
            current_total_consumption_wh: 0.0,
            current_total_inactivity_secs: 0,
            current_inactivity_status: InactivityStatus::Info,
            current_state_of_charge: None,
        }
    }

    pub fn has_transaction(&self) -> bool {
        self.current_transaction_id != 0
    }

    /// Fold OCPP 1.5's `Occupied` into the 1.6 vocabulary
    pub fn fold_status(&self, status: ConnectorStatus) -> ConnectorStatus {
        match status {
            ConnectorStatus::Occupied if self.has_transaction() => ConnectorStatus::Charging,
            ConnectorStatus::Occupied => ConnectorStatus::Preparing,
            other => other,
        }
    }

    /// Whether applying `update` would change anything
    pub fn is_duplicate(&self, update: &StatusUpdate) -> bool {
        self.fold_status(update.status) == self.status && update.error_code == self.error_code
    }

    /// Apply a status notification.
    ///
    /// Identical `(status, errorCode)` pairs are dropped so that resent
    /// notifications do not produce writes.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> StatusTransition {
        if self.is_duplicate(update) {
            debug!(
                "Connector {} status {} / {:?} unchanged",
                self.connector_id, self.status, self.error_code
            );
            return StatusTransition::Unchanged;
        }

        let previous = self.status;
        let current = self.fold_status(update.status);

        self.status = current;
        self.error_code = update.error_code;
        self.info = update.info.clone();
        self.vendor_error_code = update.vendor_error_code.clone();
        self.status_last_changed_on = Some(update.timestamp);

        StatusTransition::Changed { previous, current }
    }

    /// Attach a freshly opened transaction
    pub fn bind_transaction(
        &mut self,
        transaction_id: TransactionId,
        started_at: DateTime<Utc>,
        tag_id: Option<String>,
        user_id: Option<String>,
    ) {
        self.current_transaction_id = transaction_id;
        self.current_transaction_date = Some(started_at);
        self.current_tag_id = tag_id;
        self.current_user_id = user_id;
        self.current_instant = InstantReadings::default();
        self.current_total_consumption_wh = 0.0;
        self.current_total_inactivity_secs = 0;
        self.current_inactivity_status = InactivityStatus::Info;
        self.current_state_of_charge = None;
    }

    /// Free the connector once its transaction is closed or deleted
    pub fn release_transaction(&mut self) {
        self.current_transaction_id = 0;
        self.current_transaction_date = None;
        self.current_tag_id = None;
        self.current_user_id = None;
        self.current_instant = InstantReadings::default();
        self.current_total_consumption_wh = 0.0;
        self.current_total_inactivity_secs = 0;
        self.current_inactivity_status = InactivityStatus::Info;
        self.current_state_of_charge = None;
    }

    /// True when smart charging holds the connector below the minimum
    /// current a car needs to keep charging.
    pub fn is_limited_below_minimum(&self, min_amps_per_phase: f64) -> bool {
        match self.amperage_limit {
            Some(limit) => {
                let phases = match self.current_type {
                    CurrentType::DC => 1,
                    CurrentType::AC => self.number_of_connected_phase.max(1),
                };
                limit < min_amps_per_phase * phases as f64
            }
            None => false,
        }
    }
}

/// Charging station identity and current snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingStation {
    pub id: ChargingStationId,
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

    pub ocpp_version: OcppVersion,
    pub ocpp_protocol: OcppProtocol,

    pub created_on: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reboot: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ip: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_area_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_update_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_status: Option<String>,

    /// Ordered by connector number
    pub connectors: Vec<Connector>,
}

impl ChargingStation {
    pub fn new(
        id: impl Into<String>,
        vendor: impl Into<String>,
        model: impl Into<String>,
        ocpp_version: OcppVersion,
        ocpp_protocol: OcppProtocol,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            charge_point_vendor: vendor.into(),
            charge_point_model: model.into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
            ocpp_version,
            ocpp_protocol,
            created_on: now,
            last_seen: now,
            last_reboot: None,
            last_heartbeat: None,
            current_ip: None,
            site_id: None,
            site_area_id: None,
            firmware_update_status: None,
            diagnostics_status: None,
            connectors: Vec::new(),
        }
    }

    pub fn connector(&self, connector_id: ConnectorId) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.connector_id == connector_id)
    }

    pub fn connector_mut(&mut self, connector_id: ConnectorId) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.connector_id == connector_id)
    }

    /// Get a connector, creating it (initially `Unavailable`) if unknown
    pub fn connector_or_insert(&mut self, connector_id: ConnectorId) -> &mut Connector {
        let index = match self
            .connectors
            .binary_search_by_key(&connector_id, |c| c.connector_id)
        {
            Ok(index) => index,
            Err(index) => {
                debug!("Station {}: new connector {}", self.id, connector_id);
                self.connectors.insert(index, Connector::new(connector_id));
                index
            }
        };
        &mut self.connectors[index]
    }

    /// Numbers of the physical connectors (connector 0 is never stored)
    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        self.connectors.iter().map(|c| c.connector_id).collect()
    }

    /// Current type of a connector, AC when unknown
    pub fn current_type(&self, connector_id: ConnectorId) -> CurrentType {
        self.connector(connector_id)
            .map(|c| c.current_type)
            .unwrap_or(CurrentType::AC)
    }

    /// Mark the station as alive
    pub fn touch(&mut self, now: DateTime<Utc>, ip: Option<&str>) {
        self.last_seen = now;
        if let Some(ip) = ip {
            self.current_ip = Some(ip.to_string());
        }
    }
}
