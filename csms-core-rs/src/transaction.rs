//! Transaction (charging session) model
//!
//! `(none) -> open -> closed`, never reopened. Running totals only move
//! forward: the `last_consumption` watermark is monotonic in both value and
//! time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consumption::Consumption;
use crate::error::CoreError;
use crate::readings::InstantReadings;
use crate::types::*;

/// Last energy register reading folded into the transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastConsumption {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Remote stop request recorded by the operator side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStop {
    pub tag_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Stop record, present once the transaction is closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStop {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub meter_stop: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub total_consumption_wh: f64,
    pub total_inactivity_secs: i64,
    pub total_duration_secs: i64,
    pub inactivity_status: InactivityStatus,
    pub extra_inactivity_secs: i64,
    pub extra_inactivity_computed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_of_charge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_reference: Option<String>,
}

/// A billable charging session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub charging_station_id: ChargingStationId,
    pub connector_id: ConnectorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_area_id: Option<String>,
    pub tag_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// User issued by another operator, reported through roaming
    pub roaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car_id: Option<String>,

    pub timestamp: DateTime<Utc>,
    pub meter_start: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_of_charge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_data: Option<String>,

    pub last_consumption: LastConsumption,
    pub number_of_meter_values: u32,
    pub current_consumption_wh: f64,
    pub current_total_consumption_wh: f64,
    pub current_total_inactivity_secs: i64,
    pub current_inactivity_status: InactivityStatus,
    pub current_total_duration_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_state_of_charge: Option<f64>,
    pub current_instant: InstantReadings,
    pub current_cumulated_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases_used: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_stop: Option<RemoteStop>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<TransactionStop>,
}

impl Transaction {
    /// Open a transaction at `meter_start` Wh
    pub fn open(
        id: TransactionId,
        charging_station_id: impl Into<String>,
        connector_id: ConnectorId,
        tag_id: impl Into<String>,
        meter_start: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            charging_station_id: charging_station_id.into(),
            connector_id,
            site_id: None,
            site_area_id: None,
            tag_id: tag_id.into(),
            user_id: None,
            roaming: false,
            car_id: None,
            timestamp,
            meter_start,
            state_of_charge: None,
            signed_data: None,
            last_consumption: LastConsumption {
                value: meter_start,
                timestamp,
            },
            number_of_meter_values: 0,
            current_consumption_wh: 0.0,
            current_total_consumption_wh: 0.0,
            current_total_inactivity_secs: 0,
            current_inactivity_status: InactivityStatus::Info,
            current_total_duration_secs: 0,
            current_state_of_charge: None,
            current_instant: InstantReadings::default(),
            current_cumulated_price: 0.0,
            phases_used: None,
            remote_stop: None,
            stop: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_none()
    }

    /// Fold one computed consumption into the running totals
    pub fn apply_consumption(&mut self, consumption: &Consumption) {
        self.current_consumption_wh = consumption.consumption_wh;
        self.current_total_consumption_wh = consumption.cumulated_consumption_wh;
        self.current_total_inactivity_secs += consumption.inactivity_secs;
        self.current_total_duration_secs =
            (consumption.ended_at - self.timestamp).num_seconds().max(0);
        if !consumption.instant.is_empty() {
            self.current_instant = consumption.instant;
        }
        if consumption.state_of_charge.is_some() {
            self.current_state_of_charge = consumption.state_of_charge;
        }
        if let Some(amount) = consumption.cumulated_amount {
            self.current_cumulated_price = amount;
        }
        self.advance_watermark(consumption.meter_value_wh, consumption.ended_at);
    }

    /// Move the watermark forward, never backward
    pub fn advance_watermark(&mut self, value: f64, timestamp: DateTime<Utc>) {
        if value > self.last_consumption.value {
            self.last_consumption.value = value;
        }
        if timestamp > self.last_consumption.timestamp {
            self.last_consumption.timestamp = timestamp;
        }
    }

    /// Last known meter reading, the value used when closing without a stop event
    pub fn last_meter_reading(&self) -> (f64, DateTime<Utc>) {
        (self.last_consumption.value, self.last_consumption.timestamp)
    }

    pub fn refresh_inactivity_status(&mut self, interval_secs: i64) {
        self.current_inactivity_status =
            InactivityStatus::classify(self.current_total_inactivity_secs, interval_secs);
    }

    /// A remote stop is honoured only while recent
    pub fn recent_remote_stop(&self, now: DateTime<Utc>, validity_secs: i64) -> Option<&RemoteStop> {
        self.remote_stop
            .as_ref()
            .filter(|rs| (now - rs.timestamp).num_seconds() < validity_secs)
    }

    /// Stamp the stop record from the running totals. Closing twice is an error.
    pub fn close(
        &mut self,
        meter_stop: f64,
        timestamp: DateTime<Utc>,
        tag_id: Option<String>,
        user_id: Option<String>,
        reason: Option<String>,
    ) -> Result<&mut TransactionStop, CoreError> {
        if self.stop.is_some() {
            return Err(CoreError::TransactionAlreadyStopped(self.id));
        }

        let total_duration_secs = (timestamp - self.timestamp).num_seconds().max(0);
        self.current_total_duration_secs = total_duration_secs;

        Ok(self.stop.insert(TransactionStop {
            reason,
            meter_stop,
            timestamp,
            tag_id,
            user_id,
            total_consumption_wh: self.current_total_consumption_wh,
            total_inactivity_secs: self.current_total_inactivity_secs,
            total_duration_secs,
            inactivity_status: self.current_inactivity_status,
            extra_inactivity_secs: 0,
            extra_inactivity_computed: false,
            state_of_charge: self.current_state_of_charge,
            signed_data: None,
            price: None,
            price_unit: None,
            billing_reference: None,
        }))
    }
}

impl TransactionStop {
    /// Record the time between the end of the session and the unplug.
    ///
    /// Returns false when already computed.
    pub fn compute_extra_inactivity(
        &mut self,
        unplugged_at: DateTime<Utc>,
        interval_secs: i64,
    ) -> bool {
        if self.extra_inactivity_computed {
            return false;
        }
        self.extra_inactivity_secs = (unplugged_at - self.timestamp).num_seconds().max(0);
        self.extra_inactivity_computed = true;
        self.inactivity_status = InactivityStatus::classify(
            self.total_inactivity_secs + self.extra_inactivity_secs,
            interval_secs,
        );
        true
    }

    /// No unplug window to account for (the car left while charging)
    pub fn skip_extra_inactivity(&mut self) -> bool {
        if self.extra_inactivity_computed {
            return false;
        }
        self.extra_inactivity_secs = 0;
        self.extra_inactivity_computed = true;
        true
    }
}
