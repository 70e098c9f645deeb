//! Protocol action dispatcher
//!
//! Turns a decoded CALL (`action`, JSON payload) into the CALLRESULT payload.
//! A payload that does not match its action's schema is rejected like any
//! other failed request: with the negative response of that action.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use super::{OcppEngine, OcppHeaders};
use crate::error::EngineError;
use crate::ocpp::*;

fn to_payload(response: impl Serialize) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        error!("Response serialization failed: {}", e);
        json!({})
    })
}

impl OcppEngine {
    /// Handle one request and produce its response payload
    pub async fn handle(&self, headers: &OcppHeaders, action: Action, payload: Value) -> Value {
        debug!(
            "{} from {} (tenant {}): {}",
            action, headers.charge_box_identity, headers.tenant_id, payload
        );

        macro_rules! dispatch {
            ($handler:ident) => {
                match serde_json::from_value(payload) {
                    Ok(request) => to_payload(self.$handler(headers, request).await),
                    Err(e) => {
                        let err = EngineError::validation(action, e.to_string());
                        error!(
                            "{} from {} (tenant {}) rejected: {}",
                            action, headers.charge_box_identity, headers.tenant_id, err
                        );
                        self.rejection(action)
                    }
                }
            };
        }

        match action {
            Action::BootNotification => dispatch!(boot_notification),
            Action::Heartbeat => dispatch!(heartbeat),
            Action::StatusNotification => dispatch!(status_notification),
            Action::Authorize => dispatch!(authorize),
            Action::StartTransaction => dispatch!(start_transaction),
            Action::MeterValues => dispatch!(meter_values),
            Action::StopTransaction => dispatch!(stop_transaction),
            Action::FirmwareStatusNotification => dispatch!(firmware_status_notification),
            Action::DiagnosticsStatusNotification => dispatch!(diagnostics_status_notification),
        }
    }

    /// Negative response of an action
    pub fn rejection(&self, action: Action) -> Value {
        let invalid = IdTagInfo::new(AuthorizationStatus::Invalid);
        match action {
            Action::BootNotification => to_payload(BootNotificationResponse {
                status: RegistrationStatus::Rejected,
                current_time: Utc::now(),
                interval: self.config.heartbeat_interval.as_secs(),
            }),
            Action::Heartbeat => to_payload(HeartbeatResponse {
                current_time: Utc::now(),
            }),
            Action::Authorize => to_payload(AuthorizeResponse { id_tag_info: invalid }),
            Action::StartTransaction => to_payload(StartTransactionResponse {
                transaction_id: 0,
                id_tag_info: invalid,
            }),
            Action::StopTransaction => to_payload(StopTransactionResponse {
                id_tag_info: Some(invalid),
            }),
            Action::StatusNotification
            | Action::MeterValues
            | Action::FirmwareStatusNotification
            | Action::DiagnosticsStatusNotification => json!({}),
        }
    }
}
