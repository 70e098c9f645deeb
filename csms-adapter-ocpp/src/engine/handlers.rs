//! OCPP action handlers
//!
//! Every public handler takes the station's turn, runs its fallible body
//! and answers. A failed body is logged and answered with the negative
//! response of the action:
//!
//! | Action | On failure |
//! |---|---|
//! | BootNotification | `Rejected`, current time, heartbeat interval |
//! | Heartbeat | current time |
//! | StatusNotification | empty ack |
//! | Authorize | `Invalid` |
//! | StartTransaction | transaction 0, `Invalid` |
//! | MeterValues | empty ack |
//! | StopTransaction | `Invalid` |
//! | Firmware/DiagnosticsStatusNotification | empty ack |

use chrono::{DateTime, Utc};
use csms_core::{
    ChargePointErrorCode, ChargingStation, ConnectorId, ConnectorStatus, StatusTransition,
    StatusUpdate,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{OcppEngine, OcppHeaders, StopEvent};
use crate::error::EngineError;
use crate::ocpp::*;

const MODULE: &str = "OcppService";

fn report(headers: &OcppHeaders, action: Action, err: &EngineError) {
    error!(
        "{} from {} (tenant {}) failed: {}",
        action, headers.charge_box_identity, headers.tenant_id, err
    );
}

impl OcppEngine {
    // ========================================================================
    // BootNotification
    // ========================================================================

    pub async fn boot_notification(
        &self,
        headers: &OcppHeaders,
        request: BootNotificationRequest,
    ) -> BootNotificationResponse {
        let _turn = self.station_turn(headers).await;

        let status = match self.try_boot_notification(headers, &request).await {
            Ok(()) => RegistrationStatus::Accepted,
            Err(e) => {
                report(headers, Action::BootNotification, &e);
                RegistrationStatus::Rejected
            }
        };
        BootNotificationResponse {
            status,
            current_time: Utc::now(),
            interval: self.config.heartbeat_interval.as_secs(),
        }
    }

    async fn try_boot_notification(
        &self,
        headers: &OcppHeaders,
        request: &BootNotificationRequest,
    ) -> Result<(), EngineError> {
        let action = Action::BootNotification;
        if request.charge_point_vendor.trim().is_empty() {
            return Err(EngineError::validation(action, "chargePointVendor is required"));
        }
        if request.charge_point_model.trim().is_empty() {
            return Err(EngineError::validation(action, "chargePointModel is required"));
        }

        let tenant_id = headers.tenant_id.as_str();
        let now = Utc::now();
        let existing = self
            .storage
            .get_charging_station(tenant_id, &headers.charge_box_identity)
            .await?;
        let registered = existing.is_none();

        let mut station = match existing {
            Some(station) => {
                self.check_boot_identity(&station, request)?;
                station
            }
            None => self.register_station(headers, request, now).await?,
        };

        if request.charge_point_serial_number.is_some() {
            station.charge_point_serial_number = request.charge_point_serial_number.clone();
        }
        if request.charge_box_serial_number.is_some() {
            station.charge_box_serial_number = request.charge_box_serial_number.clone();
        }
        station.firmware_version = request.firmware_version.clone();
        station.iccid = request.iccid.clone();
        station.imsi = request.imsi.clone();
        station.meter_type = request.meter_type.clone();
        station.meter_serial_number = request.meter_serial_number.clone();
        station.ocpp_version = headers.ocpp_version;
        station.ocpp_protocol = headers.ocpp_protocol;
        station.last_reboot = Some(now);
        station.last_heartbeat = Some(now);
        station.touch(now, headers.current_ip.as_deref());

        self.storage.save_charging_station(tenant_id, &station).await?;

        if registered {
            if let Err(e) = self
                .services
                .notification
                .station_registered(tenant_id, &station)
                .await
            {
                debug!("Station registered notification for {} failed: {}", station.id, e);
            }
        }
        self.schedule_configuration_pull(tenant_id, &station.id);

        info!(
            "Boot of {} accepted ({} {}, OCPP {})",
            station.id,
            station.charge_point_vendor,
            station.charge_point_model,
            station.ocpp_version.as_str()
        );
        Ok(())
    }

    /// A known station must keep its vendor, model and serial number
    fn check_boot_identity(
        &self,
        station: &ChargingStation,
        request: &BootNotificationRequest,
    ) -> Result<(), EngineError> {
        let mismatch = |field: &str, stored: &str, received: &str| {
            EngineError::backend(
                &station.id,
                Action::BootNotification,
                MODULE,
                format!("Boot {} mismatch: stored '{}', received '{}'", field, stored, received),
            )
        };

        if station.charge_point_vendor != request.charge_point_vendor {
            return Err(mismatch(
                "vendor",
                &station.charge_point_vendor,
                &request.charge_point_vendor,
            ));
        }
        if station.charge_point_model != request.charge_point_model {
            return Err(mismatch(
                "model",
                &station.charge_point_model,
                &request.charge_point_model,
            ));
        }
        if self.config.check_boot_serial_number {
            if let (Some(stored), Some(received)) = (
                &station.charge_box_serial_number,
                &request.charge_box_serial_number,
            ) {
                if stored != received {
                    return Err(mismatch("serial number", stored, received));
                }
            }
        }
        Ok(())
    }

    /// Create an unknown station, given a valid registration token
    async fn register_station(
        &self,
        headers: &OcppHeaders,
        request: &BootNotificationRequest,
        now: DateTime<Utc>,
    ) -> Result<ChargingStation, EngineError> {
        let tenant_id = headers.tenant_id.as_str();
        let refused = |message: String| {
            EngineError::backend(
                &headers.charge_box_identity,
                Action::BootNotification,
                MODULE,
                message,
            )
        };

        let token_id = headers
            .token
            .as_deref()
            .ok_or_else(|| refused("Unknown charging station without registration token".into()))?;
        let token = self
            .storage
            .get_registration_token(tenant_id, token_id)
            .await?
            .filter(|token| token.is_valid(now))
            .ok_or_else(|| refused(format!("Registration token {} is invalid", token_id)))?;

        let mut station = ChargingStation::new(
            &headers.charge_box_identity,
            &request.charge_point_vendor,
            &request.charge_point_model,
            headers.ocpp_version,
            headers.ocpp_protocol,
            now,
        );
        station.site_area_id = token.site_area_id.or_else(|| headers.site_area_id.clone());
        station.site_id = headers.site_id.clone();
        if let Some(site_area_id) = &station.site_area_id {
            if let Some(site_area) = self.storage.get_site_area(tenant_id, site_area_id).await? {
                station.site_id = Some(site_area.site_id);
            }
        }

        info!(
            "Registering charging station {} with token {}",
            station.id, token_id
        );
        Ok(station)
    }

    /// Pull the station's OCPP parameters once it had time to settle
    fn schedule_configuration_pull(&self, tenant_id: &str, station_id: &str) -> JoinHandle<()> {
        let client = self.services.station_client.clone();
        let delay = self.config.ocpp_parameters_delay;
        let limit = self.config.ocpp_parameters_timeout;
        let tenant_id = tenant_id.to_string();
        let station_id = station_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let request = client.request_configuration(&tenant_id, &station_id);
            match tokio::time::timeout(limit, request).await {
                Ok(Ok(())) => debug!("OCPP parameters of {} retrieved", station_id),
                Ok(Err(e)) => warn!("OCPP parameters of {} not retrieved: {}", station_id, e),
                Err(_) => warn!(
                    "OCPP parameters of {} not retrieved within {:?}",
                    station_id, limit
                ),
            }
        })
    }

    // ========================================================================
    // Heartbeat
    // ========================================================================

    pub async fn heartbeat(&self, headers: &OcppHeaders, _request: HeartbeatRequest) -> HeartbeatResponse {
        let _turn = self.station_turn(headers).await;

        if let Err(e) = self.try_heartbeat(headers).await {
            report(headers, Action::Heartbeat, &e);
        }
        HeartbeatResponse {
            current_time: Utc::now(),
        }
    }

    async fn try_heartbeat(&self, headers: &OcppHeaders) -> Result<(), EngineError> {
        let mut station = self.load_station(headers, Action::Heartbeat).await?;
        let now = Utc::now();
        station.last_heartbeat = Some(now);
        station.touch(now, headers.current_ip.as_deref());
        self.storage
            .save_charging_station(&headers.tenant_id, &station)
            .await?;
        debug!("Heartbeat from {}", station.id);
        Ok(())
    }

    // ========================================================================
    // StatusNotification
    // ========================================================================

    pub async fn status_notification(
        &self,
        headers: &OcppHeaders,
        request: StatusNotificationRequest,
    ) -> StatusNotificationResponse {
        let _turn = self.station_turn(headers).await;

        if let Err(e) = self.try_status_notification(headers, &request).await {
            report(headers, Action::StatusNotification, &e);
        }
        StatusNotificationResponse {}
    }

    async fn try_status_notification(
        &self,
        headers: &OcppHeaders,
        request: &StatusNotificationRequest,
    ) -> Result<(), EngineError> {
        let mut station = self.load_station(headers, Action::StatusNotification).await?;
        let update = StatusUpdate {
            status: request.status,
            error_code: request.error_code,
            info: request.info.clone(),
            vendor_error_code: request.vendor_error_code.clone(),
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
        };

        let connector_ids = if request.connector_id == 0 {
            if self.config.ignores_connector_zero(&station.charge_point_vendor) {
                info!(
                    "{}: connector 0 status {} ignored for vendor {}",
                    station.id, request.status, station.charge_point_vendor
                );
                return Ok(());
            }
            station.connector_ids()
        } else {
            vec![request.connector_id]
        };

        let mut changed = false;
        for connector_id in connector_ids {
            changed |= self
                .apply_connector_status(&headers.tenant_id, &mut station, connector_id, &update)
                .await?;
        }
        if changed {
            self.storage
                .save_connectors(&headers.tenant_id, &station.id, &station.connectors)
                .await?;
        }
        Ok(())
    }

    /// Apply a status to one connector. Returns true when the connector changed.
    async fn apply_connector_status(
        &self,
        tenant_id: &str,
        station: &mut ChargingStation,
        connector_id: ConnectorId,
        update: &StatusUpdate,
    ) -> Result<bool, EngineError> {
        let known = station.connectors.len();
        let connector = station.connector_or_insert(connector_id);
        let needs_cleanup = connector.fold_status(update.status) == ConnectorStatus::Available
            && connector.has_transaction();
        let open_transaction_id = connector.current_transaction_id;
        let created = station.connectors.len() != known;

        if needs_cleanup {
            info!(
                "{} connector {} is available with transaction {} still open",
                station.id, connector_id, open_transaction_id
            );
            self.transactions
                .cleanup_connector(tenant_id, station, connector_id, Action::StatusNotification)
                .await?;
        }

        let transition = station.connector_or_insert(connector_id).apply_status(update);
        let StatusTransition::Changed { previous, current } = transition else {
            return Ok(needs_cleanup || created);
        };
        info!(
            "{} connector {}: {} -> {} ({:?})",
            station.id, connector_id, previous, current, update.error_code
        );

        if transition.closes_extra_inactivity() || transition.skips_extra_inactivity() {
            if let Err(e) = self
                .settle_extra_inactivity(tenant_id, station, connector_id, transition, update.timestamp)
                .await
            {
                warn!(
                    "{} connector {}: extra inactivity not updated: {}",
                    station.id, connector_id, e
                );
            }
        }

        if current == ConnectorStatus::Faulted || update.error_code != ChargePointErrorCode::NoError {
            if let Some(connector) = station.connector(connector_id) {
                if let Err(e) = self
                    .services
                    .notification
                    .status_error(tenant_id, station, connector)
                    .await
                {
                    debug!("Status error notification for {} failed: {}", station.id, e);
                }
            }
        }
        Ok(true)
    }

    /// Account for the time between the end of the last session and the unplug
    async fn settle_extra_inactivity(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
        connector_id: ConnectorId,
        transition: StatusTransition,
        unplugged_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(mut transaction) = self
            .storage
            .get_last_transaction(tenant_id, &station.id, connector_id)
            .await?
        else {
            return Ok(());
        };
        let interval = self.config.inactivity_interval_secs();
        let Some(stop) = transaction.stop.as_mut() else {
            return Ok(());
        };

        let updated = if transition.closes_extra_inactivity() {
            unplugged_at >= stop.timestamp && stop.compute_extra_inactivity(unplugged_at, interval)
        } else {
            stop.skip_extra_inactivity()
        };
        if updated {
            info!(
                "Transaction {}: extra inactivity of {} s",
                transaction.id, stop.extra_inactivity_secs
            );
            self.storage.save_transaction(tenant_id, &transaction).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Authorize
    // ========================================================================

    pub async fn authorize(&self, headers: &OcppHeaders, request: AuthorizeRequest) -> AuthorizeResponse {
        let _turn = self.station_turn(headers).await;

        let status = match self.try_authorize(headers, &request).await {
            Ok(status) => status,
            Err(e) => {
                report(headers, Action::Authorize, &e);
                AuthorizationStatus::Invalid
            }
        };
        AuthorizeResponse {
            id_tag_info: IdTagInfo::new(status),
        }
    }

    async fn try_authorize(
        &self,
        headers: &OcppHeaders,
        request: &AuthorizeRequest,
    ) -> Result<AuthorizationStatus, EngineError> {
        if request.id_tag.is_empty() {
            return Err(EngineError::validation(Action::Authorize, "idTag is required"));
        }
        let station = self.load_station(headers, Action::Authorize).await?;
        let authorization = self
            .authorize_tag(&headers.tenant_id, &station, &request.id_tag)
            .await?;
        debug!(
            "Tag {} at {}: {:?}",
            request.id_tag, station.id, authorization.status
        );
        Ok(authorization.status)
    }

    // ========================================================================
    // StartTransaction
    // ========================================================================

    pub async fn start_transaction(
        &self,
        headers: &OcppHeaders,
        request: StartTransactionRequest,
    ) -> StartTransactionResponse {
        let _turn = self.station_turn(headers).await;

        match self.try_start_transaction(headers, &request).await {
            Ok(response) => response,
            Err(e) => {
                report(headers, Action::StartTransaction, &e);
                StartTransactionResponse {
                    transaction_id: 0,
                    id_tag_info: IdTagInfo::new(AuthorizationStatus::Invalid),
                }
            }
        }
    }

    async fn try_start_transaction(
        &self,
        headers: &OcppHeaders,
        request: &StartTransactionRequest,
    ) -> Result<StartTransactionResponse, EngineError> {
        let action = Action::StartTransaction;
        if request.connector_id == 0 {
            return Err(EngineError::validation(action, "connectorId must be positive"));
        }
        if request.id_tag.is_empty() {
            return Err(EngineError::validation(action, "idTag is required"));
        }

        let tenant_id = headers.tenant_id.as_str();
        let mut station = self.load_station(headers, action).await?;

        // Resent after a lost response: answer with the same transaction
        if let Some(active) = self
            .storage
            .get_active_transaction(tenant_id, &station.id, request.connector_id)
            .await?
        {
            if active.tag_id == request.id_tag
                && active.timestamp == request.timestamp
                && active.meter_start == request.meter_start
            {
                info!(
                    "StartTransaction from {} resent, returning transaction {}",
                    station.id, active.id
                );
                return Ok(StartTransactionResponse {
                    transaction_id: active.id,
                    id_tag_info: IdTagInfo::new(AuthorizationStatus::Accepted),
                });
            }
        }

        let authorization = self
            .authorize_tag(tenant_id, &station, &request.id_tag)
            .await?;
        if !authorization.is_accepted() {
            warn!(
                "Tag {} refused at {} connector {}: {:?}",
                request.id_tag, station.id, request.connector_id, authorization.status
            );
            return Ok(StartTransactionResponse {
                transaction_id: 0,
                id_tag_info: IdTagInfo::new(authorization.status),
            });
        }

        station.connector_or_insert(request.connector_id);
        self.transactions
            .cleanup_connector(tenant_id, &mut station, request.connector_id, action)
            .await?;
        let transaction = self
            .transactions
            .open(tenant_id, &mut station, request, &authorization)
            .await?;
        self.storage
            .save_connectors(tenant_id, &station.id, &station.connectors)
            .await?;

        Ok(StartTransactionResponse {
            transaction_id: transaction.id,
            id_tag_info: IdTagInfo::new(AuthorizationStatus::Accepted),
        })
    }

    // ========================================================================
    // MeterValues
    // ========================================================================

    pub async fn meter_values(&self, headers: &OcppHeaders, request: MeterValuesRequest) -> MeterValuesResponse {
        let _turn = self.station_turn(headers).await;

        if let Err(e) = self.try_meter_values(headers, &request).await {
            report(headers, Action::MeterValues, &e);
        }
        MeterValuesResponse {}
    }

    async fn try_meter_values(
        &self,
        headers: &OcppHeaders,
        request: &MeterValuesRequest,
    ) -> Result<(), EngineError> {
        let tenant_id = headers.tenant_id.as_str();
        let mut station = self.load_station(headers, Action::MeterValues).await?;
        let transaction_id = request.transaction();

        let values = self.normalizer.normalize(
            &station,
            request.connector_id,
            transaction_id,
            &request.raw(),
        );
        if let Err(e) = self.storage.save_meter_values(tenant_id, &values).await {
            warn!("Meter values of {} not stored: {}", station.id, e);
        }

        let Some(transaction_id) = transaction_id else {
            debug!(
                "{} connector {}: {} meter values without transaction ignored",
                station.id,
                request.connector_id,
                values.len()
            );
            return Ok(());
        };
        if values.is_empty() {
            return Ok(());
        }

        self.transactions
            .update(tenant_id, &mut station, transaction_id, &values)
            .await?;
        Ok(())
    }

    // ========================================================================
    // StopTransaction
    // ========================================================================

    pub async fn stop_transaction(
        &self,
        headers: &OcppHeaders,
        request: StopTransactionRequest,
    ) -> StopTransactionResponse {
        let _turn = self.station_turn(headers).await;

        let status = match self.try_stop_transaction(headers, &request).await {
            Ok(()) => AuthorizationStatus::Accepted,
            Err(e) => {
                report(headers, Action::StopTransaction, &e);
                AuthorizationStatus::Invalid
            }
        };
        StopTransactionResponse {
            id_tag_info: Some(IdTagInfo::new(status)),
        }
    }

    async fn try_stop_transaction(
        &self,
        headers: &OcppHeaders,
        request: &StopTransactionRequest,
    ) -> Result<(), EngineError> {
        let action = Action::StopTransaction;
        let tenant_id = headers.tenant_id.as_str();
        let mut station = self.load_station(headers, action).await?;

        let transaction = self
            .storage
            .get_transaction(tenant_id, request.transaction_id)
            .await?
            .ok_or_else(|| {
                EngineError::backend(
                    &station.id,
                    action,
                    MODULE,
                    format!("Transaction {} does not exist", request.transaction_id),
                )
            })?;
        if transaction.charging_station_id != station.id {
            return Err(EngineError::backend(
                &station.id,
                action,
                MODULE,
                format!(
                    "Transaction {} belongs to {}",
                    transaction.id, transaction.charging_station_id
                ),
            ));
        }
        if !transaction.is_active() {
            return Err(EngineError::backend(
                &station.id,
                action,
                MODULE,
                format!("Transaction {} has already been stopped", transaction.id),
            ));
        }

        let stopper = self
            .authorize_stop(tenant_id, &station, &transaction, request.id_tag.as_deref())
            .await?;

        let transaction_data: Vec<_> = request
            .raw_transaction_data()
            .iter()
            .flat_map(|raw| {
                self.normalizer.normalize(
                    &station,
                    transaction.connector_id,
                    Some(transaction.id),
                    raw,
                )
            })
            .collect();
        if !transaction_data.is_empty() {
            if let Err(e) = self.storage.save_meter_values(tenant_id, &transaction_data).await {
                warn!("Stop meter values of {} not stored: {}", station.id, e);
            }
        }

        let stop = StopEvent {
            meter_stop: request.meter_stop,
            timestamp: request.timestamp,
            tag_id: Some(stopper.tag_id),
            user_id: stopper.user_id,
            reason: request.reason.clone(),
            transaction_data,
        };
        self.transactions
            .close(tenant_id, &mut station, transaction, stop, action)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Firmware / Diagnostics status
    // ========================================================================

    pub async fn firmware_status_notification(
        &self,
        headers: &OcppHeaders,
        request: FirmwareStatusNotificationRequest,
    ) -> FirmwareStatusNotificationResponse {
        let _turn = self.station_turn(headers).await;

        let result = async {
            let mut station = self
                .load_station(headers, Action::FirmwareStatusNotification)
                .await?;
            info!("{} firmware update status: {}", station.id, request.status);
            station.firmware_update_status = Some(request.status);
            self.storage
                .save_charging_station(&headers.tenant_id, &station)
                .await?;
            Ok::<(), EngineError>(())
        }
        .await;
        if let Err(e) = result {
            report(headers, Action::FirmwareStatusNotification, &e);
        }
        FirmwareStatusNotificationResponse {}
    }

    pub async fn diagnostics_status_notification(
        &self,
        headers: &OcppHeaders,
        request: DiagnosticsStatusNotificationRequest,
    ) -> DiagnosticsStatusNotificationResponse {
        let _turn = self.station_turn(headers).await;

        let result = async {
            let mut station = self
                .load_station(headers, Action::DiagnosticsStatusNotification)
                .await?;
            info!("{} diagnostics status: {}", station.id, request.status);
            station.diagnostics_status = Some(request.status);
            self.storage
                .save_charging_station(&headers.tenant_id, &station)
                .await?;
            Ok::<(), EngineError>(())
        }
        .await;
        if let Err(e) = result {
            report(headers, Action::DiagnosticsStatusNotification, &e);
        }
        DiagnosticsStatusNotificationResponse {}
    }

    async fn load_station(
        &self,
        headers: &OcppHeaders,
        action: Action,
    ) -> Result<ChargingStation, EngineError> {
        self.storage
            .get_charging_station(&headers.tenant_id, &headers.charge_box_identity)
            .await?
            .ok_or_else(|| {
                EngineError::backend(
                    &headers.charge_box_identity,
                    action,
                    MODULE,
                    "Charging Station does not exist",
                )
            })
    }
}
