//! Transaction lifecycle
//!
//! `(none) -> open -> closed`:
//! - [`TransactionManager::open`] creates the transaction with a priced,
//!   zero-length baseline consumption and binds it to its connector
//! - [`TransactionManager::update`] folds meter values into consumptions
//! - [`TransactionManager::close`] folds the stop reading, stamps the stop
//!   record and frees the connector
//! - [`TransactionManager::cleanup_connector`] gets rid of whatever is still
//!   open on a connector before a new session starts or once it is free again
//!
//! The station passed in is the caller's copy; connector changes are written
//! back through storage by whoever owns that copy, except in `update` and
//! `close` which persist the connectors themselves.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use csms_core::{
    ChargingStation, ConnectorId, Consumption, ConsumptionBuilder, InstantReadings,
    MeterValueAttribute, NormalizedMeterValue, ReadingContext, SampleValue, Transaction,
    TransactionId,
};
use tracing::{debug, error, info, warn};

use super::authorization::TagAuthorization;
use super::smart_charging::SmartChargingTrigger;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ocpp::{Action, StartTransactionRequest};
use crate::services::{Collaborators, PricedConsumption, Storage, TenantComponents, TransactionPhase};

const MODULE: &str = "TransactionManager";

/// Stop event, from a StopTransaction or synthesized by the cleanup
#[derive(Debug, Clone)]
pub struct StopEvent {
    pub meter_stop: f64,
    pub timestamp: DateTime<Utc>,
    pub tag_id: Option<String>,
    pub user_id: Option<String>,
    pub reason: Option<String>,
    /// Trailing readings sent with the stop
    pub transaction_data: Vec<NormalizedMeterValue>,
}

#[derive(Clone)]
pub struct TransactionManager {
    config: Arc<EngineConfig>,
    storage: Arc<dyn Storage>,
    services: Collaborators,
    builder: ConsumptionBuilder,
    smart_charging: SmartChargingTrigger,
}

impl TransactionManager {
    pub fn new(
        config: Arc<EngineConfig>,
        storage: Arc<dyn Storage>,
        services: Collaborators,
        smart_charging: SmartChargingTrigger,
    ) -> Self {
        let builder = ConsumptionBuilder::new(config.consumption_settings());
        Self {
            config,
            storage,
            services,
            builder,
            smart_charging,
        }
    }

    /// Open a transaction for an authorized StartTransaction
    pub async fn open(
        &self,
        tenant_id: &str,
        station: &mut ChargingStation,
        request: &StartTransactionRequest,
        authorization: &TagAuthorization,
    ) -> Result<Transaction, EngineError> {
        let id = self.storage.next_transaction_id(tenant_id).await?;
        let mut transaction = Transaction::open(
            id,
            &station.id,
            request.connector_id,
            &request.id_tag,
            request.meter_start,
            request.timestamp,
        );
        transaction.site_id = station.site_id.clone();
        transaction.site_area_id = station.site_area_id.clone();
        transaction.user_id = authorization.user_id.clone();
        transaction.roaming = authorization.roaming;

        let components = self.storage.get_tenant_components(tenant_id).await?;

        let mut opening = Consumption::opening(&transaction);
        if let Some(priced) = self
            .price(tenant_id, &components, &transaction, &opening, TransactionPhase::Start)
            .await
        {
            transaction.current_cumulated_price = priced.cumulated_amount;
            apply_price(&mut opening, priced);
        }
        self.storage.save_consumption(tenant_id, &opening).await?;
        self.bill(tenant_id, &components, &transaction, TransactionPhase::Start)
            .await;

        station.connector_or_insert(request.connector_id).bind_transaction(
            id,
            request.timestamp,
            Some(request.id_tag.clone()),
            transaction.user_id.clone(),
        );
        self.storage.save_transaction(tenant_id, &transaction).await?;

        if let Err(e) = self
            .services
            .notification
            .session_started(tenant_id, &transaction)
            .await
        {
            debug!("Transaction {}: session started notification failed: {}", id, e);
        }
        if transaction.roaming && components.roaming {
            if let Err(e) = self.services.roaming.start_session(tenant_id, &transaction).await {
                warn!("Transaction {}: roaming session start failed: {}", id, e);
            }
        }

        info!(
            "Started transaction {} on {} connector {} with tag {} at {} Wh",
            id, station.id, request.connector_id, request.id_tag, request.meter_start
        );
        Ok(transaction)
    }

    /// Fold the meter values of an open transaction
    pub async fn update(
        &self,
        tenant_id: &str,
        station: &mut ChargingStation,
        transaction_id: TransactionId,
        values: &[NormalizedMeterValue],
    ) -> Result<Transaction, EngineError> {
        let mut transaction = self
            .storage
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(|| {
                EngineError::backend(
                    &station.id,
                    Action::MeterValues,
                    MODULE,
                    format!("Transaction {} does not exist", transaction_id),
                )
            })?;
        if transaction.charging_station_id != station.id {
            return Err(EngineError::backend(
                &station.id,
                Action::MeterValues,
                MODULE,
                format!(
                    "Transaction {} belongs to {}",
                    transaction_id, transaction.charging_station_id
                ),
            ));
        }
        if !transaction.is_active() {
            return Err(EngineError::backend(
                &station.id,
                Action::MeterValues,
                MODULE,
                format!("Transaction {} has already been stopped", transaction_id),
            ));
        }

        let first_values = transaction.number_of_meter_values == 0;
        let connector_id = transaction.connector_id;
        let consumptions =
            self.builder
                .fold(&mut transaction, station.connector(connector_id), values);
        transaction.number_of_meter_values += values.len() as u32;
        if first_values && transaction.phases_used.is_none() {
            transaction.phases_used = phases_drawing_current(&transaction.current_instant);
        }
        transaction.refresh_inactivity_status(self.config.inactivity_interval_secs());

        let components = self.storage.get_tenant_components(tenant_id).await?;
        let priced_any = !consumptions.is_empty();
        for mut consumption in consumptions {
            if let Some(priced) = self
                .price(tenant_id, &components, &transaction, &consumption, TransactionPhase::Update)
                .await
            {
                transaction.current_cumulated_price = priced.cumulated_amount;
                apply_price(&mut consumption, priced);
            }
            self.storage.save_consumption(tenant_id, &consumption).await?;
        }
        if priced_any {
            self.bill(tenant_id, &components, &transaction, TransactionPhase::Update)
                .await;
        }

        refresh_connector(station, &transaction);
        self.storage.save_transaction(tenant_id, &transaction).await?;
        self.storage
            .save_connectors(tenant_id, &station.id, &station.connectors)
            .await?;

        if transaction.roaming && components.roaming {
            if let Err(e) = self.services.roaming.update_session(tenant_id, &transaction).await {
                warn!("Transaction {}: roaming session update failed: {}", transaction_id, e);
            }
        }

        // A car drawing on a single phase changes the site area budget
        if first_values && transaction.car_id.is_none() && transaction.phases_used == Some(1) {
            if let Some(site_area_id) = self.smart_charging.site_area_for(tenant_id, station).await {
                info!(
                    "Transaction {} charges on one phase, recomputing site area {}",
                    transaction_id, site_area_id
                );
                self.smart_charging
                    .schedule(tenant_id, site_area_id, Duration::ZERO);
            }
        }

        debug!(
            "Transaction {}: {} Wh consumed, {} s inactive",
            transaction_id,
            transaction.current_total_consumption_wh,
            transaction.current_total_inactivity_secs
        );
        Ok(transaction)
    }

    /// Close an open transaction
    pub async fn close(
        &self,
        tenant_id: &str,
        station: &mut ChargingStation,
        mut transaction: Transaction,
        stop: StopEvent,
        action: Action,
    ) -> Result<Transaction, EngineError> {
        if !transaction.is_active() {
            return Err(EngineError::backend(
                &station.id,
                action,
                MODULE,
                format!("Transaction {} has already been stopped", transaction.id),
            ));
        }

        let mut values = stop.transaction_data;
        let mut end_signed_data = None;
        for value in &values {
            if let SampleValue::Signed(data) = &value.value {
                match value.attribute.context {
                    ReadingContext::TransactionBegin if transaction.signed_data.is_none() => {
                        transaction.signed_data = Some(data.clone());
                    }
                    ReadingContext::TransactionEnd => end_signed_data = Some(data.clone()),
                    _ => {}
                }
            }
        }
        values.push(NormalizedMeterValue {
            timestamp: stop.timestamp,
            connector_id: transaction.connector_id,
            transaction_id: Some(transaction.id),
            current_type: station.current_type(transaction.connector_id),
            attribute: MeterValueAttribute::energy_register(ReadingContext::TransactionEnd),
            value: SampleValue::Numeric(stop.meter_stop),
        });

        let connector_id = transaction.connector_id;
        let mut consumptions =
            self.builder
                .fold(&mut transaction, station.connector(connector_id), &values);
        if consumptions.is_empty() {
            consumptions.push(Consumption::closing(&transaction));
        }
        transaction.refresh_inactivity_status(self.config.inactivity_interval_secs());

        let components = self.storage.get_tenant_components(tenant_id).await?;
        let last = consumptions.len() - 1;
        let mut currency = None;
        for (index, mut consumption) in consumptions.into_iter().enumerate() {
            let phase = if index == last {
                TransactionPhase::Stop
            } else {
                TransactionPhase::Update
            };
            if let Some(priced) = self
                .price(tenant_id, &components, &transaction, &consumption, phase)
                .await
            {
                transaction.current_cumulated_price = priced.cumulated_amount;
                currency = Some(priced.currency.clone());
                apply_price(&mut consumption, priced);
            }
            self.storage.save_consumption(tenant_id, &consumption).await?;
        }

        let price = currency.as_ref().map(|_| transaction.current_cumulated_price);
        let record = transaction.close(
            stop.meter_stop,
            stop.timestamp,
            stop.tag_id,
            stop.user_id,
            stop.reason,
        )?;
        record.signed_data = end_signed_data;
        record.price = price;
        record.price_unit = currency;

        if let Some(reference) = self
            .bill(tenant_id, &components, &transaction, TransactionPhase::Stop)
            .await
        {
            if let Some(record) = transaction.stop.as_mut() {
                record.billing_reference = Some(reference);
            }
        }

        if let Some(connector) = station.connector_mut(transaction.connector_id) {
            if connector.current_transaction_id == transaction.id {
                connector.release_transaction();
            }
        }
        self.storage.save_transaction(tenant_id, &transaction).await?;
        self.storage
            .save_connectors(tenant_id, &station.id, &station.connectors)
            .await?;

        if let Err(e) = self
            .services
            .notification
            .session_ended(tenant_id, &transaction)
            .await
        {
            debug!("Transaction {}: session ended notification failed: {}", transaction.id, e);
        }
        if transaction.roaming && components.roaming {
            if let Err(e) = self.services.roaming.stop_session(tenant_id, &transaction).await {
                warn!("Transaction {}: roaming session stop failed: {}", transaction.id, e);
            }
            if let Err(e) = self.services.roaming.post_cdr(tenant_id, &transaction).await {
                warn!("Transaction {}: roaming CDR failed: {}", transaction.id, e);
            }
        }

        // Only once the connector is free, so the computation can hand its power out
        if components.smart_charging {
            self.smart_charging
                .clear_transaction_profile(tenant_id, &transaction)
                .await;
            if let Some(site_area_id) = self.smart_charging.site_area_for(tenant_id, station).await {
                self.smart_charging.schedule(
                    tenant_id,
                    site_area_id,
                    self.config.smart_charging_delay,
                );
            }
        }

        if let Some(record) = &transaction.stop {
            info!(
                "Stopped transaction {} on {} connector {}: {} Wh in {} s",
                transaction.id,
                station.id,
                transaction.connector_id,
                record.total_consumption_wh,
                record.total_duration_secs
            );
        }
        Ok(transaction)
    }

    /// Close or discard every open transaction of a connector, then free it
    pub async fn cleanup_connector(
        &self,
        tenant_id: &str,
        station: &mut ChargingStation,
        connector_id: ConnectorId,
        action: Action,
    ) -> Result<(), EngineError> {
        let mut previous: Option<TransactionId> = None;

        while let Some(transaction) = self
            .storage
            .get_active_transaction(tenant_id, &station.id, connector_id)
            .await?
        {
            if previous == Some(transaction.id) {
                error!(
                    "Transaction {} on {} connector {} is still open after cleanup, giving up",
                    transaction.id, station.id, connector_id
                );
                break;
            }
            previous = Some(transaction.id);

            if transaction.current_total_consumption_wh <= 0.0 {
                self.storage.delete_transaction(tenant_id, transaction.id).await?;
                if let Some(connector) = station.connector_mut(connector_id) {
                    if connector.current_transaction_id == transaction.id {
                        connector.release_transaction();
                    }
                }
                warn!(
                    "Deleted transaction {} without consumption on {} connector {}",
                    transaction.id, station.id, connector_id
                );
            } else {
                let (meter_stop, timestamp) = transaction.last_meter_reading();
                warn!(
                    "Closing stale transaction {} on {} connector {} at {} Wh",
                    transaction.id, station.id, connector_id, meter_stop
                );
                let stop = StopEvent {
                    meter_stop,
                    timestamp,
                    tag_id: Some(transaction.tag_id.clone()),
                    user_id: transaction.user_id.clone(),
                    reason: Some("Other".to_string()),
                    transaction_data: Vec::new(),
                };
                self.close(tenant_id, station, transaction, stop, action).await?;
            }
        }

        let station_id = station.id.clone();
        if let Some(connector) = station.connector_mut(connector_id) {
            if connector.has_transaction() {
                debug!(
                    "{} connector {}: dropping reference to closed transaction {}",
                    station_id, connector_id, connector.current_transaction_id
                );
                connector.release_transaction();
            }
        }
        Ok(())
    }

    async fn price(
        &self,
        tenant_id: &str,
        components: &TenantComponents,
        transaction: &Transaction,
        consumption: &Consumption,
        phase: TransactionPhase,
    ) -> Option<PricedConsumption> {
        if !components.pricing || !consumption.to_price {
            return None;
        }
        match self
            .services
            .pricing
            .price_transaction(tenant_id, transaction, consumption, phase)
            .await
        {
            Ok(priced) => priced,
            Err(e) => {
                warn!("Transaction {}: pricing ({:?}) failed: {}", transaction.id, phase, e);
                None
            }
        }
    }

    async fn bill(
        &self,
        tenant_id: &str,
        components: &TenantComponents,
        transaction: &Transaction,
        phase: TransactionPhase,
    ) -> Option<String> {
        if !components.billing {
            return None;
        }
        match self
            .services
            .billing
            .bill_transaction(tenant_id, transaction, phase)
            .await
        {
            Ok(reference) => reference,
            Err(e) => {
                warn!("Transaction {}: billing ({:?}) failed: {}", transaction.id, phase, e);
                None
            }
        }
    }
}

fn apply_price(consumption: &mut Consumption, priced: PricedConsumption) {
    consumption.amount = Some(priced.amount);
    consumption.cumulated_amount = Some(priced.cumulated_amount);
    consumption.currency = Some(priced.currency);
}

/// Phases with current flowing, when the station reports per-phase current
fn phases_drawing_current(instant: &InstantReadings) -> Option<u8> {
    if !instant.amps.has_phases() {
        return None;
    }
    let phases = instant
        .amps
        .phases()
        .iter()
        .filter(|amps| amps.is_some_and(|a| a > 0.0))
        .count();
    Some(phases as u8)
}

/// Mirror the running totals of a transaction on its connector
fn refresh_connector(station: &mut ChargingStation, transaction: &Transaction) {
    let connector = station.connector_or_insert(transaction.connector_id);
    if connector.current_transaction_id != transaction.id {
        return;
    }
    connector.current_instant = transaction.current_instant;
    connector.current_total_consumption_wh = transaction.current_total_consumption_wh;
    connector.current_total_inactivity_secs = transaction.current_total_inactivity_secs;
    connector.current_inactivity_status = transaction.current_inactivity_status;
    connector.current_state_of_charge = transaction.current_state_of_charge;
}

#[cfg(test)]
mod tests {
    use super::*;
    use csms_core::PhaseSlot;

    #[test]
    fn test_phases_drawing_current() {
        let mut instant = InstantReadings::default();
        instant.amps.set(PhaseSlot::Total, 16.0);
        assert_eq!(phases_drawing_current(&instant), None);

        instant.amps.set(PhaseSlot::L1, 16.0);
        instant.amps.set(PhaseSlot::L2, 0.0);
        instant.amps.set(PhaseSlot::L3, 0.0);
        assert_eq!(phases_drawing_current(&instant), Some(1));

        instant.amps.set(PhaseSlot::L2, 15.5);
        assert_eq!(phases_drawing_current(&instant), Some(2));
    }

    #[test]
    fn test_refresh_connector_only_for_bound_transaction() {
        let start = Utc::now();
        let mut station = ChargingStation::new(
            "CS001",
            "Vendor",
            "Model",
            csms_core::OcppVersion::V16,
            csms_core::OcppProtocol::Json,
            start,
        );
        let mut transaction = Transaction::open(3, "CS001", 1, "TAG", 0.0, start);
        transaction.current_total_consumption_wh = 1200.0;

        refresh_connector(&mut station, &transaction);
        assert_eq!(station.connector(1).unwrap().current_total_consumption_wh, 0.0);

        station
            .connector_or_insert(1)
            .bind_transaction(3, start, Some("TAG".into()), None);
        refresh_connector(&mut station, &transaction);
        assert_eq!(station.connector(1).unwrap().current_total_consumption_wh, 1200.0);
    }
}
