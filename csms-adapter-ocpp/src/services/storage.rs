//! Storage contract
//!
//! Every call is keyed by tenant. The engine reloads what it needs on each
//! request, mutates its copy and writes it back.

use async_trait::async_trait;
use csms_core::{
    ChargingStation, Connector, ConnectorId, Consumption, NormalizedMeterValue, Transaction,
    TransactionId,
};

use super::models::{RegistrationToken, SiteArea, Tag, TenantComponents, User};
use crate::error::StorageError;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_charging_station(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<ChargingStation>, StorageError>;

    async fn save_charging_station(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
    ) -> Result<(), StorageError>;

    /// Persist only the connectors of a station
    async fn save_connectors(
        &self,
        tenant_id: &str,
        station_id: &str,
        connectors: &[Connector],
    ) -> Result<(), StorageError>;

    async fn get_transaction(
        &self,
        tenant_id: &str,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StorageError>;

    async fn save_transaction(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), StorageError>;

    /// Allocate a fresh transaction id
    async fn next_transaction_id(&self, tenant_id: &str) -> Result<TransactionId, StorageError>;

    /// The open transaction of a connector, if any
    async fn get_active_transaction(
        &self,
        tenant_id: &str,
        station_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Option<Transaction>, StorageError>;

    /// The most recent transaction of a connector, open or closed
    async fn get_last_transaction(
        &self,
        tenant_id: &str,
        station_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Option<Transaction>, StorageError>;

    /// Remove a transaction and its consumptions
    async fn delete_transaction(&self, tenant_id: &str, id: TransactionId) -> Result<(), StorageError>;

    async fn save_consumption(
        &self,
        tenant_id: &str,
        consumption: &Consumption,
    ) -> Result<(), StorageError>;

    /// Keep the meter values of a request as received
    async fn save_meter_values(
        &self,
        tenant_id: &str,
        values: &[NormalizedMeterValue],
    ) -> Result<(), StorageError>;

    async fn get_tag(&self, tenant_id: &str, id: &str) -> Result<Option<Tag>, StorageError>;

    async fn get_user(&self, tenant_id: &str, id: &str) -> Result<Option<User>, StorageError>;

    async fn get_site_area(&self, tenant_id: &str, id: &str) -> Result<Option<SiteArea>, StorageError>;

    async fn get_registration_token(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<RegistrationToken>, StorageError>;

    async fn get_tenant_components(&self, tenant_id: &str) -> Result<TenantComponents, StorageError>;
}
