//! In-memory storage
//!
//! Backs the tests and the demo node; nothing survives a restart. Records
//! are cloned in and out, so a caller never shares a mutable instance with
//! another request. Raw meter values are kept per tenant up to a capacity,
//! oldest dropped first.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use csms_core::{
    ChargingStation, Connector, ConnectorId, Consumption, NormalizedMeterValue, Transaction,
    TransactionId,
};
use parking_lot::RwLock;

use super::models::{RegistrationToken, SiteArea, Tag, TenantComponents, User};
use super::storage::Storage;
use crate::error::StorageError;

type Key = (String, String);

const DEFAULT_METER_VALUE_CAPACITY: usize = 10_000;

fn key(tenant_id: &str, id: impl ToString) -> Key {
    (tenant_id.to_string(), id.to_string())
}

#[derive(Debug, Default)]
struct Tables {
    stations: HashMap<Key, ChargingStation>,
    transactions: HashMap<(String, TransactionId), Transaction>,
    consumptions: HashMap<(String, TransactionId), Vec<Consumption>>,
    meter_values: HashMap<String, VecDeque<NormalizedMeterValue>>,
    tags: HashMap<Key, Tag>,
    users: HashMap<Key, User>,
    site_areas: HashMap<Key, SiteArea>,
    registration_tokens: HashMap<Key, RegistrationToken>,
    components: HashMap<String, TenantComponents>,
}

#[derive(Debug)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    meter_value_capacity: usize,
    next_transaction_id: AtomicI64,
    connector_writes: AtomicUsize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            meter_value_capacity: DEFAULT_METER_VALUE_CAPACITY,
            next_transaction_id: AtomicI64::new(1),
            connector_writes: AtomicUsize::new(0),
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` raw meter values per tenant
    pub fn with_meter_value_capacity(mut self, capacity: usize) -> Self {
        self.meter_value_capacity = capacity;
        self
    }

    pub fn insert_tag(&self, tenant_id: &str, tag: Tag) {
        self.tables.write().tags.insert(key(tenant_id, &tag.id), tag);
    }

    pub fn insert_user(&self, tenant_id: &str, user: User) {
        self.tables.write().users.insert(key(tenant_id, &user.id), user);
    }

    pub fn insert_site_area(&self, tenant_id: &str, site_area: SiteArea) {
        self.tables
            .write()
            .site_areas
            .insert(key(tenant_id, &site_area.id), site_area);
    }

    pub fn insert_registration_token(&self, tenant_id: &str, token: RegistrationToken) {
        self.tables
            .write()
            .registration_tokens
            .insert(key(tenant_id, &token.id), token);
    }

    pub fn set_tenant_components(&self, tenant_id: &str, components: TenantComponents) {
        self.tables
            .write()
            .components
            .insert(tenant_id.to_string(), components);
    }

    /// Consumptions of a transaction, in insertion order
    pub fn consumptions(&self, tenant_id: &str, transaction_id: TransactionId) -> Vec<Consumption> {
        self.tables
            .read()
            .consumptions
            .get(&(tenant_id.to_string(), transaction_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn meter_values(&self, tenant_id: &str) -> Vec<NormalizedMeterValue> {
        self.tables
            .read()
            .meter_values
            .get(tenant_id)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All transactions of a connector, oldest first
    pub fn transactions(
        &self,
        tenant_id: &str,
        station_id: &str,
        connector_id: ConnectorId,
    ) -> Vec<Transaction> {
        let tables = self.tables.read();
        let mut transactions: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|((tenant, _), tx)| {
                tenant == tenant_id
                    && tx.charging_station_id == station_id
                    && tx.connector_id == connector_id
            })
            .map(|(_, tx)| tx.clone())
            .collect();
        transactions.sort_by_key(|tx| (tx.timestamp, tx.id));
        transactions
    }

    /// Number of connector writes so far
    pub fn connector_writes(&self) -> usize {
        self.connector_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_charging_station(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<ChargingStation>, StorageError> {
        Ok(self.tables.read().stations.get(&key(tenant_id, id)).cloned())
    }

    async fn save_charging_station(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
    ) -> Result<(), StorageError> {
        self.tables
            .write()
            .stations
            .insert(key(tenant_id, &station.id), station.clone());
        Ok(())
    }

    async fn save_connectors(
        &self,
        tenant_id: &str,
        station_id: &str,
        connectors: &[Connector],
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let station = tables
            .stations
            .get_mut(&key(tenant_id, station_id))
            .ok_or_else(|| StorageError::NotFound(format!("Charging station {}", station_id)))?;
        station.connectors = connectors.to_vec();
        self.connector_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_transaction(
        &self,
        tenant_id: &str,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .tables
            .read()
            .transactions
            .get(&(tenant_id.to_string(), id))
            .cloned())
    }

    async fn save_transaction(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), StorageError> {
        self.tables
            .write()
            .transactions
            .insert((tenant_id.to_string(), transaction.id), transaction.clone());
        Ok(())
    }

    async fn next_transaction_id(&self, _tenant_id: &str) -> Result<TransactionId, StorageError> {
        Ok(self.next_transaction_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn get_active_transaction(
        &self,
        tenant_id: &str,
        station_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .transactions(tenant_id, station_id, connector_id)
            .into_iter()
            .rev()
            .find(Transaction::is_active))
    }

    async fn get_last_transaction(
        &self,
        tenant_id: &str,
        station_id: &str,
        connector_id: ConnectorId,
    ) -> Result<Option<Transaction>, StorageError> {
        Ok(self
            .transactions(tenant_id, station_id, connector_id)
            .into_iter()
            .last())
    }

    async fn delete_transaction(&self, tenant_id: &str, id: TransactionId) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let key = (tenant_id.to_string(), id);
        tables
            .transactions
            .remove(&key)
            .ok_or_else(|| StorageError::NotFound(format!("Transaction {}", id)))?;
        tables.consumptions.remove(&key);
        Ok(())
    }

    async fn save_consumption(
        &self,
        tenant_id: &str,
        consumption: &Consumption,
    ) -> Result<(), StorageError> {
        self.tables
            .write()
            .consumptions
            .entry((tenant_id.to_string(), consumption.transaction_id))
            .or_default()
            .push(consumption.clone());
        Ok(())
    }

    async fn save_meter_values(
        &self,
        tenant_id: &str,
        values: &[NormalizedMeterValue],
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let stored = tables.meter_values.entry(tenant_id.to_string()).or_default();
        stored.extend(values.iter().cloned());
        let excess = stored.len().saturating_sub(self.meter_value_capacity);
        stored.drain(..excess);
        Ok(())
    }

    async fn get_tag(&self, tenant_id: &str, id: &str) -> Result<Option<Tag>, StorageError> {
        Ok(self.tables.read().tags.get(&key(tenant_id, id)).cloned())
    }

    async fn get_user(&self, tenant_id: &str, id: &str) -> Result<Option<User>, StorageError> {
        Ok(self.tables.read().users.get(&key(tenant_id, id)).cloned())
    }

    async fn get_site_area(&self, tenant_id: &str, id: &str) -> Result<Option<SiteArea>, StorageError> {
        Ok(self.tables.read().site_areas.get(&key(tenant_id, id)).cloned())
    }

    async fn get_registration_token(
        &self,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<RegistrationToken>, StorageError> {
        Ok(self
            .tables
            .read()
            .registration_tokens
            .get(&key(tenant_id, id))
            .cloned())
    }

    async fn get_tenant_components(&self, tenant_id: &str) -> Result<TenantComponents, StorageError> {
        Ok(self
            .tables
            .read()
            .components
            .get(tenant_id)
            .copied()
            .unwrap_or_default())
    }
}
