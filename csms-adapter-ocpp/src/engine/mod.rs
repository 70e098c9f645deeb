//! OCPP session engine
//!
//! - `context`: per-request headers
//! - `authorization`: tag checks for start, stop and Authorize
//! - `transactions`: transaction lifecycle
//! - `smart_charging`: site area recomputation under lock
//! - `handlers`: one entry point per OCPP action
//! - `dispatcher`: JSON payload routing to the handlers
//!
//! Each handler reloads the station, mutates its own copy and writes it
//! back. Messages of one station are handled one at a time.

pub mod context;
pub mod authorization;
pub mod transactions;
pub mod smart_charging;
pub mod handlers;
pub mod dispatcher;

use std::sync::Arc;

use csms_core::{MeterValueNormalizer, SiteAreaLocks, StationLocks, TransactionId};
use tokio::sync::OwnedMutexGuard;
use tracing::info;

pub use authorization::{StopAuthorization, TagAuthorization};
pub use context::OcppHeaders;
pub use smart_charging::SmartChargingTrigger;
pub use transactions::{StopEvent, TransactionManager};

use crate::config::EngineConfig;
use crate::error::{EngineError, StorageError};
use crate::services::{Collaborators, Storage};

/// Processes decoded OCPP requests of every station of every tenant
#[derive(Clone)]
pub struct OcppEngine {
    config: Arc<EngineConfig>,
    storage: Arc<dyn Storage>,
    services: Collaborators,
    normalizer: Arc<MeterValueNormalizer>,
    transactions: TransactionManager,
    smart_charging: SmartChargingTrigger,
    station_locks: StationLocks,
}

impl OcppEngine {
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>, services: Collaborators) -> Self {
        let config = Arc::new(config);
        let smart_charging = SmartChargingTrigger::new(
            services.smart_charging.clone(),
            storage.clone(),
            SiteAreaLocks::new(),
            config.smart_charging_timeout,
        );
        let transactions = TransactionManager::new(
            config.clone(),
            storage.clone(),
            services.clone(),
            smart_charging.clone(),
        );

        Self {
            normalizer: Arc::new(config.normalizer()),
            config,
            storage,
            services,
            transactions,
            smart_charging,
            station_locks: StationLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn smart_charging(&self) -> &SmartChargingTrigger {
        &self.smart_charging
    }

    /// Wait until no other message of this station is being handled
    async fn station_turn(&self, headers: &OcppHeaders) -> OwnedMutexGuard<()> {
        self.station_locks
            .lock(&headers.tenant_id, &headers.charge_box_identity)
            .await
    }

    /// Remember that an operator asked the station to stop a transaction.
    ///
    /// The tag is accepted as the stopping tag while the request is recent.
    pub async fn record_remote_stop(
        &self,
        tenant_id: &str,
        transaction_id: TransactionId,
        tag_id: &str,
    ) -> Result<(), EngineError> {
        let not_found = || StorageError::NotFound(format!("Transaction {}", transaction_id));

        let station_id = self
            .storage
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(not_found)?
            .charging_station_id;
        let _turn = self.station_locks.lock(tenant_id, &station_id).await;

        let mut transaction = self
            .storage
            .get_transaction(tenant_id, transaction_id)
            .await?
            .ok_or_else(not_found)?;
        transaction.remote_stop = Some(csms_core::RemoteStop {
            tag_id: tag_id.to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.storage.save_transaction(tenant_id, &transaction).await?;

        info!(
            "Remote stop of transaction {} on {} requested with tag {}",
            transaction_id, station_id, tag_id
        );
        Ok(())
    }
}

impl std::fmt::Debug for OcppEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcppEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
