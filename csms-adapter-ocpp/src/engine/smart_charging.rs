//! Smart charging trigger
//!
//! Runs the site area computation of the smart charging collaborator under
//! the `(tenant, site area)` lock. A busy lock means another station of the
//! same area is already recomputing, so the trigger is skipped.

use std::sync::Arc;
use std::time::Duration;

use csms_core::{ChargingStation, SiteAreaLocks, Transaction};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::services::{SmartChargingService, Storage};

#[derive(Clone)]
pub struct SmartChargingTrigger {
    service: Arc<dyn SmartChargingService>,
    storage: Arc<dyn Storage>,
    locks: SiteAreaLocks,
    timeout: Duration,
}

impl SmartChargingTrigger {
    pub fn new(
        service: Arc<dyn SmartChargingService>,
        storage: Arc<dyn Storage>,
        locks: SiteAreaLocks,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            storage,
            locks,
            timeout,
        }
    }

    pub fn locks(&self) -> &SiteAreaLocks {
        &self.locks
    }

    /// Site area to recompute for a station, when smart charging applies to it
    pub async fn site_area_for(&self, tenant_id: &str, station: &ChargingStation) -> Option<String> {
        let site_area_id = station.site_area_id.as_deref()?;

        match self.storage.get_tenant_components(tenant_id).await {
            Ok(components) if components.smart_charging => {}
            Ok(_) => return None,
            Err(e) => {
                warn!("Tenant {}: cannot read components: {}", tenant_id, e);
                return None;
            }
        }

        match self.storage.get_site_area(tenant_id, site_area_id).await {
            Ok(Some(site_area)) if site_area.smart_charging => Some(site_area.id),
            Ok(_) => None,
            Err(e) => {
                warn!("Tenant {}: cannot read site area {}: {}", tenant_id, site_area_id, e);
                None
            }
        }
    }

    /// Recompute the profiles of a site area now.
    ///
    /// Returns false when skipped, failed or timed out.
    pub async fn run(&self, tenant_id: &str, site_area_id: &str) -> bool {
        let Some(_guard) = self.locks.try_acquire(tenant_id, site_area_id) else {
            info!(
                "Smart charging of site area {} already running, trigger skipped",
                site_area_id
            );
            return false;
        };

        let computation = self
            .service
            .compute_and_apply_charging_profiles(tenant_id, site_area_id);
        match tokio::time::timeout(self.timeout, computation).await {
            Ok(Ok(())) => {
                debug!("Smart charging of site area {} applied", site_area_id);
                true
            }
            Ok(Err(e)) => {
                warn!("Smart charging of site area {} failed: {}", site_area_id, e);
                false
            }
            Err(_) => {
                warn!(
                    "Smart charging of site area {} timed out after {:?}",
                    site_area_id, self.timeout
                );
                false
            }
        }
    }

    /// Run detached after `delay`
    pub fn schedule(&self, tenant_id: &str, site_area_id: String, delay: Duration) -> JoinHandle<bool> {
        let trigger = self.clone();
        let tenant_id = tenant_id.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            trigger.run(&tenant_id, &site_area_id).await
        })
    }

    /// Drop the transaction-scoped profile of a finished session
    pub async fn clear_transaction_profile(&self, tenant_id: &str, transaction: &Transaction) {
        let clearing = self.service.clear_transaction_profile(tenant_id, transaction);
        match tokio::time::timeout(self.timeout, clearing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "Transaction {}: clearing charging profile failed: {}",
                transaction.id, e
            ),
            Err(_) => warn!(
                "Transaction {}: clearing charging profile timed out",
                transaction.id
            ),
        }
    }
}
