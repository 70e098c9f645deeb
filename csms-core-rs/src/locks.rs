//! Named locks
//!
//! - [`SiteAreaLocks`]: try-only exclusive locks keyed by `(tenant, site area)`,
//!   taken around a smart charging computation. A held lock makes the caller
//!   skip, never wait.
//! - [`StationLocks`]: one async mutex per `(tenant, charging station)`,
//!   serializing the handling of a station's messages.
//!
//! Both release on drop, whatever the outcome of the guarded work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

fn lock_name(tenant_id: &str, id: &str) -> String {
    format!("{}:{}", tenant_id, id)
}

/// Exclusive locks for smart charging per site area
#[derive(Debug, Clone, Default)]
pub struct SiteAreaLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Holds a site area lock until dropped
#[derive(Debug)]
pub struct SiteAreaLockGuard {
    name: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl SiteAreaLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, or `None` when someone else holds it
    pub fn try_acquire(&self, tenant_id: &str, site_area_id: &str) -> Option<SiteAreaLockGuard> {
        let name = lock_name(tenant_id, site_area_id);
        let mut held = self.held.lock();
        if !held.insert(name.clone()) {
            debug!("Site area lock {} already held", name);
            return None;
        }
        debug!("Site area lock {} acquired", name);
        Some(SiteAreaLockGuard {
            name,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, tenant_id: &str, site_area_id: &str) -> bool {
        self.held.lock().contains(&lock_name(tenant_id, site_area_id))
    }
}

impl Drop for SiteAreaLockGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.name);
        debug!("Site area lock {} released", self.name);
    }
}

/// Per-station mutexes
#[derive(Debug, Clone, Default)]
pub struct StationLocks {
    stations: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl StationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the station's turn
    pub async fn lock(&self, tenant_id: &str, station_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut stations = self.stations.lock();
            stations
                .entry(lock_name(tenant_id, station_id))
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}
