//! External collaborators
//!
//! - [`PricingService`] / [`BillingService`]: per transaction phase
//! - [`SmartChargingService`]: site area profile computation
//! - [`NotificationService`]: fire-and-forget user/operator notifications
//! - [`RoamingService`]: sessions of users issued by other operators
//! - [`StationClient`]: requests the central system sends to a station
//!
//! [`Collaborators::noop`] wires do-nothing implementations of all of them.

use std::sync::Arc;

use async_trait::async_trait;
use csms_core::{ChargingStation, Connector, Consumption, Transaction};

use crate::error::CollaboratorError;

/// Moment of the transaction a pricing or billing call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Start,
    Update,
    Stop,
}

/// Price of one consumption
#[derive(Debug, Clone, PartialEq)]
pub struct PricedConsumption {
    pub amount: f64,
    pub cumulated_amount: f64,
    pub currency: String,
}

#[async_trait]
pub trait PricingService: Send + Sync {
    async fn price_transaction(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
        consumption: &Consumption,
        phase: TransactionPhase,
    ) -> Result<Option<PricedConsumption>, CollaboratorError>;
}

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Returns the billing reference once the bill is final
    async fn bill_transaction(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
        phase: TransactionPhase,
    ) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait]
pub trait SmartChargingService: Send + Sync {
    async fn compute_and_apply_charging_profiles(
        &self,
        tenant_id: &str,
        site_area_id: &str,
    ) -> Result<(), CollaboratorError>;

    /// Drop the profile scoped to a finished transaction
    async fn clear_transaction_profile(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn station_registered(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
    ) -> Result<(), CollaboratorError>;

    async fn session_started(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError>;

    async fn session_ended(
        &self,
        tenant_id: &str,
        transaction: &Transaction,
    ) -> Result<(), CollaboratorError>;

    async fn status_error(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
        connector: &Connector,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait RoamingService: Send + Sync {
    /// Ask the issuing operator whether a foreign tag may charge
    async fn authorize(
        &self,
        tenant_id: &str,
        station: &ChargingStation,
        tag_id: &str,
    ) -> Result<bool, CollaboratorError>;

    async fn start_session(&self, tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError>;

    async fn update_session(&self, tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError>;

    async fn stop_session(&self, tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError>;

    async fn post_cdr(&self, tenant_id: &str, transaction: &Transaction)
        -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait StationClient: Send + Sync {
    /// Pull the OCPP configuration keys of a station
    async fn request_configuration(
        &self,
        tenant_id: &str,
        station_id: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Does nothing, successfully
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

#[async_trait]
impl PricingService for Noop {
    async fn price_transaction(
        &self,
        _tenant_id: &str,
        _transaction: &Transaction,
        _consumption: &Consumption,
        _phase: TransactionPhase,
    ) -> Result<Option<PricedConsumption>, CollaboratorError> {
        Ok(None)
    }
}

#[async_trait]
impl BillingService for Noop {
    async fn bill_transaction(
        &self,
        _tenant_id: &str,
        _transaction: &Transaction,
        _phase: TransactionPhase,
    ) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

#[async_trait]
impl SmartChargingService for Noop {
    async fn compute_and_apply_charging_profiles(
        &self,
        _tenant_id: &str,
        _site_area_id: &str,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn clear_transaction_profile(
        &self,
        _tenant_id: &str,
        _transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl NotificationService for Noop {
    async fn station_registered(
        &self,
        _tenant_id: &str,
        _station: &ChargingStation,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn session_started(
        &self,
        _tenant_id: &str,
        _transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn session_ended(
        &self,
        _tenant_id: &str,
        _transaction: &Transaction,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn status_error(
        &self,
        _tenant_id: &str,
        _station: &ChargingStation,
        _connector: &Connector,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl RoamingService for Noop {
    async fn authorize(
        &self,
        _tenant_id: &str,
        _station: &ChargingStation,
        _tag_id: &str,
    ) -> Result<bool, CollaboratorError> {
        Ok(false)
    }

    async fn start_session(&self, _tenant_id: &str, _transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn update_session(&self, _tenant_id: &str, _transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn stop_session(&self, _tenant_id: &str, _transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn post_cdr(&self, _tenant_id: &str, _transaction: &Transaction)
        -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[async_trait]
impl StationClient for Noop {
    async fn request_configuration(
        &self,
        _tenant_id: &str,
        _station_id: &str,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Every collaborator the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub pricing: Arc<dyn PricingService>,
    pub billing: Arc<dyn BillingService>,
    pub smart_charging: Arc<dyn SmartChargingService>,
    pub notification: Arc<dyn NotificationService>,
    pub roaming: Arc<dyn RoamingService>,
    pub station_client: Arc<dyn StationClient>,
}

impl Collaborators {
    pub fn noop() -> Self {
        let noop = Arc::new(Noop);
        Self {
            pricing: noop.clone(),
            billing: noop.clone(),
            smart_charging: noop.clone(),
            notification: noop.clone(),
            roaming: noop.clone(),
            station_client: noop,
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingService>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_billing(mut self, billing: Arc<dyn BillingService>) -> Self {
        self.billing = billing;
        self
    }

    pub fn with_smart_charging(mut self, smart_charging: Arc<dyn SmartChargingService>) -> Self {
        self.smart_charging = smart_charging;
        self
    }

    pub fn with_notification(mut self, notification: Arc<dyn NotificationService>) -> Self {
        self.notification = notification;
        self
    }

    pub fn with_roaming(mut self, roaming: Arc<dyn RoamingService>) -> Self {
        self.roaming = roaming;
        self
    }

    pub fn with_station_client(mut self, station_client: Arc<dyn StationClient>) -> Self {
        self.station_client = station_client;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
