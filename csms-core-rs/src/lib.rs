//! CSMS Core Library
//!
//! Domain model of the OCPP session engine: charging stations and their
//! connector state machine, transactions, meter value normalization and
//! consumption building. Pure code, no I/O.

pub mod types;
pub mod error;
pub mod readings;
pub mod station;
pub mod transaction;
pub mod meter;
pub mod consumption;
pub mod locks;

pub use types::*;
pub use error::CoreError;
pub use readings::{InstantReadings, PhaseValues};
pub use station::{ChargingStation, Connector, StatusTransition, StatusUpdate};
pub use transaction::{LastConsumption, RemoteStop, Transaction, TransactionStop};
pub use meter::{
    MeterValueAttribute, MeterValueNormalizer, NormalizedMeterValue, OneOrMany, RawAttributes,
    RawMeterValue15, RawMeterValue16, RawMeterValues, RawSampledValue, RawValue15, SampleValue,
};
pub use consumption::{Consumption, ConsumptionBuilder, ConsumptionSettings};
pub use locks::{SiteAreaLockGuard, SiteAreaLocks, StationLocks};
