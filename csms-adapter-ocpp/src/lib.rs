//! # CSMS OCPP Adapter
//!
//! Session and transaction engine of a charging station management system,
//! speaking OCPP 1.5/1.6 (JSON) with the stations of many tenants.
//!
//! ## Architecture
//!
//! ```text
//! Charging Stations
//!       │ WebSocket OCPP-J  /{tenant}/{chargeBoxIdentity}
//!       ▼
//! ┌──────────────────────────────────────┐
//! │    csms-adapter-ocpp                 │
//! │  ┌───────────┐   ┌────────────────┐  │
//! │  │ OcppServer│──►│ OcppEngine     │  │
//! │  │ framing   │   │ handlers       │  │
//! │  └───────────┘   │ transactions   │  │
//! │                  │ smart charging │  │
//! │                  └───────┬────────┘  │
//! └──────────────────────────┼───────────┘
//!          ┌─────────────────┼──────────────────┐
//!          ▼                 ▼                  ▼
//!     csms-core-rs        Storage         Collaborators
//!   (state machine,   (stations, txs,   (pricing, billing,
//!    meter values,     consumptions)     roaming, ...)
//!    consumptions)
//! ```
//!
//! ## Handled actions
//!
//! | Action | Effect |
//! |--------|--------|
//! | BootNotification | register or refresh a station |
//! | Heartbeat | liveness |
//! | StatusNotification | connector state machine, extra inactivity |
//! | Authorize | tag check |
//! | StartTransaction | open a transaction |
//! | MeterValues | consumptions of the running transaction |
//! | StopTransaction | close, price, bill |
//! | Firmware/DiagnosticsStatusNotification | station fields |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use csms_adapter_ocpp::{Collaborators, EngineConfig, MemoryStorage, OcppEngine, OcppServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = OcppEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(MemoryStorage::new()),
//!         Collaborators::noop(),
//!     );
//!     OcppServer::new(engine, ServerConfig::default()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ocpp;
pub mod services;
pub mod engine;

pub use config::{EngineConfig, ServerConfig};
pub use error::{CollaboratorError, EngineError, StorageError};
pub use engine::{
    OcppEngine, OcppHeaders, SmartChargingTrigger, StopEvent, TagAuthorization, TransactionManager,
};
pub use ocpp::{Action, OcppServer};
pub use services::{
    Collaborators, MemoryStorage, Storage, Tag, TenantComponents, TransactionPhase, User,
};
