//! Contracts the engine depends on, and their in-process implementations
//!
//! - `storage`: persistence of stations, transactions and consumptions
//! - `models`: tenant records looked up during authorization and boot
//! - `collaborators`: pricing, billing, smart charging, notifications, roaming
//! - `memory`: in-memory storage

pub mod models;
pub mod storage;
pub mod collaborators;
pub mod memory;

pub use models::*;
pub use storage::Storage;
pub use collaborators::*;
pub use memory::MemoryStorage;
