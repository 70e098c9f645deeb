//! OCPP 1.5/1.6 protocol layer
//!
//! - `types`: action payloads
//! - `messages`: OCPP-J framing (CALL, CALLRESULT, CALLERROR)
//! - `server`: WebSocket endpoint for charging stations

pub mod types;
pub mod messages;
pub mod server;

pub use types::*;
pub use messages::*;
pub use server::{OcppServer, Route};
