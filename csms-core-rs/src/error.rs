//! Errors raised by the domain layer

use thiserror::Error;

use crate::types::TransactionId;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Transaction {0} has already been stopped")]
    TransactionAlreadyStopped(TransactionId),
}
