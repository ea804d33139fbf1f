//! Errors raised by the in-memory driver.

use bson::Bson;
use thiserror::Error;

use mongolayer_core::error::DriverCause;

#[derive(Error, Debug)]
pub enum InMemoryError {
    #[error("E11000 duplicate key error collection: {namespace} index: {field}_1 dup key: {{ {field}: {value} }}")]
    DuplicateKey {
        namespace: String,
        field: String,
        value: Bson,
    },
    #[error("unknown operator: {0}")]
    UnsupportedOperator(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("this deployment does not support sessions")]
    SessionsNotSupported,
    #[error("transaction already in progress on this session")]
    TransactionInProgress,
    #[error("write conflict on {namespace}: the collection changed outside the transaction")]
    WriteConflict { namespace: String },
}

impl DriverCause for InMemoryError {
    fn is_duplicate_key(&self) -> bool {
        matches!(self, InMemoryError::DuplicateKey { .. })
    }

    fn is_client_error(&self) -> bool {
        matches!(self, InMemoryError::SessionsNotSupported | InMemoryError::TransactionInProgress)
    }
}
