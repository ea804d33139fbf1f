//! Convenient re-exports of commonly used types from mongolayer.
//!
//! ```ignore
//! use mongolayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Typed collections and the model traits
//! - Driver traits and builders
//! - Error types, kinds and predicates
//! - Options and write outcomes
//! - Observers and the transaction runner

pub use bson::{Bson, Document as BsonDocument, doc};

pub use mongolayer_core::{
    collection::TypedCollection,
    context::QueryContext,
    driver::{CollectionHandle, ConnectionBuilder, ConnectionManager, DocumentCursor, SessionManager},
    error::{
        DbError, DbResult, DriverCause, ErrorKind, is_client_error, is_decode_error,
        is_duplicated_key, is_internal, is_not_found, is_not_modified, is_timeout,
    },
    model::{Model, ModelExt},
    observer::{ObserverConfig, Operation, OperationClass, QueryObserver, TracingObserver},
    options::{
        BulkWriteOptions, CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions,
        FindOneOptions, FindOptions, InsertManyOptions, ReturnDocument, SessionOptions,
        TransactionOptions, UpdateOptions, WriteModel,
    },
    outcome::{BulkWriteResult, DeleteResult, PartialResult, UpdateResult},
    transaction::run_in_transaction,
};
