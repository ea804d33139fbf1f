//! Main mongolayer crate: a typed, safe-by-default data-access layer over a document database.
//!
//! This crate is the primary entry point for users of the mongolayer framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! access to the available drivers.
//!
//! # Features
//!
//! - **Typed collections** - Define documents with Serde and get typed results back
//! - **Closed error taxonomy** - Branch on `NotFound`, `DuplicatedKey`, `Timeout`, ... instead of driver errors
//! - **Safe writes** - Updates and deletes that affect nothing are reported, not silently accepted
//! - **Transactions** - All-or-nothing units of work on a session
//! - **Deadlines and slow-query reporting** - Every call outside a transaction is bounded and timed
//!
//! # Quick Start
//!
//! ```ignore
//! use mongolayer::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Account {
//!     pub account_id: i32,
//!     pub limit: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = InMemoryStore::builder().build().await.unwrap();
//!     let accounts = store.typed_collection::<Account>(
//!         "sample_analytics",
//!         "accounts",
//!         Arc::new(TracingObserver::default()),
//!     );
//!
//!     accounts.insert_one(&Account { account_id: 1, limit: 10000 }).await.unwrap();
//!
//!     match accounts.find_one(doc! { "account_id": 2 }, None).await {
//!         Ok(account) => println!("found {account:?}"),
//!         Err(err) if err.is_not_found() => println!("no such account"),
//!         Err(err) => panic!("query failed: {err}"),
//!     }
//! }
//! ```
//!
//! # Transactions
//!
//! A unit of work receives the session and must use the `_with_session` form of every call.
//! Its error type must implement `std::error::Error` and be convertible from [`DbError`](error::DbError).
//!
//! ```ignore
//! use mongolayer::prelude::*;
//!
//! run_in_transaction(&store, None, None, |session| {
//!     let accounts = accounts.clone();
//!     Box::pin(async move {
//!         accounts
//!             .update_one_with_session(session, doc! { "account_id": 1 }, doc! { "$inc": { "limit": -100 } }, None)
//!             .await?;
//!         accounts
//!             .update_one_with_session(session, doc! { "account_id": 2 }, doc! { "$inc": { "limit": 100 } }, None)
//!             .await?;
//!         Ok::<_, DbError>(())
//!     })
//! })
//! .await?;
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development and testing
//! - [`mongodb`] - MongoDB driver adapter (requires `mongodb` feature)

pub mod prelude;

pub use mongolayer_core::{
    collection, context, decode, driver, error, model, observer, options, outcome, transaction,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory driver.
pub mod memory {
    pub use mongolayer_memory::{
        InMemoryCollection, InMemoryCursor, InMemoryError, InMemorySession, InMemoryStore,
        InMemoryStoreBuilder,
    };
}

/// MongoDB driver adapter.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use mongolayer_mongodb::{
        MongoCollection, MongoConnection, MongoConnectionBuilder, MongoCursor, MongoError,
    };
}
