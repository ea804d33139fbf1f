//! In-memory document database driver for mongolayer.
//!
//! This crate implements the driver traits of `mongolayer-core` on top of a thread-safe,
//! in-memory map of BSON documents. It is meant for development and tests: every typed
//! collection behaviour, including transactions, timeouts and duplicate keys, can be
//! exercised without a running server.
//!
//! # Features
//!
//! - **Query documents** - Field filters with comparison, membership and logical operators
//! - **Updates** - `$set`, `$unset` and `$inc`, upserts and replacements
//! - **Unique indexes** - `_id` is always unique, more fields can be added
//! - **Aggregation** - `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count` stages
//! - **Sessions and transactions** - Staged writes published on commit, dropped on abort
//! - **Latency injection** - A fixed delay on every call, for timeout and slow-query tests
//!
//! # Quick Start
//!
//! ```ignore
//! use mongolayer::{memory::InMemoryStore, prelude::*};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Account {
//!     pub account_id: i32,
//!     pub limit: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryStore::builder().build().await?;
//!     let accounts = store.typed_collection::<Account>(
//!         "sample_analytics",
//!         "accounts",
//!         Arc::new(TracingObserver::default()),
//!     );
//!
//!     accounts.insert_one(&Account { account_id: 1, limit: 10000 }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolayer_memory;

pub mod collection;
pub mod error;
pub mod store;

mod evaluator;
mod modify;
mod pipeline;

pub use collection::{InMemoryCollection, InMemoryCursor};
pub use error::InMemoryError;
pub use store::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
