//! A typed, safe-by-default data-access layer over a document database driver.
//!
//! This crate is the core of the mongolayer project and provides:
//!
//! - **Error taxonomy** ([`error`]) - A closed set of error kinds, the driver error classifier and kind predicates
//! - **Result decoding** ([`decode`]) - Turning raw driver results into typed values
//! - **Typed collections** ([`collection`]) - Generic collection operations with a deadline and write policy
//! - **Transactions** ([`transaction`]) - Running a unit of work atomically on a session
//! - **Observability** ([`observer`]) - Slow-operation reporting and timeout budgets
//! - **Driver surface** ([`driver`]) - The traits a driver adapter implements
//! - **Options and outcomes** ([`options`], [`outcome`]) - Per-call options and write results
//!
//! # Example
//!
//! ```ignore
//! use mongolayer::prelude::*;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Account {
//!     pub account_id: i32,
//!     pub limit: i32,
//! }
//!
//! let accounts = connection.typed_collection::<Account>(
//!     "sample_analytics",
//!     "accounts",
//!     Arc::new(TracingObserver::default()),
//! );
//!
//! match accounts.find_one(doc! { "account_id": 1 }, None).await {
//!     Err(err) if err.is_not_found() => { /* ... */ }
//!     other => { /* ... */ }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolayer_core;

pub mod collection;
pub mod context;
pub mod decode;
pub mod driver;
pub mod error;
pub mod model;
pub mod observer;
pub mod options;
pub mod outcome;
pub mod transaction;
