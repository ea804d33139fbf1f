//! MongoDB driver adapter for mongolayer.
//!
//! This crate implements the driver traits of `mongolayer-core` on the official MongoDB
//! async driver, so typed collections and transactions run against a real deployment.
//!
//! To use this adapter, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! mongolayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Options mapping** - Driver-neutral options become native driver options
//! - **Error hints** - Duplicate keys, server and network timeouts and client failures are recognised
//! - **Transactions** - Run through the driver's retrying transaction runner
//! - **Bulk writes** - Sent as one client-level bulk write
//!
//! Transactions need a replica set or sharded cluster; client-level bulk writes need
//! MongoDB 8.0 or newer.
//!
//! # Example
//!
//! ```ignore
//! use mongolayer::{mongodb::MongoConnection, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = MongoConnection::builder("mongodb://localhost:27017")
//!         .app_name("billing")
//!         .build()
//!         .await?;
//!
//!     let accounts = connection.typed_collection::<Account>(
//!         "sample_analytics",
//!         "accounts",
//!         Arc::new(TracingObserver::default()),
//!     );
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as mongolayer_mongodb;

pub mod collection;
pub mod connection;
pub mod error;

mod convert;

pub use collection::{MongoCollection, MongoCursor};
pub use connection::{MongoConnection, MongoConnectionBuilder};
pub use error::MongoError;
