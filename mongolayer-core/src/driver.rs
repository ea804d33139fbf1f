//! The narrow driver surface this crate is written against.
//!
//! This module defines the traits a database driver adapter implements. The core never
//! talks to a concrete driver; it calls these traits and treats their errors as opaque
//! causes for the classifier.
//!
//! # Traits
//!
//! - [`CollectionHandle`]: one async method per driver capability on a single collection
//! - [`DocumentCursor`]: raw documents of a multi-document read
//! - [`ConnectionManager`]: resolves collection handles from an already connected client
//! - [`SessionManager`]: starts sessions and runs transactions
//! - [`ConnectionBuilder`]: factory for connection managers
//!
//! Every method that may run inside a transaction takes `session: Option<&mut Self::Session>`.
//! `None` means the call runs outside any session.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::BoxFuture;
use std::{error::Error as StdError, fmt::Debug, sync::Arc};

use crate::{
    collection::TypedCollection,
    error::{DbResult, DriverCause},
    model::Model,
    observer::QueryObserver,
    options::{
        BulkWriteOptions, CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions,
        FindOneOptions, FindOptions, InsertManyOptions, SessionOptions, TransactionOptions,
        UpdateOptions, WriteModel,
    },
    outcome::{BulkWriteResult, DeleteResult, UpdateResult},
};

/// Raw documents produced by a find or an aggregation.
///
/// The cursor owns a server-side resource. [`close`](DocumentCursor::close) releases it;
/// dropping the cursor must release it as well.
#[async_trait]
pub trait DocumentCursor: Send {
    type Error: DriverCause;

    /// Returns the next document, or `None` once the cursor is exhausted.
    async fn next_document(&mut self) -> Option<Result<Document, Self::Error>>;

    /// Releases the cursor.
    async fn close(self)
    where
        Self: Sized;
}

/// A handle to one collection of one database.
///
/// Handles are borrowed from the connection layer and are cheap to clone. Implementations
/// must be safe for concurrent use; the core holds no lock around them.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    type Error: DriverCause;
    type Session: Send;
    type Cursor: DocumentCursor<Error = Self::Error>;

    /// Returns the collection name.
    fn name(&self) -> &str;

    async fn find_one(
        &self,
        filter: Document,
        options: FindOneOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>, Self::Error>;

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Self::Cursor, Self::Error>;

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>, Self::Error>;

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>, Self::Error>;

    async fn find_one_and_delete(
        &self,
        filter: Document,
        options: FindOneAndDeleteOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Option<Document>, Self::Error>;

    /// Inserts a document and returns its `_id`.
    async fn insert_one(
        &self,
        document: Document,
        session: Option<&mut Self::Session>,
    ) -> Result<Bson, Self::Error>;

    /// Inserts documents and returns their `_id`s in input order.
    async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: InsertManyOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<Vec<Bson>, Self::Error>;

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<UpdateResult, Self::Error>;

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<UpdateResult, Self::Error>;

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: UpdateOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<UpdateResult, Self::Error>;

    async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut Self::Session>,
    ) -> Result<DeleteResult, Self::Error>;

    async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut Self::Session>,
    ) -> Result<DeleteResult, Self::Error>;

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<u64, Self::Error>;

    /// Returns the count from collection metadata. Never part of a transaction.
    async fn estimated_document_count(&self) -> Result<u64, Self::Error>;

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: BulkWriteOptions,
        session: Option<&mut Self::Session>,
    ) -> Result<BulkWriteResult, Self::Error>;

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&mut Self::Session>,
    ) -> Result<Self::Cursor, Self::Error>;
}

/// Supplies collection handles from a live, already authenticated client.
///
/// The manager owns the connection lifecycle. Typed collections only reference the
/// handles it hands out and never close them.
pub trait ConnectionManager: Send + Sync {
    type Handle: CollectionHandle;

    /// Resolves a handle for `collection` in `database`.
    fn collection_handle(&self, database: &str, collection: &str) -> Self::Handle;

    /// Builds a typed collection over a resolved handle.
    fn typed_collection<T: Model>(
        &self,
        database: &str,
        collection: &str,
        observer: Arc<dyn QueryObserver>,
    ) -> TypedCollection<T, Self::Handle>
    where
        Self: Sized,
    {
        TypedCollection::new(self.collection_handle(database, collection), observer)
    }
}

/// Why a transaction did not produce a value.
#[derive(Debug)]
pub enum TransactionFailure<E, D> {
    /// The unit of work returned an error; the transaction was aborted.
    Work(E),
    /// The driver failed to start, commit or abort the transaction.
    Driver(D),
}

/// Session and transaction primitives of a driver.
///
/// A session ends when it is dropped. Retrying on transient errors and the commit/abort
/// protocol belong to [`with_transaction`](SessionManager::with_transaction).
#[async_trait]
pub trait SessionManager: Send + Sync {
    type Session: Send;
    type Error: DriverCause;

    async fn start_session(&self, options: SessionOptions) -> Result<Self::Session, Self::Error>;

    /// Runs `work` inside a transaction on `session`, committing on success and aborting
    /// when `work` fails. `work` may be invoked more than once if the driver retries.
    ///
    /// A failure of `work` may wrap a driver error; drivers walk its source chain to decide
    /// whether the attempt is worth retrying.
    async fn with_transaction<R, E, F>(
        &self,
        session: &mut Self::Session,
        options: TransactionOptions,
        work: F,
    ) -> Result<R, TransactionFailure<E, Self::Error>>
    where
        R: Send,
        E: StdError + Send + 'static,
        F: for<'s> FnMut(&'s mut Self::Session) -> BoxFuture<'s, Result<R, E>> + Send;
}

/// Factory for connection managers.
#[async_trait]
pub trait ConnectionBuilder {
    type Connection: ConnectionManager;

    async fn build(self) -> DbResult<Self::Connection>;
}
