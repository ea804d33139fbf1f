//! In-memory connection, sessions and transactions.
//!
//! Documents live as BSON in a map of collections guarded by an async-aware read-write lock.
//! A transaction stages a private copy of every collection it writes to and publishes the
//! copies when it commits; an aborted transaction simply drops them. A commit fails with a
//! write conflict when a staged collection was written outside the transaction since it was
//! copied, and the transaction then runs again on fresh copies.

use std::{
    error::Error as StdError,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::future::BoxFuture;
use mea::rwlock::RwLock;

use mongolayer_core::{
    driver::{ConnectionBuilder, ConnectionManager, SessionManager, TransactionFailure},
    error::DbResult,
    options::{SessionOptions, TransactionOptions},
};

use crate::{
    collection::{InMemoryCollection, StoreMap},
    error::InMemoryError,
    evaluator::{Comparable, lookup},
};

/// Number of times a transaction runs before a write conflict is returned to the caller.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 3;

/// Thread-safe in-memory document database.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state. Clones share the
/// same data, the same session counter and the same settings.
///
/// # Example
///
/// ```ignore
/// use mongolayer_memory::InMemoryStore;
/// use mongolayer_core::driver::{ConnectionBuilder, ConnectionManager};
///
/// let store = InMemoryStore::builder()
///     .latency(Duration::from_millis(5))
///     .build()
///     .await?;
///
/// store.create_unique_index("bank", "accounts", "account_id").await?;
/// let accounts = store.typed_collection::<Account>("bank", "accounts", observer);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    /// `database.collection` -> documents and unique indexes
    store: Arc<RwLock<StoreMap>>,
    active_sessions: Arc<AtomicUsize>,
    latency: Duration,
    sessions_supported: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty store with no latency and session support.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            latency: Duration::ZERO,
            sessions_supported: true,
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Number of sessions started and not yet ended.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Adds a unique index on `field`. `_id` is always unique.
    ///
    /// Fails with a duplicate key error when existing documents already collide.
    pub async fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<(), InMemoryError> {
        let namespace = format!("{database}.{collection}");
        let mut store = self.store.write().await;
        let data = store.entry(namespace.clone()).or_default();

        for (index, document) in data.documents.iter().enumerate() {
            let value = Comparable::from(lookup(document, field));
            let collides = data.documents[index + 1..]
                .iter()
                .any(|other| Comparable::from(lookup(other, field)) == value);

            if collides {
                return Err(InMemoryError::DuplicateKey {
                    namespace,
                    field: field.to_string(),
                    value: lookup(document, field).cloned().unwrap_or(Bson::Null),
                });
            }
        }

        if !data.unique_fields.iter().any(|existing| existing == field) {
            data.unique_fields.push(field.to_string());
            data.version += 1;
        }

        Ok(())
    }

    /// Snapshot of the committed documents of a collection, in insertion order.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(&format!("{database}.{collection}"))
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    /// Removes every collection.
    pub async fn clear(&self) {
        self.store.write().await.clear();
    }

    async fn commit(&self, staged: StoreMap) -> Result<(), InMemoryError> {
        let mut store = self.store.write().await;

        let conflict = staged
            .iter()
            .find(|(namespace, data)| {
                store.get(namespace.as_str()).map_or(0, |live| live.version) != data.version
            })
            .map(|(namespace, _)| namespace.clone());
        if let Some(namespace) = conflict {
            return Err(InMemoryError::WriteConflict { namespace });
        }

        for (namespace, mut data) in staged {
            data.version += 1;
            store.insert(namespace, data);
        }

        Ok(())
    }
}

impl ConnectionManager for InMemoryStore {
    type Handle = InMemoryCollection;

    fn collection_handle(&self, database: &str, collection: &str) -> InMemoryCollection {
        InMemoryCollection::new(database, collection, self.store.clone(), self.latency)
    }
}

/// A session of an [`InMemoryStore`]. The session ends when dropped.
#[derive(Debug)]
pub struct InMemorySession {
    options: SessionOptions,
    staged: Option<StoreMap>,
    active_sessions: Arc<AtomicUsize>,
}

impl InMemorySession {
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    pub(crate) fn staged_mut(&mut self) -> Option<&mut StoreMap> {
        self.staged.as_mut()
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionManager for InMemoryStore {
    type Session = InMemorySession;
    type Error = InMemoryError;

    async fn start_session(&self, options: SessionOptions) -> Result<InMemorySession, InMemoryError> {
        if !self.sessions_supported {
            return Err(InMemoryError::SessionsNotSupported);
        }

        self.active_sessions.fetch_add(1, Ordering::SeqCst);

        Ok(InMemorySession {
            options,
            staged: None,
            active_sessions: self.active_sessions.clone(),
        })
    }

    /// Runs `work` against staged copies of the collections it touches and commits them.
    ///
    /// A commit that hits a write conflict discards the copies and runs `work` again, at most
    /// [`MAX_TRANSACTION_ATTEMPTS`] times in total.
    async fn with_transaction<R, E, F>(
        &self,
        session: &mut InMemorySession,
        _options: TransactionOptions,
        mut work: F,
    ) -> Result<R, TransactionFailure<E, InMemoryError>>
    where
        R: Send,
        E: StdError + Send + 'static,
        F: for<'s> FnMut(&'s mut InMemorySession) -> BoxFuture<'s, Result<R, E>> + Send,
    {
        if session.in_transaction() {
            return Err(TransactionFailure::Driver(InMemoryError::TransactionInProgress));
        }

        let mut attempt = 1;
        loop {
            session.staged = Some(StoreMap::new());
            let outcome = work(&mut *session).await;
            let staged = session.staged.take().unwrap_or_default();

            let value = match outcome {
                Ok(value) => value,
                Err(err) => return Err(TransactionFailure::Work(err)),
            };

            match self.commit(staged).await {
                Ok(()) => return Ok(value),
                Err(InMemoryError::WriteConflict { .. }) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    attempt += 1;
                },
                Err(err) => return Err(TransactionFailure::Driver(err)),
            }
        }
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Debug, Clone)]
pub struct InMemoryStoreBuilder {
    latency: Duration,
    sessions_supported: bool,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            sessions_supported: true,
        }
    }
}

impl InMemoryStoreBuilder {
    /// Delays every collection call by `latency`.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every session start fail, like a standalone server.
    pub fn without_sessions(mut self) -> Self {
        self.sessions_supported = false;
        self
    }
}

#[async_trait]
impl ConnectionBuilder for InMemoryStoreBuilder {
    type Connection = InMemoryStore;

    async fn build(self) -> DbResult<InMemoryStore> {
        Ok(InMemoryStore {
            latency: self.latency,
            sessions_supported: self.sessions_supported,
            ..InMemoryStore::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::FutureExt;
    use mongolayer_core::{driver::CollectionHandle, options::UpdateOptions};

    #[tokio::test]
    async fn test_sessions_are_counted_until_dropped() {
        let store = InMemoryStore::new();

        let first = store.start_session(SessionOptions::default()).await.unwrap();
        let second = store.start_session(SessionOptions::default()).await.unwrap();
        assert_eq!(store.active_sessions(), 2);

        drop(first);
        drop(second);
        assert_eq!(store.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_sessions_not_supported() {
        let store = InMemoryStore::builder().without_sessions().build().await.unwrap();

        let err = store.start_session(SessionOptions::default()).await.unwrap_err();

        assert!(matches!(err, InMemoryError::SessionsNotSupported));
        assert_eq!(store.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = InMemoryStore::new();
        let accounts = store.collection_handle("bank", "accounts");
        let mut session = store.start_session(SessionOptions::default()).await.unwrap();

        let outcome = store
            .with_transaction(&mut session, TransactionOptions::default(), |session| {
                let accounts = accounts.clone();
                async move {
                    accounts.insert_one(doc! { "_id": 1 }, Some(&mut *session)).await?;

                    let visible = accounts
                        .count_documents(doc! {}, Default::default(), None)
                        .await?;
                    assert_eq!(visible, 0);

                    Ok::<_, InMemoryError>(())
                }
                .boxed()
            })
            .await;

        assert!(outcome.is_ok());
        assert!(!session.in_transaction());
        assert_eq!(store.documents("bank", "accounts").await, vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn test_failed_work_discards_staged_writes() {
        let store = InMemoryStore::new();
        let accounts = store.collection_handle("bank", "accounts");
        accounts.insert_one(doc! { "_id": 1, "limit": 10 }, None).await.unwrap();
        let mut session = store.start_session(SessionOptions::default()).await.unwrap();

        let outcome = store
            .with_transaction(&mut session, TransactionOptions::default(), |session| {
                let accounts = accounts.clone();
                async move {
                    accounts
                        .update_one(
                            doc! { "_id": 1 },
                            doc! { "$set": { "limit": 20 } },
                            UpdateOptions::default(),
                            Some(&mut *session),
                        )
                        .await?;

                    Err::<(), _>(InMemoryError::InvalidArgument("stop".to_string()))
                }
                .boxed()
            })
            .await;

        assert!(matches!(outcome, Err(TransactionFailure::Work(_))));
        assert_eq!(store.documents("bank", "accounts").await, vec![doc! { "_id": 1, "limit": 10 }]);
    }

    #[tokio::test]
    async fn test_write_outside_transaction_forces_retry() {
        let store = InMemoryStore::new();
        let accounts = store.collection_handle("bank", "accounts");
        accounts.insert_one(doc! { "_id": 1, "limit": 10 }, None).await.unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut session = store.start_session(SessionOptions::default()).await.unwrap();

        let outcome = store
            .with_transaction(&mut session, TransactionOptions::default(), |session| {
                let accounts = accounts.clone();
                let attempts = attempts.clone();
                async move {
                    accounts
                        .update_one(
                            doc! { "_id": 1 },
                            doc! { "$inc": { "limit": 5 } },
                            UpdateOptions::default(),
                            Some(&mut *session),
                        )
                        .await?;

                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        accounts.insert_one(doc! { "_id": 2, "limit": 0 }, None).await?;
                    }

                    Ok::<_, InMemoryError>(())
                }
                .boxed()
            })
            .await;

        assert!(outcome.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            store.documents("bank", "accounts").await,
            vec![doc! { "_id": 1, "limit": 15 }, doc! { "_id": 2, "limit": 0 }]
        );
    }

    #[tokio::test]
    async fn test_persistent_write_conflict_is_returned() {
        let store = InMemoryStore::new();
        let accounts = store.collection_handle("bank", "accounts");
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut session = store.start_session(SessionOptions::default()).await.unwrap();

        let outcome = store
            .with_transaction(&mut session, TransactionOptions::default(), |session| {
                let accounts = accounts.clone();
                let attempts = attempts.clone();
                async move {
                    let id = attempts.fetch_add(1, Ordering::SeqCst) as i64;
                    accounts.insert_one(doc! { "_id": (-1 - id) }, Some(&mut *session)).await?;
                    accounts.insert_one(doc! { "_id": id }, None).await?;

                    Ok::<_, InMemoryError>(())
                }
                .boxed()
            })
            .await;

        assert!(matches!(
            outcome,
            Err(TransactionFailure::Driver(InMemoryError::WriteConflict { .. }))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_TRANSACTION_ATTEMPTS);
        assert_eq!(store.documents("bank", "accounts").await.len(), MAX_TRANSACTION_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_create_unique_index_rejects_existing_duplicates() {
        let store = InMemoryStore::new();
        let accounts = store.collection_handle("bank", "accounts");
        accounts.insert_one(doc! { "_id": 1, "account_id": 7 }, None).await.unwrap();
        accounts.insert_one(doc! { "_id": 2, "account_id": 7 }, None).await.unwrap();

        let err = store.create_unique_index("bank", "accounts", "account_id").await.unwrap_err();

        assert!(matches!(err, InMemoryError::DuplicateKey { .. }));
    }
}
