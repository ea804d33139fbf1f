//! The typed collection: generic, safe-by-default operations over one collection.
//!
//! A [`TypedCollection`] is built once per (database, collection, element type) and reused for
//! the life of the process. It owns nothing but a reference-like driver handle and a shared
//! observer, so it is safe to use from many tasks at once.
//!
//! Every operation exists in two forms:
//!
//! - the plain form (`find_one`, `update_many`, ...) runs under a fresh deadline taken from
//!   [`QueryObserver::timeout_budget`] and cancelled when that deadline passes;
//! - the session form (`find_one_with_session`, ...) runs on a caller-supplied session and
//!   adds no deadline of its own, since the enclosing transaction governs cancellation.
//!
//! Inside a transaction only the session forms may be used.
//!
//! # Write policy
//!
//! Updates, replaces and deletes that report zero matched documents fail with `NotFound`;
//! updates and replaces that match but modify nothing fail with `NotModified`. In both cases
//! the driver's counts stay available through [`DbError::partial_result`]. Upserts that
//! inserted a document succeed. Inserts and bulk writes only fail when the driver fails.
//!
//! # Example
//!
//! ```ignore
//! use mongolayer::prelude::*;
//!
//! let accounts = connection.typed_collection::<Account>(
//!     "sample_analytics",
//!     "accounts",
//!     Arc::new(TracingObserver::default()),
//! );
//!
//! let account = accounts.find_one(doc! { "account_id": 1 }, None).await?;
//! ```

use bson::{Bson, Document};
use std::{fmt, future::Future, marker::PhantomData, sync::Arc};
use tokio::time::{Instant, timeout};

use crate::{
    context::QueryContext,
    decode::{decode_all, decode_one},
    driver::CollectionHandle,
    error::{DbError, DbResult, Sentinel, classify},
    model::{Model, ModelExt},
    observer::{Operation, QueryObserver},
    options::{
        BulkWriteOptions, CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions,
        FindOneOptions, FindOptions, InsertManyOptions, UpdateOptions, WriteModel,
    },
    outcome::{BulkWriteResult, DeleteResult, PartialResult, UpdateResult},
};

/// A collection whose documents decode to `T`.
///
/// # Type Parameters
///
/// * `T` - The element type every read decodes into
/// * `H` - The driver handle the collection calls
pub struct TypedCollection<T, H> {
    handle: H,
    observer: Arc<dyn QueryObserver>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H: Clone> Clone for TypedCollection<T, H> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            observer: self.observer.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, H: fmt::Debug> fmt::Debug for TypedCollection<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedCollection")
            .field("handle", &self.handle)
            .field("observer", &self.observer)
            .finish()
    }
}

impl<T: Model, H: CollectionHandle> TypedCollection<T, H> {
    pub fn new(handle: H, observer: Arc<dyn QueryObserver>) -> Self {
        Self { handle, observer, _marker: PhantomData }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Returns the underlying driver handle.
    pub fn handle(&self) -> &H {
        &self.handle
    }

    /// Views the same collection with a different element type.
    ///
    /// Useful for aggregations and projections whose output shape differs from `T`.
    pub fn with_type<U: Model>(&self) -> TypedCollection<U, H>
    where
        H: Clone,
    {
        TypedCollection {
            handle: self.handle.clone(),
            observer: self.observer.clone(),
            _marker: PhantomData,
        }
    }

    fn context(&self) -> QueryContext {
        QueryContext::new(self.name())
    }

    /// Runs one driver call, bounded by the timeout budget unless it is session bound,
    /// and reports it to the observer when it was slow.
    async fn execute<R, F>(
        &self,
        operation: Operation,
        context: &QueryContext,
        bounded: bool,
        call: F,
    ) -> DbResult<R>
    where
        F: Future<Output = DbResult<R>>,
    {
        let started = Instant::now();

        let outcome = if bounded {
            match timeout(self.observer.timeout_budget(), call).await {
                Ok(outcome) => outcome,
                Err(elapsed) => Err(classify(elapsed, context.clone())),
            }
        } else {
            call.await
        };

        let elapsed = started.elapsed();
        if elapsed >= self.observer.slow_threshold(operation.class()) {
            self.observer.slow_operation(&format!(
                "{} {} slow query({:?}) detected. {}",
                self.name(),
                operation,
                elapsed,
                context,
            ));
        }

        outcome
    }

    /// Finds the first document matching `filter`.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches, `Decode` when the document does not fit `T`.
    pub async fn find_one(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> DbResult<T> {
        self.find_one_in(None, filter, options.into().unwrap_or_default()).await
    }

    pub async fn find_one_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> DbResult<T> {
        self.find_one_in(Some(session), filter, options.into().unwrap_or_default()).await
    }

    async fn find_one_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        options: FindOneOptions,
    ) -> DbResult<T> {
        let context = self.context().with_filter(filter.clone());
        let bounded = session.is_none();

        self.execute(Operation::FindOne, &context, bounded, async {
            let found = self.handle
                .find_one(filter, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_one(found, &context)
        })
        .await
    }

    /// Finds every document matching `filter`.
    ///
    /// An empty result is not an error. A document that fails to decode fails the whole call
    /// with `Decode`; nothing decoded before it is returned.
    pub async fn find_all(
        &self,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> DbResult<Vec<T>> {
        self.find_all_in(None, filter, options.into().unwrap_or_default()).await
    }

    pub async fn find_all_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> DbResult<Vec<T>> {
        self.find_all_in(Some(session), filter, options.into().unwrap_or_default()).await
    }

    async fn find_all_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        options: FindOptions,
    ) -> DbResult<Vec<T>> {
        let context = self.context().with_filter(filter.clone());
        let bounded = session.is_none();

        self.execute(Operation::FindAll, &context, bounded, async {
            let cursor = self.handle
                .find(filter, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_all(cursor, &context).await
        })
        .await
    }

    /// Applies `update` to the first matching document and returns it, as it was before
    /// or after the update depending on `options`.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_update_in(None, filter, update, options.into().unwrap_or_default())
            .await
    }

    pub async fn find_one_and_update_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        update: Document,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_update_in(Some(session), filter, update, options.into().unwrap_or_default())
            .await
    }

    async fn find_one_and_update_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        update: Document,
        options: FindOneAndModifyOptions,
    ) -> DbResult<T> {
        let context = self.context()
            .with_filter(filter.clone())
            .with_update(update.clone());
        let bounded = session.is_none();

        self.execute(Operation::FindOneAndUpdate, &context, bounded, async {
            let found = self.handle
                .find_one_and_update(filter, update, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_one(found, &context)
        })
        .await
    }

    /// Replaces the first matching document with `replacement` and returns it.
    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: &T,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_replace_in(None, filter, replacement, options.into().unwrap_or_default())
            .await
    }

    pub async fn find_one_and_replace_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        replacement: &T,
        options: impl Into<Option<FindOneAndModifyOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_replace_in(Some(session), filter, replacement, options.into().unwrap_or_default())
            .await
    }

    async fn find_one_and_replace_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        replacement: &T,
        options: FindOneAndModifyOptions,
    ) -> DbResult<T> {
        let context = self.context().with_filter(filter.clone());
        let replacement = replacement
            .to_document()
            .map_err(|err| DbError::internal(context.clone(), err))?;
        let context = context.with_update(replacement.clone());
        let bounded = session.is_none();

        self.execute(Operation::FindOneAndReplace, &context, bounded, async {
            let found = self.handle
                .find_one_and_replace(filter, replacement, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_one(found, &context)
        })
        .await
    }

    /// Deletes the first matching document and returns it.
    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneAndDeleteOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_delete_in(None, filter, options.into().unwrap_or_default()).await
    }

    pub async fn find_one_and_delete_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        options: impl Into<Option<FindOneAndDeleteOptions>>,
    ) -> DbResult<T> {
        self.find_one_and_delete_in(Some(session), filter, options.into().unwrap_or_default())
            .await
    }

    async fn find_one_and_delete_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        options: FindOneAndDeleteOptions,
    ) -> DbResult<T> {
        let context = self.context().with_filter(filter.clone());
        let bounded = session.is_none();

        self.execute(Operation::FindOneAndDelete, &context, bounded, async {
            let found = self.handle
                .find_one_and_delete(filter, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_one(found, &context)
        })
        .await
    }

    /// Inserts `document` and returns its `_id`.
    ///
    /// # Errors
    ///
    /// `DuplicatedKey` when a unique index rejects the document. A value that cannot be
    /// serialized fails with `Internal` before reaching the driver.
    pub async fn insert_one(&self, document: &T) -> DbResult<Bson> {
        self.insert_one_in(None, document).await
    }

    pub async fn insert_one_with_session(
        &self,
        session: &mut H::Session,
        document: &T,
    ) -> DbResult<Bson> {
        self.insert_one_in(Some(session), document).await
    }

    async fn insert_one_in(&self, session: Option<&mut H::Session>, document: &T) -> DbResult<Bson> {
        let context = self.context();
        let document = document
            .to_document()
            .map_err(|err| DbError::internal(context.clone(), err))?;
        let context = context.with_document(document.clone());
        let bounded = session.is_none();

        self.execute(Operation::InsertOne, &context, bounded, async {
            self.handle
                .insert_one(document, session)
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await
    }

    /// Inserts `documents` and returns their `_id`s in input order.
    pub async fn insert_many(
        &self,
        documents: &[T],
        options: impl Into<Option<InsertManyOptions>>,
    ) -> DbResult<Vec<Bson>> {
        self.insert_many_in(None, documents, options.into().unwrap_or_default()).await
    }

    pub async fn insert_many_with_session(
        &self,
        session: &mut H::Session,
        documents: &[T],
        options: impl Into<Option<InsertManyOptions>>,
    ) -> DbResult<Vec<Bson>> {
        self.insert_many_in(Some(session), documents, options.into().unwrap_or_default()).await
    }

    async fn insert_many_in(
        &self,
        session: Option<&mut H::Session>,
        documents: &[T],
        options: InsertManyOptions,
    ) -> DbResult<Vec<Bson>> {
        let context = self.context();
        let documents = documents
            .iter()
            .map(|document| document.to_document())
            .collect::<Result<Vec<Document>, _>>()
            .map_err(|err| DbError::internal(context.clone(), err))?;
        let context = context.with_document(
            documents
                .iter()
                .cloned()
                .map(Bson::Document)
                .collect::<Vec<_>>(),
        );
        let bounded = session.is_none();

        self.execute(Operation::InsertMany, &context, bounded, async {
            self.handle
                .insert_many(documents, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await
    }

    /// Applies `update` to the first matching document.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matched, `NotModified` when the document already held the
    /// updated values. Both carry the driver's counts.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.update_in(Operation::UpdateOne, None, filter, update, options.into().unwrap_or_default())
            .await
    }

    pub async fn update_one_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.update_in(Operation::UpdateOne, Some(session), filter, update, options.into().unwrap_or_default())
            .await
    }

    /// Applies `update` to every matching document. Same policy as [`update_one`](Self::update_one).
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.update_in(Operation::UpdateMany, None, filter, update, options.into().unwrap_or_default())
            .await
    }

    pub async fn update_many_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.update_in(Operation::UpdateMany, Some(session), filter, update, options.into().unwrap_or_default())
            .await
    }

    async fn update_in(
        &self,
        operation: Operation,
        session: Option<&mut H::Session>,
        filter: Document,
        update: Document,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        let context = self.context()
            .with_filter(filter.clone())
            .with_update(update.clone());
        let bounded = session.is_none();

        let result = self.execute(operation, &context, bounded, async {
            let outcome = match operation {
                Operation::UpdateMany => self.handle.update_many(filter, update, options, session).await,
                _ => self.handle.update_one(filter, update, options, session).await,
            };

            outcome.map_err(|err| classify(err, context.clone()))
        })
        .await?;

        check_update(result, context)
    }

    /// Replaces the first matching document with `replacement`. Same policy as
    /// [`update_one`](Self::update_one).
    pub async fn replace_one(
        &self,
        filter: Document,
        replacement: &T,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.replace_one_in(None, filter, replacement, options.into().unwrap_or_default()).await
    }

    pub async fn replace_one_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        replacement: &T,
        options: impl Into<Option<UpdateOptions>>,
    ) -> DbResult<UpdateResult> {
        self.replace_one_in(Some(session), filter, replacement, options.into().unwrap_or_default())
            .await
    }

    async fn replace_one_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        replacement: &T,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        let context = self.context().with_filter(filter.clone());
        let replacement = replacement
            .to_document()
            .map_err(|err| DbError::internal(context.clone(), err))?;
        let context = context.with_document(replacement.clone());
        let bounded = session.is_none();

        let result = self.execute(Operation::ReplaceOne, &context, bounded, async {
            self.handle
                .replace_one(filter, replacement, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await?;

        check_update(result, context)
    }

    /// Deletes the first matching document.
    ///
    /// # Errors
    ///
    /// `NotFound`, carrying the driver's counts, when nothing was deleted.
    pub async fn delete_one(&self, filter: Document) -> DbResult<DeleteResult> {
        self.delete_in(Operation::DeleteOne, None, filter).await
    }

    pub async fn delete_one_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
    ) -> DbResult<DeleteResult> {
        self.delete_in(Operation::DeleteOne, Some(session), filter).await
    }

    /// Deletes every matching document. Same policy as [`delete_one`](Self::delete_one).
    pub async fn delete_many(&self, filter: Document) -> DbResult<DeleteResult> {
        self.delete_in(Operation::DeleteMany, None, filter).await
    }

    pub async fn delete_many_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
    ) -> DbResult<DeleteResult> {
        self.delete_in(Operation::DeleteMany, Some(session), filter).await
    }

    async fn delete_in(
        &self,
        operation: Operation,
        session: Option<&mut H::Session>,
        filter: Document,
    ) -> DbResult<DeleteResult> {
        let context = self.context().with_filter(filter.clone());
        let bounded = session.is_none();

        let result = self.execute(operation, &context, bounded, async {
            let outcome = match operation {
                Operation::DeleteMany => self.handle.delete_many(filter, session).await,
                _ => self.handle.delete_one(filter, session).await,
            };

            outcome.map_err(|err| classify(err, context.clone()))
        })
        .await?;

        if result.deleted_count == 0 {
            return Err(classify(Sentinel::NotMatchedAny, context)
                .with_partial(PartialResult::Delete(result)));
        }

        Ok(result)
    }

    /// Counts the documents matching `filter`.
    pub async fn count_documents(
        &self,
        filter: Document,
        options: impl Into<Option<CountOptions>>,
    ) -> DbResult<u64> {
        self.count_documents_in(None, filter, options.into().unwrap_or_default()).await
    }

    pub async fn count_documents_with_session(
        &self,
        session: &mut H::Session,
        filter: Document,
        options: impl Into<Option<CountOptions>>,
    ) -> DbResult<u64> {
        self.count_documents_in(Some(session), filter, options.into().unwrap_or_default()).await
    }

    async fn count_documents_in(
        &self,
        session: Option<&mut H::Session>,
        filter: Document,
        options: CountOptions,
    ) -> DbResult<u64> {
        let context = self.context().with_filter(filter.clone());
        let bounded = session.is_none();

        self.execute(Operation::CountDocuments, &context, bounded, async {
            self.handle
                .count_documents(filter, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await
    }

    /// Returns the document count from collection metadata.
    pub async fn estimated_document_count(&self) -> DbResult<u64> {
        self.estimated_document_count_in(true).await
    }

    /// Estimated counts cannot join a transaction; this form only drops the deadline so the
    /// enclosing transaction governs cancellation.
    pub async fn estimated_document_count_with_session(
        &self,
        _session: &mut H::Session,
    ) -> DbResult<u64> {
        self.estimated_document_count_in(false).await
    }

    async fn estimated_document_count_in(&self, bounded: bool) -> DbResult<u64> {
        let context = self.context();

        self.execute(Operation::EstimatedDocumentCount, &context, bounded, async {
            self.handle
                .estimated_document_count()
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await
    }

    /// Sends `models` to the driver as one bulk write.
    pub async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> DbResult<BulkWriteResult> {
        self.bulk_write_in(None, models, options.into().unwrap_or_default()).await
    }

    pub async fn bulk_write_with_session(
        &self,
        session: &mut H::Session,
        models: Vec<WriteModel>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> DbResult<BulkWriteResult> {
        self.bulk_write_in(Some(session), models, options.into().unwrap_or_default()).await
    }

    async fn bulk_write_in(
        &self,
        session: Option<&mut H::Session>,
        models: Vec<WriteModel>,
        options: BulkWriteOptions,
    ) -> DbResult<BulkWriteResult> {
        let context = self.context().with_document(
            models
                .iter()
                .map(Bson::from)
                .collect::<Vec<_>>(),
        );
        let bounded = session.is_none();

        self.execute(Operation::BulkWrite, &context, bounded, async {
            self.handle
                .bulk_write(models, options, session)
                .await
                .map_err(|err| classify(err, context.clone()))
        })
        .await
    }

    /// Runs an aggregation pipeline and decodes every output document as `T`.
    ///
    /// Use [`with_type`](Self::with_type) when the output shape differs from `T`.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> DbResult<Vec<T>> {
        self.aggregate_in(None, pipeline).await
    }

    pub async fn aggregate_with_session(
        &self,
        session: &mut H::Session,
        pipeline: Vec<Document>,
    ) -> DbResult<Vec<T>> {
        self.aggregate_in(Some(session), pipeline).await
    }

    async fn aggregate_in(
        &self,
        session: Option<&mut H::Session>,
        pipeline: Vec<Document>,
    ) -> DbResult<Vec<T>> {
        let context = self.context().with_document(
            pipeline
                .iter()
                .cloned()
                .map(Bson::Document)
                .collect::<Vec<_>>(),
        );
        let bounded = session.is_none();

        self.execute(Operation::Aggregate, &context, bounded, async {
            let cursor = self.handle
                .aggregate(pipeline, session)
                .await
                .map_err(|err| classify(err, context.clone()))?;

            decode_all(cursor, &context).await
        })
        .await
    }
}

fn check_update(result: UpdateResult, context: QueryContext) -> DbResult<UpdateResult> {
    if result.upserted_id.is_some() {
        return Ok(result);
    }
    if result.matched_count == 0 {
        return Err(classify(Sentinel::NotMatchedAny, context)
            .with_partial(PartialResult::Update(result)));
    }
    if result.modified_count == 0 {
        return Err(classify(Sentinel::NotModifiedAny, context)
            .with_partial(PartialResult::Update(result)));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn context() -> QueryContext {
        QueryContext::new("accounts").with_filter(doc! { "id": 1 })
    }

    #[test]
    fn test_check_update_zero_matched_is_not_found() {
        let result = UpdateResult { matched_count: 0, modified_count: 0, upserted_id: None };

        let err = check_update(result.clone(), context()).unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.partial_result().and_then(PartialResult::as_update), Some(&result));
    }

    #[test]
    fn test_check_update_zero_modified_is_not_modified() {
        let result = UpdateResult { matched_count: 1, modified_count: 0, upserted_id: None };

        let err = check_update(result.clone(), context()).unwrap_err();

        assert!(err.is_not_modified());
        assert!(!err.is_not_found());
        assert_eq!(err.partial_result().and_then(PartialResult::as_update), Some(&result));
    }

    #[test]
    fn test_check_update_upsert_succeeds() {
        let result = UpdateResult {
            matched_count: 0,
            modified_count: 0,
            upserted_id: Some(Bson::Int32(7)),
        };

        assert_eq!(check_update(result.clone(), context()).unwrap(), result);
    }

    #[test]
    fn test_check_update_modified_succeeds() {
        let result = UpdateResult { matched_count: 2, modified_count: 1, upserted_id: None };

        assert_eq!(check_update(result.clone(), context()).unwrap(), result);
    }
}
