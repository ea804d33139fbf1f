//! Collection handle, cursor and per-collection data of the in-memory driver.

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    sync::Arc,
    time::Duration,
};
use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;

use mongolayer_core::{
    driver::{CollectionHandle, DocumentCursor},
    options::{
        BulkWriteOptions, CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions,
        FindOneOptions, FindOptions, InsertManyOptions, ReturnDocument, UpdateOptions, WriteModel,
    },
    outcome::{BulkWriteResult, DeleteResult, UpdateResult},
};

use crate::{
    error::InMemoryError,
    evaluator::{Comparable, DocumentEvaluator, compare_by_keys, lookup, sort_keys},
    modify::{apply_update, project, replace, upsert_seed},
    pipeline::run_pipeline,
    store::InMemorySession,
};

/// Every collection of every database, keyed by `database.collection`.
pub(crate) type StoreMap = HashMap<String, CollectionData>;

/// Documents of one collection, in insertion order, and its unique indexes.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionData {
    pub(crate) documents: Vec<Document>,
    pub(crate) unique_fields: Vec<String>,
    /// Bumped by every write published to the store. A staged copy keeps the version it was
    /// taken at, so a commit can tell whether the collection moved underneath it.
    pub(crate) version: u64,
}

#[derive(Debug, Clone, Copy)]
enum Modification<'a> {
    Update(&'a Document),
    Replace(&'a Document),
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

impl CollectionData {
    /// Fails when `candidate` collides with another document on `_id` or a unique field.
    pub(crate) fn check_unique(
        &self,
        namespace: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> Result<(), InMemoryError> {
        let fields = std::iter::once("_id").chain(self.unique_fields.iter().map(String::as_str));

        for field in fields {
            let value = Comparable::from(lookup(candidate, field));
            let collides = self.documents
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, existing)| Comparable::from(lookup(existing, field)) == value);

            if collides {
                return Err(InMemoryError::DuplicateKey {
                    namespace: namespace.to_string(),
                    field: field.to_string(),
                    value: lookup(candidate, field).cloned().unwrap_or(Bson::Null),
                });
            }
        }

        Ok(())
    }

    fn matching(&self, filter: &Document, sort: Option<&Document>) -> Result<Vec<usize>, InMemoryError> {
        let evaluator = DocumentEvaluator::new(filter);
        let mut indices = Vec::new();

        for (index, document) in self.documents.iter().enumerate() {
            if evaluator.evaluate(document)? {
                indices.push(index);
            }
        }

        if let Some(sort) = sort {
            let keys = sort_keys(sort)?;
            indices.sort_by(|a, b| compare_by_keys(&self.documents[*a], &self.documents[*b], &keys));
        }

        Ok(indices)
    }

    pub(crate) fn find(
        &self,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, InMemoryError> {
        let limit = options.limit
            .filter(|limit| *limit > 0)
            .map_or(usize::MAX, to_usize);

        self.matching(filter, options.sort.as_ref())?
            .into_iter()
            .skip(to_usize(options.skip.unwrap_or(0)))
            .take(limit)
            .map(|index| {
                let document = self.documents[index].clone();
                match &options.projection {
                    Some(projection) => project(document, projection),
                    None => Ok(document),
                }
            })
            .collect()
    }

    pub(crate) fn find_one(
        &self,
        filter: &Document,
        options: FindOneOptions,
    ) -> Result<Option<Document>, InMemoryError> {
        let options = FindOptions {
            sort: options.sort,
            skip: options.skip,
            limit: Some(1),
            projection: options.projection,
        };

        Ok(self.find(filter, &options)?.into_iter().next())
    }

    pub(crate) fn count(&self, filter: &Document, options: &CountOptions) -> Result<u64, InMemoryError> {
        let matched = self.matching(filter, None)?.len() as u64;
        let counted = matched.saturating_sub(options.skip.unwrap_or(0));

        Ok(match options.limit.filter(|limit| *limit > 0) {
            Some(limit) => counted.min(limit),
            None => counted,
        })
    }

    /// Inserts a document, assigning an `ObjectId` when it has no `_id`.
    pub(crate) fn insert(&mut self, namespace: &str, document: Document) -> Result<Bson, InMemoryError> {
        let document = if document.contains_key("_id") {
            document
        } else {
            let mut identified = Document::new();
            identified.insert("_id", ObjectId::new());
            for (key, value) in document {
                identified.insert(key, value);
            }
            identified
        };

        self.check_unique(namespace, &document, None)?;

        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        self.documents.push(document);

        Ok(id)
    }

    pub(crate) fn insert_many(
        &mut self,
        namespace: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<Vec<Bson>, InMemoryError> {
        let mut ids = Vec::with_capacity(documents.len());
        let mut first_error = None;

        for document in documents {
            match self.insert(namespace, document) {
                Ok(id) => ids.push(id),
                Err(err) if ordered => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                },
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(ids),
        }
    }

    fn modified(
        &self,
        index: Option<usize>,
        filter: &Document,
        modification: Modification<'_>,
    ) -> Result<Document, InMemoryError> {
        match modification {
            Modification::Update(update) => {
                let mut document = match index {
                    Some(index) => self.documents[index].clone(),
                    None => upsert_seed(filter)?,
                };
                apply_update(&mut document, update)?;
                Ok(document)
            },
            Modification::Replace(replacement) => {
                let id = match index {
                    Some(index) => self.documents[index].get("_id").cloned(),
                    None => upsert_seed(filter)?.get("_id").cloned(),
                };
                replace(id.as_ref(), replacement)
            },
        }
    }

    fn update(
        &mut self,
        namespace: &str,
        filter: &Document,
        modification: Modification<'_>,
        multi: bool,
        upsert: bool,
    ) -> Result<UpdateResult, InMemoryError> {
        let mut indices = self.matching(filter, None)?;
        if !multi {
            indices.truncate(1);
        }

        if indices.is_empty() {
            if !upsert {
                return Ok(UpdateResult::default());
            }

            let created = self.modified(None, filter, modification)?;
            let id = self.insert(namespace, created)?;

            return Ok(UpdateResult { matched_count: 0, modified_count: 0, upserted_id: Some(id) });
        }

        let mut result = UpdateResult {
            matched_count: indices.len() as u64,
            ..UpdateResult::default()
        };

        for index in indices {
            let updated = self.modified(Some(index), filter, modification)?;

            if updated != self.documents[index] {
                self.check_unique(namespace, &updated, Some(index))?;
                self.documents[index] = updated;
                result.modified_count += 1;
            }
        }

        Ok(result)
    }

    fn find_and_modify(
        &mut self,
        namespace: &str,
        filter: &Document,
        modification: Modification<'_>,
        options: &FindOneAndModifyOptions,
    ) -> Result<Option<Document>, InMemoryError> {
        let first = self.matching(filter, options.sort.as_ref())?.first().copied();

        match first {
            Some(index) => {
                let before = self.documents[index].clone();
                let after = self.modified(Some(index), filter, modification)?;

                if after != before {
                    self.check_unique(namespace, &after, Some(index))?;
                    self.documents[index] = after.clone();
                }

                Ok(Some(match options.return_document {
                    ReturnDocument::Before => before,
                    ReturnDocument::After => after,
                }))
            },
            None if options.upsert.unwrap_or(false) => {
                let created = self.modified(None, filter, modification)?;
                self.insert(namespace, created)?;

                Ok(match options.return_document {
                    ReturnDocument::Before => None,
                    ReturnDocument::After => self.documents.last().cloned(),
                })
            },
            None => Ok(None),
        }
    }

    fn delete(&mut self, filter: &Document, multi: bool) -> Result<DeleteResult, InMemoryError> {
        let mut indices = self.matching(filter, None)?;
        if !multi {
            indices.truncate(1);
        }

        for index in indices.iter().rev() {
            self.documents.remove(*index);
        }

        Ok(DeleteResult { deleted_count: indices.len() as u64 })
    }

    fn find_and_delete(
        &mut self,
        filter: &Document,
        options: &FindOneAndDeleteOptions,
    ) -> Result<Option<Document>, InMemoryError> {
        Ok(self.matching(filter, options.sort.as_ref())?
            .first()
            .map(|index| self.documents.remove(*index)))
    }

    fn bulk_write(
        &mut self,
        namespace: &str,
        models: &[WriteModel],
        ordered: bool,
    ) -> Result<BulkWriteResult, InMemoryError> {
        let mut result = BulkWriteResult::default();
        let mut first_error = None;

        for model in models {
            if let Err(err) = self.apply_model(namespace, model, &mut result) {
                if ordered {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    fn apply_model(
        &mut self,
        namespace: &str,
        model: &WriteModel,
        result: &mut BulkWriteResult,
    ) -> Result<(), InMemoryError> {
        let updated = match model {
            WriteModel::InsertOne { document } => {
                self.insert(namespace, document.clone())?;
                result.inserted_count += 1;
                return Ok(());
            },
            WriteModel::DeleteOne { filter } => {
                result.deleted_count += self.delete(filter, false)?.deleted_count;
                return Ok(());
            },
            WriteModel::DeleteMany { filter } => {
                result.deleted_count += self.delete(filter, true)?.deleted_count;
                return Ok(());
            },
            WriteModel::UpdateOne { filter, update } => {
                self.update(namespace, filter, Modification::Update(update), false, false)?
            },
            WriteModel::UpdateMany { filter, update } => {
                self.update(namespace, filter, Modification::Update(update), true, false)?
            },
            WriteModel::ReplaceOne { filter, replacement } => {
                self.update(namespace, filter, Modification::Replace(replacement), false, false)?
            },
        };

        result.matched_count += updated.matched_count;
        result.modified_count += updated.modified_count;

        Ok(())
    }
}

/// Cursor over a snapshot of matching documents.
#[derive(Debug, Default)]
pub struct InMemoryCursor {
    documents: VecDeque<Document>,
}

impl InMemoryCursor {
    pub(crate) fn new(documents: Vec<Document>) -> Self {
        Self { documents: documents.into() }
    }
}

#[async_trait]
impl DocumentCursor for InMemoryCursor {
    type Error = InMemoryError;

    async fn next_document(&mut self) -> Option<Result<Document, InMemoryError>> {
        self.documents.pop_front().map(Ok)
    }

    async fn close(self) {}
}

/// Handle to one collection of an [`InMemoryStore`](crate::InMemoryStore).
///
/// Calls bound to a session with an open transaction work on the session's staged copy of
/// the collection; every other call works on the shared store.
#[derive(Debug, Clone)]
pub struct InMemoryCollection {
    name: String,
    namespace: String,
    store: Arc<RwLock<StoreMap>>,
    latency: Duration,
}

impl InMemoryCollection {
    pub(crate) fn new(
        database: &str,
        collection: &str,
        store: Arc<RwLock<StoreMap>>,
        latency: Duration,
    ) -> Self {
        Self {
            name: collection.to_string(),
            namespace: format!("{database}.{collection}"),
            store,
            latency,
        }
    }

    /// Returns `database.collection`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn read<R>(
        &self,
        session: Option<&mut InMemorySession>,
        op: impl FnOnce(&CollectionData) -> R + Send,
    ) -> R {
        self.delay().await;

        if let Some(staged) = session.and_then(InMemorySession::staged_mut) {
            if let Some(data) = staged.get(&self.namespace) {
                return op(data);
            }
        }

        let store = self.store.read().await;
        match store.get(&self.namespace) {
            Some(data) => op(data),
            None => op(&CollectionData::default()),
        }
    }

    async fn write<R>(
        &self,
        session: Option<&mut InMemorySession>,
        op: impl FnOnce(&str, &mut CollectionData) -> R + Send,
    ) -> R {
        self.delay().await;

        match session.and_then(InMemorySession::staged_mut) {
            Some(staged) => {
                let data = match staged.entry(self.namespace.clone()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => {
                        let current = self.store
                            .read()
                            .await
                            .get(&self.namespace)
                            .cloned()
                            .unwrap_or_default();
                        entry.insert(current)
                    },
                };

                op(self.namespace.as_str(), data)
            },
            None => {
                let mut store = self.store.write().await;
                let data = store.entry(self.namespace.clone()).or_default();
                data.version += 1;

                op(self.namespace.as_str(), data)
            },
        }
    }
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    type Error = InMemoryError;
    type Session = InMemorySession;
    type Cursor = InMemoryCursor;

    fn name(&self) -> &str {
        &self.name
    }

    async fn find_one(
        &self,
        filter: Document,
        options: FindOneOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<Option<Document>, InMemoryError> {
        self.read(session, |data| data.find_one(&filter, options)).await
    }

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<InMemoryCursor, InMemoryError> {
        self.read(session, |data| data.find(&filter, &options))
            .await
            .map(InMemoryCursor::new)
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<Option<Document>, InMemoryError> {
        self.write(session, |namespace, data| {
            data.find_and_modify(namespace, &filter, Modification::Update(&update), &options)
        })
        .await
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<Option<Document>, InMemoryError> {
        self.write(session, |namespace, data| {
            data.find_and_modify(namespace, &filter, Modification::Replace(&replacement), &options)
        })
        .await
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        options: FindOneAndDeleteOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<Option<Document>, InMemoryError> {
        self.write(session, |_, data| data.find_and_delete(&filter, &options)).await
    }

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&mut InMemorySession>,
    ) -> Result<Bson, InMemoryError> {
        self.write(session, |namespace, data| data.insert(namespace, document)).await
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: InsertManyOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<Vec<Bson>, InMemoryError> {
        let ordered = options.ordered.unwrap_or(true);

        self.write(session, |namespace, data| data.insert_many(namespace, documents, ordered)).await
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<UpdateResult, InMemoryError> {
        let upsert = options.upsert.unwrap_or(false);

        self.write(session, |namespace, data| {
            data.update(namespace, &filter, Modification::Update(&update), false, upsert)
        })
        .await
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<UpdateResult, InMemoryError> {
        let upsert = options.upsert.unwrap_or(false);

        self.write(session, |namespace, data| {
            data.update(namespace, &filter, Modification::Update(&update), true, upsert)
        })
        .await
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: UpdateOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<UpdateResult, InMemoryError> {
        let upsert = options.upsert.unwrap_or(false);

        self.write(session, |namespace, data| {
            data.update(namespace, &filter, Modification::Replace(&replacement), false, upsert)
        })
        .await
    }

    async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut InMemorySession>,
    ) -> Result<DeleteResult, InMemoryError> {
        self.write(session, |_, data| data.delete(&filter, false)).await
    }

    async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut InMemorySession>,
    ) -> Result<DeleteResult, InMemoryError> {
        self.write(session, |_, data| data.delete(&filter, true)).await
    }

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<u64, InMemoryError> {
        self.read(session, |data| data.count(&filter, &options)).await
    }

    async fn estimated_document_count(&self) -> Result<u64, InMemoryError> {
        Ok(self.read(None, |data| data.documents.len() as u64).await)
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: BulkWriteOptions,
        session: Option<&mut InMemorySession>,
    ) -> Result<BulkWriteResult, InMemoryError> {
        let ordered = options.ordered.unwrap_or(true);

        self.write(session, |namespace, data| data.bulk_write(namespace, &models, ordered)).await
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&mut InMemorySession>,
    ) -> Result<InMemoryCursor, InMemoryError> {
        self.read(session, |data| run_pipeline(data.documents.clone(), &pipeline))
            .await
            .map(InMemoryCursor::new)
    }
}
