//! MongoDB collection handle and cursor.

use std::collections::VecDeque;
use async_trait::async_trait;
use bson::{Bson, Document};
use futures::StreamExt;
use mongodb::{Client, ClientSession, Collection, Cursor};

use mongolayer_core::{
    driver::{CollectionHandle, DocumentCursor},
    options::{
        BulkWriteOptions, CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions,
        FindOneOptions, FindOptions, InsertManyOptions, UpdateOptions, WriteModel,
    },
    outcome::{BulkWriteResult, DeleteResult, UpdateResult},
};

use crate::{convert, error::MongoError};

/// Documents of a find or an aggregation.
///
/// Calls outside a session stream from the server. Session-bound calls are drained while the
/// session is still borrowed, so their documents are buffered.
#[derive(Debug)]
pub enum MongoCursor {
    Streaming(Cursor<Document>),
    Buffered(VecDeque<Document>),
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    type Error = MongoError;

    async fn next_document(&mut self) -> Option<Result<Document, MongoError>> {
        match self {
            MongoCursor::Streaming(cursor) => cursor.next().await.map(|next| next.map_err(MongoError::from)),
            MongoCursor::Buffered(documents) => documents.pop_front().map(Ok),
        }
    }

    async fn close(self) {
        // Dropping a driver cursor kills it on the server.
        drop(self);
    }
}

/// Handle to one MongoDB collection.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    client: Client,
    inner: Collection<Document>,
}

impl MongoCollection {
    pub(crate) fn new(client: Client, inner: Collection<Document>) -> Self {
        Self { client, inner }
    }

    /// Returns the underlying driver collection.
    pub fn inner(&self) -> &Collection<Document> {
        &self.inner
    }
}

fn to_update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

fn to_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    type Error = MongoError;
    type Session = ClientSession;
    type Cursor = MongoCursor;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one(
        &self,
        filter: Document,
        options: FindOneOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Document>, MongoError> {
        let action = self.inner
            .find_one(filter)
            .with_options(convert::find_one_options(options));

        Ok(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        })
    }

    async fn find(
        &self,
        filter: Document,
        options: FindOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<MongoCursor, MongoError> {
        let action = self.inner
            .find(filter)
            .with_options(convert::find_options(options));

        match session {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                let mut documents = VecDeque::new();

                while let Some(document) = cursor.next(&mut *session).await {
                    documents.push_back(document?);
                }

                Ok(MongoCursor::Buffered(documents))
            },
            None => Ok(MongoCursor::Streaming(action.await?)),
        }
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Document>, MongoError> {
        let action = self.inner
            .find_one_and_update(filter, update)
            .with_options(convert::find_one_and_update_options(options));

        Ok(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        })
    }

    async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: FindOneAndModifyOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Document>, MongoError> {
        let action = self.inner
            .find_one_and_replace(filter, replacement)
            .with_options(convert::find_one_and_replace_options(options));

        Ok(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        })
    }

    async fn find_one_and_delete(
        &self,
        filter: Document,
        options: FindOneAndDeleteOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Option<Document>, MongoError> {
        let action = self.inner
            .find_one_and_delete(filter)
            .with_options(convert::find_one_and_delete_options(options));

        Ok(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        })
    }

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&mut ClientSession>,
    ) -> Result<Bson, MongoError> {
        let action = self.inner.insert_one(document);

        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };

        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        options: InsertManyOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<Vec<Bson>, MongoError> {
        let action = self.inner
            .insert_many(documents)
            .with_options(convert::insert_many_options(options));

        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };

        let mut inserted = result.inserted_ids.into_iter().collect::<Vec<_>>();
        inserted.sort_by_key(|(index, _)| *index);

        Ok(inserted.into_iter().map(|(_, id)| id).collect())
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<UpdateResult, MongoError> {
        let action = self.inner
            .update_one(filter, update)
            .with_options(convert::update_options(options));

        Ok(to_update_result(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        }))
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: UpdateOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<UpdateResult, MongoError> {
        let action = self.inner
            .update_many(filter, update)
            .with_options(convert::update_options(options));

        Ok(to_update_result(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        }))
    }

    async fn replace_one(
        &self,
        filter: Document,
        replacement: Document,
        options: UpdateOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<UpdateResult, MongoError> {
        let action = self.inner
            .replace_one(filter, replacement)
            .with_options(convert::replace_options(options));

        Ok(to_update_result(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        }))
    }

    async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut ClientSession>,
    ) -> Result<DeleteResult, MongoError> {
        let action = self.inner.delete_one(filter);

        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };

        Ok(DeleteResult { deleted_count: result.deleted_count })
    }

    async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut ClientSession>,
    ) -> Result<DeleteResult, MongoError> {
        let action = self.inner.delete_many(filter);

        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };

        Ok(DeleteResult { deleted_count: result.deleted_count })
    }

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<u64, MongoError> {
        let action = self.inner
            .count_documents(filter)
            .with_options(convert::count_options(options));

        Ok(match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        })
    }

    async fn estimated_document_count(&self) -> Result<u64, MongoError> {
        Ok(self.inner.estimated_document_count().await?)
    }

    async fn bulk_write(
        &self,
        models: Vec<WriteModel>,
        options: BulkWriteOptions,
        session: Option<&mut ClientSession>,
    ) -> Result<BulkWriteResult, MongoError> {
        let namespace = self.inner.namespace();
        let models = models
            .into_iter()
            .map(|model| convert::write_model(&namespace, model))
            .collect::<Vec<_>>();

        let mut action = self.client.bulk_write(models);
        if let Some(ordered) = options.ordered {
            action = action.ordered(ordered);
        }

        let result = match session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };

        Ok(BulkWriteResult {
            inserted_count: to_count(result.inserted_count),
            matched_count: to_count(result.matched_count),
            modified_count: to_count(result.modified_count),
            deleted_count: to_count(result.deleted_count),
            upserted_count: to_count(result.upserted_count),
        })
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&mut ClientSession>,
    ) -> Result<MongoCursor, MongoError> {
        let action = self.inner.aggregate(pipeline);

        match session {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                let mut documents = VecDeque::new();

                while let Some(document) = cursor.next(&mut *session).await {
                    documents.push_back(document?);
                }

                Ok(MongoCursor::Buffered(documents))
            },
            None => Ok(MongoCursor::Streaming(action.await?)),
        }
    }
}
