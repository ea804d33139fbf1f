//! Driver-neutral options for collection, session and transaction calls.
//!
//! Each driver adapter maps these onto its native option types. Leaving a field as `None`
//! means "use the driver default".

use bson::{Bson, Document, doc};
use std::time::Duration;

/// Options for multi-document reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub projection: Option<Document>,
}

/// Options for single-document reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub projection: Option<Document>,
}

/// Which version of the document a find-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options for find-and-update and find-and-replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndModifyOptions {
    pub sort: Option<Document>,
    pub upsert: Option<bool>,
    pub return_document: ReturnDocument,
}

/// Options for find-and-delete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndDeleteOptions {
    pub sort: Option<Document>,
}

/// Options for update and replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    pub upsert: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOptions {
    /// Stop at the first failed insert. Drivers default to `true`.
    pub ordered: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteOptions {
    pub ordered: Option<bool>,
}

/// A single write inside a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
    ReplaceOne { filter: Document, replacement: Document },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

impl From<&WriteModel> for Bson {
    fn from(model: &WriteModel) -> Self {
        Bson::Document(match model {
            WriteModel::InsertOne { document } => doc! {
                "insertOne": { "document": document.clone() },
            },
            WriteModel::UpdateOne { filter, update } => doc! {
                "updateOne": { "filter": filter.clone(), "update": update.clone() },
            },
            WriteModel::UpdateMany { filter, update } => doc! {
                "updateMany": { "filter": filter.clone(), "update": update.clone() },
            },
            WriteModel::ReplaceOne { filter, replacement } => doc! {
                "replaceOne": { "filter": filter.clone(), "replacement": replacement.clone() },
            },
            WriteModel::DeleteOne { filter } => doc! {
                "deleteOne": { "filter": filter.clone() },
            },
            WriteModel::DeleteMany { filter } => doc! {
                "deleteMany": { "filter": filter.clone() },
            },
        })
    }
}

/// Options applied when a session is started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub causal_consistency: Option<bool>,
}

/// Options applied to every attempt of a transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionOptions {
    pub max_commit_time: Option<Duration>,
}
