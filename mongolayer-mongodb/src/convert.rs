//! Maps driver-neutral options onto MongoDB driver options.

use mongodb::{
    Namespace,
    options as driver,
};

use mongolayer_core::options::{
    CountOptions, FindOneAndDeleteOptions, FindOneAndModifyOptions, FindOneOptions, FindOptions,
    InsertManyOptions, ReturnDocument, SessionOptions, TransactionOptions, UpdateOptions, WriteModel,
};

pub(crate) fn find_one_options(options: FindOneOptions) -> driver::FindOneOptions {
    let mut converted = driver::FindOneOptions::default();

    converted.sort = options.sort;
    converted.skip = options.skip;
    converted.projection = options.projection;

    converted
}

pub(crate) fn find_options(options: FindOptions) -> driver::FindOptions {
    let mut converted = driver::FindOptions::default();

    if let Some(limit) = options.limit {
        converted.limit = Some(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    converted.sort = options.sort;
    converted.skip = options.skip;
    converted.projection = options.projection;

    converted
}

fn return_document(value: ReturnDocument) -> driver::ReturnDocument {
    match value {
        ReturnDocument::Before => driver::ReturnDocument::Before,
        ReturnDocument::After => driver::ReturnDocument::After,
    }
}

pub(crate) fn find_one_and_update_options(options: FindOneAndModifyOptions) -> driver::FindOneAndUpdateOptions {
    let mut converted = driver::FindOneAndUpdateOptions::default();

    converted.sort = options.sort;
    converted.upsert = options.upsert;
    converted.return_document = Some(return_document(options.return_document));

    converted
}

pub(crate) fn find_one_and_replace_options(options: FindOneAndModifyOptions) -> driver::FindOneAndReplaceOptions {
    let mut converted = driver::FindOneAndReplaceOptions::default();

    converted.sort = options.sort;
    converted.upsert = options.upsert;
    converted.return_document = Some(return_document(options.return_document));

    converted
}

pub(crate) fn find_one_and_delete_options(options: FindOneAndDeleteOptions) -> driver::FindOneAndDeleteOptions {
    let mut converted = driver::FindOneAndDeleteOptions::default();
    converted.sort = options.sort;
    converted
}

pub(crate) fn insert_many_options(options: InsertManyOptions) -> driver::InsertManyOptions {
    let mut converted = driver::InsertManyOptions::default();
    converted.ordered = options.ordered;
    converted
}

pub(crate) fn update_options(options: UpdateOptions) -> driver::UpdateOptions {
    let mut converted = driver::UpdateOptions::default();
    converted.upsert = options.upsert;
    converted
}

pub(crate) fn replace_options(options: UpdateOptions) -> driver::ReplaceOptions {
    let mut converted = driver::ReplaceOptions::default();
    converted.upsert = options.upsert;
    converted
}

pub(crate) fn count_options(options: CountOptions) -> driver::CountOptions {
    let mut converted = driver::CountOptions::default();

    converted.skip = options.skip;
    converted.limit = options.limit;

    converted
}

pub(crate) fn session_options(options: SessionOptions) -> driver::SessionOptions {
    let mut converted = driver::SessionOptions::default();
    converted.causal_consistency = options.causal_consistency;
    converted
}

pub(crate) fn transaction_options(options: TransactionOptions) -> driver::TransactionOptions {
    let mut converted = driver::TransactionOptions::default();
    converted.max_commit_time = options.max_commit_time;
    converted
}

/// Targets a write model at `namespace` for a client-level bulk write.
pub(crate) fn write_model(namespace: &Namespace, model: WriteModel) -> driver::WriteModel {
    match model {
        WriteModel::InsertOne { document } => driver::WriteModel::InsertOne(
            driver::InsertOneModel::builder()
                .namespace(namespace.clone())
                .document(document)
                .build(),
        ),
        WriteModel::UpdateOne { filter, update } => driver::WriteModel::UpdateOne(
            driver::UpdateOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .update(driver::UpdateModifications::Document(update))
                .build(),
        ),
        WriteModel::UpdateMany { filter, update } => driver::WriteModel::UpdateMany(
            driver::UpdateManyModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .update(driver::UpdateModifications::Document(update))
                .build(),
        ),
        WriteModel::ReplaceOne { filter, replacement } => driver::WriteModel::ReplaceOne(
            driver::ReplaceOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .replacement(replacement)
                .build(),
        ),
        WriteModel::DeleteOne { filter } => driver::WriteModel::DeleteOne(
            driver::DeleteOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .build(),
        ),
        WriteModel::DeleteMany { filter } => driver::WriteModel::DeleteMany(
            driver::DeleteManyModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .build(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_find_options_clamp_limit() {
        let converted = find_options(FindOptions {
            sort: Some(doc! { "account_id": 1 }),
            skip: Some(2),
            limit: Some(u64::MAX),
            projection: None,
        });

        assert_eq!(converted.limit, Some(i64::MAX));
        assert_eq!(converted.skip, Some(2));
        assert_eq!(converted.sort, Some(doc! { "account_id": 1 }));
    }

    #[test]
    fn test_return_document_is_always_explicit() {
        let converted = find_one_and_update_options(FindOneAndModifyOptions::default());

        assert!(matches!(converted.return_document, Some(driver::ReturnDocument::Before)));
        assert_eq!(converted.upsert, None);
    }
}
