//! Turns raw driver results into typed values.
//!
//! Decode failures are reported as [`ErrorKind::Decode`](crate::error::ErrorKind::Decode),
//! never as query failures, even though the query itself succeeded. Failures while iterating
//! a cursor are driver failures and go through the classifier instead.

use bson::Document;

use crate::{
    context::QueryContext,
    driver::DocumentCursor,
    error::{DbError, DbResult, Sentinel, classify},
    model::{Model, ModelExt},
};

/// Decodes the result of a single-document call.
///
/// `None` means the driver found no document and yields a `NotFound` error.
pub fn decode_one<T: Model>(found: Option<Document>, context: &QueryContext) -> DbResult<T> {
    match found {
        Some(document) => T::from_document(document)
            .map_err(|err| DbError::decode(context.clone(), err)),
        None => Err(classify(Sentinel::NoDocuments, context.clone())),
    }
}

/// Drains `cursor` into a vector of `T`.
///
/// The cursor is closed exactly once before this returns, whatever the outcome. If any
/// document fails to decode the documents decoded so far are discarded.
pub async fn decode_all<T, C>(mut cursor: C, context: &QueryContext) -> DbResult<Vec<T>>
where
    T: Model,
    C: DocumentCursor,
{
    let outcome = drain(&mut cursor, context).await;
    cursor.close().await;

    outcome
}

async fn drain<T, C>(cursor: &mut C, context: &QueryContext) -> DbResult<Vec<T>>
where
    T: Model,
    C: DocumentCursor,
{
    let mut decoded = Vec::new();

    while let Some(next) = cursor.next_document().await {
        let document = next.map_err(|err| classify(err, context.clone()))?;

        decoded.push(
            T::from_document(document)
                .map_err(|err| DbError::decode(context.clone(), err))?,
        );
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverCause;
    use async_trait::async_trait;
    use bson::doc;
    use serde::{Deserialize, Serialize};
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use thiserror::Error;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        account_id: i32,
        limit: i32,
    }

    #[derive(Error, Debug)]
    #[error("connection reset")]
    struct Reset;

    impl DriverCause for Reset {
        fn is_client_error(&self) -> bool {
            true
        }
    }

    struct MockCursor {
        items: VecDeque<Result<Document, Reset>>,
        closed: Arc<AtomicUsize>,
    }

    impl MockCursor {
        fn new(items: Vec<Result<Document, Reset>>) -> (Self, Arc<AtomicUsize>) {
            let closed = Arc::new(AtomicUsize::new(0));
            let cursor = Self {
                items: items.into(),
                closed: closed.clone(),
            };
            (cursor, closed)
        }
    }

    #[async_trait]
    impl DocumentCursor for MockCursor {
        type Error = Reset;

        async fn next_document(&mut self) -> Option<Result<Document, Reset>> {
            self.items.pop_front()
        }

        async fn close(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context() -> QueryContext {
        QueryContext::new("accounts").with_filter(doc! {})
    }

    #[test]
    fn test_decode_one_found() {
        let account: Account =
            decode_one(Some(doc! { "account_id": 1, "limit": 10 }), &context()).unwrap();

        assert_eq!(account, Account { account_id: 1, limit: 10 });
    }

    #[test]
    fn test_decode_one_missing_is_not_found() {
        let err = decode_one::<Account>(None, &context()).unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_decode_error());
    }

    #[test]
    fn test_decode_one_mismatch_is_decode_error() {
        let err = decode_one::<Account>(Some(doc! { "account_id": "one" }), &context()).unwrap_err();

        assert!(err.is_decode_error());
        assert!(!err.is_internal());
    }

    #[tokio::test]
    async fn test_decode_all_closes_on_success() {
        let (cursor, closed) = MockCursor::new(vec![
            Ok(doc! { "account_id": 1, "limit": 10 }),
            Ok(doc! { "account_id": 2, "limit": 20 }),
        ]);

        let accounts: Vec<Account> = decode_all(cursor, &context()).await.unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_all_closes_on_decode_failure() {
        let (cursor, closed) = MockCursor::new(vec![
            Ok(doc! { "account_id": 1, "limit": 10 }),
            Ok(doc! { "account_id": "broken" }),
            Ok(doc! { "account_id": 3, "limit": 30 }),
        ]);

        let err = decode_all::<Account, _>(cursor, &context()).await.unwrap_err();

        assert!(err.is_decode_error());
        assert!(!err.is_internal());
        assert_eq!(err.context().collection, "accounts");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_all_closes_on_cursor_failure() {
        let (cursor, closed) = MockCursor::new(vec![
            Ok(doc! { "account_id": 1, "limit": 10 }),
            Err(Reset),
        ]);

        let err = decode_all::<Account, _>(cursor, &context()).await.unwrap_err();

        assert!(err.is_client_error());
        assert!(!err.is_decode_error());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_all_closes_empty_cursor() {
        let (cursor, closed) = MockCursor::new(vec![]);

        let accounts: Vec<Account> = decode_all(cursor, &context()).await.unwrap();

        assert!(accounts.is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
