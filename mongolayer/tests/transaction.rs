use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use mongolayer::{
    memory::{InMemoryCollection, InMemoryStore},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: i32,
    limit: i32,
}

#[derive(Error, Debug)]
enum TransferError {
    #[error("limit exceeded")]
    LimitExceeded,
    #[error(transparent)]
    Db(#[from] DbError),
}

type Accounts = TypedCollection<Account, InMemoryCollection>;

async fn seeded(store: &InMemoryStore, observer: Arc<dyn QueryObserver>) -> Accounts {
    let accounts = store.typed_collection::<Account>("bank", "accounts", observer);

    accounts
        .insert_many(&[Account { id: 1, limit: 100 }, Account { id: 2, limit: 200 }], None)
        .await
        .unwrap();

    accounts
}

async fn limit_of(accounts: &Accounts, id: i32) -> i32 {
    accounts.find_one(doc! { "id": id }, None).await.unwrap().limit
}

#[tokio::test]
async fn test_transfer_commits_all_writes() {
    let store = InMemoryStore::builder().build().await.unwrap();
    let accounts = seeded(&store, Arc::new(TracingObserver::default())).await;

    run_in_transaction(&store, None, None, |session| {
        let accounts = accounts.clone();
        async move {
            accounts
                .update_one_with_session(session, doc! { "id": 1 }, doc! { "$inc": { "limit": -50 } }, None)
                .await?;

            // Writes stay invisible outside the session until commit.
            assert_eq!(limit_of(&accounts, 1).await, 100);
            assert_eq!(
                accounts
                    .find_one_with_session(session, doc! { "id": 1 }, None)
                    .await?
                    .limit,
                50
            );

            accounts
                .update_one_with_session(session, doc! { "id": 2 }, doc! { "$inc": { "limit": 50 } }, None)
                .await?;

            Ok::<_, DbError>(())
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(limit_of(&accounts, 1).await, 50);
    assert_eq!(limit_of(&accounts, 2).await, 250);
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test]
async fn test_work_error_aborts_and_stops_later_calls() {
    let store = InMemoryStore::builder().build().await.unwrap();
    let accounts = seeded(&store, Arc::new(TracingObserver::default())).await;
    let calls = Arc::new(AtomicUsize::new(0));

    let result = run_in_transaction(&store, None, None, |session| {
        let accounts = accounts.clone();
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            accounts
                .update_one_with_session(session, doc! { "id": 1 }, doc! { "$inc": { "limit": -500 } }, None)
                .await?;

            calls.fetch_add(1, Ordering::SeqCst);
            let from = accounts
                .find_one_with_session(session, doc! { "id": 1 }, None)
                .await?;
            if from.limit < 0 {
                return Err(TransferError::LimitExceeded);
            }

            calls.fetch_add(1, Ordering::SeqCst);
            accounts
                .update_one_with_session(session, doc! { "id": 2 }, doc! { "$inc": { "limit": 500 } }, None)
                .await?;

            Ok(())
        }
        .boxed()
    })
    .await;

    assert!(matches!(result, Err(TransferError::LimitExceeded)));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(limit_of(&accounts, 1).await, 100);
    assert_eq!(limit_of(&accounts, 2).await, 200);
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test]
async fn test_db_error_inside_work_is_returned_unchanged() {
    let store = InMemoryStore::builder().build().await.unwrap();
    let accounts = seeded(&store, Arc::new(TracingObserver::default())).await;

    let err = run_in_transaction(&store, None, None, |session| {
        let accounts = accounts.clone();
        async move {
            accounts
                .update_one_with_session(session, doc! { "id": 1 }, doc! { "$set": { "limit": 0 } }, None)
                .await?;
            accounts
                .delete_one_with_session(session, doc! { "id": 9 })
                .await?;

            Ok::<_, DbError>(())
        }
        .boxed()
    })
    .await
    .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(err.context().filter, Some(doc! { "id": 9 }));
    assert_eq!(limit_of(&accounts, 1).await, 100);
}

#[tokio::test]
async fn test_write_outside_transaction_survives_commit() {
    let store = InMemoryStore::builder().build().await.unwrap();
    let accounts = seeded(&store, Arc::new(TracingObserver::default())).await;
    let attempts = Arc::new(AtomicUsize::new(0));

    run_in_transaction(&store, None, None, |session| {
        let accounts = accounts.clone();
        let attempts = attempts.clone();
        async move {
            accounts
                .update_one_with_session(session, doc! { "id": 1 }, doc! { "$inc": { "limit": -50 } }, None)
                .await?;

            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                accounts.insert_one(&Account { id: 3, limit: 300 }).await?;
            }

            Ok::<_, DbError>(())
        }
        .boxed()
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(accounts.count_documents(doc! {}, None).await.unwrap(), 3);
    assert_eq!(limit_of(&accounts, 1).await, 50);
    assert_eq!(limit_of(&accounts, 3).await, 300);
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test]
async fn test_session_start_failure_is_client_error() {
    let store = InMemoryStore::builder().without_sessions().build().await.unwrap();
    let calls = AtomicUsize::new(0);

    let err = run_in_transaction(&store, None, None, |_session| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, DbError>(()) }.boxed()
    })
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClientError);
    assert!(is_client_error(&err));
    assert!(is_internal(&err));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_bound_calls_ignore_timeout_budget() {
    let store = InMemoryStore::builder()
        .latency(Duration::from_millis(50))
        .build()
        .await
        .unwrap();
    let observer = Arc::new(TracingObserver::new(ObserverConfig {
        timeout_budget_ms: 10,
        ..Default::default()
    }));
    let accounts = store.typed_collection::<Account>("bank", "accounts", observer);
    accounts
        .handle()
        .insert_one(doc! { "id": 1, "limit": 100 }, None)
        .await
        .unwrap();

    let err = accounts.find_one(doc! { "id": 1 }, None).await.unwrap_err();
    assert!(err.is_timeout());

    let found = run_in_transaction(&store, None, None, |session| {
        let accounts = accounts.clone();
        async move { accounts.find_one_with_session(session, doc! { "id": 1 }, None).await }.boxed()
    })
    .await
    .unwrap();

    assert_eq!(found, Account { id: 1, limit: 100 });
}
