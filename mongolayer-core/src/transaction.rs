//! Runs a unit of work as one all-or-nothing transaction.
//!
//! [`run_in_transaction`] starts a session, hands it to the driver's transaction runner and
//! ends it afterwards, whatever the outcome. The unit of work receives the session and must
//! pass it to the `_with_session` form of every collection call it makes. A call made through
//! a plain form runs outside the transaction and is neither rolled back nor committed with it.
//!
//! # Example
//!
//! ```ignore
//! let moved = run_in_transaction(&connection, None, None, |session| {
//!     let accounts = accounts.clone();
//!     Box::pin(async move {
//!         accounts.update_one_with_session(session, doc! { "account_id": 1 }, debit, None).await?;
//!         accounts.update_one_with_session(session, doc! { "account_id": 2 }, credit, None).await?;
//!         Ok::<_, DbError>(())
//!     })
//! })
//! .await?;
//! ```

use std::error::Error as StdError;

use futures::future::BoxFuture;
use tracing::debug;

use crate::{
    context::QueryContext,
    driver::{SessionManager, TransactionFailure},
    error::{DbError, classify},
    options::{SessionOptions, TransactionOptions},
};

/// Runs `work` in a transaction on a fresh session of `manager`.
///
/// Returns what `work` returned once the transaction committed. If `work` fails its error is
/// returned unchanged after the transaction was aborted. Failures of the driver itself,
/// including a session that could not be started, are classified and converted into `E`.
///
/// `work` may run more than once when the driver retries a transient failure, so it must not
/// rely on side effects outside the session.
pub async fn run_in_transaction<M, R, E, F>(
    manager: &M,
    session_options: impl Into<Option<SessionOptions>>,
    transaction_options: impl Into<Option<TransactionOptions>>,
    work: F,
) -> Result<R, E>
where
    M: SessionManager,
    R: Send,
    E: From<DbError> + StdError + Send + 'static,
    F: for<'s> FnMut(&'s mut M::Session) -> BoxFuture<'s, Result<R, E>> + Send,
{
    let context = QueryContext::default();

    let mut session = manager
        .start_session(session_options.into().unwrap_or_default())
        .await
        .map_err(|err| E::from(DbError::client(context.clone(), err)))?;

    debug!("transaction session started");

    let outcome = manager
        .with_transaction(&mut session, transaction_options.into().unwrap_or_default(), work)
        .await;

    drop(session);

    match outcome {
        Ok(value) => Ok(value),
        Err(TransactionFailure::Work(err)) => Err(err),
        Err(TransactionFailure::Driver(err)) => Err(E::from(classify(err, context))),
    }
}
