//! MongoDB connection, sessions and transactions.

use std::error::Error as StdError;

use async_trait::async_trait;
use futures::{FutureExt, future::BoxFuture};
use mongodb::{Client, ClientSession, options::ClientOptions};
use tracing::{debug, info};

use mongolayer_core::{
    context::QueryContext,
    driver::{ConnectionBuilder, ConnectionManager, SessionManager, TransactionFailure},
    error::{DbError, DbResult},
    options::{SessionOptions, TransactionOptions},
};

use crate::{collection::MongoCollection, convert, error::MongoError};

/// A connected MongoDB client.
///
/// Cloning is cheap; clones share the driver's connection pool.
#[derive(Debug, Clone)]
pub struct MongoConnection {
    client: Client,
}

impl MongoConnection {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn builder(dsn: &str) -> MongoConnectionBuilder {
        MongoConnectionBuilder::new(dsn)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Closes every pooled connection once outstanding sessions and cursors are dropped.
    pub async fn shutdown(self) {
        self.client.shutdown().await;

        info!("mongodb connection shut down");
    }
}

impl ConnectionManager for MongoConnection {
    type Handle = MongoCollection;

    fn collection_handle(&self, database: &str, collection: &str) -> MongoCollection {
        MongoCollection::new(
            self.client.clone(),
            self.client.database(database).collection(collection),
        )
    }
}

/// A unit of work and what its latest attempt failed with.
struct Attempt<F, E> {
    work: F,
    failure: Option<E>,
}

/// Marks a transaction attempt aborted because the unit of work failed.
#[derive(Debug, Clone, Copy)]
struct WorkFailed;

#[async_trait]
impl SessionManager for MongoConnection {
    type Session = ClientSession;
    type Error = MongoError;

    async fn start_session(&self, options: SessionOptions) -> Result<ClientSession, MongoError> {
        let session = self.client
            .start_session()
            .with_options(convert::session_options(options))
            .await?;

        debug!("mongodb session started");

        Ok(session)
    }

    /// Runs `work` through the driver's transaction runner, which retries the whole attempt
    /// on transient transaction errors and the commit on unknown commit results.
    async fn with_transaction<R, E, F>(
        &self,
        session: &mut ClientSession,
        options: TransactionOptions,
        work: F,
    ) -> Result<R, TransactionFailure<E, MongoError>>
    where
        R: Send,
        E: StdError + Send + 'static,
        F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, Result<R, E>> + Send,
    {
        let mut attempt = Attempt { work, failure: None };

        let outcome = session
            .start_transaction()
            .with_options(convert::transaction_options(options))
            .and_run(&mut attempt, |session, attempt| {
                async move {
                    attempt.failure = None;

                    match (attempt.work)(session).await {
                        Ok(value) => Ok(value),
                        Err(err) => {
                            // Hand the driver's own error back so its labels drive the retry.
                            let driver_error = MongoError::find_in_chain(&err)
                                .map(|cause| cause.inner().clone())
                                .unwrap_or_else(|| mongodb::error::Error::custom(WorkFailed));
                            attempt.failure = Some(err);

                            Err(driver_error)
                        },
                    }
                }
                .boxed()
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(err) => match attempt.failure.take() {
                Some(failure) => Err(TransactionFailure::Work(failure)),
                None => Err(TransactionFailure::Driver(MongoError(err))),
            },
        }
    }
}

/// Builder for [`MongoConnection`].
///
/// # Example
///
/// ```ignore
/// let connection = MongoConnection::builder("mongodb://localhost:27017")
///     .app_name("billing")
///     .max_pool_size(20)
///     .build()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct MongoConnectionBuilder {
    dsn: String,
    app_name: Option<String>,
    max_pool_size: Option<u32>,
}

impl MongoConnectionBuilder {
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            app_name: None,
            max_pool_size: None,
        }
    }

    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    pub fn max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.max_pool_size = Some(max_pool_size);
        self
    }
}

#[async_trait]
impl ConnectionBuilder for MongoConnectionBuilder {
    type Connection = MongoConnection;

    async fn build(self) -> DbResult<MongoConnection> {
        let context = QueryContext::default();

        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DbError::client(context.clone(), MongoError(e)))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }
        if self.max_pool_size.is_some() {
            options.max_pool_size = self.max_pool_size;
        }

        let hosts = options.hosts.len();
        let client = Client::with_options(options)
            .map_err(|e| DbError::client(context, MongoError(e)))?;

        info!(hosts, "mongodb client created");

        Ok(MongoConnection::new(client))
    }
}
