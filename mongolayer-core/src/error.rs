//! Error taxonomy, classifier and kind predicates.
//!
//! Every fallible operation in this crate returns [`DbResult<T>`]. A [`DbError`] is one of a
//! closed set of kinds and always carries the [`QueryContext`] of the call that produced it.
//!
//! Driver failures are turned into a [`DbError`] by [`classify`], which only looks at a cause
//! through the [`DriverCause`] trait. Callers are expected to branch on the kind, either with
//! [`DbError::kind`] or with the free predicates ([`is_not_found`], [`is_internal`], ...), which
//! also see through any number of wrapping errors.
//!
//! # Example
//!
//! ```ignore
//! match accounts.find_one(doc! { "account_id": 1 }, None).await {
//!     Ok(account) => println!("{account:?}"),
//!     Err(err) if err.is_not_found() => println!("no such account"),
//!     Err(err) => return Err(err.into()),
//! }
//! ```

use std::error::Error as StdError;
use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::{context::QueryContext, outcome::PartialResult};

/// Boxed lower-level cause stored inside a [`DbError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A specialized `Result` type for collection operations.
pub type DbResult<T> = Result<T, DbError>;

/// The kind of a [`DbError`], used for comparisons that must not depend on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NotModified,
    DuplicatedKey,
    Decode,
    Timeout,
    ClientError,
    Internal,
}

impl ErrorKind {
    /// `Internal`, `Timeout` and `ClientError` are all failures of the database layer itself.
    pub fn is_internal(self) -> bool {
        matches!(self, ErrorKind::Internal | ErrorKind::Timeout | ErrorKind::ClientError)
    }
}

/// Represents every error a collection or transaction operation can return.
#[derive(Error, Debug)]
pub enum DbError {
    /// No document matched the filter.
    #[error("document not found. {context}")]
    NotFound {
        context: Box<QueryContext>,
        partial: Option<PartialResult>,
        #[source]
        source: Option<BoxError>,
    },
    /// Documents matched but none was changed by the update or replacement.
    #[error("document not modified. {context}")]
    NotModified {
        context: Box<QueryContext>,
        partial: Option<PartialResult>,
        #[source]
        source: Option<BoxError>,
    },
    /// A unique index rejected the write.
    #[error("duplicated key: {source}. {context}")]
    DuplicatedKey {
        context: Box<QueryContext>,
        #[source]
        source: BoxError,
    },
    /// The query succeeded but a returned document could not be decoded.
    #[error("decode document err: {source}. {context}")]
    Decode {
        context: Box<QueryContext>,
        #[source]
        source: BoxError,
    },
    /// The call exceeded its deadline.
    #[error("query timed out: {source}. {context}")]
    Timeout {
        context: Box<QueryContext>,
        #[source]
        source: BoxError,
    },
    /// The client or session layer failed (connection, session, server selection).
    #[error("client err: {source}. {context}")]
    ClientError {
        context: Box<QueryContext>,
        #[source]
        source: BoxError,
    },
    /// Anything the classifier could not place in another kind.
    #[error("internal err: {source}. {context}")]
    Internal {
        context: Box<QueryContext>,
        #[source]
        source: BoxError,
    },
}

impl DbError {
    pub fn not_found(context: QueryContext) -> Self {
        DbError::NotFound {
            context: Box::new(context),
            partial: None,
            source: None,
        }
    }

    /// Builds a decode error. Only the result decoder produces these.
    pub fn decode(context: QueryContext, cause: impl Into<BoxError>) -> Self {
        DbError::Decode {
            context: Box::new(context),
            source: cause.into(),
        }
    }

    pub fn client(context: QueryContext, cause: impl Into<BoxError>) -> Self {
        DbError::ClientError {
            context: Box::new(context),
            source: cause.into(),
        }
    }

    pub fn internal(context: QueryContext, cause: impl Into<BoxError>) -> Self {
        DbError::Internal {
            context: Box::new(context),
            source: cause.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::NotModified { .. } => ErrorKind::NotModified,
            DbError::DuplicatedKey { .. } => ErrorKind::DuplicatedKey,
            DbError::Decode { .. } => ErrorKind::Decode,
            DbError::Timeout { .. } => ErrorKind::Timeout,
            DbError::ClientError { .. } => ErrorKind::ClientError,
            DbError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn context(&self) -> &QueryContext {
        match self {
            DbError::NotFound { context, .. }
            | DbError::NotModified { context, .. }
            | DbError::DuplicatedKey { context, .. }
            | DbError::Decode { context, .. }
            | DbError::Timeout { context, .. }
            | DbError::ClientError { context, .. }
            | DbError::Internal { context, .. } => context,
        }
    }

    /// Counts reported by a write that matched or modified nothing.
    pub fn partial_result(&self) -> Option<&PartialResult> {
        match self {
            DbError::NotFound { partial, .. } | DbError::NotModified { partial, .. } => partial.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn with_partial(mut self, result: PartialResult) -> Self {
        if let DbError::NotFound { partial, .. } | DbError::NotModified { partial, .. } = &mut self {
            *partial = Some(result);
        }
        self
    }

    pub fn is_not_found(&self) -> bool {
        is_not_found(self)
    }

    pub fn is_not_modified(&self) -> bool {
        is_not_modified(self)
    }

    pub fn is_duplicated_key(&self) -> bool {
        is_duplicated_key(self)
    }

    pub fn is_timeout(&self) -> bool {
        is_timeout(self)
    }

    pub fn is_client_error(&self) -> bool {
        is_client_error(self)
    }

    pub fn is_internal(&self) -> bool {
        is_internal(self)
    }

    pub fn is_decode_error(&self) -> bool {
        is_decode_error(self)
    }
}

/// What the classifier needs to know about a driver failure.
///
/// Driver adapters implement this for their error type. Every method defaults to `false`,
/// so an unrecognised cause ends up as [`ErrorKind::Internal`].
pub trait DriverCause: StdError + Send + Sync + 'static {
    /// The query matched no document.
    fn is_no_document(&self) -> bool {
        false
    }

    /// A uniqueness constraint rejected the write.
    fn is_duplicate_key(&self) -> bool {
        false
    }

    /// A deadline expired, either client side or on the server.
    fn is_timeout(&self) -> bool {
        false
    }

    /// The failure belongs to the client, connection or session layer.
    fn is_client_error(&self) -> bool {
        false
    }
}

/// Conditions raised by this crate rather than by the driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// A single-document read found nothing.
    #[error("no documents in result")]
    NoDocuments,
    /// A write reported zero matched documents.
    #[error("not matched any document")]
    NotMatchedAny,
    /// A write matched documents but modified none.
    #[error("not modified any document")]
    NotModifiedAny,
}

impl DriverCause for Sentinel {
    fn is_no_document(&self) -> bool {
        matches!(self, Sentinel::NoDocuments | Sentinel::NotMatchedAny)
    }
}

impl DriverCause for Elapsed {
    fn is_timeout(&self) -> bool {
        true
    }
}

/// Maps a raw failure to exactly one error kind.
///
/// Rules apply in order: no matching document, not modified, duplicate key, timeout,
/// client/session failure, and finally internal. The cause is kept as the error source.
pub fn classify<C: DriverCause>(cause: C, context: QueryContext) -> DbError {
    let context = Box::new(context);
    let sentinel = (&cause as &(dyn StdError + 'static))
        .downcast_ref::<Sentinel>()
        .copied();

    if cause.is_no_document() {
        return DbError::NotFound { context, partial: None, source: Some(Box::new(cause)) };
    }
    if sentinel == Some(Sentinel::NotModifiedAny) {
        return DbError::NotModified { context, partial: None, source: Some(Box::new(cause)) };
    }
    if cause.is_duplicate_key() {
        return DbError::DuplicatedKey { context, source: Box::new(cause) };
    }
    if cause.is_timeout() {
        return DbError::Timeout { context, source: Box::new(cause) };
    }
    if cause.is_client_error() {
        return DbError::ClientError { context, source: Box::new(cause) };
    }

    DbError::Internal { context, source: Box::new(cause) }
}

fn chain_has(err: &(dyn StdError + 'static), wanted: impl Fn(ErrorKind) -> bool) -> bool {
    std::iter::successors(Some(err), |&err| err.source())
        .filter_map(|err| err.downcast_ref::<DbError>())
        .any(|err| wanted(err.kind()))
}

pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::NotFound)
}

pub fn is_not_modified(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::NotModified)
}

pub fn is_duplicated_key(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::DuplicatedKey)
}

pub fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::Timeout)
}

pub fn is_client_error(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::ClientError)
}

/// True for `Internal`, `Timeout` and `ClientError` anywhere in the chain.
pub fn is_internal(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, ErrorKind::is_internal)
}

pub fn is_decode_error(err: &(dyn StdError + 'static)) -> bool {
    chain_has(err, |kind| kind == ErrorKind::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[derive(Error, Debug)]
    enum FakeCause {
        #[error("no documents")]
        NoDocument,
        #[error("E11000 duplicate key")]
        DuplicateKey,
        #[error("deadline exceeded")]
        Deadline,
        #[error("session ended")]
        Session,
        #[error("unexpected")]
        Unexpected,
    }

    impl DriverCause for FakeCause {
        fn is_no_document(&self) -> bool {
            matches!(self, FakeCause::NoDocument)
        }

        fn is_duplicate_key(&self) -> bool {
            matches!(self, FakeCause::DuplicateKey)
        }

        fn is_timeout(&self) -> bool {
            matches!(self, FakeCause::Deadline)
        }

        fn is_client_error(&self) -> bool {
            matches!(self, FakeCause::Session)
        }
    }

    #[derive(Error, Debug)]
    #[error("wrapped")]
    struct Wrapped {
        #[source]
        source: BoxError,
    }

    fn wrap(err: impl Into<BoxError>) -> Wrapped {
        Wrapped { source: err.into() }
    }

    fn context() -> QueryContext {
        QueryContext::new("col")
    }

    fn all_kinds() -> Vec<DbError> {
        vec![
            DbError::decode(context(), FakeCause::Unexpected),
            DbError::not_found(context()),
            classify(Sentinel::NotModifiedAny, context()),
            classify(FakeCause::DuplicateKey, context()),
            DbError::internal(context(), FakeCause::Unexpected),
            DbError::client(context(), FakeCause::Session),
            classify(FakeCause::Deadline, context()),
        ]
    }

    #[test]
    fn test_classify_rules() {
        assert_eq!(classify(FakeCause::NoDocument, context()).kind(), ErrorKind::NotFound);
        assert_eq!(classify(Sentinel::NoDocuments, context()).kind(), ErrorKind::NotFound);
        assert_eq!(classify(Sentinel::NotMatchedAny, context()).kind(), ErrorKind::NotFound);
        assert_eq!(classify(Sentinel::NotModifiedAny, context()).kind(), ErrorKind::NotModified);
        assert_eq!(classify(FakeCause::DuplicateKey, context()).kind(), ErrorKind::DuplicatedKey);
        assert_eq!(classify(FakeCause::Deadline, context()).kind(), ErrorKind::Timeout);
        assert_eq!(classify(FakeCause::Session, context()).kind(), ErrorKind::ClientError);
        assert_eq!(classify(FakeCause::Unexpected, context()).kind(), ErrorKind::Internal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classify_elapsed_deadline_as_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(5),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();

        assert_eq!(classify(elapsed, context()).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_keeps_context_and_cause() {
        let err = classify(
            FakeCause::DuplicateKey,
            QueryContext::new("accounts").with_filter(doc! { "id": 1 }),
        );

        assert_eq!(err.context().collection, "accounts");
        assert_eq!(err.context().filter, Some(doc! { "id": 1 }));
        assert!(err.source().unwrap().downcast_ref::<FakeCause>().is_some());
    }

    #[test]
    fn test_predicates_match_exactly_one_kind() {
        for err in all_kinds() {
            let kind = err.kind();

            assert_eq!(is_not_found(&err), kind == ErrorKind::NotFound);
            assert_eq!(is_not_modified(&err), kind == ErrorKind::NotModified);
            assert_eq!(is_duplicated_key(&err), kind == ErrorKind::DuplicatedKey);
            assert_eq!(is_timeout(&err), kind == ErrorKind::Timeout);
            assert_eq!(is_client_error(&err), kind == ErrorKind::ClientError);
            assert_eq!(is_decode_error(&err), kind == ErrorKind::Decode);
            assert_eq!(is_internal(&err), kind.is_internal());
        }
    }

    #[test]
    fn test_predicates_see_through_wrapping() {
        for err in all_kinds() {
            let kind = err.kind();
            let wrapped = wrap(wrap(wrap(err)));

            assert_eq!(is_not_found(&wrapped), kind == ErrorKind::NotFound);
            assert_eq!(is_not_modified(&wrapped), kind == ErrorKind::NotModified);
            assert_eq!(is_duplicated_key(&wrapped), kind == ErrorKind::DuplicatedKey);
            assert_eq!(is_timeout(&wrapped), kind == ErrorKind::Timeout);
            assert_eq!(is_client_error(&wrapped), kind == ErrorKind::ClientError);
            assert_eq!(is_decode_error(&wrapped), kind == ErrorKind::Decode);
            assert_eq!(is_internal(&wrapped), kind.is_internal());
        }
    }

    #[test]
    fn test_decode_error_is_not_internal() {
        let err = DbError::decode(context(), FakeCause::Unexpected);

        assert!(err.is_decode_error());
        assert!(!err.is_internal());
        assert!(!is_internal(&wrap(err)));
    }

    #[test]
    fn test_partial_result_only_on_not_found_and_not_modified() {
        let partial = PartialResult::Delete(crate::outcome::DeleteResult { deleted_count: 0 });

        let not_found = classify(Sentinel::NotMatchedAny, context()).with_partial(partial.clone());
        assert_eq!(not_found.partial_result(), Some(&partial));

        let internal = DbError::internal(context(), FakeCause::Unexpected).with_partial(partial);
        assert!(internal.partial_result().is_none());
    }
}
