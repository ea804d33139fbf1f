//! Classification hints for MongoDB driver errors.

use std::{error::Error as StdError, io};

use mongodb::error::{Error, ErrorKind, WriteFailure};
use thiserror::Error;

use mongolayer_core::error::DriverCause;

/// Server codes reported for unique index violations.
const DUPLICATE_KEY_CODES: [i32; 3] = [11000, 11001, 12582];

/// `MaxTimeMSExpired`
const MAX_TIME_EXPIRED_CODE: i32 = 50;

/// A MongoDB driver error seen by the classifier.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct MongoError(#[from] pub Error);

impl MongoError {
    pub fn inner(&self) -> &Error {
        &self.0
    }

    /// Finds the first `MongoError` in the source chain of `err`, starting with `err` itself.
    pub fn find_in_chain<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a MongoError> {
        std::iter::successors(Some(err), |&err| err.source())
            .find_map(|err| err.downcast_ref::<MongoError>())
    }
}

impl DriverCause for MongoError {
    fn is_duplicate_key(&self) -> bool {
        let duplicate = |code: i32| DUPLICATE_KEY_CODES.contains(&code);

        match self.0.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(failure)) => duplicate(failure.code),
            ErrorKind::InsertMany(failure) => failure.write_errors
                .iter()
                .flatten()
                .any(|failure| duplicate(failure.code)),
            ErrorKind::BulkWrite(failure) => failure.write_errors
                .values()
                .any(|failure| duplicate(failure.code)),
            ErrorKind::Command(failure) => duplicate(failure.code),
            _ => self.0.to_string().contains("E11000"),
        }
    }

    fn is_timeout(&self) -> bool {
        match self.0.kind.as_ref() {
            ErrorKind::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            ErrorKind::Command(failure) => failure.code == MAX_TIME_EXPIRED_CODE,
            _ => false,
        }
    }

    fn is_client_error(&self) -> bool {
        matches!(
            self.0.kind.as_ref(),
            ErrorKind::Authentication { .. }
                | ErrorKind::ServerSelection { .. }
                | ErrorKind::ConnectionPoolCleared { .. }
                | ErrorKind::DnsResolve { .. }
                | ErrorKind::InvalidArgument { .. }
                | ErrorKind::SessionsNotSupported { .. }
                | ErrorKind::Transaction { .. }
                | ErrorKind::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use mongodb::{error::CommandError, options::ClientOptions};
    use mongolayer_core::{
        context::QueryContext,
        error::{DbError, ErrorKind as DbErrorKind, classify},
    };

    fn context() -> QueryContext {
        QueryContext::new("accounts")
    }

    fn command_error(code: i32, message: &str) -> MongoError {
        let failure: CommandError = bson::deserialize_from_document(doc! {
            "code": code,
            "codeName": "Failure",
            "errmsg": message,
        })
        .unwrap();

        MongoError(Error::from(ErrorKind::Command(failure)))
    }

    #[test]
    fn test_io_timeout_is_timeout() {
        let err = MongoError(Error::from(io::Error::new(io::ErrorKind::TimedOut, "deadline")));

        assert!(err.is_timeout());
        assert_eq!(classify(err, context()).kind(), DbErrorKind::Timeout);
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(
            classify(command_error(11000, "E11000 duplicate key error"), context()).kind(),
            DbErrorKind::DuplicatedKey
        );
        assert_eq!(
            classify(command_error(50, "operation exceeded time limit"), context()).kind(),
            DbErrorKind::Timeout
        );
        assert_eq!(
            classify(command_error(2, "bad value"), context()).kind(),
            DbErrorKind::Internal
        );
    }

    #[tokio::test]
    async fn test_invalid_dsn_is_client_error() {
        let err = MongoError(ClientOptions::parse("invalid://localhost").await.unwrap_err());

        assert!(matches!(err.inner().kind.as_ref(), ErrorKind::InvalidArgument { .. }));
        assert_eq!(classify(err, context()).kind(), DbErrorKind::ClientError);
    }

    #[test]
    fn test_custom_error_is_internal() {
        let err = MongoError(Error::custom("unexpected"));

        assert!(!err.is_duplicate_key());
        assert!(!err.is_timeout());
        assert!(!err.is_client_error());
        assert_eq!(classify(err, context()).kind(), DbErrorKind::Internal);
    }

    #[test]
    fn test_find_in_chain() {
        let wrapped = classify(command_error(112, "WriteConflict"), context());

        let found = MongoError::find_in_chain(&wrapped).unwrap();
        assert!(matches!(found.inner().kind.as_ref(), ErrorKind::Command(failure) if failure.code == 112));

        assert!(MongoError::find_in_chain(&DbError::not_found(context())).is_none());
    }
}
