//! The element type of a typed collection.

use bson::{Document, de::deserialize_from_document, error::Error as BsonError, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};

/// Marker for types a [`TypedCollection`](crate::collection::TypedCollection) can hold.
///
/// Implemented for every serde type that can cross task boundaries, so application structs
/// only need `#[derive(Serialize, Deserialize)]`.
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct Account {
///     pub account_id: i32,
///     pub limit: i32,
///     pub products: Vec<String>,
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Model for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// BSON conversions for every [`Model`].
pub trait ModelExt: Model {
    /// Serializes the value to a BSON document.
    fn to_document(&self) -> Result<Document, BsonError>;

    /// Deserializes a value from a BSON document.
    fn from_document(document: Document) -> Result<Self, BsonError>;
}

impl<M: Model> ModelExt for M {
    fn to_document(&self) -> Result<Document, BsonError> {
        serialize_to_document(self)
    }

    fn from_document(document: Document) -> Result<Self, BsonError> {
        deserialize_from_document(document)
    }
}
