//! Diagnostic context carried by every classified error.

use bson::{Bson, Document};
use std::fmt;

/// The payloads of a single collection call, kept for diagnostics.
///
/// A context is built once per call and never mutated afterwards. It is attached to
/// every [`DbError`](crate::error::DbError) and included in slow-operation messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    /// Name of the collection the call targeted.
    pub collection: String,
    /// Filter document, when the call had one.
    pub filter: Option<Document>,
    /// Update or replacement payload.
    pub update: Option<Bson>,
    /// Inserted document(s), pipeline or bulk models.
    pub document: Option<Bson>,
}

impl QueryContext {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_update(mut self, update: impl Into<Bson>) -> Self {
        self.update = Some(update.into());
        self
    }

    pub fn with_document(mut self, document: impl Into<Bson>) -> Self {
        self.document = Some(document.into());
        self
    }
}

impl fmt::Display for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collection: {}", self.collection)?;

        if let Some(filter) = &self.filter {
            write!(f, " filter: {filter}")?;
        }
        if let Some(update) = &self.update {
            write!(f, " update: {update}")?;
        }
        if let Some(document) = &self.document {
            write!(f, " document: {document}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_display_includes_present_payloads_only() {
        let context = QueryContext::new("accounts")
            .with_filter(doc! { "account_id": 1 });

        let rendered = context.to_string();

        assert!(rendered.starts_with("collection: accounts"));
        assert!(rendered.contains("filter:"));
        assert!(rendered.contains("account_id"));
        assert!(!rendered.contains("update:"));
        assert!(!rendered.contains("document:"));
    }
}
