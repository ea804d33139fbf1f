//! Filter evaluation and ordering for in-memory documents.
//!
//! Filters use the database's query document syntax. Supported operators are `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists` on fields and `$and`, `$or`, `$nor`
//! at the top level. Field paths may be dotted. Any other operator is rejected.

use std::cmp::Ordering;
use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use crate::error::InMemoryError;

/// Comparable view of a BSON value.
///
/// Numeric types are normalized to f64. Values of different types order by type rank,
/// following the server's cross-type sort order.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null, undefined or a missing field
    Null,
    Number(f64),
    String(&'a str),
    Map(&'a Document),
    Array(&'a [Bson]),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Document(doc) => Comparable::Map(doc),
            Bson::Array(arr) => Comparable::Array(arr),
            Bson::ObjectId(oid) => Comparable::ObjectId(*oid),
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> From<Option<&'a Bson>> for Comparable<'a> {
    fn from(bson: Option<&'a Bson>) -> Self {
        bson.map(Comparable::from).unwrap_or(Comparable::Null)
    }
}

impl Comparable<'_> {
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
            Comparable::Other(_) => 8,
        }
    }

    /// Total order over all values.
    pub(crate) fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Ordering::Equal,
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Map(a), Comparable::Map(b)) => compare_documents(a, b),
            (Comparable::Array(a), Comparable::Array(b)) => compare_arrays(a, b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.cmp(b),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Other(a), Comparable::Other(b)) if a == b => Ordering::Equal,
            (Comparable::Other(a), Comparable::Other(b)) => a.to_string().cmp(&b.to_string()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((left_key, left), (right_key, right)) in a.iter().zip(b.iter()) {
        let ordering = left_key
            .cmp(right_key)
            .then_with(|| Comparable::from(left).compare(&Comparable::from(right)));

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (left, right) in a.iter().zip(b.iter()) {
        let ordering = Comparable::from(left).compare(&Comparable::from(right));

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.len().cmp(&b.len())
}

/// Resolves a dotted field path. Numeric segments index into arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Truthiness of flag values such as `$exists` operands and projection entries.
pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(number) => *number != 0,
        Bson::Int64(number) => *number != 0,
        Bson::Double(number) => *number != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// Returns the operator document of a field condition such as `{ "$gt": 3 }`.
pub(crate) fn operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(inner) if inner.keys().next().is_some_and(|key| key.starts_with('$')) => Some(inner),
        _ => None,
    }
}

/// Matches documents against one filter.
pub(crate) struct DocumentEvaluator<'a> {
    filter: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(filter: &'a Document) -> Self {
        Self { filter }
    }

    pub fn evaluate(&self, document: &Document) -> Result<bool, InMemoryError> {
        matches(document, self.filter)
    }

    pub fn filter_documents(
        &self,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<Vec<Document>, InMemoryError> {
        let mut matched = Vec::new();

        for document in documents {
            if self.evaluate(&document)? {
                matched.push(document);
            }
        }

        Ok(matched)
    }
}

fn matches(document: &Document, filter: &Document) -> Result<bool, InMemoryError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            },
            "$or" | "$nor" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" { any } else { !any }
            },
            operator if operator.starts_with('$') => {
                return Err(InMemoryError::UnsupportedOperator(operator.to_string()));
            },
            path => matches_field(lookup(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> Result<Vec<&'a Document>, InMemoryError> {
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| {
                item.as_document().ok_or_else(|| {
                    InMemoryError::InvalidArgument(format!("{operator} argument's entries must be objects"))
                })
            })
            .collect(),
        _ => Err(InMemoryError::InvalidArgument(format!("{operator} argument must be a non-empty array"))),
    }
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> Result<bool, InMemoryError> {
    let Some(operators) = operator_document(condition) else {
        return Ok(equals(value, condition));
    };

    for (operator, operand) in operators {
        let matched = match operator.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |ordering| ordering == Ordering::Greater),
            "$gte" => ordered(value, operand, |ordering| ordering != Ordering::Less),
            "$lt" => ordered(value, operand, |ordering| ordering == Ordering::Less),
            "$lte" => ordered(value, operand, |ordering| ordering != Ordering::Greater),
            "$in" => any_of(operator, value, operand)?,
            "$nin" => !any_of(operator, value, operand)?,
            "$exists" => value.is_some() == truthy(operand),
            other => return Err(InMemoryError::UnsupportedOperator(other.to_string())),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality with array fields matching when any element equals the expected value.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let expected = Comparable::from(expected);

    match value {
        Some(Bson::Array(items)) if !matches!(expected, Comparable::Array(_)) => items
            .iter()
            .any(|item| Comparable::from(item) == expected),
        value => Comparable::from(value) == expected,
    }
}

/// Range comparison. Values of a different type than the operand never match.
fn ordered(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);
    let check = |candidate: &Bson| {
        let candidate = Comparable::from(candidate);
        candidate.rank() == operand.rank() && accept(candidate.compare(&operand))
    };

    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn any_of(operator: &str, value: Option<&Bson>, operand: &Bson) -> Result<bool, InMemoryError> {
    match operand {
        Bson::Array(candidates) => Ok(candidates.iter().any(|candidate| equals(value, candidate))),
        _ => Err(InMemoryError::InvalidArgument(format!("{operator} needs an array"))),
    }
}

/// A parsed sort specification: field path and whether it sorts descending.
pub(crate) type SortKeys = Vec<(String, bool)>;

pub(crate) fn sort_keys(sort: &Document) -> Result<SortKeys, InMemoryError> {
    sort.iter()
        .map(|(field, direction)| {
            let descending = match direction {
                Bson::Int32(1) | Bson::Int64(1) => false,
                Bson::Int32(-1) | Bson::Int64(-1) => true,
                Bson::Double(value) if *value == 1.0 => false,
                Bson::Double(value) if *value == -1.0 => true,
                _ => {
                    return Err(InMemoryError::InvalidArgument(format!(
                        "$sort key ordering must be 1 (for ascending) or -1 (for descending), got {direction} for {field}"
                    )));
                },
            };
            Ok((field.clone(), descending))
        })
        .collect()
}

pub(crate) fn compare_by_keys(a: &Document, b: &Document, keys: &SortKeys) -> Ordering {
    for (field, descending) in keys {
        let ordering = Comparable::from(lookup(a, field)).compare(&Comparable::from(lookup(b, field)));
        let ordering = if *descending { ordering.reverse() } else { ordering };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Stable sort of `documents` by a sort specification.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) -> Result<(), InMemoryError> {
    let keys = sort_keys(sort)?;
    documents.sort_by(|a, b| compare_by_keys(a, b, &keys));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn account() -> Document {
        doc! {
            "account_id": 1,
            "limit": 10000,
            "owner": { "name": "ada", "tier": "gold" },
            "products": ["Brokerage", "InvestmentStock"],
        }
    }

    fn eval(filter: Document) -> bool {
        DocumentEvaluator::new(&filter).evaluate(&account()).unwrap()
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        assert!(eval(doc! { "account_id": 1 }));
        assert!(eval(doc! { "account_id": 1.0 }));
        assert!(eval(doc! { "owner.name": "ada" }));
        assert!(!eval(doc! { "owner.name": "bob" }));
        assert!(eval(doc! { "products": "Brokerage" }));
        assert!(eval(doc! { "missing": null }));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(eval(doc! { "limit": { "$gt": 5000, "$lte": 10000 } }));
        assert!(!eval(doc! { "limit": { "$lt": 10000 } }));
        assert!(!eval(doc! { "limit": { "$gt": "a" } }));
        assert!(eval(doc! { "account_id": { "$in": [3, 1] } }));
        assert!(eval(doc! { "account_id": { "$nin": [3, 4] } }));
        assert!(eval(doc! { "account_id": { "$ne": 2 } }));
        assert!(eval(doc! { "owner": { "$exists": true }, "missing": { "$exists": false } }));
    }

    #[test]
    fn test_logical_operators() {
        assert!(eval(doc! { "$or": [{ "account_id": 2 }, { "limit": 10000 }] }));
        assert!(!eval(doc! { "$and": [{ "account_id": 1 }, { "limit": 1 }] }));
        assert!(eval(doc! { "$nor": [{ "account_id": 2 }] }));
    }

    #[test]
    fn test_unknown_operator_is_rejected() {
        let filter = doc! { "account_id": { "$where": "true" } };

        let err = DocumentEvaluator::new(&filter).evaluate(&account()).unwrap_err();

        assert!(matches!(err, InMemoryError::UnsupportedOperator(op) if op == "$where"));
    }

    #[test]
    fn test_sort_documents() {
        let mut documents = vec![
            doc! { "account_id": 2, "limit": 10 },
            doc! { "account_id": 3 },
            doc! { "account_id": 1, "limit": 10 },
        ];

        sort_documents(&mut documents, &doc! { "limit": -1, "account_id": 1 }).unwrap();

        let ids = documents
            .iter()
            .map(|document| document.get_i32("account_id").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
