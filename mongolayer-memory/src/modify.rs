//! Update operators, replacements, upsert seeds and projections.

use bson::{Bson, Document};

use crate::{
    error::InMemoryError,
    evaluator::{lookup, operator_document, truthy},
};

/// Applies an update document made of `$set`, `$unset` and `$inc` to `document`.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> Result<(), InMemoryError> {
    if update.is_empty() || !update.keys().all(|key| key.starts_with('$')) {
        return Err(InMemoryError::InvalidArgument(
            "update document requires atomic operators".to_string(),
        ));
    }

    for (operator, fields) in update {
        let fields = fields.as_document().ok_or_else(|| {
            InMemoryError::InvalidArgument(format!("modifier {operator} expects a document"))
        })?;

        for (path, value) in fields {
            if path == "_id" || path.starts_with("_id.") {
                return Err(InMemoryError::InvalidArgument(format!(
                    "performing an update on the path '{path}' would modify the immutable field '_id'"
                )));
            }

            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let incremented = increment(lookup(document, path), value)?;
                    set_path(document, path, incremented)?;
                },
                other => return Err(InMemoryError::UnsupportedOperator(other.to_string())),
            }
        }
    }

    Ok(())
}

fn set_path(document: &mut Document, path: &str, value: Bson) -> Result<(), InMemoryError> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        },
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(InMemoryError::InvalidArgument(format!(
                    "cannot create field '{rest}' in element '{head}'"
                ))),
            }
        },
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        },
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                unset_path(inner, rest);
            }
        },
    }
}

fn increment(current: Option<&Bson>, by: &Bson) -> Result<Bson, InMemoryError> {
    let current = current.cloned().unwrap_or(Bson::Int32(0));

    Ok(match (&current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            match integer(&current).checked_add(integer(by)) {
                Some(sum) => Bson::Int64(sum),
                None => {
                    return Err(InMemoryError::InvalidArgument(format!(
                        "$inc would overflow a 64-bit integer ({current} by {by})"
                    )));
                },
            }
        },
        (
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_),
        ) => Bson::Double(float(&current) + float(by)),
        _ => {
            return Err(InMemoryError::InvalidArgument(format!(
                "cannot apply $inc to a value of non-numeric type ({current} by {by})"
            )));
        },
    })
}

fn integer(value: &Bson) -> i64 {
    match value {
        Bson::Int32(number) => i64::from(*number),
        Bson::Int64(number) => *number,
        _ => 0,
    }
}

fn float(value: &Bson) -> f64 {
    match value {
        Bson::Int32(number) => f64::from(*number),
        Bson::Int64(number) => *number as f64,
        Bson::Double(number) => *number,
        _ => 0.0,
    }
}

/// Builds the document that replaces `current`, keeping its `_id`.
pub(crate) fn replace(id: Option<&Bson>, replacement: &Document) -> Result<Document, InMemoryError> {
    if let Some(key) = replacement.keys().find(|key| key.starts_with('$')) {
        return Err(InMemoryError::InvalidArgument(format!(
            "replacement document must not contain update operators, found {key}"
        )));
    }

    let Some(id) = id else {
        return Ok(replacement.clone());
    };

    if replacement.get("_id").is_some_and(|given| given != id) {
        return Err(InMemoryError::InvalidArgument(
            "the (immutable) field '_id' was found to have been altered".to_string(),
        ));
    }

    let mut replaced = Document::new();
    replaced.insert("_id", id.clone());
    for (key, value) in replacement {
        if key != "_id" {
            replaced.insert(key.clone(), value.clone());
        }
    }

    Ok(replaced)
}

/// Equality conditions of `filter`, used as the base document of an upsert.
pub(crate) fn upsert_seed(filter: &Document) -> Result<Document, InMemoryError> {
    let mut seed = Document::new();

    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }

        let value = match operator_document(condition) {
            Some(operators) => match operators.get("$eq") {
                Some(value) => value.clone(),
                None => continue,
            },
            None => condition.clone(),
        };

        set_path(&mut seed, key, value)?;
    }

    Ok(seed)
}

/// Applies an inclusion or exclusion projection.
pub(crate) fn project(document: Document, projection: &Document) -> Result<Document, InMemoryError> {
    let mut include_id = true;
    let mut inclusion: Option<bool> = None;

    for (field, flag) in projection {
        let flag = truthy(flag);

        if field == "_id" {
            include_id = flag;
            continue;
        }

        match inclusion {
            None => inclusion = Some(flag),
            Some(mode) if mode != flag => {
                return Err(InMemoryError::InvalidArgument(
                    "cannot mix inclusion and exclusion in a projection".to_string(),
                ));
            },
            Some(_) => {},
        }
    }

    if inclusion == Some(true) {
        let mut projected = Document::new();

        if include_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (field, flag) in projection {
            if field != "_id" && truthy(flag) {
                if let Some(value) = lookup(&document, field) {
                    set_path(&mut projected, field, value.clone())?;
                }
            }
        }

        return Ok(projected);
    }

    let mut projected = document;
    for (field, flag) in projection {
        if field != "_id" && !truthy(flag) {
            unset_path(&mut projected, field);
        }
    }
    if !include_id {
        projected.remove("_id");
    }

    Ok(projected)
}
