//! Aggregation stages supported by the in-memory driver:
//! `$match`, `$sort`, `$skip`, `$limit`, `$project` and `$count`.

use bson::{Bson, Document};

use crate::{
    error::InMemoryError,
    evaluator::{DocumentEvaluator, sort_documents},
    modify::project,
};

pub(crate) fn run_pipeline(
    mut documents: Vec<Document>,
    pipeline: &[Document],
) -> Result<Vec<Document>, InMemoryError> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(InMemoryError::InvalidArgument(
                "a pipeline stage specification object must contain exactly one field".to_string(),
            ));
        };

        documents = match name.as_str() {
            "$match" => DocumentEvaluator::new(stage_document(name, spec)?).filter_documents(documents)?,
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, spec)?)?;
                documents
            },
            "$skip" => documents
                .into_iter()
                .skip(stage_count(name, spec)?)
                .collect(),
            "$limit" => match stage_count(name, spec)? {
                0 => {
                    return Err(InMemoryError::InvalidArgument("the limit must be positive".to_string()));
                },
                limit => documents.into_iter().take(limit).collect(),
            },
            "$project" => {
                let projection = stage_document(name, spec)?;
                documents
                    .into_iter()
                    .map(|document| project(document, projection))
                    .collect::<Result<Vec<_>, _>>()?
            },
            "$count" => {
                let field = spec.as_str().filter(|field| !field.is_empty()).ok_or_else(|| {
                    InMemoryError::InvalidArgument("the count field must be a non-empty string".to_string())
                })?;

                if documents.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field, documents.len() as i64);
                    vec![counted]
                }
            },
            other => return Err(InMemoryError::UnsupportedOperator(other.to_string())),
        };
    }

    Ok(documents)
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> Result<&'a Document, InMemoryError> {
    spec.as_document()
        .ok_or_else(|| InMemoryError::InvalidArgument(format!("the {name} stage specification must be an object")))
}

fn stage_count(name: &str, spec: &Bson) -> Result<usize, InMemoryError> {
    let count = match spec {
        Bson::Int32(value) => i64::from(*value),
        Bson::Int64(value) => *value,
        Bson::Double(value) if value.fract() == 0.0 => *value as i64,
        _ => -1,
    };

    usize::try_from(count)
        .map_err(|_| InMemoryError::InvalidArgument(format!("invalid argument to {name} stage: {spec}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn accounts() -> Vec<Document> {
        (1..=5)
            .map(|id| doc! { "_id": id, "limit": (id * 1000), "active": (id % 2 == 1) })
            .collect()
    }

    #[test]
    fn test_match_sort_skip_limit() {
        let pipeline = vec![
            doc! { "$match": { "active": true } },
            doc! { "$sort": { "limit": -1 } },
            doc! { "$skip": 1 },
            doc! { "$limit": 1 },
            doc! { "$project": { "limit": 1, "_id": 0 } },
        ];

        let output = run_pipeline(accounts(), &pipeline).unwrap();

        assert_eq!(output, vec![doc! { "limit": 3000 }]);
    }

    #[test]
    fn test_count() {
        let output = run_pipeline(
            accounts(),
            &[doc! { "$match": { "limit": { "$gte": 2000 } } }, doc! { "$count": "total" }],
        )
        .unwrap();

        assert_eq!(output, vec![doc! { "total": 4_i64 }]);
    }

    #[test]
    fn test_unknown_stage() {
        let err = run_pipeline(accounts(), &[doc! { "$group": { "_id": null } }]).unwrap_err();

        assert!(matches!(err, InMemoryError::UnsupportedOperator(stage) if stage == "$group"));
    }
}
