//! Slow-operation observability and per-call deadlines.
//!
//! A [`QueryObserver`] is handed to a typed collection when it is built. The collection reads
//! the timeout budget from it for every call outside a transaction and reports any call whose
//! wall-clock time reaches the threshold of its [`OperationClass`]. Reporting never changes the
//! outcome of the call.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::warn;

/// Groups operations that share a slow threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Calls that touch at most one document.
    Single,
    /// Calls that may touch many documents.
    Many,
    Bulk,
    Aggregation,
}

/// Every collection operation, named as it appears in slow-operation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FindOne,
    FindAll,
    FindOneAndUpdate,
    FindOneAndReplace,
    FindOneAndDelete,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    ReplaceOne,
    DeleteOne,
    DeleteMany,
    CountDocuments,
    EstimatedDocumentCount,
    BulkWrite,
    Aggregate,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::FindOne => "findOne",
            Operation::FindAll => "findAll",
            Operation::FindOneAndUpdate => "findOneAndUpdate",
            Operation::FindOneAndReplace => "findOneAndReplace",
            Operation::FindOneAndDelete => "findOneAndDelete",
            Operation::InsertOne => "insertOne",
            Operation::InsertMany => "insertMany",
            Operation::UpdateOne => "updateOne",
            Operation::UpdateMany => "updateMany",
            Operation::ReplaceOne => "replaceOne",
            Operation::DeleteOne => "deleteOne",
            Operation::DeleteMany => "deleteMany",
            Operation::CountDocuments => "countDocuments",
            Operation::EstimatedDocumentCount => "estimatedDocumentCount",
            Operation::BulkWrite => "bulkWrite",
            Operation::Aggregate => "aggregate",
        }
    }

    pub fn class(self) -> OperationClass {
        match self {
            Operation::FindOne
            | Operation::FindOneAndUpdate
            | Operation::FindOneAndReplace
            | Operation::FindOneAndDelete
            | Operation::InsertOne
            | Operation::UpdateOne
            | Operation::ReplaceOne
            | Operation::DeleteOne => OperationClass::Single,
            Operation::FindAll
            | Operation::InsertMany
            | Operation::UpdateMany
            | Operation::DeleteMany
            | Operation::CountDocuments
            | Operation::EstimatedDocumentCount => OperationClass::Many,
            Operation::BulkWrite => OperationClass::Bulk,
            Operation::Aggregate => OperationClass::Aggregation,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Receives slow-operation reports and supplies deadlines and thresholds.
///
/// Implementations are shared by every call of a collection and must be cheap to query.
pub trait QueryObserver: Send + Sync + fmt::Debug {
    /// Called with a formatted diagnostic when a call reached its class threshold.
    fn slow_operation(&self, message: &str);

    /// Deadline applied to every call that does not run inside a transaction.
    fn timeout_budget(&self) -> Duration;

    fn slow_threshold(&self, class: OperationClass) -> Duration;
}

/// Deadline and thresholds, in milliseconds.
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub timeout_budget_ms: u64,
    pub single_threshold_ms: u64,
    pub many_threshold_ms: u64,
    pub bulk_threshold_ms: u64,
    pub aggregation_threshold_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            timeout_budget_ms: 10_000,
            single_threshold_ms: 1_000,
            many_threshold_ms: 2_000,
            bulk_threshold_ms: 3_000,
            aggregation_threshold_ms: 10_000,
        }
    }
}

impl ObserverConfig {
    pub fn timeout_budget(&self) -> Duration {
        Duration::from_millis(self.timeout_budget_ms)
    }

    pub fn threshold(&self, class: OperationClass) -> Duration {
        Duration::from_millis(match class {
            OperationClass::Single => self.single_threshold_ms,
            OperationClass::Many => self.many_threshold_ms,
            OperationClass::Bulk => self.bulk_threshold_ms,
            OperationClass::Aggregation => self.aggregation_threshold_ms,
        })
    }
}

/// Default observer: reports slow operations as `tracing` warnings.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    config: ObserverConfig,
}

impl TracingObserver {
    pub fn new(config: ObserverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }
}

impl QueryObserver for TracingObserver {
    fn slow_operation(&self, message: &str) {
        warn!(target: "mongolayer::slow_query", "{message}");
    }

    fn timeout_budget(&self) -> Duration {
        self.config.timeout_budget()
    }

    fn slow_threshold(&self, class: OperationClass) -> Duration {
        self.config.threshold(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let observer = TracingObserver::default();

        assert_eq!(observer.timeout_budget(), Duration::from_secs(10));
        assert_eq!(observer.slow_threshold(OperationClass::Single), Duration::from_secs(1));
        assert_eq!(observer.slow_threshold(OperationClass::Many), Duration::from_secs(2));
        assert_eq!(observer.slow_threshold(OperationClass::Bulk), Duration::from_secs(3));
        assert_eq!(observer.slow_threshold(OperationClass::Aggregation), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ObserverConfig =
            serde_json::from_str(r#"{ "timeout_budget_ms": 2500, "bulk_threshold_ms": 50 }"#).unwrap();

        assert_eq!(config.timeout_budget(), Duration::from_millis(2500));
        assert_eq!(config.threshold(OperationClass::Bulk), Duration::from_millis(50));
        assert_eq!(config.threshold(OperationClass::Single), Duration::from_secs(1));
    }

    #[test]
    fn test_operation_classes() {
        assert_eq!(Operation::FindOne.class(), OperationClass::Single);
        assert_eq!(Operation::ReplaceOne.class(), OperationClass::Single);
        assert_eq!(Operation::FindAll.class(), OperationClass::Many);
        assert_eq!(Operation::EstimatedDocumentCount.class(), OperationClass::Many);
        assert_eq!(Operation::BulkWrite.class(), OperationClass::Bulk);
        assert_eq!(Operation::Aggregate.class(), OperationClass::Aggregation);
        assert_eq!(Operation::UpdateMany.to_string(), "updateMany");
    }
}
