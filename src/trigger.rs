//! Defines a _trigger_, the part of an S3 event record the bucket
//! handler looks at. Fields are read without assuming the envelope is
//! well formed: anything missing is just absent.

use serde_json::Value;
use tracing::instrument;

/// The fields extracted from a single S3 event record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    pub event_name: Option<String>,
    pub bucket_name: Option<String>,
    pub object_key: Option<String>,
    pub object_size: Option<u64>,
}

impl Trigger {
    /// Extracts the fields of a single event record.
    pub fn from_record(record: &Value) -> Self {
        let text = |pointer: &str| record.pointer(pointer).and_then(Value::as_str).map(String::from);
        Trigger {
            event_name: text("/eventName"),
            bucket_name: text("/s3/bucket/name"),
            object_key: text("/s3/object/key"),
            object_size: record.pointer("/s3/object/size").and_then(Value::as_u64),
        }
    }

    /// Extracts the first record of an event envelope. An envelope
    /// without records yields a trigger with every field absent.
    #[cfg(test)]
    pub fn first(event: &Value) -> Self {
        event
            .pointer("/Records/0")
            .map(Self::from_record)
            .unwrap_or_default()
    }

    /// Builds a vector of triggers from the records inside an S3
    /// event.
    #[instrument(skip_all)]
    pub fn all(event: &Value) -> Vec<Self> {
        event
            .get("Records")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(Self::from_record).collect())
            .unwrap_or_default()
    }
}
