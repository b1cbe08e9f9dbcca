use crate::event::EventRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Schema URI stamped on every batch envelope sent to the collector.
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-4";

/// A closed group of records awaiting delivery. Owned by exactly one delivery
/// worker from dequeue until a terminal outcome.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: Uuid,
    pub records: Vec<EventRecord>,
    pub assembled_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Batch {
            id: Uuid::new_v4(),
            records,
            assembled_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wire envelope: a self-describing JSON array POST, record order intact.
    pub fn to_payload(&self) -> BatchPayload<'_> {
        BatchPayload {
            schema: PAYLOAD_DATA_SCHEMA,
            data: &self.records,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct BatchPayload<'a> {
    pub schema: &'static str,
    pub data: &'a [EventRecord],
}
