use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// A schema-tagged JSON document, used both for event payloads and for the
/// context entities attached to them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelfDescribingJson {
    pub schema: String,
    pub data: serde_json::Value,
}

impl SelfDescribingJson {
    pub fn new(schema: impl Into<String>, data: serde_json::Value) -> Self {
        SelfDescribingJson {
            schema: schema.into(),
            data,
        }
    }
}

/// Identity metadata attached to an event on behalf of the tracked user.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
pub struct Subject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// An immutable submitted event. Constructed once, never mutated; ownership
/// moves into the emitter on `track`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TypedBuilder)]
pub struct EventRecord {
    /// Schema identifier (or event-type name) the collector validates against.
    #[builder(setter(into))]
    pub schema: String,

    pub payload: serde_json::Value,

    #[builder(default)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<SelfDescribingJson>,

    #[builder(default, setter(strip_option))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Shorthand for a plain self-describing event with no contexts or subject.
    pub fn self_describing(schema: impl Into<String>, payload: serde_json::Value) -> Self {
        EventRecord::builder().schema(schema).payload(payload).build()
    }
}
