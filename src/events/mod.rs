//! Harness event model and emission plumbing
//!
//! Everything the streamer returns is a [`HarnessEvent`]: an envelope of
//! `event_id`, job identity and an optional stamp around an opaque
//! `facet_data` payload. The only part of the payload this crate
//! interprets is `about.uuid`, which must equal the envelope id.

mod router;

pub use router::{EventsRouter, QueuedEvent};

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use tracing::warn;
use uuid::Uuid;

/// One fully resolved event, ready for a downstream reporter.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessEvent {
    pub event_id: Uuid,
    pub job_id: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<f64>,
    pub facet_data: Value,
}

impl HarnessEvent {
    /// Access a facet of the payload by name.
    pub fn facet(&self, name: &str) -> Option<&Value> {
        self.facet_data.get(name)
    }

    /// Whether the payload carries the named facet.
    pub fn has_facet(&self, name: &str) -> bool {
        self.facet(name).is_some()
    }
}

/// Source of event identifiers.
///
/// The default is random v4 UUIDs; tests inject a sequential source so
/// emitted ids are predictable.
pub trait IdSource {
    fn next_id(&mut self) -> Uuid;
}

/// Default [`IdSource`] backed by `Uuid::new_v4`.
#[derive(Debug, Default)]
pub struct UuidSource;

impl IdSource for UuidSource {
    fn next_id(&mut self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Seam for the external TAP line parsers.
///
/// A parser maps one output line to facet data, or `None` when the line
/// is not recognized; unrecognized lines become plain `info` events.
pub trait LineParser {
    fn parse(&self, line: &str) -> Option<Value>;
}

/// Parser that recognizes nothing; every line becomes an `info` event.
#[derive(Debug, Default)]
pub struct NoParser;

impl LineParser for NoParser {
    fn parse(&self, _line: &str) -> Option<Value> {
        None
    }
}

/// Destination for finished events, with stamp carry-forward.
///
/// Borrows the streamer's identity, id source, last-stamp slot and ready
/// buffer so the pollers can emit without owning any of them.
pub struct EmitSink<'a> {
    pub job_id: &'a str,
    pub run_id: &'a str,
    pub last_stamp: &'a mut Option<f64>,
    pub ids: &'a mut dyn IdSource,
    pub ready: &'a mut VecDeque<HarnessEvent>,
}

impl EmitSink<'_> {
    /// Finalize facet data into an event and append it to the ready buffer.
    ///
    /// Ensures `facet_data.about.uuid` exists and mirrors it as the
    /// envelope id. A stamp on the record updates the carried `last_stamp`;
    /// a record without one inherits it.
    pub fn push_facets(&mut self, facet_data: Value, stamp: Option<f64>) {
        let mut facet_data = match facet_data {
            Value::Object(map) => map,
            other => {
                // Facet payloads are objects by contract; wrap anything else
                // so downstream consumers still see a uniform shape.
                let mut map = Map::new();
                map.insert("info".to_string(), other);
                map
            }
        };

        let event_id = ensure_about_uuid(&mut facet_data, self.ids);

        if stamp.is_some() {
            *self.last_stamp = stamp;
        }

        self.ready.push_back(HarnessEvent {
            event_id,
            job_id: self.job_id.to_string(),
            run_id: self.run_id.to_string(),
            stamp: stamp.or(*self.last_stamp),
            facet_data: Value::Object(facet_data),
        });
    }

    /// Append a structured event record (a decoded JSONL line or inline
    /// EVENT payload). The record's `facet_data` becomes the payload; a
    /// top-level `stamp` rides the envelope.
    pub fn push_record(&mut self, record: Value) {
        let (facet_data, stamp) = split_record(record);
        self.push_facets(facet_data, stamp);
    }
}

/// Pull `facet_data` and `stamp` out of a structured event record.
fn split_record(record: Value) -> (Value, Option<f64>) {
    match record {
        Value::Object(mut map) => {
            let stamp = map.get("stamp").and_then(Value::as_f64);
            let facet_data = map
                .remove("facet_data")
                .unwrap_or_else(|| Value::Object(map));
            (facet_data, stamp)
        }
        other => (other, None),
    }
}

/// Guarantee `about.uuid` on the payload, returning the envelope id.
fn ensure_about_uuid(facet_data: &mut Map<String, Value>, ids: &mut dyn IdSource) -> Uuid {
    let about = facet_data
        .entry("about")
        .or_insert_with(|| json!({}));
    if !about.is_object() {
        warn!("facet_data.about is not an object; replacing");
        *about = json!({});
    }

    if let Some(existing) = about.get("uuid").and_then(Value::as_str) {
        if let Ok(id) = Uuid::parse_str(existing) {
            return id;
        }
        warn!(uuid = existing, "facet_data.about.uuid is not a valid UUID; regenerating");
    }

    let id = ids.next_id();
    if let Some(about) = about.as_object_mut() {
        about.insert("uuid".to_string(), json!(id.to_string()));
    }
    id
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::IdSource;
    use uuid::Uuid;

    /// Deterministic sequential id source for unit tests.
    #[derive(Debug, Default)]
    pub struct SeqIds(pub u128);

    impl IdSource for SeqIds {
        fn next_id(&mut self) -> Uuid {
            self.0 += 1;
            Uuid::from_u128(self.0)
        }
    }
}
