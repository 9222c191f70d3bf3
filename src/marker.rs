//! Inline harness marker recognition
//!
//! The producing process embeds synchronization markers inside its stdout
//! and stderr streams:
//!
//! ```text
//! T2-HARNESS-ESYNC: <pid><SEP><tid><SEP><stream_id>
//! T2-HARNESS-EVENT: <json-object>
//! ```
//!
//! A single output line may carry leading free-form text, the marker, and
//! trailing text that belongs to the next logical line. Scanning splits
//! the line into those three parts; the caller decides what to do with
//! each residue.

use crate::error::{Result, StreamError};
use serde_json::Value;

const MARKER_PREFIX: &str = "T2-HARNESS-";
const ESYNC: &str = "ESYNC";
const EVENT: &str = "EVENT";

/// Synchronization point naming the next structured event on a shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Barrier {
    pub pid: String,
    pub tid: String,
    pub stream_id: u64,
}

/// A recognized marker, with its payload when it carries one inline.
#[derive(Debug, Clone)]
pub enum Marker {
    /// Barrier referencing an event shipped via `events/*.jsonl`
    Esync(Barrier),
    /// Barrier carrying the structured event inline
    Event { barrier: Barrier, payload: Value },
}

impl Marker {
    pub fn barrier(&self) -> &Barrier {
        match self {
            Marker::Esync(b) => b,
            Marker::Event { barrier, .. } => barrier,
        }
    }
}

/// Result of splitting one raw line around a marker.
#[derive(Debug)]
pub struct MarkerSplit {
    /// Free-form text preceding the marker, verbatim
    pub before: Option<String>,
    pub marker: Marker,
    /// Trailing text belonging to the next logical line
    pub after: Option<String>,
}

/// Normalize a JSON `pid`/`tid` value to the string form used in shard
/// file names, so `{"pid": 10}` and `events-10~20.jsonl` agree.
pub(crate) fn shard_key(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Scan a (newline-stripped) line for an inline harness marker.
///
/// Returns `Ok(None)` for plain text. A line that contains the marker
/// prefix followed by an unrecognized type is a fatal
/// [`StreamError::UnknownMarker`]; a recognized marker with an
/// undecodable payload is a fatal [`StreamError::MalformedMarker`].
pub fn scan_line(line: &str, sep: &str) -> Result<Option<MarkerSplit>> {
    let Some(idx) = line.find(MARKER_PREFIX) else {
        return Ok(None);
    };

    let rest = &line[idx + MARKER_PREFIX.len()..];
    let Some(colon) = rest.find(':') else {
        return Ok(None);
    };
    let kind = &rest[..colon];
    if kind.is_empty() || kind.contains(char::is_whitespace) {
        return Ok(None);
    }

    let before = &line[..idx];
    let before = (!before.is_empty()).then(|| before.to_string());
    let payload = rest[colon + 1..].trim_start();

    let (marker, after) = match kind {
        ESYNC => parse_esync(payload, sep)?,
        EVENT => parse_event(payload)?,
        other => return Err(StreamError::UnknownMarker(other.to_string())),
    };

    Ok(Some(MarkerSplit {
        before,
        marker,
        after,
    }))
}

/// ESYNC payload: the next whitespace-delimited token, split on the IPC
/// separator into `(pid, tid, stream_id)`.
fn parse_esync(payload: &str, sep: &str) -> Result<(Marker, Option<String>)> {
    let end = payload
        .find(char::is_whitespace)
        .unwrap_or(payload.len());
    let token = &payload[..end];
    let after = payload[end..].trim_start();
    let after = (!after.is_empty()).then(|| after.to_string());

    let parts: Vec<&str> = token.split(sep).collect();
    if parts.len() != 3 {
        return Err(StreamError::MalformedMarker(format!(
            "ESYNC payload {token:?} does not split into pid{sep}tid{sep}stream_id"
        )));
    }
    let stream_id = parts[2].parse::<u64>().map_err(|_| {
        StreamError::MalformedMarker(format!(
            "ESYNC stream_id {:?} is not an unsigned integer",
            parts[2]
        ))
    })?;

    let barrier = Barrier {
        pid: parts[0].to_string(),
        tid: parts[1].to_string(),
        stream_id,
    };
    Ok((Marker::Esync(barrier), after))
}

/// EVENT payload: one JSON object parsed incrementally so trailing residue
/// can be recovered by byte offset.
fn parse_event(payload: &str) -> Result<(Marker, Option<String>)> {
    let mut stream = serde_json::Deserializer::from_str(payload).into_iter::<Value>();
    let value = match stream.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(e.into()),
        None => {
            return Err(StreamError::MalformedMarker(
                "EVENT marker with empty payload".to_string(),
            ))
        }
    };
    let after = payload[stream.byte_offset()..].trim_start();
    let after = (!after.is_empty()).then(|| after.to_string());

    let barrier = barrier_from_payload(&value)?;
    Ok((
        Marker::Event {
            barrier,
            payload: value,
        },
        after,
    ))
}

fn barrier_from_payload(value: &Value) -> Result<Barrier> {
    let missing = |field: &str| {
        StreamError::MalformedMarker(format!("EVENT payload missing usable {field:?} field"))
    };
    let pid = value
        .get("pid")
        .and_then(shard_key)
        .ok_or_else(|| missing("pid"))?;
    let tid = value
        .get("tid")
        .and_then(shard_key)
        .ok_or_else(|| missing("tid"))?;
    let stream_id = value
        .get("stream_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| missing("stream_id"))?;
    Ok(Barrier {
        pid,
        tid,
        stream_id,
    })
}
