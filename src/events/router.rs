//! Structured event routing from `events/*.jsonl` shards
//!
//! Each producer thread writes its own shard named
//! `events-<pid><SEP><tid>.jsonl`. The router re-scans the directory on
//! every fill so shards appearing mid-job are picked up, tail-reads each
//! shard, and keeps one FIFO queue per `(pid, tid)`. Inline `EVENT`
//! marker payloads land in the same queues.

use crate::error::{Result, StreamError};
use crate::files::JsonlFile;
use crate::marker::Barrier;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, warn};

const SHARD_PREFIX: &str = "events-";
const SHARD_SUFFIX: &str = ".jsonl";

/// A queued structured event. Shard lines stay raw until release; inline
/// marker payloads arrive already decoded.
#[derive(Debug, Clone)]
pub enum QueuedEvent {
    Raw(String),
    Decoded(Value),
}

impl QueuedEvent {
    /// Decode into a JSON record.
    pub fn decode(self) -> Result<Value> {
        match self {
            QueuedEvent::Raw(line) => Ok(serde_json::from_str(&line)?),
            QueuedEvent::Decoded(value) => Ok(value),
        }
    }
}

#[derive(Debug)]
struct Shard {
    reader: Option<JsonlFile>,
    queue: VecDeque<QueuedEvent>,
}

impl Shard {
    fn queue_only() -> Self {
        Self {
            reader: None,
            queue: VecDeque::new(),
        }
    }
}

/// Per-`(pid, tid)` queues of structured events.
///
/// Keys are kept sorted so end-of-life draining is deterministic.
#[derive(Debug)]
pub struct EventsRouter {
    dir: PathBuf,
    sep: String,
    shards: BTreeMap<(String, String), Shard>,
}

impl EventsRouter {
    pub fn new(dir: PathBuf, sep: String) -> Self {
        Self {
            dir,
            sep,
            shards: BTreeMap::new(),
        }
    }

    /// Discover new shards and tail-read up to `max` records from each.
    ///
    /// A missing directory is normal (the job may not have produced
    /// structured events yet); a directory that exists but cannot be read
    /// is fatal for the poll.
    pub fn fill(&mut self, max: Option<usize>, producer_done: bool) -> Result<usize> {
        self.scan_shards()?;

        let mut added = 0;
        for shard in self.shards.values_mut() {
            let Some(reader) = shard.reader.as_mut() else {
                continue;
            };
            let mut taken = 0;
            while max.map_or(true, |m| taken < m) {
                match reader.read_record(producer_done)? {
                    Some(line) => {
                        shard.queue.push_back(QueuedEvent::Raw(line));
                        taken += 1;
                    }
                    None => break,
                }
            }
            added += taken;
        }
        Ok(added)
    }

    fn scan_shards(&mut self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StreamError::EventsDir {
                    path: self.dir.clone(),
                    source: e,
                })
            }
        };

        for entry in entries {
            let entry = entry.map_err(|e| StreamError::EventsDir {
                path: self.dir.clone(),
                source: e,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(key) = parse_shard_name(name, &self.sep) else {
                if name.ends_with(SHARD_SUFFIX) {
                    warn!(shard = name, "skipping events shard with unparseable name");
                }
                continue;
            };

            let shard = self
                .shards
                .entry(key.clone())
                .or_insert_with(Shard::queue_only);
            if shard.reader.is_none() {
                debug!(pid = %key.0, tid = %key.1, "events shard discovered");
                shard.reader = Some(JsonlFile::new(entry.path()));
            }
        }
        Ok(())
    }

    /// Enqueue an inline `EVENT` marker payload for its shard.
    pub fn enqueue_inline(&mut self, barrier: &Barrier, payload: Value) {
        self.shards
            .entry((barrier.pid.clone(), barrier.tid.clone()))
            .or_insert_with(Shard::queue_only)
            .queue
            .push_back(QueuedEvent::Decoded(payload));
    }

    /// `stream_id` of the queue head for a shard, decoding a raw record
    /// in place so the work is not repeated at release.
    pub fn head_stream_id(&mut self, pid: &str, tid: &str) -> Result<Option<u64>> {
        let Some(shard) = self.shards.get_mut(&(pid.to_string(), tid.to_string())) else {
            return Ok(None);
        };
        let Some(front) = shard.queue.front_mut() else {
            return Ok(None);
        };
        let stream_id = match front {
            QueuedEvent::Decoded(value) => value.get("stream_id").and_then(Value::as_u64),
            QueuedEvent::Raw(line) => {
                let value: Value = serde_json::from_str(line)?;
                let stream_id = value.get("stream_id").and_then(Value::as_u64);
                *front = QueuedEvent::Decoded(value);
                stream_id
            }
        };
        Ok(stream_id)
    }

    /// Head of the queue for a shard, if any.
    pub fn pop(&mut self, pid: &str, tid: &str) -> Option<QueuedEvent> {
        self.shards
            .get_mut(&(pid.to_string(), tid.to_string()))
            .and_then(|shard| shard.queue.pop_front())
    }

    /// Whether a shard currently has a queued event.
    pub fn has_queued(&self, pid: &str, tid: &str) -> bool {
        self.shards
            .get(&(pid.to_string(), tid.to_string()))
            .is_some_and(|shard| !shard.queue.is_empty())
    }

    /// Whether every queue is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.values().all(|shard| shard.queue.is_empty())
    }

    /// Drain every remaining queued event, shard by shard in key order,
    /// preserving per-shard FIFO order.
    pub fn drain_remaining(&mut self) -> Vec<QueuedEvent> {
        let mut out = Vec::new();
        for shard in self.shards.values_mut() {
            out.extend(shard.queue.drain(..));
        }
        out
    }
}

/// Parse `events-<pid><SEP><tid>.jsonl` into a shard key.
fn parse_shard_name(name: &str, sep: &str) -> Option<(String, String)> {
    let stem = name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)?;
    let (pid, tid) = stem.split_once(sep)?;
    if pid.is_empty() || tid.is_empty() {
        return None;
    }
    Some((pid.to_string(), tid.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn router(dir: &TempDir) -> EventsRouter {
        EventsRouter::new(dir.path().join("events"), "~".to_string())
    }

    #[test]
    fn test_parse_shard_name() {
        assert_eq!(
            parse_shard_name("events-10~20.jsonl", "~"),
            Some(("10".to_string(), "20".to_string()))
        );
        assert_eq!(parse_shard_name("events-10.jsonl", "~"), None);
        assert_eq!(parse_shard_name("other-10~20.jsonl", "~"), None);
        assert_eq!(parse_shard_name("events-10~20.txt", "~"), None);
    }

    #[test]
    fn test_missing_directory_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut router = router(&dir);
        assert_eq!(router.fill(None, false).unwrap(), 0);
        assert!(router.is_empty());
    }

    #[test]
    fn test_fills_queue_per_shard() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events");
        fs::create_dir(&events).unwrap();
        fs::write(
            events.join("events-10~20.jsonl"),
            "{\"stream_id\":1}\n{\"stream_id\":2}\n",
        )
        .unwrap();

        let mut router = router(&dir);
        assert_eq!(router.fill(None, false).unwrap(), 2);
        assert!(router.has_queued("10", "20"));

        let record = router.pop("10", "20").unwrap().decode().unwrap();
        assert_eq!(record["stream_id"], 1);
        let record = router.pop("10", "20").unwrap().decode().unwrap();
        assert_eq!(record["stream_id"], 2);
        assert!(router.pop("10", "20").is_none());
    }

    #[test]
    fn test_late_shard_is_discovered() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events");
        fs::create_dir(&events).unwrap();

        let mut router = router(&dir);
        assert_eq!(router.fill(None, false).unwrap(), 0);

        fs::write(events.join("events-1~1.jsonl"), "{\"stream_id\":1}\n").unwrap();
        assert_eq!(router.fill(None, false).unwrap(), 1);
        assert!(router.has_queued("1", "1"));
    }

    #[test]
    fn test_max_bounds_per_shard_reads() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events");
        fs::create_dir(&events).unwrap();
        fs::write(
            events.join("events-1~1.jsonl"),
            "{\"stream_id\":1}\n{\"stream_id\":2}\n{\"stream_id\":3}\n",
        )
        .unwrap();

        let mut router = router(&dir);
        assert_eq!(router.fill(Some(2), false).unwrap(), 2);
        assert_eq!(router.fill(Some(2), false).unwrap(), 1);
    }

    #[test]
    fn test_inline_events_share_the_queue() {
        let dir = TempDir::new().unwrap();
        let mut router = router(&dir);
        let barrier = Barrier {
            pid: "5".to_string(),
            tid: "6".to_string(),
            stream_id: 1,
        };
        router.enqueue_inline(&barrier, serde_json::json!({"stream_id": 1}));

        assert!(router.has_queued("5", "6"));
        let record = router.pop("5", "6").unwrap().decode().unwrap();
        assert_eq!(record["stream_id"], 1);
    }

    #[test]
    fn test_drain_remaining_orders_by_shard_key() {
        let dir = TempDir::new().unwrap();
        let mut router = router(&dir);
        for (pid, sid) in [("b", 1), ("a", 2)] {
            let barrier = Barrier {
                pid: pid.to_string(),
                tid: "0".to_string(),
                stream_id: sid,
            };
            router.enqueue_inline(&barrier, serde_json::json!({"stream_id": sid}));
        }

        let drained: Vec<_> = router
            .drain_remaining()
            .into_iter()
            .map(|e| e.decode().unwrap()["stream_id"].as_u64().unwrap())
            .collect();
        assert_eq!(drained, vec![2, 1]);
        assert!(router.is_empty());
    }

    #[test]
    fn test_partial_record_line_deferred() {
        let dir = TempDir::new().unwrap();
        let events = dir.path().join("events");
        fs::create_dir(&events).unwrap();
        let shard = events.join("events-1~1.jsonl");
        fs::write(&shard, "{\"stream_id\"").unwrap();

        let mut router = router(&dir);
        assert_eq!(router.fill(None, false).unwrap(), 0);

        fs::write(&shard, "{\"stream_id\":1}\n").unwrap();
        assert_eq!(router.fill(None, false).unwrap(), 1);
    }
}
