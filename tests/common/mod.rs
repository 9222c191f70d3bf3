//! Shared fixtures for streamer integration tests

use jobstream::{IdSource, JobDirConfig, JobStreamer, LineParser};
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;
use uuid::Uuid;

/// A scratch job output directory that tests write into incrementally,
/// simulating a live producer.
pub struct JobDirFixture {
    _dir: TempDir,
    pub root: PathBuf,
}

impl JobDirFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp job dir");
        let root = dir.path().join("job");
        fs::create_dir(&root).expect("create job root");
        Self { _dir: dir, root }
    }

    /// Create or truncate a file under the job root.
    pub fn write(&self, name: &str, content: &str) {
        fs::write(self.root.join(name), content).expect("write job file");
    }

    /// Append to a file under the job root, creating it if needed.
    pub fn append(&self, name: &str, content: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(name))
            .expect("open job file for append");
        file.write_all(content.as_bytes()).expect("append job file");
    }

    /// Write an events shard for one producer thread.
    pub fn write_shard(&self, pid: &str, tid: &str, content: &str) {
        let events = self.root.join("events");
        if !events.exists() {
            fs::create_dir(&events).expect("create events dir");
        }
        fs::write(
            events.join(format!("events-{pid}~{tid}.jsonl")),
            content,
        )
        .expect("write events shard");
    }

    /// A streamer over this directory with deterministic ids and the
    /// small TAP-ish parser below.
    pub fn streamer(&self) -> JobStreamer {
        JobStreamer::new(self.config())
            .with_ids(Box::new(SeqIds::default()))
            .with_parser(Box::new(TapishParser))
    }

    pub fn config(&self) -> JobDirConfig {
        JobDirConfig::new("run-1", "job-1", &self.root).expect("valid config")
    }
}

/// Deterministic sequential id source.
#[derive(Debug, Default)]
pub struct SeqIds(u128);

impl IdSource for SeqIds {
    fn next_id(&mut self) -> Uuid {
        self.0 += 1;
        Uuid::from_u128(self.0)
    }
}

/// Stand-in for the external TAP parsers: recognizes `ok` / `not ok`
/// assertion lines, nothing else.
pub struct TapishParser;

impl LineParser for TapishParser {
    fn parse(&self, line: &str) -> Option<Value> {
        let trimmed = line.trim_start();
        let (pass, rest) = if let Some(rest) = trimmed.strip_prefix("not ok") {
            (false, rest)
        } else if let Some(rest) = trimmed.strip_prefix("ok") {
            (true, rest)
        } else {
            return None;
        };
        if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
            return None;
        }
        let details = rest
            .split_once('-')
            .map(|(_, d)| d.trim())
            .unwrap_or_else(|| rest.trim());
        Some(json!({
            "assert": {
                "pass": pass,
                "details": details,
            }
        }))
    }
}

/// Name of the facet that classifies an event, skipping `about`.
pub fn facet_kind(event: &jobstream::HarnessEvent) -> String {
    let Value::Object(map) = &event.facet_data else {
        return String::new();
    };
    map.keys()
        .find(|k| k.as_str() != "about")
        .cloned()
        .unwrap_or_default()
}

/// The `details` string of an event's `info` facet.
pub fn info_details(event: &jobstream::HarnessEvent) -> Option<&str> {
    event.facet_data["info"][0]["details"].as_str()
}

/// One serialized shard record, newline-terminated.
pub fn shard_line(pid: u64, tid: u64, stream_id: u64, facets: Value) -> String {
    let mut line = serde_json::to_string(&json!({
        "pid": pid,
        "tid": tid,
        "stream_id": stream_id,
        "facet_data": facets,
    }))
    .expect("serialize shard line");
    line.push('\n');
    line
}
