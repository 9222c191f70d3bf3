//! The job directory streamer
//!
//! Ties the pieces together: lifecycle gating on the `start` and `exit`
//! value files, buffer filling from the tailed streams and event shards,
//! the ESYNC release bottleneck between the two text streams, and the
//! `poll` API the outer harness drives.
//!
//! A streamer is single-threaded and cooperative. `poll` never blocks;
//! when no forward progress is possible it returns an empty batch and the
//! caller schedules the next poll. One job is one streamer instance.

use crate::config::JobDirConfig;
use crate::error::{Result, StreamError};
use crate::events::{
    EmitSink, EventsRouter, HarnessEvent, IdSource, LineParser, NoParser, UuidSource,
};
use crate::files::{events_dir, JobFile, ValueFile};
use crate::marker::shard_key;
use crate::stream::{flush_comments, poll_stream, StreamPoll, StreamSource, StreamState};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tracing::{debug, error, warn};

/// Parsed content of the `exit` value file: `"<exit_code> <stamp>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitValue {
    pub code: i32,
    pub stamp: Option<f64>,
}

impl ExitValue {
    /// Parse an exit value. The code may be negative; the stamp may be
    /// absent. An unparseable code is treated as `-1`.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split_whitespace();
        let code = match parts.next().map(str::parse::<i32>) {
            Some(Ok(code)) => code,
            _ => {
                warn!(value, "unparseable exit code, treating as -1");
                -1
            }
        };
        let stamp = parts.next().and_then(|t| t.parse::<f64>().ok());
        Self { code, stamp }
    }
}

/// Lifecycle phase of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    /// `start` has not appeared; nothing may be emitted
    PreStart,
    /// Streams and structured events flow
    Running,
    /// Exit observed; draining residue, then the exit event
    Finishing,
    /// Exit event emitted and returned; every poll is empty
    Done,
}

/// Release bookkeeping key: `(tid, pid, stream_id)`.
type SeenKey = (String, String, u64);

struct Release {
    popped: bool,
    emitted: usize,
}

impl Release {
    fn none() -> Self {
        Self {
            popped: false,
            emitted: 0,
        }
    }
}

/// Streams one job output directory as ordered harness events.
pub struct JobStreamer {
    config: JobDirConfig,
    phase: JobPhase,
    start: ValueFile,
    exit: ValueFile,
    file: ValueFile,
    stdout: StreamState,
    stderr: StreamState,
    events: EventsRouter,
    ready: VecDeque<HarnessEvent>,
    seen: HashSet<SeenKey>,
    last_stamp: Option<f64>,
    runner_exited: bool,
    exit_value: Option<ExitValue>,
    exit_emitted: bool,
    parser: Box<dyn LineParser>,
    ids: Box<dyn IdSource>,
}

impl JobStreamer {
    /// Create a streamer over a job directory. Files are opened lazily;
    /// nothing needs to exist yet.
    pub fn new(config: JobDirConfig) -> Self {
        let root = config.job_root.clone();
        let events = EventsRouter::new(events_dir(&root), config.sep.clone());
        Self {
            start: ValueFile::new(JobFile::Start.path(&root)),
            exit: ValueFile::new(JobFile::Exit.path(&root)),
            file: ValueFile::new(JobFile::File.path(&root)),
            stdout: StreamState::new(StreamSource::Stdout, &root),
            stderr: StreamState::new(StreamSource::Stderr, &root),
            events,
            ready: VecDeque::new(),
            seen: HashSet::new(),
            last_stamp: None,
            phase: JobPhase::PreStart,
            runner_exited: false,
            exit_value: None,
            exit_emitted: false,
            parser: Box::new(NoParser),
            ids: Box::new(UuidSource),
            config,
        }
    }

    /// Install the external TAP line parser.
    pub fn with_parser(mut self, parser: Box<dyn LineParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Install an event id source (tests use a deterministic one).
    pub fn with_ids(mut self, ids: Box<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Flag that the outer runner died. If the `exit` file never appears,
    /// the job is finished with a synthetic exit code of `-1`.
    pub fn set_runner_exited(&mut self, exited: bool) {
        self.runner_exited = exited;
    }

    /// Whether the exit event has been emitted and returned.
    pub fn is_done(&self) -> bool {
        self.phase == JobPhase::Done
    }

    /// Produce the next batch of harness events.
    ///
    /// At most `max` events are returned (`None` or `Some(0)` means
    /// unbounded). The first event of a job is always `harness_job_start`
    /// and the last is `harness_job_exit`; an empty batch means no
    /// forward progress was possible this poll.
    pub fn poll(&mut self, max: Option<usize>) -> Result<Vec<HarnessEvent>> {
        let max = max.filter(|m| *m > 0);
        if self.phase == JobPhase::Done {
            return Ok(Vec::new());
        }

        self.fill_buffers(max)?;

        if matches!(self.phase, JobPhase::Running | JobPhase::Finishing) {
            self.poll_streams(max)?;
        }
        if self.phase == JobPhase::Finishing {
            self.terminal_flush()?;
            self.push_exit_event();
        }

        let take = max.map_or(self.ready.len(), |m| m.min(self.ready.len()));
        let batch: Vec<HarnessEvent> = self.ready.drain(..take).collect();

        if self.exit_emitted && self.ready.is_empty() {
            debug!(job_id = %self.config.job_id, "job stream complete");
            self.phase = JobPhase::Done;
        }
        Ok(batch)
    }

    /// Poll unbounded until done or no forward progress remains.
    pub fn drain(&mut self) -> Result<Vec<HarnessEvent>> {
        let mut out = Vec::new();
        loop {
            let batch = self.poll(None)?;
            if batch.is_empty() {
                break;
            }
            out.extend(batch);
        }
        Ok(out)
    }

    /// Whether the producer is known to have stopped writing.
    fn producer_done(&mut self) -> bool {
        self.runner_exited || self.exit_value.is_some() || self.exit.exists()
    }

    fn buffers_quiet(&self) -> bool {
        self.stdout.buffer.is_empty() && self.stderr.buffer.is_empty() && self.events.is_empty()
    }

    /// Gate and fill: nothing happens before `start`; `exit` is only
    /// looked for once every buffer has gone quiet.
    fn fill_buffers(&mut self, max: Option<usize>) -> Result<()> {
        if self.phase == JobPhase::Done {
            return Ok(());
        }
        if self.phase == JobPhase::PreStart {
            if !self.start.exists() {
                return Ok(());
            }
            let done_hint = self.runner_exited || self.exit.exists();
            let Some(value) = self.start.read_line(done_hint)? else {
                return Ok(());
            };
            let stamp = value.trim().parse::<f64>().ok();
            debug!(job_id = %self.config.job_id, ?stamp, "job start observed");
            self.phase = JobPhase::Running;
            self.push_start_event(stamp)?;
        }

        let producer_done = self.producer_done();
        self.stdout.fill(max, producer_done)?;
        self.stderr.fill(max, producer_done)?;
        self.events.fill(max, producer_done)?;

        if self.phase == JobPhase::Running && self.buffers_quiet() {
            if self.exit.exists() {
                if let Some(value) = self.exit.read_line(self.runner_exited)? {
                    self.observe_exit(ExitValue::parse(&value))?;
                }
            } else if self.runner_exited {
                // The runner died and the producer never wrote its exit.
                self.observe_exit(ExitValue::parse("-1"))?;
            }
        }
        Ok(())
    }

    fn observe_exit(&mut self, value: ExitValue) -> Result<()> {
        debug!(job_id = %self.config.job_id, code = value.code, "job exit observed");
        self.exit_value = Some(value);
        self.phase = JobPhase::Finishing;
        // One unbounded fill to race-proof writes that landed just
        // before the exit file.
        self.stdout.fill(None, true)?;
        self.stderr.fill(None, true)?;
        self.events.fill(None, true)?;
        Ok(())
    }

    /// Drive both stream pollers and run the ESYNC release bottleneck.
    ///
    /// A structured event is released only once both stdout and stderr
    /// have reached its barrier; the seen set keeps the second stream's
    /// barrier from releasing it again.
    fn poll_streams(&mut self, max: Option<usize>) -> Result<usize> {
        let Self {
            config,
            stdout,
            stderr,
            events,
            ready,
            seen,
            last_stamp,
            parser,
            ids,
            ..
        } = self;
        let mut sink = EmitSink {
            job_id: &config.job_id,
            run_id: &config.run_id,
            last_stamp,
            ids: ids.as_mut(),
            ready,
        };
        let parser = parser.as_ref();
        let sep = config.sep.as_str();

        let mut added = 0;
        loop {
            if max.is_some_and(|m| added >= m) {
                break;
            }
            let (out_added, out_stop) = poll_stream(
                stdout,
                events,
                &mut sink,
                parser,
                sep,
                remaining(max, added),
            )?;
            added += out_added;
            let (err_added, err_stop) = poll_stream(
                stderr,
                events,
                &mut sink,
                parser,
                sep,
                remaining(max, added),
            )?;
            added += err_added;

            if out_stop == StreamPoll::Barrier && err_stop == StreamPoll::Barrier {
                let out_rel = release_barrier(stdout, events, seen, &mut sink)?;
                let err_rel = release_barrier(stderr, events, seen, &mut sink)?;
                added += out_rel.emitted + err_rel.emitted;
                if out_rel.popped || err_rel.popped {
                    continue;
                }
                // Both barriers are waiting on shard writes that have not
                // landed yet; retry on a later poll.
                break;
            }
            if out_added == 0 && err_added == 0 {
                break;
            }
        }
        Ok(added)
    }

    /// End-of-life flush: barriers release single-sided, residual comment
    /// groups close, and whatever is left in the event queues drains in
    /// shard order.
    fn terminal_flush(&mut self) -> Result<()> {
        let Self {
            config,
            stdout,
            stderr,
            events,
            ready,
            seen,
            last_stamp,
            parser,
            ids,
            ..
        } = self;
        let mut sink = EmitSink {
            job_id: &config.job_id,
            run_id: &config.run_id,
            last_stamp,
            ids: ids.as_mut(),
            ready,
        };
        let parser = parser.as_ref();
        let sep = config.sep.as_str();

        loop {
            let (out_added, _) = poll_stream(stdout, events, &mut sink, parser, sep, None)?;
            let (err_added, _) = poll_stream(stderr, events, &mut sink, parser, sep, None)?;
            let mut progress = out_added + err_added > 0;
            progress |= release_barrier_at_exit(stdout, events, seen, &mut sink)?;
            progress |= release_barrier_at_exit(stderr, events, seen, &mut sink)?;
            if !progress {
                break;
            }
        }

        flush_comments(stdout, &mut sink);
        flush_comments(stderr, &mut sink);

        for queued in events.drain_remaining() {
            let record = queued.decode()?;
            if let Some(key) = record_key(&record) {
                if !seen.insert(key) {
                    continue;
                }
            }
            sink.push_record(record);
        }
        Ok(())
    }

    fn push_start_event(&mut self, stamp: Option<f64>) -> Result<()> {
        let file_value = self
            .file
            .read_line(true)?
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let (rel_file, abs_file) = file_forms(&file_value);

        let facets = json!({
            "about": {
                "details": format!("Job {} started", self.config.job_id),
            },
            "harness_job_start": {
                "details": format!(
                    "Job {} started, running {}",
                    self.config.job_id, file_value
                ),
                "job_id": self.config.job_id,
                "file": file_value,
                "rel_file": rel_file,
                "abs_file": abs_file,
                "stamp": stamp,
            },
        });

        let Self {
            config,
            ready,
            last_stamp,
            ids,
            ..
        } = self;
        let mut sink = EmitSink {
            job_id: &config.job_id,
            run_id: &config.run_id,
            last_stamp,
            ids: ids.as_mut(),
            ready,
        };
        sink.push_facets(facets, stamp);
        Ok(())
    }

    fn push_exit_event(&mut self) {
        if self.exit_emitted {
            return;
        }
        let Some(exit) = self.exit_value.clone() else {
            return;
        };
        // Best-effort wholesale capture for downstream consumers; null
        // when unreadable.
        let stdout_text = self.stdout.file.read_all();
        let stderr_text = self.stderr.file.read_all();

        let facets = json!({
            "about": {
                "details": format!(
                    "Job {} exited with code {}",
                    self.config.job_id, exit.code
                ),
            },
            "harness_job_exit": {
                "details": format!(
                    "Job {} exited with code {}",
                    self.config.job_id, exit.code
                ),
                "job_id": self.config.job_id,
                "exit": exit.code,
                "stamp": exit.stamp,
                "stdout": stdout_text,
                "stderr": stderr_text,
            },
        });

        let Self {
            config,
            ready,
            last_stamp,
            ids,
            ..
        } = self;
        let mut sink = EmitSink {
            job_id: &config.job_id,
            run_id: &config.run_id,
            last_stamp,
            ids: ids.as_mut(),
            ready,
        };
        sink.push_facets(facets, exit.stamp);
        self.exit_emitted = true;
    }
}

fn remaining(max: Option<usize>, added: usize) -> Option<usize> {
    max.map(|m| m.saturating_sub(added))
}

/// Release the structured event named by a stream's head barrier.
///
/// No-op when the head is not a barrier. A barrier whose event has not
/// arrived in the queue stays put. A queue head whose `stream_id` does
/// not match the barrier is a fatal ordering violation.
fn release_barrier(
    stream: &mut StreamState,
    events: &mut EventsRouter,
    seen: &mut HashSet<SeenKey>,
    sink: &mut EmitSink<'_>,
) -> Result<Release> {
    let Some(barrier) = stream.head_barrier().cloned() else {
        return Ok(Release::none());
    };
    let key = (barrier.tid.clone(), barrier.pid.clone(), barrier.stream_id);
    if seen.contains(&key) {
        // The other stream already released this event. When the marker
        // carried the payload inline on both streams, the duplicate copy
        // is still at the queue head; stream ids are dense per shard, so
        // a matching head can only be that duplicate.
        if events.head_stream_id(&barrier.pid, &barrier.tid)? == Some(barrier.stream_id) {
            events.pop(&barrier.pid, &barrier.tid);
        }
        stream.buffer.pop_front();
        return Ok(Release {
            popped: true,
            emitted: 0,
        });
    }
    let Some(queued) = events.pop(&barrier.pid, &barrier.tid) else {
        return Ok(Release::none());
    };
    let record = queued.decode()?;
    let found = record.get("stream_id").and_then(Value::as_u64);
    if found != Some(barrier.stream_id) {
        error!(
            pid = %barrier.pid,
            tid = %barrier.tid,
            expected = barrier.stream_id,
            ?found,
            "structured event out of order"
        );
        return Err(StreamError::OrderingViolation {
            pid: barrier.pid,
            tid: barrier.tid,
            expected: barrier.stream_id,
            found: found.map_or_else(|| "none".to_string(), |v| v.to_string()),
        });
    }
    seen.insert(key);
    sink.push_record(record);
    stream.buffer.pop_front();
    Ok(Release {
        popped: true,
        emitted: 1,
    })
}

/// Like [`release_barrier`], but at end of life a barrier whose event
/// never arrived is discarded instead of waited on.
fn release_barrier_at_exit(
    stream: &mut StreamState,
    events: &mut EventsRouter,
    seen: &mut HashSet<SeenKey>,
    sink: &mut EmitSink<'_>,
) -> Result<bool> {
    let Some(barrier) = stream.head_barrier().cloned() else {
        return Ok(false);
    };
    if events.has_queued(&barrier.pid, &barrier.tid)
        || seen.contains(&(barrier.tid.clone(), barrier.pid.clone(), barrier.stream_id))
    {
        return release_barrier(stream, events, seen, sink).map(|r| r.popped);
    }
    warn!(
        pid = %barrier.pid,
        tid = %barrier.tid,
        stream_id = barrier.stream_id,
        "discarding barrier whose event never arrived"
    );
    stream.buffer.pop_front();
    Ok(true)
}

/// Seen-set key from a structured event record's own routing fields.
fn record_key(record: &Value) -> Option<SeenKey> {
    let tid = record.get("tid").and_then(shard_key)?;
    let pid = record.get("pid").and_then(shard_key)?;
    let stream_id = record.get("stream_id").and_then(Value::as_u64)?;
    Some((tid, pid, stream_id))
}

/// Relative and absolute forms of the test script path for the start
/// event. The `"UNKNOWN"` placeholder passes through unchanged.
fn file_forms(file: &str) -> (String, String) {
    if file == "UNKNOWN" {
        return (file.to_string(), file.to_string());
    }
    let path = Path::new(file);
    let cwd = std::env::current_dir().ok();
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else if let Some(cwd) = &cwd {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    let rel = cwd
        .as_deref()
        .and_then(|cwd| abs.strip_prefix(cwd).ok())
        .unwrap_or(path)
        .to_path_buf();
    (rel.display().to_string(), abs.display().to_string())
}
