//! Driving one stream to its next barrier
//!
//! The poller works the head of a stream's buffer: it recognizes inline
//! markers, folds comment runs, and emits everything else through the
//! caller's line parser. It stops at an installed barrier, when the
//! buffer drains, or when the per-pass budget runs out.

use super::comment::comment_prefix;
use super::{LineItem, StreamState};
use crate::error::Result;
use crate::events::{EmitSink, EventsRouter, LineParser};
use crate::marker::{self, Marker};
use serde_json::{json, Value};

/// Why a poll pass over one stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPoll {
    /// The buffer head is a barrier that must not be crossed
    Barrier,
    /// The buffer is exhausted
    Drained,
    /// The per-pass budget was spent
    Budget,
}

/// Synthesized facet data for a line no parser recognized.
fn info_facets(details: &str, stream: &StreamState) -> Value {
    json!({
        "info": [{
            "details": details,
            "tag": stream.source.tag(),
            "debug": stream.debug,
        }]
    })
}

fn emit_line(
    line: &str,
    stream: &StreamState,
    sink: &mut EmitSink<'_>,
    parser: &dyn LineParser,
) {
    let facets = parser
        .parse(line)
        .unwrap_or_else(|| info_facets(line, stream));
    sink.push_facets(facets, None);
}

/// Flush the active comment group as one diagnostic event.
pub(crate) fn flush_comments(stream: &mut StreamState, sink: &mut EmitSink<'_>) -> bool {
    match stream.comments.flush() {
        Some(text) => {
            let facets = info_facets(&text, stream);
            sink.push_facets(facets, None);
            true
        }
        None => false,
    }
}

/// Run one line through the comment/emit path, consuming it entirely.
/// Used for the leading residue of a marker line, which has no buffer
/// slot to wait in.
fn feed_text(
    line: &str,
    stream: &mut StreamState,
    sink: &mut EmitSink<'_>,
    parser: &dyn LineParser,
) -> usize {
    let mut added = 0;
    if let Some(prefix) = comment_prefix(line) {
        if stream.comments.is_active() && !stream.comments.matches(prefix) {
            if flush_comments(stream, sink) {
                added += 1;
            }
        }
        stream.comments.push(prefix, line);
    } else {
        if flush_comments(stream, sink) {
            added += 1;
        }
        emit_line(line, stream, sink, parser);
        added += 1;
    }
    added
}

/// Drive `stream` until it hits a barrier, drains, or spends `max`.
///
/// Returns the number of events added to the ready buffer and why the
/// pass stopped. Comment-group flushes count as one added event while
/// leaving the line that forced the flush buffered for the next
/// iteration, so a capped pass can end between a flushed group and the
/// line that triggered it.
pub fn poll_stream(
    stream: &mut StreamState,
    events: &mut EventsRouter,
    sink: &mut EmitSink<'_>,
    parser: &dyn LineParser,
    sep: &str,
    max: Option<usize>,
) -> Result<(usize, StreamPoll)> {
    let mut added = 0;

    loop {
        if max.is_some_and(|m| added >= m) {
            return Ok((added, StreamPoll::Budget));
        }

        let line = match stream.buffer.front() {
            None => return Ok((added, StreamPoll::Drained)),
            Some(LineItem::Barrier(_)) => return Ok((added, StreamPoll::Barrier)),
            Some(LineItem::Text(text)) => {
                let mut line = text.as_str();
                if let Some(stripped) = line.strip_suffix('\n') {
                    line = stripped;
                }
                if let Some(stripped) = line.strip_suffix('\r') {
                    line = stripped;
                }
                line.to_string()
            }
        };

        if let Some(split) = marker::scan_line(&line, sep)? {
            // Leading residue is real output for this line; it goes
            // through the normal comment/emit path first.
            if let Some(before) = &split.before {
                added += feed_text(before, stream, sink, parser);
            }
            // A comment group never straddles a barrier.
            if flush_comments(stream, sink) {
                added += 1;
            }

            let barrier = split.marker.barrier().clone();
            if let Marker::Event { payload, .. } = split.marker {
                events.enqueue_inline(&barrier, payload);
            }

            stream.buffer.pop_front();
            stream.buffer.push_front(LineItem::Barrier(barrier));

            // Trailing residue belongs to the next logical line: prepend
            // it to buffer[1], or create buffer[1] if nothing is there.
            if let Some(after) = split.after {
                match stream.buffer.get_mut(1) {
                    Some(LineItem::Text(next)) => next.insert_str(0, &after),
                    _ => stream.buffer.insert(1, LineItem::Text(after)),
                }
            }

            return Ok((added, StreamPoll::Barrier));
        }

        if let Some(prefix) = comment_prefix(&line) {
            if stream.comments.is_active() && !stream.comments.matches(prefix) {
                // Indentation changed: flush the old group, leave the
                // line buffered to start a new group next iteration.
                if flush_comments(stream, sink) {
                    added += 1;
                }
                continue;
            }
            stream.comments.push(prefix, &line);
            stream.buffer.pop_front();
            continue;
        }

        if stream.comments.is_active() {
            // Non-comment line ends the group; the line itself stays
            // buffered so the flush and the emit are separate steps.
            if flush_comments(stream, sink) {
                added += 1;
            }
            continue;
        }

        stream.buffer.pop_front();
        emit_line(&line, stream, sink, parser);
        added += 1;
    }
}
