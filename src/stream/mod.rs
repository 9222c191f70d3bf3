//! Per-stream line buffering and polling
//!
//! Each of the job's two text streams keeps an ordered buffer of raw
//! items. An item is either a text line waiting to be processed or a
//! barrier installed where an ESYNC marker was recognized; the poller
//! never crosses a barrier on its own.

mod comment;
mod poller;

pub use comment::CommentGroup;
pub(crate) use poller::flush_comments;
pub use poller::{poll_stream, StreamPoll};

use crate::error::Result;
use crate::files::{JobFile, StreamFile};
use crate::marker::Barrier;
use std::collections::VecDeque;
use std::path::Path;

/// Which of the two text streams a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    /// Tag attached to synthesized `info` facets.
    pub fn tag(&self) -> &'static str {
        match self {
            StreamSource::Stdout => "STDOUT",
            StreamSource::Stderr => "STDERR",
        }
    }

    /// The job file this stream tails.
    pub fn job_file(&self) -> JobFile {
        match self {
            StreamSource::Stdout => JobFile::Stdout,
            StreamSource::Stderr => JobFile::Stderr,
        }
    }
}

/// One buffered item from a stream.
#[derive(Debug, Clone)]
pub enum LineItem {
    /// A raw output line, trailing newline still attached
    Text(String),
    /// An installed synchronization barrier
    Barrier(Barrier),
}

/// All per-stream state: the tailed file, the raw item buffer, and the
/// active comment group.
#[derive(Debug)]
pub struct StreamState {
    pub source: StreamSource,
    pub file: StreamFile,
    pub buffer: VecDeque<LineItem>,
    pub comments: CommentGroup,
    /// Whether synthesized `info` facets are flagged as diagnostics
    pub debug: bool,
}

impl StreamState {
    pub fn new(source: StreamSource, root: &Path) -> Self {
        Self {
            source,
            file: StreamFile::new(source.job_file().path(root)),
            buffer: VecDeque::new(),
            comments: CommentGroup::default(),
            debug: matches!(source, StreamSource::Stderr),
        }
    }

    /// Tail-read up to `max` new lines into the buffer.
    pub fn fill(&mut self, max: Option<usize>, producer_done: bool) -> Result<usize> {
        let mut added = 0;
        while max.map_or(true, |m| added < m) {
            match self.file.read_line(producer_done)? {
                Some(line) => {
                    self.buffer.push_back(LineItem::Text(line));
                    added += 1;
                }
                None => break,
            }
        }
        Ok(added)
    }

    /// The barrier at the buffer head, if the head is one.
    pub fn head_barrier(&self) -> Option<&Barrier> {
        match self.buffer.front() {
            Some(LineItem::Barrier(barrier)) => Some(barrier),
            _ => None,
        }
    }
}
