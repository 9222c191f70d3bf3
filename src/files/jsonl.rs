//! Append-only JSON-per-line shard files
//!
//! Lines are returned raw; decoding is deferred until the event is
//! actually released, so a shard full of events we never reach costs no
//! parse time.

use super::tail::TailReader;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Tail-read wrapper over an `events/*.jsonl` shard.
#[derive(Debug)]
pub struct JsonlFile {
    tail: TailReader,
}

impl JsonlFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tail: TailReader::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.tail.path()
    }

    /// Next complete record line, stripped of its newline.
    pub fn read_record(&mut self, producer_done: bool) -> Result<Option<String>> {
        Ok(self
            .tail
            .read_line(producer_done)?
            .map(|line| line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
