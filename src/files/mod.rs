//! File abstractions over a job output directory
//!
//! A job directory holds a small closed set of files: three single-value
//! files (`start`, `exit`, `file`), two append-only text streams (`stdout`,
//! `stderr`) and an `events/` directory of JSONL shards. Everything here is
//! opened lazily; none of the files are required to exist when the streamer
//! is constructed.

mod jsonl;
mod stream;
mod tail;
mod value;

pub use jsonl::JsonlFile;
pub use stream::StreamFile;
pub use tail::TailReader;
pub use value::ValueFile;

use std::path::{Path, PathBuf};

/// Name of the structured-events directory under the job root.
pub const EVENTS_DIR: &str = "events";

/// The closed set of well-known files in a job directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFile {
    /// Wall-clock timestamp (float seconds) recorded at job start
    Start,
    /// `"<exit_code> <stamp>"`, written when the producer exits
    Exit,
    /// Path of the test script being executed
    File,
    /// Append-only stdout stream of the test script
    Stdout,
    /// Append-only stderr stream of the test script
    Stderr,
}

impl JobFile {
    /// File name under the job root.
    pub fn name(&self) -> &'static str {
        match self {
            JobFile::Start => "start",
            JobFile::Exit => "exit",
            JobFile::File => "file",
            JobFile::Stdout => "stdout",
            JobFile::Stderr => "stderr",
        }
    }

    /// Full path of this file under `root`.
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(self.name())
    }
}

/// Full path of the events shard directory under `root`.
pub fn events_dir(root: &Path) -> PathBuf {
    root.join(EVENTS_DIR)
}

/// File name of the JSONL shard written by one producer thread.
pub fn shard_file_name(pid: &str, tid: &str, sep: &str) -> String {
    format!("events-{pid}{sep}{tid}.jsonl")
}
