//! Append-only text stream files (`stdout`, `stderr`)

use super::tail::TailReader;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Tail-read wrapper over one of the job's text output streams.
#[derive(Debug)]
pub struct StreamFile {
    tail: TailReader,
}

impl StreamFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tail: TailReader::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.tail.path()
    }

    /// Next complete line, newline retained. See [`TailReader::read_line`].
    pub fn read_line(&mut self, producer_done: bool) -> Result<Option<String>> {
        self.tail.read_line(producer_done)
    }

    /// Best-effort read of the whole file, for exit-event synthesis.
    pub fn read_all(&self) -> Option<String> {
        std::fs::read_to_string(self.tail.path()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_stream_lines_and_read_all() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stdout");
        fs::write(&path, "ok 1\nok 2\n").unwrap();

        let mut stream = StreamFile::new(&path);
        assert_eq!(stream.read_line(false).unwrap().unwrap(), "ok 1\n");
        assert_eq!(stream.read_line(false).unwrap().unwrap(), "ok 2\n");
        assert_eq!(stream.read_all().unwrap(), "ok 1\nok 2\n");
    }

    #[test]
    fn test_read_all_missing_file() {
        let dir = TempDir::new().unwrap();
        let stream = StreamFile::new(dir.path().join("stderr"));
        assert!(stream.read_all().is_none());
    }
}
