//! Tail-reading of a growing text file
//!
//! The producer appends newline-framed records while we read. A read
//! attempt records the current offset, reads one line, and only accepts it
//! if it is newline-terminated or the producer is known to have exited.
//! Anything else is a partial write: the handle is seeked back to the
//! recorded offset and nothing is returned, so no half-written line is
//! ever surfaced.

use crate::error::Result;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::trace;

/// Line-by-line tail reader over a file that may not exist yet.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    offset: u64,
}

impl TailReader {
    /// Create a reader for `path`. The file is opened lazily on first read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            offset: 0,
        }
    }

    /// Path this reader tails.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current read offset in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn ensure_open(&mut self) -> Result<bool> {
        if self.reader.is_some() {
            return Ok(true);
        }
        match File::open(&self.path) {
            Ok(file) => {
                let mut reader = BufReader::new(file);
                if self.offset > 0 {
                    reader.seek(SeekFrom::Start(self.offset))?;
                }
                self.reader = Some(reader);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Attempt to read the next line.
    ///
    /// Returns `Ok(None)` when the file does not exist yet, when no new
    /// data has been appended, or when the only available data is a
    /// partial line and `producer_done` is false. The trailing newline is
    /// retained so the caller can distinguish terminated lines.
    pub fn read_line(&mut self, producer_done: bool) -> Result<Option<String>> {
        if !self.ensure_open()? {
            return Ok(None);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| std::io::Error::other("tail reader lost its handle"))?;

        let mut line = String::new();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }

        if line.ends_with('\n') || producer_done {
            trace!(path = %self.path.display(), bytes = read, "tail line accepted");
            self.offset += read as u64;
            return Ok(Some(line));
        }

        // Partial final line: rewind so the next attempt re-reads it. The
        // seek also resets BufReader's internal buffer, which is what lets
        // later reads see data appended after this EOF.
        reader.seek(SeekFrom::Start(self.offset))?;
        trace!(path = %self.path.display(), "partial line withheld");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, content: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let mut tail = TailReader::new(dir.path().join("absent"));
        assert!(tail.read_line(false).unwrap().is_none());
    }

    #[test]
    fn test_reads_complete_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out");
        append(&path, "one\ntwo\n");

        let mut tail = TailReader::new(&path);
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "one\n");
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "two\n");
        assert!(tail.read_line(false).unwrap().is_none());
    }

    #[test]
    fn test_partial_line_withheld_until_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out");
        append(&path, "par");

        let mut tail = TailReader::new(&path);
        assert!(tail.read_line(false).unwrap().is_none());
        assert!(tail.read_line(false).unwrap().is_none());

        append(&path, "tial\n");
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "partial\n");
    }

    #[test]
    fn test_partial_line_accepted_when_producer_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out");
        append(&path, "truncated");

        let mut tail = TailReader::new(&path);
        assert!(tail.read_line(false).unwrap().is_none());
        assert_eq!(tail.read_line(true).unwrap().unwrap(), "truncated");
    }

    #[test]
    fn test_sees_data_appended_after_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out");
        append(&path, "first\n");

        let mut tail = TailReader::new(&path);
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "first\n");
        assert!(tail.read_line(false).unwrap().is_none());

        append(&path, "second\n");
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "second\n");
    }

    #[test]
    fn test_file_appearing_late_is_picked_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late");

        let mut tail = TailReader::new(&path);
        assert!(tail.read_line(false).unwrap().is_none());

        append(&path, "hello\n");
        assert_eq!(tail.read_line(false).unwrap().unwrap(), "hello\n");
    }
}
