//! Single-value files
//!
//! `start`, `exit` and `file` each hold exactly one line. Existence is
//! cached once observed, and the value is cached once a complete line has
//! been read.

use super::tail::TailReader;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// A file whose entire content is one line, written once by the producer.
#[derive(Debug)]
pub struct ValueFile {
    path: PathBuf,
    tail: TailReader,
    exists: bool,
    value: Option<String>,
}

impl ValueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            tail: TailReader::new(&path),
            path,
            exists: false,
            value: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file has been observed on disk. Cached once true.
    pub fn exists(&mut self) -> bool {
        if !self.exists {
            self.exists = self.path.exists();
        }
        self.exists
    }

    /// Read the single value, stripped of its trailing newline.
    ///
    /// Returns `None` until the file exists and holds a complete line (or
    /// any content at all once `producer_done` is set). The value is
    /// cached after the first successful read.
    pub fn read_line(&mut self, producer_done: bool) -> Result<Option<String>> {
        if self.value.is_none() {
            if let Some(line) = self.tail.read_line(producer_done)? {
                self.value = Some(line.trim_end_matches(['\r', '\n']).to_string());
            }
        }
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_value_file() {
        let dir = TempDir::new().unwrap();
        let mut value = ValueFile::new(dir.path().join("start"));
        assert!(!value.exists());
        assert!(value.read_line(false).unwrap().is_none());
    }

    #[test]
    fn test_reads_and_caches_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("start");
        fs::write(&path, "1000.5\n").unwrap();

        let mut value = ValueFile::new(&path);
        assert!(value.exists());
        assert_eq!(value.read_line(false).unwrap().unwrap(), "1000.5");

        // Cached: further writes do not change the observed value.
        fs::write(&path, "9999.9\n").unwrap();
        assert_eq!(value.read_line(false).unwrap().unwrap(), "1000.5");
    }

    #[test]
    fn test_existence_cached_once_true() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exit");
        fs::write(&path, "0 1001.0\n").unwrap();

        let mut value = ValueFile::new(&path);
        assert!(value.exists());
        fs::remove_file(&path).unwrap();
        assert!(value.exists());
    }

    #[test]
    fn test_unterminated_value_needs_producer_done() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exit");
        fs::write(&path, "-1").unwrap();

        let mut value = ValueFile::new(&path);
        assert!(value.read_line(false).unwrap().is_none());
        assert_eq!(value.read_line(true).unwrap().unwrap(), "-1");
    }
}
