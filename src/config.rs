//! Job directory identity and streamer configuration

use crate::error::{Result, StreamError};
use std::path::{Path, PathBuf};

/// Separator used by the harness IPC layer inside shard file names and
/// ESYNC marker payloads. Shared with the producing side of the harness.
pub const IPC_SEPARATOR: &str = "~";

/// Immutable identity of one job output directory.
///
/// All three of `run_id`, `job_id` and `job_root` are required; the
/// separator defaults to [`IPC_SEPARATOR`] and is carried as configuration
/// rather than read from a global.
#[derive(Debug, Clone)]
pub struct JobDirConfig {
    pub run_id: String,
    pub job_id: String,
    pub job_root: PathBuf,
    pub sep: String,
}

impl JobDirConfig {
    /// Create a validated job directory configuration.
    pub fn new(
        run_id: impl Into<String>,
        job_id: impl Into<String>,
        job_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let run_id = run_id.into();
        let job_id = job_id.into();
        let job_root = job_root.into();

        if run_id.is_empty() {
            return Err(StreamError::config("run_id cannot be empty"));
        }
        if job_id.is_empty() {
            return Err(StreamError::config("job_id cannot be empty"));
        }
        if job_root.as_os_str().is_empty() {
            return Err(StreamError::config("job_root cannot be empty"));
        }

        Ok(Self {
            run_id,
            job_id,
            job_root,
            sep: IPC_SEPARATOR.to_string(),
        })
    }

    /// Override the IPC separator.
    pub fn with_separator(mut self, sep: impl Into<String>) -> Self {
        self.sep = sep.into();
        self
    }

    /// Root of the job output directory.
    pub fn root(&self) -> &Path {
        &self.job_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = JobDirConfig::new("run-1", "job-1", "/tmp/job-1").unwrap();
        assert_eq!(config.run_id, "run-1");
        assert_eq!(config.job_id, "job-1");
        assert_eq!(config.sep, IPC_SEPARATOR);
    }

    #[test]
    fn test_empty_run_id_rejected() {
        let err = JobDirConfig::new("", "job-1", "/tmp/job-1").unwrap_err();
        assert!(err.to_string().contains("run_id"));
    }

    #[test]
    fn test_empty_job_id_rejected() {
        let err = JobDirConfig::new("run-1", "", "/tmp/job-1").unwrap_err();
        assert!(err.to_string().contains("job_id"));
    }

    #[test]
    fn test_empty_job_root_rejected() {
        let err = JobDirConfig::new("run-1", "job-1", "").unwrap_err();
        assert!(err.to_string().contains("job_root"));
    }

    #[test]
    fn test_separator_override() {
        let config = JobDirConfig::new("run-1", "job-1", "/tmp/job-1")
            .unwrap()
            .with_separator("::");
        assert_eq!(config.sep, "::");
    }
}
