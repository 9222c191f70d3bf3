//! # jobstream
//!
//! Tails one test-harness job output directory into a single ordered
//! stream of harness events.
//!
//! A running test script writes its observable state into a per-job
//! directory: `stdout` and `stderr` text streams, `events/*.jsonl` shards
//! of structured events, and the `start`/`exit`/`file` value files. This
//! crate re-synchronizes those independent streams while the producer is
//! still writing them, using the inline `T2-HARNESS-ESYNC:` /
//! `T2-HARNESS-EVENT:` barrier protocol to anchor structured events
//! between the free-form text around them.
//!
//! ## Modules
//!
//! - `config` - Job directory identity and the IPC separator
//! - `error` - Error taxonomy for streaming operations
//! - `events` - Harness event model, id/parser seams, shard routing
//! - `files` - Lazy tail-reading file abstractions over the job directory
//! - `marker` - Inline harness marker recognition
//! - `stream` - Per-stream buffering, comment coalescing, and polling
//! - `streamer` - The `JobStreamer` poll API tying it all together
//!
//! ## Usage
//!
//! ```no_run
//! use jobstream::{JobDirConfig, JobStreamer};
//!
//! # fn main() -> jobstream::Result<()> {
//! let config = JobDirConfig::new("run-1", "job-1", "/var/harness/jobs/1")?;
//! let mut streamer = JobStreamer::new(config);
//! loop {
//!     for event in streamer.poll(Some(100))? {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     if streamer.is_done() {
//!         break;
//!     }
//!     // The caller decides the poll cadence; poll never blocks.
//!     std::thread::sleep(std::time::Duration::from_millis(20));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod marker;
pub mod stream;
pub mod streamer;

pub use config::{JobDirConfig, IPC_SEPARATOR};
pub use error::{Result, StreamError};
pub use events::{HarnessEvent, IdSource, LineParser, NoParser, UuidSource};
pub use marker::Barrier;
pub use stream::StreamSource;
pub use streamer::{ExitValue, JobStreamer};
