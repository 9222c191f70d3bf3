//! Coalescing of consecutive TAP comment lines
//!
//! Runs of `#` lines at the same indentation form one diagnostic event.
//! A group never straddles an indentation change, a non-comment line, or
//! an ESYNC barrier; each of those flushes it.

/// Returns the indentation prefix when `line` is a TAP comment.
pub(crate) fn comment_prefix(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    trimmed
        .starts_with('#')
        .then(|| &line[..line.len() - trimmed.len()])
}

/// Accumulator for one run of equally indented comment lines.
#[derive(Debug, Default)]
pub struct CommentGroup {
    prefix: Option<String>,
    lines: Vec<String>,
}

impl CommentGroup {
    /// Whether a group is currently being accumulated.
    pub fn is_active(&self) -> bool {
        self.prefix.is_some()
    }

    /// Whether `prefix` matches the active group's indentation.
    pub fn matches(&self, prefix: &str) -> bool {
        self.prefix.as_deref() == Some(prefix)
    }

    /// Append a comment line, starting the group if none is active.
    /// The caller is responsible for flushing on indentation changes.
    pub fn push(&mut self, prefix: &str, line: &str) {
        if self.prefix.is_none() {
            self.prefix = Some(prefix.to_string());
        }
        self.lines.push(line.to_string());
    }

    /// Take the accumulated lines as one newline-joined payload.
    pub fn flush(&mut self) -> Option<String> {
        self.prefix.take()?;
        let joined = self.lines.join("\n");
        self.lines.clear();
        Some(joined)
    }
}
