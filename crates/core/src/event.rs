//! Events flowing from the write path to the commit loop

use std::fmt;

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A block file was written
    Write,
    /// A block file is about to be written
    WriteBefore,
    /// A record was removed from a block file
    Delete,
    /// A record was read
    Read,
    /// Stop the commit loop
    Shutdown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Write => "write",
            EventKind::WriteBefore => "write-before",
            EventKind::Delete => "delete",
            EventKind::Read => "read",
            EventKind::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// A single event
///
/// `path` is relative to the data directory; `"."` means the whole tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Affected path, relative to the data directory
    pub path: String,
    /// Human-readable summary, used as the commit message
    pub description: String,
    /// Whether the commit loop should commit this change
    pub autocommit: bool,
}

impl Event {
    /// Build an event
    pub fn new(
        kind: EventKind,
        path: impl Into<String>,
        description: impl Into<String>,
        autocommit: bool,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            description: description.into(),
            autocommit,
        }
    }

    /// Write event
    pub fn write(path: impl Into<String>, description: impl Into<String>, autocommit: bool) -> Self {
        Self::new(EventKind::Write, path, description, autocommit)
    }

    /// Write-before event
    pub fn write_before(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(EventKind::WriteBefore, path, description, false)
    }

    /// Delete event
    pub fn delete(path: impl Into<String>, description: impl Into<String>, autocommit: bool) -> Self {
        Self::new(EventKind::Delete, path, description, autocommit)
    }

    /// Shutdown event
    pub fn shutdown() -> Self {
        Self::new(EventKind::Shutdown, "", "shutdown", false)
    }

    /// True when the commit loop should turn this into a commit
    pub fn wants_commit(&self) -> bool {
        self.autocommit && matches!(self.kind, EventKind::Write | EventKind::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_autocommitted_mutations_commit() {
        assert!(Event::write("Message/b0.json", "Inserting", true).wants_commit());
        assert!(Event::delete("Message/b0.json", "Deleting", true).wants_commit());
        assert!(!Event::write("Message/b0.json", "Inserting", false).wants_commit());
        assert!(!Event::write_before("Message/b0.json", "Inserting").wants_commit());
        assert!(!Event::shutdown().wants_commit());
    }

    #[test]
    fn kind_display() {
        assert_eq!(EventKind::WriteBefore.to_string(), "write-before");
        assert_eq!(EventKind::Shutdown.to_string(), "shutdown");
    }
}
