//! Snapshot-based undo/redo timeline.
//!
//! Each entry is a full value snapshot of the buffer plus the viewport
//! offset and cursor that go with it. Snapshots are cheap because a buffer
//! clone copies small piece descriptors and one-byte edit payloads while
//! sharing the read-only source handle. Entries are immutable once pushed:
//! `undo`/`redo` hand back clones, never references, so later edits on the
//! live buffer cannot reach into the timeline.

use core_buffer::Buffer;
use tracing::trace;

#[derive(Clone)]
struct Entry {
    buffer: Buffer,
    offset: u64,
    cursor: u64,
}

/// Append-only timeline with a current-position index.
pub struct History {
    entries: Vec<Entry>,
    index: usize,
    /// Maximum retained entries; 0 means unbounded.
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            index: 0,
            limit,
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Record the post-edit state. Entries beyond the current index (undone
    /// futures) are discarded first; when a limit is set the oldest entry is
    /// dropped once it is exceeded.
    pub fn push(&mut self, buffer: &Buffer, offset: u64, cursor: u64) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.index + 1);
        }
        self.entries.push(Entry {
            buffer: buffer.clone(),
            offset,
            cursor,
        });
        if self.limit > 0 && self.entries.len() > self.limit {
            self.entries.remove(0);
        }
        self.index = self.entries.len() - 1;
        trace!(target: "window.history", depth = self.entries.len(), index = self.index, "push");
    }

    /// Step back one entry, returning the buffer, offset, and cursor to
    /// restore. `None` at the beginning of the timeline.
    pub fn undo(&mut self) -> Option<(Buffer, u64, u64)> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        trace!(target: "window.history", index = self.index, "undo");
        let entry = &self.entries[self.index];
        Some((entry.buffer.clone(), entry.offset, entry.cursor))
    }

    /// Step forward one entry. `None` at the end of the timeline.
    pub fn redo(&mut self) -> Option<(Buffer, u64, u64)> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        trace!(target: "window.history", index = self.index, "redo");
        let entry = &self.entries[self.index];
        Some((entry.buffer.clone(), entry.offset, entry.cursor))
    }
}
