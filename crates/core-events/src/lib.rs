//! Edit-event taxonomy and channel policy for the hexed editing core.
//!
//! The command/keymap layer translates keystrokes into [`Event`]s and sends
//! them down a bounded channel owned by the window; the window answers every
//! processed event with a unit pulse on an equally bounded redraw channel.
//! Bounded on both sides so a slow renderer throttles the editor instead of
//! queueing unbounded work: the producer parks on a full event channel and
//! the window parks on a full redraw channel. With a single producer and a
//! single consumer per window this keeps latency low while preserving
//! submission order end to end.

use std::sync::atomic::AtomicU64;

/// Capacity of the per-window inbound event channel.
pub const EVENT_CHANNEL_CAP: usize = 1024;

/// Capacity of the redraw pulse channel. One slot is enough for correctness
/// (pulses carry no payload); a little slack decouples the loop from renderer
/// jitter.
pub const REDRAW_CHANNEL_CAP: usize = 8;

/// Events dispatched across all windows; inspected by tests and periodic
/// diagnostics, never consulted for control flow.
pub static EVENTS_DISPATCHED: AtomicU64 = AtomicU64::new(0);

/// Redraw pulses emitted across all windows.
pub static REDRAW_PULSES: AtomicU64 = AtomicU64::new(0);

/// Input mode the command layer was in when it emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Insert,
    Replace,
}

/// Everything the window knows how to do, grouped the way the command layer
/// produces them: cursor motion, scrolling/paging, jumps, byte mutation,
/// mode entry/exit, nibble input, focus, history, and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CursorUp,
    CursorDown,
    CursorLeft,
    CursorRight,
    CursorPrev,
    CursorNext,
    CursorHead,
    CursorEnd,
    CursorGotoAbs,
    CursorGotoRel,
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    PageUpHalf,
    PageDownHalf,
    PageTop,
    PageEnd,
    JumpTo,
    JumpBack,
    DeleteByte,
    DeletePrevByte,
    Increment,
    Decrement,
    StartInsert,
    StartInsertHead,
    StartAppend,
    StartAppendEnd,
    StartReplaceByte,
    StartReplace,
    ExitInsert,
    Rune,
    Backspace,
    Delete,
    SwitchFocus,
    Undo,
    Redo,
    ExecuteSearch,
    NextSearch,
    PreviousSearch,
}

impl EventKind {
    /// True for events that only move the cursor or viewport. The history
    /// push policy uses this to record the commit point when an edit burst
    /// in insert mode is followed by pure navigation.
    pub fn is_navigation(self) -> bool {
        matches!(
            self,
            EventKind::CursorUp
                | EventKind::CursorDown
                | EventKind::CursorLeft
                | EventKind::CursorRight
                | EventKind::CursorPrev
                | EventKind::CursorNext
                | EventKind::CursorHead
                | EventKind::CursorEnd
                | EventKind::CursorGotoAbs
                | EventKind::CursorGotoRel
                | EventKind::ScrollUp
                | EventKind::ScrollDown
                | EventKind::PageUp
                | EventKind::PageDown
                | EventKind::PageUpHalf
                | EventKind::PageDownHalf
                | EventKind::PageTop
                | EventKind::PageEnd
                | EventKind::JumpTo
                | EventKind::JumpBack
        )
    }
}

/// One abstract edit event.
///
/// `count` is signed because `CursorGotoRel` carries a displacement; every
/// repetition consumer treats it as `max(count, 1)`. `rune` doubles as the
/// search trigger character (`/` means forward), mirroring how the command
/// line hands search requests over.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub mode: Mode,
    pub count: i64,
    pub rune: char,
    pub arg: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, mode: Mode) -> Self {
        Self {
            kind,
            mode,
            count: 0,
            rune: '\0',
            arg: None,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    pub fn with_rune(mut self, rune: char) -> Self {
        self.rune = rune;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.arg = Some(arg.into());
        self
    }
}
