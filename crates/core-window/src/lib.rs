//! The modal editing core: one buffer, one history, one event loop.
//!
//! A [`Window`] owns a piece-table buffer, an undo timeline, and the modal
//! state that makes hex editing coherent: cursor and viewport, append /
//! extending / pending flags, the two-stroke nibble accumulator, a jump
//! stack, and the history push policy. The command layer feeds it abstract
//! [`Event`]s over a bounded channel; after each processed event the window
//! emits a unit pulse on the redraw channel and the renderer pulls a
//! [`WindowState`] snapshot.
//!
//! Concurrency model: the spawned loop task is the sole mutator. A mutex
//! guards the state so external readers (`state()`, `set_size()`) observe a
//! consistent snapshot between events; nothing inside the critical section
//! blocks or awaits. The redraw send happens strictly after the mutation
//! commits and the lock is released, so a pulse always advertises finished
//! state. Dropping the window (or calling [`Window::close`]) closes the
//! event channel and ends the loop.
//!
//! The phantom byte: while appending, `length` is one larger than the
//! buffer's real length and the cursor rests on that phantom slot. It is a
//! window-level fiction for cursor positioning only; nothing is inserted
//! until a full nibble pair commits, and reads never see it.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use core_buffer::{Buffer, ByteSource};
use core_config::Config;
use core_events::{
    EVENT_CHANNEL_CAP, EVENTS_DISPATCHED, Event, EventKind, Mode, REDRAW_PULSES,
};
use core_history::History;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub mod layout;
pub mod search;

/// Viewport dimensions used until the renderer reports real ones via
/// [`Window::set_size`].
const DEFAULT_WIDTH: u64 = 16;
const DEFAULT_HEIGHT: u64 = 16;

/// Tunables the window reads once at construction.
#[derive(Debug, Clone)]
pub struct WindowOptions {
    /// Bytes scanned on each side of the cursor by jump-to-address.
    pub jump_context: usize,
    /// Screens of context searched per request.
    pub search_window: usize,
    /// Maximum retained undo snapshots; 0 = unbounded.
    pub history_limit: usize,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            jump_context: 50,
            search_window: 50,
            history_limit: 0,
        }
    }
}

impl From<&Config> for WindowOptions {
    fn from(config: &Config) -> Self {
        Self {
            jump_context: config.jump_context(),
            search_window: config.search_window(),
            history_limit: config.history_limit(),
        }
    }
}

/// Snapshot the renderer pulls between redraw pulses.
#[derive(Debug, Clone)]
pub struct WindowState {
    pub name: String,
    pub width: u64,
    pub offset: u64,
    pub cursor: u64,
    /// Viewport-sized byte window starting at `offset`.
    pub bytes: Vec<u8>,
    /// How much of `bytes` is actually backed by the document.
    pub size: usize,
    pub length: u64,
    pub pending: bool,
    pub pending_byte: u8,
    pub edited_indices: Vec<u64>,
    pub focus_text: bool,
}

/// Handle to a running window: send events, pull state, resize, close.
pub struct Window {
    inner: Arc<Mutex<WindowInner>>,
    events: mpsc::Sender<Event>,
    loop_task: JoinHandle<()>,
}

impl Window {
    /// Build the window over `source` and spawn its event loop on the
    /// current tokio runtime. The initial buffer state is pushed to history
    /// so the timeline always has a floor to undo back to.
    pub fn spawn(
        source: Arc<dyn ByteSource>,
        name: impl Into<String>,
        options: WindowOptions,
        redraw: mpsc::Sender<()>,
    ) -> io::Result<Self> {
        let inner = Arc::new(Mutex::new(WindowInner::new(source, name.into(), options)?));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAP);
        let loop_task = tokio::spawn(run_loop(inner.clone(), events_rx, redraw));
        Ok(Self {
            inner,
            events: events_tx,
            loop_task,
        })
    }

    /// A sender the command layer can hold on to.
    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Queue one event; parks under backpressure.
    pub async fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow!("window event channel closed"))
    }

    /// Consistent snapshot of the current state. Only true I/O failures from
    /// the underlying source surface here.
    pub fn state(&self) -> Result<WindowState> {
        let inner = self.inner.lock().expect("window mutex poisoned");
        inner.snapshot().context("reading window state")
    }

    /// Adopt the renderer's viewport dimensions, re-aligning the offset and
    /// clamping it so the viewport does not hang past the buffer.
    pub fn set_size(&self, width: u64, height: u64) {
        let mut inner = self.inner.lock().expect("window mutex poisoned");
        inner.set_size(width, height);
    }

    /// Close the event channel and wait for the loop to drain.
    pub async fn close(self) {
        drop(self.events);
        if let Err(e) = self.loop_task.await {
            warn!(target: "window.event", error = %e, "window loop task failed");
        }
    }
}

async fn run_loop(
    inner: Arc<Mutex<WindowInner>>,
    mut events: mpsc::Receiver<Event>,
    redraw: mpsc::Sender<()>,
) {
    while let Some(event) = events.recv().await {
        {
            let mut window = inner.lock().expect("window mutex poisoned");
            window.dispatch(event);
        }
        EVENTS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
        if redraw.send(()).await.is_err() {
            debug!(target: "window.event", "redraw channel closed, stopping loop");
            break;
        }
        REDRAW_PULSES.fetch_add(1, Ordering::Relaxed);
    }
    debug!(target: "window.event", "window loop finished");
}

/// Repetition count: every repeating event treats its count as at least one.
fn reps(count: i64) -> u64 {
    count.max(1) as u64
}

/// Separators the jump-to-address scanner steps over.
fn is_blank(b: u8) -> bool {
    matches!(b, 0x00 | 0x09 | 0x0a | 0x0d | 0x20)
}

struct WindowInner {
    buffer: Buffer,
    history: History,
    name: String,
    width: u64,
    height: u64,
    offset: u64,
    cursor: u64,
    /// Logical length; one larger than the buffer while `extending`.
    length: u64,
    /// Jump-back stack of (cursor, offset) pairs.
    stack: Vec<(u64, u64)>,
    append: bool,
    replace_byte: bool,
    extending: bool,
    pending: bool,
    pending_byte: u8,
    focus_text: bool,
    /// Bumped on every content mutation; compared around an event to decide
    /// history pushes.
    changed_tick: u64,
    prev_changed: bool,
    opts: WindowOptions,
}

impl WindowInner {
    fn new(source: Arc<dyn ByteSource>, name: String, opts: WindowOptions) -> io::Result<Self> {
        let buffer = Buffer::new(source);
        let length = buffer.len()?;
        let mut history = History::with_limit(opts.history_limit);
        history.push(&buffer, 0, 0);
        Ok(Self {
            buffer,
            history,
            name,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            offset: 0,
            cursor: 0,
            length,
            stack: Vec::new(),
            append: false,
            replace_byte: false,
            extending: false,
            pending: false,
            pending_byte: 0,
            focus_text: false,
            changed_tick: 0,
            prev_changed: false,
            opts,
        })
    }

    fn dispatch(&mut self, event: Event) {
        trace!(
            target: "window.event",
            kind = ?event.kind,
            mode = ?event.mode,
            count = event.count,
            "dispatch"
        );
        let offset_before = self.offset;
        let cursor_before = self.cursor;
        let tick_before = self.changed_tick;

        match event.kind {
            EventKind::CursorUp => self.cursor_up(event.count),
            EventKind::CursorDown => self.cursor_down(event.count),
            EventKind::CursorLeft => self.cursor_left(event.count),
            EventKind::CursorRight => self.cursor_right(event.mode, event.count),
            EventKind::CursorPrev => self.cursor_prev(event.count),
            EventKind::CursorNext => self.cursor_next(event.mode, event.count),
            EventKind::CursorHead => self.cursor_head(),
            EventKind::CursorEnd => self.cursor_end(event.count),
            EventKind::CursorGotoAbs => self.cursor_goto_abs(event.count),
            EventKind::CursorGotoRel => self.cursor_goto_rel(event.count),
            EventKind::ScrollUp => self.scroll_up(event.count),
            EventKind::ScrollDown => self.scroll_down(event.count),
            EventKind::PageUp => self.page_up(),
            EventKind::PageDown => self.page_down(),
            EventKind::PageUpHalf => self.page_up_half(),
            EventKind::PageDownHalf => self.page_down_half(),
            EventKind::PageTop => self.page_top(),
            EventKind::PageEnd => self.page_end(),
            EventKind::JumpTo => self.jump_to(),
            EventKind::JumpBack => self.jump_back(),
            EventKind::DeleteByte => self.delete_bytes_forward(event.count),
            EventKind::DeletePrevByte => self.delete_bytes_backward(event.count),
            EventKind::Increment => self.increment(event.count),
            EventKind::Decrement => self.decrement(event.count),
            EventKind::StartInsert => self.start_insert(),
            EventKind::StartInsertHead => self.start_insert_head(),
            EventKind::StartAppend => self.start_append(),
            EventKind::StartAppendEnd => self.start_append_end(),
            EventKind::StartReplaceByte => self.start_replace_byte(),
            EventKind::StartReplace => self.start_replace(),
            EventKind::ExitInsert => self.exit_insert(),
            EventKind::Rune => self.input_rune(event.mode, event.rune),
            EventKind::Backspace => self.backspace(),
            EventKind::Delete => self.delete_bytes_forward(1),
            EventKind::SwitchFocus => self.switch_focus(),
            EventKind::Undo => {
                assert_eq!(
                    event.mode,
                    Mode::Normal,
                    "undo must be emitted under normal mode"
                );
                self.undo(event.count);
            }
            EventKind::Redo => {
                assert_eq!(
                    event.mode,
                    Mode::Normal,
                    "redo must be emitted under normal mode"
                );
                self.redo(event.count);
            }
            EventKind::ExecuteSearch | EventKind::NextSearch => {
                self.search(event.arg.as_deref().unwrap_or(""), event.rune == '/');
            }
            EventKind::PreviousSearch => {
                self.search(event.arg.as_deref().unwrap_or(""), event.rune != '/');
            }
        }

        let changed = self.changed_tick != tick_before;
        if !matches!(event.kind, EventKind::Undo | EventKind::Redo) {
            if (event.mode == Mode::Normal && changed)
                || (event.kind == EventKind::ExitInsert && self.prev_changed)
            {
                self.history.push(&self.buffer, self.offset, self.cursor);
            } else if event.mode != Mode::Normal
                && self.prev_changed
                && !changed
                && event.kind.is_navigation()
            {
                // An edit burst followed by pure navigation: record the
                // commit point with the viewport as it was before this event.
                self.history.push(&self.buffer, offset_before, cursor_before);
            }
        }
        self.prev_changed = changed;
    }

    // ---- state snapshot ---------------------------------------------------

    fn read_bytes(&self, offset: u64, len: usize) -> io::Result<(usize, Vec<u8>)> {
        let mut bytes = vec![0; len];
        let n = self.buffer.read_at(&mut bytes, offset)?;
        Ok((n, bytes))
    }

    fn snapshot(&self) -> io::Result<WindowState> {
        let (size, bytes) = self.read_bytes(self.offset, (self.height * self.width) as usize)?;
        Ok(WindowState {
            name: self.name.clone(),
            width: self.width,
            offset: self.offset,
            cursor: self.cursor,
            bytes,
            size,
            length: self.length,
            pending: self.pending,
            pending_byte: self.pending_byte,
            edited_indices: self.buffer.edited_indices(),
            focus_text: self.focus_text,
        })
    }

    fn set_size(&mut self, width: u64, height: u64) {
        debug_assert!(width > 0 && height > 0, "viewport must be non-empty");
        self.width = width;
        self.height = height;
        self.offset = layout::align(self.offset, width);
        if self.cursor >= self.visible_end() {
            self.offset = layout::snap_down(self.cursor, width, height);
        }
        let clamp = (self.length as i64 - 1 - (height * width) as i64 + width as i64).max(0) as u64;
        self.offset = self.offset.min(layout::align(clamp, width));
    }

    // ---- mutation primitives ----------------------------------------------

    fn insert_at(&mut self, offset: u64, b: u8) {
        self.buffer.insert(offset, b);
        self.changed_tick += 1;
        trace!(target: "buffer.edit", offset, byte = b, "insert");
    }

    fn replace_at(&mut self, offset: u64, b: u8) {
        self.buffer.replace(offset, b);
        self.changed_tick += 1;
        trace!(target: "buffer.edit", offset, byte = b, "replace");
    }

    fn delete_at(&mut self, offset: u64) {
        self.buffer.delete(offset);
        self.changed_tick += 1;
        trace!(target: "buffer.edit", offset, "delete");
    }

    fn refresh_length(&mut self) {
        match self.buffer.len() {
            Ok(len) => self.length = len,
            Err(e) => warn!(target: "window.event", error = %e, "length refresh failed"),
        }
    }

    // ---- viewport ----------------------------------------------------------

    fn visible_end(&self) -> u64 {
        self.offset + self.height * self.width
    }

    fn scroll_cursor_into_view_down(&mut self) {
        if self.cursor >= self.visible_end() {
            self.offset = layout::snap_down(self.cursor, self.width, self.height);
        }
    }

    fn recenter(&mut self) {
        if self.cursor < self.offset {
            self.offset = layout::center_above(self.cursor, self.width, self.height);
        } else if self.cursor >= self.visible_end() {
            self.offset = layout::center_below(self.cursor, self.length, self.width, self.height);
        }
    }

    // ---- cursor motion -----------------------------------------------------

    fn cursor_up(&mut self, count: i64) {
        self.cursor -= reps(count).min(self.cursor / self.width) * self.width;
        if self.cursor < self.offset {
            self.offset = layout::align(self.cursor, self.width);
        }
    }

    fn cursor_down(&mut self, count: i64) {
        let max_row = (self.length.max(1) - 1) / self.width;
        let rows = reps(count).min(max_row - self.cursor / self.width);
        self.cursor += (rows * self.width).min(self.length.max(1) - 1 - self.cursor);
        self.scroll_cursor_into_view_down();
    }

    /// Leaving the phantom slot sideways abandons the append position.
    fn drop_phantom_if_left_behind(&mut self) {
        if self.append && self.extending && self.cursor + 1 < self.length {
            self.append = false;
            self.extending = false;
            if self.length > 0 {
                self.length -= 1;
            }
        }
    }

    fn cursor_left(&mut self, count: i64) {
        self.cursor -= reps(count).min(self.cursor % self.width);
        self.drop_phantom_if_left_behind();
    }

    fn cursor_right(&mut self, mode: Mode, count: i64) {
        match mode {
            Mode::Normal => {
                let step = reps(count).min(self.width - 1 - self.cursor % self.width);
                self.cursor += step.min(self.length.max(1) - 1 - self.cursor);
            }
            _ if !self.extending => {
                let step = reps(count).min(self.width - 1 - self.cursor % self.width);
                self.cursor += step.min(self.length - self.cursor);
                if self.cursor == self.length {
                    self.append = true;
                    self.extending = true;
                    self.length += 1;
                }
            }
            _ => {}
        }
    }

    fn cursor_prev(&mut self, count: i64) {
        self.cursor -= reps(count).min(self.cursor);
        if self.cursor < self.offset {
            self.offset = layout::align(self.cursor, self.width);
        }
        if self.append && self.extending && self.cursor != self.length {
            self.append = false;
            self.extending = false;
            if self.length > 0 {
                self.length -= 1;
            }
        }
    }

    fn cursor_next(&mut self, mode: Mode, count: i64) {
        match mode {
            Mode::Normal => {
                self.cursor += reps(count).min(self.length.max(1) - 1 - self.cursor);
            }
            _ if !self.extending => {
                self.cursor += reps(count).min(self.length - self.cursor);
                if self.cursor == self.length {
                    self.append = true;
                    self.extending = true;
                    self.length += 1;
                }
            }
            _ => {}
        }
        self.scroll_cursor_into_view_down();
    }

    fn cursor_head(&mut self) {
        self.cursor -= self.cursor % self.width;
    }

    fn cursor_end(&mut self, count: i64) {
        self.cursor = ((self.cursor / self.width + reps(count)) * self.width - 1)
            .min(self.length.max(1) - 1);
        self.scroll_cursor_into_view_down();
    }

    fn cursor_goto_abs(&mut self, count: i64) {
        self.cursor = (count.max(0) as u64).min(self.length.max(1) - 1);
        self.recenter();
    }

    fn cursor_goto_rel(&mut self, count: i64) {
        let forward_limit = (self.length.max(1) - 1 - self.cursor) as i64;
        let delta = count.clamp(-(self.cursor as i64), forward_limit);
        self.cursor = (self.cursor as i64 + delta) as u64;
        self.recenter();
    }

    // ---- scrolling and paging ----------------------------------------------

    fn scroll_up(&mut self, count: i64) {
        self.offset -= reps(count).min(self.offset / self.width) * self.width;
        if self.cursor >= self.visible_end() {
            self.cursor -= ((self.cursor - self.visible_end()) / self.width + 1) * self.width;
        }
    }

    fn scroll_down(&mut self, count: i64) {
        let total = layout::rows(self.length, self.width).saturating_sub(self.height);
        let delta = (reps(count) as i64).min(total as i64 - (self.offset / self.width) as i64);
        self.offset = (self.offset as i64 + delta * self.width as i64) as u64;
        if self.cursor < self.offset {
            let pull = (self.offset - self.cursor).div_ceil(self.width) * self.width;
            self.cursor += pull.min((self.length.max(1) - 1).saturating_sub(self.cursor));
        }
    }

    fn page_up_by(&mut self, rows: u64) {
        self.offset = self.offset.saturating_sub(rows * self.width);
        if self.offset == 0 {
            self.cursor = 0;
        } else if self.cursor >= self.visible_end() {
            self.cursor = self.offset + (self.height - 1) * self.width;
        }
    }

    fn page_down_by(&mut self, rows: u64) {
        let bottom = layout::last_page_offset(self.length, self.width, self.height);
        self.offset = (self.offset + rows * self.width).min(bottom);
        if self.cursor < self.offset {
            self.cursor = self.offset;
        } else if self.offset == bottom {
            self.cursor = (layout::rows(self.length, self.width) - 1) * self.width;
        }
    }

    fn page_up(&mut self) {
        self.page_up_by(self.height.saturating_sub(2));
    }

    fn page_down(&mut self) {
        self.page_down_by(self.height.saturating_sub(2));
    }

    fn page_up_half(&mut self) {
        self.page_up_by((self.height / 2).max(1));
    }

    fn page_down_half(&mut self) {
        self.page_down_by((self.height / 2).max(1));
    }

    fn page_top(&mut self) {
        self.offset = 0;
        self.cursor = 0;
    }

    fn page_end(&mut self) {
        self.offset = layout::last_page_offset(self.length, self.width, self.height);
        self.cursor = (layout::rows(self.length, self.width) - 1) * self.width;
    }

    // ---- jumping -----------------------------------------------------------

    /// Parse the decimal offset written around the cursor and jump to it.
    /// The scan window is `jump_context` bytes each side; a number touching
    /// the window edge is treated as truncated and ignored, as is anything
    /// that overflows or falls outside `(0, length)`.
    fn jump_to(&mut self) {
        let s = self.opts.jump_context;
        let Ok((_, bytes)) = self.read_bytes(self.cursor.saturating_sub(s as u64), 2 * s) else {
            return;
        };
        let mut i = s;
        while i < 2 * s && is_blank(bytes[i]) {
            i += 1;
        }
        if i == 2 * s || !bytes[i].is_ascii_digit() {
            return;
        }
        while i > 0 && bytes[i - 1].is_ascii_digit() {
            i -= 1;
        }
        let mut j = i;
        while j < 2 * s && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == 2 * s {
            return;
        }
        let Ok(text) = std::str::from_utf8(&bytes[i..j]) else {
            return;
        };
        let Ok(target) = text.parse::<i64>() else {
            return;
        };
        let target = target as u64;
        if target == 0 || self.length <= target {
            return;
        }
        self.stack.push((self.cursor, self.offset));
        self.cursor = target;
        self.offset =
            layout::align(target, self.width).saturating_sub(self.height / 3 * self.width);
        trace!(target: "window.event", to = target, "jump");
    }

    fn jump_back(&mut self) {
        if let Some((cursor, offset)) = self.stack.pop() {
            self.cursor = cursor;
            self.offset = offset;
        }
    }

    // ---- byte mutation -----------------------------------------------------

    fn delete_bytes_forward(&mut self, count: i64) {
        if self.length == 0 {
            return;
        }
        let cnt = reps(count)
            .min(self.width - self.cursor % self.width)
            .min(self.length - self.cursor);
        for _ in 0..cnt {
            self.delete_at(self.cursor);
            self.length -= 1;
            if self.cursor == self.length && self.cursor > 0 {
                self.cursor -= 1;
            }
        }
    }

    fn delete_bytes_backward(&mut self, count: i64) {
        let cnt = reps(count).min(self.cursor % self.width);
        for _ in 0..cnt {
            self.delete_at(self.cursor - 1);
            self.cursor -= 1;
            self.length -= 1;
        }
    }

    fn increment(&mut self, count: i64) {
        let Ok((_, bytes)) = self.read_bytes(self.cursor, 1) else {
            return;
        };
        self.replace_at(self.cursor, bytes[0].wrapping_add((reps(count) % 256) as u8));
        if self.length == 0 {
            self.length = 1;
        }
    }

    fn decrement(&mut self, count: i64) {
        let Ok((_, bytes)) = self.read_bytes(self.cursor, 1) else {
            return;
        };
        self.replace_at(self.cursor, bytes[0].wrapping_sub((reps(count) % 256) as u8));
        if self.length == 0 {
            self.length = 1;
        }
    }

    // ---- mode transitions --------------------------------------------------

    /// Entering insert at the very end enables the phantom byte so the
    /// cursor can rest past the last real one.
    fn start_extending_if_at_end(&mut self) {
        if self.cursor == self.length {
            self.append = true;
            self.extending = true;
            self.length += 1;
        }
    }

    fn start_insert(&mut self) {
        self.append = false;
        self.extending = false;
        self.pending = false;
        self.start_extending_if_at_end();
    }

    fn start_insert_head(&mut self) {
        self.cursor_head();
        self.start_insert();
    }

    fn start_append(&mut self) {
        self.append = true;
        self.extending = false;
        self.pending = false;
        if self.length > 0 {
            self.cursor += 1;
        }
        if self.cursor == self.length {
            self.extending = true;
            self.length += 1;
        }
        self.scroll_cursor_into_view_down();
    }

    fn start_append_end(&mut self) {
        self.cursor_end(0);
        self.start_append();
    }

    fn start_replace_byte(&mut self) {
        self.replace_byte = true;
        self.append = false;
        self.extending = false;
        self.pending = false;
    }

    fn start_replace(&mut self) {
        self.replace_byte = false;
        self.append = false;
        self.extending = false;
        self.pending = false;
    }

    fn exit_insert(&mut self) {
        self.pending = false;
        if self.append {
            if self.extending && self.length > 0 {
                self.length -= 1;
            }
            if self.cursor > 0 {
                self.cursor -= 1;
            }
            self.replace_byte = false;
            self.append = false;
            self.extending = false;
        }
    }

    // ---- nibble input ------------------------------------------------------

    fn input_rune(&mut self, mode: Mode, ch: char) {
        if !matches!(mode, Mode::Insert | Mode::Replace) {
            return;
        }
        if self.focus_text {
            let mut utf8 = [0u8; 4];
            for &b in ch.encode_utf8(&mut utf8).as_bytes() {
                self.input_nibble(mode, b >> 4);
                self.input_nibble(mode, b & 0x0f);
            }
        } else if matches!(ch, '0'..='9' | 'a'..='f') {
            self.input_nibble(mode, ch.to_digit(16).unwrap_or(0) as u8);
        }
    }

    /// The two-stroke accumulator: the first nibble latches as the pending
    /// high half, the second forms the byte and commits it.
    fn input_nibble(&mut self, mode: Mode, nibble: u8) {
        if !self.pending {
            self.pending = true;
            self.pending_byte = nibble << 4;
            return;
        }
        let b = self.pending_byte | nibble;
        match mode {
            Mode::Insert => {
                self.insert_at(self.cursor, b);
                self.cursor += 1;
                self.length += 1;
            }
            Mode::Replace => {
                self.replace_at(self.cursor, b);
                if self.length == 0 {
                    self.length = 1;
                }
                if self.replace_byte {
                    self.exit_insert();
                } else {
                    self.cursor += 1;
                    self.start_extending_if_at_end();
                }
            }
            Mode::Normal => {}
        }
        self.scroll_cursor_into_view_down();
        self.pending = false;
        self.pending_byte = 0;
    }

    fn backspace(&mut self) {
        if self.pending {
            self.pending = false;
            self.pending_byte = 0;
        } else if self.cursor > 0 {
            self.delete_at(self.cursor - 1);
            self.cursor -= 1;
            self.length -= 1;
        }
    }

    fn switch_focus(&mut self) {
        self.focus_text = !self.focus_text;
        if self.pending {
            self.pending = false;
            self.pending_byte = 0;
        }
        self.changed_tick += 1;
    }

    // ---- history -----------------------------------------------------------

    fn undo(&mut self, count: i64) {
        for _ in 0..reps(count) {
            let Some((buffer, offset, cursor)) = self.history.undo() else {
                return;
            };
            self.buffer = buffer;
            self.offset = offset;
            self.cursor = cursor;
            self.refresh_length();
        }
    }

    fn redo(&mut self, count: i64) {
        for _ in 0..reps(count) {
            let Some((buffer, offset, cursor)) = self.history.redo() else {
                return;
            };
            self.buffer = buffer;
            self.offset = offset;
            self.cursor = cursor;
            self.refresh_length();
        }
    }

    // ---- search ------------------------------------------------------------

    fn search(&mut self, pattern: &str, forward: bool) {
        if forward {
            self.search_forward(pattern);
        } else {
            self.search_backward(pattern);
        }
    }

    fn search_budget(&self, pattern_len: usize) -> usize {
        ((self.height * self.width) as usize * self.opts.search_window).max(pattern_len * 500)
    }

    fn search_forward(&mut self, pattern: &str) {
        let target = pattern.as_bytes();
        let base = self.cursor + 1;
        let Ok((n, bytes)) = self.read_bytes(base, self.search_budget(target.len())) else {
            return;
        };
        let Some(i) = search::find_first(&bytes[..n], target) else {
            return;
        };
        self.cursor = base + i as u64;
        if self.cursor >= self.visible_end() {
            self.offset =
                (self.cursor - self.height * self.width + self.width + 1) / self.width * self.width;
        }
    }

    fn search_backward(&mut self, pattern: &str) {
        let target = pattern.as_bytes();
        let size = self.search_budget(target.len());
        let base = self.cursor.saturating_sub(size as u64);
        let Ok((n, bytes)) = self.read_bytes(base, size.min(self.cursor as usize)) else {
            return;
        };
        let Some(i) = search::find_last(&bytes[..n], target) else {
            return;
        };
        self.cursor = base + i as u64;
        if self.cursor < self.offset {
            self.offset = layout::align(self.cursor, self.width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_buffer::MemSource;

    fn window(content: &[u8], width: u64, height: u64) -> WindowInner {
        let mut inner = WindowInner::new(
            Arc::new(MemSource::from(content)),
            "test".to_string(),
            WindowOptions::default(),
        )
        .unwrap();
        inner.set_size(width, height);
        inner
    }

    fn ev(kind: EventKind, mode: Mode) -> Event {
        Event::new(kind, mode)
    }

    fn contents(w: &WindowInner) -> Vec<u8> {
        let len = w.buffer.len().unwrap() as usize;
        let (n, bytes) = w.read_bytes(0, len).unwrap();
        assert_eq!(n, len);
        bytes
    }

    #[test]
    fn nibble_pair_inserts_one_byte() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('a'));
        assert!(w.pending);
        assert_eq!(w.pending_byte, 0xa0);
        assert_eq!(w.length, 16, "pending nibble does not touch the buffer");

        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('b'));
        assert!(!w.pending);
        assert_eq!(w.cursor, 1);
        assert_eq!(w.length, 17);
        assert_eq!(contents(&w)[0], 0xab);
    }

    #[test]
    fn non_hex_runes_are_ignored_on_the_bytes_panel() {
        let mut w = window(b"0123", 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        for ch in ['g', 'A', 'F', ' ', '-'] {
            w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune(ch));
        }
        assert!(!w.pending);
        assert_eq!(w.length, 4);
    }

    #[test]
    fn text_focus_inserts_utf8_bytes() {
        let mut w = window(b"0123", 16, 10);
        w.dispatch(ev(EventKind::SwitchFocus, Mode::Normal));
        assert!(w.focus_text);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('A'));
        assert_eq!(w.length, 5);
        assert_eq!(contents(&w)[0], 0x41);

        // Two-byte code point arrives as two committed bytes.
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('\u{00e9}'));
        assert_eq!(w.length, 7);
        assert_eq!(&contents(&w)[1..3], &[0xc3, 0xa9]);
    }

    #[test]
    fn backspace_cancels_pending_nibble_without_editing() {
        let mut w = window(b"0123", 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('f'));
        let tick = w.changed_tick;
        w.dispatch(ev(EventKind::Backspace, Mode::Insert));
        assert!(!w.pending);
        assert_eq!(w.changed_tick, tick);
        assert_eq!(w.length, 4);

        // Without a pending nibble backspace deletes the previous byte.
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('0'));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('0'));
        assert_eq!(w.length, 5);
        w.dispatch(ev(EventKind::Backspace, Mode::Insert));
        assert_eq!(w.length, 4);
        assert_eq!(w.cursor, 0);
        assert_eq!(contents(&w), b"0123");
    }

    #[test]
    fn replace_mode_overwrites_and_advances() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::StartReplace, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Replace).with_rune('4'));
        w.dispatch(ev(EventKind::Rune, Mode::Replace).with_rune('1'));
        assert_eq!(contents(&w)[0], 0x41);
        assert_eq!(w.cursor, 1);
        assert_eq!(w.length, 16);
    }

    #[test]
    fn replace_byte_exits_after_one_byte() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::StartReplaceByte, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Replace).with_rune('f'));
        w.dispatch(ev(EventKind::Rune, Mode::Replace).with_rune('f'));
        assert_eq!(contents(&w)[0], 0xff);
        assert_eq!(w.cursor, 0, "single-byte replace stays put");
        assert!(!w.pending);
        assert_eq!(w.length, 16);
    }

    #[test]
    fn append_at_end_uses_phantom_byte() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::StartAppendEnd, Mode::Normal));
        assert!(w.append && w.extending);
        assert_eq!(w.cursor, 16);
        assert_eq!(w.length, 17, "phantom byte is counted while extending");

        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('a'));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('b'));
        assert_eq!(w.cursor, 17);
        assert_eq!(w.length, 18);

        w.dispatch(ev(EventKind::ExitInsert, Mode::Insert));
        assert_eq!(w.length, 17, "phantom byte dropped on exit");
        assert_eq!(w.cursor, 16);
        assert!(!w.append && !w.extending);
        assert_eq!(contents(&w)[16], 0xab);
        assert_eq!(w.buffer.len().unwrap(), 17);
    }

    #[test]
    fn moving_off_the_phantom_releases_it() {
        let mut w = window(b"abcd", 16, 10);
        w.cursor = 4;
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        assert!(w.extending);
        assert_eq!(w.length, 5);
        w.dispatch(ev(EventKind::CursorLeft, Mode::Insert).with_count(2));
        assert!(!w.extending && !w.append);
        assert_eq!(w.length, 4);
    }

    #[test]
    fn undo_redo_round_trip() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        for ch in ['a', 'b', 'c', 'd', 'e', 'f'] {
            w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune(ch));
        }
        assert_eq!(w.length, 19);
        assert_eq!(w.cursor, 3);
        w.dispatch(ev(EventKind::ExitInsert, Mode::Insert));
        assert_eq!(w.history.depth(), 2, "exit after an edit burst pushes once");

        w.dispatch(ev(EventKind::Undo, Mode::Normal));
        assert_eq!(w.length, 16);
        assert_eq!(w.cursor, 0);
        assert_eq!(w.offset, 0);
        assert_eq!(contents(&w), b"0123456789abcdef");

        w.dispatch(ev(EventKind::Redo, Mode::Normal));
        assert_eq!(w.length, 19);
        assert_eq!(w.cursor, 3);
        assert_eq!(&contents(&w)[..3], &[0xab, 0xcd, 0xef]);

        // Past the ends both directions are no-ops.
        w.dispatch(ev(EventKind::Redo, Mode::Normal));
        assert_eq!(w.length, 19);
        w.dispatch(ev(EventKind::Undo, Mode::Normal).with_count(5));
        assert_eq!(w.length, 16);
    }

    #[test]
    fn navigation_after_edit_burst_records_commit_point() {
        let mut w = window(&[0u8; 64], 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('a'));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('b'));
        assert_eq!(w.history.depth(), 1);

        w.dispatch(ev(EventKind::CursorDown, Mode::Insert));
        assert_eq!(w.history.depth(), 2, "navigation after an edit pushes");
        w.dispatch(ev(EventKind::CursorDown, Mode::Insert));
        assert_eq!(w.history.depth(), 2, "only the first navigation pushes");

        w.dispatch(ev(EventKind::ExitInsert, Mode::Insert));
        assert_eq!(w.history.depth(), 2, "burst already committed");
    }

    #[test]
    fn normal_mode_edits_push_history() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(ev(EventKind::DeleteByte, Mode::Normal));
        w.dispatch(ev(EventKind::Increment, Mode::Normal));
        assert_eq!(w.history.depth(), 3);
        w.dispatch(ev(EventKind::CursorDown, Mode::Normal));
        assert_eq!(w.history.depth(), 3, "navigation alone never pushes");
    }

    #[test]
    fn delete_byte_is_limited_to_row_and_length() {
        let mut w = window(b"0123456789abcdef", 8, 4);
        w.cursor = 6;
        w.dispatch(ev(EventKind::DeleteByte, Mode::Normal).with_count(10));
        assert_eq!(w.length, 14, "clipped at the end of the row");
        assert_eq!(contents(&w), b"01234589abcdef");

        // Deleting the final byte steps the cursor back.
        let mut w = window(b"ab", 8, 4);
        w.cursor = 1;
        w.dispatch(ev(EventKind::DeleteByte, Mode::Normal));
        assert_eq!(w.length, 1);
        assert_eq!(w.cursor, 0);
        w.dispatch(ev(EventKind::DeleteByte, Mode::Normal));
        assert_eq!(w.length, 0);
        assert_eq!(w.cursor, 0);
        w.dispatch(ev(EventKind::DeleteByte, Mode::Normal));
        assert_eq!(w.length, 0, "empty buffer deletes are no-ops");
    }

    #[test]
    fn delete_prev_byte_stops_at_row_head() {
        let mut w = window(b"0123456789abcdef", 8, 4);
        w.cursor = 10;
        w.dispatch(ev(EventKind::DeletePrevByte, Mode::Normal).with_count(5));
        assert_eq!(w.cursor, 8, "never crosses the row head");
        assert_eq!(w.length, 14);
        assert_eq!(contents(&w), b"01234567abcdef");
    }

    #[test]
    fn increment_and_decrement_wrap() {
        let mut w = window(&[0xff, 0x00], 16, 10);
        w.dispatch(ev(EventKind::Increment, Mode::Normal));
        assert_eq!(contents(&w)[0], 0x00);
        w.dispatch(ev(EventKind::Decrement, Mode::Normal).with_count(2));
        assert_eq!(contents(&w)[0], 0xfe);
    }

    #[test]
    fn increment_on_empty_buffer_creates_a_byte() {
        let mut w = window(b"", 16, 10);
        w.dispatch(ev(EventKind::Increment, Mode::Normal));
        assert_eq!(w.length, 1);
        let (n, bytes) = w.read_bytes(0, 1).unwrap();
        assert_eq!(n, 1);
        assert_eq!(bytes[0], 1);
    }

    #[test]
    fn switch_focus_clears_pending_state() {
        let mut w = window(b"0123", 16, 10);
        w.dispatch(ev(EventKind::StartInsert, Mode::Normal));
        w.dispatch(ev(EventKind::Rune, Mode::Insert).with_rune('a'));
        assert!(w.pending);
        w.dispatch(ev(EventKind::SwitchFocus, Mode::Insert));
        assert!(w.focus_text);
        assert!(!w.pending);
        assert_eq!(w.pending_byte, 0);
    }

    #[test]
    fn search_forward_and_backward() {
        let mut w = window(b"0123456789abcdef", 16, 10);
        w.dispatch(
            ev(EventKind::ExecuteSearch, Mode::Normal)
                .with_rune('/')
                .with_arg("789"),
        );
        assert_eq!(w.cursor, 7);

        w.cursor = 15;
        w.dispatch(
            ev(EventKind::ExecuteSearch, Mode::Normal)
                .with_rune('?')
                .with_arg("345"),
        );
        assert_eq!(w.cursor, 3);

        // A miss leaves everything alone.
        w.dispatch(
            ev(EventKind::ExecuteSearch, Mode::Normal)
                .with_rune('/')
                .with_arg("zzz"),
        );
        assert_eq!(w.cursor, 3);
    }

    #[test]
    fn reverse_search_direction_flips_with_trigger() {
        let mut w = window(b"12ab34ab56", 16, 10);
        w.cursor = 5;
        // PreviousSearch with a forward trigger searches backward.
        w.dispatch(
            ev(EventKind::PreviousSearch, Mode::Normal)
                .with_rune('/')
                .with_arg("ab"),
        );
        assert_eq!(w.cursor, 2);
        w.dispatch(
            ev(EventKind::PreviousSearch, Mode::Normal)
                .with_rune('?')
                .with_arg("ab"),
        );
        assert_eq!(w.cursor, 6);
    }

    #[test]
    fn search_does_not_match_the_cursor_position_itself() {
        let mut w = window(b"abcabc", 16, 10);
        w.dispatch(
            ev(EventKind::ExecuteSearch, Mode::Normal)
                .with_rune('/')
                .with_arg("abc"),
        );
        assert_eq!(w.cursor, 3, "forward search starts one past the cursor");
        w.dispatch(
            ev(EventKind::ExecuteSearch, Mode::Normal)
                .with_rune('?')
                .with_arg("abc"),
        );
        assert_eq!(w.cursor, 0, "backward search excludes the cursor byte");
    }

    #[test]
    fn jump_to_parses_the_address_under_the_cursor() {
        let mut content = vec![0x20u8; 200];
        content[60] = b'7';
        content[61] = b'5';
        let mut w = window(&content, 16, 10);
        w.cursor = 60;
        w.dispatch(ev(EventKind::JumpTo, Mode::Normal));
        assert_eq!(w.cursor, 75);
        assert_eq!(w.offset, 16, "target centered with a height/3 margin");

        w.dispatch(ev(EventKind::JumpBack, Mode::Normal));
        assert_eq!(w.cursor, 60);
        assert_eq!(w.offset, 0);
        // Stack is empty now; another jump back is a no-op.
        w.dispatch(ev(EventKind::JumpBack, Mode::Normal));
        assert_eq!(w.cursor, 60);
    }

    #[test]
    fn jump_to_rejects_out_of_range_targets() {
        let mut content = vec![0x20u8; 100];
        content[60] = b'9';
        content[61] = b'9';
        content[62] = b'9';
        let mut w = window(&content, 16, 10);
        w.cursor = 60;
        w.dispatch(ev(EventKind::JumpTo, Mode::Normal));
        assert_eq!(w.cursor, 60, "target past the end is ignored");
        assert!(w.stack.is_empty());
    }

    #[test]
    fn goto_abs_centers_the_target() {
        let mut w = window(&[0u8; 200], 16, 4);
        w.dispatch(ev(EventKind::CursorGotoAbs, Mode::Normal).with_count(100));
        assert_eq!(w.cursor, 100);
        assert_eq!(w.offset, 80);
        assert_eq!(w.offset % 16, 0);

        w.dispatch(ev(EventKind::CursorGotoRel, Mode::Normal).with_count(-100));
        assert_eq!(w.cursor, 0);
        assert_eq!(w.offset, 0);

        // Clamped at the last byte.
        w.dispatch(ev(EventKind::CursorGotoAbs, Mode::Normal).with_count(10_000));
        assert_eq!(w.cursor, 199);
    }

    #[test]
    fn paging_and_scrolling_stay_aligned() {
        let mut w = window(&[0u8; 400], 16, 10);
        w.dispatch(ev(EventKind::PageDown, Mode::Normal));
        assert_eq!(w.offset, 8 * 16);
        assert_eq!(w.cursor, w.offset);

        w.dispatch(ev(EventKind::PageEnd, Mode::Normal));
        assert_eq!(w.offset, layout::last_page_offset(400, 16, 10));
        assert_eq!(w.cursor, (layout::rows(400, 16) - 1) * 16);

        w.dispatch(ev(EventKind::PageTop, Mode::Normal));
        assert_eq!((w.offset, w.cursor), (0, 0));

        w.dispatch(ev(EventKind::ScrollDown, Mode::Normal).with_count(3));
        assert_eq!(w.offset, 48);
        assert_eq!(w.cursor, 48, "cursor pulled along by the viewport");
        w.dispatch(ev(EventKind::ScrollUp, Mode::Normal).with_count(1));
        assert_eq!(w.offset, 32);
    }

    #[test]
    fn set_size_realigns_and_clamps_the_offset() {
        let mut w = window(&[0u8; 100], 16, 4);
        w.offset = 33;
        w.cursor = 40;
        w.set_size(8, 4);
        assert_eq!(w.offset % 8, 0);
        assert!(w.cursor >= w.offset);
        assert!(w.offset <= layout::align(100 - 1 - 4 * 8 + 8, 8));
    }

    #[test]
    fn state_snapshot_reflects_the_viewport() {
        let mut w = window(b"0123456789abcdef", 4, 2);
        w.dispatch(ev(EventKind::CursorGotoAbs, Mode::Normal).with_count(9));
        let state = w.snapshot().unwrap();
        assert_eq!(state.width, 4);
        assert_eq!(state.cursor, 9);
        assert_eq!(state.offset % 4, 0);
        assert_eq!(state.bytes.len(), 8);
        assert_eq!(state.size, 8);
        assert_eq!(
            &state.bytes,
            &b"0123456789abcdef"[state.offset as usize..state.offset as usize + 8]
        );
        assert_eq!(state.length, 16);
        assert!(!state.pending);
        assert!(state.edited_indices.is_empty());
    }

    #[test]
    #[should_panic(expected = "undo must be emitted under normal mode")]
    fn undo_outside_normal_mode_is_a_contract_violation() {
        let mut w = window(b"0123", 16, 10);
        w.dispatch(ev(EventKind::Undo, Mode::Insert));
    }
}
