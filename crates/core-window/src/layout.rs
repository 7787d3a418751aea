//! Pure viewport math.
//!
//! The viewport is the rectangle `[offset, offset + height * width)` with
//! `offset` always a multiple of `width` (one row of `width` bytes per
//! terminal line). These helpers compute new offsets for the handful of
//! scrolling shapes the window needs; they never touch window state, so
//! each is testable with plain numbers.

/// First byte of the row containing `offset`.
pub fn align(offset: u64, width: u64) -> u64 {
    offset / width * width
}

/// Total rows needed to display `length` bytes; an empty buffer still
/// occupies one row (the cursor has to live somewhere).
pub fn rows(length: u64, width: u64) -> u64 {
    length.max(1).div_ceil(width)
}

/// Offset that puts `cursor` on the last visible row. Saturates to zero when
/// everything fits on one screen.
pub fn snap_down(cursor: u64, width: u64, height: u64) -> u64 {
    (cursor + width).saturating_sub(height * width) / width * width
}

/// The lowest offset from which a full page of content is still below;
/// paging to the end lands here. Uses the raw length: an empty buffer pages
/// to offset zero.
pub fn last_page_offset(length: u64, width: u64, height: u64) -> u64 {
    length.div_ceil(width).saturating_sub(height) * width
}

/// Center the viewport on a target above it: the target row ends up
/// `height / 2` rows below the top (or at the top when near offset zero).
pub fn center_above(cursor: u64, width: u64, height: u64) -> u64 {
    ((cursor / width).max(height / 2) - height / 2) * width
}

/// Center the viewport on a target below it, clamped so the last row of the
/// buffer stays on screen.
pub fn center_below(cursor: u64, length: u64, width: u64, height: u64) -> u64 {
    let bottom = rows(length, width).saturating_sub(height);
    ((cursor + width).saturating_sub(height * width) / width + height / 2).min(bottom) * width
}
