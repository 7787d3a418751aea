//! Piece-table buffer over a read-only byte source.
//!
//! The buffer represents a document as an ordered run of [`Piece`]s, each
//! mapping a contiguous output range `[min, max)` onto either the original
//! [`ByteSource`] or a one-byte in-memory payload created by an edit. The
//! final piece is always source-backed and open-ended (`max == u64::MAX`):
//! the logical length is wherever the source runs out, shifted by that
//! piece's `diff`. This keeps `insert`/`replace` at (or past) the current
//! end on the same code path as interior edits and lets `len()` track the
//! base document without materializing it.
//!
//! Mutations are O(log n) to locate plus a tail shift, which is fine at
//! human edit rates. Clones share the source handle and deep-copy edit
//! payloads, so a clone never observes later mutations of the original —
//! the property history snapshots depend on.

use std::fmt;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::sync::Arc;

mod source;

pub use source::{ByteSource, MemSource};

/// Backing store of a single piece.
#[derive(Clone)]
enum PieceSource {
    /// The original document; shared with every snapshot.
    Source(Arc<dyn ByteSource>),
    /// One edited byte, owned by this piece.
    Bytes(Vec<u8>),
}

impl fmt::Debug for PieceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceSource::Source(_) => f.write_str("Source"),
            PieceSource::Bytes(b) => write!(f, "Bytes({b:02x?})"),
        }
    }
}

/// A run-reference: output range `[min, max)`, backing store, and the delta
/// that turns an output index into a source index (`src = out + diff`).
#[derive(Debug, Clone)]
struct Piece {
    min: u64,
    max: u64,
    diff: i64,
    src: PieceSource,
}

impl Piece {
    fn bytes(offset: u64, b: u8) -> Self {
        Self {
            min: offset,
            max: offset + 1,
            diff: -(offset as i64),
            src: PieceSource::Bytes(vec![b]),
        }
    }
}

/// Piece-table byte buffer: random-access reads, single-byte edits, cheap
/// value snapshots.
#[derive(Debug, Clone)]
pub struct Buffer {
    pieces: Vec<Piece>,
    /// Stream position for the [`Read`]/[`Seek`] implementations.
    index: u64,
}

impl Buffer {
    /// Wrap a source as a single open-ended piece.
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        Self {
            pieces: vec![Piece {
                min: 0,
                max: u64::MAX,
                diff: 0,
                src: PieceSource::Source(source),
            }],
            index: 0,
        }
    }

    /// Logical length: where the open tail's source ends, shifted into
    /// output space.
    pub fn len(&self) -> io::Result<u64> {
        debug_assert!(
            matches!(
                self.pieces.last(),
                Some(Piece {
                    max: u64::MAX,
                    src: PieceSource::Source(_),
                    ..
                })
            ),
            "tail piece must be open-ended and source-backed"
        );
        match self.pieces.last() {
            Some(Piece {
                diff,
                src: PieceSource::Source(src),
                ..
            }) => {
                let end = src.len()? as i64 - diff;
                Ok(end.max(0) as u64)
            }
            _ => Ok(0),
        }
    }

    /// Index of the piece whose `[min, max)` contains `offset`. The tail is
    /// open-ended, so every offset lands somewhere.
    fn locate(&self, offset: u64) -> usize {
        self.pieces.partition_point(|piece| piece.max <= offset)
    }

    /// Read into `dst` starting at output offset `offset`.
    ///
    /// Returns the number of bytes read. When a source-backed piece runs out
    /// of source bytes mid-range the read continues with the next piece at
    /// the next destination position; the caller sees a contiguous prefix
    /// and an untouched tail.
    pub fn read_at(&self, dst: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut filled = 0;
        let mut pos = offset;
        let mut idx = self.locate(offset);
        while filled < dst.len() && idx < self.pieces.len() {
            let piece = &self.pieces[idx];
            let want = ((dst.len() - filled) as u64).min(piece.max - pos) as usize;
            let at = (pos as i64 + piece.diff) as u64;
            let n = match &piece.src {
                PieceSource::Source(src) => src.read_at(&mut dst[filled..filled + want], at)?,
                PieceSource::Bytes(bytes) => {
                    let at = at as usize;
                    let n = want.min(bytes.len().saturating_sub(at));
                    dst[filled..filled + n].copy_from_slice(&bytes[at..at + n]);
                    n
                }
            };
            filled += n;
            pos = piece.max;
            idx += 1;
        }
        Ok(filled)
    }

    /// Insert `b` before output offset `offset`, growing the buffer by one.
    pub fn insert(&mut self, offset: u64, b: u8) {
        let idx = self.locate(offset);
        let piece = self.pieces.remove(idx);
        let mut replacement = Vec::with_capacity(3);
        if piece.min < offset {
            replacement.push(Piece {
                max: offset,
                ..piece.clone()
            });
        }
        replacement.push(Piece::bytes(offset, b));
        // Whatever the split piece covered at and after `offset` moves up one.
        replacement.push(Piece {
            min: offset + 1,
            max: piece.max.saturating_add(1),
            diff: piece.diff - 1,
            src: piece.src,
        });
        let shift_from = idx + replacement.len();
        self.pieces.splice(idx..idx, replacement);
        for piece in &mut self.pieces[shift_from..] {
            piece.min += 1;
            piece.max = piece.max.saturating_add(1);
            piece.diff -= 1;
        }
    }

    /// Overwrite the byte at `offset`; the length is unchanged.
    pub fn replace(&mut self, offset: u64, b: u8) {
        let idx = self.locate(offset);
        if let PieceSource::Bytes(bytes) = &mut self.pieces[idx].src {
            // In-memory pieces hold exactly one byte.
            bytes[0] = b;
            return;
        }
        let piece = self.pieces.remove(idx);
        let mut replacement = Vec::with_capacity(3);
        if piece.min < offset {
            replacement.push(Piece {
                max: offset,
                ..piece.clone()
            });
        }
        replacement.push(Piece::bytes(offset, b));
        if offset + 1 < piece.max {
            replacement.push(Piece {
                min: offset + 1,
                ..piece
            });
        }
        self.pieces.splice(idx..idx, replacement);
    }

    /// Remove the byte at `offset`, shrinking the buffer by one.
    pub fn delete(&mut self, offset: u64) {
        let idx = self.locate(offset);
        let piece = self.pieces.remove(idx);
        let mut replacement = Vec::with_capacity(2);
        if piece.min < offset {
            replacement.push(Piece {
                max: offset,
                ..piece.clone()
            });
        }
        // Bytes after the removed one slide down; a piece that held only the
        // removed byte disappears entirely.
        let max = if piece.max == u64::MAX {
            u64::MAX
        } else {
            piece.max - 1
        };
        if offset < max {
            replacement.push(Piece {
                min: offset,
                max,
                diff: piece.diff + 1,
                src: piece.src,
            });
        }
        let shift_from = idx + replacement.len();
        self.pieces.splice(idx..idx, replacement);
        for piece in &mut self.pieces[shift_from..] {
            piece.min -= 1;
            if piece.max != u64::MAX {
                piece.max -= 1;
            }
            piece.diff += 1;
        }
    }

    /// Flattened `[start, end, start, end, ...]` list of the output ranges
    /// currently backed by in-memory pieces, adjacent ranges coalesced.
    /// These are the user-authored bytes a renderer highlights.
    pub fn edited_indices(&self) -> Vec<u64> {
        let mut out: Vec<u64> = Vec::new();
        for piece in &self.pieces {
            if let PieceSource::Bytes(_) = piece.src {
                if let Some(end) = out.last_mut()
                    && *end == piece.min
                {
                    *end = piece.max;
                } else {
                    out.push(piece.min);
                    out.push(piece.max);
                }
            }
        }
        out
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.index)?;
        self.index += n as u64;
        Ok(n)
    }
}

impl Seek for Buffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => self.index as i64 + d,
            SeekFrom::End(d) => self.len()? as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "seek before the start of the buffer",
            ));
        }
        self.index = target as u64;
        Ok(self.index)
    }
}
