//! Packed line/column positions
//!
//! Positions travel on the wire as a single integer per endpoint:
//! `(line << 12) | column`. Lines and columns are 1-based; a column occupies
//! the low 12 bits, so anything above 4095 must be truncated before packing.

use serde::{Deserialize, Serialize};

/// Number of bits reserved for the column
pub const COLUMN_BITS: u32 = 12;

/// Largest column representable in a packed position
pub const MAX_COLUMN: u32 = (1 << COLUMN_BITS) - 1;

/// Pack a line/column pair into its wire form
#[inline]
pub fn pack(line: u32, col: u32) -> u32 {
    (line << COLUMN_BITS) | col
}

/// Unpack a wire position into `(line, col)`
#[inline]
pub fn unpack(packed: u32) -> (u32, u32) {
    (packed >> COLUMN_BITS, packed & MAX_COLUMN)
}

/// A 1-based line/column position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn from_packed(packed: u32) -> Self {
        let (line, col) = unpack(packed);
        Self { line, col }
    }

    pub fn packed(self) -> u32 {
        pack(self.line, self.col)
    }
}

impl From<(u32, u32)> for Position {
    fn from((line, col): (u32, u32)) -> Self {
        Self { line, col }
    }
}

/// Decoded form of a start/end pair of packed positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub line_start: u32,
    pub col_start: u32,
    pub line_end: u32,
    pub col_end: u32,
}

impl Span {
    /// Decode a span from two packed positions
    pub fn from_packed(start: u32, end: u32) -> Self {
        let (line_start, col_start) = unpack(start);
        let (line_end, col_end) = unpack(end);
        Self {
            line_start,
            col_start,
            line_end,
            col_end,
        }
    }

    pub fn start(&self) -> Position {
        Position::new(self.line_start, self.col_start)
    }

    pub fn end(&self) -> Position {
        Position::new(self.line_end, self.col_end)
    }

    /// True if start and end coincide
    pub fn is_point(&self) -> bool {
        self.line_start == self.line_end && self.col_start == self.col_end
    }

    /// True if `pos` lies within the span, inclusive at both ends
    pub fn contains(&self, pos: Position) -> bool {
        self.start() <= pos && pos <= self.end()
    }
}
