//! Range-based edit binding
//!
//! For editors whose change events carry an explicit pre-edit range and the
//! text that replaced it. Each sub-edit becomes one adjuster.

use serde::{Deserialize, Serialize};

use crate::position::Position;

use super::{closest, end_of_insertion, Adjuster};

/// Inclusive-start, exclusive-end range in pre-edit coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: Position,
    pub end: Position,
}

impl TextRange {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty range at `at`, as reported for a pure insertion
    pub fn point(at: Position) -> Self {
        Self { start: at, end: at }
    }
}

/// One sub-edit of an editor change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeChange {
    pub range: TextRange,
    pub text: String,
}

impl RangeChange {
    pub fn insert(at: Position, text: impl Into<String>) -> Self {
        Self {
            range: TextRange::point(at),
            text: text.into(),
        }
    }

    pub fn delete(start: Position, end: Position) -> Self {
        Self {
            range: TextRange::new(start, end),
            text: String::new(),
        }
    }

    pub fn replace(start: Position, end: Position, text: impl Into<String>) -> Self {
        Self {
            range: TextRange::new(start, end),
            text: text.into(),
        }
    }

    /// Build the adjuster describing this sub-edit
    pub fn adjuster(&self) -> Adjuster {
        let start = self.range.start;
        let end = self.range.end;
        let new_end = end_of_insertion(start, &self.text);

        Adjuster::new(move |line, col| {
            let pos = Position::new(line, col);
            if pos < start {
                return (line, col);
            }
            if pos >= end {
                let moved = shift_past(pos, end, new_end);
                return (moved.line, moved.col);
            }
            let kept = closest(pos, start, new_end);
            (kept.line, kept.col)
        })
    }
}

/// Move a position at or after `old_end` so it keeps its offset from the end
/// of the edit
fn shift_past(pos: Position, old_end: Position, new_end: Position) -> Position {
    if pos.line == old_end.line {
        Position::new(new_end.line, new_end.col + (pos.col - old_end.col))
    } else {
        let line = pos.line as i64 - old_end.line as i64 + new_end.line as i64;
        Position::new(line.max(1) as u32, pos.col)
    }
}

/// Binding for range + replacement-text change events
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeEditBinding;

impl RangeEditBinding {
    pub fn new() -> Self {
        Self
    }

    /// One adjuster per sub-edit, in report order
    pub fn adjusters(&self, changes: &[RangeChange]) -> Vec<Adjuster> {
        changes.iter().map(RangeChange::adjuster).collect()
    }
}
