//! Edit adjusters
//!
//! An [`Adjuster`] maps a pre-edit `(line, col)` to its post-edit position.
//! Editor bindings turn raw change events into adjusters; a change event
//! may carry several sub-edits, which yield one adjuster each and are folded
//! left in report order.
//!
//! Two bindings satisfy the same contract:
//!
//! - [`range::RangeEditBinding`] for editors that report an explicit range plus
//!   replacement text
//! - [`diff::DiffEditBinding`] for editors that report old/new document states
//!   plus a [`changes::ChangeSet`] mapping primitive
//!
//! # Contract
//!
//! For an edit replacing `[start, end]` with text `T`:
//!
//! 1. Positions before `start` are unchanged.
//! 2. Positions after `end` shift by the net line/column delta of `T`.
//! 3. Positions inside `[start, end)` keep whichever of `start` and the end of
//!    the inserted text is closest to where they were; ties go forward.
//! 4. Adjusters of one batch are folded left in report order.
//! 5. A position exactly at `end` moves with the inserted text, so content
//!    typed right after a tracked span extends it.

pub mod changes;
pub mod diff;
pub mod range;

use std::fmt;
use std::sync::Arc;

use crate::position::Position;

pub use changes::{Bias, ChangeSet, OffsetChange};
pub use diff::{DiffEditBinding, EditTransaction};
pub use range::{RangeChange, RangeEditBinding, TextRange};

/// Maps a pre-edit position to its post-edit position
#[derive(Clone)]
pub struct Adjuster(Arc<dyn Fn(u32, u32) -> (u32, u32) + Send + Sync>);

impl Adjuster {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u32, u32) -> (u32, u32) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|line, col| (line, col))
    }

    #[inline]
    pub fn apply(&self, line: u32, col: u32) -> (u32, u32) {
        (self.0)(line, col)
    }

    pub fn apply_pos(&self, pos: Position) -> Position {
        self.apply(pos.line, pos.col).into()
    }
}

impl fmt::Debug for Adjuster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Adjuster(..)")
    }
}

/// Fold a batch of adjusters over one position, left to right
pub fn fold(batch: &[Adjuster], line: u32, col: u32) -> (u32, u32) {
    batch
        .iter()
        .fold((line, col), |(line, col), adjuster| adjuster.apply(line, col))
}

/// Collapse a batch into a single adjuster with the same effect
pub fn compose(batch: Vec<Adjuster>) -> Adjuster {
    Adjuster::new(move |line, col| fold(&batch, line, col))
}

/// Position just past `text` when it is inserted at `start`
pub(crate) fn end_of_insertion(start: Position, text: &str) -> Position {
    match text.rfind('\n') {
        None => Position::new(start.line, start.col + text.chars().count() as u32),
        Some(idx) => {
            let newlines = text.matches('\n').count() as u32;
            let tail = text[idx + 1..].chars().count() as u32;
            Position::new(start.line + newlines, tail + 1)
        }
    }
}

/// Pick whichever projection of a position swallowed by an edit is nearest
/// to where it used to be. Ties favour `forward`.
pub(crate) fn closest(original: Position, backward: Position, forward: Position) -> Position {
    if distance(original, forward) <= distance(original, backward) {
        forward
    } else {
        backward
    }
}

fn distance(a: Position, b: Position) -> (u32, u32) {
    (a.line.abs_diff(b.line), a.col.abs_diff(b.col))
}
