//! State-diff edit binding
//!
//! For editors that report a transaction as the document state before, the
//! state after and a [`ChangeSet`] between them. Positions are converted to
//! offsets in the old state, mapped through the change set with a [`Bias`],
//! and converted back against the new state.

use ropey::Rope;

use crate::position::Position;

use super::changes::Replaced;
use super::{closest, Adjuster, Bias, ChangeSet};

/// One editor transaction
#[derive(Debug, Clone)]
pub struct EditTransaction {
    pub before: Rope,
    pub after: Rope,
    pub changes: ChangeSet,
}

impl EditTransaction {
    /// Transaction applying `changes` to `before`
    pub fn new(before: Rope, changes: ChangeSet) -> Self {
        let after = changes.apply(&before);
        Self {
            before,
            after,
            changes,
        }
    }

    /// Transaction between two document states, diffed by common prefix and
    /// suffix
    pub fn from_states(before: &str, after: &str) -> Self {
        Self {
            before: Rope::from_str(before),
            after: Rope::from_str(after),
            changes: ChangeSet::diff(before, after),
        }
    }

    /// Build the adjuster for this transaction under `bias`
    pub fn adjuster(&self, bias: Bias) -> Adjuster {
        let before = self.before.clone();
        let after = self.after.clone();
        let changes = self.changes.clone();
        let replaced: Vec<Replaced> = changes
            .replaced()
            .into_iter()
            .filter(|r| r.old_from < r.old_to)
            .collect();

        Adjuster::new(move |line, col| {
            let pos = Position::new(line, col);
            let snap = |region: &Replaced| {
                let backward = position_of(&after, region.new_from);
                let forward = position_of(&after, region.new_to);
                let kept = closest(pos, backward, forward);
                (kept.line, kept.col)
            };

            match locate(&before, pos) {
                Located::Column { offset, overflow } => {
                    if overflow == 0 {
                        if let Some(region) = replaced
                            .iter()
                            .find(|r| r.old_from <= offset && offset < r.old_to)
                        {
                            return snap(region);
                        }
                    }
                    let mapped = position_of(&after, changes.map_pos(offset, bias));
                    (mapped.line, mapped.col + overflow)
                }
                // sorts before the first char of its line, so only a deletion
                // that began on an earlier line can swallow it
                Located::LineStart(start) => {
                    if let Some(region) = replaced
                        .iter()
                        .find(|r| r.old_from < start && start <= r.old_to)
                    {
                        return snap(region);
                    }
                    let mapped = after.char_to_line(changes.map_pos(start, Bias::Left));
                    (mapped as u32 + 1, 0)
                }
                Located::BeforeFirstLine => (line, col),
                Located::PastEnd { lines_past } => {
                    ((after.len_lines() + lines_past) as u32 + 1, col)
                }
            }
        })
    }
}

/// Where a pre-edit position falls in the old document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Located {
    /// Char offset, plus how many columns the position sits past the end of
    /// its line
    Column { offset: usize, overflow: u32 },
    /// Column 0 of the line starting at this offset
    LineStart(usize),
    /// Line 0
    BeforeFirstLine,
    /// A line after the last one; `lines_past` counts from the line just
    /// after the document
    PastEnd { lines_past: usize },
}

fn locate(doc: &Rope, pos: Position) -> Located {
    let Some(line_idx) = (pos.line as usize).checked_sub(1) else {
        return Located::BeforeFirstLine;
    };
    if line_idx >= doc.len_lines() {
        return Located::PastEnd {
            lines_past: line_idx - doc.len_lines(),
        };
    }

    let start = doc.line_to_char(line_idx);
    let Some(col) = (pos.col as usize).checked_sub(1) else {
        return Located::LineStart(start);
    };
    let line = doc.line(line_idx);
    let mut len = line.len_chars();
    if len > 0 && line.char(len - 1) == '\n' {
        len -= 1;
    }

    if col <= len {
        Located::Column {
            offset: start + col,
            overflow: 0,
        }
    } else {
        Located::Column {
            offset: start + len,
            overflow: (col - len) as u32,
        }
    }
}

fn position_of(doc: &Rope, offset: usize) -> Position {
    let offset = offset.min(doc.len_chars());
    let line_idx = doc.char_to_line(offset);
    let col = offset - doc.line_to_char(line_idx);
    Position::new(line_idx as u32 + 1, col as u32 + 1)
}

/// Binding for old-state/new-state transactions
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffEditBinding {
    bias: Bias,
}

impl DiffEditBinding {
    /// Binding with the default `Right` bias
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bias(bias: Bias) -> Self {
        Self { bias }
    }

    pub fn bias(&self) -> Bias {
        self.bias
    }

    /// One adjuster per transaction, in report order
    pub fn adjusters(&self, transactions: &[EditTransaction]) -> Vec<Adjuster> {
        transactions
            .iter()
            .map(|tx| tx.adjuster(self.bias))
            .collect()
    }
}
