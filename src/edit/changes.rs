//! Offset change sets
//!
//! A [`ChangeSet`] describes a document edit as a sequence of retain / delete
//! / insert operations over character offsets, and maps old offsets into the
//! new document. It is the primitive the diff binding is built on.

use ropey::Rope;

/// Which side of an insertion an offset sitting exactly on it ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bias {
    /// Keep the offset in front of the inserted text
    Left,
    /// Push the offset past the inserted text
    #[default]
    Right,
}

/// A single replacement over char offsets of the old document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetChange {
    pub from: usize,
    pub to: usize,
    pub insert: String,
}

impl OffsetChange {
    pub fn new(from: usize, to: usize, insert: impl Into<String>) -> Self {
        Self {
            from,
            to,
            insert: insert.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Retain(usize),
    Delete(usize),
    Insert { text: String, char_len: usize },
}

/// A replaced region, in old and new offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replaced {
    pub old_from: usize,
    pub old_to: usize,
    pub new_from: usize,
    pub new_to: usize,
}

/// Edit over a document of `len` chars producing `len_after` chars
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    ops: Vec<Operation>,
    len: usize,
    len_after: usize,
}

impl ChangeSet {
    /// Build a change set from replacements against a document of `doc_len`
    /// chars. Changes are sorted by position; overlapping changes are merged
    /// into the earlier one.
    pub fn of(doc_len: usize, mut changes: Vec<OffsetChange>) -> Self {
        changes.sort_by_key(|c| (c.from, c.to));

        let mut set = Self {
            ops: Vec::new(),
            len: doc_len,
            len_after: 0,
        };
        let mut cursor = 0;
        for change in changes {
            let from = change.from.clamp(cursor, doc_len);
            let to = change.to.clamp(from, doc_len);
            set.retain(from - cursor);
            set.delete(to - from);
            set.insert(change.insert);
            cursor = to;
        }
        set.retain(doc_len - cursor);
        set
    }

    /// Single replacement covering the difference between two texts, found
    /// by trimming their common prefix and suffix
    pub fn diff(before: &str, after: &str) -> Self {
        let old: Vec<char> = before.chars().collect();
        let new: Vec<char> = after.chars().collect();

        let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
        let max_suffix = old.len().min(new.len()) - prefix;
        let suffix = old
            .iter()
            .rev()
            .zip(new.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        if prefix == old.len() && prefix == new.len() {
            return Self::of(old.len(), Vec::new());
        }

        let inserted: String = new[prefix..new.len() - suffix].iter().collect();
        Self::of(
            old.len(),
            vec![OffsetChange::new(prefix, old.len() - suffix, inserted)],
        )
    }

    fn retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.len_after += n;
        if let Some(Operation::Retain(prev)) = self.ops.last_mut() {
            *prev += n;
        } else {
            self.ops.push(Operation::Retain(n));
        }
    }

    fn delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.ops.push(Operation::Delete(n));
    }

    fn insert(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let char_len = text.chars().count();
        self.len_after += char_len;
        self.ops.push(Operation::Insert { text, char_len });
    }

    /// Length of the document this change set applies to
    pub fn len(&self) -> usize {
        self.len
    }

    /// Length of the document after applying
    pub fn len_after(&self) -> usize {
        self.len_after
    }

    pub fn is_empty(&self) -> bool {
        self.ops
            .iter()
            .all(|op| matches!(op, Operation::Retain(_)))
    }

    /// Char offset in the new document for `offset` in the old one.
    /// Offsets inside a deletion land where the deletion was.
    pub fn map_pos(&self, offset: usize, bias: Bias) -> usize {
        let (mut old, mut new) = (0, 0);
        for op in &self.ops {
            match *op {
                Operation::Retain(n) if offset < old + n => return new + (offset - old),
                Operation::Retain(n) => {
                    old += n;
                    new += n;
                }
                Operation::Delete(n) if offset < old + n => return new,
                Operation::Delete(n) => old += n,
                Operation::Insert { char_len, .. } => {
                    if offset > old || bias == Bias::Right {
                        new += char_len;
                    }
                }
            }
        }
        new + (offset - old)
    }

    /// Regions that were deleted and/or inserted, in document order
    pub fn replaced(&self) -> Vec<Replaced> {
        let mut out: Vec<Replaced> = Vec::new();
        let mut old_pos = 0;
        let mut new_pos = 0;
        let mut open: Option<Replaced> = None;

        for op in &self.ops {
            match op {
                Operation::Retain(n) => {
                    out.extend(open.take());
                    old_pos += n;
                    new_pos += n;
                }
                Operation::Delete(n) => {
                    let region = open.get_or_insert(Replaced {
                        old_from: old_pos,
                        old_to: old_pos,
                        new_from: new_pos,
                        new_to: new_pos,
                    });
                    old_pos += n;
                    region.old_to = old_pos;
                }
                Operation::Insert { char_len, .. } => {
                    let region = open.get_or_insert(Replaced {
                        old_from: old_pos,
                        old_to: old_pos,
                        new_from: new_pos,
                        new_to: new_pos,
                    });
                    new_pos += char_len;
                    region.new_to = new_pos;
                }
            }
        }
        out.extend(open);
        out
    }

    /// Apply to `doc`, producing the new document
    pub fn apply(&self, doc: &Rope) -> Rope {
        let mut out = doc.clone();
        let mut pos = 0;
        for op in &self.ops {
            match op {
                Operation::Retain(n) => pos += n,
                Operation::Delete(n) => out.remove(pos..pos + n),
                Operation::Insert { text, char_len } => {
                    out.insert(pos, text);
                    pos += char_len;
                }
            }
        }
        out
    }
}
