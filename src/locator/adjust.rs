//! Locator adjustment
//!
//! Rewrites every owned position inside a locator tree through an
//! [`Adjuster`]. Traversal is depth-first and total: every `tal` step, every
//! `nodeLocator` argument and every collection entry is visited, and there
//! is no failure path.

use crate::edit::Adjuster;
use crate::position::{pack, MAX_COLUMN};

use super::{NodeLocator, NodeLocatorStep, Property, PropertyArg, TypeAtLoc};

/// Adjust a single type-at-location in place.
///
/// External positions are left untouched. A span whose ends come out
/// inverted is pulled back to its end. If a non-point span would collapse to
/// a single point, the end is rebuilt from the new start plus the original
/// start-to-end delta, so a trivial edit doesn't make the node vanish.
pub fn adjust_type_at_loc(adjuster: &Adjuster, tal: &mut TypeAtLoc) {
    if tal.external {
        return;
    }

    let span = tal.span();
    let (mut line_start, mut col_start) = adjuster.apply(span.line_start, span.col_start);
    let (mut line_end, mut col_end) = adjuster.apply(span.line_end, span.col_end);

    // both ends swallowed by one replacement can snap to opposite edges
    if (line_end, col_end) < (line_start, col_start) {
        (line_start, col_start) = (line_end, col_end);
    }

    if line_start == line_end && col_start == col_end && !span.is_point() {
        line_end = offset(line_start, span.line_end, span.line_start);
        col_end = offset(col_start, span.col_end, span.col_start);
    }

    tal.start = pack(line_start, clamp_column(col_start));
    tal.end = pack(line_end, clamp_column(col_end));
}

/// Adjust every position owned by `locator`
pub fn adjust_locator(adjuster: &Adjuster, locator: &mut NodeLocator) {
    adjust_type_at_loc(adjuster, &mut locator.result);
    for step in &mut locator.steps {
        match step {
            NodeLocatorStep::Child(_) => {}
            NodeLocatorStep::Tal(tal) => adjust_type_at_loc(adjuster, tal),
            NodeLocatorStep::Nta(fn_step) => adjust_property(adjuster, &mut fn_step.property),
        }
    }
}

/// Adjust the locators embedded in a property's arguments
pub fn adjust_property(adjuster: &Adjuster, property: &mut Property) {
    if let Some(args) = property.args.as_mut() {
        for arg in args {
            adjust_arg(adjuster, arg);
        }
    }
}

/// Apply a whole batch of adjusters, in order
pub fn adjust_locator_batch(batch: &[Adjuster], locator: &mut NodeLocator) {
    for adjuster in batch {
        adjust_locator(adjuster, locator);
    }
}

fn adjust_arg(adjuster: &Adjuster, arg: &mut PropertyArg) {
    match arg {
        PropertyArg::NodeLocator(inner) => {
            if let Some(nested) = inner.value.as_mut() {
                adjust_locator(adjuster, nested);
            }
        }
        PropertyArg::Collection(coll) => {
            for entry in &mut coll.entries {
                adjust_arg(adjuster, entry);
            }
        }
        PropertyArg::String(_)
        | PropertyArg::Integer(_)
        | PropertyArg::Bool(_)
        | PropertyArg::OutputStream(_) => {}
    }
}

/// `base + (to - from)`, saturating at zero
fn offset(base: u32, to: u32, from: u32) -> u32 {
    let value = base as i64 + to as i64 - from as i64;
    value.max(0) as u32
}

fn clamp_column(col: u32) -> u32 {
    col.min(MAX_COLUMN)
}
