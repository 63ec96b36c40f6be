//! Node locators
//!
//! A [`NodeLocator`] is a structured, positionally anchored reference to an
//! AST node on the analysis server. The client never resolves locators itself;
//! it only keeps their positions in step with the user's edits so the server
//! can find the same node again after the text changed.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "result": {"start": 4097, "end": 4101, "type": "Expr"},
//!   "steps": [
//!     {"type": "child", "value": 0},
//!     {"type": "tal", "value": {"start": 4097, "end": 4101, "type": "Call"}},
//!     {"type": "nta", "value": {"property": {"name": "decl", "args": []}}}
//!   ]
//! }
//! ```

pub mod adjust;
pub mod handle;

use serde::{Deserialize, Serialize};

use crate::position::Span;

pub use adjust::{adjust_locator, adjust_locator_batch, adjust_property, adjust_type_at_loc};
pub use handle::LocatorHandle;

/// A node type anchored at a packed start/end position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAtLoc {
    pub start: u32,
    pub end: u32,
    #[serde(rename = "type")]
    pub ty: String,
    /// Position belongs to a file the client does not own
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl TypeAtLoc {
    pub fn new(ty: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            ty: ty.into(),
            external: false,
            label: None,
            depth: None,
        }
    }

    pub fn span(&self) -> Span {
        Span::from_packed(self.start, self.end)
    }
}

/// Root of a locator: the node it resolves to plus the path that finds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLocator {
    pub result: TypeAtLoc,
    #[serde(default)]
    pub steps: Vec<NodeLocatorStep>,
}

impl NodeLocator {
    /// A locator with no steps, pointing directly at `result`
    pub fn direct(result: TypeAtLoc) -> Self {
        Self {
            result,
            steps: Vec::new(),
        }
    }
}

/// One hop on the path from the AST root to the located node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NodeLocatorStep {
    /// Child index below the previous node
    Child(u32),
    /// Type-at-location search below the previous node
    Tal(TypeAtLoc),
    /// Nonterminal attribute: the node is the result of a property call
    Nta(FnStep),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnStep {
    pub property: Property,
}

/// A property invocation on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<PropertyArg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast_child_name: Option<String>,
}

impl Property {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
            ast_child_name: None,
        }
    }

    pub fn with_args(name: impl Into<String>, args: Vec<PropertyArg>) -> Self {
        Self {
            name: name.into(),
            args: Some(args),
            ast_child_name: None,
        }
    }
}

/// Argument to a property invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum PropertyArg {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "integer")]
    Integer(i64),
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "outputstream")]
    OutputStream(String),
    #[serde(rename = "collection")]
    Collection(CollectionArg),
    #[serde(rename = "nodeLocator")]
    NodeLocator(NodeLocatorArg),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionArg {
    #[serde(rename = "type")]
    pub ty: String,
    pub entries: Vec<PropertyArg>,
}

/// A locator passed as an argument. `value` is absent for `null` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLocatorArg {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<NodeLocator>,
}
