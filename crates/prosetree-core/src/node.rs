//! Tree node primitives.
//!
//! Nodes live in an arena owned by [`Document`](crate::document::Document);
//! a [`NodeId`] is a stable handle into that arena. Parent/child links are
//! ids, never owning pointers, so detached subtrees, graveyard storage and
//! identity comparisons are all cheap.

use indexmap::IndexMap;
use serde_json::Value;

/// Handle to a node in a document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

/// Attribute map of a node.
///
/// Insertion-order preserving so serialization is deterministic. Values are
/// plain JSON data by construction; node references must never be stored
/// here (the tree stays JSON-serializable).
pub type Attributes = IndexMap<String, Value>;

/// The structural variant of a node.
///
/// A tagged union replaces dynamic type checks: call sites match on the
/// variant exhaustively. The string vocabulary (`"element"`, `"$text"`,
/// `"rootElement"`, `"documentFragment"`) appears only at serialization and
/// debug boundaries via [`NodeKind::kind_name`].
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Container element with a name and ordered children.
    Element { name: String, children: Vec<NodeId> },
    /// Leaf text run.
    Text { data: String },
    /// Top-level root owned by the document's roots table.
    RootElement { name: String, children: Vec<NodeId> },
    /// Detached container; never a live-tracking root.
    DocumentFragment { children: Vec<NodeId> },
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Element { .. } => "element",
            NodeKind::Text { .. } => "$text",
            NodeKind::RootElement { .. } => "rootElement",
            NodeKind::DocumentFragment { .. } => "documentFragment",
        }
    }

    /// Element or root name; `None` for text and fragments.
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeKind::Element { name, .. } | NodeKind::RootElement { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The name an item goes by in schema checks: the element name, or
    /// `$text` for text runs, `$documentFragment` for fragments.
    pub fn schema_name(&self) -> &str {
        match self {
            NodeKind::Element { name, .. } | NodeKind::RootElement { name, .. } => name,
            NodeKind::Text { .. } => "$text",
            NodeKind::DocumentFragment { .. } => "$documentFragment",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text { .. })
    }

    pub fn is_element(&self) -> bool {
        matches!(self, NodeKind::Element { .. } | NodeKind::RootElement { .. })
    }

    pub fn is_root(&self) -> bool {
        matches!(self, NodeKind::RootElement { .. })
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self, NodeKind::DocumentFragment { .. })
    }

    /// Children of a container; empty slice for text.
    pub fn children(&self) -> &[NodeId] {
        match self {
            NodeKind::Element { children, .. }
            | NodeKind::RootElement { children, .. }
            | NodeKind::DocumentFragment { children } => children,
            NodeKind::Text { .. } => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            NodeKind::Element { children, .. }
            | NodeKind::RootElement { children, .. }
            | NodeKind::DocumentFragment { children } => Some(children),
            NodeKind::Text { .. } => None,
        }
    }

    /// Text data, if this is a text node.
    pub fn data(&self) -> Option<&str> {
        match self {
            NodeKind::Text { data } => Some(data),
            _ => None,
        }
    }
}

/// A node record in the arena: variant, parent link and attributes.
#[derive(Debug, Clone)]
pub struct NodeData {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) attrs: Attributes,
}

impl NodeData {
    pub(crate) fn new(kind: NodeKind, attrs: Attributes) -> Self {
        Self {
            kind,
            parent: None,
            attrs,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attrs
    }

    /// Number of offset units this node occupies in its parent: text runs
    /// take one unit per character, every other node exactly one.
    pub fn offset_size(&self) -> usize {
        match &self.kind {
            NodeKind::Text { data } => data.chars().count(),
            _ => 1,
        }
    }
}

/// Compares two attribute maps for equality ignoring insertion order.
pub(crate) fn attrs_equal(a: &Attributes, b: &Attributes) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}
