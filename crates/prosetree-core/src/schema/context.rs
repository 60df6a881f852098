//! Schema query contexts: the ancestor chain a check runs against.

use crate::document::Document;
use crate::node::NodeId;
use crate::position::Position;

/// One item of a context chain: a schema name plus the attribute keys the
/// node carried, so attribute-sensitive hooks can inspect them.
#[derive(Debug, Clone)]
pub struct SchemaContextItem {
    pub name: String,
    pub attribute_keys: Vec<String>,
}

impl SchemaContextItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attribute_keys: Vec::new(),
        }
    }
}

/// Normalized ancestor chain, outermost first.
#[derive(Debug, Clone, Default)]
pub struct SchemaContext {
    items: Vec<SchemaContextItem>,
}

impl SchemaContext {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: names
                .into_iter()
                .map(|name| SchemaContextItem::named(name))
                .collect(),
        }
    }

    /// Chain from the root down to (and including) `node`.
    pub fn from_node(doc: &Document, node: NodeId) -> Self {
        let mut chain = doc.ancestors_of(node);
        chain.push(node);
        Self {
            items: chain
                .into_iter()
                .map(|id| SchemaContextItem {
                    name: doc.schema_name_of(id).unwrap_or_default().to_string(),
                    attribute_keys: doc
                        .attributes(id)
                        .map(|attrs| attrs.keys().cloned().collect())
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// Chain from the root down to the position's parent.
    pub fn from_position(doc: &Document, position: &Position) -> Option<Self> {
        let parent = position.parent(doc).ok()?;
        Some(Self::from_node(doc, parent))
    }

    pub fn push(&mut self, item: SchemaContextItem) {
        self.items.push(item);
    }

    pub fn with(mut self, item: SchemaContextItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items(&self) -> &[SchemaContextItem] {
        &self.items
    }

    pub fn last(&self) -> Option<&SchemaContextItem> {
        self.items.last()
    }

    pub fn last_name(&self) -> Option<&str> {
        self.items.last().map(|item| item.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Anything a schema check accepts as its context argument.
#[derive(Debug, Clone, Copy)]
pub enum ContextRef<'a> {
    Node(NodeId),
    Position(&'a Position),
    Names(&'a [&'a str]),
    Context(&'a SchemaContext),
}

impl ContextRef<'_> {
    /// Normalizes into a [`SchemaContext`]; `None` when a position no
    /// longer resolves (queries then degrade to a negative answer).
    pub fn normalize(&self, doc: &Document) -> Option<SchemaContext> {
        match self {
            ContextRef::Node(id) => Some(SchemaContext::from_node(doc, *id)),
            ContextRef::Position(position) => SchemaContext::from_position(doc, position),
            ContextRef::Names(names) => Some(SchemaContext::from_names(names.iter().copied())),
            ContextRef::Context(context) => Some((*context).clone()),
        }
    }
}

impl From<NodeId> for ContextRef<'_> {
    fn from(id: NodeId) -> Self {
        ContextRef::Node(id)
    }
}

impl<'a> From<&'a Position> for ContextRef<'a> {
    fn from(position: &'a Position) -> Self {
        ContextRef::Position(position)
    }
}

impl<'a> From<&'a [&'a str]> for ContextRef<'a> {
    fn from(names: &'a [&'a str]) -> Self {
        ContextRef::Names(names)
    }
}

impl<'a> From<&'a SchemaContext> for ContextRef<'a> {
    fn from(context: &'a SchemaContext) -> Self {
        ContextRef::Context(context)
    }
}
