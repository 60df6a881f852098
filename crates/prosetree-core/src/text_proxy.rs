//! Read-only views over parts of a text run.
//!
//! A proxy is not a tree node: it is constructed on demand by walkers and
//! range iteration when a boundary falls inside a text run. Every accessor
//! takes `&Document`, so a proxy cannot be consulted while the tree is
//! mutating. Do not retain a proxy across a mutation — the text node it
//! points into may be split, merged away or re-filled by the next operation,
//! and the proxy will silently describe the new content.

use crate::document::{Document, ModelError};
use crate::node::{Attributes, NodeId};
use crate::position::Position;
use crate::range::Range;

/// View over `[offset_in_text, offset_in_text + length)` of a text node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextProxy {
    text_node: NodeId,
    offset_in_text: usize,
    length: usize,
}

impl TextProxy {
    pub fn new(
        doc: &Document,
        text_node: NodeId,
        offset_in_text: usize,
        length: usize,
    ) -> Result<Self, ModelError> {
        let size = doc.offset_size(text_node);
        if offset_in_text > size {
            return Err(ModelError::TextProxyWrongOffset {
                offset: offset_in_text,
                size,
            });
        }
        if offset_in_text + length > size {
            return Err(ModelError::TextProxyWrongLength {
                offset: offset_in_text,
                length,
                size,
            });
        }
        Ok(Self {
            text_node,
            offset_in_text,
            length,
        })
    }

    pub fn text_node(&self) -> NodeId {
        self.text_node
    }

    pub fn offset_in_text(&self) -> usize {
        self.offset_in_text
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// The covered characters.
    pub fn data(&self, doc: &Document) -> String {
        doc.text_data(self.text_node)
            .map(|data| {
                data.chars()
                    .skip(self.offset_in_text)
                    .take(self.length)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `false` when the proxy spans the whole text node.
    pub fn is_partial(&self, doc: &Document) -> bool {
        self.length != doc.offset_size(self.text_node)
    }

    pub fn parent(&self, doc: &Document) -> Option<NodeId> {
        doc.parent_of(self.text_node)
    }

    /// Offset in the parent at which the view starts; delegates to the text
    /// node, so it reflects the tree as of the call.
    pub fn start_offset(&self, doc: &Document) -> Result<usize, ModelError> {
        Ok(doc.start_offset(self.text_node)? + self.offset_in_text)
    }

    pub fn end_offset(&self, doc: &Document) -> Result<usize, ModelError> {
        Ok(self.start_offset(doc)? + self.length)
    }

    pub fn attr<'d>(&self, doc: &'d Document, key: &str) -> Option<&'d serde_json::Value> {
        doc.attr(self.text_node, key)
    }

    pub fn attributes<'d>(&self, doc: &'d Document) -> Option<&'d Attributes> {
        doc.attributes(self.text_node)
    }

    /// The range covering exactly this view.
    pub fn range(&self, doc: &Document) -> Result<Range, ModelError> {
        let parent = doc
            .parent_of(self.text_node)
            .ok_or(ModelError::DetachedNode(self.text_node))?;
        let start = self.start_offset(doc)?;
        Ok(Range::new(
            Position::at(doc, parent, start)?,
            Position::at(doc, parent, start + self.length)?,
        ))
    }
}

/// A single character of a text node, as a length-one [`TextProxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterProxy(TextProxy);

impl CharacterProxy {
    pub fn new(doc: &Document, text_node: NodeId, offset_in_text: usize) -> Result<Self, ModelError> {
        Ok(Self(TextProxy::new(doc, text_node, offset_in_text, 1)?))
    }

    pub fn character(&self, doc: &Document) -> Option<char> {
        self.0.data(doc).chars().next()
    }

    pub fn as_proxy(&self) -> &TextProxy {
        &self.0
    }
}
