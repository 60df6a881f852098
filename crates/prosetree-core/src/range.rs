//! Ranges: spans between two positions in the same root.

use crate::document::{Document, ModelError};
use crate::node::NodeId;
use crate::position::{Position, PositionRelation};
use crate::tree_walker::{TreeWalker, WalkerDirection, WalkerItem};

/// A span of the tree between `start` and `end` (`start <= end`, same root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    pub fn collapsed(position: Position) -> Self {
        Self {
            start: position.clone(),
            end: position,
        }
    }

    /// Range spanning exactly `node` (from before it to after it).
    pub fn on_node(doc: &Document, node: NodeId) -> Result<Self, ModelError> {
        Ok(Self::new(
            Position::before(doc, node)?,
            Position::after(doc, node)?,
        ))
    }

    /// Range covering the whole inside of a container.
    pub fn inside(doc: &Document, container: NodeId) -> Result<Self, ModelError> {
        Ok(Self::new(
            Position::at(doc, container, 0)?,
            Position::at_end(doc, container)?,
        ))
    }

    pub fn root(&self) -> NodeId {
        self.start.root
    }

    pub fn is_collapsed(&self) -> bool {
        self.start.is_equal(&self.end)
    }

    /// `true` when start and end share the same parent.
    pub fn is_flat(&self) -> bool {
        self.start.root == self.end.root && self.start.parent_path() == self.end.parent_path()
    }

    /// Offset-size of a flat range's span.
    pub fn flat_length(&self) -> usize {
        self.end.offset().saturating_sub(self.start.offset())
    }

    /// `true` for positions strictly inside the range.
    pub fn contains_position(&self, position: &Position) -> bool {
        position.is_after(&self.start) && position.is_before(&self.end)
    }

    pub fn contains_range(&self, other: &Range, loose: bool) -> bool {
        if other.is_collapsed() {
            return self.contains_position(&other.start);
        }
        let start_ok = self.contains_position(&other.start)
            || (loose && self.start.is_equal(&other.start));
        let end_ok =
            self.contains_position(&other.end) || (loose && self.end.is_equal(&other.end));
        start_ok && end_ok
    }

    pub fn is_equal(&self, other: &Range) -> bool {
        self.start.is_equal(&other.start) && self.end.is_equal(&other.end)
    }

    pub fn is_intersecting(&self, other: &Range) -> bool {
        self.start.is_before(&other.end) && self.end.is_after(&other.start)
    }

    /// Common part of two ranges, if any.
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        if self.start.root != other.start.root {
            return None;
        }
        let start = if self.start.is_after(&other.start) {
            &self.start
        } else {
            &other.start
        };
        let end = if self.end.is_before(&other.end) {
            &self.end
        } else {
            &other.end
        };
        match start.compare(end) {
            PositionRelation::Before | PositionRelation::Same => {
                Some(Range::new(start.clone(), end.clone()))
            }
            _ => None,
        }
    }

    /// Deepest node containing the whole range.
    pub fn common_ancestor(&self, doc: &Document) -> Option<NodeId> {
        self.start.common_ancestor(&self.end, doc)
    }

    /// Decomposes the range into the minimal list of flat ranges that cover
    /// exactly the same content, in document order.
    pub fn minimal_flat_ranges(&self, doc: &Document) -> Result<Vec<Range>, ModelError> {
        if self.is_collapsed() {
            return Ok(Vec::new());
        }
        let mut ranges = Vec::new();
        let mut common = 0;
        let shorter = self.start.path.len().min(self.end.path.len());
        while common < shorter && self.start.path[common] == self.end.path[common] {
            common += 1;
        }

        let mut pos = self.start.clone();
        // Climb: close off each parent the start is nested in below the
        // common depth.
        while pos.path.len() > common + 1 {
            let parent = pos.parent(doc)?;
            let how_many = doc.max_offset(parent) - pos.offset();
            if how_many != 0 {
                ranges.push(Range::new(pos.clone(), pos.shifted_by(how_many as isize)));
            }
            pos.path.pop();
            let offset = pos.offset();
            pos.set_offset(offset + 1);
        }
        // Descend towards the end position.
        while pos.path.len() <= self.end.path.len() {
            let offset = self.end.path[pos.path.len() - 1];
            let how_many = offset.saturating_sub(pos.offset());
            if how_many != 0 {
                ranges.push(Range::new(pos.clone(), pos.shifted_by(how_many as isize)));
            }
            pos.set_offset(offset);
            pos.path.push(0);
        }
        Ok(ranges)
    }

    /// Walker over the range's content.
    pub fn walk<'a>(&self, doc: &'a Document) -> TreeWalker<'a> {
        TreeWalker::new(doc, self.start.clone(), WalkerDirection::Forward)
            .with_boundaries(self.clone())
    }

    /// Top-level items of the range (elements once, text as proxies).
    pub fn items(&self, doc: &Document) -> Vec<WalkerItem> {
        self.walk(doc)
            .ignore_element_end()
            .map(|step| step.item)
            .collect()
    }

    /// Every position the walker visits inside the range, boundaries
    /// included.
    pub fn positions(&self, doc: &Document) -> Vec<Position> {
        let mut out = vec![self.start.clone()];
        for step in self.walk(doc) {
            if out.last().map(|last| !last.is_equal(&step.next_position)).unwrap_or(true) {
                out.push(step.next_position);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn pos(path: &[usize]) -> Position {
        Position::new(NodeId(1), path.to_vec())
    }

    #[test]
    fn flatness() {
        assert!(Range::new(pos(&[0, 1]), pos(&[0, 4])).is_flat());
        assert!(!Range::new(pos(&[0]), pos(&[1, 2])).is_flat());
    }

    #[test]
    fn containment_is_strict() {
        let range = Range::new(pos(&[1]), pos(&[4]));
        assert!(range.contains_position(&pos(&[2])));
        assert!(!range.contains_position(&pos(&[1])));
        assert!(!range.contains_position(&pos(&[4])));
        // Deeper positions under a covered ancestor are inside.
        assert!(range.contains_position(&pos(&[2, 0])));
    }

    #[test]
    fn intersection_of_overlapping_ranges() {
        let a = Range::new(pos(&[1]), pos(&[5]));
        let b = Range::new(pos(&[3]), pos(&[9]));
        let common = a.intersection(&b).unwrap();
        assert!(common.start.is_equal(&pos(&[3])));
        assert!(common.end.is_equal(&pos(&[5])));
        let c = Range::new(pos(&[7]), pos(&[9]));
        assert!(a.intersection(&c).is_none());
    }
}
