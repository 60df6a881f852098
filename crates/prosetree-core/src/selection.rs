//! Selections: an ordered list of ranges with a direction flag.

use crate::document::{Document, ModelError};
use crate::node::NodeId;
use crate::position::Position;
use crate::range::Range;

/// A selection over document content. Most selections hold one range; a
/// collapsed selection is a single collapsed range.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    ranges: Vec<Range>,
    backward: bool,
}

impl Selection {
    pub fn collapsed_at(position: Position) -> Self {
        Self {
            ranges: vec![Range::collapsed(position)],
            backward: false,
        }
    }

    pub fn from_range(range: Range) -> Self {
        Self {
            ranges: vec![range],
            backward: false,
        }
    }

    pub fn from_ranges(ranges: Vec<Range>) -> Self {
        Self {
            ranges,
            backward: false,
        }
    }

    /// Selection covering exactly one node.
    pub fn on_node(doc: &Document, node: NodeId) -> Result<Self, ModelError> {
        Ok(Self::from_range(Range::on_node(doc, node)?))
    }

    pub fn backward(mut self) -> Self {
        self.backward = true;
        self
    }

    pub fn is_backward(&self) -> bool {
        self.backward && !self.is_collapsed()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_collapsed(&self) -> bool {
        self.ranges.iter().all(Range::is_collapsed)
    }

    /// Earliest boundary position of the selection.
    pub fn first_position(&self) -> Option<&Position> {
        self.ranges
            .iter()
            .map(|range| &range.start)
            .min_by(|a, b| {
                use crate::position::PositionRelation::*;
                match a.compare(b) {
                    Before => std::cmp::Ordering::Less,
                    After => std::cmp::Ordering::Greater,
                    Same | Different => std::cmp::Ordering::Equal,
                }
            })
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.ranges
            .iter()
            .map(|range| &range.end)
            .max_by(|a, b| {
                use crate::position::PositionRelation::*;
                match a.compare(b) {
                    Before => std::cmp::Ordering::Less,
                    After => std::cmp::Ordering::Greater,
                    Same | Different => std::cmp::Ordering::Equal,
                }
            })
    }

    /// The position edits happen at: the end for forward selections, the
    /// start for backward ones.
    pub fn focus(&self) -> Option<&Position> {
        if self.is_backward() {
            self.first_position()
        } else {
            self.last_position()
        }
    }

    pub fn anchor(&self) -> Option<&Position> {
        if self.is_backward() {
            self.last_position()
        } else {
            self.first_position()
        }
    }
}
