//! Iterative traversal over the tree between two positions.

use crate::document::Document;
use crate::node::NodeId;
use crate::position::{Position, PositionRelation};
use crate::range::Range;
use crate::text_proxy::TextProxy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerDirection {
    Forward,
    Backward,
}

/// What a walker step stepped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerValue {
    ElementStart,
    ElementEnd,
    Text,
}

/// The item a walker step yielded: a whole element, or a text view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerItem {
    Element(NodeId),
    Text(TextProxy),
}

impl WalkerItem {
    pub fn element(&self) -> Option<NodeId> {
        match self {
            WalkerItem::Element(id) => Some(*id),
            WalkerItem::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&TextProxy> {
        match self {
            WalkerItem::Text(proxy) => Some(proxy),
            WalkerItem::Element(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkerStep {
    pub value: WalkerValue,
    pub item: WalkerItem,
    pub previous_position: Position,
    pub next_position: Position,
    /// Offset units the step covered: 1 for an element start, a text step's
    /// character count, 0 for an element end.
    pub length: usize,
}

/// Walks the tree position-by-position, yielding element boundaries and
/// text views. Borrows the document for its whole lifetime, so the tree
/// cannot change under a walker.
pub struct TreeWalker<'a> {
    doc: &'a Document,
    position: Position,
    boundaries: Option<Range>,
    direction: WalkerDirection,
    single_characters: bool,
    shallow: bool,
    ignore_element_end: bool,
    done: bool,
}

impl<'a> TreeWalker<'a> {
    pub fn new(doc: &'a Document, start: Position, direction: WalkerDirection) -> Self {
        Self {
            doc,
            position: start,
            boundaries: None,
            direction,
            single_characters: false,
            shallow: false,
            ignore_element_end: false,
            done: false,
        }
    }

    /// Restricts the walk to the given range.
    pub fn with_boundaries(mut self, boundaries: Range) -> Self {
        self.boundaries = Some(boundaries);
        self
    }

    /// Yield text one character at a time.
    pub fn single_characters(mut self) -> Self {
        self.single_characters = true;
        self
    }

    /// Step over elements instead of descending into them.
    pub fn shallow(mut self) -> Self {
        self.shallow = true;
        self
    }

    /// Skip element-end steps, yielding each element once.
    pub fn ignore_element_end(mut self) -> Self {
        self.ignore_element_end = true;
        self
    }

    /// Position the walker currently stands at.
    pub fn position(&self) -> &Position {
        &self.position
    }

    fn step_forward(&mut self) -> Option<WalkerStep> {
        if self.done {
            return None;
        }
        if let Some(bound) = &self.boundaries {
            if self.position.compare(&bound.end) != PositionRelation::Before {
                self.done = true;
                return None;
            }
        }
        let Ok(resolved) = self.doc.resolve(&self.position) else {
            self.done = true;
            return None;
        };
        let previous = self.position.clone();

        // A text run right after (or around) the position?
        let text_info = match resolved.text_offset {
            Some((node, offset)) => Some((node, offset)),
            None => self
                .doc
                .child_starting_at(resolved.parent, resolved.offset)
                .filter(|&child| self.doc.is_text(child))
                .map(|child| (child, 0)),
        };
        if let Some((text, offset_in_text)) = text_info {
            let mut available = self.doc.offset_size(text) - offset_in_text;
            if let Some(bound) = &self.boundaries {
                if bound.end.root == self.position.root
                    && bound.end.parent_path() == self.position.parent_path()
                {
                    available =
                        available.min(bound.end.offset().saturating_sub(self.position.offset()));
                }
            }
            if self.single_characters {
                available = available.min(1);
            }
            if available == 0 {
                self.done = true;
                return None;
            }
            let Ok(proxy) = TextProxy::new(self.doc, text, offset_in_text, available) else {
                self.done = true;
                return None;
            };
            self.position = self.position.shifted_by(available as isize);
            return Some(WalkerStep {
                value: WalkerValue::Text,
                item: WalkerItem::Text(proxy),
                previous_position: previous,
                next_position: self.position.clone(),
                length: available,
            });
        }

        if let Some(child) = self.doc.child_starting_at(resolved.parent, resolved.offset) {
            if self.shallow {
                self.position = self.position.shifted_by(1);
            } else {
                let mut path = self.position.path.clone();
                path.push(0);
                self.position = Position::new(self.position.root, path);
            }
            return Some(WalkerStep {
                value: WalkerValue::ElementStart,
                item: WalkerItem::Element(child),
                previous_position: previous,
                next_position: self.position.clone(),
                length: 1,
            });
        }

        // End of the parent: climb out.
        let parent = resolved.parent;
        if self.doc.parent_of(parent).is_none() {
            self.done = true;
            return None;
        }
        let Ok(after) = Position::after(self.doc, parent) else {
            self.done = true;
            return None;
        };
        self.position = after;
        Some(WalkerStep {
            value: WalkerValue::ElementEnd,
            item: WalkerItem::Element(parent),
            previous_position: previous,
            next_position: self.position.clone(),
            length: 0,
        })
    }

    fn step_backward(&mut self) -> Option<WalkerStep> {
        if self.done {
            return None;
        }
        if let Some(bound) = &self.boundaries {
            if self.position.compare(&bound.start) != PositionRelation::After {
                self.done = true;
                return None;
            }
        }
        let Ok(resolved) = self.doc.resolve(&self.position) else {
            self.done = true;
            return None;
        };
        let previous = self.position.clone();

        let text_info = match resolved.text_offset {
            Some((node, offset)) => Some((node, offset)),
            None => self
                .doc
                .child_ending_at(resolved.parent, resolved.offset)
                .filter(|&child| self.doc.is_text(child))
                .map(|child| (child, self.doc.offset_size(child))),
        };
        if let Some((text, offset_in_text)) = text_info {
            let mut available = offset_in_text;
            if let Some(bound) = &self.boundaries {
                if bound.start.root == self.position.root
                    && bound.start.parent_path() == self.position.parent_path()
                {
                    available =
                        available.min(self.position.offset().saturating_sub(bound.start.offset()));
                }
            }
            if self.single_characters {
                available = available.min(1);
            }
            if available == 0 {
                self.done = true;
                return None;
            }
            let Ok(proxy) = TextProxy::new(self.doc, text, offset_in_text - available, available)
            else {
                self.done = true;
                return None;
            };
            self.position = self.position.shifted_by(-(available as isize));
            return Some(WalkerStep {
                value: WalkerValue::Text,
                item: WalkerItem::Text(proxy),
                previous_position: previous,
                next_position: self.position.clone(),
                length: available,
            });
        }

        if let Some(child) = self.doc.child_ending_at(resolved.parent, resolved.offset) {
            if self.shallow {
                self.position = self.position.shifted_by(-1);
                return Some(WalkerStep {
                    value: WalkerValue::ElementStart,
                    item: WalkerItem::Element(child),
                    previous_position: previous,
                    next_position: self.position.clone(),
                    length: 1,
                });
            }
            // Enter the element from its end.
            let mut path = self.position.path.clone();
            if let Some(last) = path.last_mut() {
                *last -= 1;
            }
            path.push(self.doc.max_offset(child));
            self.position = Position::new(self.position.root, path);
            return Some(WalkerStep {
                value: WalkerValue::ElementEnd,
                item: WalkerItem::Element(child),
                previous_position: previous,
                next_position: self.position.clone(),
                length: 0,
            });
        }

        // Start of the parent: climb out.
        let parent = resolved.parent;
        if self.doc.parent_of(parent).is_none() {
            self.done = true;
            return None;
        }
        let Ok(before) = Position::before(self.doc, parent) else {
            self.done = true;
            return None;
        };
        self.position = before;
        Some(WalkerStep {
            value: WalkerValue::ElementStart,
            item: WalkerItem::Element(parent),
            previous_position: previous,
            next_position: self.position.clone(),
            length: 1,
        })
    }
}

impl<'a> Iterator for TreeWalker<'a> {
    type Item = WalkerStep;

    fn next(&mut self) -> Option<WalkerStep> {
        loop {
            let step = match self.direction {
                WalkerDirection::Forward => self.step_forward()?,
                WalkerDirection::Backward => self.step_backward()?,
            };
            if self.ignore_element_end && step.value == WalkerValue::ElementEnd {
                continue;
            }
            return Some(step);
        }
    }
}
