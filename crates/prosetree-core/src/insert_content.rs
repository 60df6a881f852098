//! Content insertion: splice foreign nodes into the document at a
//! selection, auto-paragraphing and merging so the result stays
//! schema-valid.
//!
//! This is the designed graceful-degradation path: pasted content is
//! arbitrary, so instead of failing the whole insertion over one invalid
//! node the algorithm drops it, logs, and carries on.

use std::collections::HashSet;

use tracing::error;

use crate::document::ModelError;
use crate::node::{Attributes, NodeId};
use crate::position::{Position, Stickiness};
use crate::range::Range;
use crate::schema::ScanDirection;
use crate::selection::Selection;
use crate::writer::Writer;

/// Outcome of [`insert_content`]: what was touched and where the caret
/// should land.
#[derive(Debug, Clone)]
pub struct InsertContentResult {
    pub range: Range,
    pub selection: Selection,
}

/// Inserts `content` (a detached node or document fragment) at the
/// selection's first position.
pub fn insert_content(
    writer: &mut Writer<'_>,
    content: NodeId,
    target: &Selection,
) -> Result<InsertContentResult, ModelError> {
    let position = target
        .first_position()
        .cloned()
        .ok_or_else(|| ModelError::InvalidPosition("selection has no position".to_string()))?;
    let nodes: Vec<NodeId> = if writer.document().get(content).map(|d| d.kind().is_fragment()) == Some(true)
    {
        let count = writer.document().child_count(content);
        writer.document.splice_out(content, 0, count)?
    } else {
        vec![content]
    };

    let mut insertion = Insertion::new(writer, position)?;
    insertion.handle_nodes(&nodes, true, true)?;
    insertion.finish()
}

/// State carried across one insertion run.
struct Insertion<'w, 'a> {
    writer: &'w mut Writer<'a>,
    /// Current insertion point, manually maintained between operations and
    /// live-tracked across merges.
    position: Position,
    /// Elements the algorithm may merge inserted content into.
    can_merge_with: HashSet<NodeId>,
    /// Set when an inserted object has no text context around it; overrides
    /// the normal caret placement.
    node_to_select: Option<NodeId>,
    /// Everything that went in, for the final attribute cleanup.
    inserted: Vec<NodeId>,
    /// Offset-path snapshot of where the insertion began.
    start_live: crate::live::LivePosition,
}

impl<'w, 'a> Insertion<'w, 'a> {
    fn new(writer: &'w mut Writer<'a>, position: Position) -> Result<Self, ModelError> {
        let seed_parent = position.parent(writer.document())?;
        let start_live = writer
            .document
            .track_position(position.clone().with_stickiness(Stickiness::ToPrevious))?;
        Ok(Self {
            writer,
            position,
            can_merge_with: HashSet::from([seed_parent]),
            node_to_select: None,
            inserted: Vec::new(),
            start_live,
        })
    }

    fn handle_nodes(
        &mut self,
        nodes: &[NodeId],
        outer_first: bool,
        outer_last: bool,
    ) -> Result<(), ModelError> {
        for (i, &node) in nodes.iter().enumerate() {
            let is_first = i == 0 && outer_first;
            let is_last = i == nodes.len() - 1 && outer_last;
            self.handle_node(node, is_first, is_last)?;
        }
        Ok(())
    }

    fn handle_node(&mut self, node: NodeId, is_first: bool, is_last: bool) -> Result<(), ModelError> {
        let name = self
            .writer
            .document()
            .schema_name_of(node)
            .unwrap_or_default()
            .to_string();
        if self.writer.schema().is_object(&name) {
            return self.handle_object(node, is_first, is_last);
        }
        if !self.check_and_split_to_allowed_position(&name)? {
            return self.handle_disallowed_node(node, is_first, is_last);
        }
        self.insert_node(node, &name, is_first, is_last)
    }

    fn handle_object(
        &mut self,
        node: NodeId,
        is_first: bool,
        is_last: bool,
    ) -> Result<(), ModelError> {
        let name = self
            .writer
            .document()
            .schema_name_of(node)
            .unwrap_or_default()
            .to_string();
        if self.check_and_split_to_allowed_position(&name)? {
            self.insert_node(node, &name, is_first, is_last)
        } else {
            self.try_autoparagraphing(node, is_first, is_last)
        }
    }

    fn handle_disallowed_node(
        &mut self,
        node: NodeId,
        is_first: bool,
        is_last: bool,
    ) -> Result<(), ModelError> {
        if self.writer.document().is_element(node) {
            // Unwrap: the element has no place here, its children may.
            let count = self.writer.document().child_count(node);
            let children = self.writer.document.splice_out(node, 0, count)?;
            self.writer.document.drop_subtree(node);
            self.handle_nodes(&children, is_first, is_last)
        } else {
            self.try_autoparagraphing(node, is_first, is_last)
        }
    }

    fn try_autoparagraphing(
        &mut self,
        node: NodeId,
        is_first: bool,
        is_last: bool,
    ) -> Result<(), ModelError> {
        // Only wrap when a paragraph itself has a place here — that bound
        // keeps the wrap-and-retry from recursing forever.
        let paragraph_fits = self
            .writer
            .schema()
            .find_allowed_parent(self.writer.document(), &self.position, "paragraph")
            .is_some();
        if !paragraph_fits {
            return Ok(());
        }
        let paragraph = self.writer.create_element("paragraph", Attributes::new());
        if !self
            .writer
            .schema()
            .check_child_node(self.writer.document(), paragraph, node)
        {
            self.writer.document.drop_subtree(paragraph);
            return Ok(());
        }
        self.writer.append_child(paragraph, node)?;
        self.handle_node(paragraph, is_first, is_last)
    }

    /// Walks the insertion point up towards the nearest ancestor allowing
    /// `name`, splitting containers on the way and dropping containers the
    /// climb leaves empty. `false` when no ancestor allows the item.
    fn check_and_split_to_allowed_position(&mut self, name: &str) -> Result<bool, ModelError> {
        let Some(allowed_in) =
            self.writer
                .schema()
                .find_allowed_parent(self.writer.document(), &self.position, name)
        else {
            return Ok(false);
        };
        loop {
            let parent = self.position.parent(self.writer.document())?;
            if parent == allowed_in {
                return Ok(true);
            }
            if self.position.is_at_start() {
                self.position = Position::before(self.writer.document(), parent)?;
                if self.writer.document().child_count(parent) == 0 {
                    self.writer.remove_node(parent)?;
                }
            } else if self.position.is_at_end(self.writer.document())? {
                self.position = Position::after(self.writer.document(), parent)?;
            } else {
                self.position = self.writer.split(&self.position)?;
                // The fresh right half is fair game for merging later.
                if let Some(right) = self.position.node_after(self.writer.document())? {
                    self.can_merge_with.insert(right);
                }
            }
        }
    }

    fn insert_node(
        &mut self,
        node: NodeId,
        name: &str,
        is_first: bool,
        is_last: bool,
    ) -> Result<(), ModelError> {
        if !self
            .writer
            .schema()
            .check_child(self.writer.document(), &self.position, name)
        {
            error!(
                item = name,
                "insert-content-wrong-position: node not allowed at the insertion position, skipping"
            );
            return Ok(());
        }
        let covered = self.writer.insert(vec![node], self.position.clone())?;
        self.position = covered.end;

        // An object with no text context around it becomes the selection
        // target; any later insert clears that again.
        let schema = self.writer.schema();
        if schema.is_object(name)
            && !schema.check_child(self.writer.document(), &self.position, "$text")
        {
            self.node_to_select = Some(node);
        } else {
            self.node_to_select = None;
        }

        if self.writer.document().is_element(node) {
            self.merge_siblings_of(node, is_first, is_last)?;
        }
        self.inserted.push(node);
        Ok(())
    }

    fn merge_siblings_of(
        &mut self,
        node: NodeId,
        is_first: bool,
        is_last: bool,
    ) -> Result<(), ModelError> {
        // Decide both merges before doing either: the left merge shifts the
        // right boundary, so that one is tracked live across it.
        let left_boundary = if is_first {
            match self.previous_sibling(node)? {
                Some(previous)
                    if self.writer.document().is_element(previous)
                        && self.can_merge_with.contains(&previous)
                        && self.writer.schema().check_merge_elements(
                            self.writer.document(),
                            previous,
                            node,
                        ) =>
                {
                    Some(Position::before(self.writer.document(), node)?)
                }
                _ => None,
            }
        } else {
            None
        };
        let right_boundary = if is_last {
            match self.next_sibling(node)? {
                Some(next)
                    if self.writer.document().is_element(next)
                        && self.can_merge_with.contains(&next)
                        && self.writer.schema().check_merge_elements(
                            self.writer.document(),
                            node,
                            next,
                        ) =>
                {
                    Some(Position::after(self.writer.document(), node)?)
                }
                _ => None,
            }
        } else {
            None
        };

        let mut right_live = match right_boundary {
            Some(boundary) => Some(self.writer.document.track_position(boundary)?),
            None => None,
        };
        if let Some(boundary) = left_boundary {
            self.merge_at(boundary)?;
        }
        if let Some(live) = right_live.as_mut() {
            let boundary = self.writer.document.live_position(live);
            self.writer.document.detach_position(live);
            self.merge_at(boundary)?;
        }
        Ok(())
    }

    /// Merges across `boundary`, keeping the insertion point sensible: a
    /// caret exactly on the boundary lands at the junction between the
    /// original and the merged-in content instead of jumping past it.
    fn merge_at(&mut self, boundary: Position) -> Result<(), ModelError> {
        let Some(before_element) = boundary.node_before(self.writer.document())? else {
            return Ok(());
        };
        let junction = Position::at_end(self.writer.document(), before_element)?;
        let at_boundary = self.position.is_equal(&boundary);
        let mut live = self
            .writer
            .document
            .track_position(self.position.clone().with_stickiness(Stickiness::ToNext))?;
        self.writer.merge(&boundary)?;
        self.position = self.writer.document.live_position(&live);
        self.writer.document.detach_position(&mut live);
        if at_boundary {
            self.position = junction;
        }
        Ok(())
    }

    fn previous_sibling(&self, node: NodeId) -> Result<Option<NodeId>, ModelError> {
        let doc = self.writer.document();
        if doc.parent_of(node).is_none() {
            return Ok(None);
        }
        let index = doc.index_of(node)?;
        if index == 0 {
            return Ok(None);
        }
        let parent = doc.parent_of(node).ok_or(ModelError::DetachedNode(node))?;
        Ok(Some(doc.children_of(parent)[index - 1]))
    }

    fn next_sibling(&self, node: NodeId) -> Result<Option<NodeId>, ModelError> {
        let doc = self.writer.document();
        let Some(parent) = doc.parent_of(node) else {
            return Ok(None);
        };
        let index = doc.index_of(node)?;
        let siblings = doc.children_of(parent);
        Ok(siblings.get(index + 1).copied())
    }

    fn finish(mut self) -> Result<InsertContentResult, ModelError> {
        let graveyard = self.writer.document().graveyard();
        let survivors: Vec<NodeId> = self
            .inserted
            .iter()
            .copied()
            .filter(|&node| self.writer.document().root_of(node) != graveyard)
            .collect();
        let schema = self.writer.schema();
        schema.remove_disallowed_attributes(self.writer, &survivors)?;

        let selection = match self
            .node_to_select
            .filter(|&node| self.writer.document().root_of(node) != graveyard)
        {
            Some(node) => Selection::on_node(self.writer.document(), node)?,
            None => match schema.nearest_selection_range(
                self.writer.document(),
                &self.position,
                ScanDirection::Backward,
            ) {
                Some(range) => Selection::from_range(range),
                None => {
                    error!(
                        "insert-content-no-selection-position: no valid caret spot near the insertion, falling back to the raw position"
                    );
                    Selection::collapsed_at(self.position.clone())
                }
            },
        };

        let start = self.writer.document.live_position(&self.start_live);
        self.writer.document.detach_position(&mut self.start_live);
        let range = if start.is_after(&self.position) {
            Range::collapsed(self.position)
        } else {
            Range::new(start, self.position)
        };
        Ok(InsertContentResult { range, selection })
    }
}
