//! Positions: the coordinate system of the document tree.
//!
//! A position is a root plus a path of offsets and addresses a point
//! *between* nodes, never a node itself. All operation transforms are pure
//! path arithmetic — they read nothing from the document, which is what lets
//! the live registries replay them after the tree has already changed.

use crate::document::{Document, ModelError};
use crate::node::NodeId;
use crate::operation::{Operation, OperationKind};

/// Tie-break rule for a position that coincides exactly with an insertion
/// point: does it move with content inserted at that point or stay put?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stickiness {
    /// Default: stick with the content that was before the position, i.e.
    /// move past content inserted exactly at the position.
    #[default]
    ToNone,
    /// Stay before content inserted exactly at the position.
    ToPrevious,
    /// Move past content inserted exactly at the position; additionally
    /// travel with a moved range that starts exactly here.
    ToNext,
}

/// Result of comparing two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionRelation {
    Same,
    Before,
    After,
    /// Positions in different roots are not comparable.
    Different,
}

/// How one parent path relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathRelation {
    Same,
    /// First path is a proper prefix of the second.
    Prefix,
    /// First path properly extends the second.
    Extension,
    /// Paths split apart before either ends.
    Diverged,
}

pub(crate) fn relate_paths(a: &[usize], b: &[usize]) -> PathRelation {
    let shorter = a.len().min(b.len());
    for i in 0..shorter {
        if a[i] != b[i] {
            return PathRelation::Diverged;
        }
    }
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Equal => PathRelation::Same,
        std::cmp::Ordering::Less => PathRelation::Prefix,
        std::cmp::Ordering::Greater => PathRelation::Extension,
    }
}

/// An address into the tree: a root node plus a path of offsets.
///
/// Invariant: every prefix of `path` except the last element addresses an
/// existing node; the last element may equal the parent's max offset (the
/// canonical end-of-parent position).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub root: NodeId,
    pub path: Vec<usize>,
    pub stickiness: Stickiness,
}

impl Position {
    pub fn new(root: NodeId, path: Vec<usize>) -> Self {
        Self {
            root,
            path,
            stickiness: Stickiness::default(),
        }
    }

    pub fn with_stickiness(mut self, stickiness: Stickiness) -> Self {
        self.stickiness = stickiness;
        self
    }

    /// Position right before `node`. Fails on detached-from-parent nodes.
    pub fn before(doc: &Document, node: NodeId) -> Result<Self, ModelError> {
        let parent = doc
            .parent_of(node)
            .ok_or(ModelError::MissingNode(node))?;
        let offset = doc.start_offset(node)?;
        let mut path = doc.path_of(parent)?;
        path.push(offset);
        Ok(Self::new(doc.root_of(parent), path))
    }

    /// Position right after `node`.
    pub fn after(doc: &Document, node: NodeId) -> Result<Self, ModelError> {
        let parent = doc
            .parent_of(node)
            .ok_or(ModelError::MissingNode(node))?;
        let offset = doc.end_offset(node)?;
        let mut path = doc.path_of(parent)?;
        path.push(offset);
        Ok(Self::new(doc.root_of(parent), path))
    }

    /// Position at `offset` inside the container `parent`.
    pub fn at(doc: &Document, parent: NodeId, offset: usize) -> Result<Self, ModelError> {
        let mut path = doc.path_of(parent)?;
        path.push(offset);
        Ok(Self::new(doc.root_of(parent), path))
    }

    /// Canonical end-of-container position.
    pub fn at_end(doc: &Document, parent: NodeId) -> Result<Self, ModelError> {
        let offset = doc.max_offset(parent);
        Self::at(doc, parent, offset)
    }

    /// Offset in the position's parent (last path element).
    pub fn offset(&self) -> usize {
        *self.path.last().unwrap_or(&0)
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        if let Some(last) = self.path.last_mut() {
            *last = offset;
        }
    }

    /// Path without the final offset: the path of the position's parent.
    pub fn parent_path(&self) -> &[usize] {
        if self.path.is_empty() {
            &[]
        } else {
            &self.path[..self.path.len() - 1]
        }
    }

    /// Same-parent position shifted by `shift` offset units (clamped at 0).
    pub fn shifted_by(&self, shift: isize) -> Self {
        let mut out = self.clone();
        let offset = self.offset() as isize + shift;
        out.set_offset(offset.max(0) as usize);
        out
    }

    pub fn is_at_start(&self) -> bool {
        self.offset() == 0
    }

    pub fn is_at_end(&self, doc: &Document) -> Result<bool, ModelError> {
        let parent = self.parent(doc)?;
        Ok(self.offset() == doc.max_offset(parent))
    }

    /// The container the position points into.
    pub fn parent(&self, doc: &Document) -> Result<NodeId, ModelError> {
        doc.resolve(self).map(|r| r.parent)
    }

    /// Node directly before the position, if the position sits on a node
    /// boundary (`None` mid-text or at parent start).
    pub fn node_before(&self, doc: &Document) -> Result<Option<NodeId>, ModelError> {
        let resolved = doc.resolve(self)?;
        if resolved.text_offset.is_some() || resolved.offset == 0 {
            return Ok(None);
        }
        Ok(doc.child_ending_at(resolved.parent, resolved.offset))
    }

    /// Node directly after the position (`None` mid-text or at parent end).
    pub fn node_after(&self, doc: &Document) -> Result<Option<NodeId>, ModelError> {
        let resolved = doc.resolve(self)?;
        if resolved.text_offset.is_some() {
            return Ok(None);
        }
        Ok(doc.child_starting_at(resolved.parent, resolved.offset))
    }

    /// The text node this position falls strictly inside, with the offset
    /// within it, when the position does not sit on a node boundary.
    pub fn text_node(&self, doc: &Document) -> Result<Option<(NodeId, usize)>, ModelError> {
        Ok(doc.resolve(self)?.text_offset)
    }

    /// Ancestor containers from the root down to (and including) the parent.
    pub fn ancestors(&self, doc: &Document) -> Result<Vec<NodeId>, ModelError> {
        let parent = self.parent(doc)?;
        let mut chain = doc.ancestors_of(parent);
        chain.push(parent);
        Ok(chain)
    }

    pub fn compare(&self, other: &Position) -> PositionRelation {
        if self.root != other.root {
            return PositionRelation::Different;
        }
        let shorter = self.path.len().min(other.path.len());
        for i in 0..shorter {
            match self.path[i].cmp(&other.path[i]) {
                std::cmp::Ordering::Less => return PositionRelation::Before,
                std::cmp::Ordering::Greater => return PositionRelation::After,
                std::cmp::Ordering::Equal => {}
            }
        }
        match self.path.len().cmp(&other.path.len()) {
            std::cmp::Ordering::Equal => PositionRelation::Same,
            // A shorter path pointing at an ancestor boundary orders before
            // the deeper position it is a prefix of.
            std::cmp::Ordering::Less => PositionRelation::Before,
            std::cmp::Ordering::Greater => PositionRelation::After,
        }
    }

    pub fn is_equal(&self, other: &Position) -> bool {
        self.compare(other) == PositionRelation::Same
    }

    pub fn is_before(&self, other: &Position) -> bool {
        self.compare(other) == PositionRelation::Before
    }

    pub fn is_after(&self, other: &Position) -> bool {
        self.compare(other) == PositionRelation::After
    }

    /// Deepest node containing both positions, or `None` for different
    /// roots. The root itself is a valid answer.
    pub fn common_ancestor(&self, other: &Position, doc: &Document) -> Option<NodeId> {
        if self.root != other.root {
            return None;
        }
        let shorter = self.parent_path().len().min(other.parent_path().len());
        let mut common = 0;
        while common < shorter && self.path[common] == other.path[common] {
            common += 1;
        }
        let mut node = self.root;
        for &offset in &self.path[..common] {
            node = doc.child_starting_at(node, offset)?;
        }
        Some(node)
    }

    // ── Transformations ──────────────────────────────────────────────────

    /// Transform by an insertion of `how_many` offset units at `at`.
    pub fn transformed_by_insertion(&self, at: &Position, how_many: usize) -> Position {
        let mut out = self.clone();
        if self.root != at.root {
            return out;
        }
        match relate_paths(at.parent_path(), self.parent_path()) {
            PathRelation::Same => {
                if at.offset() < self.offset()
                    || (at.offset() == self.offset() && self.stickiness != Stickiness::ToPrevious)
                {
                    out.set_offset(self.offset() + how_many);
                }
            }
            PathRelation::Prefix => {
                // Insertion happened in an ancestor of this position's
                // parent; shift the ancestor index if it was at or past the
                // insertion point.
                let i = at.path.len() - 1;
                if at.offset() <= self.path[i] {
                    out.path[i] += how_many;
                }
            }
            _ => {}
        }
        out
    }

    /// Transform by a deletion of `how_many` offset units at `at`. Returns
    /// `None` when the position was inside the deleted range.
    pub fn transformed_by_deletion(&self, at: &Position, how_many: usize) -> Option<Position> {
        let mut out = self.clone();
        if self.root != at.root {
            return Some(out);
        }
        match relate_paths(at.parent_path(), self.parent_path()) {
            PathRelation::Same => {
                if at.offset() < self.offset() {
                    if at.offset() + how_many > self.offset() {
                        return None;
                    }
                    out.set_offset(self.offset() - how_many);
                }
            }
            PathRelation::Prefix => {
                let i = at.path.len() - 1;
                if at.offset() <= self.path[i] {
                    if at.offset() + how_many > self.path[i] {
                        return None;
                    }
                    out.path[i] -= how_many;
                }
            }
            _ => {}
        }
        Some(out)
    }

    /// Transform by a move of `how_many` units from `source` to `target`.
    pub fn transformed_by_move(
        &self,
        source: &Position,
        target: &Position,
        how_many: usize,
    ) -> Position {
        // The target point itself shifts when the removal happens before it.
        let target = match target.transformed_by_deletion(source, how_many) {
            Some(t) => t,
            None => target.clone(),
        };
        if source.is_equal(&target) {
            return self.clone();
        }
        let transformed = self.transformed_by_deletion(source, how_many);
        let was_moved = transformed.is_none()
            || (self.stickiness == Stickiness::ToNext && source.is_equal(self))
            || (self.stickiness == Stickiness::ToPrevious
                && source.shifted_by(how_many as isize).is_equal(self));
        if was_moved {
            self.combined(source, &target)
        } else {
            transformed
                .unwrap_or_else(|| self.clone())
                .transformed_by_insertion(&target, how_many)
        }
    }

    /// Rebase this position, which lies at or under `source`, onto the spot
    /// the content at `source` was carried to (`target`).
    pub fn combined(&self, source: &Position, target: &Position) -> Position {
        let i = source.path.len() - 1;
        let mut path: Vec<usize> = target.parent_path().to_vec();
        path.push(target.offset() + self.path[i] - source.offset());
        path.extend_from_slice(&self.path[i + 1..]);
        Position {
            root: target.root,
            path,
            stickiness: self.stickiness,
        }
    }

    /// Transform by an already-applied operation so the position keeps
    /// pointing at the same semantic spot.
    pub fn transformed_by_operation(&self, op: &Operation) -> Position {
        match &op.kind {
            OperationKind::Insert {
                position, how_many, ..
            } => self.transformed_by_insertion(position, *how_many),
            OperationKind::Move {
                source,
                how_many,
                target,
            }
            | OperationKind::Remove {
                source,
                how_many,
                graveyard_position: target,
            } => self.transformed_by_move(source, target, *how_many),
            OperationKind::Split {
                position,
                insertion_position,
                graveyard_element,
                ..
            } => self.transformed_by_split(position, insertion_position, graveyard_element.as_ref()),
            OperationKind::Merge {
                source,
                target,
                graveyard_position,
                ..
            } => self.transformed_by_merge(source, target, graveyard_position),
            OperationKind::SetAttribute { .. }
            | OperationKind::Rename { .. }
            | OperationKind::MarkerChange { .. } => self.clone(),
        }
    }

    fn transformed_by_split(
        &self,
        split_position: &Position,
        insertion_position: &Position,
        graveyard_element: Option<&Position>,
    ) -> Position {
        // Everything from the split point to the end of the split element
        // moved into the new element.
        if self.root == split_position.root {
            let i = split_position.path.len() - 1;
            let in_moved_part =
                match relate_paths(split_position.parent_path(), self.parent_path()) {
                    PathRelation::Same => {
                        self.path[i] > split_position.offset()
                            || (self.path[i] == split_position.offset()
                                && self.stickiness == Stickiness::ToNext)
                    }
                    PathRelation::Prefix => self.path[i] >= split_position.offset(),
                    _ => false,
                };
            if in_moved_part {
                let mut target = insertion_position.clone();
                target.path.push(0);
                return self.combined(split_position, &target);
            }
        }
        match graveyard_element {
            Some(gy) => self.transformed_by_move(gy, insertion_position, 1),
            None => self.transformed_by_insertion(insertion_position, 1),
        }
    }

    fn transformed_by_merge(
        &self,
        source: &Position,
        target: &Position,
        graveyard_position: &Position,
    ) -> Position {
        // The deletion position is where the merged element used to sit.
        let deletion_position = Position::new(source.root, source.parent_path().to_vec());
        let in_merged_element = self.root == source.root
            && matches!(
                relate_paths(source.parent_path(), self.parent_path()),
                PathRelation::Same | PathRelation::Prefix
            );
        if in_merged_element {
            self.combined(source, target)
        } else if self.is_equal(&deletion_position) {
            deletion_position.with_stickiness(self.stickiness)
        } else {
            self.transformed_by_move(&deletion_position, graveyard_position, 1)
        }
    }

    /// `true` iff the position's whole path still resolves in the document.
    pub fn is_valid(&self, doc: &Document) -> bool {
        doc.resolve(self).is_ok()
    }
}
