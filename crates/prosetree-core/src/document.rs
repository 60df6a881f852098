//! The document: arena of nodes, named roots, operation history, listener
//! registries and live position/range tracking.
//!
//! All attached-tree mutation funnels through [`Document::apply_operation`];
//! raw arena edits are crate-internal and reserved for detached subtrees and
//! the operation utilities. After each applied operation the document first
//! notifies plain operation listeners and only then transforms the live
//! registries, so listeners always observe pre-transform live coordinates.

use std::collections::BTreeMap;
use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::live::{LivePosition, LiveRange};
use crate::node::{Attributes, NodeData, NodeId, NodeKind};
use crate::operation::{self, Operation};
use crate::position::{Position, Stickiness};
use crate::range::Range;

/// Name of the detached-content root every document owns. Removed content is
/// moved here so removal stays invertible.
pub const GRAVEYARD_ROOT_NAME: &str = "$graveyard";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model-node-not-found-in-parent: node {0:?} is not present in its parent's child storage")]
    NodeNotFoundInParent(NodeId),
    #[error("model-missing-node: {0:?} does not belong to this document")]
    MissingNode(NodeId),
    #[error("model-detached-node: {0:?} has no parent")]
    DetachedNode(NodeId),
    #[error("model-not-a-container: {0:?} cannot hold children")]
    NotAContainer(NodeId),
    #[error("model-attached-mutation: {0:?} is attached; mutate it through operations")]
    AttachedMutation(NodeId),
    #[error("model-position-invalid: {0}")]
    InvalidPosition(String),
    #[error("model-liveposition-root-not-rootelement: live tracking requires a document root")]
    LivePositionRootNotRootElement,
    #[error("model-textproxy-wrong-offsetintext: offset {offset} does not fit in text of size {size}")]
    TextProxyWrongOffset { offset: usize, size: usize },
    #[error("model-textproxy-wrong-length: offset {offset} plus length {length} exceeds text of size {size}")]
    TextProxyWrongLength {
        offset: usize,
        length: usize,
        size: usize,
    },
    #[error("model-nodes-remove-range-not-flat: remove accepts flat ranges only")]
    RemoveRangeNotFlat,
    #[error("model-nodes-move-range-not-flat: move accepts flat ranges only")]
    MoveRangeNotFlat,
    #[error("model-move-target-inside-moved-range: target position lies inside the moved range")]
    MoveTargetInsideMovedRange,
    #[error("model-operation-base-version: operation base version {got} does not match document version {expected}")]
    BaseVersionMismatch { expected: u64, got: u64 },
    #[error("model-split-root: the root element cannot be split")]
    SplitRoot,
    #[error("model-merge-no-siblings: merge position is not between two elements")]
    MergeNoSiblings,
    #[error("model-rename-not-an-element: rename target is not an element")]
    RenameNotAnElement,
    #[error("model-json-malformed: {0}")]
    MalformedJson(String),
}

/// A position resolved against the current tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedPosition {
    /// Container the position points into.
    pub parent: NodeId,
    /// Offset within the parent (last path element).
    pub offset: usize,
    /// Child index the offset maps to: the number of children fully before
    /// the offset; when the offset falls inside a text run, the index of
    /// that text child.
    pub index: usize,
    /// Set when the offset falls strictly inside a text child: the text
    /// node and the offset within it.
    pub text_offset: Option<(NodeId, usize)>,
}

pub(crate) struct LivePositionEntry {
    pub position: Position,
    pub callback: Option<Box<dyn FnMut(&Position, &Position) + Send>>,
}

pub(crate) struct LiveRangeEntry {
    pub start: Position,
    pub end: Position,
    pub callback: Option<Box<dyn FnMut(&Range, &Range) + Send>>,
}

impl LiveRangeEntry {
    pub(crate) fn range(&self) -> Range {
        Range::new(self.start.clone(), self.end.clone())
    }
}

/// The tree store and mutation hub.
pub struct Document {
    nodes: HashMap<NodeId, NodeData>,
    next_id: u64,
    roots: IndexMap<String, NodeId>,
    version: u64,
    history: Vec<Operation>,
    listeners: BTreeMap<u64, Box<dyn FnMut(&Operation) + Send>>,
    next_listener_id: u64,
    pub(crate) live_positions: BTreeMap<u64, LivePositionEntry>,
    pub(crate) live_ranges: BTreeMap<u64, LiveRangeEntry>,
    next_live_id: u64,
    markers: IndexMap<String, u64>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .field("version", &self.version)
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: HashMap::new(),
            next_id: 1,
            roots: IndexMap::new(),
            version: 0,
            history: Vec::new(),
            listeners: BTreeMap::new(),
            next_listener_id: 1,
            live_positions: BTreeMap::new(),
            live_ranges: BTreeMap::new(),
            next_live_id: 1,
            markers: IndexMap::new(),
        };
        doc.create_root_with_element(GRAVEYARD_ROOT_NAME, "$graveyard");
        doc
    }

    // ── Roots ────────────────────────────────────────────────────────────

    /// Creates (or returns the existing) root registered under `name`. The
    /// root's *element* name is `$root`, which is what schema contexts see;
    /// the registration name only addresses the root.
    pub fn create_root(&mut self, name: &str) -> NodeId {
        self.create_root_with_element(name, "$root")
    }

    pub fn create_root_with_element(&mut self, name: &str, element_name: &str) -> NodeId {
        if let Some(&id) = self.roots.get(name) {
            return id;
        }
        let id = self.alloc(NodeData::new(
            NodeKind::RootElement {
                name: element_name.to_string(),
                children: Vec::new(),
            },
            Attributes::new(),
        ));
        self.roots.insert(name.to_string(), id);
        id
    }

    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.roots.get(name).copied()
    }

    pub fn graveyard(&self) -> NodeId {
        self.roots[GRAVEYARD_ROOT_NAME]
    }

    /// Names of user roots, the graveyard excluded.
    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots
            .keys()
            .map(String::as_str)
            .filter(|name| *name != GRAVEYARD_ROOT_NAME)
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.get(id)
            .map(|data| data.kind().is_root())
            .unwrap_or(false)
    }

    /// Name a root is registered under, the graveyard included.
    pub fn root_name_of(&self, id: NodeId) -> Option<&str> {
        self.roots
            .iter()
            .find(|(_, &root)| root == id)
            .map(|(name, _)| name.as_str())
    }

    // ── Node construction (detached) ─────────────────────────────────────

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, data);
        id
    }

    pub fn create_element(&mut self, name: impl Into<String>, attrs: Attributes) -> NodeId {
        self.alloc(NodeData::new(
            NodeKind::Element {
                name: name.into(),
                children: Vec::new(),
            },
            attrs,
        ))
    }

    pub fn create_text(&mut self, data: impl Into<String>, attrs: Attributes) -> NodeId {
        self.alloc(NodeData::new(
            NodeKind::Text { data: data.into() },
            attrs,
        ))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeData::new(
            NodeKind::DocumentFragment {
                children: Vec::new(),
            },
            Attributes::new(),
        ))
    }

    /// Appends a detached node to a detached container. Attached trees must
    /// be mutated through operations.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        if self.is_attached(parent) {
            return Err(ModelError::AttachedMutation(parent));
        }
        if self.get(child).is_none() {
            return Err(ModelError::MissingNode(child));
        }
        let index = self.children_of(parent).len();
        self.splice_in(parent, index, &[child])
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn get(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id)
    }

    fn data(&self, id: NodeId) -> Result<&NodeData, ModelError> {
        self.nodes.get(&id).ok_or(ModelError::MissingNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, ModelError> {
        self.nodes.get_mut(&id).ok_or(ModelError::MissingNode(id))
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|data| data.parent)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|data| data.kind().children()).unwrap_or(&[])
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children_of(id).len()
    }

    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|data| data.kind().name())
    }

    /// The name the node goes by in schema checks (`$text` for text runs).
    pub fn schema_name_of(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(|data| data.kind().schema_name())
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.get(id)
            .map(|data| data.kind().is_element())
            .unwrap_or(false)
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.get(id)
            .map(|data| data.kind().is_text())
            .unwrap_or(false)
    }

    pub fn text_data(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|data| data.kind().data())
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&Value> {
        self.get(id).and_then(|data| data.attrs.get(key))
    }

    pub fn attributes(&self, id: NodeId) -> Option<&Attributes> {
        self.get(id).map(|data| data.attributes())
    }

    pub fn offset_size(&self, id: NodeId) -> usize {
        self.get(id).map(|data| data.offset_size()).unwrap_or(0)
    }

    /// Sum of the children's offset sizes.
    pub fn max_offset(&self, id: NodeId) -> usize {
        self.children_of(id)
            .iter()
            .map(|&child| self.offset_size(child))
            .sum()
    }

    /// Index of `id` within its parent, located by identity. Errors with the
    /// tree-consistency violation when the parent's storage lacks the node.
    pub fn index_of(&self, id: NodeId) -> Result<usize, ModelError> {
        let parent = self.parent_of(id).ok_or(ModelError::DetachedNode(id))?;
        self.children_of(parent)
            .iter()
            .position(|&child| child == id)
            .ok_or(ModelError::NodeNotFoundInParent(id))
    }

    /// Offset at which `id` starts within its parent; derived on demand.
    pub fn start_offset(&self, id: NodeId) -> Result<usize, ModelError> {
        let parent = self.parent_of(id).ok_or(ModelError::DetachedNode(id))?;
        let mut offset = 0;
        for &child in self.children_of(parent) {
            if child == id {
                return Ok(offset);
            }
            offset += self.offset_size(child);
        }
        Err(ModelError::NodeNotFoundInParent(id))
    }

    pub fn end_offset(&self, id: NodeId) -> Result<usize, ModelError> {
        Ok(self.start_offset(id)? + self.offset_size(id))
    }

    /// Child starting exactly at `offset`, if any.
    pub fn child_starting_at(&self, parent: NodeId, offset: usize) -> Option<NodeId> {
        let mut cursor = 0;
        for &child in self.children_of(parent) {
            if cursor == offset {
                return Some(child);
            }
            if cursor > offset {
                return None;
            }
            cursor += self.offset_size(child);
        }
        None
    }

    /// Child ending exactly at `offset`, if any.
    pub fn child_ending_at(&self, parent: NodeId, offset: usize) -> Option<NodeId> {
        let mut cursor = 0;
        for &child in self.children_of(parent) {
            cursor += self.offset_size(child);
            if cursor == offset {
                return Some(child);
            }
            if cursor > offset {
                return None;
            }
        }
        None
    }

    /// Child whose offset span contains `offset`.
    pub fn child_at_offset(&self, parent: NodeId, offset: usize) -> Option<NodeId> {
        let mut cursor = 0;
        for &child in self.children_of(parent) {
            let size = self.offset_size(child);
            if offset < cursor + size {
                return Some(child);
            }
            cursor += size;
        }
        None
    }

    /// Maps an offset in `parent` to a child index boundary, detecting the
    /// mid-text case.
    pub(crate) fn offset_to_boundary(
        &self,
        parent: NodeId,
        offset: usize,
    ) -> Result<(usize, Option<(NodeId, usize)>), ModelError> {
        let mut cursor = 0;
        for (index, &child) in self.children_of(parent).iter().enumerate() {
            if cursor == offset {
                return Ok((index, None));
            }
            let size = self.offset_size(child);
            if offset < cursor + size {
                // Only a text run can be entered mid-node.
                return Ok((index, Some((child, offset - cursor))));
            }
            cursor += size;
        }
        if cursor == offset {
            return Ok((self.child_count(parent), None));
        }
        Err(ModelError::InvalidPosition(format!(
            "offset {offset} exceeds max offset {cursor}"
        )))
    }

    /// Path of start offsets from the node's root down to the node.
    pub fn path_of(&self, id: NodeId) -> Result<Vec<usize>, ModelError> {
        let mut path = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.parent_of(cursor) {
            path.push(self.start_offset(cursor)?);
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Topmost ancestor (the node itself when detached at the top).
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut cursor = id;
        while let Some(parent) = self.parent_of(cursor) {
            cursor = parent;
        }
        cursor
    }

    /// Ancestors from the root down, excluding the node itself.
    pub fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cursor = id;
        while let Some(parent) = self.parent_of(cursor) {
            chain.push(parent);
            cursor = parent;
        }
        chain.reverse();
        chain
    }

    /// `true` when the node's topmost ancestor is a document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.is_root(self.root_of(id))
    }

    pub(crate) fn resolve(&self, pos: &Position) -> Result<ResolvedPosition, ModelError> {
        if self.get(pos.root).is_none() {
            return Err(ModelError::MissingNode(pos.root));
        }
        if pos.path.is_empty() {
            return Err(ModelError::InvalidPosition("empty path".to_string()));
        }
        let mut parent = pos.root;
        for (depth, &offset) in pos.path.iter().enumerate() {
            if depth == pos.path.len() - 1 {
                let (index, text_offset) = self.offset_to_boundary(parent, offset)?;
                return Ok(ResolvedPosition {
                    parent,
                    offset,
                    index,
                    text_offset,
                });
            }
            let child = self.child_starting_at(parent, offset).ok_or_else(|| {
                ModelError::InvalidPosition(format!(
                    "path step {offset} at depth {depth} addresses no node"
                ))
            })?;
            if !self.is_element(child) {
                return Err(ModelError::InvalidPosition(format!(
                    "path step {offset} at depth {depth} does not address a container"
                )));
            }
            parent = child;
        }
        unreachable!("loop returns on the last path element")
    }

    // ── Raw child storage edits (crate-internal) ─────────────────────────

    pub(crate) fn splice_in(
        &mut self,
        parent: NodeId,
        index: usize,
        ids: &[NodeId],
    ) -> Result<(), ModelError> {
        if self.data(parent)?.kind.is_text() {
            return Err(ModelError::NotAContainer(parent));
        }
        for &id in ids {
            let data = self.data_mut(id)?;
            data.parent = Some(parent);
        }
        let data = self.data_mut(parent)?;
        let children = data
            .kind
            .children_mut()
            .ok_or(ModelError::NotAContainer(parent))?;
        let tail = children.split_off(index);
        children.extend_from_slice(ids);
        children.extend(tail);
        Ok(())
    }

    pub(crate) fn splice_out(
        &mut self,
        parent: NodeId,
        index: usize,
        count: usize,
    ) -> Result<Vec<NodeId>, ModelError> {
        let data = self.data_mut(parent)?;
        let children = data
            .kind
            .children_mut()
            .ok_or(ModelError::NotAContainer(parent))?;
        let removed: Vec<NodeId> = children.splice(index..index + count, []).collect();
        for &id in &removed {
            if let Some(data) = self.nodes.get_mut(&id) {
                data.parent = None;
            }
        }
        Ok(removed)
    }

    pub(crate) fn set_text_data_raw(&mut self, id: NodeId, text: String) -> Result<(), ModelError> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Text { data } => {
                *data = text;
                Ok(())
            }
            _ => Err(ModelError::NotAContainer(id)),
        }
    }

    pub(crate) fn set_attr_raw(
        &mut self,
        id: NodeId,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), ModelError> {
        let data = self.data_mut(id)?;
        match value {
            Some(value) => {
                data.attrs.insert(key.to_string(), value);
            }
            None => {
                data.attrs.shift_remove(key);
            }
        }
        Ok(())
    }

    pub(crate) fn rename_raw(&mut self, id: NodeId, new_name: &str) -> Result<(), ModelError> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element { name, .. } => {
                *name = new_name.to_string();
                Ok(())
            }
            _ => Err(ModelError::RenameNotAnElement),
        }
    }

    /// Deep-copies a subtree into fresh detached nodes.
    pub(crate) fn clone_subtree(&mut self, id: NodeId) -> Result<NodeId, ModelError> {
        let data = self.data(id)?.clone();
        let children: Vec<NodeId> = data.kind.children().to_vec();
        let clone = match &data.kind {
            NodeKind::Text { data: text } => self.create_text(text.clone(), data.attrs.clone()),
            NodeKind::Element { name, .. } | NodeKind::RootElement { name, .. } => {
                self.create_element(name.clone(), data.attrs.clone())
            }
            NodeKind::DocumentFragment { .. } => self.create_fragment(),
        };
        for (index, child) in children.into_iter().enumerate() {
            let child_clone = self.clone_subtree(child)?;
            self.splice_in(clone, index, &[child_clone])?;
        }
        Ok(clone)
    }

    /// Drops a detached node and its whole subtree from the arena.
    pub(crate) fn drop_subtree(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children_of(id).to_vec();
        for child in children {
            self.drop_subtree(child);
        }
        self.nodes.remove(&id);
    }

    // ── Operation application ────────────────────────────────────────────

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    /// Applies one operation: validates the base version, mutates the tree,
    /// bumps the version, notifies operation listeners and finally
    /// transforms the live registries.
    pub(crate) fn apply_operation(&mut self, mut op: Operation) -> Result<(), ModelError> {
        if op.base_version != self.version {
            return Err(ModelError::BaseVersionMismatch {
                expected: self.version,
                got: op.base_version,
            });
        }
        operation::apply_to(self, &mut op.kind)?;
        self.version += 1;
        for listener in self.listeners.values_mut() {
            listener(&op);
        }
        self.transform_live(&op);
        self.history.push(op);
        Ok(())
    }

    /// Registers a per-operation listener; returns the id to unregister.
    pub fn on_operation<F>(&mut self, listener: F) -> u64
    where
        F: FnMut(&Operation) + Send + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn off_operation(&mut self, listener_id: u64) -> bool {
        self.listeners.remove(&listener_id).is_some()
    }

    fn transform_live(&mut self, op: &Operation) {
        for entry in self.live_positions.values_mut() {
            let next = entry.position.transformed_by_operation(op);
            if !next.is_equal(&entry.position) {
                let old = std::mem::replace(&mut entry.position, next);
                if let Some(callback) = &mut entry.callback {
                    callback(&old, &entry.position);
                }
            }
        }
        for entry in self.live_ranges.values_mut() {
            let start = entry.start.transformed_by_operation(op);
            let end = entry.end.transformed_by_operation(op);
            let changed = !start.is_equal(&entry.start) || !end.is_equal(&entry.end);
            if changed {
                let old = entry.range();
                entry.start = start;
                entry.end = end;
                if let Some(callback) = &mut entry.callback {
                    let new = Range::new(entry.start.clone(), entry.end.clone());
                    callback(&old, &new);
                }
            }
        }
    }

    // ── Live tracking ────────────────────────────────────────────────────

    fn check_live_root(&self, root: NodeId) -> Result<(), ModelError> {
        if !self.is_root(root) {
            return Err(ModelError::LivePositionRootNotRootElement);
        }
        Ok(())
    }

    /// Starts tracking a position across document mutation. The returned
    /// handle must be [`detach`](Document::detach_position)ed when no longer
    /// needed, or the registry keeps transforming it on every operation.
    pub fn track_position(&mut self, position: Position) -> Result<LivePosition, ModelError> {
        self.track_entry(position, None)
    }

    /// Like [`track_position`](Document::track_position) but also invokes
    /// `callback(old, new)` whenever a mutation changes the coordinates.
    pub fn track_position_with<F>(
        &mut self,
        position: Position,
        callback: F,
    ) -> Result<LivePosition, ModelError>
    where
        F: FnMut(&Position, &Position) + Send + 'static,
    {
        self.track_entry(position, Some(Box::new(callback)))
    }

    fn track_entry(
        &mut self,
        position: Position,
        callback: Option<Box<dyn FnMut(&Position, &Position) + Send>>,
    ) -> Result<LivePosition, ModelError> {
        self.check_live_root(position.root)?;
        self.resolve(&position)?;
        let id = self.next_live_id;
        self.next_live_id += 1;
        self.live_positions.insert(
            id,
            LivePositionEntry {
                position: position.clone(),
                callback,
            },
        );
        Ok(LivePosition::new(id, position))
    }

    /// Current coordinates of a tracked position; frozen last value after
    /// detach (never an error).
    pub fn live_position(&self, handle: &LivePosition) -> Position {
        self.live_positions
            .get(&handle.id())
            .map(|entry| entry.position.clone())
            .unwrap_or_else(|| handle.last().clone())
    }

    /// Stops tracking; the handle keeps the final coordinates.
    pub fn detach_position(&mut self, handle: &mut LivePosition) {
        if let Some(entry) = self.live_positions.remove(&handle.id()) {
            handle.freeze(entry.position);
        }
    }

    pub fn track_range(&mut self, range: Range) -> Result<LiveRange, ModelError> {
        self.track_range_entry(range, None)
    }

    pub fn track_range_with<F>(&mut self, range: Range, callback: F) -> Result<LiveRange, ModelError>
    where
        F: FnMut(&Range, &Range) + Send + 'static,
    {
        self.track_range_entry(range, Some(Box::new(callback)))
    }

    fn track_range_entry(
        &mut self,
        range: Range,
        callback: Option<Box<dyn FnMut(&Range, &Range) + Send>>,
    ) -> Result<LiveRange, ModelError> {
        self.check_live_root(range.start.root)?;
        self.resolve(&range.start)?;
        self.resolve(&range.end)?;
        let id = self.next_live_id;
        self.next_live_id += 1;
        self.live_ranges.insert(
            id,
            LiveRangeEntry {
                // Boundary stickiness keeps the range from absorbing content
                // inserted exactly at its edges.
                start: range.start.clone().with_stickiness(Stickiness::ToNone),
                end: range.end.clone().with_stickiness(Stickiness::ToPrevious),
                callback,
            },
        );
        Ok(LiveRange::new(id, range))
    }

    pub fn live_range(&self, handle: &LiveRange) -> Range {
        self.live_ranges
            .get(&handle.id())
            .map(|entry| entry.range())
            .unwrap_or_else(|| handle.last().clone())
    }

    pub fn detach_range(&mut self, handle: &mut LiveRange) {
        if let Some(entry) = self.live_ranges.remove(&handle.id()) {
            handle.freeze(entry.range());
        }
    }

    // ── Markers ──────────────────────────────────────────────────────────

    /// Current range of a named marker.
    pub fn marker_range(&self, name: &str) -> Option<Range> {
        let id = self.markers.get(name)?;
        self.live_ranges.get(id).map(|entry| entry.range())
    }

    pub fn marker_names(&self) -> impl Iterator<Item = &str> {
        self.markers.keys().map(String::as_str)
    }

    pub(crate) fn set_marker_raw(
        &mut self,
        name: &str,
        range: Option<Range>,
    ) -> Result<(), ModelError> {
        if let Some(range) = &range {
            self.check_live_root(range.start.root)?;
        }
        if let Some(old_id) = self.markers.shift_remove(name) {
            self.live_ranges.remove(&old_id);
        }
        if let Some(range) = range {
            let id = self.next_live_id;
            self.next_live_id += 1;
            self.live_ranges.insert(
                id,
                LiveRangeEntry {
                    start: range.start.clone().with_stickiness(Stickiness::ToNone),
                    end: range.end.clone().with_stickiness(Stickiness::ToPrevious),
                    callback: None,
                },
            );
            self.markers.insert(name.to_string(), id);
        }
        Ok(())
    }

    // ── JSON serialization ───────────────────────────────────────────────

    /// Plain-JSON projection of a subtree: elements become
    /// `{ "name", "attributes"?, "children"? }`, text runs
    /// `{ "data", "attributes"? }`, fragments an array of children.
    pub fn node_to_json(&self, id: NodeId) -> Result<Value, ModelError> {
        let data = self.data(id)?;
        let attrs_json = || -> Option<Value> {
            if data.attrs.is_empty() {
                None
            } else {
                let mut map = serde_json::Map::new();
                for (key, value) in &data.attrs {
                    map.insert(key.clone(), value.clone());
                }
                Some(Value::Object(map))
            }
        };
        match data.kind() {
            NodeKind::Text { data: text } => {
                let mut map = serde_json::Map::new();
                map.insert("data".to_string(), Value::String(text.clone()));
                if let Some(attrs) = attrs_json() {
                    map.insert("attributes".to_string(), attrs);
                }
                Ok(Value::Object(map))
            }
            NodeKind::Element { name, children } | NodeKind::RootElement { name, children } => {
                let mut map = serde_json::Map::new();
                map.insert("name".to_string(), Value::String(name.clone()));
                if let Some(attrs) = attrs_json() {
                    map.insert("attributes".to_string(), attrs);
                }
                if !children.is_empty() {
                    let children_json: Result<Vec<Value>, ModelError> = children
                        .iter()
                        .map(|&child| self.node_to_json(child))
                        .collect();
                    map.insert("children".to_string(), Value::Array(children_json?));
                }
                Ok(Value::Object(map))
            }
            NodeKind::DocumentFragment { children } => {
                let children_json: Result<Vec<Value>, ModelError> = children
                    .iter()
                    .map(|&child| self.node_to_json(child))
                    .collect();
                Ok(Value::Array(children_json?))
            }
        }
    }

    /// Materializes a detached subtree from its JSON projection. Instance
    /// identity is not preserved, structure and attributes are.
    pub fn node_from_json(&mut self, value: &Value) -> Result<NodeId, ModelError> {
        match value {
            Value::Array(items) => {
                let fragment = self.create_fragment();
                for item in items {
                    let child = self.node_from_json(item)?;
                    self.append_child(fragment, child)?;
                }
                Ok(fragment)
            }
            Value::Object(map) => {
                let attrs = match map.get("attributes") {
                    None => Attributes::new(),
                    Some(Value::Object(attr_map)) => attr_map
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    Some(other) => {
                        return Err(ModelError::MalformedJson(format!(
                            "attributes must be an object, got {other}"
                        )))
                    }
                };
                if let Some(Value::String(data)) = map.get("data") {
                    return Ok(self.create_text(data.clone(), attrs));
                }
                let name = match map.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    _ => {
                        return Err(ModelError::MalformedJson(
                            "node object needs a \"name\" or \"data\" field".to_string(),
                        ))
                    }
                };
                let element = self.create_element(name, attrs);
                if let Some(children) = map.get("children") {
                    let Value::Array(items) = children else {
                        return Err(ModelError::MalformedJson(
                            "\"children\" must be an array".to_string(),
                        ));
                    };
                    for item in items {
                        let child = self.node_from_json(item)?;
                        self.append_child(element, child)?;
                    }
                }
                Ok(element)
            }
            other => Err(ModelError::MalformedJson(format!(
                "expected object or array, got {other}"
            ))),
        }
    }

    /// Total offset size of a list of nodes.
    pub fn nodes_offset_size(&self, ids: &[NodeId]) -> usize {
        ids.iter().map(|&id| self.offset_size(id)).sum()
    }
}
