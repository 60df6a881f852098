//! The model facade and its writer: the sanctioned mutation surface.
//!
//! All edits happen inside a change block: `model.change(|writer| ...)`.
//! Operations apply immediately as they are issued; per-operation listeners
//! and live transforms run operation by operation, while the batched
//! document-changed event fires exactly once when the outermost block
//! completes. Work scheduled with `enqueue_change` runs after the current
//! block's closure, still inside the same batch.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::document::{Document, ModelError};
use crate::live::{LivePosition, LiveRange};
use crate::node::{Attributes, NodeId};
use crate::operation::{Operation, OperationKind};
use crate::position::Position;
use crate::range::Range;
use crate::schema::{Schema, SchemaItemDefinition};

/// The ordered operations of one change block.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub operations: Vec<Operation>,
}

type ChangeJob = Box<dyn FnOnce(&mut Writer<'_>) + Send>;
type ChangeListener = Box<dyn FnMut(&Batch) + Send>;

/// Document plus schema plus the change-block machinery.
pub struct Model {
    document: Document,
    schema: Schema,
    pending: VecDeque<ChangeJob>,
    change_listeners: BTreeMap<u64, ChangeListener>,
    next_change_listener_id: u64,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        let mut schema = Schema::new();
        register_builtins(&mut schema);
        Self {
            document: Document::new(),
            schema,
            pending: VecDeque::new(),
            change_listeners: BTreeMap::new(),
            next_change_listener_id: 1,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    pub fn create_root(&mut self, name: &str) -> NodeId {
        self.document.create_root(name)
    }

    /// Runs a change block. Enqueued jobs drain before the block closes and
    /// the document-changed event fires once for everything applied.
    pub fn change<R>(&mut self, block: impl FnOnce(&mut Writer<'_>) -> R) -> R {
        let start = self.document.history().len();
        let result = {
            let mut writer = Writer {
                document: &mut self.document,
                schema: &self.schema,
                pending: &mut self.pending,
            };
            block(&mut writer)
        };
        loop {
            let Some(job) = self.pending.pop_front() else {
                break;
            };
            let mut writer = Writer {
                document: &mut self.document,
                schema: &self.schema,
                pending: &mut self.pending,
            };
            job(&mut writer);
        }
        let applied = &self.document.history()[start..];
        if !applied.is_empty() {
            let batch = Batch {
                operations: applied.to_vec(),
            };
            for listener in self.change_listeners.values_mut() {
                listener(&batch);
            }
        }
        result
    }

    /// Schedules a change block of its own when called between blocks.
    pub fn enqueue_change(&mut self, job: impl FnOnce(&mut Writer<'_>) + Send + 'static) {
        self.pending.push_back(Box::new(job));
        self.change(|_| {});
    }

    /// Registers a listener fired once per completed outermost change block.
    pub fn on_change<F>(&mut self, listener: F) -> u64
    where
        F: FnMut(&Batch) + Send + 'static,
    {
        let id = self.next_change_listener_id;
        self.next_change_listener_id += 1;
        self.change_listeners.insert(id, Box::new(listener));
        id
    }

    pub fn off_change(&mut self, listener_id: u64) -> bool {
        self.change_listeners.remove(&listener_id).is_some()
    }

    /// Registers a per-operation listener on the document.
    pub fn on_operation<F>(&mut self, listener: F) -> u64
    where
        F: FnMut(&Operation) + Send + 'static,
    {
        self.document.on_operation(listener)
    }

    pub fn off_operation(&mut self, listener_id: u64) -> bool {
        self.document.off_operation(listener_id)
    }

    // Live tracking passes straight through to the document.

    pub fn track_position(&mut self, position: Position) -> Result<LivePosition, ModelError> {
        self.document.track_position(position)
    }

    pub fn track_position_with<F>(
        &mut self,
        position: Position,
        callback: F,
    ) -> Result<LivePosition, ModelError>
    where
        F: FnMut(&Position, &Position) + Send + 'static,
    {
        self.document.track_position_with(position, callback)
    }

    pub fn live_position(&self, handle: &LivePosition) -> Position {
        self.document.live_position(handle)
    }

    pub fn detach_position(&mut self, handle: &mut LivePosition) {
        self.document.detach_position(handle)
    }

    pub fn track_range(&mut self, range: Range) -> Result<LiveRange, ModelError> {
        self.document.track_range(range)
    }

    pub fn live_range(&self, handle: &LiveRange) -> Range {
        self.document.live_range(handle)
    }

    pub fn detach_range(&mut self, handle: &mut LiveRange) {
        self.document.detach_range(handle)
    }
}

fn register_builtins(schema: &mut Schema) {
    let builtins = [
        ("$root", SchemaItemDefinition::new().limit().content()),
        (
            "$block",
            SchemaItemDefinition::new().allow_in(["$root"]).block(),
        ),
        (
            "$text",
            SchemaItemDefinition::new()
                .allow_in(["$block"])
                .inline()
                .content(),
        ),
        ("$documentFragment", SchemaItemDefinition::new().limit()),
    ];
    for (name, definition) in builtins {
        schema
            .register(name, definition)
            .expect("builtin names are registered once on a fresh schema");
    }
}

/// Issues operations against the document inside one change block.
pub struct Writer<'a> {
    pub(crate) document: &'a mut Document,
    pub(crate) schema: &'a Schema,
    pending: &'a mut VecDeque<ChangeJob>,
}

impl<'a> Writer<'a> {
    pub fn document(&self) -> &Document {
        self.document
    }

    /// The schema, at the borrow's lifetime so it can be consulted while
    /// the writer is mutably in use.
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// Runs after the current change block's closure, inside the same batch.
    pub fn enqueue_change(&mut self, job: impl FnOnce(&mut Writer<'_>) + Send + 'static) {
        self.pending.push_back(Box::new(job));
    }

    /// Registers a per-operation listener on the document.
    pub fn on_operation<F>(&mut self, listener: F) -> u64
    where
        F: FnMut(&Operation) + Send + 'static,
    {
        self.document.on_operation(listener)
    }

    pub fn off_operation(&mut self, listener_id: u64) -> bool {
        self.document.off_operation(listener_id)
    }

    fn apply(&mut self, kind: OperationKind) -> Result<(), ModelError> {
        let op = Operation::new(self.document.version(), kind);
        self.document.apply_operation(op)
    }

    // ── Detached construction ────────────────────────────────────────────

    pub fn create_element(&mut self, name: impl Into<String>, attrs: Attributes) -> NodeId {
        self.document.create_element(name, attrs)
    }

    pub fn create_text(&mut self, data: impl Into<String>, attrs: Attributes) -> NodeId {
        self.document.create_text(data, attrs)
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.document.create_fragment()
    }

    /// Appends a detached node to a detached container.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        self.document.append_child(parent, child)
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Inserts detached nodes at a position; returns the covered range.
    pub fn insert(&mut self, nodes: Vec<NodeId>, position: Position) -> Result<Range, ModelError> {
        let how_many = self.document.nodes_offset_size(&nodes);
        if how_many == 0 {
            return Ok(Range::collapsed(position));
        }
        self.apply(OperationKind::Insert {
            position: position.clone(),
            nodes,
            how_many,
        })?;
        Ok(Range::new(
            position.clone(),
            position.shifted_by(how_many as isize),
        ))
    }

    pub fn insert_node(&mut self, node: NodeId, position: Position) -> Result<Range, ModelError> {
        self.insert(vec![node], position)
    }

    /// Empties a detached fragment into the document.
    pub fn insert_fragment(
        &mut self,
        fragment: NodeId,
        position: Position,
    ) -> Result<Range, ModelError> {
        let count = self.document.child_count(fragment);
        let children = self.document.splice_out(fragment, 0, count)?;
        self.insert(children, position)
    }

    pub fn insert_text(
        &mut self,
        data: impl Into<String>,
        attrs: Attributes,
        position: Position,
    ) -> Result<Range, ModelError> {
        let text = self.document.create_text(data, attrs);
        self.insert(vec![text], position)
    }

    pub fn insert_element(
        &mut self,
        name: impl Into<String>,
        attrs: Attributes,
        position: Position,
    ) -> Result<Range, ModelError> {
        let element = self.document.create_element(name, attrs);
        self.insert(vec![element], position)
    }

    /// Appends a detached node at the end of an attached container.
    pub fn append(&mut self, node: NodeId, parent: NodeId) -> Result<Range, ModelError> {
        let position = Position::at_end(self.document, parent)?;
        self.insert(vec![node], position)
    }

    /// Removes a range's content into the graveyard. Non-flat ranges are
    /// decomposed and removed back-to-front so earlier coordinates hold.
    pub fn remove(&mut self, range: &Range) -> Result<(), ModelError> {
        let flats = range.minimal_flat_ranges(self.document)?;
        for flat in flats.iter().rev() {
            let graveyard_position =
                Position::at_end(self.document, self.document.graveyard())?;
            self.apply(OperationKind::Remove {
                source: flat.start.clone(),
                how_many: flat.flat_length(),
                graveyard_position,
            })?;
        }
        Ok(())
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<(), ModelError> {
        let range = Range::on_node(self.document, node)?;
        self.remove(&range)
    }

    /// Moves a flat range's content to `target`.
    pub fn move_range(&mut self, range: &Range, target: Position) -> Result<(), ModelError> {
        if !range.is_flat() {
            return Err(ModelError::MoveRangeNotFlat);
        }
        self.apply(OperationKind::Move {
            source: range.start.clone(),
            how_many: range.flat_length(),
            target,
        })
    }

    /// Splits the position's parent element in two at the position.
    /// Returns the position between the halves.
    pub fn split(&mut self, position: &Position) -> Result<Position, ModelError> {
        let parent = position.parent(self.document)?;
        if self.document.is_root(parent) {
            return Err(ModelError::SplitRoot);
        }
        let how_many = self.document.max_offset(parent) - position.offset();
        let insertion_position = Position::after(self.document, parent)?;
        self.apply(OperationKind::Split {
            position: position.clone(),
            how_many,
            insertion_position: insertion_position.clone(),
            graveyard_element: None,
        })?;
        Ok(insertion_position)
    }

    /// Merges the element after the position into the element before it.
    pub fn merge(&mut self, position: &Position) -> Result<(), ModelError> {
        let before = position
            .node_before(self.document)?
            .filter(|&node| self.document.is_element(node))
            .ok_or(ModelError::MergeNoSiblings)?;
        let after = position
            .node_after(self.document)?
            .filter(|&node| self.document.is_element(node))
            .ok_or(ModelError::MergeNoSiblings)?;
        let mut source_path = position.path.clone();
        source_path.push(0);
        let source = Position::new(position.root, source_path);
        let target = Position::at_end(self.document, before)?;
        let how_many = self.document.max_offset(after);
        let graveyard_position = Position::at_end(self.document, self.document.graveyard())?;
        self.apply(OperationKind::Merge {
            source,
            how_many,
            target,
            graveyard_position,
        })
    }

    pub fn rename(&mut self, element: NodeId, new_name: &str) -> Result<(), ModelError> {
        let old_name = self
            .document
            .name_of(element)
            .ok_or(ModelError::RenameNotAnElement)?
            .to_string();
        if old_name == new_name {
            return Ok(());
        }
        let position = Position::before(self.document, element)?;
        self.apply(OperationKind::Rename {
            position,
            old_name,
            new_name: new_name.to_string(),
        })
    }

    /// Sets one attribute on one node (element or whole text run).
    pub fn set_attribute(
        &mut self,
        node: NodeId,
        key: &str,
        value: Value,
    ) -> Result<(), ModelError> {
        let old_value = self.document.attr(node, key).cloned();
        if old_value.as_ref() == Some(&value) {
            return Ok(());
        }
        let range = Range::on_node(self.document, node)?;
        self.apply(OperationKind::SetAttribute {
            range,
            key: key.to_string(),
            old_value,
            new_value: Some(value),
        })
    }

    pub fn remove_attribute(&mut self, node: NodeId, key: &str) -> Result<(), ModelError> {
        let Some(old_value) = self.document.attr(node, key).cloned() else {
            return Ok(());
        };
        let range = Range::on_node(self.document, node)?;
        self.apply(OperationKind::SetAttribute {
            range,
            key: key.to_string(),
            old_value: Some(old_value),
            new_value: None,
        })
    }

    /// Sets (`Some`) or removes (`None`) an attribute across a range,
    /// fragmenting it into one operation per run of equal current value so
    /// every operation stays invertible.
    pub fn set_attribute_on_range(
        &mut self,
        range: &Range,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), ModelError> {
        let flats = range.minimal_flat_ranges(self.document)?;
        for flat in flats {
            let parent = flat.start.parent(self.document)?;
            let mut segments: Vec<(usize, usize, Option<Value>)> = Vec::new();
            let mut cursor = 0usize;
            for &child in self.document.children_of(parent) {
                let child_start = cursor;
                let child_end = cursor + self.document.offset_size(child);
                cursor = child_end;
                let seg_start = child_start.max(flat.start.offset());
                let seg_end = child_end.min(flat.end.offset());
                if seg_start >= seg_end {
                    continue;
                }
                let old_value = self.document.attr(child, key).cloned();
                if old_value == value {
                    continue;
                }
                match segments.last_mut() {
                    Some((_, last_end, last_old))
                        if *last_end == seg_start && *last_old == old_value =>
                    {
                        *last_end = seg_end;
                    }
                    _ => segments.push((seg_start, seg_end, old_value)),
                }
            }
            for (seg_start, seg_end, old_value) in segments {
                let op_range = Range::new(
                    Position::at(self.document, parent, seg_start)?,
                    Position::at(self.document, parent, seg_end)?,
                );
                self.apply(OperationKind::SetAttribute {
                    range: op_range,
                    key: key.to_string(),
                    old_value,
                    new_value: value.clone(),
                })?;
            }
        }
        Ok(())
    }

    // ── Markers ──────────────────────────────────────────────────────────

    pub fn add_marker(&mut self, name: &str, range: Range) -> Result<(), ModelError> {
        let old_range = self.document.marker_range(name);
        self.apply(OperationKind::MarkerChange {
            name: name.to_string(),
            old_range,
            new_range: Some(range),
        })
    }

    pub fn remove_marker(&mut self, name: &str) -> Result<(), ModelError> {
        let Some(old_range) = self.document.marker_range(name) else {
            return Ok(());
        };
        self.apply(OperationKind::MarkerChange {
            name: name.to_string(),
            old_range: Some(old_range),
            new_range: None,
        })
    }

    /// Applies a previously built operation (an inverse, or one rebuilt
    /// from JSON). Its base version must match the current document
    /// version.
    pub fn apply_operation(&mut self, operation: Operation) -> Result<(), ModelError> {
        self.document.apply_operation(operation)
    }
}
