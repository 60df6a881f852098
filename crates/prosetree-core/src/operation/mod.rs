//! Operations: the atomic, serializable, invertible mutation primitives.
//!
//! Every change to an attached tree is described by one of these variants
//! and applied through the document, which validates the base version,
//! notifies listeners and transforms live registries. Variants carry enough
//! coordinates that position transformation needs no tree access.

pub(crate) mod utils;

use serde_json::Value;

use crate::document::{Document, ModelError};
use crate::node::NodeId;
use crate::position::{Position, Stickiness};
use crate::range::Range;

/// One atomic mutation, stamped with the document version it applies to.
#[derive(Debug, Clone)]
pub struct Operation {
    pub base_version: u64,
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(base_version: u64, kind: OperationKind) -> Self {
        Self { base_version, kind }
    }

    /// The operation undoing this one, expressed against the post-apply
    /// tree (its base version is this operation's successor).
    pub fn inverse(&self, doc: &Document) -> Result<Operation, ModelError> {
        let kind = match &self.kind {
            OperationKind::Insert {
                position, how_many, ..
            } => OperationKind::Remove {
                source: position.clone(),
                how_many: *how_many,
                graveyard_position: Position::at_end(doc, doc.graveyard())?,
            },
            OperationKind::Remove {
                source,
                how_many,
                graveyard_position,
            } => OperationKind::Move {
                source: graveyard_position.clone(),
                how_many: *how_many,
                target: source.clone(),
            },
            OperationKind::Move {
                source,
                how_many,
                target,
            } => {
                let moved_range_start = target
                    .transformed_by_deletion(source, *how_many)
                    .unwrap_or_else(|| target.clone());
                let new_target = source.transformed_by_insertion(&moved_range_start, *how_many);
                OperationKind::Move {
                    source: moved_range_start,
                    how_many: *how_many,
                    target: new_target,
                }
            }
            OperationKind::Split {
                position,
                how_many,
                insertion_position,
                ..
            } => {
                let mut source = insertion_position.clone();
                source.path.push(0);
                OperationKind::Merge {
                    source,
                    how_many: *how_many,
                    target: position.clone(),
                    graveyard_position: Position::at_end(doc, doc.graveyard())?,
                }
            }
            OperationKind::Merge {
                source,
                how_many,
                target,
                graveyard_position,
            } => OperationKind::Split {
                position: target.clone(),
                how_many: *how_many,
                insertion_position: Position::new(source.root, source.parent_path().to_vec()),
                graveyard_element: Some(graveyard_position.clone()),
            },
            OperationKind::SetAttribute {
                range,
                key,
                old_value,
                new_value,
            } => OperationKind::SetAttribute {
                range: range.clone(),
                key: key.clone(),
                old_value: new_value.clone(),
                new_value: old_value.clone(),
            },
            OperationKind::Rename {
                position,
                old_name,
                new_name,
            } => OperationKind::Rename {
                position: position.clone(),
                old_name: new_name.clone(),
                new_name: old_name.clone(),
            },
            OperationKind::MarkerChange {
                name,
                old_range,
                new_range,
            } => OperationKind::MarkerChange {
                name: name.clone(),
                old_range: new_range.clone(),
                new_range: old_range.clone(),
            },
        };
        Ok(Operation::new(self.base_version + 1, kind))
    }

    pub fn to_json(&self, doc: &Document) -> Result<Value, ModelError> {
        let mut map = serde_json::Map::new();
        map.insert("op".to_string(), Value::String(self.kind.name().to_string()));
        map.insert("baseVersion".to_string(), Value::from(self.base_version));
        match &self.kind {
            OperationKind::Insert {
                position, nodes, ..
            } => {
                map.insert("position".to_string(), position_to_json(doc, position)?);
                let nodes_json: Result<Vec<Value>, ModelError> =
                    nodes.iter().map(|&node| doc.node_to_json(node)).collect();
                map.insert("nodes".to_string(), Value::Array(nodes_json?));
            }
            OperationKind::Remove {
                source,
                how_many,
                graveyard_position,
            } => {
                map.insert("source".to_string(), position_to_json(doc, source)?);
                map.insert("howMany".to_string(), Value::from(*how_many as u64));
                map.insert(
                    "graveyardPosition".to_string(),
                    position_to_json(doc, graveyard_position)?,
                );
            }
            OperationKind::Move {
                source,
                how_many,
                target,
            } => {
                map.insert("source".to_string(), position_to_json(doc, source)?);
                map.insert("howMany".to_string(), Value::from(*how_many as u64));
                map.insert("target".to_string(), position_to_json(doc, target)?);
            }
            OperationKind::Split {
                position,
                how_many,
                insertion_position,
                graveyard_element,
            } => {
                map.insert("position".to_string(), position_to_json(doc, position)?);
                map.insert("howMany".to_string(), Value::from(*how_many as u64));
                map.insert(
                    "insertionPosition".to_string(),
                    position_to_json(doc, insertion_position)?,
                );
                map.insert(
                    "graveyardElement".to_string(),
                    match graveyard_element {
                        Some(pos) => position_to_json(doc, pos)?,
                        None => Value::Null,
                    },
                );
            }
            OperationKind::Merge {
                source,
                how_many,
                target,
                graveyard_position,
            } => {
                map.insert("source".to_string(), position_to_json(doc, source)?);
                map.insert("howMany".to_string(), Value::from(*how_many as u64));
                map.insert("target".to_string(), position_to_json(doc, target)?);
                map.insert(
                    "graveyardPosition".to_string(),
                    position_to_json(doc, graveyard_position)?,
                );
            }
            OperationKind::SetAttribute {
                range,
                key,
                old_value,
                new_value,
            } => {
                map.insert("range".to_string(), range_to_json(doc, range)?);
                map.insert("key".to_string(), Value::String(key.clone()));
                map.insert(
                    "oldValue".to_string(),
                    old_value.clone().unwrap_or(Value::Null),
                );
                map.insert(
                    "newValue".to_string(),
                    new_value.clone().unwrap_or(Value::Null),
                );
            }
            OperationKind::Rename {
                position,
                old_name,
                new_name,
            } => {
                map.insert("position".to_string(), position_to_json(doc, position)?);
                map.insert("oldName".to_string(), Value::String(old_name.clone()));
                map.insert("newName".to_string(), Value::String(new_name.clone()));
            }
            OperationKind::MarkerChange {
                name,
                old_range,
                new_range,
            } => {
                map.insert("name".to_string(), Value::String(name.clone()));
                map.insert(
                    "oldRange".to_string(),
                    match old_range {
                        Some(range) => range_to_json(doc, range)?,
                        None => Value::Null,
                    },
                );
                map.insert(
                    "newRange".to_string(),
                    match new_range {
                        Some(range) => range_to_json(doc, range)?,
                        None => Value::Null,
                    },
                );
            }
        }
        Ok(Value::Object(map))
    }

    /// Rebuilds an operation from its JSON form. Insert payloads are
    /// materialized as fresh detached nodes — structure survives the round
    /// trip, instance identity does not.
    pub fn from_json(doc: &mut Document, value: &Value) -> Result<Operation, ModelError> {
        let map = value
            .as_object()
            .ok_or_else(|| ModelError::MalformedJson("operation must be an object".to_string()))?;
        let op_name = map
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelError::MalformedJson("missing \"op\" field".to_string()))?;
        let base_version = map
            .get("baseVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| ModelError::MalformedJson("missing \"baseVersion\"".to_string()))?;
        let pos = |field: &str| -> Result<Position, ModelError> {
            position_from_json(
                doc,
                map.get(field).ok_or_else(|| {
                    ModelError::MalformedJson(format!("missing \"{field}\" field"))
                })?,
            )
        };
        let how_many = || -> Result<usize, ModelError> {
            map.get("howMany")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .ok_or_else(|| ModelError::MalformedJson("missing \"howMany\"".to_string()))
        };
        let kind = match op_name {
            "insert" => {
                let position = pos("position")?;
                let items = map
                    .get("nodes")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ModelError::MalformedJson("missing \"nodes\"".to_string()))?;
                let mut nodes = Vec::with_capacity(items.len());
                for item in items {
                    nodes.push(doc.node_from_json(item)?);
                }
                let how_many = doc.nodes_offset_size(&nodes);
                OperationKind::Insert {
                    position,
                    nodes,
                    how_many,
                }
            }
            "remove" => OperationKind::Remove {
                source: pos("source")?,
                how_many: how_many()?,
                graveyard_position: pos("graveyardPosition")?,
            },
            "move" => OperationKind::Move {
                source: pos("source")?,
                how_many: how_many()?,
                target: pos("target")?,
            },
            "split" => OperationKind::Split {
                position: pos("position")?,
                how_many: how_many()?,
                insertion_position: pos("insertionPosition")?,
                graveyard_element: match map.get("graveyardElement") {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(position_from_json(doc, value)?),
                },
            },
            "merge" => OperationKind::Merge {
                source: pos("source")?,
                how_many: how_many()?,
                target: pos("target")?,
                graveyard_position: pos("graveyardPosition")?,
            },
            "setAttribute" => {
                let range_value = map
                    .get("range")
                    .ok_or_else(|| ModelError::MalformedJson("missing \"range\"".to_string()))?;
                let value_of = |field: &str| -> Option<Value> {
                    match map.get(field) {
                        None | Some(Value::Null) => None,
                        Some(value) => Some(value.clone()),
                    }
                };
                OperationKind::SetAttribute {
                    range: range_from_json(doc, range_value)?,
                    key: map
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ModelError::MalformedJson("missing \"key\"".to_string()))?
                        .to_string(),
                    old_value: value_of("oldValue"),
                    new_value: value_of("newValue"),
                }
            }
            "rename" => OperationKind::Rename {
                position: pos("position")?,
                old_name: map
                    .get("oldName")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::MalformedJson("missing \"oldName\"".to_string()))?
                    .to_string(),
                new_name: map
                    .get("newName")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ModelError::MalformedJson("missing \"newName\"".to_string()))?
                    .to_string(),
            },
            "marker" => {
                let range_of = |field: &str| -> Result<Option<Range>, ModelError> {
                    match map.get(field) {
                        None | Some(Value::Null) => Ok(None),
                        Some(value) => Ok(Some(range_from_json(doc, value)?)),
                    }
                };
                OperationKind::MarkerChange {
                    name: map
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ModelError::MalformedJson("missing \"name\"".to_string()))?
                        .to_string(),
                    old_range: range_of("oldRange")?,
                    new_range: range_of("newRange")?,
                }
            }
            other => {
                return Err(ModelError::MalformedJson(format!(
                    "unknown operation \"{other}\""
                )))
            }
        };
        Ok(Operation::new(base_version, kind))
    }
}

/// The variants of document mutation.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Attach detached nodes at a position.
    Insert {
        position: Position,
        nodes: Vec<NodeId>,
        how_many: usize,
    },
    /// Move a flat span to the graveyard.
    Remove {
        source: Position,
        how_many: usize,
        graveyard_position: Position,
    },
    /// Move a flat span to a new position.
    Move {
        source: Position,
        how_many: usize,
        target: Position,
    },
    /// Split an element at a position: content past the split point moves
    /// into a sibling element inserted at `insertion_position` (a fresh
    /// clone, or the element fetched back from `graveyard_element`).
    Split {
        position: Position,
        how_many: usize,
        insertion_position: Position,
        graveyard_element: Option<Position>,
    },
    /// Merge the element after `source`'s parent boundary into the previous
    /// sibling: content moves to `target`, the emptied element goes to the
    /// graveyard.
    Merge {
        source: Position,
        how_many: usize,
        target: Position,
        graveyard_position: Position,
    },
    /// Set (`Some`) or remove (`None`) one attribute across a range.
    SetAttribute {
        range: Range,
        key: String,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },
    /// Rename the element directly after `position`.
    Rename {
        position: Position,
        old_name: String,
        new_name: String,
    },
    /// Add, move or remove a named marker.
    MarkerChange {
        name: String,
        old_range: Option<Range>,
        new_range: Option<Range>,
    },
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Insert { .. } => "insert",
            OperationKind::Remove { .. } => "remove",
            OperationKind::Move { .. } => "move",
            OperationKind::Split { .. } => "split",
            OperationKind::Merge { .. } => "merge",
            OperationKind::SetAttribute { .. } => "setAttribute",
            OperationKind::Rename { .. } => "rename",
            OperationKind::MarkerChange { .. } => "marker",
        }
    }
}

/// Applies the structural change of one operation to the tree.
pub(crate) fn apply_to(doc: &mut Document, kind: &mut OperationKind) -> Result<(), ModelError> {
    match kind {
        OperationKind::Insert {
            position, nodes, ..
        } => {
            // The tree gets the caller's nodes (their ids stay valid); the
            // operation keeps a pristine clone as its payload, immune to
            // the text-run canonicalization the insertion may perform.
            let snapshot: Result<Vec<NodeId>, ModelError> = nodes
                .iter()
                .map(|&node| doc.clone_subtree(node))
                .collect();
            let originals = std::mem::replace(nodes, snapshot?);
            utils::insert_nodes(doc, position, &originals)?;
            Ok(())
        }
        OperationKind::Remove {
            source,
            how_many,
            graveyard_position,
        } => {
            let range = Range::new(source.clone(), source.shifted_by(*how_many as isize));
            utils::move_range(doc, &range, graveyard_position)?;
            Ok(())
        }
        OperationKind::Move {
            source,
            how_many,
            target,
        } => {
            let range = Range::new(source.clone(), source.shifted_by(*how_many as isize));
            utils::move_range(doc, &range, target)?;
            Ok(())
        }
        OperationKind::Split {
            position,
            how_many,
            insertion_position,
            graveyard_element,
        } => {
            let split_element = position.parent(doc)?;
            if doc.is_root(split_element) {
                return Err(ModelError::SplitRoot);
            }
            let new_element = match graveyard_element {
                Some(gy_position) => {
                    let element = gy_position.node_after(doc)?.ok_or_else(|| {
                        ModelError::InvalidPosition(
                            "graveyard position addresses no element".to_string(),
                        )
                    })?;
                    let gy_range =
                        Range::new(gy_position.clone(), gy_position.shifted_by(1));
                    utils::move_range(doc, &gy_range, insertion_position)?;
                    element
                }
                None => {
                    let name = doc
                        .name_of(split_element)
                        .unwrap_or_default()
                        .to_string();
                    let attrs = doc.attributes(split_element).cloned().unwrap_or_default();
                    let element = doc.create_element(name, attrs);
                    utils::insert_nodes(doc, insertion_position, &[element])?;
                    element
                }
            };
            let moved = Range::new(position.clone(), position.shifted_by(*how_many as isize));
            let target = Position::at(doc, new_element, 0)?;
            utils::move_range(doc, &moved, &target)?;
            Ok(())
        }
        OperationKind::Merge {
            source,
            how_many,
            target,
            graveyard_position,
        } => {
            let deletion_position = Position::new(source.root, source.parent_path().to_vec());
            let merged_element = deletion_position
                .node_after(doc)?
                .ok_or(ModelError::MergeNoSiblings)?;
            if !doc.is_element(merged_element) {
                return Err(ModelError::MergeNoSiblings);
            }
            let content = Range::new(source.clone(), source.shifted_by(*how_many as isize));
            utils::move_range(doc, &content, target)?;
            let emptied = Range::new(
                deletion_position.clone(),
                deletion_position.shifted_by(1),
            );
            utils::move_range(doc, &emptied, graveyard_position)?;
            Ok(())
        }
        OperationKind::SetAttribute {
            range,
            key,
            new_value,
            ..
        } => utils::set_attribute_on_range(doc, range, key, new_value.as_ref()),
        OperationKind::Rename {
            position,
            old_name,
            new_name,
        } => {
            let element = position
                .node_after(doc)?
                .ok_or(ModelError::RenameNotAnElement)?;
            if doc.name_of(element) != Some(old_name.as_str()) {
                return Err(ModelError::InvalidPosition(format!(
                    "rename expected element \"{old_name}\""
                )));
            }
            doc.rename_raw(element, new_name)
        }
        OperationKind::MarkerChange { name, new_range, .. } => {
            doc.set_marker_raw(name, new_range.clone())
        }
    }
}

fn stickiness_to_str(stickiness: Stickiness) -> &'static str {
    match stickiness {
        Stickiness::ToNone => "toNone",
        Stickiness::ToPrevious => "toPrevious",
        Stickiness::ToNext => "toNext",
    }
}

fn stickiness_from_str(raw: &str) -> Stickiness {
    match raw {
        "toPrevious" => Stickiness::ToPrevious,
        "toNext" => Stickiness::ToNext,
        _ => Stickiness::ToNone,
    }
}

pub(crate) fn position_to_json(doc: &Document, position: &Position) -> Result<Value, ModelError> {
    let root_name = doc
        .root_name_of(position.root)
        .ok_or(ModelError::MissingNode(position.root))?;
    let mut map = serde_json::Map::new();
    map.insert("root".to_string(), Value::String(root_name.to_string()));
    map.insert(
        "path".to_string(),
        Value::Array(position.path.iter().map(|&o| Value::from(o as u64)).collect()),
    );
    map.insert(
        "stickiness".to_string(),
        Value::String(stickiness_to_str(position.stickiness).to_string()),
    );
    Ok(Value::Object(map))
}

pub(crate) fn position_from_json(doc: &Document, value: &Value) -> Result<Position, ModelError> {
    let map = value
        .as_object()
        .ok_or_else(|| ModelError::MalformedJson("position must be an object".to_string()))?;
    let root_name = map
        .get("root")
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::MalformedJson("position needs a \"root\" name".to_string()))?;
    let root = doc
        .root(root_name)
        .ok_or_else(|| ModelError::MalformedJson(format!("unknown root \"{root_name}\"")))?;
    let path = map
        .get("path")
        .and_then(Value::as_array)
        .ok_or_else(|| ModelError::MalformedJson("position needs a \"path\" array".to_string()))?
        .iter()
        .map(|step| {
            step.as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| ModelError::MalformedJson("path steps must be numbers".to_string()))
        })
        .collect::<Result<Vec<usize>, ModelError>>()?;
    let stickiness = map
        .get("stickiness")
        .and_then(Value::as_str)
        .map(stickiness_from_str)
        .unwrap_or_default();
    Ok(Position::new(root, path).with_stickiness(stickiness))
}

pub(crate) fn range_to_json(doc: &Document, range: &Range) -> Result<Value, ModelError> {
    let mut map = serde_json::Map::new();
    map.insert("start".to_string(), position_to_json(doc, &range.start)?);
    map.insert("end".to_string(), position_to_json(doc, &range.end)?);
    Ok(Value::Object(map))
}

pub(crate) fn range_from_json(doc: &Document, value: &Value) -> Result<Range, ModelError> {
    let map = value
        .as_object()
        .ok_or_else(|| ModelError::MalformedJson("range must be an object".to_string()))?;
    let start = position_from_json(
        doc,
        map.get("start")
            .ok_or_else(|| ModelError::MalformedJson("range needs \"start\"".to_string()))?,
    )?;
    let end = position_from_json(
        doc,
        map.get("end")
            .ok_or_else(|| ModelError::MalformedJson("range needs \"end\"".to_string()))?,
    )?;
    Ok(Range::new(start, end))
}
