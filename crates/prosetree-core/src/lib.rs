//! Core primitives of a tree-structured rich-text document model.
//!
//! The crate implements the model layer of an editing framework: an
//! attribute-bearing node tree addressed by offset paths, operation-based
//! mutation with invertible, JSON-serializable operations, live positions
//! and ranges that survive structural edits, and a schema engine deciding
//! which children and attributes are valid where.

pub mod document;
pub mod insert_content;
pub mod live;
pub mod node;
pub mod operation;
pub mod position;
pub mod range;
pub mod schema;
pub mod selection;
pub mod text_proxy;
pub mod tree_walker;
pub mod writer;

pub use document::{Document, ModelError, GRAVEYARD_ROOT_NAME};
pub use insert_content::{insert_content, InsertContentResult};
pub use live::{LivePosition, LiveRange};
pub use node::{Attributes, NodeData, NodeId, NodeKind};
pub use operation::{Operation, OperationKind};
pub use position::{Position, PositionRelation, Stickiness};
pub use range::Range;
pub use schema::{
    CompiledDefinition, ContextRef, ScanDirection, Schema, SchemaContext, SchemaContextItem,
    SchemaError, SchemaItemDefinition,
};
pub use selection::Selection;
pub use text_proxy::{CharacterProxy, TextProxy};
pub use tree_walker::{TreeWalker, WalkerDirection, WalkerItem, WalkerStep, WalkerValue};
pub use writer::{Batch, Model, Writer};

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
