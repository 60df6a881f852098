//! Raw child-storage edits backing the operations.
//!
//! These helpers bypass the operation pipeline and are responsible for the
//! two invariants that keep the tree canonical: a text run is split when a
//! boundary falls inside it, and adjacent runs left attribute-identical by
//! an edit are merged back into one.

use serde_json::Value;

use crate::document::{Document, ModelError};
use crate::node::{attrs_equal, NodeId};
use crate::position::Position;
use crate::range::Range;

/// Ensures `offset` in `parent` is a node boundary, splitting a text run if
/// needed. Returns the child index of the boundary.
pub(crate) fn split_text_if_needed(
    doc: &mut Document,
    parent: NodeId,
    offset: usize,
) -> Result<usize, ModelError> {
    let (index, inside_text) = doc.offset_to_boundary(parent, offset)?;
    let Some((text_node, offset_in_text)) = inside_text else {
        return Ok(index);
    };
    let data = doc
        .text_data(text_node)
        .unwrap_or_default()
        .to_string();
    let attrs = doc.attributes(text_node).cloned().unwrap_or_default();
    let head: String = data.chars().take(offset_in_text).collect();
    let tail: String = data.chars().skip(offset_in_text).collect();
    doc.set_text_data_raw(text_node, head)?;
    let tail_node = doc.create_text(tail, attrs);
    doc.splice_in(parent, index + 1, &[tail_node])?;
    Ok(index + 1)
}

/// Merges the children around the boundary at `index` when both are text
/// runs with identical attributes.
pub(crate) fn merge_text_at_index(
    doc: &mut Document,
    parent: NodeId,
    index: usize,
) -> Result<(), ModelError> {
    if index == 0 || index >= doc.child_count(parent) {
        return Ok(());
    }
    let children = doc.children_of(parent);
    let left = children[index - 1];
    let right = children[index];
    if !doc.is_text(left) || !doc.is_text(right) {
        return Ok(());
    }
    let (Some(left_attrs), Some(right_attrs)) = (doc.attributes(left), doc.attributes(right))
    else {
        return Ok(());
    };
    if !attrs_equal(left_attrs, right_attrs) {
        return Ok(());
    }
    let mut combined = doc.text_data(left).unwrap_or_default().to_string();
    combined.push_str(doc.text_data(right).unwrap_or_default());
    doc.set_text_data_raw(left, combined)?;
    // The right node stays in the arena detached: operations in the
    // history may still reference it as their payload.
    doc.splice_out(parent, index, 1)?;
    Ok(())
}

/// Inserts detached nodes at a position, splitting a straddled text run and
/// merging runs at both seams. Returns the inserted offset size.
pub(crate) fn insert_nodes(
    doc: &mut Document,
    position: &Position,
    nodes: &[NodeId],
) -> Result<usize, ModelError> {
    if nodes.is_empty() {
        return Ok(0);
    }
    for &node in nodes {
        if doc.get(node).is_none() {
            return Err(ModelError::MissingNode(node));
        }
        if doc.parent_of(node).is_some() {
            return Err(ModelError::AttachedMutation(node));
        }
    }
    let resolved = doc.resolve(position)?;
    let parent = resolved.parent;
    let index = match resolved.text_offset {
        None => resolved.index,
        Some(_) => split_text_if_needed(doc, parent, resolved.offset)?,
    };
    let how_many = doc.nodes_offset_size(nodes);
    doc.splice_in(parent, index, nodes)?;
    // Merge the far seam first so the near seam's index stays valid.
    merge_text_at_index(doc, parent, index + nodes.len())?;
    merge_text_at_index(doc, parent, index)?;
    Ok(how_many)
}

/// Detaches a flat range's content. Returns the removed nodes in order.
pub(crate) fn remove_range(doc: &mut Document, range: &Range) -> Result<Vec<NodeId>, ModelError> {
    if !range.is_flat() {
        return Err(ModelError::RemoveRangeNotFlat);
    }
    if range.is_collapsed() {
        return Ok(Vec::new());
    }
    let parent = range.start.parent(doc)?;
    let start_index = split_text_if_needed(doc, parent, range.start.offset())?;
    let end_index = split_text_if_needed(doc, parent, range.end.offset())?;
    let removed = doc.splice_out(parent, start_index, end_index - start_index)?;
    merge_text_at_index(doc, parent, start_index)?;
    Ok(removed)
}

/// Moves a flat range's content to `target`. Returns the moved offset size.
pub(crate) fn move_range(
    doc: &mut Document,
    range: &Range,
    target: &Position,
) -> Result<usize, ModelError> {
    if !range.is_flat() {
        return Err(ModelError::MoveRangeNotFlat);
    }
    let how_many = range.flat_length();
    if how_many == 0 {
        return Ok(0);
    }
    let nodes = remove_range(doc, range)?;
    let target = target
        .transformed_by_deletion(&range.start, how_many)
        .ok_or(ModelError::MoveTargetInsideMovedRange)?;
    // Reattach without canonical re-merge losing node identity at the seam
    // is fine: insert_nodes merges runs exactly like a fresh insertion.
    insert_nodes(doc, &target, &nodes)?;
    Ok(how_many)
}

/// Sets (`Some`) or removes (`None`) an attribute across a range. Splits
/// straddled text runs first and re-merges every seam afterwards — also on
/// removal, which may make neighbouring runs equal again.
pub(crate) fn set_attribute_on_range(
    doc: &mut Document,
    range: &Range,
    key: &str,
    value: Option<&Value>,
) -> Result<(), ModelError> {
    for flat in range.minimal_flat_ranges(doc)? {
        let parent = flat.start.parent(doc)?;
        let start_index = split_text_if_needed(doc, parent, flat.start.offset())?;
        let end_index = split_text_if_needed(doc, parent, flat.end.offset())?;
        let covered: Vec<NodeId> = doc.children_of(parent)[start_index..end_index].to_vec();
        for node in covered {
            doc.set_attr_raw(node, key, value.cloned())?;
        }
        // High seams first: a merge removes the node at its seam index and
        // shifts everything after it.
        for seam in (start_index..=end_index).rev() {
            merge_text_at_index(doc, parent, seam)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Attributes;
    use serde_json::json;

    fn bold() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("bold".to_string(), json!(true));
        attrs
    }

    fn root_with_text(doc: &mut Document, data: &str) -> NodeId {
        let root = doc.create_root("main");
        let text = doc.create_text(data, Attributes::new());
        let pos = Position::new(root, vec![0]);
        insert_nodes(doc, &pos, &[text]).unwrap();
        root
    }

    #[test]
    fn adjacent_equal_runs_merge_on_insert() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abc");
        let more = doc.create_text("def", Attributes::new());
        insert_nodes(&mut doc, &Position::new(root, vec![3]), &[more]).unwrap();
        assert_eq!(doc.child_count(root), 1);
        let only = doc.children_of(root)[0];
        assert_eq!(doc.text_data(only), Some("abcdef"));
    }

    #[test]
    fn differently_attributed_runs_stay_separate() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abc");
        let strong = doc.create_text("def", bold());
        insert_nodes(&mut doc, &Position::new(root, vec![3]), &[strong]).unwrap();
        assert_eq!(doc.child_count(root), 2);
    }

    #[test]
    fn mid_text_insert_splits_and_remerges() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abcdef");
        let extra = doc.create_text("XY", Attributes::new());
        insert_nodes(&mut doc, &Position::new(root, vec![3]), &[extra]).unwrap();
        assert_eq!(doc.child_count(root), 1);
        assert_eq!(doc.text_data(doc.children_of(root)[0]), Some("abcXYdef"));
    }

    #[test]
    fn remove_requires_flat_range() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abc");
        let not_flat = Range::new(Position::new(root, vec![0]), Position::new(root, vec![1, 2]));
        assert!(matches!(
            remove_range(&mut doc, &not_flat),
            Err(ModelError::RemoveRangeNotFlat)
        ));
    }

    #[test]
    fn remove_mid_text_leaves_one_run() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abcdef");
        let range = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        remove_range(&mut doc, &range).unwrap();
        assert_eq!(doc.child_count(root), 1);
        assert_eq!(doc.text_data(doc.children_of(root)[0]), Some("abef"));
    }

    #[test]
    fn attribute_removal_remerges_runs() {
        let mut doc = Document::new();
        let root = doc.create_root("main");
        let plain = doc.create_text("ab", Attributes::new());
        let strong = doc.create_text("cd", bold());
        insert_nodes(&mut doc, &Position::new(root, vec![0]), &[plain]).unwrap();
        insert_nodes(&mut doc, &Position::new(root, vec![2]), &[strong]).unwrap();
        assert_eq!(doc.child_count(root), 2);
        let covering = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        set_attribute_on_range(&mut doc, &covering, "bold", None).unwrap();
        assert_eq!(doc.child_count(root), 1);
        assert_eq!(doc.text_data(doc.children_of(root)[0]), Some("abcd"));
    }

    #[test]
    fn attribute_set_splits_partial_run() {
        let mut doc = Document::new();
        let root = root_with_text(&mut doc, "abcdef");
        let middle = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        set_attribute_on_range(&mut doc, &middle, "bold", Some(&json!(true))).unwrap();
        assert_eq!(doc.child_count(root), 3);
        let children: Vec<_> = doc.children_of(root).to_vec();
        assert_eq!(doc.text_data(children[0]), Some("ab"));
        assert_eq!(doc.text_data(children[1]), Some("cd"));
        assert_eq!(doc.attr(children[1], "bold"), Some(&json!(true)));
        assert_eq!(doc.text_data(children[2]), Some("ef"));
    }
}
