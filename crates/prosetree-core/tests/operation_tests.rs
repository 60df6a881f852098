use prosetree_core::{
    Attributes, Document, Model, ModelError, NodeId, Operation, Position, Range,
};
use serde_json::json;

fn abcdef() -> (Model, NodeId) {
    let mut model = Model::new();
    let root = model.create_root("main");
    model.change(|w| {
        w.insert_text("abcdef", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
    });
    (model, root)
}

fn two_paragraphs(a: &str, b: &str) -> (Model, NodeId) {
    let mut model = Model::new();
    let root = model.create_root("main");
    model.change(|w| {
        for (i, data) in [a, b].iter().enumerate() {
            let paragraph = w.create_element("paragraph", Attributes::new());
            let text = w.create_text(*data, Attributes::new());
            w.append_child(paragraph, text).unwrap();
            w.insert_node(paragraph, Position::new(root, vec![i])).unwrap();
        }
    });
    (model, root)
}

fn root_text(model: &Model, root: NodeId) -> String {
    let doc = model.document();
    doc.children_of(root)
        .iter()
        .filter_map(|&child| doc.text_data(child))
        .collect()
}

fn last_op(model: &Model) -> Operation {
    model.document().history().last().unwrap().clone()
}

fn apply_inverse(model: &mut Model, op: &Operation) {
    let inverse = op.inverse(model.document()).unwrap();
    model.change(|w| w.apply_operation(inverse).unwrap());
}

#[test]
fn base_version_mismatch_is_rejected() {
    let (mut model, root) = abcdef();
    let stale = Operation::new(
        99,
        prosetree_core::OperationKind::Move {
            source: Position::new(root, vec![0]),
            how_many: 1,
            target: Position::new(root, vec![5]),
        },
    );
    model.change(|w| {
        let err = w.apply_operation(stale).unwrap_err();
        assert!(matches!(err, ModelError::BaseVersionMismatch { .. }));
    });
}

#[test]
fn remove_moves_content_to_graveyard_and_inverts() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        w.remove(&range).unwrap();
    });
    assert_eq!(root_text(&model, root), "abef");
    let graveyard = model.document().graveyard();
    assert_eq!(model.document().max_offset(graveyard), 2);

    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert_eq!(root_text(&model, root), "abcdef");
    assert_eq!(model.document().child_count(root), 1);
    assert_eq!(model.document().max_offset(graveyard), 0);
}

#[test]
fn insert_inverts_to_removal() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        w.insert_text("XY", Attributes::new(), Position::new(root, vec![3]))
            .unwrap();
    });
    assert_eq!(root_text(&model, root), "abcXYdef");
    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert_eq!(root_text(&model, root), "abcdef");
}

#[test]
fn move_and_its_inverse_round_trip() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![1]), Position::new(root, vec![3]));
        w.move_range(&range, Position::new(root, vec![5])).unwrap();
    });
    assert_eq!(root_text(&model, root), "adebcf");
    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert_eq!(root_text(&model, root), "abcdef");
}

#[test]
fn move_rejects_non_flat_ranges() {
    let (mut model, root) = two_paragraphs("ab", "cd");
    model.change(|w| {
        let not_flat = Range::new(Position::new(root, vec![0, 1]), Position::new(root, vec![1]));
        let err = w
            .move_range(&not_flat, Position::new(root, vec![2]))
            .unwrap_err();
        assert!(matches!(err, ModelError::MoveRangeNotFlat));
    });
}

fn one_paragraph(data: &str) -> (Model, NodeId) {
    let mut model = Model::new();
    let root = model.create_root("main");
    model.change(|w| {
        let paragraph = w.create_element("paragraph", Attributes::new());
        let text = w.create_text(data, Attributes::new());
        w.append_child(paragraph, text).unwrap();
        w.insert_node(paragraph, Position::new(root, vec![0])).unwrap();
    });
    (model, root)
}

#[test]
fn split_divides_an_element_and_inverts() {
    let (mut model, root) = one_paragraph("foobar");
    model.change(|w| {
        w.split(&Position::new(root, vec![0, 3])).unwrap();
    });
    {
        let doc = model.document();
        assert_eq!(doc.child_count(root), 2);
        let first = doc.children_of(root)[0];
        let second = doc.children_of(root)[1];
        assert_eq!(doc.text_data(doc.children_of(first)[0]), Some("foo"));
        assert_eq!(doc.text_data(doc.children_of(second)[0]), Some("bar"));
        assert_eq!(doc.name_of(second), Some("paragraph"));
    }

    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    let doc = model.document();
    assert_eq!(doc.child_count(root), 1);
    let only = doc.children_of(root)[0];
    assert_eq!(doc.text_data(doc.children_of(only)[0]), Some("foobar"));
}

#[test]
fn merge_joins_siblings_and_inverse_restores_the_element() {
    let (mut model, root) = two_paragraphs("foo", "bar");
    let second_before = model.document().children_of(root)[1];

    model.change(|w| {
        w.merge(&Position::new(root, vec![1])).unwrap();
    });
    {
        let doc = model.document();
        assert_eq!(doc.child_count(root), 1);
        let only = doc.children_of(root)[0];
        assert_eq!(doc.child_count(only), 1);
        assert_eq!(doc.text_data(doc.children_of(only)[0]), Some("foobar"));
    }

    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    let doc = model.document();
    assert_eq!(doc.child_count(root), 2);
    // The merged-away element came back from the graveyard, identity intact.
    assert_eq!(doc.children_of(root)[1], second_before);
    let second = doc.children_of(root)[1];
    assert_eq!(doc.text_data(doc.children_of(second)[0]), Some("bar"));
}

#[test]
fn merge_requires_elements_on_both_sides() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let err = w.merge(&Position::new(root, vec![3])).unwrap_err();
        assert!(matches!(err, ModelError::MergeNoSiblings));
    });
}

#[test]
fn set_attribute_splits_runs_and_inverts() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let middle = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        w.set_attribute_on_range(&middle, "bold", Some(json!(true)))
            .unwrap();
    });
    assert_eq!(model.document().child_count(root), 3);

    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert_eq!(model.document().child_count(root), 1);
    assert_eq!(root_text(&model, root), "abcdef");
}

#[test]
fn rename_and_its_inverse() {
    let (mut model, root) = two_paragraphs("ab", "cd");
    let first = model.document().children_of(root)[0];
    model.change(|w| {
        w.rename(first, "heading1").unwrap();
    });
    assert_eq!(model.document().name_of(first), Some("heading1"));
    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert_eq!(model.document().name_of(first), Some("paragraph"));
}

#[test]
fn marker_change_and_its_inverse() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![1]), Position::new(root, vec![4]));
        w.add_marker("note", range).unwrap();
    });
    assert!(model.document().marker_range("note").is_some());
    let op = last_op(&model);
    apply_inverse(&mut model, &op);
    assert!(model.document().marker_range("note").is_none());
}

#[test]
fn every_operation_variant_round_trips_through_json() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        w.insert_text("XY", Attributes::new(), Position::new(root, vec![3]))
            .unwrap();
        let range = Range::new(Position::new(root, vec![0]), Position::new(root, vec![2]));
        w.set_attribute_on_range(&range, "bold", Some(json!(true)))
            .unwrap();
        let moved = Range::new(Position::new(root, vec![4]), Position::new(root, vec![5]));
        w.move_range(&moved, Position::new(root, vec![8])).unwrap();
        let removed = Range::new(Position::new(root, vec![0]), Position::new(root, vec![1]));
        w.remove(&removed).unwrap();
        let paragraph = w.create_element("paragraph", Attributes::new());
        w.insert_node(paragraph, Position::new(root, vec![0])).unwrap();
        w.add_marker("note", Range::new(
            Position::new(root, vec![0]),
            Position::new(root, vec![1]),
        ))
        .unwrap();
    });

    let mut scratch = Document::new();
    scratch.create_root("main");
    for op in model.document().history() {
        let encoded = op.to_json(model.document()).unwrap();
        let rebuilt = Operation::from_json(&mut scratch, &encoded).unwrap();
        assert_eq!(rebuilt.to_json(&scratch).unwrap(), encoded);
    }
}

#[test]
fn split_and_merge_round_trip_through_json() {
    let (mut model, root) = two_paragraphs("foo", "bar");
    model.change(|w| {
        w.merge(&Position::new(root, vec![1])).unwrap();
        w.split(&Position::new(root, vec![0, 3])).unwrap();
    });
    let mut scratch = Document::new();
    scratch.create_root("main");
    for op in model.document().history() {
        let encoded = op.to_json(model.document()).unwrap();
        let rebuilt = Operation::from_json(&mut scratch, &encoded).unwrap();
        assert_eq!(rebuilt.to_json(&scratch).unwrap(), encoded);
    }
}

#[test]
fn transform_by_disjoint_operation_is_identity() {
    let (mut model, root) = abcdef();
    let other = model.create_root("second");
    model.change(|w| {
        w.insert_text("zz", Attributes::new(), Position::new(other, vec![0]))
            .unwrap();
    });
    let op = last_op(&model);
    let position = Position::new(root, vec![3]);
    assert!(position.transformed_by_operation(&op).is_equal(&position));
}
