use std::sync::{Arc, Mutex};

use prosetree_core::{Attributes, Model, NodeId, Position, Range, Stickiness};

/// Document with root text `"abcdef"`.
fn abcdef() -> (Model, NodeId) {
    let mut model = Model::new();
    let root = model.create_root("main");
    model.change(|w| {
        w.insert_text("abcdef", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
    });
    (model, root)
}

fn insert_at(model: &mut Model, root: NodeId, offset: usize, text: &str) {
    model.change(|w| {
        w.insert_text(text, Attributes::new(), Position::new(root, vec![offset]))
            .unwrap();
    });
}

#[test]
fn insertion_before_moves_position_forward() {
    let (mut model, root) = abcdef();
    let live = model.track_position(Position::new(root, vec![3])).unwrap();
    insert_at(&mut model, root, 0, "xyz");
    assert_eq!(model.live_position(&live).path, vec![6]);
}

#[test]
fn insertion_at_position_moves_by_default() {
    let (mut model, root) = abcdef();
    let live = model.track_position(Position::new(root, vec![3])).unwrap();
    insert_at(&mut model, root, 3, "xyz");
    assert_eq!(model.live_position(&live).path, vec![6]);
}

#[test]
fn insertion_at_position_respects_to_previous() {
    let (mut model, root) = abcdef();
    let live = model
        .track_position(Position::new(root, vec![3]).with_stickiness(Stickiness::ToPrevious))
        .unwrap();
    insert_at(&mut model, root, 3, "xyz");
    assert_eq!(model.live_position(&live).path, vec![3]);
}

#[test]
fn equal_positions_diverge_by_stickiness() {
    let (mut model, root) = abcdef();
    let moving = model.track_position(Position::new(root, vec![3])).unwrap();
    let staying = model
        .track_position(Position::new(root, vec![3]).with_stickiness(Stickiness::ToPrevious))
        .unwrap();
    insert_at(&mut model, root, 3, "xyz");
    assert_eq!(model.live_position(&moving).path, vec![6]);
    assert_eq!(model.live_position(&staying).path, vec![3]);
}

#[test]
fn insertion_in_other_root_is_a_no_op() {
    let (mut model, root) = abcdef();
    let other = model.create_root("second");
    let live = model.track_position(Position::new(root, vec![3])).unwrap();
    insert_at(&mut model, other, 0, "xyz");
    assert_eq!(model.live_position(&live).path, vec![3]);
}

#[test]
fn detached_handle_is_frozen_and_quiet() {
    let (mut model, root) = abcdef();
    let mut live = model.track_position(Position::new(root, vec![3])).unwrap();
    insert_at(&mut model, root, 0, "x");
    assert_eq!(model.live_position(&live).path, vec![4]);
    model.detach_position(&mut live);
    insert_at(&mut model, root, 0, "yz");
    // No further transforms, reads never fail.
    assert_eq!(model.live_position(&live).path, vec![4]);
}

#[test]
fn change_callback_reports_the_pre_change_position() {
    let (mut model, root) = abcdef();
    let seen: Arc<Mutex<Vec<(Vec<usize>, Vec<usize>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _live = model
        .track_position_with(Position::new(root, vec![3]), move |old, new| {
            sink.lock().unwrap().push((old.path.clone(), new.path.clone()));
        })
        .unwrap();
    insert_at(&mut model, root, 0, "xy");
    let events = seen.lock().unwrap();
    assert_eq!(events.as_slice(), &[(vec![3], vec![5])]);
}

#[test]
fn tracking_requires_a_document_root() {
    let mut model = Model::new();
    let fragment = model.change(|w| w.create_fragment());
    let err = model
        .track_position(Position::new(fragment, vec![0]))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("liveposition-root-not-rootelement"), "{message}");
}

#[test]
fn removal_containing_position_lands_in_graveyard() {
    let (mut model, root) = abcdef();
    let live = model.track_position(Position::new(root, vec![3])).unwrap();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![2]), Position::new(root, vec![5]));
        w.remove(&range).unwrap();
    });
    let position = model.live_position(&live);
    assert_eq!(position.root, model.document().graveyard());
}

#[test]
fn removal_before_position_shifts_backward() {
    let (mut model, root) = abcdef();
    let live = model.track_position(Position::new(root, vec![4])).unwrap();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![0]), Position::new(root, vec![2]));
        w.remove(&range).unwrap();
    });
    assert_eq!(model.live_position(&live).path, vec![2]);
}

#[test]
fn live_range_does_not_absorb_boundary_insertions() {
    let (mut model, root) = abcdef();
    let range = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
    let live = model.track_range(range).unwrap();

    // At the start: the whole range shifts.
    insert_at(&mut model, root, 2, "xy");
    let current = model.live_range(&live);
    assert_eq!(current.start.path, vec![4]);
    assert_eq!(current.end.path, vec![6]);

    // At the end: the range does not grow.
    insert_at(&mut model, root, 6, "xy");
    let current = model.live_range(&live);
    assert_eq!(current.end.path, vec![6]);

    // Strictly inside: the range grows.
    insert_at(&mut model, root, 5, "xy");
    let current = model.live_range(&live);
    assert_eq!(current.start.path, vec![4]);
    assert_eq!(current.end.path, vec![8]);
}

#[test]
fn live_position_follows_content_across_split_and_merge() {
    let mut model = Model::new();
    let root = model.create_root("main");
    model.change(|w| {
        let paragraph = w.create_element("paragraph", Attributes::new());
        let text = w.create_text("foobar", Attributes::new());
        w.append_child(paragraph, text).unwrap();
        w.insert_node(paragraph, Position::new(root, vec![0])).unwrap();
    });
    // After "foob".
    let live = model.track_position(Position::new(root, vec![0, 4])).unwrap();

    model.change(|w| {
        let split_at = Position::new(root, vec![0, 3]);
        w.split(&split_at).unwrap();
    });
    assert_eq!(model.live_position(&live).path, vec![1, 1]);

    model.change(|w| {
        let boundary = Position::new(root, vec![1]);
        w.merge(&boundary).unwrap();
    });
    assert_eq!(model.live_position(&live).path, vec![0, 4]);
}

#[test]
fn marker_survives_structural_edits() {
    let (mut model, root) = abcdef();
    model.change(|w| {
        let range = Range::new(Position::new(root, vec![2]), Position::new(root, vec![4]));
        w.add_marker("highlight", range).unwrap();
    });
    insert_at(&mut model, root, 0, "xy");
    let range = model.document().marker_range("highlight").unwrap();
    assert_eq!(range.start.path, vec![4]);
    assert_eq!(range.end.path, vec![6]);

    model.change(|w| {
        w.remove_marker("highlight").unwrap();
    });
    assert!(model.document().marker_range("highlight").is_none());
}
