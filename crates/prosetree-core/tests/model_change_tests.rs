use std::sync::{Arc, Mutex};

use prosetree_core::{Attributes, Model, NodeId, Position};

fn empty_root() -> (Model, NodeId) {
    let mut model = Model::new();
    let root = model.create_root("main");
    (model, root)
}

#[test]
fn change_event_fires_once_per_outer_block() {
    let (mut model, root) = empty_root();
    let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    model.on_change(move |batch| {
        sink.lock().unwrap().push(batch.operations.len());
    });

    model.change(|w| {
        w.insert_text("a", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
        w.insert_text("b", Attributes::new(), Position::new(root, vec![1]))
            .unwrap();
        w.insert_text("c", Attributes::new(), Position::new(root, vec![2]))
            .unwrap();
    });

    assert_eq!(batches.lock().unwrap().as_slice(), &[3]);
}

#[test]
fn enqueued_work_joins_the_current_batch() {
    let (mut model, root) = empty_root();
    let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    model.on_change(move |batch| {
        sink.lock().unwrap().push(batch.operations.len());
    });

    model.change(|w| {
        w.insert_text("a", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
        w.enqueue_change(move |w| {
            w.insert_text("b", Attributes::new(), Position::new(root, vec![1]))
                .unwrap();
        });
        // Nothing from the enqueued job is visible yet.
        assert_eq!(w.document().max_offset(root), 1);
    });

    // One event, both operations.
    assert_eq!(batches.lock().unwrap().as_slice(), &[2]);
    assert_eq!(model.document().max_offset(root), 2);
}

#[test]
fn enqueued_jobs_can_enqueue_further_work() {
    let (mut model, root) = empty_root();
    model.change(|w| {
        w.enqueue_change(move |w| {
            w.insert_text("a", Attributes::new(), Position::new(root, vec![0]))
                .unwrap();
            w.enqueue_change(move |w| {
                w.insert_text("b", Attributes::new(), Position::new(root, vec![1]))
                    .unwrap();
            });
        });
    });
    assert_eq!(model.document().max_offset(root), 2);
}

#[test]
fn enqueue_between_blocks_runs_as_its_own_block() {
    let (mut model, root) = empty_root();
    let batches: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    model.on_change(move |batch| {
        sink.lock().unwrap().push(batch.operations.len());
    });
    model.enqueue_change(move |w| {
        w.insert_text("a", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
    });
    assert_eq!(batches.lock().unwrap().as_slice(), &[1]);
}

#[test]
fn empty_change_block_fires_no_event() {
    let (mut model, _root) = empty_root();
    let fired = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&fired);
    model.on_change(move |_| {
        *sink.lock().unwrap() += 1;
    });
    model.change(|_| {});
    assert_eq!(*fired.lock().unwrap(), 0);
}

#[test]
fn operation_listeners_see_each_operation_in_order() {
    let (mut model, root) = empty_root();
    let names: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    model.change(|w| {
        w.on_operation(move |op| {
            sink.lock().unwrap().push(op.kind.name());
        });
        w.insert_text("abc", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
        let range = prosetree_core::Range::new(
            Position::new(root, vec![0]),
            Position::new(root, vec![1]),
        );
        w.remove(&range).unwrap();
    });
    assert_eq!(names.lock().unwrap().as_slice(), &["insert", "remove"]);
}

#[test]
fn unregistered_listener_stops_firing() {
    let (mut model, root) = empty_root();
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    let id = model.change(|w| {
        w.on_operation(move |_| {
            *sink.lock().unwrap() += 1;
        })
    });
    model.change(|w| {
        w.insert_text("a", Attributes::new(), Position::new(root, vec![0]))
            .unwrap();
        assert!(w.off_operation(id));
        w.insert_text("b", Attributes::new(), Position::new(root, vec![1]))
            .unwrap();
    });
    assert_eq!(*count.lock().unwrap(), 1);
}
