use prosetree_core::{
    insert_content, Attributes, Model, NodeId, Position, SchemaItemDefinition, Selection,
};

/// `<paragraph>Hello World</paragraph>` with "paragraph" registered.
fn hello_world() -> (Model, NodeId) {
    let mut model = Model::new();
    model
        .schema_mut()
        .register("paragraph", SchemaItemDefinition::new().inherit_all_from("$block"))
        .unwrap();
    let root = model.create_root("main");
    model.change(|w| {
        let paragraph = w.create_element("paragraph", Attributes::new());
        let text = w.create_text("Hello World", Attributes::new());
        w.append_child(paragraph, text).unwrap();
        w.insert_node(paragraph, Position::new(root, vec![0])).unwrap();
    });
    (model, root)
}

fn paragraph_text(model: &Model, root: NodeId, index: usize) -> String {
    let doc = model.document();
    let paragraph = doc.children_of(root)[index];
    doc.children_of(paragraph)
        .iter()
        .filter_map(|&child| doc.text_data(child))
        .collect()
}

#[test]
fn pasted_paragraph_merges_into_both_halves() {
    let (mut model, root) = hello_world();
    let result = model.change(|w| {
        let fragment = w.create_fragment();
        let paragraph = w.create_element("paragraph", Attributes::new());
        let text = w.create_text("X", Attributes::new());
        w.append_child(paragraph, text).unwrap();
        w.append_child(fragment, paragraph).unwrap();
        let caret = Selection::collapsed_at(Position::new(root, vec![0, 5]));
        insert_content(w, fragment, &caret).unwrap()
    });

    assert_eq!(model.document().child_count(root), 1);
    assert_eq!(paragraph_text(&model, root, 0), "HelloX World");

    let caret = &result.selection.ranges()[0];
    assert!(caret.is_collapsed());
    assert_eq!(caret.start.path, vec![0, 6]);
    assert_eq!(result.range.start.path, vec![0, 5]);
    assert_eq!(result.range.end.path, vec![0, 6]);
}

#[test]
fn bare_text_at_the_root_is_auto_paragraphed() {
    let mut model = Model::new();
    model
        .schema_mut()
        .register("paragraph", SchemaItemDefinition::new().inherit_all_from("$block"))
        .unwrap();
    let root = model.create_root("main");
    let result = model.change(|w| {
        let text = w.create_text("X", Attributes::new());
        let caret = Selection::collapsed_at(Position::new(root, vec![0]));
        insert_content(w, text, &caret).unwrap()
    });

    let doc = model.document();
    assert_eq!(doc.child_count(root), 1);
    let wrapper = doc.children_of(root)[0];
    assert_eq!(doc.name_of(wrapper), Some("paragraph"));
    assert_eq!(paragraph_text(&model, root, 0), "X");

    let caret = &result.selection.ranges()[0];
    assert!(caret.is_collapsed());
    assert_eq!(caret.start.path, vec![0, 1]);
}

#[test]
fn disallowed_container_is_unwrapped() {
    let (mut model, root) = hello_world();
    // tableCell's only allowed parent never gets registered, so the cell
    // itself fits nowhere and only its content survives.
    model
        .schema_mut()
        .register("tableCell", SchemaItemDefinition::new().allow_in(["tableRow"]))
        .unwrap();
    let result = model.change(|w| {
        let cell = w.create_element("tableCell", Attributes::new());
        let text = w.create_text("X", Attributes::new());
        w.append_child(cell, text).unwrap();
        let caret = Selection::collapsed_at(Position::new(root, vec![0, 5]));
        insert_content(w, cell, &caret).unwrap()
    });

    assert_eq!(model.document().child_count(root), 1);
    assert_eq!(paragraph_text(&model, root, 0), "HelloX World");
    assert_eq!(result.selection.ranges()[0].start.path, vec![0, 6]);
}

#[test]
fn inserted_object_becomes_the_selection() {
    let (mut model, root) = hello_world();
    model
        .schema_mut()
        .register(
            "imageBlock",
            SchemaItemDefinition::new().object().allow_where(["$block"]),
        )
        .unwrap();
    let result = model.change(|w| {
        let image = w.create_element("imageBlock", Attributes::new());
        let caret = Selection::collapsed_at(Position::new(root, vec![0, 5]));
        insert_content(w, image, &caret).unwrap()
    });

    let doc = model.document();
    assert_eq!(doc.child_count(root), 3);
    assert_eq!(doc.name_of(doc.children_of(root)[1]), Some("imageBlock"));
    assert_eq!(paragraph_text(&model, root, 0), "Hello");
    assert_eq!(paragraph_text(&model, root, 2), " World");

    // The object itself gets selected, not a caret.
    let selected = &result.selection.ranges()[0];
    assert_eq!(selected.start.path, vec![1]);
    assert_eq!(selected.end.path, vec![2]);
}

#[test]
fn content_with_no_valid_home_is_dropped_gracefully() {
    // No paragraph registered: text fits nowhere, auto-paragraphing is
    // impossible, and the insertion degrades to a logged no-op.
    let mut model = Model::new();
    let root = model.create_root("main");
    let result = model.change(|w| {
        let text = w.create_text("X", Attributes::new());
        let caret = Selection::collapsed_at(Position::new(root, vec![0]));
        insert_content(w, text, &caret).unwrap()
    });

    assert_eq!(model.document().child_count(root), 0);
    let caret = &result.selection.ranges()[0];
    assert!(caret.is_collapsed());
    assert_eq!(caret.start.path, vec![0]);
    assert!(result.range.is_collapsed());
}
