use super::*;

fn insert(tree: &mut RenderTree, backend: &mut MemoryBackend, tag: HostTag) -> RenderId {
    tree.insert(backend, tag, Props::new(), NodeId::default())
}

fn attaches(backend: &MemoryBackend) -> usize {
    backend.count(|op| matches!(op, BackendOp::Attach { .. }))
}

#[test]
fn sync_moves_with_fewest_attaches() {
    let mut backend = MemoryBackend::new();
    let mut tree = RenderTree::new();
    let a = insert(&mut tree, &mut backend, "a");
    let b = insert(&mut tree, &mut backend, "b");
    let c = insert(&mut tree, &mut backend, "c");

    tree.sync_children(&mut backend, None, &[a, b, c]);
    assert_eq!(attaches(&backend), 3);
    assert_eq!(tree.roots(), &[a, b, c]);

    tree.sync_children(&mut backend, None, &[a, b, c]);
    assert_eq!(attaches(&backend), 3);

    tree.sync_children(&mut backend, None, &[c, a, b]);
    assert_eq!(attaches(&backend), 4);
    assert_eq!(backend.attached_children(None), &[c, a, b]);
    assert_eq!(tree.roots(), &[c, a, b]);
}

#[test]
fn removing_a_subtree_detaches_only_its_top() {
    let mut backend = MemoryBackend::new();
    let mut tree = RenderTree::new();
    let parent = insert(&mut tree, &mut backend, "column");
    let first = insert(&mut tree, &mut backend, "text");
    let second = insert(&mut tree, &mut backend, "text");
    tree.sync_children(&mut backend, Some(parent), &[first, second]);
    tree.sync_children(&mut backend, None, &[parent]);
    backend.take_ops();

    tree.remove_subtree(&mut backend, parent);

    assert_eq!(backend.ops(), &[BackendOp::Detach { node: parent }]);
    assert!(tree.is_empty());
    assert!(tree.roots().is_empty());
    assert_eq!(backend.dump_tree(), "");
}

#[test]
fn removing_an_unattached_parent_detaches_its_attached_children() {
    let mut backend = MemoryBackend::new();
    let mut tree = RenderTree::new();
    let parent = insert(&mut tree, &mut backend, "column");
    let child = insert(&mut tree, &mut backend, "text");
    tree.sync_children(&mut backend, Some(parent), &[child]);
    backend.take_ops();

    tree.remove_subtree(&mut backend, parent);

    assert_eq!(backend.ops(), &[BackendOp::Detach { node: child }]);
    assert!(backend.attached_children(Some(parent)).is_empty());
}

#[test]
fn update_reports_whether_props_changed() {
    let mut backend = MemoryBackend::new();
    let mut tree = RenderTree::new();
    let id = insert(&mut tree, &mut backend, "text");

    assert!(!tree.update(id, &Props::new()));
    let next = Props::new().with("value", "hello").with("bold", true);
    assert!(tree.update(id, &next));
    assert!(!tree.update(id, &next));

    let node = tree.get(id).expect("render node");
    let object = node
        .downcast_object::<RecordingObject>()
        .expect("recording object");
    assert!(object.mounted);
    assert_eq!(object.updates, 1);
    assert_eq!(node.props().text("value"), Some("hello"));
}

#[test]
fn changed_names_cover_both_sides() {
    let before = Props::new().with("value", "a").with("color", PropValue::Color(0xff0000ff));
    let after = Props::new().with("value", "b").with("size", 12);

    assert_eq!(before.changed_names(&after), vec!["value", "size", "color"]);
    assert!(before.changed_names(&before).is_empty());
}

#[test]
fn dump_renders_nested_structure() {
    let mut backend = MemoryBackend::new();
    let mut tree = RenderTree::new();
    let parent = insert(&mut tree, &mut backend, "column");
    let child = tree.insert(
        &mut backend,
        "text",
        Props::new().with("value", "hi"),
        NodeId::default(),
    );
    tree.sync_children(&mut backend, Some(parent), &[child]);
    tree.sync_children(&mut backend, None, &[parent]);

    assert_eq!(tree.dump(), "<column> \n  <text> value=\"hi\"\n");
    assert_eq!(tree.preorder(), vec![parent, child]);
    assert_eq!(tree.get(child).and_then(|node| node.parent()), Some(parent));
}
