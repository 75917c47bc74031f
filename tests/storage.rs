use std::ops::Bound;

use quiver::{Config, PropertyValue, StorageError, View};

fn open() -> std::sync::Arc<quiver::Storage> {
    quiver::Storage::open(Config::in_memory()).expect("in-memory open cannot fail")
}

#[test]
fn committed_writes_visible_to_later_transactions() {
    let storage = open();
    let writer = storage.access();
    let vertex = writer.create_vertex().unwrap();
    let label = writer.label_id("Person");
    let name = writer.property_id("name");
    vertex.add_label(label).unwrap();
    vertex
        .set_property(name, PropertyValue::from("ada"))
        .unwrap();
    let gid = vertex.gid();

    // Concurrent reader began before the commit: nothing visible.
    let concurrent = storage.access();
    writer.commit().unwrap();
    assert!(concurrent.find_vertex(gid, View::Old).is_none());
    drop(concurrent);

    let reader = storage.access();
    let found = reader.find_vertex(gid, View::Old).expect("must be visible");
    assert!(found.has_label(label, View::Old).unwrap());
    assert_eq!(
        found.property(name, View::Old).unwrap(),
        PropertyValue::from("ada")
    );
}

#[test]
fn own_writes_need_new_view_until_advance_command() {
    let storage = open();
    let accessor = storage.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    assert!(accessor.find_vertex(gid, View::New).is_some());
    assert!(accessor.find_vertex(gid, View::Old).is_none());
    accessor.advance_command();
    assert!(accessor.find_vertex(gid, View::Old).is_some());
    accessor.abort();
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let storage = open();
    let accessor = storage.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    accessor.abort();
    let reader = storage.access();
    assert!(reader.find_vertex(gid, View::Old).is_none());
    assert_eq!(reader.vertices(View::Old).count(), 0);
}

#[test]
fn concurrent_writers_conflict() {
    let storage = open();
    let setup = storage.access();
    let vertex = setup.create_vertex().unwrap();
    let gid = vertex.gid();
    setup.commit().unwrap();

    let t1 = storage.access();
    let t2 = storage.access();
    let v1 = t1.find_vertex(gid, View::Old).unwrap();
    let v2 = t2.find_vertex(gid, View::Old).unwrap();
    let prop = t1.property_id("x");
    v1.set_property(prop, PropertyValue::Int(1)).unwrap();
    let conflict = v2.set_property(prop, PropertyValue::Int(2));
    assert!(matches!(conflict, Err(StorageError::Serialization)));
    t2.abort();
    t1.commit().unwrap();

    let reader = storage.access();
    let vertex = reader.find_vertex(gid, View::Old).unwrap();
    assert_eq!(
        vertex.property(prop, View::Old).unwrap(),
        PropertyValue::Int(1)
    );
}

#[test]
fn delete_vertex_requires_detach_when_edges_exist() {
    let storage = open();
    let accessor = storage.access();
    let a = accessor.create_vertex().unwrap();
    let b = accessor.create_vertex().unwrap();
    let t = accessor.edge_type_id("T");
    accessor.create_edge(&a, &b, t).unwrap();
    assert!(matches!(
        accessor.delete_vertex(&a),
        Err(StorageError::VertexHasEdges)
    ));
    assert!(accessor.detach_delete_vertex(&a).unwrap());
    // The edge is gone from the surviving endpoint too.
    assert_eq!(b.edges(quiver::Direction::In, None, View::New).unwrap().len(), 0);
    accessor.commit().unwrap();

    let reader = storage.access();
    assert_eq!(reader.vertices(View::Old).count(), 1);
    assert_eq!(reader.edges(View::Old).count(), 0);
}

#[test]
fn edge_membership_spans_both_endpoints() {
    let storage = open();
    let accessor = storage.access();
    let a = accessor.create_vertex().unwrap();
    let b = accessor.create_vertex().unwrap();
    let knows = accessor.edge_type_id("KNOWS");
    let edge = accessor.create_edge(&a, &b, knows).unwrap();
    accessor.commit().unwrap();

    let reader = storage.access();
    let a = reader.find_vertex(a.gid(), View::Old).unwrap();
    let b = reader.find_vertex(b.gid(), View::Old).unwrap();
    let out = a.edges(quiver::Direction::Out, None, View::Old).unwrap();
    let into = b.edges(quiver::Direction::In, None, View::Old).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(into.len(), 1);
    assert_eq!(out[0].gid(), edge.gid());
    assert_eq!(into[0].gid(), edge.gid());
}

#[test]
fn label_index_sees_own_writes() {
    let storage = open();
    let ddl = storage.access();
    let label = ddl.label_id("Tagged");
    ddl.create_label_index(label).unwrap();
    ddl.commit().unwrap();

    let accessor = storage.access();
    let vertex = accessor.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    let found: Vec<_> = accessor.vertices_by_label(label, View::New).collect();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].gid(), vertex.gid());
    accessor.commit().unwrap();
}

#[test]
fn label_property_index_range_scan() {
    let storage = open();
    let setup = storage.access();
    let label = setup.label_id("Item");
    let price = setup.property_id("price");
    setup.create_label_property_index(label, price).unwrap();
    for value in [1i64, 5, 10, 20] {
        let vertex = setup.create_vertex().unwrap();
        vertex.add_label(label).unwrap();
        vertex.set_property(price, PropertyValue::Int(value)).unwrap();
    }
    // Null and container values stay out of the index.
    let odd = setup.create_vertex().unwrap();
    odd.add_label(label).unwrap();
    odd.set_property(price, PropertyValue::List(vec![PropertyValue::Int(3)]))
        .unwrap();
    setup.commit().unwrap();

    let reader = storage.access();
    let in_range: Vec<i64> = reader
        .vertices_by_label_property_range(
            label,
            price,
            Bound::Included(PropertyValue::Int(5)),
            Bound::Excluded(PropertyValue::Int(20)),
            View::Old,
        )
        .map(|vertex| match vertex.property(price, View::Old).unwrap() {
            PropertyValue::Int(value) => value,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(in_range, vec![5, 10]);

    let exact: Vec<_> = reader
        .vertices_by_label_property_value(label, price, PropertyValue::Int(10), View::Old)
        .collect();
    assert_eq!(exact.len(), 1);
}

#[test]
fn uniqueness_constraint_rejects_duplicate_at_commit() {
    let storage = open();
    let ddl = storage.access();
    let label = ddl.label_id("User");
    let email = ddl.property_id("email");
    ddl.create_uniqueness_constraint(label, email).unwrap();
    ddl.commit().unwrap();

    let first = storage.access();
    let vertex = first.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    vertex
        .set_property(email, PropertyValue::from("a@b.c"))
        .unwrap();
    first.commit().unwrap();

    let second = storage.access();
    let vertex = second.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    vertex
        .set_property(email, PropertyValue::from("a@b.c"))
        .unwrap();
    assert!(matches!(
        second.commit(),
        Err(StorageError::ConstraintViolation(_))
    ));

    let reader = storage.access();
    assert_eq!(reader.vertices(View::Old).count(), 1);
}

#[test]
fn existence_constraint_checked_at_commit() {
    let storage = open();
    let ddl = storage.access();
    let label = ddl.label_id("Account");
    let owner = ddl.property_id("owner");
    ddl.create_existence_constraint(label, owner).unwrap();
    ddl.commit().unwrap();

    let tx = storage.access();
    let vertex = tx.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    assert!(matches!(
        tx.commit(),
        Err(StorageError::ConstraintViolation(_))
    ));

    let tx = storage.access();
    let vertex = tx.create_vertex().unwrap();
    vertex.add_label(label).unwrap();
    vertex.set_property(owner, PropertyValue::from("root")).unwrap();
    tx.commit().unwrap();
}

#[test]
fn garbage_collection_prunes_unreachable_versions() {
    let storage = open();
    let setup = storage.access();
    let vertex = setup.create_vertex().unwrap();
    let gid = vertex.gid();
    setup.commit().unwrap();

    let prop = storage.access().property_id("x");
    for value in 0..5 {
        let tx = storage.access();
        let vertex = tx.find_vertex(gid, View::Old).unwrap();
        vertex.set_property(prop, PropertyValue::Int(value)).unwrap();
        tx.commit().unwrap();
    }
    storage.collect_garbage();

    let reader = storage.access();
    let vertex = reader.find_vertex(gid, View::Old).unwrap();
    assert_eq!(
        vertex.property(prop, View::Old).unwrap(),
        PropertyValue::Int(4)
    );

    // A deleted vertex disappears entirely once no transaction can see it.
    let tx = storage.access();
    let vertex = tx.find_vertex(gid, View::Old).unwrap();
    tx.delete_vertex(&vertex).unwrap();
    tx.commit().unwrap();
    drop(reader);
    storage.collect_garbage();
    assert_eq!(storage.vertex_count_hint(), 0);
}

#[test]
fn edge_properties_can_be_disabled_at_startup() {
    let config = Config {
        edge_properties: false,
        ..Config::in_memory()
    };
    let storage = quiver::Storage::open(config).unwrap();
    let accessor = storage.access();
    let a = accessor.create_vertex().unwrap();
    let b = accessor.create_vertex().unwrap();
    let t = accessor.edge_type_id("T");
    let edge = accessor.create_edge(&a, &b, t).unwrap();
    let prop = accessor.property_id("w");
    assert!(matches!(
        edge.set_property(prop, PropertyValue::Int(1)),
        Err(StorageError::PropertiesDisabled)
    ));
    accessor.abort();
}
