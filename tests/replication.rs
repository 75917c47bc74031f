use std::sync::Arc;
use std::time::Duration;

use quiver::replication::{ReplicaRequest, ReplicaResponse};
use quiver::{
    Config, InMemoryTransport, PropertyValue, ReplicaState, ReplicaTransport, ReplicationMode,
    ReplicationRole, Storage, StorageResult, View,
};

fn open() -> Arc<Storage> {
    Storage::open(Config::in_memory()).expect("in-memory open cannot fail")
}

fn replica_pair() -> (Arc<Storage>, Arc<Storage>) {
    let main = open();
    let replica = open();
    replica.become_replica();
    (main, replica)
}

#[test]
fn sync_replica_observes_committed_writes() {
    let (main, replica) = replica_pair();
    main.register_replica(
        "replica-1",
        ReplicationMode::Sync,
        Box::new(InMemoryTransport::new(Arc::clone(&replica))),
        Some(Duration::from_secs(5)),
    )
    .unwrap();
    assert_eq!(main.replica_state("replica-1"), Some(ReplicaState::Ready));

    let accessor = main.access();
    let vertex = accessor.create_vertex().unwrap();
    let label = accessor.label_id("L");
    let prop = accessor.property_id("p");
    vertex.add_label(label).unwrap();
    vertex.set_property(prop, PropertyValue::from("v")).unwrap();
    let gid = vertex.gid();
    accessor.commit().unwrap();

    // SYNC commit waited for the ack, so the replica already holds it.
    let reader = replica.access();
    let vertex = reader.find_vertex(gid, View::Old).expect("replicated vertex");
    let label = reader.find_label("L").expect("label replicated");
    let prop = reader.find_property("p").expect("property replicated");
    assert!(vertex.has_label(label, View::Old).unwrap());
    assert_eq!(
        vertex.property(prop, View::Old).unwrap(),
        PropertyValue::from("v")
    );
}

#[test]
fn registration_ships_existing_state_via_snapshot() {
    let (main, replica) = replica_pair();
    let accessor = main.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    accessor.commit().unwrap();

    // The replica has a different epoch and no history; registration must
    // recover it from a snapshot image.
    main.register_replica(
        "replica-1",
        ReplicationMode::Sync,
        Box::new(InMemoryTransport::new(Arc::clone(&replica))),
        None,
    )
    .unwrap();
    assert_eq!(replica.replication_epoch(), main.replication_epoch());
    let reader = replica.access();
    assert!(reader.find_vertex(gid, View::Old).is_some());
}

#[test]
fn async_replica_catches_up_in_background() {
    let (main, replica) = replica_pair();
    main.register_replica(
        "replica-1",
        ReplicationMode::Async,
        Box::new(InMemoryTransport::new(Arc::clone(&replica))),
        None,
    )
    .unwrap();

    let accessor = main.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    accessor.commit().unwrap();

    // ASYNC does not wait at commit; poll until the worker delivers.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        {
            let reader = replica.access();
            if reader.find_vertex(gid, View::Old).is_some() {
                break;
            }
        }
        assert!(std::time::Instant::now() < deadline, "replication timed out");
        std::thread::sleep(Duration::from_millis(10));
    }
}

struct FailingTransport;

impl ReplicaTransport for FailingTransport {
    fn request(
        &mut self,
        request: ReplicaRequest,
        _timeout: Option<Duration>,
    ) -> StorageResult<ReplicaResponse> {
        // Handshake succeeds so registration completes; streaming fails.
        match request {
            ReplicaRequest::Hello { epoch } => Ok(ReplicaResponse::Hello {
                epoch,
                last_durable_tx: 0,
            }),
            _ => Err(quiver::StorageError::ReplicaOutOfSync(
                "connection lost".into(),
            )),
        }
    }
}

#[test]
fn failed_sync_replica_moves_to_recovery_and_commit_stands() {
    let main = open();
    main.register_replica(
        "flaky",
        ReplicationMode::Sync,
        Box::new(FailingTransport),
        Some(Duration::from_millis(100)),
    )
    .unwrap();

    let accessor = main.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    accessor.commit().unwrap();

    assert_eq!(main.replica_state("flaky"), Some(ReplicaState::Recovery));
    let reader = main.access();
    assert!(reader.find_vertex(gid, View::Old).is_some());
}

#[test]
fn unregistered_replica_stops_receiving() {
    let (main, replica) = replica_pair();
    main.register_replica(
        "replica-1",
        ReplicationMode::Sync,
        Box::new(InMemoryTransport::new(Arc::clone(&replica))),
        None,
    )
    .unwrap();
    assert!(main.unregister_replica("replica-1"));
    assert!(!main.unregister_replica("replica-1"));

    let accessor = main.access();
    let vertex = accessor.create_vertex().unwrap();
    let gid = vertex.gid();
    accessor.commit().unwrap();

    let reader = replica.access();
    assert!(reader.find_vertex(gid, View::Old).is_none());
}

#[test]
fn promotion_issues_a_fresh_epoch() {
    let storage = open();
    storage.become_replica();
    assert_eq!(storage.replication_role(), ReplicationRole::Replica);
    let old_epoch = storage.replication_epoch();
    storage.promote_to_main();
    assert_eq!(storage.replication_role(), ReplicationRole::Main);
    assert_ne!(storage.replication_epoch(), old_epoch);
}

#[test]
fn non_replica_rejects_replication_requests() {
    let storage = open();
    let response = quiver::replication::handle_request(
        &storage,
        ReplicaRequest::Hello { epoch: 1 },
    );
    assert!(matches!(response, ReplicaResponse::Error(_)));
}
