//! Replica-side message handling and the in-memory transport.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::durability::codec::ByteReader;
use crate::durability::recovery::{apply_transaction, collect_committed_transactions};
use crate::durability::snapshot::load_snapshot_bytes;
use crate::durability::wal::decode_record;
use crate::error::StorageResult;
use crate::storage::Storage;

use super::wire::{ReplicaRequest, ReplicaResponse};
use super::{Epoch, ReplicaTransport, ReplicationRole};

/// Applies one replication request to a replica storage. A deployment wraps
/// this in whatever server plumbing it uses; the in-memory transport calls
/// it directly.
pub fn handle_request(storage: &Arc<Storage>, request: ReplicaRequest) -> ReplicaResponse {
    if storage.replication_role() != ReplicationRole::Replica {
        return ReplicaResponse::Error("storage is not running as a replica".into());
    }
    match request {
        ReplicaRequest::Hello { epoch: _ } => ReplicaResponse::Hello {
            epoch: storage.replication_epoch().0,
            last_durable_tx: storage.replication.last_durable_tx.load(Ordering::SeqCst),
        },
        ReplicaRequest::AppendTransaction {
            epoch,
            tx_id,
            records,
        } => {
            if epoch != storage.replication_epoch().0 {
                return ReplicaResponse::Error("epoch mismatch".into());
            }
            match apply_record_stream(storage, &records) {
                Ok(_) => {
                    storage
                        .replication
                        .last_durable_tx
                        .fetch_max(tx_id, Ordering::SeqCst);
                    storage.engine.ensure_next_id_greater(tx_id);
                    ReplicaResponse::Ok
                }
                Err(err) => {
                    warn!(tx_id, error = %err, "replica failed to apply transaction");
                    ReplicaResponse::Error(err.to_string())
                }
            }
        }
        ReplicaRequest::WalCatchUp { epoch, records } => {
            if epoch != storage.replication_epoch().0 {
                return ReplicaResponse::Error("epoch mismatch".into());
            }
            match apply_record_stream(storage, &records) {
                Ok(last) => {
                    if let Some(last) = last {
                        storage
                            .replication
                            .last_durable_tx
                            .fetch_max(last, Ordering::SeqCst);
                        storage.engine.ensure_next_id_greater(last);
                    }
                    ReplicaResponse::Ok
                }
                Err(err) => ReplicaResponse::Error(err.to_string()),
            }
        }
        ReplicaRequest::SnapshotCatchUp { epoch, bytes } => {
            storage.wipe();
            match load_snapshot_bytes(storage, &bytes) {
                Ok(info) => {
                    let accessor = storage.access();
                    let setup = || -> StorageResult<()> {
                        for label in &info.label_indexes {
                            let label = accessor.label_id(label);
                            accessor.create_label_index(label)?;
                        }
                        for (label, property) in &info.label_property_indexes {
                            let label = accessor.label_id(label);
                            let property = accessor.property_id(property);
                            accessor.create_label_property_index(label, property)?;
                        }
                        for (label, property) in &info.existence_constraints {
                            let label = accessor.label_id(label);
                            let property = accessor.property_id(property);
                            accessor.create_existence_constraint(label, property)?;
                        }
                        for (label, property) in &info.uniqueness_constraints {
                            let label = accessor.label_id(label);
                            let property = accessor.property_id(property);
                            accessor.create_uniqueness_constraint(label, property)?;
                        }
                        Ok(())
                    };
                    if let Err(err) = setup() {
                        return ReplicaResponse::Error(err.to_string());
                    }
                    if let Err(err) = accessor.commit() {
                        return ReplicaResponse::Error(err.to_string());
                    }
                    storage.replication.adopt_epoch(Epoch(epoch));
                    storage
                        .replication
                        .last_durable_tx
                        .store(info.tx_id, Ordering::SeqCst);
                    let frontier = info
                        .active
                        .iter()
                        .copied()
                        .fold(info.tx_id, u64::max);
                    storage.engine.ensure_next_id_greater(frontier);
                    info!(tx_id = info.tx_id, "replica recovered from snapshot");
                    ReplicaResponse::Ok
                }
                Err(err) => {
                    storage.wipe();
                    ReplicaResponse::Error(err.to_string())
                }
            }
        }
    }
}

/// Decodes a WAL-encoded record stream and applies every committed
/// transaction in commit order. Returns the highest applied tx id.
fn apply_record_stream(storage: &Arc<Storage>, bytes: &[u8]) -> StorageResult<Option<u64>> {
    let mut reader = ByteReader::new(bytes);
    let mut records = Vec::new();
    while let Some(record) = decode_record(&mut reader, storage)? {
        records.push(record);
    }
    let mut last = None;
    for (tx_id, deltas) in collect_committed_transactions(records) {
        apply_transaction(storage, tx_id, &deltas)?;
        last = Some(tx_id.0);
    }
    Ok(last)
}

/// Transport that applies requests directly to an in-process replica
/// storage. Tests and embedded deployments use it; a networked deployment
/// provides its own `ReplicaTransport`.
pub struct InMemoryTransport {
    replica: Arc<Storage>,
}

impl InMemoryTransport {
    pub fn new(replica: Arc<Storage>) -> Self {
        Self { replica }
    }
}

impl ReplicaTransport for InMemoryTransport {
    fn request(
        &mut self,
        request: ReplicaRequest,
        _timeout: Option<Duration>,
    ) -> StorageResult<ReplicaResponse> {
        Ok(handle_request(&self.replica, request))
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport").finish()
    }
}
