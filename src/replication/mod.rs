//! Primary-to-replica replication: the main streams every committed
//! transaction's delta sequence, in WAL order, to each registered replica.

pub mod replica;
pub mod wire;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::durability::{recovery, snapshot, wal};
use crate::error::{StorageError, StorageResult};
use crate::storage::delta::Delta;
use crate::storage::Storage;
use crate::types::TxId;

pub use replica::{handle_request, InMemoryTransport};
pub use wire::{ReplicaRequest, ReplicaResponse};

/// Identifier of a main's write history. A fresh epoch is issued on
/// promotion, so replicas with divergent history are detected at
/// registration.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Epoch(pub u64);

impl Epoch {
    pub(crate) fn issue() -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(1);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(1);
        // The sequence disambiguates issues landing on the same clock tick.
        Epoch((nanos ^ (SEQUENCE.fetch_add(1, Ordering::Relaxed) << 48)) | 1)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReplicationRole {
    Main,
    Replica,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReplicationMode {
    /// Commit waits for the replica's durable acknowledgement.
    Sync,
    /// Commit enqueues the stream and does not wait.
    Async,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReplicaState {
    Ready,
    Replicating,
    Recovery,
}

/// Moves replication messages to one replica. Implementations decide the
/// actual wire; the engine ships an in-process transport.
pub trait ReplicaTransport: Send {
    fn request(
        &mut self,
        request: ReplicaRequest,
        timeout: Option<Duration>,
    ) -> StorageResult<ReplicaResponse>;
}

enum ReplicaLink {
    Sync(Box<dyn ReplicaTransport>),
    Async(mpsc::Sender<ReplicaRequest>),
}

struct ReplicaHandle {
    name: String,
    mode: ReplicationMode,
    timeout: Option<Duration>,
    state: Arc<Mutex<ReplicaState>>,
    link: ReplicaLink,
}

/// Per-storage replication bookkeeping.
pub struct ReplicationState {
    role: RwLock<ReplicationRole>,
    epoch: RwLock<Epoch>,
    replicas: Mutex<Vec<ReplicaHandle>>,
    /// On a main: the last committed transaction id. On a replica: the last
    /// main transaction id applied durably.
    pub(crate) last_durable_tx: AtomicU64,
}

impl ReplicationState {
    pub(crate) fn new() -> Self {
        Self {
            role: RwLock::new(ReplicationRole::Main),
            epoch: RwLock::new(Epoch::issue()),
            replicas: Mutex::new(Vec::new()),
            last_durable_tx: AtomicU64::new(0),
        }
    }

    pub(crate) fn adopt_epoch(&self, epoch: Epoch) {
        *self.epoch.write() = epoch;
    }
}

impl std::fmt::Debug for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationState")
            .field("role", &*self.role.read())
            .field("replicas", &self.replicas.lock().len())
            .finish()
    }
}

impl Storage {
    pub fn replication_role(&self) -> ReplicationRole {
        *self.replication.role.read()
    }

    pub fn replication_epoch(&self) -> Epoch {
        *self.replication.epoch.read()
    }

    /// Switches this storage into the replica role. Registered replicas (if
    /// it was a main) are dropped.
    pub fn become_replica(&self) {
        *self.replication.role.write() = ReplicationRole::Replica;
        self.replication.replicas.lock().clear();
        info!("assumed the replica role");
    }

    /// Promotes a replica to main under a freshly issued epoch, so replicas
    /// of the old main can no longer catch up transactionally.
    pub fn promote_to_main(&self) {
        *self.replication.role.write() = ReplicationRole::Main;
        let epoch = Epoch::issue();
        self.replication.adopt_epoch(epoch);
        info!(epoch = epoch.0, "promoted to main");
    }

    /// Registers a replica on this main and brings it up to date: a replica
    /// on the same epoch receives missing WAL history, anything else a full
    /// snapshot. `timeout` bounds every synchronous acknowledgement wait.
    pub fn register_replica(
        self: &Arc<Self>,
        name: impl Into<String>,
        mode: ReplicationMode,
        mut transport: Box<dyn ReplicaTransport>,
        timeout: Option<Duration>,
    ) -> StorageResult<()> {
        let name = name.into();
        if self.replication_role() != ReplicationRole::Main {
            return Err(StorageError::ReplicaOutOfSync(
                "only a main can register replicas".into(),
            ));
        }
        let epoch = self.replication_epoch();
        let response = transport.request(ReplicaRequest::Hello { epoch: epoch.0 }, timeout)?;
        let (replica_epoch, replica_last) = match response {
            ReplicaResponse::Hello {
                epoch,
                last_durable_tx,
            } => (epoch, last_durable_tx),
            ReplicaResponse::Error(message) => {
                return Err(StorageError::ReplicaOutOfSync(message));
            }
            ReplicaResponse::Ok => {
                return Err(StorageError::ReplicaOutOfSync(
                    "unexpected handshake response".into(),
                ));
            }
        };
        let my_last = self.replication.last_durable_tx.load(Ordering::SeqCst);
        if replica_epoch != epoch.0 || replica_last > my_last {
            info!(replica = %name, "replica history diverged, recovering from snapshot");
            let (bytes, _) = snapshot::snapshot_bytes(self)?;
            expect_ok(transport.request(
                ReplicaRequest::SnapshotCatchUp {
                    epoch: epoch.0,
                    bytes,
                },
                timeout,
            )?)?;
        } else if replica_last < my_last {
            match self.collect_wal_since(replica_last)? {
                Some(records) => {
                    info!(replica = %name, after = replica_last, "shipping WAL history");
                    expect_ok(transport.request(
                        ReplicaRequest::WalCatchUp {
                            epoch: epoch.0,
                            records,
                        },
                        timeout,
                    )?)?;
                }
                None => {
                    info!(replica = %name, "WAL history unavailable, recovering from snapshot");
                    let (bytes, _) = snapshot::snapshot_bytes(self)?;
                    expect_ok(transport.request(
                        ReplicaRequest::SnapshotCatchUp {
                            epoch: epoch.0,
                            bytes,
                        },
                        timeout,
                    )?)?;
                }
            }
        }
        let state = Arc::new(Mutex::new(ReplicaState::Ready));
        let link = match mode {
            ReplicationMode::Sync => ReplicaLink::Sync(transport),
            ReplicationMode::Async => {
                ReplicaLink::Async(spawn_async_worker(name.clone(), transport, Arc::clone(&state), timeout))
            }
        };
        let mut replicas = self.replication.replicas.lock();
        replicas.retain(|existing| existing.name != name);
        replicas.push(ReplicaHandle {
            name: name.clone(),
            mode,
            timeout,
            state,
            link,
        });
        info!(replica = %name, ?mode, "replica registered");
        Ok(())
    }

    /// Drops a registration; the main stops streaming to that replica.
    pub fn unregister_replica(&self, name: &str) -> bool {
        let mut replicas = self.replication.replicas.lock();
        let before = replicas.len();
        replicas.retain(|replica| replica.name != name);
        before != replicas.len()
    }

    pub fn replica_state(&self, name: &str) -> Option<ReplicaState> {
        let replicas = self.replication.replicas.lock();
        replicas
            .iter()
            .find(|replica| replica.name == name)
            .map(|replica| *replica.state.lock())
    }

    /// Registered replicas with their mode and current state.
    pub fn replicas(&self) -> Vec<(String, ReplicationMode, ReplicaState)> {
        let replicas = self.replication.replicas.lock();
        replicas
            .iter()
            .map(|replica| (replica.name.clone(), replica.mode, *replica.state.lock()))
            .collect()
    }

    /// Committed transactions newer than `after`, re-read from this main's
    /// WAL files. `None` when the log cannot prove it covers the gap.
    fn collect_wal_since(&self, after: u64) -> StorageResult<Option<Vec<u8>>> {
        if !self.config.durability {
            return Ok(None);
        }
        let dir = crate::durability::wal_dir(&self.config.data_dir);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut files: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("wal_"))
            })
            .collect();
        files.sort();
        let mut records = Vec::new();
        for path in &files {
            records.extend(wal::read_wal_file(path, self)?);
        }
        let transactions = recovery::collect_committed_transactions(records);
        let missing: Vec<_> = transactions
            .into_iter()
            .filter(|(tx_id, _)| tx_id.0 > after)
            .collect();
        let mut out = Vec::new();
        for (tx_id, deltas) in &missing {
            out.extend(wal::encode_transaction(self, *tx_id, deltas));
        }
        Ok(Some(out))
    }
}

fn expect_ok(response: ReplicaResponse) -> StorageResult<()> {
    match response {
        ReplicaResponse::Ok => Ok(()),
        ReplicaResponse::Error(message) => Err(StorageError::ReplicaOutOfSync(message)),
        ReplicaResponse::Hello { .. } => Err(StorageError::ReplicaOutOfSync(
            "unexpected handshake response".into(),
        )),
    }
}

fn spawn_async_worker(
    name: String,
    mut transport: Box<dyn ReplicaTransport>,
    state: Arc<Mutex<ReplicaState>>,
    timeout: Option<Duration>,
) -> mpsc::Sender<ReplicaRequest> {
    let (sender, receiver) = mpsc::channel::<ReplicaRequest>();
    let builder = std::thread::Builder::new().name(format!("quiver-repl-{name}"));
    let worker_state = state.clone();
    let spawned = builder.spawn(move || {
        let state = worker_state;
        while let Ok(request) = receiver.recv() {
            *state.lock() = ReplicaState::Replicating;
            match transport.request(request, timeout) {
                Ok(ReplicaResponse::Ok) => {
                    *state.lock() = ReplicaState::Ready;
                }
                Ok(ReplicaResponse::Error(message)) => {
                    warn!(replica = %name, error = %message, "async replica rejected a transaction");
                    *state.lock() = ReplicaState::Recovery;
                    break;
                }
                Ok(ReplicaResponse::Hello { .. }) => {
                    *state.lock() = ReplicaState::Recovery;
                    break;
                }
                Err(err) => {
                    warn!(replica = %name, error = %err, "async replica unreachable");
                    *state.lock() = ReplicaState::Recovery;
                    break;
                }
            }
        }
    });
    if spawned.is_err() {
        *state.lock() = ReplicaState::Recovery;
    }
    sender
}

/// Streams one committed transaction to every registered replica. Runs
/// under the commit lock, so replicas observe commits in WAL order. A SYNC
/// replica that fails or times out moves to `Recovery`; the commit itself
/// stands, matching the registered timeout policy.
pub(crate) fn stream_commit(storage: &Storage, tx_id: TxId, deltas: &[Delta]) {
    if storage.replication_role() != ReplicationRole::Main {
        return;
    }
    let epoch = storage.replication_epoch().0;
    let mut replicas = storage.replication.replicas.lock();
    if replicas.is_empty() {
        return;
    }
    let records = wal::encode_transaction(storage, tx_id, deltas);
    for handle in replicas.iter_mut() {
        if *handle.state.lock() == ReplicaState::Recovery {
            continue;
        }
        let request = ReplicaRequest::AppendTransaction {
            epoch,
            tx_id: tx_id.0,
            records: records.clone(),
        };
        match &mut handle.link {
            ReplicaLink::Sync(transport) => {
                *handle.state.lock() = ReplicaState::Replicating;
                match transport.request(request, handle.timeout) {
                    Ok(ReplicaResponse::Ok) => {
                        *handle.state.lock() = ReplicaState::Ready;
                    }
                    Ok(other) => {
                        warn!(replica = %handle.name, response = ?other, "sync replica failed, moving to recovery");
                        *handle.state.lock() = ReplicaState::Recovery;
                    }
                    Err(err) => {
                        warn!(replica = %handle.name, error = %err, "sync replica unreachable, moving to recovery");
                        *handle.state.lock() = ReplicaState::Recovery;
                    }
                }
            }
            ReplicaLink::Async(sender) => {
                if sender.send(request).is_err() {
                    warn!(replica = %handle.name, "async replica worker gone, moving to recovery");
                    *handle.state.lock() = ReplicaState::Recovery;
                }
            }
        }
    }
}
