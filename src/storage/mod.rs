//! Storage core: the vertex and edge containers, name interning, indexes,
//! the commit/abort protocol and garbage collection.

pub mod accessor;
pub mod delta;
pub mod edge;
pub mod index;
pub mod interner;
pub mod mvcc;
pub mod transaction;
pub mod vertex;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::durability::wal::WalWriter;
use crate::error::{StorageError, StorageResult};
use crate::replication::ReplicationState;
use crate::types::{Gid, LabelId, PropertyId};

use self::accessor::Accessor;
use self::delta::{Delta, ElementRef};
use self::edge::EdgeData;
use self::index::{Indexes, VertexChainRef};
use self::interner::NameIdMapper;
use self::mvcc::VersionChain;
use self::transaction::{Claim, Transaction, TransactionEngine, TransactionState};

pub type EdgeChainRef = Arc<VersionChain<EdgeData>>;

/// Existence and uniqueness constraints over `(label, property)` pairs.
#[derive(Debug, Default)]
pub struct Constraints {
    pub(crate) existence: RwLock<BTreeSet<(LabelId, PropertyId)>>,
    pub(crate) unique: RwLock<BTreeSet<(LabelId, PropertyId)>>,
}

/// The shared graph storage. One instance per data directory; transactions
/// run through [`Accessor`]s obtained from [`Storage::access`].
pub struct Storage {
    pub(crate) config: Config,
    pub(crate) engine: TransactionEngine,
    pub(crate) vertices: RwLock<BTreeMap<Gid, VertexChainRef>>,
    pub(crate) edges: RwLock<BTreeMap<Gid, EdgeChainRef>>,
    pub(crate) labels: NameIdMapper,
    pub(crate) edge_types: NameIdMapper,
    pub(crate) properties: NameIdMapper,
    pub(crate) indexes: Indexes,
    pub(crate) constraints: Constraints,
    pub(crate) next_vertex_id: AtomicU64,
    pub(crate) next_edge_id: AtomicU64,
    /// Serializes commits so the WAL order is the linearization order.
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) wal: Mutex<Option<WalWriter>>,
    pub(crate) replication: ReplicationState,
    /// Tells the background threads to exit; they hold only weak references
    /// so shutdown never waits on them.
    stop: Arc<AtomicBool>,
}

impl Storage {
    /// Opens a storage instance, recovering durable state when configured
    /// and spawning the background GC and snapshot threads.
    pub fn open(config: Config) -> StorageResult<Arc<Storage>> {
        if config.durability {
            std::fs::create_dir_all(crate::durability::snapshot_dir(&config.data_dir))?;
            std::fs::create_dir_all(crate::durability::wal_dir(&config.data_dir))?;
        }
        let storage = Arc::new(Storage {
            engine: TransactionEngine::new(),
            vertices: RwLock::new(BTreeMap::new()),
            edges: RwLock::new(BTreeMap::new()),
            labels: NameIdMapper::new(),
            edge_types: NameIdMapper::new(),
            properties: NameIdMapper::new(),
            indexes: Indexes::new(),
            constraints: Constraints::default(),
            next_vertex_id: AtomicU64::new(0),
            next_edge_id: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            wal: Mutex::new(None),
            replication: ReplicationState::new(),
            stop: Arc::new(AtomicBool::new(false)),
            config,
        });
        if storage.config.durability && storage.config.recover_on_startup {
            crate::durability::recovery::recover(&storage)?;
        }
        if storage.config.durability {
            let writer = WalWriter::open(
                crate::durability::wal_dir(&storage.config.data_dir),
                storage.config.wal_file_size_limit,
                storage.config.wal_file_delta_limit,
            )?;
            *storage.wal.lock() = Some(writer);
        }
        storage.spawn_background();
        Ok(storage)
    }

    /// Begins a transaction and returns the accessor scoped to it.
    pub fn access(self: &Arc<Self>) -> Accessor {
        let tx = self.engine.begin();
        debug!(tx_id = tx.id.0, "transaction started");
        Accessor::new(Arc::clone(self), tx)
    }

    pub fn vertex_count_hint(&self) -> usize {
        self.vertices.read().len()
    }

    pub fn edge_count_hint(&self) -> usize {
        self.edges.read().len()
    }

    pub(crate) fn allocate_vertex_gid(&self) -> StorageResult<Gid> {
        for _ in 0..=self.config.id_allocation_retries {
            let gid = Gid(self.next_vertex_id.fetch_add(1, Ordering::SeqCst));
            if !self.vertices.read().contains_key(&gid) {
                return Ok(gid);
            }
        }
        Err(StorageError::Creation("vertex id allocation exhausted its retries"))
    }

    pub(crate) fn allocate_edge_gid(&self) -> StorageResult<Gid> {
        for _ in 0..=self.config.id_allocation_retries {
            let gid = Gid(self.next_edge_id.fetch_add(1, Ordering::SeqCst));
            if !self.edges.read().contains_key(&gid) {
                return Ok(gid);
            }
        }
        Err(StorageError::Creation("edge id allocation exhausted its retries"))
    }

    /// Commit protocol: validate constraints, write the delta sequence and
    /// the commit record to the WAL, stream to replicas, then publish the
    /// transaction and release its claims. The commit lock makes WAL order
    /// the linearization order.
    pub(crate) fn commit_transaction(&self, tx: &mut Transaction) -> StorageResult<()> {
        debug_assert_eq!(tx.state, TransactionState::Active);
        let guard = self.commit_lock.lock();
        if let Err(violation) = self.validate_constraints(tx) {
            drop(guard);
            self.abort_locked(tx);
            return Err(violation);
        }
        if !tx.deltas.is_empty() {
            let mut wal = self.wal.lock();
            if let Some(writer) = wal.as_mut() {
                if let Err(err) = writer.append_transaction(self, tx.id, &tx.deltas) {
                    drop(wal);
                    drop(guard);
                    self.abort_locked(tx);
                    return Err(err);
                }
            }
            drop(wal);
            crate::replication::stream_commit(self, tx.id, &tx.deltas);
        }
        self.engine.commit(tx.id);
        if self.replication_role() == crate::replication::ReplicationRole::Main {
            self.replication
                .last_durable_tx
                .fetch_max(tx.id.0, Ordering::SeqCst);
        }
        tx.state = TransactionState::Committed;
        self.release_claims(tx);
        debug!(tx_id = tx.id.0, deltas = tx.deltas.len(), "transaction committed");
        Ok(())
    }

    /// Abort: unlink this transaction's versions, drop objects it created,
    /// then release its claims.
    pub(crate) fn abort_locked(&self, tx: &mut Transaction) {
        debug_assert_eq!(tx.state, TransactionState::Active);
        let mut dead_vertices = HashSet::new();
        let mut dead_edges = HashSet::new();
        for claim in &tx.claims {
            match claim {
                Claim::Vertex(chain) => {
                    if chain.unlink_aborted(tx.id) {
                        dead_vertices.insert(chain.gid());
                    }
                }
                Claim::Edge(chain) => {
                    if chain.unlink_aborted(tx.id) {
                        dead_edges.insert(chain.gid());
                    }
                }
            }
        }
        if !dead_vertices.is_empty() {
            self.vertices
                .write()
                .retain(|gid, _| !dead_vertices.contains(gid));
            self.indexes.remove_gids(&dead_vertices);
        }
        if !dead_edges.is_empty() {
            self.edges.write().retain(|gid, _| !dead_edges.contains(gid));
        }
        self.engine.abort(tx.id);
        tx.state = TransactionState::Aborted;
        self.release_claims(tx);
        debug!(tx_id = tx.id.0, "transaction aborted");
    }

    fn release_claims(&self, tx: &mut Transaction) {
        for claim in tx.claims.drain(..) {
            match claim {
                Claim::Vertex(chain) => chain.release_writer(tx.id),
                Claim::Edge(chain) => chain.release_writer(tx.id),
            }
        }
    }

    /// Validates existence and uniqueness constraints against the
    /// transaction's `New` view and the latest committed state. Runs under
    /// the commit lock so concurrent commits cannot race the check.
    fn validate_constraints(&self, tx: &Transaction) -> StorageResult<()> {
        let existence: Vec<_> = self.constraints.existence.read().iter().copied().collect();
        let unique: Vec<_> = self.constraints.unique.read().iter().copied().collect();
        if existence.is_empty() && unique.is_empty() {
            return Ok(());
        }
        let mut touched: BTreeSet<Gid> = BTreeSet::new();
        for delta in &tx.deltas {
            match delta {
                Delta::CreateVertex { gid }
                | Delta::AddLabel { gid, .. }
                | Delta::RemoveLabel { gid, .. } => {
                    touched.insert(*gid);
                }
                Delta::SetProperty {
                    target: ElementRef::Vertex(gid),
                    ..
                }
                | Delta::RemoveProperty {
                    target: ElementRef::Vertex(gid),
                    ..
                } => {
                    touched.insert(*gid);
                }
                _ => {}
            }
        }
        for gid in &touched {
            let Some(chain) = self.vertices.read().get(gid).cloned() else {
                continue;
            };
            let Some(data) =
                chain.with_visible(tx, crate::types::View::New, &self.engine, |data| data.clone())
            else {
                continue;
            };
            for (label, property) in &existence {
                if data.has_label(*label) && !data.properties.contains_key(property) {
                    return Err(StorageError::ConstraintViolation(format!(
                        "existence constraint on :{}({}) violated by vertex {}",
                        self.labels.name_of(label.0),
                        self.properties.name_of(property.0),
                        gid
                    )));
                }
            }
            for (label, property) in &unique {
                if !data.has_label(*label) {
                    continue;
                }
                let Some(value) = data.properties.get(property) else {
                    continue;
                };
                if self.has_conflicting_value(tx, *gid, *label, *property, value) {
                    return Err(StorageError::ConstraintViolation(format!(
                        "uniqueness constraint on :{}({}) violated by vertex {}",
                        self.labels.name_of(label.0),
                        self.properties.name_of(property.0),
                        gid
                    )));
                }
            }
        }
        Ok(())
    }

    fn has_conflicting_value(
        &self,
        tx: &Transaction,
        own: Gid,
        label: LabelId,
        property: PropertyId,
        value: &crate::value::PropertyValue,
    ) -> bool {
        let candidates = self
            .indexes
            .label_property_entries_value(label, property, value)
            .unwrap_or_else(|| self.vertices.read().values().cloned().collect());
        for chain in candidates {
            if chain.gid() == own {
                continue;
            }
            // Compare against the other vertex's latest committed state (or
            // this transaction's own view of it).
            let matches = chain
                .with_latest_committed(&self.engine, |data| {
                    data.has_label(label)
                        && data
                            .properties
                            .get(&property)
                            .is_some_and(|other| other.index_cmp(value) == std::cmp::Ordering::Equal)
                })
                .unwrap_or(false);
            if matches {
                return true;
            }
        }
        false
    }

    /// Clears all graph state; recovery uses this to restart after a failed
    /// snapshot replay before trying an older snapshot.
    pub(crate) fn wipe(&self) {
        self.vertices.write().clear();
        self.edges.write().clear();
        let labels = self.indexes.label_definitions();
        for label in labels {
            self.indexes.drop_label_index(label);
        }
        for (label, property) in self.indexes.label_property_definitions() {
            self.indexes.drop_label_property_index(label, property);
        }
        self.constraints.existence.write().clear();
        self.constraints.unique.write().clear();
    }

    /// Prunes version chains no active transaction can observe, removes
    /// globally deleted objects and trims transaction bookkeeping.
    pub fn collect_garbage(&self) {
        let horizon = self.engine.gc_horizon();
        let mut dead_vertices = HashSet::new();
        let vertex_chains: Vec<VertexChainRef> =
            self.vertices.read().values().cloned().collect();
        for chain in vertex_chains {
            if chain.prune(&self.engine, horizon) {
                dead_vertices.insert(chain.gid());
            }
        }
        let mut dead_edges = HashSet::new();
        let edge_chains: Vec<EdgeChainRef> = self.edges.read().values().cloned().collect();
        for chain in edge_chains {
            if chain.prune(&self.engine, horizon) {
                dead_edges.insert(chain.gid());
            }
        }
        if !dead_vertices.is_empty() {
            self.vertices
                .write()
                .retain(|gid, _| !dead_vertices.contains(gid));
            self.indexes.remove_gids(&dead_vertices);
        }
        if !dead_edges.is_empty() {
            self.edges.write().retain(|gid, _| !dead_edges.contains(gid));
        }
        if !dead_vertices.is_empty() || !dead_edges.is_empty() {
            debug!(
                vertices = dead_vertices.len(),
                edges = dead_edges.len(),
                "garbage collected"
            );
        }
        self.engine.collect_clog(horizon);
    }

    /// Writes a point-in-time snapshot of the committed state.
    pub fn create_snapshot(self: &Arc<Self>) -> StorageResult<std::path::PathBuf> {
        if !self.config.durability {
            return Err(StorageError::Corruption(
                "snapshots require durability to be enabled".into(),
            ));
        }
        crate::durability::snapshot::write_snapshot(self)
    }

    fn spawn_background(self: &Arc<Self>) {
        if let Some(interval) = self.config.gc_interval {
            self.spawn_periodic("quiver-gc", interval, |storage| {
                storage.collect_garbage();
                Ok(())
            });
        }
        if self.config.durability {
            if let Some(interval) = self.config.snapshot_interval {
                self.spawn_periodic("quiver-snapshot", interval, |storage| {
                    storage.create_snapshot().map(|_| ())
                });
            }
        }
    }

    fn spawn_periodic(
        self: &Arc<Self>,
        name: &str,
        interval: Duration,
        job: fn(&Arc<Storage>) -> StorageResult<()>,
    ) {
        let weak: Weak<Storage> = Arc::downgrade(self);
        let stop = Arc::clone(&self.stop);
        let thread_name = name.to_owned();
        let builder = std::thread::Builder::new().name(thread_name.clone());
        let spawned = builder.spawn(move || {
            let tick = Duration::from_millis(50).min(interval);
            let mut waited = Duration::ZERO;
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(tick);
                waited += tick;
                if waited < interval {
                    continue;
                }
                waited = Duration::ZERO;
                let Some(storage) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = job(&storage) {
                    warn!(thread = %thread_name, error = %err, "background job failed");
                }
            }
        });
        if let Err(err) = spawned {
            warn!(thread = name, error = %err, "failed to spawn background thread");
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(mut writer) = self.wal.lock().take() {
            if let Err(err) = writer.seal() {
                warn!(error = %err, "failed to seal WAL on shutdown");
            }
        }
        info!("storage shut down");
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("vertices", &self.vertices.read().len())
            .field("edges", &self.edges.read().len())
            .finish()
    }
}
