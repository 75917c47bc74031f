//! Transaction identity, the active set and commit/abort bookkeeping.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::delta::Delta;
use crate::storage::edge::EdgeData;
use crate::storage::mvcc::{Stamp, VersionChain};
use crate::storage::vertex::VertexData;
use crate::types::{CommandId, TxId, View};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Version chain claimed by a transaction's write; claims are released on
/// commit and abort.
#[derive(Clone, Debug)]
pub enum Claim {
    Vertex(Arc<VersionChain<VertexData>>),
    Edge(Arc<VersionChain<EdgeData>>),
}

/// Per-transaction state. Owned by the accessor, shared with the element
/// accessors it hands out.
#[derive(Debug)]
pub struct Transaction {
    pub id: TxId,
    /// Current command counter; advanced by `AdvanceCommand`. Controls when
    /// the transaction's own writes become visible to its `Old` reads.
    pub command: CommandId,
    /// Ids of transactions that were active when this one began.
    pub snapshot: HashSet<TxId>,
    pub state: TransactionState,
    /// Write set in program order; the WAL and the replication stream
    /// consume it verbatim.
    pub deltas: Vec<Delta>,
    pub claims: Vec<Claim>,
}

impl Transaction {
    pub fn current_stamp(&self) -> Stamp {
        Stamp {
            tx: self.id,
            command: self.command,
        }
    }

    /// Whether a version stamp is visible to this transaction under `view`.
    ///
    /// Own writes are always visible under `New`; under `Old` only writes of
    /// earlier commands. Foreign writes are visible iff the writer committed
    /// before this transaction began.
    pub fn sees_stamp(&self, stamp: Stamp, view: View, engine: &TransactionEngine) -> bool {
        if stamp.tx == self.id {
            match view {
                View::New => true,
                View::Old => stamp.command < self.command,
            }
        } else {
            self.sees_committed(stamp.tx, engine)
        }
    }

    /// Whether a foreign transaction's commit is part of this transaction's
    /// snapshot of history.
    pub fn sees_committed(&self, tx: TxId, engine: &TransactionEngine) -> bool {
        tx < self.id && !self.snapshot.contains(&tx) && engine.is_committed(tx)
    }
}

#[derive(Debug, Default)]
struct EngineInner {
    active: BTreeSet<TxId>,
    committed: HashSet<TxId>,
    /// Every transaction below this id is resolved, and any stamp still
    /// reachable from a version chain below it belongs to a committed
    /// transaction (aborted versions are unlinked at abort time).
    frontier: u64,
}

/// Issues transaction ids and answers visibility questions about them.
#[derive(Debug)]
pub struct TransactionEngine {
    next_id: AtomicU64,
    inner: RwLock<EngineInner>,
}

impl Default for TransactionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionEngine {
    pub fn new() -> Self {
        Self {
            // Id zero is reserved so a zero writer slot can mean "unclaimed".
            next_id: AtomicU64::new(1),
            inner: RwLock::new(EngineInner::default()),
        }
    }

    /// Begins a transaction, capturing the ids active at this instant.
    pub fn begin(&self) -> Transaction {
        let mut inner = self.inner.write();
        let id = TxId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let snapshot = inner.active.iter().copied().collect();
        inner.active.insert(id);
        Transaction {
            id,
            command: 0,
            snapshot,
            state: TransactionState::Active,
            deltas: Vec::new(),
            claims: Vec::new(),
        }
    }

    pub fn commit(&self, id: TxId) {
        let mut inner = self.inner.write();
        inner.active.remove(&id);
        inner.committed.insert(id);
    }

    pub fn abort(&self, id: TxId) {
        let mut inner = self.inner.write();
        inner.active.remove(&id);
    }

    pub fn is_committed(&self, id: TxId) -> bool {
        let inner = self.inner.read();
        id.0 < inner.frontier || inner.committed.contains(&id)
    }

    pub fn is_active(&self, id: TxId) -> bool {
        self.inner.read().active.contains(&id)
    }

    /// Smallest active transaction id, if any.
    pub fn oldest_active(&self) -> Option<TxId> {
        self.inner.read().active.iter().next().copied()
    }

    /// GC horizon: every version stamped below this id is either visible to
    /// all current and future transactions or unreachable.
    pub fn gc_horizon(&self) -> u64 {
        self.oldest_active()
            .map(|id| id.0)
            .unwrap_or_else(|| self.next_id.load(Ordering::SeqCst))
    }

    /// Advances the id generator past `id`. Used by recovery so ids issued
    /// after a restart do not collide with recovered history.
    pub fn ensure_next_id_greater(&self, id: u64) {
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
    }

    pub fn next_id_hint(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Drops resolved-transaction bookkeeping below `horizon` once the
    /// version chains stamped by them have been pruned or anchored.
    pub fn collect_clog(&self, horizon: u64) {
        let mut inner = self.inner.write();
        if horizon <= inner.frontier {
            return;
        }
        inner.committed.retain(|id| id.0 >= horizon);
        inner.frontier = horizon;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_captures_active_set() {
        let engine = TransactionEngine::new();
        let t1 = engine.begin();
        let t2 = engine.begin();
        assert!(t2.snapshot.contains(&t1.id));
        assert!(!t1.snapshot.contains(&t2.id));
        assert!(t1.id < t2.id);
    }

    #[test]
    fn committed_visible_only_to_later_transactions() {
        let engine = TransactionEngine::new();
        let t1 = engine.begin();
        let t2 = engine.begin();
        engine.commit(t1.id);
        // t2 began while t1 was active, so t1 stays invisible to it.
        assert!(!t2.sees_committed(t1.id, &engine));
        let t3 = engine.begin();
        assert!(t3.sees_committed(t1.id, &engine));
    }

    #[test]
    fn own_writes_respect_command_counter() {
        let engine = TransactionEngine::new();
        let mut t = engine.begin();
        let stamp = t.current_stamp();
        assert!(t.sees_stamp(stamp, View::New, &engine));
        assert!(!t.sees_stamp(stamp, View::Old, &engine));
        t.command += 1;
        assert!(t.sees_stamp(stamp, View::Old, &engine));
    }

    #[test]
    fn clog_frontier_counts_as_committed() {
        let engine = TransactionEngine::new();
        let t1 = engine.begin();
        engine.commit(t1.id);
        engine.collect_clog(t1.id.0 + 1);
        assert!(engine.is_committed(t1.id));
    }

    #[test]
    fn ensure_next_id_greater_advances() {
        let engine = TransactionEngine::new();
        engine.ensure_next_id_greater(100);
        let t = engine.begin();
        assert!(t.id.0 > 100);
    }
}
