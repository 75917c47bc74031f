//! Multi-version concurrency control over per-object version chains.
//!
//! Every vertex and edge owns a [`VersionChain`]: versions ordered newest
//! first, each carrying the full materialized state plus creator and deleter
//! stamps. Visibility is a pure function of those stamps and the reader's
//! snapshot; writes claim the chain through an atomic writer slot and surface
//! conflicts as serialization errors.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::storage::transaction::{Transaction, TransactionEngine};
use crate::types::{CommandId, Gid, TxId, View};

/// Creator/deleter stamp on a version: the writing transaction and its
/// command counter at write time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Stamp {
    pub tx: TxId,
    pub command: CommandId,
}

#[derive(Debug)]
pub struct Version<T> {
    pub data: T,
    pub creator: Stamp,
    pub deleter: Option<Stamp>,
}

#[derive(Debug)]
pub struct VersionChain<T> {
    gid: Gid,
    /// Id of the transaction currently holding the write claim; zero when
    /// unclaimed. Stale claims of finished transactions are reclaimed by the
    /// next writer.
    writer: AtomicU64,
    /// Newest version first.
    versions: RwLock<Vec<Version<T>>>,
}

impl<T: Clone> VersionChain<T> {
    /// Creates a chain with its initial version, claimed by the creating
    /// transaction until it finishes.
    pub fn new(gid: Gid, data: T, stamp: Stamp) -> Self {
        Self {
            gid,
            writer: AtomicU64::new(stamp.tx.0),
            versions: RwLock::new(vec![Version {
                data,
                creator: stamp,
                deleter: None,
            }]),
        }
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    /// Runs `f` over the version visible to `tx` under `view`, walking the
    /// chain newest to oldest. Returns `None` when the object is invisible
    /// (never created from the reader's perspective, or deleted).
    pub fn with_visible<R>(
        &self,
        tx: &Transaction,
        view: View,
        engine: &TransactionEngine,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let versions = self.versions.read();
        for version in versions.iter() {
            if !tx.sees_stamp(version.creator, view, engine) {
                continue;
            }
            if let Some(deleter) = version.deleter {
                if tx.sees_stamp(deleter, view, engine) {
                    return None;
                }
            }
            return Some(f(&version.data));
        }
        None
    }

    pub fn is_visible(&self, tx: &Transaction, view: View, engine: &TransactionEngine) -> bool {
        self.with_visible(tx, view, engine, |_| ()).is_some()
    }

    /// Reads from the newest version regardless of visibility. Only suitable
    /// for fields that are fixed at creation (edge endpoints and type).
    pub fn with_newest<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let versions = self.versions.read();
        versions.first().map(|version| f(&version.data))
    }

    /// Reads the latest committed version irrespective of any snapshot.
    /// Used by commit-time constraint validation, which runs under the
    /// commit lock and must observe the most recent committed state.
    pub fn with_latest_committed<R>(
        &self,
        engine: &TransactionEngine,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let versions = self.versions.read();
        for version in versions.iter() {
            if !engine.is_committed(version.creator.tx) {
                continue;
            }
            if let Some(deleter) = version.deleter {
                if engine.is_committed(deleter.tx) {
                    return None;
                }
            }
            return Some(f(&version.data));
        }
        None
    }

    /// Claims the chain for writing by `tx` and verifies the head is either
    /// the transaction's own or committed within its snapshot of history.
    /// Any other state is a write conflict. Returns whether the claim was
    /// newly acquired (the caller records it for release).
    pub fn prepare_write(
        &self,
        tx: &Transaction,
        engine: &TransactionEngine,
    ) -> StorageResult<bool> {
        let me = tx.id.0;
        let holder = self.writer.load(Ordering::Acquire);
        let mut acquired = false;
        if holder != me {
            if holder != 0 && engine.is_active(TxId(holder)) {
                return Err(StorageError::Serialization);
            }
            if self
                .writer
                .compare_exchange(holder, me, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(StorageError::Serialization);
            }
            acquired = true;
        }
        let versions = self.versions.read();
        if let Some(head) = versions.first() {
            let own_or_visible =
                |stamp: Stamp| stamp.tx == tx.id || tx.sees_committed(stamp.tx, engine);
            let conflicting = !own_or_visible(head.creator)
                || head.deleter.is_some_and(|deleter| !own_or_visible(deleter));
            if conflicting {
                drop(versions);
                if acquired {
                    self.writer.store(0, Ordering::Release);
                }
                return Err(StorageError::Serialization);
            }
        }
        Ok(acquired)
    }

    /// Releases the write claim held by `tx`, if any.
    pub fn release_writer(&self, tx: TxId) {
        let _ = self.writer.compare_exchange(
            tx.0,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Applies a mutation on behalf of `tx`, producing a new head version
    /// (or mutating in place when the head already belongs to the same
    /// transaction and command). The caller must hold the write claim.
    pub fn update(
        &self,
        tx: &Transaction,
        engine: &TransactionEngine,
        f: impl FnOnce(&mut T) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let stamp = tx.current_stamp();
        let mut versions = self.versions.write();
        let index = versions
            .iter()
            .position(|version| tx.sees_stamp(version.creator, View::New, engine))
            .ok_or(StorageError::NonexistentObject)?;
        if let Some(deleter) = versions[index].deleter {
            if tx.sees_stamp(deleter, View::New, engine) {
                return Err(StorageError::DeletedObject);
            }
        }
        if versions[index].creator == stamp {
            return f(&mut versions[index].data);
        }
        let mut data = versions[index].data.clone();
        f(&mut data)?;
        versions.insert(
            0,
            Version {
                data,
                creator: stamp,
                deleter: None,
            },
        );
        Ok(())
    }

    /// Stamps the visible head as deleted by `tx`. The caller must hold the
    /// write claim.
    pub fn mark_deleted(&self, tx: &Transaction, engine: &TransactionEngine) -> StorageResult<()> {
        let stamp = tx.current_stamp();
        let mut versions = self.versions.write();
        let index = versions
            .iter()
            .position(|version| tx.sees_stamp(version.creator, View::New, engine))
            .ok_or(StorageError::NonexistentObject)?;
        if let Some(deleter) = versions[index].deleter {
            if tx.sees_stamp(deleter, View::New, engine) {
                return Err(StorageError::DeletedObject);
            }
        }
        versions[index].deleter = Some(stamp);
        Ok(())
    }

    /// Unwinds an aborted transaction: drops the versions it created and
    /// clears its delete stamps. Returns `true` when the chain is left empty
    /// and the object should be removed from its container.
    pub fn unlink_aborted(&self, tx: TxId) -> bool {
        let mut versions = self.versions.write();
        versions.retain(|version| version.creator.tx != tx);
        for version in versions.iter_mut() {
            if version.deleter.is_some_and(|deleter| deleter.tx == tx) {
                version.deleter = None;
            }
        }
        versions.is_empty()
    }

    /// Prunes versions no transaction can observe any more. `horizon` is the
    /// oldest active transaction id (or the next id when idle). Returns
    /// `true` when the whole object is garbage: its tombstone is visible to
    /// every present and future transaction.
    pub fn prune(&self, engine: &TransactionEngine, horizon: u64) -> bool {
        let globally_visible =
            |stamp: Stamp| stamp.tx.0 < horizon && engine.is_committed(stamp.tx);
        let mut versions = self.versions.write();
        if let Some(anchor) = versions
            .iter()
            .position(|version| globally_visible(version.creator))
        {
            versions.truncate(anchor + 1);
            if anchor == 0 {
                if let Some(deleter) = versions[0].deleter {
                    if globally_visible(deleter) {
                        return true;
                    }
                }
            }
        }
        versions.is_empty()
    }

    /// Number of retained versions; diagnostics and tests only.
    pub fn version_count(&self) -> usize {
        self.versions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::transaction::TransactionEngine;

    fn chain_with(engine: &TransactionEngine, value: i64) -> (VersionChain<i64>, TxId) {
        let tx = engine.begin();
        let chain = VersionChain::new(Gid(1), value, tx.current_stamp());
        let id = tx.id;
        engine.commit(id);
        chain.release_writer(id);
        (chain, id)
    }

    #[test]
    fn own_uncommitted_write_visible_only_under_new() {
        let engine = TransactionEngine::new();
        let tx = engine.begin();
        let chain = VersionChain::new(Gid(7), 1i64, tx.current_stamp());
        assert!(chain.is_visible(&tx, View::New, &engine));
        assert!(!chain.is_visible(&tx, View::Old, &engine));
        let other = engine.begin();
        assert!(!chain.is_visible(&other, View::Old, &engine));
        assert!(!chain.is_visible(&other, View::New, &engine));
    }

    #[test]
    fn committed_write_visible_to_later_readers() {
        let engine = TransactionEngine::new();
        let (chain, _) = chain_with(&engine, 42);
        let reader = engine.begin();
        assert_eq!(chain.with_visible(&reader, View::Old, &engine, |v| *v), Some(42));
    }

    #[test]
    fn concurrent_writer_conflicts() {
        let engine = TransactionEngine::new();
        let (chain, _) = chain_with(&engine, 0);
        let t1 = engine.begin();
        let t2 = engine.begin();
        assert!(chain.prepare_write(&t1, &engine).unwrap());
        assert!(matches!(
            chain.prepare_write(&t2, &engine),
            Err(StorageError::Serialization)
        ));
    }

    #[test]
    fn write_after_unseen_commit_conflicts() {
        let engine = TransactionEngine::new();
        let (chain, _) = chain_with(&engine, 0);
        let reader = engine.begin();
        let writer = engine.begin();
        chain.prepare_write(&writer, &engine).unwrap();
        chain.update(&writer, &engine, |v| {
            *v = 1;
            Ok(())
        })
        .unwrap();
        engine.commit(writer.id);
        chain.release_writer(writer.id);
        // `reader` began before the write committed; its write must fail
        // rather than silently overwrite.
        assert!(matches!(
            chain.prepare_write(&reader, &engine),
            Err(StorageError::Serialization)
        ));
    }

    #[test]
    fn abort_unlinks_versions() {
        let engine = TransactionEngine::new();
        let (chain, _) = chain_with(&engine, 5);
        let tx = engine.begin();
        chain.prepare_write(&tx, &engine).unwrap();
        chain
            .update(&tx, &engine, |v| {
                *v = 6;
                Ok(())
            })
            .unwrap();
        engine.abort(tx.id);
        assert!(!chain.unlink_aborted(tx.id));
        chain.release_writer(tx.id);
        let reader = engine.begin();
        assert_eq!(chain.with_visible(&reader, View::Old, &engine, |v| *v), Some(5));
    }

    #[test]
    fn prune_keeps_anchor_and_detects_garbage() {
        let engine = TransactionEngine::new();
        let (chain, _) = chain_with(&engine, 1);
        let tx = engine.begin();
        chain.prepare_write(&tx, &engine).unwrap();
        chain
            .update(&tx, &engine, |v| {
                *v = 2;
                Ok(())
            })
            .unwrap();
        let id = tx.id;
        engine.commit(id);
        chain.release_writer(id);
        assert_eq!(chain.version_count(), 2);
        assert!(!chain.prune(&engine, engine.gc_horizon()));
        assert_eq!(chain.version_count(), 1);

        let deleter = engine.begin();
        chain.prepare_write(&deleter, &engine).unwrap();
        chain.mark_deleted(&deleter, &engine).unwrap();
        let id = deleter.id;
        engine.commit(id);
        chain.release_writer(id);
        assert!(chain.prune(&engine, engine.gc_horizon()));
    }
}
