//! Crash recovery: newest usable snapshot first, then the WAL.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::StorageResult;
use crate::storage::delta::Delta;
use crate::storage::Storage;
use crate::types::TxId;

use super::snapshot::SnapshotInfo;
use super::wal::{read_wal_file, WalRecord};

/// Entry point called from `Storage::open`.
pub(crate) fn recover(storage: &Arc<Storage>) -> StorageResult<()> {
    let snapshot_info = recover_snapshots(storage)?;
    let max_observed = recover_wal(storage, snapshot_info.as_ref())?;
    let mut frontier = max_observed;
    if let Some(info) = &snapshot_info {
        frontier = frontier.max(info.tx_id);
        for id in &info.active {
            frontier = frontier.max(*id);
        }
    }
    storage.engine.ensure_next_id_greater(frontier);

    // Indexes and constraints are rebuilt last, over the fully recovered
    // state.
    if let Some(info) = &snapshot_info {
        let accessor = storage.access();
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
        accessor.commit()?;
    }
    info!(next_tx_hint = storage.engine.next_id_hint(), "recovery finished");
    Ok(())
}

/// Tries snapshots newest first; a snapshot that fails verification or
/// replay is skipped and the state is wiped before the next attempt.
fn recover_snapshots(storage: &Arc<Storage>) -> StorageResult<Option<SnapshotInfo>> {
    let dir = super::snapshot_dir(&storage.config.data_dir);
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(super::is_snapshot_file)
        })
        .collect();
    files.sort();
    for path in files.iter().rev() {
        info!(path = %path.display(), "starting snapshot recovery");
        match super::snapshot::load_snapshot_file(storage, path) {
            Ok(info) => {
                info!(path = %path.display(), "snapshot recovery successful");
                return Ok(Some(info));
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "snapshot recovery failed, trying an older snapshot");
                storage.wipe();
            }
        }
    }
    Ok(None)
}

/// Replays WAL files in lexicographic order, buffering each transaction's
/// deltas and applying them on its commit record. Returns the highest
/// transaction id observed anywhere in the log.
fn recover_wal(storage: &Arc<Storage>, snapshot: Option<&SnapshotInfo>) -> StorageResult<u64> {
    let dir = super::wal_dir(&storage.config.data_dir);
    if !dir.is_dir() {
        return Ok(0);
    }
    // The first transaction needing recovery is the oldest member of the
    // snapshotter's active set; everything the snapshot already contains is
    // skipped. Without a snapshot the WAL is recovered from its first
    // record.
    let (first_to_recover, snapshot_tx, snapshot_active): (u64, u64, &[u64]) = match snapshot {
        Some(info) => {
            let first = info
                .active
                .iter()
                .copied()
                .min()
                .unwrap_or(info.tx_id + 1);
            (first, info.tx_id, &info.active)
        }
        None => {
            info!("no snapshot found, recovering WAL from the first record");
            (0, 0, &[])
        }
    };
    let should_skip = |tx_id: u64| {
        tx_id < first_to_recover
            || (tx_id < snapshot_tx && !snapshot_active.contains(&tx_id))
    };

    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("wal_"))
        })
        .collect();
    files.sort();

    let mut max_observed = 0u64;
    let mut pending: HashMap<u64, Vec<Delta>> = HashMap::new();
    let mut committed = 0u64;
    for path in &files {
        let file_max = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(super::wal_file_max_tx);
        if file_max.is_some_and(|max_tx| max_tx < first_to_recover) {
            continue;
        }
        let records = match read_wal_file(path, storage) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable WAL file");
                continue;
            }
        };
        for (tx_id, record) in records {
            max_observed = max_observed.max(tx_id.0);
            if should_skip(tx_id.0) {
                continue;
            }
            match record {
                WalRecord::Begin => {
                    pending.entry(tx_id.0).or_default();
                }
                WalRecord::Delta(delta) => {
                    pending.entry(tx_id.0).or_default().push(delta);
                }
                WalRecord::Abort => {
                    pending.remove(&tx_id.0);
                }
                WalRecord::Commit => {
                    if let Some(deltas) = pending.remove(&tx_id.0) {
                        apply_transaction(storage, tx_id, &deltas)?;
                        committed += 1;
                    }
                }
            }
        }
    }
    // Deltas left without a terminal record belong to transactions that
    // never became durable; they are discarded.
    if !pending.is_empty() {
        info!(transactions = pending.len(), "discarded unfinished WAL transactions");
    }
    info!(files = files.len(), transactions = committed, "WAL recovery finished");
    Ok(max_observed)
}

/// Applies one recovered transaction through a fresh accessor.
pub(crate) fn apply_transaction(
    storage: &Arc<Storage>,
    origin_tx: TxId,
    deltas: &[Delta],
) -> StorageResult<()> {
    let accessor = storage.access();
    for delta in deltas {
        if let Err(err) = accessor.apply_delta(delta) {
            warn!(tx_id = origin_tx.0, error = %err, "failed to apply recovered delta");
            return Err(err);
        }
    }
    accessor.commit()
}

/// Groups a raw record stream into committed transactions in commit order.
/// Used when a main ships WAL history to a lagging replica.
pub(crate) fn collect_committed_transactions(
    records: Vec<(TxId, WalRecord)>,
) -> Vec<(TxId, Vec<Delta>)> {
    let mut pending: HashMap<u64, Vec<Delta>> = HashMap::new();
    let mut committed = Vec::new();
    for (tx_id, record) in records {
        match record {
            WalRecord::Begin => {
                pending.entry(tx_id.0).or_default();
            }
            WalRecord::Delta(delta) => {
                pending.entry(tx_id.0).or_default().push(delta);
            }
            WalRecord::Abort => {
                pending.remove(&tx_id.0);
            }
            WalRecord::Commit => {
                if let Some(deltas) = pending.remove(&tx_id.0) {
                    committed.push((tx_id, deltas));
                }
            }
        }
    }
    committed
}
