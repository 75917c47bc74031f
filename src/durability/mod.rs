//! Durability: write-ahead log, snapshots and crash recovery.
//!
//! Persisted state lives under the data directory: `<data_dir>/snapshots/`,
//! `<data_dir>/wal/` and the metadata key-value store in `<data_dir>/auth/`.

pub mod codec;
pub mod recovery;
pub mod snapshot;
pub mod wal;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn snapshot_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("snapshots")
}

pub fn wal_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("wal")
}

pub fn auth_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("auth")
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// `wal_<timestamp>_<max_tx_id>.log`, zero padded so lexicographic order is
/// chronological order. The file still being written uses the `current`
/// suffix, which sorts after every sealed file.
pub(crate) fn wal_file_name(timestamp: u64, max_tx_id: u64) -> String {
    format!("wal_{timestamp:020}_{max_tx_id:020}.log")
}

pub(crate) fn wal_current_name(timestamp: u64) -> String {
    format!("wal_{timestamp:020}_current.log")
}

/// Highest transaction id encoded in a WAL filename; `u64::MAX` for the
/// active file.
pub(crate) fn wal_file_max_tx(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("wal_")?.strip_suffix(".log")?;
    let (_, max_tx) = rest.split_once('_')?;
    if max_tx == "current" {
        return Some(u64::MAX);
    }
    max_tx.parse().ok()
}

/// `snapshot_<timestamp>_<tx_id>`, zero padded like the WAL names.
pub(crate) fn snapshot_file_name(timestamp: u64, tx_id: u64) -> String {
    format!("snapshot_{timestamp:020}_{tx_id:020}")
}

pub(crate) fn is_snapshot_file(name: &str) -> bool {
    name.starts_with("snapshot_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_names_sort_chronologically() {
        let earlier = wal_file_name(10, 5);
        let later = wal_file_name(11, 2);
        let current = wal_current_name(12);
        assert!(earlier < later);
        assert!(later < current);
        assert_eq!(wal_file_max_tx(&earlier), Some(5));
        assert_eq!(wal_file_max_tx(&current), Some(u64::MAX));
    }
}
