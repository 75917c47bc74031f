use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
///
/// `data_dir` is only consulted when `durability` is on; snapshots land in
/// `<data_dir>/snapshots/`, WAL files in `<data_dir>/wal/` and the metadata
/// key-value store in `<data_dir>/auth/`.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Write-ahead logging and snapshotting on commit. Off for purely
    /// in-memory operation.
    pub durability: bool,
    /// Replay snapshots and WAL from `data_dir` on open.
    pub recover_on_startup: bool,
    /// Rotate the active WAL file once it exceeds this many bytes.
    pub wal_file_size_limit: u64,
    /// Rotate the active WAL file once it holds this many delta records.
    pub wal_file_delta_limit: u64,
    /// Periodic snapshot interval for the background snapshotter. `None`
    /// disables the thread; snapshots can still be taken explicitly.
    pub snapshot_interval: Option<Duration>,
    /// Periodic garbage-collection interval. `None` disables the thread.
    pub gc_interval: Option<Duration>,
    /// Whether edges carry properties. Fixed at startup; property writes on
    /// edges fail when off.
    pub edge_properties: bool,
    /// Bounded retries for gid allocation before creation fails.
    pub id_allocation_retries: u32,
    /// Worker id recorded in snapshot headers.
    pub worker_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("quiver_data"),
            durability: false,
            recover_on_startup: false,
            wal_file_size_limit: 16 * 1024 * 1024,
            wal_file_delta_limit: 100_000,
            snapshot_interval: None,
            gc_interval: Some(Duration::from_secs(1)),
            edge_properties: true,
            id_allocation_retries: 5,
            worker_id: 0,
        }
    }
}

impl Config {
    /// In-memory engine without durability, for tests and embedding.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable engine rooted at `data_dir`, recovering on open.
    pub fn durable(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            durability: true,
            recover_on_startup: true,
            ..Self::default()
        }
    }

    /// Durable engine with periodic snapshots.
    pub fn durable_with_snapshots(data_dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            snapshot_interval: Some(interval),
            ..Self::durable(data_dir)
        }
    }
}
