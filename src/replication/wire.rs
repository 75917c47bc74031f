//! Replication protocol messages.
//!
//! Delta payloads reuse the WAL record encoding, so a replica decodes the
//! exact byte stream the main wrote to its own log. Transports only move
//! these messages; the RPC plumbing itself lives outside the engine.

/// Request sent from a main to a replica.
#[derive(Debug, Clone)]
pub enum ReplicaRequest {
    /// Registration handshake; carries the main's epoch.
    Hello { epoch: u64 },
    /// One committed transaction: `TxnBegin`, delta records, `TxnCommit`,
    /// in the WAL encoding.
    AppendTransaction {
        epoch: u64,
        tx_id: u64,
        records: Vec<u8>,
    },
    /// Missing WAL history for a lagging replica, possibly many
    /// transactions.
    WalCatchUp { epoch: u64, records: Vec<u8> },
    /// Full snapshot image for a replica whose history diverged.
    SnapshotCatchUp { epoch: u64, bytes: Vec<u8> },
}

/// Replica's answer.
#[derive(Debug, Clone)]
pub enum ReplicaResponse {
    /// Handshake reply: the replica's epoch and the last transaction it
    /// holds durably.
    Hello { epoch: u64, last_durable_tx: u64 },
    Ok,
    Error(String),
}
