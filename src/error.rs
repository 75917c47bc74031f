use std::io;
use thiserror::Error;

/// Failures surfaced by the storage layer and its accessors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Write conflict on a version head. The transaction must abort; the
    /// caller may retry with a fresh transaction.
    #[error("cannot resolve conflicting transactions, retry this transaction")]
    Serialization,
    /// Access through an accessor to an element already deleted in the same
    /// transaction.
    #[error("object already deleted")]
    DeletedObject,
    /// Lookup of a gid whose entity is invisible to the transaction.
    #[error("object does not exist")]
    NonexistentObject,
    /// Vertex deletion without detach while incident edges remain.
    #[error("vertex has incident edges")]
    VertexHasEdges,
    /// Property write on an edge while edge-property storage is disabled.
    #[error("edge properties are disabled")]
    PropertiesDisabled,
    /// Uniqueness or existence constraint violated at commit.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Concurrent id allocation failed after bounded retry.
    #[error("creation failure: {0}")]
    Creation(&'static str),
    /// Snapshot or WAL magic/version/hash mismatch, or a truncated record.
    #[error("durability read error: {0}")]
    Corruption(String),
    /// Replica epoch mismatch or a missing WAL range.
    #[error("replica out of sync: {0}")]
    ReplicaOutOfSync(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Failures raised while pulling through an operator tree.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Storage(#[from] StorageError),
    /// Expression or filter evaluated to an invalid type.
    #[error("{0}")]
    RuntimeType(String),
    /// Range-scan bound of a type without a defined ordering.
    #[error("'{0}' cannot be used as a range bound")]
    RangeBound(&'static str),
    /// Cooperative cancellation observed at an iteration boundary.
    #[error("query cancelled by the client")]
    Cancelled,
    #[error("procedure '{name}' failed: {message}")]
    Procedure { name: String, message: String },
    #[error("CSV import failed: {0}")]
    LoadCsv(String),
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

impl QueryError {
    /// Translates a storage write failure into the query-level message the
    /// operator surfaces, e.g. a serialization conflict into a retry hint.
    pub fn from_write_error(err: StorageError, doing: &str) -> Self {
        match err {
            StorageError::Serialization => QueryError::Storage(StorageError::Serialization),
            StorageError::DeletedObject => {
                QueryError::RuntimeType(format!("trying to {doing} on a deleted object"))
            }
            StorageError::VertexHasEdges => QueryError::RuntimeType(
                "cannot delete a vertex with incident edges without DETACH".to_owned(),
            ),
            StorageError::PropertiesDisabled => {
                QueryError::RuntimeType("edge properties are disabled".to_owned())
            }
            other => QueryError::Storage(other),
        }
    }
}
