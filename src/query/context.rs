use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{QueryError, QueryResult};
use crate::query::value::QueryValue;
use crate::storage::accessor::Accessor;
use crate::types::Gid;
use crate::value::PropertyValue;

/// Row-producing procedure callable from `CallProcedure`. Arguments are
/// already evaluated; each inner vector is one output row.
pub type ProcedureFn =
    Arc<dyn Fn(&[QueryValue]) -> Result<Vec<Vec<QueryValue>>, String> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, ProcedureFn>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, procedure: ProcedureFn) {
        self.procedures.insert(name.into(), procedure);
    }

    pub fn get(&self, name: &str) -> Option<&ProcedureFn> {
        self.procedures.get(name)
    }
}

/// Change record emitted by write operators when an observer is attached.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectChange {
    CreatedVertex(Gid),
    CreatedEdge(Gid),
    DeletedVertex(Gid),
    DeletedEdge(Gid),
    SetVertexProperty(Gid, String),
    SetEdgeProperty(Gid, String),
    UpdatedLabels(Gid),
}

/// Collects change records across one query execution.
#[derive(Default, Debug)]
pub struct ChangeCollector {
    changes: Mutex<Vec<ObjectChange>>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, change: ObjectChange) {
        self.changes.lock().push(change);
    }

    pub fn drain(&self) -> Vec<ObjectChange> {
        std::mem::take(&mut self.changes.lock())
    }
}

/// Everything a cursor needs besides the frame: the transaction's accessor,
/// query parameters, the cancellation token, procedures and the optional
/// change observer.
pub struct ExecutionContext<'a> {
    pub accessor: &'a Accessor,
    pub parameters: BTreeMap<String, PropertyValue>,
    pub must_abort: Option<Arc<AtomicBool>>,
    pub procedures: Option<&'a ProcedureRegistry>,
    pub changes: Option<&'a ChangeCollector>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(accessor: &'a Accessor) -> Self {
        Self {
            accessor,
            parameters: BTreeMap::new(),
            must_abort: None,
            procedures: None,
            changes: None,
        }
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, PropertyValue>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.must_abort = Some(flag);
        self
    }

    pub fn with_procedures(mut self, procedures: &'a ProcedureRegistry) -> Self {
        self.procedures = Some(procedures);
        self
    }

    pub fn with_changes(mut self, changes: &'a ChangeCollector) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Cooperative cancellation checkpoint; operators consult it at
    /// iteration boundaries and at every expansion step.
    pub fn check_abort(&self) -> QueryResult<()> {
        if let Some(flag) = &self.must_abort {
            if flag.load(Ordering::Relaxed) {
                return Err(QueryError::Cancelled);
            }
        }
        Ok(())
    }

    pub fn record_change(&self, change: ObjectChange) {
        if let Some(changes) = self.changes {
            changes.record(change);
        }
    }
}
