//! Query execution: the evaluation frame, runtime values, the expression
//! evaluator and the pull-based operator tree.

pub mod context;
pub mod eval;
pub mod frame;
pub mod plan;
pub mod value;

pub use context::{ChangeCollector, ExecutionContext, ObjectChange, ProcedureRegistry};
pub use frame::{Frame, Symbol, SymbolTable};
pub use plan::{Cursor, LogicalOperator};
pub use value::{Path, QueryValue};
