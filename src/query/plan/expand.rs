//! Single-step and depth-first variable-length expansion.

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::QueryValue;
use crate::storage::accessor::{Direction, EdgeAccessor, VertexAccessor};
use crate::types::{EdgeTypeId, View};

use super::{Cursor, ExpansionLambda, LogicalOperator};

/// Resolves edge-type names; `None` means no filter. Unknown names resolve
/// to an empty filter set, which matches nothing.
pub(super) fn resolve_edge_types(
    ctx: &ExecutionContext<'_>,
    names: &[String],
) -> Option<Vec<EdgeTypeId>> {
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .iter()
            .filter_map(|name| ctx.accessor.find_edge_type(name))
            .collect(),
    )
}

/// Edges incident to `vertex` in `direction` with the vertex on the other
/// end. On `Both` a self-loop appears in both incident lists but is emitted
/// once.
pub(super) fn expand_pairs(
    vertex: &VertexAccessor,
    direction: Direction,
    edge_types: Option<&Vec<EdgeTypeId>>,
    view: View,
) -> QueryResult<Vec<(EdgeAccessor, VertexAccessor)>> {
    let types = edge_types.map(|types| types.as_slice());
    let mut pairs = Vec::new();
    match direction {
        Direction::In => {
            for edge in vertex.edges(Direction::In, types, view)? {
                let other = edge.from_vertex()?;
                pairs.push((edge, other));
            }
        }
        Direction::Out => {
            for edge in vertex.edges(Direction::Out, types, view)? {
                let other = edge.to_vertex()?;
                pairs.push((edge, other));
            }
        }
        Direction::Both => {
            for edge in vertex.edges(Direction::In, types, view)? {
                let other = edge.from_vertex()?;
                pairs.push((edge, other));
            }
            for edge in vertex.edges(Direction::Out, types, view)? {
                if edge.from_gid()? == edge.to_gid()? {
                    continue;
                }
                let other = edge.to_vertex()?;
                pairs.push((edge, other));
            }
        }
    }
    Ok(pairs)
}

/// Reads the expansion source from the frame: a vertex expands, null skips
/// the row, anything else is a type error.
pub(super) fn source_vertex(
    frame: &Frame,
    symbol: Symbol,
) -> QueryResult<Option<VertexAccessor>> {
    match frame.get(symbol) {
        QueryValue::Null => Ok(None),
        QueryValue::Vertex(vertex) => Ok(Some(vertex.clone())),
        other => Err(QueryError::RuntimeType(format!(
            "expansion expects a vertex, got {}",
            other.type_name()
        ))),
    }
}

/// Evaluates the user filter lambda for one expansion step; null counts as
/// false.
pub(super) fn lambda_accepts(
    lambda: Option<&ExpansionLambda>,
    frame: &mut Frame,
    ctx: &ExecutionContext<'_>,
    edge: &EdgeAccessor,
    vertex: &VertexAccessor,
) -> QueryResult<bool> {
    let Some(lambda) = lambda else {
        return Ok(true);
    };
    frame.set(lambda.inner_edge, QueryValue::Edge(edge.clone()));
    frame.set(lambda.inner_vertex, QueryValue::Vertex(vertex.clone()));
    let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
    evaluator.eval_filter(&lambda.expression)
}

/// Evaluates a variable-expansion bound to a non-negative integer.
pub(super) fn eval_bound(
    expression: Option<&Expression>,
    default: u64,
    frame: &Frame,
    ctx: &ExecutionContext<'_>,
) -> QueryResult<u64> {
    let Some(expression) = expression else {
        return Ok(default);
    };
    let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
    match evaluator.eval(expression)? {
        QueryValue::Int(bound) if bound >= 0 => Ok(bound as u64),
        other => Err(QueryError::RuntimeType(format!(
            "variable expansion bound must be a non-negative integer, got {}",
            other.type_name()
        ))),
    }
}

pub struct ExpandCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node_symbol: Symbol,
    edge_symbol: Symbol,
    direction: Direction,
    edge_types: &'p [String],
    existing_node: bool,
    view: View,
    pending: std::vec::IntoIter<(EdgeAccessor, VertexAccessor)>,
}

impl<'p> ExpandCursor<'p> {
    pub(super) fn new(op: &'p LogicalOperator) -> Self {
        let LogicalOperator::Expand {
            input,
            input_symbol,
            node_symbol,
            edge_symbol,
            direction,
            edge_types,
            existing_node,
            view,
        } = op
        else {
            unreachable!("ExpandCursor expects an Expand operator")
        };
        Self {
            input: Box::new(input.make_cursor()),
            input_symbol: *input_symbol,
            node_symbol: *node_symbol,
            edge_symbol: *edge_symbol,
            direction: *direction,
            edge_types,
            existing_node: *existing_node,
            view: *view,
            pending: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            for (edge, other) in self.pending.by_ref() {
                if self.existing_node {
                    match frame.get(self.node_symbol) {
                        QueryValue::Vertex(bound) if *bound == other => {}
                        _ => continue,
                    }
                } else {
                    frame.set(self.node_symbol, QueryValue::Vertex(other));
                }
                frame.set(self.edge_symbol, QueryValue::Edge(edge));
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let Some(source) = source_vertex(frame, self.input_symbol)? else {
                continue;
            };
            let types = resolve_edge_types(ctx, self.edge_types);
            self.pending =
                expand_pairs(&source, self.direction, types.as_ref(), self.view)?.into_iter();
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.pending = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.pending = Vec::new().into_iter();
    }
}

fn sink_matches(
    existing_node: bool,
    node_symbol: Symbol,
    frame: &Frame,
    vertex: &VertexAccessor,
) -> bool {
    if !existing_node {
        return true;
    }
    matches!(frame.get(node_symbol), QueryValue::Vertex(bound) if bound == vertex)
}

fn write_path_result(
    frame: &mut Frame,
    edge_symbol: Symbol,
    node_symbol: Symbol,
    is_reverse: bool,
    edges: &[EdgeAccessor],
    vertex: Option<&VertexAccessor>,
) {
    let mut list: Vec<QueryValue> = edges
        .iter()
        .map(|edge| QueryValue::Edge(edge.clone()))
        .collect();
    if is_reverse {
        list.reverse();
    }
    frame.set(edge_symbol, QueryValue::List(list));
    if let Some(vertex) = vertex {
        frame.set(node_symbol, QueryValue::Vertex(vertex.clone()));
    }
}

struct DfsState {
    stack: Vec<std::vec::IntoIter<(EdgeAccessor, VertexAccessor)>>,
    path: Vec<(EdgeAccessor, VertexAccessor)>,
    lower: u64,
    upper: u64,
    edge_types: Option<Vec<EdgeTypeId>>,
}

/// Depth-first variable-length expansion: yields every path whose length
/// lies within the bounds, with per-step edge uniqueness and the optional
/// user filter. A lower bound of zero also emits the empty path.
pub struct ExpandVariableCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node_symbol: Symbol,
    edge_symbol: Symbol,
    direction: Direction,
    edge_types: &'p [String],
    lower_bound: Option<&'p Expression>,
    upper_bound: Option<&'p Expression>,
    existing_node: bool,
    is_reverse: bool,
    filter_lambda: Option<&'p ExpansionLambda>,
    state: Option<DfsState>,
}

impl<'p> ExpandVariableCursor<'p> {
    pub(super) fn new(op: &'p LogicalOperator) -> Self {
        let LogicalOperator::ExpandVariable {
            input,
            input_symbol,
            node_symbol,
            edge_symbol,
            direction,
            edge_types,
            lower_bound,
            upper_bound,
            existing_node,
            is_reverse,
            filter_lambda,
            ..
        } = op
        else {
            unreachable!("ExpandVariableCursor expects an ExpandVariable operator")
        };
        Self {
            input: Box::new(input.make_cursor()),
            input_symbol: *input_symbol,
            node_symbol: *node_symbol,
            edge_symbol: *edge_symbol,
            direction: *direction,
            edge_types,
            lower_bound: lower_bound.as_ref(),
            upper_bound: upper_bound.as_ref(),
            existing_node: *existing_node,
            is_reverse: *is_reverse,
            filter_lambda: filter_lambda.as_ref(),
            state: None,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        let existing_node = self.existing_node;
        let node_symbol = self.node_symbol;
        let edge_symbol = self.edge_symbol;
        let is_reverse = self.is_reverse;
        let direction = self.direction;
        let filter_lambda = self.filter_lambda;
        'next_input: loop {
            ctx.check_abort()?;
            if self.state.is_none() {
                if !self.input.pull(frame, ctx)? {
                    return Ok(false);
                }
                let Some(source) = source_vertex(frame, self.input_symbol)? else {
                    continue;
                };
                let lower = eval_bound(self.lower_bound, 1, frame, ctx)?;
                let upper = eval_bound(self.upper_bound, u64::MAX, frame, ctx)?;
                if upper < lower {
                    continue;
                }
                let edge_types = resolve_edge_types(ctx, self.edge_types);
                let first_level = if upper >= 1 {
                    expand_pairs(&source, direction, edge_types.as_ref(), View::Old)?.into_iter()
                } else {
                    Vec::new().into_iter()
                };
                self.state = Some(DfsState {
                    stack: vec![first_level],
                    path: Vec::new(),
                    lower,
                    upper,
                    edge_types,
                });
                if lower == 0 && sink_matches(existing_node, node_symbol, frame, &source) {
                    write_path_result(
                        frame,
                        edge_symbol,
                        node_symbol,
                        is_reverse,
                        &[],
                        (!existing_node).then_some(&source),
                    );
                    return Ok(true);
                }
            }
            loop {
                ctx.check_abort()?;
                let Some(state) = self.state.as_mut() else {
                    continue 'next_input;
                };
                let Some(level) = state.stack.last_mut() else {
                    self.state = None;
                    continue 'next_input;
                };
                let Some((edge, vertex)) = level.next() else {
                    state.stack.pop();
                    state.path.pop();
                    if state.stack.is_empty() {
                        self.state = None;
                        continue 'next_input;
                    }
                    continue;
                };
                // Per-step edge uniqueness: an edge appears at most once on
                // the path being built.
                if state.path.iter().any(|(used, _)| *used == edge) {
                    continue;
                }
                if !lambda_accepts(filter_lambda, frame, ctx, &edge, &vertex)? {
                    continue;
                }
                state.path.push((edge, vertex.clone()));
                let depth = state.path.len() as u64;
                let next_level = if depth < state.upper {
                    expand_pairs(&vertex, direction, state.edge_types.as_ref(), View::Old)?
                        .into_iter()
                } else {
                    Vec::new().into_iter()
                };
                state.stack.push(next_level);
                if depth >= state.lower && sink_matches(existing_node, node_symbol, frame, &vertex)
                {
                    let edges: Vec<EdgeAccessor> =
                        state.path.iter().map(|(edge, _)| edge.clone()).collect();
                    write_path_result(
                        frame,
                        edge_symbol,
                        node_symbol,
                        is_reverse,
                        &edges,
                        (!existing_node).then_some(&vertex),
                    );
                    return Ok(true);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.state = None;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.state = None;
    }
}
