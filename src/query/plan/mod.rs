//! The logical operator tree and its pull-based cursors.
//!
//! A plan is a tree of [`LogicalOperator`] values; execution builds one
//! [`Cursor`] per operator. Every cursor obeys the same contract:
//! `pull(frame, ctx)` either fills the frame with the next tuple and
//! returns `true` or returns `false` on exhaustion; `reset` rewinds;
//! `shutdown` releases per-query state. Cursors consult the context's
//! cancellation token at iteration boundaries, long expansions at every
//! step.

mod aggregate;
mod compose;
mod expand;
mod scan;
mod shortest;
mod write;

use std::collections::BTreeMap;

use crate::error::QueryResult;
use crate::query::context::ExecutionContext;
use crate::query::eval::Expression;
use crate::query::frame::{Frame, Symbol};
use crate::types::View;

pub use crate::storage::accessor::Direction;

pub use aggregate::{
    AccumulateCursor, AggregateCursor, DistinctCursor, LimitCursor, OrderByCursor, SkipCursor,
};
pub use compose::{
    CallProcedureCursor, CartesianCursor, ConstructNamedPathCursor, EdgeUniquenessFilterCursor,
    FilterCursor, LoadCsvCursor, MergeCursor, OnceCursor, OptionalCursor, ProduceCursor,
    UnionCursor, UnwindCursor,
};
pub use expand::{ExpandCursor, ExpandVariableCursor};
pub use scan::ScanCursor;
pub use shortest::{BreadthFirstCursor, StShortestPathCursor, WeightedShortestPathCursor};
pub use write::{
    CreateExpandCursor, CreateNodeCursor, DeleteCursor, RemoveLabelsCursor, RemovePropertyCursor,
    SetLabelsCursor, SetPropertiesCursor, SetPropertyCursor,
};

/// What a `CREATE` pattern node carries.
#[derive(Clone, Debug)]
pub struct NodeCreationInfo {
    pub symbol: Symbol,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expression)>,
}

/// What a `CREATE` pattern edge carries. `direction` orients the created
/// edge relative to the already-bound endpoint.
#[derive(Clone, Debug)]
pub struct EdgeCreationInfo {
    pub symbol: Symbol,
    pub edge_type: String,
    pub direction: Direction,
    pub properties: Vec<(String, Expression)>,
}

/// Inclusive or exclusive range endpoint of an indexed scan.
#[derive(Clone, Debug)]
pub struct RangeBound {
    pub expression: Expression,
    pub inclusive: bool,
}

/// Variable-length expansion flavour.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VariableExpandMode {
    /// Every path with length within bounds, depth-first.
    DepthFirst,
    /// Shortest path per reachable sink (single source), or the single
    /// source-to-sink shortest path when the sink symbol is already bound.
    BreadthFirst,
    /// Dijkstra with a non-negative weight lambda.
    WeightedShortestPath,
}

/// Filter or weight lambda over one expansion step: the candidate edge and
/// vertex are bound to the inner symbols, then the expression runs.
#[derive(Clone, Debug)]
pub struct ExpansionLambda {
    pub inner_edge: Symbol,
    pub inner_vertex: Symbol,
    pub expression: Expression,
}

#[derive(Clone, Debug)]
pub struct NamedExpression {
    pub name: String,
    pub expression: Expression,
    pub symbol: Symbol,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SetPropertiesOp {
    /// Replace every existing property with the new map.
    Replace,
    /// Merge the new map over the existing properties.
    Update,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AggregationOp {
    /// `COUNT(*)` when no argument expression is given, `COUNT(expr)`
    /// otherwise.
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CollectList,
    CollectMap,
}

#[derive(Clone, Debug)]
pub struct AggregateElement {
    pub op: AggregationOp,
    /// Argument value; `None` only for `COUNT(*)`.
    pub value: Option<Expression>,
    /// Key expression of `COLLECT_MAP`.
    pub key: Option<Expression>,
    pub output_symbol: Symbol,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug)]
pub struct SortItem {
    pub direction: SortDirection,
    pub expression: Expression,
}

#[derive(Clone, Debug)]
pub enum LogicalOperator {
    /// Emits exactly one empty tuple; the universal root of sourceless
    /// plans.
    Once,
    CreateNode {
        input: Box<LogicalOperator>,
        node: NodeCreationInfo,
    },
    CreateExpand {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        node: NodeCreationInfo,
        edge: EdgeCreationInfo,
        existing_node: bool,
    },
    ScanAll {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        view: View,
    },
    ScanAllByLabel {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        label: String,
        view: View,
    },
    ScanAllByLabelProperty {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        label: String,
        property: String,
        view: View,
    },
    ScanAllByLabelPropertyValue {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        label: String,
        property: String,
        expression: Expression,
        view: View,
    },
    ScanAllByLabelPropertyRange {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        label: String,
        property: String,
        lower: Option<RangeBound>,
        upper: Option<RangeBound>,
        view: View,
    },
    ScanAllById {
        input: Box<LogicalOperator>,
        output_symbol: Symbol,
        expression: Expression,
        view: View,
    },
    Expand {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        node_symbol: Symbol,
        edge_symbol: Symbol,
        direction: Direction,
        edge_types: Vec<String>,
        existing_node: bool,
        view: View,
    },
    ExpandVariable {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        node_symbol: Symbol,
        edge_symbol: Symbol,
        direction: Direction,
        edge_types: Vec<String>,
        mode: VariableExpandMode,
        lower_bound: Option<Expression>,
        upper_bound: Option<Expression>,
        existing_node: bool,
        is_reverse: bool,
        filter_lambda: Option<ExpansionLambda>,
        weight_lambda: Option<ExpansionLambda>,
        total_weight_symbol: Option<Symbol>,
    },
    ConstructNamedPath {
        input: Box<LogicalOperator>,
        path_symbol: Symbol,
        path_elements: Vec<Symbol>,
    },
    Filter {
        input: Box<LogicalOperator>,
        expression: Expression,
    },
    Produce {
        input: Box<LogicalOperator>,
        named_expressions: Vec<NamedExpression>,
    },
    Delete {
        input: Box<LogicalOperator>,
        expressions: Vec<Expression>,
        detach: bool,
    },
    SetProperty {
        input: Box<LogicalOperator>,
        object: Expression,
        property: String,
        value: Expression,
    },
    SetProperties {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        rhs: Expression,
        op: SetPropertiesOp,
    },
    SetLabels {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        labels: Vec<String>,
    },
    RemoveProperty {
        input: Box<LogicalOperator>,
        object: Expression,
        property: String,
    },
    RemoveLabels {
        input: Box<LogicalOperator>,
        input_symbol: Symbol,
        labels: Vec<String>,
    },
    EdgeUniquenessFilter {
        input: Box<LogicalOperator>,
        expand_symbol: Symbol,
        previous_symbols: Vec<Symbol>,
    },
    Accumulate {
        input: Box<LogicalOperator>,
        symbols: Vec<Symbol>,
        advance_command: bool,
    },
    Aggregate {
        input: Box<LogicalOperator>,
        aggregations: Vec<AggregateElement>,
        group_by: Vec<Expression>,
        remember: Vec<Symbol>,
    },
    Skip {
        input: Box<LogicalOperator>,
        expression: Expression,
    },
    Limit {
        input: Box<LogicalOperator>,
        expression: Expression,
    },
    OrderBy {
        input: Box<LogicalOperator>,
        order_by: Vec<SortItem>,
        output_symbols: Vec<Symbol>,
    },
    Merge {
        input: Box<LogicalOperator>,
        merge_match: Box<LogicalOperator>,
        merge_create: Box<LogicalOperator>,
    },
    Optional {
        input: Box<LogicalOperator>,
        optional: Box<LogicalOperator>,
        optional_symbols: Vec<Symbol>,
    },
    Unwind {
        input: Box<LogicalOperator>,
        expression: Expression,
        output_symbol: Symbol,
    },
    Distinct {
        input: Box<LogicalOperator>,
        value_symbols: Vec<Symbol>,
    },
    Union {
        left: Box<LogicalOperator>,
        right: Box<LogicalOperator>,
        union_symbols: Vec<Symbol>,
        left_symbols: Vec<Symbol>,
        right_symbols: Vec<Symbol>,
    },
    Cartesian {
        left: Box<LogicalOperator>,
        right: Box<LogicalOperator>,
        left_symbols: Vec<Symbol>,
        right_symbols: Vec<Symbol>,
    },
    CallProcedure {
        input: Box<LogicalOperator>,
        name: String,
        arguments: Vec<Expression>,
        result_symbols: Vec<Symbol>,
    },
    LoadCsv {
        input: Box<LogicalOperator>,
        path: Expression,
        with_header: bool,
        delimiter: u8,
        row_symbol: Symbol,
    },
}

impl LogicalOperator {
    /// Builds the cursor tree for this plan.
    pub fn make_cursor(&self) -> Cursor<'_> {
        match self {
            LogicalOperator::Once => Cursor::Once(OnceCursor::new()),
            LogicalOperator::CreateNode { input, node } => {
                Cursor::CreateNode(CreateNodeCursor::new(input.make_cursor(), node))
            }
            LogicalOperator::CreateExpand {
                input,
                input_symbol,
                node,
                edge,
                existing_node,
            } => Cursor::CreateExpand(CreateExpandCursor::new(
                input.make_cursor(),
                *input_symbol,
                node,
                edge,
                *existing_node,
            )),
            LogicalOperator::ScanAll { .. }
            | LogicalOperator::ScanAllByLabel { .. }
            | LogicalOperator::ScanAllByLabelProperty { .. }
            | LogicalOperator::ScanAllByLabelPropertyValue { .. }
            | LogicalOperator::ScanAllByLabelPropertyRange { .. }
            | LogicalOperator::ScanAllById { .. } => Cursor::Scan(ScanCursor::new(self)),
            LogicalOperator::Expand { .. } => Cursor::Expand(ExpandCursor::new(self)),
            LogicalOperator::ExpandVariable { mode, existing_node, .. } => match mode {
                VariableExpandMode::DepthFirst => {
                    Cursor::ExpandVariable(ExpandVariableCursor::new(self))
                }
                VariableExpandMode::BreadthFirst => {
                    if *existing_node {
                        Cursor::StShortestPath(StShortestPathCursor::new(self))
                    } else {
                        Cursor::BreadthFirst(BreadthFirstCursor::new(self))
                    }
                }
                VariableExpandMode::WeightedShortestPath => {
                    Cursor::WeightedShortestPath(WeightedShortestPathCursor::new(self))
                }
            },
            LogicalOperator::ConstructNamedPath {
                input,
                path_symbol,
                path_elements,
            } => Cursor::ConstructNamedPath(ConstructNamedPathCursor::new(
                input.make_cursor(),
                *path_symbol,
                path_elements,
            )),
            LogicalOperator::Filter { input, expression } => {
                Cursor::Filter(FilterCursor::new(input.make_cursor(), expression))
            }
            LogicalOperator::Produce {
                input,
                named_expressions,
            } => Cursor::Produce(ProduceCursor::new(input.make_cursor(), named_expressions)),
            LogicalOperator::Delete {
                input,
                expressions,
                detach,
            } => Cursor::Delete(DeleteCursor::new(input.make_cursor(), expressions, *detach)),
            LogicalOperator::SetProperty {
                input,
                object,
                property,
                value,
            } => Cursor::SetProperty(SetPropertyCursor::new(
                input.make_cursor(),
                object,
                property,
                value,
            )),
            LogicalOperator::SetProperties {
                input,
                input_symbol,
                rhs,
                op,
            } => Cursor::SetProperties(SetPropertiesCursor::new(
                input.make_cursor(),
                *input_symbol,
                rhs,
                *op,
            )),
            LogicalOperator::SetLabels {
                input,
                input_symbol,
                labels,
            } => Cursor::SetLabels(SetLabelsCursor::new(input.make_cursor(), *input_symbol, labels)),
            LogicalOperator::RemoveProperty {
                input,
                object,
                property,
            } => Cursor::RemoveProperty(RemovePropertyCursor::new(
                input.make_cursor(),
                object,
                property,
            )),
            LogicalOperator::RemoveLabels {
                input,
                input_symbol,
                labels,
            } => Cursor::RemoveLabels(RemoveLabelsCursor::new(
                input.make_cursor(),
                *input_symbol,
                labels,
            )),
            LogicalOperator::EdgeUniquenessFilter {
                input,
                expand_symbol,
                previous_symbols,
            } => Cursor::EdgeUniquenessFilter(EdgeUniquenessFilterCursor::new(
                input.make_cursor(),
                *expand_symbol,
                previous_symbols,
            )),
            LogicalOperator::Accumulate {
                input,
                symbols,
                advance_command,
            } => Cursor::Accumulate(AccumulateCursor::new(
                input.make_cursor(),
                symbols,
                *advance_command,
            )),
            LogicalOperator::Aggregate {
                input,
                aggregations,
                group_by,
                remember,
            } => Cursor::Aggregate(AggregateCursor::new(
                input.make_cursor(),
                aggregations,
                group_by,
                remember,
            )),
            LogicalOperator::Skip { input, expression } => {
                Cursor::Skip(SkipCursor::new(input.make_cursor(), expression))
            }
            LogicalOperator::Limit { input, expression } => {
                Cursor::Limit(LimitCursor::new(input.make_cursor(), expression))
            }
            LogicalOperator::OrderBy {
                input,
                order_by,
                output_symbols,
            } => Cursor::OrderBy(OrderByCursor::new(
                input.make_cursor(),
                order_by,
                output_symbols,
            )),
            LogicalOperator::Merge {
                input,
                merge_match,
                merge_create,
            } => Cursor::Merge(MergeCursor::new(
                input.make_cursor(),
                merge_match.make_cursor(),
                merge_create.make_cursor(),
            )),
            LogicalOperator::Optional {
                input,
                optional,
                optional_symbols,
            } => Cursor::Optional(OptionalCursor::new(
                input.make_cursor(),
                optional.make_cursor(),
                optional_symbols,
            )),
            LogicalOperator::Unwind {
                input,
                expression,
                output_symbol,
            } => Cursor::Unwind(UnwindCursor::new(input.make_cursor(), expression, *output_symbol)),
            LogicalOperator::Distinct {
                input,
                value_symbols,
            } => Cursor::Distinct(DistinctCursor::new(input.make_cursor(), value_symbols)),
            LogicalOperator::Union {
                left,
                right,
                union_symbols,
                left_symbols,
                right_symbols,
            } => Cursor::Union(UnionCursor::new(
                left.make_cursor(),
                right.make_cursor(),
                union_symbols,
                left_symbols,
                right_symbols,
            )),
            LogicalOperator::Cartesian {
                left,
                right,
                left_symbols,
                right_symbols,
            } => Cursor::Cartesian(CartesianCursor::new(
                left.make_cursor(),
                right.make_cursor(),
                left_symbols,
                right_symbols,
            )),
            LogicalOperator::CallProcedure {
                input,
                name,
                arguments,
                result_symbols,
            } => Cursor::CallProcedure(CallProcedureCursor::new(
                input.make_cursor(),
                name,
                arguments,
                result_symbols,
            )),
            LogicalOperator::LoadCsv {
                input,
                path,
                with_header,
                delimiter,
                row_symbol,
            } => Cursor::LoadCsv(LoadCsvCursor::new(
                input.make_cursor(),
                path,
                *with_header,
                *delimiter,
                *row_symbol,
            )),
        }
    }

    /// Symbols this subtree writes to the frame.
    pub fn modified_symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        self.collect_modified(&mut symbols);
        symbols.dedup();
        symbols
    }

    fn collect_modified(&self, out: &mut Vec<Symbol>) {
        match self {
            LogicalOperator::Once => {}
            LogicalOperator::CreateNode { input, node } => {
                input.collect_modified(out);
                out.push(node.symbol);
            }
            LogicalOperator::CreateExpand {
                input, node, edge, ..
            } => {
                input.collect_modified(out);
                out.push(node.symbol);
                out.push(edge.symbol);
            }
            LogicalOperator::ScanAll {
                input,
                output_symbol,
                ..
            }
            | LogicalOperator::ScanAllByLabel {
                input,
                output_symbol,
                ..
            }
            | LogicalOperator::ScanAllByLabelProperty {
                input,
                output_symbol,
                ..
            }
            | LogicalOperator::ScanAllByLabelPropertyValue {
                input,
                output_symbol,
                ..
            }
            | LogicalOperator::ScanAllByLabelPropertyRange {
                input,
                output_symbol,
                ..
            }
            | LogicalOperator::ScanAllById {
                input,
                output_symbol,
                ..
            } => {
                input.collect_modified(out);
                out.push(*output_symbol);
            }
            LogicalOperator::Expand {
                input,
                node_symbol,
                edge_symbol,
                ..
            } => {
                input.collect_modified(out);
                out.push(*node_symbol);
                out.push(*edge_symbol);
            }
            LogicalOperator::ExpandVariable {
                input,
                node_symbol,
                edge_symbol,
                total_weight_symbol,
                ..
            } => {
                input.collect_modified(out);
                out.push(*node_symbol);
                out.push(*edge_symbol);
                if let Some(symbol) = total_weight_symbol {
                    out.push(*symbol);
                }
            }
            LogicalOperator::ConstructNamedPath {
                input, path_symbol, ..
            } => {
                input.collect_modified(out);
                out.push(*path_symbol);
            }
            LogicalOperator::Filter { input, .. }
            | LogicalOperator::Delete { input, .. }
            | LogicalOperator::SetProperty { input, .. }
            | LogicalOperator::SetProperties { input, .. }
            | LogicalOperator::SetLabels { input, .. }
            | LogicalOperator::RemoveProperty { input, .. }
            | LogicalOperator::RemoveLabels { input, .. }
            | LogicalOperator::EdgeUniquenessFilter { input, .. }
            | LogicalOperator::Accumulate { input, .. }
            | LogicalOperator::Skip { input, .. }
            | LogicalOperator::Limit { input, .. }
            | LogicalOperator::OrderBy { input, .. }
            | LogicalOperator::Distinct { input, .. } => input.collect_modified(out),
            LogicalOperator::Produce {
                input,
                named_expressions,
            } => {
                input.collect_modified(out);
                for named in named_expressions {
                    out.push(named.symbol);
                }
            }
            LogicalOperator::Aggregate {
                input,
                aggregations,
                remember,
                ..
            } => {
                input.collect_modified(out);
                for aggregation in aggregations {
                    out.push(aggregation.output_symbol);
                }
                out.extend(remember.iter().copied());
            }
            LogicalOperator::Merge {
                input,
                merge_match,
                merge_create,
            } => {
                input.collect_modified(out);
                merge_match.collect_modified(out);
                merge_create.collect_modified(out);
            }
            LogicalOperator::Optional {
                input, optional, ..
            } => {
                input.collect_modified(out);
                optional.collect_modified(out);
            }
            LogicalOperator::Unwind {
                input,
                output_symbol,
                ..
            } => {
                input.collect_modified(out);
                out.push(*output_symbol);
            }
            LogicalOperator::Union { union_symbols, .. } => {
                out.extend(union_symbols.iter().copied());
            }
            LogicalOperator::Cartesian { left, right, .. } => {
                left.collect_modified(out);
                right.collect_modified(out);
            }
            LogicalOperator::CallProcedure {
                input,
                result_symbols,
                ..
            } => {
                input.collect_modified(out);
                out.extend(result_symbols.iter().copied());
            }
            LogicalOperator::LoadCsv {
                input, row_symbol, ..
            } => {
                input.collect_modified(out);
                out.push(*row_symbol);
            }
        }
    }
}

/// Cursor over one operator; the variants carry their per-operator state.
pub enum Cursor<'p> {
    Once(OnceCursor),
    CreateNode(CreateNodeCursor<'p>),
    CreateExpand(CreateExpandCursor<'p>),
    Scan(ScanCursor<'p>),
    Expand(ExpandCursor<'p>),
    ExpandVariable(ExpandVariableCursor<'p>),
    BreadthFirst(BreadthFirstCursor<'p>),
    StShortestPath(StShortestPathCursor<'p>),
    WeightedShortestPath(WeightedShortestPathCursor<'p>),
    ConstructNamedPath(ConstructNamedPathCursor<'p>),
    Filter(FilterCursor<'p>),
    Produce(ProduceCursor<'p>),
    Delete(DeleteCursor<'p>),
    SetProperty(SetPropertyCursor<'p>),
    SetProperties(SetPropertiesCursor<'p>),
    SetLabels(SetLabelsCursor<'p>),
    RemoveProperty(RemovePropertyCursor<'p>),
    RemoveLabels(RemoveLabelsCursor<'p>),
    EdgeUniquenessFilter(EdgeUniquenessFilterCursor<'p>),
    Accumulate(AccumulateCursor<'p>),
    Aggregate(AggregateCursor<'p>),
    Skip(SkipCursor<'p>),
    Limit(LimitCursor<'p>),
    OrderBy(OrderByCursor<'p>),
    Merge(MergeCursor<'p>),
    Optional(OptionalCursor<'p>),
    Unwind(UnwindCursor<'p>),
    Distinct(DistinctCursor<'p>),
    Union(UnionCursor<'p>),
    Cartesian(CartesianCursor<'p>),
    CallProcedure(CallProcedureCursor<'p>),
    LoadCsv(LoadCsvCursor<'p>),
}

impl<'p> Cursor<'p> {
    /// Fills the frame with the next tuple, or returns `false` on
    /// exhaustion.
    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        match self {
            Cursor::Once(cursor) => cursor.pull(frame, ctx),
            Cursor::CreateNode(cursor) => cursor.pull(frame, ctx),
            Cursor::CreateExpand(cursor) => cursor.pull(frame, ctx),
            Cursor::Scan(cursor) => cursor.pull(frame, ctx),
            Cursor::Expand(cursor) => cursor.pull(frame, ctx),
            Cursor::ExpandVariable(cursor) => cursor.pull(frame, ctx),
            Cursor::BreadthFirst(cursor) => cursor.pull(frame, ctx),
            Cursor::StShortestPath(cursor) => cursor.pull(frame, ctx),
            Cursor::WeightedShortestPath(cursor) => cursor.pull(frame, ctx),
            Cursor::ConstructNamedPath(cursor) => cursor.pull(frame, ctx),
            Cursor::Filter(cursor) => cursor.pull(frame, ctx),
            Cursor::Produce(cursor) => cursor.pull(frame, ctx),
            Cursor::Delete(cursor) => cursor.pull(frame, ctx),
            Cursor::SetProperty(cursor) => cursor.pull(frame, ctx),
            Cursor::SetProperties(cursor) => cursor.pull(frame, ctx),
            Cursor::SetLabels(cursor) => cursor.pull(frame, ctx),
            Cursor::RemoveProperty(cursor) => cursor.pull(frame, ctx),
            Cursor::RemoveLabels(cursor) => cursor.pull(frame, ctx),
            Cursor::EdgeUniquenessFilter(cursor) => cursor.pull(frame, ctx),
            Cursor::Accumulate(cursor) => cursor.pull(frame, ctx),
            Cursor::Aggregate(cursor) => cursor.pull(frame, ctx),
            Cursor::Skip(cursor) => cursor.pull(frame, ctx),
            Cursor::Limit(cursor) => cursor.pull(frame, ctx),
            Cursor::OrderBy(cursor) => cursor.pull(frame, ctx),
            Cursor::Merge(cursor) => cursor.pull(frame, ctx),
            Cursor::Optional(cursor) => cursor.pull(frame, ctx),
            Cursor::Unwind(cursor) => cursor.pull(frame, ctx),
            Cursor::Distinct(cursor) => cursor.pull(frame, ctx),
            Cursor::Union(cursor) => cursor.pull(frame, ctx),
            Cursor::Cartesian(cursor) => cursor.pull(frame, ctx),
            Cursor::CallProcedure(cursor) => cursor.pull(frame, ctx),
            Cursor::LoadCsv(cursor) => cursor.pull(frame, ctx),
        }
    }

    /// Rewinds the cursor to its initial state.
    pub fn reset(&mut self) {
        match self {
            Cursor::Once(cursor) => cursor.reset(),
            Cursor::CreateNode(cursor) => cursor.reset(),
            Cursor::CreateExpand(cursor) => cursor.reset(),
            Cursor::Scan(cursor) => cursor.reset(),
            Cursor::Expand(cursor) => cursor.reset(),
            Cursor::ExpandVariable(cursor) => cursor.reset(),
            Cursor::BreadthFirst(cursor) => cursor.reset(),
            Cursor::StShortestPath(cursor) => cursor.reset(),
            Cursor::WeightedShortestPath(cursor) => cursor.reset(),
            Cursor::ConstructNamedPath(cursor) => cursor.reset(),
            Cursor::Filter(cursor) => cursor.reset(),
            Cursor::Produce(cursor) => cursor.reset(),
            Cursor::Delete(cursor) => cursor.reset(),
            Cursor::SetProperty(cursor) => cursor.reset(),
            Cursor::SetProperties(cursor) => cursor.reset(),
            Cursor::SetLabels(cursor) => cursor.reset(),
            Cursor::RemoveProperty(cursor) => cursor.reset(),
            Cursor::RemoveLabels(cursor) => cursor.reset(),
            Cursor::EdgeUniquenessFilter(cursor) => cursor.reset(),
            Cursor::Accumulate(cursor) => cursor.reset(),
            Cursor::Aggregate(cursor) => cursor.reset(),
            Cursor::Skip(cursor) => cursor.reset(),
            Cursor::Limit(cursor) => cursor.reset(),
            Cursor::OrderBy(cursor) => cursor.reset(),
            Cursor::Merge(cursor) => cursor.reset(),
            Cursor::Optional(cursor) => cursor.reset(),
            Cursor::Unwind(cursor) => cursor.reset(),
            Cursor::Distinct(cursor) => cursor.reset(),
            Cursor::Union(cursor) => cursor.reset(),
            Cursor::Cartesian(cursor) => cursor.reset(),
            Cursor::CallProcedure(cursor) => cursor.reset(),
            Cursor::LoadCsv(cursor) => cursor.reset(),
        }
    }

    /// Releases cursor-held state; called once when execution finishes,
    /// successfully or not.
    pub fn shutdown(&mut self) {
        match self {
            Cursor::Once(cursor) => cursor.shutdown(),
            Cursor::CreateNode(cursor) => cursor.shutdown(),
            Cursor::CreateExpand(cursor) => cursor.shutdown(),
            Cursor::Scan(cursor) => cursor.shutdown(),
            Cursor::Expand(cursor) => cursor.shutdown(),
            Cursor::ExpandVariable(cursor) => cursor.shutdown(),
            Cursor::BreadthFirst(cursor) => cursor.shutdown(),
            Cursor::StShortestPath(cursor) => cursor.shutdown(),
            Cursor::WeightedShortestPath(cursor) => cursor.shutdown(),
            Cursor::ConstructNamedPath(cursor) => cursor.shutdown(),
            Cursor::Filter(cursor) => cursor.shutdown(),
            Cursor::Produce(cursor) => cursor.shutdown(),
            Cursor::Delete(cursor) => cursor.shutdown(),
            Cursor::SetProperty(cursor) => cursor.shutdown(),
            Cursor::SetProperties(cursor) => cursor.shutdown(),
            Cursor::SetLabels(cursor) => cursor.shutdown(),
            Cursor::RemoveProperty(cursor) => cursor.shutdown(),
            Cursor::RemoveLabels(cursor) => cursor.shutdown(),
            Cursor::EdgeUniquenessFilter(cursor) => cursor.shutdown(),
            Cursor::Accumulate(cursor) => cursor.shutdown(),
            Cursor::Aggregate(cursor) => cursor.shutdown(),
            Cursor::Skip(cursor) => cursor.shutdown(),
            Cursor::Limit(cursor) => cursor.shutdown(),
            Cursor::OrderBy(cursor) => cursor.shutdown(),
            Cursor::Merge(cursor) => cursor.shutdown(),
            Cursor::Optional(cursor) => cursor.shutdown(),
            Cursor::Unwind(cursor) => cursor.shutdown(),
            Cursor::Distinct(cursor) => cursor.shutdown(),
            Cursor::Union(cursor) => cursor.shutdown(),
            Cursor::Cartesian(cursor) => cursor.shutdown(),
            Cursor::CallProcedure(cursor) => cursor.shutdown(),
            Cursor::LoadCsv(cursor) => cursor.shutdown(),
        }
    }
}

/// Runs a plan to completion, collecting the named output columns of the
/// topmost `Produce`. The small driver the session layer builds on.
pub fn collect_results(
    plan: &LogicalOperator,
    frame_size: usize,
    ctx: &ExecutionContext<'_>,
    output: &[(String, Symbol)],
) -> QueryResult<Vec<BTreeMap<String, crate::query::value::QueryValue>>> {
    let mut cursor = plan.make_cursor();
    let mut frame = Frame::new(frame_size);
    let mut rows = Vec::new();
    loop {
        match cursor.pull(&mut frame, ctx) {
            Ok(true) => {
                let mut row = BTreeMap::new();
                for (name, symbol) in output {
                    row.insert(name.clone(), frame.get(*symbol).clone());
                }
                rows.push(row);
            }
            Ok(false) => break,
            Err(err) => {
                cursor.shutdown();
                return Err(err);
            }
        }
    }
    cursor.shutdown();
    Ok(rows)
}
