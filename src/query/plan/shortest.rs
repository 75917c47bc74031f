//! Shortest-path expansion cursors: single-source BFS, bidirectional
//! source-to-sink BFS and weighted shortest path (Dijkstra).

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::QueryValue;
use crate::storage::accessor::{Direction, EdgeAccessor, VertexAccessor};
use crate::types::{Gid, View};

use super::expand::{
    eval_bound, expand_pairs, lambda_accepts, resolve_edge_types, source_vertex,
};
use super::{Cursor, ExpansionLambda, LogicalOperator};

fn reverse_direction(direction: Direction) -> Direction {
    match direction {
        Direction::In => Direction::Out,
        Direction::Out => Direction::In,
        Direction::Both => Direction::Both,
    }
}

/// Walks a parent map back to the root, returning edges in root-to-vertex
/// order.
fn reconstruct(
    parents: &HashMap<Gid, Option<(EdgeAccessor, Gid)>>,
    mut current: Gid,
) -> Vec<EdgeAccessor> {
    let mut edges = Vec::new();
    while let Some(Some((edge, previous))) = parents.get(&current) {
        edges.push(edge.clone());
        current = *previous;
    }
    edges.reverse();
    edges
}

fn write_edges(frame: &mut Frame, symbol: Symbol, edges: &[EdgeAccessor], is_reverse: bool) {
    let mut list: Vec<QueryValue> = edges
        .iter()
        .map(|edge| QueryValue::Edge(edge.clone()))
        .collect();
    if is_reverse {
        list.reverse();
    }
    frame.set(symbol, QueryValue::List(list));
}

/// Single-source breadth-first expansion: each reachable sink is yielded
/// once, with the shortest edge path that reached it.
pub struct BreadthFirstCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node_symbol: Symbol,
    edge_symbol: Symbol,
    direction: Direction,
    edge_types: &'p [String],
    lower_bound: Option<&'p Expression>,
    upper_bound: Option<&'p Expression>,
    is_reverse: bool,
    filter_lambda: Option<&'p ExpansionLambda>,
    pending: VecDeque<(Vec<EdgeAccessor>, VertexAccessor)>,
}

impl<'p> BreadthFirstCursor<'p> {
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
            is_reverse,
            filter_lambda,
            ..
        } = op
        else {
            unreachable!("BreadthFirstCursor expects an ExpandVariable operator")
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
            is_reverse: *is_reverse,
            filter_lambda: filter_lambda.as_ref(),
            pending: VecDeque::new(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some((edges, sink)) = self.pending.pop_front() {
                write_edges(frame, self.edge_symbol, &edges, self.is_reverse);
                frame.set(self.node_symbol, QueryValue::Vertex(sink));
                return Ok(true);
            }
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
            self.traverse(frame, ctx, source, lower, upper)?;
        }
    }

    fn traverse(
        &mut self,
        frame: &mut Frame,
        ctx: &ExecutionContext<'_>,
        source: VertexAccessor,
        lower: u64,
        upper: u64,
    ) -> QueryResult<()> {
        let edge_types = resolve_edge_types(ctx, self.edge_types);
        let mut parents: HashMap<Gid, Option<(EdgeAccessor, Gid)>> = HashMap::new();
        parents.insert(source.gid(), None);
        if lower == 0 {
            self.pending.push_back((Vec::new(), source.clone()));
        }
        let mut queue: VecDeque<(VertexAccessor, u64)> = VecDeque::new();
        queue.push_back((source, 0));
        while let Some((vertex, depth)) = queue.pop_front() {
            if depth >= upper {
                continue;
            }
            for (edge, next) in
                expand_pairs(&vertex, self.direction, edge_types.as_ref(), View::Old)?
            {
                ctx.check_abort()?;
                if parents.contains_key(&next.gid()) {
                    continue;
                }
                if !lambda_accepts(self.filter_lambda, frame, ctx, &edge, &next)? {
                    continue;
                }
                parents.insert(next.gid(), Some((edge, vertex.gid())));
                if depth + 1 >= lower {
                    self.pending
                        .push_back((reconstruct(&parents, next.gid()), next.clone()));
                }
                queue.push_back((next, depth + 1));
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.pending.clear();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.pending.clear();
    }
}

/// Source-to-sink BFS used when the sink symbol is already bound:
/// bidirectional search expanding the smaller frontier, reconstructing one
/// shortest path on the meeting vertex.
pub struct StShortestPathCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node_symbol: Symbol,
    edge_symbol: Symbol,
    direction: Direction,
    edge_types: &'p [String],
    lower_bound: Option<&'p Expression>,
    upper_bound: Option<&'p Expression>,
    is_reverse: bool,
    filter_lambda: Option<&'p ExpansionLambda>,
}

impl<'p> StShortestPathCursor<'p> {
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
            is_reverse,
            filter_lambda,
            ..
        } = op
        else {
            unreachable!("StShortestPathCursor expects an ExpandVariable operator")
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
            is_reverse: *is_reverse,
            filter_lambda: filter_lambda.as_ref(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let Some(source) = source_vertex(frame, self.input_symbol)? else {
                continue;
            };
            let QueryValue::Vertex(sink) = frame.get(self.node_symbol).clone() else {
                continue;
            };
            let lower = eval_bound(self.lower_bound, 1, frame, ctx)?;
            let upper = eval_bound(self.upper_bound, u64::MAX, frame, ctx)?;
            if upper < lower {
                continue;
            }
            if source == sink {
                if lower == 0 {
                    write_edges(frame, self.edge_symbol, &[], self.is_reverse);
                    return Ok(true);
                }
                continue;
            }
            if let Some(edges) = self.search(frame, ctx, &source, &sink, lower, upper)? {
                write_edges(frame, self.edge_symbol, &edges, self.is_reverse);
                return Ok(true);
            }
        }
    }

    fn search(
        &self,
        frame: &mut Frame,
        ctx: &ExecutionContext<'_>,
        source: &VertexAccessor,
        sink: &VertexAccessor,
        lower: u64,
        upper: u64,
    ) -> QueryResult<Option<Vec<EdgeAccessor>>> {
        let edge_types = resolve_edge_types(ctx, self.edge_types);
        // Forward state rooted at the source, backward state rooted at the
        // sink traversing edges against the expansion direction.
        let mut forward: HashMap<Gid, Option<(EdgeAccessor, Gid)>> = HashMap::new();
        let mut backward: HashMap<Gid, Option<(EdgeAccessor, Gid)>> = HashMap::new();
        forward.insert(source.gid(), None);
        backward.insert(sink.gid(), None);
        let mut forward_frontier = vec![source.clone()];
        let mut backward_frontier = vec![sink.clone()];
        let mut forward_depth = 0u64;
        let mut backward_depth = 0u64;

        while !forward_frontier.is_empty() && !backward_frontier.is_empty() {
            if forward_depth + backward_depth >= upper {
                return Ok(None);
            }
            let expand_forward = forward_frontier.len() <= backward_frontier.len();
            let (frontier, own, other, direction) = if expand_forward {
                forward_depth += 1;
                (
                    std::mem::take(&mut forward_frontier),
                    &mut forward,
                    &backward,
                    self.direction,
                )
            } else {
                backward_depth += 1;
                (
                    std::mem::take(&mut backward_frontier),
                    &mut backward,
                    &forward,
                    reverse_direction(self.direction),
                )
            };
            let mut next_frontier = Vec::new();
            let mut meeting: Option<Gid> = None;
            for vertex in frontier {
                for (edge, next) in expand_pairs(&vertex, direction, edge_types.as_ref(), View::Old)?
                {
                    ctx.check_abort()?;
                    if own.contains_key(&next.gid()) {
                        continue;
                    }
                    if !lambda_accepts(self.filter_lambda, frame, ctx, &edge, &next)? {
                        continue;
                    }
                    own.insert(next.gid(), Some((edge, vertex.gid())));
                    if other.contains_key(&next.gid()) {
                        meeting = Some(next.gid());
                        break;
                    }
                    next_frontier.push(next);
                }
                if meeting.is_some() {
                    break;
                }
            }
            if let Some(meeting) = meeting {
                let mut edges = reconstruct(&forward, meeting);
                let mut back_edges = reconstruct(&backward, meeting);
                back_edges.reverse();
                edges.extend(back_edges);
                let length = edges.len() as u64;
                if length < lower || length > upper {
                    return Ok(None);
                }
                return Ok(Some(edges));
            }
            if expand_forward {
                forward_frontier = next_frontier;
            } else {
                backward_frontier = next_frontier;
            }
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

/// Accumulated path weight: ordered as a double, reported as an int while
/// every edge weight was an int.
#[derive(Copy, Clone, Debug)]
struct PathWeight {
    total: f64,
    int_total: Option<i64>,
}

impl PathWeight {
    fn zero() -> Self {
        Self {
            total: 0.0,
            int_total: Some(0),
        }
    }

    fn plus(self, weight: &QueryValue) -> Option<Self> {
        match weight {
            QueryValue::Int(value) => Some(Self {
                total: self.total + *value as f64,
                int_total: self.int_total.and_then(|total| total.checked_add(*value)),
            }),
            QueryValue::Double(value) => Some(Self {
                total: self.total + *value,
                int_total: None,
            }),
            _ => None,
        }
    }

    fn as_value(&self) -> QueryValue {
        match self.int_total {
            Some(total) => QueryValue::Int(total),
            None => QueryValue::Double(self.total),
        }
    }
}

struct HeapItem {
    weight: PathWeight,
    depth: u64,
    vertex: VertexAccessor,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    // Reversed so the std max-heap pops the lightest path first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .weight
            .total
            .total_cmp(&self.weight.total)
            .then_with(|| other.depth.cmp(&self.depth))
    }
}

/// Weighted shortest path: Dijkstra ordered by the accumulated weight of a
/// non-negative weight lambda. Without an upper bound the depth is
/// unbounded; only the weight discipline limits the search.
pub struct WeightedShortestPathCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node_symbol: Symbol,
    edge_symbol: Symbol,
    direction: Direction,
    edge_types: &'p [String],
    upper_bound: Option<&'p Expression>,
    existing_node: bool,
    is_reverse: bool,
    filter_lambda: Option<&'p ExpansionLambda>,
    weight_lambda: Option<&'p ExpansionLambda>,
    total_weight_symbol: Option<Symbol>,
    pending: VecDeque<(Vec<EdgeAccessor>, VertexAccessor, PathWeight)>,
}

impl<'p> WeightedShortestPathCursor<'p> {
    pub(super) fn new(op: &'p LogicalOperator) -> Self {
        let LogicalOperator::ExpandVariable {
            input,
            input_symbol,
            node_symbol,
            edge_symbol,
            direction,
            edge_types,
            upper_bound,
            existing_node,
            is_reverse,
            filter_lambda,
            weight_lambda,
            total_weight_symbol,
            ..
        } = op
        else {
            unreachable!("WeightedShortestPathCursor expects an ExpandVariable operator")
        };
        Self {
            input: Box::new(input.make_cursor()),
            input_symbol: *input_symbol,
            node_symbol: *node_symbol,
            edge_symbol: *edge_symbol,
            direction: *direction,
            edge_types,
            upper_bound: upper_bound.as_ref(),
            existing_node: *existing_node,
            is_reverse: *is_reverse,
            filter_lambda: filter_lambda.as_ref(),
            weight_lambda: weight_lambda.as_ref(),
            total_weight_symbol: *total_weight_symbol,
            pending: VecDeque::new(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some((edges, sink, weight)) = self.pending.pop_front() {
                write_edges(frame, self.edge_symbol, &edges, self.is_reverse);
                if !self.existing_node {
                    frame.set(self.node_symbol, QueryValue::Vertex(sink));
                }
                if let Some(symbol) = self.total_weight_symbol {
                    frame.set(symbol, weight.as_value());
                }
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let Some(source) = source_vertex(frame, self.input_symbol)? else {
                continue;
            };
            let upper = match self.upper_bound {
                Some(expression) => Some(eval_bound(Some(expression), u64::MAX, frame, ctx)?),
                None => None,
            };
            self.dijkstra(frame, ctx, source, upper)?;
        }
    }

    fn dijkstra(
        &mut self,
        frame: &mut Frame,
        ctx: &ExecutionContext<'_>,
        source: VertexAccessor,
        upper: Option<u64>,
    ) -> QueryResult<()> {
        let edge_types = resolve_edge_types(ctx, self.edge_types);
        let bound_sink = if self.existing_node {
            match frame.get(self.node_symbol) {
                QueryValue::Vertex(sink) => Some(sink.clone()),
                _ => return Ok(()),
            }
        } else {
            None
        };
        let source_gid = source.gid();
        let mut best: HashMap<Gid, f64> = HashMap::new();
        let mut parents: HashMap<Gid, Option<(EdgeAccessor, Gid)>> = HashMap::new();
        let mut settled: HashSet<Gid> = HashSet::new();
        let mut heap = BinaryHeap::new();
        best.insert(source_gid, 0.0);
        parents.insert(source_gid, None);
        heap.push(HeapItem {
            weight: PathWeight::zero(),
            depth: 0,
            vertex: source,
        });
        while let Some(HeapItem {
            weight,
            depth,
            vertex,
        }) = heap.pop()
        {
            ctx.check_abort()?;
            // A vertex is yielded at most once, at its lightest path.
            if !settled.insert(vertex.gid()) {
                continue;
            }
            if vertex.gid() != source_gid {
                let matches_sink = bound_sink
                    .as_ref()
                    .map_or(true, |sink| *sink == vertex);
                if matches_sink {
                    self.pending
                        .push_back((reconstruct(&parents, vertex.gid()), vertex.clone(), weight));
                }
            }
            if upper.is_some_and(|upper| depth >= upper) {
                continue;
            }
            for (edge, next) in
                expand_pairs(&vertex, self.direction, edge_types.as_ref(), View::Old)?
            {
                ctx.check_abort()?;
                if settled.contains(&next.gid()) {
                    continue;
                }
                if !lambda_accepts(self.filter_lambda, frame, ctx, &edge, &next)? {
                    continue;
                }
                let step = self.edge_weight(frame, ctx, &edge, &next)?;
                let Some(next_weight) = weight.plus(&step) else {
                    return Err(QueryError::RuntimeType(format!(
                        "path weight must be a number, got {}",
                        step.type_name()
                    )));
                };
                let improves = best
                    .get(&next.gid())
                    .map_or(true, |known| next_weight.total < *known);
                if improves {
                    best.insert(next.gid(), next_weight.total);
                    parents.insert(next.gid(), Some((edge, vertex.gid())));
                    heap.push(HeapItem {
                        weight: next_weight,
                        depth: depth + 1,
                        vertex: next,
                    });
                }
            }
        }
        Ok(())
    }

    fn edge_weight(
        &self,
        frame: &mut Frame,
        ctx: &ExecutionContext<'_>,
        edge: &EdgeAccessor,
        vertex: &VertexAccessor,
    ) -> QueryResult<QueryValue> {
        let Some(lambda) = self.weight_lambda else {
            return Ok(QueryValue::Int(1));
        };
        frame.set(lambda.inner_edge, QueryValue::Edge(edge.clone()));
        frame.set(lambda.inner_vertex, QueryValue::Vertex(vertex.clone()));
        let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
        let weight = evaluator.eval(&lambda.expression)?;
        match &weight {
            QueryValue::Int(value) if *value < 0 => {
                Err(QueryError::RuntimeType("path weight must not be negative".into()))
            }
            QueryValue::Double(value) if *value < 0.0 => {
                Err(QueryError::RuntimeType("path weight must not be negative".into()))
            }
            QueryValue::Int(_) | QueryValue::Double(_) => Ok(weight),
            other => Err(QueryError::RuntimeType(format!(
                "path weight must be a number, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.pending.clear();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.pending.clear();
    }
}
