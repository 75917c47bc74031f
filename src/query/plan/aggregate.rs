//! Materializing operators: accumulation, aggregation, ordering, paging and
//! duplicate elimination.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::{QueryValue, RowKey};
use crate::types::View;

use super::{AggregateElement, AggregationOp, Cursor, SortDirection, SortItem};

/// Materializes every input tuple before emitting any, optionally advancing
/// the command counter so downstream operators observe the writes of the
/// input subtree.
pub struct AccumulateCursor<'p> {
    input: Box<Cursor<'p>>,
    symbols: &'p [Symbol],
    advance_command: bool,
    materialized: bool,
    rows: std::vec::IntoIter<Vec<QueryValue>>,
}

impl<'p> AccumulateCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, symbols: &'p [Symbol], advance_command: bool) -> Self {
        Self {
            input: Box::new(input),
            symbols,
            advance_command,
            materialized: false,
            rows: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.materialized {
            let mut rows = Vec::new();
            while self.input.pull(frame, ctx)? {
                ctx.check_abort()?;
                rows.push(frame.collect(self.symbols));
            }
            if self.advance_command {
                ctx.accessor.advance_command();
            }
            self.rows = rows.into_iter();
            self.materialized = true;
        }
        ctx.check_abort()?;
        match self.rows.next() {
            Some(row) => {
                frame.restore(self.symbols, &row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.materialized = false;
        self.rows = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.rows = Vec::new().into_iter();
    }
}

enum AggState {
    Count(i64),
    Sum(Option<QueryValue>),
    Avg { sum: f64, count: i64 },
    Min(Option<QueryValue>),
    Max(Option<QueryValue>),
    List(Vec<QueryValue>),
    Map(BTreeMap<String, QueryValue>),
}

impl AggState {
    fn new(op: AggregationOp) -> Self {
        match op {
            AggregationOp::Count => AggState::Count(0),
            AggregationOp::Sum => AggState::Sum(None),
            AggregationOp::Avg => AggState::Avg { sum: 0.0, count: 0 },
            AggregationOp::Min => AggState::Min(None),
            AggregationOp::Max => AggState::Max(None),
            AggregationOp::CollectList => AggState::List(Vec::new()),
            AggregationOp::CollectMap => AggState::Map(BTreeMap::new()),
        }
    }

    fn update(&mut self, value: Option<QueryValue>, key: Option<QueryValue>) -> QueryResult<()> {
        match self {
            AggState::Count(count) => {
                let counts = match &value {
                    None => true,
                    Some(value) => !value.is_null(),
                };
                if counts {
                    *count += 1;
                }
            }
            AggState::Sum(total) => {
                let Some(value) = value else { return Ok(()) };
                if value.is_null() {
                    return Ok(());
                }
                ensure_numeric(&value, "SUM")?;
                *total = Some(match total.take() {
                    None => value,
                    Some(current) => numeric_add(current, value),
                });
            }
            AggState::Avg { sum, count } => {
                let Some(value) = value else { return Ok(()) };
                if value.is_null() {
                    return Ok(());
                }
                ensure_numeric(&value, "AVG")?;
                if let Some(number) = value.as_number() {
                    *sum += number;
                    *count += 1;
                }
            }
            AggState::Min(best) => {
                let Some(value) = value else { return Ok(()) };
                if value.is_null() {
                    return Ok(());
                }
                ensure_ordered(&value, "MIN")?;
                *best = Some(match best.take() {
                    None => value,
                    Some(current) => {
                        if agg_cmp(&value, &current)? == Ordering::Less {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            AggState::Max(best) => {
                let Some(value) = value else { return Ok(()) };
                if value.is_null() {
                    return Ok(());
                }
                ensure_ordered(&value, "MAX")?;
                *best = Some(match best.take() {
                    None => value,
                    Some(current) => {
                        if agg_cmp(&value, &current)? == Ordering::Greater {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            AggState::List(items) => {
                let Some(value) = value else { return Ok(()) };
                if !value.is_null() {
                    items.push(value);
                }
            }
            AggState::Map(entries) => {
                let (Some(value), Some(key)) = (value, key) else {
                    return Ok(());
                };
                match key {
                    QueryValue::Null => {}
                    QueryValue::String(key) => {
                        if !value.is_null() {
                            entries.insert(key, value);
                        }
                    }
                    other => {
                        return Err(QueryError::RuntimeType(format!(
                            "COLLECT_MAP key must be a string, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> QueryValue {
        match self {
            AggState::Count(count) => QueryValue::Int(count),
            AggState::Sum(total) => total.unwrap_or(QueryValue::Null),
            AggState::Avg { sum, count } => {
                if count == 0 {
                    QueryValue::Null
                } else {
                    QueryValue::Double(sum / count as f64)
                }
            }
            AggState::Min(best) | AggState::Max(best) => best.unwrap_or(QueryValue::Null),
            AggState::List(items) => QueryValue::List(items),
            AggState::Map(entries) => QueryValue::Map(entries),
        }
    }
}

fn ensure_numeric(value: &QueryValue, op: &str) -> QueryResult<()> {
    match value {
        QueryValue::Int(_) | QueryValue::Double(_) => Ok(()),
        other => Err(QueryError::RuntimeType(format!(
            "{op} expects numbers, got {}",
            other.type_name()
        ))),
    }
}

fn ensure_ordered(value: &QueryValue, op: &str) -> QueryResult<()> {
    match value {
        QueryValue::Bool(_)
        | QueryValue::Int(_)
        | QueryValue::Double(_)
        | QueryValue::String(_) => Ok(()),
        other => Err(QueryError::RuntimeType(format!(
            "{op} expects a bool, number or string, got {}",
            other.type_name()
        ))),
    }
}

fn numeric_add(lhs: QueryValue, rhs: QueryValue) -> QueryValue {
    match (&lhs, &rhs) {
        (QueryValue::Int(a), QueryValue::Int(b)) => QueryValue::Int(a.wrapping_add(*b)),
        _ => {
            let a = lhs.as_number().unwrap_or(0.0);
            let b = rhs.as_number().unwrap_or(0.0);
            QueryValue::Double(a + b)
        }
    }
}

fn agg_cmp(lhs: &QueryValue, rhs: &QueryValue) -> QueryResult<Ordering> {
    match (lhs, rhs) {
        (QueryValue::Bool(a), QueryValue::Bool(b)) => Ok(a.cmp(b)),
        (QueryValue::String(a), QueryValue::String(b)) => Ok(a.cmp(b)),
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Ok(a.total_cmp(&b)),
            _ => Err(QueryError::RuntimeType(format!(
                "{} and {} are not comparable in an aggregation",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

struct GroupState {
    states: Vec<AggState>,
    remembered: Vec<QueryValue>,
}

/// Groups input tuples by the group-by expressions and computes the
/// per-group aggregates. Empty input without grouping yields exactly one
/// row of aggregate defaults; with grouping it yields nothing.
pub struct AggregateCursor<'p> {
    input: Box<Cursor<'p>>,
    aggregations: &'p [AggregateElement],
    group_by: &'p [Expression],
    remember: &'p [Symbol],
    computed: bool,
    results: std::vec::IntoIter<GroupState>,
}

impl<'p> AggregateCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        aggregations: &'p [AggregateElement],
        group_by: &'p [Expression],
        remember: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            aggregations,
            group_by,
            remember,
            computed: false,
            results: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.computed {
            self.compute(frame, ctx)?;
            self.computed = true;
        }
        ctx.check_abort()?;
        let Some(group) = self.results.next() else {
            return Ok(false);
        };
        for (element, state) in self.aggregations.iter().zip(group.states) {
            frame.set(element.output_symbol, state.finish());
        }
        frame.restore(self.remember, &group.remembered);
        Ok(true)
    }

    fn compute(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<()> {
        let mut groups: HashMap<RowKey, usize> = HashMap::new();
        let mut ordered: Vec<GroupState> = Vec::new();
        while self.input.pull(frame, ctx)? {
            ctx.check_abort()?;
            // Aggregation sees its own preceding writes.
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            let key = RowKey(
                self.group_by
                    .iter()
                    .map(|expression| evaluator.eval(expression))
                    .collect::<QueryResult<_>>()?,
            );
            let mut values = Vec::with_capacity(self.aggregations.len());
            for element in self.aggregations {
                let value = element
                    .value
                    .as_ref()
                    .map(|expression| evaluator.eval(expression))
                    .transpose()?;
                let key_value = element
                    .key
                    .as_ref()
                    .map(|expression| evaluator.eval(expression))
                    .transpose()?;
                values.push((value, key_value));
            }
            let index = match groups.get(&key) {
                Some(index) => *index,
                None => {
                    let index = ordered.len();
                    ordered.push(GroupState {
                        states: self
                            .aggregations
                            .iter()
                            .map(|element| AggState::new(element.op))
                            .collect(),
                        remembered: frame.collect(self.remember),
                    });
                    groups.insert(key, index);
                    index
                }
            };
            let group = &mut ordered[index];
            for (state, (value, key_value)) in group.states.iter_mut().zip(values) {
                state.update(value, key_value)?;
            }
        }
        if ordered.is_empty() && self.group_by.is_empty() {
            ordered.push(GroupState {
                states: self
                    .aggregations
                    .iter()
                    .map(|element| AggState::new(element.op))
                    .collect(),
                remembered: vec![QueryValue::Null; self.remember.len()],
            });
        }
        self.results = ordered.into_iter();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.computed = false;
        self.results = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.results = Vec::new().into_iter();
    }
}

fn eval_count(
    expression: &Expression,
    frame: &Frame,
    ctx: &ExecutionContext<'_>,
    what: &str,
) -> QueryResult<i64> {
    let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
    match evaluator.eval(expression)? {
        QueryValue::Int(count) if count >= 0 => Ok(count),
        other => Err(QueryError::RuntimeType(format!(
            "{what} must be a non-negative integer, got {other}"
        ))),
    }
}

/// Discards the first `n` tuples; the count expression is evaluated once on
/// the first pull.
pub struct SkipCursor<'p> {
    input: Box<Cursor<'p>>,
    expression: &'p Expression,
    to_skip: Option<i64>,
    skipped: i64,
}

impl<'p> SkipCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, expression: &'p Expression) -> Self {
        Self {
            input: Box::new(input),
            expression,
            to_skip: None,
            skipped: 0,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        while self.input.pull(frame, ctx)? {
            ctx.check_abort()?;
            let to_skip = match self.to_skip {
                Some(count) => count,
                None => {
                    let count = eval_count(self.expression, frame, ctx, "SKIP count")?;
                    self.to_skip = Some(count);
                    count
                }
            };
            if self.skipped < to_skip {
                self.skipped += 1;
                continue;
            }
            return Ok(true);
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.to_skip = None;
        self.skipped = 0;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

/// Stops after `n` emissions; the count expression is evaluated on the
/// first pull, before any input is pulled, so `LIMIT 0` never touches its
/// input.
pub struct LimitCursor<'p> {
    input: Box<Cursor<'p>>,
    expression: &'p Expression,
    limit: Option<i64>,
    pulled: i64,
}

impl<'p> LimitCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, expression: &'p Expression) -> Self {
        Self {
            input: Box::new(input),
            expression,
            limit: None,
            pulled: 0,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        let limit = match self.limit {
            Some(limit) => limit,
            None => {
                let limit = eval_count(self.expression, frame, ctx, "LIMIT count")?;
                self.limit = Some(limit);
                limit
            }
        };
        if self.pulled >= limit {
            return Ok(false);
        }
        if self.input.pull(frame, ctx)? {
            self.pulled += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.limit = None;
        self.pulled = 0;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

fn order_cmp(lhs: &QueryValue, rhs: &QueryValue) -> QueryResult<Ordering> {
    match (lhs, rhs) {
        (QueryValue::Null, QueryValue::Null) => Ok(Ordering::Equal),
        (QueryValue::Null, _) => Ok(Ordering::Less),
        (_, QueryValue::Null) => Ok(Ordering::Greater),
        (QueryValue::Bool(a), QueryValue::Bool(b)) => Ok(a.cmp(b)),
        (QueryValue::String(a), QueryValue::String(b)) => Ok(a.cmp(b)),
        (QueryValue::Date(a), QueryValue::Date(b)) => Ok(a.cmp(b)),
        (QueryValue::LocalTime(a), QueryValue::LocalTime(b)) => Ok(a.cmp(b)),
        (QueryValue::LocalDateTime(a), QueryValue::LocalDateTime(b)) => Ok(a.cmp(b)),
        (QueryValue::Duration(a), QueryValue::Duration(b)) => Ok(a.cmp(b)),
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => Ok(a.total_cmp(&b)),
            _ => Err(QueryError::RuntimeType(format!(
                "unable to order {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

/// Materializes the input and emits it sorted by the key expressions.
pub struct OrderByCursor<'p> {
    input: Box<Cursor<'p>>,
    order_by: &'p [SortItem],
    output_symbols: &'p [Symbol],
    sorted: bool,
    rows: std::vec::IntoIter<Vec<QueryValue>>,
}

impl<'p> OrderByCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        order_by: &'p [SortItem],
        output_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            order_by,
            output_symbols,
            sorted: false,
            rows: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.sorted {
            let mut rows: Vec<(Vec<QueryValue>, Vec<QueryValue>)> = Vec::new();
            while self.input.pull(frame, ctx)? {
                ctx.check_abort()?;
                let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
                let keys = self
                    .order_by
                    .iter()
                    .map(|item| evaluator.eval(&item.expression))
                    .collect::<QueryResult<Vec<_>>>()?;
                rows.push((keys, frame.collect(self.output_symbols)));
            }
            let mut sort_error: Option<QueryError> = None;
            let order_by = self.order_by;
            rows.sort_by(|(a, _), (b, _)| {
                for (item, (lhs, rhs)) in order_by.iter().zip(a.iter().zip(b.iter())) {
                    match order_cmp(lhs, rhs) {
                        Ok(Ordering::Equal) => continue,
                        Ok(ordering) => {
                            return match item.direction {
                                SortDirection::Ascending => ordering,
                                SortDirection::Descending => ordering.reverse(),
                            }
                        }
                        Err(err) => {
                            if sort_error.is_none() {
                                sort_error = Some(err);
                            }
                            return Ordering::Equal;
                        }
                    }
                }
                Ordering::Equal
            });
            if let Some(err) = sort_error {
                return Err(err);
            }
            self.rows = rows.into_iter().map(|(_, values)| values).collect::<Vec<_>>().into_iter();
            self.sorted = true;
        }
        ctx.check_abort()?;
        match self.rows.next() {
            Some(values) => {
                frame.restore(self.output_symbols, &values);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.sorted = false;
        self.rows = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.rows = Vec::new().into_iter();
    }
}

/// Emits each distinct tuple of the value symbols once.
pub struct DistinctCursor<'p> {
    input: Box<Cursor<'p>>,
    value_symbols: &'p [Symbol],
    seen: HashSet<RowKey>,
}

impl<'p> DistinctCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, value_symbols: &'p [Symbol]) -> Self {
        Self {
            input: Box::new(input),
            value_symbols,
            seen: HashSet::new(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        while self.input.pull(frame, ctx)? {
            ctx.check_abort()?;
            let key = RowKey(frame.collect(self.value_symbols));
            if self.seen.insert(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.seen.clear();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.seen.clear();
    }
}
