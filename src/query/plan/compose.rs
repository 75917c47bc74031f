//! Compositional operators: Once, Filter, Produce, path construction, edge
//! uniqueness, Merge/Optional/Unwind/Distinct-style set plumbing, Union,
//! Cartesian, procedure calls and CSV import.

use std::collections::BTreeMap;

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::{Path, QueryValue};
use crate::types::{Gid, View};

use super::{Cursor, NamedExpression};

/// Emits exactly one empty tuple; the root of sourceless plans.
#[derive(Default)]
pub struct OnceCursor {
    did_pull: bool,
}

impl OnceCursor {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub fn pull(&mut self, _frame: &mut Frame, _ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.did_pull {
            self.did_pull = true;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.did_pull = false;
    }

    pub fn shutdown(&mut self) {}
}

/// Drops tuples whose predicate is not true; null counts as false.
pub struct FilterCursor<'p> {
    input: Box<Cursor<'p>>,
    expression: &'p Expression,
}

impl<'p> FilterCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, expression: &'p Expression) -> Self {
        Self {
            input: Box::new(input),
            expression,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        while self.input.pull(frame, ctx)? {
            ctx.check_abort()?;
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
            if evaluator.eval_filter(self.expression)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

/// Evaluates the output expressions into their symbols; the projection step
/// at the top of most plans.
pub struct ProduceCursor<'p> {
    input: Box<Cursor<'p>>,
    named_expressions: &'p [NamedExpression],
}

impl<'p> ProduceCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, named_expressions: &'p [NamedExpression]) -> Self {
        Self {
            input: Box::new(input),
            named_expressions,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let mut values = Vec::with_capacity(self.named_expressions.len());
        {
            // Projection always yields the latest state, including this
            // query's own writes.
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            for named in self.named_expressions {
                values.push(evaluator.eval(&named.expression)?);
            }
        }
        for (named, value) in self.named_expressions.iter().zip(values) {
            frame.set(named.symbol, value);
        }
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

fn edge_gids(value: &QueryValue) -> Vec<Gid> {
    match value {
        QueryValue::Edge(edge) => vec![edge.gid()],
        QueryValue::List(items) => items
            .iter()
            .filter_map(|item| match item {
                QueryValue::Edge(edge) => Some(edge.gid()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Drops tuples whose newly expanded edge (or edge list) shares an edge
/// with any of the previously bound symbols.
pub struct EdgeUniquenessFilterCursor<'p> {
    input: Box<Cursor<'p>>,
    expand_symbol: Symbol,
    previous_symbols: &'p [Symbol],
}

impl<'p> EdgeUniquenessFilterCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        expand_symbol: Symbol,
        previous_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            expand_symbol,
            previous_symbols,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        'input: while self.input.pull(frame, ctx)? {
            ctx.check_abort()?;
            let expanded = edge_gids(frame.get(self.expand_symbol));
            for symbol in self.previous_symbols {
                let previous = edge_gids(frame.get(*symbol));
                if expanded.iter().any(|gid| previous.contains(gid)) {
                    continue 'input;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

/// Combines vertex, edge and edge-list symbols on the frame into a `Path`
/// value. Edge direction is inferred from endpoint equality with the path's
/// current tail.
pub struct ConstructNamedPathCursor<'p> {
    input: Box<Cursor<'p>>,
    path_symbol: Symbol,
    path_elements: &'p [Symbol],
}

impl<'p> ConstructNamedPathCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        path_symbol: Symbol,
        path_elements: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            path_symbol,
            path_elements,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let mut path: Option<Path> = None;
        for symbol in self.path_elements {
            match frame.get(*symbol).clone() {
                QueryValue::Null => {
                    frame.set(self.path_symbol, QueryValue::Null);
                    return Ok(true);
                }
                QueryValue::Vertex(vertex) => {
                    if path.is_none() {
                        path = Some(Path::single(vertex));
                    }
                }
                QueryValue::Edge(edge) => {
                    let Some(path) = path.as_mut() else {
                        return Err(QueryError::RuntimeType(
                            "named path must start with a vertex".into(),
                        ));
                    };
                    append_edge(path, edge)?;
                }
                QueryValue::List(items) => {
                    let Some(path) = path.as_mut() else {
                        return Err(QueryError::RuntimeType(
                            "named path must start with a vertex".into(),
                        ));
                    };
                    for item in items {
                        match item {
                            QueryValue::Edge(edge) => append_edge(path, edge)?,
                            other => {
                                return Err(QueryError::RuntimeType(format!(
                                    "named path edge list may only hold edges, got {}",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                }
                other => {
                    return Err(QueryError::RuntimeType(format!(
                        "named path elements must be vertices, edges or edge lists, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        let Some(path) = path else {
            return Err(QueryError::RuntimeType("named path has no elements".into()));
        };
        frame.set(self.path_symbol, QueryValue::Path(path));
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

fn append_edge(path: &mut Path, edge: crate::storage::accessor::EdgeAccessor) -> QueryResult<()> {
    let Some(tail) = path.vertices.last() else {
        return Err(QueryError::RuntimeType("named path has no tail".into()));
    };
    let from = edge.from_vertex()?;
    let to = edge.to_vertex()?;
    let next = if from.gid() == tail.gid() {
        to
    } else if to.gid() == tail.gid() {
        from
    } else {
        return Err(QueryError::RuntimeType(
            "named path edge does not touch the path tail".into(),
        ));
    };
    path.edges.push(edge);
    path.vertices.push(next);
    Ok(())
}

enum MergePhase {
    NeedInput,
    Matching { matched: bool },
    Creating,
}

/// `MERGE`: for each input tuple, emit the match branch's tuples when it
/// yields any, otherwise run the create branch once.
pub struct MergeCursor<'p> {
    input: Box<Cursor<'p>>,
    merge_match: Box<Cursor<'p>>,
    merge_create: Box<Cursor<'p>>,
    phase: MergePhase,
}

impl<'p> MergeCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        merge_match: Cursor<'p>,
        merge_create: Cursor<'p>,
    ) -> Self {
        Self {
            input: Box::new(input),
            merge_match: Box::new(merge_match),
            merge_create: Box::new(merge_create),
            phase: MergePhase::NeedInput,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            match self.phase {
                MergePhase::NeedInput => {
                    if !self.input.pull(frame, ctx)? {
                        return Ok(false);
                    }
                    self.merge_match.reset();
                    self.merge_create.reset();
                    self.phase = MergePhase::Matching { matched: false };
                }
                MergePhase::Matching { matched } => {
                    if self.merge_match.pull(frame, ctx)? {
                        self.phase = MergePhase::Matching { matched: true };
                        return Ok(true);
                    }
                    self.phase = if matched {
                        MergePhase::NeedInput
                    } else {
                        MergePhase::Creating
                    };
                }
                MergePhase::Creating => {
                    let created = self.merge_create.pull(frame, ctx)?;
                    self.phase = MergePhase::NeedInput;
                    if created {
                        return Ok(true);
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.merge_match.reset();
        self.merge_create.reset();
        self.phase = MergePhase::NeedInput;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.merge_match.shutdown();
        self.merge_create.shutdown();
    }
}

/// `OPTIONAL MATCH`: emits the optional subtree's tuples, or one tuple with
/// the optional symbols nulled when it yields nothing.
pub struct OptionalCursor<'p> {
    input: Box<Cursor<'p>>,
    optional: Box<Cursor<'p>>,
    optional_symbols: &'p [Symbol],
    have_input: bool,
    pulled_any: bool,
}

impl<'p> OptionalCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        optional: Cursor<'p>,
        optional_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            optional: Box::new(optional),
            optional_symbols,
            have_input: false,
            pulled_any: false,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if !self.have_input {
                if !self.input.pull(frame, ctx)? {
                    return Ok(false);
                }
                self.optional.reset();
                self.have_input = true;
                self.pulled_any = false;
            }
            if self.optional.pull(frame, ctx)? {
                self.pulled_any = true;
                return Ok(true);
            }
            self.have_input = false;
            if !self.pulled_any {
                for symbol in self.optional_symbols {
                    frame.set(*symbol, QueryValue::Null);
                }
                return Ok(true);
            }
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.optional.reset();
        self.have_input = false;
        self.pulled_any = false;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.optional.shutdown();
    }
}

/// `UNWIND`: one tuple per element of the evaluated list; null unwinds to
/// nothing.
pub struct UnwindCursor<'p> {
    input: Box<Cursor<'p>>,
    expression: &'p Expression,
    output_symbol: Symbol,
    items: std::vec::IntoIter<QueryValue>,
}

impl<'p> UnwindCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, expression: &'p Expression, output_symbol: Symbol) -> Self {
        Self {
            input: Box::new(input),
            expression,
            output_symbol,
            items: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some(item) = self.items.next() {
                frame.set(self.output_symbol, item);
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let value = {
                let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
                evaluator.eval(self.expression)?
            };
            self.items = match value {
                QueryValue::Null => Vec::new().into_iter(),
                QueryValue::List(items) => items.into_iter(),
                other => {
                    return Err(QueryError::RuntimeType(format!(
                        "UNWIND expects a list, got {}",
                        other.type_name()
                    )))
                }
            };
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.items = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.items = Vec::new().into_iter();
    }
}

/// Concatenates two plans, mapping each side's symbols onto the shared
/// union symbols.
pub struct UnionCursor<'p> {
    left: Box<Cursor<'p>>,
    right: Box<Cursor<'p>>,
    union_symbols: &'p [Symbol],
    left_symbols: &'p [Symbol],
    right_symbols: &'p [Symbol],
    left_done: bool,
}

impl<'p> UnionCursor<'p> {
    pub(super) fn new(
        left: Cursor<'p>,
        right: Cursor<'p>,
        union_symbols: &'p [Symbol],
        left_symbols: &'p [Symbol],
        right_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            union_symbols,
            left_symbols,
            right_symbols,
            left_done: false,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        ctx.check_abort()?;
        if !self.left_done {
            if self.left.pull(frame, ctx)? {
                let values = frame.collect(self.left_symbols);
                frame.restore(self.union_symbols, &values);
                return Ok(true);
            }
            self.left_done = true;
        }
        if self.right.pull(frame, ctx)? {
            let values = frame.collect(self.right_symbols);
            frame.restore(self.union_symbols, &values);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.left_done = false;
    }

    pub fn shutdown(&mut self) {
        self.left.shutdown();
        self.right.shutdown();
    }
}

/// Cross product: materializes the left input once, then restores every
/// saved left tuple against each right tuple.
pub struct CartesianCursor<'p> {
    left: Box<Cursor<'p>>,
    right: Box<Cursor<'p>>,
    left_symbols: &'p [Symbol],
    right_symbols: &'p [Symbol],
    left_rows: Vec<Vec<QueryValue>>,
    materialized: bool,
    left_position: usize,
    right_row: Option<Vec<QueryValue>>,
}

impl<'p> CartesianCursor<'p> {
    pub(super) fn new(
        left: Cursor<'p>,
        right: Cursor<'p>,
        left_symbols: &'p [Symbol],
        right_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            left_symbols,
            right_symbols,
            left_rows: Vec::new(),
            materialized: false,
            left_position: 0,
            right_row: None,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.materialized {
            while self.left.pull(frame, ctx)? {
                ctx.check_abort()?;
                self.left_rows.push(frame.collect(self.left_symbols));
            }
            self.materialized = true;
            if self.left_rows.is_empty() {
                return Ok(false);
            }
        }
        loop {
            ctx.check_abort()?;
            if let Some(right_row) = &self.right_row {
                if self.left_position < self.left_rows.len() {
                    frame.restore(self.right_symbols, right_row);
                    frame.restore(self.left_symbols, &self.left_rows[self.left_position]);
                    self.left_position += 1;
                    return Ok(true);
                }
                self.right_row = None;
            }
            if !self.right.pull(frame, ctx)? {
                return Ok(false);
            }
            self.right_row = Some(frame.collect(self.right_symbols));
            self.left_position = 0;
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.left_rows.clear();
        self.materialized = false;
        self.left_position = 0;
        self.right_row = None;
    }

    pub fn shutdown(&mut self) {
        self.left.shutdown();
        self.right.shutdown();
        self.left_rows.clear();
        self.right_row = None;
    }
}

/// Calls a registered procedure per input tuple and emits its result rows
/// into the result symbols.
pub struct CallProcedureCursor<'p> {
    input: Box<Cursor<'p>>,
    name: &'p str,
    arguments: &'p [Expression],
    result_symbols: &'p [Symbol],
    rows: std::vec::IntoIter<Vec<QueryValue>>,
}

impl<'p> CallProcedureCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        name: &'p str,
        arguments: &'p [Expression],
        result_symbols: &'p [Symbol],
    ) -> Self {
        Self {
            input: Box::new(input),
            name,
            arguments,
            result_symbols,
            rows: Vec::new().into_iter(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some(row) = self.rows.next() {
                if row.len() != self.result_symbols.len() {
                    return Err(QueryError::Procedure {
                        name: self.name.to_owned(),
                        message: format!(
                            "returned {} columns, expected {}",
                            row.len(),
                            self.result_symbols.len()
                        ),
                    });
                }
                frame.restore(self.result_symbols, &row);
                return Ok(true);
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let procedure = ctx
                .procedures
                .and_then(|registry| registry.get(self.name))
                .cloned()
                .ok_or_else(|| QueryError::Procedure {
                    name: self.name.to_owned(),
                    message: "procedure is not registered".into(),
                })?;
            let mut arguments = Vec::with_capacity(self.arguments.len());
            {
                let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
                for argument in self.arguments {
                    arguments.push(evaluator.eval(argument)?);
                }
            }
            let rows = procedure(&arguments).map_err(|message| QueryError::Procedure {
                name: self.name.to_owned(),
                message,
            })?;
            self.rows = rows.into_iter();
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.rows = Vec::new().into_iter();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.rows = Vec::new().into_iter();
    }
}

/// Streams rows from a CSV file: a map per row with a header, a list of
/// strings without one.
pub struct LoadCsvCursor<'p> {
    input: Box<Cursor<'p>>,
    path: &'p Expression,
    with_header: bool,
    delimiter: u8,
    row_symbol: Symbol,
    reader: Option<csv::Reader<std::fs::File>>,
    headers: Vec<String>,
}

impl<'p> LoadCsvCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        path: &'p Expression,
        with_header: bool,
        delimiter: u8,
        row_symbol: Symbol,
    ) -> Self {
        Self {
            input: Box::new(input),
            path,
            with_header,
            delimiter,
            row_symbol,
            reader: None,
            headers: Vec::new(),
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some(reader) = self.reader.as_mut() {
                let mut record = csv::StringRecord::new();
                match reader.read_record(&mut record) {
                    Ok(true) => {
                        let value = if self.with_header {
                            let mut row = BTreeMap::new();
                            for (header, field) in self.headers.iter().zip(record.iter()) {
                                row.insert(
                                    header.clone(),
                                    QueryValue::String(field.to_owned()),
                                );
                            }
                            QueryValue::Map(row)
                        } else {
                            QueryValue::List(
                                record
                                    .iter()
                                    .map(|field| QueryValue::String(field.to_owned()))
                                    .collect(),
                            )
                        };
                        frame.set(self.row_symbol, value);
                        return Ok(true);
                    }
                    Ok(false) => {
                        self.reader = None;
                    }
                    Err(err) => return Err(QueryError::LoadCsv(err.to_string())),
                }
                continue;
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            let path = {
                let evaluator = ExpressionEvaluator::new(frame, ctx, View::Old);
                match evaluator.eval(self.path)? {
                    QueryValue::String(path) => path,
                    other => {
                        return Err(QueryError::RuntimeType(format!(
                            "LOAD CSV expects a file path string, got {}",
                            other.type_name()
                        )))
                    }
                }
            };
            let file = std::fs::File::open(&path)
                .map_err(|err| QueryError::LoadCsv(format!("cannot open '{path}': {err}")))?;
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(self.with_header)
                .delimiter(self.delimiter)
                .flexible(true)
                .from_reader(file);
            if self.with_header {
                self.headers = reader
                    .headers()
                    .map_err(|err| QueryError::LoadCsv(err.to_string()))?
                    .iter()
                    .map(str::to_owned)
                    .collect();
            }
            self.reader = Some(reader);
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.reader = None;
        self.headers.clear();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.reader = None;
    }
}
