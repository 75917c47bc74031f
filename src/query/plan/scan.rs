//! Vertex scan cursors: full scans, label and label+property index scans,
//! and lookup by gid.

use std::ops::Bound;

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::QueryValue;
use crate::storage::accessor::VertexAccessor;
use crate::types::{Gid, View};
use crate::value::PropertyValue;

use super::{Cursor, LogicalOperator, RangeBound};

enum ScanKind<'p> {
    All,
    ByLabel {
        label: &'p str,
    },
    ByLabelProperty {
        label: &'p str,
        property: &'p str,
    },
    ByLabelPropertyValue {
        label: &'p str,
        property: &'p str,
        expression: &'p Expression,
    },
    ByLabelPropertyRange {
        label: &'p str,
        property: &'p str,
        lower: Option<&'p RangeBound>,
        upper: Option<&'p RangeBound>,
    },
    ById {
        expression: &'p Expression,
    },
}

/// One cursor covers the whole `ScanAll*` family; they differ only in how
/// the per-input-row vertex stream is produced.
pub struct ScanCursor<'p> {
    input: Box<Cursor<'p>>,
    output_symbol: Symbol,
    view: View,
    kind: ScanKind<'p>,
    stream: Option<Box<dyn Iterator<Item = VertexAccessor>>>,
}

impl<'p> ScanCursor<'p> {
    pub(super) fn new(op: &'p LogicalOperator) -> Self {
        let (input, output_symbol, view, kind) = match op {
            LogicalOperator::ScanAll {
                input,
                output_symbol,
                view,
            } => (input, *output_symbol, *view, ScanKind::All),
            LogicalOperator::ScanAllByLabel {
                input,
                output_symbol,
                label,
                view,
            } => (input, *output_symbol, *view, ScanKind::ByLabel { label }),
            LogicalOperator::ScanAllByLabelProperty {
                input,
                output_symbol,
                label,
                property,
                view,
            } => (
                input,
                *output_symbol,
                *view,
                ScanKind::ByLabelProperty { label, property },
            ),
            LogicalOperator::ScanAllByLabelPropertyValue {
                input,
                output_symbol,
                label,
                property,
                expression,
                view,
            } => (
                input,
                *output_symbol,
                *view,
                ScanKind::ByLabelPropertyValue {
                    label,
                    property,
                    expression,
                },
            ),
            LogicalOperator::ScanAllByLabelPropertyRange {
                input,
                output_symbol,
                label,
                property,
                lower,
                upper,
                view,
            } => (
                input,
                *output_symbol,
                *view,
                ScanKind::ByLabelPropertyRange {
                    label,
                    property,
                    lower: lower.as_ref(),
                    upper: upper.as_ref(),
                },
            ),
            LogicalOperator::ScanAllById {
                input,
                output_symbol,
                expression,
                view,
            } => (input, *output_symbol, *view, ScanKind::ById { expression }),
            _ => unreachable!("ScanCursor expects a scan operator"),
        };
        Self {
            input: Box::new(input.make_cursor()),
            output_symbol,
            view,
            kind,
            stream: None,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        loop {
            ctx.check_abort()?;
            if let Some(stream) = &mut self.stream {
                if let Some(vertex) = stream.next() {
                    frame.set(self.output_symbol, QueryValue::Vertex(vertex));
                    return Ok(true);
                }
                self.stream = None;
            }
            if !self.input.pull(frame, ctx)? {
                return Ok(false);
            }
            self.stream = Some(self.make_stream(frame, ctx)?);
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.stream = None;
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
        self.stream = None;
    }

    fn make_stream(
        &self,
        frame: &Frame,
        ctx: &ExecutionContext<'_>,
    ) -> QueryResult<Box<dyn Iterator<Item = VertexAccessor>>> {
        let accessor = ctx.accessor;
        let empty: Box<dyn Iterator<Item = VertexAccessor>> = Box::new(std::iter::empty());
        match &self.kind {
            ScanKind::All => Ok(Box::new(accessor.vertices(self.view))),
            ScanKind::ByLabel { label } => match accessor.find_label(label) {
                Some(label) => Ok(Box::new(accessor.vertices_by_label(label, self.view))),
                None => Ok(empty),
            },
            ScanKind::ByLabelProperty { label, property } => {
                match (accessor.find_label(label), accessor.find_property(property)) {
                    (Some(label), Some(property)) => Ok(Box::new(
                        accessor.vertices_by_label_property(label, property, self.view),
                    )),
                    _ => Ok(empty),
                }
            }
            ScanKind::ByLabelPropertyValue {
                label,
                property,
                expression,
            } => {
                let evaluator = ExpressionEvaluator::new(frame, ctx, self.view);
                let value = evaluator.eval(expression)?.into_property()?;
                if !value.is_indexable() {
                    return Ok(empty);
                }
                match (accessor.find_label(label), accessor.find_property(property)) {
                    (Some(label), Some(property)) => Ok(Box::new(
                        accessor
                            .vertices_by_label_property_value(label, property, value, self.view),
                    )),
                    _ => Ok(empty),
                }
            }
            ScanKind::ByLabelPropertyRange {
                label,
                property,
                lower,
                upper,
            } => {
                if lower.is_none() && upper.is_none() {
                    return Err(QueryError::RuntimeType(
                        "range scan requires at least one bound".into(),
                    ));
                }
                let evaluator = ExpressionEvaluator::new(frame, ctx, self.view);
                let lower = match Self::eval_bound(&evaluator, *lower)? {
                    BoundOutcome::Bound(bound) => bound,
                    BoundOutcome::Empty => return Ok(empty),
                };
                let upper = match Self::eval_bound(&evaluator, *upper)? {
                    BoundOutcome::Bound(bound) => bound,
                    BoundOutcome::Empty => return Ok(empty),
                };
                match (accessor.find_label(label), accessor.find_property(property)) {
                    (Some(label), Some(property)) => Ok(Box::new(
                        accessor.vertices_by_label_property_range(
                            label, property, lower, upper, self.view,
                        ),
                    )),
                    _ => Ok(empty),
                }
            }
            ScanKind::ById { expression } => {
                let evaluator = ExpressionEvaluator::new(frame, ctx, self.view);
                match evaluator.eval(expression)? {
                    QueryValue::Int(id) if id >= 0 => {
                        Ok(match accessor.find_vertex(Gid(id as u64), self.view) {
                            Some(vertex) => Box::new(std::iter::once(vertex)),
                            None => empty,
                        })
                    }
                    _ => Ok(empty),
                }
            }
        }
    }

    /// A null bound short-circuits the scan to empty; bool, list and map
    /// bounds have no defined ordering and raise an error.
    fn eval_bound(
        evaluator: &ExpressionEvaluator<'_, '_>,
        bound: Option<&RangeBound>,
    ) -> QueryResult<BoundOutcome> {
        let Some(bound) = bound else {
            return Ok(BoundOutcome::Bound(Bound::Unbounded));
        };
        let value = evaluator.eval(&bound.expression)?.into_property()?;
        match value {
            PropertyValue::Null => Ok(BoundOutcome::Empty),
            PropertyValue::Bool(_) => Err(QueryError::RangeBound("Bool")),
            PropertyValue::List(_) => Err(QueryError::RangeBound("List")),
            PropertyValue::Map(_) => Err(QueryError::RangeBound("Map")),
            value if bound.inclusive => Ok(BoundOutcome::Bound(Bound::Included(value))),
            value => Ok(BoundOutcome::Bound(Bound::Excluded(value))),
        }
    }
}

enum BoundOutcome {
    Bound(Bound<PropertyValue>),
    Empty,
}
