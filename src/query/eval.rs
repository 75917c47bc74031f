//! Expression tree and its evaluator — the fixed contract operators consume.
//!
//! Comparisons and boolean connectives follow the language's three-valued
//! semantics; arithmetic propagates null and promotes Int to Double on
//! mixed operands. Type errors surface as `QueryError::RuntimeType`.

use std::collections::BTreeMap;

use crate::error::{QueryError, QueryResult};
use crate::query::context::ExecutionContext;
use crate::query::frame::{Frame, Symbol};
use crate::query::value::QueryValue;
use crate::types::View;
use crate::value::PropertyValue;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum UnaryOp {
    Not,
    Minus,
    IsNull,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FunctionKind {
    /// `id(element)` — the gid of a vertex or edge.
    Id,
    /// `size(container)` — list/map/string length.
    Size,
    /// `labels(vertex)` — label names as a list of strings.
    Labels,
    /// `type(edge)` — edge-type name.
    Type,
}

#[derive(Clone, Debug)]
pub enum Expression {
    Literal(PropertyValue),
    Parameter(String),
    Ident(Symbol),
    Property {
        input: Box<Expression>,
        name: String,
    },
    HasLabel {
        input: Box<Expression>,
        label: String,
    },
    List(Vec<Expression>),
    Map(BTreeMap<String, Expression>),
    Subscript {
        input: Box<Expression>,
        index: Box<Expression>,
    },
    Coalesce(Vec<Expression>),
    Unary {
        op: UnaryOp,
        input: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Function {
        function: FunctionKind,
        input: Box<Expression>,
    },
}

impl Expression {
    pub fn literal(value: impl Into<PropertyValue>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn ident(symbol: Symbol) -> Self {
        Expression::Ident(symbol)
    }

    pub fn property(input: Expression, name: &str) -> Self {
        Expression::Property {
            input: Box::new(input),
            name: name.to_owned(),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, input: Expression) -> Self {
        Expression::Unary {
            op,
            input: Box::new(input),
        }
    }

    pub fn function(function: FunctionKind, input: Expression) -> Self {
        Expression::Function {
            function,
            input: Box::new(input),
        }
    }
}

/// Evaluates expressions against a frame, an accessor and a view selector.
/// Write operators evaluate under `View::New` so later expressions observe
/// just-written values.
pub struct ExpressionEvaluator<'a, 'c> {
    frame: &'a Frame,
    ctx: &'a ExecutionContext<'c>,
    view: View,
}

impl<'a, 'c> ExpressionEvaluator<'a, 'c> {
    pub fn new(frame: &'a Frame, ctx: &'a ExecutionContext<'c>, view: View) -> Self {
        Self { frame, ctx, view }
    }

    pub fn eval(&self, expression: &Expression) -> QueryResult<QueryValue> {
        match expression {
            Expression::Literal(value) => Ok(QueryValue::from_property(value.clone())),
            Expression::Parameter(name) => self
                .ctx
                .parameters
                .get(name)
                .cloned()
                .map(QueryValue::from_property)
                .ok_or_else(|| {
                    QueryError::RuntimeType(format!("parameter '{name}' is not provided"))
                }),
            Expression::Ident(symbol) => Ok(self.frame.get(*symbol).clone()),
            Expression::Property { input, name } => {
                let value = self.eval(input)?;
                value.element_property(name, self.view, self.ctx.accessor)
            }
            Expression::HasLabel { input, label } => match self.eval(input)? {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Vertex(vertex) => {
                    let Some(label) = self.ctx.accessor.find_label(label) else {
                        return Ok(QueryValue::Bool(false));
                    };
                    Ok(QueryValue::Bool(vertex.has_label(label, self.view)?))
                }
                other => Err(QueryError::RuntimeType(format!(
                    "label test expects a vertex, got {}",
                    other.type_name()
                ))),
            },
            Expression::List(items) => Ok(QueryValue::List(
                items.iter().map(|item| self.eval(item)).collect::<QueryResult<_>>()?,
            )),
            Expression::Map(entries) => Ok(QueryValue::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.eval(value)?)))
                    .collect::<QueryResult<_>>()?,
            )),
            Expression::Subscript { input, index } => {
                let container = self.eval(input)?;
                let index = self.eval(index)?;
                self.subscript(container, index)
            }
            Expression::Coalesce(items) => {
                for item in items {
                    let value = self.eval(item)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(QueryValue::Null)
            }
            Expression::Unary { op, input } => {
                let value = self.eval(input)?;
                self.unary(*op, value)
            }
            Expression::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expression::Function { function, input } => {
                let value = self.eval(input)?;
                self.function(*function, value)
            }
        }
    }

    /// Filter semantics: null counts as false, non-boolean values raise a
    /// runtime error.
    pub fn eval_filter(&self, expression: &Expression) -> QueryResult<bool> {
        match self.eval(expression)? {
            QueryValue::Null => Ok(false),
            QueryValue::Bool(value) => Ok(value),
            other => Err(QueryError::RuntimeType(format!(
                "filter expression must evaluate to bool or null, got {}",
                other.type_name()
            ))),
        }
    }

    fn subscript(&self, container: QueryValue, index: QueryValue) -> QueryResult<QueryValue> {
        match (container, index) {
            (QueryValue::Null, _) | (_, QueryValue::Null) => Ok(QueryValue::Null),
            (QueryValue::List(items), QueryValue::Int(position)) => {
                let len = items.len() as i64;
                let position = if position < 0 { position + len } else { position };
                if position < 0 || position >= len {
                    return Ok(QueryValue::Null);
                }
                Ok(items.into_iter().nth(position as usize).unwrap_or(QueryValue::Null))
            }
            (QueryValue::Map(entries), QueryValue::String(key)) => {
                Ok(entries.get(&key).cloned().unwrap_or(QueryValue::Null))
            }
            (container, index) => Err(QueryError::RuntimeType(format!(
                "cannot index {} with {}",
                container.type_name(),
                index.type_name()
            ))),
        }
    }

    fn unary(&self, op: UnaryOp, value: QueryValue) -> QueryResult<QueryValue> {
        match op {
            UnaryOp::IsNull => Ok(QueryValue::Bool(value.is_null())),
            UnaryOp::Not => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Bool(value) => Ok(QueryValue::Bool(!value)),
                other => Err(QueryError::RuntimeType(format!(
                    "NOT expects a bool, got {}",
                    other.type_name()
                ))),
            },
            UnaryOp::Minus => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Int(value) => value
                    .checked_neg()
                    .map(QueryValue::Int)
                    .ok_or_else(|| QueryError::RuntimeType("integer overflow".into())),
                QueryValue::Double(value) => Ok(QueryValue::Double(-value)),
                other => Err(QueryError::RuntimeType(format!(
                    "unary minus expects a number, got {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Expression, rhs: &Expression) -> QueryResult<QueryValue> {
        match op {
            BinaryOp::And => {
                // false && anything == false, even null.
                match self.eval_bool_operand(lhs, "AND")? {
                    Some(false) => return Ok(QueryValue::Bool(false)),
                    lhs_value => match self.eval_bool_operand(rhs, "AND")? {
                        Some(false) => Ok(QueryValue::Bool(false)),
                        Some(true) => match lhs_value {
                            Some(true) => Ok(QueryValue::Bool(true)),
                            _ => Ok(QueryValue::Null),
                        },
                        None => Ok(QueryValue::Null),
                    },
                }
            }
            BinaryOp::Or => match self.eval_bool_operand(lhs, "OR")? {
                Some(true) => Ok(QueryValue::Bool(true)),
                lhs_value => match self.eval_bool_operand(rhs, "OR")? {
                    Some(true) => Ok(QueryValue::Bool(true)),
                    Some(false) => match lhs_value {
                        Some(false) => Ok(QueryValue::Bool(false)),
                        _ => Ok(QueryValue::Null),
                    },
                    None => Ok(QueryValue::Null),
                },
            },
            BinaryOp::Eq | BinaryOp::NotEq => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                Ok(match lhs.ternary_eq(&rhs) {
                    None => QueryValue::Null,
                    Some(equal) => QueryValue::Bool(if op == BinaryOp::Eq { equal } else { !equal }),
                })
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                match lhs.ternary_cmp(&rhs)? {
                    None => Ok(QueryValue::Null),
                    Some(ordering) => {
                        let result = match op {
                            BinaryOp::Less => ordering.is_lt(),
                            BinaryOp::LessEq => ordering.is_le(),
                            BinaryOp::Greater => ordering.is_gt(),
                            BinaryOp::GreaterEq => ordering.is_ge(),
                            _ => unreachable!(),
                        };
                        Ok(QueryValue::Bool(result))
                    }
                }
            }
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.arithmetic(op, lhs, rhs)
            }
        }
    }

    fn eval_bool_operand(&self, expression: &Expression, op: &str) -> QueryResult<Option<bool>> {
        match self.eval(expression)? {
            QueryValue::Null => Ok(None),
            QueryValue::Bool(value) => Ok(Some(value)),
            other => Err(QueryError::RuntimeType(format!(
                "{op} expects bool operands, got {}",
                other.type_name()
            ))),
        }
    }

    fn arithmetic(
        &self,
        op: BinaryOp,
        lhs: QueryValue,
        rhs: QueryValue,
    ) -> QueryResult<QueryValue> {
        if lhs.is_null() || rhs.is_null() {
            return Ok(QueryValue::Null);
        }
        if op == BinaryOp::Add {
            if let (QueryValue::String(a), QueryValue::String(b)) = (&lhs, &rhs) {
                return Ok(QueryValue::String(format!("{a}{b}")));
            }
            if let (QueryValue::List(a), QueryValue::List(b)) = (&lhs, &rhs) {
                let mut joined = a.clone();
                joined.extend(b.iter().cloned());
                return Ok(QueryValue::List(joined));
            }
        }
        match (&lhs, &rhs) {
            (QueryValue::Int(a), QueryValue::Int(b)) => {
                let (a, b) = (*a, *b);
                let result = match op {
                    BinaryOp::Add => a.checked_add(b),
                    BinaryOp::Subtract => a.checked_sub(b),
                    BinaryOp::Multiply => a.checked_mul(b),
                    BinaryOp::Divide => {
                        if b == 0 {
                            return Err(QueryError::RuntimeType("division by zero".into()));
                        }
                        a.checked_div(b)
                    }
                    BinaryOp::Modulo => {
                        if b == 0 {
                            return Err(QueryError::RuntimeType("division by zero".into()));
                        }
                        a.checked_rem(b)
                    }
                    _ => unreachable!(),
                };
                result
                    .map(QueryValue::Int)
                    .ok_or_else(|| QueryError::RuntimeType("integer overflow".into()))
            }
            _ => {
                let (a, b) = match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(QueryError::RuntimeType(format!(
                            "invalid operands {} and {} for arithmetic",
                            lhs.type_name(),
                            rhs.type_name()
                        )))
                    }
                };
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    BinaryOp::Modulo => a % b,
                    _ => unreachable!(),
                };
                Ok(QueryValue::Double(result))
            }
        }
    }

    fn function(&self, function: FunctionKind, value: QueryValue) -> QueryResult<QueryValue> {
        match function {
            FunctionKind::Id => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Vertex(vertex) => Ok(QueryValue::Int(vertex.gid().0 as i64)),
                QueryValue::Edge(edge) => Ok(QueryValue::Int(edge.gid().0 as i64)),
                other => Err(QueryError::RuntimeType(format!(
                    "id() expects a vertex or an edge, got {}",
                    other.type_name()
                ))),
            },
            FunctionKind::Size => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::List(items) => Ok(QueryValue::Int(items.len() as i64)),
                QueryValue::Map(entries) => Ok(QueryValue::Int(entries.len() as i64)),
                QueryValue::String(text) => Ok(QueryValue::Int(text.chars().count() as i64)),
                other => Err(QueryError::RuntimeType(format!(
                    "size() expects a list, map or string, got {}",
                    other.type_name()
                ))),
            },
            FunctionKind::Labels => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Vertex(vertex) => {
                    let labels = vertex.labels(self.view)?;
                    Ok(QueryValue::List(
                        labels
                            .into_iter()
                            .map(|label| {
                                QueryValue::String(self.ctx.accessor.label_name(label))
                            })
                            .collect(),
                    ))
                }
                other => Err(QueryError::RuntimeType(format!(
                    "labels() expects a vertex, got {}",
                    other.type_name()
                ))),
            },
            FunctionKind::Type => match value {
                QueryValue::Null => Ok(QueryValue::Null),
                QueryValue::Edge(edge) => Ok(QueryValue::String(
                    self.ctx.accessor.edge_type_name(edge.edge_type()?),
                )),
                other => Err(QueryError::RuntimeType(format!(
                    "type() expects an edge, got {}",
                    other.type_name()
                ))),
            },
        }
    }
}
