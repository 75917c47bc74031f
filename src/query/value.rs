//! Values flowing through the evaluation frame: the persisted scalars plus
//! graph-element references. Never stored.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{QueryError, QueryResult};
use crate::storage::accessor::{EdgeAccessor, VertexAccessor};
use crate::types::View;
use crate::value::PropertyValue;

/// A graph path: `vertices.len() == edges.len() + 1`, edges connect the
/// neighbouring vertices in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    pub vertices: Vec<VertexAccessor>,
    pub edges: Vec<EdgeAccessor>,
}

impl Path {
    pub fn single(vertex: VertexAccessor) -> Self {
        Self {
            vertices: vec![vertex],
            edges: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Runtime value on the frame.
#[derive(Clone, Debug)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<QueryValue>),
    Map(BTreeMap<String, QueryValue>),
    Date(NaiveDate),
    LocalTime(NaiveTime),
    LocalDateTime(NaiveDateTime),
    Duration(chrono::Duration),
    Vertex(VertexAccessor),
    Edge(EdgeAccessor),
    Path(Path),
}

impl QueryValue {
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Null => "Null",
            QueryValue::Bool(_) => "Bool",
            QueryValue::Int(_) => "Int",
            QueryValue::Double(_) => "Double",
            QueryValue::String(_) => "String",
            QueryValue::List(_) => "List",
            QueryValue::Map(_) => "Map",
            QueryValue::Date(_) => "Date",
            QueryValue::LocalTime(_) => "LocalTime",
            QueryValue::LocalDateTime(_) => "LocalDateTime",
            QueryValue::Duration(_) => "Duration",
            QueryValue::Vertex(_) => "Vertex",
            QueryValue::Edge(_) => "Edge",
            QueryValue::Path(_) => "Path",
        }
    }

    pub fn from_property(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => QueryValue::Null,
            PropertyValue::Bool(v) => QueryValue::Bool(v),
            PropertyValue::Int(v) => QueryValue::Int(v),
            PropertyValue::Double(v) => QueryValue::Double(v),
            PropertyValue::String(v) => QueryValue::String(v),
            PropertyValue::List(items) => {
                QueryValue::List(items.into_iter().map(QueryValue::from_property).collect())
            }
            PropertyValue::Map(entries) => QueryValue::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, QueryValue::from_property(value)))
                    .collect(),
            ),
            PropertyValue::Date(v) => QueryValue::Date(v),
            PropertyValue::LocalTime(v) => QueryValue::LocalTime(v),
            PropertyValue::LocalDateTime(v) => QueryValue::LocalDateTime(v),
            PropertyValue::Duration(v) => QueryValue::Duration(v),
        }
    }

    /// Converts back into a storable value; graph references cannot be
    /// persisted.
    pub fn into_property(self) -> QueryResult<PropertyValue> {
        match self {
            QueryValue::Null => Ok(PropertyValue::Null),
            QueryValue::Bool(v) => Ok(PropertyValue::Bool(v)),
            QueryValue::Int(v) => Ok(PropertyValue::Int(v)),
            QueryValue::Double(v) => Ok(PropertyValue::Double(v)),
            QueryValue::String(v) => Ok(PropertyValue::String(v)),
            QueryValue::List(items) => Ok(PropertyValue::List(
                items
                    .into_iter()
                    .map(QueryValue::into_property)
                    .collect::<QueryResult<_>>()?,
            )),
            QueryValue::Map(entries) => Ok(PropertyValue::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((key, value.into_property()?)))
                    .collect::<QueryResult<_>>()?,
            )),
            QueryValue::Date(v) => Ok(PropertyValue::Date(v)),
            QueryValue::LocalTime(v) => Ok(PropertyValue::LocalTime(v)),
            QueryValue::LocalDateTime(v) => Ok(PropertyValue::LocalDateTime(v)),
            QueryValue::Duration(v) => Ok(PropertyValue::Duration(v)),
            other => Err(QueryError::RuntimeType(format!(
                "{} cannot be stored as a property",
                other.type_name()
            ))),
        }
    }

    /// Borrowing view of the scalar payload, for comparisons.
    fn as_scalar(&self) -> Option<PropertyValue> {
        match self {
            QueryValue::Null => Some(PropertyValue::Null),
            QueryValue::Bool(v) => Some(PropertyValue::Bool(*v)),
            QueryValue::Int(v) => Some(PropertyValue::Int(*v)),
            QueryValue::Double(v) => Some(PropertyValue::Double(*v)),
            QueryValue::String(v) => Some(PropertyValue::String(v.clone())),
            QueryValue::Date(v) => Some(PropertyValue::Date(*v)),
            QueryValue::LocalTime(v) => Some(PropertyValue::LocalTime(*v)),
            QueryValue::LocalDateTime(v) => Some(PropertyValue::LocalDateTime(*v)),
            QueryValue::Duration(v) => Some(PropertyValue::Duration(*v)),
            _ => None,
        }
    }

    /// Three-valued equality over the full value domain: graph elements
    /// compare by identity, containers structurally, scalars like property
    /// values.
    pub fn ternary_eq(&self, other: &QueryValue) -> Option<bool> {
        match (self, other) {
            (QueryValue::Null, _) | (_, QueryValue::Null) => None,
            (QueryValue::Vertex(a), QueryValue::Vertex(b)) => Some(a.gid() == b.gid()),
            (QueryValue::Edge(a), QueryValue::Edge(b)) => Some(a.gid() == b.gid()),
            (QueryValue::Path(a), QueryValue::Path(b)) => Some(a == b),
            (QueryValue::List(a), QueryValue::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut unknown = false;
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.ternary_eq(y) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            (QueryValue::Map(a), QueryValue::Map(b)) => {
                if a.len() != b.len() || !a.keys().eq(b.keys()) {
                    return Some(false);
                }
                let mut unknown = false;
                for (x, y) in a.values().zip(b.values()) {
                    match x.ternary_eq(y) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(true)
                }
            }
            _ => match (self.as_scalar(), other.as_scalar()) {
                (Some(a), Some(b)) => a.ternary_eq(&b),
                _ => Some(false),
            },
        }
    }

    /// Ordered comparison per the language rules: defined between null,
    /// numbers and strings only.
    pub fn ternary_cmp(&self, other: &QueryValue) -> QueryResult<Option<Ordering>> {
        match (self, other) {
            (QueryValue::Null, _) | (_, QueryValue::Null) => Ok(None),
            (QueryValue::Int(a), QueryValue::Int(b)) => Ok(Some(a.cmp(b))),
            (QueryValue::String(a), QueryValue::String(b)) => Ok(Some(a.cmp(b))),
            _ => {
                let a = self.as_number();
                let b = other.as_number();
                match (a, b) {
                    (Some(a), Some(b)) => Ok(Some(a.partial_cmp(&b).unwrap_or(Ordering::Equal))),
                    _ => Err(QueryError::RuntimeType(format!(
                        "{} and {} are not comparable",
                        self.type_name(),
                        other.type_name()
                    ))),
                }
            }
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            QueryValue::Int(v) => Some(*v as f64),
            QueryValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Identity hash used for grouping and distinct, where nulls compare
    /// equal and Int/Double hash numerically.
    fn group_hash<H: Hasher>(&self, state: &mut H) {
        match self {
            QueryValue::Null => 0u8.hash(state),
            QueryValue::Bool(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            QueryValue::Int(v) => {
                2u8.hash(state);
                (*v as f64).to_bits().hash(state);
            }
            QueryValue::Double(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            QueryValue::String(v) => {
                3u8.hash(state);
                v.hash(state);
            }
            QueryValue::List(items) => {
                4u8.hash(state);
                items.len().hash(state);
                for item in items {
                    item.group_hash(state);
                }
            }
            QueryValue::Map(entries) => {
                5u8.hash(state);
                entries.len().hash(state);
                for (key, value) in entries {
                    key.hash(state);
                    value.group_hash(state);
                }
            }
            QueryValue::Date(v) => {
                6u8.hash(state);
                v.hash(state);
            }
            QueryValue::LocalTime(v) => {
                7u8.hash(state);
                v.hash(state);
            }
            QueryValue::LocalDateTime(v) => {
                8u8.hash(state);
                v.hash(state);
            }
            QueryValue::Duration(v) => {
                9u8.hash(state);
                v.num_microseconds().unwrap_or(i64::MAX).hash(state);
            }
            QueryValue::Vertex(v) => {
                10u8.hash(state);
                v.gid().hash(state);
            }
            QueryValue::Edge(v) => {
                11u8.hash(state);
                v.gid().hash(state);
            }
            QueryValue::Path(path) => {
                12u8.hash(state);
                for vertex in &path.vertices {
                    vertex.gid().hash(state);
                }
                for edge in &path.edges {
                    edge.gid().hash(state);
                }
            }
        }
    }

    /// Equality for grouping and distinct: like `ternary_eq` but null
    /// equals null.
    fn group_eq(&self, other: &QueryValue) -> bool {
        match (self, other) {
            (QueryValue::Null, QueryValue::Null) => true,
            (QueryValue::List(a), QueryValue::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.group_eq(y))
            }
            (QueryValue::Map(a), QueryValue::Map(b)) => {
                a.len() == b.len()
                    && a.keys().eq(b.keys())
                    && a.values().zip(b.values()).all(|(x, y)| x.group_eq(y))
            }
            _ => self.ternary_eq(other) == Some(true),
        }
    }

    /// Reads a vertex or edge property under the given view.
    pub fn element_property(
        &self,
        name: &str,
        view: View,
        accessor: &crate::storage::accessor::Accessor,
    ) -> QueryResult<QueryValue> {
        match self {
            QueryValue::Null => Ok(QueryValue::Null),
            QueryValue::Vertex(vertex) => {
                let Some(property) = accessor.find_property(name) else {
                    return Ok(QueryValue::Null);
                };
                Ok(QueryValue::from_property(vertex.property(property, view)?))
            }
            QueryValue::Edge(edge) => {
                let Some(property) = accessor.find_property(name) else {
                    return Ok(QueryValue::Null);
                };
                Ok(QueryValue::from_property(edge.property(property, view)?))
            }
            QueryValue::Map(entries) => {
                Ok(entries.get(name).cloned().unwrap_or(QueryValue::Null))
            }
            other => Err(QueryError::RuntimeType(format!(
                "cannot look up property '{name}' on {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Null => write!(f, "null"),
            QueryValue::Bool(v) => write!(f, "{v}"),
            QueryValue::Int(v) => write!(f, "{v}"),
            QueryValue::Double(v) => write!(f, "{v}"),
            QueryValue::String(v) => write!(f, "{v:?}"),
            QueryValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            QueryValue::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            QueryValue::Date(v) => write!(f, "{v}"),
            QueryValue::LocalTime(v) => write!(f, "{v}"),
            QueryValue::LocalDateTime(v) => write!(f, "{v}"),
            QueryValue::Duration(v) => write!(f, "{v}"),
            QueryValue::Vertex(v) => write!(f, "(vertex {})", v.gid()),
            QueryValue::Edge(v) => write!(f, "[edge {}]", v.gid()),
            QueryValue::Path(path) => {
                write!(f, "path(vertices: {}, edges: {})", path.vertices.len(), path.edges.len())
            }
        }
    }
}

/// Row wrapper with grouping semantics (`Null == Null`), used as the hash
/// key of `Aggregate` and `Distinct`.
#[derive(Clone, Debug)]
pub struct RowKey(pub Vec<QueryValue>);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.group_eq(b))
    }
}

impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for value in &self.0 {
            value.group_hash(state);
        }
    }
}
