//! Write operators. All of them evaluate expressions under `View::New` so
//! expressions later in the query observe just-written values, and emit
//! change records when an observer is attached to the context.

use std::collections::BTreeMap;

use crate::error::{QueryError, QueryResult};
use crate::query::context::{ExecutionContext, ObjectChange};
use crate::query::eval::{Expression, ExpressionEvaluator};
use crate::query::frame::{Frame, Symbol};
use crate::query::value::QueryValue;
use crate::storage::accessor::{Direction, EdgeAccessor, VertexAccessor};
use crate::types::View;
use crate::value::PropertyValue;

use super::{Cursor, EdgeCreationInfo, NodeCreationInfo, SetPropertiesOp};

fn create_vertex_from_info(
    frame: &mut Frame,
    ctx: &ExecutionContext<'_>,
    node: &NodeCreationInfo,
) -> QueryResult<VertexAccessor> {
    let accessor = ctx.accessor;
    let vertex = accessor
        .create_vertex()
        .map_err(|err| QueryError::from_write_error(err, "create a vertex"))?;
    for label in &node.labels {
        let label = accessor.label_id(label);
        vertex
            .add_label(label)
            .map_err(|err| QueryError::from_write_error(err, "set a label"))?;
    }
    let mut values = Vec::with_capacity(node.properties.len());
    {
        let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
        for (name, expression) in &node.properties {
            values.push((name, evaluator.eval(expression)?.into_property()?));
        }
    }
    for (name, value) in values {
        let property = accessor.property_id(name);
        vertex
            .set_property(property, value)
            .map_err(|err| QueryError::from_write_error(err, "set a property"))?;
    }
    ctx.record_change(ObjectChange::CreatedVertex(vertex.gid()));
    frame.set(node.symbol, QueryValue::Vertex(vertex.clone()));
    Ok(vertex)
}

pub struct CreateNodeCursor<'p> {
    input: Box<Cursor<'p>>,
    node: &'p NodeCreationInfo,
}

impl<'p> CreateNodeCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, node: &'p NodeCreationInfo) -> Self {
        Self {
            input: Box::new(input),
            node,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        create_vertex_from_info(frame, ctx, self.node)?;
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct CreateExpandCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    node: &'p NodeCreationInfo,
    edge: &'p EdgeCreationInfo,
    existing_node: bool,
}

impl<'p> CreateExpandCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        input_symbol: Symbol,
        node: &'p NodeCreationInfo,
        edge: &'p EdgeCreationInfo,
        existing_node: bool,
    ) -> Self {
        Self {
            input: Box::new(input),
            input_symbol,
            node,
            edge,
            existing_node,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let QueryValue::Vertex(origin) = frame.get(self.input_symbol).clone() else {
            return Err(QueryError::RuntimeType(
                "CREATE expansion expects a vertex origin".into(),
            ));
        };
        let other = if self.existing_node {
            match frame.get(self.node_symbol()).clone() {
                QueryValue::Vertex(other) => other,
                other => {
                    return Err(QueryError::RuntimeType(format!(
                        "CREATE expansion expects a bound vertex, got {}",
                        other.type_name()
                    )))
                }
            }
        } else {
            create_vertex_from_info(frame, ctx, self.node)?
        };
        // An undirected create picks an arbitrary direction; only MERGE
        // produces it.
        let (from, to) = match self.edge.direction {
            Direction::In => (&other, &origin),
            Direction::Out | Direction::Both => (&origin, &other),
        };
        let accessor = ctx.accessor;
        let edge_type = accessor.edge_type_id(&self.edge.edge_type);
        let edge = accessor
            .create_edge(from, to, edge_type)
            .map_err(|err| QueryError::from_write_error(err, "create an edge"))?;
        let mut values = Vec::with_capacity(self.edge.properties.len());
        {
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            for (name, expression) in &self.edge.properties {
                values.push((name, evaluator.eval(expression)?.into_property()?));
            }
        }
        for (name, value) in values {
            let property = accessor.property_id(name);
            edge.set_property(property, value)
                .map_err(|err| QueryError::from_write_error(err, "set a property"))?;
        }
        ctx.record_change(ObjectChange::CreatedEdge(edge.gid()));
        frame.set(self.edge.symbol, QueryValue::Edge(edge));
        Ok(true)
    }

    fn node_symbol(&self) -> Symbol {
        self.node.symbol
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct DeleteCursor<'p> {
    input: Box<Cursor<'p>>,
    expressions: &'p [Expression],
    detach: bool,
}

impl<'p> DeleteCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, expressions: &'p [Expression], detach: bool) -> Self {
        Self {
            input: Box::new(input),
            expressions,
            detach,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let mut vertices: Vec<VertexAccessor> = Vec::new();
        let mut edges: Vec<EdgeAccessor> = Vec::new();
        {
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            for expression in self.expressions {
                match evaluator.eval(expression)? {
                    QueryValue::Null => {}
                    QueryValue::Vertex(vertex) => vertices.push(vertex),
                    QueryValue::Edge(edge) => edges.push(edge),
                    other => {
                        return Err(QueryError::RuntimeType(format!(
                            "only vertices and edges can be deleted, got {}",
                            other.type_name()
                        )))
                    }
                }
            }
        }
        let accessor = ctx.accessor;
        // Edges go first so a vertex listed together with its incident
        // edges deletes cleanly without DETACH.
        for edge in edges {
            match accessor.delete_edge(&edge) {
                Ok(true) => ctx.record_change(ObjectChange::DeletedEdge(edge.gid())),
                Ok(false) => {}
                Err(err) => return Err(QueryError::from_write_error(err, "delete an edge")),
            }
        }
        for vertex in vertices {
            let result = if self.detach {
                accessor.detach_delete_vertex(&vertex)
            } else {
                accessor.delete_vertex(&vertex)
            };
            match result {
                Ok(true) => ctx.record_change(ObjectChange::DeletedVertex(vertex.gid())),
                Ok(false) => {}
                // Already deleted earlier in this query.
                Err(crate::error::StorageError::DeletedObject) => {}
                Err(err) => return Err(QueryError::from_write_error(err, "delete a vertex")),
            }
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

pub struct SetPropertyCursor<'p> {
    input: Box<Cursor<'p>>,
    object: &'p Expression,
    property: &'p str,
    value: &'p Expression,
}

impl<'p> SetPropertyCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        object: &'p Expression,
        property: &'p str,
        value: &'p Expression,
    ) -> Self {
        Self {
            input: Box::new(input),
            object,
            property,
            value,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let (target, value) = {
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            (
                evaluator.eval(self.object)?,
                evaluator.eval(self.value)?.into_property()?,
            )
        };
        write_property(ctx, target, self.property, value, "set a property")?;
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

fn write_property(
    ctx: &ExecutionContext<'_>,
    target: QueryValue,
    property: &str,
    value: PropertyValue,
    doing: &str,
) -> QueryResult<()> {
    match target {
        QueryValue::Null => Ok(()),
        QueryValue::Vertex(vertex) => {
            let property_id = ctx.accessor.property_id(property);
            vertex
                .set_property(property_id, value)
                .map_err(|err| QueryError::from_write_error(err, doing))?;
            ctx.record_change(ObjectChange::SetVertexProperty(
                vertex.gid(),
                property.to_owned(),
            ));
            Ok(())
        }
        QueryValue::Edge(edge) => {
            let property_id = ctx.accessor.property_id(property);
            edge.set_property(property_id, value)
                .map_err(|err| QueryError::from_write_error(err, doing))?;
            ctx.record_change(ObjectChange::SetEdgeProperty(
                edge.gid(),
                property.to_owned(),
            ));
            Ok(())
        }
        other => Err(QueryError::RuntimeType(format!(
            "properties can only be set on vertices and edges, not on {}",
            other.type_name()
        ))),
    }
}

pub struct SetPropertiesCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    rhs: &'p Expression,
    op: SetPropertiesOp,
}

impl<'p> SetPropertiesCursor<'p> {
    pub(super) fn new(
        input: Cursor<'p>,
        input_symbol: Symbol,
        rhs: &'p Expression,
        op: SetPropertiesOp,
    ) -> Self {
        Self {
            input: Box::new(input),
            input_symbol,
            rhs,
            op,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let target = frame.get(self.input_symbol).clone();
        if target.is_null() {
            return Ok(true);
        }
        let rhs = {
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            evaluator.eval(self.rhs)?
        };
        let new_properties = self.rhs_properties(ctx, rhs)?;
        let existing = match &target {
            QueryValue::Vertex(vertex) => vertex.properties(View::New),
            QueryValue::Edge(edge) => edge.properties(View::New),
            other => {
                return Err(QueryError::RuntimeType(format!(
                    "properties can only be set on vertices and edges, not on {}",
                    other.type_name()
                )))
            }
        }
        .map_err(|err| QueryError::from_write_error(err, "set properties"))?;
        if self.op == SetPropertiesOp::Replace {
            for property_id in existing.keys() {
                let name = ctx.accessor.property_name(*property_id);
                if !new_properties.contains_key(&name) {
                    write_property(
                        ctx,
                        target.clone(),
                        &name,
                        PropertyValue::Null,
                        "remove a property",
                    )?;
                }
            }
        }
        for (name, value) in new_properties {
            write_property(ctx, target.clone(), &name, value, "set a property")?;
        }
        Ok(true)
    }

    fn rhs_properties(
        &self,
        ctx: &ExecutionContext<'_>,
        rhs: QueryValue,
    ) -> QueryResult<BTreeMap<String, PropertyValue>> {
        match rhs {
            QueryValue::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| Ok((key, value.into_property()?)))
                .collect(),
            QueryValue::Vertex(vertex) => Ok(vertex
                .properties(View::New)
                .map_err(|err| QueryError::from_write_error(err, "read properties"))?
                .into_iter()
                .map(|(property, value)| (ctx.accessor.property_name(property), value))
                .collect()),
            QueryValue::Edge(edge) => Ok(edge
                .properties(View::New)
                .map_err(|err| QueryError::from_write_error(err, "read properties"))?
                .into_iter()
                .map(|(property, value)| (ctx.accessor.property_name(property), value))
                .collect()),
            other => Err(QueryError::RuntimeType(format!(
                "SET expects a map, vertex or edge on the right-hand side, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct SetLabelsCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    labels: &'p [String],
}

impl<'p> SetLabelsCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, input_symbol: Symbol, labels: &'p [String]) -> Self {
        Self {
            input: Box::new(input),
            input_symbol,
            labels,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        match frame.get(self.input_symbol).clone() {
            QueryValue::Null => Ok(true),
            QueryValue::Vertex(vertex) => {
                for label in self.labels {
                    let label = ctx.accessor.label_id(label);
                    vertex
                        .add_label(label)
                        .map_err(|err| QueryError::from_write_error(err, "set a label"))?;
                }
                ctx.record_change(ObjectChange::UpdatedLabels(vertex.gid()));
                Ok(true)
            }
            other => Err(QueryError::RuntimeType(format!(
                "labels can only be set on vertices, not on {}",
                other.type_name()
            ))),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct RemovePropertyCursor<'p> {
    input: Box<Cursor<'p>>,
    object: &'p Expression,
    property: &'p str,
}

impl<'p> RemovePropertyCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, object: &'p Expression, property: &'p str) -> Self {
        Self {
            input: Box::new(input),
            object,
            property,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        let target = {
            let evaluator = ExpressionEvaluator::new(frame, ctx, View::New);
            evaluator.eval(self.object)?
        };
        write_property(
            ctx,
            target,
            self.property,
            PropertyValue::Null,
            "remove a property",
        )?;
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}

pub struct RemoveLabelsCursor<'p> {
    input: Box<Cursor<'p>>,
    input_symbol: Symbol,
    labels: &'p [String],
}

impl<'p> RemoveLabelsCursor<'p> {
    pub(super) fn new(input: Cursor<'p>, input_symbol: Symbol, labels: &'p [String]) -> Self {
        Self {
            input: Box::new(input),
            input_symbol,
            labels,
        }
    }

    pub fn pull(&mut self, frame: &mut Frame, ctx: &ExecutionContext<'_>) -> QueryResult<bool> {
        if !self.input.pull(frame, ctx)? {
            return Ok(false);
        }
        match frame.get(self.input_symbol).clone() {
            QueryValue::Null => Ok(true),
            QueryValue::Vertex(vertex) => {
                for label in self.labels {
                    if let Some(label) = ctx.accessor.find_label(label) {
                        vertex
                            .remove_label(label)
                            .map_err(|err| QueryError::from_write_error(err, "remove a label"))?;
                    }
                }
                ctx.record_change(ObjectChange::UpdatedLabels(vertex.gid()));
                Ok(true)
            }
            other => Err(QueryError::RuntimeType(format!(
                "labels can only be removed from vertices, not from {}",
                other.type_name()
            ))),
        }
    }

    pub fn reset(&mut self) {
        self.input.reset();
    }

    pub fn shutdown(&mut self) {
        self.input.shutdown();
    }
}
