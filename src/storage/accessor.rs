//! Transaction-scoped views over the storage: the `Accessor` all reads and
//! writes flow through, plus per-element `VertexAccessor`/`EdgeAccessor`
//! handles that enforce MVCC visibility and the write discipline.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::storage::delta::{Delta, ElementRef};
use crate::storage::edge::EdgeData;
use crate::storage::index::{value_in_range, VertexChainRef};
use crate::storage::mvcc::VersionChain;
use crate::storage::transaction::{Claim, Transaction, TransactionState};
use crate::storage::vertex::{EdgeRef, VertexData};
use crate::storage::{EdgeChainRef, Storage};
use crate::types::{EdgeTypeId, Gid, LabelId, PropertyId, TxId, View};
use crate::value::PropertyValue;

/// Edge expansion direction.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Transaction-scoped handle through which all reads and writes flow.
///
/// Dropping an accessor with an unfinished transaction aborts it.
pub struct Accessor {
    storage: Arc<Storage>,
    tx: Arc<Mutex<Transaction>>,
}

impl Accessor {
    pub(crate) fn new(storage: Arc<Storage>, tx: Transaction) -> Self {
        Self {
            storage,
            tx: Arc::new(Mutex::new(tx)),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn transaction_id(&self) -> TxId {
        self.tx.lock().id
    }

    /// Ids that were active when this transaction began, sorted.
    pub(crate) fn transaction_snapshot(&self) -> Vec<TxId> {
        let tx = self.tx.lock();
        let mut ids: Vec<TxId> = tx.snapshot.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Makes the transaction's own writes visible to its subsequent `Old`
    /// reads.
    pub fn advance_command(&self) {
        let mut tx = self.tx.lock();
        tx.command += 1;
    }

    pub fn commit(self) -> StorageResult<()> {
        let mut tx = self.tx.lock();
        if tx.state != TransactionState::Active {
            return Ok(());
        }
        self.storage.commit_transaction(&mut tx)
    }

    pub fn abort(self) {
        let mut tx = self.tx.lock();
        if tx.state == TransactionState::Active {
            self.storage.abort_locked(&mut tx);
        }
    }

    // ---- name interning ----

    pub fn label_id(&self, name: &str) -> LabelId {
        LabelId(self.storage.labels.intern(name))
    }

    pub fn find_label(&self, name: &str) -> Option<LabelId> {
        self.storage.labels.get(name).map(LabelId)
    }

    pub fn label_name(&self, label: LabelId) -> String {
        self.storage.labels.name_of(label.0)
    }

    pub fn edge_type_id(&self, name: &str) -> EdgeTypeId {
        EdgeTypeId(self.storage.edge_types.intern(name))
    }

    pub fn find_edge_type(&self, name: &str) -> Option<EdgeTypeId> {
        self.storage.edge_types.get(name).map(EdgeTypeId)
    }

    pub fn edge_type_name(&self, edge_type: EdgeTypeId) -> String {
        self.storage.edge_types.name_of(edge_type.0)
    }

    pub fn property_id(&self, name: &str) -> PropertyId {
        PropertyId(self.storage.properties.intern(name))
    }

    pub fn find_property(&self, name: &str) -> Option<PropertyId> {
        self.storage.properties.get(name).map(PropertyId)
    }

    pub fn property_name(&self, property: PropertyId) -> String {
        self.storage.properties.name_of(property.0)
    }

    // ---- creation ----

    pub fn create_vertex(&self) -> StorageResult<VertexAccessor> {
        let gid = self.storage.allocate_vertex_gid()?;
        self.create_vertex_at(gid)
    }

    /// Creation with an explicit gid; recovery and replication only.
    pub(crate) fn create_vertex_at(&self, gid: Gid) -> StorageResult<VertexAccessor> {
        let mut tx = self.tx.lock();
        self.storage.next_vertex_id.fetch_max(gid.0 + 1, std::sync::atomic::Ordering::SeqCst);
        let chain = Arc::new(VersionChain::new(gid, VertexData::default(), tx.current_stamp()));
        {
            let mut vertices = self.storage.vertices.write();
            if vertices.contains_key(&gid) {
                return Err(StorageError::Creation("vertex gid already in use"));
            }
            vertices.insert(gid, Arc::clone(&chain));
        }
        tx.claims.push(Claim::Vertex(Arc::clone(&chain)));
        tx.deltas.push(Delta::CreateVertex { gid });
        Ok(VertexAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    pub fn create_edge(
        &self,
        from: &VertexAccessor,
        to: &VertexAccessor,
        edge_type: EdgeTypeId,
    ) -> StorageResult<EdgeAccessor> {
        let gid = self.storage.allocate_edge_gid()?;
        self.create_edge_at(gid, from.gid(), to.gid(), edge_type)
    }

    pub(crate) fn create_edge_at(
        &self,
        gid: Gid,
        from: Gid,
        to: Gid,
        edge_type: EdgeTypeId,
    ) -> StorageResult<EdgeAccessor> {
        let mut tx = self.tx.lock();
        self.storage.next_edge_id.fetch_max(gid.0 + 1, std::sync::atomic::Ordering::SeqCst);
        let from_chain = self.vertex_chain(from)?;
        let to_chain = self.vertex_chain(to)?;
        claim_vertex(&mut tx, &self.storage, &from_chain)?;
        claim_vertex(&mut tx, &self.storage, &to_chain)?;
        let chain = Arc::new(VersionChain::new(
            gid,
            EdgeData::new(from, to, edge_type),
            tx.current_stamp(),
        ));
        {
            let mut edges = self.storage.edges.write();
            if edges.contains_key(&gid) {
                return Err(StorageError::Creation("edge gid already in use"));
            }
            edges.insert(gid, Arc::clone(&chain));
        }
        tx.claims.push(Claim::Edge(Arc::clone(&chain)));
        let engine = &self.storage.engine;
        from_chain.update(&tx, engine, |data| {
            data.out_edges.push(EdgeRef {
                peer: to,
                edge: gid,
                edge_type,
            });
            Ok(())
        })?;
        to_chain.update(&tx, engine, |data| {
            data.in_edges.push(EdgeRef {
                peer: from,
                edge: gid,
                edge_type,
            });
            Ok(())
        })?;
        tx.deltas.push(Delta::CreateEdge {
            gid,
            from,
            to,
            edge_type,
        });
        Ok(EdgeAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    // ---- deletion ----

    /// Deletes an isolated vertex. Fails with `VertexHasEdges` when incident
    /// edges remain; `DeletedObject` when the vertex is already deleted in
    /// this transaction.
    pub fn delete_vertex(&self, vertex: &VertexAccessor) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        let engine = &self.storage.engine;
        claim_vertex(&mut tx, &self.storage, &vertex.chain)?;
        match vertex
            .chain
            .with_visible(&tx, View::New, engine, |data| {
                data.in_edges.len() + data.out_edges.len()
            }) {
            Some(0) => {}
            Some(_) => return Err(StorageError::VertexHasEdges),
            None => return Err(StorageError::DeletedObject),
        }
        vertex.chain.mark_deleted(&tx, engine)?;
        tx.deltas.push(Delta::DeleteVertex { gid: vertex.gid() });
        Ok(true)
    }

    /// Deletes a vertex together with all of its incident edges, in this
    /// transaction.
    pub fn detach_delete_vertex(&self, vertex: &VertexAccessor) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        let engine = &self.storage.engine;
        claim_vertex(&mut tx, &self.storage, &vertex.chain)?;
        let Some((in_edges, out_edges)) = vertex
            .chain
            .with_visible(&tx, View::New, engine, |data| {
                (data.in_edges.clone(), data.out_edges.clone())
            })
        else {
            return Err(StorageError::DeletedObject);
        };
        for edge_ref in out_edges.iter().chain(in_edges.iter()) {
            let Some(chain) = self.storage.edges.read().get(&edge_ref.edge).cloned() else {
                continue;
            };
            self.delete_edge_inner(&mut tx, &chain)?;
        }
        vertex.chain.mark_deleted(&tx, engine)?;
        tx.deltas.push(Delta::DeleteVertex { gid: vertex.gid() });
        Ok(true)
    }

    pub fn delete_edge(&self, edge: &EdgeAccessor) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        self.delete_edge_inner(&mut tx, &edge.chain)
    }

    fn delete_edge_inner(
        &self,
        tx: &mut Transaction,
        chain: &EdgeChainRef,
    ) -> StorageResult<bool> {
        let engine = &self.storage.engine;
        let (from, to) = chain
            .with_newest(|data| (data.from, data.to))
            .ok_or(StorageError::NonexistentObject)?;
        claim_edge(tx, &self.storage, chain)?;
        let from_chain = self.vertex_chain(from)?;
        let to_chain = self.vertex_chain(to)?;
        claim_vertex(tx, &self.storage, &from_chain)?;
        claim_vertex(tx, &self.storage, &to_chain)?;
        match chain.mark_deleted(tx, engine) {
            Ok(()) => {}
            Err(StorageError::DeletedObject) => return Ok(false),
            Err(err) => return Err(err),
        }
        let gid = chain.gid();
        from_chain.update(tx, engine, |data| {
            data.out_edges.retain(|edge_ref| edge_ref.edge != gid);
            Ok(())
        })?;
        to_chain.update(tx, engine, |data| {
            data.in_edges.retain(|edge_ref| edge_ref.edge != gid);
            Ok(())
        })?;
        tx.deltas.push(Delta::DeleteEdge { gid });
        Ok(true)
    }

    // ---- lookup and scans ----

    pub fn find_vertex(&self, gid: Gid, view: View) -> Option<VertexAccessor> {
        let chain = self.storage.vertices.read().get(&gid).cloned()?;
        let tx = self.tx.lock();
        if !chain.is_visible(&tx, view, &self.storage.engine) {
            return None;
        }
        drop(tx);
        Some(VertexAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    pub fn find_edge(&self, gid: Gid, view: View) -> Option<EdgeAccessor> {
        let chain = self.storage.edges.read().get(&gid).cloned()?;
        let tx = self.tx.lock();
        if !chain.is_visible(&tx, view, &self.storage.engine) {
            return None;
        }
        drop(tx);
        Some(EdgeAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    /// Every vertex visible under `view`.
    pub fn vertices(&self, view: View) -> VertexStream {
        let handles: Vec<VertexChainRef> = self.storage.vertices.read().values().cloned().collect();
        self.vertex_stream(handles, view, VertexFilter::All)
    }

    /// Vertices carrying `label`; served by the label index when present.
    pub fn vertices_by_label(&self, label: LabelId, view: View) -> VertexStream {
        let handles = self
            .storage
            .indexes
            .label_entries(label)
            .unwrap_or_else(|| self.storage.vertices.read().values().cloned().collect());
        self.vertex_stream(handles, view, VertexFilter::Label(label))
    }

    /// Vertices carrying `label` with any non-null value for `property`.
    pub fn vertices_by_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
        view: View,
    ) -> VertexStream {
        let handles = self
            .storage
            .indexes
            .label_property_entries_all(label, property)
            .unwrap_or_else(|| self.storage.vertices.read().values().cloned().collect());
        self.vertex_stream(handles, view, VertexFilter::LabelProperty { label, property })
    }

    /// Vertices where `property` equals `value` under `label`.
    pub fn vertices_by_label_property_value(
        &self,
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
        view: View,
    ) -> VertexStream {
        let handles = self
            .storage
            .indexes
            .label_property_entries_value(label, property, &value)
            .unwrap_or_else(|| self.storage.vertices.read().values().cloned().collect());
        self.vertex_stream(
            handles,
            view,
            VertexFilter::LabelPropertyValue {
                label,
                property,
                value,
            },
        )
    }

    /// Vertices whose `property` orders within the given bounds under
    /// `label`.
    pub fn vertices_by_label_property_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
        view: View,
    ) -> VertexStream {
        let handles = self
            .storage
            .indexes
            .label_property_entries_range(label, property, &lower, &upper)
            .unwrap_or_else(|| self.storage.vertices.read().values().cloned().collect());
        self.vertex_stream(
            handles,
            view,
            VertexFilter::LabelPropertyRange {
                label,
                property,
                lower,
                upper,
            },
        )
    }

    fn vertex_stream(
        &self,
        handles: Vec<VertexChainRef>,
        view: View,
        filter: VertexFilter,
    ) -> VertexStream {
        VertexStream {
            handles: handles.into_iter(),
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
            view,
            filter,
        }
    }

    /// Every edge visible under `view`.
    pub fn edges(&self, view: View) -> EdgeStream {
        let handles: Vec<EdgeChainRef> = self.storage.edges.read().values().cloned().collect();
        EdgeStream {
            handles: handles.into_iter(),
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
            view,
        }
    }

    // ---- DDL ----

    pub fn create_label_index(&self, label: LabelId) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.indexes.create_label_index(label) {
            return Ok(false);
        }
        let handles: Vec<VertexChainRef> = self.storage.vertices.read().values().cloned().collect();
        for chain in handles {
            let has = chain
                .with_visible(&tx, View::New, &self.storage.engine, |data| {
                    data.has_label(label)
                })
                .unwrap_or(false);
            if has {
                self.storage.indexes.add_label_entry(label, &chain);
            }
        }
        tx.deltas.push(Delta::BuildLabelIndex { label });
        debug!(label = label.0, "label index built");
        Ok(true)
    }

    pub fn drop_label_index(&self, label: LabelId) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.indexes.drop_label_index(label) {
            return Ok(false);
        }
        tx.deltas.push(Delta::DropLabelIndex { label });
        Ok(true)
    }

    pub fn create_label_property_index(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.indexes.create_label_property_index(label, property) {
            return Ok(false);
        }
        let handles: Vec<VertexChainRef> = self.storage.vertices.read().values().cloned().collect();
        for chain in handles {
            let value = chain.with_visible(&tx, View::New, &self.storage.engine, |data| {
                data.has_label(label).then(|| data.property(property))
            });
            if let Some(Some(value)) = value {
                self.storage
                    .indexes
                    .add_label_property_entry(label, property, &value, &chain);
            }
        }
        tx.deltas.push(Delta::BuildLabelPropertyIndex { label, property });
        debug!(label = label.0, property = property.0, "label+property index built");
        Ok(true)
    }

    pub fn drop_label_property_index(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.indexes.drop_label_property_index(label, property) {
            return Ok(false);
        }
        tx.deltas.push(Delta::DropLabelPropertyIndex { label, property });
        Ok(true)
    }

    /// Requires every vertex with `label` to carry `property`. Validates
    /// existing data before registering.
    pub fn create_existence_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        {
            if self.storage.constraints.existence.read().contains(&(label, property)) {
                return Ok(false);
            }
            let handles: Vec<VertexChainRef> =
                self.storage.vertices.read().values().cloned().collect();
            for chain in handles {
                let violates = chain
                    .with_visible(&tx, View::New, &self.storage.engine, |data| {
                        data.has_label(label) && !data.properties.contains_key(&property)
                    })
                    .unwrap_or(false);
                if violates {
                    return Err(StorageError::ConstraintViolation(format!(
                        "existing vertex {} violates the existence constraint",
                        chain.gid()
                    )));
                }
            }
            self.storage.constraints.existence.write().insert((label, property));
        }
        tx.deltas.push(Delta::CreateExistenceConstraint { label, property });
        Ok(true)
    }

    pub fn drop_existence_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.constraints.existence.write().remove(&(label, property)) {
            return Ok(false);
        }
        tx.deltas.push(Delta::DropExistenceConstraint { label, property });
        Ok(true)
    }

    /// Requires `property` values to be unique among vertices with `label`.
    pub fn create_uniqueness_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        {
            if self.storage.constraints.unique.read().contains(&(label, property)) {
                return Ok(false);
            }
            let handles: Vec<VertexChainRef> =
                self.storage.vertices.read().values().cloned().collect();
            let mut values: Vec<PropertyValue> = Vec::new();
            for chain in handles {
                let value = chain.with_visible(&tx, View::New, &self.storage.engine, |data| {
                    data.has_label(label).then(|| data.properties.get(&property).cloned())
                });
                if let Some(Some(Some(value))) = value {
                    values.push(value);
                }
            }
            values.sort_by(|a, b| a.index_cmp(b));
            for pair in values.windows(2) {
                if pair[0].index_cmp(&pair[1]) == std::cmp::Ordering::Equal {
                    return Err(StorageError::ConstraintViolation(
                        "existing data violates the uniqueness constraint".into(),
                    ));
                }
            }
            self.storage.constraints.unique.write().insert((label, property));
        }
        tx.deltas.push(Delta::CreateUniquenessConstraint { label, property });
        Ok(true)
    }

    pub fn drop_uniqueness_constraint(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        if !self.storage.constraints.unique.write().remove(&(label, property)) {
            return Ok(false);
        }
        tx.deltas.push(Delta::DropUniquenessConstraint { label, property });
        Ok(true)
    }

    // ---- recovery / replication ----

    /// Applies one decoded delta; recovery and replica catch-up only.
    pub(crate) fn apply_delta(&self, delta: &Delta) -> StorageResult<()> {
        match delta {
            Delta::CreateVertex { gid } => {
                self.create_vertex_at(*gid)?;
            }
            Delta::DeleteVertex { gid } => {
                let vertex = self
                    .find_vertex(*gid, View::New)
                    .ok_or(StorageError::NonexistentObject)?;
                self.delete_vertex(&vertex)?;
            }
            Delta::AddLabel { gid, label } => {
                let vertex = self
                    .find_vertex(*gid, View::New)
                    .ok_or(StorageError::NonexistentObject)?;
                vertex.add_label(*label)?;
            }
            Delta::RemoveLabel { gid, label } => {
                let vertex = self
                    .find_vertex(*gid, View::New)
                    .ok_or(StorageError::NonexistentObject)?;
                vertex.remove_label(*label)?;
            }
            Delta::SetProperty {
                target,
                property,
                value,
            } => match target {
                ElementRef::Vertex(gid) => {
                    let vertex = self
                        .find_vertex(*gid, View::New)
                        .ok_or(StorageError::NonexistentObject)?;
                    vertex.set_property(*property, value.clone())?;
                }
                ElementRef::Edge(gid) => {
                    let edge = self
                        .find_edge(*gid, View::New)
                        .ok_or(StorageError::NonexistentObject)?;
                    edge.set_property(*property, value.clone())?;
                }
            },
            Delta::RemoveProperty { target, property } => match target {
                ElementRef::Vertex(gid) => {
                    let vertex = self
                        .find_vertex(*gid, View::New)
                        .ok_or(StorageError::NonexistentObject)?;
                    vertex.set_property(*property, PropertyValue::Null)?;
                }
                ElementRef::Edge(gid) => {
                    let edge = self
                        .find_edge(*gid, View::New)
                        .ok_or(StorageError::NonexistentObject)?;
                    edge.set_property(*property, PropertyValue::Null)?;
                }
            },
            Delta::CreateEdge {
                gid,
                from,
                to,
                edge_type,
            } => {
                self.create_edge_at(*gid, *from, *to, *edge_type)?;
            }
            Delta::DeleteEdge { gid } => {
                let chain = self
                    .storage
                    .edges
                    .read()
                    .get(gid)
                    .cloned()
                    .ok_or(StorageError::NonexistentObject)?;
                let mut tx = self.tx.lock();
                self.delete_edge_inner(&mut tx, &chain)?;
            }
            Delta::BuildLabelIndex { label } => {
                self.create_label_index(*label)?;
            }
            Delta::DropLabelIndex { label } => {
                self.drop_label_index(*label)?;
            }
            Delta::BuildLabelPropertyIndex { label, property } => {
                self.create_label_property_index(*label, *property)?;
            }
            Delta::DropLabelPropertyIndex { label, property } => {
                self.drop_label_property_index(*label, *property)?;
            }
            Delta::CreateExistenceConstraint { label, property } => {
                self.create_existence_constraint(*label, *property)?;
            }
            Delta::DropExistenceConstraint { label, property } => {
                self.drop_existence_constraint(*label, *property)?;
            }
            Delta::CreateUniquenessConstraint { label, property } => {
                self.create_uniqueness_constraint(*label, *property)?;
            }
            Delta::DropUniquenessConstraint { label, property } => {
                self.drop_uniqueness_constraint(*label, *property)?;
            }
        }
        Ok(())
    }

    fn vertex_chain(&self, gid: Gid) -> StorageResult<VertexChainRef> {
        self.storage
            .vertices
            .read()
            .get(&gid)
            .cloned()
            .ok_or(StorageError::NonexistentObject)
    }
}

impl Drop for Accessor {
    fn drop(&mut self) {
        let mut tx = self.tx.lock();
        if tx.state == TransactionState::Active {
            self.storage.abort_locked(&mut tx);
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("tx_id", &self.tx.lock().id.0)
            .finish()
    }
}

fn claim_vertex(
    tx: &mut Transaction,
    storage: &Storage,
    chain: &VertexChainRef,
) -> StorageResult<()> {
    if chain.prepare_write(tx, &storage.engine)? {
        tx.claims.push(Claim::Vertex(Arc::clone(chain)));
    }
    Ok(())
}

fn claim_edge(tx: &mut Transaction, storage: &Storage, chain: &EdgeChainRef) -> StorageResult<()> {
    if chain.prepare_write(tx, &storage.engine)? {
        tx.claims.push(Claim::Edge(Arc::clone(chain)));
    }
    Ok(())
}

/// Handle to one vertex, bound to the accessor's transaction.
#[derive(Clone)]
pub struct VertexAccessor {
    chain: VertexChainRef,
    storage: Arc<Storage>,
    tx: Arc<Mutex<Transaction>>,
}

impl VertexAccessor {
    pub fn gid(&self) -> Gid {
        self.chain.gid()
    }

    pub fn is_visible(&self, view: View) -> bool {
        let tx = self.tx.lock();
        self.chain.is_visible(&tx, view, &self.storage.engine)
    }

    pub fn labels(&self, view: View) -> StorageResult<Vec<LabelId>> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.labels.to_vec())
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn has_label(&self, label: LabelId, view: View) -> StorageResult<bool> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.has_label(label))
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn properties(&self, view: View) -> StorageResult<BTreeMap<PropertyId, PropertyValue>> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.properties.clone())
            .ok_or(StorageError::NonexistentObject)
    }

    /// Value of `property`, `Null` when unset.
    pub fn property(&self, property: PropertyId, view: View) -> StorageResult<PropertyValue> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.property(property))
            .ok_or(StorageError::NonexistentObject)
    }

    /// Incident edges in `direction`, optionally restricted to edge types.
    pub fn edges(
        &self,
        direction: Direction,
        edge_types: Option<&[EdgeTypeId]>,
        view: View,
    ) -> StorageResult<Vec<EdgeAccessor>> {
        let refs = {
            let tx = self.tx.lock();
            self.chain
                .with_visible(&tx, view, &self.storage.engine, |data| match direction {
                    Direction::In => data.in_edges.clone(),
                    Direction::Out => data.out_edges.clone(),
                    Direction::Both => {
                        let mut all = data.in_edges.clone();
                        all.extend(data.out_edges.iter().copied());
                        all
                    }
                })
                .ok_or(StorageError::NonexistentObject)?
        };
        let mut result = Vec::with_capacity(refs.len());
        let edges = self.storage.edges.read();
        for edge_ref in refs {
            if let Some(types) = edge_types {
                if !types.contains(&edge_ref.edge_type) {
                    continue;
                }
            }
            if let Some(chain) = edges.get(&edge_ref.edge) {
                result.push(EdgeAccessor {
                    chain: Arc::clone(chain),
                    storage: Arc::clone(&self.storage),
                    tx: Arc::clone(&self.tx),
                });
            }
        }
        Ok(result)
    }

    /// Raw incident-edge records, used by the snapshot writer.
    pub(crate) fn edge_refs(&self, view: View) -> StorageResult<(Vec<EdgeRef>, Vec<EdgeRef>)> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| {
                (data.in_edges.clone(), data.out_edges.clone())
            })
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn in_degree(&self, view: View) -> StorageResult<usize> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.in_edges.len())
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn out_degree(&self, view: View) -> StorageResult<usize> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.out_edges.len())
            .ok_or(StorageError::NonexistentObject)
    }

    /// Adds a label; `false` when already present.
    pub fn add_label(&self, label: LabelId) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        claim_vertex(&mut tx, &self.storage, &self.chain)?;
        let mut added = false;
        self.chain.update(&tx, &self.storage.engine, |data| {
            if !data.has_label(label) {
                data.labels.push(label);
                added = true;
            }
            Ok(())
        })?;
        if !added {
            return Ok(false);
        }
        tx.deltas.push(Delta::AddLabel {
            gid: self.gid(),
            label,
        });
        self.storage.indexes.add_label_entry(label, &self.chain);
        let properties = self
            .chain
            .with_visible(&tx, View::New, &self.storage.engine, |data| {
                data.properties.clone()
            })
            .unwrap_or_default();
        for (property, value) in properties {
            self.storage
                .indexes
                .add_label_property_entry(label, property, &value, &self.chain);
        }
        Ok(true)
    }

    /// Removes a label; `false` when it was not present.
    pub fn remove_label(&self, label: LabelId) -> StorageResult<bool> {
        let mut tx = self.tx.lock();
        claim_vertex(&mut tx, &self.storage, &self.chain)?;
        let mut removed = false;
        self.chain.update(&tx, &self.storage.engine, |data| {
            let before = data.labels.len();
            data.labels.retain(|have| *have != label);
            removed = data.labels.len() != before;
            Ok(())
        })?;
        if !removed {
            return Ok(false);
        }
        tx.deltas.push(Delta::RemoveLabel {
            gid: self.gid(),
            label,
        });
        Ok(true)
    }

    /// Sets `property` to `value`, returning the previous value. A `Null`
    /// value removes the entry: properties never hold explicit nulls.
    pub fn set_property(
        &self,
        property: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        let mut tx = self.tx.lock();
        claim_vertex(&mut tx, &self.storage, &self.chain)?;
        let mut previous = PropertyValue::Null;
        let is_removal = value.is_null();
        let stored = value.clone();
        self.chain.update(&tx, &self.storage.engine, |data| {
            previous = if is_removal {
                data.properties.remove(&property).unwrap_or(PropertyValue::Null)
            } else {
                data.properties
                    .insert(property, stored.clone())
                    .unwrap_or(PropertyValue::Null)
            };
            Ok(())
        })?;
        if is_removal {
            tx.deltas.push(Delta::RemoveProperty {
                target: ElementRef::Vertex(self.gid()),
                property,
            });
        } else {
            tx.deltas.push(Delta::SetProperty {
                target: ElementRef::Vertex(self.gid()),
                property,
                value: value.clone(),
            });
            let labels = self
                .chain
                .with_visible(&tx, View::New, &self.storage.engine, |data| {
                    data.labels.to_vec()
                })
                .unwrap_or_default();
            for label in labels {
                self.storage
                    .indexes
                    .add_label_property_entry(label, property, &value, &self.chain);
            }
        }
        Ok(previous)
    }
}

impl PartialEq for VertexAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.gid() == other.gid()
    }
}

impl Eq for VertexAccessor {}

impl fmt::Debug for VertexAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexAccessor({})", self.gid())
    }
}

/// Handle to one edge, bound to the accessor's transaction.
#[derive(Clone)]
pub struct EdgeAccessor {
    chain: EdgeChainRef,
    storage: Arc<Storage>,
    tx: Arc<Mutex<Transaction>>,
}

impl EdgeAccessor {
    pub fn gid(&self) -> Gid {
        self.chain.gid()
    }

    pub fn is_visible(&self, view: View) -> bool {
        let tx = self.tx.lock();
        self.chain.is_visible(&tx, view, &self.storage.engine)
    }

    /// Endpoints and type are fixed at creation and readable from any
    /// version.
    pub fn edge_type(&self) -> StorageResult<EdgeTypeId> {
        self.chain
            .with_newest(|data| data.edge_type)
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn from_gid(&self) -> StorageResult<Gid> {
        self.chain
            .with_newest(|data| data.from)
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn to_gid(&self) -> StorageResult<Gid> {
        self.chain
            .with_newest(|data| data.to)
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn from_vertex(&self) -> StorageResult<VertexAccessor> {
        let gid = self.from_gid()?;
        let chain = self
            .storage
            .vertices
            .read()
            .get(&gid)
            .cloned()
            .ok_or(StorageError::NonexistentObject)?;
        Ok(VertexAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    pub fn to_vertex(&self) -> StorageResult<VertexAccessor> {
        let gid = self.to_gid()?;
        let chain = self
            .storage
            .vertices
            .read()
            .get(&gid)
            .cloned()
            .ok_or(StorageError::NonexistentObject)?;
        Ok(VertexAccessor {
            chain,
            storage: Arc::clone(&self.storage),
            tx: Arc::clone(&self.tx),
        })
    }

    pub fn properties(&self, view: View) -> StorageResult<BTreeMap<PropertyId, PropertyValue>> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.properties.clone())
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn property(&self, property: PropertyId, view: View) -> StorageResult<PropertyValue> {
        let tx = self.tx.lock();
        self.chain
            .with_visible(&tx, view, &self.storage.engine, |data| data.property(property))
            .ok_or(StorageError::NonexistentObject)
    }

    pub fn set_property(
        &self,
        property: PropertyId,
        value: PropertyValue,
    ) -> StorageResult<PropertyValue> {
        if !self.storage.config.edge_properties {
            return Err(StorageError::PropertiesDisabled);
        }
        let mut tx = self.tx.lock();
        claim_edge(&mut tx, &self.storage, &self.chain)?;
        let mut previous = PropertyValue::Null;
        let is_removal = value.is_null();
        let stored = value.clone();
        self.chain.update(&tx, &self.storage.engine, |data| {
            previous = if is_removal {
                data.properties.remove(&property).unwrap_or(PropertyValue::Null)
            } else {
                data.properties
                    .insert(property, stored.clone())
                    .unwrap_or(PropertyValue::Null)
            };
            Ok(())
        })?;
        if is_removal {
            tx.deltas.push(Delta::RemoveProperty {
                target: ElementRef::Edge(self.gid()),
                property,
            });
        } else {
            tx.deltas.push(Delta::SetProperty {
                target: ElementRef::Edge(self.gid()),
                property,
                value,
            });
        }
        Ok(previous)
    }
}

impl PartialEq for EdgeAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.gid() == other.gid()
    }
}

impl Eq for EdgeAccessor {}

impl fmt::Debug for EdgeAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeAccessor({})", self.gid())
    }
}

enum VertexFilter {
    All,
    Label(LabelId),
    LabelProperty {
        label: LabelId,
        property: PropertyId,
    },
    LabelPropertyValue {
        label: LabelId,
        property: PropertyId,
        value: PropertyValue,
    },
    LabelPropertyRange {
        label: LabelId,
        property: PropertyId,
        lower: Bound<PropertyValue>,
        upper: Bound<PropertyValue>,
    },
}

impl VertexFilter {
    fn matches(&self, data: &VertexData) -> bool {
        match self {
            VertexFilter::All => true,
            VertexFilter::Label(label) => data.has_label(*label),
            VertexFilter::LabelProperty { label, property } => {
                data.has_label(*label) && data.properties.contains_key(property)
            }
            VertexFilter::LabelPropertyValue {
                label,
                property,
                value,
            } => {
                data.has_label(*label)
                    && value.is_indexable()
                    && data
                        .properties
                        .get(property)
                        .is_some_and(|have| have.index_cmp(value) == std::cmp::Ordering::Equal)
            }
            VertexFilter::LabelPropertyRange {
                label,
                property,
                lower,
                upper,
            } => {
                data.has_label(*label)
                    && data.properties.get(property).is_some_and(|have| {
                        have.is_indexable() && value_in_range(have, lower, upper)
                    })
            }
        }
    }
}

/// Lazy stream of visible vertices; candidates were snapshotted from the
/// container or an index and are re-validated against MVCC state as the
/// stream advances.
pub struct VertexStream {
    handles: std::vec::IntoIter<VertexChainRef>,
    storage: Arc<Storage>,
    tx: Arc<Mutex<Transaction>>,
    view: View,
    filter: VertexFilter,
}

impl Iterator for VertexStream {
    type Item = VertexAccessor;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chain = self.handles.next()?;
            let passes = {
                let tx = self.tx.lock();
                chain
                    .with_visible(&tx, self.view, &self.storage.engine, |data| {
                        self.filter.matches(data)
                    })
                    .unwrap_or(false)
            };
            if passes {
                return Some(VertexAccessor {
                    chain,
                    storage: Arc::clone(&self.storage),
                    tx: Arc::clone(&self.tx),
                });
            }
        }
    }
}

/// Lazy stream of visible edges.
pub struct EdgeStream {
    handles: std::vec::IntoIter<EdgeChainRef>,
    storage: Arc<Storage>,
    tx: Arc<Mutex<Transaction>>,
    view: View,
}

impl Iterator for EdgeStream {
    type Item = EdgeAccessor;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let chain = self.handles.next()?;
            let visible = {
                let tx = self.tx.lock();
                chain.is_visible(&tx, self.view, &self.storage.engine)
            };
            if visible {
                return Some(EdgeAccessor {
                    chain,
                    storage: Arc::clone(&self.storage),
                    tx: Arc::clone(&self.tx),
                });
            }
        }
    }
}
