use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::types::{EdgeTypeId, Gid, LabelId, PropertyId};
use crate::value::PropertyValue;

/// Entry in a vertex's incident-edge set: the vertex on the other end, the
/// edge itself and its type.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct EdgeRef {
    pub peer: Gid,
    pub edge: Gid,
    pub edge_type: EdgeTypeId,
}

/// Materialized state of one vertex version.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct VertexData {
    pub labels: SmallVec<[LabelId; 4]>,
    pub properties: BTreeMap<PropertyId, PropertyValue>,
    pub in_edges: Vec<EdgeRef>,
    pub out_edges: Vec<EdgeRef>,
}

impl VertexData {
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Property lookup; absent keys read as `Null` (a property never holds
    /// an explicit null, removal is deletion).
    pub fn property(&self, property: PropertyId) -> PropertyValue {
        self.properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null)
    }
}
