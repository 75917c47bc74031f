use std::collections::BTreeMap;

use crate::types::{EdgeTypeId, Gid, PropertyId};
use crate::value::PropertyValue;

/// Materialized state of one edge version. Endpoints and type are fixed at
/// creation; only the property map is versioned in practice.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeData {
    pub from: Gid,
    pub to: Gid,
    pub edge_type: EdgeTypeId,
    pub properties: BTreeMap<PropertyId, PropertyValue>,
}

impl EdgeData {
    pub fn new(from: Gid, to: Gid, edge_type: EdgeTypeId) -> Self {
        Self {
            from,
            to,
            edge_type,
            properties: BTreeMap::new(),
        }
    }

    pub fn property(&self, property: PropertyId) -> PropertyValue {
        self.properties
            .get(&property)
            .cloned()
            .unwrap_or(PropertyValue::Null)
    }
}
