//! In-memory label and label+property indexes.
//!
//! Entries are added speculatively inside the writing transaction and
//! filtered through MVCC visibility on iteration, so a transaction sees its
//! own writes through the indexes it reads. Stale entries are removed by GC.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::mvcc::VersionChain;
use crate::storage::vertex::VertexData;
use crate::types::{Gid, LabelId, PropertyId};
use crate::value::PropertyValue;

pub type VertexChainRef = Arc<VersionChain<VertexData>>;

/// Composite key of the label+property index: the property value first, the
/// vertex gid as a tiebreaker so equal values coexist.
#[derive(Clone, Debug)]
pub struct IndexKey {
    pub value: PropertyValue,
    pub gid: Gid,
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .index_cmp(&other.value)
            .then_with(|| self.gid.cmp(&other.gid))
    }
}

#[derive(Debug, Default)]
pub struct Indexes {
    label: RwLock<HashMap<LabelId, BTreeMap<Gid, VertexChainRef>>>,
    label_property: RwLock<HashMap<(LabelId, PropertyId), BTreeMap<IndexKey, VertexChainRef>>>,
}

impl Indexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a label index. Returns `false` when it already exists; the
    /// caller populates it by scan.
    pub fn create_label_index(&self, label: LabelId) -> bool {
        self.label
            .write()
            .insert(label, BTreeMap::new())
            .is_none()
    }

    pub fn drop_label_index(&self, label: LabelId) -> bool {
        self.label.write().remove(&label).is_some()
    }

    pub fn create_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        self.label_property
            .write()
            .insert((label, property), BTreeMap::new())
            .is_none()
    }

    pub fn drop_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        self.label_property.write().remove(&(label, property)).is_some()
    }

    pub fn has_label_index(&self, label: LabelId) -> bool {
        self.label.read().contains_key(&label)
    }

    pub fn has_label_property_index(&self, label: LabelId, property: PropertyId) -> bool {
        self.label_property.read().contains_key(&(label, property))
    }

    pub fn label_definitions(&self) -> Vec<LabelId> {
        let mut labels: Vec<_> = self.label.read().keys().copied().collect();
        labels.sort();
        labels
    }

    pub fn label_property_definitions(&self) -> Vec<(LabelId, PropertyId)> {
        let mut defs: Vec<_> = self.label_property.read().keys().copied().collect();
        defs.sort();
        defs
    }

    /// Speculative insert on label gain; a no-op without a matching index.
    pub fn add_label_entry(&self, label: LabelId, chain: &VertexChainRef) {
        let mut indexes = self.label.write();
        if let Some(entries) = indexes.get_mut(&label) {
            entries.insert(chain.gid(), Arc::clone(chain));
        }
    }

    /// Speculative insert on property write under a label. Null and
    /// container values never enter the index.
    pub fn add_label_property_entry(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
        chain: &VertexChainRef,
    ) {
        if !value.is_indexable() {
            return;
        }
        let mut indexes = self.label_property.write();
        if let Some(entries) = indexes.get_mut(&(label, property)) {
            entries.insert(
                IndexKey {
                    value: value.clone(),
                    gid: chain.gid(),
                },
                Arc::clone(chain),
            );
        }
    }

    /// Snapshot of a label index, or `None` when no such index exists.
    pub fn label_entries(&self, label: LabelId) -> Option<Vec<VertexChainRef>> {
        let indexes = self.label.read();
        indexes
            .get(&label)
            .map(|entries| entries.values().cloned().collect())
    }

    pub fn label_property_entries_all(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> Option<Vec<VertexChainRef>> {
        let indexes = self.label_property.read();
        indexes
            .get(&(label, property))
            .map(|entries| entries.values().cloned().collect())
    }

    pub fn label_property_entries_value(
        &self,
        label: LabelId,
        property: PropertyId,
        value: &PropertyValue,
    ) -> Option<Vec<VertexChainRef>> {
        let lower = Bound::Included(IndexKey {
            value: value.clone(),
            gid: Gid(0),
        });
        let upper = Bound::Included(IndexKey {
            value: value.clone(),
            gid: Gid(u64::MAX),
        });
        let indexes = self.label_property.read();
        indexes
            .get(&(label, property))
            .map(|entries| entries.range((lower, upper)).map(|(_, v)| v.clone()).collect())
    }

    pub fn label_property_entries_range(
        &self,
        label: LabelId,
        property: PropertyId,
        lower: &Bound<PropertyValue>,
        upper: &Bound<PropertyValue>,
    ) -> Option<Vec<VertexChainRef>> {
        let lower_key = match lower {
            Bound::Included(value) => Bound::Included(IndexKey {
                value: value.clone(),
                gid: Gid(0),
            }),
            Bound::Excluded(value) => Bound::Excluded(IndexKey {
                value: value.clone(),
                gid: Gid(u64::MAX),
            }),
            Bound::Unbounded => Bound::Unbounded,
        };
        let upper_key = match upper {
            Bound::Included(value) => Bound::Included(IndexKey {
                value: value.clone(),
                gid: Gid(u64::MAX),
            }),
            Bound::Excluded(value) => Bound::Excluded(IndexKey {
                value: value.clone(),
                gid: Gid(0),
            }),
            Bound::Unbounded => Bound::Unbounded,
        };
        let indexes = self.label_property.read();
        indexes.get(&(label, property)).map(|entries| {
            entries
                .range((lower_key, upper_key))
                .map(|(_, v)| v.clone())
                .collect()
        })
    }

    /// Drops every entry pointing at a garbage-collected gid.
    pub fn remove_gids(&self, gids: &HashSet<Gid>) {
        if gids.is_empty() {
            return;
        }
        let mut label = self.label.write();
        for entries in label.values_mut() {
            entries.retain(|gid, _| !gids.contains(gid));
        }
        drop(label);
        let mut label_property = self.label_property.write();
        for entries in label_property.values_mut() {
            entries.retain(|key, _| !gids.contains(&key.gid));
        }
    }
}

/// Range re-validation applied when iterating candidates: the stored value
/// must order within the same type family as each present bound.
pub fn value_in_range(
    value: &PropertyValue,
    lower: &Bound<PropertyValue>,
    upper: &Bound<PropertyValue>,
) -> bool {
    let check = |bound: &Bound<PropertyValue>, is_lower: bool| match bound {
        Bound::Unbounded => true,
        Bound::Included(limit) | Bound::Excluded(limit) => {
            if !value.in_same_order_family(limit) {
                return false;
            }
            let ordering = value.index_cmp(limit);
            match (bound, is_lower) {
                (Bound::Included(_), true) => ordering != Ordering::Less,
                (Bound::Excluded(_), true) => ordering == Ordering::Greater,
                (Bound::Included(_), false) => ordering != Ordering::Greater,
                (Bound::Excluded(_), false) => ordering == Ordering::Less,
                (Bound::Unbounded, _) => unreachable!(),
            }
        }
    };
    check(lower, true) && check(upper, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_validation_respects_type_families() {
        let lower = Bound::Included(PropertyValue::Int(5));
        let upper = Bound::Unbounded;
        assert!(value_in_range(&PropertyValue::Int(5), &lower, &upper));
        assert!(value_in_range(&PropertyValue::Double(5.5), &lower, &upper));
        assert!(!value_in_range(&PropertyValue::Int(4), &lower, &upper));
        // Strings sort above numbers in the index but are not comparable to
        // a numeric bound.
        assert!(!value_in_range(
            &PropertyValue::String("x".into()),
            &lower,
            &upper
        ));
    }

    #[test]
    fn exclusive_bounds() {
        let lower = Bound::Excluded(PropertyValue::Int(1));
        let upper = Bound::Excluded(PropertyValue::Int(3));
        assert!(!value_in_range(&PropertyValue::Int(1), &lower, &upper));
        assert!(value_in_range(&PropertyValue::Int(2), &lower, &upper));
        assert!(!value_in_range(&PropertyValue::Int(3), &lower, &upper));
    }
}
