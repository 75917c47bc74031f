use crate::types::{EdgeTypeId, Gid, LabelId, PropertyId};
use crate::value::PropertyValue;

/// Reference to the element a property delta targets.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ElementRef {
    Vertex(Gid),
    Edge(Gid),
}

/// One logical mutation, recorded in the transaction's write set in program
/// order. The same vocabulary flows into the WAL and the replication stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    CreateVertex {
        gid: Gid,
    },
    DeleteVertex {
        gid: Gid,
    },
    AddLabel {
        gid: Gid,
        label: LabelId,
    },
    RemoveLabel {
        gid: Gid,
        label: LabelId,
    },
    SetProperty {
        target: ElementRef,
        property: PropertyId,
        value: PropertyValue,
    },
    RemoveProperty {
        target: ElementRef,
        property: PropertyId,
    },
    CreateEdge {
        gid: Gid,
        from: Gid,
        to: Gid,
        edge_type: EdgeTypeId,
    },
    DeleteEdge {
        gid: Gid,
    },
    BuildLabelIndex {
        label: LabelId,
    },
    DropLabelIndex {
        label: LabelId,
    },
    BuildLabelPropertyIndex {
        label: LabelId,
        property: PropertyId,
    },
    DropLabelPropertyIndex {
        label: LabelId,
        property: PropertyId,
    },
    CreateExistenceConstraint {
        label: LabelId,
        property: PropertyId,
    },
    DropExistenceConstraint {
        label: LabelId,
        property: PropertyId,
    },
    CreateUniquenessConstraint {
        label: LabelId,
        property: PropertyId,
    },
    DropUniquenessConstraint {
        label: LabelId,
        property: PropertyId,
    },
}
