use std::fmt;

/// Globally unique identifier assigned to every vertex and edge at creation.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Gid(pub u64);

/// Interned label identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);

/// Interned edge-type identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeTypeId(pub u32);

/// Interned property-key identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PropertyId(pub u32);

/// Monotonically increasing transaction identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TxId(pub u64);

/// Per-transaction command counter value.
pub type CommandId = u64;

/// Visibility selector for reads through an accessor.
///
/// `Old` is the state as of the start of the current command; `New` includes
/// the transaction's own uncommitted writes at the current command.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum View {
    Old,
    New,
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Gid {
    fn from(value: u64) -> Self {
        Gid(value)
    }
}

impl From<Gid> for u64 {
    fn from(value: Gid) -> Self {
        value.0
    }
}

impl From<u32> for LabelId {
    fn from(value: u32) -> Self {
        LabelId(value)
    }
}

impl From<u32> for EdgeTypeId {
    fn from(value: u32) -> Self {
        EdgeTypeId(value)
    }
}

impl From<u32> for PropertyId {
    fn from(value: u32) -> Self {
        PropertyId(value)
    }
}
