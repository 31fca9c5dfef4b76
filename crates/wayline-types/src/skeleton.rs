//! Way and node skeletons: the geometry-bearing halves of the data model.

use crate::{Coord, NodeId, WayId};

/// A node's position record: the id plus the within-cell offset.
///
/// The containing spatial cell is carried alongside the snapshot by the
/// store keys and resolver timelines, never inside the record itself.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub offset: u32,
}

impl NodeSnapshot {
    #[inline]
    pub const fn new(id: NodeId, offset: u32) -> Self {
        Self { id, offset }
    }
}

/// A way skeleton: the ordered node list, plus the materialized coordinate
/// list when the bucket function classifies the way as geometry-bearing.
///
/// When `geometry` is non-empty it is index-aligned with `nds`.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct WaySkeleton {
    pub id: WayId,
    pub nds: Vec<NodeId>,
    pub geometry: Vec<Coord>,
}

impl WaySkeleton {
    /// A skeleton without geometry materialization.
    pub fn new(id: WayId, nds: Vec<NodeId>) -> Self {
        Self {
            id,
            nds,
            geometry: Vec::new(),
        }
    }

    /// The empty skeleton, used as the delta reference for versions whose
    /// successor lives in a different bucket or does not exist.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this is the empty reference skeleton.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id == WayId::ZERO && self.nds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_skeleton() {
        assert!(WaySkeleton::empty().is_empty());
        assert!(!WaySkeleton::new(WayId::new(1), vec![NodeId::new(2)]).is_empty());
    }
}
