//! Delta encoding of way skeletons against a reference skeleton.
//!
//! Historical versions are stored as [`WayDelta`] records: edit lists
//! relative to the next-younger snapshot. Expanding a delta against its
//! reference reconstructs the historical skeleton bit-for-bit.

use std::fmt;

use crate::skeleton::WaySkeleton;
use crate::{Coord, NodeId, WayId};

/// Errors raised when a delta does not fit its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaError {
    /// The reference skeleton belongs to a different way.
    ReferenceMismatch { expected: WayId, actual: WayId },
    /// A removal position lies beyond the reference list.
    RemoveOutOfBounds { position: u32, len: usize },
    /// An insertion position lies beyond the reconstructed list.
    InsertOutOfBounds { position: u32, len: usize },
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferenceMismatch { expected, actual } => {
                write!(f, "reference is way {actual}, delta is for way {expected}")
            }
            Self::RemoveOutOfBounds { position, len } => {
                write!(f, "remove position {position} out of bounds (len {len})")
            }
            Self::InsertOutOfBounds { position, len } => {
                write!(f, "insert position {position} out of bounds (len {len})")
            }
        }
    }
}

impl std::error::Error for DeltaError {}

/// A way skeleton encoded as adds and removes relative to a reference.
///
/// `full` records carry the complete node and geometry lists in their `added`
/// fields and ignore the reference on expansion. Removal positions index the
/// reference list; insertion positions index the reconstructed target list.
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
pub struct WayDelta {
    pub id: WayId,
    pub full: bool,
    pub nds_removed: Vec<u32>,
    pub nds_added: Vec<(u32, NodeId)>,
    pub geometry_removed: Vec<u32>,
    pub geometry_added: Vec<(u32, Coord)>,
}

impl WayDelta {
    /// Encode `target` against `reference`.
    ///
    /// Falls back to a full record when the reference is empty, belongs to a
    /// different way, or shares nothing with the target.
    pub fn encode(reference: &WaySkeleton, target: &WaySkeleton) -> Self {
        if reference.is_empty() || reference.id != target.id {
            return Self::full_record(target);
        }

        let (nds_removed, nds_added) = diff(&reference.nds, &target.nds);
        let shares_nothing = nds_removed.len() == reference.nds.len()
            && nds_added.len() == target.nds.len()
            && !target.nds.is_empty();
        if shares_nothing {
            return Self::full_record(target);
        }

        let (geometry_removed, geometry_added) = diff(&reference.geometry, &target.geometry);
        Self {
            id: target.id,
            full: false,
            nds_removed,
            nds_added,
            geometry_removed,
            geometry_added,
        }
    }

    fn full_record(target: &WaySkeleton) -> Self {
        Self {
            id: target.id,
            full: true,
            nds_removed: Vec::new(),
            nds_added: enumerate(&target.nds),
            geometry_removed: Vec::new(),
            geometry_added: enumerate(&target.geometry),
        }
    }

    /// Reconstruct the encoded skeleton from this delta and its reference.
    pub fn expand(&self, reference: &WaySkeleton) -> Result<WaySkeleton, DeltaError> {
        if self.full {
            return Ok(WaySkeleton {
                id: self.id,
                nds: self.nds_added.iter().map(|&(_, nd)| nd).collect(),
                geometry: self.geometry_added.iter().map(|&(_, c)| c).collect(),
            });
        }
        if reference.id != self.id {
            return Err(DeltaError::ReferenceMismatch {
                expected: self.id,
                actual: reference.id,
            });
        }

        Ok(WaySkeleton {
            id: self.id,
            nds: apply(&reference.nds, &self.nds_removed, &self.nds_added)?,
            geometry: apply(&reference.geometry, &self.geometry_removed, &self.geometry_added)?,
        })
    }
}

fn enumerate<T: Copy>(items: &[T]) -> Vec<(u32, T)> {
    items
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as u32, v))
        .collect()
}

/// Prefix/suffix edit lists turning `reference` into `target`.
fn diff<T: PartialEq + Copy>(reference: &[T], target: &[T]) -> (Vec<u32>, Vec<(u32, T)>) {
    let mut prefix = 0;
    while prefix < reference.len() && prefix < target.len() && reference[prefix] == target[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < reference.len() - prefix
        && suffix < target.len() - prefix
        && reference[reference.len() - 1 - suffix] == target[target.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let removed = (prefix..reference.len() - suffix).map(|i| i as u32).collect();
    let added = (prefix..target.len() - suffix)
        .map(|i| (i as u32, target[i]))
        .collect();
    (removed, added)
}

/// Apply removal positions (reference-indexed) then insertions
/// (target-indexed) to a list.
fn apply<T: Copy>(
    reference: &[T],
    removed: &[u32],
    added: &[(u32, T)],
) -> Result<Vec<T>, DeltaError> {
    let mut out: Vec<T> = Vec::with_capacity(reference.len() + added.len());
    let mut next_removed = removed.iter().peekable();
    for (i, &v) in reference.iter().enumerate() {
        if next_removed.peek().is_some_and(|&&p| p as usize == i) {
            next_removed.next();
        } else {
            out.push(v);
        }
    }
    if let Some(&&p) = next_removed.peek() {
        return Err(DeltaError::RemoveOutOfBounds {
            position: p,
            len: reference.len(),
        });
    }

    for &(p, v) in added {
        let p = p as usize;
        if p > out.len() {
            return Err(DeltaError::InsertOutOfBounds {
                position: p as u32,
                len: out.len(),
            });
        }
        out.insert(p, v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn skel(id: u64, nds: &[u64]) -> WaySkeleton {
        WaySkeleton::new(WayId::new(id), nds.iter().map(|&n| NodeId::new(n)).collect())
    }

    #[test]
    fn append_is_a_small_delta() {
        let reference = skel(1, &[10, 11, 12]);
        let target = skel(1, &[10, 11]);
        let delta = WayDelta::encode(&reference, &target);
        assert!(!delta.full);
        assert_eq!(delta.nds_removed, vec![2]);
        assert!(delta.nds_added.is_empty());
        assert_eq!(delta.expand(&reference).unwrap(), target);
    }

    #[test]
    fn interior_replacement() {
        let reference = skel(1, &[10, 11, 12]);
        let target = skel(1, &[10, 99, 12]);
        let delta = WayDelta::encode(&reference, &target);
        assert!(!delta.full);
        assert_eq!(delta.nds_removed, vec![1]);
        assert_eq!(delta.nds_added, vec![(1, NodeId::new(99))]);
        assert_eq!(delta.expand(&reference).unwrap(), target);
    }

    #[test]
    fn empty_reference_forces_full() {
        let target = skel(5, &[1, 2, 3]);
        let delta = WayDelta::encode(&WaySkeleton::empty(), &target);
        assert!(delta.full);
        assert_eq!(delta.expand(&WaySkeleton::empty()).unwrap(), target);
        // A full record ignores whatever reference it is given.
        assert_eq!(delta.expand(&skel(9, &[7])).unwrap(), target);
    }

    #[test]
    fn disjoint_lists_force_full() {
        let reference = skel(1, &[10, 11]);
        let target = skel(1, &[20, 21]);
        let delta = WayDelta::encode(&reference, &target);
        assert!(delta.full);
    }

    #[test]
    fn mismatched_reference_is_rejected() {
        let reference = skel(1, &[10, 11, 12]);
        let target = skel(1, &[10, 11]);
        let delta = WayDelta::encode(&reference, &target);
        let err = delta.expand(&skel(2, &[10, 11, 12])).unwrap_err();
        assert!(matches!(err, DeltaError::ReferenceMismatch { .. }));
    }

    #[test]
    fn geometry_travels_with_the_delta() {
        let mut reference = skel(1, &[10, 11]);
        reference.geometry = vec![Coord::new(1, 100), Coord::new(1, 200)];
        let mut target = skel(1, &[10, 11]);
        target.geometry = vec![Coord::new(1, 100), Coord::new(2, 50)];
        let delta = WayDelta::encode(&reference, &target);
        assert_eq!(delta.geometry_removed, vec![1]);
        assert_eq!(delta.geometry_added, vec![(1, Coord::new(2, 50))]);
        assert_eq!(delta.expand(&reference).unwrap(), target);
    }

    proptest! {
        #[test]
        fn expand_inverts_encode(
            reference in proptest::collection::vec(0u64..20, 0..12),
            target in proptest::collection::vec(0u64..20, 0..12),
        ) {
            let reference = skel(7, &reference);
            let target = skel(7, &target);
            let delta = WayDelta::encode(&reference, &target);
            prop_assert_eq!(delta.expand(&reference).unwrap(), target);
        }
    }
}
