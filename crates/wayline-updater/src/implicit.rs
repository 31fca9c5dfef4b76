//! Detection of ways that moved only because an underlying node moved.

use std::collections::BTreeSet;

use wayline_error::Result;
use wayline_store::{Backend, CurrentWays, SpatialSchema};
use wayline_types::{NodeId, WayId};

use crate::resolver::NodesByCell;

/// Scan the current store for ways that reference a moved node but are not
/// explicitly edited in this batch.
///
/// `moved_nodes` holds the displaced node versions keyed by their old cell;
/// `already_known` holds the current skeletons of the explicitly edited ways.
/// Purely additive: the result keys each way by its old bucket, leaving the
/// new bucket to the differ.
pub fn implicitly_moved_skeletons<B: Backend, S: SpatialSchema>(
    backend: &B,
    schema: &S,
    moved_nodes: &NodesByCell,
    already_known: &CurrentWays,
) -> Result<CurrentWays> {
    if moved_nodes.is_empty() {
        return Ok(CurrentWays::new());
    }

    let cells: BTreeSet<u32> = moved_nodes.keys().copied().collect();
    let parents = schema.calc_parents(&cells);

    let moved_ids: BTreeSet<NodeId> = moved_nodes
        .values()
        .flatten()
        .map(|snapshot| snapshot.id)
        .collect();
    let known_ids: BTreeSet<WayId> = already_known
        .values()
        .flat_map(|ways| ways.keys().copied())
        .collect();

    let mut result = CurrentWays::new();
    for (bucket, ways) in backend.read_current_ways(&parents)? {
        for (id, skeleton) in ways {
            if known_ids.contains(&id) {
                continue;
            }
            if skeleton.nds.iter().any(|nd| moved_ids.contains(nd)) {
                result.entry(bucket).or_default().insert(id, skeleton);
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_store::{MemoryBackend, SpanSchema};
    use wayline_types::{Bucket, NodeSnapshot, WaySkeleton};

    fn seed_way(backend: &mut MemoryBackend, bucket: u32, id: u64, nds: &[u64]) {
        let mut insert = CurrentWays::new();
        insert.entry(Bucket::new(bucket)).or_default().insert(
            WayId::new(id),
            WaySkeleton::new(WayId::new(id), nds.iter().map(|&n| NodeId::new(n)).collect()),
        );
        backend
            .update_current_ways(&CurrentWays::new(), &insert)
            .unwrap();
    }

    #[test]
    fn finds_ways_touching_moved_nodes() {
        let mut backend = MemoryBackend::new();
        seed_way(&mut backend, 5, 1, &[10, 11]);
        seed_way(&mut backend, 5, 2, &[12]);

        let mut moved = NodesByCell::new();
        moved
            .entry(5)
            .or_default()
            .insert(NodeSnapshot::new(NodeId::new(10), 0));

        let result =
            implicitly_moved_skeletons(&backend, &SpanSchema, &moved, &CurrentWays::new()).unwrap();
        let ways = &result[&Bucket::new(5)];
        assert!(ways.contains_key(&WayId::new(1)));
        assert!(!ways.contains_key(&WayId::new(2)));
    }

    #[test]
    fn explicitly_edited_ways_are_excluded() {
        let mut backend = MemoryBackend::new();
        seed_way(&mut backend, 5, 1, &[10]);

        let mut moved = NodesByCell::new();
        moved
            .entry(5)
            .or_default()
            .insert(NodeSnapshot::new(NodeId::new(10), 0));

        let mut known = CurrentWays::new();
        known.entry(Bucket::new(5)).or_default().insert(
            WayId::new(1),
            WaySkeleton::new(WayId::new(1), vec![NodeId::new(10)]),
        );

        let result = implicitly_moved_skeletons(&backend, &SpanSchema, &moved, &known).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn no_moved_nodes_short_circuits() {
        let backend = MemoryBackend::new();
        let result =
            implicitly_moved_skeletons(&backend, &SpanSchema, &NodesByCell::new(), &CurrentWays::new())
                .unwrap();
        assert!(result.is_empty());
    }
}
