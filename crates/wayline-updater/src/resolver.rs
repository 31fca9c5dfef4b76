//! The node resolver: every node position the batch needs, as both a
//! current-position map and a per-node timeline.
//!
//! Timelines carry expiry stamps: an entry `(cell, snapshot)` is the node's
//! position until `snapshot.timestamp`, and the current position is stamped
//! [`Timestamp::NOW`]. Construction merges four sources in precedence order;
//! later sources never overwrite earlier ones.

use std::collections::{BTreeMap, BTreeSet};

use wayline_error::Result;
use wayline_store::{Backend, CurrentWays};
use wayline_types::{Attic, Coord, NodeId, NodeSnapshot, Timestamp};

use crate::batch::Batch;

/// Node snapshots grouped by their spatial cell.
pub type NodesByCell = BTreeMap<u32, BTreeSet<NodeSnapshot>>;

/// Expiry-stamped node snapshots grouped by their spatial cell.
pub type AtticNodesByCell = BTreeMap<u32, BTreeSet<Attic<NodeSnapshot>>>;

/// Per-node position timeline, time-sorted, current entry last.
pub type NodeTimelines = BTreeMap<NodeId, Vec<(u32, Attic<NodeSnapshot>)>>;

/// Current positions plus full timelines for every node the batch touches.
#[derive(Debug, Default)]
pub struct NodeResolver {
    /// Current positions only.
    pub idx_by_id: BTreeMap<NodeId, Coord>,
    /// Full timeline within the window the batch covers.
    pub versions_by_id: NodeTimelines,
}

impl NodeResolver {
    /// Merge the four position sources.
    ///
    /// 1. The diff's new node snapshots.
    /// 2. Coordinates carried by already-loaded current way geometries.
    /// 3. Coordinates carried by the implicit-mover geometries.
    /// 4. A node-store lookup for ids still missing.
    pub fn build<B: Backend>(
        backend: &B,
        batch: &Batch,
        existing_skeletons: &CurrentWays,
        implicitly_moved: &CurrentWays,
        new_nodes: &NodesByCell,
        new_attic_nodes: &AtticNodesByCell,
    ) -> Result<Self> {
        let mut idx_by_id = dictionary_from_snapshots(new_nodes);
        add_implicitly_known_nodes(&mut idx_by_id, existing_skeletons);
        add_implicitly_known_nodes(&mut idx_by_id, implicitly_moved);
        lookup_missing_nodes(
            &mut idx_by_id,
            existing_skeletons,
            implicitly_moved,
            batch,
            backend,
        )?;

        let versions_by_id = collect_timelines(new_attic_nodes, &idx_by_id);
        Ok(Self {
            idx_by_id,
            versions_by_id,
        })
    }

    /// The position of `id` effective at `asof`: the oldest timeline entry
    /// that has not yet expired at that instant.
    pub fn position_at(&self, id: NodeId, asof: Timestamp) -> Option<Coord> {
        self.versions_by_id.get(&id).and_then(|timeline| {
            timeline
                .iter()
                .find(|(_, snapshot)| snapshot.timestamp >= asof)
                .map(|(cell, snapshot)| Coord::new(*cell, snapshot.elem.offset))
        })
    }

    /// Whether the resolver has any record of `id` at all.
    pub fn knows(&self, id: NodeId) -> bool {
        self.versions_by_id
            .get(&id)
            .is_some_and(|timeline| !timeline.is_empty())
    }
}

fn dictionary_from_snapshots(nodes: &NodesByCell) -> BTreeMap<NodeId, Coord> {
    let mut out = BTreeMap::new();
    for (&cell, snapshots) in nodes {
        for snapshot in snapshots {
            out.entry(snapshot.id)
                .or_insert_with(|| Coord::new(cell, snapshot.offset));
        }
    }
    out
}

/// Harvest coordinates from materialized way geometries, for nodes not yet
/// known.
fn add_implicitly_known_nodes(idx_by_id: &mut BTreeMap<NodeId, Coord>, ways: &CurrentWays) {
    for skeletons in ways.values() {
        for skeleton in skeletons.values() {
            if skeleton.geometry.is_empty() {
                continue;
            }
            for (nd, coord) in skeleton.nds.iter().zip(&skeleton.geometry) {
                idx_by_id.entry(*nd).or_insert(*coord);
            }
        }
    }
}

/// Fetch from the node store every referenced node still missing after the
/// in-batch sources.
fn lookup_missing_nodes<B: Backend>(
    idx_by_id: &mut BTreeMap<NodeId, Coord>,
    existing_skeletons: &CurrentWays,
    implicitly_moved: &CurrentWays,
    batch: &Batch,
    backend: &B,
) -> Result<()> {
    let mut missing: Vec<NodeId> = Vec::new();

    for entry in &batch.entries {
        if entry.bucket.is_deleted() {
            continue;
        }
        missing.extend(
            entry
                .skeleton
                .nds
                .iter()
                .filter(|nd| !idx_by_id.contains_key(*nd)),
        );
    }
    for ways in [existing_skeletons, implicitly_moved] {
        for skeletons in ways.values() {
            for skeleton in skeletons.values() {
                missing.extend(
                    skeleton
                        .nds
                        .iter()
                        .filter(|nd| !idx_by_id.contains_key(*nd)),
                );
            }
        }
    }

    missing.sort_unstable();
    missing.dedup();

    for (id, coord) in backend.read_node_positions(&missing)? {
        idx_by_id.entry(id).or_insert(coord);
    }
    Ok(())
}

/// Merge the diff's attic node snapshots with the current positions into
/// per-node timelines, current entry stamped `NOW`.
fn collect_timelines(
    new_attic_nodes: &AtticNodesByCell,
    idx_by_id: &BTreeMap<NodeId, Coord>,
) -> NodeTimelines {
    let mut timelines = NodeTimelines::new();
    for (&cell, snapshots) in new_attic_nodes {
        for snapshot in snapshots {
            timelines
                .entry(snapshot.elem.id)
                .or_default()
                .push((cell, snapshot.clone()));
        }
    }
    for timeline in timelines.values_mut() {
        timeline.sort_by_key(|(cell, snapshot)| (snapshot.timestamp, *cell));
    }
    for (&id, coord) in idx_by_id {
        timelines.entry(id).or_default().push((
            coord.cell,
            Attic::new(NodeSnapshot::new(id, coord.offset), Timestamp::NOW),
        ));
    }
    timelines
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_store::MemoryBackend;
    use wayline_types::{Bucket, MetaRecord, WayId, WaySkeleton};

    fn snapshot(id: u64, offset: u32) -> NodeSnapshot {
        NodeSnapshot::new(NodeId::new(id), offset)
    }

    #[test]
    fn new_snapshots_take_precedence_over_way_geometry() {
        let mut new_nodes = NodesByCell::new();
        new_nodes.entry(5).or_default().insert(snapshot(1, 77));

        let mut existing = CurrentWays::new();
        let mut skeleton = WaySkeleton::new(WayId::new(9), vec![NodeId::new(1), NodeId::new(2)]);
        skeleton.geometry = vec![Coord::new(4, 10), Coord::new(4, 20)];
        existing
            .entry(Bucket::new(4))
            .or_default()
            .insert(WayId::new(9), skeleton);

        let resolver = NodeResolver::build(
            &MemoryBackend::new(),
            &Batch::new(),
            &existing,
            &CurrentWays::new(),
            &new_nodes,
            &AtticNodesByCell::new(),
        )
        .unwrap();

        // Node 1 keeps the diff's position; node 2 falls back to the geometry.
        assert_eq!(resolver.idx_by_id[&NodeId::new(1)], Coord::new(5, 77));
        assert_eq!(resolver.idx_by_id[&NodeId::new(2)], Coord::new(4, 20));
    }

    #[test]
    fn missing_nodes_are_fetched_from_the_store() {
        let backend = MemoryBackend::new();
        backend.seed_nodes([(NodeId::new(3), Coord::new(8, 30))]);

        let mut batch = Batch::new();
        batch.push_version(
            WaySkeleton::new(WayId::new(1), vec![NodeId::new(3)]),
            MetaRecord::new(WayId::new(1), 1, Timestamp::new(100), 0, 0),
            Vec::new(),
        );

        let resolver = NodeResolver::build(
            &backend,
            &batch,
            &CurrentWays::new(),
            &CurrentWays::new(),
            &NodesByCell::new(),
            &AtticNodesByCell::new(),
        )
        .unwrap();
        assert_eq!(resolver.idx_by_id[&NodeId::new(3)], Coord::new(8, 30));
    }

    #[test]
    fn timeline_lookup_respects_expiry() {
        let mut new_nodes = NodesByCell::new();
        new_nodes.entry(6).or_default().insert(snapshot(1, 50));
        let mut attic_nodes = AtticNodesByCell::new();
        attic_nodes
            .entry(5)
            .or_default()
            .insert(Attic::new(snapshot(1, 40), Timestamp::new(150)));

        let resolver = NodeResolver::build(
            &MemoryBackend::new(),
            &Batch::new(),
            &CurrentWays::new(),
            &CurrentWays::new(),
            &new_nodes,
            &attic_nodes,
        )
        .unwrap();

        // Before the move the node sits in cell 5; at and after it, cell 6.
        let id = NodeId::new(1);
        assert_eq!(resolver.position_at(id, Timestamp::new(100)), Some(Coord::new(5, 40)));
        assert_eq!(resolver.position_at(id, Timestamp::new(150)), Some(Coord::new(5, 40)));
        assert_eq!(resolver.position_at(id, Timestamp::new(151)), Some(Coord::new(6, 50)));
        assert_eq!(resolver.position_at(id, Timestamp::NOW), Some(Coord::new(6, 50)));
        assert!(!resolver.knows(NodeId::new(99)));
    }
}
