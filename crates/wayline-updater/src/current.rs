//! The current-state differ: what the batch changes in the current store.

use tracing::warn;
use wayline_store::{CurrentWays, SpatialSchema};
use wayline_types::{Bucket, Coord, WayId};

use crate::batch::Batch;
use crate::resolver::NodeResolver;

/// Binary search in a sorted `(id, bucket)` directory.
pub fn position_of(positions: &[(WayId, Bucket)], id: WayId) -> Option<Bucket> {
    positions
        .binary_search_by_key(&id, |&(entry_id, _)| entry_id)
        .ok()
        .map(|index| positions[index].1)
}

/// Flatten a bucket-keyed way map into a sorted `(id, bucket)` directory.
pub fn make_id_idx_directory(ways: &CurrentWays) -> Vec<(WayId, Bucket)> {
    let mut directory: Vec<(WayId, Bucket)> = ways
        .iter()
        .flat_map(|(&bucket, skeletons)| skeletons.keys().map(move |&id| (id, bucket)))
        .collect();
    directory.sort_unstable_by_key(|&(id, _)| id);
    directory
}

/// The changes the batch makes to the current store.
#[derive(Debug, Default)]
pub struct CurrentDiff {
    /// Previous current versions to remove, keyed by their old bucket.
    pub displaced: CurrentWays,
    /// New current versions, keyed by their new bucket.
    pub inserted: CurrentWays,
    /// `(id, old bucket)` for every way whose bucket changed.
    pub moved: Vec<(WayId, Bucket)>,
}

/// Fill in the bucket and materialized geometry of each latest version.
///
/// Intermediate versions and deletions are left untouched; they never reach
/// the current store. Uses current node positions, which at this point are
/// the post-commit positions of every node the batch knows.
pub fn compute_geometry<S: SpatialSchema>(resolver: &NodeResolver, schema: &S, batch: &mut Batch) {
    for index in 0..batch.entries.len() {
        if !batch.is_latest(index) {
            continue;
        }
        let entry = &batch.entries[index];
        if entry.bucket.is_deleted() {
            continue;
        }

        let mut cells: Vec<u32> = Vec::with_capacity(entry.skeleton.nds.len());
        for &nd in &entry.skeleton.nds {
            match resolver.idx_by_id.get(&nd) {
                Some(coord) => cells.push(coord.cell),
                None => warn!(
                    node = nd.get(),
                    way = entry.id().get(),
                    "node used in way not found"
                ),
            }
        }
        let bucket = schema.calc_bucket(&cells);

        let entry = &mut batch.entries[index];
        entry.skeleton.geometry.clear();
        if schema.indicates_geometry(bucket) {
            let skeleton = &mut entry.skeleton;
            for i in 0..skeleton.nds.len() {
                let nd = skeleton.nds[i];
                let coord = resolver.idx_by_id.get(&nd).copied().unwrap_or(Coord::ZERO);
                skeleton.geometry.push(coord);
            }
        }
        entry.bucket = bucket;
    }
}

/// Diff the explicit batch entries against the existing current store.
pub fn new_current_skeletons(
    batch: &Batch,
    existing_positions: &[(WayId, Bucket)],
    existing_skeletons: &CurrentWays,
    diff: &mut CurrentDiff,
) {
    for index in 0..batch.entries.len() {
        if !batch.is_latest(index) {
            continue;
        }
        let entry = &batch.entries[index];
        let id = entry.id();

        if let Some(old_bucket) = position_of(existing_positions, id) {
            match existing_skeletons
                .get(&old_bucket)
                .and_then(|ways| ways.get(&id))
            {
                Some(old_skeleton) => {
                    diff.displaced
                        .entry(old_bucket)
                        .or_default()
                        .insert(id, old_skeleton.clone());
                }
                None => warn!(way = id.get(), bucket = old_bucket.val(), "way in directory has no skeleton"),
            }
            if !entry.bucket.is_deleted() && entry.bucket != old_bucket {
                diff.moved.push((id, old_bucket));
            }
        }

        if !entry.bucket.is_deleted() {
            diff.inserted
                .entry(entry.bucket)
                .or_default()
                .insert(id, entry.skeleton.clone());
        }
    }
}

/// Re-place the implicitly moved ways using current node positions.
///
/// Every implicit mover is rewritten: displaced from its old bucket and
/// inserted at the recomputed one, with a moved entry when they differ.
pub fn new_implicit_skeletons<S: SpatialSchema>(
    resolver: &NodeResolver,
    schema: &S,
    implicitly_moved: &CurrentWays,
    diff: &mut CurrentDiff,
) {
    for (&old_bucket, ways) in implicitly_moved {
        for (&id, skeleton) in ways {
            diff.displaced
                .entry(old_bucket)
                .or_default()
                .insert(id, skeleton.clone());

            let mut cells: Vec<u32> = Vec::with_capacity(skeleton.nds.len());
            for &nd in &skeleton.nds {
                match resolver.idx_by_id.get(&nd) {
                    Some(coord) => cells.push(coord.cell),
                    None => warn!(node = nd.get(), way = id.get(), "node used in way not found"),
                }
            }
            let bucket = schema.calc_bucket(&cells);

            let mut updated = skeleton.clone();
            updated.geometry.clear();
            if schema.indicates_geometry(bucket) {
                for &nd in &skeleton.nds {
                    let coord = resolver.idx_by_id.get(&nd).copied().unwrap_or(Coord::ZERO);
                    updated.geometry.push(coord);
                }
            }
            diff.inserted.entry(bucket).or_default().insert(id, updated);

            if bucket != old_bucket {
                diff.moved.push((id, old_bucket));
            }
        }
    }
}

/// Record explicit delete markers for displaced ways that have no successor,
/// so the id directory never retains a stale entry.
pub fn add_deleted_skeletons(diff: &CurrentDiff, new_positions: &mut Vec<(WayId, Bucket)>) {
    for ways in diff.displaced.values() {
        for &id in ways.keys() {
            if position_of(new_positions, id).is_none() {
                new_positions.push((id, Bucket::DELETED));
                new_positions.sort_unstable_by_key(|&(entry_id, _)| entry_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_types::{MetaRecord, NodeId, Timestamp, WaySkeleton};

    fn directory(entries: &[(u64, u32)]) -> Vec<(WayId, Bucket)> {
        entries
            .iter()
            .map(|&(id, bucket)| (WayId::new(id), Bucket::new(bucket)))
            .collect()
    }

    #[test]
    fn position_lookup() {
        let positions = directory(&[(1, 10), (5, 20), (9, 30)]);
        assert_eq!(position_of(&positions, WayId::new(5)), Some(Bucket::new(20)));
        assert_eq!(position_of(&positions, WayId::new(4)), None);
    }

    #[test]
    fn deletion_displaces_without_insert() {
        let mut batch = Batch::new();
        batch.push_delete(
            WayId::new(1),
            MetaRecord::new(WayId::new(1), 2, Timestamp::new(200), 0, 0),
        );
        batch.normalize(true);

        let positions = directory(&[(1, 7)]);
        let mut existing = CurrentWays::new();
        existing.entry(Bucket::new(7)).or_default().insert(
            WayId::new(1),
            WaySkeleton::new(WayId::new(1), vec![NodeId::new(10)]),
        );

        let mut diff = CurrentDiff::default();
        new_current_skeletons(&batch, &positions, &existing, &mut diff);
        assert!(diff.displaced[&Bucket::new(7)].contains_key(&WayId::new(1)));
        assert!(diff.inserted.is_empty());
        assert!(diff.moved.is_empty());

        let mut new_positions = make_id_idx_directory(&diff.inserted);
        add_deleted_skeletons(&diff, &mut new_positions);
        assert_eq!(new_positions, vec![(WayId::new(1), Bucket::DELETED)]);
    }
}
