//! Changelog generation: which ways became current at which instant.

use wayline_store::{Changelog, CurrentWays};
use wayline_types::{Bucket, Timestamp, WayId, WaySkeleton};

use crate::attic::relevant_timestamps;
use crate::batch::Batch;
use crate::current::position_of;
use crate::resolver::NodeResolver;

/// Append an entry for every node-move instant inside `(old_ts, new_ts]`,
/// and for `new_ts` itself when the interval ends with an explicit edit.
fn add_intermediate_changelog_entries(
    skeleton: &WaySkeleton,
    old_ts: Timestamp,
    new_ts: Timestamp,
    resolver: &NodeResolver,
    add_last_version: bool,
    result: &mut Changelog,
) {
    let mut timestamps = relevant_timestamps(skeleton, old_ts, new_ts, resolver);
    if timestamps.last() == Some(&Timestamp::NOW) {
        timestamps.pop();
    }

    for timestamp in timestamps {
        result.entry(timestamp).or_default().push(skeleton.id);
    }
    if add_last_version {
        result.entry(new_ts).or_default().push(skeleton.id);
    }
}

/// Build the `timestamp → [way id]` log of every observable change.
pub fn compute_changelog(
    batch: &Batch,
    implicitly_moved: &CurrentWays,
    existing_positions: &[(WayId, Bucket)],
    displaced: &CurrentWays,
    resolver: &NodeResolver,
) -> Changelog {
    let mut result = Changelog::new();
    let entries = &batch.entries;
    let mut last_id = WayId::ZERO;

    for (index, entry) in entries.iter().enumerate() {
        let id = entry.id();
        let next = entries.get(index + 1).filter(|next| next.id() == id);

        if let Some(next) = next {
            add_intermediate_changelog_entries(
                &entry.skeleton,
                entry.timestamp(),
                next.timestamp(),
                resolver,
                true,
                &mut result,
            );
        } else {
            add_intermediate_changelog_entries(
                &entry.skeleton,
                entry.timestamp(),
                Timestamp::NOW,
                resolver,
                false,
                &mut result,
            );
        }

        if last_id == id {
            // An earlier version in the batch already covered the window up
            // to this entry.
            continue;
        }
        last_id = id;

        let Some(old_bucket) = position_of(existing_positions, id) else {
            // No old data exists; the version itself is the only change.
            result.entry(entry.timestamp()).or_default().push(id);
            continue;
        };
        let Some(existing_skeleton) = displaced.get(&old_bucket).and_then(|ways| ways.get(&id))
        else {
            continue;
        };
        add_intermediate_changelog_entries(
            existing_skeleton,
            Timestamp::ZERO,
            entry.timestamp(),
            resolver,
            true,
            &mut result,
        );
    }

    for ways in implicitly_moved.values() {
        for skeleton in ways.values() {
            add_intermediate_changelog_entries(
                skeleton,
                Timestamp::ZERO,
                Timestamp::NOW,
                resolver,
                false,
                &mut result,
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wayline_types::{Attic, MetaRecord, NodeId, NodeSnapshot};

    fn resolver_with(timelines: Vec<(u64, Vec<(u32, u32, u64)>)>) -> NodeResolver {
        let mut versions_by_id = BTreeMap::new();
        for (id, entries) in timelines {
            let node = NodeId::new(id);
            versions_by_id.insert(
                node,
                entries
                    .into_iter()
                    .map(|(cell, offset, expiry)| {
                        (
                            cell,
                            Attic::new(NodeSnapshot::new(node, offset), Timestamp::new(expiry)),
                        )
                    })
                    .collect(),
            );
        }
        NodeResolver {
            idx_by_id: BTreeMap::new(),
            versions_by_id,
        }
    }

    #[test]
    fn brand_new_way_logs_its_own_timestamp() {
        let mut batch = Batch::new();
        batch.push_version(
            WaySkeleton::new(WayId::new(1), vec![NodeId::new(10)]),
            MetaRecord::new(WayId::new(1), 1, Timestamp::new(500), 0, 0),
            Vec::new(),
        );
        batch.normalize(true);

        let resolver = resolver_with(vec![(10, vec![(5, 0, u64::MAX)])]);
        let log = compute_changelog(
            &batch,
            &CurrentWays::new(),
            &[],
            &CurrentWays::new(),
            &resolver,
        );
        assert_eq!(log[&Timestamp::new(500)], vec![WayId::new(1)]);
    }

    #[test]
    fn node_move_inside_window_is_logged() {
        let mut batch = Batch::new();
        batch.push_version(
            WaySkeleton::new(WayId::new(2), vec![NodeId::new(20)]),
            MetaRecord::new(WayId::new(2), 2, Timestamp::new(200), 0, 0),
            Vec::new(),
        );
        batch.normalize(true);

        // Node 20 moved at t=150; the way existed since before the window.
        let resolver = resolver_with(vec![(20, vec![(5, 0, 150), (6, 0, u64::MAX)])]);
        let positions = vec![(WayId::new(2), Bucket::new(5))];
        let mut displaced = CurrentWays::new();
        displaced.entry(Bucket::new(5)).or_default().insert(
            WayId::new(2),
            WaySkeleton::new(WayId::new(2), vec![NodeId::new(20)]),
        );

        let log = compute_changelog(
            &batch,
            &CurrentWays::new(),
            &positions,
            &displaced,
            &resolver,
        );
        assert_eq!(log[&Timestamp::new(150)], vec![WayId::new(2)]);
        assert_eq!(log[&Timestamp::new(200)], vec![WayId::new(2)]);
    }

    #[test]
    fn implicit_movers_log_without_upper_entry() {
        let resolver = resolver_with(vec![(30, vec![(5, 0, 300), (6, 0, u64::MAX)])]);
        let mut implicit = CurrentWays::new();
        implicit.entry(Bucket::new(5)).or_default().insert(
            WayId::new(3),
            WaySkeleton::new(WayId::new(3), vec![NodeId::new(30)]),
        );

        let log = compute_changelog(
            &Batch::new(),
            &implicit,
            &[],
            &CurrentWays::new(),
            &resolver,
        );
        assert_eq!(log.len(), 1);
        assert_eq!(log[&Timestamp::new(300)], vec![WayId::new(3)]);
    }
}
