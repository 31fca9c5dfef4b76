//! Tag diffing: the per-bucket local index, the bucket-independent global
//! index, and the expiry-stamped attic entries.

use std::collections::BTreeMap;

use wayline_store::{AtticGlobalTags, AtticLocalTags, GlobalTags, LocalTags};
use wayline_types::{Attic, Bucket, TagIndexLocal, Timestamp, WayId};

use crate::batch::Batch;
use crate::current::position_of;
use crate::meta::IdxTimeline;

/// The changes the batch makes to the local tag store.
#[derive(Debug, Default)]
pub struct TagDiff {
    /// Local entries to remove.
    pub removed_local: LocalTags,
    /// Local entries to insert.
    pub added_local: LocalTags,
}

/// Diff the explicit batch entries against the existing local tags.
///
/// Every latest version replaces the way's tag set wholesale: old entries
/// are removed wherever they were indexed, new ones inserted under the new
/// bucket. Deletions only remove.
pub fn new_current_local_tags(
    batch: &Batch,
    existing_local: &LocalTags,
    diff: &mut TagDiff,
) {
    for index in 0..batch.entries.len() {
        if !batch.is_latest(index) {
            continue;
        }
        let entry = &batch.entries[index];
        let id = entry.id();

        for (key, ids) in existing_local {
            if ids.contains(&id) {
                diff.removed_local.entry(key.clone()).or_default().insert(id);
            }
        }
        if !entry.bucket.is_deleted() {
            for (key, value) in &entry.tags {
                diff.added_local
                    .entry(TagIndexLocal::new(entry.bucket, key.clone(), value.clone()))
                    .or_default()
                    .insert(id);
            }
        }
    }
}

/// Move the local tags of implicitly moved ways to their new bucket.
pub fn new_implicit_local_tags(
    implicit_local: &LocalTags,
    new_positions: &[(WayId, Bucket)],
    diff: &mut TagDiff,
) {
    for (key, ids) in implicit_local {
        for &id in ids {
            let Some(new_bucket) = position_of(new_positions, id) else {
                continue;
            };
            if new_bucket == key.bucket || new_bucket.is_deleted() {
                continue;
            }
            diff.removed_local.entry(key.clone()).or_default().insert(id);
            let mut moved = key.clone();
            moved.bucket = new_bucket;
            diff.added_local.entry(moved).or_default().insert(id);
        }
    }
}

/// Project the local diff onto the global index.
///
/// A way that only migrated buckets keeps its `(key, value)` pair; such ids
/// cancel out and never touch the global store.
pub fn new_current_global_tags(diff: &TagDiff) -> (GlobalTags, GlobalTags) {
    let mut removed = GlobalTags::new();
    for (key, ids) in &diff.removed_local {
        removed
            .entry(key.to_global())
            .or_default()
            .extend(ids.iter().copied());
    }
    let mut added = GlobalTags::new();
    for (key, ids) in &diff.added_local {
        added
            .entry(key.to_global())
            .or_default()
            .extend(ids.iter().copied());
    }

    for (key, added_ids) in &mut added {
        if let Some(removed_ids) = removed.get_mut(key) {
            let common: Vec<WayId> = added_ids.intersection(removed_ids).copied().collect();
            for id in common {
                added_ids.remove(&id);
                removed_ids.remove(&id);
            }
        }
    }
    removed.retain(|_, ids| !ids.is_empty());
    added.retain(|_, ids| !ids.is_empty());
    (removed, added)
}

/// Stamp every superseded tag set with its expiry and place it at the bucket
/// the version occupied.
///
/// Versions are the pre-batch tag set (valid since before the window) plus
/// one set per batch entry; each set expires when the next version begins.
/// The youngest set is current and stays in the current-store index.
pub fn compute_new_attic_local_tags(
    timeline: &IdxTimeline,
    batch: &Batch,
    existing_local: &LocalTags,
) -> AtticLocalTags {
    // Tag-set versions per id, keyed by the timestamp the set became valid.
    let mut versions: BTreeMap<WayId, BTreeMap<Timestamp, Vec<(String, String)>>> = BTreeMap::new();

    for (key, ids) in existing_local {
        for &id in ids {
            versions
                .entry(id)
                .or_default()
                .entry(Timestamp::ZERO)
                .or_default()
                .push((key.key.clone(), key.value.clone()));
        }
    }
    for entry in &batch.entries {
        versions
            .entry(entry.id())
            .or_default()
            .insert(entry.timestamp(), entry.tags.clone());
    }

    let mut out = AtticLocalTags::new();
    for (id, sets) in versions {
        let Some(buckets) = timeline.get(&id) else {
            continue;
        };
        let starts: Vec<Timestamp> = sets.keys().copied().collect();
        for (start, expiry) in starts.iter().zip(starts.iter().skip(1)) {
            // The delta stamped at the expiry holds this version.
            let Some(bucket) = buckets
                .iter()
                .find(|entry| entry.timestamp >= *expiry)
                .map(|entry| entry.elem)
            else {
                continue;
            };
            for (key, value) in &sets[start] {
                out.entry(TagIndexLocal::new(bucket, key.clone(), value.clone()))
                    .or_default()
                    .insert(Attic::new(id, *expiry));
            }
        }
    }
    out
}

/// Project the attic local entries onto the global attic index.
pub fn compute_attic_global_tags(attic_local: &AtticLocalTags) -> AtticGlobalTags {
    let mut out = AtticGlobalTags::new();
    for (key, entries) in attic_local {
        let slot = out.entry(key.to_global()).or_default();
        slot.extend(entries.iter().cloned());
        slot.sort();
        slot.dedup();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_types::{MetaRecord, NodeId, TagIndexGlobal, WaySkeleton};

    fn tag(key: &str, value: &str) -> (String, String) {
        (key.to_owned(), value.to_owned())
    }

    #[test]
    fn bucket_migration_cancels_out_globally() {
        let mut diff = TagDiff::default();
        let old_key = TagIndexLocal::new(Bucket::new(5), "highway", "primary");
        let new_key = TagIndexLocal::new(Bucket::new(6), "highway", "primary");
        diff.removed_local.entry(old_key).or_default().insert(WayId::new(1));
        diff.added_local.entry(new_key).or_default().insert(WayId::new(1));

        let (removed, added) = new_current_global_tags(&diff);
        assert!(removed.is_empty());
        assert!(added.is_empty());
    }

    #[test]
    fn value_change_reaches_the_global_store() {
        let mut diff = TagDiff::default();
        diff.removed_local
            .entry(TagIndexLocal::new(Bucket::new(5), "highway", "primary"))
            .or_default()
            .insert(WayId::new(1));
        diff.added_local
            .entry(TagIndexLocal::new(Bucket::new(5), "highway", "secondary"))
            .or_default()
            .insert(WayId::new(1));

        let (removed, added) = new_current_global_tags(&diff);
        assert!(removed.contains_key(&TagIndexGlobal::new("highway", "primary")));
        assert!(added.contains_key(&TagIndexGlobal::new("highway", "secondary")));
    }

    #[test]
    fn superseded_tags_get_expiry_stamps() {
        let mut batch = Batch::new();
        let skeleton = WaySkeleton::new(WayId::new(1), vec![NodeId::new(9)]);
        batch.push_version(
            skeleton.clone(),
            MetaRecord::new(WayId::new(1), 2, Timestamp::new(200), 0, 0),
            vec![tag("highway", "secondary")],
        );
        batch.normalize(true);

        let mut existing = LocalTags::new();
        existing
            .entry(TagIndexLocal::new(Bucket::new(5), "highway", "primary"))
            .or_default()
            .insert(WayId::new(1));

        let mut timeline = IdxTimeline::new();
        timeline.insert(
            WayId::new(1),
            vec![
                Attic::new(Bucket::new(5), Timestamp::new(200)),
                Attic::new(Bucket::new(5), Timestamp::NOW),
            ],
        );

        let attic = compute_new_attic_local_tags(&timeline, &batch, &existing);
        let key = TagIndexLocal::new(Bucket::new(5), "highway", "primary");
        assert!(attic[&key].contains(&Attic::new(WayId::new(1), Timestamp::new(200))));
        // The new tag set is current and has no attic entry.
        let new_key = TagIndexLocal::new(Bucket::new(5), "highway", "secondary");
        assert!(!attic.contains_key(&new_key));
    }
}
