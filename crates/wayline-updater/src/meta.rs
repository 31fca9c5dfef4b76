//! Metadata diffing: authorship records follow skeletons through versions
//! and bucket migrations.

use std::collections::{BTreeMap, BTreeSet};

use wayline_store::{AtticWays, CurrentMeta};
use wayline_types::{Attic, Bucket, MetaRecord, Timestamp, WayId};

use crate::batch::Batch;
use crate::current::position_of;

/// The changes the batch makes to the current meta store.
#[derive(Debug, Default)]
pub struct MetaDiff {
    /// Records to remove, keyed by their old bucket.
    pub displaced: CurrentMeta,
    /// Records to insert, keyed by their new bucket.
    pub inserted: CurrentMeta,
}

/// Per-id timeline of `(bucket, valid-until)` pairs covering every version
/// the batch leaves behind, the current one stamped `NOW`.
pub type IdxTimeline = BTreeMap<WayId, Vec<Attic<Bucket>>>;

/// Diff the explicit batch entries against the existing meta store.
pub fn new_current_meta(
    batch: &Batch,
    existing_positions: &[(WayId, Bucket)],
    existing_meta: &CurrentMeta,
    diff: &mut MetaDiff,
) {
    for index in 0..batch.entries.len() {
        if !batch.is_latest(index) {
            continue;
        }
        let entry = &batch.entries[index];
        let id = entry.id();

        if let Some(old_bucket) = position_of(existing_positions, id) {
            for record in existing_meta
                .get(&old_bucket)
                .into_iter()
                .flatten()
                .filter(|record| record.id == id)
            {
                diff.displaced
                    .entry(old_bucket)
                    .or_default()
                    .insert(record.clone());
            }
        }
        diff.inserted
            .entry(entry.bucket)
            .or_default()
            .insert(entry.meta.clone());
    }
}

/// Move the meta records of implicitly moved ways to their new bucket.
pub fn new_implicit_meta(
    implicit_meta: &CurrentMeta,
    new_positions: &[(WayId, Bucket)],
    diff: &mut MetaDiff,
) {
    for (&old_bucket, records) in implicit_meta {
        for record in records {
            let Some(new_bucket) = position_of(new_positions, record.id) else {
                continue;
            };
            if new_bucket == old_bucket || new_bucket.is_deleted() {
                continue;
            }
            diff.displaced
                .entry(old_bucket)
                .or_default()
                .insert(record.clone());
            diff.inserted
                .entry(new_bucket)
                .or_default()
                .insert(record.clone());
        }
    }
}

/// Build the per-id `(bucket, valid-until)` timeline from the new attic
/// deltas plus the surviving current positions.
pub fn compute_new_attic_idx_by_id_and_time(
    new_positions: &[(WayId, Bucket)],
    new_attic: &AtticWays,
) -> IdxTimeline {
    let mut timeline = IdxTimeline::new();
    for (&bucket, deltas) in new_attic {
        for delta in deltas {
            timeline
                .entry(delta.elem.id)
                .or_default()
                .push(Attic::new(bucket, delta.timestamp));
        }
    }
    for &(id, bucket) in new_positions {
        if !bucket.is_deleted() && !bucket.is_unknown() {
            timeline
                .entry(id)
                .or_default()
                .push(Attic::new(bucket, Timestamp::NOW));
        }
    }
    for entries in timeline.values_mut() {
        entries.sort_by_key(|entry| (entry.timestamp, entry.elem));
        entries.dedup();
    }
    timeline
}

/// The bucket holding the version that was current just after `timestamp`.
fn bucket_after(timeline: &IdxTimeline, id: WayId, timestamp: Timestamp) -> Option<Bucket> {
    timeline.get(&id).and_then(|entries| {
        entries
            .iter()
            .find(|entry| entry.timestamp > timestamp)
            .map(|entry| entry.elem)
    })
}

/// Place every superseded meta record at the bucket its version occupied.
///
/// Candidates are the displaced pre-batch records and the non-latest batch
/// versions; anything re-inserted into the current meta store stays there.
pub fn compute_new_attic_meta(
    timeline: &IdxTimeline,
    batch: &Batch,
    diff: &MetaDiff,
) -> CurrentMeta {
    let still_current: BTreeSet<&MetaRecord> = diff.inserted.values().flatten().collect();

    let mut out = CurrentMeta::new();
    let mut place = |record: &MetaRecord| {
        if still_current.contains(record) {
            return;
        }
        if let Some(bucket) = bucket_after(timeline, record.id, record.timestamp) {
            out.entry(bucket).or_default().insert(record.clone());
        }
    };

    for records in diff.displaced.values() {
        for record in records {
            place(record);
        }
    }
    for index in 0..batch.entries.len() {
        if !batch.is_latest(index) {
            place(&batch.entries[index].meta);
        }
    }
    out
}
