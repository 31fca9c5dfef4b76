//! The attic history builder and reconciler.
//!
//! For every way the batch touches, the builder generates the delta-encoded
//! historical snapshots at each node-move instant inside the edit window,
//! tracks bucket migrations through the per-id bucket lists and the undelete
//! index, and rewrites previously stored deltas whose reference this batch
//! invalidates.

use std::collections::BTreeMap;

use tracing::warn;
use wayline_error::{Result, WaylineError};
use wayline_store::{AtticWays, CurrentWays, IdxLists, SpatialSchema, UndeleteEntries};
use wayline_types::{Attic, Bucket, Timestamp, WayDelta, WayId, WaySkeleton};

use crate::batch::Batch;
use crate::current::position_of;
use crate::geometry::{compute_bucket_and_geometry, geometrically_equal};
use crate::resolver::NodeResolver;

/// Emit buffers of one attic pass, owned by the driver.
#[derive(Debug, Default)]
pub struct AtticEmit {
    /// New delta records keyed by the bucket they are stored under.
    pub full_attic: AtticWays,
    /// Undelete breadcrumbs keyed by destination bucket.
    pub new_undeleted: UndeleteEntries,
    /// Per-id bucket lists, seeded with the pre-batch lists.
    pub idx_lists: IdxLists,
    /// Reconciled deltas to remove, keyed by their old bucket.
    pub to_delete: AtticWays,
}

/// The youngest delta already on disk for an id, with its storage bucket.
pub type ExistingAtticTimestamps = BTreeMap<WayId, (Bucket, Attic<WayDelta>)>;

/// The timestamps at which a node of `skeleton` changed position within
/// `(old_ts, new_ts]`, sorted and deduplicated.
pub(crate) fn relevant_timestamps(
    skeleton: &WaySkeleton,
    old_ts: Timestamp,
    new_ts: Timestamp,
    resolver: &NodeResolver,
) -> Vec<Timestamp> {
    let mut timestamps: Vec<Timestamp> = Vec::new();
    for nd in &skeleton.nds {
        for (_, snapshot) in resolver.versions_by_id.get(nd).into_iter().flatten() {
            if old_ts < snapshot.timestamp && snapshot.timestamp <= new_ts {
                timestamps.push(snapshot.timestamp);
            }
        }
    }
    timestamps.sort_unstable();
    timestamps.dedup();
    timestamps
}

/// Generate the intermediate historical versions of one interval.
///
/// `skeleton` was current throughout `(old_ts, new_ts]`; `reference` is the
/// skeleton valid just after `new_ts` (empty when the window ends open).
/// `attic_bucket` is the bucket the skeleton was stored under, or
/// [`Bucket::DELETED`] when unknown, which forces recomputation.
///
/// Returns the bucket of the oldest emitted snapshot and, when that bucket
/// equals `attic_bucket`, the oldest-in-window skeleton for reconciliation;
/// otherwise the empty skeleton, and the caller must not reconcile against
/// it as a same-bucket reference.
#[allow(clippy::too_many_arguments)]
fn add_intermediate_versions<S: SpatialSchema>(
    schema: &S,
    resolver: &NodeResolver,
    skeleton: &WaySkeleton,
    reference: &WaySkeleton,
    old_ts: Timestamp,
    new_ts: Timestamp,
    add_last_version: bool,
    attic_bucket: Bucket,
    emit: &mut AtticEmit,
) -> (Bucket, WaySkeleton) {
    let mut timestamps = relevant_timestamps(skeleton, old_ts, new_ts, resolver);

    // Anchor the newest-in-window snapshot. When the stored bucket is known
    // and no node moved, the stored skeleton already is that snapshot.
    let mut bucket = attic_bucket;
    let mut current = skeleton.clone();
    if bucket.is_deleted() || !timestamps.is_empty() {
        (bucket, current) = compute_bucket_and_geometry(schema, skeleton, new_ts, resolver);
    }

    if timestamps.last() == Some(&Timestamp::NOW) {
        timestamps.pop();
    }

    // Upper-endpoint delta at new_ts itself.
    if (add_last_version && old_ts < new_ts) || timestamps.last() == Some(&new_ts) {
        let (reference_bucket, reference_skel) =
            compute_bucket_and_geometry(schema, reference, new_ts.successor(), resolver);

        let delta = if bucket == reference_bucket {
            WayDelta::encode(&reference_skel, &current)
        } else {
            WayDelta::encode(&WaySkeleton::empty(), &current)
        };
        emit.full_attic
            .entry(bucket)
            .or_default()
            .insert(Attic::new(delta, new_ts));
        emit.idx_lists.entry(skeleton.id).or_default().insert(bucket);

        // A deleted successor has no live bucket to leave a breadcrumb in;
        // treat it like the never-placed marker.
        if bucket != reference_bucket
            && !reference_bucket.is_no_live()
            && !reference_bucket.is_deleted()
        {
            emit.new_undeleted
                .entry(reference_bucket)
                .or_default()
                .insert(Attic::new(skeleton.id, new_ts));
        }

        if timestamps.last() == Some(&new_ts) {
            timestamps.pop();
        }
    }

    let mut last_bucket = bucket;
    let mut last_skeleton = current;

    // Walk the node-move instants newest to oldest; each snapshot encodes
    // against the next-younger one when they share a bucket.
    for (position, &timestamp) in timestamps.iter().enumerate().rev() {
        let mut bucket = attic_bucket;
        let mut current = skeleton.clone();
        if bucket.is_deleted() || position != 0 {
            (bucket, current) = compute_bucket_and_geometry(schema, skeleton, timestamp, resolver);
        }

        let delta = if last_bucket == bucket {
            WayDelta::encode(&last_skeleton, &current)
        } else {
            WayDelta::encode(&WaySkeleton::empty(), &current)
        };
        emit.full_attic
            .entry(bucket)
            .or_default()
            .insert(Attic::new(delta, timestamp));
        emit.idx_lists.entry(skeleton.id).or_default().insert(bucket);

        if bucket != last_bucket && !last_bucket.is_no_live() {
            emit.new_undeleted
                .entry(last_bucket)
                .or_default()
                .insert(Attic::new(skeleton.id, timestamp));
        }
        last_bucket = bucket;
        last_skeleton = current;
    }

    if last_bucket == attic_bucket {
        (last_bucket, last_skeleton)
    } else {
        (last_bucket, WaySkeleton::empty())
    }
}

/// Rewrite a previously stored delta whose reference this batch changed.
///
/// Expands the existing delta against its old reference, re-encodes against
/// the new one (or the empty skeleton on a bucket change), and replaces the
/// stored record when the encoding differs.
pub fn adapt_newest_existing_attic(
    old_bucket: Bucket,
    new_bucket: Bucket,
    existing_delta: &Attic<WayDelta>,
    existing_reference: &WaySkeleton,
    new_reference: &WaySkeleton,
    emit: &mut AtticEmit,
) -> Result<()> {
    let expanded = existing_delta
        .elem
        .expand(existing_reference)
        .map_err(|err| WaylineError::DeltaMismatch {
            way: existing_delta.elem.id.get(),
            detail: err.to_string(),
        })?;

    let empty = WaySkeleton::empty();
    let reference = if old_bucket == new_bucket {
        new_reference
    } else {
        &empty
    };
    let new_delta = WayDelta::encode(reference, &expanded);

    if new_delta != existing_delta.elem {
        emit.to_delete
            .entry(old_bucket)
            .or_default()
            .insert(existing_delta.clone());
        emit.full_attic
            .entry(new_bucket)
            .or_default()
            .insert(Attic::new(new_delta, existing_delta.timestamp));
        warn!(
            way = existing_delta.elem.id.get(),
            timestamp = %existing_delta.timestamp,
            "way changed at the same timestamp in two different diffs"
        );
    }
    Ok(())
}

/// Build every attic record the batch implies.
///
/// Walks the sorted batch, filling the gaps between explicit versions, from
/// the youngest existing attic version to the oldest explicit one, and from
/// the latest explicit one to now; then covers the purely implicitly moved
/// ways.
#[allow(clippy::too_many_arguments)]
pub fn compute_new_attic_skeletons<S: SpatialSchema>(
    schema: &S,
    resolver: &NodeResolver,
    batch: &Batch,
    implicitly_moved: &CurrentWays,
    existing_positions: &[(WayId, Bucket)],
    attic_positions: &[(WayId, Bucket)],
    displaced: &CurrentWays,
    existing_attic_timestamps: &ExistingAtticTimestamps,
    emit: &mut AtticEmit,
) -> Result<()> {
    let entries = &batch.entries;
    let mut last_id = WayId::ZERO;

    for (index, entry) in entries.iter().enumerate() {
        let id = entry.id();
        let next = entries.get(index + 1).filter(|next| next.id() == id);
        let mut entry_bucket = entry.bucket;

        if let Some(next) = next {
            if !entry.bucket.is_deleted() {
                let add_last = next.bucket.is_deleted()
                    || !geometrically_equal(&entry.skeleton, &next.skeleton);
                let (last, _) = add_intermediate_versions(
                    schema,
                    resolver,
                    &entry.skeleton,
                    &next.skeleton,
                    entry.timestamp(),
                    next.timestamp(),
                    add_last,
                    Bucket::DELETED,
                    emit,
                );
                entry_bucket = last;
            }
        } else {
            // Latest version of this id; cover changes since it.
            let (last, _) = add_intermediate_versions(
                schema,
                resolver,
                &entry.skeleton,
                &WaySkeleton::empty(),
                entry.timestamp(),
                Timestamp::NOW,
                false,
                Bucket::DELETED,
                emit,
            );
            entry_bucket = last;
        }

        if last_id == id {
            // An earlier version of this id exists in the batch. A deleted
            // predecessor makes this version a re-creation: record where it
            // reappeared.
            let previous = &entries[index - 1];
            if previous.bucket.is_deleted() {
                if entry_bucket.is_unknown() {
                    let (recomputed, _) = compute_bucket_and_geometry(
                        schema,
                        &entry.skeleton,
                        entry.timestamp().successor(),
                        resolver,
                    );
                    entry_bucket = recomputed;
                }
                emit.new_undeleted
                    .entry(entry_bucket)
                    .or_default()
                    .insert(Attic::new(id, entry.timestamp()));
            }
            continue;
        }
        // First version of this id in the batch. A way that only has attic
        // history was deleted in an earlier batch and reappears now.
        if position_of(existing_positions, id).is_none()
            && position_of(attic_positions, id).is_some()
        {
            if entry_bucket.is_unknown() {
                let (recomputed, _) = compute_bucket_and_geometry(
                    schema,
                    &entry.skeleton,
                    entry.timestamp().successor(),
                    resolver,
                );
                entry_bucket = recomputed;
            }
            emit.new_undeleted
                .entry(entry_bucket)
                .or_default()
                .insert(Attic::new(id, entry.timestamp()));
        }
        last_id = id;

        let Some(old_bucket) = position_of(existing_positions, id) else {
            // No old data exists, nothing to push into the attic.
            continue;
        };
        let Some(existing_skeleton) = displaced.get(&old_bucket).and_then(|ways| ways.get(&id))
        else {
            warn!(way = id.get(), bucket = old_bucket.val(), "way in directory has no skeleton");
            continue;
        };

        let newest_existing = existing_attic_timestamps.get(&id);
        let prior_ts = newest_existing
            .map(|(_, delta)| delta.timestamp)
            .unwrap_or(Timestamp::ZERO);
        let add_last = entry.bucket.is_deleted()
            || !geometrically_equal(existing_skeleton, &entry.skeleton);

        let (_, oldest_new) = add_intermediate_versions(
            schema,
            resolver,
            existing_skeleton,
            &entry.skeleton,
            prior_ts,
            entry.timestamp(),
            add_last,
            old_bucket,
            emit,
        );

        if let Some((stored_bucket, existing_delta)) = newest_existing {
            if existing_delta.elem.id == id {
                let empty = WaySkeleton::empty();
                let new_reference = if existing_delta.timestamp < entry.timestamp() {
                    &oldest_new
                } else {
                    &empty
                };
                adapt_newest_existing_attic(
                    *stored_bucket,
                    old_bucket,
                    existing_delta,
                    existing_skeleton,
                    new_reference,
                    emit,
                )?;
            }
        }
    }

    // Ways that shifted only because a node moved.
    for (&old_bucket, ways) in implicitly_moved {
        for (&id, skeleton) in ways {
            let newest_existing = existing_attic_timestamps.get(&id);
            let prior_ts = newest_existing
                .map(|(_, delta)| delta.timestamp)
                .unwrap_or(Timestamp::ZERO);

            let (_, oldest_new) = add_intermediate_versions(
                schema,
                resolver,
                skeleton,
                skeleton,
                prior_ts,
                Timestamp::NOW,
                false,
                old_bucket,
                emit,
            );

            if let Some((stored_bucket, existing_delta)) = newest_existing {
                if existing_delta.elem.id == id {
                    adapt_newest_existing_attic(
                        *stored_bucket,
                        old_bucket,
                        existing_delta,
                        skeleton,
                        &oldest_new,
                        emit,
                    )?;
                }
            }
        }
    }

    Ok(())
}

/// Collapse single-bucket lists into plain directory entries.
///
/// Ids whose history sits in one bucket get a direct `(id, bucket)` entry
/// and lose their list; multi-bucket ids keep the list and get an
/// [`Bucket::UNKNOWN`] directory entry pointing at it.
pub fn strip_single_idxs(lists: &mut IdxLists) -> Vec<(WayId, Bucket)> {
    let mut positions = Vec::new();
    lists.retain(|&id, buckets| match buckets.len() {
        0 => false,
        1 => {
            if let Some(&bucket) = buckets.iter().next() {
                positions.push((id, bucket));
            }
            false
        }
        _ => {
            positions.push((id, Bucket::UNKNOWN));
            true
        }
    });
    positions
}
