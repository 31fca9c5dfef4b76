//! The batch driver: orchestrates the differ, the attic builder and the
//! store writes in a fixed commit order.

use std::collections::BTreeSet;

use tracing::debug;
use wayline_error::Result;
use wayline_store::{
    Backend, IdxLists, ProgressSink, SpatialSchema, final_flush_plan, partial_merge_plan,
    partial_sink,
};
use wayline_types::{Bucket, MetaRecord, WayId, WaySkeleton};

use crate::attic::{AtticEmit, compute_new_attic_skeletons, strip_single_idxs};
use crate::batch::Batch;
use crate::changelog::compute_changelog;
use crate::current::{
    CurrentDiff, add_deleted_skeletons, compute_geometry, make_id_idx_directory,
    new_current_skeletons, new_implicit_skeletons,
};
use crate::implicit::implicitly_moved_skeletons;
use crate::meta::{
    MetaDiff, compute_new_attic_idx_by_id_and_time, compute_new_attic_meta, new_current_meta,
    new_implicit_meta,
};
use crate::resolver::{AtticNodesByCell, NodeResolver, NodesByCell};
use crate::tags::{
    TagDiff, compute_attic_global_tags, compute_new_attic_local_tags, new_current_global_tags,
    new_current_local_tags, new_implicit_local_tags,
};

/// How much history the database keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaMode {
    /// Skeletons and tags only.
    OnlyData,
    /// Plus authorship metadata.
    KeepMeta,
    /// Plus the full attic version history.
    KeepAttic,
}

impl MetaMode {
    #[inline]
    pub const fn keeps_meta(self) -> bool {
        !matches!(self, Self::OnlyData)
    }

    #[inline]
    pub const fn keeps_attic(self) -> bool {
        matches!(self, Self::KeepAttic)
    }
}

/// Driver configuration.
#[derive(Debug, Clone, Copy)]
pub struct UpdaterConfig {
    pub mode: MetaMode,
    /// Allow partial-batch accumulation. Only honored while the main sink
    /// does not exist yet, i.e. during an initial import.
    pub allow_partial: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            mode: MetaMode::KeepAttic,
            allow_partial: false,
        }
    }
}

/// The way update engine.
///
/// Accumulate a batch with [`put_way`](Self::put_way) /
/// [`delete_way`](Self::delete_way), then apply it with
/// [`update`](Self::update). Single-threaded; one batch at a time.
pub struct WayUpdater<B: Backend, S: SpatialSchema> {
    backend: B,
    schema: S,
    mode: MetaMode,
    partial_possible: bool,
    update_counter: u32,
    batch: Batch,
}

impl<B: Backend, S: SpatialSchema> WayUpdater<B, S> {
    pub fn new(backend: B, schema: S, config: UpdaterConfig) -> Result<Self> {
        let partial_possible = config.allow_partial && !backend.main_sink_exists()?;
        Ok(Self {
            backend,
            schema,
            mode: config.mode,
            partial_possible,
            update_counter: 0,
            batch: Batch::new(),
        })
    }

    /// An updater over a caller-managed backend session.
    ///
    /// Partial-batch accumulation is never available in this form; the
    /// session owner controls durability.
    pub fn for_session(backend: B, schema: S, mode: MetaMode) -> Self {
        Self {
            backend,
            schema,
            mode,
            partial_possible: false,
            update_counter: 0,
            batch: Batch::new(),
        }
    }

    /// The backend, for inspection.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Queue a new or modified way version.
    pub fn put_way(
        &mut self,
        skeleton: WaySkeleton,
        meta: MetaRecord,
        tags: Vec<(String, String)>,
    ) {
        self.batch.push_version(skeleton, meta, tags);
    }

    /// Queue a deletion.
    pub fn delete_way(&mut self, id: WayId, meta: MetaRecord) {
        self.batch.push_delete(id, meta);
    }

    /// Queued entries not yet applied.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Apply the accumulated batch.
    ///
    /// `moved_nodes` holds the node versions displaced by the same diff,
    /// keyed by their old cell; `new_nodes` the nodes' new positions;
    /// `new_attic_nodes` the expiry-stamped snapshots the node updater wrote.
    /// With `partial` set (and partial accumulation possible), the writes
    /// land in a staged sink instead of the main one.
    pub fn update(
        &mut self,
        progress: &mut dyn ProgressSink,
        partial: bool,
        new_nodes: &NodesByCell,
        moved_nodes: &NodesByCell,
        new_attic_nodes: &AtticNodesByCell,
    ) -> Result<()> {
        let mut batch = std::mem::take(&mut self.batch);
        batch.normalize(self.mode.keeps_attic());
        let ids = batch.ids();
        debug!(entries = batch.len(), ways = ids.len(), "applying way batch");

        // Existing current state.
        let existing_positions = self.backend.read_map_positions(&ids)?;
        let existing_buckets: BTreeSet<Bucket> =
            existing_positions.iter().map(|&(_, bucket)| bucket).collect();
        let id_set: BTreeSet<WayId> = ids.iter().copied().collect();
        let mut existing_skeletons = self.backend.read_current_ways(&existing_buckets)?;
        for ways in existing_skeletons.values_mut() {
            ways.retain(|id, _| id_set.contains(id));
        }

        let implicit = implicitly_moved_skeletons(
            &self.backend,
            &self.schema,
            moved_nodes,
            &existing_skeletons,
        )?;
        let implicit_positions = make_id_idx_directory(&implicit);

        let existing_meta = if self.mode.keeps_meta() {
            self.backend.read_current_meta(&existing_positions)?
        } else {
            Default::default()
        };
        let implicit_meta = if self.mode.keeps_meta() {
            self.backend.read_current_meta(&implicit_positions)?
        } else {
            Default::default()
        };

        let existing_local_tags = self.backend.read_local_tags(&existing_positions)?;
        let implicit_local_tags = self.backend.read_local_tags(&implicit_positions)?;

        let resolver = NodeResolver::build(
            &self.backend,
            &batch,
            &existing_skeletons,
            &implicit,
            new_nodes,
            new_attic_nodes,
        )?;

        progress.compute_started();
        compute_geometry(&resolver, &self.schema, &mut batch);

        let mut diff = CurrentDiff::default();
        new_current_skeletons(&batch, &existing_positions, &existing_skeletons, &mut diff);
        new_implicit_skeletons(&resolver, &self.schema, &implicit, &mut diff);

        let mut new_positions = make_id_idx_directory(&diff.inserted);

        let mut meta_diff = MetaDiff::default();
        if self.mode.keeps_meta() {
            new_current_meta(&batch, &existing_positions, &existing_meta, &mut meta_diff);
            new_implicit_meta(&implicit_meta, &new_positions, &mut meta_diff);
        }

        let mut tag_diff = TagDiff::default();
        new_current_local_tags(&batch, &existing_local_tags, &mut tag_diff);
        new_implicit_local_tags(&implicit_local_tags, &new_positions, &mut tag_diff);

        add_deleted_skeletons(&diff, &mut new_positions);
        progress.compute_finished();

        // Current-store commit, in fixed order.
        progress.update_started();
        progress.prepare_delete_tags_finished();

        self.backend.update_map_positions(&new_positions)?;
        progress.update_ids_finished();

        self.backend.update_current_ways(&diff.displaced, &diff.inserted)?;
        progress.update_coords_finished();

        if self.mode.keeps_meta() {
            self.backend
                .update_current_meta(&meta_diff.displaced, &meta_diff.inserted)?;
            progress.meta_finished();
        }

        self.backend
            .update_local_tags(&tag_diff.removed_local, &tag_diff.added_local)?;
        progress.tags_local_finished();

        let (removed_global, added_global) = new_current_global_tags(&tag_diff);
        self.backend.update_global_tags(&removed_global, &added_global)?;
        progress.tags_global_finished();

        if self.mode.keeps_attic() {
            progress.current_update_finished();

            // Also include the ids of the only-moved ways.
            let mut attic_ids = ids.clone();
            attic_ids.extend(implicit_positions.iter().map(|&(id, _)| id));
            attic_ids.sort_unstable();
            attic_ids.dedup();

            let attic_positions = self.backend.read_attic_map_positions(&attic_ids)?;
            let raw_lists = self.backend.read_attic_idx_lists(&attic_ids)?;
            let existing_idx_lists = reconstruct_idx_lists(&attic_positions, &raw_lists);
            let existing_attic_timestamps =
                self.backend.read_newest_attic_deltas(&attic_ids)?;

            progress.compute_attic_started();
            let mut emit = AtticEmit {
                idx_lists: existing_idx_lists.clone(),
                ..Default::default()
            };
            compute_new_attic_skeletons(
                &self.schema,
                &resolver,
                &batch,
                &implicit,
                &existing_positions,
                &attic_positions,
                &diff.displaced,
                &existing_attic_timestamps,
                &mut emit,
            )?;

            let timeline = compute_new_attic_idx_by_id_and_time(&new_positions, &emit.full_attic);
            let new_attic_meta = compute_new_attic_meta(&timeline, &batch, &meta_diff);
            let new_attic_local_tags =
                compute_new_attic_local_tags(&timeline, &batch, &existing_local_tags);
            let new_attic_global_tags = compute_attic_global_tags(&new_attic_local_tags);
            let changelog =
                compute_changelog(&batch, &implicit, &existing_positions, &diff.displaced, &resolver);

            let mut old_lists = existing_idx_lists;
            strip_single_idxs(&mut old_lists);
            let mut new_lists = std::mem::take(&mut emit.idx_lists);
            let new_attic_positions = strip_single_idxs(&mut new_lists);
            progress.compute_attic_finished();

            progress.attic_update_started();
            self.backend.update_attic_map_positions(&new_attic_positions)?;
            self.backend.update_attic_idx_lists(&old_lists, &new_lists)?;
            progress.update_ids_finished();

            self.backend.update_attic_ways(&emit.to_delete, &emit.full_attic)?;
            progress.update_coords_finished();

            self.backend.insert_undelete_entries(&emit.new_undeleted)?;
            progress.undeleted_finished();

            self.backend.insert_attic_meta(&new_attic_meta)?;
            progress.meta_finished();

            self.backend.insert_attic_local_tags(&new_attic_local_tags)?;
            progress.tags_local_finished();

            self.backend.insert_attic_global_tags(&new_attic_global_tags)?;
            progress.tags_global_finished();

            self.backend.append_changelog(&changelog)?;
            progress.changelog_finished();
        }

        progress.update_finished();

        self.apply_partial_policy(progress, partial)
    }

    /// Rotate or flush the partial-batch sinks after a commit.
    fn apply_partial_policy(
        &mut self,
        progress: &mut dyn ProgressSink,
        partial: bool,
    ) -> Result<()> {
        if !self.partial_possible {
            return Ok(());
        }

        if !partial && self.update_counter > 0 {
            progress.partial_started();
            for op in final_flush_plan(self.update_counter) {
                self.backend.merge_sinks(&op.froms, op.into)?;
            }
            self.update_counter = 0;
            progress.partial_finished();
        } else if partial {
            self.backend.rotate_main_to(partial_sink(self.update_counter))?;
            self.update_counter += 1;

            let plan = partial_merge_plan(self.update_counter);
            if !plan.is_empty() {
                progress.partial_started();
                for op in plan {
                    self.backend.merge_sinks(&op.froms, op.into)?;
                }
                progress.partial_finished();
            }
        }
        Ok(())
    }
}

/// Rebuild full per-id bucket lists from the stripped directory form.
fn reconstruct_idx_lists(
    attic_positions: &[(WayId, Bucket)],
    raw_lists: &IdxLists,
) -> IdxLists {
    let mut lists = IdxLists::new();
    for &(id, bucket) in attic_positions {
        if bucket.is_unknown() {
            lists.insert(id, raw_lists.get(&id).cloned().unwrap_or_default());
        } else {
            lists.insert(id, [bucket].into_iter().collect());
        }
    }
    lists
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_store::{MemoryBackend, NullProgress, SinkSuffix, SpanSchema};
    use wayline_types::{NodeId, NodeSnapshot, Timestamp};

    fn put(updater: &mut WayUpdater<MemoryBackend, SpanSchema>, id: u64, version: u32, ts: u64) {
        updater.put_way(
            WaySkeleton::new(WayId::new(id), vec![NodeId::new(1)]),
            MetaRecord::new(WayId::new(id), version, Timestamp::new(ts), 0, 0),
            Vec::new(),
        );
    }

    fn nodes_in_cell(cell: u32, ids: &[u64]) -> NodesByCell {
        let mut nodes = NodesByCell::new();
        for &id in ids {
            nodes
                .entry(cell)
                .or_default()
                .insert(NodeSnapshot::new(NodeId::new(id), 0));
        }
        nodes
    }

    #[test]
    fn partial_batches_rotate_and_flush() {
        let backend = MemoryBackend::new();
        let mut updater = WayUpdater::new(
            backend.clone(),
            SpanSchema,
            UpdaterConfig {
                mode: MetaMode::OnlyData,
                allow_partial: true,
            },
        )
        .unwrap();

        let nodes = nodes_in_cell(5, &[1]);
        for round in 0..3u64 {
            put(&mut updater, 100 + round, 1, 100 + round);
            updater
                .update(
                    &mut NullProgress,
                    true,
                    &nodes,
                    &NodesByCell::new(),
                    &AtticNodesByCell::new(),
                )
                .unwrap();
        }
        // Three staged sinks, empty main.
        assert!(!backend.main_sink_exists().unwrap());
        assert_eq!(backend.snapshot(SinkSuffix::Level0(2)).map_positions.len(), 1);

        // Final non-partial batch flushes everything back.
        put(&mut updater, 200, 1, 500);
        updater
            .update(
                &mut NullProgress,
                false,
                &nodes,
                &NodesByCell::new(),
                &AtticNodesByCell::new(),
            )
            .unwrap();
        let main = backend.snapshot(SinkSuffix::Main);
        assert_eq!(main.map_positions.len(), 4);
        assert!(backend.snapshot(SinkSuffix::Level0(0)).map_positions.is_empty());
    }

    #[test]
    fn partial_disabled_when_main_sink_exists() {
        let mut backend = MemoryBackend::new();
        backend
            .update_map_positions(&[(WayId::new(9), Bucket::new(1))])
            .unwrap();
        let updater = WayUpdater::new(
            backend,
            SpanSchema,
            UpdaterConfig {
                mode: MetaMode::OnlyData,
                allow_partial: true,
            },
        )
        .unwrap();
        assert!(!updater.partial_possible);
    }
}
