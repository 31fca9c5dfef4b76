//! The backend trait: every store the update engine reads or writes.
//!
//! All collection shapes are bucket-keyed maps of ordered sets, mirroring the
//! on-disk partitioning: one block run per bucket, records ordered within it.
//! Updates are delete-then-insert pairs; each call is atomic with respect to
//! its store, the sequence across stores is not transactional.

use std::collections::{BTreeMap, BTreeSet};

use wayline_error::Result;
use wayline_types::{
    Attic, Bucket, Coord, MetaRecord, NodeId, TagIndexGlobal, TagIndexLocal, Timestamp, WayDelta,
    WayId, WaySkeleton,
};

use crate::rotation::SinkSuffix;

/// Current skeletons partitioned by bucket, one per id.
pub type CurrentWays = BTreeMap<Bucket, BTreeMap<WayId, WaySkeleton>>;
/// Attic deltas partitioned by the bucket the historical version occupied.
pub type AtticWays = BTreeMap<Bucket, BTreeSet<Attic<WayDelta>>>;
/// Undelete breadcrumbs: destination bucket → (id, migration time).
pub type UndeleteEntries = BTreeMap<Bucket, BTreeSet<Attic<WayId>>>;
/// Per-id list of every bucket that has ever held a version of the way.
pub type IdxLists = BTreeMap<WayId, BTreeSet<Bucket>>;
/// Change timestamps → the ways that became current at that moment.
pub type Changelog = BTreeMap<Timestamp, Vec<WayId>>;
/// Metadata records partitioned by bucket.
pub type CurrentMeta = BTreeMap<Bucket, BTreeSet<MetaRecord>>;
/// Local tag index: `(bucket, key, value)` → ids.
pub type LocalTags = BTreeMap<TagIndexLocal, BTreeSet<WayId>>;
/// Attic local tag index: entries stamped with their expiry time.
pub type AtticLocalTags = BTreeMap<TagIndexLocal, BTreeSet<Attic<WayId>>>;
/// Global tag index: `(key, value)` → ids.
pub type GlobalTags = BTreeMap<TagIndexGlobal, BTreeSet<WayId>>;
/// Attic global tag index.
pub type AtticGlobalTags = BTreeMap<TagIndexGlobal, Vec<Attic<WayId>>>;

/// The complete store stack consumed by the way updater.
///
/// Reads never observe the current batch's uncommitted writes; the driver
/// orders its calls so that each step sees the writes of the previous ones.
pub trait Backend {
    // -- Current store --

    /// Look up the current bucket of each id. Missing ids are omitted.
    fn read_map_positions(&self, ids: &[WayId]) -> Result<Vec<(WayId, Bucket)>>;

    /// Write id→bucket entries. A [`Bucket::DELETED`] value removes the entry.
    fn update_map_positions(&mut self, positions: &[(WayId, Bucket)]) -> Result<()>;

    /// Read all current skeletons stored under the given buckets.
    fn read_current_ways(&self, buckets: &BTreeSet<Bucket>) -> Result<CurrentWays>;

    /// Apply a delete/insert pair to the current skeleton store.
    fn update_current_ways(&mut self, to_delete: &CurrentWays, to_insert: &CurrentWays)
    -> Result<()>;

    // -- Node store (read-only here; the node updater owns writes) --

    /// Current positions of the given nodes. Missing ids are omitted.
    fn read_node_positions(&self, ids: &[NodeId]) -> Result<BTreeMap<NodeId, Coord>>;

    // -- Meta store --

    /// Read the current meta record of each positioned id.
    fn read_current_meta(&self, positions: &[(WayId, Bucket)]) -> Result<CurrentMeta>;

    /// Apply a delete/insert pair to the current meta store.
    fn update_current_meta(&mut self, to_delete: &CurrentMeta, to_insert: &CurrentMeta)
    -> Result<()>;

    /// Append records to the attic meta store.
    fn insert_attic_meta(&mut self, to_insert: &CurrentMeta) -> Result<()>;

    // -- Tag stores --

    /// Read the local tags of each positioned id.
    fn read_local_tags(&self, positions: &[(WayId, Bucket)]) -> Result<LocalTags>;

    /// Apply a delete/insert pair to the local tag store.
    fn update_local_tags(&mut self, to_delete: &LocalTags, to_insert: &LocalTags) -> Result<()>;

    /// Apply a delete/insert pair to the global tag store.
    fn update_global_tags(&mut self, to_delete: &GlobalTags, to_insert: &GlobalTags) -> Result<()>;

    /// Append entries to the attic local tag store.
    fn insert_attic_local_tags(&mut self, to_insert: &AtticLocalTags) -> Result<()>;

    /// Append entries to the attic global tag store.
    fn insert_attic_global_tags(&mut self, to_insert: &AtticGlobalTags) -> Result<()>;

    // -- Attic store --

    /// Look up the attic bucket of each id. [`Bucket::UNKNOWN`] marks ids
    /// whose versions span several buckets; their bucket list holds the set.
    fn read_attic_map_positions(&self, ids: &[WayId]) -> Result<Vec<(WayId, Bucket)>>;

    /// Write attic id→bucket entries.
    fn update_attic_map_positions(&mut self, positions: &[(WayId, Bucket)]) -> Result<()>;

    /// Read the multi-bucket lists of the given ids.
    fn read_attic_idx_lists(&self, ids: &[WayId]) -> Result<IdxLists>;

    /// Apply a delete/insert pair to the per-id bucket lists.
    fn update_attic_idx_lists(&mut self, to_delete: &IdxLists, to_insert: &IdxLists) -> Result<()>;

    /// For each id, the youngest attic delta on disk and the bucket it is
    /// stored under. Ids without attic history are omitted.
    fn read_newest_attic_deltas(
        &self,
        ids: &[WayId],
    ) -> Result<BTreeMap<WayId, (Bucket, Attic<WayDelta>)>>;

    /// Apply a delete/insert pair to the attic delta store. Deletions only
    /// occur on the reconciliation path.
    fn update_attic_ways(&mut self, to_delete: &AtticWays, to_insert: &AtticWays) -> Result<()>;

    /// Append undelete breadcrumbs.
    fn insert_undelete_entries(&mut self, to_insert: &UndeleteEntries) -> Result<()>;

    /// Append changelog entries, deduplicating ids per timestamp.
    fn append_changelog(&mut self, entries: &Changelog) -> Result<()>;

    // -- Partial-batch sinks --

    /// Whether the main sink already holds data. Partial batches are only
    /// possible while it does not.
    fn main_sink_exists(&self) -> Result<bool>;

    /// Move the main sink's contents to the named sink, leaving the main
    /// sink empty for the next partial batch.
    fn rotate_main_to(&mut self, sink: SinkSuffix) -> Result<()>;

    /// Merge the named sinks into `into`, consuming them. Sources are merged
    /// in order; later sources win on key conflicts.
    fn merge_sinks(&mut self, froms: &[SinkSuffix], into: SinkSuffix) -> Result<()>;
}
