//! An in-memory backend for tests and embedded use.
//!
//! All stores are kept as ordered maps inside a shared mutex, keyed by sink
//! suffix. Clones share the same storage, so a test can hold a handle while
//! the updater owns another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use wayline_error::{Result, WaylineError};
use wayline_types::{Attic, Bucket, Coord, NodeId, WayDelta, WayId};

use crate::rotation::{MERGE_FAN_IN, SinkSuffix};
use crate::traits::{
    AtticGlobalTags, AtticLocalTags, AtticWays, Backend, Changelog, CurrentMeta, CurrentWays,
    GlobalTags, IdxLists, LocalTags, UndeleteEntries,
};

/// Every store of one sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSet {
    pub map_positions: BTreeMap<WayId, Bucket>,
    pub current: CurrentWays,
    pub nodes: BTreeMap<NodeId, Coord>,
    pub meta: CurrentMeta,
    pub local_tags: LocalTags,
    pub global_tags: GlobalTags,
    pub attic_map_positions: BTreeMap<WayId, Bucket>,
    pub attic_idx_lists: IdxLists,
    pub attic: AtticWays,
    pub attic_meta: CurrentMeta,
    pub attic_local_tags: AtticLocalTags,
    pub attic_global_tags: AtticGlobalTags,
    pub undeleted: UndeleteEntries,
    pub changelog: Changelog,
}

impl StoreSet {
    fn is_empty(&self) -> bool {
        self.map_positions.is_empty()
            && self.current.is_empty()
            && self.nodes.is_empty()
            && self.meta.is_empty()
            && self.local_tags.is_empty()
            && self.global_tags.is_empty()
            && self.attic_map_positions.is_empty()
            && self.attic_idx_lists.is_empty()
            && self.attic.is_empty()
            && self.attic_meta.is_empty()
            && self.attic_local_tags.is_empty()
            && self.attic_global_tags.is_empty()
            && self.undeleted.is_empty()
            && self.changelog.is_empty()
    }

    /// Fold `other` into this set; `other` wins on key conflicts.
    fn merge_from(&mut self, other: StoreSet) {
        self.map_positions.extend(other.map_positions);
        for (bucket, ways) in other.current {
            self.current.entry(bucket).or_default().extend(ways);
        }
        self.nodes.extend(other.nodes);
        for (bucket, records) in other.meta {
            self.meta.entry(bucket).or_default().extend(records);
        }
        for (key, ids) in other.local_tags {
            self.local_tags.entry(key).or_default().extend(ids);
        }
        for (key, ids) in other.global_tags {
            self.global_tags.entry(key).or_default().extend(ids);
        }
        self.attic_map_positions.extend(other.attic_map_positions);
        for (id, buckets) in other.attic_idx_lists {
            self.attic_idx_lists.entry(id).or_default().extend(buckets);
        }
        for (bucket, deltas) in other.attic {
            self.attic.entry(bucket).or_default().extend(deltas);
        }
        for (bucket, records) in other.attic_meta {
            self.attic_meta.entry(bucket).or_default().extend(records);
        }
        for (key, entries) in other.attic_local_tags {
            self.attic_local_tags.entry(key).or_default().extend(entries);
        }
        for (key, entries) in other.attic_global_tags {
            let slot = self.attic_global_tags.entry(key).or_default();
            slot.extend(entries);
            slot.sort();
            slot.dedup();
        }
        for (bucket, entries) in other.undeleted {
            self.undeleted.entry(bucket).or_default().extend(entries);
        }
        for (timestamp, ids) in other.changelog {
            let slot = self.changelog.entry(timestamp).or_default();
            slot.extend(ids);
            slot.sort();
            slot.dedup();
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    sinks: BTreeMap<SinkSuffix, StoreSet>,
}

impl MemoryInner {
    fn main(&mut self) -> &mut StoreSet {
        self.sinks.entry(SinkSuffix::Main).or_default()
    }
}

/// Shared in-memory store stack.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every store under the given sink.
    pub fn snapshot(&self, sink: SinkSuffix) -> StoreSet {
        self.inner
            .lock()
            .sinks
            .get(&sink)
            .cloned()
            .unwrap_or_default()
    }

    /// Install node positions, standing in for the node updater.
    pub fn seed_nodes(&self, positions: impl IntoIterator<Item = (NodeId, Coord)>) {
        self.inner.lock().main().nodes.extend(positions);
    }
}

impl Backend for MemoryBackend {
    fn read_map_positions(&self, ids: &[WayId]) -> Result<Vec<(WayId, Bucket)>> {
        let mut inner = self.inner.lock();
        let positions = &inner.main().map_positions;
        Ok(ids
            .iter()
            .filter_map(|id| positions.get(id).map(|&bucket| (*id, bucket)))
            .collect())
    }

    fn update_map_positions(&mut self, positions: &[(WayId, Bucket)]) -> Result<()> {
        let mut inner = self.inner.lock();
        let main = inner.main();
        for &(id, bucket) in positions {
            if bucket.is_deleted() {
                main.map_positions.remove(&id);
            } else {
                main.map_positions.insert(id, bucket);
            }
        }
        Ok(())
    }

    fn read_current_ways(&self, buckets: &BTreeSet<Bucket>) -> Result<CurrentWays> {
        let mut inner = self.inner.lock();
        let current = &inner.main().current;
        Ok(buckets
            .iter()
            .filter_map(|bucket| {
                current
                    .get(bucket)
                    .map(|ways| (*bucket, ways.clone()))
            })
            .collect())
    }

    fn update_current_ways(
        &mut self,
        to_delete: &CurrentWays,
        to_insert: &CurrentWays,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let current = &mut inner.main().current;
        for (bucket, ways) in to_delete {
            if let Some(stored) = current.get_mut(bucket) {
                for id in ways.keys() {
                    stored.remove(id);
                }
                if stored.is_empty() {
                    current.remove(bucket);
                }
            }
        }
        for (bucket, ways) in to_insert {
            current.entry(*bucket).or_default().extend(ways.clone());
        }
        Ok(())
    }

    fn read_node_positions(&self, ids: &[NodeId]) -> Result<BTreeMap<NodeId, Coord>> {
        let mut inner = self.inner.lock();
        let nodes = &inner.main().nodes;
        Ok(ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|&coord| (*id, coord)))
            .collect())
    }

    fn read_current_meta(&self, positions: &[(WayId, Bucket)]) -> Result<CurrentMeta> {
        let mut inner = self.inner.lock();
        let meta = &inner.main().meta;
        let mut out = CurrentMeta::new();
        for &(id, bucket) in positions {
            if let Some(records) = meta.get(&bucket) {
                for record in records.iter().filter(|r| r.id == id) {
                    out.entry(bucket).or_default().insert(record.clone());
                }
            }
        }
        Ok(out)
    }

    fn update_current_meta(
        &mut self,
        to_delete: &CurrentMeta,
        to_insert: &CurrentMeta,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let meta = &mut inner.main().meta;
        for (bucket, records) in to_delete {
            if let Some(stored) = meta.get_mut(bucket) {
                for record in records {
                    stored.remove(record);
                }
                if stored.is_empty() {
                    meta.remove(bucket);
                }
            }
        }
        for (bucket, records) in to_insert {
            meta.entry(*bucket).or_default().extend(records.clone());
        }
        Ok(())
    }

    fn insert_attic_meta(&mut self, to_insert: &CurrentMeta) -> Result<()> {
        let mut inner = self.inner.lock();
        let attic_meta = &mut inner.main().attic_meta;
        for (bucket, records) in to_insert {
            attic_meta.entry(*bucket).or_default().extend(records.clone());
        }
        Ok(())
    }

    fn read_local_tags(&self, positions: &[(WayId, Bucket)]) -> Result<LocalTags> {
        let mut inner = self.inner.lock();
        let local_tags = &inner.main().local_tags;
        let mut out = LocalTags::new();
        for (key, ids) in local_tags {
            for &(id, bucket) in positions {
                if key.bucket == bucket && ids.contains(&id) {
                    out.entry(key.clone()).or_default().insert(id);
                }
            }
        }
        Ok(out)
    }

    fn update_local_tags(&mut self, to_delete: &LocalTags, to_insert: &LocalTags) -> Result<()> {
        let mut inner = self.inner.lock();
        let local_tags = &mut inner.main().local_tags;
        for (key, ids) in to_delete {
            if let Some(stored) = local_tags.get_mut(key) {
                for id in ids {
                    stored.remove(id);
                }
                if stored.is_empty() {
                    local_tags.remove(key);
                }
            }
        }
        for (key, ids) in to_insert {
            local_tags.entry(key.clone()).or_default().extend(ids);
        }
        Ok(())
    }

    fn update_global_tags(&mut self, to_delete: &GlobalTags, to_insert: &GlobalTags) -> Result<()> {
        let mut inner = self.inner.lock();
        let global_tags = &mut inner.main().global_tags;
        for (key, ids) in to_delete {
            if let Some(stored) = global_tags.get_mut(key) {
                for id in ids {
                    stored.remove(id);
                }
                if stored.is_empty() {
                    global_tags.remove(key);
                }
            }
        }
        for (key, ids) in to_insert {
            global_tags.entry(key.clone()).or_default().extend(ids);
        }
        Ok(())
    }

    fn insert_attic_local_tags(&mut self, to_insert: &AtticLocalTags) -> Result<()> {
        let mut inner = self.inner.lock();
        let attic_local_tags = &mut inner.main().attic_local_tags;
        for (key, entries) in to_insert {
            attic_local_tags
                .entry(key.clone())
                .or_default()
                .extend(entries.clone());
        }
        Ok(())
    }

    fn insert_attic_global_tags(&mut self, to_insert: &AtticGlobalTags) -> Result<()> {
        let mut inner = self.inner.lock();
        let attic_global_tags = &mut inner.main().attic_global_tags;
        for (key, entries) in to_insert {
            let slot = attic_global_tags.entry(key.clone()).or_default();
            slot.extend(entries.clone());
            slot.sort();
            slot.dedup();
        }
        Ok(())
    }

    fn read_attic_map_positions(&self, ids: &[WayId]) -> Result<Vec<(WayId, Bucket)>> {
        let mut inner = self.inner.lock();
        let positions = &inner.main().attic_map_positions;
        Ok(ids
            .iter()
            .filter_map(|id| positions.get(id).map(|&bucket| (*id, bucket)))
            .collect())
    }

    fn update_attic_map_positions(&mut self, positions: &[(WayId, Bucket)]) -> Result<()> {
        let mut inner = self.inner.lock();
        let main = inner.main();
        for &(id, bucket) in positions {
            main.attic_map_positions.insert(id, bucket);
        }
        Ok(())
    }

    fn read_attic_idx_lists(&self, ids: &[WayId]) -> Result<IdxLists> {
        let mut inner = self.inner.lock();
        let lists = &inner.main().attic_idx_lists;
        Ok(ids
            .iter()
            .filter_map(|id| lists.get(id).map(|buckets| (*id, buckets.clone())))
            .collect())
    }

    fn update_attic_idx_lists(&mut self, to_delete: &IdxLists, to_insert: &IdxLists) -> Result<()> {
        let mut inner = self.inner.lock();
        let lists = &mut inner.main().attic_idx_lists;
        for id in to_delete.keys() {
            lists.remove(id);
        }
        for (id, buckets) in to_insert {
            lists.insert(*id, buckets.clone());
        }
        Ok(())
    }

    fn read_newest_attic_deltas(
        &self,
        ids: &[WayId],
    ) -> Result<BTreeMap<WayId, (Bucket, Attic<WayDelta>)>> {
        let mut inner = self.inner.lock();
        let main = inner.main();
        let mut out = BTreeMap::new();
        for &id in ids {
            let buckets: BTreeSet<Bucket> = match main.attic_map_positions.get(&id) {
                Some(&bucket) if bucket.is_unknown() => main
                    .attic_idx_lists
                    .get(&id)
                    .cloned()
                    .unwrap_or_default(),
                Some(&bucket) => [bucket].into_iter().collect(),
                None => continue,
            };
            let mut newest: Option<(Bucket, Attic<WayDelta>)> = None;
            for bucket in buckets {
                for entry in main.attic.get(&bucket).into_iter().flatten() {
                    if entry.elem.id != id {
                        continue;
                    }
                    if newest
                        .as_ref()
                        .is_none_or(|(_, best)| best.timestamp < entry.timestamp)
                    {
                        newest = Some((bucket, entry.clone()));
                    }
                }
            }
            if let Some(found) = newest {
                out.insert(id, found);
            }
        }
        Ok(out)
    }

    fn update_attic_ways(&mut self, to_delete: &AtticWays, to_insert: &AtticWays) -> Result<()> {
        let mut inner = self.inner.lock();
        let attic = &mut inner.main().attic;
        for (bucket, deltas) in to_delete {
            if let Some(stored) = attic.get_mut(bucket) {
                for delta in deltas {
                    stored.remove(delta);
                }
                if stored.is_empty() {
                    attic.remove(bucket);
                }
            }
        }
        for (bucket, deltas) in to_insert {
            attic.entry(*bucket).or_default().extend(deltas.clone());
        }
        Ok(())
    }

    fn insert_undelete_entries(&mut self, to_insert: &UndeleteEntries) -> Result<()> {
        let mut inner = self.inner.lock();
        let undeleted = &mut inner.main().undeleted;
        for (bucket, entries) in to_insert {
            undeleted.entry(*bucket).or_default().extend(entries.clone());
        }
        Ok(())
    }

    fn append_changelog(&mut self, entries: &Changelog) -> Result<()> {
        let mut inner = self.inner.lock();
        let changelog = &mut inner.main().changelog;
        for (timestamp, ids) in entries {
            let slot = changelog.entry(*timestamp).or_default();
            slot.extend(ids);
            slot.sort();
            slot.dedup();
        }
        Ok(())
    }

    fn main_sink_exists(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        Ok(!inner.main().is_empty())
    }

    fn rotate_main_to(&mut self, sink: SinkSuffix) -> Result<()> {
        let mut inner = self.inner.lock();
        let rotated = std::mem::take(inner.main());
        inner.sinks.entry(sink).or_default().merge_from(rotated);
        Ok(())
    }

    fn merge_sinks(&mut self, froms: &[SinkSuffix], into: SinkSuffix) -> Result<()> {
        if froms.len() > MERGE_FAN_IN {
            return Err(WaylineError::MergeFanInExceeded {
                count: froms.len(),
                max: MERGE_FAN_IN,
            });
        }
        let mut inner = self.inner.lock();
        for from in froms {
            let Some(source) = inner.sinks.remove(from) else {
                continue;
            };
            inner.sinks.entry(into).or_default().merge_from(source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_types::WaySkeleton;

    fn skeleton(id: u64, nds: &[u64]) -> WaySkeleton {
        WaySkeleton::new(WayId::new(id), nds.iter().map(|&n| NodeId::new(n)).collect())
    }

    #[test]
    fn current_ways_round_trip() {
        let mut backend = MemoryBackend::new();
        let bucket = Bucket::new(7);
        let mut insert = CurrentWays::new();
        insert
            .entry(bucket)
            .or_default()
            .insert(WayId::new(1), skeleton(1, &[10, 11]));
        backend.update_current_ways(&CurrentWays::new(), &insert).unwrap();

        let read = backend
            .read_current_ways(&[bucket].into_iter().collect())
            .unwrap();
        assert_eq!(read[&bucket].len(), 1);

        backend.update_current_ways(&insert, &CurrentWays::new()).unwrap();
        let read = backend
            .read_current_ways(&[bucket].into_iter().collect())
            .unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn deleted_position_removes_directory_entry() {
        let mut backend = MemoryBackend::new();
        backend
            .update_map_positions(&[(WayId::new(1), Bucket::new(3))])
            .unwrap();
        backend
            .update_map_positions(&[(WayId::new(1), Bucket::DELETED)])
            .unwrap();
        assert!(backend.read_map_positions(&[WayId::new(1)]).unwrap().is_empty());
    }

    #[test]
    fn newest_attic_delta_spans_idx_list_buckets() {
        let mut backend = MemoryBackend::new();
        let id = WayId::new(5);
        let old = Bucket::new(1);
        let new = Bucket::new(2);
        let mut insert = AtticWays::new();
        let mut delta = WayDelta::encode(&WaySkeleton::empty(), &skeleton(5, &[1]));
        insert
            .entry(old)
            .or_default()
            .insert(Attic::new(delta.clone(), wayline_types::Timestamp::new(100)));
        delta.nds_added.push((1, NodeId::new(2)));
        insert
            .entry(new)
            .or_default()
            .insert(Attic::new(delta, wayline_types::Timestamp::new(200)));
        backend.update_attic_ways(&AtticWays::new(), &insert).unwrap();
        backend
            .update_attic_map_positions(&[(id, Bucket::UNKNOWN)])
            .unwrap();
        let mut lists = IdxLists::new();
        lists.insert(id, [old, new].into_iter().collect());
        backend.update_attic_idx_lists(&IdxLists::new(), &lists).unwrap();

        let newest = backend.read_newest_attic_deltas(&[id]).unwrap();
        let (bucket, entry) = &newest[&id];
        assert_eq!(*bucket, new);
        assert_eq!(entry.timestamp, wayline_types::Timestamp::new(200));
    }

    #[test]
    fn rotation_moves_main_aside() {
        let mut backend = MemoryBackend::new();
        backend
            .update_map_positions(&[(WayId::new(1), Bucket::new(3))])
            .unwrap();
        assert!(backend.main_sink_exists().unwrap());

        backend.rotate_main_to(SinkSuffix::Level0(0)).unwrap();
        assert!(!backend.main_sink_exists().unwrap());
        assert_eq!(
            backend.snapshot(SinkSuffix::Level0(0)).map_positions.len(),
            1
        );

        backend
            .merge_sinks(&[SinkSuffix::Level0(0)], SinkSuffix::Main)
            .unwrap();
        assert!(backend.main_sink_exists().unwrap());
        assert!(backend.snapshot(SinkSuffix::Level0(0)).map_positions.is_empty());
    }

    #[test]
    fn merge_respects_fan_in_limit() {
        let mut backend = MemoryBackend::new();
        let froms: Vec<SinkSuffix> = (0..16)
            .map(SinkSuffix::Level0)
            .chain([SinkSuffix::Level2])
            .collect();
        let err = backend.merge_sinks(&froms, SinkSuffix::Main).unwrap_err();
        assert!(matches!(err, WaylineError::MergeFanInExceeded { .. }));
    }
}
