//! Batch accumulation and normalization.
//!
//! A batch is the ordered list of way versions delivered by one diff,
//! together with each version's metadata and tags. Entries arrive in diff
//! order; normalization sorts them by `(id, version, timestamp)` and removes
//! versions the history stores could not represent.

use wayline_types::{Bucket, MetaRecord, Timestamp, WayId, WaySkeleton};

/// One way version in a batch.
///
/// `bucket` starts as [`Bucket::UNKNOWN`] for edits and [`Bucket::DELETED`]
/// for deletions; the geometry pass fills in the computed bucket for the
/// latest version of each id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BatchEntry {
    pub bucket: Bucket,
    pub skeleton: WaySkeleton,
    pub meta: MetaRecord,
    pub tags: Vec<(String, String)>,
}

impl BatchEntry {
    /// The timestamp this version became current.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.meta.timestamp
    }

    #[inline]
    pub fn id(&self) -> WayId {
        self.skeleton.id
    }
}

/// The way versions of one diff, in input order until normalized.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Queue a new or modified way version.
    pub fn push_version(
        &mut self,
        skeleton: WaySkeleton,
        meta: MetaRecord,
        tags: Vec<(String, String)>,
    ) {
        self.entries.push(BatchEntry {
            bucket: Bucket::UNKNOWN,
            skeleton,
            meta,
            tags,
        });
    }

    /// Queue a deletion.
    pub fn push_delete(&mut self, id: WayId, meta: MetaRecord) {
        self.entries.push(BatchEntry {
            bucket: Bucket::DELETED,
            skeleton: WaySkeleton::new(id, Vec::new()),
            meta,
            tags: Vec::new(),
        });
    }

    /// Sort by `(id, version, timestamp)` and drop unusable versions.
    ///
    /// Under attic retention, versions whose timestamp does not advance past
    /// the previous kept version of the same id are dropped: the history
    /// store cannot hold two snapshots at one instant. Without retention,
    /// exact `(id, version)` duplicates collapse, keeping the later input
    /// entry.
    pub fn normalize(&mut self, keep_attic: bool) {
        self.entries.sort_by(|a, b| {
            (a.id(), a.meta.version, a.timestamp()).cmp(&(b.id(), b.meta.version, b.timestamp()))
        });
        if keep_attic {
            self.remove_time_inconsistent_versions();
        } else {
            self.deduplicate();
        }
    }

    fn remove_time_inconsistent_versions(&mut self) {
        let mut last: Option<(WayId, Timestamp)> = None;
        self.entries.retain(|entry| {
            let keep = match last {
                Some((id, timestamp)) if id == entry.id() => timestamp < entry.timestamp(),
                _ => true,
            };
            if keep {
                last = Some((entry.id(), entry.timestamp()));
            }
            keep
        });
    }

    fn deduplicate(&mut self) {
        // The sort is stable, so within an equal (id, version) run the later
        // input entry comes last and wins.
        let mut keep = vec![true; self.entries.len()];
        for i in 0..self.entries.len().saturating_sub(1) {
            let (a, b) = (&self.entries[i], &self.entries[i + 1]);
            if a.id() == b.id() && a.meta.version == b.meta.version {
                keep[i] = false;
            }
        }
        let mut it = keep.iter();
        self.entries.retain(|_| *it.next().unwrap_or(&true));
    }

    /// The distinct ids touched by this batch, sorted.
    pub fn ids(&self) -> Vec<WayId> {
        let mut ids: Vec<WayId> = self.entries.iter().map(BatchEntry::id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether `index` is the last (youngest) entry of its id.
    pub fn is_latest(&self, index: usize) -> bool {
        match self.entries.get(index + 1) {
            Some(next) => next.id() != self.entries[index].id(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayline_types::NodeId;

    fn entry(id: u64, version: u32, timestamp: u64) -> (WaySkeleton, MetaRecord) {
        (
            WaySkeleton::new(WayId::new(id), vec![NodeId::new(1)]),
            MetaRecord::new(WayId::new(id), version, Timestamp::new(timestamp), 0, 0),
        )
    }

    #[test]
    fn normalize_sorts_by_id_and_version() {
        let mut batch = Batch::new();
        let (s, m) = entry(2, 1, 50);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(1, 2, 200);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(1, 1, 100);
        batch.push_version(s, m, Vec::new());
        batch.normalize(true);
        let order: Vec<(u64, u32)> = batch
            .entries
            .iter()
            .map(|e| (e.id().get(), e.meta.version))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn attic_mode_drops_backwards_timestamps() {
        let mut batch = Batch::new();
        let (s, m) = entry(1, 1, 100);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(1, 2, 100);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(1, 3, 300);
        batch.push_version(s, m, Vec::new());
        batch.normalize(true);
        let versions: Vec<u32> = batch.entries.iter().map(|e| e.meta.version).collect();
        assert_eq!(versions, vec![1, 3]);
    }

    #[test]
    fn current_mode_keeps_later_duplicate() {
        let mut batch = Batch::new();
        let (s, m) = entry(1, 1, 100);
        batch.push_version(s, m, Vec::new());
        let (mut s, m) = entry(1, 1, 100);
        s.nds = vec![NodeId::new(7)];
        batch.push_version(s, m, Vec::new());
        batch.normalize(false);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.entries[0].skeleton.nds, vec![NodeId::new(7)]);
    }

    #[test]
    fn latest_detection() {
        let mut batch = Batch::new();
        let (s, m) = entry(1, 1, 100);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(1, 2, 200);
        batch.push_version(s, m, Vec::new());
        let (s, m) = entry(2, 1, 100);
        batch.push_version(s, m, Vec::new());
        batch.normalize(true);
        assert!(!batch.is_latest(0));
        assert!(batch.is_latest(1));
        assert!(batch.is_latest(2));
    }
}
