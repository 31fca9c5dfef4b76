//! Spatial bucket helpers: the opaque geometry-packing decisions.
//!
//! The packing function itself is a deployment choice; the engine only needs
//! the three operations below to be deterministic and side-effect-free.

use std::collections::BTreeSet;

use wayline_types::Bucket;

/// Deterministic spatial helpers provided by the storage schema.
pub trait SpatialSchema {
    /// Compress the node cells of a way into its storage bucket.
    ///
    /// An empty cell list (no resolvable node) yields [`Bucket::DELETED`].
    fn calc_bucket(&self, cells: &[u32]) -> Bucket;

    /// Whether ways stored under this bucket carry a materialized coordinate
    /// list. Buckets that aggregate several cells do; single-cell buckets
    /// can recompute geometry from the node store.
    fn indicates_geometry(&self, bucket: Bucket) -> bool;

    /// Lift node cells to the set of way buckets whose members could contain
    /// them, for the implicit-move scan.
    fn calc_parents(&self, cells: &BTreeSet<u32>) -> BTreeSet<Bucket>;
}

/// Bit marking a bucket as a multi-cell span in [`SpanSchema`].
pub const SPAN_BIT: u32 = 0x8000_0000;

/// A coarse two-level schema: ways within a single cell are stored under
/// that cell without geometry; ways spanning cells share one span bucket
/// and materialize their geometry.
///
/// Suitable for tests and small embedded deployments; production schemas
/// plug in their own quadtree packing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanSchema;

impl SpatialSchema for SpanSchema {
    fn calc_bucket(&self, cells: &[u32]) -> Bucket {
        let Some(&first) = cells.first() else {
            return Bucket::DELETED;
        };
        if cells.iter().all(|&c| c == first) {
            Bucket::new(first)
        } else {
            Bucket::new(SPAN_BIT)
        }
    }

    fn indicates_geometry(&self, bucket: Bucket) -> bool {
        bucket.val() & SPAN_BIT != 0
    }

    fn calc_parents(&self, cells: &BTreeSet<u32>) -> BTreeSet<Bucket> {
        let mut parents: BTreeSet<Bucket> = cells.iter().map(|&c| Bucket::new(c)).collect();
        parents.insert(Bucket::new(SPAN_BIT));
        parents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_cell_way_keeps_its_cell() {
        let schema = SpanSchema;
        assert_eq!(schema.calc_bucket(&[5, 5, 5]), Bucket::new(5));
        assert!(!schema.indicates_geometry(Bucket::new(5)));
    }

    #[test]
    fn spanning_way_gets_the_span_bucket() {
        let schema = SpanSchema;
        let bucket = schema.calc_bucket(&[5, 6]);
        assert_eq!(bucket, Bucket::new(SPAN_BIT));
        assert!(schema.indicates_geometry(bucket));
    }

    #[test]
    fn no_cells_means_deleted() {
        assert_eq!(SpanSchema.calc_bucket(&[]), Bucket::DELETED);
    }

    #[test]
    fn parents_cover_cells_and_span() {
        let cells: BTreeSet<u32> = [3, 9].into_iter().collect();
        let parents = SpanSchema.calc_parents(&cells);
        assert!(parents.contains(&Bucket::new(3)));
        assert!(parents.contains(&Bucket::new(9)));
        assert!(parents.contains(&Bucket::new(SPAN_BIT)));
    }
}
