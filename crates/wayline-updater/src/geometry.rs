//! Bucket and geometry computation for one way at one instant.

use tracing::warn;
use wayline_store::SpatialSchema;
use wayline_types::{Bucket, Coord, Timestamp, WaySkeleton};

use crate::resolver::NodeResolver;

/// Whether two skeletons describe the same node sequence.
///
/// Geometry materialization is derived state and does not participate.
#[inline]
pub fn geometrically_equal(a: &WaySkeleton, b: &WaySkeleton) -> bool {
    a.nds == b.nds
}

/// Compute the way's bucket and materialized geometry as of `asof`.
///
/// Pure with respect to the resolver: nodes missing from it degrade the
/// result (the coordinate is omitted) and produce a diagnostic naming both
/// ids. A node whose timeline ends before `asof` is skipped silently; the
/// node updater has already complained about it.
pub fn compute_bucket_and_geometry<S: SpatialSchema>(
    schema: &S,
    skeleton: &WaySkeleton,
    asof: Timestamp,
    resolver: &NodeResolver,
) -> (Bucket, WaySkeleton) {
    let mut geometry: Vec<Coord> = Vec::with_capacity(skeleton.nds.len());
    for &nd in &skeleton.nds {
        if !resolver.knows(nd) {
            warn!(node = nd.get(), way = skeleton.id.get(), "node used in way not found");
            continue;
        }
        if let Some(coord) = resolver.position_at(nd, asof) {
            geometry.push(coord);
        }
    }

    let cells: Vec<u32> = geometry.iter().map(|c| c.cell).collect();
    let bucket = schema.calc_bucket(&cells);

    let mut updated = skeleton.clone();
    if schema.indicates_geometry(bucket) {
        updated.geometry = geometry;
    } else {
        updated.geometry.clear();
    }
    (bucket, updated)
}
