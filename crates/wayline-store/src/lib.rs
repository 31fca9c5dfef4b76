//! Store interfaces for the Wayline way update engine.
//!
//! The engine consumes the external collaborators through the [`Backend`]
//! trait: the current store, the id→bucket directory, the attic store stack
//! (deltas, per-id bucket lists, undelete index, changelog), the node store,
//! and the meta/tag stores. [`MemoryBackend`] is a complete in-memory
//! implementation for tests and embedded use; the block-file backend lives
//! with the database distribution.

pub mod memory;
pub mod progress;
pub mod rotation;
pub mod schema;
pub mod traits;

pub use memory::{MemoryBackend, StoreSet};
pub use progress::{NullProgress, ProgressSink};
pub use rotation::{MergeOp, SinkSuffix, final_flush_plan, partial_merge_plan, partial_sink};
pub use schema::{SPAN_BIT, SpanSchema, SpatialSchema};
pub use traits::{
    AtticGlobalTags, AtticLocalTags, AtticWays, Backend, Changelog, CurrentMeta, CurrentWays,
    GlobalTags, IdxLists, LocalTags, UndeleteEntries,
};
