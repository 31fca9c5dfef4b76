//! Public API facade for Wayline.
//!
//! Re-exports the surface an embedding application needs: the core types,
//! the store interfaces with the in-memory backend, and the way update
//! engine.

pub use wayline_error::{Result, WaylineError};
pub use wayline_store::{
    AtticGlobalTags, AtticLocalTags, AtticWays, Backend, Changelog, CurrentMeta, CurrentWays,
    GlobalTags, IdxLists, LocalTags, MemoryBackend, NullProgress, ProgressSink, SinkSuffix,
    SpanSchema, SpatialSchema, StoreSet, UndeleteEntries,
};
pub use wayline_types::{
    Attic, Bucket, Coord, MetaRecord, NodeId, NodeSnapshot, TagIndexGlobal, TagIndexLocal,
    Timestamp, WayDelta, WayId, WaySkeleton,
};
pub use wayline_updater::{
    AtticNodesByCell, MetaMode, NodesByCell, UpdaterConfig, WayUpdater,
};
