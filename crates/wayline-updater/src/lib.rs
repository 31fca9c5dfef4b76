//! The Wayline way update engine.
//!
//! Ingests a batch of way versions together with the node changes of the
//! same diff and updates the coupled stores: current skeletons, the attic
//! version history (delta-encoded snapshots, per-id bucket lists, undelete
//! index, changelog), and the meta/tag indexes.
//!
//! The hard core is the attic reconstruction: a way's history is not just
//! its explicit versions. Every node move inside an edit window creates an
//! intermediate version that must be delta-encoded against its successor,
//! placed in the right spatial bucket, and made findable across bucket
//! migrations.

pub mod attic;
pub mod batch;
pub mod changelog;
pub mod current;
pub mod geometry;
pub mod implicit;
pub mod meta;
pub mod resolver;
pub mod tags;
pub mod updater;

pub use attic::{AtticEmit, adapt_newest_existing_attic, compute_new_attic_skeletons};
pub use batch::{Batch, BatchEntry};
pub use changelog::compute_changelog;
pub use current::CurrentDiff;
pub use geometry::{compute_bucket_and_geometry, geometrically_equal};
pub use implicit::implicitly_moved_skeletons;
pub use resolver::{AtticNodesByCell, NodeResolver, NodeTimelines, NodesByCell};
pub use updater::{MetaMode, UpdaterConfig, WayUpdater};
