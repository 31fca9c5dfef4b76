//! Lifecycle hooks invoked by the batch driver at fixed points.

/// Observer of the driver's update phases.
///
/// Hooks fire strictly in commit order; the meta/id/coords hooks fire twice
/// per batch under attic retention, once for the current pass and once for
/// the attic pass. All methods default to no-ops.
pub trait ProgressSink {
    fn compute_started(&mut self) {}
    fn compute_finished(&mut self) {}
    fn update_started(&mut self) {}
    fn prepare_delete_tags_finished(&mut self) {}
    fn update_ids_finished(&mut self) {}
    fn update_coords_finished(&mut self) {}
    fn meta_finished(&mut self) {}
    fn tags_local_finished(&mut self) {}
    fn tags_global_finished(&mut self) {}
    fn current_update_finished(&mut self) {}
    fn compute_attic_started(&mut self) {}
    fn compute_attic_finished(&mut self) {}
    fn attic_update_started(&mut self) {}
    fn undeleted_finished(&mut self) {}
    fn changelog_finished(&mut self) {}
    fn update_finished(&mut self) {}
    fn partial_started(&mut self) {}
    fn partial_finished(&mut self) {}
}

/// A progress sink that ignores every hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}
