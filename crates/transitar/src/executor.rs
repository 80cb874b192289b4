//! Foreground Execution Context
//!
//! One serialized context owns the interactive surface; checks and triggers
//! declared foreground-affine must run there while the worker context blocks
//! for the result. Checks are dispatched one at a time; parallel foreground
//! dispatch is deliberately not promised.

/// The single serialized context that owns the interactive surface
///
/// `run` must execute the task to completion before returning; the calling
/// worker context blocks on it. There is no mid-flight cancellation: a hung
/// task holds the transition until the worker-side timeout fires.
pub trait ForegroundExecutor {
    /// Run one task on the foreground context, blocking until it returns
    fn run(&self, task: &mut dyn FnMut());
}

/// Runs foreground tasks inline on the calling thread
///
/// The default executor for simulations and unit tests, where the worker
/// thread doubles as the interactive surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineForeground;

impl ForegroundExecutor for InlineForeground {
    fn run(&self, task: &mut dyn FnMut()) {
        task();
    }
}
