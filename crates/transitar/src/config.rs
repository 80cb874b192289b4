//! Process-Wide Debug Settings
//!
//! A small mutable surface for interactive debugging of failing transitions:
//! an optional pause before the failure propagates (keeps the app on screen
//! for inspection) and an optional hook invoked with the failure. Settings
//! are process-wide and must be reset between runs that need isolation.

use crate::result::TransitarError;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

type FailureHook = Box<dyn Fn(&TransitarError) + Send>;

#[derive(Default)]
struct DebugSettings {
    failure_pause: Option<Duration>,
    on_failure: Option<FailureHook>,
}

static SETTINGS: Mutex<DebugSettings> = Mutex::new(DebugSettings {
    failure_pause: None,
    on_failure: None,
});

fn settings() -> std::sync::MutexGuard<'static, DebugSettings> {
    SETTINGS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pause for this long before a final transition failure propagates
pub fn set_failure_pause(pause: Duration) {
    settings().failure_pause = Some(pause);
}

/// Run a hook with every final transition failure
pub fn set_on_transition_failure(hook: impl Fn(&TransitarError) + Send + 'static) {
    settings().on_failure = Some(Box::new(hook));
}

/// Restore the default settings: no pause, no hook
pub fn reset() {
    let mut guard = settings();
    guard.failure_pause = None;
    guard.on_failure = None;
}

/// Consulted by `Transition::run` when its last try fails
pub(crate) fn notify_transition_failure(failure: &TransitarError) {
    let pause = {
        let guard = settings();
        if let Some(hook) = guard.on_failure.as_ref() {
            hook(failure);
        }
        guard.failure_pause
    };
    if let Some(pause) = pause {
        warn!(?pause, "pausing after transition failure");
        std::thread::sleep(pause);
    }
}

/// Install the diagnostics logging subscriber, once per process
///
/// Filter via `RUST_LOG` as usual; a second call (or a subscriber installed
/// by the host) is a no-op.
pub fn init_diagnostics_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn failure() -> TransitarError {
        TransitarError::TriggerFailed {
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_hook_and_pause_lifecycle() {
        // Process-wide state: exercise the whole lifecycle in one test to
        // avoid cross-test interference.
        reset();
        notify_transition_failure(&failure());

        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        set_on_transition_failure(move |failure| {
            // Other tests may fail transitions while this hook is installed;
            // only count the failure this test produces.
            let is_ours = matches!(
                failure,
                TransitarError::TriggerFailed { message } if message == "test"
            );
            if is_ours {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        set_failure_pause(Duration::from_millis(1));
        notify_transition_failure(&failure());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        reset();
        notify_transition_failure(&failure());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_logging_init_is_idempotent() {
        init_diagnostics_logging();
        init_diagnostics_logging();
    }
}
