//! State Registry
//!
//! One registry per test run tracks which major states are currently active
//! and keeps an append-only log of every major state ever entered. Log
//! entries are only ever marked inactive, never removed, so the full journey
//! is reconstructable from the dump.

use crate::result::{TransitarError, TransitarResult};
use crate::state::{ConditionalState, StateScope};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use tracing::debug;

// =============================================================================
// LOG ENTRY
// =============================================================================

/// One entry in the append-only state log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based entry sequence number
    pub sequence: usize,
    /// State name
    pub name: String,
    /// Whether the state is still active
    pub active: bool,
}

// =============================================================================
// STATE REGISTRY
// =============================================================================

/// Tracks the active major states and the state journey of one test run
///
/// Dependency-injected rather than global: the caller owns one registry per
/// run and passes it to [`crate::transition::Transition::run`].
#[derive(Debug, Default)]
pub struct StateRegistry {
    active: Vec<Rc<ConditionalState>>,
    log: Vec<LogEntry>,
    current_test_case: Option<String>,
}

impl StateRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the test case this run belongs to, used in diagnostics
    pub fn set_current_test_case(&mut self, name: impl Into<String>) {
        self.current_test_case = Some(name.into());
    }

    /// Get the recorded test case, if any
    #[must_use]
    pub fn current_test_case(&self) -> Option<&str> {
        self.current_test_case.as_deref()
    }

    /// Iterate the currently active major states
    pub fn active_states(&self) -> impl Iterator<Item = &Rc<ConditionalState>> {
        self.active.iter()
    }

    /// Check whether a major state with this name is currently active
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.active.iter().any(|state| state.name() == name)
    }

    /// Get the append-only state log
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Record a completed transition
    ///
    /// Exited major states are deactivated (their log entries marked, never
    /// removed); entered major states are activated and appended to the log.
    /// Minor states are not tracked.
    ///
    /// # Errors
    ///
    /// Returns `RegistryAssertion` when an exited major state was never
    /// active in this registry.
    pub fn transition_completed(
        &mut self,
        exited: &[Rc<ConditionalState>],
        entered: &[Rc<ConditionalState>],
    ) -> TransitarResult<()> {
        for state in exited {
            if state.scope() != StateScope::Major {
                continue;
            }
            let Some(index) = self
                .active
                .iter()
                .position(|active| Rc::ptr_eq(active, state))
            else {
                return Err(TransitarError::RegistryAssertion {
                    message: format!(
                        "exited state '{}' is not active in the registry",
                        state.name()
                    ),
                });
            };
            self.active.remove(index);
            if let Some(entry) = self
                .log
                .iter_mut()
                .rev()
                .find(|entry| entry.active && entry.name == state.name())
            {
                entry.active = false;
            }
            debug!(state = state.name(), "major state deactivated");
        }
        for state in entered {
            if state.scope() != StateScope::Major {
                continue;
            }
            self.active.push(Rc::clone(state));
            self.log.push(LogEntry {
                sequence: self.log.len() + 1,
                name: state.name().to_string(),
                active: true,
            });
            debug!(state = state.name(), "major state activated");
        }
        Ok(())
    }

    /// Assert that a major state with this name is active
    ///
    /// # Errors
    ///
    /// Returns `RegistryAssertion` naming the state and the current log.
    pub fn assert_active(&self, name: &str) -> TransitarResult<()> {
        if self.is_active(name) {
            Ok(())
        } else {
            Err(TransitarError::RegistryAssertion {
                message: format!("expected '{name}' to be active\n{}", self.format_log()),
            })
        }
    }

    /// Assert that no major state with this name is active
    ///
    /// # Errors
    ///
    /// Returns `RegistryAssertion` naming the state and the current log.
    pub fn assert_inactive(&self, name: &str) -> TransitarResult<()> {
        if self.is_active(name) {
            Err(TransitarError::RegistryAssertion {
                message: format!("expected '{name}' to be inactive\n{}", self.format_log()),
            })
        } else {
            Ok(())
        }
    }

    /// Dump the state journey for diagnostics
    #[must_use]
    pub fn format_log(&self) -> String {
        let mut out = match &self.current_test_case {
            Some(name) => format!("State log for '{name}':\n"),
            None => String::from("State log:\n"),
        };
        if self.log.is_empty() {
            out.push_str("    (no states entered)");
            return out;
        }
        for entry in &self.log {
            let marker = if entry.active { "[ACTIVE]  " } else { "[finished]" };
            out.push_str(&format!("{:>5} {marker} {}\n", entry.sequence, entry.name));
        }
        out.trim_end_matches('\n').to_string()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn major(name: &str) -> Rc<ConditionalState> {
        ConditionalState::builder(name).build()
    }

    fn minor(name: &str) -> Rc<ConditionalState> {
        ConditionalState::builder(name).minor().build()
    }

    mod activity_tests {
        use super::*;

        #[test]
        fn test_enter_and_exit_track_activity() {
            let mut registry = StateRegistry::new();
            let home = major("home");
            let settings = major("settings");

            registry.transition_completed(&[], &[Rc::clone(&home)]).unwrap();
            assert!(registry.is_active("home"));
            registry.assert_active("home").unwrap();

            registry
                .transition_completed(&[Rc::clone(&home)], &[Rc::clone(&settings)])
                .unwrap();
            assert!(!registry.is_active("home"));
            assert!(registry.is_active("settings"));
            registry.assert_inactive("home").unwrap();
        }

        #[test]
        fn test_minor_states_are_not_tracked() {
            let mut registry = StateRegistry::new();
            let panel = minor("panel");
            registry.transition_completed(&[], &[panel]).unwrap();
            assert!(registry.log().is_empty());
            assert!(!registry.is_active("panel"));
        }

        #[test]
        fn test_exiting_unknown_state_is_rejected() {
            let mut registry = StateRegistry::new();
            let stray = major("stray");
            let err = registry
                .transition_completed(&[stray], &[])
                .unwrap_err();
            assert!(matches!(err, TransitarError::RegistryAssertion { .. }));
        }

        #[test]
        fn test_distinct_instances_with_same_name() {
            // Two runs through the same screen are two registry entries.
            let mut registry = StateRegistry::new();
            let first = major("home");
            let second = major("home");
            registry.transition_completed(&[], &[Rc::clone(&first)]).unwrap();
            registry
                .transition_completed(&[Rc::clone(&first)], &[Rc::clone(&second)])
                .unwrap();
            assert!(registry.is_active("home"));
            assert_eq!(registry.log().len(), 2);
            assert!(!registry.log()[0].active);
            assert!(registry.log()[1].active);
        }
    }

    mod log_tests {
        use super::*;

        #[test]
        fn test_log_is_append_only() {
            let mut registry = StateRegistry::new();
            let home = major("home");
            let settings = major("settings");
            registry.transition_completed(&[], &[Rc::clone(&home)]).unwrap();
            registry
                .transition_completed(&[Rc::clone(&home)], &[settings])
                .unwrap();

            let log = registry.log();
            assert_eq!(log.len(), 2);
            assert_eq!(log[0].sequence, 1);
            assert_eq!(log[0].name, "home");
            assert!(!log[0].active);
            assert_eq!(log[1].sequence, 2);
            assert_eq!(log[1].name, "settings");
            assert!(log[1].active);
        }

        #[test]
        fn test_format_log() {
            let mut registry = StateRegistry::new();
            registry.set_current_test_case("checkout_flow");
            let home = major("home");
            let cart = major("cart");
            registry.transition_completed(&[], &[Rc::clone(&home)]).unwrap();
            registry
                .transition_completed(&[Rc::clone(&home)], &[cart])
                .unwrap();

            let dump = registry.format_log();
            assert!(dump.starts_with("State log for 'checkout_flow':"));
            assert!(dump.contains("[finished] home"));
            assert!(dump.contains("[ACTIVE]   cart"));
        }

        #[test]
        fn test_format_log_empty() {
            let registry = StateRegistry::new();
            assert!(registry.format_log().contains("(no states entered)"));
        }
    }

    mod assertion_tests {
        use super::*;

        #[test]
        fn test_assert_active_failure_includes_log() {
            let mut registry = StateRegistry::new();
            let home = major("home");
            registry.transition_completed(&[], &[home]).unwrap();

            let err = registry.assert_active("settings").unwrap_err();
            let text = err.to_string();
            assert!(text.contains("expected 'settings' to be active"));
            assert!(text.contains("home"));
        }

        #[test]
        fn test_assert_inactive_failure() {
            let mut registry = StateRegistry::new();
            let home = major("home");
            registry.transition_completed(&[], &[home]).unwrap();
            assert!(registry.assert_inactive("home").is_err());
        }

        #[test]
        fn test_current_test_case() {
            let mut registry = StateRegistry::new();
            assert!(registry.current_test_case().is_none());
            registry.set_current_test_case("login_flow");
            assert_eq!(registry.current_test_case(), Some("login_flow"));
        }
    }
}
