//! Conditional States and the 5-Phase Lifecycle
//!
//! A `ConditionalState` is an entity whose activity is defined by its
//! elements' conditions. Phases move strictly linearly:
//! New -> TransitioningTo -> Active -> TransitioningFrom -> Finished, with no
//! cycles and no skipping. Elements are declared lazily, exactly once, on
//! first access.
//!
//! ## Toyota Way Application
//!
//! - **Poka-Yoke**: phase-guarded setters reject out-of-order lifecycle moves
//! - **Jidoka**: `verify_active_conditions` spot-checks an Active state's
//!   invariants on demand

use crate::condition::{ConditionWithResult, SharedCondition};
use crate::element::{Element, Elements};
use crate::result::{TransitarError, TransitarResult};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

// =============================================================================
// PHASE
// =============================================================================

/// Lifecycle phase of a conditional state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Constructed, not yet part of any transition
    New,
    /// Destination of an in-flight transition
    TransitioningTo,
    /// All enter conditions fulfilled
    Active,
    /// Origin of an in-flight transition
    TransitioningFrom,
    /// Exited; terminal
    Finished,
}

impl Phase {
    /// Get the phase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::TransitioningTo => "TransitioningTo",
            Self::Active => "Active",
            Self::TransitioningFrom => "TransitioningFrom",
            Self::Finished => "Finished",
        }
    }

    /// Check whether an element owned by a state in this phase may expose
    /// its value
    #[must_use]
    pub const fn allows_element_value(&self) -> bool {
        matches!(
            self,
            Self::TransitioningTo | Self::Active | Self::TransitioningFrom
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// Whether a state is registry-tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StateScope {
    /// A top-level state ("screen"); tracked by the registry
    #[default]
    Major,
    /// A scoped state ("panel", "popup") living inside a major one
    Minor,
}

// =============================================================================
// CONDITIONAL STATE
// =============================================================================

type Hook = Box<dyn FnMut()>;

#[derive(Default)]
struct StateHooks {
    on_transition_to_started: Option<Hook>,
    on_transition_to_finished: Option<Hook>,
    on_transition_from_started: Option<Hook>,
    on_transition_from_finished: Option<Hook>,
}

/// An entity with a 5-phase lifecycle whose activity is defined by its
/// elements' conditions
///
/// Used through `Rc<ConditionalState>`: transitions, elements, and the
/// registry all share the instance.
pub struct ConditionalState {
    name: String,
    scope: StateScope,
    phase: Rc<Cell<Phase>>,
    declaration: RefCell<Option<Box<dyn FnOnce(&mut Elements)>>>,
    elements: RefCell<Elements>,
    declared: Cell<bool>,
    hooks: RefCell<StateHooks>,
}

impl std::fmt::Debug for ConditionalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalState")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("phase", &self.phase.get())
            .field("declared", &self.declared.get())
            .finish_non_exhaustive()
    }
}

impl ConditionalState {
    /// Start building a state
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ConditionalStateBuilder {
        ConditionalStateBuilder::new(name)
    }

    /// Create a minor state carrying exactly one value-producing element
    ///
    /// Covers the small unscoped value-carrying state: entering it waits for
    /// the condition, and the returned element exposes the produced value
    /// while the state is live.
    pub fn value_state<T: 'static>(
        name: impl Into<String>,
        enter: impl ConditionWithResult<Value = T> + 'static,
    ) -> (Rc<Self>, Element<T>) {
        let name = name.into();
        let element = Element::new(format!("{name}.value"), enter);
        let declared = element.clone();
        let state = Self::builder(name)
            .minor()
            .declare(move |els| els.declare_element(&declared))
            .build();
        (state, element)
    }

    /// Get the state name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the state scope
    #[must_use]
    pub fn scope(&self) -> StateScope {
        self.scope
    }

    /// Get the current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Check whether the state is Active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase.get() == Phase::Active
    }

    /// Get the declared elements, running the declaration hook on first
    /// access and sealing the set
    pub fn elements(&self) -> TransitarResult<Ref<'_, Elements>> {
        self.ensure_declared()?;
        Ok(self.elements.borrow())
    }

    fn ensure_declared(&self) -> TransitarResult<()> {
        if self.declared.get() {
            return Ok(());
        }
        self.declared.set(true);
        let declaration = self.declaration.borrow_mut().take();
        let mut declared = Elements::new();
        if let Some(declare) = declaration {
            declare(&mut declared);
        }
        self.adopt(declared)
    }

    /// Bind and absorb additional declarations (initial or factory-produced)
    pub(crate) fn adopt(&self, new: Elements) -> TransitarResult<()> {
        for handle in new.element_handles() {
            handle.bind(Rc::clone(&self.phase))?;
        }
        self.elements.borrow_mut().merge(new);
        Ok(())
    }

    /// Move New -> TransitioningTo and fire `on_transition_to_started`
    pub fn begin_transition_to(&self) -> TransitarResult<()> {
        self.advance(Phase::New, Phase::TransitioningTo)?;
        self.fire(|hooks| &mut hooks.on_transition_to_started);
        Ok(())
    }

    /// Move TransitioningTo -> Active and fire `on_transition_to_finished`
    pub fn finish_transition_to(&self) -> TransitarResult<()> {
        self.advance(Phase::TransitioningTo, Phase::Active)?;
        self.fire(|hooks| &mut hooks.on_transition_to_finished);
        Ok(())
    }

    /// Move Active -> TransitioningFrom and fire `on_transition_from_started`
    pub fn begin_transition_from(&self) -> TransitarResult<()> {
        self.advance(Phase::Active, Phase::TransitioningFrom)?;
        self.fire(|hooks| &mut hooks.on_transition_from_started);
        Ok(())
    }

    /// Move TransitioningFrom -> Finished and fire
    /// `on_transition_from_finished`
    pub fn finish_transition_from(&self) -> TransitarResult<()> {
        self.advance(Phase::TransitioningFrom, Phase::Finished)?;
        self.fire(|hooks| &mut hooks.on_transition_from_finished);
        Ok(())
    }

    fn advance(&self, from: Phase, to: Phase) -> TransitarResult<()> {
        let actual = self.phase.get();
        if actual != from {
            return Err(TransitarError::PhaseViolation {
                state: self.name.clone(),
                from: from.to_string(),
                to: to.to_string(),
                actual: actual.to_string(),
            });
        }
        self.phase.set(to);
        Ok(())
    }

    fn fire(&self, select: impl FnOnce(&mut StateHooks) -> &mut Option<Hook>) {
        let mut hooks = self.hooks.borrow_mut();
        if let Some(hook) = select(&mut hooks).as_mut() {
            hook();
        }
    }

    /// Re-poll every registered enter condition of an Active state
    ///
    /// # Errors
    ///
    /// Returns `StateCheckFailed` naming the first condition that no longer
    /// holds; `PhaseViolation` when the state is not Active.
    pub fn verify_active_conditions(&self) -> TransitarResult<()> {
        let actual = self.phase.get();
        if actual != Phase::Active {
            return Err(TransitarError::PhaseViolation {
                state: self.name.clone(),
                from: Phase::Active.to_string(),
                to: Phase::Active.to_string(),
                actual: actual.to_string(),
            });
        }
        let elements = self.elements()?;
        let enter_conditions: Vec<SharedCondition> = elements
            .element_handles()
            .iter()
            .map(|handle| Rc::clone(handle.enter_condition()))
            .chain(elements.enter_conditions().iter().map(Rc::clone))
            .collect();
        drop(elements);

        for condition in enter_conditions {
            let status = condition.poll();
            if !status.is_fulfilled() {
                return Err(TransitarError::StateCheckFailed {
                    state: self.name.clone(),
                    description: condition.description(),
                    status: status.to_string(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder for [`ConditionalState`]
pub struct ConditionalStateBuilder {
    name: String,
    scope: StateScope,
    declaration: Option<Box<dyn FnOnce(&mut Elements)>>,
    hooks: StateHooks,
}

impl std::fmt::Debug for ConditionalStateBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalStateBuilder")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ConditionalStateBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: StateScope::Major,
            declaration: None,
            hooks: StateHooks::default(),
        }
    }

    /// Mark the state as minor (scoped)
    #[must_use]
    pub fn minor(mut self) -> Self {
        self.scope = StateScope::Minor;
        self
    }

    /// Mark the state as major (registry-tracked); the default
    #[must_use]
    pub fn major(mut self) -> Self {
        self.scope = StateScope::Major;
        self
    }

    /// Supply the element declaration hook, invoked lazily exactly once
    #[must_use]
    pub fn declare(mut self, declaration: impl FnOnce(&mut Elements) + 'static) -> Self {
        self.declaration = Some(Box::new(declaration));
        self
    }

    /// Run a callback when the state becomes a transition destination
    #[must_use]
    pub fn on_transition_to_started(mut self, hook: impl FnMut() + 'static) -> Self {
        self.hooks.on_transition_to_started = Some(Box::new(hook));
        self
    }

    /// Run a callback when the state becomes Active
    #[must_use]
    pub fn on_transition_to_finished(mut self, hook: impl FnMut() + 'static) -> Self {
        self.hooks.on_transition_to_finished = Some(Box::new(hook));
        self
    }

    /// Run a callback when the state becomes a transition origin
    #[must_use]
    pub fn on_transition_from_started(mut self, hook: impl FnMut() + 'static) -> Self {
        self.hooks.on_transition_from_started = Some(Box::new(hook));
        self
    }

    /// Run a callback when the state becomes Finished
    #[must_use]
    pub fn on_transition_from_finished(mut self, hook: impl FnMut() + 'static) -> Self {
        self.hooks.on_transition_from_finished = Some(Box::new(hook));
        self
    }

    /// Build the state
    #[must_use]
    pub fn build(self) -> Rc<ConditionalState> {
        Rc::new(ConditionalState {
            name: self.name,
            scope: self.scope,
            phase: Rc::new(Cell::new(Phase::New)),
            declaration: RefCell::new(self.declaration),
            elements: RefCell::new(Elements::new()),
            declared: Cell::new(false),
            hooks: RefCell::new(self.hooks),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::condition::{fn_condition, FnCondition, FnConditionWithResult};
    use crate::status::Status;

    fn walk_to_active(state: &ConditionalState) {
        state.begin_transition_to().unwrap();
        state.finish_transition_to().unwrap();
    }

    mod phase_tests {
        use super::*;

        #[test]
        fn test_as_str() {
            assert_eq!(Phase::New.as_str(), "New");
            assert_eq!(Phase::TransitioningTo.as_str(), "TransitioningTo");
            assert_eq!(Phase::Active.as_str(), "Active");
            assert_eq!(Phase::TransitioningFrom.as_str(), "TransitioningFrom");
            assert_eq!(Phase::Finished.as_str(), "Finished");
        }

        #[test]
        fn test_allows_element_value() {
            assert!(!Phase::New.allows_element_value());
            assert!(Phase::TransitioningTo.allows_element_value());
            assert!(Phase::Active.allows_element_value());
            assert!(Phase::TransitioningFrom.allows_element_value());
            assert!(!Phase::Finished.allows_element_value());
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn test_linear_walk() {
            let state = ConditionalState::builder("home").build();
            assert_eq!(state.phase(), Phase::New);
            state.begin_transition_to().unwrap();
            assert_eq!(state.phase(), Phase::TransitioningTo);
            state.finish_transition_to().unwrap();
            assert!(state.is_active());
            state.begin_transition_from().unwrap();
            assert_eq!(state.phase(), Phase::TransitioningFrom);
            state.finish_transition_from().unwrap();
            assert_eq!(state.phase(), Phase::Finished);
        }

        #[test]
        fn test_skipping_is_rejected() {
            let state = ConditionalState::builder("home").build();
            let err = state.finish_transition_to().unwrap_err();
            assert!(matches!(err, TransitarError::PhaseViolation { .. }));
            assert_eq!(state.phase(), Phase::New);
        }

        #[test]
        fn test_no_cycles() {
            let state = ConditionalState::builder("home").build();
            walk_to_active(&state);
            assert!(state.begin_transition_to().is_err());
        }

        #[test]
        fn test_hooks_fire_in_order() {
            let log = Rc::new(RefCell::new(Vec::new()));
            let push = |log: &Rc<RefCell<Vec<&'static str>>>, entry: &'static str| {
                let log = Rc::clone(log);
                move || log.borrow_mut().push(entry)
            };
            let state = ConditionalState::builder("home")
                .on_transition_to_started(push(&log, "to_started"))
                .on_transition_to_finished(push(&log, "to_finished"))
                .on_transition_from_started(push(&log, "from_started"))
                .on_transition_from_finished(push(&log, "from_finished"))
                .build();

            walk_to_active(&state);
            state.begin_transition_from().unwrap();
            state.finish_transition_from().unwrap();
            assert_eq!(
                *log.borrow(),
                vec!["to_started", "to_finished", "from_started", "from_finished"]
            );
        }
    }

    mod declaration_tests {
        use super::*;
        use std::cell::Cell;

        #[test]
        fn test_declaration_runs_lazily_once() {
            let runs = Rc::new(Cell::new(0));
            let counter = Rc::clone(&runs);
            let state = ConditionalState::builder("home")
                .declare(move |els| {
                    counter.set(counter.get() + 1);
                    els.declare_enter_condition(fn_condition("ready", || Status::fulfilled()));
                })
                .build();

            assert_eq!(runs.get(), 0);
            assert_eq!(state.elements().unwrap().enter_conditions().len(), 1);
            assert_eq!(state.elements().unwrap().enter_conditions().len(), 1);
            assert_eq!(runs.get(), 1);
        }

        #[test]
        fn test_declared_elements_are_bound() {
            let element = Element::new(
                "button",
                FnConditionWithResult::new("button present", || (Status::fulfilled(), Some(1u32))),
            );
            let declared = element.clone();
            let state = ConditionalState::builder("home")
                .declare(move |els| els.declare_element(&declared))
                .build();

            let _ = state.elements().unwrap();
            assert!(element.handle().is_bound());
        }

        #[test]
        fn test_no_declaration_hook_yields_empty_set() {
            let state = ConditionalState::builder("home").build();
            assert!(state.elements().unwrap().is_empty());
        }
    }

    mod verify_tests {
        use super::*;
        use std::cell::Cell;

        #[test]
        fn test_requires_active_phase() {
            let state = ConditionalState::builder("home").build();
            assert!(state.verify_active_conditions().is_err());
        }

        #[test]
        fn test_passes_while_conditions_hold() {
            let state = ConditionalState::builder("home")
                .declare(|els| {
                    els.declare_enter_condition(fn_condition("ready", || Status::fulfilled()));
                })
                .build();
            walk_to_active(&state);
            assert!(state.verify_active_conditions().is_ok());
        }

        #[test]
        fn test_reports_first_broken_condition() {
            let holds = Rc::new(Cell::new(true));
            let flag = Rc::clone(&holds);
            let state = ConditionalState::builder("home")
                .declare(move |els| {
                    els.declare_enter_condition(
                        FnCondition::new("banner visible", move || {
                            if flag.get() {
                                Status::fulfilled()
                            } else {
                                Status::not_fulfilled()
                            }
                        })
                        .share(),
                    );
                })
                .build();
            walk_to_active(&state);
            assert!(state.verify_active_conditions().is_ok());

            holds.set(false);
            let err = state.verify_active_conditions().unwrap_err();
            assert!(err.to_string().contains("banner visible"));
        }
    }

    mod value_state_tests {
        use super::*;

        #[test]
        fn test_value_state_wraps_one_element() {
            let (state, element) = ConditionalState::value_state(
                "snackbar",
                FnConditionWithResult::new("snackbar text", || {
                    (Status::fulfilled(), Some("saved".to_string()))
                }),
            );
            assert_eq!(state.scope(), StateScope::Minor);
            assert_eq!(state.elements().unwrap().element_handles().len(), 1);
            assert_eq!(element.id(), "snackbar.value");

            walk_to_active(&state);
            assert!(element.enter_condition().poll().is_fulfilled());
            assert_eq!(element.value().unwrap(), "saved");
        }
    }
}
