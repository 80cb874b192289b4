//! Transitions
//!
//! A `Transition` orchestrates moving the app from one set of conditional
//! states to another: mark lifecycle phases, pre-check, fire the trigger,
//! wait for the combined enter/exit condition set, then activate and record.
//! Each instance is single-use; retries re-fire the trigger with a fresh
//! wait, bounded by `max_tries`.
//!
//! ## Toyota Way Application
//!
//! - **Poka-Yoke**: configuration errors (no-op transitions, redundant
//!   triggers, reused instances) fail fast and are never retried
//! - **Jidoka**: the final failure carries the full per-wait diagnostic table

use crate::condition::{panic_message, SharedCondition};
use crate::config;
use crate::executor::ForegroundExecutor;
use crate::registry::StateRegistry;
use crate::report::TransitionReport;
use crate::result::{TransitarError, TransitarResult};
use crate::state::{ConditionalState, Phase};
use crate::waiter::{ConditionWaiter, WaitOutcome, WaiterOptions};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

// =============================================================================
// TRIGGER
// =============================================================================

/// The action that stimulates a transition
pub enum Trigger {
    /// No stimulus; the conditions are expected to fulfill on their own
    None,
    /// An action to run once per try, before polling starts
    Action(Box<dyn FnMut() -> TransitarResult<()>>),
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("Trigger::None"),
            Self::Action(_) => f.write_str("Trigger::Action"),
        }
    }
}

impl Trigger {
    /// Create a trigger from a fallible action
    pub fn run(action: impl FnMut() -> TransitarResult<()> + 'static) -> Self {
        Self::Action(Box::new(action))
    }

    /// Check whether this is the "just wait" sentinel
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Fire the trigger, marshalling to the foreground executor on request
    ///
    /// Panics inside the action and errors it returns both become
    /// `TriggerFailed`; the attempt is aborted but still consumes a try.
    fn fire(
        &mut self,
        on_foreground: bool,
        foreground: &dyn ForegroundExecutor,
    ) -> TransitarResult<()> {
        let Self::Action(action) = self else {
            return Ok(());
        };
        if on_foreground {
            let mut result = Ok(());
            foreground.run(&mut || result = invoke_trigger(&mut **action));
            result
        } else {
            invoke_trigger(&mut **action)
        }
    }
}

fn invoke_trigger(action: &mut dyn FnMut() -> TransitarResult<()>) -> TransitarResult<()> {
    match catch_unwind(AssertUnwindSafe(|| action())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err @ TransitarError::TriggerFailed { .. })) => Err(err),
        Ok(Err(other)) => Err(TransitarError::TriggerFailed {
            message: other.to_string(),
        }),
        Err(payload) => Err(TransitarError::TriggerFailed {
            message: format!("trigger panicked: {}", panic_message(payload.as_ref())),
        }),
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Per-transition configuration
#[derive(Debug)]
pub struct TransitionOptions {
    /// Timing of the wait loop
    pub waiter: WaiterOptions,
    /// Total number of tries, trigger included; minimum 1
    pub max_tries: usize,
    /// Run the trigger on the foreground executor instead of the worker
    pub run_trigger_on_foreground: bool,
    /// Acknowledge that every condition may already hold before the trigger
    pub possibly_already_fulfilled: bool,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self {
            waiter: WaiterOptions::default(),
            max_tries: 1,
            run_trigger_on_foreground: false,
            possibly_already_fulfilled: false,
        }
    }
}

impl TransitionOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout per try
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.waiter.timeout = timeout;
        self
    }

    /// Set the interval between poll rounds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.waiter.poll_interval = poll_interval;
        self
    }

    /// Set the total number of tries (clamped to at least 1)
    #[must_use]
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries.max(1);
        self
    }

    /// Run the trigger on the foreground executor
    #[must_use]
    pub const fn trigger_on_foreground(mut self) -> Self {
        self.run_trigger_on_foreground = true;
        self
    }

    /// Acknowledge that the transition may be a no-op
    #[must_use]
    pub const fn possibly_already_fulfilled(mut self) -> Self {
        self.possibly_already_fulfilled = true;
        self
    }
}

// =============================================================================
// ATTEMPT OUTCOME
// =============================================================================

/// Typed result of one try
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Every wait fulfilled
    Success,
    /// The waits did not all fulfill (timeout or condition error); retryable
    Failed(TransitionReport),
    /// The trigger faulted before polling; retryable, recorded as the cause
    Faulted {
        /// Wait states at the moment the trigger faulted
        report: TransitionReport,
        /// The trigger error
        cause: TransitarError,
    },
}

// =============================================================================
// TRANSITION
// =============================================================================

/// A single-use orchestrated move between sets of conditional states
pub struct Transition {
    id: Uuid,
    description: String,
    exited: Vec<Rc<ConditionalState>>,
    entered: Vec<Rc<ConditionalState>>,
    context: Option<Rc<ConditionalState>>,
    conditions: Vec<SharedCondition>,
    trigger: Trigger,
    options: TransitionOptions,
    ran: bool,
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("exited", &self.exited.len())
            .field("entered", &self.entered.len())
            .field("ran", &self.ran)
            .finish_non_exhaustive()
    }
}

fn joined_names(states: &[Rc<ConditionalState>]) -> String {
    states
        .iter()
        .map(|state| state.name().to_string())
        .collect::<Vec<_>>()
        .join("+")
}

impl Transition {
    /// Create a transition over explicit exited and entered state lists
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        exited: Vec<Rc<ConditionalState>>,
        entered: Vec<Rc<ConditionalState>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            exited,
            entered,
            context: None,
            conditions: Vec::new(),
            trigger: Trigger::None,
            options: TransitionOptions::default(),
            ran: false,
        }
    }

    /// Move from one major state to another
    #[must_use]
    pub fn between_major(from: &Rc<ConditionalState>, to: &Rc<ConditionalState>) -> Self {
        Self::new(
            format!("{} -> {}", from.name(), to.name()),
            vec![Rc::clone(from)],
            vec![Rc::clone(to)],
        )
    }

    /// Enter the app's initial major state; nothing is exited
    #[must_use]
    pub fn entry_point(to: &Rc<ConditionalState>) -> Self {
        Self::new(format!("entry -> {}", to.name()), Vec::new(), vec![Rc::clone(to)])
    }

    /// Enter minor states scoped inside an Active major state
    #[must_use]
    pub fn enter_minor(major: &Rc<ConditionalState>, states: &[Rc<ConditionalState>]) -> Self {
        let mut transition = Self::new(
            format!("enter {} in {}", joined_names(states), major.name()),
            Vec::new(),
            states.to_vec(),
        );
        transition.context = Some(Rc::clone(major));
        transition
    }

    /// Exit minor states scoped inside an Active major state
    #[must_use]
    pub fn exit_minor(major: &Rc<ConditionalState>, states: &[Rc<ConditionalState>]) -> Self {
        let mut transition = Self::new(
            format!("exit {} in {}", joined_names(states), major.name()),
            states.to_vec(),
            Vec::new(),
        );
        transition.context = Some(Rc::clone(major));
        transition
    }

    /// Exit and enter minor states in one step, with no no-state gap
    #[must_use]
    pub fn swap_minor(
        major: &Rc<ConditionalState>,
        exited: &[Rc<ConditionalState>],
        entered: &[Rc<ConditionalState>],
    ) -> Self {
        let mut transition = Self::new(
            format!(
                "swap {} -> {} in {}",
                joined_names(exited),
                joined_names(entered),
                major.name()
            ),
            exited.to_vec(),
            entered.to_vec(),
        );
        transition.context = Some(Rc::clone(major));
        transition
    }

    /// Wait for free-standing conditions without any state change
    #[must_use]
    pub fn wait_only(conditions: Vec<SharedCondition>) -> Self {
        let mut transition = Self::new("wait for conditions", Vec::new(), Vec::new());
        transition.conditions = conditions;
        transition
    }

    /// Attach a free-standing condition waited on alongside the state waits
    #[must_use]
    pub fn with_condition(mut self, condition: SharedCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach a trigger
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Replace the options
    ///
    /// Attached conditions live on the transition, not the options, so this
    /// does not disturb them.
    #[must_use]
    pub fn with_options(mut self, options: TransitionOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the transition id
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Get the transition description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the transition to completion
    ///
    /// Marks phases, then tries up to `max_tries` times: pre-check, trigger,
    /// poll. On success, activates the entered states, finishes the exited
    /// ones, and records the change in the registry.
    ///
    /// # Errors
    ///
    /// Configuration errors propagate immediately without retry. Exhausted
    /// tries return `TransitionFailed` carrying the last attempt's diagnostic
    /// table, after notifying the process-wide failure hook.
    pub fn run(
        &mut self,
        registry: &mut StateRegistry,
        foreground: &dyn ForegroundExecutor,
    ) -> TransitarResult<()> {
        if self.ran {
            return Err(TransitarError::TransitionReused {
                description: self.description.clone(),
            });
        }
        self.ran = true;

        if let Some(context) = &self.context {
            if !context.is_active() {
                return Err(TransitarError::PhaseViolation {
                    state: context.name().to_string(),
                    from: Phase::Active.to_string(),
                    to: Phase::Active.to_string(),
                    actual: context.phase().to_string(),
                });
            }
        }

        info!(transition = %self.description, id = %self.id, "running transition");
        for state in &self.exited {
            state.begin_transition_from()?;
        }
        for state in &self.entered {
            state.begin_transition_to()?;
        }

        let max_tries = self.options.max_tries.max(1);
        let mut last_failure = None;
        for try_number in 1..=max_tries {
            match self.attempt(foreground, try_number == 1)? {
                AttemptOutcome::Success => {
                    for state in &self.exited {
                        state.finish_transition_from()?;
                    }
                    for state in &self.entered {
                        state.finish_transition_to()?;
                    }
                    registry.transition_completed(&self.exited, &self.entered)?;
                    info!(transition = %self.description, try_number, "transition complete");
                    return Ok(());
                }
                AttemptOutcome::Failed(report) => {
                    warn!(transition = %self.description, try_number, "try failed");
                    last_failure = Some(TransitarError::TransitionFailed {
                        description: self.description.clone(),
                        report: report.to_string(),
                        cause: None,
                    });
                }
                AttemptOutcome::Faulted { report, cause } => {
                    warn!(
                        transition = %self.description,
                        try_number,
                        cause = %cause,
                        "trigger faulted"
                    );
                    last_failure = Some(TransitarError::TransitionFailed {
                        description: self.description.clone(),
                        report: report.to_string(),
                        cause: Some(Box::new(cause)),
                    });
                }
            }
        }

        let failure = last_failure.unwrap_or_else(|| TransitarError::TransitionFailed {
            description: self.description.clone(),
            report: String::new(),
            cause: None,
        });
        config::notify_transition_failure(&failure);
        Err(failure)
    }

    /// One try: build a fresh waiter, pre-check, trigger, poll
    ///
    /// Retryable failures come back as `AttemptOutcome`; configuration errors
    /// propagate through the `Result`.
    fn attempt(
        &mut self,
        foreground: &dyn ForegroundExecutor,
        first_try: bool,
    ) -> TransitarResult<AttemptOutcome> {
        let mut waiter = ConditionWaiter::for_transition(
            &self.entered,
            &self.exited,
            &self.conditions,
            self.description.clone(),
            self.options.waiter,
            foreground,
        )?;
        // On a retry the previous try's trigger may have landed after its
        // timeout; finding everything fulfilled then is success, not a
        // redundant trigger.
        waiter.pre_check(
            !self.trigger.is_none() && first_try,
            self.options.possibly_already_fulfilled,
        )?;

        if let Err(cause) = self
            .trigger
            .fire(self.options.run_trigger_on_foreground, foreground)
        {
            waiter.stop_monitoring();
            return Ok(AttemptOutcome::Faulted {
                report: waiter.report(),
                cause,
            });
        }

        let polled = waiter.poll_to_completion();
        waiter.stop_monitoring();
        match polled? {
            WaitOutcome::Success => Ok(AttemptOutcome::Success),
            WaitOutcome::TimedOut | WaitOutcome::ConditionError => {
                Ok(AttemptOutcome::Failed(waiter.report()))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
