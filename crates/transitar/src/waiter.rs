//! Condition Waiter: the Scheduling Core
//!
//! Builds the wait-list for one transition attempt, polls every wait once per
//! round until all fulfill or the timeout elapses, and expands the wait-set
//! as element factories fire. Foreground-affine checks are marshalled onto
//! the foreground executor; the worker context blocks until each returns.
//!
//! ## Toyota Way Application
//!
//! - **Jidoka**: an `Error` status disqualifies the round immediately instead
//!   of burning the remaining timeout
//! - **Genchi Genbutsu**: every poll is recorded into the wait's history so
//!   the failure report shows what actually happened

use crate::condition::{SharedCondition, ThreadAffinity};
use crate::element::{ElementFactory, ElementHandle};
use crate::executor::ForegroundExecutor;
use crate::report::{TransitionReport, Verdict, WaitRecord};
use crate::result::{TransitarError, TransitarResult};
use crate::state::ConditionalState;
use crate::status::{Status, StatusHistory, StatusKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default overall timeout for one transition attempt (10 seconds)
pub const DEFAULT_TRANSITION_TIMEOUT_MS: u64 = 10_000;

/// Default interval between poll rounds (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

// =============================================================================
// WAIT ORIGIN
// =============================================================================

/// Classification of a wait within one transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitOrigin {
    /// Enter condition of a destination state
    Enter,
    /// Exit condition of an origin state
    Exit,
    /// Free-standing condition attached to the transition itself
    Transition,
}

impl WaitOrigin {
    /// Get the fixed-width diagnostic tag; delayed enter waits (spawned by a
    /// factory mid-transition) render as `[+ENTER]`
    #[must_use]
    pub const fn tag(&self, delayed: bool) -> &'static str {
        match (self, delayed) {
            (Self::Enter, false) => "[ENTER ]",
            (Self::Enter, true) => "[+ENTER]",
            (Self::Exit, _) => "[EXIT  ]",
            (Self::Transition, _) => "[TRSTN ]",
        }
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Timing options for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiterOptions {
    /// Overall timeout for the attempt
    pub timeout: Duration,
    /// Sleep between poll rounds
    pub poll_interval: Duration,
}

impl Default for WaiterOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TRANSITION_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl WaiterOptions {
    /// Create options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the interval between poll rounds
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

// =============================================================================
// WAIT
// =============================================================================

/// Per-condition bookkeeping for one transition attempt
#[derive(Debug)]
pub struct Wait {
    condition: SharedCondition,
    origin: WaitOrigin,
    delayed: bool,
    element_id: Option<String>,
    history: StatusHistory,
    started_at: Option<Instant>,
    first_fulfilled: Option<Instant>,
    last_unfulfilled: Option<Instant>,
    monitored: bool,
    dropped: bool,
}

impl Wait {
    fn new(condition: SharedCondition, origin: WaitOrigin) -> Self {
        Self {
            condition,
            origin,
            delayed: false,
            element_id: None,
            history: StatusHistory::new(),
            started_at: None,
            first_fulfilled: None,
            last_unfulfilled: None,
            monitored: false,
            dropped: false,
        }
    }

    fn with_element_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    fn record(&mut self, status: Status) {
        if status.is_fulfilled() {
            if self.first_fulfilled.is_none() {
                self.first_fulfilled = Some(status.at());
            }
        } else if self.first_fulfilled.is_none() {
            self.last_unfulfilled = Some(status.at());
        }
        self.history.record(&status);
    }

    /// Get the condition this wait tracks
    #[must_use]
    pub fn condition(&self) -> &SharedCondition {
        &self.condition
    }

    /// Get the wait's origin tag
    #[must_use]
    pub const fn origin(&self) -> WaitOrigin {
        self.origin
    }

    /// Check whether the last recorded status is Fulfilled
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.history.last_kind() == Some(StatusKind::Fulfilled)
    }

    /// Check whether the last recorded status is Error
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.history.last_kind() == Some(StatusKind::Error)
    }

    fn to_record(&self, now: Instant) -> WaitRecord {
        let started = self.started_at.unwrap_or(now);
        let elapsed_ms = now.saturating_duration_since(started).as_millis() as u64;
        let (fulfilled_min_ms, fulfilled_max_ms) = if self.is_fulfilled() {
            let max = self
                .first_fulfilled
                .map_or(0, |at| at.saturating_duration_since(started).as_millis() as u64);
            let min = self
                .last_unfulfilled
                .map_or(0, |at| at.saturating_duration_since(started).as_millis() as u64);
            (Some(min.min(max)), Some(max))
        } else {
            (None, None)
        };
        let verdict = if self.is_fulfilled() {
            Verdict::Ok
        } else if self.is_error() {
            Verdict::Error
        } else {
            Verdict::Fail
        };
        let errored = self.history.has_errors();
        let show_history =
            errored || self.history.has_messages() || self.history.region_count() > 2;
        WaitRecord {
            origin: self.origin,
            delayed: self.delayed,
            verdict,
            errored,
            description: self.condition.description(),
            elapsed_ms,
            fulfilled_min_ms,
            fulfilled_max_ms,
            history: self.history.format_lines(started),
            show_history,
        }
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// How one attempt's wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every wait fulfilled
    Success,
    /// The timeout elapsed with waits still unfulfilled
    TimedOut,
    /// A condition resolved to Error, disqualifying the attempt early
    ConditionError,
}

// =============================================================================
// CONDITION WAITER
// =============================================================================

struct FactoryBinding {
    state: Rc<ConditionalState>,
    factory: Rc<ElementFactory>,
}

/// Builds and polls the wait-list for one transition attempt
pub struct ConditionWaiter<'a> {
    options: WaiterOptions,
    foreground: &'a dyn ForegroundExecutor,
    description: String,
    waits: Vec<Wait>,
    factories: Vec<FactoryBinding>,
    destination_ids: HashSet<String>,
    rounds: usize,
}

impl std::fmt::Debug for ConditionWaiter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionWaiter")
            .field("description", &self.description)
            .field("waits", &self.waits.len())
            .field("factories", &self.factories.len())
            .field("rounds", &self.rounds)
            .finish_non_exhaustive()
    }
}

impl<'a> ConditionWaiter<'a> {
    /// Build the initial wait-list for a transition
    ///
    /// Entered states contribute their elements' enter conditions and
    /// free-standing enter conditions; exited states contribute exit
    /// conditions filtered against the union of destination element ids;
    /// the transition's own extra conditions are tagged `Transition`.
    pub fn for_transition(
        entered: &[Rc<ConditionalState>],
        exited: &[Rc<ConditionalState>],
        extra: &[SharedCondition],
        description: impl Into<String>,
        options: WaiterOptions,
        foreground: &'a dyn ForegroundExecutor,
    ) -> TransitarResult<Self> {
        let mut destination_ids = HashSet::new();
        for state in entered {
            let elements = state.elements()?;
            for id in elements.element_ids() {
                destination_ids.insert(id.to_string());
            }
        }

        let mut waits = Vec::new();
        let mut factories = Vec::new();
        for state in entered {
            let elements = state.elements()?;
            for handle in elements.element_handles() {
                waits.push(
                    Wait::new(Rc::clone(handle.enter_condition()), WaitOrigin::Enter)
                        .with_element_id(handle.id()),
                );
            }
            for condition in elements.enter_conditions() {
                waits.push(Wait::new(Rc::clone(condition), WaitOrigin::Enter));
            }
            for factory in elements.factories() {
                factories.push(FactoryBinding {
                    state: Rc::clone(state),
                    factory: Rc::clone(factory),
                });
            }
        }
        for state in exited {
            let elements = state.elements()?;
            for handle in elements.element_handles() {
                if let Some(condition) = handle.exit_condition_for(&destination_ids) {
                    waits.push(
                        Wait::new(condition, WaitOrigin::Exit).with_element_id(handle.id()),
                    );
                }
            }
            for condition in elements.exit_conditions() {
                waits.push(Wait::new(Rc::clone(condition), WaitOrigin::Exit));
            }
        }
        for condition in extra {
            waits.push(Wait::new(Rc::clone(condition), WaitOrigin::Transition));
        }

        Ok(Self {
            options,
            foreground,
            description: description.into(),
            waits,
            factories,
            destination_ids,
            rounds: 0,
        })
    }

    /// Poll every wait once before the trigger runs
    ///
    /// Monitoring hooks for the attempt fire once up front; waits discovered
    /// by factory expansion during this pass do not re-fire them.
    ///
    /// # Errors
    ///
    /// `EmptyTransition` when there is nothing to wait for;
    /// `AlreadyFulfilled` when a real trigger was declared but every wait is
    /// already fulfilled and `possibly_already_fulfilled` was not set.
    pub fn pre_check(
        &mut self,
        has_trigger: bool,
        possibly_already_fulfilled: bool,
    ) -> TransitarResult<()> {
        if self.waits.is_empty() && !possibly_already_fulfilled {
            return Err(TransitarError::EmptyTransition {
                description: self.description.clone(),
            });
        }

        let now = Instant::now();
        for wait in &mut self.waits {
            wait.monitored = true;
            wait.condition.start_monitoring();
            wait.start(now);
        }
        self.poll_round(true)?;

        if has_trigger
            && !possibly_already_fulfilled
            && self.active_waits().next().is_some()
            && self.all_fulfilled()
        {
            return Err(TransitarError::AlreadyFulfilled {
                description: self.description.clone(),
            });
        }
        Ok(())
    }

    /// Poll iteratively until every wait fulfills, a wait errors, or the
    /// timeout elapses
    ///
    /// # Errors
    ///
    /// `UnmaterializedFactories` when the waits all fulfilled but a declared
    /// factory's gate never fired (dead declaration).
    pub fn poll_to_completion(&mut self) -> TransitarResult<WaitOutcome> {
        // The pre-check round may already have observed everything fulfilled.
        if self.all_fulfilled() && !self.any_error() {
            self.check_factories_fired()?;
            return Ok(WaitOutcome::Success);
        }

        let deadline = Instant::now() + self.options.timeout;
        loop {
            self.rounds += 1;
            self.poll_round(false)?;
            trace!(
                transition = %self.description,
                round = self.rounds,
                waits = self.waits.iter().filter(|w| !w.dropped).count(),
                "poll round complete"
            );

            if self.any_error() {
                debug!(transition = %self.description, "condition errored, aborting wait");
                return Ok(WaitOutcome::ConditionError);
            }
            if self.all_fulfilled() {
                self.check_factories_fired()?;
                return Ok(WaitOutcome::Success);
            }
            if Instant::now() >= deadline {
                debug!(transition = %self.description, "wait timed out");
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(self.options.poll_interval);
        }
    }

    /// Fire the end-of-attempt monitoring hook on every tracked wait
    pub fn stop_monitoring(&mut self) {
        for wait in &mut self.waits {
            if wait.monitored {
                wait.monitored = false;
                wait.condition.stop_monitoring();
            }
        }
    }

    /// Build the diagnostic report for the current wait states
    #[must_use]
    pub fn report(&self) -> TransitionReport {
        let now = Instant::now();
        TransitionReport::new(
            self.description.clone(),
            self.active_waits().map(|wait| wait.to_record(now)).collect(),
        )
    }

    /// Number of main poll rounds completed so far
    #[must_use]
    pub const fn completed_rounds(&self) -> usize {
        self.rounds
    }

    fn active_waits(&self) -> impl Iterator<Item = &Wait> {
        self.waits.iter().filter(|wait| !wait.dropped)
    }

    fn all_fulfilled(&self) -> bool {
        self.active_waits().all(Wait::is_fulfilled)
    }

    fn any_error(&self) -> bool {
        self.active_waits().any(Wait::is_error)
    }

    /// One round: poll every active wait once, then expand factories in
    /// batches until no new waits appear, polling each batch within the
    /// round.
    fn poll_round(&mut self, suppress_new_monitoring: bool) -> TransitarResult<()> {
        for index in 0..self.waits.len() {
            if !self.waits[index].dropped {
                self.poll_wait(index);
            }
        }
        loop {
            let batch_start = self.waits.len();
            if !self.expand_factories(suppress_new_monitoring)? {
                break;
            }
            for index in batch_start..self.waits.len() {
                if !self.waits[index].dropped {
                    self.poll_wait(index);
                }
            }
        }
        Ok(())
    }

    fn poll_wait(&mut self, index: usize) {
        let condition = Rc::clone(&self.waits[index].condition);
        let status = self.poll_condition(&condition);
        self.waits[index].record(status);
    }

    fn poll_condition(&self, condition: &SharedCondition) -> Status {
        match condition.affinity() {
            ThreadAffinity::Worker => condition.poll(),
            ThreadAffinity::Foreground => {
                let mut result = None;
                self.foreground.run(&mut || result = Some(condition.poll()));
                result.unwrap_or_else(|| Status::error("foreground executor dropped the check"))
            }
        }
    }

    /// Materialize every factory whose gate was just observed fulfilled.
    /// Returns true when at least one fired.
    fn expand_factories(&mut self, suppress_monitoring: bool) -> TransitarResult<bool> {
        let mut fired = false;
        let mut index = 0;
        while index < self.factories.len() {
            let (state, factory) = {
                let binding = &self.factories[index];
                (Rc::clone(&binding.state), Rc::clone(&binding.factory))
            };
            index += 1;
            if factory.is_processed() {
                continue;
            }
            let gate_fulfilled = self.active_waits().any(|wait| {
                Rc::ptr_eq(&wait.condition, factory.gate()) && wait.is_fulfilled()
            });
            if !gate_fulfilled {
                continue;
            }
            fired = true;
            debug!(
                transition = %self.description,
                factory = factory.description(),
                "materializing element factory"
            );

            let materialized = factory.materialize()?;
            let new_ids: Vec<String> = materialized.element_ids().map(String::from).collect();
            let new_handles: Vec<ElementHandle> = materialized.element_handles().to_vec();
            let new_enters: Vec<SharedCondition> = materialized.enter_conditions().to_vec();
            let nested: Vec<Rc<ElementFactory>> = materialized.factories().to_vec();
            state.adopt(materialized)?;

            // A materialized element shared with an exiting state makes that
            // exit wait redundant.
            for id in &new_ids {
                self.destination_ids.insert(id.clone());
                for wait in &mut self.waits {
                    if wait.origin == WaitOrigin::Exit
                        && !wait.dropped
                        && wait.element_id.as_deref() == Some(id)
                    {
                        wait.dropped = true;
                    }
                }
            }

            let now = Instant::now();
            for handle in new_handles {
                let wait = Wait::new(Rc::clone(handle.enter_condition()), WaitOrigin::Enter)
                    .with_element_id(handle.id())
                    .delayed();
                self.admit_wait(wait, now, suppress_monitoring);
            }
            for condition in new_enters {
                let wait = Wait::new(condition, WaitOrigin::Enter).delayed();
                self.admit_wait(wait, now, suppress_monitoring);
            }
            for factory in nested {
                self.factories.push(FactoryBinding {
                    state: Rc::clone(&state),
                    factory,
                });
            }
        }
        Ok(fired)
    }

    fn admit_wait(&mut self, mut wait: Wait, now: Instant, suppress_monitoring: bool) {
        // Only waits whose start hook actually fired get the stop hook later.
        if !suppress_monitoring {
            wait.condition.start_monitoring();
            wait.monitored = true;
        }
        wait.start(now);
        self.waits.push(wait);
    }

    fn check_factories_fired(&self) -> TransitarResult<()> {
        let dead: Vec<&str> = self
            .factories
            .iter()
            .filter(|binding| !binding.factory.is_processed())
            .map(|binding| binding.factory.description())
            .collect();
        if dead.is_empty() {
            Ok(())
        } else {
            Err(TransitarError::UnmaterializedFactories {
                descriptions: dead.join(", "),
            })
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::condition::{fn_condition, FnCondition, FnConditionWithResult};
    use crate::element::Element;
    use crate::executor::InlineForeground;
    use std::cell::Cell;

    fn fast_options() -> WaiterOptions {
        WaiterOptions::new()
            .with_timeout(Duration::from_millis(400))
            .with_poll_interval(Duration::from_millis(10))
    }

    fn flag_condition(description: &str, flag: &Rc<Cell<bool>>) -> SharedCondition {
        let flag = Rc::clone(flag);
        fn_condition(description, move || {
            if flag.get() {
                Status::fulfilled()
            } else {
                Status::not_fulfilled()
            }
        })
    }

    fn state_with_enter(name: &str, condition: SharedCondition) -> Rc<ConditionalState> {
        ConditionalState::builder(name)
            .declare(move |els| els.declare_enter_condition(condition))
            .build()
    }

    fn element_with_flag(id: &str, flag: &Rc<Cell<bool>>) -> Element<u32> {
        let flag = Rc::clone(flag);
        Element::new(
            id,
            FnConditionWithResult::new(format!("{id} present"), move || {
                if flag.get() {
                    (Status::fulfilled(), Some(1u32))
                } else {
                    (Status::not_fulfilled(), None)
                }
            }),
        )
    }

    mod wait_origin_tests {
        use super::*;

        #[test]
        fn test_tags_are_fixed_width() {
            assert_eq!(WaitOrigin::Enter.tag(false), "[ENTER ]");
            assert_eq!(WaitOrigin::Enter.tag(true), "[+ENTER]");
            assert_eq!(WaitOrigin::Exit.tag(false), "[EXIT  ]");
            assert_eq!(WaitOrigin::Transition.tag(false), "[TRSTN ]");
            assert_eq!(WaitOrigin::Enter.tag(false).len(), 8);
            assert_eq!(WaitOrigin::Exit.tag(true).len(), 8);
        }
    }

    mod options_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let options = WaiterOptions::default();
            assert_eq!(
                options.timeout,
                Duration::from_millis(DEFAULT_TRANSITION_TIMEOUT_MS)
            );
            assert_eq!(
                options.poll_interval,
                Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
            );
        }

        #[test]
        fn test_builders() {
            let options = WaiterOptions::new()
                .with_timeout(Duration::from_secs(1))
                .with_poll_interval(Duration::from_millis(5));
            assert_eq!(options.timeout, Duration::from_secs(1));
            assert_eq!(options.poll_interval, Duration::from_millis(5));
        }
    }

    mod pre_check_tests {
        use super::*;

        #[test]
        fn test_empty_wait_list_is_rejected() {
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[],
                "noop",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            let err = waiter.pre_check(false, false).unwrap_err();
            assert!(matches!(err, TransitarError::EmptyTransition { .. }));
        }

        #[test]
        fn test_empty_wait_list_acknowledged() {
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[],
                "noop",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            assert!(waiter.pre_check(false, true).is_ok());
            assert_eq!(
                waiter.poll_to_completion().unwrap(),
                WaitOutcome::Success
            );
        }

        #[test]
        fn test_trigger_with_everything_already_fulfilled_is_rejected() {
            let condition = fn_condition("already there", || Status::fulfilled());
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "redundant trigger",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            let err = waiter.pre_check(true, false).unwrap_err();
            assert!(matches!(err, TransitarError::AlreadyFulfilled { .. }));
        }

        #[test]
        fn test_already_fulfilled_allowed_when_acknowledged() {
            let condition = fn_condition("already there", || Status::fulfilled());
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "idempotent trigger",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            assert!(waiter.pre_check(true, true).is_ok());
        }

        #[test]
        fn test_prefulfilled_wait_completes_without_extra_polls() {
            let polls = Rc::new(Cell::new(0usize));
            let counter = Rc::clone(&polls);
            let condition = fn_condition("already there", move || {
                counter.set(counter.get() + 1);
                Status::fulfilled()
            });
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "pure wait",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, false).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            assert_eq!(polls.get(), 1);
            assert_eq!(waiter.completed_rounds(), 0);
        }
    }

    mod poll_loop_tests {
        use super::*;

        #[test]
        fn test_eventually_fulfilled_reports_bracket() {
            let calls = Rc::new(Cell::new(0usize));
            let counter = Rc::clone(&calls);
            let condition = fn_condition("slow panel", move || {
                counter.set(counter.get() + 1);
                if counter.get() > 3 {
                    Status::fulfilled()
                } else {
                    Status::not_fulfilled()
                }
            });
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, false).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);

            let report = waiter.report();
            let record = &report.records[0];
            assert_eq!(record.verdict, Verdict::Ok);
            let min = record.fulfilled_min_ms.unwrap();
            let max = record.fulfilled_max_ms.unwrap();
            assert!(max >= min);
        }

        #[test]
        fn test_timeout_reports_fail() {
            let condition = fn_condition("never", || Status::not_fulfilled());
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "stuck",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, false).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::TimedOut);

            let report = waiter.report();
            assert_eq!(report.records[0].verdict, Verdict::Fail);
            assert!(report.records[0].fulfilled_min_ms.is_none());
            assert!(report.to_string().contains("[TRSTN ]"));
        }

        #[test]
        fn test_error_short_circuits_before_timeout() {
            let options = WaiterOptions::new()
                .with_timeout(Duration::from_secs(30))
                .with_poll_interval(Duration::from_millis(10));
            let condition = fn_condition("ambiguous match", || {
                Status::error("two matches, expected one")
            });
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "broken",
                options,
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, false).unwrap();

            let started = Instant::now();
            assert_eq!(
                waiter.poll_to_completion().unwrap(),
                WaitOutcome::ConditionError
            );
            assert!(started.elapsed() < Duration::from_secs(5));
            assert_eq!(waiter.report().records[0].verdict, Verdict::Error);
        }

        #[test]
        fn test_awaiting_counts_toward_timeout() {
            let source: crate::condition::ValueSource<u32> =
                crate::condition::ValueSource::new("upstream");
            let condition = FnCondition::new("gated", || Status::fulfilled())
                .with_dependency(source.reference().as_dependency())
                .share();
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "gated wait",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, false).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::TimedOut);
            assert!(waiter
                .report()
                .records[0]
                .history
                .iter()
                .any(|line| line.contains("AWAITING")));
        }

        #[test]
        fn test_foreground_checks_marshalled() {
            struct Counting {
                dispatches: Cell<usize>,
            }
            impl ForegroundExecutor for Counting {
                fn run(&self, task: &mut dyn FnMut()) {
                    self.dispatches.set(self.dispatches.get() + 1);
                    task();
                }
            }

            let executor = Counting {
                dispatches: Cell::new(0),
            };
            let condition = FnCondition::new("ui check", || Status::fulfilled())
                .with_affinity(ThreadAffinity::Foreground)
                .share();
            let mut waiter = ConditionWaiter::for_transition(
                &[],
                &[],
                &[condition],
                "ui wait",
                fast_options(),
                &executor,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            assert!(executor.dispatches.get() >= 1);
        }
    }

    mod wait_list_tests {
        use super::*;

        #[test]
        fn test_shared_element_id_suppresses_exit_wait() {
            let shown = Rc::new(Cell::new(true));
            let exit_polls = Rc::new(Cell::new(0usize));
            let exit_counter = Rc::clone(&exit_polls);
            let exit_condition = fn_condition("toolbar gone", move || {
                exit_counter.set(exit_counter.get() + 1);
                Status::not_fulfilled()
            });

            let origin_element =
                element_with_flag("toolbar", &shown).with_exit_condition(exit_condition);
            let origin = {
                let declared = origin_element.clone();
                ConditionalState::builder("origin")
                    .declare(move |els| els.declare_element(&declared))
                    .build()
            };

            let destination_element = element_with_flag("toolbar", &shown);
            let destination = {
                let declared = destination_element.clone();
                ConditionalState::builder("destination")
                    .declare(move |els| els.declare_element(&declared))
                    .build()
            };

            let mut waiter = ConditionWaiter::for_transition(
                &[destination],
                &[origin],
                &[],
                "navigate",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            // The exit condition was never tracked, let alone polled.
            assert_eq!(exit_polls.get(), 0);
            assert!(waiter
                .report()
                .records
                .iter()
                .all(|record| record.origin != WaitOrigin::Exit));
        }

        #[test]
        fn test_distinct_ids_keep_exit_wait() {
            let gone = Rc::new(Cell::new(false));
            let exit_condition = flag_condition("banner gone", &gone);
            let shown = Rc::new(Cell::new(true));
            let origin_element =
                element_with_flag("banner", &shown).with_exit_condition(exit_condition);
            let origin = {
                let declared = origin_element.clone();
                ConditionalState::builder("origin")
                    .declare(move |els| els.declare_element(&declared))
                    .build()
            };
            let destination = state_with_enter(
                "destination",
                fn_condition("home ready", || Status::fulfilled()),
            );

            let mut waiter = ConditionWaiter::for_transition(
                &[destination],
                &[origin],
                &[],
                "navigate",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::TimedOut);
            assert!(waiter
                .report()
                .records
                .iter()
                .any(|record| record.origin == WaitOrigin::Exit));

            gone.set(true);
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
        }
    }

    mod factory_tests {
        use super::*;
        use crate::element::ElementFactory;

        #[test]
        fn test_factory_fires_once_despite_repeated_fulfillment() {
            let gate = fn_condition("panel open", || Status::fulfilled());
            let fired = Rc::new(Cell::new(0usize));

            let state = {
                let gate = Rc::clone(&gate);
                let fired = Rc::clone(&fired);
                ConditionalState::builder("panel")
                    .declare(move |els| {
                        els.declare_enter_condition(Rc::clone(&gate));
                        let fired = Rc::clone(&fired);
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(&gate),
                            "panel contents",
                            move |inner| {
                                fired.set(fired.get() + 1);
                                // The contents stay unfulfilled for a few
                                // rounds, so the gate is observed fulfilled
                                // repeatedly after the factory fired.
                                let polls = Cell::new(0usize);
                                inner.declare_enter_condition(fn_condition(
                                    "contents ready",
                                    move || {
                                        polls.set(polls.get() + 1);
                                        if polls.get() > 3 {
                                            Status::fulfilled()
                                        } else {
                                            Status::not_fulfilled()
                                        }
                                    },
                                ));
                            },
                        ));
                    })
                    .build()
            };

            let mut waiter = ConditionWaiter::for_transition(
                &[state],
                &[],
                &[],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            assert_eq!(fired.get(), 1);
        }

        #[test]
        fn test_delayed_wait_tagged_in_report() {
            let gate = fn_condition("panel open", || Status::fulfilled());
            let state = {
                let gate = Rc::clone(&gate);
                ConditionalState::builder("panel")
                    .declare(move |els| {
                        els.declare_enter_condition(Rc::clone(&gate));
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(&gate),
                            "panel contents",
                            |inner| {
                                inner.declare_enter_condition(fn_condition("rows", || {
                                    Status::fulfilled()
                                }));
                            },
                        ));
                    })
                    .build()
            };
            let mut waiter = ConditionWaiter::for_transition(
                &[state],
                &[],
                &[],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            assert!(waiter.report().to_string().contains("[+ENTER]"));
        }

        #[test]
        fn test_nested_factories_fire_in_sequence() {
            let a_flag = Rc::new(Cell::new(true));
            let b_flag = Rc::new(Cell::new(true));
            let c_flag = Rc::new(Cell::new(true));
            let element_a = element_with_flag("a", &a_flag);
            let element_b = element_with_flag("b", &b_flag);
            let element_c = element_with_flag("c", &c_flag);

            let state = {
                let a = element_a.clone();
                let b = element_b.clone();
                let c = element_c.clone();
                ConditionalState::builder("panel")
                    .declare(move |els| {
                        els.declare_element(&a);
                        let b_inner = b.clone();
                        let c_inner = c.clone();
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(a.enter_condition()),
                            "b from a",
                            move |inner| {
                                inner.declare_element(&b_inner);
                                let c_leaf = c_inner.clone();
                                inner.declare_factory(ElementFactory::new(
                                    Rc::clone(b_inner.enter_condition()),
                                    "c from b",
                                    move |leaf| leaf.declare_element(&c_leaf),
                                ));
                            },
                        ));
                    })
                    .build()
            };

            let mut waiter = ConditionWaiter::for_transition(
                &[Rc::clone(&state)],
                &[],
                &[],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);

            let elements = state.elements().unwrap();
            let ids: Vec<&str> = elements.element_ids().collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }

        #[test]
        fn test_materialized_shared_element_drops_exit_wait() {
            let visible = Rc::new(Cell::new(true));
            let exit_fulfills = fn_condition("chip gone", || Status::not_fulfilled());
            let origin_element =
                element_with_flag("chip", &visible).with_exit_condition(exit_fulfills);
            let origin = {
                let declared = origin_element.clone();
                ConditionalState::builder("origin")
                    .declare(move |els| els.declare_element(&declared))
                    .build()
            };

            let gate = fn_condition("destination ready", || Status::fulfilled());
            let destination_chip = element_with_flag("chip", &visible);
            let destination = {
                let gate = Rc::clone(&gate);
                let chip = destination_chip.clone();
                ConditionalState::builder("destination")
                    .declare(move |els| {
                        els.declare_enter_condition(Rc::clone(&gate));
                        let chip = chip.clone();
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(&gate),
                            "late chip",
                            move |inner| inner.declare_element(&chip),
                        ));
                    })
                    .build()
            };

            let mut waiter = ConditionWaiter::for_transition(
                &[destination],
                &[origin],
                &[],
                "navigate",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            // The exit wait for "chip" would never fulfill; dropping it when
            // the factory materializes the same id lets the wait succeed.
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
        }

        #[test]
        fn test_monitoring_hooks_balanced_for_waits_found_during_pre_check() {
            use crate::condition::{Condition, ConditionCell};

            struct TrackedHooks {
                started: Rc<Cell<usize>>,
                stopped: Rc<Cell<usize>>,
            }

            impl Condition for TrackedHooks {
                fn check(&mut self) -> Status {
                    Status::fulfilled()
                }

                fn build_description(&self) -> String {
                    "contents ready".to_string()
                }

                fn on_start_monitoring(&mut self) {
                    self.started.set(self.started.get() + 1);
                }

                fn on_stop_monitoring(&mut self) {
                    self.stopped.set(self.stopped.get() + 1);
                }
            }

            let started = Rc::new(Cell::new(0usize));
            let stopped = Rc::new(Cell::new(0usize));
            let contents = ConditionCell::share(TrackedHooks {
                started: Rc::clone(&started),
                stopped: Rc::clone(&stopped),
            });

            let gate = fn_condition("panel open", || Status::fulfilled());
            let state = {
                let gate = Rc::clone(&gate);
                let contents = Rc::clone(&contents);
                ConditionalState::builder("panel")
                    .declare(move |els| {
                        els.declare_enter_condition(Rc::clone(&gate));
                        let contents = Rc::clone(&contents);
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(&gate),
                            "panel contents",
                            move |inner| inner.declare_enter_condition(Rc::clone(&contents)),
                        ));
                    })
                    .build()
            };

            let mut waiter = ConditionWaiter::for_transition(
                &[state],
                &[],
                &[],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            // The gate fulfills during the pre-check, so the factory's wait
            // joins the list with its start hook suppressed. The stop hook
            // must stay suppressed for it too.
            waiter.pre_check(false, true).unwrap();
            assert_eq!(waiter.poll_to_completion().unwrap(), WaitOutcome::Success);
            waiter.stop_monitoring();
            assert_eq!(started.get(), 0);
            assert_eq!(stopped.get(), started.get());
        }

        #[test]
        fn test_unfired_factory_is_configuration_error() {
            let never = fn_condition("never opens", || Status::not_fulfilled());
            let ready = fn_condition("ready", || Status::fulfilled());
            let state = {
                let never = Rc::clone(&never);
                let ready = Rc::clone(&ready);
                ConditionalState::builder("panel")
                    .declare(move |els| {
                        els.declare_enter_condition(Rc::clone(&ready));
                        els.declare_factory(ElementFactory::new(
                            Rc::clone(&never),
                            "dead declaration",
                            |_| {},
                        ));
                    })
                    .build()
            };
            let mut waiter = ConditionWaiter::for_transition(
                &[state],
                &[],
                &[],
                "open panel",
                fast_options(),
                &InlineForeground,
            )
            .unwrap();
            waiter.pre_check(false, true).unwrap();
            let err = waiter.poll_to_completion().unwrap_err();
            assert!(matches!(
                err,
                TransitarError::UnmaterializedFactories { .. }
            ));
        }
    }
}
