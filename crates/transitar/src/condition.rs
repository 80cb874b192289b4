//! Conditions and Dependency Gating
//!
//! A `Condition` is a pollable predicate. The engine wraps every check with a
//! uniform poll boundary: declared dependencies are evaluated first, and a
//! check whose inputs are missing resolves to `Awaiting` without the check
//! ever running. A check that panics resolves to `Error` instead of aborting
//! the scheduler.
//!
//! ## Toyota Way Application
//!
//! - **Poka-Yoke**: the dependency gate makes it impossible to poll a
//!   condition before its inputs exist
//! - **Jidoka**: faults are converted to `Error` statuses at the boundary and
//!   reported like any other unfulfilled status

use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

// =============================================================================
// THREAD AFFINITY
// =============================================================================

/// Execution context a condition's check must run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ThreadAffinity {
    /// The worker context running the orchestration logic
    #[default]
    Worker,
    /// The single serialized context owning the interactive surface
    Foreground,
}

// =============================================================================
// DEPENDENCIES
// =============================================================================

/// A named input another condition must produce before this one may run
pub trait Dependency {
    /// Check whether the input currently has a value
    fn is_available(&self) -> bool;

    /// Get the input's name, used in synthesized `Awaiting` messages
    fn name(&self) -> &str;
}

/// Producer side of a shared value slot
///
/// A result-bearing condition writes into a `ValueSource`; conditions and
/// elements read through [`ValueRef`] handles.
#[derive(Debug)]
pub struct ValueSource<T> {
    name: String,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> ValueSource<T> {
    /// Create an empty value slot
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Publish a value
    pub fn set(&self, value: T) {
        *self.slot.borrow_mut() = Some(value);
    }

    /// Clear the slot
    pub fn clear(&self) {
        *self.slot.borrow_mut() = None;
    }

    /// Check whether a value is present
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Get the slot name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a consumer handle to this slot
    #[must_use]
    pub fn reference(&self) -> ValueRef<T> {
        ValueRef {
            name: self.name.clone(),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: Clone> ValueSource<T> {
    /// Get the current value, if present
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

/// Consumer handle to a shared value slot
#[derive(Debug)]
pub struct ValueRef<T> {
    name: String,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for ValueRef<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: Clone> ValueRef<T> {
    /// Get the current value, if present
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }
}

impl<T: 'static> ValueRef<T> {
    /// Erase the value type for use in a condition's dependency list
    #[must_use]
    pub fn as_dependency(&self) -> Rc<dyn Dependency> {
        Rc::new(self.clone())
    }
}

impl<T> Dependency for ValueRef<T> {
    fn is_available(&self) -> bool {
        self.slot.borrow().is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// CONDITION TRAITS
// =============================================================================

/// A pollable predicate
///
/// Implementations are stateless between polls except for the monitoring
/// hooks, which the engine calls once per transition attempt. `check` is
/// never invoked while any declared dependency lacks a value.
pub trait Condition {
    /// Run the condition-specific check
    fn check(&mut self) -> Status;

    /// Compute the human-readable description
    ///
    /// Called once and cached by the engine; see
    /// [`ConditionCell::invalidate_description`].
    fn build_description(&self) -> String;

    /// Execution context this check must run on
    fn affinity(&self) -> ThreadAffinity {
        ThreadAffinity::Worker
    }

    /// Called once before the first poll of a transition attempt
    fn on_start_monitoring(&mut self) {}

    /// Called once after the last poll of a transition attempt
    fn on_stop_monitoring(&mut self) {}

    /// Inputs that must be present before `check` may run
    fn dependencies(&self) -> Vec<Rc<dyn Dependency>> {
        Vec::new()
    }
}

/// A pollable predicate that produces a typed value when fulfilled
pub trait ConditionWithResult {
    /// Type of the produced value
    type Value;

    /// Run the check, optionally producing a value
    ///
    /// A value is only retained when the status is fulfilled; `Awaiting`
    /// never carries one.
    fn check_with_result(&mut self) -> (Status, Option<Self::Value>);

    /// Compute the human-readable description
    fn build_description(&self) -> String;

    /// Execution context this check must run on
    fn affinity(&self) -> ThreadAffinity {
        ThreadAffinity::Worker
    }

    /// Called once before the first poll of a transition attempt
    fn on_start_monitoring(&mut self) {}

    /// Called once after the last poll of a transition attempt
    fn on_stop_monitoring(&mut self) {}

    /// Inputs that must be present before the check may run
    fn dependencies(&self) -> Vec<Rc<dyn Dependency>> {
        Vec::new()
    }
}

/// Adapts a result-bearing condition into a plain one, publishing the
/// produced value into a shared slot on fulfillment.
pub(crate) struct ResultAdapter<C: ConditionWithResult> {
    inner: C,
    slot: ValueSource<C::Value>,
}

impl<C: ConditionWithResult> ResultAdapter<C> {
    pub(crate) fn new(inner: C, slot: ValueSource<C::Value>) -> Self {
        Self { inner, slot }
    }
}

impl<C: ConditionWithResult> Condition for ResultAdapter<C> {
    fn check(&mut self) -> Status {
        let (status, value) = self.inner.check_with_result();
        if status.is_fulfilled() {
            if let Some(value) = value {
                self.slot.set(value);
            }
        }
        status
    }

    fn build_description(&self) -> String {
        self.inner.build_description()
    }

    fn affinity(&self) -> ThreadAffinity {
        self.inner.affinity()
    }

    fn on_start_monitoring(&mut self) {
        self.inner.on_start_monitoring();
    }

    fn on_stop_monitoring(&mut self) {
        self.inner.on_stop_monitoring();
    }

    fn dependencies(&self) -> Vec<Rc<dyn Dependency>> {
        self.inner.dependencies()
    }
}

// =============================================================================
// SHARED CONDITION CELL
// =============================================================================

/// A shared, identity-comparable condition
///
/// Factory gates and exit-wait dedup compare conditions by `Rc::ptr_eq` on
/// this alias.
pub type SharedCondition = Rc<ConditionCell>;

/// Owns one boxed condition plus its cached description and enforces the
/// uniform poll boundary (dependency gate, panic conversion).
pub struct ConditionCell {
    inner: RefCell<Box<dyn Condition>>,
    description: RefCell<Option<String>>,
}

impl std::fmt::Debug for ConditionCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionCell")
            .field("description", &self.description.borrow())
            .finish_non_exhaustive()
    }
}

impl ConditionCell {
    /// Wrap a condition into a shared cell
    #[must_use]
    pub fn share(condition: impl Condition + 'static) -> SharedCondition {
        Self::from_boxed(Box::new(condition))
    }

    /// Wrap an already-boxed condition into a shared cell
    #[must_use]
    pub fn from_boxed(condition: Box<dyn Condition>) -> SharedCondition {
        Rc::new(Self {
            inner: RefCell::new(condition),
            description: RefCell::new(None),
        })
    }

    /// Get the cached description, computing it on first access
    #[must_use]
    pub fn description(&self) -> String {
        let mut cached = self.description.borrow_mut();
        if let Some(description) = cached.as_ref() {
            return description.clone();
        }
        let description = self.inner.borrow().build_description();
        *cached = Some(description.clone());
        description
    }

    /// Drop the cached description so the next access recomputes it
    pub fn invalidate_description(&self) {
        *self.description.borrow_mut() = None;
    }

    /// Execution context the wrapped check must run on
    #[must_use]
    pub fn affinity(&self) -> ThreadAffinity {
        self.inner.borrow().affinity()
    }

    /// Fire the start-of-attempt monitoring hook
    pub fn start_monitoring(&self) {
        self.inner.borrow_mut().on_start_monitoring();
    }

    /// Fire the end-of-attempt monitoring hook
    pub fn stop_monitoring(&self) {
        self.inner.borrow_mut().on_stop_monitoring();
    }

    /// Poll once through the engine boundary
    ///
    /// Resolves to `Awaiting` (listing the missing inputs) when any declared
    /// dependency lacks a value, skipping the check entirely. A panicking
    /// check resolves to `Error` carrying the panic text.
    #[must_use]
    pub fn poll(&self) -> Status {
        let missing: Vec<String> = {
            let inner = self.inner.borrow();
            inner
                .dependencies()
                .iter()
                .filter(|dep| !dep.is_available())
                .map(|dep| dep.name().to_string())
                .collect()
        };
        if !missing.is_empty() {
            return Status::awaiting(format!("awaiting: {}", missing.join(", ")));
        }

        match catch_unwind(AssertUnwindSafe(|| self.inner.borrow_mut().check())) {
            Ok(status) => status,
            Err(payload) => Status::error(panic_message(payload.as_ref())),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "condition check panicked".to_string()
    }
}

// =============================================================================
// CLOSURE-BASED CONDITIONS
// =============================================================================

/// A closure-based condition
pub struct FnCondition {
    description: String,
    affinity: ThreadAffinity,
    dependencies: Vec<Rc<dyn Dependency>>,
    check: Box<dyn FnMut() -> Status>,
}

impl std::fmt::Debug for FnCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

impl FnCondition {
    /// Create a new closure condition
    pub fn new(description: impl Into<String>, check: impl FnMut() -> Status + 'static) -> Self {
        Self {
            description: description.into(),
            affinity: ThreadAffinity::Worker,
            dependencies: Vec::new(),
            check: Box::new(check),
        }
    }

    /// Set the thread affinity
    #[must_use]
    pub fn with_affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Gate this condition on a named input
    #[must_use]
    pub fn with_dependency(mut self, dependency: Rc<dyn Dependency>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Wrap into a shared cell
    #[must_use]
    pub fn share(self) -> SharedCondition {
        ConditionCell::share(self)
    }
}

impl Condition for FnCondition {
    fn check(&mut self) -> Status {
        (self.check)()
    }

    fn build_description(&self) -> String {
        self.description.clone()
    }

    fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    fn dependencies(&self) -> Vec<Rc<dyn Dependency>> {
        self.dependencies.clone()
    }
}

/// A closure-based result-bearing condition
pub struct FnConditionWithResult<T> {
    description: String,
    affinity: ThreadAffinity,
    dependencies: Vec<Rc<dyn Dependency>>,
    check: Box<dyn FnMut() -> (Status, Option<T>)>,
}

impl<T> std::fmt::Debug for FnConditionWithResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnConditionWithResult")
            .field("description", &self.description)
            .field("affinity", &self.affinity)
            .finish_non_exhaustive()
    }
}

impl<T> FnConditionWithResult<T> {
    /// Create a new closure condition producing a value when fulfilled
    pub fn new(
        description: impl Into<String>,
        check: impl FnMut() -> (Status, Option<T>) + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            affinity: ThreadAffinity::Worker,
            dependencies: Vec::new(),
            check: Box::new(check),
        }
    }

    /// Set the thread affinity
    #[must_use]
    pub fn with_affinity(mut self, affinity: ThreadAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    /// Gate this condition on a named input
    #[must_use]
    pub fn with_dependency(mut self, dependency: Rc<dyn Dependency>) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

impl<T> ConditionWithResult for FnConditionWithResult<T> {
    type Value = T;

    fn check_with_result(&mut self) -> (Status, Option<T>) {
        (self.check)()
    }

    fn build_description(&self) -> String {
        self.description.clone()
    }

    fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    fn dependencies(&self) -> Vec<Rc<dyn Dependency>> {
        self.dependencies.clone()
    }
}

/// Wrap a closure into a shared condition with default affinity
pub fn fn_condition(
    description: impl Into<String>,
    check: impl FnMut() -> Status + 'static,
) -> SharedCondition {
    FnCondition::new(description, check).share()
}

// =============================================================================
// TESTS
// =============================================================================
