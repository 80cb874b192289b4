//! Elements and Element Factories
//!
//! An `Element` binds a result-bearing enter condition (and optionally an
//! exit condition) to a lifecycle-managed state and exposes the produced
//! value while the owning state allows it. An `ElementFactory` is a one-shot
//! deferred declaration of additional elements, gated on a condition.

use crate::condition::{
    ConditionCell, ConditionWithResult, ResultAdapter, SharedCondition, ValueRef, ValueSource,
};
use crate::result::{TransitarError, TransitarResult};
use crate::state::Phase;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

type OwnerPhase = Rc<RefCell<Option<Rc<Cell<Phase>>>>>;

// =============================================================================
// ELEMENT
// =============================================================================

/// A named enter/exit condition pair bound to a lifecycle-managed state
///
/// Cheap to clone; the test author keeps a handle after declaring the element
/// into a state and reads the produced value through [`Element::value`] once
/// the enter condition fulfills.
#[derive(Debug)]
pub struct Element<T> {
    id: String,
    enter: SharedCondition,
    exit: Option<SharedCondition>,
    value: ValueRef<T>,
    owner: OwnerPhase,
}

impl<T> Clone for Element<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            enter: Rc::clone(&self.enter),
            exit: self.exit.clone(),
            value: self.value.clone(),
            owner: Rc::clone(&self.owner),
        }
    }
}

impl<T: 'static> Element<T> {
    /// Create an element from its enter condition
    ///
    /// The id must be stable across states that are compared during a
    /// transition: an element present in both the origin and the destination
    /// (same id) suppresses the otherwise-redundant exit wait.
    pub fn new(
        id: impl Into<String>,
        enter: impl ConditionWithResult<Value = T> + 'static,
    ) -> Self {
        let id = id.into();
        let slot = ValueSource::new(format!("element '{id}'"));
        let value = slot.reference();
        Self {
            id,
            enter: ConditionCell::share(ResultAdapter::new(enter, slot)),
            exit: None,
            value,
            owner: Rc::new(RefCell::new(None)),
        }
    }

    /// Attach an exit (disappearance) condition
    #[must_use]
    pub fn with_exit_condition(mut self, exit: SharedCondition) -> Self {
        self.exit = Some(exit);
        self
    }
}

impl<T> Element<T> {
    /// Get the element id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the enter condition cell
    #[must_use]
    pub fn enter_condition(&self) -> &SharedCondition {
        &self.enter
    }

    /// Get a handle to the value slot, usable as a dependency gate for other
    /// conditions
    #[must_use]
    pub fn value_ref(&self) -> ValueRef<T> {
        self.value.clone()
    }

    /// Get the type-erased per-state record for this element
    #[must_use]
    pub fn handle(&self) -> ElementHandle {
        ElementHandle {
            id: self.id.clone(),
            enter: Rc::clone(&self.enter),
            exit: self.exit.clone(),
            owner: Rc::clone(&self.owner),
        }
    }
}

impl<T: Clone> Element<T> {
    /// Get the value produced by the fulfilled enter condition
    ///
    /// # Errors
    ///
    /// Fails when the element is not bound to a state, when the owning state
    /// is not in TransitioningTo/Active/TransitioningFrom, or when the enter
    /// condition has never fulfilled.
    pub fn value(&self) -> TransitarResult<T> {
        let owner = self.owner.borrow();
        let Some(phase) = owner.as_ref() else {
            return Err(TransitarError::ValueNotAvailable {
                element_id: self.id.clone(),
                message: "element is not bound to a state".to_string(),
            });
        };
        let phase = phase.get();
        if !phase.allows_element_value() {
            return Err(TransitarError::ValueNotAvailable {
                element_id: self.id.clone(),
                message: format!("owning state phase is {phase}"),
            });
        }
        self.value
            .get()
            .ok_or_else(|| TransitarError::ValueNotAvailable {
                element_id: self.id.clone(),
                message: "enter condition has not fulfilled".to_string(),
            })
    }
}

// =============================================================================
// ELEMENT HANDLE
// =============================================================================

/// Type-erased per-state record of one element
#[derive(Debug, Clone)]
pub struct ElementHandle {
    id: String,
    enter: SharedCondition,
    exit: Option<SharedCondition>,
    owner: OwnerPhase,
}

impl ElementHandle {
    /// Get the element id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the enter condition
    #[must_use]
    pub fn enter_condition(&self) -> &SharedCondition {
        &self.enter
    }

    /// Get the exit condition, if one was declared
    #[must_use]
    pub fn exit_condition(&self) -> Option<&SharedCondition> {
        self.exit.as_ref()
    }

    /// Get the exit condition to await for a transition into the given
    /// destination
    ///
    /// Returns `None` when this element's id is present in the destination
    /// (the same element persists across the transition, so no disappearance
    /// should be awaited) or when no exit condition was declared.
    #[must_use]
    pub fn exit_condition_for(
        &self,
        destination_ids: &HashSet<String>,
    ) -> Option<SharedCondition> {
        if destination_ids.contains(&self.id) {
            return None;
        }
        self.exit.clone()
    }

    /// Check whether this element has been bound to a state
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.owner.borrow().is_some()
    }

    pub(crate) fn bind(&self, phase: Rc<Cell<Phase>>) -> TransitarResult<()> {
        let mut owner = self.owner.borrow_mut();
        if owner.is_some() {
            return Err(TransitarError::AlreadyBound {
                element_id: self.id.clone(),
            });
        }
        *owner = Some(phase);
        Ok(())
    }
}

// =============================================================================
// ELEMENT FACTORY
// =============================================================================

/// One-shot deferred declaration of additional elements, gated on a condition
///
/// The scheduler materializes the factory the first time its gate is observed
/// fulfilled; the resulting elements join the owning state and the active
/// wait-set. Materializing twice is a programming error.
pub struct ElementFactory {
    gate: SharedCondition,
    description: String,
    declare: RefCell<Option<Box<dyn FnOnce(&mut Elements)>>>,
    processed: Cell<bool>,
}

impl std::fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementFactory")
            .field("description", &self.description)
            .field("processed", &self.processed.get())
            .finish_non_exhaustive()
    }
}

impl ElementFactory {
    /// Create a factory that declares elements once `gate` fulfills
    pub fn new(
        gate: SharedCondition,
        description: impl Into<String>,
        declare: impl FnOnce(&mut Elements) + 'static,
    ) -> Self {
        Self {
            gate,
            description: description.into(),
            declare: RefCell::new(Some(Box::new(declare))),
            processed: Cell::new(false),
        }
    }

    /// Get the gating condition
    #[must_use]
    pub fn gate(&self) -> &SharedCondition {
        &self.gate
    }

    /// Get the factory description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Check whether the factory already fired
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.processed.get()
    }

    /// Run the deferred declaration, exactly once
    ///
    /// # Errors
    ///
    /// Returns `FactoryAlreadyMaterialized` on a second call.
    pub fn materialize(&self) -> TransitarResult<Elements> {
        if self.processed.get() {
            return Err(TransitarError::FactoryAlreadyMaterialized {
                description: self.description.clone(),
            });
        }
        self.processed.set(true);
        let mut elements = Elements::new();
        if let Some(declare) = self.declare.borrow_mut().take() {
            declare(&mut elements);
        }
        Ok(elements)
    }
}

// =============================================================================
// ELEMENTS (DECLARATION SINK)
// =============================================================================

/// Collects the elements, free-standing conditions, and factories a state
/// (or a materialized factory) declares
#[derive(Debug, Default)]
pub struct Elements {
    elements: Vec<ElementHandle>,
    enter_conditions: Vec<SharedCondition>,
    exit_conditions: Vec<SharedCondition>,
    factories: Vec<Rc<ElementFactory>>,
}

impl Elements {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an element
    pub fn declare_element<T>(&mut self, element: &Element<T>) {
        self.elements.push(element.handle());
    }

    /// Declare a free-standing enter condition
    pub fn declare_enter_condition(&mut self, condition: SharedCondition) {
        self.enter_conditions.push(condition);
    }

    /// Declare a free-standing exit condition
    pub fn declare_exit_condition(&mut self, condition: SharedCondition) {
        self.exit_conditions.push(condition);
    }

    /// Declare a deferred element factory
    pub fn declare_factory(&mut self, factory: ElementFactory) {
        self.factories.push(Rc::new(factory));
    }

    /// Get the declared element records
    #[must_use]
    pub fn element_handles(&self) -> &[ElementHandle] {
        &self.elements
    }

    /// Get the free-standing enter conditions
    #[must_use]
    pub fn enter_conditions(&self) -> &[SharedCondition] {
        &self.enter_conditions
    }

    /// Get the free-standing exit conditions
    #[must_use]
    pub fn exit_conditions(&self) -> &[SharedCondition] {
        &self.exit_conditions
    }

    /// Get the declared factories
    #[must_use]
    pub fn factories(&self) -> &[Rc<ElementFactory>] {
        &self.factories
    }

    /// Iterate the declared element ids
    pub fn element_ids(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(ElementHandle::id)
    }

    /// Check whether nothing was declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
            && self.enter_conditions.is_empty()
            && self.exit_conditions.is_empty()
            && self.factories.is_empty()
    }

    pub(crate) fn merge(&mut self, other: Self) {
        self.elements.extend(other.elements);
        self.enter_conditions.extend(other.enter_conditions);
        self.exit_conditions.extend(other.exit_conditions);
        self.factories.extend(other.factories);
    }
}

// =============================================================================
// TESTS
// =============================================================================
