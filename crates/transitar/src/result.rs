//! Result and error types for Transitar.

use thiserror::Error;

/// Result type for Transitar operations
pub type TransitarResult<T> = Result<T, TransitarError>;

/// Errors that can occur in Transitar
///
/// Runtime wait failures (`TransitionFailed`) carry the full per-wait
/// diagnostic table. Configuration errors (a trigger declared for a no-op
/// transition, a factory materialized twice, an unbound element queried for
/// its value) fail fast and are never retried.
#[derive(Debug, Error)]
pub enum TransitarError {
    /// Transition exhausted its tries without every wait fulfilling
    #[error("Transition failed: {description}\n{report}")]
    TransitionFailed {
        /// Transition description
        description: String,
        /// Per-wait diagnostic table
        report: String,
        /// Underlying trigger fault, when one aborted the last try
        #[source]
        cause: Option<Box<TransitarError>>,
    },

    /// Trigger action returned an error
    #[error("Trigger failed: {message}")]
    TriggerFailed {
        /// Error message
        message: String,
    },

    /// A trigger was declared but every condition was already fulfilled
    /// before it ran
    #[error(
        "Transition '{description}' declared a trigger but all conditions were \
         already fulfilled before it ran; pass possibly_already_fulfilled if \
         this is expected"
    )]
    AlreadyFulfilled {
        /// Transition description
        description: String,
    },

    /// A trigger-less transition was declared with nothing to wait for
    #[error(
        "Transition '{description}' has no trigger and no conditions to wait \
         for; pass possibly_already_fulfilled to acknowledge a no-op wait"
    )]
    EmptyTransition {
        /// Transition description
        description: String,
    },

    /// Element value queried while unavailable
    #[error("Value of element '{element_id}' is not available: {message}")]
    ValueNotAvailable {
        /// Element id
        element_id: String,
        /// Why the value cannot be read
        message: String,
    },

    /// Element bound to a second state
    #[error("Element '{element_id}' is already bound to a state")]
    AlreadyBound {
        /// Element id
        element_id: String,
    },

    /// Element factory materialized a second time
    #[error("Element factory '{description}' was already materialized")]
    FactoryAlreadyMaterialized {
        /// Factory description
        description: String,
    },

    /// Gated factories never fired during a successful transition
    #[error(
        "Element factories were declared but their gates never fulfilled \
         (dead declaration): {descriptions}"
    )]
    UnmaterializedFactories {
        /// Joined factory descriptions
        descriptions: String,
    },

    /// Lifecycle phase setter called out of order
    #[error("State '{state}' cannot move {from} -> {to}: current phase is {actual}")]
    PhaseViolation {
        /// State name
        state: String,
        /// Expected current phase
        from: String,
        /// Requested phase
        to: String,
        /// Actual current phase
        actual: String,
    },

    /// Active-state spot check found a condition no longer fulfilled
    #[error("State '{state}' is Active but '{description}' reported {status}")]
    StateCheckFailed {
        /// State name
        state: String,
        /// Condition description
        description: String,
        /// Status the condition reported
        status: String,
    },

    /// Registry assertion failed
    #[error("Registry assertion failed: {message}")]
    RegistryAssertion {
        /// Error message
        message: String,
    },

    /// Transition instance reused
    #[error("Transition '{description}' is single-use and was already run")]
    TransitionReused {
        /// Transition description
        description: String,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
