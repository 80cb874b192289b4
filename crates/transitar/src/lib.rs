//! Transitar: State-Transition Synchronization for Interactive-App Tests
//!
//! Transitar (Spanish: "to transit") replaces sleeps and ad-hoc polling in
//! end-to-end tests with declared conditions: the app under test is modeled
//! as conditional states whose activity is defined by pollable conditions,
//! and every move between states is an orchestrated transition that triggers,
//! waits for the combined enter/exit condition set, and reports exactly what
//! it waited for.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     TRANSITAR Architecture                        │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────┐               │
//! │  │ Transition │──►│ Condition   │──►│ Conditions/ │               │
//! │  │ (trigger + │   │ Waiter      │   │ Elements    │               │
//! │  │  retries)  │   │ (poll loop) │   │ (app state) │               │
//! │  └─────┬──────┘   └──────┬──────┘   └─────────────┘               │
//! │        │                 │ factory expansion, exit-wait dedup     │
//! │  ┌─────▼──────┐   ┌──────▼──────┐                                 │
//! │  │ State      │   │ Transition  │                                 │
//! │  │ Registry   │   │ Report      │                                 │
//! │  └────────────┘   └─────────────┘                                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use transitar::{
//!     fn_condition, ConditionalState, InlineForeground, StateRegistry, Status,
//!     Transition, TransitionOptions, Trigger,
//! };
//!
//! let mut registry = StateRegistry::new();
//! let loaded = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&loaded);
//! let home = ConditionalState::builder("home")
//!     .declare(move |els| {
//!         let flag = Rc::clone(&flag);
//!         els.declare_enter_condition(fn_condition("home loaded", move || {
//!             if flag.get() {
//!                 Status::fulfilled()
//!             } else {
//!                 Status::not_fulfilled()
//!             }
//!         }));
//!     })
//!     .build();
//!
//! let mut launch = Transition::entry_point(&home).with_trigger(Trigger::run(move || {
//!     loaded.set(true);
//!     Ok(())
//! }));
//! launch.run(&mut registry, &InlineForeground)?;
//! assert!(home.is_active());
//! # Ok::<(), transitar::TransitarError>(())
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

mod condition;
pub mod config;
mod element;
mod executor;
mod registry;
mod report;
mod result;
mod state;
mod status;
mod transition;
mod waiter;

pub use condition::{
    fn_condition, Condition, ConditionCell, ConditionWithResult, Dependency, FnCondition,
    FnConditionWithResult, SharedCondition, ThreadAffinity, ValueRef, ValueSource,
};
pub use element::{Element, ElementFactory, ElementHandle, Elements};
pub use executor::{ForegroundExecutor, InlineForeground};
pub use registry::{LogEntry, StateRegistry};
pub use report::{TransitionReport, Verdict, WaitRecord};
pub use result::{TransitarError, TransitarResult};
pub use state::{ConditionalState, ConditionalStateBuilder, Phase, StateScope};
pub use status::{
    Status, StatusHistory, StatusKind, StatusRegion, STATUS_MESSAGE_MAX_LEN,
};
pub use transition::{AttemptOutcome, Transition, TransitionOptions, Trigger};
pub use waiter::{
    ConditionWaiter, Wait, WaitOrigin, WaitOutcome, WaiterOptions,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_TRANSITION_TIMEOUT_MS,
};
