//! Condition Status and Status History
//!
//! One `Status` is the immutable result of a single condition check. A
//! `StatusHistory` compresses the time series of statuses observed for one
//! wait into contiguous equal-value regions for diagnostics.
//!
//! ## Toyota Way Application
//!
//! - **Genchi Genbutsu**: the history shows what the condition actually
//!   reported, round by round
//! - **Muda**: region compression keeps long waits readable

use serde::{Deserialize, Serialize};
use std::time::Instant;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Maximum length of a status message before truncation
pub const STATUS_MESSAGE_MAX_LEN: usize = 200;

// =============================================================================
// STATUS KIND
// =============================================================================

/// Kind of a condition check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    /// Condition holds
    Fulfilled,
    /// Condition does not hold yet; normal while waiting
    NotFulfilled,
    /// The check itself faulted or detected an invariant violation
    Error,
    /// A dependency gate is not yet satisfiable; the check was skipped
    Awaiting,
}

impl StatusKind {
    /// Get the diagnostic name for this kind
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fulfilled => "FULFILLED",
            Self::NotFulfilled => "NOT_FULFILLED",
            Self::Error => "ERROR",
            Self::Awaiting => "AWAITING",
        }
    }

    /// Check if this kind is fulfilled
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled)
    }

    /// Check if this kind is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Immutable result of one condition check
#[derive(Debug, Clone)]
pub struct Status {
    kind: StatusKind,
    message: Option<String>,
    at: Instant,
}

impl Status {
    /// Create a fulfilled status
    #[must_use]
    pub fn fulfilled() -> Self {
        Self::new(StatusKind::Fulfilled, None)
    }

    /// Create a not-fulfilled status
    #[must_use]
    pub fn not_fulfilled() -> Self {
        Self::new(StatusKind::NotFulfilled, None)
    }

    /// Create an awaiting status with a message naming the missing inputs
    #[must_use]
    pub fn awaiting(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Awaiting, Some(message.into()))
    }

    /// Create an error status
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, Some(message.into()))
    }

    /// Attach or replace the message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(truncate(message.into()));
        self
    }

    fn new(kind: StatusKind, message: Option<String>) -> Self {
        Self {
            kind,
            message: message.map(truncate),
            at: Instant::now(),
        }
    }

    /// Get the status kind
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        self.kind
    }

    /// Get the message, if any
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Get the instant this status was produced
    #[must_use]
    pub const fn at(&self) -> Instant {
        self.at
    }

    /// Check if the status is fulfilled
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        self.kind.is_fulfilled()
    }

    /// Check if the status is an error
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.kind.is_error()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} ({msg})", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > STATUS_MESSAGE_MAX_LEN {
        let mut cut = STATUS_MESSAGE_MAX_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    message
}

// =============================================================================
// STATUS HISTORY
// =============================================================================

/// One contiguous run of equal statuses
#[derive(Debug, Clone)]
pub struct StatusRegion {
    kind: StatusKind,
    message: Option<String>,
    count: usize,
    first_at: Instant,
    last_at: Instant,
}

impl StatusRegion {
    /// Get the kind shared by every status in this region
    #[must_use]
    pub const fn kind(&self) -> StatusKind {
        self.kind
    }

    /// Get the message shared by every status in this region
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Number of statuses compressed into this region
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Instant of the first status in this region
    #[must_use]
    pub const fn first_at(&self) -> Instant {
        self.first_at
    }

    /// Instant of the last status in this region
    #[must_use]
    pub const fn last_at(&self) -> Instant {
        self.last_at
    }
}

/// Compresses a time series of statuses into contiguous equal-value regions
#[derive(Debug, Clone, Default)]
pub struct StatusHistory {
    regions: Vec<StatusRegion>,
    recorded: usize,
}

impl StatusHistory {
    /// Create an empty history
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one status, extending the last region when kind and message
    /// are unchanged
    pub fn record(&mut self, status: &Status) {
        self.recorded += 1;
        if let Some(last) = self.regions.last_mut() {
            if last.kind == status.kind() && last.message.as_deref() == status.message() {
                last.count += 1;
                last.last_at = status.at();
                return;
            }
        }
        self.regions.push(StatusRegion {
            kind: status.kind(),
            message: status.message().map(String::from),
            count: 1,
            first_at: status.at(),
            last_at: status.at(),
        });
    }

    /// Get the compressed regions
    #[must_use]
    pub fn regions(&self) -> &[StatusRegion] {
        &self.regions
    }

    /// Number of distinct regions
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Total number of statuses recorded
    #[must_use]
    pub const fn recorded(&self) -> usize {
        self.recorded
    }

    /// Check whether any error status was ever recorded
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.regions.iter().any(|r| r.kind.is_error())
    }

    /// Check whether any status carried a message
    #[must_use]
    pub fn has_messages(&self) -> bool {
        self.regions.iter().any(|r| r.message.is_some())
    }

    /// Kind of the most recent status, if any
    #[must_use]
    pub fn last_kind(&self) -> Option<StatusKind> {
        self.regions.last().map(|r| r.kind)
    }

    /// Format the regions as diagnostic lines, timed relative to `origin`
    #[must_use]
    pub fn format_lines(&self, origin: Instant) -> Vec<String> {
        self.regions
            .iter()
            .map(|region| {
                let first = region.first_at.saturating_duration_since(origin).as_millis();
                let last = region.last_at.saturating_duration_since(origin).as_millis();
                let mut line =
                    format!("{} x{} ({first}~{last}ms)", region.kind, region.count);
                if let Some(msg) = &region.message {
                    line.push_str(": ");
                    line.push_str(msg);
                }
                line
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
