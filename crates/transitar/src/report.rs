//! Transition Diagnostics
//!
//! The per-wait diagnostic table surfaced when a transition fails (and
//! available after success for logging). The text format is a contract:
//! humans and test logs grep it, so tags and the timing suffix are stable.
//!
//! ```text
//! Waited for these conditions:
//!     1 [ENTER ] [OK]    button "Save" visible {fulfilled after 120~170ms}
//!     2 [+ENTER] [FAIL]  rows present {unfulfilled after 5000ms}
//!         NOT_FULFILLED x37 (20~4980ms)
//! ```

use crate::result::TransitarResult;
use crate::waiter::WaitOrigin;
use serde::{Deserialize, Serialize};

// =============================================================================
// VERDICT
// =============================================================================

/// Final verdict for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Wait fulfilled
    Ok,
    /// Wait never fulfilled before the timeout
    Fail,
    /// Wait ended in an error status
    Error,
}

impl Verdict {
    /// Check whether the wait fulfilled
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Get the bracketed tag, with a `*` suffix when an error occurred
    /// somewhere along the way
    #[must_use]
    pub fn tag(&self, errored: bool) -> String {
        let base = match self {
            Self::Ok => "OK",
            Self::Fail => "FAIL",
            Self::Error => "ERR",
        };
        if errored {
            format!("[{base}*]")
        } else {
            format!("[{base}]")
        }
    }
}

// =============================================================================
// WAIT RECORD
// =============================================================================

/// Summary of one wait for the diagnostic table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitRecord {
    /// Where the wait came from (enter/exit/transition)
    pub origin: WaitOrigin,
    /// Whether the wait was materialized by a factory mid-transition
    pub delayed: bool,
    /// Final verdict
    pub verdict: Verdict,
    /// Whether any error status was recorded at any point
    pub errored: bool,
    /// Condition description
    pub description: String,
    /// Total time this wait was tracked, in milliseconds
    pub elapsed_ms: u64,
    /// Lower bound of the time-to-fulfillment bracket
    pub fulfilled_min_ms: Option<u64>,
    /// Upper bound of the time-to-fulfillment bracket
    pub fulfilled_max_ms: Option<u64>,
    /// Compressed status history lines
    pub history: Vec<String>,
    /// Whether the history is interesting enough to print
    pub show_history: bool,
}

impl WaitRecord {
    fn timing_suffix(&self) -> String {
        match (self.fulfilled_min_ms, self.fulfilled_max_ms) {
            (Some(min), Some(max)) => format!("{{fulfilled after {min}~{max}ms}}"),
            _ => format!("{{unfulfilled after {}ms}}", self.elapsed_ms),
        }
    }

    fn format_into(&self, index: usize, out: &mut String) {
        let verdict = self.verdict.tag(self.errored && self.verdict.is_ok());
        out.push_str(&format!(
            "{index:>5} {} {verdict:<7} {} {}\n",
            self.origin.tag(self.delayed),
            self.description,
            self.timing_suffix()
        ));
        if self.show_history {
            for line in &self.history {
                out.push_str("        ");
                out.push_str(line);
                out.push('\n');
            }
        }
    }
}

// =============================================================================
// TRANSITION REPORT
// =============================================================================

/// The numbered per-wait diagnostic table for one transition attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    /// Transition description
    pub description: String,
    /// One record per tracked wait, in declaration order
    pub records: Vec<WaitRecord>,
}

impl TransitionReport {
    /// Create a report
    #[must_use]
    pub fn new(description: impl Into<String>, records: Vec<WaitRecord>) -> Self {
        Self {
            description: description.into(),
            records,
        }
    }

    /// Check whether every wait fulfilled
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.records.iter().all(|record| record.verdict.is_ok())
    }

    /// Export as pretty-printed JSON
    pub fn to_json(&self) -> TransitarResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl std::fmt::Display for TransitionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::from("Waited for these conditions:\n");
        for (index, record) in self.records.iter().enumerate() {
            record.format_into(index + 1, &mut out);
        }
        f.write_str(out.trim_end_matches('\n'))
    }
}

// =============================================================================
// TESTS
// =============================================================================
