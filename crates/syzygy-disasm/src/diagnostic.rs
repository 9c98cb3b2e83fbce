//! Non-fatal decomposition events, accumulated alongside a populated
//! graph/sub-graph rather than interrupting decomposition.
//!
//! Decode failures, incomplete walks, and coverage gaps are all
//! recoverable; this type gives each of them its own severity and
//! location instead of folding them into one walk-status enum.

use std::fmt;

/// How serious a `Diagnostic` is. `Warning` never changes decomposition
/// output; `Error` marks a condition serious enough that a caller
/// probably wants to fail CI on it, but that the core itself still
/// recovers from locally (e.g. by marking a block `INCOMPLETE_DISASSEMBLY`
/// rather than aborting the whole decomposition).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// One non-fatal event raised during decomposition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// The relative address most relevant to this diagnostic, if any.
    pub location: Option<u32>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, location: Option<u32>) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            location,
        }
    }

    pub fn error(message: impl Into<String>, location: Option<u32>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.location {
            Some(addr) => write!(f, "[{:?}] {:#x}: {}", self.severity, addr, self.message),
            None => write!(f, "[{:?}] {}", self.severity, self.message),
        }
    }
}
