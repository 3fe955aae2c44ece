#![forbid(unsafe_code)]

use crate::{ContractViolation, SchemaVersion, Validate};

pub const STRIKE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrikeSeverity {
    First,
    Warning,
    Critical,
}

impl StrikeSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            StrikeSeverity::First => "first",
            StrikeSeverity::Warning => "warning",
            StrikeSeverity::Critical => "critical",
        }
    }
}

/// Result of evaluating one tap against the strike policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeDecision {
    Allowed {
        severity: StrikeSeverity,
        new_count: u32,
    },
    Denied {
        new_count: u32,
    },
}

impl StrikeDecision {
    pub fn new_count(self) -> u32 {
        match self {
            StrikeDecision::Allowed { new_count, .. } | StrikeDecision::Denied { new_count } => {
                new_count
            }
        }
    }

    pub fn severity(self) -> Option<StrikeSeverity> {
        match self {
            StrikeDecision::Allowed { severity, .. } => Some(severity),
            StrikeDecision::Denied { .. } => None,
        }
    }

    pub fn is_denied(self) -> bool {
        matches!(self, StrikeDecision::Denied { .. })
    }
}

impl Validate for StrikeDecision {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.new_count() == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "strike_decision.new_count",
                reason: "must be > 0 after a processed tap",
            });
        }
        Ok(())
    }
}

/// Where a student's stored counter sits in the strike progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeState {
    Clear,
    Warned(u32),
    FinalWarning(u32),
    Blocked(u32),
}

impl StrikeState {
    pub fn from_count(count: u32, denial_threshold: u32) -> Self {
        if count == 0 {
            StrikeState::Clear
        } else if count < denial_threshold {
            StrikeState::Warned(count)
        } else if count == denial_threshold {
            StrikeState::FinalWarning(count)
        } else {
            StrikeState::Blocked(count)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrikeState::Clear => "clear",
            StrikeState::Warned(_) => "warned",
            StrikeState::FinalWarning(_) => "final_warning",
            StrikeState::Blocked(_) => "blocked",
        }
    }
}

/// Outcome of a tap as seen by the gate terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Unknown,
    Allowed {
        severity: StrikeSeverity,
        new_count: u32,
    },
    Denied {
        new_count: u32,
    },
}

impl ScanOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanOutcome::Unknown => "UNKNOWN",
            ScanOutcome::Allowed { .. } => "ALLOWED",
            ScanOutcome::Denied { .. } => "DENIED",
        }
    }

    pub fn new_count(self) -> Option<u32> {
        match self {
            ScanOutcome::Unknown => None,
            ScanOutcome::Allowed { new_count, .. } | ScanOutcome::Denied { new_count } => {
                Some(new_count)
            }
        }
    }
}

impl From<StrikeDecision> for ScanOutcome {
    fn from(d: StrikeDecision) -> Self {
        match d {
            StrikeDecision::Allowed {
                severity,
                new_count,
            } => ScanOutcome::Allowed {
                severity,
                new_count,
            },
            StrikeDecision::Denied { new_count } => ScanOutcome::Denied { new_count },
        }
    }
}
