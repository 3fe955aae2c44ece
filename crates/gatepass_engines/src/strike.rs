#![forbid(unsafe_code)]

use gatepass_kernel_contracts::strike::{StrikeDecision, StrikeSeverity, StrikeState};
use gatepass_kernel_contracts::{ContractViolation, ReasonCodeId};

pub mod reason_codes {
    use gatepass_kernel_contracts::ReasonCodeId;

    // Gate strike reason-code namespace ("GT").
    pub const GATE_STRIKE_FIRST: ReasonCodeId = ReasonCodeId(0x4754_0001);
    pub const GATE_STRIKE_WARNING: ReasonCodeId = ReasonCodeId(0x4754_0002);
    pub const GATE_STRIKE_FINAL_WARNING: ReasonCodeId = ReasonCodeId(0x4754_0003);
    pub const GATE_STRIKE_DENIED: ReasonCodeId = ReasonCodeId(0x4754_0004);
}

pub const MAX_DENIAL_THRESHOLD: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikePolicyConfig {
    /// Highest counter value that still gets through the gate.
    pub denial_threshold: u32,
}

impl StrikePolicyConfig {
    pub fn mvp_v1() -> Self {
        Self {
            denial_threshold: 3,
        }
    }
}

/// Pure strike policy. Holds no counters; callers pass the stored count in.
#[derive(Debug, Clone)]
pub struct StrikePolicyRuntime {
    config: StrikePolicyConfig,
}

impl StrikePolicyRuntime {
    pub fn new(config: StrikePolicyConfig) -> Result<Self, ContractViolation> {
        if config.denial_threshold == 0 || config.denial_threshold > MAX_DENIAL_THRESHOLD {
            return Err(ContractViolation::InvalidRange {
                field: "strike_policy_config.denial_threshold",
                min: 1.0,
                max: MAX_DENIAL_THRESHOLD as f64,
                got: config.denial_threshold as f64,
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> StrikePolicyConfig {
        self.config
    }

    pub fn denial_threshold(&self) -> u32 {
        self.config.denial_threshold
    }

    /// Transition function of the strike progression. Every call counts one tap.
    pub fn evaluate(&self, current_count: u32) -> StrikeDecision {
        let new_count = current_count.saturating_add(1);
        let threshold = self.config.denial_threshold;
        if new_count > threshold {
            return StrikeDecision::Denied { new_count };
        }
        let severity = if new_count == threshold {
            StrikeSeverity::Critical
        } else if new_count == 1 {
            StrikeSeverity::First
        } else {
            StrikeSeverity::Warning
        };
        StrikeDecision::Allowed {
            severity,
            new_count,
        }
    }

    pub fn state_for(&self, count: u32) -> StrikeState {
        StrikeState::from_count(count, self.config.denial_threshold)
    }

    pub fn reason_code_for(&self, decision: StrikeDecision) -> ReasonCodeId {
        match decision {
            StrikeDecision::Allowed {
                severity: StrikeSeverity::First,
                ..
            } => reason_codes::GATE_STRIKE_FIRST,
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Warning,
                ..
            } => reason_codes::GATE_STRIKE_WARNING,
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Critical,
                ..
            } => reason_codes::GATE_STRIKE_FINAL_WARNING,
            StrikeDecision::Denied { .. } => reason_codes::GATE_STRIKE_DENIED,
        }
    }

    pub fn severity_message(&self, decision: StrikeDecision) -> String {
        let threshold = self.config.denial_threshold;
        match decision {
            StrikeDecision::Allowed {
                severity: StrikeSeverity::First,
                new_count,
            } => format!(
                "First violation ({new_count} of {threshold}). Please bring your physical ID next time."
            ),
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Warning,
                new_count,
            } => format!(
                "Warning: violation {new_count} of {threshold}. Please bring your physical ID."
            ),
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Critical,
                new_count,
            } => format!(
                "Final warning: violation {new_count} of {threshold}. The next RFID entry will be denied."
            ),
            StrikeDecision::Denied { new_count } => format!(
                "Access denied: violation limit of {threshold} exceeded ({new_count} recorded). Please report to the security office."
            ),
        }
    }
}
