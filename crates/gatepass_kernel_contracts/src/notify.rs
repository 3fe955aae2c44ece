#![forbid(unsafe_code)]

use crate::card::StudentId;
use crate::common::{validate_email, validate_text};
use crate::strike::{StrikeDecision, StrikeSeverity};
use crate::{ContractViolation, SchemaVersion, UnixTimeNs, Validate};

pub const NOTIFY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const MAX_NOTIFICATION_RECIPIENTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateNotificationKind {
    FirstStrike,
    Warning,
    FinalWarning,
    AccessDenied,
}

impl GateNotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GateNotificationKind::FirstStrike => "FIRST_STRIKE",
            GateNotificationKind::Warning => "WARNING",
            GateNotificationKind::FinalWarning => "FINAL_WARNING",
            GateNotificationKind::AccessDenied => "ACCESS_DENIED",
        }
    }
}

impl From<StrikeDecision> for GateNotificationKind {
    fn from(d: StrikeDecision) -> Self {
        match d {
            StrikeDecision::Allowed {
                severity: StrikeSeverity::First,
                ..
            } => GateNotificationKind::FirstStrike,
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Warning,
                ..
            } => GateNotificationKind::Warning,
            StrikeDecision::Allowed {
                severity: StrikeSeverity::Critical,
                ..
            } => GateNotificationKind::FinalWarning,
            StrikeDecision::Denied { .. } => GateNotificationKind::AccessDenied,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateNotification {
    pub schema_version: SchemaVersion,
    pub student_id: StudentId,
    pub student_name: String,
    pub recipients: Vec<String>,
    pub kind: GateNotificationKind,
    pub violation_count: u32,
    pub denial_threshold: u32,
    pub scanned_at: UnixTimeNs,
}

impl GateNotification {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        student_id: StudentId,
        student_name: String,
        recipients: Vec<String>,
        kind: GateNotificationKind,
        violation_count: u32,
        denial_threshold: u32,
        scanned_at: UnixTimeNs,
    ) -> Result<Self, ContractViolation> {
        let n = Self {
            schema_version: NOTIFY_CONTRACT_VERSION,
            student_id,
            student_name,
            recipients,
            kind,
            violation_count,
            denial_threshold,
            scanned_at,
        };
        n.validate()?;
        Ok(n)
    }
}

impl Validate for GateNotification {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.student_id.validate()?;
        validate_text("gate_notification.student_name", &self.student_name, 128)?;
        if self.recipients.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gate_notification.recipients",
                reason: "must not be empty",
            });
        }
        if self.recipients.len() > MAX_NOTIFICATION_RECIPIENTS {
            return Err(ContractViolation::InvalidValue {
                field: "gate_notification.recipients",
                reason: "too many recipients",
            });
        }
        for r in &self.recipients {
            validate_email("gate_notification.recipients[]", r)?;
        }
        if self.violation_count == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "gate_notification.violation_count",
                reason: "must be > 0",
            });
        }
        if self.denial_threshold == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "gate_notification.denial_threshold",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_decision() {
        let k = |d| GateNotificationKind::from(d);
        assert_eq!(
            k(StrikeDecision::Allowed {
                severity: StrikeSeverity::First,
                new_count: 1
            }),
            GateNotificationKind::FirstStrike
        );
        assert_eq!(
            k(StrikeDecision::Allowed {
                severity: StrikeSeverity::Critical,
                new_count: 3
            }),
            GateNotificationKind::FinalWarning
        );
        assert_eq!(
            k(StrikeDecision::Denied { new_count: 7 }),
            GateNotificationKind::AccessDenied
        );
    }

    #[test]
    fn notification_requires_recipients() {
        let out = GateNotification::v1(
            StudentId::new("s1").unwrap(),
            "Ana".to_string(),
            vec![],
            GateNotificationKind::Warning,
            2,
            3,
            UnixTimeNs(1),
        );
        assert!(out.is_err());
    }
}
