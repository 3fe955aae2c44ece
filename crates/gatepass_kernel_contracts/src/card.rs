#![forbid(unsafe_code)]

use crate::common::{validate_email, validate_id, validate_text};
use crate::{ContractViolation, SchemaVersion, UnixTimeNs, Validate};

pub const CARD_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for StudentId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("student_id", &self.0, 64)
    }
}

/// UID read off an RFID badge. Surrounding whitespace from the reader is stripped; case is
/// preserved so the exact-match lookup sees what the scanner sent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RfidUid(String);

impl RfidUid {
    pub fn new(uid: impl Into<String>) -> Result<Self, ContractViolation> {
        let uid = uid.into();
        let v = Self(uid.trim().to_string());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used by the case-insensitive fallback lookup.
    pub fn folded(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn eq_ignore_case(&self, other: &RfidUid) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Validate for RfidUid {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("rfid_uid", &self.0, 64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountStatus {
    PendingVerification,
    Verified,
    Rejected,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::PendingVerification => "pending_verification",
            AccountStatus::Verified => "verified",
            AccountStatus::Rejected => "rejected",
            AccountStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ContractViolation> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending_verification" | "pending" => Ok(AccountStatus::PendingVerification),
            "verified" | "approved" | "active" => Ok(AccountStatus::Verified),
            "rejected" | "denied" => Ok(AccountStatus::Rejected),
            "disabled" => Ok(AccountStatus::Disabled),
            _ => Err(ContractViolation::InvalidValue {
                field: "account_status",
                reason: "must be pending_verification, verified, rejected or disabled",
            }),
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, AccountStatus::Verified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentCardRecord {
    pub schema_version: SchemaVersion,
    pub student_id: StudentId,
    pub rfid_uid: Option<RfidUid>,
    pub name: String,
    pub email: String,
    pub guardian_email: Option<String>,
    pub avatar_ref: Option<String>,
    pub violation_count: u32,
    pub account_status: AccountStatus,
}

impl StudentCardRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        student_id: StudentId,
        rfid_uid: Option<RfidUid>,
        name: String,
        email: String,
        guardian_email: Option<String>,
        avatar_ref: Option<String>,
        violation_count: u32,
        account_status: AccountStatus,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: CARD_CONTRACT_VERSION,
            student_id,
            rfid_uid,
            name,
            email,
            guardian_email,
            avatar_ref,
            violation_count,
            account_status,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn is_active(&self) -> bool {
        self.account_status.is_active()
    }
}

impl Validate for StudentCardRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != CARD_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "student_card_record.schema_version",
                reason: "must match CARD_CONTRACT_VERSION",
            });
        }
        self.student_id.validate()?;
        if let Some(uid) = &self.rfid_uid {
            uid.validate()?;
        }
        validate_text("student_card_record.name", &self.name, 128)?;
        validate_email("student_card_record.email", &self.email)?;
        if let Some(guardian_email) = &self.guardian_email {
            validate_email("student_card_record.guardian_email", guardian_email)?;
        }
        if let Some(avatar_ref) = &self.avatar_ref {
            validate_text("student_card_record.avatar_ref", avatar_ref, 512)?;
        }
        Ok(())
    }
}

/// One processed tap. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationEvent {
    pub schema_version: SchemaVersion,
    pub event_id: u64,
    pub student_id: StudentId,
    pub rfid_uid_used: RfidUid,
    pub scanned_at: UnixTimeNs,
}

impl ViolationEvent {
    pub fn v1(
        event_id: u64,
        student_id: StudentId,
        rfid_uid_used: RfidUid,
        scanned_at: UnixTimeNs,
    ) -> Result<Self, ContractViolation> {
        let event = Self {
            schema_version: CARD_CONTRACT_VERSION,
            event_id,
            student_id,
            rfid_uid_used,
            scanned_at,
        };
        event.validate()?;
        Ok(event)
    }
}

impl Validate for ViolationEvent {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.event_id == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "violation_event.event_id",
                reason: "must be > 0",
            });
        }
        self.student_id.validate()?;
        self.rfid_uid_used.validate()?;
        if self.scanned_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "violation_event.scanned_at",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

/// Audit row written by an administrative counter reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationResetRecord {
    pub schema_version: SchemaVersion,
    pub student_id: StudentId,
    pub previous_count: u32,
    pub reset_by: String,
    pub reset_at: UnixTimeNs,
}

impl ViolationResetRecord {
    pub fn v1(
        student_id: StudentId,
        previous_count: u32,
        reset_by: String,
        reset_at: UnixTimeNs,
    ) -> Result<Self, ContractViolation> {
        let record = Self {
            schema_version: CARD_CONTRACT_VERSION,
            student_id,
            previous_count,
            reset_by,
            reset_at,
        };
        record.validate()?;
        Ok(record)
    }
}

impl Validate for ViolationResetRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.student_id.validate()?;
        validate_id("violation_reset_record.reset_by", &self.reset_by, 64)?;
        if self.reset_at.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "violation_reset_record.reset_at",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}
