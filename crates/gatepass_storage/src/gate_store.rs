#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use gatepass_kernel_contracts::card::{
    AccountStatus, RfidUid, StudentCardRecord, StudentId, ViolationEvent, ViolationResetRecord,
};
use gatepass_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("foreign key violation on {table}: {key}")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("duplicate key on {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("tap refused for {student_id}: {reason}")]
    TapRefused {
        student_id: String,
        reason: &'static str,
    },
    #[error("contract violation: {0}")]
    ContractViolation(ContractViolation),
    #[error("storage backend error: {detail}")]
    Backend { detail: String },
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

/// Which step of the two-step lookup resolved the UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidMatch {
    Exact,
    CaseInsensitive,
}

impl UidMatch {
    pub fn as_str(self) -> &'static str {
        match self {
            UidMatch::Exact => "exact",
            UidMatch::CaseInsensitive => "case_insensitive",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardMatch {
    pub card: StudentCardRecord,
    pub uid_match: UidMatch,
}

/// Ledger row plus the counter values read back inside the same commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapCommitResult {
    pub event: ViolationEvent,
    pub previous_count: u32,
    pub new_count: u32,
}

/// In-memory card directory and violation ledger.
///
/// Every mutating method takes `&mut self` and validates everything before touching a table, so
/// a caller holding the store behind one lock gets all-or-nothing commits.
#[derive(Debug, Default)]
pub struct GateStore {
    students: BTreeMap<StudentId, StudentCardRecord>,
    rfid_index: BTreeMap<RfidUid, StudentId>,
    rfid_folded_index: BTreeMap<String, StudentId>,
    violation_events: Vec<ViolationEvent>,
    violation_resets: Vec<ViolationResetRecord>,
}

impl GateStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    pub fn insert_student(&mut self, record: StudentCardRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.students.contains_key(&record.student_id) {
            return Err(StorageError::DuplicateKey {
                table: "students.student_id",
                key: record.student_id.as_str().to_string(),
            });
        }
        if let Some(uid) = &record.rfid_uid {
            self.ensure_uid_free(uid, &record.student_id)?;
        }
        if let Some(uid) = &record.rfid_uid {
            self.index_uid(uid.clone(), record.student_id.clone());
        }
        self.students.insert(record.student_id.clone(), record);
        Ok(())
    }

    pub fn set_account_status_commit(
        &mut self,
        student_id: &StudentId,
        account_status: AccountStatus,
    ) -> Result<StudentCardRecord, StorageError> {
        let row = self.student_mut(student_id, "students.student_id")?;
        row.account_status = account_status;
        Ok(row.clone())
    }

    pub fn bind_rfid_commit(
        &mut self,
        student_id: &StudentId,
        uid: RfidUid,
    ) -> Result<StudentCardRecord, StorageError> {
        uid.validate()?;
        if !self.students.contains_key(student_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "students.student_id",
                key: student_id.as_str().to_string(),
            });
        }
        self.ensure_uid_free(&uid, student_id)?;
        self.unindex_student_uid(student_id);
        self.index_uid(uid.clone(), student_id.clone());
        let row = self.student_mut(student_id, "students.student_id")?;
        row.rfid_uid = Some(uid);
        Ok(row.clone())
    }

    pub fn clear_rfid_commit(
        &mut self,
        student_id: &StudentId,
    ) -> Result<StudentCardRecord, StorageError> {
        if !self.students.contains_key(student_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "students.student_id",
                key: student_id.as_str().to_string(),
            });
        }
        self.unindex_student_uid(student_id);
        let row = self.student_mut(student_id, "students.student_id")?;
        row.rfid_uid = None;
        Ok(row.clone())
    }

    pub fn get_student(&self, student_id: &StudentId) -> Option<&StudentCardRecord> {
        self.students.get(student_id)
    }

    pub fn student_rows(&self) -> &BTreeMap<StudentId, StudentCardRecord> {
        &self.students
    }

    /// Exact UID first, then the case-insensitive fallback. Inactive accounts never match.
    pub fn find_active_by_uid(&self, uid: &RfidUid) -> Option<CardMatch> {
        if let Some(student_id) = self.rfid_index.get(uid) {
            return self
                .students
                .get(student_id)
                .filter(|row| row.is_active())
                .map(|row| CardMatch {
                    card: row.clone(),
                    uid_match: UidMatch::Exact,
                });
        }
        let student_id = self.rfid_folded_index.get(&uid.folded())?;
        self.students
            .get(student_id)
            .filter(|row| row.is_active())
            .map(|row| CardMatch {
                card: row.clone(),
                uid_match: UidMatch::CaseInsensitive,
            })
    }

    /// Appends the ledger row and bumps the counter in one step.
    pub fn record_tap_commit(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        rfid_uid_used: &RfidUid,
    ) -> Result<TapCommitResult, StorageError> {
        let row = self
            .students
            .get(student_id)
            .ok_or(StorageError::ForeignKeyViolation {
                table: "violation_events.student_id",
                key: student_id.as_str().to_string(),
            })?;
        check_tap_target(row, rfid_uid_used)?;
        let previous_count = row.violation_count;
        let new_count = next_count(previous_count)?;
        let event_id = self.violation_events.len() as u64 + 1;
        let event = ViolationEvent::v1(
            event_id,
            student_id.clone(),
            rfid_uid_used.clone(),
            now,
        )?;

        self.violation_events.push(event.clone());
        let row = self.student_mut(student_id, "violation_events.student_id")?;
        row.violation_count = new_count;
        Ok(TapCommitResult {
            event,
            previous_count,
            new_count,
        })
    }

    pub fn reset_violations_commit(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        reset_by: String,
    ) -> Result<ViolationResetRecord, StorageError> {
        let previous_count = self
            .students
            .get(student_id)
            .ok_or(StorageError::ForeignKeyViolation {
                table: "violation_resets.student_id",
                key: student_id.as_str().to_string(),
            })?
            .violation_count;
        let record =
            ViolationResetRecord::v1(student_id.clone(), previous_count, reset_by, now)?;

        self.violation_resets.push(record.clone());
        let row = self.student_mut(student_id, "violation_resets.student_id")?;
        row.violation_count = 0;
        Ok(record)
    }

    pub fn violation_event_rows(&self) -> &[ViolationEvent] {
        &self.violation_events
    }

    pub fn violation_events_for_student(&self, student_id: &StudentId) -> Vec<&ViolationEvent> {
        self.violation_events
            .iter()
            .filter(|e| &e.student_id == student_id)
            .collect()
    }

    pub fn violation_reset_rows(&self) -> &[ViolationResetRecord] {
        &self.violation_resets
    }

    pub fn attempt_overwrite_violation_event(&mut self, _event_id: u64) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "violation_events",
        })
    }

    fn student_mut(
        &mut self,
        student_id: &StudentId,
        table: &'static str,
    ) -> Result<&mut StudentCardRecord, StorageError> {
        self.students
            .get_mut(student_id)
            .ok_or(StorageError::ForeignKeyViolation {
                table,
                key: student_id.as_str().to_string(),
            })
    }

    fn ensure_uid_free(&self, uid: &RfidUid, owner: &StudentId) -> Result<(), StorageError> {
        match self.rfid_folded_index.get(&uid.folded()) {
            Some(existing) if existing != owner => Err(StorageError::DuplicateKey {
                table: "students.rfid_uid",
                key: uid.as_str().to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn index_uid(&mut self, uid: RfidUid, student_id: StudentId) {
        self.rfid_folded_index
            .insert(uid.folded(), student_id.clone());
        self.rfid_index.insert(uid, student_id);
    }

    fn unindex_student_uid(&mut self, student_id: &StudentId) {
        let Some(old) = self
            .students
            .get(student_id)
            .and_then(|row| row.rfid_uid.clone())
        else {
            return;
        };
        self.rfid_index.remove(&old);
        self.rfid_folded_index.remove(&old.folded());
    }
}

/// A tap only counts against an active account whose bound card matches the scanned UID.
pub(crate) fn check_tap_target(
    row: &StudentCardRecord,
    rfid_uid_used: &RfidUid,
) -> Result<(), StorageError> {
    if !row.is_active() {
        return Err(StorageError::TapRefused {
            student_id: row.student_id.as_str().to_string(),
            reason: "student account is not active",
        });
    }
    let bound = row
        .rfid_uid
        .as_ref()
        .map(|uid| uid.eq_ignore_case(rfid_uid_used))
        .unwrap_or(false);
    if !bound {
        return Err(StorageError::TapRefused {
            student_id: row.student_id.as_str().to_string(),
            reason: "scanned uid is not bound to the student",
        });
    }
    Ok(())
}

pub(crate) fn next_count(previous: u32) -> Result<u32, StorageError> {
    previous.checked_add(1).ok_or(StorageError::ContractViolation(
        ContractViolation::InvalidValue {
            field: "students.violation_count",
            reason: "counter overflow",
        },
    ))
}
