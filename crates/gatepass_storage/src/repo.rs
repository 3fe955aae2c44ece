#![forbid(unsafe_code)]

use gatepass_kernel_contracts::card::{
    AccountStatus, RfidUid, StudentCardRecord, StudentId, ViolationEvent, ViolationResetRecord,
};
use gatepass_kernel_contracts::UnixTimeNs;

use crate::gate_store::{CardMatch, GateStore, StorageError, TapCommitResult};

/// Typed repository interface for the student card directory.
pub trait CardDirectoryRepo {
    fn insert_student_row(&mut self, record: StudentCardRecord) -> Result<(), StorageError>;
    fn set_account_status_row(
        &mut self,
        student_id: &StudentId,
        account_status: AccountStatus,
    ) -> Result<StudentCardRecord, StorageError>;
    fn bind_rfid_row(
        &mut self,
        student_id: &StudentId,
        uid: RfidUid,
    ) -> Result<StudentCardRecord, StorageError>;
    fn clear_rfid_row(&mut self, student_id: &StudentId)
        -> Result<StudentCardRecord, StorageError>;

    fn get_student_row(
        &self,
        student_id: &StudentId,
    ) -> Result<Option<StudentCardRecord>, StorageError>;
    fn find_active_card_by_uid_row(&self, uid: &RfidUid)
        -> Result<Option<CardMatch>, StorageError>;
    fn student_count(&self) -> Result<u64, StorageError>;
}

/// Typed repository interface for the append-only violation ledger and its counter.
pub trait ViolationLedgerRepo {
    /// Ledger append and counter increment as one atomic commit.
    fn record_tap_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        rfid_uid_used: &RfidUid,
    ) -> Result<TapCommitResult, StorageError>;
    fn reset_violations_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        reset_by: String,
    ) -> Result<ViolationResetRecord, StorageError>;

    fn violation_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationEvent>, StorageError>;
    fn violation_reset_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationResetRecord>, StorageError>;
    fn violation_event_count(&self) -> Result<u64, StorageError>;
}

pub trait GateRepo: CardDirectoryRepo + ViolationLedgerRepo {
    fn backend_name(&self) -> &'static str;
}

impl CardDirectoryRepo for GateStore {
    fn insert_student_row(&mut self, record: StudentCardRecord) -> Result<(), StorageError> {
        self.insert_student(record)
    }

    fn set_account_status_row(
        &mut self,
        student_id: &StudentId,
        account_status: AccountStatus,
    ) -> Result<StudentCardRecord, StorageError> {
        self.set_account_status_commit(student_id, account_status)
    }

    fn bind_rfid_row(
        &mut self,
        student_id: &StudentId,
        uid: RfidUid,
    ) -> Result<StudentCardRecord, StorageError> {
        self.bind_rfid_commit(student_id, uid)
    }

    fn clear_rfid_row(
        &mut self,
        student_id: &StudentId,
    ) -> Result<StudentCardRecord, StorageError> {
        self.clear_rfid_commit(student_id)
    }

    fn get_student_row(
        &self,
        student_id: &StudentId,
    ) -> Result<Option<StudentCardRecord>, StorageError> {
        Ok(self.get_student(student_id).cloned())
    }

    fn find_active_card_by_uid_row(
        &self,
        uid: &RfidUid,
    ) -> Result<Option<CardMatch>, StorageError> {
        Ok(self.find_active_by_uid(uid))
    }

    fn student_count(&self) -> Result<u64, StorageError> {
        Ok(self.student_rows().len() as u64)
    }
}

impl ViolationLedgerRepo for GateStore {
    fn record_tap_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        rfid_uid_used: &RfidUid,
    ) -> Result<TapCommitResult, StorageError> {
        self.record_tap_commit(now, student_id, rfid_uid_used)
    }

    fn reset_violations_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        reset_by: String,
    ) -> Result<ViolationResetRecord, StorageError> {
        self.reset_violations_commit(now, student_id, reset_by)
    }

    fn violation_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationEvent>, StorageError> {
        Ok(self
            .violation_events_for_student(student_id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn violation_reset_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationResetRecord>, StorageError> {
        Ok(self
            .violation_reset_rows()
            .iter()
            .filter(|r| &r.student_id == student_id)
            .cloned()
            .collect())
    }

    fn violation_event_count(&self) -> Result<u64, StorageError> {
        Ok(self.violation_event_rows().len() as u64)
    }
}

impl GateRepo for GateStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
