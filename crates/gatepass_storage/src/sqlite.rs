//! SQLite-backed card directory and violation ledger.
//!
//! Taps run inside a `BEGIN IMMEDIATE` transaction: the ledger insert and the
//! `violation_count = violation_count + 1` update commit together, and the write lock serializes
//! concurrent taps from any number of connections to the same database file.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use gatepass_kernel_contracts::card::{
    AccountStatus, RfidUid, StudentCardRecord, StudentId, ViolationEvent, ViolationResetRecord,
};
use gatepass_kernel_contracts::{ContractViolation, UnixTimeNs, Validate};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::gate_store::{
    check_tap_target, next_count, CardMatch, StorageError, TapCommitResult, UidMatch,
};
use crate::repo::{CardDirectoryRepo, GateRepo, ViolationLedgerRepo};

const SCHEMA_SQL: &str = include_str!("gate_schema.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const STUDENT_COLUMNS: &str =
    "student_id, rfid_uid, name, email, guardian_email, avatar_ref, violation_count, account_status";

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend {
            detail: e.to_string(),
        }
    }
}

pub struct SqliteGateStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteGateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened gate database");
        Self::initialize_connection(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::initialize_connection(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_connection(conn: &Connection) -> Result<(), StorageError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn query_student(
        conn: &Connection,
        where_clause: &str,
        key: &str,
    ) -> Result<Option<StudentCardRecord>, StorageError> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE {where_clause} LIMIT 1");
        let raw = conn
            .query_row(&sql, params![key], read_student_row)
            .optional()?;
        raw.map(StudentRow::into_record).transpose()
    }

    /// Fails a write on a UID that another student already holds (case-insensitively).
    fn ensure_uid_free(
        conn: &Connection,
        uid: &RfidUid,
        owner: &StudentId,
    ) -> Result<(), StorageError> {
        let holder: Option<String> = conn
            .query_row(
                "SELECT student_id FROM students WHERE rfid_uid = ?1 COLLATE NOCASE AND student_id <> ?2",
                params![uid.as_str(), owner.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if holder.is_some() {
            return Err(StorageError::DuplicateKey {
                table: "students.rfid_uid",
                key: uid.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn attempt_overwrite_violation_event(&mut self, event_id: u64) -> Result<(), StorageError> {
        let res = self.conn.execute(
            "UPDATE violation_events SET rfid_uid_used = rfid_uid_used WHERE event_id = ?1",
            params![to_sql_int("violation_events.event_id", event_id)?],
        );
        match res {
            Err(_) => Err(StorageError::AppendOnlyViolation {
                table: "violation_events",
            }),
            Ok(0) => Err(StorageError::ForeignKeyViolation {
                table: "violation_events.event_id",
                key: event_id.to_string(),
            }),
            Ok(_) => Err(StorageError::Backend {
                detail: "violation_events accepted an update".to_string(),
            }),
        }
    }

    fn update_student<F>(
        &mut self,
        student_id: &StudentId,
        apply: F,
    ) -> Result<StudentCardRecord, StorageError>
    where
        F: FnOnce(&Connection) -> Result<(), StorageError>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::query_student(&tx, "student_id = ?1", student_id.as_str())?.is_none() {
            return Err(StorageError::ForeignKeyViolation {
                table: "students.student_id",
                key: student_id.as_str().to_string(),
            });
        }
        apply(&tx)?;
        let row = Self::query_student(&tx, "student_id = ?1", student_id.as_str())?.ok_or(
            StorageError::ForeignKeyViolation {
                table: "students.student_id",
                key: student_id.as_str().to_string(),
            },
        )?;
        tx.commit()?;
        Ok(row)
    }
}

impl CardDirectoryRepo for SqliteGateStore {
    fn insert_student_row(&mut self, record: StudentCardRecord) -> Result<(), StorageError> {
        record.validate()?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if Self::query_student(&tx, "student_id = ?1", record.student_id.as_str())?.is_some() {
            return Err(StorageError::DuplicateKey {
                table: "students.student_id",
                key: record.student_id.as_str().to_string(),
            });
        }
        if let Some(uid) = &record.rfid_uid {
            Self::ensure_uid_free(&tx, uid, &record.student_id)?;
        }
        tx.execute(
            &format!("INSERT INTO students ({STUDENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                record.student_id.as_str(),
                record.rfid_uid.as_ref().map(RfidUid::as_str),
                record.name,
                record.email,
                record.guardian_email,
                record.avatar_ref,
                i64::from(record.violation_count),
                record.account_status.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_account_status_row(
        &mut self,
        student_id: &StudentId,
        account_status: AccountStatus,
    ) -> Result<StudentCardRecord, StorageError> {
        self.update_student(student_id, |conn| {
            conn.execute(
                "UPDATE students SET account_status = ?2 WHERE student_id = ?1",
                params![student_id.as_str(), account_status.as_str()],
            )?;
            Ok(())
        })
    }

    fn bind_rfid_row(
        &mut self,
        student_id: &StudentId,
        uid: RfidUid,
    ) -> Result<StudentCardRecord, StorageError> {
        self.update_student(student_id, |conn| {
            Self::ensure_uid_free(conn, &uid, student_id)?;
            conn.execute(
                "UPDATE students SET rfid_uid = ?2 WHERE student_id = ?1",
                params![student_id.as_str(), uid.as_str()],
            )?;
            Ok(())
        })
    }

    fn clear_rfid_row(
        &mut self,
        student_id: &StudentId,
    ) -> Result<StudentCardRecord, StorageError> {
        self.update_student(student_id, |conn| {
            conn.execute(
                "UPDATE students SET rfid_uid = NULL WHERE student_id = ?1",
                params![student_id.as_str()],
            )?;
            Ok(())
        })
    }

    fn get_student_row(
        &self,
        student_id: &StudentId,
    ) -> Result<Option<StudentCardRecord>, StorageError> {
        Self::query_student(&self.conn, "student_id = ?1", student_id.as_str())
    }

    fn find_active_card_by_uid_row(
        &self,
        uid: &RfidUid,
    ) -> Result<Option<CardMatch>, StorageError> {
        if let Some(card) = Self::query_student(&self.conn, "rfid_uid = ?1", uid.as_str())? {
            return Ok(card.is_active().then_some(CardMatch {
                card,
                uid_match: UidMatch::Exact,
            }));
        }
        let folded =
            Self::query_student(&self.conn, "rfid_uid = ?1 COLLATE NOCASE", uid.as_str())?;
        Ok(folded.filter(StudentCardRecord::is_active).map(|card| CardMatch {
            card,
            uid_match: UidMatch::CaseInsensitive,
        }))
    }

    fn student_count(&self) -> Result<u64, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        from_sql_int("students.count", n)
    }
}

impl ViolationLedgerRepo for SqliteGateStore {
    fn record_tap_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        rfid_uid_used: &RfidUid,
    ) -> Result<TapCommitResult, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row = Self::query_student(&tx, "student_id = ?1", student_id.as_str())?.ok_or(
            StorageError::ForeignKeyViolation {
                table: "violation_events.student_id",
                key: student_id.as_str().to_string(),
            },
        )?;
        check_tap_target(&row, rfid_uid_used)?;
        next_count(row.violation_count)?;
        if now.0 == 0 {
            return Err(StorageError::ContractViolation(
                ContractViolation::InvalidValue {
                    field: "violation_event.scanned_at",
                    reason: "must be > 0",
                },
            ));
        }

        tx.execute(
            "INSERT INTO violation_events (student_id, rfid_uid_used, scanned_at_ns) VALUES (?1, ?2, ?3)",
            params![
                student_id.as_str(),
                rfid_uid_used.as_str(),
                to_sql_int("violation_events.scanned_at_ns", now.0)?,
            ],
        )?;
        let event_id = from_sql_int("violation_events.event_id", tx.last_insert_rowid())?;
        let new_count: i64 = tx.query_row(
            "UPDATE students SET violation_count = violation_count + 1 WHERE student_id = ?1 RETURNING violation_count",
            params![student_id.as_str()],
            |r| r.get(0),
        )?;
        let new_count = u32::try_from(new_count).map_err(|_| StorageError::Backend {
            detail: format!("students.violation_count out of range: {new_count}"),
        })?;
        let event = ViolationEvent::v1(event_id, student_id.clone(), rfid_uid_used.clone(), now)?;
        tx.commit()?;

        Ok(TapCommitResult {
            event,
            previous_count: new_count - 1,
            new_count,
        })
    }

    fn reset_violations_commit_row(
        &mut self,
        now: UnixTimeNs,
        student_id: &StudentId,
        reset_by: String,
    ) -> Result<ViolationResetRecord, StorageError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row = Self::query_student(&tx, "student_id = ?1", student_id.as_str())?.ok_or(
            StorageError::ForeignKeyViolation {
                table: "violation_resets.student_id",
                key: student_id.as_str().to_string(),
            },
        )?;
        let record =
            ViolationResetRecord::v1(student_id.clone(), row.violation_count, reset_by, now)?;
        tx.execute(
            "INSERT INTO violation_resets (student_id, previous_count, reset_by, reset_at_ns) VALUES (?1, ?2, ?3, ?4)",
            params![
                student_id.as_str(),
                i64::from(record.previous_count),
                record.reset_by,
                to_sql_int("violation_resets.reset_at_ns", now.0)?,
            ],
        )?;
        tx.execute(
            "UPDATE students SET violation_count = 0 WHERE student_id = ?1",
            params![student_id.as_str()],
        )?;
        tx.commit()?;
        Ok(record)
    }

    fn violation_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, rfid_uid_used, scanned_at_ns FROM violation_events
             WHERE student_id = ?1 ORDER BY event_id ASC",
        )?;
        let raw = stmt
            .query_map(params![student_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(event_id, uid, scanned_at)| {
                Ok(ViolationEvent::v1(
                    from_sql_int("violation_events.event_id", event_id)?,
                    student_id.clone(),
                    RfidUid::new(uid)?,
                    UnixTimeNs(from_sql_int("violation_events.scanned_at_ns", scanned_at)?),
                )?)
            })
            .collect()
    }

    fn violation_reset_rows_for_student(
        &self,
        student_id: &StudentId,
    ) -> Result<Vec<ViolationResetRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT previous_count, reset_by, reset_at_ns FROM violation_resets
             WHERE student_id = ?1 ORDER BY reset_id ASC",
        )?;
        let raw = stmt
            .query_map(params![student_id.as_str()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(previous_count, reset_by, reset_at)| {
                let previous_count =
                    u32::try_from(previous_count).map_err(|_| StorageError::Backend {
                        detail: format!("violation_resets.previous_count out of range: {previous_count}"),
                    })?;
                Ok(ViolationResetRecord::v1(
                    student_id.clone(),
                    previous_count,
                    reset_by,
                    UnixTimeNs(from_sql_int("violation_resets.reset_at_ns", reset_at)?),
                )?)
            })
            .collect()
    }

    fn violation_event_count(&self) -> Result<u64, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM violation_events", [], |row| row.get(0))?;
        from_sql_int("violation_events.count", n)
    }
}

impl GateRepo for SqliteGateStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

struct StudentRow {
    student_id: String,
    rfid_uid: Option<String>,
    name: String,
    email: String,
    guardian_email: Option<String>,
    avatar_ref: Option<String>,
    violation_count: i64,
    account_status: String,
}

fn read_student_row(row: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        student_id: row.get(0)?,
        rfid_uid: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        guardian_email: row.get(4)?,
        avatar_ref: row.get(5)?,
        violation_count: row.get(6)?,
        account_status: row.get(7)?,
    })
}

impl StudentRow {
    fn into_record(self) -> Result<StudentCardRecord, StorageError> {
        let violation_count =
            u32::try_from(self.violation_count).map_err(|_| StorageError::Backend {
                detail: format!(
                    "students.violation_count out of range: {}",
                    self.violation_count
                ),
            })?;
        Ok(StudentCardRecord::v1(
            StudentId::new(self.student_id)?,
            self.rfid_uid.map(RfidUid::new).transpose()?,
            self.name,
            self.email,
            self.guardian_email,
            self.avatar_ref,
            violation_count,
            AccountStatus::parse(&self.account_status)?,
        )?)
    }
}

fn to_sql_int(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Backend {
        detail: format!("{field} does not fit in an SQLite integer: {v}"),
    })
}

fn from_sql_int(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Backend {
        detail: format!("{field} is negative: {v}"),
    })
}
