#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use gatepass_kernel_contracts::card::{AccountStatus, RfidUid, StudentCardRecord, StudentId};
use gatepass_storage::gate_store::StorageError;
use gatepass_storage::repo::GateRepo;

/// One entry of the startup seed file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SeedStudent {
    pub student_id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub guardian_email: Option<String>,
    #[serde(default)]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub rfid_uid: Option<String>,
    #[serde(default)]
    pub account_status: Option<String>,
    #[serde(default)]
    pub violation_count: Option<u32>,
}

impl SeedStudent {
    pub fn into_record(self) -> Result<StudentCardRecord, String> {
        let account_status = match self.account_status.as_deref() {
            Some(raw) => AccountStatus::parse(raw)
                .map_err(|err| format!("student '{}': {err}", self.student_id))?,
            None => AccountStatus::Verified,
        };
        let rfid_uid = self
            .rfid_uid
            .map(RfidUid::new)
            .transpose()
            .map_err(|err| format!("student '{}': {err}", self.student_id))?;
        let student_id = StudentId::new(self.student_id.clone())
            .map_err(|err| format!("invalid seed student: {err}"))?;
        StudentCardRecord::v1(
            student_id,
            rfid_uid,
            self.name,
            self.email,
            self.guardian_email,
            self.avatar_ref,
            self.violation_count.unwrap_or(0),
            account_status,
        )
        .map_err(|err| format!("student '{}': {err}", self.student_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedLoadReport {
    pub inserted: u32,
    pub skipped_duplicates: u32,
}

pub fn parse_seed_students(json: &str) -> Result<Vec<SeedStudent>, String> {
    serde_json::from_str(json).map_err(|err| format!("invalid seed json: {err}"))
}

pub fn load_seed_file<R>(store: &mut R, path: &Path) -> Result<SeedLoadReport, String>
where
    R: GateRepo + ?Sized,
{
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read seed file '{}': {}", path.display(), err))?;
    let students = parse_seed_students(&raw)?;
    seed_students(store, students)
}

/// Inserts every seed row. Rows that collide with an existing student id or card are skipped.
pub fn seed_students<R>(
    store: &mut R,
    students: Vec<SeedStudent>,
) -> Result<SeedLoadReport, String>
where
    R: GateRepo + ?Sized,
{
    let mut report = SeedLoadReport::default();
    for student in students {
        let record = student.into_record()?;
        let student_id = record.student_id.as_str().to_string();
        match store.insert_student_row(record) {
            Ok(()) => report.inserted += 1,
            Err(StorageError::DuplicateKey { table, key }) => {
                report.skipped_duplicates += 1;
                tracing::warn!(
                    student_id = %student_id,
                    table,
                    key = %key,
                    "seed row skipped as duplicate"
                );
            }
            Err(err) => return Err(format!("failed to seed student '{student_id}': {err}")),
        }
    }
    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped_duplicates,
        "seed students loaded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatepass_storage::gate_store::GateStore;
    use gatepass_storage::repo::CardDirectoryRepo;

    const SEED: &str = r#"[
        {"student_id": "2021-00417", "name": "Ana Reyes", "email": "ana@campus.edu",
         "guardian_email": "guardian@mail.com", "rfid_uid": "04A2B91C"},
        {"student_id": "2021-00418", "name": "Ben Cruz", "email": "ben@campus.edu",
         "rfid_uid": "04A2B91D", "account_status": "pending", "violation_count": 2},
        {"student_id": "2021-00419", "name": "Dup Card", "email": "dup@campus.edu",
         "rfid_uid": "04a2b91c"}
    ]"#;

    #[test]
    fn at_seed_01_defaults_and_duplicates() {
        let mut store = GateStore::new_in_memory();
        let report = seed_students(&mut store, parse_seed_students(SEED).unwrap()).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped_duplicates, 1);

        let ana = store
            .get_student_row(&StudentId::new("2021-00417").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(ana.account_status, AccountStatus::Verified);
        assert_eq!(ana.violation_count, 0);

        let ben = store
            .get_student_row(&StudentId::new("2021-00418").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(ben.account_status, AccountStatus::PendingVerification);
        assert_eq!(ben.violation_count, 2);
    }

    #[test]
    fn at_seed_02_invalid_rows_fail_the_load() {
        let bad = r#"[{"student_id": "s1", "name": "X", "email": "not-an-email"}]"#;
        let mut store = GateStore::new_in_memory();
        assert!(seed_students(&mut store, parse_seed_students(bad).unwrap()).is_err());
        assert!(parse_seed_students("{").is_err());
    }

    #[test]
    fn at_seed_03_reads_seed_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.json");
        std::fs::write(&path, SEED).unwrap();
        let mut store = GateStore::new_in_memory();
        let report = load_seed_file(&mut store, &path).unwrap();
        assert_eq!(report.inserted, 2);
        assert!(load_seed_file(&mut store, &dir.path().join("missing.json")).is_err());
    }
}
