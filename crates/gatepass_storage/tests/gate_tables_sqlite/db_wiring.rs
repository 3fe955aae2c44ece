#![forbid(unsafe_code)]

use gatepass_kernel_contracts::card::{AccountStatus, RfidUid, StudentCardRecord, StudentId};
use gatepass_kernel_contracts::UnixTimeNs;
use gatepass_storage::gate_store::{StorageError, UidMatch};
use gatepass_storage::repo::{CardDirectoryRepo, GateRepo, ViolationLedgerRepo};
use gatepass_storage::sqlite::SqliteGateStore;

fn sid(s: &str) -> StudentId {
    StudentId::new(s).unwrap()
}

fn uid(s: &str) -> RfidUid {
    RfidUid::new(s).unwrap()
}

fn student(id: &str, card: &str, status: AccountStatus) -> StudentCardRecord {
    StudentCardRecord::v1(
        sid(id),
        Some(uid(card)),
        format!("Student {id}"),
        format!("{id}@campus.edu"),
        None,
        None,
        0,
        status,
    )
    .unwrap()
}

#[test]
fn at_gate_sqlite_01_taps_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");
    {
        let mut s = SqliteGateStore::open(&path).unwrap();
        assert_eq!(s.backend_name(), "sqlite");
        s.insert_student_row(student("s1", "04A2B91C", AccountStatus::Verified))
            .unwrap();
        for n in 1..=3u64 {
            let out = s
                .record_tap_commit_row(UnixTimeNs(n * 10), &sid("s1"), &uid("04A2B91C"))
                .unwrap();
            assert_eq!(out.new_count as u64, n);
        }
    }
    let s = SqliteGateStore::open(&path).unwrap();
    assert_eq!(
        s.get_student_row(&sid("s1")).unwrap().unwrap().violation_count,
        3
    );
    let rows = s.violation_rows_for_student(&sid("s1")).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.windows(2).all(|w| w[0].event_id < w[1].event_id));
}

#[test]
fn at_gate_sqlite_02_independent_connections_serialize_taps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");
    {
        let mut s = SqliteGateStore::open(&path).unwrap();
        s.insert_student_row(student("s1", "AA11", AccountStatus::Verified))
            .unwrap();
    }
    std::thread::scope(|scope| {
        for t in 0..4u64 {
            let path = &path;
            scope.spawn(move || {
                let mut s = SqliteGateStore::open(path).unwrap();
                for i in 0..10u64 {
                    s.record_tap_commit_row(UnixTimeNs(1 + t * 100 + i), &sid("s1"), &uid("AA11"))
                        .unwrap();
                }
            });
        }
    });
    let s = SqliteGateStore::open(&path).unwrap();
    assert_eq!(s.violation_event_count().unwrap(), 40);
    assert_eq!(
        s.get_student_row(&sid("s1")).unwrap().unwrap().violation_count,
        40
    );
}

#[test]
fn at_gate_sqlite_03_lookup_is_exact_then_case_insensitive() {
    let mut s = SqliteGateStore::in_memory().unwrap();
    s.insert_student_row(student("s1", "04A2B91C", AccountStatus::Verified))
        .unwrap();
    s.insert_student_row(student("s2", "BB22", AccountStatus::PendingVerification))
        .unwrap();

    let exact = s.find_active_card_by_uid_row(&uid("04A2B91C")).unwrap().unwrap();
    assert_eq!(exact.uid_match, UidMatch::Exact);
    let folded = s.find_active_card_by_uid_row(&uid("04a2b91c")).unwrap().unwrap();
    assert_eq!(folded.uid_match, UidMatch::CaseInsensitive);
    assert!(s.find_active_card_by_uid_row(&uid("BB22")).unwrap().is_none());
    assert!(s.find_active_card_by_uid_row(&uid("CC33")).unwrap().is_none());
}

#[test]
fn at_gate_sqlite_04_uid_collision_ignoring_case_is_rejected() {
    let mut s = SqliteGateStore::in_memory().unwrap();
    s.insert_student_row(student("s1", "AA11", AccountStatus::Verified))
        .unwrap();
    let err = s
        .insert_student_row(student("s2", "aa11", AccountStatus::Verified))
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { .. }));

    s.insert_student_row(student("s3", "CC33", AccountStatus::Verified))
        .unwrap();
    let err = s.bind_rfid_row(&sid("s3"), uid("Aa11")).unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { .. }));
    let row = s.clear_rfid_row(&sid("s1")).unwrap();
    assert!(row.rfid_uid.is_none());
    s.bind_rfid_row(&sid("s3"), uid("Aa11")).unwrap();
}

#[test]
fn at_gate_sqlite_05_reset_keeps_ledger_and_audits() {
    let mut s = SqliteGateStore::in_memory().unwrap();
    s.insert_student_row(student("s1", "AA11", AccountStatus::Verified))
        .unwrap();
    for n in 1..=4u64 {
        s.record_tap_commit_row(UnixTimeNs(n), &sid("s1"), &uid("AA11"))
            .unwrap();
    }
    let reset = s
        .reset_violations_commit_row(UnixTimeNs(50), &sid("s1"), "guard_01".to_string())
        .unwrap();
    assert_eq!(reset.previous_count, 4);
    let next = s
        .record_tap_commit_row(UnixTimeNs(51), &sid("s1"), &uid("AA11"))
        .unwrap();
    assert_eq!(next.new_count, 1);
    assert_eq!(s.violation_rows_for_student(&sid("s1")).unwrap().len(), 5);
    let audits = s.violation_reset_rows_for_student(&sid("s1")).unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].reset_by, "guard_01");
}

#[test]
fn at_gate_sqlite_06_refused_tap_rolls_back() {
    let mut s = SqliteGateStore::in_memory().unwrap();
    s.insert_student_row(student("s1", "AA11", AccountStatus::Verified))
        .unwrap();
    s.set_account_status_row(&sid("s1"), AccountStatus::Disabled)
        .unwrap();
    assert!(matches!(
        s.record_tap_commit_row(UnixTimeNs(5), &sid("s1"), &uid("AA11")),
        Err(StorageError::TapRefused { .. })
    ));
    assert!(s
        .record_tap_commit_row(UnixTimeNs(5), &sid("ghost"), &uid("AA11"))
        .is_err());
    assert_eq!(s.violation_event_count().unwrap(), 0);
    assert_eq!(
        s.get_student_row(&sid("s1")).unwrap().unwrap().violation_count,
        0
    );
}

#[test]
fn at_gate_sqlite_07_ledger_rejects_update() {
    let mut s = SqliteGateStore::in_memory().unwrap();
    s.insert_student_row(student("s1", "AA11", AccountStatus::Verified))
        .unwrap();
    let out = s
        .record_tap_commit_row(UnixTimeNs(5), &sid("s1"), &uid("AA11"))
        .unwrap();
    assert_eq!(
        s.attempt_overwrite_violation_event(out.event.event_id),
        Err(StorageError::AppendOnlyViolation {
            table: "violation_events"
        })
    );
}
