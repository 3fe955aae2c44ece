#![forbid(unsafe_code)]

use std::sync::Mutex;

use gatepass_kernel_contracts::card::{AccountStatus, RfidUid, StudentCardRecord, StudentId};
use gatepass_kernel_contracts::UnixTimeNs;
use gatepass_storage::gate_store::{GateStore, StorageError};
use gatepass_storage::repo::{CardDirectoryRepo, ViolationLedgerRepo};

fn sid(s: &str) -> StudentId {
    StudentId::new(s).unwrap()
}

fn uid(s: &str) -> RfidUid {
    RfidUid::new(s).unwrap()
}

fn seeded_store() -> GateStore {
    let mut s = GateStore::new_in_memory();
    s.insert_student(
        StudentCardRecord::v1(
            sid("2021-00417"),
            Some(uid("04A2B91C")),
            "Ana Reyes".to_string(),
            "ana@campus.edu".to_string(),
            Some("guardian@mail.com".to_string()),
            None,
            0,
            AccountStatus::Verified,
        )
        .unwrap(),
    )
    .unwrap();
    s
}

#[test]
fn at_gate_db_01_each_tap_appends_one_row_and_bumps_counter() {
    let mut s = seeded_store();
    for n in 1..=5u64 {
        let out = s
            .record_tap_commit(UnixTimeNs(n * 1_000), &sid("2021-00417"), &uid("04A2B91C"))
            .unwrap();
        assert_eq!(out.event.event_id, n);
        assert_eq!(out.new_count as u64, n);
        assert_eq!(out.previous_count as u64, n - 1);
    }
    assert_eq!(s.violation_event_rows().len(), 5);
    assert_eq!(
        s.get_student(&sid("2021-00417")).unwrap().violation_count,
        5
    );
}

#[test]
fn at_gate_db_02_concurrent_taps_lose_no_increment() {
    let store = Mutex::new(seeded_store());
    std::thread::scope(|scope| {
        for t in 0..8u64 {
            let store = &store;
            scope.spawn(move || {
                for i in 0..25u64 {
                    let mut s = store.lock().unwrap();
                    s.record_tap_commit(
                        UnixTimeNs(1 + t * 1_000 + i),
                        &sid("2021-00417"),
                        &uid("04a2b91c"),
                    )
                    .unwrap();
                }
            });
        }
    });
    let s = store.into_inner().unwrap();
    assert_eq!(s.violation_event_rows().len(), 200);
    assert_eq!(
        s.get_student(&sid("2021-00417")).unwrap().violation_count,
        200
    );
}

#[test]
fn at_gate_db_03_unknown_uid_mutates_nothing() {
    let s = seeded_store();
    assert!(s.find_active_card_by_uid_row(&uid("FFFF0000")).unwrap().is_none());
    assert_eq!(s.violation_event_count().unwrap(), 0);
    assert_eq!(
        s.get_student(&sid("2021-00417")).unwrap().violation_count,
        0
    );
}

#[test]
fn at_gate_db_04_reset_restarts_progression_and_keeps_history() {
    let mut s = seeded_store();
    for n in 1..=4u64 {
        s.record_tap_commit(UnixTimeNs(n), &sid("2021-00417"), &uid("04A2B91C"))
            .unwrap();
    }
    let reset = s
        .reset_violations_commit(UnixTimeNs(100), &sid("2021-00417"), "guard_01".to_string())
        .unwrap();
    assert_eq!(reset.previous_count, 4);

    let next = s
        .record_tap_commit(UnixTimeNs(101), &sid("2021-00417"), &uid("04A2B91C"))
        .unwrap();
    assert_eq!(next.previous_count, 0);
    assert_eq!(next.new_count, 1);
    assert_eq!(s.violation_events_for_student(&sid("2021-00417")).len(), 5);
    assert_eq!(
        s.violation_reset_rows_for_student(&sid("2021-00417"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn at_gate_db_05_ledger_is_append_only() {
    let mut s = seeded_store();
    let out = s
        .record_tap_commit(UnixTimeNs(7), &sid("2021-00417"), &uid("04A2B91C"))
        .unwrap();
    assert!(matches!(
        s.attempt_overwrite_violation_event(out.event.event_id),
        Err(StorageError::AppendOnlyViolation { .. })
    ));
}

#[test]
fn at_gate_db_06_tap_for_unbound_uid_is_refused() {
    let mut s = seeded_store();
    let err = s
        .record_tap_commit(UnixTimeNs(7), &sid("2021-00417"), &uid("DEADBEEF"))
        .unwrap_err();
    assert!(matches!(err, StorageError::TapRefused { .. }));
    assert!(s.violation_event_rows().is_empty());

    let err = s
        .record_tap_commit(UnixTimeNs(7), &sid("nobody"), &uid("04A2B91C"))
        .unwrap_err();
    assert!(matches!(err, StorageError::ForeignKeyViolation { .. }));
}

#[test]
fn at_gate_db_07_disabling_account_hides_card() {
    let mut s = seeded_store();
    s.set_account_status_commit(&sid("2021-00417"), AccountStatus::Disabled)
        .unwrap();
    assert!(s.find_active_by_uid(&uid("04A2B91C")).is_none());
    assert!(matches!(
        s.record_tap_commit(UnixTimeNs(7), &sid("2021-00417"), &uid("04A2B91C")),
        Err(StorageError::TapRefused { .. })
    ));
}
