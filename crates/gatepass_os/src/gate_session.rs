#![forbid(unsafe_code)]

use gatepass_engines::strike::StrikePolicyRuntime;
use gatepass_kernel_contracts::card::{
    RfidUid, StudentCardRecord, StudentId, ViolationEvent, ViolationResetRecord,
};
use gatepass_kernel_contracts::strike::{ScanOutcome, StrikeDecision, StrikeState};
use gatepass_kernel_contracts::{ContractViolation, ReasonCodeId, UnixTimeNs, Validate};
use gatepass_storage::gate_store::{StorageError, UidMatch};
use gatepass_storage::repo::GateRepo;

use crate::notify::{build_gate_notification, NotificationDispatch};

pub mod reason_codes {
    use gatepass_kernel_contracts::ReasonCodeId;

    // Gate session wiring reason-code namespace ("GS").
    pub const GATE_SESSION_UNKNOWN_CARD: ReasonCodeId = ReasonCodeId(0x4753_0101);
}

pub const UNKNOWN_CARD_MESSAGE: &str = "Unknown RFID card";

#[derive(Debug, thiserror::Error)]
pub enum GateSessionError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ContractViolation),
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("strike decision drifted from stored counter (decided {decided}, stored {stored})")]
    DecisionMismatch { decided: u32, stored: u32 },
}

pub trait StrikeEngine {
    fn denial_threshold(&self) -> u32;
    fn evaluate(&self, current_count: u32) -> StrikeDecision;
    fn reason_code_for(&self, decision: StrikeDecision) -> ReasonCodeId;
    fn severity_message(&self, decision: StrikeDecision) -> String;
}

impl StrikeEngine for StrikePolicyRuntime {
    fn denial_threshold(&self) -> u32 {
        StrikePolicyRuntime::denial_threshold(self)
    }

    fn evaluate(&self, current_count: u32) -> StrikeDecision {
        StrikePolicyRuntime::evaluate(self, current_count)
    }

    fn reason_code_for(&self, decision: StrikeDecision) -> ReasonCodeId {
        StrikePolicyRuntime::reason_code_for(self, decision)
    }

    fn severity_message(&self, decision: StrikeDecision) -> String {
        StrikePolicyRuntime::severity_message(self, decision)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSessionConfig {
    pub notify_enabled: bool,
    pub notify_guardian: bool,
}

impl GateSessionConfig {
    pub fn mvp_v1(notify_enabled: bool) -> Self {
        Self {
            notify_enabled,
            notify_guardian: true,
        }
    }
}

const MAX_LOGGED_UID_CHARS: usize = 64;

/// One scanner read. Only an empty read is an input error; a read that can never be a card UID
/// keeps `rfid_uid` empty and resolves to the unknown-card outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateTapInput {
    pub scanned_uid: String,
    pub rfid_uid: Option<RfidUid>,
    pub now: UnixTimeNs,
    pub gate_id: Option<String>,
}

impl GateTapInput {
    pub fn v1(
        rfid_uid: &str,
        now: UnixTimeNs,
        gate_id: Option<String>,
    ) -> Result<Self, ContractViolation> {
        let scanned_uid = rfid_uid.trim().to_string();
        let input = Self {
            rfid_uid: RfidUid::new(scanned_uid.as_str()).ok(),
            scanned_uid,
            now,
            gate_id,
        };
        input.validate()?;
        Ok(input)
    }

    /// Scanned text clipped for log fields.
    pub fn logged_uid(&self) -> &str {
        match self.scanned_uid.char_indices().nth(MAX_LOGGED_UID_CHARS) {
            Some((end, _)) => &self.scanned_uid[..end],
            None => &self.scanned_uid,
        }
    }
}

impl Validate for GateTapInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.scanned_uid.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gate_tap_input.rfid_uid",
                reason: "must not be empty",
            });
        }
        if let Some(uid) = &self.rfid_uid {
            uid.validate()?;
        }
        if self.now.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "gate_tap_input.now",
                reason: "must be > 0",
            });
        }
        if let Some(gate_id) = &self.gate_id {
            if gate_id.is_empty() || gate_id.len() > 64 {
                return Err(ContractViolation::InvalidValue {
                    field: "gate_tap_input.gate_id",
                    reason: "must be 1..=64 bytes",
                });
            }
            if !gate_id.chars().all(|c| c.is_ascii_graphic()) {
                return Err(ContractViolation::InvalidValue {
                    field: "gate_tap_input.gate_id",
                    reason: "must be printable ASCII without spaces",
                });
            }
        }
        Ok(())
    }
}

/// Display fields shown on the gate terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentView {
    pub student_id: StudentId,
    pub name: String,
    pub email: String,
    pub avatar_ref: Option<String>,
}

impl From<&StudentCardRecord> for StudentView {
    fn from(card: &StudentCardRecord) -> Self {
        Self {
            student_id: card.student_id.clone(),
            name: card.name.clone(),
            email: card.email.clone(),
            avatar_ref: card.avatar_ref.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTap {
    pub student: StudentView,
    pub decision: StrikeDecision,
    pub severity_message: String,
    pub strike_state: StrikeState,
    pub event_id: u64,
    pub uid_match: UidMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub outcome: ScanOutcome,
    pub matched: Option<MatchedTap>,
    pub message: String,
    pub reason_code: ReasonCodeId,
    pub scanned_at: UnixTimeNs,
}

impl ScanResult {
    pub fn is_denied(&self) -> bool {
        matches!(self.outcome, ScanOutcome::Denied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationHistory {
    pub student: StudentCardRecord,
    pub strike_state: StrikeState,
    pub events: Vec<ViolationEvent>,
    pub resets: Vec<ViolationResetRecord>,
}

#[derive(Debug, Clone)]
pub struct GateSessionWiring<E, N>
where
    E: StrikeEngine,
    N: NotificationDispatch,
{
    config: GateSessionConfig,
    engine: E,
    notifier: N,
}

impl<E, N> GateSessionWiring<E, N>
where
    E: StrikeEngine,
    N: NotificationDispatch,
{
    pub fn new(config: GateSessionConfig, engine: E, notifier: N) -> Self {
        Self {
            config,
            engine,
            notifier,
        }
    }

    pub fn config(&self) -> GateSessionConfig {
        self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Lookup, atomic ledger append and counter increment, decision, notification hand-off.
    ///
    /// A storage failure aborts the tap before anything is notified. A dispatch failure is logged
    /// and never changes the result.
    pub fn process_tap<R>(
        &self,
        store: &mut R,
        input: &GateTapInput,
    ) -> Result<ScanResult, GateSessionError>
    where
        R: GateRepo + ?Sized,
    {
        input.validate()?;
        let gate_id = input.gate_id.as_deref().unwrap_or("-");

        let Some(rfid_uid) = input.rfid_uid.as_ref() else {
            return Ok(self.unknown_card(input, "scanned uid is not a card uid"));
        };
        let found = store.find_active_card_by_uid_row(rfid_uid).map_err(|e| {
            tracing::error!(
                rfid_uid = %input.logged_uid(),
                gate_id,
                error = %e,
                "card lookup failed"
            );
            e
        })?;
        let Some(card_match) = found else {
            return Ok(self.unknown_card(input, "no active card bound"));
        };
        let card = card_match.card;

        let commit = match store.record_tap_commit_row(input.now, &card.student_id, rfid_uid) {
            Ok(commit) => commit,
            // Card unbound or account deactivated after the lookup.
            Err(StorageError::TapRefused { reason, .. }) => {
                return Ok(self.unknown_card(input, reason));
            }
            Err(e) => {
                tracing::error!(
                    student_id = %card.student_id.as_str(),
                    gate_id,
                    error = %e,
                    "violation commit failed; tap not counted"
                );
                return Err(e.into());
            }
        };

        let decision = self.engine.evaluate(commit.previous_count);
        if decision.new_count() != commit.new_count {
            tracing::error!(
                student_id = %card.student_id.as_str(),
                decided = decision.new_count(),
                stored = commit.new_count,
                "strike decision does not match stored counter"
            );
            return Err(GateSessionError::DecisionMismatch {
                decided: decision.new_count(),
                stored: commit.new_count,
            });
        }

        let outcome = ScanOutcome::from(decision);
        let severity_message = self.engine.severity_message(decision);
        if decision.is_denied() {
            tracing::warn!(
                student_id = %card.student_id.as_str(),
                gate_id,
                violation_count = commit.new_count,
                outcome = outcome.as_str(),
                "rfid entry denied"
            );
        } else {
            tracing::info!(
                student_id = %card.student_id.as_str(),
                gate_id,
                violation_count = commit.new_count,
                uid_match = card_match.uid_match.as_str(),
                outcome = outcome.as_str(),
                "rfid entry recorded"
            );
        }

        if self.config.notify_enabled {
            self.hand_off_notification(&card, decision, input.now);
        }

        let message = if decision.is_denied() {
            format!("{}: {}", card.name, severity_message)
        } else {
            format!("Entry recorded for {}. {}", card.name, severity_message)
        };
        Ok(ScanResult {
            outcome,
            matched: Some(MatchedTap {
                student: StudentView::from(&card),
                decision,
                severity_message,
                strike_state: StrikeState::from_count(
                    commit.new_count,
                    self.engine.denial_threshold(),
                ),
                event_id: commit.event.event_id,
                uid_match: card_match.uid_match,
            }),
            message,
            reason_code: self.engine.reason_code_for(decision),
            scanned_at: input.now,
        })
    }

    fn unknown_card(&self, input: &GateTapInput, detail: &str) -> ScanResult {
        tracing::warn!(
            rfid_uid = %input.logged_uid(),
            gate_id = input.gate_id.as_deref().unwrap_or("-"),
            outcome = ScanOutcome::Unknown.as_str(),
            detail,
            "unknown rfid card"
        );
        ScanResult {
            outcome: ScanOutcome::Unknown,
            matched: None,
            message: UNKNOWN_CARD_MESSAGE.to_string(),
            reason_code: reason_codes::GATE_SESSION_UNKNOWN_CARD,
            scanned_at: input.now,
        }
    }

    fn hand_off_notification(
        &self,
        card: &StudentCardRecord,
        decision: StrikeDecision,
        now: UnixTimeNs,
    ) {
        let notification = match build_gate_notification(
            card,
            decision,
            self.engine.denial_threshold(),
            now,
            self.config.notify_guardian,
        ) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(
                    student_id = %card.student_id.as_str(),
                    error = %e,
                    "notification not built"
                );
                return;
            }
        };
        if let Err(e) = self.notifier.dispatch(notification) {
            tracing::warn!(
                student_id = %card.student_id.as_str(),
                error = %e,
                "notification dispatch failed"
            );
        }
    }

    /// Administrative counter reset. The ledger keeps every row; an audit row records the reset.
    pub fn reset_violations<R>(
        &self,
        store: &mut R,
        student_id: &str,
        reset_by: &str,
        now: UnixTimeNs,
    ) -> Result<ViolationResetRecord, GateSessionError>
    where
        R: GateRepo + ?Sized,
    {
        let student_id = StudentId::new(student_id)?;
        // Malformed actor ids are input errors, not storage errors.
        ViolationResetRecord::v1(student_id.clone(), 0, reset_by.to_string(), now)?;
        if store.get_student_row(&student_id)?.is_none() {
            return Err(GateSessionError::StudentNotFound(student_id.as_str().to_string()));
        }
        let record = store.reset_violations_commit_row(now, &student_id, reset_by.to_string())?;
        tracing::info!(
            student_id = %student_id.as_str(),
            previous_count = record.previous_count,
            reset_by = %record.reset_by,
            "violation counter reset"
        );
        Ok(record)
    }

    pub fn violation_history<R>(
        &self,
        store: &R,
        student_id: &str,
    ) -> Result<ViolationHistory, GateSessionError>
    where
        R: GateRepo + ?Sized,
    {
        let student_id = StudentId::new(student_id)?;
        let student = store
            .get_student_row(&student_id)?
            .ok_or_else(|| GateSessionError::StudentNotFound(student_id.as_str().to_string()))?;
        let events = store.violation_rows_for_student(&student_id)?;
        let resets = store.violation_reset_rows_for_student(&student_id)?;
        Ok(ViolationHistory {
            strike_state: StrikeState::from_count(
                student.violation_count,
                self.engine.denial_threshold(),
            ),
            student,
            events,
            resets,
        })
    }
}
