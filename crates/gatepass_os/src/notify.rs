#![forbid(unsafe_code)]

use gatepass_kernel_contracts::card::StudentCardRecord;
use gatepass_kernel_contracts::notify::{
    GateNotification, GateNotificationKind, MAX_NOTIFICATION_RECIPIENTS,
};
use gatepass_kernel_contracts::strike::StrikeDecision;
use gatepass_kernel_contracts::{ContractViolation, UnixTimeNs};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyDispatchError {
    #[error("notification outbox is full")]
    OutboxFull,
    #[error("notification outbox is closed")]
    OutboxClosed,
}

/// Hands a notification to whatever delivers it. Must return without waiting on delivery.
pub trait NotificationDispatch {
    fn dispatch(&self, notification: GateNotification) -> Result<(), NotifyDispatchError>;
}

impl<T> NotificationDispatch for Box<T>
where
    T: NotificationDispatch + ?Sized,
{
    fn dispatch(&self, notification: GateNotification) -> Result<(), NotifyDispatchError> {
        (**self).dispatch(notification)
    }
}

/// Drops every notification. Used when notifications are switched off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardNotificationDispatch;

impl NotificationDispatch for DiscardNotificationDispatch {
    fn dispatch(&self, _notification: GateNotification) -> Result<(), NotifyDispatchError> {
        Ok(())
    }
}

/// Student first, then the guardian when enabled. Addresses that differ only by case count once.
pub fn notification_recipients(card: &StudentCardRecord, include_guardian: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(2);
    let guardian = card
        .guardian_email
        .as_deref()
        .filter(|_| include_guardian);
    for addr in std::iter::once(card.email.as_str()).chain(guardian) {
        let addr = addr.trim();
        if addr.is_empty() || out.iter().any(|a| a.eq_ignore_ascii_case(addr)) {
            continue;
        }
        if out.len() == MAX_NOTIFICATION_RECIPIENTS {
            break;
        }
        out.push(addr.to_string());
    }
    out
}

pub fn build_gate_notification(
    card: &StudentCardRecord,
    decision: StrikeDecision,
    denial_threshold: u32,
    scanned_at: UnixTimeNs,
    include_guardian: bool,
) -> Result<GateNotification, ContractViolation> {
    GateNotification::v1(
        card.student_id.clone(),
        card.name.clone(),
        notification_recipients(card, include_guardian),
        GateNotificationKind::from(decision),
        decision.new_count(),
        denial_threshold,
        scanned_at,
    )
}
