#![forbid(unsafe_code)]

use std::sync::Arc;

use gatepass_engines::mail::{render_gate_notification, MailTransport};
use gatepass_kernel_contracts::notify::GateNotification;
use gatepass_os::notify::{NotificationDispatch, NotifyDispatchError};
use tokio::sync::mpsc;

/// Sending half of the bounded notification outbox. `dispatch` never waits.
#[derive(Debug, Clone)]
pub struct OutboxDispatcher {
    tx: mpsc::Sender<GateNotification>,
}

pub fn notification_outbox(
    capacity: usize,
) -> (OutboxDispatcher, mpsc::Receiver<GateNotification>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboxDispatcher { tx }, rx)
}

impl NotificationDispatch for OutboxDispatcher {
    fn dispatch(&self, notification: GateNotification) -> Result<(), NotifyDispatchError> {
        self.tx.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyDispatchError::OutboxFull,
            mpsc::error::TrySendError::Closed(_) => NotifyDispatchError::OutboxClosed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationWorkerStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Drains the outbox until every sender is gone. Delivery failures are logged and dropped.
pub async fn run_notification_worker(
    mut rx: mpsc::Receiver<GateNotification>,
    transport: Arc<dyn MailTransport>,
    from: String,
) -> NotificationWorkerStats {
    let mut stats = NotificationWorkerStats::default();
    while let Some(notification) = rx.recv().await {
        let message = render_gate_notification(&notification, &from);
        let transport_for_send = transport.clone();
        let sent = tokio::task::spawn_blocking(move || transport_for_send.send(&message)).await;
        match sent {
            Ok(Ok(())) => {
                stats.delivered += 1;
                tracing::debug!(
                    student_id = %notification.student_id.as_str(),
                    kind = notification.kind.as_str(),
                    transport = transport.name(),
                    "notification delivered"
                );
            }
            Ok(Err(err)) => {
                stats.failed += 1;
                tracing::warn!(
                    student_id = %notification.student_id.as_str(),
                    kind = notification.kind.as_str(),
                    error = %err,
                    "notification delivery failed"
                );
            }
            Err(join_err) => {
                stats.failed += 1;
                tracing::warn!(
                    student_id = %notification.student_id.as_str(),
                    error = %join_err,
                    "notification delivery task aborted"
                );
            }
        }
    }
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "notification worker stopped"
    );
    stats
}
