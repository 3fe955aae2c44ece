#![forbid(unsafe_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use gatepass_kernel_contracts::notify::{GateNotification, GateNotificationKind};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{transport} delivery failed: {error_kind} (http_status={http_status:?})")]
pub struct MailDeliveryError {
    pub transport: &'static str,
    pub error_kind: &'static str,
    pub http_status: Option<u16>,
}

impl MailDeliveryError {
    pub fn new(transport: &'static str, error_kind: &'static str, http_status: Option<u16>) -> Self {
        Self {
            transport,
            error_kind,
            http_status,
        }
    }
}

/// Outbound mail delivery. Implementations may block; callers run them off the request path.
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, message: &MailMessage) -> Result<(), MailDeliveryError>;
}

pub fn render_gate_notification(n: &GateNotification, from: &str) -> MailMessage {
    let when = format_scanned_at(n.scanned_at.as_millis());
    let name = &n.student_name;
    let id = n.student_id.as_str();
    let count = n.violation_count;
    let threshold = n.denial_threshold;
    let (subject, lead) = match n.kind {
        GateNotificationKind::FirstStrike => (
            format!("Gate pass notice: RFID entry recorded for {name}"),
            format!(
                "{name} ({id}) entered campus using the RFID card instead of a physical ID. \
                 This is violation {count} of {threshold}."
            ),
        ),
        GateNotificationKind::Warning => (
            format!("Gate pass warning: violation {count} of {threshold} for {name}"),
            format!(
                "{name} ({id}) again entered campus without a physical ID. \
                 This is violation {count} of {threshold}."
            ),
        ),
        GateNotificationKind::FinalWarning => (
            format!("Gate pass final warning for {name}"),
            format!(
                "{name} ({id}) has reached violation {count} of {threshold}. \
                 The next RFID-only entry will be denied at the gate."
            ),
        ),
        GateNotificationKind::AccessDenied => (
            format!("Gate pass: entry denied for {name}"),
            format!(
                "{name} ({id}) was denied entry. The violation limit of {threshold} has been \
                 exceeded ({count} recorded). Please contact the security office."
            ),
        ),
    };
    let text = format!(
        "{lead}\n\nScanned at: {when}\n\nThis message was sent automatically by the campus gate pass system."
    );
    MailMessage {
        from: from.to_string(),
        to: n.recipients.clone(),
        subject,
        text,
    }
}

fn format_scanned_at(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("{unix_ms} ms since epoch"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMailConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub timeout_ms: u32,
    pub user_agent: String,
}

impl RelayMailConfig {
    pub fn mvp_v1(endpoint: String, bearer_token: Option<String>) -> Self {
        Self {
            endpoint,
            bearer_token,
            timeout_ms: 5_000,
            user_agent: "gatepass-mailer/0.1".to_string(),
        }
    }
}

/// Posts each message as JSON to an HTTP mail relay.
#[derive(Debug)]
pub struct RelayMailTransport {
    agent: ureq::Agent,
    config: RelayMailConfig,
}

impl RelayMailTransport {
    pub fn new(config: RelayMailConfig) -> Result<Self, String> {
        let endpoint = config.endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err("mail relay endpoint must be an http(s) url".to_string());
        }
        if config.timeout_ms == 0 {
            return Err("mail relay timeout must be > 0".to_string());
        }
        let timeout = Duration::from_millis(u64::from(config.timeout_ms).max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .user_agent(&config.user_agent)
            .build();
        Ok(Self { agent, config })
    }
}

impl MailTransport for RelayMailTransport {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn send(&self, message: &MailMessage) -> Result<(), MailDeliveryError> {
        let mut req = self
            .agent
            .post(self.config.endpoint.trim())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json");
        if let Some(token) = &self.config.bearer_token {
            req = req.set("Authorization", &format!("Bearer {token}"));
        }
        match req.send_json(message) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(MailDeliveryError::new(
                "relay",
                "http_non_2xx",
                Some(status),
            )),
            Err(ureq::Error::Transport(transport)) => {
                let combined = format!("{:?} {}", transport.kind(), transport);
                Err(MailDeliveryError::new(
                    "relay",
                    classify_transport_error_kind(&combined),
                    None,
                ))
            }
        }
    }
}

/// Used when no relay is configured: the message is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyMailTransport;

impl MailTransport for LogOnlyMailTransport {
    fn name(&self) -> &'static str {
        "log_only"
    }

    fn send(&self, message: &MailMessage) -> Result<(), MailDeliveryError> {
        tracing::info!(
            to = ?message.to,
            subject = %message.subject,
            "mail relay not configured; notification logged only"
        );
        Ok(())
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("tls") || lower.contains("ssl") {
        "tls"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}
