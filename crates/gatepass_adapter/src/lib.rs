#![forbid(unsafe_code)]

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, SecondsFormat, Utc};
use gatepass_engines::mail::{
    LogOnlyMailTransport, MailTransport, RelayMailConfig, RelayMailTransport,
};
use gatepass_engines::strike::{StrikePolicyConfig, StrikePolicyRuntime, MAX_DENIAL_THRESHOLD};
use gatepass_kernel_contracts::strike::{ScanOutcome, StrikeDecision};
use gatepass_kernel_contracts::UnixTimeNs;
use gatepass_os::gate_session::{
    GateSessionConfig, GateSessionError, GateSessionWiring, GateTapInput,
};
use gatepass_os::notify::NotificationDispatch;
use gatepass_storage::gate_store::GateStore;
use gatepass_storage::repo::GateRepo;
use gatepass_storage::sqlite::SqliteGateStore;

pub mod outbox;
pub mod seed;

use crate::seed::SeedLoadReport;

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_MAIL_FROM: &str = "gatepass@localhost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: String,
    pub db_path: Option<PathBuf>,
    pub seed_path: Option<PathBuf>,
    pub denial_threshold: u32,
    pub notify_enabled: bool,
    pub notify_guardian: bool,
    pub outbox_capacity: usize,
    pub mail_relay_url: Option<String>,
    pub mail_relay_token: Option<String>,
    pub mail_from: String,
    pub mail_timeout_ms: u32,
}

impl AdapterConfig {
    pub fn mvp_v1() -> Self {
        Self {
            bind: DEFAULT_HTTP_BIND.to_string(),
            db_path: None,
            seed_path: None,
            denial_threshold: StrikePolicyConfig::mvp_v1().denial_threshold,
            notify_enabled: true,
            notify_guardian: true,
            outbox_capacity: 1_024,
            mail_relay_url: None,
            mail_relay_token: None,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            mail_timeout_ms: 5_000,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the `mvp_v1` defaults.
    pub fn from_env_var_map<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::mvp_v1();
        Self {
            bind: env_text(&lookup, "GATEPASS_HTTP_BIND").unwrap_or(defaults.bind),
            db_path: env_text(&lookup, "GATEPASS_DB_PATH").map(PathBuf::from),
            seed_path: env_text(&lookup, "GATEPASS_SEED_PATH").map(PathBuf::from),
            denial_threshold: env_ranged_u64(
                &lookup,
                "GATEPASS_DENIAL_THRESHOLD",
                1,
                u64::from(MAX_DENIAL_THRESHOLD),
                u64::from(defaults.denial_threshold),
            ) as u32,
            notify_enabled: env_flag(
                &lookup,
                "GATEPASS_NOTIFY_ENABLED",
                defaults.notify_enabled,
            ),
            notify_guardian: env_flag(
                &lookup,
                "GATEPASS_NOTIFY_GUARDIAN",
                defaults.notify_guardian,
            ),
            outbox_capacity: env_ranged_u64(
                &lookup,
                "GATEPASS_OUTBOX_CAPACITY",
                1,
                65_536,
                defaults.outbox_capacity as u64,
            ) as usize,
            mail_relay_url: env_text(&lookup, "GATEPASS_MAIL_RELAY_URL"),
            mail_relay_token: env_text(&lookup, "GATEPASS_MAIL_RELAY_TOKEN"),
            mail_from: env_text(&lookup, "GATEPASS_MAIL_FROM").unwrap_or(defaults.mail_from),
            mail_timeout_ms: env_ranged_u64(
                &lookup,
                "GATEPASS_MAIL_TIMEOUT_MS",
                100,
                60_000,
                u64::from(defaults.mail_timeout_ms),
            ) as u32,
        }
    }

    pub fn session_config(&self) -> GateSessionConfig {
        GateSessionConfig {
            notify_enabled: self.notify_enabled,
            notify_guardian: self.notify_guardian,
        }
    }

    pub fn strike_config(&self) -> StrikePolicyConfig {
        StrikePolicyConfig {
            denial_threshold: self.denial_threshold,
        }
    }

    /// Relay transport when a relay url is configured, log-only otherwise.
    pub fn mail_transport(&self) -> Result<Arc<dyn MailTransport>, String> {
        let Some(endpoint) = self.mail_relay_url.clone() else {
            return Ok(Arc::new(LogOnlyMailTransport));
        };
        let mut relay = RelayMailConfig::mvp_v1(endpoint, self.mail_relay_token.clone());
        relay.timeout_ms = self.mail_timeout_ms;
        Ok(Arc::new(RelayMailTransport::new(relay)?))
    }
}

fn env_text<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match env_text(lookup, key) {
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "false" | "off" | "no"
        ),
        None => default,
    }
}

fn env_ranged_u64<F>(lookup: &F, key: &str, min: u64, max: u64, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env_text(lookup, key) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(v) if (min..=max).contains(&v) => v,
        _ => {
            tracing::warn!(
                key,
                value = %raw,
                min,
                max,
                default,
                "ignoring out-of-range setting"
            );
            default
        }
    }
}

/// Error surfaced to HTTP callers, tagged with the status class it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterFailure {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl AdapterFailure {
    pub fn http_status(&self) -> u16 {
        match self {
            AdapterFailure::BadRequest(_) => 400,
            AdapterFailure::NotFound(_) => 404,
            AdapterFailure::Internal(_) => 500,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            AdapterFailure::BadRequest(r)
            | AdapterFailure::NotFound(r)
            | AdapterFailure::Internal(r) => r,
        }
    }

    pub fn into_response_body(self) -> GateErrorResponse {
        GateErrorResponse {
            success: false,
            error: self.reason().to_string(),
        }
    }
}

impl From<GateSessionError> for AdapterFailure {
    fn from(err: GateSessionError) -> Self {
        match err {
            GateSessionError::InvalidInput(v) => AdapterFailure::BadRequest(v.to_string()),
            GateSessionError::StudentNotFound(id) => {
                AdapterFailure::NotFound(format!("student not found: {id}"))
            }
            GateSessionError::Storage(_) | GateSessionError::DecisionMismatch { .. } => {
                AdapterFailure::Internal("failed to process gate request".to_string())
            }
        }
    }
}

/// Undecodable request bodies answer with the JSON error shape instead of axum's text body.
impl From<JsonRejection> for AdapterFailure {
    fn from(rejection: JsonRejection) -> Self {
        AdapterFailure::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GateErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GateScanRequest {
    pub rfid_uid: String,
    #[serde(default)]
    pub gate_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanStudentBody {
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub violation_count: u32,
    pub severity: String,
    pub severity_message: String,
    pub strike_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GateScanResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_denied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student: Option<ScanStudentBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GateScanResponse {
    pub fn error(reason: String) -> Self {
        Self {
            success: false,
            access_denied: None,
            student: None,
            message: None,
            timestamp: None,
            error: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResetViolationsRequest {
    pub reset_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResetViolationsResponse {
    pub success: bool,
    pub student_id: String,
    pub previous_count: u32,
    pub violation_count: u32,
    pub reset_by: String,
    pub reset_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ViolationEventBody {
    pub event_id: u64,
    pub rfid_uid_used: String,
    pub scanned_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ViolationResetBody {
    pub previous_count: u32,
    pub reset_by: String,
    pub reset_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ViolationHistoryResponse {
    pub success: bool,
    pub student_id: String,
    pub violation_count: u32,
    pub strike_state: String,
    pub events: Vec<ViolationEventBody>,
    pub resets: Vec<ViolationResetBody>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GateHealthResponse {
    pub status: String,
    pub store_backend: String,
    pub student_count: u64,
    pub violation_event_count: u64,
    pub notify_enabled: bool,
    pub denial_threshold: u32,
}

pub type BoxedGateRepo = Box<dyn GateRepo + Send>;
pub type BoxedNotificationDispatch = Box<dyn NotificationDispatch + Send>;

pub fn open_gate_store(config: &AdapterConfig) -> Result<BoxedGateRepo, String> {
    match &config.db_path {
        Some(path) => {
            let store = SqliteGateStore::open(path).map_err(|err| {
                format!("failed to open gate database '{}': {}", path.display(), err)
            })?;
            tracing::info!(path = %path.display(), "using sqlite gate store");
            Ok(Box::new(store))
        }
        None => {
            tracing::info!("GATEPASS_DB_PATH unset; using in-memory gate store");
            Ok(Box::new(GateStore::new_in_memory()))
        }
    }
}

pub struct GateAdapterRuntime {
    store: BoxedGateRepo,
    wiring: GateSessionWiring<StrikePolicyRuntime, BoxedNotificationDispatch>,
}

impl GateAdapterRuntime {
    pub fn new(
        config: &AdapterConfig,
        store: BoxedGateRepo,
        notifier: BoxedNotificationDispatch,
    ) -> Result<Self, String> {
        let engine = StrikePolicyRuntime::new(config.strike_config())
            .map_err(|err| format!("invalid strike policy: {err}"))?;
        Ok(Self {
            store,
            wiring: GateSessionWiring::new(config.session_config(), engine, notifier),
        })
    }

    /// Opens the configured store and applies the seed file, if any.
    pub fn from_config(
        config: &AdapterConfig,
        notifier: BoxedNotificationDispatch,
    ) -> Result<Self, String> {
        let store = open_gate_store(config)?;
        let mut runtime = Self::new(config, store, notifier)?;
        if let Some(seed_path) = &config.seed_path {
            runtime.seed_from_file(seed_path)?;
        }
        Ok(runtime)
    }

    pub fn seed_from_file(&mut self, path: &Path) -> Result<SeedLoadReport, String> {
        seed::load_seed_file(self.store.as_mut(), path)
    }

    pub fn store_mut(&mut self) -> &mut dyn GateRepo {
        self.store.as_mut()
    }

    pub fn run_scan(
        &mut self,
        request: GateScanRequest,
        now_ns: Option<u64>,
    ) -> Result<GateScanResponse, AdapterFailure> {
        let now = UnixTimeNs(now_ns.unwrap_or_else(system_time_now_ns).max(1));
        let input = GateTapInput::v1(&request.rfid_uid, now, request.gate_id)
            .map_err(|err| AdapterFailure::BadRequest(err.to_string()))?;
        let result = self.wiring.process_tap(self.store.as_mut(), &input)?;

        let Some(matched) = result.matched else {
            return Ok(GateScanResponse::error(result.message));
        };
        let denied = matches!(result.outcome, ScanOutcome::Denied { .. });
        Ok(GateScanResponse {
            success: !denied,
            access_denied: denied.then_some(true),
            student: Some(ScanStudentBody {
                student_id: matched.student.student_id.as_str().to_string(),
                name: matched.student.name,
                email: matched.student.email,
                avatar: matched.student.avatar_ref,
                violation_count: matched.decision.new_count(),
                severity: severity_label(matched.decision).to_string(),
                severity_message: matched.severity_message,
                strike_state: matched.strike_state.as_str().to_string(),
            }),
            message: Some(result.message),
            timestamp: Some(iso8601_from_ns(result.scanned_at)),
            error: None,
        })
    }

    pub fn reset_violations(
        &mut self,
        student_id: &str,
        request: ResetViolationsRequest,
        now_ns: Option<u64>,
    ) -> Result<ResetViolationsResponse, AdapterFailure> {
        let now = UnixTimeNs(now_ns.unwrap_or_else(system_time_now_ns).max(1));
        let record = self.wiring.reset_violations(
            self.store.as_mut(),
            student_id,
            request.reset_by.trim(),
            now,
        )?;
        Ok(ResetViolationsResponse {
            success: true,
            student_id: record.student_id.as_str().to_string(),
            previous_count: record.previous_count,
            violation_count: 0,
            reset_by: record.reset_by,
            reset_at: iso8601_from_ns(record.reset_at),
        })
    }

    pub fn violation_history(
        &self,
        student_id: &str,
    ) -> Result<ViolationHistoryResponse, AdapterFailure> {
        let history = self.wiring.violation_history(self.store.as_ref(), student_id)?;
        Ok(ViolationHistoryResponse {
            success: true,
            student_id: history.student.student_id.as_str().to_string(),
            violation_count: history.student.violation_count,
            strike_state: history.strike_state.as_str().to_string(),
            events: history
                .events
                .into_iter()
                .map(|e| ViolationEventBody {
                    event_id: e.event_id,
                    rfid_uid_used: e.rfid_uid_used.as_str().to_string(),
                    scanned_at: iso8601_from_ns(e.scanned_at),
                })
                .collect(),
            resets: history
                .resets
                .into_iter()
                .map(|r| ViolationResetBody {
                    previous_count: r.previous_count,
                    reset_by: r.reset_by,
                    reset_at: iso8601_from_ns(r.reset_at),
                })
                .collect(),
        })
    }

    pub fn health_report(&self) -> Result<GateHealthResponse, AdapterFailure> {
        let internal = |err: gatepass_storage::gate_store::StorageError| {
            tracing::error!(error = %err, "health probe failed");
            AdapterFailure::Internal("gate store unavailable".to_string())
        };
        Ok(GateHealthResponse {
            status: "ok".to_string(),
            store_backend: self.store.backend_name().to_string(),
            student_count: self.store.student_count().map_err(internal)?,
            violation_event_count: self.store.violation_event_count().map_err(internal)?,
            notify_enabled: self.wiring.config().notify_enabled,
            denial_threshold: self.wiring.engine().denial_threshold(),
        })
    }
}

fn severity_label(decision: StrikeDecision) -> &'static str {
    match decision.severity() {
        Some(severity) => severity.as_str(),
        None => "denied",
    }
}

fn iso8601_from_ns(t: UnixTimeNs) -> String {
    i64::try_from(t.as_millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| format!("{} ns since epoch", t.0))
}

fn system_time_now_ns() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    if nanos > u64::MAX as u128 {
        u64::MAX
    } else {
        nanos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use gatepass_kernel_contracts::card::{AccountStatus, RfidUid, StudentCardRecord, StudentId};
    use gatepass_os::notify::DiscardNotificationDispatch;

    use crate::outbox::notification_outbox;

    const T0: u64 = 1_700_000_000_000_000_000;

    fn card(id: &str, uid: &str, count: u32) -> StudentCardRecord {
        StudentCardRecord::v1(
            StudentId::new(id).unwrap(),
            Some(RfidUid::new(uid).unwrap()),
            "Ana Reyes".to_string(),
            "ana@campus.edu".to_string(),
            Some("guardian@mail.com".to_string()),
            Some("avatars/ana.png".to_string()),
            count,
            AccountStatus::Verified,
        )
        .unwrap()
    }

    fn runtime_with(count: u32) -> GateAdapterRuntime {
        let mut store = GateStore::new_in_memory();
        store.insert_student(card("2021-00417", "04A2B91C", count)).unwrap();
        let mut config = AdapterConfig::mvp_v1();
        config.notify_enabled = false;
        GateAdapterRuntime::new(&config, Box::new(store), Box::new(DiscardNotificationDispatch))
            .unwrap()
    }

    fn scan(uid: &str) -> GateScanRequest {
        GateScanRequest {
            rfid_uid: uid.to_string(),
            gate_id: Some("north_gate".to_string()),
        }
    }

    #[test]
    fn at_adapter_01_first_scan_is_first_severity() {
        let mut rt = runtime_with(0);
        let out = rt.run_scan(scan("04A2B91C"), Some(T0)).unwrap();
        assert!(out.success);
        assert_eq!(out.access_denied, None);
        let student = out.student.unwrap();
        assert_eq!(student.severity, "first");
        assert_eq!(student.violation_count, 1);
        assert_eq!(student.avatar.as_deref(), Some("avatars/ana.png"));
        assert_eq!(out.timestamp.as_deref(), Some("2023-11-14T22:13:20.000Z"));
    }

    #[test]
    fn at_adapter_02_count_two_goes_critical_and_count_three_is_denied() {
        let mut rt = runtime_with(2);
        let out = rt.run_scan(scan("04A2B91C"), Some(T0)).unwrap();
        let student = out.student.unwrap();
        assert_eq!(student.severity, "critical");
        assert_eq!(student.violation_count, 3);
        assert_eq!(student.strike_state, "final_warning");

        let out = rt.run_scan(scan("04A2B91C"), Some(T0 + 1)).unwrap();
        assert!(!out.success);
        assert_eq!(out.access_denied, Some(true));
        assert_eq!(out.student.unwrap().violation_count, 4);
    }

    #[test]
    fn at_adapter_03_unknown_card_json_shape() {
        let mut rt = runtime_with(0);
        let out = rt.run_scan(scan("DOES-NOT-EXIST"), Some(T0)).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"success": false, "error": "Unknown RFID card"})
        );
        assert_eq!(rt.health_report().unwrap().violation_event_count, 0);
    }

    #[test]
    fn at_adapter_04_blank_uid_is_bad_request() {
        let mut rt = runtime_with(0);
        let err = rt.run_scan(scan("   "), Some(T0)).unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn at_adapter_05_reset_then_scan_restarts_and_history_is_kept() {
        let mut rt = runtime_with(0);
        for i in 0..4 {
            rt.run_scan(scan("04A2B91C"), Some(T0 + i)).unwrap();
        }
        let reset = rt
            .reset_violations(
                "2021-00417",
                ResetViolationsRequest {
                    reset_by: "guard_01".to_string(),
                },
                Some(T0 + 10),
            )
            .unwrap();
        assert_eq!(reset.previous_count, 4);
        assert_eq!(reset.violation_count, 0);

        let out = rt.run_scan(scan("04A2B91C"), Some(T0 + 11)).unwrap();
        let student = out.student.unwrap();
        assert_eq!(student.severity, "first");
        assert_eq!(student.violation_count, 1);

        let history = rt.violation_history("2021-00417").unwrap();
        assert_eq!(history.events.len(), 5);
        assert_eq!(history.violation_count, 1);
        assert_eq!(history.resets.len(), 1);
        assert!(history
            .events
            .windows(2)
            .all(|w| w[0].event_id < w[1].event_id));
    }

    #[test]
    fn at_adapter_06_admin_paths_map_errors_to_status() {
        let mut rt = runtime_with(0);
        let err = rt
            .reset_violations(
                "nobody",
                ResetViolationsRequest {
                    reset_by: "guard_01".to_string(),
                },
                Some(T0),
            )
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
        let err = rt
            .reset_violations(
                "2021-00417",
                ResetViolationsRequest {
                    reset_by: "".to_string(),
                },
                Some(T0),
            )
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert_eq!(rt.violation_history("nobody").unwrap_err().http_status(), 404);
    }

    #[test]
    fn at_adapter_07_health_reports_backend_and_threshold() {
        let mut rt = runtime_with(0);
        rt.run_scan(scan("04A2B91C"), Some(T0)).unwrap();
        let health = rt.health_report().unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.store_backend, "memory");
        assert_eq!(health.student_count, 1);
        assert_eq!(health.violation_event_count, 1);
        assert_eq!(health.denial_threshold, 3);
        assert!(!health.notify_enabled);
    }

    #[test]
    fn at_adapter_08_config_parses_env_with_fallbacks() {
        let mut vars = BTreeMap::new();
        vars.insert("GATEPASS_DENIAL_THRESHOLD", "5");
        vars.insert("GATEPASS_NOTIFY_GUARDIAN", "off");
        vars.insert("GATEPASS_OUTBOX_CAPACITY", "0");
        vars.insert("GATEPASS_MAIL_TIMEOUT_MS", "abc");
        vars.insert("GATEPASS_DB_PATH", "  ");
        let config = AdapterConfig::from_env_var_map(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.denial_threshold, 5);
        assert!(!config.notify_guardian);
        assert!(config.notify_enabled);
        assert_eq!(config.outbox_capacity, 1_024);
        assert_eq!(config.mail_timeout_ms, 5_000);
        assert_eq!(config.db_path, None);
        assert_eq!(config.bind, DEFAULT_HTTP_BIND);

        vars.insert("GATEPASS_DENIAL_THRESHOLD", "101");
        let config = AdapterConfig::from_env_var_map(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.denial_threshold, 3);
    }

    #[test]
    fn at_adapter_09_scan_hands_notification_to_outbox() {
        let (dispatcher, mut rx) = notification_outbox(4);
        let mut store = GateStore::new_in_memory();
        store.insert_student(card("2021-00417", "04A2B91C", 0)).unwrap();
        let mut rt =
            GateAdapterRuntime::new(&AdapterConfig::mvp_v1(), Box::new(store), Box::new(dispatcher))
                .unwrap();
        rt.run_scan(scan("04A2B91C"), Some(T0)).unwrap();
        rt.run_scan(scan("DOES-NOT-EXIST"), Some(T0)).unwrap();

        let n = rx.try_recv().unwrap();
        assert_eq!(n.violation_count, 1);
        assert_eq!(
            n.recipients,
            vec!["ana@campus.edu".to_string(), "guardian@mail.com".to_string()]
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn at_adapter_10_sqlite_backed_runtime_persists_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AdapterConfig::mvp_v1();
        config.notify_enabled = false;
        config.db_path = Some(dir.path().join("gate.db"));
        {
            let mut rt =
                GateAdapterRuntime::from_config(&config, Box::new(DiscardNotificationDispatch))
                    .unwrap();
            rt.store_mut()
                .insert_student_row(card("2021-00417", "04A2B91C", 0))
                .unwrap();
            rt.run_scan(scan("04A2B91C"), Some(T0)).unwrap();
        }
        let mut rt =
            GateAdapterRuntime::from_config(&config, Box::new(DiscardNotificationDispatch))
                .unwrap();
        assert_eq!(rt.health_report().unwrap().store_backend, "sqlite");
        let out = rt.run_scan(scan("04a2b91c"), Some(T0 + 1)).unwrap();
        assert_eq!(out.student.unwrap().severity, "warning");
    }

    #[test]
    fn at_adapter_11_unusable_scanner_text_gets_unknown_card_body() {
        let mut rt = runtime_with(0);
        let long_uid = "A".repeat(65);
        for raw in ["04 A2 B9 1C", "\u{c4}\u{d6}12", long_uid.as_str()] {
            let out = rt.run_scan(scan(raw), Some(T0)).unwrap();
            let body = serde_json::to_value(&out).unwrap();
            assert_eq!(
                body,
                serde_json::json!({"success": false, "error": "Unknown RFID card"})
            );
        }
        let health = rt.health_report().unwrap();
        assert_eq!(health.violation_event_count, 0);
        let out = rt.run_scan(scan("04A2B91C"), Some(T0 + 1)).unwrap();
        assert_eq!(out.student.unwrap().violation_count, 1);
        assert!(matches!(
            rt.run_scan(scan("  "), Some(T0)),
            Err(AdapterFailure::BadRequest(_))
        ));
    }

    async fn scan_body_rejection(request: axum::http::Request<axum::body::Body>) -> JsonRejection {
        use axum::extract::FromRequest;
        axum::Json::<GateScanRequest>::from_request(request, &())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn at_adapter_12_undecodable_bodies_map_to_json_bad_request() {
        let missing_uid = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/gate/scan")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"gate_id": "north_gate"}"#))
            .unwrap();
        let truncated = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/gate/scan")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{"))
            .unwrap();
        let no_content_type = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/gate/scan")
            .body(axum::body::Body::from(r#"{"rfid_uid": "04A2B91C"}"#))
            .unwrap();

        for request in [missing_uid, truncated, no_content_type] {
            let failure = AdapterFailure::from(scan_body_rejection(request).await);
            assert_eq!(failure.http_status(), 400);
            let body = serde_json::to_value(failure.into_response_body()).unwrap();
            assert_eq!(body["success"], serde_json::json!(false));
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("invalid request body: "));
        }
    }
}
