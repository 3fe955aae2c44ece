#![forbid(unsafe_code)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gatepass_adapter::{
    outbox::{notification_outbox, run_notification_worker},
    AdapterConfig, AdapterFailure, BoxedNotificationDispatch, GateAdapterRuntime, GateErrorResponse,
    GateScanRequest, GateScanResponse, ResetViolationsRequest,
};
use gatepass_os::notify::DiscardNotificationDispatch;
use tracing_subscriber::EnvFilter;

type SharedRuntime = Arc<Mutex<GateAdapterRuntime>>;

const LOCK_POISONED: &str = "gate runtime lock poisoned";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AdapterConfig::from_env();
    let addr: SocketAddr = config.bind.parse()?;

    let notifier: BoxedNotificationDispatch = if config.notify_enabled {
        let transport = config.mail_transport()?;
        let (dispatcher, rx) = notification_outbox(config.outbox_capacity);
        tracing::info!(
            transport = transport.name(),
            capacity = config.outbox_capacity,
            "notification worker starting"
        );
        tokio::spawn(run_notification_worker(
            rx,
            transport,
            config.mail_from.clone(),
        ));
        Box::new(dispatcher)
    } else {
        tracing::info!("notifications disabled");
        Box::new(DiscardNotificationDispatch)
    };

    let runtime: SharedRuntime = Arc::new(Mutex::new(GateAdapterRuntime::from_config(
        &config, notifier,
    )?));
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/gate/scan", post(run_scan))
        .route(
            "/v1/admin/students/:student_id/violations/reset",
            post(reset_violations),
        )
        .route("/v1/students/:student_id/violations", get(violation_history))
        .with_state(runtime);

    tracing::info!(
        %addr,
        denial_threshold = config.denial_threshold,
        notify_enabled = config.notify_enabled,
        "gatepass_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("gatepass_adapter_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn failure_response(failure: AdapterFailure) -> Response {
    let status =
        StatusCode::from_u16(failure.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(failure.into_response_body())).into_response()
}

fn lock_poisoned_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(GateErrorResponse {
            success: false,
            error: LOCK_POISONED.to_string(),
        }),
    )
        .into_response()
}

async fn healthz(State(runtime): State<SharedRuntime>) -> Response {
    let runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => return lock_poisoned_response(),
    };
    match runtime.health_report() {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(failure) => failure_response(failure),
    }
}

async fn run_scan(
    State(runtime): State<SharedRuntime>,
    payload: Result<Json<GateScanRequest>, JsonRejection>,
) -> (StatusCode, Json<GateScanResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let failure = AdapterFailure::from(rejection);
            tracing::warn!(error = %failure.reason(), "gate scan request rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(GateScanResponse::error(failure.reason().to_string())),
            );
        }
    };
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GateScanResponse::error(LOCK_POISONED.to_string())),
            )
        }
    };
    match runtime.run_scan(request, None) {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(failure) => (
            StatusCode::from_u16(failure.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(GateScanResponse::error(failure.reason().to_string())),
        ),
    }
}

async fn reset_violations(
    State(runtime): State<SharedRuntime>,
    Path(student_id): Path<String>,
    payload: Result<Json<ResetViolationsRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return failure_response(AdapterFailure::from(rejection)),
    };
    let mut runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => return lock_poisoned_response(),
    };
    match runtime.reset_violations(&student_id, request, None) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(failure) => failure_response(failure),
    }
}

async fn violation_history(
    State(runtime): State<SharedRuntime>,
    Path(student_id): Path<String>,
) -> Response {
    let runtime = match runtime.lock() {
        Ok(runtime) => runtime,
        Err(_) => return lock_poisoned_response(),
    };
    match runtime.violation_history(&student_id) {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(failure) => failure_response(failure),
    }
}
