use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::invoker::{ResilienceStatus, ResilientInvoker};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub resilience: ResilienceStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ForceOpenRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub ok: bool,
    pub message: String,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            ok: true,
            message: message.into(),
        })
    }
}

pub async fn get_status(State(invoker): State<Arc<ResilientInvoker>>) -> Json<SystemStatus> {
    let resilience = invoker.resilience_status();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if resilience.is_healthy() { "operational" } else { "degraded" },
        resilience,
    })
}

pub async fn force_open(
    State(invoker): State<Arc<ResilientInvoker>>,
    Path(target): Path<String>,
    Json(body): Json<ForceOpenRequest>,
) -> Json<ActionResponse> {
    let reason = body.reason.unwrap_or_else(|| "admin request".to_string());
    invoker.force_open(&target, &reason);
    ActionResponse::ok(format!("circuit for '{target}' forced open"))
}

pub async fn reset_circuit(
    State(invoker): State<Arc<ResilientInvoker>>,
    Path(target): Path<String>,
) -> Result<Json<ActionResponse>, (StatusCode, Json<ActionResponse>)> {
    if invoker.reset_circuit(&target) {
        Ok(ActionResponse::ok(format!("circuit for '{target}' reset")))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ActionResponse {
                ok: false,
                message: format!("no circuit breaker for '{target}'"),
            }),
        ))
    }
}

pub async fn reset_stats(State(invoker): State<Arc<ResilientInvoker>>) -> Json<ActionResponse> {
    invoker.admission().reset_stats();
    ActionResponse::ok("bottleneck stats reset")
}
