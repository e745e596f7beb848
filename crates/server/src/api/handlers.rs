use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use scopehub_core::{AutofocusError, SanitizedConfig, StatusSnapshot};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.status_hub().snapshot())
}

pub async fn get_metrics() -> String {
    crate::metrics::encode_metrics()
}

#[derive(Serialize)]
pub struct ControlResponse {
    pub admission_paused: bool,
}

pub async fn pause(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.manager().pause();
    Json(ControlResponse {
        admission_paused: true,
    })
}

pub async fn resume(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.manager().resume();
    Json(ControlResponse {
        admission_paused: false,
    })
}

#[derive(Serialize)]
pub struct AutofocusResponse {
    pub state: scopehub_core::AutofocusPhase,
}

pub async fn request_autofocus(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AutofocusResponse>, (StatusCode, String)> {
    match state.manager().request_autofocus() {
        Ok(phase) => Ok(Json(AutofocusResponse { state: phase })),
        Err(e @ AutofocusError::Unsupported) => {
            Err((StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
        }
    }
}

pub async fn cancel_autofocus(
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.manager().cancel_autofocus() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            "no autofocus request or run to cancel".to_string(),
        ))
    }
}

pub async fn remove_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.manager().remove_task(&task_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("task '{}' is not tracked", task_id),
        ))
    }
}
