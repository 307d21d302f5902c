// POST service endpoints: remote commands, user scripts, power, docker and VM control

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;

use super::AppState;
use crate::error::UnraidError;
use crate::ssh::CommandOutput;
use crate::unraid_repo::{DockerAction, VmAction};

/// Upper bound for caller-supplied command timeouts.
const MAX_COMMAND_TIMEOUT_SECS: u64 = 3600;

pub(super) struct ServiceError(UnraidError);

impl From<UnraidError> for ServiceError {
    fn from(e: UnraidError) -> Self {
        ServiceError(e)
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            UnraidError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            UnraidError::NotAvailable { .. } => StatusCode::NOT_FOUND,
            UnraidError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!(error = %self.0, status = status.as_u16(), "Service call failed");
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ServiceResult = Result<Json<serde_json::Value>, ServiceError>;

fn ok() -> ServiceResult {
    Ok(Json(json!({ "success": true })))
}

fn output_json(out: CommandOutput) -> ServiceResult {
    Ok(Json(json!({
        "success": out.success(),
        "stdout": out.stdout,
        "stderr": out.stderr,
        "exit_status": out.exit_status,
    })))
}

/// Malformed JSON or missing fields are invalid input, not axum's 422.
fn request_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, UnraidError> {
    payload
        .map(|Json(req)| req)
        .map_err(|e| UnraidError::invalid(format!("invalid body: {}", e.body_text())))
}

fn command_timeout(secs: Option<u64>) -> Result<Option<Duration>, UnraidError> {
    match secs {
        None => Ok(None),
        Some(s) if (1..=MAX_COMMAND_TIMEOUT_SECS).contains(&s) => Ok(Some(Duration::from_secs(s))),
        Some(s) => Err(UnraidError::invalid(format!(
            "timeout must be between 1 and {}, got {}",
            MAX_COMMAND_TIMEOUT_SECS, s
        ))),
    }
}

/// POST /api/services/force_update
pub(super) async fn force_update(State(state): State<AppState>) -> ServiceResult {
    state.coordinator.request_update();
    ok()
}

/// POST /api/services/clear_cache
pub(super) async fn clear_cache(State(state): State<AppState>) -> ServiceResult {
    state.repo.cache().clear();
    ok()
}

#[derive(Debug, Deserialize)]
pub(super) struct ExecuteCommandRequest {
    command: String,
    timeout: Option<u64>,
}

/// POST /api/services/execute_command
pub(super) async fn execute_command(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteCommandRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    let timeout = command_timeout(req.timeout)?;
    output_json(state.repo.execute_command(&req.command, timeout).await?)
}

#[derive(Debug, Deserialize)]
pub(super) struct ContainerCommandRequest {
    container: String,
    command: String,
    #[serde(default)]
    detached: bool,
    timeout: Option<u64>,
}

/// POST /api/services/execute_in_container
pub(super) async fn execute_in_container(
    State(state): State<AppState>,
    payload: Result<Json<ContainerCommandRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    let timeout = command_timeout(req.timeout)?;
    let out = state
        .repo
        .execute_in_container(&req.container, &req.command, req.detached, timeout)
        .await?;
    output_json(out)
}

#[derive(Debug, Deserialize)]
pub(super) struct UserScriptRequest {
    script_name: String,
    #[serde(default)]
    background: bool,
}

/// POST /api/services/execute_user_script
pub(super) async fn execute_user_script(
    State(state): State<AppState>,
    payload: Result<Json<UserScriptRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    output_json(
        state
            .repo
            .execute_user_script(&req.script_name, req.background)
            .await?,
    )
}

/// POST /api/services/stop_user_script
pub(super) async fn stop_user_script(
    State(state): State<AppState>,
    payload: Result<Json<UserScriptRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    state.repo.stop_user_script(&req.script_name).await?;
    ok()
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct PowerRequest {
    #[serde(default)]
    delay: u64,
}

/// An empty body means no delay.
fn power_request(body: &[u8]) -> Result<PowerRequest, UnraidError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PowerRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| UnraidError::invalid(format!("invalid body: {}", e)))
}

/// POST /api/services/system_reboot
pub(super) async fn system_reboot(State(state): State<AppState>, body: Bytes) -> ServiceResult {
    let req = power_request(&body)?;
    state.repo.system_reboot(req.delay).await?;
    ok()
}

/// POST /api/services/system_shutdown
pub(super) async fn system_shutdown(State(state): State<AppState>, body: Bytes) -> ServiceResult {
    let req = power_request(&body)?;
    state.repo.system_shutdown(req.delay).await?;
    ok()
}

#[derive(Debug, Deserialize)]
pub(super) struct ContainerRequest {
    container: String,
}

/// POST /api/services/docker/{action}
pub(super) async fn docker_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    payload: Result<Json<ContainerRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    let action = DockerAction::parse(&action)
        .ok_or_else(|| UnraidError::invalid(format!("unknown docker action: {}", action)))?;
    state.repo.docker_control(&req.container, action).await?;
    state.coordinator.request_update();
    ok()
}

#[derive(Debug, Deserialize)]
pub(super) struct VmRequest {
    vm: String,
}

/// POST /api/services/vm/{action}
pub(super) async fn vm_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
    payload: Result<Json<VmRequest>, JsonRejection>,
) -> ServiceResult {
    let req = request_body(payload)?;
    let action = VmAction::parse(&action)
        .ok_or_else(|| UnraidError::invalid(format!("unknown vm action: {}", action)))?;
    state.repo.vm_control(&req.vm, action).await?;
    state.coordinator.request_update();
    ok()
}
