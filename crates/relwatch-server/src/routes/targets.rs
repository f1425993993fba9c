use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use relwatch_core::{Target, TargetId, TargetPatch};

use crate::error::AppError;
use crate::state::AppState;

/// JSON view of a target: the credential is never echoed back, only whether
/// one is configured.
pub(crate) fn target_view(target: &Target, running: bool) -> Result<serde_json::Value, AppError> {
    let mut value = serde_json::to_value(target.redacted())?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("has_credential".into(), target.has_credential().into());
        obj.insert("running".into(), running.into());
    }
    Ok(value)
}

/// GET /api/targets: list all targets.
pub async fn list_targets(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let targets = app.scheduler.list_targets().await;
    let mut list = Vec::with_capacity(targets.len());
    for target in &targets {
        let running = app.scheduler.is_running(&target.id).await;
        list.push(target_view(target, running)?);
    }
    Ok(Json(serde_json::json!(list)))
}

/// POST /api/targets: create a target from the given fields.
pub async fn create_target(
    State(app): State<AppState>,
    Json(body): Json<TargetPatch>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let target = app.scheduler.add_target(body).await?;
    app.notify_targets_changed();
    Ok((StatusCode::CREATED, Json(target_view(&target, false)?)))
}

/// GET /api/targets/:id: one target.
pub async fn get_target(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let target = app.scheduler.get_target(&id).await?;
    let running = app.scheduler.is_running(&id).await;
    Ok(Json(target_view(&target, running)?))
}

/// PATCH /api/targets/:id: update target settings.
pub async fn update_target(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<TargetPatch>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.is_empty() {
        return Err(AppError::bad_request("no fields to update"));
    }
    let id = TargetId::from(id);
    let target = app.scheduler.update_target(&id, body).await?;
    app.notify_targets_changed();
    let running = app.scheduler.is_running(&id).await;
    Ok(Json(target_view(&target, running)?))
}

/// DELETE /api/targets/:id: stop monitoring and remove the target.
pub async fn delete_target(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let removed = app.scheduler.remove_target(&id).await?;
    app.notify_targets_changed();
    Ok(Json(serde_json::json!({
        "id": removed.id,
        "name": removed.name,
        "deleted": true,
    })))
}

/// POST /api/targets/:id/start: start monitoring.
pub async fn start_target(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    app.scheduler.start(&id).await?;
    app.notify_targets_changed();
    Ok(Json(serde_json::json!({ "id": id, "running": true })))
}

/// POST /api/targets/:id/stop: stop monitoring.
pub async fn stop_target(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let was_running = app.scheduler.stop(&id).await?;
    if was_running {
        app.notify_targets_changed();
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "running": false,
        "was_running": was_running,
    })))
}

/// GET /api/targets/:id/watch: live watcher state.
pub async fn get_watch(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    app.scheduler.get_target(&id).await?;
    let running = app.scheduler.is_running(&id).await;
    Ok(Json(serde_json::json!({
        "id": id,
        "running": running,
        "watch": app.scheduler.watch_snapshot(&id),
    })))
}
