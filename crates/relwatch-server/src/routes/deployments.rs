use axum::extract::{Path, State};
use axum::Json;
use relwatch_core::TargetId;
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RollbackBody {
    pub tag: String,
}

/// GET /api/targets/:id/deployment: current rollout state of the target's deployment.
pub async fn get_deployment(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let status = app.scheduler.deployment_status(&id).await?;
    let mut value = serde_json::to_value(&status)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("settled".into(), status.is_settled().into());
    }
    Ok(Json(value))
}

/// POST /api/targets/:id/rollback: point the deployment at an earlier tag.
pub async fn rollback(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RollbackBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    app.scheduler.rollback(&id, &body.tag).await?;
    Ok(Json(serde_json::json!({
        "id": id,
        "tag": body.tag.trim(),
        "status": "patched",
    })))
}
