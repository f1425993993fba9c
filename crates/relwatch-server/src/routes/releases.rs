use axum::extract::{Path, State};
use axum::Json;
use relwatch_core::TargetId;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/targets/:id/releases: most recently fetched releases.
pub async fn list_releases(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let releases = app.scheduler.releases(&id).await?;
    Ok(Json(serde_json::json!({
        "id": id,
        "releases": releases,
    })))
}

/// POST /api/targets/:id/releases/check: fetch releases now.
pub async fn check_releases(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = TargetId::from(id);
    let releases = app.scheduler.check_now(&id).await?;
    if !releases.is_empty() {
        app.notify_targets_changed();
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "latest": releases.first().map(|r| &r.tag),
        "releases": releases,
    })))
}
