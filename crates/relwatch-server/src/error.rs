use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relwatch_core::WatchError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 400 Bad Request errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 400 through the `anyhow::Error` chain without
/// adding a variant to `WatchError`.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

fn status_for(err: &WatchError) -> StatusCode {
    match err {
        WatchError::TargetNotFound(_) => StatusCode::NOT_FOUND,
        WatchError::AlreadyRunning(_) | WatchError::InvalidState(_) => StatusCode::CONFLICT,
        WatchError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WatchError::Fetch { .. } | WatchError::Reconcile { .. } => StatusCode::BAD_GATEWAY,
        WatchError::Io(_) | WatchError::Yaml(_) | WatchError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequestError>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let status = match self.0.downcast_ref::<WatchError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relwatch_core::TargetId;

    fn status_of(err: WatchError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn target_not_found_maps_to_404() {
        assert_eq!(
            status_of(WatchError::TargetNotFound("t9".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn already_running_maps_to_409() {
        assert_eq!(
            status_of(WatchError::AlreadyRunning(TargetId::from("t1"))),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn invalid_state_maps_to_409() {
        assert_eq!(
            status_of(WatchError::InvalidState("cannot delete the last target".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn invalid_config_maps_to_422() {
        assert_eq!(
            status_of(WatchError::InvalidConfig("interval too short".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn upstream_failures_map_to_502() {
        assert_eq!(
            status_of(WatchError::fetch("acme/widget", "HTTP 500")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(WatchError::reconcile("prod", "api", "forbidden")),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn io_error_maps_to_500() {
        let io_err = std::io::Error::other("disk full");
        assert_eq!(
            status_of(WatchError::Io(io_err)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn foreign_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        let err = AppError::bad_request("no fields to update");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(WatchError::TargetNotFound("t9".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
