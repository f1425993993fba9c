pub mod cluster;
pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, SseMessage};

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Targets
        .route("/api/targets", get(routes::targets::list_targets))
        .route("/api/targets", post(routes::targets::create_target))
        .route("/api/targets/{id}", get(routes::targets::get_target))
        .route("/api/targets/{id}", patch(routes::targets::update_target))
        .route("/api/targets/{id}", delete(routes::targets::delete_target))
        .route(
            "/api/targets/{id}/start",
            post(routes::targets::start_target),
        )
        .route("/api/targets/{id}/stop", post(routes::targets::stop_target))
        .route("/api/targets/{id}/watch", get(routes::targets::get_watch))
        // Releases
        .route(
            "/api/targets/{id}/releases",
            get(routes::releases::list_releases),
        )
        .route(
            "/api/targets/{id}/releases/check",
            post(routes::releases::check_releases),
        )
        // Deployment
        .route(
            "/api/targets/{id}/deployment",
            get(routes::deployments::get_deployment),
        )
        .route(
            "/api/targets/{id}/rollback",
            post(routes::deployments::rollback),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve the control plane on a pre-bound listener until `shutdown` resolves.
///
/// The caller owns the scheduler and decides what happens to running
/// watchers once this returns.
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    app_state: AppState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let actual_port = listener.local_addr()?.port();
    let app = build_router(app_state);

    tracing::info!("relwatch control plane listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
