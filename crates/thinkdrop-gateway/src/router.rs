use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{self, MAX_BODY_BYTES};
use crate::state::SharedState;

/// Build the application router: two unauthenticated service routes and one
/// authenticated dispatch route per action.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    Router::new()
        .route("/service.health", get(health))
        .route("/service.capabilities", get(capabilities))
        .route("/{action}", post(handlers::dispatch))
        // Cushion above the enveloped limit; the handler reports the
        // spec'd PAYLOAD_TOO_LARGE for anything past MAX_BODY_BYTES.
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES * 2))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| {
            origin.parse().ok().or_else(|| {
                warn!("ignoring malformed allowed origin: {origin}");
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_origin(origins)
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(handlers::build_health(&state))
}

async fn capabilities(State(_state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": crate::envelope::SERVICE_NAME,
        "version": crate::envelope::PROTOCOL_VERSION,
        "actions": handlers::ACTIONS,
    }))
}
