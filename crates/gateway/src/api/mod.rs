//! REST and WebSocket routing.

pub mod lectures;
pub mod research;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::session;
use crate::state::AppState;

/// Build the full application router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/lectures", get(lectures::list).post(lectures::create))
        .route(
            "/api/lectures/:lecture_id",
            get(lectures::detail)
                .patch(lectures::patch)
                .delete(lectures::delete),
        )
        .route("/api/research/deep", post(research::deep))
        .route("/ws/:lecture_id", get(session::ws_upgrade))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "lectern" }))
}

/// Standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
