//! REST CRUD over lectures.
//!
//! - `GET    /api/lectures`      — list, newest-updated first, with card counts
//! - `POST   /api/lectures`      — create
//! - `GET    /api/lectures/{id}` — full detail with cards and takeaways
//! - `PATCH  /api/lectures/{id}` — partial update (title, status)
//! - `DELETE /api/lectures/{id}` — delete; cards and takeaways cascade

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use lectern_store::LecturePatch;

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateLectureBody {
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "Untitled Lecture".into()
}

pub async fn list(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_lectures().await {
        Ok(lectures) => Json(lectures).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "listing lectures failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list lectures")
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateLectureBody>,
) -> impl IntoResponse {
    match state.store.create_lecture(&body.title).await {
        Ok(lecture) => (StatusCode::CREATED, Json(lecture)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "creating lecture failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create lecture")
        }
    }
}

pub async fn detail(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_lecture(&lecture_id).await {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "lecture not found"),
        Err(e) => {
            tracing::error!(lecture_id = %lecture_id, error = %e, "fetching lecture failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch lecture")
        }
    }
}

pub async fn patch(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    Json(body): Json<LecturePatch>,
) -> impl IntoResponse {
    match state.store.patch_lecture(&lecture_id, body).await {
        Ok(Some(lecture)) => Json(lecture).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "lecture not found"),
        Err(e) => {
            tracing::error!(lecture_id = %lecture_id, error = %e, "patching lecture failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to update lecture")
        }
    }
}

pub async fn delete(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_lecture(&lecture_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "lecture not found"),
        Err(e) => {
            tracing::error!(lecture_id = %lecture_id, error = %e, "deleting lecture failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete lecture")
        }
    }
}
