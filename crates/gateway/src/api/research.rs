//! User-triggered deep research over REST.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use lectern_domain::lecture::CardKind;
use lectern_store::NewCard;

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeepResearchBody {
    pub lecture_id: String,
    pub selected_text: String,
    #[serde(default)]
    pub context: String,
}

/// POST /api/research/deep — run deep research for a user-selected text,
/// persist the card, and return it.
pub async fn deep(
    State(state): State<AppState>,
    Json(body): Json<DeepResearchBody>,
) -> impl IntoResponse {
    match state.store.get_lecture(&body.lecture_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "lecture not found"),
        Err(e) => {
            tracing::error!(lecture_id = %body.lecture_id, error = %e, "lecture lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to verify lecture");
        }
    }

    let draft = match state
        .analyzer
        .deep_research(&body.selected_text, &body.context)
        .await
    {
        Ok(Some(draft)) => draft,
        Ok(None) => {
            return api_error(StatusCode::BAD_GATEWAY, "deep research returned no results")
        }
        Err(e) => {
            tracing::warn!(selected_text = %body.selected_text, error = %e, "deep research failed");
            return api_error(StatusCode::BAD_GATEWAY, "deep research failed");
        }
    };

    let new_card = NewCard {
        lecture_id: body.lecture_id,
        kind: CardKind::DeepResearch,
        term: draft.term,
        content: draft.content,
        citations: draft.citations,
        badge: draft.badge,
        lecture_timestamp_seconds: 0,
    };
    match state.store.insert_card(new_card).await {
        Ok(card) => (StatusCode::CREATED, Json(card)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "persisting research card failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist card")
        }
    }
}
