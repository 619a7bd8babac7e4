use axum::{extract::State, Json};

use crate::models::HealthResponse;
use crate::state::JourneyApiState;

/// `GET /health`
pub async fn health(State(state): State<JourneyApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        policies: state.engine.graph().len(),
    })
}
