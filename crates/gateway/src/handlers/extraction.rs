//! Entity extraction handler

use axum::{extract::State, Json};

use crate::AppState;
use wikidraft_common::{
    errors::Result,
    pipeline::{ExtractionRequest, ExtractionResult},
};

pub async fn extract(
    State(state): State<AppState>,
    Json(request): Json<ExtractionRequest>,
) -> Result<Json<ExtractionResult>> {
    Ok(Json(state.pipeline.extract(request).await?))
}
