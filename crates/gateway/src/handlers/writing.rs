//! Article writing handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::AppState;
use wikidraft_common::{
    errors::Result,
    pipeline::{DraftProgress, DraftView},
};

pub async fn start_writing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DraftView>)> {
    let draft = state.pipeline.start_writing(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(DraftView::from(&draft))))
}

pub async fn get_writing(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DraftView>> {
    let draft = state.pipeline.get_writing_draft(&id).await?;
    Ok(Json(DraftView::from(&draft)))
}

pub async fn writing_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DraftProgress>> {
    Ok(Json(state.pipeline.check_writing(&id).await?))
}
