//! Section research draft handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::AppState;
use wikidraft_common::{
    errors::Result,
    pipeline::{DraftProgress, DraftView, StartResearchRequest},
};

pub async fn list_drafts(State(state): State<AppState>) -> Json<Vec<DraftView>> {
    let drafts = state.pipeline.list_research_drafts().await;
    Json(drafts.iter().map(DraftView::from).collect())
}

/// Start section research; the body may override the entity's category
pub async fn start_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<StartResearchRequest>>,
) -> Result<(StatusCode, Json<DraftView>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let draft = state.pipeline.start_research_draft(&id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(DraftView::from(&draft))))
}

pub async fn get_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DraftView>> {
    let draft = state.pipeline.get_research_draft(&id).await?;
    Ok(Json(DraftView::from(&draft)))
}

pub async fn draft_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DraftProgress>> {
    Ok(Json(state.pipeline.check_research_draft(&id).await?))
}
