//! Notability handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::AppState;
use wikidraft_common::{
    db::models::NotabilityRecord,
    errors::Result,
    pipeline::{ReplaceSourcesRequest, ResearchStatus, UpsertNotabilityRequest},
};

pub async fn upsert_notability(
    State(state): State<AppState>,
    Json(request): Json<UpsertNotabilityRequest>,
) -> Result<Json<NotabilityRecord>> {
    Ok(Json(state.pipeline.upsert_notability(request).await?))
}

pub async fn list_notability(State(state): State<AppState>) -> Json<Vec<NotabilityRecord>> {
    Json(state.pipeline.list_notability().await)
}

pub async fn get_notability(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotabilityRecord>> {
    Ok(Json(state.pipeline.get_notability(&id).await?))
}

pub async fn replace_sources(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReplaceSourcesRequest>,
) -> Result<Json<NotabilityRecord>> {
    Ok(Json(state.pipeline.replace_sources(&id, request.sources).await?))
}

pub async fn recalculate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NotabilityRecord>> {
    Ok(Json(state.pipeline.recalculate_notability(&id).await?))
}

/// Submit the background research job; poll the progress endpoint
pub async fn start_research(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ResearchStatus>)> {
    let status = state.pipeline.start_research(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn research_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResearchStatus>> {
    Ok(Json(state.pipeline.check_research(&id).await?))
}
