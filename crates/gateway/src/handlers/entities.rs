//! Entity management handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use wikidraft_common::{
    db::{
        models::{Entity, EntityState},
        CascadeReport,
    },
    errors::Result,
    pipeline::{CreateEntityRequest, UpdateStatusRequest},
};

#[derive(Debug, Default, Deserialize)]
pub struct ListEntitiesQuery {
    pub state: Option<EntityState>,
}

#[derive(Serialize)]
pub struct DeleteEntityResponse {
    pub id: String,
    pub deleted: bool,
    pub cascade: CascadeReport,
}

/// Create an entity; its id is derived from the name
pub async fn create_entity(
    State(state): State<AppState>,
    Json(request): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<Entity>)> {
    let entity = state.pipeline.create_entity(request).await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

pub async fn list_entities(
    State(state): State<AppState>,
    Query(query): Query<ListEntitiesQuery>,
) -> Json<Vec<Entity>> {
    Json(state.pipeline.list_entities(query.state).await)
}

pub async fn get_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Entity>> {
    Ok(Json(state.pipeline.get_entity(&id).await?))
}

/// Manual `(state, phase)` change
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Entity>> {
    let entity = state
        .pipeline
        .update_entity_status(&id, request.status)
        .await?;
    Ok(Json(entity))
}

/// Delete an entity and everything derived from it
pub async fn delete_entity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteEntityResponse>> {
    let cascade = state.pipeline.delete_entity(&id).await?;
    Ok(Json(DeleteEntityResponse {
        id,
        deleted: true,
        cascade,
    }))
}
