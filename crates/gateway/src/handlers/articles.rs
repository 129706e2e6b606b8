//! Article handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::AppState;
use wikidraft_common::{
    db::models::{Article, ArticleStatus},
    errors::Result,
    pipeline::UpdateArticleStatusRequest,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListArticlesQuery {
    pub status: Option<ArticleStatus>,
}

pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ListArticlesQuery>,
) -> Json<Vec<Article>> {
    Json(state.pipeline.list_articles(query.status).await)
}

pub async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Article>> {
    Ok(Json(state.pipeline.get_article(&id).await?))
}

/// Single-shot draft from completed research; blocks on the prompt call
pub async fn draft_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Article>> {
    Ok(Json(state.pipeline.draft_document(&id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateArticleStatusRequest>,
) -> Result<Json<Article>> {
    Ok(Json(state.pipeline.set_article_status(&id, request.status).await?))
}
