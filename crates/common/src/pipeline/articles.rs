//! Article records

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::Pipeline;
use crate::db::models::{Article, ArticleStatus};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateArticleStatusRequest {
    pub status: ArticleStatus,
}

impl Pipeline {
    pub async fn get_article(&self, id: &str) -> Result<Article> {
        self.repo
            .articles
            .get(id)
            .await
            .ok_or_else(|| AppError::not_found("article", id))
    }

    pub async fn list_articles(&self, status: Option<ArticleStatus>) -> Vec<Article> {
        match status {
            Some(status) => self.repo.articles.filter(|a| a.status == status).await,
            None => self.repo.articles.list().await,
        }
    }

    /// Manual status change; only drafted articles can be published
    #[instrument(skip(self))]
    pub async fn set_article_status(&self, id: &str, status: ArticleStatus) -> Result<Article> {
        let _guard = self.repo.lock(id).await;
        let mut article = self.get_article(id).await?;

        if status == ArticleStatus::Published && article.status == ArticleStatus::Drafting {
            return Err(AppError::precondition("Article has not been drafted yet"));
        }
        if article.status == status {
            return Ok(article);
        }

        let body = std::mem::take(&mut article.body);
        article.replace(status, body);
        self.repo.articles.upsert(article.clone()).await?;
        info!(status = %status, "Article status changed");
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::db::models::ArticleBody;

    #[tokio::test]
    async fn test_publish_requires_draft() {
        let Harness { pipeline, .. } = harness();
        pipeline
            .repo()
            .articles
            .insert(Article::new("jane-doe", ArticleStatus::Drafting, ArticleBody::Empty))
            .await
            .unwrap();

        let err = pipeline
            .set_article_status("jane-doe", ArticleStatus::Published)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed { .. }));

        pipeline
            .repo()
            .articles
            .upsert(Article::new(
                "jane-doe",
                ArticleStatus::Drafted,
                ArticleBody::Text { text: "Jane Doe is an investor.".into() },
            ))
            .await
            .unwrap();
        let article = pipeline
            .set_article_status("jane-doe", ArticleStatus::Published)
            .await
            .unwrap();
        assert_eq!(article.status, ArticleStatus::Published);
        assert!(matches!(article.body, ArticleBody::Text { .. }));

        assert_eq!(pipeline.list_articles(Some(ArticleStatus::Published)).await.len(), 1);
        assert!(pipeline.list_articles(Some(ArticleStatus::Drafting)).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_article() {
        let Harness { pipeline, .. } = harness();
        assert!(matches!(
            pipeline.get_article("nobody").await,
            Err(AppError::NotFound { .. })
        ));
    }
}
