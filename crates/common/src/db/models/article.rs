//! Generated article record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::WritingSection;
use crate::db::{normalize_timestamps, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Drafting,
    Drafted,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Drafting => "drafting",
            ArticleStatus::Drafted => "drafted",
            ArticleStatus::Published => "published",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArticleBody {
    #[default]
    Empty,
    /// Single-shot draft text as returned by the model
    Text { text: String },
    /// Sectioned draft assembled from writing jobs
    Sections { sections: BTreeMap<String, WritingSection> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,

    pub status: ArticleStatus,

    #[serde(default)]
    pub body: ArticleBody,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Article {
    pub fn new(id: impl Into<String>, status: ArticleStatus, body: ArticleBody) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status,
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace status and body, keeping the creation time
    pub fn replace(&mut self, status: ArticleStatus, body: ArticleBody) {
        self.status = status;
        self.body = body;
        self.updated_at = Utc::now();
    }
}

impl Record for Article {
    const COLLECTION: &'static str = "articles";

    fn id(&self) -> &str {
        &self.id
    }

    /// Early articles kept the draft as a top-level `text` field
    fn migrate(value: &mut Value) -> bool {
        let Some(obj) = value.as_object_mut() else {
            return false;
        };
        let mut changed = false;

        if let Some(text) = obj.remove("text") {
            let body = match text {
                Value::String(text) => ArticleBody::Text { text },
                _ => ArticleBody::Empty,
            };
            if !obj.contains_key("body") {
                if let Ok(body) = serde_json::to_value(body) {
                    obj.insert("body".to_string(), body);
                }
            }
            changed = true;
        }

        changed |= normalize_timestamps(obj);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_is_tagged() {
        let article = Article::new(
            "jane-doe",
            ArticleStatus::Drafted,
            ArticleBody::Text { text: "Jane Doe is".into() },
        );
        let value = serde_json::to_value(&article).unwrap();
        assert_eq!(value["status"], "drafted");
        assert_eq!(value["body"]["kind"], "text");
        assert_eq!(value["body"]["text"], "Jane Doe is");
    }

    #[test]
    fn test_legacy_article_text() {
        let mut value = serde_json::json!({
            "id": "jane-doe",
            "status": "drafted",
            "text": "Jane Doe is an American investor.",
            "created_at": "2025-07-24T18:02:11.5",
            "updated_at": "2025-07-24T18:02:11.5"
        });
        assert!(Article::migrate(&mut value));
        let article: Article = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(
            article.body,
            ArticleBody::Text {
                text: "Jane Doe is an American investor.".into()
            }
        );
        assert_eq!(article.status, ArticleStatus::Drafted);
        assert_eq!(article.updated_at.timestamp_subsec_millis(), 500);
        assert!(!Article::migrate(&mut value));

        let mut empty = serde_json::json!({"id": "john-roe", "status": "drafting", "text": null});
        assert!(Article::migrate(&mut empty));
        let article: Article = serde_json::from_value(empty).unwrap();
        assert_eq!(article.body, ArticleBody::Empty);
    }

    #[test]
    fn test_replace_keeps_created_at() {
        let mut article = Article::new("jane-doe", ArticleStatus::Drafting, ArticleBody::Empty);
        let created = article.created_at;
        article.replace(ArticleStatus::Drafted, ArticleBody::Text { text: "x".into() });
        assert_eq!(article.created_at, created);
        assert_eq!(article.status, ArticleStatus::Drafted);
    }
}
