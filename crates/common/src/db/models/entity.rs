//! Entity record and its status state machine

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

use crate::db::{normalize_timestamps, Record};

/// Derive the entity identifier from its display name.
///
/// Lowercases the name and collapses every run of commas and whitespace into
/// a single hyphen: `"Palm City, FL"` becomes `palm-city-fl`.
pub fn entity_id_from_name(name: &str) -> String {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    let re = SEPARATORS.get_or_init(|| Regex::new(r"[,\s]+").expect("static regex"));
    re.replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Pipeline position of an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Ignored,
    Backlogged,
    Notability,
    DraftResearch,
    DraftWriting,
    Failed,
    Archived,
}

impl EntityState {
    /// States that require a notability record to exist
    pub fn needs_notability_record(&self) -> bool {
        matches!(self, EntityState::Notability)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityState::Ignored => "ignored",
            EntityState::Backlogged => "backlogged",
            EntityState::Notability => "notability",
            EntityState::DraftResearch => "draft_research",
            EntityState::DraftWriting => "draft_writing",
            EntityState::Failed => "failed",
            EntityState::Archived => "archived",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the current state, orthogonal to it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Canonical `(state, phase)` pair. Either half may be unset for entities
/// created without an initial status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatus {
    pub state: Option<EntityState>,
    pub phase: Option<Phase>,
}

impl EntityStatus {
    pub fn new(state: EntityState, phase: Phase) -> Self {
        Self {
            state: Some(state),
            phase: Some(phase),
        }
    }

    pub fn failed() -> Self {
        Self::new(EntityState::Failed, Phase::Failed)
    }

    /// Map a pre-canonical bare status string onto the current vocabulary
    pub fn from_legacy(raw: &str) -> Self {
        match raw {
            "backlog" | "queue" | "backlogged" => {
                Self::new(EntityState::Backlogged, Phase::Queued)
            }
            "processed" => Self::new(EntityState::Notability, Phase::Completed),
            "delete" | "archived" => Self::new(EntityState::Archived, Phase::Completed),
            "ignored" => Self::new(EntityState::Ignored, Phase::Completed),
            "notability" | "researching" => Self::new(EntityState::Notability, Phase::Processing),
            "drafting_sections" => Self::new(EntityState::DraftResearch, Phase::Processing),
            "drafted_sections" => Self::new(EntityState::DraftWriting, Phase::Completed),
            "failed" => Self::failed(),
            _ => Self::new(EntityState::Backlogged, Phase::Queued),
        }
    }
}

/// Editorial category of an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    VentureCapitalist,
    StartupFounder,
    StartupCompany,
    VentureFirm,
}

/// Coarse person/organization split of [`EntityCategory`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
}

impl EntityCategory {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityCategory::VentureCapitalist | EntityCategory::StartupFounder => {
                EntityKind::Person
            }
            EntityCategory::StartupCompany | EntityCategory::VentureFirm => {
                EntityKind::Organization
            }
        }
    }

    /// Human-readable label used in prompt variables
    pub fn label(&self) -> &'static str {
        match self {
            EntityCategory::VentureCapitalist => "Venture Capitalist",
            EntityCategory::StartupFounder => "Startup Founder",
            EntityCategory::StartupCompany => "Startup Company",
            EntityCategory::VentureFirm => "Venture Firm",
        }
    }

    /// Key used in the prompt catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::VentureCapitalist => "venture_capitalist",
            EntityCategory::StartupFounder => "startup_founder",
            EntityCategory::StartupCompany => "startup_company",
            EntityCategory::VentureFirm => "venture_firm",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,

    pub name: String,

    pub context: String,

    #[serde(default)]
    pub category: Option<EntityCategory>,

    #[serde(default)]
    pub status: EntityStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        context: impl Into<String>,
        category: Option<EntityCategory>,
        status: EntityStatus,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: entity_id_from_name(&name),
            name,
            context: context.into(),
            category,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status; returns whether anything changed
    pub fn transition(&mut self, status: EntityStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}

impl Record for Entity {
    const COLLECTION: &'static str = "entities";

    fn id(&self) -> &str {
        &self.id
    }

    /// Normalise bare-string statuses into the `{state, phase}` object and
    /// backfill or offset the timestamps of early records.
    fn migrate(value: &mut Value) -> bool {
        let Some(obj) = value.as_object_mut() else {
            return false;
        };
        let mut changed = false;

        if let Some(Value::String(raw)) = obj.get("status") {
            let status = EntityStatus::from_legacy(raw);
            if let Ok(v) = serde_json::to_value(status) {
                obj.insert("status".to_string(), v);
                changed = true;
            }
        }

        changed |= normalize_timestamps(obj);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_id_from_name() {
        assert_eq!(entity_id_from_name("Palm City, FL"), "palm-city-fl");
        assert_eq!(entity_id_from_name("  Andreessen   Horowitz "), "andreessen-horowitz");
        assert_eq!(entity_id_from_name("A,,B"), "a-b");
        assert_eq!(entity_id_from_name(" , "), "");
    }

    #[test]
    fn test_transition_reports_change() {
        let mut entity = Entity::new("Jane Doe", "investor", None, EntityStatus::default());
        assert!(entity.transition(EntityStatus::new(EntityState::Notability, Phase::Processing)));
        assert!(!entity.transition(EntityStatus::new(EntityState::Notability, Phase::Processing)));
    }

    #[test]
    fn test_migrate_bare_status() {
        let mut value = json!({
            "id": "palm-city-fl",
            "name": "Palm City, FL",
            "context": "town",
            "status": "backlog"
        });
        assert!(Entity::migrate(&mut value));
        let entity: Entity = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(entity.status, EntityStatus::new(EntityState::Backlogged, Phase::Queued));

        // second pass is a no-op
        assert!(!Entity::migrate(&mut value));
    }

    #[test]
    fn test_bare_status_rejected_without_migration() {
        let value = json!({
            "id": "x",
            "name": "X",
            "context": "",
            "status": "backlog",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        });
        assert!(serde_json::from_value::<Entity>(value).is_err());
    }

    #[test]
    fn test_category_kind() {
        assert_eq!(EntityCategory::VentureCapitalist.kind(), EntityKind::Person);
        assert_eq!(EntityCategory::VentureFirm.kind(), EntityKind::Organization);
        assert_eq!(EntityCategory::StartupFounder.label(), "Startup Founder");
    }
}
