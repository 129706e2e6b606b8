//! Record models
//!
//! One collection per model, all keyed by entity identifier

mod article;
mod draft;
mod entity;
mod notability;

pub use article::{Article, ArticleBody, ArticleStatus};

pub use draft::{PageDetail, ResearchDraft, ResearchPage, ResearchSection, WritingDraft, WritingSection};

pub use entity::{
    entity_id_from_name, Entity, EntityCategory, EntityKind, EntityState, EntityStatus, Phase,
};

pub use notability::{
    score, Depth, Independence, NotabilityRecord, Proximity, Reliability, Source,
    SourceAssessment, SourceList, NOTABILITY_THRESHOLD,
};
