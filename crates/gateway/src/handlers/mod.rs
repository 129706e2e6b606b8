//! API handlers module

pub mod articles;
pub mod entities;
pub mod extraction;
pub mod health;
pub mod notability;
pub mod research;
pub mod writing;
