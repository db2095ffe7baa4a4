//! Local record store: entity views and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by aggregate queries.
//! - `repo`: SQL-only functions that map rows into `crate::model` entities.
//!
//! External modules should import from `materials_sync::db`; we re-export the
//! repository API and the view models for convenience.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::StatusCounts;
