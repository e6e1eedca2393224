//! Data models for the retention sweeper.
//!
//! `bucket` and `object` map to the local store's SQLite tables via
//! `sqlx::FromRow`; `policy` and `report` describe a single sweep invocation
//! and are never persisted.

pub mod bucket;
pub mod object;
pub mod policy;
pub mod report;
