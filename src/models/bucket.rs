//! Represents a logical bucket, the top-level container swept by a retention run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket in the local object store.
///
/// Buckets hold a flat key space; any hierarchy inside them is derived at
/// listing time from the `/` delimiter.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal identifier used as the foreign key of object rows.
    pub id: Uuid,

    /// Bucket name (lowercase, DNS-like).
    pub name: String,

    /// Region label, informational only for the local store.
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
