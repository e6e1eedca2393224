//! Objects as stored by the local backend, and the listing view the sweeper consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a single object in the local store.
///
/// The payload bytes live on disk; this struct only carries metadata.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object name (path-like key within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Version token, minted fresh on every write. Conditional deletes
    /// compare against it.
    pub etag: Option<String>,

    /// Hex MD5 of the payload.
    pub content_md5: Option<String>,

    /// Set by the store when the object is written. Rows imported without a
    /// known creation time keep this empty.
    pub time_created: Option<DateTime<Utc>>,

    /// Soft-delete marker.
    pub is_deleted: bool,
}

impl Object {
    pub fn descriptor(&self) -> ObjectDescriptor {
        ObjectDescriptor {
            name: self.key.clone(),
            created_at: self.time_created,
            etag: self.etag.clone(),
        }
    }
}

/// One listed entry as returned by a backend listing call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Result of one listing call for a prefix and delimiter.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    /// Objects directly under the requested prefix.
    pub objects: Vec<ObjectDescriptor>,

    /// Next-level sub-prefixes, each ending with the delimiter.
    pub common_prefixes: Vec<String>,

    /// Present when the backend truncated the listing.
    pub next_continuation_token: Option<String>,
}
