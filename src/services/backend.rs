//! The storage capability the sweeper consumes.
//!
//! Any object store that can list one delimiter level at a time, delete with
//! an if-match precondition and report its namespace can be swept. The local
//! SQLite/disk store in [`crate::services::storage_service`] is one such
//! backend.

use std::{future::Future, io};
use thiserror::Error;

use crate::models::object::ListingPage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("namespace `{requested}` does not match this store (`{actual}`)")]
    NamespaceMismatch { requested: String, actual: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` in bucket `{bucket}` changed since it was listed")]
    PreconditionFailed { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(format!("metadata store: {}", err))
            }
            other => Self::Sqlx(other),
        }
    }
}

/// Parameters of a single listing call.
#[derive(Debug, Clone, Copy)]
pub struct ListRequest<'a> {
    pub namespace: &'a str,
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub delimiter: &'a str,
    pub page_size: usize,
    pub continuation_token: Option<&'a str>,
}

/// Parameters of a conditional delete.
#[derive(Debug, Clone, Copy)]
pub struct DeleteRequest<'a> {
    pub namespace: &'a str,
    pub bucket: &'a str,
    pub object: &'a str,
    /// Delete only if the stored version token still equals this one.
    pub if_match: Option<&'a str>,
}

pub trait StorageBackend: Send + Sync {
    /// Account-scoped namespace that every bucket operation must name.
    fn namespace(&self) -> impl Future<Output = StorageResult<String>> + Send;

    /// List one delimiter level below `request.prefix`.
    fn list_objects(
        &self,
        request: ListRequest<'_>,
    ) -> impl Future<Output = StorageResult<ListingPage>> + Send;

    /// Delete one object. Returns `PreconditionFailed` when `if_match` no
    /// longer matches and `ObjectNotFound` when the object is already gone.
    fn delete_object(
        &self,
        request: DeleteRequest<'_>,
    ) -> impl Future<Output = StorageResult<()>> + Send;
}
