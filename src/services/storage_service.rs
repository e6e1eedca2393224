//! src/services/storage_service.rs
//!
//! StorageService: the local object store the sweeper can run against.
//! Metadata lives in SQLite, payloads on disk sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. It implements
//! [`StorageBackend`] so a sweep over it behaves like one over a remote store.

use crate::{
    models::{
        bucket::Bucket,
        object::{ListingPage, Object},
    },
    services::backend::{DeleteRequest, ListRequest, StorageBackend, StorageError, StorageResult},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone, Debug)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<Object>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

impl From<ListObjectsResult> for ListingPage {
    fn from(result: ListObjectsResult) -> Self {
        Self {
            objects: result.objects.iter().map(Object::descriptor).collect(),
            common_prefixes: result.common_prefixes,
            next_continuation_token: result.next_continuation_token,
        }
    }
}

/// StorageService provides the operations a retention sweep and its
/// operators need:
/// - create a bucket
/// - upload an object (bytes to disk, metadata into SQLite)
/// - list one delimiter level with continuation tokens
/// - delete an object, optionally conditional on its etag
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Namespace reported to callers and required on every backend call.
    pub namespace: String,
}

pub const MAX_LIST_KEYS: usize = 1000;
const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: [&str; 6] = [
    "local",
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-frankfurt-1",
    "ap-southeast-1",
];

/// Apply the embedded schema. Every statement is idempotent.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

impl StorageService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            namespace: namespace.into(),
        }
    }

    /// Rejects empty or oversized keys, absolute keys, `..` segments and
    /// control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Bucket names are 3-63 characters of lowercase letters, digits, dots
    /// and hyphens, starting and ending with a letter or digit.
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") {
            return Err(invalid("cannot contain consecutive dots"));
        }
        Ok(())
    }

    fn ensure_region_valid(&self, region: &str) -> StorageResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StorageError::UnsupportedRegion(region.to_string()))
        }
    }

    fn ensure_namespace(&self, requested: &str) -> StorageResult<()> {
        if requested == self.namespace {
            Ok(())
        } else {
            Err(StorageError::NamespaceMismatch {
                requested: requested.to_string(),
                actual: self.namespace.clone(),
            })
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), keeping per-directory
    /// file counts small.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::from(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, content_md5, time_created,
                    is_deleted
             FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StorageError::from(other),
        })
    }

    /// Fetch live object metadata.
    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// Store a whole payload in one call.
    #[cfg(test)]
    pub async fn put_object_created_at(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        time_created: Option<DateTime<Utc>>,
    ) -> StorageResult<Object> {
        self.upload_object_stream(bucket, key, None, time_created, futures::stream::iter([Ok(data)]))
            .await
    }

    /// Write the payload to a temporary file, computing MD5 and size as it
    /// streams, rename it into place, then upsert the metadata row.
    ///
    /// Every write mints a fresh etag, even when the bytes are unchanged, so
    /// an if-match delete issued against an earlier listing cannot remove the
    /// rewritten object. `time_created` of `None` stores an object of
    /// unknown age.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        time_created: Option<DateTime<Utc>>,
        stream: S,
    ) -> StorageResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as i64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let content_md5 = format!("{:x}", digest.compute());
        let etag = Uuid::new_v4().simple().to_string();

        let insert_result = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, content_md5, time_created,
                is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                content_md5 = excluded.content_md5,
                time_created = excluded.time_created,
                is_deleted = 0
            RETURNING id, bucket_id, key, content_type, size_bytes, etag, content_md5,
                time_created, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(content_type)
        .bind(size_bytes)
        .bind(&etag)
        .bind(&content_md5)
        .bind(time_created)
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::from(err))
            }
        }
    }

    /// List objects in key order, grouping keys that contain `delimiter`
    /// after `prefix` into common prefixes.
    ///
    /// Page size counts rows scanned, so a truncated page may repeat a common
    /// prefix already returned on the previous page.
    pub async fn list_objects_v2(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, content_md5, time_created, \
             is_deleted FROM objects WHERE bucket_id = ",
        );
        builder.push_bind(bucket_rec.id);
        builder.push(" AND is_deleted = 0");

        // Byte-exact prefix test; LIKE would fold ASCII case.
        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND substr(key, 1, length(");
            builder.push_bind(prefix);
            builder.push(")) = ");
            builder.push_bind(prefix);
        }

        if let Some(token) = &params.continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token);
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_continuation_token = rows.last().map(|last| last.key.clone());
            is_truncated = true;
        }

        let mut contents = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for obj in rows {
            if let Some(delim) = params.delimiter.as_deref().filter(|d| !d.is_empty()) {
                if let Some(prefix) =
                    compute_common_prefix(&obj.key, params.prefix.as_deref(), delim)
                {
                    common_prefixes.insert(prefix);
                    continue;
                }
            }
            contents.push(obj);
        }

        Ok(ListObjectsResult {
            objects: contents,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_continuation_token,
        })
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// With `if_match`, the row is only marked deleted while its etag still
    /// equals the expected one; otherwise `PreconditionFailed` is returned and
    /// nothing changes.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        if_match: Option<&str>,
    ) -> StorageResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let result = sqlx::query(
            "UPDATE objects SET is_deleted = 1
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0
               AND (? IS NULL OR etag = ?)",
        )
        .bind(key)
        .bind(bucket_rec.id)
        .bind(if_match)
        .bind(if_match)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            // Lost a race: distinguish "gone" from "rewritten".
            return Err(match self.fetch_object(&bucket_rec, key).await {
                Ok(_) => StorageError::PreconditionFailed {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                Err(err) => err,
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    /// Create a bucket and its payload directory.
    pub async fn create_bucket(&self, name: &str, region: String) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            region: normalized_region,
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, region, created_at) VALUES (?, ?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(&bucket.region)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StorageError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StorageError::from(err)),
        }
    }

    /// Remove empty directories from `start` up to, not including, `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                    ) =>
                {
                    break;
                }
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

impl StorageBackend for StorageService {
    async fn namespace(&self) -> StorageResult<String> {
        Ok(self.namespace.clone())
    }

    async fn list_objects(&self, request: ListRequest<'_>) -> StorageResult<ListingPage> {
        self.ensure_namespace(request.namespace)?;
        let params = ListObjectsParams {
            prefix: Some(request.prefix.to_string()),
            delimiter: Some(request.delimiter.to_string()),
            continuation_token: request.continuation_token.map(str::to_string),
            max_keys: request.page_size,
        };
        Ok(self.list_objects_v2(request.bucket, params).await?.into())
    }

    async fn delete_object(&self, request: DeleteRequest<'_>) -> StorageResult<()> {
        self.ensure_namespace(request.namespace)?;
        StorageService::delete_object(self, request.bucket, request.object, request.if_match)
            .await
            .map(|_| ())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// The common prefix `key` rolls up into, if it has a delimiter after
/// `requested_prefix`.
fn compute_common_prefix(
    key: &str,
    requested_prefix: Option<&str>,
    delimiter: &str,
) -> Option<String> {
    let prefix = requested_prefix.unwrap_or("");
    let after_prefix = key.strip_prefix(prefix)?;
    let pos = after_prefix.find(delimiter)?;
    Some(format!("{}{}", prefix, &after_prefix[..pos + delimiter.len()]))
}
