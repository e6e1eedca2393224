//! HTTP handlers for administering the local store: create buckets, upload,
//! inspect, list and delete objects. Upload bodies are streamed to disk.

use crate::{
    errors::AppError,
    services::storage_service::{ListObjectsParams, ListObjectsResult, MAX_LIST_KEYS},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

/// Upload header carrying the object's creation time as RFC 3339, or
/// `unknown` to store an object whose age is not known. Absent means now.
pub const CREATED_AT_HEADER: &str = "x-object-created-at";

/// Query params accepted by `GET /{bucket}`.
#[derive(Debug, Deserialize)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

/// Optional body of `PUT /{bucket}`.
#[derive(Debug, Deserialize)]
pub struct CreateBucketReq {
    pub region: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsResponse {
    pub name: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: usize,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    pub name: String,
    pub size: i64,
    pub etag: Option<String>,
    pub content_md5: Option<String>,
    pub time_created: Option<DateTime<Utc>>,
}

/// `PUT /{bucket}`: create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    payload: Option<Json<CreateBucketReq>>,
) -> Result<impl IntoResponse, AppError> {
    let region = payload
        .and_then(|Json(p)| p.region)
        .unwrap_or_else(|| "local".into());

    let created = state.storage.create_bucket(&bucket, region).await?;
    tracing::info!(bucket = %created.name, region = %created.region, "created bucket");
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /{bucket}/{*key}`: upload an object; responds with its ETag.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let time_created = parse_created_at(&headers)?;

    let stream = body.into_data_stream().map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .upload_object_stream(&bucket, &key, content_type, time_created, stream)
        .await?;

    let mut response = Response::new(Body::empty());
    insert_etag(&mut response, object.etag.as_deref());
    Ok(response)
}

/// `HEAD /{bucket}/{*key}`: object metadata as headers, no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let object = state.storage.get_object_metadata(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    insert_etag(&mut response, object.etag.as_deref());
    let created = object
        .time_created
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "unknown".to_string());
    if let Ok(value) = HeaderValue::from_str(&created) {
        response.headers_mut().insert(CREATED_AT_HEADER, value);
    }
    if let Some(value) = object
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

fn parse_created_at(headers: &HeaderMap) -> Result<Option<DateTime<Utc>>, AppError> {
    let Some(raw) = headers.get(CREATED_AT_HEADER) else {
        return Ok(Some(Utc::now()));
    };
    let invalid = || {
        AppError::new(
            StatusCode::BAD_REQUEST,
            format!("{} must be RFC 3339 or `unknown`", CREATED_AT_HEADER),
        )
    };
    let raw = raw.to_str().map_err(|_| invalid())?.trim();
    if raw.eq_ignore_ascii_case("unknown") {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|_| invalid())
}

fn insert_etag(response: &mut Response, etag: Option<&str>) {
    if let Some(value) = etag.and_then(|etag| HeaderValue::from_str(&format!("\"{}\"", etag)).ok()) {
        response.headers_mut().insert(header::ETAG, value);
    }
}

/// `DELETE /{bucket}/{*key}`: delete an object, honoring `If-Match`.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let if_match = headers
        .get(header::IF_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_string())
        .filter(|v| v != "*");

    state
        .storage
        .delete_object(&bucket, &key, if_match.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /{bucket}`: list objects, supports ?prefix=&delimiter=&max-keys=&continuation-token=
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(q): Query<ListObjectsQuery>,
) -> Result<Json<ListObjectsResponse>, AppError> {
    let continuation_token = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;
    let max_keys = q.max_keys.unwrap_or(MAX_LIST_KEYS).clamp(1, MAX_LIST_KEYS);

    let params = ListObjectsParams {
        prefix: q.prefix.clone(),
        delimiter: q.delimiter.clone(),
        continuation_token,
        max_keys,
    };

    let result = state.storage.list_objects_v2(&bucket, params.clone()).await?;
    Ok(Json(build_list_response(bucket, &params, result)))
}

fn build_list_response(
    bucket: String,
    params: &ListObjectsParams,
    result: ListObjectsResult,
) -> ListObjectsResponse {
    ListObjectsResponse {
        name: bucket,
        prefix: params.prefix.clone().unwrap_or_default(),
        delimiter: params.delimiter.clone(),
        max_keys: params.max_keys,
        is_truncated: result.is_truncated,
        next_continuation_token: result
            .next_continuation_token
            .as_deref()
            .map(encode_continuation_token),
        objects: result
            .objects
            .into_iter()
            .map(|obj| ObjectEntry {
                name: obj.key,
                size: obj.size_bytes,
                etag: obj.etag,
                content_md5: obj.content_md5,
                time_created: obj.time_created,
            })
            .collect(),
        common_prefixes: result.common_prefixes,
    }
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "invalid continuation token"))
}
