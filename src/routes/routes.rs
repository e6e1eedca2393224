//! Routes served with `--serve`.
//!
//! - `POST   /invoke`          run one retention sweep (text report)
//! - `GET    /healthz`, `/readyz`
//! - `PUT    /{bucket}`        create bucket
//! - `GET    /{bucket}`        list objects (prefix, delimiter, max-keys, continuation-token)
//! - `PUT    /{bucket}/{*key}` upload object (`x-object-created-at` sets its age)
//! - `HEAD   /{bucket}/{*key}` object metadata
//! - `DELETE /{bucket}/{*key}` delete object, honoring `If-Match`
//!
//! The wildcard `*key` allows nested keys like `logs/2024/app.log`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        invoke_handlers::invoke,
        object_handlers::{create_bucket, delete_object, head_object, list_objects, upload_object},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/{bucket}/{*key}",
            put(upload_object).head(head_object).delete(delete_object),
        )
        .route("/{bucket}", get(list_objects).put(create_bucket))
}
