//! `POST /invoke`: run one retention sweep and answer with its text report.

use axum::{
    body::Bytes,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use crate::{services::invocation, state::AppState};

/// The body is the optional JSON payload (`{"bucketName": .., "retentionDays": ..}`).
/// Responds 200 with the report, or 500 when the invocation failed fatally;
/// individual delete failures are listed in the report but keep the 200.
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    let outcome = invocation::invoke(&state.storage, &state.sweep, &body).await;
    (
        outcome.status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        outcome.output,
    )
        .into_response()
}
