//! One retention invocation: overlay the payload on the configured defaults,
//! resolve the namespace, sweep, and render the textual report.
//!
//! The CLI and the `POST /invoke` handler both go through [`invoke`].

use axum::http::StatusCode;
use chrono::Utc;
use std::future::Future;
use thiserror::Error;

use crate::{
    config::SweepSettings,
    models::{
        policy::{RetentionPolicy, SweepPayload},
        report::SweepReport,
    },
    services::{
        backend::{StorageBackend, StorageError},
        sweeper::Sweeper,
    },
};

/// Failures that stop an invocation before any object is touched.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("BUCKET_NAME environment variable is required")]
    MissingBucket,
    #[error("namespace error: {0}")]
    Namespace(#[source] StorageError),
}

/// What the caller reports back to whoever triggered the run.
#[derive(Debug)]
pub struct Invocation {
    pub status: StatusCode,
    pub output: String,
    /// Absent when the invocation failed fatally.
    pub report: Option<SweepReport>,
}

impl Invocation {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Overlay `payload` on the configured defaults.
pub fn resolve_policy(
    settings: &SweepSettings,
    payload: SweepPayload,
) -> Result<RetentionPolicy, InvocationError> {
    let bucket_name = payload
        .bucket_name
        .filter(|name| !name.trim().is_empty())
        .or_else(|| settings.default_bucket.clone())
        .filter(|name| !name.trim().is_empty())
        .ok_or(InvocationError::MissingBucket)?;
    let retention_days = payload
        .retention_days
        .unwrap_or(settings.default_retention_days);
    Ok(RetentionPolicy::new(bucket_name, retention_days))
}

/// Run one invocation with no external interruption besides the configured
/// deadline.
pub async fn invoke<B: StorageBackend>(
    backend: &B,
    settings: &SweepSettings,
    body: &[u8],
) -> Invocation {
    invoke_until(backend, settings, body, std::future::pending::<()>()).await
}

/// Run one invocation, stopping early if `shutdown` resolves or the
/// configured deadline passes. An interrupted sweep still reports what it
/// deleted so far.
pub async fn invoke_until<B, F>(
    backend: &B,
    settings: &SweepSettings,
    body: &[u8],
    shutdown: F,
) -> Invocation
where
    B: StorageBackend,
    F: Future<Output = ()>,
{
    match sweep(backend, settings, body, shutdown).await {
        Ok(report) => Invocation {
            status: StatusCode::OK,
            output: report.render(),
            report: Some(report),
        },
        Err(err) => {
            tracing::error!(error = %err, "retention invocation failed");
            Invocation {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                output: format!("{}\n", err),
                report: None,
            }
        }
    }
}

enum Interrupted {
    Deadline,
    Shutdown,
}

async fn sweep<B, F>(
    backend: &B,
    settings: &SweepSettings,
    body: &[u8],
    shutdown: F,
) -> Result<SweepReport, InvocationError>
where
    B: StorageBackend,
    F: Future<Output = ()>,
{
    let payload = SweepPayload::parse(body).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring undecodable payload, using configured defaults");
        SweepPayload::default()
    });
    let policy = resolve_policy(settings, payload)?;
    let namespace = backend
        .namespace()
        .await
        .map_err(InvocationError::Namespace)?;

    let cutoff = policy.cutoff(Utc::now());
    let sweeper = Sweeper::new(backend, &namespace, &policy, cutoff, settings.limits);
    let mut report = SweepReport::new(&policy, cutoff);

    let deadline = async {
        match settings.deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    let interrupted = tokio::select! {
        () = sweeper.run_into(&mut report) => None,
        () = deadline => Some(Interrupted::Deadline),
        () = shutdown => Some(Interrupted::Shutdown),
    };
    match interrupted {
        Some(Interrupted::Deadline) => tracing::warn!(
            bucket = %report.bucket_name,
            cutoff = %report.cutoff,
            deleted = report.deleted_count(),
            "sweep deadline reached, stopping"
        ),
        Some(Interrupted::Shutdown) => tracing::warn!(
            bucket = %report.bucket_name,
            cutoff = %report.cutoff,
            deleted = report.deleted_count(),
            "sweep interrupted, stopping"
        ),
        None => {}
    }

    Ok(report)
}
