//! Retention sweep: depth-first descent over delimiter prefixes, deleting
//! every object created before the cutoff.
//!
//! The traversal keeps an explicit frontier instead of recursing, follows
//! continuation tokens before descending, and records listing and delete
//! failures in the report without aborting. Only the caller can stop a sweep
//! early, by dropping the future returned from [`Sweeper::run_into`]; the
//! report it filled so far stays valid.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Instant;

use crate::models::{
    object::ObjectDescriptor,
    policy::RetentionPolicy,
    report::{DeletedObject, SweepFailure, SweepReport},
};
use crate::services::backend::{DeleteRequest, ListRequest, StorageBackend};

pub const DELIMITER: &str = "/";
pub const DEFAULT_MAX_DEPTH: usize = 256;
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Traversal knobs that do not change what gets deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalLimits {
    pub page_size: usize,
    /// Deepest prefix level that is still listed; the root is level 0.
    pub max_depth: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

struct Pending {
    prefix: String,
    depth: usize,
}

pub struct Sweeper<'a, B> {
    backend: &'a B,
    namespace: &'a str,
    bucket: &'a str,
    cutoff: DateTime<Utc>,
    limits: TraversalLimits,
}

impl<'a, B: StorageBackend> Sweeper<'a, B> {
    /// `cutoff` is fixed for the lifetime of the sweeper.
    pub fn new(
        backend: &'a B,
        namespace: &'a str,
        policy: &'a RetentionPolicy,
        cutoff: DateTime<Utc>,
        limits: TraversalLimits,
    ) -> Self {
        Self {
            backend,
            namespace,
            bucket: &policy.bucket_name,
            cutoff,
            limits,
        }
    }

    /// Sweep the whole bucket, recording into `report` as it goes.
    ///
    /// `report.cancelled` stays `true` until the frontier is exhausted, so a
    /// caller that drops this future on a deadline is left with a partial
    /// report that says so.
    pub async fn run_into(&self, report: &mut SweepReport) {
        let started = Instant::now();
        report.cancelled = true;

        tracing::info!(
            bucket = self.bucket,
            cutoff = %self.cutoff,
            page_size = self.limits.page_size,
            max_depth = self.limits.max_depth,
            "starting retention sweep"
        );

        let mut frontier = vec![Pending {
            prefix: String::new(),
            depth: 0,
        }];
        while let Some(next) = frontier.pop() {
            let children = self.visit(&next, report).await;
            // Reverse so the first listed child is visited first.
            frontier.extend(children.into_iter().rev().map(|prefix| Pending {
                prefix,
                depth: next.depth + 1,
            }));
        }

        report.cancelled = false;
        tracing::info!(
            bucket = self.bucket,
            deleted = report.deleted_count(),
            evaluated = report.objects_evaluated,
            retained = report.objects_retained,
            unknown_age = report.unknown_age_skipped,
            listings = report.listings_issued,
            errors = report.failures().count(),
            delete_errors = report.per_object_errors().count(),
            duration_secs = started.elapsed().as_secs_f64(),
            "retention sweep completed"
        );
    }

    /// List every page of `pending.prefix`, evaluate its objects and return
    /// the sub-prefixes to descend into. A listing failure drops the whole
    /// subtree.
    async fn visit(&self, pending: &Pending, report: &mut SweepReport) -> Vec<String> {
        let prefix = pending.prefix.as_str();
        if pending.depth > self.limits.max_depth {
            self.listing_failed(
                report,
                prefix,
                format!("prefix depth exceeds limit of {}", self.limits.max_depth),
            );
            return Vec::new();
        }

        let mut children = Vec::new();
        let mut seen = HashSet::new();
        let mut token: Option<String> = None;
        loop {
            let request = ListRequest {
                namespace: self.namespace,
                bucket: self.bucket,
                prefix,
                delimiter: DELIMITER,
                page_size: self.limits.page_size,
                continuation_token: token.as_deref(),
            };
            report.listings_issued += 1;
            let page = match self.backend.list_objects(request).await {
                Ok(page) => page,
                Err(err) => {
                    self.listing_failed(report, prefix, err.to_string());
                    return Vec::new();
                }
            };
            tracing::debug!(
                bucket = self.bucket,
                prefix,
                objects = page.objects.len(),
                prefixes = page.common_prefixes.len(),
                truncated = page.next_continuation_token.is_some(),
                "listed prefix"
            );

            for object in &page.objects {
                self.evaluate(object, report).await;
            }

            for raw in page.common_prefixes {
                let child = normalize_prefix(raw);
                if child.len() <= prefix.len() || !child.starts_with(prefix) {
                    self.listing_failed(
                        report,
                        &child,
                        format!("common prefix does not descend from {:?}", prefix),
                    );
                    continue;
                }
                if seen.insert(child.clone()) {
                    children.push(child);
                }
            }

            match page.next_continuation_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    self.listing_failed(
                        report,
                        prefix,
                        format!("continuation token {:?} did not advance", next),
                    );
                    return Vec::new();
                }
                Some(next) => token = Some(next),
                None => return children,
            }
        }
    }

    async fn evaluate(&self, object: &ObjectDescriptor, report: &mut SweepReport) {
        report.objects_evaluated += 1;
        let created_at = match object.created_at {
            Some(created_at) => created_at,
            None => {
                report.unknown_age_skipped += 1;
                tracing::debug!(
                    bucket = self.bucket,
                    object = %object.name,
                    "skipping object without creation time"
                );
                return;
            }
        };
        if created_at >= self.cutoff {
            report.objects_retained += 1;
            return;
        }

        tracing::info!(
            bucket = self.bucket,
            object = %object.name,
            created = %created_at,
            "deleting"
        );
        let request = DeleteRequest {
            namespace: self.namespace,
            bucket: self.bucket,
            object: &object.name,
            if_match: object.etag.as_deref(),
        };
        match self.backend.delete_object(request).await {
            Ok(()) => report.record_deletion(DeletedObject {
                name: object.name.clone(),
                created_at,
            }),
            Err(err) => {
                tracing::warn!(
                    bucket = self.bucket,
                    object = %object.name,
                    error = %err,
                    "delete failed"
                );
                report.record_failure(SweepFailure::Delete {
                    object: object.name.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn listing_failed(&self, report: &mut SweepReport, prefix: &str, message: String) {
        tracing::warn!(bucket = self.bucket, prefix, error = %message, "listing failed");
        report.record_failure(SweepFailure::Listing {
            prefix: prefix.to_string(),
            message,
        });
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.ends_with(DELIMITER) {
        prefix.push_str(DELIMITER);
    }
    prefix
}
