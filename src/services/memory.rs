//! In-memory storage backend for sweeper tests.
//!
//! Records every operation, and can inject listing/delete failures, stall a
//! listing forever, or mutate the store right after a listing to simulate a
//! concurrent writer.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::models::object::{ListingPage, ObjectDescriptor};
use crate::services::backend::{
    DeleteRequest, ListRequest, StorageBackend, StorageError, StorageResult,
};

/// Record of a backend call, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    List {
        prefix: String,
        continuation_token: Option<String>,
    },
    Delete {
        object: String,
        if_match: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct StoredObject {
    created_at: Option<DateTime<Utc>>,
    version: u64,
}

impl StoredObject {
    fn etag(&self) -> String {
        format!("v{}", self.version)
    }
}

/// The object map, exposed to hooks registered with
/// [`MemoryBackend::on_next_list`].
#[derive(Debug, Default)]
pub struct MemoryObjects {
    objects: BTreeMap<String, StoredObject>,
}

impl MemoryObjects {
    /// Overwrite an object in place, changing its etag.
    pub fn rewrite(&mut self, key: &str) {
        if let Some(obj) = self.objects.get_mut(key) {
            obj.version += 1;
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.objects.remove(key);
    }
}

type ListHook = Box<dyn FnOnce(&mut MemoryObjects) + Send>;

pub struct MemoryBackend {
    namespace: String,
    bucket: String,
    now: DateTime<Utc>,
    objects: Mutex<MemoryObjects>,
    operations: Mutex<Vec<StorageOp>>,
    failing_listings: Mutex<Vec<String>>,
    failing_deletes: Mutex<Vec<String>>,
    stalled_listings: Mutex<Vec<String>>,
    list_hook: Mutex<Option<ListHook>>,
}

impl MemoryBackend {
    pub fn new(namespace: &str, bucket: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            bucket: bucket.to_string(),
            now: Utc::now(),
            objects: Mutex::default(),
            operations: Mutex::default(),
            failing_listings: Mutex::default(),
            failing_deletes: Mutex::default(),
            stalled_listings: Mutex::default(),
            list_hook: Mutex::default(),
        }
    }

    /// Reference instant tests should derive object ages from.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn insert(&self, key: &str, created_at: Option<DateTime<Utc>>) {
        self.objects.lock().expect("lock").objects.insert(
            key.to_string(),
            StoredObject {
                created_at,
                version: 1,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("lock").objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .expect("lock")
            .objects
            .keys()
            .cloned()
            .collect()
    }

    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Prefixes of every listing call, one entry per page.
    pub fn listed_prefixes(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                StorageOp::List { prefix, .. } => Some(prefix),
                StorageOp::Delete { .. } => None,
            })
            .collect()
    }

    pub fn fail_listing(&self, prefix: &str) {
        self.failing_listings
            .lock()
            .expect("lock")
            .push(prefix.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes
            .lock()
            .expect("lock")
            .push(key.to_string());
    }

    /// Listing `prefix` never completes.
    pub fn stall_listing(&self, prefix: &str) {
        self.stalled_listings
            .lock()
            .expect("lock")
            .push(prefix.to_string());
    }

    /// Run `hook` against the store right after the next listing page is built.
    pub fn on_next_list(&self, hook: impl FnOnce(&mut MemoryObjects) + Send + 'static) {
        *self.list_hook.lock().expect("lock") = Some(Box::new(hook));
    }

    fn check_target(&self, namespace: &str, bucket: &str) -> StorageResult<()> {
        if namespace != self.namespace {
            return Err(StorageError::NamespaceMismatch {
                requested: namespace.to_string(),
                actual: self.namespace.clone(),
            });
        }
        if bucket != self.bucket {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }

    fn build_page(&self, request: &ListRequest<'_>) -> ListingPage {
        let mut store = self.objects.lock().expect("lock");
        let page_size = request.page_size.max(1);
        let mut rows: Vec<(String, StoredObject)> = store
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(request.prefix))
            .filter(|(key, _)| {
                request
                    .continuation_token
                    .is_none_or(|token| key.as_str() > token)
            })
            .take(page_size + 1)
            .map(|(key, obj)| (key.clone(), obj.clone()))
            .collect();

        let mut next_continuation_token = None;
        if rows.len() > page_size {
            rows.pop();
            next_continuation_token = rows.last().map(|(key, _)| key.clone());
        }

        let mut page = ListingPage {
            next_continuation_token,
            ..ListingPage::default()
        };
        for (key, obj) in rows {
            let rest = &key[request.prefix.len()..];
            match rest.find(request.delimiter) {
                Some(pos) => {
                    let common = key[..request.prefix.len() + pos + request.delimiter.len()]
                        .to_string();
                    if !page.common_prefixes.contains(&common) {
                        page.common_prefixes.push(common);
                    }
                }
                None => page.objects.push(ObjectDescriptor {
                    etag: Some(obj.etag()),
                    name: key,
                    created_at: obj.created_at,
                }),
            }
        }

        if let Some(hook) = self.list_hook.lock().expect("lock").take() {
            hook(&mut *store);
        }
        page
    }
}

impl StorageBackend for MemoryBackend {
    async fn namespace(&self) -> StorageResult<String> {
        Ok(self.namespace.clone())
    }

    async fn list_objects(&self, request: ListRequest<'_>) -> StorageResult<ListingPage> {
        self.operations.lock().expect("lock").push(StorageOp::List {
            prefix: request.prefix.to_string(),
            continuation_token: request.continuation_token.map(str::to_string),
        });
        self.check_target(request.namespace, request.bucket)?;

        let stalled = self
            .stalled_listings
            .lock()
            .expect("lock")
            .iter()
            .any(|p| p == request.prefix);
        if stalled {
            std::future::pending::<()>().await;
        }

        let failing = self
            .failing_listings
            .lock()
            .expect("lock")
            .iter()
            .any(|p| p == request.prefix);
        if failing {
            return Err(StorageError::Unavailable(format!(
                "injected listing failure for {:?}",
                request.prefix
            )));
        }

        Ok(self.build_page(&request))
    }

    async fn delete_object(&self, request: DeleteRequest<'_>) -> StorageResult<()> {
        self.operations.lock().expect("lock").push(StorageOp::Delete {
            object: request.object.to_string(),
            if_match: request.if_match.map(str::to_string),
        });
        self.check_target(request.namespace, request.bucket)?;

        if self
            .failing_deletes
            .lock()
            .expect("lock")
            .iter()
            .any(|k| k == request.object)
        {
            return Err(StorageError::Unavailable(format!(
                "injected delete failure for {:?}",
                request.object
            )));
        }

        let mut store = self.objects.lock().expect("lock");
        let current = store
            .objects
            .get(request.object)
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: request.bucket.to_string(),
                key: request.object.to_string(),
            })?;
        if let Some(expected) = request.if_match {
            if current.etag() != expected {
                return Err(StorageError::PreconditionFailed {
                    bucket: request.bucket.to_string(),
                    key: request.object.to_string(),
                });
            }
        }
        store.objects.remove(request.object);
        Ok(())
    }
}
