use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use crate::errors::ApiError;

pub type FetchResult = Result<Value, Arc<ApiError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Keyed response cache that coalesces concurrent requests.
///
/// Callers asking for a key that already has a request in flight await that
/// request instead of issuing another. Successful responses are kept as the
/// key's last known value.
#[derive(Default)]
pub struct RequestCache {
    inflight: Mutex<HashMap<String, (u64, SharedFetch)>>,
    values: Mutex<HashMap<String, Value>>,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RequestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `key`, joining an in-flight request for the same key if there is
    /// one. `fetcher` is only called when a new request is needed.
    pub async fn fetch<F>(&self, key: &str, fetcher: F) -> FetchResult
    where
        F: FnOnce() -> BoxFuture<'static, Result<Value, ApiError>>,
    {
        let (id, request) = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(key) {
                Some((id, request)) => (*id, request.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let request = fetcher().map(|r| r.map_err(Arc::new)).boxed().shared();
                    inflight.insert(key.to_string(), (id, request.clone()));
                    (id, request)
                }
            }
        };

        let result = request.await;

        {
            let mut inflight = lock(&self.inflight);
            if inflight.get(key).is_some_and(|(current, _)| *current == id) {
                inflight.remove(key);
            }
        }
        if let Ok(value) = &result {
            lock(&self.values).insert(key.to_string(), value.clone());
        }
        result
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    /// Overwrite the cached value without a request.
    pub fn set(&self, key: &str, value: Value) {
        lock(&self.values).insert(key.to_string(), value);
    }

    pub fn invalidate(&self, key: &str) {
        lock(&self.values).remove(key);
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting(calls: &Arc<AtomicUsize>, value: Value) -> BoxFuture<'static, Result<Value, ApiError>> {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(value)
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_coalesce() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.fetch("tasks?status=done", || counting(&calls, json!([1]))),
            cache.fetch("tasks?status=done", || counting(&calls, json!([2]))),
        );
        assert_eq!(a.unwrap(), json!([1]));
        assert_eq!(b.unwrap(), json!([1]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.get("tasks?status=done"), Some(json!([1])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let cache = RequestCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (_, _) = tokio::join!(
            cache.fetch("tasks", || counting(&calls, json!([]))),
            cache.fetch("tasks?page=2", || counting(&calls, json!([]))),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_not_cached() {
        let cache = RequestCache::new();
        cache.set("agent-status", json!(["stale"]));
        let result = cache
            .fetch("agent-status", || {
                async {
                    Err(ApiError::Http {
                        status: 503,
                        body: "down".into(),
                    })
                }
                .boxed()
            })
            .await;
        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(cache.get("agent-status"), Some(json!(["stale"])));

        cache.invalidate("agent-status");
        assert!(cache.get("agent-status").is_none());
    }
}
