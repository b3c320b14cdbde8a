//! Generic polled resource with push-triggered revalidation.
//!
//! ```text
//!   ┌──────────── timer (fixed or adaptive) ────────────┐
//!   │                                                   ▼
//! fetch ◀── revalidate() ◀── push listener ◀── Connection (while signed in)
//!   │
//!   └──▶ RequestCache (coalesced by key) ──▶ watch<ResourceState<T>>
//! ```
//!
//! The driver task follows the session token: signing in binds a push
//! listener (and optional channel subscription) on the token's connection,
//! signing out drops them. Fetches that require auth are skipped while
//! signed out; the cached value stays as it was.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use super::SyncContext;
use crate::errors::ApiError;
use crate::realtime::{Channel, ChannelSubscription, Listener, ServerEvent};

/// Render-ready view of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    pub data: Option<T>,
    /// Message of the last failed fetch; cleared by the next success.
    pub error: Option<String>,
    pub is_loading: bool,
    /// Delay before the next timed revalidation.
    pub refresh_interval: Duration,
}

impl<T> ResourceState<T> {
    fn new(data: Option<T>, refresh_interval: Duration) -> Self {
        Self {
            data,
            error: None,
            is_loading: false,
            refresh_interval,
        }
    }
}

type IntervalFn<T> = Arc<dyn Fn(Option<&T>) -> Duration + Send + Sync>;
type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync>;
type PushFn<T> = Arc<dyn Fn(&ServerEvent, Option<&T>) -> Option<PushAction<T>> + Send + Sync>;

/// How long to wait between timed revalidations.
#[derive(Clone)]
pub enum RefreshInterval<T> {
    Fixed(Duration),
    /// Derived from the latest data, re-evaluated after every fetch.
    Adaptive(IntervalFn<T>),
}

impl<T> RefreshInterval<T> {
    pub fn adaptive(f: impl Fn(Option<&T>) -> Duration + Send + Sync + 'static) -> Self {
        Self::Adaptive(Arc::new(f))
    }

    pub fn for_data(&self, data: Option<&T>) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Adaptive(f) => f(data),
        }
    }
}

/// What a relevant push notification does to a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAction<T> {
    /// Refetch now.
    Revalidate,
    /// The push carried fresh data; apply it without a round trip.
    Apply(T),
}

/// Everything needed to keep one resource in sync.
pub struct ResourceSpec<T> {
    key: String,
    fetch: FetchFn,
    interval: RefreshInterval<T>,
    requires_auth: bool,
    push: Option<PushFn<T>>,
    channel: Option<Channel>,
}

impl<T> ResourceSpec<T> {
    pub fn new(
        key: impl Into<String>,
        interval: RefreshInterval<T>,
        fetch: impl Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            fetch: Arc::new(fetch),
            interval,
            requires_auth: true,
            push: None,
            channel: None,
        }
    }

    /// Poll even while signed out.
    pub fn public(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn on_push(
        mut self,
        f: impl Fn(&ServerEvent, Option<&T>) -> Option<PushAction<T>> + Send + Sync + 'static,
    ) -> Self {
        self.push = Some(Arc::new(f));
        self
    }

    /// Join `channel` while signed in, with or without a push handler.
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }
}

struct Inner<T> {
    key: String,
    ctx: SyncContext,
    state: watch::Sender<ResourceState<T>>,
    wake: Notify,
}

impl<T> Inner<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn apply(&self, data: T, interval: &RefreshInterval<T>) {
        if let Ok(value) = serde_json::to_value(&data) {
            self.ctx.cache.set(&self.key, value);
        }
        let next = interval.for_data(Some(&data));
        self.state.send_modify(|s| {
            s.data = Some(data);
            s.error = None;
            s.refresh_interval = next;
        });
    }
}

/// Handle to a running resource. Dropping it stops polling and detaches
/// from push.
pub struct Resource<T> {
    inner: Arc<Inner<T>>,
    interval: RefreshInterval<T>,
    _guard: DropGuard,
}

impl<T> Resource<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start the driver task. Requires a tokio runtime.
    pub fn spawn(ctx: SyncContext, spec: ResourceSpec<T>) -> Self {
        let cached = ctx
            .cache
            .get(&spec.key)
            .and_then(|v| serde_json::from_value::<T>(v).ok());
        let first = spec.interval.for_data(cached.as_ref());
        let (state, _) = watch::channel(ResourceState::new(cached, first));

        let inner = Arc::new(Inner {
            key: spec.key.clone(),
            ctx,
            state,
            wake: Notify::new(),
        });
        let cancel = CancellationToken::new();
        let interval = spec.interval.clone();
        tokio::spawn(drive(inner.clone(), spec, cancel.clone()));

        Self {
            inner,
            interval,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn state(&self) -> ResourceState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.inner.state.subscribe()
    }

    /// Refetch as soon as possible.
    pub fn revalidate(&self) {
        self.inner.wake.notify_one();
    }

    /// Replace the local value without a request.
    pub fn mutate(&self, data: T) {
        self.inner.apply(data, &self.interval);
    }

    /// Wait until the first fetch has settled (data or error).
    pub async fn ready(&self) -> ResourceState<T> {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|s| !s.is_loading && (s.data.is_some() || s.error.is_some()))
            .await
            .map(|s| s.clone());
        match settled {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

/// Push binding held while signed in.
struct PushBinding {
    _listener: Option<Listener>,
    _subscription: Option<ChannelSubscription>,
}

fn bind<T>(inner: &Arc<Inner<T>>, spec: &ResourceSpec<T>, token: Option<&str>) -> Option<PushBinding>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let token = token?;
    if spec.push.is_none() && spec.channel.is_none() {
        return None;
    }
    let conn = inner.ctx.connections.get_connection(token);
    let subscription = spec.channel.clone().map(|c| conn.subscription(c));
    let Some(push) = spec.push.clone() else {
        return Some(PushBinding {
            _listener: None,
            _subscription: subscription,
        });
    };

    let weak = Arc::downgrade(inner);
    let interval = spec.interval.clone();
    let listener = conn.on(move |event| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let current = inner.state.borrow().data.clone();
        match push(event, current.as_ref()) {
            Some(PushAction::Revalidate) => {
                debug!(key = %inner.key, event = event.name(), "Push triggered revalidation");
                inner.wake.notify_one();
            }
            Some(PushAction::Apply(data)) => {
                debug!(key = %inner.key, event = event.name(), "Applying pushed data");
                inner.apply(data, &interval);
            }
            None => {}
        }
    });

    Some(PushBinding {
        _listener: Some(listener),
        _subscription: subscription,
    })
}

async fn revalidate<T>(inner: &Inner<T>, spec: &ResourceSpec<T>, signed_in: bool)
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    if spec.requires_auth && !signed_in {
        debug!(key = %inner.key, "Skipping fetch while signed out");
        return;
    }

    inner.state.send_modify(|s| s.is_loading = true);
    let fetch = spec.fetch.clone();
    let result = inner.ctx.cache.fetch(&inner.key, move || fetch()).await;

    let decoded = result
        .map_err(|e| e.to_string())
        .and_then(|v| serde_json::from_value::<T>(v).map_err(|e| e.to_string()));
    match decoded {
        Ok(data) => {
            let next = spec.interval.for_data(Some(&data));
            inner.state.send_modify(|s| {
                s.data = Some(data);
                s.error = None;
                s.is_loading = false;
                s.refresh_interval = next;
            });
        }
        Err(message) => {
            warn!(key = %inner.key, error = %message, "Revalidation failed");
            inner.state.send_modify(|s| {
                s.error = Some(message);
                s.is_loading = false;
            });
        }
    }
}

async fn drive<T>(inner: Arc<Inner<T>>, spec: ResourceSpec<T>, cancel: CancellationToken)
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let mut session = Some(inner.ctx.session.clone());
    let mut token = inner.ctx.session.borrow().clone();
    let mut binding = bind(&inner, &spec, token.as_deref());

    loop {
        revalidate(&inner, &spec, token.is_some()).await;
        let delay = inner.state.borrow().refresh_interval;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = inner.wake.notified() => {}
            changed = async {
                match session.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                match changed {
                    Ok(()) => {
                        token = session.as_mut().and_then(|rx| rx.borrow_and_update().clone());
                        // Release the old scope before joining the new one.
                        drop(binding.take());
                        binding = bind(&inner, &spec, token.as_deref());
                        debug!(key = %inner.key, signed_in = token.is_some(), "Session changed");
                    }
                    Err(_) => session = None,
                }
            }
        }
    }

    drop(binding);
    debug!(key = %inner.key, "Resource stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::realtime::testing::next_end;
    use crate::sync::testing::context;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_spec(calls: &Arc<AtomicUsize>, interval: Duration) -> ResourceSpec<u64> {
        let calls = calls.clone();
        ResourceSpec::new("counter", RefreshInterval::Fixed(interval), move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            async move { Ok(json!(n)) }.boxed()
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_then_timer() {
        let session = Session::new(Some("tok".into()));
        let (ctx, _ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::spawn(ctx, counter_spec(&calls, Duration::from_secs(10)));

        assert_eq!(resource.ready().await.data, Some(1));
        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(resource.data(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signed_out_skips_auth_fetch_but_public_polls() {
        let session = Session::new(None);
        let (ctx, _ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let private = Resource::spawn(ctx.clone(), counter_spec(&calls, Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(private.data().is_none());

        let public_calls = Arc::new(AtomicUsize::new(0));
        let public = Resource::spawn(
            ctx,
            counter_spec(&public_calls, Duration::from_secs(1)).public(),
        );
        assert!(public.ready().await.data.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_triggers_fetch() {
        let session = Session::new(None);
        let (ctx, _ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::spawn(ctx, counter_spec(&calls, Duration::from_secs(60)));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        session.sign_in("tok");
        assert_eq!(resource.ready().await.data, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_revalidates_and_subscribes_channel() {
        let session = Session::new(Some("tok".into()));
        let (ctx, mut ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = counter_spec(&calls, Duration::from_secs(60))
            .channel(Channel::Task("t1".into()))
            .on_push(|event, _| match event {
                ServerEvent::TaskUpdate(p) if p.task_id == "t1" => Some(PushAction::Revalidate),
                _ => None,
            });
        let resource = Resource::spawn(ctx, spec);
        assert_eq!(resource.ready().await.data, Some(1));

        let mut server = next_end(&mut ends).await;
        assert_eq!(server.recv_frame().await.event, "task:subscribe");

        server.push("task:update", json!({"taskId": "t2", "status": "x", "updatedAt": "now"}));
        server.push("task:update", json!({"taskId": "t1", "status": "x", "updatedAt": "now"}));
        let mut rx = resource.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.data == Some(2)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(resource);
        assert_eq!(server.recv_frame().await.event, "task:unsubscribe");
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_without_push_handler_still_joins() {
        let session = Session::new(Some("tok".into()));
        let (ctx, mut ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let spec = counter_spec(&calls, Duration::from_secs(60)).channel(Channel::Agent("a1".into()));
        let resource = Resource::spawn(ctx, spec);
        assert_eq!(resource.ready().await.data, Some(1));

        let mut server = next_end(&mut ends).await;
        let join = server.recv_frame().await;
        assert_eq!(join.event, "agent:subscribe");
        assert_eq!(join.data, json!("a1"));

        drop(resource);
        assert_eq!(server.recv_frame().await.event, "agent:unsubscribe");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_stale_data_and_sets_error() {
        let session = Session::new(Some("tok".into()));
        let (ctx, _ends) = context(&session);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let spec = ResourceSpec::<u64>::new("flaky", RefreshInterval::Fixed(Duration::from_secs(1)), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(json!(7))
                } else {
                    Err(ApiError::Http {
                        status: 500,
                        body: "boom".into(),
                    })
                }
            }
            .boxed()
        });
        let resource = Resource::spawn(ctx, spec);
        assert_eq!(resource.ready().await.data, Some(7));

        let mut rx = resource.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.error.is_some()))
            .await
            .unwrap()
            .unwrap();
        let state = resource.state();
        assert_eq!(state.data, Some(7));
        assert_eq!(state.error.as_deref(), Some("API 500: boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutate_updates_state_and_cache() {
        let session = Session::new(Some("tok".into()));
        let (ctx, _ends) = context(&session);
        let cache = ctx.cache.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = Resource::spawn(ctx, counter_spec(&calls, Duration::from_secs(60)));
        resource.ready().await;

        resource.mutate(42);
        assert_eq!(resource.data(), Some(42));
        assert_eq!(cache.get("counter"), Some(json!(42)));
    }
}
