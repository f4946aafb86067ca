//! Request interception ("filtering") for static servers.
//!
//! A request to a filtered path is announced to every subscriber as a
//! [`RequestEvent`] carrying a one-shot [`PendingResponse`]. The first
//! `send` wins; the pipeline waits for it for at most the configured
//! [`InterceptionTimeout`] and otherwise falls back to serving the file as if
//! the path had never been filtered. Later sends are silently dropped.
//!
//! Subscribers are kept in an ordered observer list behind an `ArcSwap`, so
//! the per-request fan-out reads a snapshot without taking a lock.
use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, request::Parts};
use tokio::sync::{mpsc, oneshot};

use crate::core::paths::ServerRoot;

/// Default upper bound on how long a filtered request waits for a subscriber.
pub const DEFAULT_INTERCEPTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// How long the pipeline waits for a subscriber to resolve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptionTimeout {
    /// Fall back to the file after this long.
    After(Duration),
    /// Wait indefinitely. Only meant for tests.
    Disabled,
}

impl InterceptionTimeout {
    /// Map a millisecond value from the control surface.
    ///
    /// Negative restores the default, `0` disables the timeout.
    pub fn from_millis(millis: i64) -> Self {
        match u64::try_from(millis) {
            Err(_) => Self::default(),
            Ok(0) => Self::Disabled,
            Ok(ms) => Self::After(Duration::from_millis(ms)),
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::After(d) => Some(*d),
            Self::Disabled => None,
        }
    }
}

impl Default for InterceptionTimeout {
    fn default() -> Self {
        Self::After(DEFAULT_INTERCEPTION_TIMEOUT)
    }
}

impl fmt::Display for InterceptionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After(d) => write!(f, "{}ms", d.as_millis()),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

/// Where a filtered request points, in browser `location` terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLocation {
    /// Raw URI path, e.g. `/index.txt`
    pub pathname: String,
    /// Query string including the leading `?`, or empty
    pub search: String,
}

impl RequestLocation {
    pub fn from_uri(uri: &http::Uri) -> Self {
        Self {
            pathname: uri.path().to_string(),
            search: uri.query().map(|q| format!("?{q}")).unwrap_or_default(),
        }
    }
}

/// A replacement response supplied by a subscriber.
#[derive(Debug, Clone)]
pub struct ResponseOverride {
    pub body: Bytes,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseOverride {
    /// A `200 OK` override with the given body and no extra headers.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Lifecycle of a [`PendingResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Pending,
    Sent,
    Expired,
}

enum Resolution {
    Default,
    Override(ResponseOverride),
}

enum Slot {
    Pending(oneshot::Sender<Resolution>),
    Sent,
    Expired,
}

/// One-shot response token handed to subscribers with every filtered request.
///
/// Cheap to clone; all clones share the same slot. Exactly one of `send`,
/// `send_default` or the pipeline's timer resolves it.
#[derive(Clone)]
pub struct PendingResponse {
    slot: Arc<Mutex<Slot>>,
}

impl PendingResponse {
    fn channel() -> (Self, oneshot::Receiver<Resolution>) {
        let (tx, rx) = oneshot::channel();
        let response = Self {
            slot: Arc::new(Mutex::new(Slot::Pending(tx))),
        };
        (response, rx)
    }

    /// Serve the file unmodified, as if the path were not filtered.
    ///
    /// Returns `false` when the response was already sent or expired.
    pub fn send_default(&self) -> bool {
        self.resolve(Resolution::Default)
    }

    /// Replace the file with `response`.
    ///
    /// Returns `false` when the response was already sent or expired.
    pub fn send(&self, response: ResponseOverride) -> bool {
        self.resolve(Resolution::Override(response))
    }

    pub fn state(&self) -> ResponseState {
        match *self.lock() {
            Slot::Pending(_) => ResponseState::Pending,
            Slot::Sent => ResponseState::Sent,
            Slot::Expired => ResponseState::Expired,
        }
    }

    fn resolve(&self, resolution: Resolution) -> bool {
        let mut slot = self.lock();
        match std::mem::replace(&mut *slot, Slot::Sent) {
            Slot::Pending(tx) => {
                // The receiver may already be gone if the client disconnected.
                let _ = tx.send(resolution);
                true
            }
            previous => {
                *slot = previous;
                tracing::debug!("Ignoring send on a response that is no longer pending");
                false
            }
        }
    }

    /// Mark the response as timed out. Returns `false` if a send got there first.
    fn expire(&self) -> bool {
        let mut slot = self.lock();
        match *slot {
            Slot::Pending(_) => {
                *slot = Slot::Expired;
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("state", &self.state())
            .finish()
    }
}

/// Notification emitted for every request to a filtered path.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    /// Registry key of the server that received the request
    pub root: String,
    pub location: RequestLocation,
    pub method: Method,
    pub headers: HeaderMap,
    /// Token used to answer the request
    pub response: PendingResponse,
}

/// Why a filtered request ended up serving the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// A subscriber called `send_default`
    Released,
    /// Nobody answered within the timeout
    TimedOut,
}

/// Result of running a request through the pipeline.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    Override(ResponseOverride),
    Fallback(FallbackReason),
}

impl FilterOutcome {
    pub fn is_overridden(&self) -> bool {
        matches!(self, FilterOutcome::Override(_))
    }
}

type Subscriber = Arc<dyn Fn(&RequestEvent) + Send + Sync>;

struct SubscriberList {
    entries: ArcSwap<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
}

impl SubscriberList {
    fn remove(&self, id: u64) {
        self.entries.rcu(|current| {
            current
                .iter()
                .filter(|(entry_id, _)| *entry_id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

/// Keeps a subscriber registered; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    list: Weak<SubscriberList>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Request events delivered through a channel, for consumers that answer
/// asynchronously. Unsubscribes when dropped.
pub struct RequestStream {
    receiver: mpsc::UnboundedReceiver<RequestEvent>,
    _subscription: Subscription,
}

impl RequestStream {
    pub async fn next(&mut self) -> Option<RequestEvent> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<RequestEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Fan-out of filtered requests to subscribers, bounded by a timeout.
pub struct InterceptionPipeline {
    subscribers: Arc<SubscriberList>,
    timeout: ArcSwap<InterceptionTimeout>,
}

impl InterceptionPipeline {
    pub fn new(timeout: InterceptionTimeout) -> Self {
        Self {
            subscribers: Arc::new(SubscriberList {
                entries: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            timeout: ArcSwap::from_pointee(timeout),
        }
    }

    pub fn timeout(&self) -> InterceptionTimeout {
        **self.timeout.load()
    }

    pub fn set_timeout(&self, timeout: InterceptionTimeout) {
        self.timeout.store(Arc::new(timeout));
        tracing::info!("Interception timeout set to {}", timeout);
    }

    /// Register a callback invoked synchronously for every filtered request,
    /// in subscription order.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RequestEvent) + Send + Sync + 'static,
    {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Subscriber = Arc::new(callback);
        self.subscribers.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push((id, callback.clone()));
            next
        });
        tracing::debug!("Request subscriber {} registered", id);

        Subscription {
            id,
            list: Arc::downgrade(&self.subscribers),
        }
    }

    /// Subscribe through a channel instead of a callback.
    pub fn stream(&self) -> RequestStream {
        let (tx, receiver) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        RequestStream {
            receiver,
            _subscription: subscription,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.entries.load().len()
    }

    /// Announce the request and wait for the first answer or the timeout.
    pub async fn intercept(&self, root: &ServerRoot, parts: &Parts) -> FilterOutcome {
        let started = Instant::now();
        let (response, mut receiver) = PendingResponse::channel();
        let event = RequestEvent {
            root: root.key().to_string(),
            location: RequestLocation::from_uri(&parts.uri),
            method: parts.method.clone(),
            headers: parts.headers.clone(),
            response: response.clone(),
        };

        let subscribers = self.subscribers.entries.load_full();
        if subscribers.is_empty() {
            tracing::debug!("No subscribers for filtered request {}", event.location.pathname);
        }
        for (_, subscriber) in subscribers.iter() {
            subscriber(&event);
        }

        let resolution = match self.timeout() {
            InterceptionTimeout::Disabled => receiver.await.ok(),
            InterceptionTimeout::After(limit) => {
                match tokio::time::timeout(limit, &mut receiver).await {
                    Ok(resolved) => resolved.ok(),
                    Err(_) if response.expire() => None,
                    // A send won the race against the timer; its value is in the channel.
                    Err(_) => receiver.await.ok(),
                }
            }
        };

        let outcome = match resolution {
            Some(Resolution::Override(over)) => FilterOutcome::Override(over),
            Some(Resolution::Default) => FilterOutcome::Fallback(FallbackReason::Released),
            None => {
                tracing::warn!(
                    "Filtered request {} was not answered within {}, serving file",
                    event.location.pathname,
                    self.timeout()
                );
                FilterOutcome::Fallback(FallbackReason::TimedOut)
            }
        };

        tracing::debug!(
            "Filtered request {} resolved in {:?} (overridden: {})",
            event.location.pathname,
            started.elapsed(),
            outcome.is_overridden()
        );
        outcome
    }
}

impl Default for InterceptionPipeline {
    fn default() -> Self {
        Self::new(InterceptionTimeout::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tempfile::TempDir;

    use super::*;

    fn request_parts(uri: &str) -> Parts {
        let (parts, _) = http::Request::builder()
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    fn test_root() -> (TempDir, ServerRoot) {
        let dir = TempDir::new().unwrap();
        let root = ServerRoot::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(
            InterceptionTimeout::from_millis(-1),
            InterceptionTimeout::default()
        );
        assert_eq!(
            InterceptionTimeout::from_millis(0),
            InterceptionTimeout::Disabled
        );
        assert_eq!(
            InterceptionTimeout::from_millis(250),
            InterceptionTimeout::After(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_pending_response_resolves_once() {
        let (response, mut rx) = PendingResponse::channel();
        assert_eq!(response.state(), ResponseState::Pending);

        assert!(response.send_default());
        assert!(!response.send(ResponseOverride::new("late")));
        assert!(!response.clone().send_default());
        assert!(!response.expire());
        assert_eq!(response.state(), ResponseState::Sent);

        assert!(matches!(rx.try_recv(), Ok(Resolution::Default)));
    }

    #[test]
    fn test_expired_response_ignores_send() {
        let (response, _rx) = PendingResponse::channel();
        assert!(response.expire());
        assert_eq!(response.state(), ResponseState::Expired);
        assert!(!response.send(ResponseOverride::new("too late")));
        assert_eq!(response.state(), ResponseState::Expired);
    }

    #[test]
    fn test_request_location() {
        let uri: http::Uri = "/index.txt?a=1&b=2".parse().unwrap();
        let location = RequestLocation::from_uri(&uri);
        assert_eq!(location.pathname, "/index.txt");
        assert_eq!(location.search, "?a=1&b=2");

        let uri: http::Uri = "/plain".parse().unwrap();
        assert_eq!(RequestLocation::from_uri(&uri).search, "");
    }

    #[tokio::test]
    async fn test_override_from_subscriber() {
        let (_dir, root) = test_root();
        let pipeline =
            InterceptionPipeline::new(InterceptionTimeout::After(Duration::from_secs(5)));
        let _sub = pipeline.subscribe(|event| {
            event.response.send(ResponseOverride::new("custom response"));
            event.response.send(ResponseOverride::new("ignored"));
        });

        let started = Instant::now();
        let outcome = pipeline.intercept(&root, &request_parts("/index.txt")).await;
        assert!(started.elapsed() < Duration::from_secs(1));
        match outcome {
            FilterOutcome::Override(over) => assert_eq!(over.body, Bytes::from("custom response")),
            other => panic!("expected override, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_default_releases_request() {
        let (_dir, root) = test_root();
        let pipeline = InterceptionPipeline::default();
        let _sub = pipeline.subscribe(|event| {
            event.response.send_default();
            event.response.send(ResponseOverride::new("custom response"));
        });

        let outcome = pipeline.intercept(&root, &request_parts("/index.txt")).await;
        assert!(matches!(
            outcome,
            FilterOutcome::Fallback(FallbackReason::Released)
        ));
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let (_dir, root) = test_root();
        let pipeline =
            InterceptionPipeline::new(InterceptionTimeout::After(Duration::from_millis(100)));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_subscriber = seen.clone();
        let _sub = pipeline.subscribe(move |_| {
            seen_by_subscriber.fetch_add(1, Ordering::SeqCst);
        });

        let started = Instant::now();
        let outcome = pipeline.intercept(&root, &request_parts("/index.txt")).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(matches!(
            outcome,
            FilterOutcome::Fallback(FallbackReason::TimedOut)
        ));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_send_after_timeout_is_ignored() {
        let (_dir, root) = test_root();
        let pipeline =
            InterceptionPipeline::new(InterceptionTimeout::After(Duration::from_millis(50)));
        let mut stream = pipeline.stream();

        let outcome = pipeline.intercept(&root, &request_parts("/index.txt")).await;
        assert!(!outcome.is_overridden());

        let event = stream.try_next().unwrap();
        assert_eq!(event.response.state(), ResponseState::Expired);
        assert!(!event.response.send(ResponseOverride::new("late")));
    }

    #[tokio::test]
    async fn test_disabled_timeout_waits_for_async_answer() {
        let (_dir, root) = test_root();
        let pipeline = InterceptionPipeline::new(InterceptionTimeout::Disabled);
        let mut stream = pipeline.stream();

        let answer = tokio::spawn(async move {
            let event = stream.next().await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            event.response.send(ResponseOverride::new("eventually"));
        });

        let outcome = pipeline.intercept(&root, &request_parts("/page.html?x=1")).await;
        answer.await.unwrap();
        assert!(outcome.is_overridden());
    }

    #[tokio::test]
    async fn test_subscribers_notified_in_order_and_dropped() {
        let (_dir, root) = test_root();
        let pipeline =
            InterceptionPipeline::new(InterceptionTimeout::After(Duration::from_millis(10)));
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_order = order.clone();
        let first = pipeline.subscribe(move |_| first_order.lock().unwrap().push(1));
        let second_order = order.clone();
        let _second = pipeline.subscribe(move |_| second_order.lock().unwrap().push(2));
        assert_eq!(pipeline.subscriber_count(), 2);

        pipeline.intercept(&root, &request_parts("/a")).await;
        first.unsubscribe();
        assert_eq!(pipeline.subscriber_count(), 1);
        pipeline.intercept(&root, &request_parts("/a")).await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 2]);
    }
}
