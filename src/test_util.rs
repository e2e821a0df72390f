//! Shared test doubles: recording subscriptions, subscribers and publishers,
//! plus a polling helper for asserting on asynchronously delivered signals.

use crate::error::StreamError;
use crate::protocol::{Publisher, Subscriber, Subscription, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Polls `condition` until it holds, failing the test after about two seconds.
pub(crate) async fn eventually(what: &str, condition: impl Fn() -> bool) {
  for _ in 0..1000 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(2)).await;
  }
  panic!("timed out waiting for {}", what);
}

/// Lets every scheduled mailbox run for a while.
pub(crate) async fn settle() {
  for _ in 0..20 {
    tokio::task::yield_now().await;
  }
  tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// Mock Subscription
// ============================================================================

#[derive(Default)]
pub(crate) struct MockSubscription {
  requested: AtomicU64,
  cancelled: AtomicBool,
}

impl MockSubscription {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub(crate) fn requested(&self) -> u64 {
    self.requested.load(Ordering::SeqCst)
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

impl Subscription for MockSubscription {
  fn request(&self, n: u64) {
    let _ = self
      .requested
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| Some(r.saturating_add(n)));
  }

  fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

// ============================================================================
// Mock Subscriber
// ============================================================================

pub(crate) struct MockSubscriber {
  initial_request: u64,
  subscription: Mutex<Option<Arc<dyn Subscription>>>,
  values: Mutex<Vec<Value>>,
  completed: AtomicBool,
  error: Mutex<Option<StreamError>>,
}

impl MockSubscriber {
  /// A subscriber that never requests on its own.
  pub(crate) fn new() -> Arc<Self> {
    Self::requesting(0)
  }

  /// A subscriber that requests `n` as soon as it is subscribed.
  pub(crate) fn requesting(n: u64) -> Arc<Self> {
    Arc::new(Self {
      initial_request: n,
      subscription: Mutex::new(None),
      values: Mutex::new(Vec::new()),
      completed: AtomicBool::new(false),
      error: Mutex::new(None),
    })
  }

  pub(crate) fn request(&self, n: u64) {
    let subscription = self.subscription.lock().unwrap().clone();
    subscription.expect("not subscribed").request(n);
  }

  pub(crate) fn cancel(&self) {
    let subscription = self.subscription.lock().unwrap().clone();
    subscription.expect("not subscribed").cancel();
  }

  pub(crate) fn is_subscribed(&self) -> bool {
    self.subscription.lock().unwrap().is_some()
  }

  pub(crate) fn values(&self) -> Vec<Value> {
    self.values.lock().unwrap().clone()
  }

  pub(crate) fn is_completed(&self) -> bool {
    self.completed.load(Ordering::SeqCst)
  }

  pub(crate) fn error(&self) -> Option<StreamError> {
    self.error.lock().unwrap().clone()
  }

  pub(crate) fn is_finished(&self) -> bool {
    self.is_completed() || self.error().is_some()
  }
}

impl Subscriber for MockSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    *self.subscription.lock().unwrap() = Some(Arc::clone(&subscription));
    if self.initial_request > 0 {
      subscription.request(self.initial_request);
    }
  }

  fn on_next(&self, value: Value) {
    self.values.lock().unwrap().push(value);
  }

  fn on_error(&self, error: StreamError) {
    *self.error.lock().unwrap() = Some(error);
  }

  fn on_complete(&self) {
    self.completed.store(true, Ordering::SeqCst);
  }
}

// ============================================================================
// Mock Publisher
// ============================================================================

/// A publisher driven by the test: values are pushed explicitly and
/// delivered synchronously, regardless of demand.
pub(crate) struct MockPublisher {
  subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
  subscription: Arc<MockSubscription>,
}

impl MockPublisher {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self {
      subscriber: Mutex::new(None),
      subscription: MockSubscription::new(),
    })
  }

  fn subscriber(&self) -> Arc<dyn Subscriber> {
    self.subscriber.lock().unwrap().clone().expect("no subscriber")
  }

  pub(crate) fn next(&self, value: Value) {
    self.subscriber().on_next(value);
  }

  pub(crate) fn complete(&self) {
    self.subscriber().on_complete();
  }

  pub(crate) fn error(&self, error: StreamError) {
    self.subscriber().on_error(error);
  }

  pub(crate) fn requested(&self) -> u64 {
    self.subscription.requested()
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.subscription.is_cancelled()
  }
}

impl Publisher for MockPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    *self.subscriber.lock().unwrap() = Some(Arc::clone(&subscriber));
    subscriber.on_subscribe(Arc::clone(&self.subscription) as Arc<dyn Subscription>);
  }
}
