//! # Publisher Builder
//!
//! Small publishers and adapters used to wire a graph together.
//!
//! ```rust,no_run
//! use portflow::publisher::{CollectingSubscriber, PublisherBuilder};
//! use serde_json::json;
//!
//! # async fn demo() {
//! let sink = CollectingSubscriber::new();
//! PublisherBuilder::from_values([json!(1), json!(2)])
//!   .map(|v| json!(v.as_i64().unwrap_or(0) + 1))
//!   .asynchronous()
//!   .to(sink.clone());
//! assert_eq!(sink.result().await.unwrap(), vec![json!(2), json!(3)]);
//! # }
//! ```
//!
//! Every publisher here acknowledges `cancel` with `on_complete`, as input
//! ports expect.

use crate::error::StreamError;
use crate::mailbox::Mailbox;
use crate::protocol::{Publisher, Signal, Subscriber, Subscription, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::trace;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fluent construction of a publisher chain.
pub struct PublisherBuilder {
  publisher: Arc<dyn Publisher>,
}

impl PublisherBuilder {
  /// Starts from an existing publisher.
  pub fn from(publisher: Arc<dyn Publisher>) -> Self {
    Self { publisher }
  }

  /// A publisher emitting `value` on the first request, then completing.
  pub fn from_single(value: Value) -> Self {
    Self::from(Arc::new(SinglePublisher { value }))
  }

  /// A publisher emitting `values` in order, paced by demand.
  pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
    Self::from(Arc::new(ValuesPublisher {
      values: values.into_iter().collect(),
    }))
  }

  /// Transforms every value with `func`.
  pub fn map(self, func: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
    Self::from(Arc::new(MapPublisher {
      inner: self.publisher,
      func: Arc::new(func),
    }))
  }

  /// Mirrors downstream signals to `listener`, and demand and cancellation
  /// to `listener_subscription`, without altering the stream.
  pub fn tap(
    self,
    listener: Arc<dyn Subscriber>,
    listener_subscription: Option<Arc<dyn Subscription>>,
  ) -> Self {
    Self::from(Arc::new(TapPublisher {
      inner: self.publisher,
      listener,
      listener_subscription,
    }))
  }

  /// Delivers downstream signals on a later turn, in order.
  pub fn asynchronous(self) -> Self {
    Self::from(Arc::new(AsyncPublisher {
      inner: self.publisher,
    }))
  }

  /// The publisher built so far.
  pub fn build(self) -> Arc<dyn Publisher> {
    self.publisher
  }

  /// Subscribes `subscriber` to the built publisher.
  pub fn to(self, subscriber: Arc<dyn Subscriber>) {
    self.publisher.subscribe(subscriber);
  }
}

// ============================================================================
// Sources
// ============================================================================

struct SinglePublisher {
  value: Value,
}

impl Publisher for SinglePublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    let subscription = Arc::new(SingleSubscription {
      value: self.value.clone(),
      subscriber: Mutex::new(Some(Arc::clone(&subscriber))),
    });
    subscriber.on_subscribe(subscription);
  }
}

struct SingleSubscription {
  value: Value,
  subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
}

impl Subscription for SingleSubscription {
  fn request(&self, n: u64) {
    if n == 0 {
      return;
    }
    let subscriber = lock(&self.subscriber).take();
    if let Some(subscriber) = subscriber {
      subscriber.on_next(self.value.clone());
      subscriber.on_complete();
    }
  }

  fn cancel(&self) {
    let subscriber = lock(&self.subscriber).take();
    if let Some(subscriber) = subscriber {
      subscriber.on_complete();
    }
  }
}

struct ValuesPublisher {
  values: Vec<Value>,
}

impl Publisher for ValuesPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    let subscription = Arc::new(ValuesSubscription {
      state: Mutex::new(ValuesState {
        values: self.values.iter().cloned().collect(),
        demand: 0,
        emitting: false,
        subscriber: Some(Arc::clone(&subscriber)),
      }),
    });
    subscriber.on_subscribe(subscription);
  }
}

struct ValuesState {
  values: VecDeque<Value>,
  demand: u64,
  emitting: bool,
  subscriber: Option<Arc<dyn Subscriber>>,
}

struct ValuesSubscription {
  state: Mutex<ValuesState>,
}

impl Subscription for ValuesSubscription {
  fn request(&self, n: u64) {
    {
      let mut state = lock(&self.state);
      state.demand = state.demand.saturating_add(n);
      // A request made from inside `on_next` is served by the outer loop.
      if state.emitting {
        return;
      }
      state.emitting = true;
    }
    loop {
      let mut state = lock(&self.state);
      let Some(subscriber) = state.subscriber.clone() else {
        state.emitting = false;
        return;
      };
      if state.values.is_empty() {
        state.subscriber = None;
        state.emitting = false;
        drop(state);
        subscriber.on_complete();
        return;
      }
      if state.demand == 0 {
        state.emitting = false;
        return;
      }
      state.demand -= 1;
      let value = state.values.pop_front();
      drop(state);
      if let Some(value) = value {
        subscriber.on_next(value);
      }
    }
  }

  fn cancel(&self) {
    let subscriber = lock(&self.state).subscriber.take();
    if let Some(subscriber) = subscriber {
      subscriber.on_complete();
    }
  }
}

// ============================================================================
// Adapters
// ============================================================================

type MapFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

struct MapPublisher {
  inner: Arc<dyn Publisher>,
  func: MapFn,
}

impl Publisher for MapPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    self.inner.subscribe(Arc::new(MapSubscriber {
      downstream: subscriber,
      func: Arc::clone(&self.func),
    }));
  }
}

struct MapSubscriber {
  downstream: Arc<dyn Subscriber>,
  func: MapFn,
}

impl Subscriber for MapSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&self, value: Value) {
    self.downstream.on_next((self.func)(value));
  }

  fn on_error(&self, error: StreamError) {
    self.downstream.on_error(error);
  }

  fn on_complete(&self) {
    self.downstream.on_complete();
  }
}

struct TapPublisher {
  inner: Arc<dyn Publisher>,
  listener: Arc<dyn Subscriber>,
  listener_subscription: Option<Arc<dyn Subscription>>,
}

impl Publisher for TapPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    self.inner.subscribe(Arc::new(TapSubscriber {
      downstream: subscriber,
      listener: Arc::clone(&self.listener),
      listener_subscription: self.listener_subscription.clone(),
    }));
  }
}

struct TapSubscriber {
  downstream: Arc<dyn Subscriber>,
  listener: Arc<dyn Subscriber>,
  listener_subscription: Option<Arc<dyn Subscription>>,
}

impl Subscriber for TapSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    self.downstream.on_subscribe(Arc::new(TapSubscription {
      upstream: subscription,
      listener: self.listener_subscription.clone(),
    }));
  }

  fn on_next(&self, value: Value) {
    self.listener.on_next(value.clone());
    self.downstream.on_next(value);
  }

  fn on_error(&self, error: StreamError) {
    self.listener.on_error(error.clone());
    self.downstream.on_error(error);
  }

  fn on_complete(&self) {
    self.listener.on_complete();
    self.downstream.on_complete();
  }
}

struct TapSubscription {
  upstream: Arc<dyn Subscription>,
  listener: Option<Arc<dyn Subscription>>,
}

impl Subscription for TapSubscription {
  fn request(&self, n: u64) {
    if let Some(listener) = &self.listener {
      listener.request(n);
    }
    self.upstream.request(n);
  }

  fn cancel(&self) {
    if let Some(listener) = &self.listener {
      listener.cancel();
    }
    self.upstream.cancel();
  }
}

struct AsyncPublisher {
  inner: Arc<dyn Publisher>,
}

impl Publisher for AsyncPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    let target = Arc::clone(&subscriber);
    let mailbox = Mailbox::new("async", move |signal: Signal| signal.deliver(target.as_ref()));
    self.inner.subscribe(Arc::new(AsyncSubscriber {
      downstream: subscriber,
      mailbox,
    }));
  }
}

struct AsyncSubscriber {
  downstream: Arc<dyn Subscriber>,
  mailbox: Mailbox<Signal>,
}

impl Subscriber for AsyncSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    self.downstream.on_subscribe(subscription);
  }

  fn on_next(&self, value: Value) {
    self.mailbox.enqueue(Signal::Next(value));
  }

  fn on_error(&self, error: StreamError) {
    self.mailbox.enqueue(Signal::Error(error));
  }

  fn on_complete(&self) {
    self.mailbox.enqueue(Signal::Complete);
  }
}

// ============================================================================
// Collecting subscriber
// ============================================================================

#[derive(Default)]
struct Collected {
  values: Vec<Value>,
  outcome: Option<Result<(), StreamError>>,
}

/// A subscriber requesting everything and keeping every value.
pub struct CollectingSubscriber {
  state: Mutex<Collected>,
  subscription: Mutex<Option<Arc<dyn Subscription>>>,
  done: watch::Sender<bool>,
}

impl CollectingSubscriber {
  /// Creates a subscriber that requests unbounded demand once subscribed.
  pub fn new() -> Arc<Self> {
    let (done, _) = watch::channel(false);
    Arc::new(Self {
      state: Mutex::new(Collected::default()),
      subscription: Mutex::new(None),
      done,
    })
  }

  /// Values received so far.
  pub fn values(&self) -> Vec<Value> {
    lock(&self.state).values.clone()
  }

  /// Whether a terminal signal arrived.
  pub fn is_done(&self) -> bool {
    *self.done.borrow()
  }

  /// Cancels the subscription, if subscribed.
  pub fn cancel(&self) {
    let subscription = lock(&self.subscription).clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  /// Waits for the terminal signal: every value on completion, the error on
  /// failure.
  pub async fn result(&self) -> Result<Vec<Value>, StreamError> {
    let mut done = self.done.subscribe();
    // The sender lives in `self`, so the channel cannot close while waiting.
    let _ = done.wait_for(|finished| *finished).await;
    let state = lock(&self.state);
    match &state.outcome {
      Some(Err(error)) => Err(error.clone()),
      _ => Ok(state.values.clone()),
    }
  }

  fn finish(&self, outcome: Result<(), StreamError>) {
    {
      let mut state = lock(&self.state);
      if state.outcome.is_some() {
        return;
      }
      state.outcome = Some(outcome);
    }
    lock(&self.subscription).take();
    self.done.send_replace(true);
  }
}

impl Subscriber for CollectingSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    *lock(&self.subscription) = Some(Arc::clone(&subscription));
    subscription.request(u64::MAX);
  }

  fn on_next(&self, value: Value) {
    trace!("CollectingSubscriber::on_next(value={})", value);
    lock(&self.state).values.push(value);
  }

  fn on_error(&self, error: StreamError) {
    self.finish(Err(error));
  }

  fn on_complete(&self) {
    self.finish(Ok(()));
  }
}
