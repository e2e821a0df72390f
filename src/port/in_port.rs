//! # Input Port
//!
//! The receiving end of a component: merges any number of upstream
//! subscriptions (fan-in) into one stream of values for the component.
//!
//! Demand is kept at parity: the port remembers the aggregate number of values
//! it has asked for, and every subscription is asked for the same amount. A
//! subscription that joins late, or that fell behind, is requested exactly the
//! difference. The port completes once every subscription has completed; the
//! first error cancels the remaining subscriptions and fails the port.
//!
//! The port is a synchronous state machine. Signals meant for the owning
//! component are buffered as events and read with [`InPort::next_event`];
//! signals meant for upstream publishers go through the port's [`Mailbox`].

use super::base::{PortState, TerminationSignal};
use crate::error::StreamError;
use crate::jobs::{JobId, JobStore};
use crate::mailbox::Mailbox;
use crate::protocol::{Signal, Subscription, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Identifier the owning component assigns to each upstream subscription.
pub type SubscriptionId = u64;

enum Upstream {
  Request(Arc<dyn Subscription>, u64),
  Cancel(Arc<dyn Subscription>),
  Terminated,
}

struct Tracked {
  id: SubscriptionId,
  subscription: Arc<dyn Subscription>,
  demanded: u64,
}

/// Fan-in receiving port.
pub struct InPort {
  name: String,
  state: PortState,
  demanded: u64,
  cancelled: bool,
  queue: VecDeque<Value>,
  subscriptions: Vec<Tracked>,
  jobs: JobStore<()>,
  terminal: Option<StreamError>,
  events: VecDeque<Signal>,
  outbox: Mailbox<Upstream>,
  signal: TerminationSignal,
}

impl InPort {
  /// Creates an active port with no subscriptions.
  ///
  /// # Arguments
  ///
  /// * `name` - Diagnostic name, conventionally `component[port]`.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    let signal = TerminationSignal::new();
    let fired = signal.clone();
    let outbox = Mailbox::new(name.clone(), move |message| match message {
      Upstream::Request(subscription, n) => subscription.request(n),
      Upstream::Cancel(subscription) => subscription.cancel(),
      Upstream::Terminated => fired.fire(),
    });
    Self {
      name,
      state: PortState::Active,
      demanded: 0,
      cancelled: false,
      queue: VecDeque::new(),
      subscriptions: Vec::new(),
      jobs: JobStore::new(),
      terminal: None,
      events: VecDeque::new(),
      outbox,
      signal,
    }
  }

  /// The port's diagnostic name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Current lifecycle state.
  pub fn state(&self) -> PortState {
    self.state
  }

  /// Whether the terminal event has been produced.
  pub fn is_terminated(&self) -> bool {
    self.state == PortState::Terminated
  }

  /// Whether [`cancel`](Self::cancel) has been called.
  pub fn is_cancelled(&self) -> bool {
    self.cancelled
  }

  /// Number of live upstream subscriptions.
  pub fn subscription_count(&self) -> usize {
    self.subscriptions.len()
  }

  /// Outstanding aggregate demand.
  pub fn requested(&self) -> u64 {
    self.demanded
  }

  /// Values received but not yet requested by the component.
  pub fn queue_size(&self) -> usize {
    self.queue.len()
  }

  /// Awaitable flag raised once the terminal event has been produced and
  /// every upstream signal posted before it has been delivered.
  pub fn termination(&self) -> TerminationSignal {
    self.signal.clone()
  }

  /// Pops the next event for the owning component.
  pub fn next_event(&mut self) -> Option<Signal> {
    self.events.pop_front()
  }

  /// Registers an upstream subscription.
  ///
  /// A subscription joining while the port already has demand is requested
  /// up to parity. A subscription arriving after the port was cancelled or
  /// stopped being active is cancelled straight away.
  pub fn on_subscribe(&mut self, id: SubscriptionId, subscription: Arc<dyn Subscription>) {
    trace!("InPort::on_subscribe(name={}, id={})", self.name, id);
    if self.state != PortState::Active || self.cancelled {
      debug!("{}: cancelling late subscription {}", self.name, id);
      self.outbox.enqueue(Upstream::Cancel(subscription));
      return;
    }
    if self.demanded > 0 {
      self
        .outbox
        .enqueue(Upstream::Request(Arc::clone(&subscription), self.demanded));
    }
    self.subscriptions.push(Tracked {
      id,
      subscription,
      demanded: self.demanded,
    });
  }

  /// Accepts a value from subscription `id`.
  ///
  /// # Panics
  ///
  /// If that subscription has no outstanding demand.
  pub fn on_next(&mut self, id: SubscriptionId, value: Value) {
    if self.state == PortState::Terminated {
      trace!("{}: discarding value on terminated port", self.name);
      return;
    }
    let Some(tracked) = self.subscriptions.iter_mut().find(|s| s.id == id) else {
      trace!("{}: discarding value from unknown subscription {}", self.name, id);
      return;
    };
    assert!(
      tracked.demanded > 0,
      "{}: illegal on_next ({}) with no demand on subscription {}",
      self.name,
      value,
      id
    );
    tracked.demanded -= 1;
    if self.cancelled {
      trace!("{}: discarding trailing value after cancel", self.name);
      return;
    }
    if self.demanded == 0 {
      self.queue.push_back(value);
    } else {
      self.demanded -= 1;
      self.events.push_back(Signal::Next(value));
    }
  }

  /// Subscription `id` finished. The port starts draining once every
  /// subscription has finished.
  pub fn on_complete(&mut self, id: SubscriptionId) {
    trace!("InPort::on_complete(name={}, id={})", self.name, id);
    if self.state == PortState::Terminated || !self.remove(id) {
      return;
    }
    if self.subscriptions.is_empty() {
      self.begin_drain(None);
    }
  }

  /// Subscription `id` failed. The other subscriptions are cancelled and the
  /// port starts draining with the error.
  pub fn on_error(&mut self, id: SubscriptionId, error: StreamError) {
    trace!("InPort::on_error(name={}, id={}, error={})", self.name, id, error);
    if self.state == PortState::Terminated || !self.remove(id) {
      return;
    }
    for tracked in self.subscriptions.drain(..) {
      self.outbox.enqueue(Upstream::Cancel(tracked.subscription));
    }
    self.queue.clear();
    self.begin_drain(Some(error));
  }

  /// Requests `n` more values: queued values are handed over first, the rest
  /// raises the aggregate demand and is forwarded upstream.
  pub fn request(&mut self, n: u64) {
    trace!("InPort::request(name={}, n={})", self.name, n);
    if self.state == PortState::Terminated || n == 0 {
      return;
    }
    let mut remaining = n;
    while remaining > 0 {
      match self.queue.pop_front() {
        Some(value) => {
          self.events.push_back(Signal::Next(value));
          remaining -= 1;
        }
        None => break,
      }
    }
    if remaining > 0 && self.state == PortState::Active && !self.cancelled {
      self.demanded = self.demanded.saturating_add(remaining);
      for tracked in self.subscriptions.iter_mut() {
        if tracked.demanded < self.demanded {
          let delta = self.demanded - tracked.demanded;
          tracked.demanded = self.demanded;
          self
            .outbox
            .enqueue(Upstream::Request(Arc::clone(&tracked.subscription), delta));
        }
      }
    }
    self.advance_drain();
  }

  /// Cancels every subscription and discards queued and trailing values.
  ///
  /// Returns immediately; the port terminates once every subscription has
  /// acknowledged, or right away if there are none.
  pub fn cancel(&mut self) {
    trace!("InPort::cancel(name={})", self.name);
    if self.state == PortState::Terminated {
      return;
    }
    if !self.cancelled {
      self.cancelled = true;
      self.queue.clear();
      self.events.retain(|event| !matches!(event, Signal::Next(_)));
      for tracked in &self.subscriptions {
        self
          .outbox
          .enqueue(Upstream::Cancel(Arc::clone(&tracked.subscription)));
      }
    }
    if self.subscriptions.is_empty() {
      self.begin_drain(None);
      self.advance_drain();
    }
  }

  /// Registers a job the port must wait for before terminating.
  pub fn register_job(&mut self) -> Option<JobId> {
    if self.state == PortState::Terminated {
      return None;
    }
    self.jobs.add()
  }

  /// Marks job `id` as finished.
  pub fn finish_job(&mut self, id: JobId) {
    self.jobs.complete(id, ());
    self.advance_drain();
  }

  /// Jobs registered through this port and not yet finished.
  pub fn pending_jobs(&self) -> usize {
    self.jobs.pending_count()
  }

  fn remove(&mut self, id: SubscriptionId) -> bool {
    let before = self.subscriptions.len();
    self.subscriptions.retain(|s| s.id != id);
    if self.subscriptions.len() == before {
      warn!("{}: terminal signal from unknown subscription {}", self.name, id);
      return false;
    }
    true
  }

  fn begin_drain(&mut self, error: Option<StreamError>) {
    if self.state != PortState::Active {
      return;
    }
    debug!("{}: draining", self.name);
    self.terminal = error;
    self.demanded = 0;
    self.state = PortState::DrainingJobs;
    self.advance_drain();
  }

  fn advance_drain(&mut self) {
    if self.state == PortState::DrainingJobs && self.jobs.is_drained() {
      self.state = PortState::DrainingMessages;
    }
    if self.state != PortState::DrainingMessages {
      return;
    }
    if self.cancelled {
      self.queue.clear();
    }
    if !self.queue.is_empty() {
      return;
    }
    if !self.jobs.is_drained() {
      // Jobs scheduled while the queue was being consumed.
      self.state = PortState::DrainingJobs;
      return;
    }
    self.finalize();
  }

  fn finalize(&mut self) {
    debug!("{}: terminated", self.name);
    self.state = PortState::Terminated;
    self.jobs.close();
    let event = match self.terminal.take() {
      Some(error) => Signal::Error(error),
      None => Signal::Complete,
    };
    self.events.push_back(event);
    self.outbox.enqueue(Upstream::Terminated);
  }
}
