//! # Output Port
//!
//! The sending end of a component: broadcasts every value to all of its
//! subscribers (fan-out), paced by the slowest of them.
//!
//! Each subscriber's requests accumulate in its own counter. Whenever a
//! request arrives the port computes the demand shared by every subscriber
//! (the minimum of the counters), takes it off each counter and adds it to the
//! port's own demand. Shared demand first flushes values the component queued
//! with [`OutPort::send_or_enqueue`]; whatever is left is reported to the
//! component as an [`OutEvent::Request`].
//!
//! Cancellation by a subscriber is acknowledged with `on_complete` and removes
//! it; when the last subscriber leaves, the port drains and reports
//! [`OutEvent::Closed`] with `cancelled: true` so the component can stop.

use super::base::{PortState, TerminationSignal};
use crate::error::StreamError;
use crate::jobs::{JobId, JobStore};
use crate::mailbox::Mailbox;
use crate::protocol::{Signal, Subscriber, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identifier the owning component assigns to each subscriber.
pub type SubscriberId = u64;

/// Outcome of an asynchronous job run for an output port: a value to send,
/// the end of the stream (`None`), or a failure.
pub type StepResult = Result<Option<Value>, StreamError>;

/// Notification from an output port to its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutEvent {
  /// Downstream can accept `n` more values. `n` is zero when the request
  /// was entirely served from the queue.
  Request(u64),
  /// The port terminated. `cancelled` is set when every subscriber left.
  Closed {
    /// Whether the port closed because downstream cancelled.
    cancelled: bool,
  },
}

enum Downstream {
  Signal(Arc<dyn Subscriber>, Signal),
  Terminated,
}

struct Tracked {
  id: SubscriberId,
  subscriber: Arc<dyn Subscriber>,
  demand: u64,
}

/// Fan-out sending port.
pub struct OutPort {
  name: String,
  state: PortState,
  demand: u64,
  queue: VecDeque<Value>,
  subscribers: Vec<Tracked>,
  jobs: JobStore<StepResult>,
  terminal: Option<StreamError>,
  cancelled: bool,
  events: VecDeque<OutEvent>,
  outbox: Mailbox<Downstream>,
  signal: TerminationSignal,
}

impl OutPort {
  /// Creates an active port with no subscribers.
  ///
  /// # Arguments
  ///
  /// * `name` - Diagnostic name, conventionally `component[port]`.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    let signal = TerminationSignal::new();
    let fired = signal.clone();
    let outbox = Mailbox::new(name.clone(), move |message| match message {
      Downstream::Signal(subscriber, signal) => signal.deliver(subscriber.as_ref()),
      Downstream::Terminated => fired.fire(),
    });
    Self {
      name,
      state: PortState::Active,
      demand: 0,
      queue: VecDeque::new(),
      subscribers: Vec::new(),
      jobs: JobStore::new(),
      terminal: None,
      cancelled: false,
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

  /// Whether the port still accepts new values and jobs.
  pub fn is_active(&self) -> bool {
    self.state == PortState::Active
  }

  /// Whether the terminal signal has been produced.
  pub fn is_terminated(&self) -> bool {
    self.state == PortState::Terminated
  }

  /// Number of attached subscribers.
  pub fn subscriber_count(&self) -> usize {
    self.subscribers.len()
  }

  /// Demand shared by every subscriber and not yet satisfied.
  pub fn requested(&self) -> u64 {
    self.demand
  }

  /// Values waiting for demand.
  pub fn queue_size(&self) -> usize {
    self.queue.len()
  }

  /// Jobs registered and not yet applied.
  pub fn pending_jobs(&self) -> usize {
    self.jobs.pending_count()
  }

  /// Awaitable flag raised once the terminal signal has reached every
  /// subscriber.
  pub fn termination(&self) -> TerminationSignal {
    self.signal.clone()
  }

  /// Pops the next event for the owning component.
  pub fn next_event(&mut self) -> Option<OutEvent> {
    self.events.pop_front()
  }

  /// Attaches a subscriber with zero demand.
  ///
  /// Returns `false` when the port has already terminated; the caller then
  /// owes the subscriber an immediate `on_complete`.
  pub fn add_subscriber(&mut self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
    trace!("OutPort::add_subscriber(name={}, id={})", self.name, id);
    if self.state == PortState::Terminated {
      return false;
    }
    self.subscribers.push(Tracked {
      id,
      subscriber,
      demand: 0,
    });
    true
  }

  /// Subscriber `id` requested `n` more values.
  pub fn request_from(&mut self, id: SubscriberId, n: u64) {
    trace!("OutPort::request_from(name={}, id={}, n={})", self.name, id, n);
    if self.state == PortState::Terminated || n == 0 {
      return;
    }
    let Some(tracked) = self.subscribers.iter_mut().find(|s| s.id == id) else {
      return;
    };
    tracked.demand = tracked.demand.saturating_add(n);
    self.rebalance();
    self.advance_drain();
  }

  /// Subscriber `id` cancelled. The cancel is acknowledged with
  /// `on_complete`; losing the last subscriber drains the port.
  pub fn cancel_from(&mut self, id: SubscriberId) {
    trace!("OutPort::cancel_from(name={}, id={})", self.name, id);
    if self.state == PortState::Terminated {
      return;
    }
    let Some(pos) = self.subscribers.iter().position(|s| s.id == id) else {
      return;
    };
    let tracked = self.subscribers.remove(pos);
    self
      .outbox
      .enqueue(Downstream::Signal(tracked.subscriber, Signal::Complete));
    if self.subscribers.is_empty() && self.state == PortState::Active {
      self.cancelled = true;
      self.begin_drain(None);
    } else {
      // A departing slow subscriber may unblock the others.
      self.rebalance();
      self.advance_drain();
    }
  }

  /// Sends a value to every subscriber.
  ///
  /// Ignored once the port has terminated.
  ///
  /// # Panics
  ///
  /// If there is no outstanding demand, or the port already finished its
  /// jobs and is only draining queued values.
  pub fn send(&mut self, value: Value) {
    match self.state {
      PortState::Terminated => {
        trace!("{}: discarding value on terminated port", self.name);
        return;
      }
      PortState::DrainingMessages => {
        panic!("{}: illegal send ({}) after completion", self.name, value)
      }
      PortState::Active | PortState::DrainingJobs => {
        assert!(
          self.demand > 0,
          "{}: illegal send ({}) with no demand",
          self.name,
          value
        );
      }
    }
    self.broadcast(value);
  }

  /// Sends the value if there is demand, queues it otherwise.
  pub fn send_or_enqueue(&mut self, value: Value) {
    match self.state {
      PortState::Active | PortState::DrainingJobs if self.demand > 0 => self.broadcast(value),
      PortState::Active => self.queue.push_back(value),
      _ => trace!("{}: discarding value after completion", self.name),
    }
  }

  /// Ends the stream once pending jobs and queued values are flushed.
  /// Repeated calls are ignored.
  pub fn complete(&mut self) {
    trace!("OutPort::complete(name={})", self.name);
    self.begin_drain(None);
  }

  /// Fails the stream once pending jobs are flushed; queued values are
  /// dropped. Repeated calls are ignored.
  pub fn error(&mut self, error: StreamError) {
    trace!("OutPort::error(name={}, error={})", self.name, error);
    self.begin_drain(Some(error));
  }

  /// Registers a job whose result will be applied in order. Refused once
  /// the port stopped being active.
  pub fn register_job(&mut self) -> Option<JobId> {
    if self.state != PortState::Active {
      return None;
    }
    self.jobs.add()
  }

  /// Records the result of job `id` and applies every result that is ready,
  /// in registration order. Returns the number of results applied.
  pub fn finish_job(&mut self, id: JobId, result: StepResult) -> usize {
    let ready = self.jobs.complete(id, result);
    let applied = ready.len();
    for result in ready {
      match result {
        Ok(Some(value)) => match self.state {
          PortState::Active | PortState::DrainingJobs => self.send(value),
          _ => trace!("{}: discarding job result after completion", self.name),
        },
        Ok(None) => self.complete(),
        Err(error) => self.error(error),
      }
    }
    self.advance_drain();
    applied
  }

  fn broadcast(&mut self, value: Value) {
    for tracked in &self.subscribers {
      self.outbox.enqueue(Downstream::Signal(
        Arc::clone(&tracked.subscriber),
        Signal::Next(value.clone()),
      ));
    }
    self.demand = self.demand.saturating_sub(1);
  }

  fn rebalance(&mut self) {
    // Shared demand is the minimum over subscribers; it moves to the port.
    let shared = self.subscribers.iter().map(|s| s.demand).min().unwrap_or(0);
    if shared > 0 {
      for tracked in self.subscribers.iter_mut() {
        tracked.demand -= shared;
      }
      self.demand = self.demand.saturating_add(shared);
      let mut remaining = shared;
      while remaining > 0 {
        match self.queue.pop_front() {
          Some(value) => {
            self.broadcast(value);
            remaining -= 1;
          }
          None => break,
        }
      }
      // A fully flushed request is still reported, as `Request(0)`, so the
      // component sees its queue shrink.
      if self.state == PortState::Active {
        self.events.push_back(OutEvent::Request(remaining));
      }
    }
  }

  fn begin_drain(&mut self, error: Option<StreamError>) {
    if self.state != PortState::Active {
      return;
    }
    debug!("{}: draining", self.name);
    if error.is_some() {
      self.queue.clear();
    }
    self.terminal = error;
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
    if self.subscribers.is_empty() {
      self.queue.clear();
    }
    if self.queue.is_empty() {
      self.finalize();
    }
  }

  fn finalize(&mut self) {
    debug!("{}: terminated", self.name);
    self.state = PortState::Terminated;
    self.jobs.close();
    for tracked in self.subscribers.drain(..) {
      let signal = match &self.terminal {
        Some(error) => Signal::Error(error.clone()),
        None => Signal::Complete,
      };
      self.outbox.enqueue(Downstream::Signal(tracked.subscriber, signal));
    }
    self.outbox.enqueue(Downstream::Terminated);
    self.events.push_back(OutEvent::Closed {
      cancelled: self.cancelled,
    });
  }
}
