//! # Mailbox
//!
//! A FIFO of outgoing signals owned by one port.
//!
//! Enqueueing never runs the handler inline: the first message posted to an
//! idle mailbox schedules a tokio task that drains the queue in order and goes
//! idle again once it is empty. Messages posted while the task is running are
//! picked up by the same task, so the handler sees them in posting order.
//!
//! This is what keeps peers from observing each other's signals synchronously:
//! a port's state change and the delivery of the resulting signal always
//! happen on different turns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::trace;

/// Messages handled before the drain task yields back to the scheduler.
const BATCH: usize = 64;

struct State<M> {
  queue: VecDeque<M>,
  scheduled: bool,
}

struct Inner<M> {
  name: String,
  state: Mutex<State<M>>,
  handler: Box<dyn Fn(M) + Send + Sync>,
  idle: Notify,
}

/// Per-port outgoing queue with a deferred, ordered handler.
pub struct Mailbox<M: Send + 'static> {
  inner: Arc<Inner<M>>,
}

impl<M: Send + 'static> Clone for Mailbox<M> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<M: Send + 'static> Mailbox<M> {
  /// Creates an idle mailbox.
  ///
  /// # Arguments
  ///
  /// * `name` - Used in trace output, usually the owning port's name.
  /// * `handler` - Invoked once per message, in posting order.
  pub fn new(name: impl Into<String>, handler: impl Fn(M) + Send + Sync + 'static) -> Self {
    Self {
      inner: Arc::new(Inner {
        name: name.into(),
        state: Mutex::new(State {
          queue: VecDeque::new(),
          scheduled: false,
        }),
        handler: Box::new(handler),
        idle: Notify::new(),
      }),
    }
  }

  /// Posts a message. Must be called from within a tokio runtime.
  pub fn enqueue(&self, message: M) {
    let schedule = {
      let mut state = self.inner.lock();
      state.queue.push_back(message);
      !std::mem::replace(&mut state.scheduled, true)
    };
    if schedule {
      trace!("Mailbox::enqueue(name={}) scheduling drain", self.inner.name);
      let inner = Arc::clone(&self.inner);
      tokio::spawn(async move { inner.drain().await });
    }
  }

  /// Number of messages waiting to be handled.
  pub fn queue_size(&self) -> usize {
    self.inner.lock().queue.len()
  }

  /// Whether the queue is empty and no drain task is running.
  pub fn is_idle(&self) -> bool {
    let state = self.inner.lock();
    state.queue.is_empty() && !state.scheduled
  }

  /// Waits until every posted message has been handled.
  pub async fn when_idle(&self) {
    loop {
      let notified = self.inner.idle.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.is_idle() {
        return;
      }
      notified.await;
    }
  }
}

impl<M> Inner<M> {
  fn lock(&self) -> MutexGuard<'_, State<M>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  async fn drain(&self) {
    loop {
      for _ in 0..BATCH {
        let message = {
          let mut state = self.lock();
          match state.queue.pop_front() {
            Some(message) => message,
            None => {
              state.scheduled = false;
              drop(state);
              self.idle.notify_waiters();
              return;
            }
          }
        };
        (self.handler)(message);
      }
      tokio::task::yield_now().await;
    }
  }
}
