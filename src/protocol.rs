//! # Stream Protocol
//!
//! The demand-driven protocol every port and publisher speaks.
//!
//! A [`Publisher`] hands each [`Subscriber`] a [`Subscription`] through
//! `on_subscribe`. The subscriber then signals demand with
//! [`Subscription::request`]; the publisher may deliver at most that many
//! values through `on_next`, followed by at most one terminal signal
//! (`on_complete` or `on_error`). [`Subscription::cancel`] asks the publisher
//! to stop; publishers in this crate acknowledge it with `on_complete`.
//!
//! Demand is counted in `u64` and saturates; `u64::MAX` reads as unbounded.

use crate::error::StreamError;
use std::sync::Arc;

/// A value travelling between components.
pub type Value = serde_json::Value;

/// Demand handle given to a subscriber.
pub trait Subscription: Send + Sync {
  /// Signals that the subscriber can accept `n` more values.
  fn request(&self, n: u64);
  /// Asks the publisher to stop sending.
  fn cancel(&self);
}

/// Receiver of values and terminal signals.
pub trait Subscriber: Send + Sync {
  /// Called once, before any other signal.
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
  /// Delivers one value. Never called without outstanding demand.
  fn on_next(&self, value: Value);
  /// Terminal failure.
  fn on_error(&self, error: StreamError);
  /// Terminal success.
  fn on_complete(&self);
}

/// Source of values.
pub trait Publisher: Send + Sync {
  /// Attaches a subscriber; `on_subscribe` is called before this returns.
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>);
}

/// A downstream signal, as buffered by ports and mailboxes.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
  /// A value.
  Next(Value),
  /// Successful end of stream.
  Complete,
  /// Failed end of stream.
  Error(StreamError),
}

impl Signal {
  /// Delivers this signal to `subscriber`.
  pub fn deliver(self, subscriber: &dyn Subscriber) {
    match self {
      Signal::Next(value) => subscriber.on_next(value),
      Signal::Complete => subscriber.on_complete(),
      Signal::Error(err) => subscriber.on_error(err),
    }
  }
}
