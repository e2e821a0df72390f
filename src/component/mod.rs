//! # Components
//!
//! A component is a live node of a running graph: it owns one input port per
//! input name and one output port per output name, hands out the subscriber
//! and publisher handles its neighbours connect to, and terminates once its
//! work is done.
//!
//! Three layers build on [`BaseComponent`]:
//!
//! - [`PromiseComponent`]: each unit of downstream demand becomes one async
//!   job whose result is sent, in order.
//! - [`PureComponent`]: a promise component applying a function to one value
//!   pulled from every input.
//! - [`GeneratorComponent`]: a promise component driven by an async stream
//!   over its inputs.
//!
//! Composite components (whole graphs) implement [`Component`] directly; see
//! [`GraphComponent`](crate::runner::GraphComponent).

mod base;
mod context;
mod generator;
mod promise;
mod pure;

pub use base::{BaseComponent, Behavior};
pub use context::{ComponentContext, ComponentHandle};
pub use generator::{Generator, GeneratorComponent, InputStream, OutputStream};
pub use promise::{DEFAULT_MAX_IN_FLIGHT, PromiseBehavior, PromiseComponent};
pub use pure::{PureComponent, PureFn};

use crate::error::StreamError;
use crate::protocol::{Publisher, Subscriber};
use crate::store::ComponentSpec;
use async_trait::async_trait;
use std::sync::Arc;

/// A live, startable node of a running graph.
#[async_trait]
pub trait Component: Send + Sync {
  /// Instance name.
  fn name(&self) -> &str;

  /// Input and output port names.
  fn spec(&self) -> &ComponentSpec;

  /// A fresh subscriber feeding input `idx`. Every upstream publisher gets
  /// its own subscriber.
  ///
  /// # Panics
  ///
  /// If there is no input at `idx`.
  fn subscriber_for(&self, idx: usize) -> Arc<dyn Subscriber>;

  /// The publisher behind output `idx`.
  ///
  /// # Panics
  ///
  /// If there is no output at `idx`.
  fn publisher_for(&self, idx: usize) -> Arc<dyn Publisher>;

  /// Starts the component. Only the first call has an effect.
  fn start(&self);

  /// Stops the component: inputs are cancelled and outputs completed, or
  /// failed with `error`. Idempotent.
  fn terminate(&self, error: Option<StreamError>);

  /// Whether every port has terminated.
  fn is_terminated(&self) -> bool;

  /// Resolves once every port has terminated.
  async fn when_terminated(&self);
}

#[cfg(test)]
mod base_test;
#[cfg(test)]
mod generator_test;
