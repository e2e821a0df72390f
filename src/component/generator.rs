//! # Generator Components
//!
//! A component written as an async stream over its inputs. Each input is
//! exposed as a stream that pulls one value at a time; the generator returns
//! the stream of output values. A single driver task advances the output
//! stream once per unit of demand, in order, so the generator body runs
//! sequentially even though demand arrives concurrently.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use portflow::component::{GeneratorComponent, InputStream, OutputStream};
//!
//! fn doubled(mut inputs: Vec<InputStream>) -> OutputStream {
//!   let mut input = inputs.remove(0);
//!   Box::pin(async_stream::stream! {
//!     while let Some(value) = input.next().await {
//!       yield value.map(|v| serde_json::json!(v.as_i64().unwrap_or(0) * 2));
//!     }
//!   })
//! }
//!
//! let _logic = GeneratorComponent::new(doubled);
//! ```

use super::base::BaseComponent;
use super::context::{ComponentContext, ComponentHandle};
use super::promise::{PromiseBehavior, PromiseComponent};
use crate::error::{ComponentInfo, StreamError};
use crate::port::StepResult;
use crate::protocol::Value;
use crate::store::ComponentSpec;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// One input of a generator: yields pulled values until the input is done,
/// and at most one error.
pub type InputStream = BoxStream<'static, Result<Value, StreamError>>;

/// The values a generator produces; an error ends the output with a failure.
pub type OutputStream = BoxStream<'static, Result<Value, StreamError>>;

/// Body of a generator component.
pub trait Generator: Send + 'static {
  /// Builds the output stream from one stream per input.
  fn process(self: Box<Self>, inputs: Vec<InputStream>) -> OutputStream;
}

impl<F> Generator for F
where
  F: FnOnce(Vec<InputStream>) -> OutputStream + Send + 'static,
{
  fn process(self: Box<Self>, inputs: Vec<InputStream>) -> OutputStream {
    (*self)(inputs)
  }
}

type Reply = oneshot::Sender<StepResult>;

/// Promise logic driving a [`Generator`].
pub struct GeneratorComponent {
  generator: Option<Box<dyn Generator>>,
  driver: Option<mpsc::UnboundedSender<Reply>>,
}

impl GeneratorComponent {
  /// Wraps a generator body; it is started on first demand.
  pub fn new(generator: impl Generator) -> Self {
    Self {
      generator: Some(Box::new(generator)),
      driver: None,
    }
  }

  /// Creates a live generator component.
  pub fn create(
    name: impl Into<String>,
    spec: ComponentSpec,
    generator: impl Generator,
  ) -> Arc<BaseComponent<PromiseComponent<GeneratorComponent>>> {
    BaseComponent::new(name, spec, PromiseComponent::new(Self::new(generator)))
  }

  fn driver(&mut self, ctx: &ComponentContext) -> Option<&mpsc::UnboundedSender<Reply>> {
    if self.driver.is_none() {
      if let Some(generator) = self.generator.take() {
        self.driver = Some(spawn_driver(
          generator,
          ctx.handle(),
          ctx.spec().ins.len(),
          ctx.info().clone(),
        ));
      }
    }
    self.driver.as_ref()
  }
}

impl PromiseBehavior for GeneratorComponent {
  fn gen_async(&mut self, ctx: &mut ComponentContext) -> BoxFuture<'static, StepResult> {
    let (reply, result) = oneshot::channel();
    let queued = self
      .driver(ctx)
      .map(|driver| driver.send(reply).is_ok())
      .unwrap_or(false);
    async move {
      if !queued {
        return Ok(None);
      }
      result.await.unwrap_or(Ok(None))
    }
    .boxed()
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    ctx.out_port(0).is_terminated()
  }

  fn on_terminate(&mut self, ctx: &mut ComponentContext) -> Option<BoxFuture<'static, ()>> {
    debug!("{}: releasing generator", ctx.name());
    // Requests already queued are still answered; the driver stops after.
    self.driver = None;
    self.generator = None;
    None
  }
}

fn input_stream(handle: ComponentHandle, idx: usize) -> InputStream {
  futures::stream::unfold(Some(handle), move |state| async move {
    let handle = state?;
    match handle.pull(idx).await {
      Ok(Some(value)) => Some((Ok(value), Some(handle))),
      Ok(None) => None,
      Err(error) => Some((Err(error), None)),
    }
  })
  .boxed()
}

fn spawn_driver(
  generator: Box<dyn Generator>,
  handle: ComponentHandle,
  inputs: usize,
  info: ComponentInfo,
) -> mpsc::UnboundedSender<Reply> {
  let (tx, mut rx) = mpsc::unbounded_channel::<Reply>();
  let inputs = (0..inputs).map(|idx| input_stream(handle.clone(), idx)).collect();
  tokio::spawn(async move {
    let mut output = generator.process(inputs);
    let mut finished = false;
    while let Some(reply) = rx.recv().await {
      let step = if finished {
        Ok(None)
      } else {
        match output.next().await {
          Some(Ok(value)) => Ok(Some(value)),
          Some(Err(error)) => {
            finished = true;
            Err(match error.component {
              Some(_) => error,
              None => error.with_component(info.clone()),
            })
          }
          None => {
            finished = true;
            Ok(None)
          }
        }
      };
      let _ = reply.send(step);
    }
  });
  tx
}
