//! # Pure Components
//!
//! A function of one value from each input. For every unit of demand the
//! component pulls every input once; the first failed pull fails the output,
//! an input that is done completes it, otherwise the function's result is
//! sent.

use super::base::BaseComponent;
use super::context::ComponentContext;
use super::promise::{PromiseBehavior, PromiseComponent};
use crate::error::StreamError;
use crate::port::StepResult;
use crate::protocol::Value;
use crate::store::ComponentSpec;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use std::sync::Arc;

/// The function a pure component applies, with one argument per input.
pub type PureFn = Arc<dyn Fn(&[Value]) -> Result<Value, StreamError> + Send + Sync>;

/// Promise logic applying a [`PureFn`] to pulled inputs.
pub struct PureComponent {
  func: PureFn,
}

impl PureComponent {
  /// Wraps a function.
  pub fn new(func: PureFn) -> Self {
    Self { func }
  }

  /// Creates a live pure component.
  ///
  /// # Arguments
  ///
  /// * `name` - Instance name.
  /// * `spec` - Port names; the function gets one argument per input.
  /// * `func` - The function to apply.
  pub fn create(
    name: impl Into<String>,
    spec: ComponentSpec,
    func: PureFn,
  ) -> Arc<BaseComponent<PromiseComponent<PureComponent>>> {
    BaseComponent::new(name, spec, PromiseComponent::new(Self::new(func)))
  }
}

impl PromiseBehavior for PureComponent {
  fn gen_async(&mut self, ctx: &mut ComponentContext) -> BoxFuture<'static, StepResult> {
    let pulls: Vec<_> = (0..ctx.spec().ins.len()).map(|idx| ctx.pull(idx)).collect();
    let func = Arc::clone(&self.func);
    let info = ctx.info().clone();
    async move {
      let pulled = try_join_all(pulls).await?;
      let mut args = Vec::with_capacity(pulled.len());
      for value in pulled {
        match value {
          Some(value) => args.push(value),
          None => return Ok(None),
        }
      }
      func(&args).map(Some).map_err(|error| match error.component {
        Some(_) => error,
        None => error.with_component(info),
      })
    }
    .boxed()
  }
}
