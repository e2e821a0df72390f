//! # Promise Components
//!
//! Components with a single output whose values are produced by async jobs.
//! Every unit of downstream demand is turned into one call of
//! [`PromiseBehavior::gen_async`]; the returned futures run concurrently but
//! their results reach the output in call order. A job resolving to `None`
//! completes the output, an error fails it.

use super::base::Behavior;
use super::context::ComponentContext;
use crate::port::StepResult;
use crate::protocol::Value;
use futures::future::BoxFuture;
use tracing::trace;

/// Jobs a promise component keeps in flight unless configured otherwise.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Logic of a promise component.
pub trait PromiseBehavior: Send + 'static {
  /// Starts producing the next value.
  ///
  /// Called synchronously, in demand order, so pulls issued here are queued
  /// in that order too. The returned future runs on its own task.
  fn gen_async(&mut self, ctx: &mut ComponentContext) -> BoxFuture<'static, StepResult>;

  /// Termination policy; defaults to the stock one.
  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    ctx.default_should_terminate()
  }

  /// Cleanup before the ports close.
  fn on_terminate(&mut self, _ctx: &mut ComponentContext) -> Option<BoxFuture<'static, ()>> {
    None
  }
}

/// Adapts a [`PromiseBehavior`] into a [`Behavior`].
///
/// Demand beyond the in-flight limit is remembered and scheduled as earlier
/// jobs are applied, so unbounded demand does not mean unbounded work.
pub struct PromiseComponent<P> {
  inner: P,
  outstanding: u64,
  in_flight: usize,
  max_in_flight: usize,
}

impl<P: PromiseBehavior> PromiseComponent<P> {
  /// Wraps `inner` with the default in-flight limit.
  pub fn new(inner: P) -> Self {
    Self {
      inner,
      outstanding: 0,
      in_flight: 0,
      max_in_flight: DEFAULT_MAX_IN_FLIGHT,
    }
  }

  /// Caps the number of concurrently running jobs (at least one).
  pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
    self.max_in_flight = max_in_flight.max(1);
    self
  }

  /// The wrapped logic.
  pub fn inner(&self) -> &P {
    &self.inner
  }

  /// Jobs currently running.
  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  fn schedule(&mut self, ctx: &mut ComponentContext) {
    while self.outstanding > 0
      && self.in_flight < self.max_in_flight
      && ctx.out_port(0).is_active()
    {
      let job = self.inner.gen_async(ctx);
      if !ctx.send_async(0, job) {
        break;
      }
      self.outstanding -= 1;
      self.in_flight += 1;
    }
  }
}

impl<P: PromiseBehavior> Behavior for PromiseComponent<P> {
  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, _value: Value) {
    trace!("{}: value on input {} without a pending pull", ctx.name(), idx);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, n: u64) {
    self.outstanding = self.outstanding.saturating_add(n);
    self.schedule(ctx);
  }

  fn on_output_job_done(&mut self, ctx: &mut ComponentContext, _idx: usize, applied: usize) {
    self.in_flight = self.in_flight.saturating_sub(applied);
    self.schedule(ctx);
  }

  fn on_terminate(&mut self, ctx: &mut ComponentContext) -> Option<BoxFuture<'static, ()>> {
    self.outstanding = 0;
    self.inner.on_terminate(ctx)
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    self.inner.should_terminate(ctx)
  }
}
