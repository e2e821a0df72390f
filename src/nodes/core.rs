//! # Core Components
//!
//! Stream plumbing every graph front end relies on.
//!
//! ## Ports
//!
//! | Component | Inputs | Outputs |
//! |-----------|--------|---------|
//! | `core/Identity` | `in` | `out` |
//! | `core/Repeat` | `in` | `out` |
//! | `core/Kick` | `in`, `sig` | `out` |
//! | `core/Interval` | `period` | `out` |
//! | `core/Nats` | | `out` |
//! | `core/If` | `cond`, `then`, `else` | `out` |
//! | `core/Buffer` | `in`, `n` | `out` |
//! | `core/Zip` | `in1`, `in2` | `out` |
//! | `core/Nth` | `in`, `n` | `out` |
//! | `core/ToArray` | `in` | `out` |
//! | `core/FromArray` | `in` | `out` |
//! | `core/CombineLatest` | `in1`, `in2` | `out` |

use super::operators::truthy;
use super::{input_done, output_done};
use crate::component::{Behavior, ComponentContext, InputStream, OutputStream};
use crate::error::StreamError;
use crate::protocol::Value;
use futures::StreamExt;
use std::time::Duration;
use tracing::trace;

/// Values sent synchronously per callback by components that serve
/// unbounded demand from nothing; the rest follows on the next wake-up.
pub const EMIT_BATCH: u64 = 64;

// ============================================================================
// Identity
// ============================================================================

/// Forwards values and demand unchanged.
#[derive(Debug, Default)]
pub struct Identity;

impl Behavior for Identity {
  fn on_next(&mut self, ctx: &mut ComponentContext, _idx: usize, value: Value) {
    ctx.send(0, value);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, n: u64) {
    ctx.request(0, n);
  }
}

// ============================================================================
// Repeat
// ============================================================================

/// Emits the latest input value once per unit of demand.
///
/// Until a value arrived nothing is sent; each new value replaces the
/// repeated one. A completed input keeps the last value going for as long as
/// downstream asks.
#[derive(Debug, Default)]
pub struct Repeat {
  value: Option<Value>,
  waking: bool,
}

impl Repeat {
  fn emit(&mut self, ctx: &mut ComponentContext) {
    let Some(value) = &self.value else {
      return;
    };
    let mut budget = EMIT_BATCH;
    while budget > 0 && ctx.out_port(0).is_active() && ctx.out_port(0).requested() > 0 {
      ctx.send(0, value.clone());
      budget -= 1;
    }
    if !self.waking && ctx.out_port(0).is_active() && ctx.out_port(0).requested() > 0 {
      self.waking = true;
      ctx.wake_after(Duration::ZERO, 0);
    }
  }
}

impl Behavior for Repeat {
  fn on_start(&mut self, ctx: &mut ComponentContext) {
    ctx.request(0, 1);
  }

  fn on_next(&mut self, ctx: &mut ComponentContext, _idx: usize, value: Value) {
    self.value = Some(value);
    self.emit(ctx);
    ctx.request(0, 1);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, _n: u64) {
    self.emit(ctx);
  }

  fn on_wake(&mut self, ctx: &mut ComponentContext, _token: u64) {
    self.waking = false;
    self.emit(ctx);
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    (self.value.is_none() && input_done(ctx, 0)) || output_done(ctx, 0)
  }
}

// ============================================================================
// Kick
// ============================================================================

/// For every value on `sig`, pulls one value from `in` and emits it. Ends
/// when either input is done.
pub fn kick(mut inputs: Vec<InputStream>) -> OutputStream {
  let mut signals = inputs.remove(1);
  let mut input = inputs.remove(0);
  Box::pin(async_stream::stream! {
    while let Some(signal) = signals.next().await {
      if let Err(error) = signal {
        yield Err(error);
        break;
      }
      match input.next().await {
        Some(value) => yield value,
        None => break,
      }
    }
  })
}

// ============================================================================
// Interval
// ============================================================================

/// Emits `true` every `period` milliseconds while downstream has demand.
///
/// The first tick is due one period after the period arrived. A tick that
/// finds no demand is held back and sent on the next request. A later value
/// on `period` applies from the next tick on.
#[derive(Debug, Default)]
pub struct Interval {
  period: Option<Duration>,
  tick_ready: bool,
}

impl Interval {
  fn arm(&self, ctx: &ComponentContext) {
    if let Some(period) = self.period {
      ctx.wake_after(period, 0);
    }
  }

  fn tick(&mut self, ctx: &mut ComponentContext) {
    if !ctx.out_port(0).is_active() {
      return;
    }
    if ctx.out_port(0).requested() > 0 {
      ctx.send(0, Value::Bool(true));
      self.arm(ctx);
    } else {
      self.tick_ready = true;
    }
  }
}

fn parse_period(value: &Value) -> Option<Duration> {
  let millis = value.as_f64()?;
  if millis.is_nan() {
    return None;
  }
  Duration::try_from_secs_f64(millis.max(0.0) / 1000.0).ok()
}

impl Behavior for Interval {
  fn on_start(&mut self, ctx: &mut ComponentContext) {
    ctx.request(0, 1);
  }

  fn on_next(&mut self, ctx: &mut ComponentContext, _idx: usize, value: Value) {
    let Some(period) = parse_period(&value) else {
      let error = ctx.stream_error(format!("Interval period must be a number, got {}", value));
      ctx.terminate(Some(error));
      return;
    };
    trace!("Interval::on_next(name={}, period={:?})", ctx.name(), period);
    let first = self.period.is_none();
    self.period = Some(period);
    if first {
      self.arm(ctx);
    }
    ctx.request(0, 1);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, _n: u64) {
    if std::mem::take(&mut self.tick_ready) {
      self.tick(ctx);
    }
  }

  fn on_wake(&mut self, ctx: &mut ComponentContext, _token: u64) {
    self.tick(ctx);
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    (self.period.is_none() && input_done(ctx, 0)) || output_done(ctx, 0)
  }
}

// ============================================================================
// Nats
// ============================================================================

/// The natural numbers `1, 2, 3, ...`, one per unit of demand.
#[derive(Debug)]
pub struct Nats {
  next: u64,
  waking: bool,
}

impl Default for Nats {
  fn default() -> Self {
    Self {
      next: 1,
      waking: false,
    }
  }
}

impl Nats {
  fn emit(&mut self, ctx: &mut ComponentContext) {
    let mut budget = EMIT_BATCH;
    while budget > 0 && ctx.out_port(0).is_active() && ctx.out_port(0).requested() > 0 {
      ctx.send(0, Value::from(self.next));
      self.next += 1;
      budget -= 1;
    }
    if !self.waking && ctx.out_port(0).is_active() && ctx.out_port(0).requested() > 0 {
      self.waking = true;
      ctx.wake_after(Duration::ZERO, 0);
    }
  }
}

impl Behavior for Nats {
  fn on_next(&mut self, _ctx: &mut ComponentContext, _idx: usize, _value: Value) {}

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, _n: u64) {
    self.emit(ctx);
  }

  fn on_wake(&mut self, ctx: &mut ComponentContext, _token: u64) {
    self.waking = false;
    self.emit(ctx);
  }
}

// ============================================================================
// If
// ============================================================================

const COND: usize = 0;
const THEN: usize = 1;
const ELSE: usize = 2;

/// For every condition value, forwards one value from `then` when the
/// condition is truthy and from `else` otherwise.
#[derive(Debug, Default)]
pub struct If;

impl Behavior for If {
  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    match idx {
      COND => {
        let branch = if truthy(&value) { THEN } else { ELSE };
        ctx.request(branch, 1);
      }
      _ => ctx.send(0, value),
    }
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, n: u64) {
    ctx.request(COND, n);
  }
}

// ============================================================================
// Buffer
// ============================================================================

/// Requests up to `n` values ahead of downstream demand and holds them until
/// they are asked for.
#[derive(Debug, Default)]
pub struct Buffer {
  size: u64,
}

impl Buffer {
  fn adjust_demand(&self, ctx: &mut ComponentContext) {
    let wanted = ctx.out_port(0).requested().saturating_add(self.size);
    let held = ctx
      .in_port(0)
      .requested()
      .saturating_add(ctx.out_port(0).queue_size() as u64);
    if wanted > held {
      ctx.request(0, wanted - held);
    }
  }
}

impl Behavior for Buffer {
  fn on_start(&mut self, ctx: &mut ComponentContext) {
    ctx.request(1, 1);
  }

  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    if idx == 1 {
      let Some(size) = value.as_u64() else {
        let error = ctx.stream_error(format!("Buffer size must be a natural number, got {}", value));
        ctx.terminate(Some(error));
        return;
      };
      self.size = size;
      ctx.request(1, 1);
    } else {
      ctx.send_or_enqueue(0, value);
    }
    self.adjust_demand(ctx);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, _n: u64) {
    self.adjust_demand(ctx);
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    input_done(ctx, 0) || output_done(ctx, 0)
  }
}

// ============================================================================
// Zip
// ============================================================================

/// Pairs one value from each input into `[a, b]`.
pub fn zip(args: &[Value]) -> Result<Value, StreamError> {
  Ok(Value::Array(args.to_vec()))
}

// ============================================================================
// Nth
// ============================================================================

/// Emits the `n`th value (counting from zero) of `in`, then terminates.
#[derive(Debug, Default)]
pub struct Nth {
  remaining: Option<u64>,
  requested: bool,
}

impl Behavior for Nth {
  fn on_start(&mut self, ctx: &mut ComponentContext) {
    ctx.request(1, 1);
  }

  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    if idx == 1 {
      if self.remaining.is_some() {
        return;
      }
      let Some(n) = value.as_u64() else {
        let error = ctx.stream_error(format!("Nth index must be a natural number, got {}", value));
        ctx.terminate(Some(error));
        return;
      };
      self.remaining = Some(n);
      ctx.cancel(1);
      if self.requested {
        ctx.request(0, n.saturating_add(1));
      }
      return;
    }
    match self.remaining {
      Some(0) => {
        // Values already buffered behind this one must not be sent.
        self.remaining = None;
        ctx.send(0, value);
        ctx.terminate(None);
      }
      Some(ref mut left) => *left -= 1,
      None => {}
    }
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, _n: u64) {
    if self.requested {
      return;
    }
    self.requested = true;
    if let Some(n) = self.remaining {
      ctx.request(0, n.saturating_add(1));
    }
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    let index_lost = self.remaining.is_none() && input_done(ctx, 1);
    index_lost || input_done(ctx, 0) || output_done(ctx, 0)
  }
}

// ============================================================================
// ToArray / FromArray
// ============================================================================

/// Collects the whole input into one array.
pub fn to_array(mut inputs: Vec<InputStream>) -> OutputStream {
  let mut input = inputs.remove(0);
  Box::pin(async_stream::stream! {
    let mut items = Vec::new();
    while let Some(value) = input.next().await {
      match value {
        Ok(value) => items.push(value),
        Err(error) => {
          yield Err(error);
          return;
        }
      }
    }
    yield Ok(Value::Array(items));
  })
}

/// Emits the elements of every input array in turn.
pub fn from_array(mut inputs: Vec<InputStream>) -> OutputStream {
  let mut input = inputs.remove(0);
  Box::pin(async_stream::stream! {
    while let Some(value) = input.next().await {
      match value {
        Ok(Value::Array(items)) => {
          for item in items {
            yield Ok(item);
          }
        }
        Ok(other) => {
          yield Err(StreamError::new(format!("FromArray expects an array, got {}", other)));
          return;
        }
        Err(error) => {
          yield Err(error);
          return;
        }
      }
    }
  })
}

// ============================================================================
// CombineLatest
// ============================================================================

/// Emits `[a, b]` with the latest value of each input whenever either
/// changes, once both have produced something.
#[derive(Debug, Default)]
pub struct CombineLatest {
  latest: [Option<Value>; 2],
}

impl Behavior for CombineLatest {
  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    self.latest[idx] = Some(value);
    if let [Some(a), Some(b)] = &self.latest {
      let pair = Value::Array(vec![a.clone(), b.clone()]);
      ctx.send_or_enqueue(0, pair);
    }
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, n: u64) {
    ctx.request(0, n);
    ctx.request(1, n);
  }

  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    let starved = (0..2).any(|idx| self.latest[idx].is_none() && input_done(ctx, idx));
    let exhausted = input_done(ctx, 0) && input_done(ctx, 1);
    starved || exhausted || output_done(ctx, 0)
  }
}
