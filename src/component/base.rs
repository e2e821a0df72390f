//! # Base Component
//!
//! [`BaseComponent`] turns a [`Behavior`] into a live [`Component`]: it owns
//! the ports, hands out the subscriber and publisher handles peers connect
//! to, and routes every port event to the behavior.
//!
//! All state sits behind one mutex. A call from a peer locks it, updates the
//! port, then dispatches the buffered events to the behavior (which may cause
//! further events, dispatched in the same pass) before unlocking. Signals to
//! peers leave through port mailboxes, so the lock is never held while another
//! component runs.

use super::Component;
use super::context::{ComponentContext, PortHost};
use crate::error::{ComponentInfo, StreamError};
use crate::jobs::JobId;
use crate::port::{OutEvent, StepResult, SubscriberId, SubscriptionId, TerminationSignal};
use crate::protocol::{Publisher, Signal, Subscriber, Subscription, Value};
use crate::store::ComponentSpec;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

/// Component logic, driven by port events.
///
/// Only [`on_next`](Behavior::on_next) and
/// [`on_request`](Behavior::on_request) are required. The default
/// [`should_terminate`](Behavior::should_terminate) stops the component once
/// all inputs or all outputs have been disconnected.
pub trait Behavior: Send + 'static {
  /// A value arrived on input `idx` that no pending pull was waiting for.
  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value);

  /// Downstream of output `idx` can take `n` more values.
  fn on_request(&mut self, ctx: &mut ComponentContext, idx: usize, n: u64);

  /// Input `idx` failed. The component is already terminating with `error`.
  fn on_error(&mut self, _ctx: &mut ComponentContext, _idx: usize, _error: StreamError) {}

  /// Input `idx` completed.
  fn on_complete(&mut self, _ctx: &mut ComponentContext, _idx: usize) {}

  /// Every subscriber of output `idx` cancelled.
  fn on_cancel(&mut self, _ctx: &mut ComponentContext, _idx: usize) {}

  /// The component was started.
  fn on_start(&mut self, _ctx: &mut ComponentContext) {}

  /// A timer armed with [`ComponentContext::wake_after`] fired.
  fn on_wake(&mut self, _ctx: &mut ComponentContext, _token: u64) {}

  /// A job spawned with [`ComponentContext::spawn_input_job`] finished.
  fn on_input_job_done(&mut self, _ctx: &mut ComponentContext, _idx: usize) {}

  /// `applied` job results were just applied to output `idx`.
  fn on_output_job_done(&mut self, _ctx: &mut ComponentContext, _idx: usize, _applied: usize) {}

  /// Cleanup run before the ports are closed. A returned future delays the
  /// closing until it resolves.
  fn on_terminate(&mut self, _ctx: &mut ComponentContext) -> Option<BoxFuture<'static, ()>> {
    None
  }

  /// Whether the component should terminate now. Checked after an input
  /// completes, after an output closes, and on start.
  fn should_terminate(&self, ctx: &ComponentContext) -> bool {
    ctx.default_should_terminate()
  }
}

struct Core<B> {
  ctx: ComponentContext,
  behavior: B,
  started: bool,
}

impl<B: Behavior> Core<B> {
  fn pump(&mut self) {
    loop {
      if let Some((idx, signal)) = self.ctx.next_in_event() {
        self.dispatch_in(idx, signal);
      } else if let Some((idx, event)) = self.ctx.next_out_event() {
        self.dispatch_out(idx, event);
      } else if let Some(error) = self.ctx.take_terminate_request() {
        self.run_terminate(error);
      } else {
        break;
      }
    }
  }

  fn dispatch_in(&mut self, idx: usize, signal: Signal) {
    let Core { ctx, behavior, .. } = self;
    match signal {
      Signal::Next(value) => {
        if let Some(value) = ctx.resolve_pull(idx, value) {
          behavior.on_next(ctx, idx, value);
        }
      }
      Signal::Complete => {
        ctx.settle_pulls(idx, Ok(None));
        if behavior.should_terminate(ctx) {
          ctx.terminate(None);
        }
        behavior.on_complete(ctx, idx);
      }
      Signal::Error(error) => {
        ctx.record_error(idx, error.clone());
        ctx.settle_pulls(idx, Err(error.clone()));
        ctx.terminate(Some(error.clone()));
        behavior.on_error(ctx, idx, error);
      }
    }
  }

  fn dispatch_out(&mut self, idx: usize, event: OutEvent) {
    let Core { ctx, behavior, .. } = self;
    match event {
      OutEvent::Request(n) => behavior.on_request(ctx, idx, n),
      OutEvent::Closed { cancelled } => {
        if behavior.should_terminate(ctx) {
          ctx.terminate(None);
        }
        if cancelled {
          behavior.on_cancel(ctx, idx);
        }
      }
    }
  }

  fn run_terminate(&mut self, error: Option<StreamError>) {
    debug!("{}: terminating", self.ctx.name());
    match self.behavior.on_terminate(&mut self.ctx) {
      None => self.ctx.finish_terminate(error),
      Some(cleanup) => {
        let handle = self.ctx.handle();
        tokio::spawn(async move {
          cleanup.await;
          handle.finish_terminate(error);
        });
      }
    }
  }

  fn start(&mut self) {
    if std::mem::replace(&mut self.started, true) {
      return;
    }
    let Core { ctx, behavior, .. } = self;
    if behavior.should_terminate(ctx) {
      ctx.terminate(None);
    }
    behavior.on_start(ctx);
  }
}

/// A component whose logic is a [`Behavior`].
pub struct BaseComponent<B: Behavior> {
  name: String,
  spec: ComponentSpec,
  core: Mutex<Core<B>>,
  ids: AtomicU64,
  signals: Vec<TerminationSignal>,
  this: Weak<Self>,
}

impl<B: Behavior> BaseComponent<B> {
  /// Creates a component instance with one port per name in `spec`.
  ///
  /// # Arguments
  ///
  /// * `name` - Instance name, used for port names and diagnostics.
  /// * `spec` - Input and output port names.
  /// * `behavior` - The component logic.
  pub fn new(name: impl Into<String>, spec: ComponentSpec, behavior: B) -> Arc<Self> {
    let name = name.into();
    trace!("BaseComponent::new(name={}, spec={:?})", name, spec);
    Arc::new_cyclic(|this: &Weak<Self>| {
      let host: Weak<dyn PortHost> = this.clone();
      let info = ComponentInfo::new(name.clone(), short_type_name::<B>());
      let ctx = ComponentContext::new(info, spec.clone(), host);
      let signals = ctx.termination_signals();
      Self {
        name,
        spec,
        core: Mutex::new(Core {
          ctx,
          behavior,
          started: false,
        }),
        ids: AtomicU64::new(0),
        signals,
        this: this.clone(),
      }
    })
  }

  /// Runs `f` against the component's state without dispatching events.
  pub fn inspect<R>(&self, f: impl FnOnce(&ComponentContext, &B) -> R) -> R {
    let core = self.lock();
    f(&core.ctx, &core.behavior)
  }

  fn lock(&self) -> MutexGuard<'_, Core<B>> {
    self.core.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn with_core<R>(&self, f: impl FnOnce(&mut Core<B>) -> R) -> R {
    let mut core = self.lock();
    let result = f(&mut *core);
    core.pump();
    result
  }

  fn host(&self) -> Weak<dyn PortHost> {
    self.this.clone()
  }
}

impl<B: Behavior> PortHost for BaseComponent<B> {
  fn host_name(&self) -> &str {
    &self.name
  }

  fn next_id(&self) -> u64 {
    self.ids.fetch_add(1, Ordering::Relaxed)
  }

  fn in_subscribe(&self, port: usize, id: SubscriptionId, subscription: Arc<dyn Subscription>) {
    self.with_core(|core| core.ctx.in_port_mut(port).on_subscribe(id, subscription));
  }

  fn in_signal(&self, port: usize, id: SubscriptionId, signal: Signal) {
    self.with_core(|core| {
      let in_port = core.ctx.in_port_mut(port);
      match signal {
        Signal::Next(value) => in_port.on_next(id, value),
        Signal::Complete => in_port.on_complete(id),
        Signal::Error(error) => in_port.on_error(id, error),
      }
    });
  }

  fn out_subscribe(&self, port: usize, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool {
    self.with_core(|core| core.ctx.out_port_mut(port).add_subscriber(id, subscriber))
  }

  fn out_request(&self, port: usize, id: SubscriberId, n: u64) {
    self.with_core(|core| core.ctx.out_port_mut(port).request_from(id, n));
  }

  fn out_cancel(&self, port: usize, id: SubscriberId) {
    self.with_core(|core| core.ctx.out_port_mut(port).cancel_from(id));
  }

  fn pull(&self, port: usize) -> BoxFuture<'static, StepResult> {
    self.with_core(|core| core.ctx.pull(port))
  }

  fn out_job_done(&self, port: usize, job: JobId, result: StepResult) {
    self.with_core(|core| {
      let applied = core.ctx.out_port_mut(port).finish_job(job, result);
      core.behavior.on_output_job_done(&mut core.ctx, port, applied);
    });
  }

  fn in_job_done(&self, port: usize, job: JobId) {
    self.with_core(|core| {
      core.ctx.in_port_mut(port).finish_job(job);
      core.behavior.on_input_job_done(&mut core.ctx, port);
    });
  }

  fn wake(&self, token: u64) {
    self.with_core(|core| core.behavior.on_wake(&mut core.ctx, token));
  }

  fn finish_terminate(&self, error: Option<StreamError>) {
    self.with_core(|core| core.ctx.finish_terminate(error));
  }
}

#[async_trait]
impl<B: Behavior> Component for BaseComponent<B> {
  fn name(&self) -> &str {
    &self.name
  }

  fn spec(&self) -> &ComponentSpec {
    &self.spec
  }

  fn subscriber_for(&self, idx: usize) -> Arc<dyn Subscriber> {
    assert!(
      idx < self.spec.ins.len(),
      "{}: no input port at index {}",
      self.name,
      idx
    );
    Arc::new(InPortSubscriber {
      host: self.host(),
      port: idx,
      id: self.next_id(),
      subscribed: AtomicBool::new(false),
    })
  }

  fn publisher_for(&self, idx: usize) -> Arc<dyn Publisher> {
    assert!(
      idx < self.spec.outs.len(),
      "{}: no output port at index {}",
      self.name,
      idx
    );
    Arc::new(OutPortPublisher {
      host: self.host(),
      port: idx,
    })
  }

  fn start(&self) {
    debug!("{}: start", self.name);
    self.with_core(Core::start);
  }

  fn terminate(&self, error: Option<StreamError>) {
    self.with_core(|core| core.ctx.terminate(error));
  }

  fn is_terminated(&self) -> bool {
    self.signals.iter().all(TerminationSignal::is_fired)
  }

  async fn when_terminated(&self) {
    futures::future::join_all(self.signals.iter().map(|signal| signal.wait())).await;
  }
}

// ============================================================================
// Port handles
// ============================================================================

/// Subscriber side of an input port, handed to upstream publishers.
struct InPortSubscriber {
  host: Weak<dyn PortHost>,
  port: usize,
  id: SubscriptionId,
  subscribed: AtomicBool,
}

impl Subscriber for InPortSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    let Some(host) = self.host.upgrade() else {
      subscription.cancel();
      return;
    };
    assert!(
      !self.subscribed.swap(true, Ordering::SeqCst),
      "{}: on_subscribe called twice on input {}",
      host.host_name(),
      self.port
    );
    host.in_subscribe(self.port, self.id, subscription);
  }

  fn on_next(&self, value: Value) {
    if let Some(host) = self.host.upgrade() {
      host.in_signal(self.port, self.id, Signal::Next(value));
    }
  }

  fn on_error(&self, error: StreamError) {
    if let Some(host) = self.host.upgrade() {
      host.in_signal(self.port, self.id, Signal::Error(error));
    }
  }

  fn on_complete(&self) {
    if let Some(host) = self.host.upgrade() {
      host.in_signal(self.port, self.id, Signal::Complete);
    }
  }
}

/// Publisher side of an output port, handed to downstream subscribers.
struct OutPortPublisher {
  host: Weak<dyn PortHost>,
  port: usize,
}

impl Publisher for OutPortPublisher {
  fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
    let accepted = match self.host.upgrade() {
      Some(host) => {
        let id = host.next_id();
        // The port may signal the new subscriber from its mailbox task as
        // soon as it is registered; those signals wait until `on_subscribe`
        // has returned.
        let gate = GatedSubscriber::new(Arc::clone(&subscriber));
        let accepted = host.out_subscribe(self.port, id, gate.clone());
        subscriber.on_subscribe(Arc::new(OutPortSubscription {
          host: self.host.clone(),
          port: self.port,
          id,
        }));
        gate.open();
        accepted
      }
      None => false,
    };
    if !accepted {
      subscriber.on_complete();
    }
  }
}

/// Holds downstream signals until the wrapped subscriber has been handed its
/// subscription.
struct GatedSubscriber {
  inner: Arc<dyn Subscriber>,
  held: Mutex<Option<Vec<Signal>>>,
}

impl GatedSubscriber {
  fn new(inner: Arc<dyn Subscriber>) -> Arc<Self> {
    Arc::new(Self {
      inner,
      held: Mutex::new(Some(Vec::new())),
    })
  }

  fn open(&self) {
    let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(signals) = held.take() {
      for signal in signals {
        signal.deliver(self.inner.as_ref());
      }
    }
  }

  fn pass(&self, signal: Signal) {
    let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
    match held.as_mut() {
      Some(signals) => signals.push(signal),
      None => signal.deliver(self.inner.as_ref()),
    }
  }
}

impl Subscriber for GatedSubscriber {
  fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
    self.inner.on_subscribe(subscription);
  }

  fn on_next(&self, value: Value) {
    self.pass(Signal::Next(value));
  }

  fn on_error(&self, error: StreamError) {
    self.pass(Signal::Error(error));
  }

  fn on_complete(&self) {
    self.pass(Signal::Complete);
  }
}

struct OutPortSubscription {
  host: Weak<dyn PortHost>,
  port: usize,
  id: SubscriberId,
}

impl Subscription for OutPortSubscription {
  fn request(&self, n: u64) {
    if let Some(host) = self.host.upgrade() {
      host.out_request(self.port, self.id, n);
    }
  }

  fn cancel(&self) {
    if let Some(host) = self.host.upgrade() {
      host.out_cancel(self.port, self.id);
    }
  }
}

/// `portflow::nodes::core::Identity` becomes `Identity`, generic arguments
/// included.
fn short_type_name<T>() -> String {
  let full = std::any::type_name::<T>();
  let mut out = String::with_capacity(full.len());
  let mut segment = String::new();
  for c in full.chars() {
    if c.is_alphanumeric() || c == '_' || c == ':' {
      segment.push(c);
    } else {
      out.push_str(segment.rsplit("::").next().unwrap_or(""));
      segment.clear();
      out.push(c);
    }
  }
  out.push_str(segment.rsplit("::").next().unwrap_or(""));
  out
}
