//! The view of a component's ports and lifecycle handed to its behavior.

use crate::error::{ComponentInfo, StreamError};
use crate::jobs::JobId;
use crate::port::{InPort, OutEvent, OutPort, StepResult, SubscriberId, SubscriptionId, TerminationSignal};
use crate::protocol::{Signal, Subscriber, Subscription, Value};
use crate::store::ComponentSpec;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Callbacks from port handles, spawned jobs and timers into the component
/// that owns them. Every call locks the component, applies the change and
/// dispatches the resulting events before returning.
pub(crate) trait PortHost: Send + Sync {
  fn host_name(&self) -> &str;
  fn next_id(&self) -> u64;
  fn in_subscribe(&self, port: usize, id: SubscriptionId, subscription: Arc<dyn Subscription>);
  fn in_signal(&self, port: usize, id: SubscriptionId, signal: Signal);
  fn out_subscribe(&self, port: usize, id: SubscriberId, subscriber: Arc<dyn Subscriber>) -> bool;
  fn out_request(&self, port: usize, id: SubscriberId, n: u64);
  fn out_cancel(&self, port: usize, id: SubscriberId);
  fn pull(&self, port: usize) -> BoxFuture<'static, StepResult>;
  fn out_job_done(&self, port: usize, job: JobId, result: StepResult);
  fn in_job_done(&self, port: usize, job: JobId);
  fn wake(&self, token: u64);
  fn finish_terminate(&self, error: Option<StreamError>);
}

#[derive(Debug)]
enum Termination {
  Running,
  Requested(Option<StreamError>),
  Terminating,
}

/// Ports, pending pulls and lifecycle state of one component instance.
///
/// Behaviors receive a `&mut ComponentContext` in every callback and use it
/// to talk to their ports. Nothing done through the context reaches a peer
/// synchronously.
pub struct ComponentContext {
  info: ComponentInfo,
  spec: ComponentSpec,
  in_ports: Vec<InPort>,
  out_ports: Vec<OutPort>,
  pulls: Vec<VecDeque<oneshot::Sender<StepResult>>>,
  last_errors: Vec<Option<StreamError>>,
  termination: Termination,
  host: Weak<dyn PortHost>,
}

impl ComponentContext {
  pub(crate) fn new(info: ComponentInfo, spec: ComponentSpec, host: Weak<dyn PortHost>) -> Self {
    let in_ports = spec
      .ins
      .iter()
      .map(|port| InPort::new(format!("{}[{}]", info.name, port)))
      .collect();
    let out_ports = spec
      .outs
      .iter()
      .map(|port| OutPort::new(format!("{}[{}]", info.name, port)))
      .collect();
    Self {
      pulls: spec.ins.iter().map(|_| VecDeque::new()).collect(),
      last_errors: vec![None; spec.ins.len()],
      info,
      spec,
      in_ports,
      out_ports,
      termination: Termination::Running,
      host,
    }
  }

  /// Instance name.
  pub fn name(&self) -> &str {
    &self.info.name
  }

  /// Name and type of this instance, for error reporting.
  pub fn info(&self) -> &ComponentInfo {
    &self.info
  }

  /// Port names.
  pub fn spec(&self) -> &ComponentSpec {
    &self.spec
  }

  /// Input port `idx`.
  pub fn in_port(&self, idx: usize) -> &InPort {
    &self.in_ports[idx]
  }

  /// Output port `idx`.
  pub fn out_port(&self, idx: usize) -> &OutPort {
    &self.out_ports[idx]
  }

  /// All input ports.
  pub fn in_ports(&self) -> &[InPort] {
    &self.in_ports
  }

  /// All output ports.
  pub fn out_ports(&self) -> &[OutPort] {
    &self.out_ports
  }

  pub(crate) fn in_port_mut(&mut self, idx: usize) -> &mut InPort {
    &mut self.in_ports[idx]
  }

  pub(crate) fn out_port_mut(&mut self, idx: usize) -> &mut OutPort {
    &mut self.out_ports[idx]
  }

  /// The last error received on input `idx`, if it failed.
  pub fn last_error(&self, idx: usize) -> Option<&StreamError> {
    self.last_errors[idx].as_ref()
  }

  /// Builds a stream error attributed to this component.
  pub fn stream_error(&self, message: impl Into<String>) -> StreamError {
    StreamError::new(message).with_component(self.info.clone())
  }

  /// Requests `n` values on input `idx`.
  pub fn request(&mut self, idx: usize, n: u64) {
    self.in_ports[idx].request(n);
  }

  /// Cancels input `idx`.
  pub fn cancel(&mut self, idx: usize) {
    self.in_ports[idx].cancel();
  }

  /// Sends on output `idx`; see [`OutPort::send`].
  pub fn send(&mut self, idx: usize, value: Value) {
    self.out_ports[idx].send(value);
  }

  /// Sends on output `idx` or queues until there is demand.
  pub fn send_or_enqueue(&mut self, idx: usize, value: Value) {
    self.out_ports[idx].send_or_enqueue(value);
  }

  /// Completes output `idx`.
  pub fn complete(&mut self, idx: usize) {
    self.out_ports[idx].complete();
  }

  /// Fails output `idx`.
  pub fn error(&mut self, idx: usize, error: StreamError) {
    self.out_ports[idx].error(error);
  }

  /// Asynchronously receives the next value of input `idx`.
  ///
  /// Resolves to `Ok(None)` once the input is done and to the input's error
  /// if it failed. On a terminated input the result is immediate; otherwise
  /// one value is requested and the pull waits in line behind earlier ones.
  pub fn pull(&mut self, idx: usize) -> BoxFuture<'static, StepResult> {
    if self.in_ports[idx].is_terminated() {
      let result = match &self.last_errors[idx] {
        Some(error) => Err(error.clone()),
        None => Ok(None),
      };
      return futures::future::ready(result).boxed();
    }
    let (tx, rx) = oneshot::channel();
    self.pulls[idx].push_back(tx);
    self.in_ports[idx].request(1);
    async move { rx.await.unwrap_or(Ok(None)) }.boxed()
  }

  /// Runs `job` for output `idx`. Its result is applied in order with the
  /// port's other jobs: a value is sent, `None` completes, an error fails.
  ///
  /// Returns `false`, without running the job, once the output stopped
  /// being active.
  pub fn send_async(&mut self, idx: usize, job: BoxFuture<'static, StepResult>) -> bool {
    let Some(id) = self.out_ports[idx].register_job() else {
      return false;
    };
    trace!("{}: job {} scheduled on output {}", self.info.name, id, idx);
    let host = self.host.clone();
    tokio::spawn(async move {
      let result = job.await;
      if let Some(host) = host.upgrade() {
        host.out_job_done(idx, id, result);
      }
    });
    true
  }

  /// Runs `job` on behalf of input `idx`; the input does not deliver its
  /// terminal event until the job has finished.
  pub fn spawn_input_job(&mut self, idx: usize, job: BoxFuture<'static, ()>) -> bool {
    let Some(id) = self.in_ports[idx].register_job() else {
      return false;
    };
    let host = self.host.clone();
    tokio::spawn(async move {
      job.await;
      if let Some(host) = host.upgrade() {
        host.in_job_done(idx, id);
      }
    });
    true
  }

  /// Calls the behavior's `on_wake` with `token` after `delay`.
  pub fn wake_after(&self, delay: Duration, token: u64) {
    let host = self.host.clone();
    tokio::spawn(async move {
      if delay.is_zero() {
        tokio::task::yield_now().await;
      } else {
        tokio::time::sleep(delay).await;
      }
      if let Some(host) = host.upgrade() {
        host.wake(token);
      }
    });
  }

  /// Asks the component to terminate, failing its outputs with `error` if
  /// given. Takes effect once the current callback returns; later calls are
  /// ignored.
  pub fn terminate(&mut self, error: Option<StreamError>) {
    if let Termination::Running = self.termination {
      debug!("{}: termination requested", self.info.name);
      self.termination = Termination::Requested(error);
    }
  }

  /// Whether termination has been requested or is under way.
  pub fn is_terminating(&self) -> bool {
    !matches!(self.termination, Termination::Running)
  }

  /// A cloneable handle for pulling from async code outside callbacks.
  pub fn handle(&self) -> ComponentHandle {
    ComponentHandle {
      host: self.host.clone(),
    }
  }

  /// The stock termination policy: every input lost its subscriptions, or
  /// every output lost its subscribers.
  pub fn default_should_terminate(&self) -> bool {
    let inputs_gone = !self.in_ports.is_empty()
      && self.in_ports.iter().all(|p| p.subscription_count() == 0);
    let outputs_gone = !self.out_ports.is_empty()
      && self.out_ports.iter().all(|p| p.subscriber_count() == 0);
    inputs_gone || outputs_gone
  }

  pub(crate) fn termination_signals(&self) -> Vec<TerminationSignal> {
    self
      .in_ports
      .iter()
      .map(InPort::termination)
      .chain(self.out_ports.iter().map(OutPort::termination))
      .collect()
  }

  pub(crate) fn next_in_event(&mut self) -> Option<(usize, Signal)> {
    self
      .in_ports
      .iter_mut()
      .enumerate()
      .find_map(|(idx, port)| port.next_event().map(|signal| (idx, signal)))
  }

  pub(crate) fn next_out_event(&mut self) -> Option<(usize, OutEvent)> {
    self
      .out_ports
      .iter_mut()
      .enumerate()
      .find_map(|(idx, port)| port.next_event().map(|event| (idx, event)))
  }

  pub(crate) fn take_terminate_request(&mut self) -> Option<Option<StreamError>> {
    match std::mem::replace(&mut self.termination, Termination::Terminating) {
      Termination::Requested(error) => Some(error),
      other => {
        self.termination = other;
        None
      }
    }
  }

  /// Hands `value` to the oldest live pull on input `idx`, or gives it back
  /// when nobody is waiting.
  pub(crate) fn resolve_pull(&mut self, idx: usize, value: Value) -> Option<Value> {
    let mut value = value;
    while let Some(tx) = self.pulls[idx].pop_front() {
      match tx.send(Ok(Some(value))) {
        Ok(()) => return None,
        Err(Ok(Some(returned))) => value = returned,
        Err(_) => return None,
      }
    }
    Some(value)
  }

  pub(crate) fn settle_pulls(&mut self, idx: usize, result: StepResult) {
    for tx in self.pulls[idx].drain(..) {
      let _ = tx.send(result.clone());
    }
  }

  pub(crate) fn record_error(&mut self, idx: usize, error: StreamError) {
    self.last_errors[idx] = Some(error);
  }

  pub(crate) fn finish_terminate(&mut self, error: Option<StreamError>) {
    debug!("{}: closing ports", self.info.name);
    for port in self.in_ports.iter_mut().filter(|p| !p.is_terminated()) {
      port.cancel();
    }
    for port in self.out_ports.iter_mut().filter(|p| !p.is_terminated()) {
      match &error {
        Some(error) => port.error(error.clone()),
        None => port.complete(),
      }
    }
  }
}

/// Weak, cloneable handle to a component, used by spawned tasks (such as a
/// generator driver) that need to pull inputs without keeping the component
/// alive.
#[derive(Clone)]
pub struct ComponentHandle {
  host: Weak<dyn PortHost>,
}

impl ComponentHandle {
  /// Pulls the next value of input `idx`; resolves to `Ok(None)` if the
  /// component is gone.
  pub async fn pull(&self, idx: usize) -> StepResult {
    let pull = match self.host.upgrade() {
      Some(host) => host.pull(idx),
      None => return Ok(None),
    };
    pull.await
  }

  pub(crate) fn finish_terminate(&self, error: Option<StreamError>) {
    if let Some(host) = self.host.upgrade() {
      host.finish_terminate(error);
    }
  }
}
