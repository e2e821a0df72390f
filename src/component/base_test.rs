//! # BaseComponent Test Suite
//!
//! Lifecycle and event routing of behavior-driven components: value flow,
//! termination policy, error propagation and cancellation.

use super::{BaseComponent, Behavior, Component, ComponentContext};
use crate::error::StreamError;
use crate::protocol::{Publisher, Value};
use crate::store::ComponentSpec;
use crate::test_util::{MockPublisher, MockSubscriber, eventually};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test behaviors
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

fn entries(log: &Log) -> Vec<String> {
  log.lock().unwrap().clone()
}

/// Input `i` feeds output `i`, demand flows back the same way.
struct Relay {
  log: Log,
}

impl Behavior for Relay {
  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    self.log.lock().unwrap().push(format!("next {} {}", idx, value));
    ctx.send(idx, value);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, idx: usize, n: u64) {
    ctx.request(idx, n);
  }

  fn on_error(&mut self, _ctx: &mut ComponentContext, idx: usize, error: StreamError) {
    self.log.lock().unwrap().push(format!("error {} {}", idx, error));
  }

  fn on_complete(&mut self, _ctx: &mut ComponentContext, idx: usize) {
    self.log.lock().unwrap().push(format!("complete {}", idx));
  }

  fn on_cancel(&mut self, _ctx: &mut ComponentContext, idx: usize) {
    self.log.lock().unwrap().push(format!("cancel {}", idx));
  }
}

/// Forwards input 0 until it completes, then switches to input 1, asking for
/// the remaining demand from inside `on_complete`.
struct Chain;

impl Behavior for Chain {
  fn on_next(&mut self, ctx: &mut ComponentContext, _idx: usize, value: Value) {
    ctx.send(0, value);
  }

  fn on_request(&mut self, ctx: &mut ComponentContext, _idx: usize, n: u64) {
    let current = if ctx.in_port(0).is_terminated() { 1 } else { 0 };
    ctx.request(current, n);
  }

  fn on_complete(&mut self, ctx: &mut ComponentContext, idx: usize) {
    let outstanding = ctx.out_port(0).requested();
    if idx == 0 && outstanding > 0 {
      ctx.request(1, outstanding);
    }
  }
}

fn relay(spec: ComponentSpec) -> (Arc<BaseComponent<Relay>>, Log) {
  let log = Log::default();
  let component = BaseComponent::new("relay", spec, Relay { log: log.clone() });
  (component, log)
}

fn feed(component: &dyn Component, idx: usize) -> Arc<MockPublisher> {
  let publisher = MockPublisher::new();
  publisher.subscribe(component.subscriber_for(idx));
  publisher
}

fn drain(component: &dyn Component, idx: usize, n: u64) -> Arc<MockSubscriber> {
  let subscriber = MockSubscriber::requesting(n);
  component.publisher_for(idx).subscribe(subscriber.clone());
  subscriber
}

async fn terminated(component: &dyn Component) {
  tokio::time::timeout(Duration::from_secs(2), component.when_terminated())
    .await
    .expect("component did not terminate");
}

// ============================================================================
// Value flow and completion
// ============================================================================

#[tokio::test]
async fn test_values_flow_and_completion_terminates() {
  let (component, log) = relay(ComponentSpec::new(["in"], ["out"]));
  let upstream = feed(component.as_ref(), 0);
  let downstream = drain(component.as_ref(), 0, 2);
  component.start();

  eventually("demand forwarded", || upstream.requested() == 2).await;
  upstream.next(json!(1));
  upstream.next(json!(2));
  upstream.complete();

  terminated(component.as_ref()).await;
  assert!(component.is_terminated());
  assert_eq!(downstream.values(), vec![json!(1), json!(2)]);
  assert!(downstream.is_completed());
  assert_eq!(entries(&log), vec!["next 0 1", "next 0 2", "complete 0"]);
}

#[tokio::test]
async fn test_component_without_connections_terminates_on_start() {
  let (component, _log) = relay(ComponentSpec::new(["in"], ["out"]));
  assert!(!component.is_terminated());
  component.start();
  terminated(component.as_ref()).await;
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
  let (component, _log) = relay(ComponentSpec::new(["in"], ["out"]));
  let upstream = feed(component.as_ref(), 0);
  let downstream = drain(component.as_ref(), 0, 1);
  component.start();

  component.terminate(None);
  component.terminate(Some(StreamError::new("too late")));
  eventually("input cancelled", || upstream.is_cancelled()).await;
  upstream.complete();

  terminated(component.as_ref()).await;
  assert!(downstream.is_completed());
  assert!(downstream.error().is_none());
}

#[tokio::test]
async fn test_request_from_inside_on_complete() {
  let component = BaseComponent::new("chain", ComponentSpec::new(["first", "second"], ["out"]), Chain);
  let first = feed(component.as_ref(), 0);
  let second = feed(component.as_ref(), 1);
  let downstream = drain(component.as_ref(), 0, 2);
  component.start();

  eventually("first input asked", || first.requested() == 2).await;
  first.next(json!("a"));
  first.complete();

  eventually("second input asked from on_complete", || second.requested() == 1).await;
  second.next(json!("b"));
  second.complete();

  terminated(component.as_ref()).await;
  assert_eq!(downstream.values(), vec![json!("a"), json!("b")]);
  assert!(downstream.is_completed());
}

// ============================================================================
// Errors and cancellation
// ============================================================================

#[tokio::test]
async fn test_input_error_fails_every_output_and_cancels_other_inputs() {
  let (component, log) = relay(ComponentSpec::new(["a", "b"], ["x", "y"]));
  let a = feed(component.as_ref(), 0);
  let b = feed(component.as_ref(), 1);
  let x = drain(component.as_ref(), 0, 5);
  let y = drain(component.as_ref(), 1, 5);
  component.start();

  eventually("demand forwarded", || a.requested() == 5 && b.requested() == 5).await;
  a.next(json!(1));
  b.next(json!(2));
  eventually("values relayed", || x.values().len() == 1 && y.values().len() == 1).await;

  a.error(StreamError::new("bad input"));
  eventually("outputs failed", || x.error().is_some() && y.error().is_some()).await;
  assert_eq!(x.error().unwrap().message, "bad input");
  eventually("other input cancelled", || b.is_cancelled()).await;

  // A value racing the cancellation never reaches the behavior.
  b.next(json!(3));
  b.complete();
  terminated(component.as_ref()).await;

  let log = entries(&log);
  assert!(log.contains(&"error 0 bad input".to_string()));
  assert!(!log.iter().any(|entry| entry == "next 1 3"));
}

#[tokio::test]
async fn test_downstream_cancel_calls_on_cancel_and_terminates() {
  let (component, log) = relay(ComponentSpec::new(["in"], ["out"]));
  let upstream = feed(component.as_ref(), 0);
  let downstream = drain(component.as_ref(), 0, 1);
  component.start();

  downstream.cancel();
  eventually("cancel acknowledged", || downstream.is_completed()).await;
  eventually("input cancelled", || upstream.is_cancelled()).await;
  upstream.complete();

  terminated(component.as_ref()).await;
  assert!(entries(&log).contains(&"cancel 0".to_string()));
}

#[tokio::test]
async fn test_subscribing_after_termination_completes_immediately() {
  let (component, _log) = relay(ComponentSpec::new(["in"], ["out"]));
  component.start();
  terminated(component.as_ref()).await;

  let late = drain(component.as_ref(), 0, 1);
  assert!(late.is_subscribed());
  assert!(late.is_completed());
}

#[tokio::test]
#[should_panic(expected = "no output port")]
async fn test_publisher_for_unknown_output_panics() {
  let (component, _log) = relay(ComponentSpec::new(["in"], ["out"]));
  let _ = component.publisher_for(3);
}

// ============================================================================
// Multi-threaded runtime
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribing_to_a_completing_output_still_delivers_completion() {
  for _ in 0..200 {
    let (upstream, _) = relay(ComponentSpec::new(["in"], ["out"]));
    let source = feed(upstream.as_ref(), 0);
    let _first = drain(upstream.as_ref(), 0, 1);
    upstream.start();

    // `b` keeps the downstream relay alive while `a` is wired late.
    let (downstream, log) = relay(ComponentSpec::new(["a", "b"], ["x", "y"]));
    let keep_alive = feed(downstream.as_ref(), 1);
    let _x = drain(downstream.as_ref(), 0, 1);
    let _y = drain(downstream.as_ref(), 1, 1);
    downstream.start();

    let finishing = tokio::spawn(async move { source.complete() });
    upstream.publisher_for(0).subscribe(downstream.subscriber_for(0));
    finishing.await.unwrap();

    eventually("late input completed", || {
      entries(&log).contains(&"complete 0".to_string())
    })
    .await;
    terminated(upstream.as_ref()).await;
    keep_alive.complete();
    terminated(downstream.as_ref()).await;
  }
}
