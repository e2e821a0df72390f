//! # OutPort Test Suite
//!
//! Covers fan-out pacing, queued sends, ordered job results, cancellation and
//! termination of output ports.

use super::{OutEvent, OutPort, PortState};
use crate::error::StreamError;
use crate::protocol::Subscriber;
use crate::test_util::{MockSubscriber, eventually, settle};
use serde_json::json;
use std::sync::Arc;

fn events(port: &mut OutPort) -> Vec<OutEvent> {
  std::iter::from_fn(|| port.next_event()).collect()
}

fn attach(port: &mut OutPort, id: u64) -> Arc<MockSubscriber> {
  let subscriber = MockSubscriber::new();
  assert!(port.add_subscriber(id, Arc::clone(&subscriber) as Arc<dyn Subscriber>));
  subscriber
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_fan_out_is_paced_by_the_slowest_subscriber() {
  let mut port = OutPort::new("source[out]");
  let slow = attach(&mut port, 1);
  let fast = attach(&mut port, 2);

  port.request_from(1, 1);
  assert!(events(&mut port).is_empty());
  port.request_from(2, 3);
  assert_eq!(events(&mut port), vec![OutEvent::Request(1)]);

  port.send(json!("a"));
  port.request_from(1, 1);
  assert_eq!(events(&mut port), vec![OutEvent::Request(1)]);
  port.send(json!("b"));

  eventually("both received two values", || {
    slow.values().len() == 2 && fast.values().len() == 2
  })
  .await;
  assert_eq!(slow.values(), vec![json!("a"), json!("b")]);
  assert_eq!(fast.values(), vec![json!("a"), json!("b")]);
  assert_eq!(port.requested(), 0);
}

#[tokio::test]
async fn test_send_is_not_delivered_synchronously() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.request_from(1, 1);
  port.send(json!(1));
  assert!(subscriber.values().is_empty());
  eventually("value delivered", || subscriber.values() == vec![json!(1)]).await;
}

#[tokio::test]
#[should_panic(expected = "with no demand")]
async fn test_send_without_demand_panics() {
  let mut port = OutPort::new("source[out]");
  let _subscriber = attach(&mut port, 1);
  port.send(json!(1));
}

#[tokio::test]
async fn test_enqueued_values_are_flushed_before_requesting_the_component() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.send_or_enqueue(json!(1));
  port.send_or_enqueue(json!(2));
  assert_eq!(port.queue_size(), 2);

  port.request_from(1, 3);
  assert_eq!(events(&mut port), vec![OutEvent::Request(1)]);
  assert_eq!(port.requested(), 1);
  eventually("queued values delivered", || subscriber.values().len() == 2).await;
}

#[tokio::test]
async fn test_request_served_from_queue_is_reported_as_zero() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.send_or_enqueue(json!(1));
  port.send_or_enqueue(json!(2));

  port.request_from(1, 1);
  assert_eq!(events(&mut port), vec![OutEvent::Request(0)]);
  assert_eq!(port.queue_size(), 1);
  eventually("first value delivered", || subscriber.values() == vec![json!(1)]).await;
}

// ============================================================================
// Jobs and termination
// ============================================================================

#[tokio::test]
async fn test_job_results_are_applied_in_registration_order() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.request_from(1, 3);
  let first = port.register_job().unwrap();
  let second = port.register_job().unwrap();
  let third = port.register_job().unwrap();

  assert_eq!(port.finish_job(third, Ok(None)), 0);
  assert_eq!(port.finish_job(second, Ok(Some(json!(2)))), 0);
  assert_eq!(port.finish_job(first, Ok(Some(json!(1)))), 3);

  assert!(port.is_terminated());
  eventually("completed", || subscriber.is_completed()).await;
  assert_eq!(subscriber.values(), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_complete_waits_for_pending_jobs() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.request_from(1, 1);
  let job = port.register_job().unwrap();

  port.complete();
  assert_eq!(port.state(), PortState::DrainingJobs);
  assert!(port.register_job().is_none());

  port.finish_job(job, Ok(Some(json!("late"))));
  assert!(port.is_terminated());
  assert_eq!(events(&mut port), vec![
    OutEvent::Request(1),
    OutEvent::Closed { cancelled: false }
  ]);
  port.termination().wait().await;
  assert_eq!(subscriber.values(), vec![json!("late")]);
  assert!(subscriber.is_completed());
}

#[tokio::test]
async fn test_complete_waits_for_queued_values() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.send_or_enqueue(json!(1));
  port.complete();
  assert_eq!(port.state(), PortState::DrainingMessages);

  port.request_from(1, 1);
  assert!(port.is_terminated());
  port.termination().wait().await;
  assert_eq!(subscriber.values(), vec![json!(1)]);
  assert!(subscriber.is_completed());
}

#[tokio::test]
async fn test_error_drops_queued_values_and_reaches_every_subscriber() {
  let mut port = OutPort::new("source[out]");
  let a = attach(&mut port, 1);
  let b = attach(&mut port, 2);
  port.send_or_enqueue(json!(1));
  port.error(StreamError::new("broken"));
  port.complete();

  assert!(port.is_terminated());
  port.termination().wait().await;
  assert_eq!(a.error(), Some(StreamError::new("broken")));
  assert_eq!(b.error(), Some(StreamError::new("broken")));
  assert!(a.values().is_empty());
}

#[tokio::test]
async fn test_send_after_termination_is_ignored() {
  let mut port = OutPort::new("source[out]");
  let subscriber = attach(&mut port, 1);
  port.complete();
  port.send(json!(1));
  port.send_or_enqueue(json!(2));
  settle().await;
  assert!(subscriber.values().is_empty());
  assert!(subscriber.is_completed());
}

#[tokio::test]
async fn test_subscribing_to_terminated_port_is_refused() {
  let mut port = OutPort::new("source[out]");
  port.complete();
  let subscriber = MockSubscriber::new();
  assert!(!port.add_subscriber(1, subscriber as Arc<dyn Subscriber>));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_is_acknowledged_and_last_cancel_closes_the_port() {
  let mut port = OutPort::new("source[out]");
  let a = attach(&mut port, 1);
  let b = attach(&mut port, 2);

  port.cancel_from(1);
  eventually("cancel acknowledged", || a.is_completed()).await;
  assert_eq!(port.state(), PortState::Active);

  port.cancel_from(2);
  assert!(port.is_terminated());
  assert_eq!(events(&mut port), vec![OutEvent::Closed { cancelled: true }]);
  eventually("second cancel acknowledged", || b.is_completed()).await;
}

#[tokio::test]
async fn test_departing_slow_subscriber_releases_demand() {
  let mut port = OutPort::new("source[out]");
  let _slow = attach(&mut port, 1);
  let _fast = attach(&mut port, 2);

  port.request_from(2, 4);
  assert!(events(&mut port).is_empty());

  port.cancel_from(1);
  assert_eq!(events(&mut port), vec![OutEvent::Request(4)]);
  assert_eq!(port.requested(), 4);
}
