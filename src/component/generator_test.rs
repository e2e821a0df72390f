//! # GeneratorComponent Test Suite

use super::{Component, GeneratorComponent, InputStream, OutputStream};
use crate::error::StreamError;
use crate::protocol::Publisher;
use crate::store::ComponentSpec;
use crate::test_util::{MockPublisher, MockSubscriber, eventually};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn doubling(mut inputs: Vec<InputStream>) -> OutputStream {
  let mut input = inputs.remove(0);
  Box::pin(async_stream::stream! {
    while let Some(value) = input.next().await {
      match value {
        Ok(value) => yield Ok(json!(value.as_i64().unwrap_or(0) * 2)),
        Err(error) => {
          yield Err(error);
          break;
        }
      }
    }
  })
}

fn wire(component: &dyn Component, demand: u64) -> (Arc<MockPublisher>, Arc<MockSubscriber>) {
  let upstream = MockPublisher::new();
  upstream.subscribe(component.subscriber_for(0));
  let downstream = MockSubscriber::requesting(demand);
  component.publisher_for(0).subscribe(downstream.clone());
  (upstream, downstream)
}

async fn terminated(component: &dyn Component) {
  tokio::time::timeout(Duration::from_secs(2), component.when_terminated())
    .await
    .expect("component did not terminate");
}

// ============================================================================
// Generator bodies
// ============================================================================

#[tokio::test]
async fn test_generator_pulls_one_value_at_a_time() {
  let component = GeneratorComponent::create("double", ComponentSpec::new(["in"], ["out"]), doubling);
  let (upstream, downstream) = wire(component.as_ref(), 5);
  component.start();

  eventually("first pull", || upstream.requested() == 1).await;
  upstream.next(json!(1));
  eventually("second pull", || upstream.requested() == 2).await;
  upstream.next(json!(2));
  eventually("third pull", || upstream.requested() == 3).await;
  upstream.complete();

  terminated(component.as_ref()).await;
  assert_eq!(downstream.values(), vec![json!(2), json!(4)]);
  assert!(downstream.is_completed());
}

#[tokio::test]
async fn test_generator_without_inputs_follows_demand() {
  let counter = |_inputs: Vec<InputStream>| -> OutputStream {
    futures::stream::iter((1..=3).map(|n| Ok(json!(n)))).boxed()
  };
  let component = GeneratorComponent::create(
    "count",
    ComponentSpec::new(Vec::<String>::new(), ["out"]),
    counter,
  );
  let downstream = MockSubscriber::requesting(2);
  component.publisher_for(0).subscribe(downstream.clone());
  component.start();

  eventually("two values", || downstream.values().len() == 2).await;
  assert!(!downstream.is_finished());

  downstream.request(10);
  terminated(component.as_ref()).await;
  assert_eq!(downstream.values(), vec![json!(1), json!(2), json!(3)]);
  assert!(downstream.is_completed());
}

#[tokio::test]
async fn test_generator_error_fails_the_output() {
  let failing = |_inputs: Vec<InputStream>| -> OutputStream {
    Box::pin(async_stream::stream! {
      yield Ok(json!("first"));
      yield Err(StreamError::new("generator broke"));
    })
  };
  let component = GeneratorComponent::create(
    "gen",
    ComponentSpec::new(Vec::<String>::new(), ["out"]),
    failing,
  );
  let downstream = MockSubscriber::requesting(5);
  component.publisher_for(0).subscribe(downstream.clone());
  component.start();

  terminated(component.as_ref()).await;
  assert_eq!(downstream.values(), vec![json!("first")]);
  let error = downstream.error().expect("output should have failed");
  assert_eq!(error.message, "generator broke");
  assert_eq!(error.component.unwrap().name, "gen");
}

#[tokio::test]
async fn test_input_error_reaches_the_generator() {
  let component = GeneratorComponent::create("double", ComponentSpec::new(["in"], ["out"]), doubling);
  let (upstream, downstream) = wire(component.as_ref(), 5);
  component.start();

  eventually("first pull", || upstream.requested() == 1).await;
  upstream.error(StreamError::new("bad input"));

  terminated(component.as_ref()).await;
  assert_eq!(downstream.error().unwrap().message, "bad input");
}

#[tokio::test]
async fn test_generator_ending_early_cancels_its_input() {
  let first_only = |mut inputs: Vec<InputStream>| -> OutputStream { inputs.remove(0).take(1).boxed() };
  let component = GeneratorComponent::create("head", ComponentSpec::new(["in"], ["out"]), first_only);
  let (upstream, downstream) = wire(component.as_ref(), 5);
  component.start();

  eventually("first pull", || upstream.requested() == 1).await;
  upstream.next(json!("only"));
  eventually("output completed", || downstream.is_completed()).await;
  eventually("input cancelled", || upstream.is_cancelled()).await;
  upstream.complete();

  terminated(component.as_ref()).await;
  assert_eq!(downstream.values(), vec![json!("only")]);
}
