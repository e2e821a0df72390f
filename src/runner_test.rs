//! # Graph Runner Test Suite
//!
//! Whole graphs built against the built-in store: external ports, initial
//! values, fan-out, nested subgraphs, error propagation and packet logging.

use crate::component::Component;
use crate::error::{GraphError, RunError};
use crate::graph::{Graph, PortRef};
use crate::listener::WriterPacketListener;
use crate::nodes::component_store;
use crate::nodes::io::Output;
use crate::publisher::{CollectingSubscriber, PublisherBuilder};
use crate::runner::GraphRunner;
use crate::store::ComponentSpec;
use crate::test_util::{MockSubscriber, eventually};
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn runner() -> GraphRunner {
  GraphRunner::new(component_store())
}

/// `x -> id -> y`
fn identity_subgraph() -> Graph {
  let mut sub = Graph::new();
  sub.add_node("id", "core/Identity").unwrap();
  sub.add_external_in("x", PortRef::new("id", "in"), false);
  sub.add_external_out("y", PortRef::new("id", "out"), false);
  sub
}

/// `3 + 4`, exposed as `sum`.
fn adder() -> Graph {
  let mut graph = Graph::new();
  graph.add_node("add", "operators/Add").unwrap();
  graph.set_initial(PortRef::new("add", "in1"), json!(3));
  graph.set_initial(PortRef::new("add", "in2"), json!(4));
  graph.add_external_out("sum", PortRef::new("add", "out"), false);
  graph
}

/// `[1, 2, 3]` times a repeated `10`, collected into one array.
fn scale_graph() -> Graph {
  let mut graph = Graph::new();
  graph.add_node("items", "core/FromArray").unwrap();
  graph.add_node("factor", "core/Repeat").unwrap();
  graph.add_node("mul", "operators/Multiply").unwrap();
  graph.add_node("collect", "core/ToArray").unwrap();
  graph.set_initial(PortRef::new("items", "in"), json!([1, 2, 3]));
  graph.set_initial(PortRef::new("factor", "in"), json!(10));
  graph.add_edge(PortRef::new("items", "out"), PortRef::new("mul", "in1"));
  graph.add_edge(PortRef::new("factor", "out"), PortRef::new("mul", "in2"));
  graph.add_edge(PortRef::new("mul", "out"), PortRef::new("collect", "in"));
  graph.add_external_out("scaled", PortRef::new("collect", "out"), false);
  graph
}

/// The fifth natural number, picked out of an unbounded counter.
fn fifth_natural() -> Graph {
  let mut graph = Graph::new();
  graph.add_node("nats", "core/Nats").unwrap();
  graph.add_node("pick", "core/Nth").unwrap();
  graph.set_initial(PortRef::new("pick", "n"), json!(4));
  graph.add_edge(PortRef::new("nats", "out"), PortRef::new("pick", "in"));
  graph.add_external_out("fifth", PortRef::new("pick", "out"), false);
  graph
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
  fn lines(&self) -> Vec<String> {
    String::from_utf8(self.0.lock().unwrap().clone())
      .unwrap()
      .lines()
      .map(str::to_string)
      .collect()
  }

  fn contains(&self, line: &str) -> bool {
    self.lines().iter().any(|l| l == line)
  }
}

impl Write for SharedBuffer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

// ============================================================================
// Running graphs
// ============================================================================

#[tokio::test]
async fn test_values_flow_through_a_subgraph() {
  let mut graph = Graph::new();
  graph.add_subgraph("ident", identity_subgraph());
  graph.add_subgraph_node("pass", "ident").unwrap();
  graph.add_external_in("input", PortRef::new("pass", "x"), false);
  graph.add_external_out("output", PortRef::new("pass", "y"), false);

  let component = runner().instantiate(&graph).unwrap();
  assert_eq!(component.spec(), &ComponentSpec::new(["input"], ["output"]));
  PublisherBuilder::from_values([json!(1), json!(2), json!(3)]).to(component.subscriber_for(0));
  let sink = CollectingSubscriber::new();
  component.publisher_for(0).subscribe(sink.clone());
  component.start();

  assert_eq!(sink.result().await.unwrap(), vec![json!(1), json!(2), json!(3)]);
  component.when_terminated().await;
  assert!(component.is_terminated());
}

#[tokio::test]
async fn test_initial_values_feed_a_pure_component() {
  let output = runner().run_to_completion(&adder()).await.unwrap();
  assert_eq!(output.get("sum"), Some(&[json!(7)][..]));
  assert_eq!(output.get("missing"), None);
}

#[tokio::test]
async fn test_single_unit_of_demand_gets_the_sum_and_completion() {
  let component = runner().instantiate(&adder()).unwrap();
  let sink = MockSubscriber::requesting(1);
  component.publisher_for(0).subscribe(sink.clone());
  component.start();

  eventually("sum completed", || sink.is_completed()).await;
  assert_eq!(sink.values(), vec![json!(7)]);
  assert!(sink.error().is_none());
  component.when_terminated().await;
}

#[tokio::test]
async fn test_fan_out_reaches_every_edge() {
  let mut graph = Graph::new();
  graph.add_node("src", "core/Identity").unwrap();
  graph.add_node("a", "core/Identity").unwrap();
  graph.add_node("b", "core/Identity").unwrap();
  graph.set_initial(PortRef::new("src", "in"), json!("hi"));
  graph.add_edge(PortRef::new("src", "out"), PortRef::new("a", "in"));
  graph.add_edge(PortRef::new("src", "out"), PortRef::new("b", "in"));
  graph.add_external_out("left", PortRef::new("a", "out"), false);
  graph.add_external_out("right", PortRef::new("b", "out"), false);

  let output = runner().run_to_completion(&graph).await.unwrap();
  assert_eq!(output.get("left"), Some(&[json!("hi")][..]));
  assert_eq!(output.get("right"), Some(&[json!("hi")][..]));
}

#[tokio::test]
async fn test_operators_compose_across_edges() {
  // (2 * 5) - 3
  let mut graph = Graph::new();
  graph.add_node("mul", "operators/Multiply").unwrap();
  graph.add_node("sub", "operators/Subtract").unwrap();
  graph.set_initial(PortRef::new("mul", "in1"), json!(2));
  graph.set_initial(PortRef::new("mul", "in2"), json!(5));
  graph.set_initial(PortRef::new("sub", "in2"), json!(3));
  graph.add_edge(PortRef::new("mul", "out"), PortRef::new("sub", "in1"));
  graph.add_external_out("result", PortRef::new("sub", "out"), false);

  let output = runner().run_to_completion(&graph).await.unwrap();
  assert_eq!(output.get("result"), Some(&[json!(7)][..]));
}

#[tokio::test]
async fn test_edges_to_void_are_skipped() {
  let mut graph = adder();
  graph.add_edge(PortRef::new("add", "out"), PortRef::new("void", "in"));
  graph.set_initial(PortRef::new("void", "x"), json!(1));

  let output = runner().run_to_completion(&graph).await.unwrap();
  assert_eq!(output.get("sum"), Some(&[json!(7)][..]));
}

#[tokio::test]
async fn test_run_graph_drives_sinks() {
  let buffer = Arc::new(tokio::sync::Mutex::new(Vec::<u8>::new()));
  let mut store = component_store();
  let shared = Arc::clone(&buffer);
  store.register_behavior(
    "io/Output",
    ComponentSpec::new(["in1"], Vec::<String>::new()),
    move || Output::shared(Arc::clone(&shared)),
  );

  let mut graph = adder();
  graph.add_node("print", "io/Output").unwrap();
  graph.add_edge(PortRef::new("add", "out"), PortRef::new("print", "in1"));

  let component = GraphRunner::new(store).run_graph(&graph).unwrap();
  component.when_terminated().await;
  assert_eq!(buffer.lock().await.as_slice(), b"7\n");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_error_terminates_the_run() {
  let mut calc = Graph::new();
  calc.add_node("div", "operators/Divide").unwrap();
  calc.set_initial(PortRef::new("div", "in1"), json!(1));
  calc.set_initial(PortRef::new("div", "in2"), json!(0));
  calc.add_external_out("q", PortRef::new("div", "out"), false);

  let mut graph = Graph::new();
  graph.add_subgraph("calc", calc);
  graph.add_subgraph_node("calc", "calc").unwrap();
  graph.add_node("id", "core/Identity").unwrap();
  graph.add_edge(PortRef::new("calc", "q"), PortRef::new("id", "in"));
  graph.add_external_out("result", PortRef::new("id", "out"), false);

  let error = runner().run_to_completion(&graph).await.unwrap_err();
  let RunError::Stream(error) = error else {
    panic!("expected a stream error, got {:?}", error);
  };
  assert_eq!(error.message, "division by zero");
  assert_eq!(error.component.unwrap().name, "calc/div");
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_before_running() {
  let mut graph = adder();
  graph.add_node("ghost", "core/Ghost").unwrap();
  let error = runner().run_to_completion(&graph).await.unwrap_err();
  assert_eq!(
    error,
    RunError::Graph(GraphError::UnknownComponent("core/Ghost".to_string()))
  );
  assert!(runner().instantiate(&graph).is_err());
}

// ============================================================================
// Inspection
// ============================================================================

#[tokio::test]
async fn test_graph_component_exposes_its_nodes() {
  let mut graph = adder();
  graph.add_subgraph("ident", identity_subgraph());
  graph.add_subgraph_node("pass", "ident").unwrap();
  graph.add_edge(PortRef::new("add", "out"), PortRef::new("pass", "x"));

  let component = runner().instantiate(&graph).unwrap();
  assert_eq!(component.name(), "graph");
  assert_eq!(component.node_ids().collect::<Vec<_>>(), vec!["add", "pass"]);
  assert_eq!(component.node("pass").unwrap().name(), "pass");
  assert_eq!(component.node("add").unwrap().name(), "add");
  assert!(component.node("nope").is_none());
  component.terminate(None);
  component.when_terminated().await;
}

#[tokio::test]
async fn test_listener_sees_edges_initials_and_nodes() {
  let buffer = SharedBuffer::default();
  let listener = Arc::new(WriterPacketListener::new(buffer.clone()));

  let mut graph = adder();
  graph.add_subgraph("ident", identity_subgraph());
  graph.add_subgraph_node("pass", "ident").unwrap();
  graph.add_edge(PortRef::new("add", "out"), PortRef::new("pass", "x"));
  graph.add_external_out("passed", PortRef::new("pass", "y"), false);

  let output = runner()
    .with_listener(listener)
    .run_to_completion(&graph)
    .await
    .unwrap();
  assert_eq!(output.get("passed"), Some(&[json!(7)][..]));

  eventually("node lines", || {
    buffer.contains("NODE add: TERMINATED")
      && buffer.contains("NODE pass: TERMINATED")
      && buffer.contains("NODE <<pass>> id: TERMINATED")
  })
  .await;
  assert!(buffer.contains("EDGE INITIAL(3) -> add[in1]: DATA 3"));
  assert!(buffer.contains("EDGE add[in1] -> INITIAL(3): REQUEST 1"));
  assert!(buffer.contains("EDGE add[out] -> pass[x]: DATA 7"));
  assert!(buffer.contains("EDGE add[out] -> pass[x]: COMPLETE"));
}

// ============================================================================
// Multi-threaded runtime
// ============================================================================

const ROUNDS: usize = 200;

async fn run_rounds(graph: &Graph, port: &str, expected: &[serde_json::Value]) {
  let runner = runner();
  for round in 0..ROUNDS {
    let output = tokio::time::timeout(Duration::from_secs(5), runner.run_to_completion(graph))
      .await
      .unwrap_or_else(|_| panic!("round {} did not finish", round))
      .unwrap();
    assert_eq!(output.get(port), Some(expected), "round {}", round);
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adder_on_many_threads() {
  run_rounds(&adder(), "sum", &[json!(7)]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeated_operand_on_many_threads() {
  run_rounds(&scale_graph(), "scaled", &[json!([10, 20, 30])]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_counter_on_many_threads() {
  run_rounds(&fifth_natural(), "fifth", &[json!(5)]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_external_ports_on_many_threads() {
  let mut graph = Graph::new();
  graph.add_subgraph("ident", identity_subgraph());
  graph.add_subgraph_node("pass", "ident").unwrap();
  graph.add_external_in("input", PortRef::new("pass", "x"), false);
  graph.add_external_out("output", PortRef::new("pass", "y"), false);
  let values: Vec<_> = (0..20).map(|n| json!(n)).collect();

  let runner = runner();
  for round in 0..ROUNDS {
    let component = runner.instantiate(&graph).unwrap();
    PublisherBuilder::from_values(values.clone()).to(component.subscriber_for(0));
    let sink = CollectingSubscriber::new();
    component.publisher_for(0).subscribe(sink.clone());
    component.start();

    let collected = tokio::time::timeout(Duration::from_secs(5), sink.result())
      .await
      .unwrap_or_else(|_| panic!("round {} did not finish", round))
      .unwrap();
    assert_eq!(collected, values, "round {}", round);
    component.when_terminated().await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_demand_paced_sink_on_many_threads() {
  let runner = runner();
  for _ in 0..ROUNDS {
    let component = runner.instantiate(&fifth_natural()).unwrap();
    let sink = MockSubscriber::requesting(1);
    component.publisher_for(0).subscribe(sink.clone());
    component.start();

    eventually("fifth completed", || sink.is_completed()).await;
    assert_eq!(sink.values(), vec![json!(5)]);
    component.when_terminated().await;
  }
}
