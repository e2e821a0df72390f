//! # Graph Runner
//!
//! Turns a [`Graph`] into a running network.
//!
//! Instantiation validates the graph against the store first, so a graph
//! that refers to a missing component, subgraph, node or port is rejected
//! before anything is constructed. Then, per graph (recursively for subgraph
//! nodes):
//!
//! 1. every node becomes a live component: a store component, or a nested
//!    [`GraphComponent`] for a subgraph node;
//! 2. every edge subscribes the target input to the source output;
//! 3. every initial value is fed to its input by a one-value publisher that
//!    delivers asynchronously;
//! 4. the external ports are mapped onto the node ports they stand for.
//!
//! Edges and initials touching [`VOID_NODE`](crate::graph::VOID_NODE) are
//! skipped. When a [`PacketListener`] is configured every edge is tapped and
//! every node's termination reported to it.
//!
//! ```rust,no_run
//! use portflow::graph::{Graph, PortRef};
//! use portflow::nodes::component_store;
//! use portflow::runner::GraphRunner;
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), portflow::error::RunError> {
//! let mut graph = Graph::new();
//! graph.add_node("add", "operators/Add")?;
//! graph.set_initial(PortRef::new("add", "in1"), json!(3));
//! graph.set_initial(PortRef::new("add", "in2"), json!(4));
//! graph.add_external_out("sum", PortRef::new("add", "out"), false);
//!
//! let output = GraphRunner::new(component_store()).run_to_completion(&graph).await?;
//! assert_eq!(output.get("sum"), Some(&[json!(7)][..]));
//! # Ok(())
//! # }
//! ```

use crate::component::Component;
use crate::error::{GraphError, PortDirection, RunError, StreamError};
use crate::graph::{Graph, Node, PortRef};
use crate::listener::PacketListener;
use crate::protocol::{Publisher, Subscriber, Value};
use crate::publisher::{CollectingSubscriber, PublisherBuilder};
use crate::store::{ComponentSpec, ComponentStore};
use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Builds and runs graphs against a component store.
pub struct GraphRunner {
  store: Arc<ComponentStore>,
  listener: Option<Arc<dyn PacketListener>>,
}

impl GraphRunner {
  /// Creates a runner resolving component ids in `store`.
  pub fn new(store: impl Into<Arc<ComponentStore>>) -> Self {
    Self {
      store: store.into(),
      listener: None,
    }
  }

  /// Reports every edge signal and node termination to `listener`.
  pub fn with_listener(mut self, listener: Arc<dyn PacketListener>) -> Self {
    self.listener = Some(listener);
    self
  }

  /// The store components are created from.
  pub fn store(&self) -> &ComponentStore {
    &self.store
  }

  /// Validates `graph` and builds its network without starting it.
  ///
  /// Must be called from within a tokio runtime.
  pub fn instantiate(&self, graph: &Graph) -> Result<Arc<GraphComponent>, GraphError> {
    graph.validate(&self.store)?;
    Ok(Arc::new(self.build(graph, None)?))
  }

  /// Builds and starts `graph`.
  pub fn run_graph(&self, graph: &Graph) -> Result<Arc<GraphComponent>, GraphError> {
    let component = self.instantiate(graph)?;
    component.start();
    Ok(component)
  }

  /// Runs `graph` until every component terminated, draining each external
  /// output with unbounded demand.
  ///
  /// The first error reaching an external output terminates the whole
  /// network with that error and is returned once everything stopped.
  pub async fn run_to_completion(&self, graph: &Graph) -> Result<RunOutput, RunError> {
    let component = self.instantiate(graph)?;
    let sinks: Vec<(String, Arc<CollectingSubscriber>)> = graph
      .external_outs()
      .iter()
      .enumerate()
      .map(|(idx, port)| {
        let sink = CollectingSubscriber::new();
        component.publisher_for(idx).subscribe(sink.clone());
        (port.port_name.clone(), sink)
      })
      .collect();
    component.start();

    let results = try_join_all(sinks.iter().map(|(_, sink)| sink.result())).await;
    match results {
      Ok(values) => {
        component.when_terminated().await;
        let outputs = sinks
          .into_iter()
          .map(|(name, _)| name)
          .zip(values)
          .collect();
        Ok(RunOutput { outputs })
      }
      Err(error) => {
        debug!("GraphRunner: run failed: {}", error);
        component.terminate(Some(error.clone()));
        component.when_terminated().await;
        Err(RunError::Stream(error))
      }
    }
  }

  fn build(&self, graph: &Graph, graph_name: Option<&str>) -> Result<GraphComponent, GraphError> {
    let mut components: BTreeMap<String, Arc<dyn Component>> = BTreeMap::new();
    for (node_id, node) in graph.nodes() {
      let instance_name = match graph_name {
        Some(parent) => format!("{}/{}", parent, node_id),
        None => node_id.clone(),
      };
      trace!("GraphRunner::build(node={}, instance={})", node_id, instance_name);
      let component: Arc<dyn Component> = match node {
        Node::Component { component_id } => self.store.instantiate(component_id, &instance_name)?,
        Node::Subgraph { subgraph_id } => {
          let subgraph = graph.get_subgraph(subgraph_id)?;
          Arc::new(self.build(subgraph, Some(&instance_name))?)
        }
      };
      if let Some(listener) = &self.listener {
        let node_listener = listener.node_listener_for(node_id, graph_name);
        let watched = Arc::clone(&component);
        tokio::spawn(async move {
          watched.when_terminated().await;
          node_listener.on_terminate();
        });
      }
      components.insert(node_id.clone(), component);
    }

    for edge in graph.edges() {
      if edge.from.is_void() || edge.to.is_void() {
        trace!("GraphRunner::build skipping void edge {}", edge);
        continue;
      }
      let publisher = publisher_at(&components, &edge.from)?;
      let subscriber = subscriber_at(&components, &edge.to)?;
      let mut builder = PublisherBuilder::from(publisher);
      if let Some(listener) = &self.listener {
        let tap = listener.edge_listener_for(&edge.from, &edge.to, graph_name);
        builder = builder.tap(tap.downstream, Some(tap.upstream));
      }
      builder.to(subscriber);
    }

    for (port, value) in graph.initials() {
      if port.is_void() {
        continue;
      }
      let subscriber = subscriber_at(&components, port)?;
      let mut builder = PublisherBuilder::from_single(value.clone()).asynchronous();
      if let Some(listener) = &self.listener {
        let tap = listener.initial_listener_for(value, port, graph_name);
        builder = builder.tap(tap.downstream, Some(tap.upstream));
      }
      builder.to(subscriber);
    }

    let ins = graph
      .external_ins()
      .iter()
      .map(|external| locate(&components, &external.inner_port, PortDirection::Input))
      .collect::<Result<Vec<_>, _>>()?;
    let outs = graph
      .external_outs()
      .iter()
      .map(|external| locate(&components, &external.inner_port, PortDirection::Output))
      .collect::<Result<Vec<_>, _>>()?;

    Ok(GraphComponent {
      name: graph_name.unwrap_or("graph").to_string(),
      spec: graph.spec(),
      components,
      ins,
      outs,
    })
  }
}

type Located = (Arc<dyn Component>, usize);

fn locate(
  components: &BTreeMap<String, Arc<dyn Component>>,
  port: &PortRef,
  direction: PortDirection,
) -> Result<Located, GraphError> {
  let component = components
    .get(&port.node_id)
    .ok_or_else(|| GraphError::UnknownNode(port.node_id.clone()))?;
  let spec = component.spec();
  let idx = match direction {
    PortDirection::Input => spec.in_index(&port.port_name),
    PortDirection::Output => spec.out_index(&port.port_name),
  };
  match idx {
    Some(idx) => Ok((Arc::clone(component), idx)),
    None => Err(GraphError::UnknownPort {
      node: port.node_id.clone(),
      port: port.port_name.clone(),
      direction,
    }),
  }
}

fn publisher_at(
  components: &BTreeMap<String, Arc<dyn Component>>,
  port: &PortRef,
) -> Result<Arc<dyn Publisher>, GraphError> {
  let (component, idx) = locate(components, port, PortDirection::Output)?;
  Ok(component.publisher_for(idx))
}

fn subscriber_at(
  components: &BTreeMap<String, Arc<dyn Component>>,
  port: &PortRef,
) -> Result<Arc<dyn Subscriber>, GraphError> {
  let (component, idx) = locate(components, port, PortDirection::Input)?;
  Ok(component.subscriber_for(idx))
}

/// Values collected from each external output by
/// [`GraphRunner::run_to_completion`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
  /// External output name to the values it produced, in order.
  pub outputs: BTreeMap<String, Vec<Value>>,
}

impl RunOutput {
  /// Values produced on the external output `port_name`.
  pub fn get(&self, port_name: &str) -> Option<&[Value]> {
    self.outputs.get(port_name).map(Vec::as_slice)
  }
}

/// A running graph seen as one component.
///
/// Its ports are the graph's external ports; subscribing to one subscribes
/// to the node port behind it. It terminates once every node terminated.
pub struct GraphComponent {
  name: String,
  spec: ComponentSpec,
  components: BTreeMap<String, Arc<dyn Component>>,
  ins: Vec<Located>,
  outs: Vec<Located>,
}

impl GraphComponent {
  /// The live component of node `node_id`.
  pub fn node(&self, node_id: &str) -> Option<&Arc<dyn Component>> {
    self.components.get(node_id)
  }

  /// Node ids, sorted.
  pub fn node_ids(&self) -> impl Iterator<Item = &str> {
    self.components.keys().map(String::as_str)
  }
}

#[async_trait]
impl Component for GraphComponent {
  fn name(&self) -> &str {
    &self.name
  }

  fn spec(&self) -> &ComponentSpec {
    &self.spec
  }

  fn subscriber_for(&self, idx: usize) -> Arc<dyn Subscriber> {
    assert!(idx < self.ins.len(), "{}: no input port at index {}", self.name, idx);
    let (component, inner) = &self.ins[idx];
    component.subscriber_for(*inner)
  }

  fn publisher_for(&self, idx: usize) -> Arc<dyn Publisher> {
    assert!(idx < self.outs.len(), "{}: no output port at index {}", self.name, idx);
    let (component, inner) = &self.outs[idx];
    component.publisher_for(*inner)
  }

  fn start(&self) {
    debug!("{}: starting {} nodes", self.name, self.components.len());
    for component in self.components.values() {
      component.start();
    }
  }

  fn terminate(&self, error: Option<StreamError>) {
    for component in self.components.values() {
      component.terminate(error.clone());
    }
  }

  fn is_terminated(&self) -> bool {
    self.components.values().all(|component| component.is_terminated())
  }

  async fn when_terminated(&self) {
    join_all(self.components.values().map(|component| component.when_terminated())).await;
  }
}
