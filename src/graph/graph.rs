//! # Graph
//!
//! The static description of a network: nodes (component instances or
//! nested subgraphs), edges between their ports, initial values for input
//! ports, and the ports a graph exposes when used as a subgraph.
//!
//! A graph is plain data. It is built in code or read from JSON, checked
//! against a [`ComponentStore`] with [`Graph::validate`], and turned into a
//! running network by the [`GraphRunner`](crate::runner::GraphRunner). It is
//! never mutated while running; subgraph definitions are reference counted
//! so every node using one shares it.
//!
//! Edges and initials touching the reserved node [`VOID_NODE`] are allowed
//! without the node existing and are skipped at run time.

use super::serialization::pairs;
use crate::error::{GraphError, PortDirection};
use crate::protocol::Value;
use crate::store::{ComponentSpec, ComponentStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Node id whose edges and initials are dropped when a graph runs.
pub const VOID_NODE: &str = "void";

/// A port of a node, displayed as `node[port]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRef {
  /// Node id within its graph.
  pub node_id: String,
  /// Port name on that node.
  pub port_name: String,
}

impl PortRef {
  /// Creates a port reference.
  pub fn new(node_id: impl Into<String>, port_name: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      port_name: port_name.into(),
    }
  }

  /// Whether the port belongs to [`VOID_NODE`].
  pub fn is_void(&self) -> bool {
    self.node_id == VOID_NODE
  }
}

impl fmt::Display for PortRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}[{}]", self.node_id, self.port_name)
  }
}

/// An input port of a node.
pub type InPortRef = PortRef;

/// An output port of a node.
pub type OutPortRef = PortRef;

/// A connection from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  /// Sending side.
  pub from: OutPortRef,
  /// Receiving side.
  pub to: InPortRef,
}

impl fmt::Display for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} -> {}", self.from, self.to)
  }
}

/// A port a graph exposes, backed by a port of one of its nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPort {
  /// Name seen from outside the graph.
  pub port_name: String,
  /// The node port it stands for.
  pub inner_port: PortRef,
  /// Whether the port was introduced by the compiler rather than declared.
  #[serde(default)]
  pub implicit: bool,
}

/// What a node is instantiated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
  /// A component from the store.
  Component {
    /// Component id in the store.
    #[serde(rename = "componentId")]
    component_id: String,
  },
  /// A subgraph of the enclosing graph.
  Subgraph {
    /// Subgraph id in the enclosing graph.
    #[serde(rename = "subgraphId")]
    subgraph_id: String,
  },
}

/// A network description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
  #[serde(with = "pairs", default)]
  nodes: BTreeMap<String, Node>,
  #[serde(default)]
  edges: Vec<Edge>,
  #[serde(with = "pairs", default)]
  initials: BTreeMap<InPortRef, Value>,
  #[serde(with = "pairs", default)]
  subgraphs: BTreeMap<String, Arc<Graph>>,
  #[serde(default)]
  external_ins: Vec<ExternalPort>,
  #[serde(default)]
  external_outs: Vec<ExternalPort>,
}

impl Graph {
  /// Creates an empty graph.
  pub fn new() -> Self {
    Self::default()
  }

  // --------------------------------------------------------------------------
  // Construction
  // --------------------------------------------------------------------------

  /// Adds a node instantiated from `component_id`.
  ///
  /// # Errors
  ///
  /// [`GraphError::DuplicateNode`] if `node_id` is taken.
  pub fn add_node(
    &mut self,
    node_id: impl Into<String>,
    component_id: impl Into<String>,
  ) -> Result<(), GraphError> {
    let component_id = component_id.into();
    self.insert_node(node_id.into(), Node::Component { component_id })
  }

  /// Adds a node instantiated from the subgraph `subgraph_id`, which must
  /// already be registered with [`Graph::add_subgraph`].
  ///
  /// # Errors
  ///
  /// [`GraphError::UnknownSubgraph`] or [`GraphError::DuplicateNode`].
  pub fn add_subgraph_node(
    &mut self,
    node_id: impl Into<String>,
    subgraph_id: impl Into<String>,
  ) -> Result<(), GraphError> {
    let subgraph_id = subgraph_id.into();
    self.get_subgraph(&subgraph_id)?;
    self.insert_node(node_id.into(), Node::Subgraph { subgraph_id })
  }

  fn insert_node(&mut self, node_id: String, node: Node) -> Result<(), GraphError> {
    trace!("Graph::insert_node(node_id={}, node={:?})", node_id, node);
    if self.nodes.contains_key(&node_id) {
      return Err(GraphError::DuplicateNode(node_id));
    }
    self.nodes.insert(node_id, node);
    Ok(())
  }

  /// Sets the value injected into `port` at start, replacing any previous one.
  pub fn set_initial(&mut self, port: InPortRef, value: Value) {
    self.initials.insert(port, value);
  }

  /// Connects `from` to `to`. Several edges may leave one output or enter
  /// one input.
  pub fn add_edge(&mut self, from: OutPortRef, to: InPortRef) {
    self.edges.push(Edge { from, to });
  }

  /// Registers a subgraph definition under `subgraph_id`.
  pub fn add_subgraph(&mut self, subgraph_id: impl Into<String>, subgraph: impl Into<Arc<Graph>>) {
    self.subgraphs.insert(subgraph_id.into(), subgraph.into());
  }

  /// Exposes the input `inner_port` as the graph input `port_name`.
  pub fn add_external_in(
    &mut self,
    port_name: impl Into<String>,
    inner_port: InPortRef,
    implicit: bool,
  ) {
    self.external_ins.push(ExternalPort {
      port_name: port_name.into(),
      inner_port,
      implicit,
    });
  }

  /// Exposes the output `inner_port` as the graph output `port_name`.
  pub fn add_external_out(
    &mut self,
    port_name: impl Into<String>,
    inner_port: OutPortRef,
    implicit: bool,
  ) {
    self.external_outs.push(ExternalPort {
      port_name: port_name.into(),
      inner_port,
      implicit,
    });
  }

  // --------------------------------------------------------------------------
  // Accessors
  // --------------------------------------------------------------------------

  /// The node `node_id`.
  pub fn get_node(&self, node_id: &str) -> Result<&Node, GraphError> {
    self
      .nodes
      .get(node_id)
      .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))
  }

  /// The subgraph registered as `subgraph_id`.
  pub fn get_subgraph(&self, subgraph_id: &str) -> Result<&Arc<Graph>, GraphError> {
    self
      .subgraphs
      .get(subgraph_id)
      .ok_or_else(|| GraphError::UnknownSubgraph(subgraph_id.to_string()))
  }

  /// Nodes by id.
  pub fn nodes(&self) -> &BTreeMap<String, Node> {
    &self.nodes
  }

  /// Edges, in insertion order.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Initial values by input port.
  pub fn initials(&self) -> &BTreeMap<InPortRef, Value> {
    &self.initials
  }

  /// Subgraph definitions by id.
  pub fn subgraphs(&self) -> &BTreeMap<String, Arc<Graph>> {
    &self.subgraphs
  }

  /// Exposed inputs, in index order.
  pub fn external_ins(&self) -> &[ExternalPort] {
    &self.external_ins
  }

  /// Exposed outputs, in index order.
  pub fn external_outs(&self) -> &[ExternalPort] {
    &self.external_outs
  }

  /// The ports this graph has when used as a component.
  pub fn spec(&self) -> ComponentSpec {
    ComponentSpec::new(
      self.external_ins.iter().map(|p| p.port_name.clone()),
      self.external_outs.iter().map(|p| p.port_name.clone()),
    )
  }

  /// Port names of node `node_id`: the component's spec, or the subgraph's
  /// external ports.
  pub fn node_spec<Impl>(
    &self,
    node_id: &str,
    store: &ComponentStore<Impl>,
  ) -> Result<ComponentSpec, GraphError> {
    match self.get_node(node_id)? {
      Node::Component { component_id } => store.spec(component_id).cloned(),
      Node::Subgraph { subgraph_id } => Ok(self.get_subgraph(subgraph_id)?.spec()),
    }
  }

  // --------------------------------------------------------------------------
  // Validation
  // --------------------------------------------------------------------------

  /// Checks every reference in this graph and, recursively, in the
  /// subgraphs its nodes use: component ids exist in `store`, subgraph ids
  /// and node ids exist, and every port name belongs to its node.
  pub fn validate<Impl>(&self, store: &ComponentStore<Impl>) -> Result<(), GraphError> {
    let mut checked = BTreeSet::new();
    self.validate_inner(store, &mut checked)
  }

  fn validate_inner<Impl>(
    &self,
    store: &ComponentStore<Impl>,
    checked: &mut BTreeSet<*const Graph>,
  ) -> Result<(), GraphError> {
    let mut specs = BTreeMap::new();
    for (node_id, node) in &self.nodes {
      let spec = match node {
        Node::Component { component_id } => store.spec(component_id)?.clone(),
        Node::Subgraph { subgraph_id } => {
          let subgraph = self.get_subgraph(subgraph_id)?;
          if checked.insert(Arc::as_ptr(subgraph)) {
            subgraph.validate_inner(store, checked)?;
          }
          subgraph.spec()
        }
      };
      specs.insert(node_id.as_str(), spec);
    }

    let check = |port: &PortRef, direction: PortDirection| -> Result<(), GraphError> {
      let spec = specs
        .get(port.node_id.as_str())
        .ok_or_else(|| GraphError::UnknownNode(port.node_id.clone()))?;
      let found = match direction {
        PortDirection::Input => spec.in_index(&port.port_name),
        PortDirection::Output => spec.out_index(&port.port_name),
      };
      match found {
        Some(_) => Ok(()),
        None => Err(GraphError::UnknownPort {
          node: port.node_id.clone(),
          port: port.port_name.clone(),
          direction,
        }),
      }
    };

    for edge in &self.edges {
      if edge.from.is_void() || edge.to.is_void() {
        continue;
      }
      check(&edge.from, PortDirection::Output)?;
      check(&edge.to, PortDirection::Input)?;
    }
    for port in self.initials.keys().filter(|port| !port.is_void()) {
      check(port, PortDirection::Input)?;
    }
    for external in &self.external_ins {
      check(&external.inner_port, PortDirection::Input)?;
    }
    for external in &self.external_outs {
      check(&external.inner_port, PortDirection::Output)?;
    }
    Ok(())
  }

  // --------------------------------------------------------------------------
  // Serialized form
  // --------------------------------------------------------------------------

  /// The graph as a JSON tree; maps are written as `[key, value]` pairs.
  pub fn to_value(&self) -> Result<Value, GraphError> {
    Ok(serde_json::to_value(self)?)
  }

  /// Reads a graph from the tree produced by [`Graph::to_value`].
  pub fn from_value(value: Value) -> Result<Self, GraphError> {
    Ok(serde_json::from_value(value)?)
  }

  /// The graph as a JSON string.
  pub fn to_json(&self) -> Result<String, GraphError> {
    Ok(serde_json::to_string(self)?)
  }

  /// The graph as indented JSON.
  pub fn to_json_pretty(&self) -> Result<String, GraphError> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  /// Parses a graph from JSON.
  pub fn from_json(json: &str) -> Result<Self, GraphError> {
    Ok(serde_json::from_str(json)?)
  }
}
