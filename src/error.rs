//! # Error Types
//!
//! Errors raised by the runtime, split by where they surface:
//!
//! - **StreamError**: the only error that travels along the data path. It is
//!   delivered to subscribers through `on_error`, stored by input ports as the
//!   "last error" and returned from pulls on a failed input.
//! - **GraphError**: construction-time failures (unknown component, subgraph,
//!   node or port). They are returned before any component is started.
//! - **RunError**: the outcome of [`GraphRunner::run_to_completion`], wrapping
//!   either of the above.
//!
//! Protocol violations (a value sent without demand, a double subscribe) are
//! programming errors and abort with a panic naming the offending port.
//!
//! [`GraphRunner::run_to_completion`]: crate::runner::GraphRunner::run_to_completion

use std::fmt;

/// Identifies the component a [`StreamError`] originated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentInfo {
  /// Instance name of the component (for example `add` or `sub/add`).
  pub name: String,
  /// Type of the component logic (for example `Identity`).
  pub type_name: String,
}

impl ComponentInfo {
  /// Creates component information from an instance name and a type name.
  pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      type_name: type_name.into(),
    }
  }
}

impl fmt::Display for ComponentInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.name, self.type_name)
  }
}

/// An error carried along the data path.
///
/// Stream errors are cheap to clone: an input port hands the same error to
/// every pending pull and a component forwards it to every output.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StreamError {
  /// Human readable description.
  pub message: String,
  /// The component that raised the error, when known.
  pub component: Option<ComponentInfo>,
  /// When the error was raised.
  pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StreamError {
  /// Creates a new error with the given message and no origin.
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      component: None,
      timestamp: chrono::Utc::now(),
    }
  }

  /// Attaches the originating component.
  pub fn with_component(mut self, component: ComponentInfo) -> Self {
    self.component = Some(component);
    self
  }
}

impl PartialEq for StreamError {
  fn eq(&self, other: &Self) -> bool {
    self.message == other.message && self.component == other.component
  }
}

/// Direction of a port, used when reporting unknown ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
  /// An input port.
  Input,
  /// An output port.
  Output,
}

impl fmt::Display for PortDirection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PortDirection::Input => write!(f, "input"),
      PortDirection::Output => write!(f, "output"),
    }
  }
}

/// Errors raised while building or instantiating a graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
  /// A node refers to a component id missing from the store.
  #[error("Unknown component: {0}")]
  UnknownComponent(String),
  /// A subgraph node refers to a subgraph id missing from the graph.
  #[error("Unknown subgraph: {0}")]
  UnknownSubgraph(String),
  /// An edge, initial or external port refers to a missing node.
  #[error("Unknown node: {0}")]
  UnknownNode(String),
  /// A port reference names a port the node does not have.
  #[error("Node '{node}' has no {direction} port '{port}'")]
  UnknownPort {
    /// Node id.
    node: String,
    /// Port name.
    port: String,
    /// Whether an input or an output was expected.
    direction: PortDirection,
  },
  /// A node id was added twice.
  #[error("Duplicate node: {0}")]
  DuplicateNode(String),
  /// The serialized form of a graph could not be read or written.
  #[error("Graph serialization failed: {0}")]
  Serialization(String),
}

impl From<serde_json::Error> for GraphError {
  fn from(err: serde_json::Error) -> Self {
    GraphError::Serialization(err.to_string())
  }
}

/// Outcome of running a graph to completion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
  /// The graph could not be instantiated.
  #[error(transparent)]
  Graph(#[from] GraphError),
  /// A data-path error reached one of the graph's external outputs.
  #[error("graph terminated with error: {0}")]
  Stream(#[from] StreamError),
}
