//! # Packet Listeners
//!
//! Observation hooks for a running graph. The runner asks a
//! [`PacketListener`] for a [`NodeListener`] per node, told when the node
//! terminates, and an [`EdgeListener`] per edge and per initial value, which
//! sees every signal crossing the edge in both directions. Listeners are pure
//! observers: they get copies of the signals and cannot change them.
//!
//! Two line-oriented listeners are provided. Both render signals as
//!
//! ```text
//! EDGE <<sub>> add[out] -> pass[x]: DATA 7
//! EDGE <<sub>> pass[x] -> add[out]: REQUEST 1
//! NODE <<sub>> add: TERMINATED
//! ```
//!
//! where `<<sub>>` names the enclosing subgraph node and is omitted at the
//! top level. [`WriterPacketListener`] writes the lines to any
//! [`std::io::Write`] (a log file, typically); [`TracingPacketListener`]
//! emits them as `tracing` events under the `portflow::packets` target.

use crate::error::StreamError;
use crate::graph::{InPortRef, OutPortRef};
use crate::protocol::{Subscriber, Subscription, Value};
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Told when a node terminates.
pub trait NodeListener: Send + Sync {
  /// The node's component terminated.
  fn on_terminate(&self);
}

/// The two sides of an edge observer.
#[derive(Clone)]
pub struct EdgeListener {
  /// Sees values and terminal signals flowing downstream.
  pub downstream: Arc<dyn Subscriber>,
  /// Sees requests and cancellation flowing upstream.
  pub upstream: Arc<dyn Subscription>,
}

/// Factory of per-node and per-edge observers.
pub trait PacketListener: Send + Sync {
  /// Observer for node `node_id` of the graph `graph_name` (`None` at the
  /// top level).
  fn node_listener_for(&self, node_id: &str, graph_name: Option<&str>) -> Arc<dyn NodeListener>;

  /// Observer for the edge `from -> to`.
  fn edge_listener_for(
    &self,
    from: &OutPortRef,
    to: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener;

  /// Observer for the initial value injected into `port`.
  fn initial_listener_for(
    &self,
    value: &Value,
    port: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener;
}

// ============================================================================
// Line rendering
// ============================================================================

type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

fn scope(graph_name: Option<&str>) -> String {
  graph_name
    .map(|name| format!("<<{}>> ", name))
    .unwrap_or_default()
}

struct LineNode {
  prefix: String,
  sink: LineSink,
}

impl NodeListener for LineNode {
  fn on_terminate(&self) {
    (self.sink)(&format!("{}TERMINATED", self.prefix));
  }
}

struct LineEdge {
  forward: String,
  backward: String,
  sink: LineSink,
}

impl Subscriber for LineEdge {
  fn on_subscribe(&self, _subscription: Arc<dyn Subscription>) {}

  fn on_next(&self, value: Value) {
    (self.sink)(&format!("{}DATA {}", self.forward, value));
  }

  fn on_error(&self, error: StreamError) {
    (self.sink)(&format!("{}ERROR {}", self.forward, error));
  }

  fn on_complete(&self) {
    (self.sink)(&format!("{}COMPLETE", self.forward));
  }
}

impl Subscription for LineEdge {
  fn request(&self, n: u64) {
    (self.sink)(&format!("{}REQUEST {}", self.backward, n));
  }

  fn cancel(&self) {
    (self.sink)(&format!("{}CANCEL", self.backward));
  }
}

/// Shared rendering of both line listeners.
struct LineListener {
  sink: LineSink,
}

impl LineListener {
  fn node(&self, node_id: &str, graph_name: Option<&str>) -> Arc<dyn NodeListener> {
    Arc::new(LineNode {
      prefix: format!("NODE {}{}: ", scope(graph_name), node_id),
      sink: Arc::clone(&self.sink),
    })
  }

  fn edge(&self, source: String, target: String, graph_name: Option<&str>) -> EdgeListener {
    let scope = scope(graph_name);
    let edge = Arc::new(LineEdge {
      forward: format!("EDGE {}{} -> {}: ", scope, source, target),
      backward: format!("EDGE {}{} -> {}: ", scope, target, source),
      sink: Arc::clone(&self.sink),
    });
    EdgeListener {
      downstream: edge.clone(),
      upstream: edge,
    }
  }
}

// ============================================================================
// Writer listener
// ============================================================================

/// Writes one line per observed signal to a writer.
pub struct WriterPacketListener {
  lines: LineListener,
}

impl WriterPacketListener {
  /// Writes to `writer`. Write failures are logged and otherwise ignored.
  pub fn new(writer: impl Write + Send + 'static) -> Self {
    let writer = Mutex::new(writer);
    let sink: LineSink = Arc::new(move |line: &str| {
      let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
      if let Err(error) = writeln!(writer, "{}", line) {
        warn!("packet log write failed: {}", error);
      }
    });
    Self {
      lines: LineListener { sink },
    }
  }

  /// Writes to a newly created (or truncated) file at `path`, flushing
  /// after every line.
  pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
    let file = File::create(path.as_ref())?;
    debug!("writing packet log to {}", path.as_ref().display());
    Ok(Self::new(LineWriter::new(file)))
  }
}

impl PacketListener for WriterPacketListener {
  fn node_listener_for(&self, node_id: &str, graph_name: Option<&str>) -> Arc<dyn NodeListener> {
    self.lines.node(node_id, graph_name)
  }

  fn edge_listener_for(
    &self,
    from: &OutPortRef,
    to: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener {
    self.lines.edge(from.to_string(), to.to_string(), graph_name)
  }

  fn initial_listener_for(
    &self,
    value: &Value,
    port: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener {
    self
      .lines
      .edge(format!("INITIAL({})", value), port.to_string(), graph_name)
  }
}

// ============================================================================
// Tracing listener
// ============================================================================

/// Emits one `debug` event per observed signal under the
/// `portflow::packets` target.
pub struct TracingPacketListener {
  lines: LineListener,
}

impl TracingPacketListener {
  /// Creates the listener.
  pub fn new() -> Self {
    let sink: LineSink = Arc::new(|line: &str| debug!(target: "portflow::packets", "{}", line));
    Self {
      lines: LineListener { sink },
    }
  }
}

impl Default for TracingPacketListener {
  fn default() -> Self {
    Self::new()
  }
}

impl PacketListener for TracingPacketListener {
  fn node_listener_for(&self, node_id: &str, graph_name: Option<&str>) -> Arc<dyn NodeListener> {
    self.lines.node(node_id, graph_name)
  }

  fn edge_listener_for(
    &self,
    from: &OutPortRef,
    to: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener {
    self.lines.edge(from.to_string(), to.to_string(), graph_name)
  }

  fn initial_listener_for(
    &self,
    value: &Value,
    port: &InPortRef,
    graph_name: Option<&str>,
  ) -> EdgeListener {
    self
      .lines
      .edge(format!("INITIAL({})", value), port.to_string(), graph_name)
  }
}
