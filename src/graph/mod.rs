//! # Graphs
//!
//! The data model of a network and its serialized form.
//!
//! ```rust
//! use portflow::graph::{Graph, PortRef};
//! use serde_json::json;
//!
//! let mut graph = Graph::new();
//! graph.add_node("add", "operators/Add").unwrap();
//! graph.set_initial(PortRef::new("add", "in1"), json!(3));
//! graph.set_initial(PortRef::new("add", "in2"), json!(4));
//! graph.add_external_out("sum", PortRef::new("add", "out"), false);
//!
//! let copy = Graph::from_json(&graph.to_json().unwrap()).unwrap();
//! assert_eq!(copy, graph);
//! ```

#[allow(clippy::module_inception)]
mod graph;
mod serialization;

pub use graph::{Edge, ExternalPort, Graph, InPortRef, Node, OutPortRef, PortRef, VOID_NODE};
pub use serialization::pairs;
