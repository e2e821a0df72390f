//! # portflow
//!
//! A flow-based programming runtime: graphs of components connected port to
//! port, where values only move when the receiving side has asked for them.
//!
//! ## Key Features
//!
//! - **Demand-driven**: every edge speaks a Reactive-Streams style protocol
//!   (`request(n)`, `on_next`, `on_complete`, `on_error`, `cancel`), so a
//!   slow consumer paces everything upstream of it
//! - **Fan-in and fan-out**: an input merges any number of edges, an output
//!   broadcasts to all of its subscribers at the pace of the slowest
//! - **Four ways to write a component**: a raw [`Behavior`], a promise
//!   component producing one async value per unit of demand, a pure function
//!   of its inputs, or an async generator over input streams
//! - **Nested graphs**: a graph can use another graph as a node, and graphs
//!   round-trip through JSON
//! - **Observable**: a [`PacketListener`] sees every signal on every edge
//!
//! ## Quick Start
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
//! graph.add_node("twice", "operators/Multiply")?;
//! graph.set_initial(PortRef::new("add", "in1"), json!(3));
//! graph.set_initial(PortRef::new("add", "in2"), json!(4));
//! graph.set_initial(PortRef::new("twice", "in2"), json!(2));
//! graph.add_edge(PortRef::new("add", "out"), PortRef::new("twice", "in1"));
//! graph.add_external_out("result", PortRef::new("twice", "out"), false);
//!
//! let output = GraphRunner::new(component_store()).run_to_completion(&graph).await?;
//! assert_eq!(output.get("result"), Some(&[json!(14)][..]));
//! # Ok(())
//! # }
//! ```
//!
//! [`Behavior`]: component::Behavior
//! [`PacketListener`]: listener::PacketListener

#![warn(missing_docs)]

pub mod component;
pub mod error;
pub mod graph;
pub mod jobs;
pub mod listener;
pub mod logging;
pub mod mailbox;
pub mod nodes;
pub mod port;
pub mod protocol;
pub mod publisher;
pub mod runner;
pub mod store;

pub use component::{Behavior, Component, ComponentContext};
pub use error::{GraphError, RunError, StreamError};
pub use graph::{Graph, PortRef};
pub use protocol::{Publisher, Subscriber, Subscription, Value};
pub use runner::{GraphRunner, RunOutput};
pub use store::{ComponentSpec, ComponentStore};

#[cfg(test)]
mod test_util;

#[cfg(test)]
mod listener_test;
#[cfg(test)]
mod runner_test;
