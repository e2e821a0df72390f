//! # Packet Listener Test Suite

use crate::error::StreamError;
use crate::graph::PortRef;
use crate::listener::{PacketListener, TracingPacketListener, WriterPacketListener};
use serde_json::json;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// A writer the test can read back.
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
// WriterPacketListener
// ============================================================================

#[test]
fn test_edge_lines_in_both_directions() {
  let buffer = SharedBuffer::default();
  let listener = WriterPacketListener::new(buffer.clone());
  let edge = listener.edge_listener_for(&PortRef::new("a", "out"), &PortRef::new("b", "in"), None);

  edge.upstream.request(2);
  edge.downstream.on_next(json!({ "k": 1 }));
  edge.downstream.on_next(json!("s"));
  edge.upstream.cancel();
  edge.downstream.on_complete();

  assert_eq!(
    buffer.lines(),
    vec![
      "EDGE b[in] -> a[out]: REQUEST 2",
      r#"EDGE a[out] -> b[in]: DATA {"k":1}"#,
      r#"EDGE a[out] -> b[in]: DATA "s""#,
      "EDGE b[in] -> a[out]: CANCEL",
      "EDGE a[out] -> b[in]: COMPLETE",
    ]
  );
}

#[test]
fn test_subgraph_scope_and_errors() {
  let buffer = SharedBuffer::default();
  let listener = WriterPacketListener::new(buffer.clone());
  let edge = listener.edge_listener_for(
    &PortRef::new("add", "out"),
    &PortRef::new("id", "in"),
    Some("sub"),
  );
  edge.downstream.on_error(StreamError::new("bad value"));
  listener.node_listener_for("add", Some("sub")).on_terminate();
  listener.node_listener_for("top", None).on_terminate();

  assert_eq!(
    buffer.lines(),
    vec![
      "EDGE <<sub>> add[out] -> id[in]: ERROR bad value",
      "NODE <<sub>> add: TERMINATED",
      "NODE top: TERMINATED",
    ]
  );
}

#[test]
fn test_initial_edges_name_the_value() {
  let buffer = SharedBuffer::default();
  let listener = WriterPacketListener::new(buffer.clone());
  let edge = listener.initial_listener_for(&json!(3), &PortRef::new("add", "in1"), None);
  edge.upstream.request(1);
  edge.downstream.on_next(json!(3));

  assert_eq!(
    buffer.lines(),
    vec![
      "EDGE add[in1] -> INITIAL(3): REQUEST 1",
      "EDGE INITIAL(3) -> add[in1]: DATA 3",
    ]
  );
}

#[test]
fn test_file_listener_flushes_each_line() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("packets.log");
  let listener = WriterPacketListener::create(&path).unwrap();
  listener.node_listener_for("n", None).on_terminate();

  let contents = std::fs::read_to_string(&path).unwrap();
  assert_eq!(contents, "NODE n: TERMINATED\n");
}

// ============================================================================
// TracingPacketListener
// ============================================================================

#[test]
fn test_tracing_listener_is_a_passive_observer() {
  let listener = TracingPacketListener::new();
  let edge = listener.edge_listener_for(&PortRef::new("a", "out"), &PortRef::new("b", "in"), None);
  edge.upstream.request(1);
  edge.downstream.on_next(json!(1));
  edge.downstream.on_complete();
  listener.node_listener_for("a", None).on_terminate();
}
