//! # I/O Components
//!
//! The boundary between a graph and the process it runs in.
//!
//! ## Ports
//!
//! - `io/Output`: **Input** `"in1"`, no outputs. Writes every value on its
//!   own line (strings raw, anything else as JSON) and asks for the next
//!   value only once the line has been written and flushed. A failed write
//!   terminates the component with the error.
//! - `io/Input`: no inputs, **Output** `"out"`. Emits each line read, as a
//!   string, and completes at end of input.
//!
//! Both default to the process's standard streams and accept any tokio
//! reader or writer instead.

use crate::component::{Behavior, ComponentContext, Generator, InputStream, OutputStream};
use crate::error::StreamError;
use crate::protocol::Value;
use futures::{FutureExt, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tokio_stream::wrappers::LinesStream;
use tracing::{trace, warn};

/// Text written for `value`: strings as they are, other values as JSON.
pub fn render_line(value: &Value) -> String {
  match value {
    Value::String(text) => format!("{}\n", text),
    other => format!("{}\n", other),
  }
}

// ============================================================================
// Output
// ============================================================================

/// Writes incoming values to a writer, one line each.
pub struct Output<W> {
  writer: Arc<Mutex<W>>,
  failure: Arc<OnceLock<String>>,
}

impl Output<Stdout> {
  /// Writes to standard output.
  pub fn stdout() -> Self {
    Self::new(tokio::io::stdout())
  }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Output<W> {
  /// Writes to `writer`.
  pub fn new(writer: W) -> Self {
    Self::shared(Arc::new(Mutex::new(writer)))
  }

  /// Writes to a writer the caller keeps a handle on.
  pub fn shared(writer: Arc<Mutex<W>>) -> Self {
    Self {
      writer,
      failure: Arc::new(OnceLock::new()),
    }
  }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Behavior for Output<W> {
  fn on_start(&mut self, ctx: &mut ComponentContext) {
    ctx.request(0, 1);
  }

  fn on_next(&mut self, ctx: &mut ComponentContext, idx: usize, value: Value) {
    let line = render_line(&value);
    let writer = Arc::clone(&self.writer);
    let name = ctx.name().to_string();
    let failure = Arc::clone(&self.failure);
    let job = async move {
      let mut writer = writer.lock().await;
      let written = match writer.write_all(line.as_bytes()).await {
        Ok(()) => writer.flush().await,
        Err(error) => Err(error),
      };
      if let Err(error) = written {
        warn!("{}: write failed: {}", name, error);
        let _ = failure.set(format!("write failed: {}", error));
      }
    };
    if !ctx.spawn_input_job(idx, job.boxed()) {
      trace!("{}: input closed, dropping {}", ctx.name(), value);
    }
  }

  fn on_request(&mut self, _ctx: &mut ComponentContext, _idx: usize, _n: u64) {}

  fn on_input_job_done(&mut self, ctx: &mut ComponentContext, idx: usize) {
    if let Some(message) = self.failure.get() {
      let error = ctx.stream_error(message.clone());
      ctx.terminate(Some(error));
    } else if !ctx.is_terminating() {
      ctx.request(idx, 1);
    }
  }
}

// ============================================================================
// Input
// ============================================================================

/// Generator emitting the lines of a reader.
pub struct Input<R> {
  reader: R,
}

impl Input<BufReader<Stdin>> {
  /// Reads standard input.
  pub fn stdin() -> Self {
    Self::new(BufReader::new(tokio::io::stdin()))
  }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> Input<R> {
  /// Reads lines from `reader`.
  pub fn new(reader: R) -> Self {
    Self { reader }
  }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> Generator for Input<R> {
  fn process(self: Box<Self>, _inputs: Vec<InputStream>) -> OutputStream {
    LinesStream::new(self.reader.lines())
      .map(|line| {
        line
          .map(Value::String)
          .map_err(|error| StreamError::new(format!("read failed: {}", error)))
      })
      .boxed()
  }
}
