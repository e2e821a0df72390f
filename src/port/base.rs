//! Lifecycle state and termination signalling shared by both port kinds.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a port.
///
/// A port leaves `Active` when its stream ends (completion, error or
/// cancellation), first waiting for its pending jobs, then for its data queue,
/// and only then delivers its terminal signal and becomes `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
  /// Normal operation.
  Active,
  /// Waiting for in-flight jobs.
  DrainingJobs,
  /// Waiting for queued values to be consumed.
  DrainingMessages,
  /// Terminal signal delivered; every further operation is ignored.
  Terminated,
}

impl fmt::Display for PortState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      PortState::Active => "active",
      PortState::DrainingJobs => "draining jobs",
      PortState::DrainingMessages => "draining messages",
      PortState::Terminated => "terminated",
    };
    f.write_str(s)
  }
}

/// One-shot, awaitable "this port has terminated" flag.
///
/// The flag is raised by the port's mailbox after the terminal signal has been
/// handed to every peer, so awaiting it also waits for that delivery.
#[derive(Clone)]
pub struct TerminationSignal {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for TerminationSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl TerminationSignal {
  /// Creates an unraised signal.
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx: Arc::new(tx) }
  }

  /// Raises the signal; idempotent.
  pub fn fire(&self) {
    self.tx.send_replace(true);
  }

  /// Whether the signal has been raised.
  pub fn is_fired(&self) -> bool {
    *self.tx.borrow()
  }

  /// Resolves once the signal has been raised.
  pub async fn wait(&self) {
    let mut rx = self.tx.subscribe();
    // The sender lives in `self`, so the channel cannot close while we wait.
    let _ = rx.wait_for(|fired| *fired).await;
  }
}

impl fmt::Debug for TerminationSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TerminationSignal")
      .field("fired", &self.is_fired())
      .finish()
  }
}
