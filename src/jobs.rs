//! # Job Store
//!
//! Bookkeeping for asynchronous jobs scheduled through a port.
//!
//! Jobs are numbered in registration order. A job may finish at any time, but
//! its result is only released once every earlier job has finished too, so a
//! port applies results in the order the work was requested. A port counts as
//! drained once no job is pending; a closed store refuses new jobs.

use std::collections::BTreeMap;

/// Identifier of a registered job.
pub type JobId = u64;

/// Ordered registry of in-flight jobs producing results of type `R`.
#[derive(Debug)]
pub struct JobStore<R> {
  next_id: JobId,
  pending: BTreeMap<JobId, Option<R>>,
  closed: bool,
}

impl<R> Default for JobStore<R> {
  fn default() -> Self {
    Self::new()
  }
}

impl<R> JobStore<R> {
  /// Creates an empty, open store.
  pub fn new() -> Self {
    Self {
      next_id: 0,
      pending: BTreeMap::new(),
      closed: false,
    }
  }

  /// Registers a new job, or returns `None` once the store is closed.
  pub fn add(&mut self) -> Option<JobId> {
    if self.closed {
      return None;
    }
    let id = self.next_id;
    self.next_id += 1;
    self.pending.insert(id, None);
    Some(id)
  }

  /// Records the result of job `id` and returns every result that is now
  /// ready, in registration order.
  ///
  /// Unknown ids (already released, or never registered) are ignored.
  pub fn complete(&mut self, id: JobId, result: R) -> Vec<R> {
    match self.pending.get_mut(&id) {
      Some(slot @ None) => *slot = Some(result),
      _ => return Vec::new(),
    }
    let mut ready = Vec::new();
    while let Some(mut entry) = self.pending.first_entry() {
      match entry.get_mut().take() {
        Some(result) => {
          entry.remove();
          ready.push(result);
        }
        None => break,
      }
    }
    ready
  }

  /// Jobs registered but not yet released.
  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  /// Whether no job is pending.
  pub fn is_drained(&self) -> bool {
    self.pending.is_empty()
  }

  /// Refuses every later [`add`](Self::add).
  pub fn close(&mut self) {
    self.closed = true;
  }

  /// Whether the store refuses new jobs.
  pub fn is_closed(&self) -> bool {
    self.closed
  }
}
