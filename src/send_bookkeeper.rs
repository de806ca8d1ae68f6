use crate::model::common::{Gen, NodeId, QueryHandle, SendMetaHandle};
use std::collections::HashMap;

// -----------------------------------------------------------------------------------------------
//  Send bookkeeper
// -----------------------------------------------------------------------------------------------
//
// Binds every dispatched message to a piece of metadata the free hook needs:
// which query it belongs to (and that query's generation, to guard against
// storage reuse), which node it targeted, and the degree/TTL used so the
// horizon estimate can be updated once the message is known to have gone out.

#[derive(Debug, Clone, Copy)]
pub struct SendMetadata {
  pub query: QueryHandle,
  pub generation: Gen,
  pub target: NodeId,
  pub degree: u32,
  pub ttl: u8,
}

#[derive(Debug, Default)]
pub struct SendBookkeeper {
  next_handle: u64,
  outstanding: HashMap<SendMetaHandle, SendMetadata>,
}

impl SendBookkeeper {
  pub fn new() -> SendBookkeeper {
    SendBookkeeper::default()
  }

  /// Allocates a new handle and records `metadata` under it. The caller
  /// attaches the returned handle to the outgoing message via the message
  /// layer's `enqueue`.
  pub fn record(&mut self, metadata: SendMetadata) -> SendMetaHandle {
    self.next_handle += 1;
    let handle = SendMetaHandle(self.next_handle);
    self.outstanding.insert(handle, metadata);
    handle
  }

  /// Consumes and returns the metadata for `handle`, if it is still
  /// outstanding (a handle is used exactly once, by `on_message_freed`, then
  /// discarded).
  pub fn take(&mut self, handle: SendMetaHandle) -> Option<SendMetadata> {
    self.outstanding.remove(&handle)
  }

  #[cfg(test)]
  pub fn outstanding_count(&self) -> usize {
    self.outstanding.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn handle_is_used_once() {
    let mut bookkeeper = SendBookkeeper::new();
    let handle = bookkeeper.record(SendMetadata {
      query: QueryHandle(1),
      generation: Gen(1),
      target: NodeId(2),
      degree: 6,
      ttl: 3,
    });
    assert_eq!(bookkeeper.outstanding_count(), 1);
    assert!(bookkeeper.take(handle).is_some());
    assert!(bookkeeper.take(handle).is_none());
    assert_eq!(bookkeeper.outstanding_count(), 0);
  }
}
