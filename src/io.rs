use crate::model::common::{
  CalloutHandle, Gen, Muid, NodeId, QueryHandle, QueryHashVector, SearchHandle, SendMetaHandle,
  TimestampMs,
};

// -----------------------------------------------------------------------------------------------
//  Capability objects
// -----------------------------------------------------------------------------------------------
//
// Everything the engine needs from the rest of the host process is reached
// through this one trait, the way the teacher's handlers take a single
// `IO: CoreIOCtx` type parameter bundling rand/clock/network rather than a
// pile of individually-injected collaborators. An engine exercised in tests
// gets a stub implementation; a production host wires this up to its real
// neighbour table, message layer, callout queue, QRP module, alive-ping
// estimator, OOB proxy and local search store.

/// What the callout queue is being asked to remember for a scheduled event:
/// which query it belongs to (plus its generation, to detect staleness) and
/// which of the query's timers this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalloutKind {
  /// The hard deadline. Armed once, fires at most once.
  Expiration,
  /// The "decide what to do next" timer driving probe/iterate.
  Results,
  /// The guidance-reply timeout while `waiting_for_guidance` is set.
  Guidance,
}

/// Outcome reported by the message layer when a previously-enqueued message is
/// finally freed: either it made it onto the wire, or it was dropped (e.g. the
/// connection closed, or transmit flow control discarded it) before it could.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
  Sent,
  Dropped,
}

/// Typed counters the engine increments; the host decides how (or whether) to
/// expose them, e.g. as Prometheus gauges or simple in-memory tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatCounter {
  LeafDynQueries,
  LocalDynQueries,
  OobProxiedQueries,
  CompletedFull,
  CompletedPartial,
  CompletedZero,
  LingerExtra,
  LingerCompleted,
  LingerResults,
}

pub trait EngineIoCtx {
  // --- Clock ---
  fn now_ms(&self) -> TimestampMs;

  // --- Callout queue ---
  /// Schedules `kind` to fire for `(query, generation)` after `delay_ms`. The
  /// returned handle is opaque to the engine beyond cancel/reschedule; when the
  /// event comes due the host is responsible for calling back into
  /// `EngineContext::on_callout` with the same `(query, generation, kind)`.
  fn schedule(&mut self, delay_ms: u64, kind: CalloutKind, query: QueryHandle, generation: Gen) -> CalloutHandle;
  fn cancel(&mut self, handle: CalloutHandle);
  fn reschedule(&mut self, handle: CalloutHandle, delay_ms: u64);

  // --- Neighbour table ---
  fn connections(&self) -> Vec<NodeId>;
  fn is_ultrapeer(&self, node: NodeId) -> bool;
  fn is_writable(&self, node: NodeId) -> bool;
  fn in_tx_flow_control(&self, node: NodeId) -> bool;
  fn hops_flow(&self, node: NodeId) -> u32;
  fn received_handshake(&self, node: NodeId) -> bool;
  fn max_ttl(&self, node: NodeId) -> u8;
  fn degree(&self, node: NodeId) -> u32;
  fn supports_last_hop_qrp(&self, node: NodeId) -> bool;
  fn queue_depth_bytes(&self, node: NodeId) -> u32;
  fn is_firewalled(&self, node: NodeId) -> bool;
  /// Whether the local node is currently acting as an ultrapeer at all; losing
  /// this role mid-query is fatal to every active query (§4.7, "role lost").
  fn local_is_ultrapeer(&self) -> bool;

  // --- QRP module ---
  fn node_can_route(&self, node: NodeId, hashes: &QueryHashVector) -> bool;

  // --- Alive pings ---
  fn rtt_ms(&self, node: NodeId) -> (u64, u64);

  // --- Message layer ---
  /// Enqueues `bytes` to `target`, tagged with the send-bookkeeper's
  /// `send_meta` handle. The message layer is expected to call back into
  /// `EngineContext::on_message_freed(send_meta, outcome)` exactly once, from
  /// the engine thread, once the message is either transmitted or dropped.
  fn enqueue(&mut self, target: NodeId, bytes: Vec<u8>, send_meta: SendMetaHandle);
  /// Sends a guidance request to the originating leaf, carrying whichever MUID
  /// the leaf knows this search by.
  fn send_guidance_request(&mut self, leaf: NodeId, leaf_known_muid: Muid);

  // --- OOB proxy ---
  fn proxied_original_muid(&self, wire_muid: Muid) -> Option<Muid>;
  fn create_proxy(&mut self, leaf: NodeId) -> Muid;

  // --- Local search store ---
  fn kept_results(&self, handle: SearchHandle) -> u32;

  // --- Statistics ---
  fn incr_stat(&mut self, counter: StatCounter, by: u32);

  // --- Randomness, for locally-generated MUIDs ---
  fn next_rand_u64(&mut self) -> u64;
}
