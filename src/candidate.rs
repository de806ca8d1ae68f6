use crate::io::EngineIoCtx;
use crate::model::common::{NodeId, QueryHashVector};
use std::collections::HashSet;

// -----------------------------------------------------------------------------------------------
//  Candidate selector
// -----------------------------------------------------------------------------------------------

/// One candidate neighbour for a dispatch decision. `qrp_known` is lazily
/// computed: left `None` until the sort's tie-break actually needs it, then
/// cached here for the remainder of this vector's life (and inherited by the
/// next iteration's vector, so QRP isn't re-evaluated every round).
#[derive(Debug, Clone)]
pub struct Candidate {
  pub node: NodeId,
  pub queue_depth_bytes: u32,
  pub degree: u32,
  pub max_ttl: u8,
  pub supports_last_hop_qrp: bool,
  pub qrp_known: Option<bool>,
}

/// Base filter shared by both `probe_candidates` and `next_candidates`: a
/// connected, handshaken ultrapeer that is actually writable right now, not
/// presently choked by transmit flow control, with some inbound capacity
/// left.
fn passes_base_filter(io: &impl EngineIoCtx, node: NodeId) -> bool {
  io.is_ultrapeer(node)
    && io.received_handshake(node)
    && io.is_writable(node)
    && !io.in_tx_flow_control(node)
    && io.hops_flow(node) != 0
}

fn to_candidate(io: &impl EngineIoCtx, node: NodeId) -> Candidate {
  Candidate {
    node,
    queue_depth_bytes: io.queue_depth_bytes(node),
    degree: io.degree(node),
    max_ttl: io.max_ttl(node),
    supports_last_hop_qrp: io.supports_last_hop_qrp(node),
    qrp_known: None,
  }
}

/// Enumerates currently connected ultrapeers eligible for the initial probe:
/// the base filter, plus upfront QRP admission (unlike `next_candidates`, the
/// probe requires admission before a node is even considered). Caller-owned,
/// unsorted; the caller sorts and selects.
pub fn probe_candidates(io: &impl EngineIoCtx, hash_vector: &QueryHashVector) -> Vec<Candidate> {
  io.connections()
    .into_iter()
    .filter(|&node| passes_base_filter(io, node) && io.node_can_route(node, hash_vector))
    .map(|node| {
      let mut candidate = to_candidate(io, node);
      candidate.qrp_known = Some(true);
      candidate
    })
    .collect()
}

/// Enumerates candidates for a subsequent iteration: the base filter, minus
/// any node already in `queried`, without requiring QRP admission upfront.
/// `qrp_known` is inherited from `prev` when present, so nodes already
/// evaluated keep their cached verdict across iterations.
pub fn next_candidates(
  io: &impl EngineIoCtx,
  queried: &HashSet<NodeId>,
  prev: Option<&[Candidate]>,
) -> Vec<Candidate> {
  io.connections()
    .into_iter()
    .filter(|node| !queried.contains(node) && passes_base_filter(io, *node))
    .map(|node| {
      let mut candidate = to_candidate(io, node);
      if let Some(prev) = prev {
        if let Some(found) = prev.iter().find(|c| c.node == node) {
          candidate.qrp_known = found.qrp_known;
        }
      }
      candidate
    })
    .collect()
}

/// Sorts `candidates` ascending by queue depth; within `epsilon_bytes` of each
/// other, a QRP-admitting node is preferred over one that is not. QRP
/// evaluation only happens when a tie-break actually fires, and the result is
/// cached back onto the candidate.
pub fn sort_with_qrp_tiebreak(
  io: &impl EngineIoCtx,
  candidates: &mut Vec<Candidate>,
  hash_vector: &QueryHashVector,
  epsilon_bytes: u32,
) {
  // Insertion sort: candidate counts are small (bounded by connection count,
  // typically tens), and we need a comparator with side effects (lazily
  // filling in `qrp_known`), which plays awkwardly with `slice::sort_by`'s
  // requirement that the comparator stays pure between probe reorderings.
  for i in 1..candidates.len() {
    let mut j = i;
    while j > 0 && compare(io, candidates, j - 1, j, hash_vector, epsilon_bytes) {
      candidates.swap(j - 1, j);
      j -= 1;
    }
  }
}

/// Returns true if the candidate at `b` should sort strictly before the one at
/// `a` (i.e. `a` and `b` are out of order and must be swapped).
fn compare(
  io: &impl EngineIoCtx,
  candidates: &mut Vec<Candidate>,
  a: usize,
  b: usize,
  hash_vector: &QueryHashVector,
  epsilon_bytes: u32,
) -> bool {
  let depth_a = candidates[a].queue_depth_bytes;
  let depth_b = candidates[b].queue_depth_bytes;
  if depth_a.abs_diff(depth_b) > epsilon_bytes {
    return depth_b < depth_a;
  }
  // Within epsilon: the QRP-admitting candidate wins the tie; if both or
  // neither admit, fall back to depth order.
  let admits_a = qrp_admits(io, candidates, a, hash_vector);
  let admits_b = qrp_admits(io, candidates, b, hash_vector);
  if admits_a != admits_b {
    return admits_b && !admits_a;
  }
  depth_b < depth_a
}

fn qrp_admits(io: &impl EngineIoCtx, candidates: &mut Vec<Candidate>, idx: usize, hash_vector: &QueryHashVector) -> bool {
  if let Some(known) = candidates[idx].qrp_known {
    return known;
  }
  let admits = io.node_can_route(candidates[idx].node, hash_vector);
  candidates[idx].qrp_known = Some(admits);
  admits
}
