use crate::candidate::Candidate;
use crate::message_cache::MessageCache;
use crate::model::common::{CalloutHandle, Gen, Muid, NodeId, QueryHandle, QueryHashVector, SearchHandle};
use crate::model::message::QueryTemplate;
use std::collections::HashSet;

// -----------------------------------------------------------------------------------------------
//  Query flags
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
  /// This query's originator honours the guidance protocol (or is assumed to
  /// until it times out twice with no reply).
  pub leaf_guided: bool,
  /// A guidance request is outstanding; the guidance timer is armed instead
  /// of the results-event timer.
  pub waiting_for_guidance: bool,
  /// At least one guidance reply has ever been received for this query.
  pub got_guidance: bool,
  /// Past termination; hits are still accounted but nothing is dispatched.
  pub lingering: bool,
  /// The originator (or the local user) asked this query to stop.
  pub user_cancelled: bool,
  /// The leaf is routing its own hits back to the engine rather than relying
  /// solely on periodic guidance polling (affects the guidance threshold).
  pub routing_hits: bool,
}

/// Why a query stopped actively dispatching. Logged, and folded into the
/// `completed_*` / `linger_*` statistics counters; never surfaced to the
/// caller as an error (§7: nothing in the core panics, and termination is not
/// itself a caller-visible failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
  EnoughResults,
  HorizonReached,
  NoCandidates,
  UserStop,
  /// The local node itself lost its ultrapeer role mid-query, leaving every
  /// active query with no one to report results up to.
  Orphaned,
  HardDeadline,
}

/// The two user-visible phases of a live query record; `waiting_for_guidance`
/// is tracked as a flag rather than a third phase because it is a sub-state of
/// `Active` that iterate always falls back out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Active,
  Lingering,
}

// -----------------------------------------------------------------------------------------------
//  Query
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct Query {
  pub handle: QueryHandle,
  pub generation: Gen,

  pub originator: NodeId,
  pub search_handle: Option<SearchHandle>,
  pub wire_muid: Muid,
  pub leaf_muid: Option<Muid>,

  pub template: QueryTemplate,
  pub hash_vector: QueryHashVector,

  pub queried: HashSet<NodeId>,

  pub initial_ttl: u8,
  pub horizon: u64,
  pub up_sent: u32,
  pub pending: u32,
  pub max_results: u32,
  pub fin_results: u32,
  pub results: u32,
  pub oob_results: u32,
  pub linger_results: u32,
  pub new_results: u32,
  pub kept_results: u32,
  pub up_sent_at_last_status: u32,
  pub stat_timeouts: u32,
  pub result_timeout_ms: u64,

  pub flags: QueryFlags,
  pub phase: Phase,

  pub expiration_callout: Option<CalloutHandle>,
  pub results_callout: Option<CalloutHandle>,
  pub guidance_callout: Option<CalloutHandle>,

  pub prev_candidates: Option<Vec<Candidate>>,
  pub message_cache: MessageCache,
}

impl Query {
  pub fn is_local(&self) -> bool {
    self.originator.is_local()
  }

  /// A free-hook / callback carrying `generation` is stale iff it doesn't
  /// match this record's current generation (the record may have been reused
  /// for a logically distinct query since the callback was scheduled).
  pub fn is_current(&self, generation: Gen) -> bool {
    self.generation == generation
  }
}

