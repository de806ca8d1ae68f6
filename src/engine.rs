use crate::accountant;
use crate::candidate::{self, Candidate};
use crate::config::DqConfig;
use crate::error::DqError;
use crate::horizon::HorizonTable;
use crate::io::{CalloutKind, EngineIoCtx, SendOutcome, StatCounter};
use crate::message_cache::MessageCache;
use crate::model::common::{Gen, Muid, NodeId, QueryHandle, QueryHashVector, SearchHandle, SendMetaHandle};
use crate::model::message::{HitDisposition, HitStatusFlags, OobDisposition, QueryTemplate};
use crate::query::{Phase, Query, QueryFlags, TerminationReason};
use crate::send_bookkeeper::{SendBookkeeper, SendMetadata};
use std::collections::{HashMap, HashSet};

// -----------------------------------------------------------------------------------------------
//  EngineContext
// -----------------------------------------------------------------------------------------------
//
// Owns every piece of process-wide state the DQ engine needs: the four
// indices of §4.6, the monotonic generation counter, the send bookkeeper and
// the precomputed horizon table. One instance per `init()`/`close()` pair;
// tests construct a fresh one rather than reaching for a process-wide global
// (Design Notes, "ambient per-process state").
pub struct EngineContext {
  config: DqConfig,
  horizon_table: HorizonTable,
  send_bookkeeper: SendBookkeeper,

  next_generation: u64,
  next_query_handle: u64,

  queries: HashMap<QueryHandle, Query>,
  by_node: HashMap<NodeId, HashSet<QueryHandle>>,
  by_wire_muid: HashMap<Muid, QueryHandle>,
  by_leaf_muid: HashMap<Muid, QueryHandle>,
}

impl EngineContext {
  pub fn init(config: DqConfig) -> EngineContext {
    let horizon_table = HorizonTable::new(config.fuzzy_factor);
    EngineContext {
      config,
      horizon_table,
      send_bookkeeper: SendBookkeeper::new(),
      next_generation: 0,
      next_query_handle: 0,
      queries: HashMap::new(),
      by_node: HashMap::new(),
      by_wire_muid: HashMap::new(),
      by_leaf_muid: HashMap::new(),
    }
  }

  pub fn config(&self) -> &DqConfig {
    &self.config
  }

  /// Cancels every outstanding timer and discards all query state. Intended
  /// for host shutdown; unlike `on_node_removed` this does not distinguish
  /// lingering from active records, it simply tears everything down.
  pub fn close(&mut self, io: &mut impl EngineIoCtx) {
    let handles: Vec<QueryHandle> = self.queries.keys().copied().collect();
    for handle in handles {
      if let Some(query) = self.queries.get(&handle) {
        if let Some(h) = query.expiration_callout {
          io.cancel(h);
        }
        if let Some(h) = query.results_callout {
          io.cancel(h);
        }
        if let Some(h) = query.guidance_callout {
          io.cancel(h);
        }
      }
    }
    self.queries.clear();
    self.by_node.clear();
    self.by_wire_muid.clear();
    self.by_leaf_muid.clear();
  }

  /// Inspects a query record directly. Not used by the production dispatch
  /// path (every handler goes through the indices instead); kept public for
  /// the simulation harness and integration scenarios, the same way the
  /// teacher exposes read-only accessors on its ES records for `bin/simtest`
  /// assertions rather than gating them behind `#[cfg(test)]`.
  pub fn query(&self, handle: QueryHandle) -> Option<&Query> {
    self.queries.get(&handle)
  }

  pub fn active_count(&self) -> usize {
    self.queries.len()
  }

  fn next_generation(&mut self) -> Gen {
    self.next_generation += 1;
    Gen(self.next_generation)
  }

  fn next_handle(&mut self) -> QueryHandle {
    self.next_query_handle += 1;
    QueryHandle(self.next_query_handle)
  }

  fn default_fin_results(&self, max_results: u32) -> u32 {
    let factor = (self.config.kept_factor_percent as f64 / 100.0).max(1e-9);
    ((max_results as f64) / factor).ceil() as u32
  }

  // -------------------------------------------------------------------------------------------
  //  Launch
  // -------------------------------------------------------------------------------------------

  /// Begins a DQ on behalf of a leaf. `leaf_known_muid` is the MUID the leaf
  /// used when it sent us this search; when `oob_proxied` is set we mint a
  /// fresh wire MUID via the OOB proxy so hits route back through us instead
  /// of directly to the (possibly firewalled) leaf, and `leaf_known_muid`
  /// becomes the leaf-facing MUID used for guidance instead.
  #[allow(clippy::too_many_arguments)]
  pub fn launch_remote(
    &mut self,
    io: &mut impl EngineIoCtx,
    originator: NodeId,
    leaf_known_muid: Muid,
    template_bytes: Vec<u8>,
    hash_vector: QueryHashVector,
    ttl: u8,
    oob_proxied: bool,
    routing_hits: bool,
    is_urn_query: bool,
  ) -> Result<QueryHandle, DqError> {
    let wire_muid = if oob_proxied { io.create_proxy(originator) } else { leaf_known_muid };
    let leaf_muid = if oob_proxied { Some(leaf_known_muid) } else { None };

    let max_results = if is_urn_query {
      (self.config.leaf_target_results / self.config.urn_divisor.max(1)).max(1)
    } else {
      self.config.leaf_target_results
    };
    let fin_results = self.default_fin_results(max_results);

    let flags = QueryFlags { leaf_guided: true, routing_hits, ..QueryFlags::default() };

    let handle = self.launch_common(
      io,
      originator,
      None,
      wire_muid,
      leaf_muid,
      template_bytes,
      hash_vector,
      ttl,
      max_results,
      fin_results,
      flags,
    )?;

    io.incr_stat(StatCounter::LeafDynQueries, 1);
    if oob_proxied {
      io.incr_stat(StatCounter::OobProxiedQueries, 1);
    }
    Ok(handle)
  }

  /// Begins a DQ for a search issued by the local node itself. Local queries
  /// are always `routing_hits` (there is no leaf round-trip to wait on) and
  /// never `leaf_guided`; §4.8 has the engine poll the local search store for
  /// `kept_results` directly instead.
  pub fn launch_local(
    &mut self,
    io: &mut impl EngineIoCtx,
    search_handle: SearchHandle,
    template_bytes: Vec<u8>,
    hash_vector: QueryHashVector,
    ttl: u8,
    is_urn_query: bool,
  ) -> Result<QueryHandle, DqError> {
    let wire_muid = Muid::from_u64(io.next_rand_u64(), io.next_rand_u64());

    let max_results = if is_urn_query {
      (self.config.local_target_results / self.config.urn_divisor.max(1)).max(1)
    } else {
      self.config.local_target_results
    };
    let fin_results = self.default_fin_results(max_results);

    let flags = QueryFlags { leaf_guided: false, routing_hits: true, ..QueryFlags::default() };

    let handle = self.launch_common(
      io,
      NodeId::LOCAL,
      Some(search_handle),
      wire_muid,
      None,
      template_bytes,
      hash_vector,
      ttl,
      max_results,
      fin_results,
      flags,
    )?;

    io.incr_stat(StatCounter::LocalDynQueries, 1);
    Ok(handle)
  }

  #[allow(clippy::too_many_arguments)]
  fn launch_common(
    &mut self,
    io: &mut impl EngineIoCtx,
    originator: NodeId,
    search_handle: Option<SearchHandle>,
    wire_muid: Muid,
    leaf_muid: Option<Muid>,
    template_bytes: Vec<u8>,
    hash_vector: QueryHashVector,
    ttl: u8,
    max_results: u32,
    fin_results: u32,
    flags: QueryFlags,
  ) -> Result<QueryHandle, DqError> {
    let template = QueryTemplate::new(wire_muid, template_bytes)?;
    let handle = self.next_handle();
    let generation = self.next_generation();

    let query = Query {
      handle,
      generation,
      originator,
      search_handle,
      wire_muid,
      leaf_muid,
      template,
      hash_vector,
      queried: HashSet::new(),
      initial_ttl: ttl.clamp(1, self.config.max_ttl),
      horizon: 0,
      up_sent: 0,
      pending: 0,
      max_results,
      fin_results,
      results: 0,
      oob_results: 0,
      linger_results: 0,
      new_results: 0,
      kept_results: 0,
      up_sent_at_last_status: 0,
      stat_timeouts: 0,
      result_timeout_ms: self.config.base_result_timeout_ms,
      flags,
      phase: Phase::Active,
      expiration_callout: None,
      results_callout: None,
      guidance_callout: None,
      prev_candidates: None,
      message_cache: MessageCache::new(),
    };

    self.queries.insert(handle, query);
    self.by_node.entry(originator).or_default().insert(handle);
    if self.by_wire_muid.contains_key(&wire_muid) {
      log::warn!("MUID collision on wire index for {:?}; newcomer query {:?} not indexed by it", wire_muid, handle);
    } else {
      self.by_wire_muid.insert(wire_muid, handle);
    }
    if let Some(leaf_muid) = leaf_muid {
      if self.by_leaf_muid.contains_key(&leaf_muid) {
        log::warn!("MUID collision on leaf index for {:?}; newcomer query {:?} not indexed by it", leaf_muid, handle);
      } else {
        self.by_leaf_muid.insert(leaf_muid, handle);
      }
    }

    let expiration = io.schedule(self.config.max_lifetime_ms, CalloutKind::Expiration, handle, generation);
    self.queries.get_mut(&handle).unwrap().expiration_callout = Some(expiration);

    self.probe(io, handle);
    Ok(handle)
  }

  // -------------------------------------------------------------------------------------------
  //  Probe
  // -------------------------------------------------------------------------------------------

  fn probe(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    let probe_fanout = self.config.probe_fanout;
    let probe_timeout_ms = self.config.probe_timeout_ms;
    let base_result_timeout_ms = self.config.base_result_timeout_ms;

    let hash_vector = self.queries.get(&handle).unwrap().hash_vector.clone();
    let mut candidates = candidate::probe_candidates(io, &hash_vector);
    candidate::sort_with_qrp_tiebreak(io, &mut candidates, &hash_vector, self.config.queue_epsilon_bytes);

    let query = self.queries.get(&handle).unwrap();
    let mut ttl = query.initial_ttl;
    let three_p = 3 * probe_fanout as usize;
    let six_p = 6 * probe_fanout as usize;
    if candidates.len() > three_p {
      ttl = ttl.saturating_sub(1).max(1);
    }
    if candidates.len() > six_p {
      ttl = ttl.saturating_sub(1).max(1);
    }

    let take = (probe_fanout as usize).min(candidates.len());
    for candidate in &candidates[..take] {
      self.dispatch(io, handle, candidate, ttl);
    }

    let delay = probe_fanout as u64 * (probe_timeout_ms + base_result_timeout_ms);
    self.arm_results_event(io, handle, delay);
  }

  // -------------------------------------------------------------------------------------------
  //  Dispatch
  // -------------------------------------------------------------------------------------------

  fn dispatch(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle, candidate: &Candidate, ttl: u8) {
    let query = self.queries.get_mut(&handle).unwrap();
    let bytes = query.message_cache.get_or_build(&query.template, ttl).to_vec();
    let send_meta = self.send_bookkeeper.record(SendMetadata {
      query: handle,
      generation: query.generation,
      target: candidate.node,
      degree: candidate.degree,
      ttl,
    });
    query.queried.insert(candidate.node);
    query.pending += 1;
    io.enqueue(candidate.node, bytes, send_meta);
  }

  // -------------------------------------------------------------------------------------------
  //  Results event: wait-for-guidance gate, then iterate
  // -------------------------------------------------------------------------------------------

  fn results_event_fired(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    let query = match self.queries.get(&handle) {
      Some(q) => q,
      None => return,
    };
    if self.should_enter_wait_for_guidance(query) {
      self.enter_wait_for_guidance(io, handle);
    } else {
      self.iterate(io, handle);
    }
  }

  /// §4.5 "Wait-for-guidance". The spec's own wording juxtaposes "routing-hits
  /// is clear" with "if routing-hits is set"; read literally that's
  /// self-contradictory, so (per DESIGN.md) we treat it as two alternative
  /// admission paths gated on `routing_hits`: an unguided-by-default leaf
  /// (`!routing_hits`) is asked after a handful of UPs, one already routing
  /// its own hits back (`routing_hits`) is left alone until a bigger batch of
  /// fresh results makes the round-trip worth it.
  fn should_enter_wait_for_guidance(&self, query: &Query) -> bool {
    if !query.flags.leaf_guided {
      return false;
    }
    if query.flags.routing_hits {
      query.new_results >= self.config.min_new_results_for_guidance
    } else {
      let ups_since_last_status = query.up_sent.saturating_sub(query.up_sent_at_last_status);
      ups_since_last_status >= self.config.guidance_threshold_ups
    }
  }

  fn enter_wait_for_guidance(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    let query = self.queries.get_mut(&handle).unwrap();
    query.flags.waiting_for_guidance = true;
    if let Some(h) = query.results_callout.take() {
      io.cancel(h);
    }

    let leaf_muid = query.leaf_muid.unwrap_or(query.wire_muid);
    let originator = query.originator;
    let (rtt_avg, rtt_last) = io.rtt_ms(originator);
    let delay = self.config.guidance_timeout_floor_ms.max((rtt_avg + rtt_last) / 2);

    io.send_guidance_request(originator, leaf_muid);
    let guidance_callout = io.schedule(delay, CalloutKind::Guidance, handle, self.queries[&handle].generation);
    self.queries.get_mut(&handle).unwrap().guidance_callout = Some(guidance_callout);
  }

  fn guidance_timeout_fired(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    let query = self.queries.get_mut(&handle).unwrap();
    query.guidance_callout = None;
    query.stat_timeouts += 1;
    let degrade = !query.flags.got_guidance && query.stat_timeouts >= self.config.max_guidance_timeouts;
    if degrade {
      log::warn!("leaf for query {:?} silent to guidance after {} timeouts; degrading to unguided", handle, query.stat_timeouts);
      query.flags.leaf_guided = false;
    }
    query.flags.waiting_for_guidance = false;
    self.iterate(io, handle);
  }

  // -------------------------------------------------------------------------------------------
  //  Iterate
  // -------------------------------------------------------------------------------------------

  fn iterate(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    {
      let query = self.queries.get_mut(&handle).unwrap();
      if query.is_local() {
        if let Some(sh) = query.search_handle {
          query.kept_results = io.kept_results(sh);
        }
      }
    }

    if let Some(reason) = self.check_termination(io, handle) {
      self.terminate(io, handle, reason);
      return;
    }

    let query = self.queries.get(&handle).unwrap();
    if query.pending >= self.config.max_pending {
      let delay = query.result_timeout_ms;
      self.arm_results_event(io, handle, delay);
      return;
    }

    let queried = query.queried.clone();
    let prev = query.prev_candidates.clone();
    let hash_vector = query.hash_vector.clone();
    let mut candidates = candidate::next_candidates(io, &queried, prev.as_deref());
    candidate::sort_with_qrp_tiebreak(io, &mut candidates, &hash_vector, self.config.queue_epsilon_bytes);

    let mut dispatched = false;
    let mut chosen_ttl = 1u8;
    let mut chosen_index = None;
    for (idx, candidate) in candidates.iter().enumerate() {
      let ttl = {
        let query = self.queries.get(&handle).unwrap();
        choose_ttl(query, candidate, &self.horizon_table, &self.config)
      };
      if ttl == 1 && candidate.supports_last_hop_qrp && !io.node_can_route(candidate.node, &hash_vector) {
        continue;
      }
      chosen_ttl = ttl;
      chosen_index = Some(idx);
      break;
    }

    if let Some(idx) = chosen_index {
      let candidate = candidates[idx].clone();
      self.dispatch(io, handle, &candidate, chosen_ttl);
      dispatched = true;
    }

    self.queries.get_mut(&handle).unwrap().prev_candidates = Some(candidates);

    if !dispatched {
      self.terminate(io, handle, TerminationReason::NoCandidates);
      return;
    }

    let query = self.queries.get_mut(&handle).unwrap();
    if query.horizon > self.config.adjust_threshold
      && (query.results as u64) < self.config.low_result_mark * query.horizon / self.config.adjust_threshold
    {
      query.result_timeout_ms =
        query.result_timeout_ms.saturating_sub(self.config.timeout_adjust_step_ms).max(self.config.min_result_timeout_ms);
    }

    let extra = (query.pending.saturating_sub(1)) as u64 * self.config.per_pending_extra_ms;
    let delay = query.result_timeout_ms + extra;
    self.arm_results_event(io, handle, delay);
  }

  fn check_termination(&self, io: &impl EngineIoCtx, handle: QueryHandle) -> Option<TerminationReason> {
    let query = self.queries.get(&handle).unwrap();
    if !io.local_is_ultrapeer() {
      return Some(TerminationReason::Orphaned);
    }
    if query.horizon >= self.config.max_horizon {
      return Some(TerminationReason::HorizonReached);
    }
    if query.kept_results >= query.max_results {
      return Some(TerminationReason::EnoughResults);
    }
    if query.results + query.oob_results >= query.fin_results {
      return Some(TerminationReason::EnoughResults);
    }
    if query.up_sent >= self.config.max_up_sent {
      return Some(TerminationReason::HorizonReached);
    }
    None
  }

  fn arm_results_event(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle, delay_ms: u64) {
    let query = self.queries.get_mut(&handle).unwrap();
    match query.results_callout {
      Some(existing) => io.reschedule(existing, delay_ms),
      None => {
        let callout = io.schedule(delay_ms, CalloutKind::Results, handle, query.generation);
        query.results_callout = Some(callout);
      }
    }
  }

  // -------------------------------------------------------------------------------------------
  //  Termination, lingering, free
  // -------------------------------------------------------------------------------------------

  fn terminate(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle, reason: TerminationReason) {
    log::debug!("query {:?} terminating: {:?}", handle, reason);
    let query = self.queries.get_mut(&handle).unwrap();

    if let Some(h) = query.results_callout.take() {
      io.cancel(h);
    }
    if let Some(h) = query.guidance_callout.take() {
      io.cancel(h);
    }

    let completed_stat = if query.results >= query.max_results {
      StatCounter::CompletedFull
    } else if query.results > 0 {
      StatCounter::CompletedPartial
    } else {
      StatCounter::CompletedZero
    };
    io.incr_stat(completed_stat, 1);

    query.flags.lingering = true;
    query.phase = Phase::Lingering;

    let linger_ms = if query.flags.user_cancelled { self.config.linger_user_cancelled_ms } else { self.config.linger_ms };

    if let Some(h) = query.expiration_callout.take() {
      io.cancel(h);
    }
    let expiration = io.schedule(linger_ms, CalloutKind::Expiration, handle, query.generation);
    query.expiration_callout = Some(expiration);
  }

  fn hard_deadline_fired(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle) {
    let phase = self.queries.get(&handle).unwrap().phase;
    match phase {
      Phase::Active => self.terminate(io, handle, TerminationReason::HardDeadline),
      Phase::Lingering => self.free(io, handle, true),
    }
  }

  /// Removes `handle` from every index and cancels any callouts still
  /// attached to it. `was_lingering` controls whether linger-completion
  /// statistics are emitted (node removal and local-search-closure free
  /// directly, per §5, without ever lingering).
  fn free(&mut self, io: &mut impl EngineIoCtx, handle: QueryHandle, was_lingering: bool) {
    let query = match self.queries.remove(&handle) {
      Some(q) => q,
      None => return,
    };

    if let Some(set) = self.by_node.get_mut(&query.originator) {
      set.remove(&handle);
      if set.is_empty() {
        self.by_node.remove(&query.originator);
      }
    }
    if self.by_wire_muid.get(&query.wire_muid) == Some(&handle) {
      self.by_wire_muid.remove(&query.wire_muid);
    }
    if let Some(leaf_muid) = query.leaf_muid {
      if self.by_leaf_muid.get(&leaf_muid) == Some(&handle) {
        self.by_leaf_muid.remove(&leaf_muid);
      }
    }

    if let Some(h) = query.expiration_callout {
      io.cancel(h);
    }
    if let Some(h) = query.results_callout {
      io.cancel(h);
    }
    if let Some(h) = query.guidance_callout {
      io.cancel(h);
    }

    if was_lingering {
      io.incr_stat(StatCounter::LingerCompleted, 1);
      if query.linger_results > 0 {
        io.incr_stat(StatCounter::LingerExtra, 1);
        io.incr_stat(StatCounter::LingerResults, query.linger_results);
      }
    }
  }

  // -------------------------------------------------------------------------------------------
  //  External entry points (§6)
  // -------------------------------------------------------------------------------------------

  pub fn on_callout(&mut self, io: &mut impl EngineIoCtx, query: QueryHandle, generation: Gen, kind: CalloutKind) {
    let current = match self.queries.get(&query) {
      Some(q) if q.is_current(generation) => q,
      _ => return, // stale callback: record gone or reused for a different generation.
    };
    let _ = current;
    match kind {
      CalloutKind::Expiration => self.hard_deadline_fired(io, query),
      CalloutKind::Results => self.results_event_fired(io, query),
      CalloutKind::Guidance => self.guidance_timeout_fired(io, query),
    }
  }

  pub fn on_message_freed(&mut self, io: &mut impl EngineIoCtx, handle: SendMetaHandle, outcome: SendOutcome) {
    let metadata = match self.send_bookkeeper.take(handle) {
      Some(m) => m,
      None => return,
    };
    let query = match self.queries.get_mut(&metadata.query) {
      Some(q) if q.is_current(metadata.generation) => q,
      _ => return, // stale: query gone or reused since this message was sent.
    };

    query.pending = query.pending.saturating_sub(1);
    match outcome {
      SendOutcome::Dropped => {
        query.queried.remove(&metadata.target);
        if query.pending == 0 {
          if let Some(results_callout) = query.results_callout {
            io.reschedule(results_callout, 1);
          }
        }
      }
      SendOutcome::Sent => {
        query.up_sent += 1;
        query.horizon = query.horizon.saturating_add(self.horizon_table.horizon(metadata.degree, metadata.ttl));
      }
    }
  }

  pub fn on_hits(&mut self, muid: Muid, count: u32, status: HitStatusFlags) -> HitDisposition {
    let handle = match self.by_wire_muid.get(&muid) {
      Some(h) => *h,
      None => return HitDisposition::Forward,
    };
    let query = self.queries.get_mut(&handle).unwrap();
    accountant::on_hits(query, count, status)
  }

  pub fn on_oob_indication(&mut self, muid: Muid, count: u32) -> OobDisposition {
    let handle = match self.by_wire_muid.get(&muid) {
      Some(h) => *h,
      None => return OobDisposition::Drop,
    };
    let query = self.queries.get_mut(&handle).unwrap();
    accountant::on_oob_indication(query, count)
  }

  pub fn on_oob_claimed(&mut self, muid: Muid, count: u32) {
    if let Some(&handle) = self.by_wire_muid.get(&muid) {
      let query = self.queries.get_mut(&handle).unwrap();
      accountant::on_oob_claimed(query, count);
    }
  }

  pub fn results_wanted(&self, muid: Muid) -> Option<u32> {
    let handle = self.by_wire_muid.get(&muid).or_else(|| self.by_leaf_muid.get(&muid))?;
    let query = self.queries.get(handle)?;
    Some(accountant::results_wanted(query, query.fin_results))
  }

  /// §4.8 `on_guidance`. Looks up by wire MUID first, then by leaf MUID (for
  /// OOB-proxied queries the leaf never learns the wire MUID); rejects
  /// silently if `source_node` isn't this query's originator.
  pub fn on_guidance(&mut self, io: &mut impl EngineIoCtx, muid: Muid, source_node: NodeId, kept: u16) {
    let handle = match self.by_wire_muid.get(&muid).or_else(|| self.by_leaf_muid.get(&muid)) {
      Some(&h) => h,
      None => return,
    };
    let query = self.queries.get_mut(&handle).unwrap();
    if query.originator != source_node {
      return;
    }

    if !query.flags.waiting_for_guidance {
      query.flags.leaf_guided = true;
    }

    if kept == crate::model::common::GUIDANCE_STOP {
      query.flags.user_cancelled = true;
      self.terminate(io, handle, TerminationReason::UserStop);
      return;
    }

    query.kept_results = kept as u32;
    query.flags.got_guidance = true;
    query.up_sent_at_last_status = query.up_sent;
    query.new_results = 0;

    if query.flags.waiting_for_guidance {
      query.flags.waiting_for_guidance = false;
      if let Some(h) = query.guidance_callout.take() {
        io.cancel(h);
      }
      self.iterate(io, handle);
    }
  }

  pub fn on_node_removed(&mut self, io: &mut impl EngineIoCtx, node: NodeId) {
    let handles: Vec<QueryHandle> = self.by_node.get(&node).map(|s| s.iter().copied().collect()).unwrap_or_default();
    for handle in handles {
      self.free(io, handle, false);
    }
  }

  pub fn on_search_closed(&mut self, io: &mut impl EngineIoCtx, search_handle: SearchHandle) {
    let found = self.queries.values().find(|q| q.search_handle == Some(search_handle)).map(|q| q.handle);
    if let Some(handle) = found {
      self.free(io, handle, false);
    }
  }
}

// -------------------------------------------------------------------------------------------
//  TTL selection (§4.5)
// -------------------------------------------------------------------------------------------

/// Picks the smallest TTL (bounded by `min(candidate.max_ttl, query.ttl)`)
/// whose horizon doesn't overshoot how many more hosts we still need to
/// reach, spread across our own connections. "connections" here is
/// `assumed_ultra_fanout_per_leaf`: the spec names that constant but never
/// otherwise uses it in a formula, and this is the one place a per-connection
/// divisor is called for (see DESIGN.md).
fn choose_ttl(query: &Query, candidate: &Candidate, horizon_table: &HorizonTable, config: &DqConfig) -> u8 {
  const EPS: f64 = 1e-9;
  let results_per_up = query.results as f64 / (query.horizon.max(1) as f64);
  let remaining = query.max_results.saturating_sub(query.kept_results) as f64;
  let to_reach = remaining / results_per_up.max(EPS);
  let connections = (config.assumed_ultra_fanout_per_leaf.max(1)) as f64;
  let to_reach_per_node = to_reach / connections;

  let ceiling = candidate.max_ttl.min(query.initial_ttl).max(1);
  for ttl in 1..=ceiling {
    if (horizon_table.horizon(candidate.degree, ttl) as f64) <= to_reach_per_node {
      return ttl;
    }
  }
  ceiling
}
