use crate::model::message::{HitDisposition, HitStatusFlags, OobDisposition};
use crate::query::Query;

// -----------------------------------------------------------------------------------------------
//  Hit / OOB accountant
// -----------------------------------------------------------------------------------------------
//
// Pure bookkeeping over an already-resolved `Query`; index lookup by MUID
// happens one layer up in `EngineContext` (§4.6), since a missing query means
// "forward" / "drop" decisions that don't need a `Query` at all.

/// §4.7 `on_hits`. Firewall filtering only applies to direct (non-OOB) hits;
/// an OOB indication from the same pair of firewalled endpoints is still
/// claimable (§9, "firewall filtering asymmetry" — kept as specified).
pub fn on_hits(query: &mut Query, count: u32, status: HitStatusFlags) -> HitDisposition {
  if !status.oob
    && status.source_firewalled
    && status.local_firewalled
    && !status.supports_firewall_to_firewall
  {
    return HitDisposition::Drop;
  }

  if query.flags.lingering {
    query.linger_results = query.linger_results.saturating_add(count);
  } else {
    query.results = query.results.saturating_add(count);
    query.new_results = query.new_results.saturating_add(count);
  }

  if query.flags.user_cancelled {
    HitDisposition::Drop
  } else {
    HitDisposition::Forward
  }
}

/// §4.7 `on_oob_indication`. No firewall check (see module docs above).
pub fn on_oob_indication(query: &mut Query, count: u32) -> OobDisposition {
  if query.flags.user_cancelled {
    return OobDisposition::Drop;
  }
  query.oob_results = query.oob_results.saturating_add(count);
  OobDisposition::Claim
}

/// §4.7 `on_oob_claimed`.
pub fn on_oob_claimed(query: &mut Query, count: u32) {
  query.oob_results = query.oob_results.saturating_sub(count);
}

/// §4.7 `results_wanted`. Callers distinguish "no such query" from "zero
/// wanted" one layer up, via index lookup.
pub fn results_wanted(query: &Query, fin_results: u32) -> u32 {
  if query.flags.user_cancelled {
    return 0;
  }
  if query.kept_results < query.max_results {
    query.max_results - query.kept_results
  } else if query.flags.got_guidance && query.kept_results < fin_results {
    1
  } else {
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::message_cache::MessageCache;
  use crate::model::common::{Gen, Muid, NodeId, QueryHandle, QueryHashVector};
  use crate::model::message::QueryTemplate;
  use crate::query::{Phase, QueryFlags};
  use std::collections::HashSet;

  fn query() -> Query {
    let mut raw = vec![0u8; 23];
    raw[crate::model::message::TTL_OFFSET] = 1;
    Query {
      handle: QueryHandle(1),
      generation: Gen(1),
      originator: NodeId(5),
      search_handle: None,
      wire_muid: Muid([0; 16]),
      leaf_muid: None,
      template: QueryTemplate::new(Muid([0; 16]), raw).unwrap(),
      hash_vector: QueryHashVector(vec![1]),
      queried: HashSet::new(),
      initial_ttl: 4,
      horizon: 0,
      up_sent: 0,
      pending: 0,
      max_results: 50,
      fin_results: 52,
      results: 0,
      oob_results: 0,
      linger_results: 0,
      new_results: 0,
      kept_results: 0,
      up_sent_at_last_status: 0,
      stat_timeouts: 0,
      result_timeout_ms: 3_700,
      flags: QueryFlags::default(),
      phase: Phase::Active,
      expiration_callout: None,
      results_callout: None,
      guidance_callout: None,
      prev_candidates: None,
      message_cache: MessageCache::new(),
    }
  }

  #[test]
  fn firewalled_non_oob_hit_without_f2f_support_is_dropped_and_uncounted() {
    let mut q = query();
    let status = HitStatusFlags { oob: false, source_firewalled: true, local_firewalled: true, supports_firewall_to_firewall: false };
    let disposition = on_hits(&mut q, 3, status);
    assert_eq!(disposition, HitDisposition::Drop);
    assert_eq!(q.results, 0);
  }

  #[test]
  fn firewalled_oob_indication_is_still_claimed() {
    let mut q = query();
    let disposition = on_oob_indication(&mut q, 4);
    assert_eq!(disposition, OobDisposition::Claim);
    assert_eq!(q.oob_results, 4);
  }

  #[test]
  fn lingering_hits_go_to_linger_results_not_results() {
    let mut q = query();
    q.flags.lingering = true;
    let status = HitStatusFlags::default();
    on_hits(&mut q, 5, status);
    assert_eq!(q.linger_results, 5);
    assert_eq!(q.results, 0);
  }

  #[test]
  fn cancelled_query_drops_even_legitimate_hits_but_still_counts_them() {
    let mut q = query();
    q.flags.user_cancelled = true;
    let status = HitStatusFlags::default();
    let disposition = on_hits(&mut q, 2, status);
    assert_eq!(disposition, HitDisposition::Drop);
    assert_eq!(q.results, 2);
  }

  #[test]
  fn oob_claim_reverses_indication() {
    let mut q = query();
    on_oob_indication(&mut q, 10);
    on_oob_claimed(&mut q, 10);
    assert_eq!(q.oob_results, 0);
  }

  #[test]
  fn oob_claim_saturates_at_zero() {
    let mut q = query();
    on_oob_indication(&mut q, 3);
    on_oob_claimed(&mut q, 100);
    assert_eq!(q.oob_results, 0);
  }

  #[test]
  fn results_wanted_is_zero_once_cancelled() {
    let mut q = query();
    q.kept_results = 0;
    q.flags.user_cancelled = true;
    assert_eq!(results_wanted(&q, 52), 0);
  }

  #[test]
  fn results_wanted_is_remaining_gap_to_max() {
    let mut q = query();
    q.kept_results = 40;
    assert_eq!(results_wanted(&q, 52), 10);
  }

  #[test]
  fn results_wanted_is_token_interest_once_guided_and_past_max() {
    let mut q = query();
    q.kept_results = 50;
    q.flags.got_guidance = true;
    assert_eq!(results_wanted(&q, 52), 1);
  }

  #[test]
  fn results_wanted_is_zero_past_fin_results() {
    let mut q = query();
    q.kept_results = 52;
    q.flags.got_guidance = true;
    assert_eq!(results_wanted(&q, 52), 0);
  }
}
