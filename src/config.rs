use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------
//  DqConfig
// -----------------------------------------------------------------------------------------------

/// Tunable constants for the Dynamic Query engine, grouped the way the teacher
/// groups per-component tunables (e.g. `CoordConfig`, `PaxosConfig`) and handed
/// to `EngineContext::init`. The persistent configuration store that actually
/// populates this (presumably by deserialising it from the host's config file)
/// is an external collaborator; the engine only defines the shape it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DqConfig {
  /// Hard deadline after which a query is terminated (or freed, if already
  /// lingering) unconditionally.
  pub max_lifetime_ms: u64,
  /// Duration a terminated query lingers, still accounting hits, before free.
  pub linger_ms: u64,
  /// Linger duration used instead when termination was user-initiated.
  pub linger_user_cancelled_ms: u64,
  /// Extra per-probe-fanout timeout added when arming the initial results event.
  pub probe_timeout_ms: u64,
  /// Extra delay per additional pending dispatch when arming the results event.
  pub per_pending_extra_ms: u64,
  /// Starting value of the adaptive per-iteration result timeout.
  pub base_result_timeout_ms: u64,
  /// Floor below which the adaptive result timeout is never decreased.
  pub min_result_timeout_ms: u64,
  /// Amount the result timeout is decreased by when a query is running dry.
  pub timeout_adjust_step_ms: u64,
  /// Floor under the RTT-derived guidance timeout.
  pub guidance_timeout_floor_ms: u64,
  /// Maximum number of in-flight (pending) dispatches before iteration stalls.
  pub max_pending: u32,
  /// Consecutive guidance timeouts tolerated before a leaf is marked unguided.
  pub max_guidance_timeouts: u32,
  /// Minimum UPs queried since the last guidance round before asking again.
  pub guidance_threshold_ups: u32,
  /// Minimum new results required before re-asking for guidance once the leaf
  /// is already routing hits back itself.
  pub min_new_results_for_guidance: u32,
  /// Default `max_results` target for leaf-originated queries.
  pub leaf_target_results: u32,
  /// Default `max_results` target for locally-originated queries.
  pub local_target_results: u32,
  /// Divisor applied to the URN-search variant of `fin_results`.
  pub urn_divisor: u32,
  /// Number of candidates dispatched during the initial probe.
  pub probe_fanout: u32,
  /// Horizon value at or above which a query is considered to have covered
  /// the practical reach of the overlay and is terminated.
  pub max_horizon: u64,
  /// Horizon threshold above which the adaptive result timeout may start
  /// decreasing.
  pub adjust_threshold: u64,
  /// Results-per-horizon numerator used to judge "running dry" (`10 * horizon / adjust_threshold`).
  pub low_result_mark: u64,
  /// Fraction (percent) used when deriving `fin_results` from `max_results`.
  pub kept_factor_percent: u32,
  /// Ceiling on the TTL ever used, regardless of query or neighbour settings.
  pub max_ttl: u8,
  /// Tie-break window (bytes) within which two candidates' queue depths are
  /// considered equal.
  pub queue_epsilon_bytes: u32,
  /// Per-hop horizon deperdition factor.
  pub fuzzy_factor: f64,
  /// Assumed fan-out of an ultrapeer towards its own leaves, used when
  /// estimating `to_reach_per_node`.
  pub assumed_ultra_fanout_per_leaf: u32,
  /// Upper bound on `up_sent` before a query is terminated outright.
  pub max_up_sent: u32,
}

impl Default for DqConfig {
  fn default() -> DqConfig {
    DqConfig {
      max_lifetime_ms: 600_000,
      linger_ms: 180_000,
      linger_user_cancelled_ms: 1,
      probe_timeout_ms: 1_500,
      per_pending_extra_ms: 1_200,
      base_result_timeout_ms: 3_700,
      min_result_timeout_ms: 1_500,
      timeout_adjust_step_ms: 100,
      guidance_timeout_floor_ms: 40_000,
      max_pending: 3,
      max_guidance_timeouts: 2,
      guidance_threshold_ups: 3,
      min_new_results_for_guidance: 20,
      leaf_target_results: 50,
      local_target_results: 150,
      urn_divisor: 25,
      probe_fanout: 3,
      max_horizon: 500_000,
      adjust_threshold: 3_000,
      low_result_mark: 10,
      kept_factor_percent: 5,
      max_ttl: 5,
      queue_epsilon_bytes: 2 * 1024,
      fuzzy_factor: 0.80,
      assumed_ultra_fanout_per_leaf: 3,
      max_up_sent: 20,
    }
  }
}
