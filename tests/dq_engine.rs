//! End-to-end scenarios driven through the public `EngineContext` API and the
//! deterministic `StubIo` harness, in the spirit of the teacher's
//! `bin/simtest` scenario scripts: build an engine, feed it external events
//! through the same entry points a real host would use, and assert on the
//! resulting query state.

use dq_engine::io::SendOutcome;
use dq_engine::model::common::{GUIDANCE_STOP, Muid, NodeId, QueryHashVector, SearchHandle};
use dq_engine::model::message::{HitStatusFlags, TTL_OFFSET};
use dq_engine::query::Phase;
use dq_engine::test_support::StubIo;
use dq_engine::{DqConfig, EngineContext, EngineIoCtx};

fn template_bytes() -> Vec<u8> {
  vec![0u8; TTL_OFFSET + 16]
}

/// Wires `log`'s facade macros up to a real subscriber for this binary, the
/// same way a host embedding the engine picks one; `is_test` routes output
/// through the test harness's own capture instead of stdout. Guarded by
/// `Once` since every scenario below calls this and `try_init` only succeeds
/// the first time.
static LOG_INIT: std::sync::Once = std::sync::Once::new();
fn init_logging() {
  LOG_INIT.call_once(|| {
    let _ = env_logger::builder().is_test(true).try_init();
  });
}

/// Advances the virtual clock by `advance_by` milliseconds and feeds every
/// callout that becomes due back into the engine, mirroring how a real host
/// drains its callout queue.
fn pump_due(engine: &mut EngineContext, io: &mut StubIo, advance_by: u64) {
  let due = io.advance_and_take_due(io.now_ms() + advance_by);
  for (query, generation, kind) in due {
    engine.on_callout(io, query, generation, kind);
  }
}

/// Marks every currently enqueued message as successfully sent, the way the
/// message layer would once the bytes actually reach the wire.
fn complete_all_sent(engine: &mut EngineContext, io: &mut StubIo) {
  for msg in io.drain_enqueued() {
    engine.on_message_freed(io, msg.send_meta, SendOutcome::Sent);
  }
}

#[test]
fn happy_path_guided_query_terminates_on_guidance_reaching_max_results() {
  init_logging();
  let mut engine = EngineContext::init(DqConfig::default());
  let mut io = StubIo::new();
  for _ in 0..10 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(1000);
  let leaf_muid = Muid([1; 16]);
  let handle = engine
    .launch_remote(&mut io, originator, leaf_muid, template_bytes(), QueryHashVector(vec![1]), 4, false, true, false)
    .unwrap();

  assert_eq!(io.drain_enqueued().len(), engine.config().probe_fanout as usize);

  let wire_muid = engine.query(handle).unwrap().wire_muid;
  let disposition = engine.on_hits(wire_muid, 30, HitStatusFlags::default());
  assert_eq!(disposition, dq_engine::model::message::HitDisposition::Forward);
  assert_eq!(engine.query(handle).unwrap().new_results, 30);

  // new_results (30) clears min_new_results_for_guidance (20 by default) with
  // routing_hits set, so the next results event enters wait-for-guidance
  // instead of iterating further.
  pump_due(&mut engine, &mut io, 45_000);
  assert!(engine.query(handle).unwrap().flags.waiting_for_guidance);

  engine.on_guidance(&mut io, wire_muid, originator, 50);

  let query = engine.query(handle).unwrap();
  assert_eq!(query.phase, Phase::Lingering);
  assert!(!query.flags.waiting_for_guidance);
  assert_eq!(query.kept_results, 50);
  assert!(query.up_sent < 10);
  assert!(query.horizon <= engine.config().max_horizon);
}

#[test]
fn rare_query_terminates_completed_zero_once_up_sent_cap_is_reached() {
  init_logging();
  let mut config = DqConfig::default();
  config.max_up_sent = 6;
  let mut engine = EngineContext::init(config);
  let mut io = StubIo::new();
  for _ in 0..20 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(1000);
  let handle = engine
    .launch_remote(&mut io, originator, Muid([2; 16]), template_bytes(), QueryHashVector(vec![1]), 4, false, true, false)
    .unwrap();

  let mut prev_timeout = engine.query(handle).unwrap().result_timeout_ms;
  for _ in 0..40 {
    if engine.query(handle).unwrap().phase == Phase::Lingering {
      break;
    }
    complete_all_sent(&mut engine, &mut io);
    pump_due(&mut engine, &mut io, 45_000);
    complete_all_sent(&mut engine, &mut io);

    let query = engine.query(handle).unwrap();
    assert!(query.result_timeout_ms <= prev_timeout);
    assert!(query.result_timeout_ms >= engine.config().min_result_timeout_ms);
    prev_timeout = query.result_timeout_ms;
  }

  let query = engine.query(handle).unwrap();
  assert_eq!(query.phase, Phase::Lingering);
  assert_eq!(query.results, 0);
  assert_eq!(*io.stats.get(&dq_engine::io::StatCounter::CompletedZero).unwrap_or(&0), 1);
}

#[test]
fn guidance_stop_cancels_immediately_and_lingering_hits_are_kept_separate() {
  init_logging();
  let mut engine = EngineContext::init(DqConfig::default());
  let mut io = StubIo::new();
  for _ in 0..5 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(7);
  let wire_muid = Muid([3; 16]);
  let handle = engine
    .launch_remote(&mut io, originator, wire_muid, template_bytes(), QueryHashVector(vec![1]), 4, false, true, false)
    .unwrap();

  engine.on_hits(wire_muid, 4, HitStatusFlags::default());
  engine.on_guidance(&mut io, wire_muid, originator, GUIDANCE_STOP);

  let query = engine.query(handle).unwrap();
  assert_eq!(query.phase, Phase::Lingering);
  assert!(query.flags.user_cancelled);
  assert_eq!(query.results, 4);

  engine.on_hits(wire_muid, 3, HitStatusFlags::default());
  let query = engine.query(handle).unwrap();
  assert_eq!(query.results, 4, "post-cancellation hits must not inflate `results`");
  assert_eq!(query.linger_results, 3);
}

#[test]
fn leaf_silent_to_guidance_twice_is_degraded_to_unguided() {
  init_logging();
  let mut config = DqConfig::default();
  config.guidance_threshold_ups = 3;
  config.max_guidance_timeouts = 2;
  let mut engine = EngineContext::init(config);
  let mut io = StubIo::new();
  for _ in 0..10 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(55);
  let handle = engine
    .launch_remote(&mut io, originator, Muid([4; 16]), template_bytes(), QueryHashVector(vec![1]), 4, false, false, false)
    .unwrap();

  // Probe dispatched probe_fanout (3) candidates; mark them all sent so
  // up_sent reaches the guidance_threshold_ups of 3 with routing_hits clear.
  complete_all_sent(&mut engine, &mut io);
  assert_eq!(engine.query(handle).unwrap().up_sent, 3);

  pump_due(&mut engine, &mut io, 45_000);
  assert!(engine.query(handle).unwrap().flags.waiting_for_guidance, "first results event should enter wait-for-guidance");

  pump_due(&mut engine, &mut io, 45_000);
  let query = engine.query(handle).unwrap();
  assert_eq!(query.stat_timeouts, 1);
  assert!(query.flags.leaf_guided, "one silent timeout alone must not degrade the query");

  pump_due(&mut engine, &mut io, 45_000);
  assert!(engine.query(handle).unwrap().flags.waiting_for_guidance, "second results event should re-enter wait-for-guidance");

  pump_due(&mut engine, &mut io, 45_000);
  let query = engine.query(handle).unwrap();
  assert_eq!(query.stat_timeouts, 2);
  assert!(!query.flags.leaf_guided, "two consecutive silent timeouts must degrade to unguided");
  assert!(!query.flags.waiting_for_guidance);
}

#[test]
fn dropped_dispatch_frees_its_target_and_re_arms_the_results_event() {
  init_logging();
  let mut engine = EngineContext::init(DqConfig::default());
  let mut io = StubIo::new();
  for _ in 0..8 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(9);
  let handle = engine
    .launch_remote(&mut io, originator, Muid([5; 16]), template_bytes(), QueryHashVector(vec![1]), 4, false, true, false)
    .unwrap();

  complete_all_sent(&mut engine, &mut io);
  pump_due(&mut engine, &mut io, 45_000);
  assert!(!engine.query(handle).unwrap().flags.waiting_for_guidance, "no new results yet, so iterate runs directly");

  let dispatched = io.drain_enqueued();
  assert_eq!(dispatched.len(), 1, "iterate should have dispatched exactly one fresh candidate");
  let msg = &dispatched[0];
  assert!(engine.query(handle).unwrap().queried.contains(&msg.target));

  engine.on_message_freed(&mut io, msg.send_meta, SendOutcome::Dropped);
  assert!(!engine.query(handle).unwrap().queried.contains(&msg.target), "a dropped dispatch frees its target immediately");
  assert_eq!(engine.query(handle).unwrap().pending, 0);

  pump_due(&mut engine, &mut io, 1);
  assert_eq!(engine.query(handle).unwrap().pending, 1, "the results event re-armed at 1ms should resume iteration");
}

#[test]
fn node_removal_frees_every_query_it_originated_without_lingering() {
  init_logging();
  let mut engine = EngineContext::init(DqConfig::default());
  let mut io = StubIo::new();
  for _ in 0..6 {
    io.add_node(6, 4, 0);
  }

  let originator = NodeId(42);
  let mut handles = Vec::new();
  for i in 0..3u8 {
    let handle = engine
      .launch_remote(&mut io, originator, Muid([10 + i; 16]), template_bytes(), QueryHashVector(vec![1]), 4, false, true, false)
      .unwrap();
    handles.push(handle);
  }
  assert_eq!(engine.active_count(), 3);

  let stale_sends = io.drain_enqueued();
  assert!(!stale_sends.is_empty());

  engine.on_node_removed(&mut io, originator);

  assert_eq!(engine.active_count(), 0);
  for handle in &handles {
    assert!(engine.query(*handle).is_none());
  }

  // A free hook for a message belonging to one of the now-freed queries must
  // be a silent no-op, not a panic or a resurrection of the record.
  engine.on_message_freed(&mut io, stale_sends[0].send_meta, SendOutcome::Sent);
  assert_eq!(engine.active_count(), 0);
}

#[test]
fn local_query_syncs_kept_results_from_the_search_store_and_terminates() {
  init_logging();
  let mut config = DqConfig::default();
  config.local_target_results = 20;
  let mut engine = EngineContext::init(config);
  let mut io = StubIo::new();
  for _ in 0..10 {
    io.add_node(6, 4, 0);
  }

  let search_handle = SearchHandle(77);
  let handle = engine.launch_local(&mut io, search_handle, template_bytes(), QueryHashVector(vec![1]), 4, false).unwrap();

  assert!(!engine.query(handle).unwrap().flags.leaf_guided);
  assert!(engine.query(handle).unwrap().flags.routing_hits);

  io.set_kept_results(search_handle, 20);
  complete_all_sent(&mut engine, &mut io);
  pump_due(&mut engine, &mut io, 45_000);

  let query = engine.query(handle).unwrap();
  assert_eq!(query.kept_results, 20);
  assert_eq!(query.phase, Phase::Lingering);
}

#[test]
fn rejects_a_template_too_short_to_carry_a_ttl_byte() {
  init_logging();
  let mut engine = EngineContext::init(DqConfig::default());
  let mut io = StubIo::new();
  io.add_node(6, 4, 0);

  let too_short = vec![0u8; TTL_OFFSET];
  let err = engine
    .launch_remote(&mut io, NodeId(1), Muid([9; 16]), too_short, QueryHashVector(vec![1]), 4, false, true, false)
    .unwrap_err();
  assert_eq!(err, dq_engine::DqError::TemplateTooShort { len: TTL_OFFSET, required: TTL_OFFSET + 1 });
  assert_eq!(engine.active_count(), 0, "a rejected launch must not leave a partial record behind");
}
