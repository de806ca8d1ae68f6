use crate::model::message::QueryTemplate;
use std::collections::HashMap;

// -----------------------------------------------------------------------------------------------
//  Message template store
// -----------------------------------------------------------------------------------------------
//
// Per-query cache of the outgoing search message body, pre-built for each TTL
// actually used. `stamp_ttl` is cheap but not free (it clones the payload), so
// once the template has been rendered at a given TTL we keep the bytes around
// for the life of the query rather than rebuilding them on every dispatch to
// the same TTL.

#[derive(Debug, Default)]
pub struct MessageCache {
  // Keyed by `ttl - 1` per the spec; a plain map is just as simple and avoids
  // a fixed-size array sized to a TTL ceiling that lives in `DqConfig`.
  by_ttl: HashMap<u8, Vec<u8>>,
}

impl MessageCache {
  pub fn new() -> MessageCache {
    MessageCache::default()
  }

  /// Returns the cached wire bytes for `ttl`, building and caching them from
  /// `template` if this is the first request for that TTL.
  pub fn get_or_build(&mut self, template: &QueryTemplate, ttl: u8) -> &[u8] {
    self.by_ttl.entry(ttl).or_insert_with(|| template.stamp_ttl(ttl))
  }
}
