use crate::error::DqError;
use crate::model::common::Muid;
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------
//  Wire message shapes
// -----------------------------------------------------------------------------------------------
//
// These are inherited from the host overlay's message serialisation layer (out of
// scope for this engine) but the engine does need to know where the TTL byte sits
// so that `message_cache` can stamp a fresh TTL onto an otherwise-frozen payload.

/// Byte offset of the TTL field within a search message's header.
pub const TTL_OFFSET: usize = 17;

/// The immutable, parsed search payload a `Query` is launched with. Sufficient to
/// rebuild a wire message at any TTL without re-parsing or re-validating the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTemplate {
  pub muid: Muid,
  /// Fully-built header + payload bytes, TTL byte included but treated as a
  /// placeholder: every dispatch overwrites it via `stamp_ttl`.
  pub raw: Vec<u8>,
}

impl QueryTemplate {
  pub fn new(muid: Muid, raw: Vec<u8>) -> Result<QueryTemplate, DqError> {
    if raw.len() <= TTL_OFFSET {
      return Err(DqError::TemplateTooShort { len: raw.len(), required: TTL_OFFSET + 1 });
    }
    Ok(QueryTemplate { muid, raw })
  }

  /// Returns a copy of `raw` with the TTL byte overwritten. This is the only
  /// byte that may differ between two calls with different `ttl` values.
  pub fn stamp_ttl(&self, ttl: u8) -> Vec<u8> {
    let mut bytes = self.raw.clone();
    bytes[TTL_OFFSET] = ttl;
    bytes
  }
}

/// Status bits accompanying an incoming hit, as reported by the message layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitStatusFlags {
  pub oob: bool,
  pub source_firewalled: bool,
  pub local_firewalled: bool,
  pub supports_firewall_to_firewall: bool,
}

/// What the accountant decided to do with an incoming direct hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitDisposition {
  Forward,
  Drop,
}

/// What the accountant decided to do with an OOB hit indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobDisposition {
  Claim,
  Drop,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_message_shorter_than_ttl_offset() {
    let raw = vec![0u8; TTL_OFFSET];
    let err = QueryTemplate::new(Muid([0; 16]), raw).unwrap_err();
    assert_eq!(err, DqError::TemplateTooShort { len: TTL_OFFSET, required: TTL_OFFSET + 1 });
  }

  #[test]
  fn accepts_message_with_room_for_ttl_byte() {
    let raw = vec![0u8; TTL_OFFSET + 1];
    assert!(QueryTemplate::new(Muid([0; 16]), raw).is_ok());
  }
}
