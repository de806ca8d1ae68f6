use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------------------------
//  Identities
// -----------------------------------------------------------------------------------------------

/// Identifies a node in the overlay (a neighbour ultrapeer or leaf). The sentinel
/// `NodeId::LOCAL` marks a query that originates at this node rather than at a
/// neighbouring leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
  pub const LOCAL: NodeId = NodeId(0);

  pub fn is_local(&self) -> bool {
    *self == NodeId::LOCAL
  }
}

/// 16-byte message identifier, unique per query issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Muid(pub [u8; 16]);

impl Muid {
  pub fn from_u64(lo: u64, hi: u64) -> Muid {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&lo.to_le_bytes());
    bytes[8..].copy_from_slice(&hi.to_le_bytes());
    Muid(bytes)
  }
}

/// Handle by which a caller refers to a local search, independent of any MUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchHandle(pub u64);

/// Monotonically increasing counter, unique for the process lifetime, distinguishing
/// logically distinct `Query` records even when a freed record's storage slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gen(pub u64);

/// Opaque handle a caller uses to refer to one in-flight DQ for its whole
/// probe -> iterate -> linger -> freed lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryHandle(pub u64);

/// Milliseconds on the engine's virtual clock. Not wall-clock; supplied by the
/// injected `Clock` capability so tests can drive it deterministically.
pub type TimestampMs = u64;

/// A compact fingerprint of a query's keywords/URN, consulted by QRP predicates.
/// The actual hashing scheme belongs to the QRP module (out of scope here); the
/// engine only ever moves this value around and hands it to `node_can_route`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHashVector(pub Vec<u32>);

/// Guidance value meaning "stop this query now", per the host's vendor message
/// framing.
pub const GUIDANCE_STOP: u16 = 0xFFFF;

/// Handle identifying one scheduled callout-queue event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalloutHandle(pub u64);

/// Handle identifying one outstanding send-bookkeeper record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SendMetaHandle(pub u64);
