use std::fmt;

// -----------------------------------------------------------------------------------------------
//  DqError
// -----------------------------------------------------------------------------------------------
//
// Covers the engine's genuine boundary failures — malformed input handed in
// from outside the crate. Internal *decisions* (no candidates, role lost,
// stale callback, MUID collision) are never represented here: per the core's
// error-handling design, those are typed outcomes or a logged degrade, not a
// caller-visible `Err` (see `query::TerminationReason`, `io::SendOutcome`).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DqError {
  /// A caller supplied a search message shorter than its own declared TTL
  /// offset, so a fresh TTL byte can never be stamped onto it.
  TemplateTooShort { len: usize, required: usize },
}

impl fmt::Display for DqError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DqError::TemplateTooShort { len, required } => {
        write!(f, "search message of {len} bytes is shorter than its own TTL offset ({required})")
      }
    }
  }
}

impl std::error::Error for DqError {}
