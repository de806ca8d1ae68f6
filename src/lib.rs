//! Dynamic Query engine for an ultrapeer in a structured P2P file-sharing
//! overlay: horizon estimation, QRP-aware candidate selection, adaptive
//! iteration, and the guidance round-trip with an originating leaf.
//!
//! The engine itself never touches a socket, a thread or a timer queue — it
//! is driven entirely through [`io::EngineIoCtx`], the single capability
//! trait a host binds to its own neighbour table, message layer and callout
//! queue (see `engine::EngineContext`).

pub mod accountant;
pub mod candidate;
pub mod config;
pub mod engine;
pub mod error;
pub mod horizon;
pub mod io;
pub mod message_cache;
pub mod model;
pub mod query;
pub mod send_bookkeeper;
pub mod test_support;

pub use config::DqConfig;
pub use engine::EngineContext;
pub use error::DqError;
pub use io::EngineIoCtx;
