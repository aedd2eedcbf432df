//! nrpd: peer-to-peer entropy exchange daemon.
//!
//! Every node answers small UDP requests with random bytes and with the
//! addresses of peers it has verified, and periodically asks one of its own
//! peers for the same, mixing what it receives into the local random device.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Expiring "seen recently" cache backing rate limits and bans.
pub mod cache;
/// Client loop: one exchange per tick.
pub mod client;
/// Time sources.
pub mod clock;
/// CLI argument parsing and daemon configuration.
pub mod config;
/// Entropy sources and sinks.
pub mod entropy;
/// Error types for daemon operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Peer populations and selection.
pub mod registry;
/// Client-side request building and response processing.
pub mod requester;
/// Server-side response building.
pub mod responder;
/// Server receive loop and shared server state.
pub mod server;

pub use error::NrpdError;
pub use registry::{PeerRegistry, ServerRecord};
pub use server::{run, run_with_shutdown, ServerState};
