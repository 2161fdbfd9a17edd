//! Single-upstream TCP proxy
//!
//! Accepts client connections on a local address and bridges each one to a
//! fixed upstream server, forwarding bytes in both directions until either
//! side closes or fails. Bytes are forwarded unmodified and in order within
//! each direction.

pub mod acceptor;
pub mod bridge;
pub mod config;
pub mod error;
pub mod pump;
pub mod teardown;
pub mod tracker;

pub use acceptor::Acceptor;
pub use bridge::{Bridge, BridgeSummary};
pub use config::{parse_ipv4, parse_port, ProxyConfig, MAX_BUFFER_SIZE, MAX_CHUNK};
pub use error::{ErrorKind, ProxyError};
pub use pump::{Direction, PumpEnd};
pub use teardown::{BridgeState, TeardownCoordinator};
pub use tracker::{BridgeGuard, BridgeTracker};
