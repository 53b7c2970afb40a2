//! 出站对等体层：选取策略、租约与熔断。

pub mod breaker;
pub mod pool;

pub use breaker::{BreakerPhase, BreakerSnapshot, CircuitBreaker};
pub use pool::{Peer, PeerAvailability, PeerLease, PeerSet, PeerSnapshot, SelectionStrategy};
