//! The Gateway (spec component D): the single externally reachable entry
//! point that resolves a request's tenant from its domain, forwards it to
//! the tenant's current node through a per-node circuit breaker, and
//! never talks to any tenant database directly.

pub mod circuit_breaker;
pub mod proxy;
pub mod routing;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use proxy::{error_status_and_retry_after, is_retryable_method, Gateway, GatewayTimeouts, TENANT_ID_HEADER};
pub use routing::{Lookup, RouteEntry, RoutingCache};
