// Gateway routing cache (spec 4.D.1): domain -> (tenant, node address),
// TTL-bound with opportunistic refresh on a stale hit rather than a
// blocking refresh, so one slow control-plane call never stalls a
// request that could be served with slightly-stale routing.

use crate::common::{Domain, TenantId};
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub tenant_id: TenantId,
    pub node_address: String,
}

struct CachedRoute {
    entry: RouteEntry,
    cached_at: Instant,
}

pub struct RoutingCache {
    ttl: Duration,
    entries: DashMap<Domain, CachedRoute>,
}

pub enum Lookup {
    Fresh(RouteEntry),
    Stale(RouteEntry),
    Miss,
}

impl RoutingCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: DashMap::new() }
    }

    pub fn lookup(&self, domain: &Domain) -> Lookup {
        match self.entries.get(domain) {
            Some(cached) if cached.cached_at.elapsed() < self.ttl => Lookup::Fresh(cached.entry.clone()),
            Some(cached) => Lookup::Stale(cached.entry.clone()),
            None => Lookup::Miss,
        }
    }

    pub fn insert(&self, domain: Domain, entry: RouteEntry) {
        self.entries.insert(domain, CachedRoute { entry, cached_at: Instant::now() });
    }

    pub fn invalidate(&self, domain: &Domain) {
        self.entries.remove(domain);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
