// Resource-manager event sink (spec 4.C.4 redesign note): hotspot,
// tier-upgrade, and quota-exceeded notifications go through one small
// injectable interface instead of a bag of function pointers, mirroring
// the teacher's pattern of a narrow trait object passed in at
// construction rather than closures threaded through every call site.

use crate::common::TenantId;
use crate::metadata::ResourceTier;
use tracing::{info, warn};

pub trait ResourceEventSink: Send + Sync {
    fn on_hotspot(&self, tenant_id: TenantId, score: f64);
    fn on_tier_upgrade(&self, tenant_id: TenantId, from: ResourceTier, to: ResourceTier);
    fn on_quota_exceeded(&self, tenant_id: TenantId, kind: &str);
}

/// Default sink used when nothing richer (paging, metrics export) is
/// wired in: every event becomes a structured log line.
pub struct TracingEventSink;

impl ResourceEventSink for TracingEventSink {
    fn on_hotspot(&self, tenant_id: TenantId, score: f64) {
        warn!(tenant = %tenant_id, score, "tenant became a hotspot");
    }

    fn on_tier_upgrade(&self, tenant_id: TenantId, from: ResourceTier, to: ResourceTier) {
        info!(tenant = %tenant_id, ?from, ?to, "tenant resource tier upgraded");
    }

    fn on_quota_exceeded(&self, tenant_id: TenantId, kind: &str) {
        warn!(tenant = %tenant_id, kind, "tenant exceeded quota");
    }
}
