// Resource tier classification and hotspot scoring (spec 4.C.4). Grounded
// on the teacher's clustering::load_balancer weighting heuristics, adapted
// from per-backend load scores to per-tenant resource scores.

use crate::metadata::ResourceTier;

/// Point-in-time resource usage sample for one resident tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceMetrics {
    pub db_size_bytes: u64,
    pub requests_today: u64,
    pub requests_7d_avg: f64,
    pub cpu_fraction: f64,
    pub memory_fraction: f64,
}

impl ResourceMetrics {
    /// Weighted hotspot score in [0.0, 1.0]: 25% DB size, 25% daily
    /// requests, 30% CPU, 20% memory, each normalized against the
    /// tenant's tier quota before weighting, and the total capped at 1.0.
    pub fn hotspot_score(&self, quota_bytes: u64, quota_requests: u64) -> f64 {
        let size_ratio = ratio(self.db_size_bytes, quota_bytes);
        let requests_ratio = ratio(self.requests_today, quota_requests);
        let raw = 0.25 * size_ratio + 0.25 * requests_ratio + 0.30 * self.cpu_fraction + 0.20 * self.memory_fraction;
        raw.min(1.0)
    }

    pub fn is_hotspot(&self, quota_bytes: u64, quota_requests: u64) -> bool {
        self.hotspot_score(quota_bytes, quota_requests) > 0.7
    }

    /// Today's traffic is more than 3x the trailing 7-day average.
    pub fn is_spiking(&self) -> bool {
        self.requests_7d_avg > 0.0 && self.requests_today as f64 > 3.0 * self.requests_7d_avg
    }

    /// Non-enterprise tenant using more than 2x its tier's CPU share or
    /// 2x its storage quota is a candidate for proactive eviction.
    pub fn is_evict_worthy(&self, tier: ResourceTier, quota_bytes: u64) -> bool {
        if tier == ResourceTier::Enterprise {
            return false;
        }
        let expected_cpu_share = 1.0 / tier.weight() as f64;
        self.cpu_fraction > 2.0 * expected_cpu_share || ratio(self.db_size_bytes, quota_bytes) > 2.0
    }
}

fn ratio(value: u64, quota: u64) -> f64 {
    if quota == 0 {
        return 0.0;
    }
    value as f64 / quota as f64
}

/// Classify a tenant's resource tier from its measured database size and
/// request volume (spec 4.C.4 tier table). Tier is the higher of the two
/// independent classifications, since either axis alone can justify a
/// promotion.
pub fn classify(db_size_bytes: u64, requests_per_day: u64) -> ResourceTier {
    classify_by_size(db_size_bytes).max(classify_by_requests(requests_per_day))
}

fn classify_by_size(db_size_bytes: u64) -> ResourceTier {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;
    match db_size_bytes {
        b if b <= 10 * MB => ResourceTier::Micro,
        b if b <= 100 * MB => ResourceTier::Small,
        b if b <= 1 * GB => ResourceTier::Medium,
        b if b <= 5 * GB => ResourceTier::Large,
        _ => ResourceTier::Enterprise,
    }
}

fn classify_by_requests(requests_per_day: u64) -> ResourceTier {
    match requests_per_day {
        r if r <= 1_000 => ResourceTier::Micro,
        r if r <= 10_000 => ResourceTier::Small,
        r if r <= 100_000 => ResourceTier::Medium,
        r if r <= 1_000_000 => ResourceTier::Large,
        _ => ResourceTier::Enterprise,
    }
}
