// Per-tenant quota enforcement on the resident node (spec 4.C.5): storage
// is checked before writes and swept periodically; API usage is a rolling
// 24h window. Grounded on the teacher's multitenant::metering counters,
// restructured around dashmap for lock-free per-tenant updates.

use crate::common::{now_unix, TenantId};
use crate::error::{RdbError, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

struct ApiWindow {
    // (unix_secs, count) buckets, oldest first; trimmed to the window.
    buckets: VecDeque<(u64, u64)>,
}

impl ApiWindow {
    fn new() -> Self {
        Self { buckets: VecDeque::new() }
    }

    fn record(&mut self, now: u64, window_secs: u64) {
        if let Some(last) = self.buckets.back_mut() {
            if last.0 == now {
                last.1 += 1;
                self.trim(now, window_secs);
                return;
            }
        }
        self.buckets.push_back((now, 1));
        self.trim(now, window_secs);
    }

    fn trim(&mut self, now: u64, window_secs: u64) {
        while let Some(&(ts, _)) = self.buckets.front() {
            if now.saturating_sub(ts) > window_secs {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self, now: u64, window_secs: u64) -> u64 {
        self.buckets
            .iter()
            .filter(|(ts, _)| now.saturating_sub(*ts) <= window_secs)
            .map(|(_, c)| c)
            .sum()
    }
}

pub struct QuotaEnforcer {
    window_secs: u64,
    api_windows: DashMap<TenantId, Mutex<ApiWindow>>,
    storage_bytes: DashMap<TenantId, u64>,
}

impl QuotaEnforcer {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            api_windows: DashMap::new(),
            storage_bytes: DashMap::new(),
        }
    }

    /// Must be called before accepting a write; rejects with 507 if the
    /// write would push the tenant over its storage quota.
    pub fn check_storage(&self, tenant_id: TenantId, quota_bytes: u64, incoming_bytes: u64) -> Result<()> {
        let current = self.get_size(tenant_id);
        if current + incoming_bytes > quota_bytes {
            return Err(RdbError::StorageQuotaExceeded(format!(
                "tenant {tenant_id} would exceed storage quota ({current} + {incoming_bytes} > {quota_bytes})"
            )));
        }
        Ok(())
    }

    pub fn record_storage_delta(&self, tenant_id: TenantId, delta_bytes: i64) {
        let mut entry = self.storage_bytes.entry(tenant_id).or_insert(0);
        *entry = (*entry as i64 + delta_bytes).max(0) as u64;
    }

    pub fn set_storage_bytes(&self, tenant_id: TenantId, bytes: u64) {
        self.storage_bytes.insert(tenant_id, bytes);
    }

    pub fn get_size(&self, tenant_id: TenantId) -> u64 {
        self.storage_bytes.get(&tenant_id).map(|v| *v).unwrap_or(0)
    }

    /// Records one API request and returns the rolling count so far today.
    pub fn record_api_request(&self, tenant_id: TenantId) -> u64 {
        let now = now_unix();
        let window = self.api_windows.entry(tenant_id).or_insert_with(|| Mutex::new(ApiWindow::new()));
        let mut w = window.lock().unwrap();
        w.record(now, self.window_secs);
        w.count(now, self.window_secs)
    }

    pub fn check_api(&self, tenant_id: TenantId, quota_requests: u64) -> Result<()> {
        let count = self.get_count(tenant_id);
        if count >= quota_requests {
            return Err(RdbError::ApiQuotaExceeded(format!(
                "tenant {tenant_id} exceeded {quota_requests} requests in the rolling window"
            )));
        }
        Ok(())
    }

    pub fn get_count(&self, tenant_id: TenantId) -> u64 {
        let now = now_unix();
        self.api_windows
            .get(&tenant_id)
            .map(|w| w.lock().unwrap().count(now, self.window_secs))
            .unwrap_or(0)
    }

    /// Periodic sweep: drop API windows whose buckets have all aged out,
    /// so idle tenants don't leak memory indefinitely.
    pub fn sweep(&self) {
        let now = now_unix();
        self.api_windows.retain(|_, w| w.lock().unwrap().count(now, self.window_secs) > 0 || {
            let mut guard = w.lock().unwrap();
            guard.trim(now, self.window_secs);
            !guard.buckets.is_empty()
        });
    }

    /// Drop all tracked state for a tenant being unloaded from the cache.
    pub fn cleanup(&self, tenant_id: TenantId) {
        self.api_windows.remove(&tenant_id);
        self.storage_bytes.remove(&tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_check_rejects_over_quota() {
        let q = QuotaEnforcer::new(86_400);
        let t = TenantId::new();
        q.set_storage_bytes(t, 900);
        assert!(q.check_storage(t, 1000, 50).is_ok());
        assert!(q.check_storage(t, 1000, 200).is_err());
    }

    #[test]
    fn api_quota_counts_rolling_requests() {
        let q = QuotaEnforcer::new(86_400);
        let t = TenantId::new();
        for _ in 0..5 {
            q.record_api_request(t);
        }
        assert_eq!(q.get_count(t), 5);
        assert!(q.check_api(t, 10).is_ok());
        assert!(q.check_api(t, 5).is_err());
    }

    #[test]
    fn cleanup_clears_tenant_state() {
        let q = QuotaEnforcer::new(86_400);
        let t = TenantId::new();
        q.record_api_request(t);
        q.set_storage_bytes(t, 10);
        q.cleanup(t);
        assert_eq!(q.get_count(t), 0);
        assert_eq!(q.get_size(t), 0);
    }

    #[test]
    fn storage_delta_never_goes_negative() {
        let q = QuotaEnforcer::new(86_400);
        let t = TenantId::new();
        q.set_storage_bytes(t, 10);
        q.record_storage_delta(t, -100);
        assert_eq!(q.get_size(t), 0);
    }
}
