// Tenant Node Runtime (spec component C): the coordinating type that ties
// the weighted cache, per-tenant instance state machines, quota
// enforcement, WAL shipping and archival together, and reports heartbeats
// back to the control plane. Grounded on the teacher's
// clustering::node.rs node-agent loop shape.

use super::cache::WeightedLruCache;
use super::events::{ResourceEventSink, TracingEventSink};
use super::instance::TenantInstance;
use super::quota::QuotaEnforcer;
use super::tier::{self, ResourceMetrics};
use super::wal::{FinalSyncReason, WalShippingState};
use crate::blob::BlobStore;
use crate::common::{now_unix, NodeId, TenantId};
use crate::config::CacheConfig;
use crate::error::{RdbError, Result};
use crate::host::TenantHost;
use crate::metadata::{MetadataStore, NodeStatus, ReadConsistency, ResourceTier, StorageTier, Tenant, TenantStatus};
use std::sync::Arc;
use tracing::{info, warn};

/// What a tenant's resource tier and hotspot status looked like the last
/// time it was observed, so transitions (not just levels) can be reported
/// to the event sink.
#[derive(Debug, Clone, Copy)]
struct ObservedResourceState {
    tier: ResourceTier,
    is_hotspot: bool,
}

pub struct TenantNodeRuntime {
    node_id: NodeId,
    store: Arc<MetadataStore>,
    blob: Arc<dyn BlobStore>,
    wal: Arc<WalShippingState>,
    quota: Arc<QuotaEnforcer>,
    cache: WeightedLruCache<Arc<TenantInstance>>,
    instances_by_id: dashmap::DashMap<TenantId, Arc<TenantInstance>>,
    host_factory: Box<dyn Fn() -> Arc<dyn TenantHost> + Send + Sync>,
    events: Arc<dyn ResourceEventSink>,
    observed: dashmap::DashMap<TenantId, ObservedResourceState>,
}

impl TenantNodeRuntime {
    pub fn new(
        node_id: NodeId,
        store: Arc<MetadataStore>,
        blob: Arc<dyn BlobStore>,
        wal: Arc<WalShippingState>,
        quota: Arc<QuotaEnforcer>,
        cache_config: CacheConfig,
        host_factory: Box<dyn Fn() -> Arc<dyn TenantHost> + Send + Sync>,
    ) -> Self {
        Self::with_event_sink(node_id, store, blob, wal, quota, cache_config, host_factory, Arc::new(TracingEventSink))
    }

    pub fn with_event_sink(
        node_id: NodeId,
        store: Arc<MetadataStore>,
        blob: Arc<dyn BlobStore>,
        wal: Arc<WalShippingState>,
        quota: Arc<QuotaEnforcer>,
        cache_config: CacheConfig,
        host_factory: Box<dyn Fn() -> Arc<dyn TenantHost> + Send + Sync>,
        events: Arc<dyn ResourceEventSink>,
    ) -> Self {
        Self {
            node_id,
            store,
            blob,
            wal,
            quota,
            cache: WeightedLruCache::new(cache_config.capacity_slots),
            instances_by_id: dashmap::DashMap::new(),
            host_factory,
            events,
            observed: dashmap::DashMap::new(),
        }
    }

    pub fn quota(&self) -> &Arc<QuotaEnforcer> {
        &self.quota
    }

    pub fn tenant_quotas(&self, tenant_id: TenantId) -> Result<crate::metadata::TenantQuotas> {
        self.store.get_tenant(tenant_id, ReadConsistency::Stale).map(|t| t.quotas)
    }

    fn instance_for(&self, tenant_id: TenantId) -> Arc<TenantInstance> {
        self.instances_by_id
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(TenantInstance::new(tenant_id)))
            .clone()
    }

    /// Samples this tenant's measured usage from the quota enforcer (the
    /// only place the runtime tracks real bytes-on-disk and request
    /// volume), classifies its resource tier from that sample rather than
    /// its static quota allotment, and reports hotspot/tier-upgrade
    /// transitions through the event sink.
    fn observe_resources(&self, tenant: &Tenant) -> (ResourceMetrics, ResourceTier) {
        let metrics = ResourceMetrics {
            db_size_bytes: self.quota.get_size(tenant.tenant_id),
            requests_today: self.quota.get_count(tenant.tenant_id),
            requests_7d_avg: 0.0,
            cpu_fraction: 0.0,
            memory_fraction: 0.0,
        };
        let tier = tier::classify(metrics.db_size_bytes, metrics.requests_today);
        let is_hotspot = metrics.is_hotspot(tenant.quotas.storage_bytes, tenant.quotas.daily_requests);

        let previous = self.observed.insert(tenant.tenant_id, ObservedResourceState { tier, is_hotspot });
        match previous {
            Some(prev) if prev.tier != tier => self.events.on_tier_upgrade(tenant.tenant_id, prev.tier, tier),
            _ => {}
        }
        if is_hotspot && !previous.map(|p| p.is_hotspot).unwrap_or(false) {
            self.events.on_hotspot(tenant.tenant_id, metrics.hotspot_score(tenant.quotas.storage_bytes, tenant.quotas.daily_requests));
        }

        (metrics, tier)
    }

    /// `getOrLoad` (spec 4.C.1): resolve the tenant's metadata, enforce
    /// suspension/quota, evict by weight if the cache is full, restore
    /// from blob storage if this node has never seen the tenant, bootstrap
    /// the host, and register it as resident.
    pub async fn get_or_load(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantHost>> {
        let tenant = self.store.get_tenant(tenant_id, ReadConsistency::Linearizable)?;
        if tenant.status == crate::metadata::TenantStatus::Suspended {
            return Err(RdbError::PermissionDenied(format!("tenant {tenant_id} is suspended")));
        }

        let instance = self.instance_for(tenant_id);

        if self.cache.touch(tenant_id).is_some() {
            if let Some(host) = instance.current_host().await {
                instance.touch();
                return Ok(host);
            }
        }

        let (_metrics, resource_tier) = self.observe_resources(&tenant);
        let weight = resource_tier.weight();

        let victims = self.cache.eviction_candidates(weight);
        for victim_id in victims {
            self.unload(victim_id, FinalSyncReason::IdleEviction).await?;
        }

        // A tenant archived below Hot has no data on this node and must be
        // restored from blob storage before it can serve requests. Only
        // one concurrent loader per tenant performs the fetch; the rest
        // see the in-flight job and are told to retry shortly.
        let needs_restore = tenant.storage_tier != StorageTier::Hot;
        if needs_restore && self.wal.restore_jobs().try_start(tenant_id).is_none() {
            return Err(RdbError::RestoreInProgress(tenant_id.to_string()));
        }

        let store = self.store.clone();
        let blob = self.blob.clone();
        let host_factory_result = (self.host_factory)();
        let prefix = tenant.storage_prefix.clone();
        let data_dir = std::path::PathBuf::from(format!("./data/{prefix}"));

        let load_result = instance
            .ensure_loaded(move || {
                let data_dir = data_dir.clone();
                async move {
                    let fetched = restore_if_absent(blob.as_ref(), &prefix, &data_dir).await?;
                    if !fetched {
                        // Either the data was already local, or blob storage has
                        // never seen this tenant (first load anywhere).
                        info!(tenant = %tenant_id, error = %RdbError::NewDatabase, "proceeding without a remote snapshot");
                    }
                    host_factory_result.bootstrap(&data_dir).await?;
                    let _ = store;
                    Ok(host_factory_result)
                }
            })
            .await;

        if needs_restore {
            match &load_result {
                Ok(_) => self.wal.restore_jobs().complete(tenant_id),
                Err(e) => self.wal.restore_jobs().fail(tenant_id, e.to_string()),
            }
        }

        let host = load_result.map_err(|e| RdbError::Internal(format!("failed to load tenant {tenant_id}: {e}")))?;

        self.cache
            .admit(tenant_id, instance.clone(), weight)
            .map_err(|_| RdbError::Internal(format!("cache admission failed for tenant {tenant_id}")))?;

        // Step the storage tier forward one band at a time: Cold never
        // jumps straight to Hot, it passes through Warm first.
        if tenant.storage_tier == StorageTier::Cold {
            let _ = self.store.update_storage_tier(tenant_id, StorageTier::Warm);
        }
        if needs_restore {
            let _ = self.store.update_storage_tier(tenant_id, StorageTier::Hot);
        }

        let _ = self.store.update_tenant_status(tenant_id, TenantStatus::Active);
        let _ = self.store.touch_last_activity(tenant_id, now_unix());

        Ok(host)
    }

    /// Proactively unload resident tenants whose measured usage makes them
    /// evict-worthy (spec 4.C.4), independent of the idle-sweep: a hotspot
    /// tenant hogging a disproportionate share of its tier's resources is
    /// a better eviction candidate than whatever is merely oldest.
    pub async fn sweep_hotspots(&self) {
        let candidates: Vec<TenantId> = self
            .cache
            .resident_ids()
            .into_iter()
            .filter_map(|tenant_id| {
                let tenant = self.store.get_tenant(tenant_id, ReadConsistency::Stale).ok()?;
                let (metrics, tier) = self.observe_resources(&tenant);
                metrics.is_evict_worthy(tier, tenant.quotas.storage_bytes).then_some(tenant_id)
            })
            .collect();

        for tenant_id in candidates {
            info!(tenant = %tenant_id, "evicting hotspot tenant");
            if let Err(e) = self.unload(tenant_id, FinalSyncReason::IdleEviction).await {
                warn!(tenant = %tenant_id, error = %e, "hotspot eviction failed");
            }
        }
    }

    pub async fn unload(&self, tenant_id: TenantId, reason: FinalSyncReason) -> Result<()> {
        let Some(instance) = self.cache.remove(tenant_id) else {
            return Ok(());
        };
        let tenant_prefix = self
            .store
            .get_tenant(tenant_id, ReadConsistency::Stale)
            .map(|t| t.storage_prefix)
            .unwrap_or_default();

        self.wal.final_sync(tenant_id, &tenant_prefix, reason).await?;

        instance
            .unload(|host| async move { host.shutdown().await })
            .await
            .map_err(|e| RdbError::Internal(format!("shutdown failed for tenant {tenant_id}: {e}")))?;

        self.wal.cleanup(tenant_id);
        self.quota.cleanup(tenant_id);
        self.instances_by_id.remove(&tenant_id);
        self.observed.remove(&tenant_id);

        let _ = self.store.update_tenant_status(tenant_id, crate::metadata::TenantStatus::Idle);
        info!(tenant = %tenant_id, "tenant unloaded");
        Ok(())
    }

    pub fn resident_tenant_ids(&self) -> Vec<TenantId> {
        self.cache.resident_ids()
    }

    /// Idle sweeper tick: unload any tenant whose instance has not been
    /// touched within `idle_threshold_secs`.
    pub async fn sweep_idle(&self, idle_threshold_secs: u64) {
        let now = now_unix();
        let idle: Vec<TenantId> = self
            .cache
            .resident_ids()
            .into_iter()
            .filter(|id| {
                self.instances_by_id
                    .get(id)
                    .map(|i| now.saturating_sub(i.last_access()) >= idle_threshold_secs)
                    .unwrap_or(false)
            })
            .collect();

        for tenant_id in idle {
            if let Err(e) = self.unload(tenant_id, FinalSyncReason::IdleEviction).await {
                warn!(tenant = %tenant_id, error = %e, "idle eviction failed");
            }
        }
    }

    /// Report this node's health and load back to the control plane.
    pub fn heartbeat(&self) -> Result<()> {
        self.store.heartbeat(self.node_id, now_unix())
    }

    /// Registers this node with the control plane at startup, so the
    /// placement service can route tenants to it and its heartbeats have
    /// somewhere to land. Idempotent: re-registering just upserts the row.
    pub fn register(&self, address: String, capacity: u32) -> Result<()> {
        self.store.register_node(crate::metadata::Node {
            node_id: self.node_id,
            address,
            status: NodeStatus::Online,
            capacity,
            active_tenants: 0,
            last_heartbeat: now_unix(),
        })
    }

    /// Spawns the background loops that keep this node's residents alive
    /// without an inbound request driving them: periodic WAL shipping for
    /// every resident tenant, the idle-eviction sweep, and heartbeats to
    /// the control plane. Mirrors the teacher's `tokio::spawn` + `loop {
    /// sleep(...).await; ... }` pattern for per-tenant background work.
    pub fn spawn_background_loops(self: Arc<Self>, wal_cadence: std::time::Duration, heartbeat_interval: std::time::Duration, idle_sweep_interval: std::time::Duration, idle_threshold_secs: u64) {
        let shipping = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(wal_cadence).await;
                shipping.ship_resident_wal().await;
            }
        });

        let hb = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                if let Err(e) = hb.heartbeat() {
                    warn!(error = %e, "heartbeat failed");
                }
            }
        });

        let sweep = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(idle_sweep_interval).await;
                sweep.sweep_idle(idle_threshold_secs).await;
            }
        });

        let hotspots = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(idle_sweep_interval).await;
                hotspots.sweep_hotspots().await;
            }
        });
    }

    async fn ship_resident_wal(&self) {
        for tenant_id in self.cache.resident_ids() {
            let Ok(tenant) = self.store.get_tenant(tenant_id, ReadConsistency::Stale) else { continue };
            if let Err(e) = self.wal.ship_round(tenant_id, &tenant.storage_prefix).await {
                warn!(tenant = %tenant_id, error = %e, "wal shipping round failed");
            }
        }
    }

    pub async fn graceful_shutdown(&self) {
        let resident = self.cache.resident_ids();
        for tenant_id in resident {
            if let Err(e) = self.unload(tenant_id, FinalSyncReason::Shutdown).await {
                warn!(tenant = %tenant_id, error = %e, "shutdown eviction failed");
            }
        }
        let _ = self.store.register_node(crate::metadata::Node {
            node_id: self.node_id,
            address: String::new(),
            status: NodeStatus::Offline,
            capacity: 0,
            active_tenants: 0,
            last_heartbeat: now_unix(),
        });
    }
}

/// Fetches a tenant's durable data into `data_dir` if it isn't there
/// already. Returns whether a fetch actually happened, so the caller can
/// distinguish "restored from blob storage" from "already local" or "no
/// remote snapshot exists yet" (a brand-new tenant).
async fn restore_if_absent(blob: &dyn BlobStore, prefix: &str, data_dir: &std::path::Path) -> std::io::Result<bool> {
    if let Ok(mut entries) = tokio::fs::read_dir(data_dir).await {
        if entries.next_entry().await?.is_some() {
            return Ok(false);
        }
    }

    let keys = match blob.list_prefix(prefix).await {
        Ok(keys) => keys,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if keys.is_empty() {
        return Ok(false);
    }

    tokio::fs::create_dir_all(data_dir).await?;
    for key in &keys {
        let data = blob.get(key).await?;
        let name = key.rsplit('/').next().unwrap_or(key);
        tokio::fs::write(data_dir.join(name), data).await?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FilesystemBlobStore;
    use crate::common::{Domain, UserId};
    use crate::config::WalShippingConfig;
    use crate::host::StubHost;
    use crate::metadata::{StorageTier, TenantQuotas, TenantStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopShipper;
    #[async_trait]
    impl crate::blob::WalShipper for NoopShipper {
        async fn ship_pending(&self, _p: &str) -> std::io::Result<u64> {
            Ok(0)
        }
        async fn final_sync(&self, _p: &str, _t: Duration) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn runtime() -> (Arc<MetadataStore>, TenantNodeRuntime) {
        let store = Arc::new(MetadataStore::single_node(1));
        let dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let wal = Arc::new(WalShippingState::new(WalShippingConfig::default(), Arc::new(NoopShipper)));
        let quota = Arc::new(QuotaEnforcer::new(86_400));
        let runtime = TenantNodeRuntime::new(
            NodeId::new(),
            store.clone(),
            blob,
            wal,
            quota,
            CacheConfig { capacity_slots: 10, idle_sweep_interval_secs: 60, idle_threshold_secs: 600 },
            Box::new(|| Arc::new(StubHost { body: "ok".into() })),
        );
        (store, runtime)
    }

    fn sample_tenant(domain: &str) -> Tenant {
        Tenant {
            tenant_id: TenantId::new(),
            domain: Domain::new(domain),
            owner_user_id: UserId::new(),
            status: TenantStatus::Created,
            assigned_node: None,
            assigned_at: None,
            storage_prefix: format!("tenants/{domain}"),
            quotas: TenantQuotas { storage_bytes: 1_000_000, daily_requests: 1000 },
            storage_tier: StorageTier::Hot,
            last_activity_at: now_unix(),
            created_at: now_unix(),
        }
    }

    #[tokio::test]
    async fn get_or_load_loads_and_caches() {
        let (store, runtime) = runtime();
        let tenant = sample_tenant("load-test.example.com");
        let tenant_id = tenant.tenant_id;
        store.create_tenant(tenant).unwrap();

        runtime.get_or_load(tenant_id).await.unwrap();
        assert!(runtime.resident_tenant_ids().contains(&tenant_id));

        let updated = store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
        assert_eq!(updated.status, TenantStatus::Active);
    }

    #[tokio::test]
    async fn get_or_load_rejects_suspended_tenant() {
        let (store, runtime) = runtime();
        let mut tenant = sample_tenant("suspended.example.com");
        tenant.status = TenantStatus::Suspended;
        let tenant_id = tenant.tenant_id;
        store.create_tenant(tenant).unwrap();
        store.update_tenant_status(tenant_id, TenantStatus::Suspended).unwrap();

        let err = match runtime.get_or_load(tenant_id).await {
            Err(e) => e,
            Ok(_) => panic!("expected get_or_load to fail for a suspended tenant"),
        };
        assert!(matches!(err, RdbError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn unload_removes_from_cache() {
        let (store, runtime) = runtime();
        let tenant = sample_tenant("unload-test.example.com");
        let tenant_id = tenant.tenant_id;
        store.create_tenant(tenant).unwrap();

        runtime.get_or_load(tenant_id).await.unwrap();
        runtime.unload(tenant_id, FinalSyncReason::IdleEviction).await.unwrap();
        assert!(!runtime.resident_tenant_ids().contains(&tenant_id));
    }
}
