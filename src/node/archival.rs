// Archival lifecycle sweep (spec 4.C.6): idle tenants stop receiving WAL
// shipments first, then move to warm storage class, then cold, on
// increasing idle thresholds. Runs hourly, capped per run so one sweep
// can't starve the runtime's request-serving work.

use super::wal::{FinalSyncReason, WalShippingState};
use crate::blob::{BlobStore, StorageClass};
use crate::common::now_unix;
use crate::config::ArchivalConfig;
use crate::metadata::{MetadataStore, ReadConsistency, StorageTier, TenantStatus};
use std::sync::Arc;
use tracing::info;

pub struct ArchivalSweeper {
    config: ArchivalConfig,
    store: Arc<MetadataStore>,
    blob: Arc<dyn BlobStore>,
    wal: Arc<WalShippingState>,
}

impl ArchivalSweeper {
    pub fn new(config: ArchivalConfig, store: Arc<MetadataStore>, blob: Arc<dyn BlobStore>, wal: Arc<WalShippingState>) -> Self {
        Self { config, store, blob, wal }
    }

    /// Run one sweep pass, touching at most `max_tenants_per_sweep`
    /// idle/suspended tenants, oldest-idle first.
    pub async fn sweep(&self) {
        let now = now_unix();
        let mut candidates: Vec<_> = self
            .store
            .list_tenants(ReadConsistency::Stale)
            .into_iter()
            .filter(|t| matches!(t.status, TenantStatus::Idle | TenantStatus::Suspended))
            .collect();
        candidates.sort_by_key(|t| t.last_activity_at);
        candidates.truncate(self.config.max_tenants_per_sweep);

        for tenant in candidates {
            let idle_secs = now.saturating_sub(tenant.last_activity_at);

            if idle_secs >= self.config.stop_shipping_after_secs && !self.wal.is_stopped(tenant.tenant_id) {
                if let Err(e) = self.wal.final_sync(tenant.tenant_id, &tenant.storage_prefix, FinalSyncReason::IdleEviction).await {
                    info!(tenant = %tenant.tenant_id, error = %e, "final sync before stopping shipment failed, will retry next sweep");
                    continue;
                }
                self.wal.stop_shipping(tenant.tenant_id);
                info!(tenant = %tenant.tenant_id, idle_secs, "stopped WAL shipping for idle tenant");
            }

            let target_tier = if idle_secs >= self.config.cold_after_secs {
                Some(StorageTier::Cold)
            } else if idle_secs >= self.config.warm_after_secs {
                Some(StorageTier::Warm)
            } else {
                None
            };

            if let Some(target_tier) = target_tier {
                if tenant.storage_tier != target_tier {
                    let class = match target_tier {
                        StorageTier::Cold => StorageClass::Archive,
                        StorageTier::Warm => StorageClass::InfrequentAccess,
                        StorageTier::Hot => StorageClass::Standard,
                    };
                    if self.blob.set_storage_class(&tenant.storage_prefix, class).await.is_ok() {
                        let _ = self.store.update_storage_tier(tenant.tenant_id, target_tier);
                        info!(tenant = %tenant.tenant_id, ?target_tier, "archived idle tenant");
                    }
                }
            }
        }
    }

    /// Runs `sweep` on `config.sweep_interval_secs`, forever, as a
    /// background task.
    pub fn spawn_periodic(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.config.sweep_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                self.sweep().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FilesystemBlobStore;
    use crate::common::{Domain, TenantId, UserId};
    use crate::config::WalShippingConfig;
    use crate::metadata::{Tenant, TenantQuotas};
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

    fn idle_tenant(idle_secs: u64) -> Tenant {
        Tenant {
            tenant_id: TenantId::new(),
            domain: Domain::new("archival-test.example.com"),
            owner_user_id: UserId::new(),
            status: TenantStatus::Idle,
            assigned_node: None,
            assigned_at: None,
            storage_prefix: "tenants/archival-test".into(),
            quotas: TenantQuotas { storage_bytes: 1000, daily_requests: 1000 },
            storage_tier: StorageTier::Hot,
            last_activity_at: now_unix().saturating_sub(idle_secs),
            created_at: now_unix().saturating_sub(idle_secs),
        }
    }

    #[tokio::test]
    async fn sweep_promotes_to_warm_after_threshold() {
        let store = Arc::new(MetadataStore::single_node(1));
        let dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let wal = Arc::new(WalShippingState::new(WalShippingConfig::default(), Arc::new(NoopShipper)));
        let config = ArchivalConfig { stop_shipping_after_secs: 1, warm_after_secs: 10, cold_after_secs: 1000, sweep_interval_secs: 3600, max_tenants_per_sweep: 100 };

        let tenant = idle_tenant(20);
        let tenant_id = tenant.tenant_id;
        store.create_tenant(tenant).unwrap();

        let sweeper = ArchivalSweeper::new(config, store.clone(), blob, wal);
        sweeper.sweep().await;

        let updated = store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
        assert_eq!(updated.storage_tier, StorageTier::Warm);
    }

    #[tokio::test]
    async fn sweep_respects_max_tenants_cap() {
        let store = Arc::new(MetadataStore::single_node(1));
        let dir = tempfile::tempdir().unwrap();
        let blob: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
        let wal = Arc::new(WalShippingState::new(WalShippingConfig::default(), Arc::new(NoopShipper)));
        let config = ArchivalConfig { stop_shipping_after_secs: 1, warm_after_secs: 10, cold_after_secs: 1000, sweep_interval_secs: 3600, max_tenants_per_sweep: 1 };

        for i in 0..3 {
            let mut t = idle_tenant(20);
            t.domain = Domain::new(format!("archival-{i}.example.com"));
            store.create_tenant(t).unwrap();
        }

        let sweeper = ArchivalSweeper::new(config, store.clone(), blob, wal);
        sweeper.sweep().await;

        let warm_count = store
            .list_tenants(ReadConsistency::Linearizable)
            .into_iter()
            .filter(|t| t.storage_tier == StorageTier::Warm)
            .count();
        assert_eq!(warm_count, 1);
    }
}
