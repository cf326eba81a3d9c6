// End-to-end scenarios exercising the control plane, tenant node runtime,
// placement service, and gateway together in-process (no real network
// hops), matching the six testable properties in the system's design
// notes.

use async_trait::async_trait;
use rustydb_fleet::blob::{BlobStore, FilesystemBlobStore, WalShipper};
use rustydb_fleet::common::{now_unix, Domain, NodeId, TenantId, UserId};
use rustydb_fleet::config::{CacheConfig, PlacementConfig, WalShippingConfig};
use rustydb_fleet::gateway::{CircuitBreaker, Gateway, GatewayTimeouts};
use rustydb_fleet::host::StubHost;
use rustydb_fleet::metadata::{
    MetadataStore, Node, NodeStatus, ReadConsistency, StorageTier, Tenant, TenantQuotas, TenantStatus,
};
use rustydb_fleet::node::{FinalSyncReason, QuotaEnforcer, TenantNodeRuntime, WalShippingState};
use rustydb_fleet::placement::PlacementService;
use std::sync::Arc;
use std::time::Duration;

struct NoopShipper;
#[async_trait]
impl WalShipper for NoopShipper {
    async fn ship_pending(&self, _prefix: &str) -> std::io::Result<u64> {
        Ok(0)
    }
    async fn final_sync(&self, _prefix: &str, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

fn sample_tenant(domain: &str) -> Tenant {
    let now = now_unix();
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
        last_activity_at: now,
        created_at: now,
    }
}

fn node(address: &str, capacity: u32, active: u32) -> Node {
    Node {
        node_id: NodeId::new(),
        address: address.into(),
        status: NodeStatus::Online,
        capacity,
        active_tenants: active,
        last_heartbeat: now_unix(),
    }
}

fn test_runtime(capacity_slots: u32) -> (Arc<MetadataStore>, TenantNodeRuntime) {
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
        CacheConfig { capacity_slots, idle_sweep_interval_secs: 60, idle_threshold_secs: 600 },
        Box::new(|| Arc::new(StubHost { body: "ok".into() })),
    );
    (store, runtime)
}

/// Scenario 1: a cold request for a never-loaded tenant resolves its
/// placement, loads it into the node's cache, and marks it active.
#[tokio::test]
async fn cold_start_request_loads_tenant() {
    let (store, runtime) = test_runtime(10);
    let tenant = sample_tenant("cold-start.example.com");
    let tenant_id = tenant.tenant_id;
    store.create_tenant(tenant).unwrap();

    runtime.get_or_load(tenant_id).await.unwrap();

    assert!(runtime.resident_tenant_ids().contains(&tenant_id));
    let updated = store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
    assert_eq!(updated.status, TenantStatus::Active);
}

/// Scenario 2: once the cache is saturated, loading a new tenant evicts
/// the least-recently-used resident tenant and the weighted sum never
/// exceeds capacity.
#[tokio::test]
async fn evict_by_weight_keeps_cache_within_capacity() {
    // Micro tier tenants weigh 1 slot each (see tier::classify).
    let (store, runtime) = test_runtime(3);
    let mut ids = Vec::new();
    for i in 0..3 {
        let tenant = sample_tenant(&format!("evict-{i}.example.com"));
        ids.push(tenant.tenant_id);
        store.create_tenant(tenant).unwrap();
        runtime.get_or_load(ids[i]).await.unwrap();
    }
    assert_eq!(runtime.resident_tenant_ids().len(), 3);

    let overflow = sample_tenant("evict-overflow.example.com");
    let overflow_id = overflow.tenant_id;
    store.create_tenant(overflow).unwrap();
    runtime.get_or_load(overflow_id).await.unwrap();

    let resident = runtime.resident_tenant_ids();
    assert_eq!(resident.len(), 3);
    assert!(!resident.contains(&ids[0]), "oldest tenant should have been evicted");
    assert!(resident.contains(&overflow_id));
}

/// Scenario 3: repeated upstream failures through the gateway trip that
/// node's circuit breaker, independent of other nodes.
#[test]
fn failing_node_trips_breaker_independently() {
    let cb_a = CircuitBreaker::new(5, Duration::from_secs(30), 3);
    let cb_b = CircuitBreaker::new(5, Duration::from_secs(30), 3);

    for _ in 0..5 {
        cb_a.on_failure();
    }
    assert!(!cb_a.allow_request());
    assert!(cb_b.allow_request());
}

/// Scenario 4: an imbalanced cluster produces at least one rebalance
/// move from the overloaded node to the underloaded one.
#[test]
fn rebalance_moves_load_toward_balance() {
    let store = Arc::new(MetadataStore::single_node(1));
    let hot = node("hot:9000", 10, 9);
    let cold = node("cold:9000", 10, 1);
    store.register_node(hot.clone()).unwrap();
    store.register_node(cold.clone()).unwrap();

    let placement = PlacementService::new(store, PlacementConfig::default(), 30);
    let moves = placement.check_rebalance();

    assert!(!moves.is_empty());
    assert_eq!(moves[0].from_node, hot.node_id);
    assert_eq!(moves[0].to_node, cold.node_id);
}

/// Scenario 5: a tenant that goes idle long enough is archived to warm
/// storage, and a restore request brings it back to hot.
#[tokio::test]
async fn archival_round_trip_restores_to_hot() {
    let store = Arc::new(MetadataStore::single_node(1));
    let mut tenant = sample_tenant("archival-roundtrip.example.com");
    tenant.status = TenantStatus::Idle;
    tenant.last_activity_at = now_unix().saturating_sub(30 * 24 * 60 * 60);
    let tenant_id = tenant.tenant_id;
    store.create_tenant(tenant).unwrap();
    store.update_tenant_status(tenant_id, TenantStatus::Idle).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let blob: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path()));
    let wal = Arc::new(WalShippingState::new(WalShippingConfig::default(), Arc::new(NoopShipper)));
    let sweeper = rustydb_fleet::node::ArchivalSweeper::new(
        rustydb_fleet::config::ArchivalConfig { stop_shipping_after_secs: 1, warm_after_secs: 60, cold_after_secs: 90 * 24 * 60 * 60, sweep_interval_secs: 3600, max_tenants_per_sweep: 100 },
        store.clone(),
        blob,
        wal,
    );
    sweeper.sweep().await;

    let archived = store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
    assert_eq!(archived.storage_tier, StorageTier::Warm);

    store.update_storage_tier(tenant_id, StorageTier::Hot).unwrap();
    store.update_tenant_status(tenant_id, TenantStatus::Idle).unwrap();
    let restored = store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
    assert_eq!(restored.storage_tier, StorageTier::Hot);
}

/// Scenario 6: two concurrent consumptions of the same verification token
/// succeed at most once.
#[test]
fn verification_token_race_has_one_winner() {
    let store = Arc::new(MetadataStore::single_node(1));
    let user_id = UserId::new();
    store.issue_verification_token("race-token".into(), user_id, 3600).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                scope.spawn(move || store.consume_verification_token("race-token"))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
}

/// A gateway with a resolvable but unplaced tenant reports 503, not a
/// generic 502, so clients know to retry rather than give up.
#[test]
fn gateway_reports_unavailable_for_unplaced_tenant() {
    let store = Arc::new(MetadataStore::single_node(1));
    let tenant = sample_tenant("gateway-unplaced.example.com");
    let domain = tenant.domain.clone();
    store.create_tenant(tenant).unwrap();

    let gateway = Gateway::new(store, Duration::from_secs(30), Default::default(), GatewayTimeouts::default());
    let err = gateway.resolve(&domain).unwrap_err();
    let (status, retry_after) = rustydb_fleet::gateway::error_status_and_retry_after(&err);
    assert_eq!(status, 503);
    assert!(retry_after.is_some());
}

/// A `MetadataStore::remote` handle, standing in for a tenant node or
/// gateway process, reaches a real control-plane HTTP server over the
/// internal wire protocol instead of reading its own in-process state.
// block_in_place (used by MetadataStore::remote's synchronous wire calls)
// requires a multi-threaded runtime.
#[tokio::test(flavor = "multi_thread")]
async fn remote_metadata_store_reaches_real_control_plane_over_http() {
    use rustydb_fleet::api::{control_plane_router, AppState};
    use rustydb_fleet::auth::{AdminTokenIssuer, JwtIssuer};
    use rustydb_fleet::placement::PlacementService;

    let control_store = Arc::new(MetadataStore::single_node(1));
    let tenant = sample_tenant("remote-wire.example.com");
    let tenant_id = tenant.tenant_id;
    control_store.create_tenant(tenant).unwrap();

    let placement = Arc::new(PlacementService::new(control_store.clone(), PlacementConfig::default(), 30));
    let admin_tokens = AdminTokenIssuer::new(control_store.clone());
    let jwt = JwtIssuer::from_env(3600);
    let state = Arc::new(AppState { store: control_store.clone(), placement, admin_tokens, jwt });
    let app = control_plane_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let remote = MetadataStore::remote(vec![addr.to_string()]);

    let fetched = remote.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
    assert_eq!(fetched.tenant_id, tenant_id);

    remote.update_tenant_status(tenant_id, TenantStatus::Active).unwrap();
    let updated = control_store.get_tenant(tenant_id, ReadConsistency::Linearizable).unwrap();
    assert_eq!(updated.status, TenantStatus::Active);

    let missing = remote.get_tenant(TenantId::new(), ReadConsistency::Linearizable);
    assert!(matches!(missing, Err(rustydb_fleet::error::RdbError::NotFound(_))));
}

