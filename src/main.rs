// CLI entry point. Each role (control plane, tenant node, gateway) can run
// standalone, or all three can run in one process for local development
// via `all-in-one`. Grounded on the teacher's main.rs subcommand dispatch,
// generalized from a single-binary database server to three fleet roles.

use clap::{Parser, Subcommand};
use rustydb_fleet::api::{control_plane_router, AppState};
use rustydb_fleet::auth::{AdminTokenIssuer, JwtIssuer};
use rustydb_fleet::blob::FilesystemBlobStore;
use rustydb_fleet::config::FleetConfig;
use rustydb_fleet::gateway::{Gateway, GatewayTimeouts};
use rustydb_fleet::metadata::MetadataStore;
use rustydb_fleet::node::{QuotaEnforcer, TenantNodeRuntime, WalShippingState};
use rustydb_fleet::placement::PlacementService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rustydb-fleet", version, about = "Multi-tenant orchestration plane for a fleet of embedded tenant databases")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run a metadata store node participating in the consensus cluster.
    ControlPlane {
        #[arg(long)]
        node_id: u64,
        #[arg(long, value_delimiter = ',')]
        consensus_peers: Vec<u64>,
        #[arg(long, default_value = "0.0.0.0:7000")]
        http: SocketAddr,
        #[arg(long, default_value = "./data/control-plane")]
        dir: PathBuf,
    },
    /// Run a tenant node that hosts resident tenant databases.
    TenantNode {
        #[arg(long, value_delimiter = ',')]
        control_plane_addrs: Vec<String>,
        #[arg(long, default_value = "0.0.0.0:7100")]
        http: SocketAddr,
        #[arg(long, default_value = "./data/tenant-node")]
        dir: PathBuf,
    },
    /// Run the externally reachable gateway.
    Gateway {
        #[arg(long, value_delimiter = ',')]
        control_plane_addrs: Vec<String>,
        #[arg(long, default_value = "0.0.0.0:7200")]
        http: SocketAddr,
    },
    /// Run all three roles in one process, for local development.
    AllInOne {
        #[arg(long, default_value = "0.0.0.0:7000")]
        http: SocketAddr,
        #[arg(long, default_value = "0.0.0.0:7100")]
        node_http: SocketAddr,
        #[arg(long, default_value = "0.0.0.0:7200")]
        gateway_http: SocketAddr,
        #[arg(long, default_value = "./data/all-in-one")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = match FleetConfig::load(None) {
        Ok(c) => c,
        Err(e) => {
            error!("fatal configuration error: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.role {
        Role::ControlPlane { node_id, consensus_peers, http, dir } => run_control_plane(node_id, consensus_peers, http, dir, config).await,
        Role::TenantNode { control_plane_addrs, http, dir } => run_tenant_node(control_plane_addrs, http, dir, config).await,
        Role::Gateway { control_plane_addrs, http } => run_gateway(control_plane_addrs, http, config).await,
        Role::AllInOne { http, node_http, gateway_http, dir } => run_all_in_one(http, node_http, gateway_http, dir, config).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_control_plane(node_id: u64, peers: Vec<u64>, http: SocketAddr, dir: PathBuf, config: FleetConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&dir).await?;
    let store = Arc::new(MetadataStore::new(node_id, peers));
    let placement = Arc::new(PlacementService::new(store.clone(), config.placement.clone(), config.node_health.heartbeat_timeout_secs));
    placement.clone().spawn_periodic_rebalance(Duration::from_secs(config.node_health.heartbeat_interval_secs.max(10)));
    let admin_tokens = AdminTokenIssuer::new(store.clone());
    let jwt = JwtIssuer::from_env(24 * 60 * 60);

    let state = Arc::new(AppState { store, placement, admin_tokens, jwt });
    let app = control_plane_router(state);

    info!(%http, node_id, "control plane listening");
    let listener = tokio::net::TcpListener::bind(http).await?;
    axum::serve(listener, app).await
}

struct NoopShipper;

#[async_trait::async_trait]
impl rustydb_fleet::blob::WalShipper for NoopShipper {
    async fn ship_pending(&self, _p: &str) -> std::io::Result<u64> {
        Ok(0)
    }
    async fn final_sync(&self, _p: &str, _t: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

async fn run_tenant_node(control_plane_addrs: Vec<String>, http: SocketAddr, dir: PathBuf, config: FleetConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&dir).await?;
    if control_plane_addrs.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "tenant-node requires at least one --control-plane-addrs"));
    }
    // A standalone tenant node holds no consensus state of its own: every
    // tenant/node/placement read or write goes over the wire protocol to
    // whichever control-plane address answers first.
    let store = Arc::new(MetadataStore::remote(control_plane_addrs));
    let blob = Arc::new(FilesystemBlobStore::new(dir.join("blobs")));
    let wal = Arc::new(WalShippingState::new(config.wal_shipping.clone(), Arc::new(NoopShipper)));
    let quota = Arc::new(QuotaEnforcer::new(config.quota.api_window_secs));
    let runtime = Arc::new(TenantNodeRuntime::new(
        rustydb_fleet::common::NodeId::new(),
        store.clone(),
        blob.clone(),
        wal.clone(),
        quota,
        config.cache.clone(),
        Box::new(|| Arc::new(rustydb_fleet::host::StubHost { body: "tenant database placeholder".into() })),
    ));
    if let Err(e) = runtime.register(http.to_string(), config.cache.capacity_slots) {
        error!("failed to register with control plane: {e}");
        return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    }
    runtime.clone().spawn_background_loops(
        config.wal_shipping.cadence.interval(),
        Duration::from_secs(config.node_health.heartbeat_interval_secs),
        Duration::from_secs(config.cache.idle_sweep_interval_secs),
        config.cache.idle_threshold_secs,
    );
    Arc::new(rustydb_fleet::node::ArchivalSweeper::new(config.archival.clone(), store, blob, wal)).spawn_periodic();

    let app = rustydb_fleet::api::node_http::router(runtime);
    info!(%http, "tenant node listening");
    let listener = tokio::net::TcpListener::bind(http).await?;
    axum::serve(listener, app).await
}

async fn run_gateway(control_plane_addrs: Vec<String>, http: SocketAddr, config: FleetConfig) -> std::io::Result<()> {
    if control_plane_addrs.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "gateway requires at least one --control-plane-addrs"));
    }
    let store = Arc::new(MetadataStore::remote(control_plane_addrs));
    let gateway = Arc::new(Gateway::new(
        store,
        Duration::from_secs(config.routing_cache.ttl_secs),
        config.circuit_breaker.clone(),
        GatewayTimeouts::default(),
    ));
    let app = rustydb_fleet::api::gateway_http::router(gateway);
    info!(%http, "gateway listening");
    let listener = tokio::net::TcpListener::bind(http).await?;
    axum::serve(listener, app).await
}

/// Mounts a control plane, a tenant node, and a gateway in one process,
/// sharing a single in-process metadata store rather than reaching it
/// over the wire, since all three roles already live in the same address
/// space. Only meant for local development.
async fn run_all_in_one(http: SocketAddr, node_http: SocketAddr, gateway_http: SocketAddr, dir: PathBuf, config: FleetConfig) -> std::io::Result<()> {
    tokio::fs::create_dir_all(&dir).await?;
    let store = Arc::new(MetadataStore::single_node(1));

    let placement = Arc::new(PlacementService::new(store.clone(), config.placement.clone(), config.node_health.heartbeat_timeout_secs));
    placement.clone().spawn_periodic_rebalance(Duration::from_secs(config.node_health.heartbeat_interval_secs.max(10)));
    let admin_tokens = AdminTokenIssuer::new(store.clone());
    let jwt = JwtIssuer::from_env(24 * 60 * 60);
    let control_plane_state = Arc::new(AppState { store: store.clone(), placement, admin_tokens, jwt });
    let control_plane_app = control_plane_router(control_plane_state);

    let blob = Arc::new(FilesystemBlobStore::new(dir.join("blobs")));
    let wal = Arc::new(WalShippingState::new(config.wal_shipping.clone(), Arc::new(NoopShipper)));
    let quota = Arc::new(QuotaEnforcer::new(config.quota.api_window_secs));
    let runtime = Arc::new(TenantNodeRuntime::new(
        rustydb_fleet::common::NodeId::new(),
        store.clone(),
        blob.clone(),
        wal.clone(),
        quota,
        config.cache.clone(),
        Box::new(|| Arc::new(rustydb_fleet::host::StubHost { body: "tenant database placeholder".into() })),
    ));
    runtime
        .register(node_http.to_string(), config.cache.capacity_slots)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    runtime.clone().spawn_background_loops(
        config.wal_shipping.cadence.interval(),
        Duration::from_secs(config.node_health.heartbeat_interval_secs),
        Duration::from_secs(config.cache.idle_sweep_interval_secs),
        config.cache.idle_threshold_secs,
    );
    Arc::new(rustydb_fleet::node::ArchivalSweeper::new(config.archival.clone(), store.clone(), blob, wal)).spawn_periodic();
    let node_app = rustydb_fleet::api::node_http::router(runtime);

    let gateway = Arc::new(Gateway::new(
        store,
        Duration::from_secs(config.routing_cache.ttl_secs),
        config.circuit_breaker.clone(),
        GatewayTimeouts::default(),
    ));
    let gateway_app = rustydb_fleet::api::gateway_http::router(gateway);

    info!(%http, %node_http, %gateway_http, "all-in-one listening (control plane + tenant node + gateway)");
    let control_plane_listener = tokio::net::TcpListener::bind(http).await?;
    let node_listener = tokio::net::TcpListener::bind(node_http).await?;
    let gateway_listener = tokio::net::TcpListener::bind(gateway_http).await?;

    tokio::try_join!(
        async { axum::serve(control_plane_listener, control_plane_app).await },
        async { axum::serve(node_listener, node_app).await },
        async { axum::serve(gateway_listener, gateway_app).await },
    )?;
    Ok(())
}
