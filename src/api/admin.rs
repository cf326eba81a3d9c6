// Admin HTTP API (spec section 6): token management, user/tenant/node
// CRUD, cluster stats, and archival controls. Every route requires the
// opaque admin bearer token checked by `require_admin`.

use super::AppState;
use crate::auth::GENERIC_ACCOUNT_RESPONSE;
use crate::common::{NodeId, TenantId, UserId};
use crate::error::{RdbError, Result};
use crate::metadata::{ClusterUser, Node, ReadConsistency, Tenant, TenantStatus};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| RdbError::Unauthenticated("missing admin bearer token".into()))?;
    state.admin_tokens.authenticate(token)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct GenerateTokenRequest {
    pub label: String,
}

pub async fn generate_token(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<GenerateTokenRequest>) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;
    let token = state.admin_tokens.generate(req.label)?;
    Ok(Json(json!({ "token": token })))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
}

pub async fn create_user(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateUserRequest>) -> Result<Json<ClusterUser>> {
    require_admin(&state, &headers)?;
    let now = crate::common::now_unix();
    let user = ClusterUser {
        user_id: UserId::new(),
        email: req.email.to_ascii_lowercase(),
        password_hash: crate::auth::hash_password(&req.password)?,
        verified: true,
        quotas: crate::metadata::UserQuotas::default(),
        created_at: now,
        updated_at: now,
    };
    state.store.create_user(user.clone())?;
    Ok(Json(user))
}

pub async fn list_users(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<ClusterUser>>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_users(ReadConsistency::Linearizable)))
}

pub async fn get_user(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(user_id): Path<UserId>) -> Result<Json<ClusterUser>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.get_user(user_id, ReadConsistency::Linearizable)?))
}

pub async fn list_tenants(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<Tenant>>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_tenants(ReadConsistency::Linearizable)))
}

pub async fn get_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(tenant_id): Path<TenantId>) -> Result<Json<Tenant>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.get_tenant(tenant_id, ReadConsistency::Linearizable)?))
}

#[derive(Deserialize)]
pub struct UpdateTenantStatusRequest {
    pub status: TenantStatus,
}

pub async fn update_tenant_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<TenantId>,
    Json(req): Json<UpdateTenantStatusRequest>,
) -> Result<StatusCode> {
    require_admin(&state, &headers)?;
    state.store.update_tenant_status(tenant_id, req.status)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(tenant_id): Path<TenantId>) -> Result<StatusCode> {
    require_admin(&state, &headers)?;
    state.store.delete_tenant(tenant_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_nodes(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<Node>>> {
    require_admin(&state, &headers)?;
    Ok(Json(state.store.list_nodes(ReadConsistency::Linearizable)))
}

pub async fn remove_node(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(node_id): Path<NodeId>) -> Result<StatusCode> {
    require_admin(&state, &headers)?;
    state.store.remove_node(node_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cluster_stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Value>> {
    require_admin(&state, &headers)?;
    let tenants = state.store.list_tenants(ReadConsistency::Stale);
    let nodes = state.store.list_nodes(ReadConsistency::Stale);
    Ok(Json(json!({
        "tenant_count": tenants.len(),
        "node_count": nodes.len(),
        "disk_usage_ratio": state.store.disk.usage_ratio(),
        "raft_term": state.store.raft().current_term(),
        "is_leader": state.store.raft().is_leader(),
    })))
}

#[derive(Serialize)]
pub struct ArchiveStats {
    pub warm_count: usize,
    pub cold_count: usize,
}

pub async fn archive_stats(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ArchiveStats>> {
    require_admin(&state, &headers)?;
    let tenants = state.store.list_tenants(ReadConsistency::Stale);
    let warm_count = tenants.iter().filter(|t| t.storage_tier == crate::metadata::StorageTier::Warm).count();
    let cold_count = tenants.iter().filter(|t| t.storage_tier == crate::metadata::StorageTier::Cold).count();
    Ok(Json(ArchiveStats { warm_count, cold_count }))
}

/// Cold-restore: records the operator's intent to bring a tenant back
/// onto a node. This endpoint only steps the stored tier one band
/// forward and marks the tenant loadable again; the actual data fetch,
/// and the final Warm -> Hot step, happen on the tenant node the next
/// time `getOrLoad` runs (via the `RestoreJob` registry), so the control
/// plane never writes `Hot` for a tenant whose data it has not verified
/// is actually resident anywhere.
pub async fn restore_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Path(tenant_id): Path<TenantId>) -> Result<StatusCode> {
    require_admin(&state, &headers)?;
    let tenant = state.store.get_tenant(tenant_id, ReadConsistency::Linearizable)?;
    if tenant.storage_tier == crate::metadata::StorageTier::Cold {
        state.store.update_storage_tier(tenant_id, crate::metadata::StorageTier::Warm)?;
    }
    state.store.update_tenant_status(tenant_id, TenantStatus::Idle)?;
    Ok(StatusCode::ACCEPTED)
}

pub fn generic_account_message() -> &'static str {
    GENERIC_ACCOUNT_RESPONSE
}
