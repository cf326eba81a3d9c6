// End-user HTTP API (spec section 6): self-service account management and
// tenant provisioning under per-user quotas.

use super::AppState;
use crate::auth::GENERIC_ACCOUNT_RESPONSE;
use crate::common::{now_unix, Domain, TenantId, UserId};
use crate::error::{RdbError, Result};
use crate::metadata::{ClusterUser, ReadConsistency, Tenant, TenantQuotas, TenantStatus};
use axum::extract::{Json, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<crate::auth::Claims> {
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| RdbError::Unauthenticated("missing session token".into()))?;
    state.jwt.verify(token)
}

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
}

/// Always returns the same generic message, whether or not the email was
/// already registered, so the endpoint cannot be used to enumerate
/// accounts (spec section 6).
pub async fn signup(State(state): State<Arc<AppState>>, Json(req): Json<SignupRequest>) -> Json<Value> {
    let email = req.email.to_ascii_lowercase();
    if state.store.get_user_by_email(&email, ReadConsistency::Linearizable).is_err() {
        if let Ok(hash) = crate::auth::hash_password(&req.password) {
            let now = now_unix();
            let user = ClusterUser {
                user_id: UserId::new(),
                email: email.clone(),
                password_hash: hash,
                verified: false,
                quotas: crate::metadata::UserQuotas::default(),
                created_at: now,
                updated_at: now,
            };
            if state.store.create_user(user.clone()).is_ok() {
                let token = format!("verify_{}", uuid::Uuid::new_v4());
                let _ = state.store.issue_verification_token(token, user.user_id, 24 * 60 * 60);
            }
        }
    }
    Json(json!({ "message": GENERIC_ACCOUNT_RESPONSE }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(State(state): State<Arc<AppState>>, Json(req): Json<LoginRequest>) -> Result<Json<LoginResponse>> {
    let user = state
        .store
        .get_user_by_email(&req.email.to_ascii_lowercase(), ReadConsistency::Linearizable)
        .map_err(|_| RdbError::Unauthenticated("invalid email or password".into()))?;
    if !crate::auth::verify_password(&req.password, &user.password_hash) {
        return Err(RdbError::Unauthenticated("invalid email or password".into()));
    }
    let token = state.jwt.issue(user.user_id, &user.email, user.verified)?;
    Ok(Json(LoginResponse { token }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

pub async fn verify(State(state): State<Arc<AppState>>, Json(req): Json<VerifyRequest>) -> Result<Json<Value>> {
    let user_id = state.store.consume_verification_token(&req.token)?;
    let mut user = state.store.get_user(user_id, ReadConsistency::Linearizable)?;
    user.verified = true;
    user.updated_at = now_unix();
    state.store.update_user(user)?;
    Ok(Json(json!({ "verified": true })))
}

pub async fn resend_verification(State(state): State<Arc<AppState>>, Json(req): Json<SignupRequest>) -> Json<Value> {
    let email = req.email.to_ascii_lowercase();
    if let Ok(user) = state.store.get_user_by_email(&email, ReadConsistency::Linearizable) {
        if !user.verified {
            let token = format!("verify_{}", uuid::Uuid::new_v4());
            let _ = state.store.issue_verification_token(token, user.user_id, 24 * 60 * 60);
        }
    }
    Json(json!({ "message": GENERIC_ACCOUNT_RESPONSE }))
}

pub async fn profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ClusterUser>> {
    let claims = authenticate(&state, &headers)?;
    let user_id: UserId = UserId(uuid::Uuid::parse_str(&claims.sub).map_err(|_| RdbError::Unauthenticated("malformed session subject".into()))?);
    Ok(Json(state.store.get_user(user_id, ReadConsistency::Linearizable)?))
}

pub async fn list_own_tenants(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<Tenant>>> {
    let claims = authenticate(&state, &headers)?;
    let user_id: UserId = UserId(uuid::Uuid::parse_str(&claims.sub).map_err(|_| RdbError::Unauthenticated("malformed session subject".into()))?);
    let tenants = state.store.list_tenants(ReadConsistency::Linearizable).into_iter().filter(|t| t.owner_user_id == user_id).collect();
    Ok(Json(tenants))
}

#[derive(Deserialize)]
pub struct CreateTenantRequest {
    pub domain: String,
}

pub async fn create_tenant(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<CreateTenantRequest>) -> Result<Json<Tenant>> {
    let claims = authenticate(&state, &headers)?;
    let user_id: UserId = UserId(uuid::Uuid::parse_str(&claims.sub).map_err(|_| RdbError::Unauthenticated("malformed session subject".into()))?);
    let user = state.store.get_user(user_id, ReadConsistency::Linearizable)?;

    let existing_count = state
        .store
        .list_tenants(ReadConsistency::Linearizable)
        .into_iter()
        .filter(|t| t.owner_user_id == user_id)
        .count() as u32;
    if existing_count >= user.quotas.max_tenants {
        return Err(RdbError::UserQuotaExceeded(format!("user {user_id} already owns {existing_count} tenants")));
    }

    let now = now_unix();
    let tenant_id = TenantId::new();
    let tenant = Tenant {
        tenant_id,
        domain: Domain::new(&req.domain),
        owner_user_id: user_id,
        status: TenantStatus::Created,
        assigned_node: None,
        assigned_at: None,
        storage_prefix: format!("tenants/{tenant_id}"),
        quotas: TenantQuotas { storage_bytes: user.quotas.max_storage_per_tenant_bytes, daily_requests: user.quotas.max_requests_per_day },
        storage_tier: crate::metadata::StorageTier::Hot,
        last_activity_at: now,
        created_at: now,
    };
    state.store.create_tenant(tenant.clone())?;
    state.placement.assign(tenant_id)?;
    Ok(Json(tenant))
}

#[derive(Serialize)]
pub struct SsoTokenResponse {
    pub token: String,
}

/// A short-lived token a tenant's embedded UI can use to authenticate a
/// single-sign-on handoff back to this control plane.
pub async fn generate_sso_token(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<SsoTokenResponse>> {
    let claims = authenticate(&state, &headers)?;
    let user_id: UserId = UserId(uuid::Uuid::parse_str(&claims.sub).map_err(|_| RdbError::Unauthenticated("malformed session subject".into()))?);
    let user = state.store.get_user(user_id, ReadConsistency::Linearizable)?;
    let token = state.jwt.issue(user_id, &user.email, user.verified)?;
    Ok(Json(SsoTokenResponse { token }))
}
