// Tenant node HTTP surface (spec 4.C "external interfaces"): `/_health`
// and `/_metrics` are answered locally, everything else is resolved to a
// tenant via the `X-Tenant-Id` header the gateway injects and delegated
// to that tenant's `TenantHost::http_handler`.

use crate::gateway::TENANT_ID_HEADER;
use crate::node::TenantNodeRuntime;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn router(runtime: Arc<TenantNodeRuntime>) -> Router {
    Router::new()
        .route("/_health", any(health))
        .route("/_metrics", any(metrics))
        .fallback(any(delegate))
        .with_state(runtime)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(runtime): State<Arc<TenantNodeRuntime>>) -> impl IntoResponse {
    Json(json!({ "resident_tenants": runtime.resident_tenant_ids().len() }))
}

async fn delegate(State(runtime): State<Arc<TenantNodeRuntime>>, req: Request<Body>) -> Response {
    let tenant_id = req
        .headers()
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| uuid::Uuid::parse_str(v).ok())
        .map(crate::common::TenantId);

    let Some(tenant_id) = tenant_id else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing X-Tenant-Id header" }))).into_response();
    };

    let quotas = match runtime.tenant_quotas(tenant_id) {
        Ok(q) => q,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = runtime.quota().check_api(tenant_id, quotas.daily_requests) {
        return e.into_response();
    }

    let incoming_bytes = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if let Err(e) = runtime.quota().check_storage(tenant_id, quotas.storage_bytes, incoming_bytes) {
        return e.into_response();
    }

    match runtime.get_or_load(tenant_id).await {
        Ok(host) => {
            runtime.quota().record_api_request(tenant_id);
            match host.http_handler(req).await {
                Ok(resp) => resp,
                Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream host error: {e}")).into_response(),
            }
        }
        Err(e) => e.into_response(),
    }
}
