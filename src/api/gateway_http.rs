// Gateway HTTP surface (spec 4.D): every external request passes through
// here, gets resolved to a tenant by Host header, and forwarded to that
// tenant's node. `/health` and `/metrics` are reserved and answered
// locally rather than forwarded, so they work even if every tenant node
// is unreachable.

use crate::common::Domain;
use crate::gateway::{error_status_and_retry_after, Gateway};
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", any(health))
        .route("/metrics", any(metrics))
        .fallback(any(serve_http))
        .with_state(gateway)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    // Reserved for a future Prometheus exposition; the path is claimed now
    // so it can never be routed to a tenant.
    Json(json!({ "status": "reserved" }))
}

async fn serve_http(State(gateway): State<Arc<Gateway>>, req: Request<Body>) -> Response {
    let Some(host) = req.headers().get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };
    let domain = Domain::new(host.split(':').next().unwrap_or(host));
    let path = req.uri().path_and_query().map(|pq| pq.as_str().to_string()).unwrap_or_else(|| "/".to_string());
    let method = req.method().clone();

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b.to_vec(),
        Err(_) => return (StatusCode::BAD_REQUEST, "failed to read request body").into_response(),
    };

    match gateway.forward(method, &domain, &path, body).await {
        Ok(upstream) => {
            let status = upstream.status();
            let headers = upstream.headers().clone();
            let bytes = upstream.bytes().await.unwrap_or_default();
            let mut resp = Response::new(Body::from(bytes));
            *resp.status_mut() = status;
            *resp.headers_mut() = headers;
            resp
        }
        Err(e) => {
            let (status, retry_after) = error_status_and_retry_after(&e);
            let mut resp = (StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY), Json(json!({ "error": e.to_string() }))).into_response();
            if let Some(secs) = retry_after {
                resp.headers_mut().insert("Retry-After", HeaderValue::from_str(&secs.to_string()).unwrap());
            }
            resp
        }
    }
}
