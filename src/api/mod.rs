//! HTTP surfaces for the three deployable roles (spec section 6): the
//! control plane's admin/user API, the tenant node's internal surface,
//! and the gateway's externally facing surface.

pub mod admin;
pub mod gateway_http;
pub mod internal;
pub mod node_http;
pub mod user;

use crate::auth::{AdminTokenIssuer, JwtIssuer};
use crate::metadata::MetadataStore;
use crate::placement::PlacementService;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Shared state for the control plane's admin and user HTTP routers.
pub struct AppState {
    pub store: Arc<MetadataStore>,
    pub placement: Arc<PlacementService>,
    pub admin_tokens: AdminTokenIssuer,
    pub jwt: JwtIssuer,
}

pub fn control_plane_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/tokens/generate", post(admin::generate_token))
        .route("/admin/users", post(admin::create_user).get(admin::list_users))
        .route("/admin/users/{user_id}", get(admin::get_user))
        .route("/admin/tenants", get(admin::list_tenants))
        .route("/admin/tenants/{tenant_id}", get(admin::get_tenant).delete(admin::delete_tenant))
        .route("/admin/tenants/{tenant_id}/status", post(admin::update_tenant_status))
        .route("/admin/nodes", get(admin::list_nodes))
        .route("/admin/nodes/{node_id}", axum::routing::delete(admin::remove_node))
        .route("/admin/stats", get(admin::cluster_stats))
        .route("/admin/archive/stats", get(admin::archive_stats))
        .route("/admin/archive/{tenant_id}/restore", post(admin::restore_tenant));

    let user_routes = Router::new()
        .route("/users/signup", post(user::signup))
        .route("/users/login", post(user::login))
        .route("/users/verify", post(user::verify))
        .route("/users/resend-verification", post(user::resend_verification))
        .route("/users/profile", get(user::profile))
        .route("/users/tenants", get(user::list_own_tenants).post(user::create_tenant))
        .route("/users/sso-token", post(user::generate_sso_token));

    let internal_routes = Router::new().route("/_internal/rpc", post(internal::rpc));

    Router::new().merge(admin_routes).merge(user_routes).merge(internal_routes).with_state(state)
}
