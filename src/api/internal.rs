//! The internal RPC surface (spec section 6): the one endpoint tenant
//! nodes and gateways use to reach the control plane's metadata store
//! over the network instead of holding a private in-process copy of it.

use super::AppState;
use crate::wire::{dispatch, WireRequest};
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

pub async fn rpc(State(state): State<Arc<AppState>>, Json(request): Json<WireRequest>) -> Json<crate::wire::WireResponse> {
    Json(dispatch(&state.store, request))
}
