//! The internal RPC envelope used between tenant nodes/gateways and the
//! metadata store's leader (spec section 6 "internal wire protocol"),
//! distinct from the external admin/user HTTP API. Grounded on the
//! teacher's `networking::routing` request/response envelope shape.

use crate::common::{Domain, NodeId, RequestDeadline, TenantId};
use crate::error::RdbError;
use crate::metadata::{Node, PlacementDecision, StorageTier, Tenant, TenantStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod client;

pub use client::WireClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WireRequest {
    GetTenant { tenant_id: TenantId },
    GetTenantByDomain { domain: String },
    GetPlacement { tenant_id: TenantId },
    UpdateTenantStatus { tenant_id: TenantId, status: TenantStatus },
    UpdateStorageTier { tenant_id: TenantId, tier: StorageTier },
    TouchLastActivity { tenant_id: TenantId, at: u64 },
    RegisterNode { node: Node },
    Heartbeat { node_id: NodeId, at: u64 },
    AssignTenant { tenant_id: TenantId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireData {
    Tenant(Tenant),
    Placement(PlacementDecision),
    PlacementOpt(Option<PlacementDecision>),
    Ack,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub success: bool,
    pub data: Option<WireData>,
    pub error: Option<String>,
    /// The `RdbError::status_code()` of the originating error, carried over
    /// the wire so a caller on the other end can reconstruct roughly the
    /// right error kind instead of collapsing everything to `Internal`.
    pub status: Option<u16>,
}

impl WireResponse {
    pub fn ok(data: WireData) -> Self {
        Self { success: true, data: Some(data), error: None, status: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()), status: None }
    }

    pub fn from_error(err: &RdbError) -> Self {
        Self { success: false, data: None, error: Some(err.to_string()), status: Some(err.status_code()) }
    }

    /// Reconstructs the best-effort `RdbError` for a failed response,
    /// using the carried status code to pick a matching variant rather
    /// than flattening every remote failure into `Internal`.
    pub fn into_error(self) -> RdbError {
        let message = self.error.unwrap_or_else(|| "remote call failed".to_string());
        match self.status {
            Some(404) => RdbError::NotFound(message),
            Some(409) => RdbError::AlreadyExists(message),
            Some(403) => RdbError::PermissionDenied(message),
            Some(401) => RdbError::Unauthenticated(message),
            Some(507) => RdbError::StorageQuotaExceeded(message),
            Some(429) => RdbError::ApiQuotaExceeded(message),
            Some(202) => RdbError::RestoreInProgress(message),
            Some(400) => RdbError::InvalidInput(message),
            Some(503) => RdbError::Unavailable(message),
            _ => RdbError::Internal(message),
        }
    }
}

/// Runs a request against the local (non-remote) metadata store, for the
/// control plane's `/_internal/rpc` handler. Mirrors the subset of
/// `MetadataStore` methods a tenant node or gateway needs to reach over
/// the wire instead of holding a private in-process store.
pub fn dispatch(store: &crate::metadata::MetadataStore, request: WireRequest) -> WireResponse {
    use crate::metadata::ReadConsistency;

    let result = match request {
        WireRequest::GetTenant { tenant_id } => store.get_tenant(tenant_id, ReadConsistency::Linearizable).map(WireData::Tenant),
        WireRequest::GetTenantByDomain { domain } => {
            store.get_tenant_by_domain(&Domain::new(&domain), ReadConsistency::Linearizable).map(WireData::Tenant)
        }
        WireRequest::GetPlacement { tenant_id } => {
            Ok(WireData::PlacementOpt(store.get_placement(tenant_id, ReadConsistency::Linearizable)))
        }
        WireRequest::UpdateTenantStatus { tenant_id, status } => store.update_tenant_status(tenant_id, status).map(|_| WireData::Ack),
        WireRequest::UpdateStorageTier { tenant_id, tier } => store.update_storage_tier(tenant_id, tier).map(|_| WireData::Ack),
        WireRequest::TouchLastActivity { tenant_id, at } => store.touch_last_activity(tenant_id, at).map(|_| WireData::Ack),
        WireRequest::RegisterNode { node } => store.register_node(node).map(|_| WireData::Ack),
        WireRequest::Heartbeat { node_id, at } => store.heartbeat(node_id, at).map(|_| WireData::Ack),
        WireRequest::AssignTenant { tenant_id } => Err(RdbError::Internal(format!(
            "AssignTenant must go through the placement service, not the raw metadata store (tenant {tenant_id})"
        ))),
    };

    match result {
        Ok(data) => WireResponse::ok(data),
        Err(e) => WireResponse::from_error(&e),
    }
}

/// A request paired with the deadline it must be served within; every hop
/// shortens its own transport timeout to at most `deadline.remaining()`
/// (spec section 5).
pub struct Envelope {
    pub request: WireRequest,
    pub deadline: RequestDeadline,
}

impl Envelope {
    pub fn new(request: WireRequest, timeout: Duration) -> Self {
        Self { request, deadline: RequestDeadline::after(timeout) }
    }
}

pub fn domain_request(raw: &str) -> WireRequest {
    WireRequest::GetTenantByDomain { domain: Domain::new(raw).as_str().to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_deadline_shrinks_over_time() {
        let env = Envelope::new(WireRequest::GetTenant { tenant_id: TenantId::new() }, Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(10));
        assert!(env.deadline.remaining() < Duration::from_millis(50));
    }

    #[test]
    fn response_ok_round_trips_through_json() {
        let resp = WireResponse::ok(WireData::Ack);
        let json = serde_json::to_string(&resp).unwrap();
        let back: WireResponse = serde_json::from_str(&json).unwrap();
        assert!(back.success);
    }

    #[test]
    fn domain_request_normalizes_case() {
        match domain_request("  A.Example.COM ") {
            WireRequest::GetTenantByDomain { domain } => assert_eq!(domain, "a.example.com"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn dispatch_not_found_carries_status_over_the_wire() {
        let store = crate::metadata::MetadataStore::single_node(1);
        let resp = dispatch(&store, WireRequest::GetTenant { tenant_id: TenantId::new() });
        assert!(!resp.success);
        assert_eq!(resp.status, Some(404));
        assert!(matches!(resp.into_error(), RdbError::NotFound(_)));
    }

    #[test]
    fn dispatch_round_trips_heartbeat() {
        let store = crate::metadata::MetadataStore::single_node(1);
        let node_id = crate::common::NodeId::new();
        store
            .register_node(crate::metadata::Node {
                node_id,
                address: "127.0.0.1:7100".into(),
                status: crate::metadata::NodeStatus::Online,
                capacity: 10,
                active_tenants: 0,
                last_heartbeat: 0,
            })
            .unwrap();

        let resp = dispatch(&store, WireRequest::Heartbeat { node_id, at: 500 });
        assert!(resp.success);
        let node = store.get_node(node_id, crate::metadata::ReadConsistency::Linearizable).unwrap();
        assert_eq!(node.last_heartbeat, 500);
    }
}
