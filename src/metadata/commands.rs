// Tagged command envelope applied to the replicated log. Only commands that
// commit through consensus are applied to the local KV state (spec 4.A).

use super::types::{ClusterUser, Node, PlacementDecision, StorageTier, Tenant, TenantStatus};
use crate::common::{NodeId, TenantId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload")]
pub enum Command {
    CreateTenant(Tenant),
    UpdateTenantStatus { tenant_id: TenantId, status: TenantStatus },
    UpdateStorageTier { tenant_id: TenantId, tier: StorageTier },
    TouchLastActivity { tenant_id: TenantId, at: u64 },
    AssignTenant { tenant_id: TenantId, node_id: NodeId, node_address: String, reason: String },
    DeleteTenant { tenant_id: TenantId },
    UpsertNode(Node),
    RemoveNode { node_id: NodeId },
    Heartbeat { node_id: NodeId, at: u64 },
    RecordPlacement(PlacementDecision),
    /// Phase one of a rebalance handoff: records the destination without
    /// touching the live placement, and marks the tenant `Preparing`.
    ProposeMove { tenant_id: TenantId, to_node: NodeId, to_node_address: String, proposed_at: u64 },
    /// Phase two: cuts traffic over to the prepared destination and clears
    /// the pending move. A no-op if no move is pending for the tenant.
    CommitMove { tenant_id: TenantId },
    CreateUser(ClusterUser),
    UpdateUser(ClusterUser),
    IssueVerificationToken { token: String, user_id: UserId, expires_at: u64 },
    ConsumeVerificationToken { token: String },
    IssueAdminToken { token: String, label: String, created_at: u64 },
    TouchAdminToken { token: String, at: u64 },
    RevokeAdminToken { token: String },
}

impl Command {
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| crate::error::RdbError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(cmd, _)| cmd)
            .map_err(|e| crate::error::RdbError::Serialization(e.to_string()))
    }
}
