// Persisted entity types owned exclusively by the metadata store (spec
// section 3). Every mutation to these types flows through a Command
// (see super::commands) applied to the replicated log.

use crate::common::{Domain, NodeId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Created,
    /// A rebalance has been proposed for this tenant: the destination node
    /// is expected to load it, but the live placement still points at the
    /// source until the move is committed.
    Preparing,
    Assigning,
    Active,
    Idle,
    Suspended,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

/// The resource tier used to weight cache slots and default quotas (spec
/// section 4.C.4). Distinct from [`StorageTier`], which tracks where the
/// tenant's durable data currently lives relative to the compute cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceTier {
    Micro,
    Small,
    Medium,
    Large,
    Enterprise,
}

impl ResourceTier {
    /// Cache weight consumed by one resident tenant of this tier.
    pub fn weight(&self) -> u32 {
        match self {
            ResourceTier::Micro => 1,
            ResourceTier::Small => 2,
            ResourceTier::Medium => 5,
            ResourceTier::Large => 10,
            ResourceTier::Enterprise => 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantQuotas {
    pub storage_bytes: u64,
    pub daily_requests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: TenantId,
    pub domain: Domain,
    pub owner_user_id: UserId,
    pub status: TenantStatus,
    pub assigned_node: Option<NodeId>,
    pub assigned_at: Option<u64>,
    pub storage_prefix: String,
    pub quotas: TenantQuotas,
    pub storage_tier: StorageTier,
    pub last_activity_at: u64,
    pub created_at: u64,
}

impl Tenant {
    /// Invariant (4): tier=cold implies status in {suspended, idle}.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.storage_tier == StorageTier::Cold
            && !matches!(self.status, TenantStatus::Suspended | TenantStatus::Idle)
        {
            return Err(format!(
                "tenant {} is storage_tier=cold but status={:?}",
                self.tenant_id, self.status
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Draining,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub address: String,
    pub status: NodeStatus,
    pub capacity: u32,
    pub active_tenants: u32,
    pub last_heartbeat: u64,
}

impl Node {
    pub fn is_healthy(&self, now: u64, heartbeat_timeout_secs: u64) -> bool {
        self.status == NodeStatus::Online && now.saturating_sub(self.last_heartbeat) <= heartbeat_timeout_secs
    }

    pub fn load_fraction(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.active_tenants as f64 / self.capacity as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub node_address: String,
    pub reason: String,
    pub decided_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuotas {
    pub max_tenants: u32,
    pub max_storage_per_tenant_bytes: u64,
    pub max_requests_per_day: u64,
}

impl Default for UserQuotas {
    fn default() -> Self {
        Self {
            max_tenants: 5,
            max_storage_per_tenant_bytes: 10 * 1024 * 1024 * 1024,
            max_requests_per_day: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterUser {
    pub user_id: UserId,
    pub email: String,
    pub password_hash: String,
    pub verified: bool,
    pub quotas: UserQuotas,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub token: String,
    pub user_id: UserId,
    pub expires_at: u64,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminToken {
    pub token: String,
    pub label: String,
    pub created_at: u64,
    pub last_used_at: Option<u64>,
}

/// A rebalance move that has been proposed but not yet committed: the
/// destination is known, but the live `placements` entry is untouched
/// until `CommitMove` lands, so traffic keeps routing to the source node
/// through the whole prepare phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMove {
    pub to_node: NodeId,
    pub to_node_address: String,
    pub proposed_at: u64,
}

/// Snapshot of everything the metadata store owns, used for backup/restore
/// and to truncate the replicated log (spec section 4.A).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub tenants: HashMap<TenantId, Tenant>,
    pub domains: HashMap<String, TenantId>,
    pub nodes: HashMap<NodeId, Node>,
    pub users: HashMap<UserId, ClusterUser>,
    pub emails: HashMap<String, UserId>,
    pub placements: HashMap<TenantId, PlacementDecision>,
    pub pending_moves: HashMap<TenantId, PendingMove>,
    pub verification_tokens: HashMap<String, VerificationToken>,
    pub admin_tokens: HashMap<String, AdminToken>,
}
