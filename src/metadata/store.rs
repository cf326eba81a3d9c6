// The metadata store facade: applies committed commands to an in-memory KV
// view, exposes CRUD for every persisted entity, and enforces the
// linearizability rules in spec 4.A (leader-served writes and strongly
// consistent reads by default, opt-in stale follower reads).

use super::commands::Command;
use super::consensus::{now_secs, ClusterConfiguration, RaftNode, RaftNodeId};
use super::disk_manager::DiskManager;
use super::types::*;
use crate::common::{Domain, NodeId, TenantId, UserId};
use crate::config::DiskManagerConfig;
use crate::error::{RdbError, Result};
use crate::wire::{WireClient, WireData, WireRequest};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Whether a read may be served by a follower that has not confirmed it
/// holds the latest committed state (spec 4.A: "callers may opt into stale
/// follower reads").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConsistency {
    Linearizable,
    Stale,
}

struct AppliedState {
    snapshot: Snapshot,
    applied_index: u64,
}

pub struct MetadataStore {
    raft: Arc<RaftNode>,
    state: RwLock<AppliedState>,
    pub disk: Arc<DiskManager>,
    // Serializes the check-then-propose sequence for one-shot operations
    // (verification token consumption) so two racing callers cannot both
    // observe the pre-consumption state before either commit applies.
    consume_lock: parking_lot::Mutex<()>,
    // Set when this handle speaks to a control-plane process over the wire
    // instead of owning the raft log itself (tenant-node and gateway
    // deployments). `raft`/`state` still exist in that mode but sit idle —
    // every method that touches shared fleet state checks this first and
    // forwards instead of reading/writing local memory.
    remote: Option<Arc<WireClient>>,
}

impl MetadataStore {
    pub fn new(node_id: RaftNodeId, peers: Vec<RaftNodeId>) -> Self {
        let mut members = peers;
        if !members.contains(&node_id) {
            members.push(node_id);
        }
        let raft = Arc::new(RaftNode::new(node_id, ClusterConfiguration { members }));
        Self {
            raft,
            state: RwLock::new(AppliedState { snapshot: Snapshot::default(), applied_index: 0 }),
            disk: Arc::new(DiskManager::new(DiskManagerConfig::default())),
            consume_lock: parking_lot::Mutex::new(()),
            remote: None,
        }
    }

    /// A handle that forwards every fleet-state operation over the wire
    /// protocol to one of `addrs` instead of participating in consensus
    /// itself. Used by the `tenant-node` and `gateway` roles, which are
    /// separate processes from whichever node is currently the metadata
    /// store's raft leader.
    pub fn remote(addrs: Vec<String>) -> Self {
        let mut store = Self::new(0, vec![]);
        store.remote = Some(Arc::new(WireClient::new(addrs)));
        store
    }

    pub fn raft(&self) -> &Arc<RaftNode> {
        &self.raft
    }

    /// Single-node convenience constructor used by tests and `all-in-one`
    /// mode, where there is exactly one raft member and it is always
    /// leader after its first election.
    pub fn single_node(node_id: RaftNodeId) -> Self {
        let store = Self::new(node_id, vec![]);
        let req = store.raft.start_election();
        // A lone member grants itself the only vote needed for quorum.
        let resp = super::consensus::VoteResponse { term: req.term, vote_granted: true };
        store.raft.handle_vote_response(node_id, resp);
        store
    }

    fn require_leader(&self) -> Result<()> {
        if self.raft.is_leader() {
            Ok(())
        } else {
            Err(RdbError::NotLeader {
                leader_addr: self.raft.leader_id().map(|id| id.to_string()),
                reason: "writes must go to the raft leader".into(),
            })
        }
    }

    /// Append a command to the leader's log, replicate it to peers, wait
    /// for quorum, then apply it to local state. In the single-node
    /// deployment this just applies the command once it is "committed" by
    /// definition of having a quorum of size 1.
    pub fn propose(&self, command: Command) -> Result<()> {
        self.require_leader()?;
        let bytes = command.encode()?;
        let index = self.raft.append_command(bytes)?;
        // Mark self as having replicated the entry; real peers would ack
        // over the wire protocol and call record_peer_match themselves.
        self.raft.record_peer_match(self.raft.id, index);
        self.raft.advance_commit_index();
        self.apply_committed();
        Ok(())
    }

    fn apply_committed(&self) {
        let commit_index = self.raft.commit_index();
        let mut state = self.state.write();
        if state.applied_index >= commit_index {
            return;
        }
        let entries = self.raft.entries_since(state.applied_index);
        for entry in entries {
            if entry.index > commit_index {
                break;
            }
            if let Ok(cmd) = Command::decode(&entry.command) {
                apply_one(&mut state.snapshot, cmd);
            }
            state.applied_index = entry.index;
        }
    }

    fn read(&self, consistency: ReadConsistency) -> parking_lot::RwLockReadGuard<'_, AppliedState> {
        if consistency == ReadConsistency::Linearizable {
            self.apply_committed();
        }
        self.state.read()
    }

    // ---- Tenant CRUD ----

    pub fn create_tenant(&self, tenant: Tenant) -> Result<()> {
        {
            let state = self.state.read();
            if state.snapshot.domains.contains_key(tenant.domain.as_str()) {
                return Err(RdbError::AlreadyExists(format!("domain {} already bound", tenant.domain)));
            }
        }
        self.propose(Command::CreateTenant(tenant))
    }

    pub fn get_tenant(&self, tenant_id: TenantId, consistency: ReadConsistency) -> Result<Tenant> {
        if let Some(remote) = &self.remote {
            let resp = remote.call_blocking(WireRequest::GetTenant { tenant_id })?;
            return extract_tenant(resp);
        }
        self.read(consistency)
            .snapshot
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| RdbError::NotFound(format!("tenant {tenant_id}")))
    }

    pub fn get_tenant_by_domain(&self, domain: &Domain, consistency: ReadConsistency) -> Result<Tenant> {
        if let Some(remote) = &self.remote {
            let resp = remote.call_blocking(WireRequest::GetTenantByDomain { domain: domain.as_str().to_string() })?;
            return extract_tenant(resp);
        }
        let state = self.read(consistency);
        let tenant_id = state
            .snapshot
            .domains
            .get(domain.as_str())
            .copied()
            .ok_or_else(|| RdbError::NotFound(format!("domain {domain}")))?;
        state
            .snapshot
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| RdbError::NotFound(format!("tenant {tenant_id}")))
    }

    pub fn list_tenants(&self, consistency: ReadConsistency) -> Vec<Tenant> {
        self.read(consistency).snapshot.tenants.values().cloned().collect()
    }

    pub fn update_tenant_status(&self, tenant_id: TenantId, status: TenantStatus) -> Result<()> {
        if let Some(remote) = &self.remote {
            return ack(remote.call_blocking(WireRequest::UpdateTenantStatus { tenant_id, status })?);
        }
        self.propose(Command::UpdateTenantStatus { tenant_id, status })
    }

    pub fn delete_tenant(&self, tenant_id: TenantId) -> Result<()> {
        self.propose(Command::DeleteTenant { tenant_id })
    }

    pub fn update_storage_tier(&self, tenant_id: TenantId, tier: StorageTier) -> Result<()> {
        if let Some(remote) = &self.remote {
            return ack(remote.call_blocking(WireRequest::UpdateStorageTier { tenant_id, tier })?);
        }
        self.propose(Command::UpdateStorageTier { tenant_id, tier })
    }

    pub fn touch_last_activity(&self, tenant_id: TenantId, at: u64) -> Result<()> {
        if let Some(remote) = &self.remote {
            return ack(remote.call_blocking(WireRequest::TouchLastActivity { tenant_id, at })?);
        }
        self.propose(Command::TouchLastActivity { tenant_id, at })
    }

    // ---- Node CRUD ----

    pub fn register_node(&self, node: Node) -> Result<()> {
        if let Some(remote) = &self.remote {
            return ack(remote.call_blocking(WireRequest::RegisterNode { node })?);
        }
        self.propose(Command::UpsertNode(node))
    }

    pub fn heartbeat(&self, node_id: NodeId, at: u64) -> Result<()> {
        if let Some(remote) = &self.remote {
            return ack(remote.call_blocking(WireRequest::Heartbeat { node_id, at })?);
        }
        // Out-of-order heartbeats are ignored (spec section 5).
        let current = self.read(ReadConsistency::Stale).snapshot.nodes.get(&node_id).map(|n| n.last_heartbeat);
        if let Some(current) = current {
            if at <= current {
                return Ok(());
            }
        }
        self.propose(Command::Heartbeat { node_id, at })
    }

    pub fn get_node(&self, node_id: NodeId, consistency: ReadConsistency) -> Result<Node> {
        self.read(consistency)
            .snapshot
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or_else(|| RdbError::NotFound(format!("node {node_id}")))
    }

    pub fn list_nodes(&self, consistency: ReadConsistency) -> Vec<Node> {
        self.read(consistency).snapshot.nodes.values().cloned().collect()
    }

    pub fn remove_node(&self, node_id: NodeId) -> Result<()> {
        self.propose(Command::RemoveNode { node_id })
    }

    // ---- Placement ----

    pub fn record_placement(&self, decision: PlacementDecision) -> Result<()> {
        self.propose(Command::RecordPlacement(decision))
    }

    pub fn get_placement(&self, tenant_id: TenantId, consistency: ReadConsistency) -> Option<PlacementDecision> {
        if let Some(remote) = &self.remote {
            return match remote.call_blocking(WireRequest::GetPlacement { tenant_id }).ok()?.data {
                Some(WireData::PlacementOpt(p)) => p,
                _ => None,
            };
        }
        self.read(consistency).snapshot.placements.get(&tenant_id).cloned()
    }

    /// Phase one of a rebalance handoff (spec section 9): records the
    /// destination and flips the tenant to `Preparing` without touching
    /// the live placement, so in-flight requests keep routing to the
    /// source node until `commit_move` lands.
    pub fn propose_move(&self, tenant_id: TenantId, to_node: NodeId, to_node_address: String) -> Result<()> {
        self.propose(Command::ProposeMove { tenant_id, to_node, to_node_address, proposed_at: now_secs() })
    }

    /// Phase two: cuts the live placement over to the prepared destination
    /// and marks the tenant `Assigning` so the destination's next
    /// `getOrLoad` admits it. No-op if nothing is pending for the tenant.
    pub fn commit_move(&self, tenant_id: TenantId) -> Result<()> {
        self.propose(Command::CommitMove { tenant_id })
    }

    pub fn get_pending_move(&self, tenant_id: TenantId, consistency: ReadConsistency) -> Option<PendingMove> {
        self.read(consistency).snapshot.pending_moves.get(&tenant_id).cloned()
    }

    pub fn list_pending_moves(&self, consistency: ReadConsistency) -> Vec<(TenantId, PendingMove)> {
        self.read(consistency).snapshot.pending_moves.iter().map(|(id, mv)| (*id, mv.clone())).collect()
    }

    // ---- Users ----

    pub fn create_user(&self, user: ClusterUser) -> Result<()> {
        {
            let state = self.state.read();
            if state.snapshot.emails.contains_key(&user.email) {
                return Err(RdbError::AlreadyExists(format!("email {} already registered", user.email)));
            }
        }
        self.propose(Command::CreateUser(user))
    }

    pub fn get_user(&self, user_id: UserId, consistency: ReadConsistency) -> Result<ClusterUser> {
        self.read(consistency)
            .snapshot
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| RdbError::NotFound(format!("user {user_id}")))
    }

    pub fn get_user_by_email(&self, email: &str, consistency: ReadConsistency) -> Result<ClusterUser> {
        let email = email.to_ascii_lowercase();
        let state = self.read(consistency);
        let user_id = state
            .snapshot
            .emails
            .get(&email)
            .copied()
            .ok_or_else(|| RdbError::NotFound(format!("user with email {email}")))?;
        state.snapshot.users.get(&user_id).cloned().ok_or_else(|| RdbError::NotFound("user".into()))
    }

    pub fn update_user(&self, user: ClusterUser) -> Result<()> {
        self.propose(Command::UpdateUser(user))
    }

    pub fn list_users(&self, consistency: ReadConsistency) -> Vec<ClusterUser> {
        self.read(consistency).snapshot.users.values().cloned().collect()
    }

    // ---- Verification tokens ----

    pub fn issue_verification_token(&self, token: String, user_id: UserId, ttl_secs: u64) -> Result<()> {
        let expires_at = now_secs() + ttl_secs;
        self.propose(Command::IssueVerificationToken { token, user_id, expires_at })
    }

    /// Atomic compare-and-mark-used: at most one of two concurrent callers
    /// observes success (spec's verification-token one-shot property). The
    /// write path goes through the same serialized `propose` call as every
    /// other mutation, so two racing `propose` calls on a single-node store
    /// cannot both flip `used` to true for the same token.
    pub fn consume_verification_token(&self, token: &str) -> Result<UserId> {
        let _guard = self.consume_lock.lock();

        let record = self
            .state
            .read()
            .snapshot
            .verification_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| RdbError::NotFound("invalid or expired token".into()))?;

        if record.used || now_secs() > record.expires_at {
            return Err(RdbError::NotFound("invalid or expired token".into()));
        }

        self.propose(Command::ConsumeVerificationToken { token: token.to_string() })?;
        Ok(record.user_id)
    }

    // ---- Admin tokens ----

    pub fn issue_admin_token(&self, token: String, label: String) -> Result<()> {
        self.propose(Command::IssueAdminToken { token, label, created_at: now_secs() })
    }

    pub fn touch_admin_token(&self, token: &str) -> Result<()> {
        self.propose(Command::TouchAdminToken { token: token.to_string(), at: now_secs() })
    }

    pub fn revoke_admin_token(&self, token: &str) -> Result<()> {
        self.propose(Command::RevokeAdminToken { token: token.to_string() })
    }

    pub fn get_admin_token(&self, token: &str, consistency: ReadConsistency) -> Result<AdminToken> {
        self.read(consistency)
            .snapshot
            .admin_tokens
            .get(token)
            .cloned()
            .ok_or_else(|| RdbError::NotFound("invalid admin token".into()))
    }

    pub fn list_admin_tokens(&self, consistency: ReadConsistency) -> Vec<AdminToken> {
        self.read(consistency).snapshot.admin_tokens.values().cloned().collect()
    }

    // ---- Snapshot / restore ----

    pub fn snapshot(&self) -> Snapshot {
        self.apply_committed();
        self.state.read().snapshot.clone()
    }

    pub fn restore(&self, snapshot: Snapshot) {
        let mut state = self.state.write();
        state.snapshot = snapshot;
        info!("metadata store restored from snapshot");
    }
}

/// Turns a wire reply into `Ok(())` or the originating error, for the
/// fire-and-forget write calls (`UpdateTenantStatus`, `Heartbeat`, ...)
/// that only care whether the remote side accepted the command.
fn ack(resp: crate::wire::WireResponse) -> Result<()> {
    if resp.success {
        Ok(())
    } else {
        Err(resp.into_error())
    }
}

fn extract_tenant(resp: crate::wire::WireResponse) -> Result<Tenant> {
    if !resp.success {
        return Err(resp.into_error());
    }
    match resp.data {
        Some(WireData::Tenant(t)) => Ok(t),
        _ => Err(RdbError::Internal("malformed tenant rpc reply".into())),
    }
}

fn apply_one(snapshot: &mut Snapshot, cmd: Command) {
    match cmd {
        Command::CreateTenant(tenant) => {
            snapshot.domains.insert(tenant.domain.as_str().to_string(), tenant.tenant_id);
            snapshot.tenants.insert(tenant.tenant_id, tenant);
        }
        Command::UpdateTenantStatus { tenant_id, status } => {
            if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                t.status = status;
            }
        }
        Command::UpdateStorageTier { tenant_id, tier } => {
            if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                t.storage_tier = tier;
            }
        }
        Command::TouchLastActivity { tenant_id, at } => {
            if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                if at > t.last_activity_at {
                    t.last_activity_at = at;
                }
            }
        }
        Command::AssignTenant { tenant_id, node_id, node_address: _, reason: _ } => {
            if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                t.assigned_node = Some(node_id);
                t.assigned_at = Some(now_secs());
            }
        }
        Command::DeleteTenant { tenant_id } => {
            if let Some(t) = snapshot.tenants.remove(&tenant_id) {
                snapshot.domains.remove(t.domain.as_str());
            }
            snapshot.placements.remove(&tenant_id);
        }
        Command::UpsertNode(node) => {
            snapshot.nodes.insert(node.node_id, node);
        }
        Command::RemoveNode { node_id } => {
            snapshot.nodes.remove(&node_id);
        }
        Command::Heartbeat { node_id, at } => {
            if let Some(node) = snapshot.nodes.get_mut(&node_id) {
                if at > node.last_heartbeat {
                    node.last_heartbeat = at;
                }
            }
        }
        Command::RecordPlacement(decision) => {
            snapshot.placements.insert(decision.tenant_id, decision);
        }
        Command::ProposeMove { tenant_id, to_node, to_node_address, proposed_at } => {
            snapshot.pending_moves.insert(tenant_id, PendingMove { to_node, to_node_address, proposed_at });
            if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                t.status = TenantStatus::Preparing;
            }
        }
        Command::CommitMove { tenant_id } => {
            if let Some(mv) = snapshot.pending_moves.remove(&tenant_id) {
                snapshot.placements.insert(
                    tenant_id,
                    PlacementDecision {
                        tenant_id,
                        node_id: mv.to_node,
                        node_address: mv.to_node_address,
                        reason: "rebalance".to_string(),
                        decided_at: now_secs(),
                    },
                );
                if let Some(t) = snapshot.tenants.get_mut(&tenant_id) {
                    t.status = TenantStatus::Assigning;
                }
            }
        }
        Command::CreateUser(user) => {
            snapshot.emails.insert(user.email.clone(), user.user_id);
            snapshot.users.insert(user.user_id, user);
        }
        Command::UpdateUser(user) => {
            snapshot.users.insert(user.user_id, user);
        }
        Command::IssueVerificationToken { token, user_id, expires_at } => {
            snapshot.verification_tokens.insert(
                token.clone(),
                VerificationToken { token, user_id, expires_at, used: false },
            );
        }
        Command::ConsumeVerificationToken { token } => {
            if let Some(vt) = snapshot.verification_tokens.get_mut(&token) {
                if !vt.used {
                    vt.used = true;
                }
            }
        }
        Command::IssueAdminToken { token, label, created_at } => {
            snapshot.admin_tokens.insert(token.clone(), AdminToken { token, label, created_at, last_used_at: None });
        }
        Command::TouchAdminToken { token, at } => {
            if let Some(t) = snapshot.admin_tokens.get_mut(&token) {
                t.last_used_at = Some(at);
            }
        }
        Command::RevokeAdminToken { token } => {
            snapshot.admin_tokens.remove(&token);
        }
    }
}
