// A Raft-shaped consensus core for the metadata store's replicated command
// log. Mirrors the teacher's clustering::raft module: a pure state machine
// (`RaftNode`) driven by vote/append-entries messages, with networking left
// to a caller-supplied `Transport`. This lets a single-process test harness
// and a real multi-node deployment share one implementation.

use crate::error::{RdbError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub type RaftNodeId = u64;
pub type Term = u64;
pub type LogIndex = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftState {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: RaftNodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: RaftNodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: Option<LogIndex>,
}

struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn last_index(&self) -> LogIndex {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    fn truncate_from(&mut self, index: LogIndex) {
        if index == 0 {
            self.entries.clear();
        } else {
            self.entries.truncate((index - 1) as usize);
        }
    }
}

struct RaftInner {
    state: RaftState,
    current_term: Term,
    voted_for: Option<RaftNodeId>,
    leader_id: Option<RaftNodeId>,
    log: Log,
    commit_index: LogIndex,
    votes_received: HashMap<RaftNodeId, bool>,
    // Leader-only, indexed by peer id.
    next_index: HashMap<RaftNodeId, LogIndex>,
    match_index: HashMap<RaftNodeId, LogIndex>,
    last_heartbeat_at: SystemTime,
}

/// Peer addresses participating in this raft group, including self.
#[derive(Debug, Clone)]
pub struct ClusterConfiguration {
    pub members: Vec<RaftNodeId>,
}

impl ClusterConfiguration {
    pub fn has_quorum(&self, votes: &HashMap<RaftNodeId, bool>) -> bool {
        let granted = votes.values().filter(|v| **v).count();
        granted * 2 > self.members.len()
    }
}

pub struct RaftNode {
    pub id: RaftNodeId,
    config: ClusterConfiguration,
    inner: RwLock<RaftInner>,
}

impl RaftNode {
    pub fn new(id: RaftNodeId, config: ClusterConfiguration) -> Self {
        Self {
            id,
            config,
            inner: RwLock::new(RaftInner {
                state: RaftState::Follower,
                current_term: 0,
                voted_for: None,
                leader_id: None,
                log: Log::new(),
                commit_index: 0,
                votes_received: HashMap::new(),
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                last_heartbeat_at: SystemTime::now(),
            }),
        }
    }

    pub fn state(&self) -> RaftState {
        self.inner.read().state
    }

    pub fn current_term(&self) -> Term {
        self.inner.read().current_term
    }

    pub fn leader_id(&self) -> Option<RaftNodeId> {
        self.inner.read().leader_id
    }

    pub fn is_leader(&self) -> bool {
        self.state() == RaftState::Leader
    }

    /// Begin a new election: increment term, vote for self, request votes
    /// from every other peer. The caller is responsible for delivering the
    /// returned request over its transport and feeding responses back
    /// through `handle_vote_response`.
    pub fn start_election(&self) -> VoteRequest {
        let mut inner = self.inner.write();
        inner.current_term += 1;
        inner.state = RaftState::Candidate;
        inner.voted_for = Some(self.id);
        inner.leader_id = None;
        inner.votes_received.clear();
        inner.votes_received.insert(self.id, true);
        inner.last_heartbeat_at = SystemTime::now();

        VoteRequest {
            term: inner.current_term,
            candidate_id: self.id,
            last_log_index: inner.log.last_index(),
            last_log_term: inner.log.last_term(),
        }
    }

    pub fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let mut inner = self.inner.write();
        if req.term < inner.current_term {
            return VoteResponse { term: inner.current_term, vote_granted: false };
        }
        if req.term > inner.current_term {
            inner.current_term = req.term;
            inner.state = RaftState::Follower;
            inner.voted_for = None;
            inner.leader_id = None;
        }

        let log_ok = req.last_log_term > inner.log.last_term()
            || (req.last_log_term == inner.log.last_term() && req.last_log_index >= inner.log.last_index());

        let can_vote = inner.voted_for.is_none() || inner.voted_for == Some(req.candidate_id);

        if can_vote && log_ok {
            inner.voted_for = Some(req.candidate_id);
            inner.last_heartbeat_at = SystemTime::now();
            VoteResponse { term: inner.current_term, vote_granted: true }
        } else {
            VoteResponse { term: inner.current_term, vote_granted: false }
        }
    }

    /// Returns true if this node became leader as a result of this response.
    pub fn handle_vote_response(&self, from: RaftNodeId, resp: VoteResponse) -> bool {
        let mut inner = self.inner.write();
        if resp.term > inner.current_term {
            inner.current_term = resp.term;
            inner.state = RaftState::Follower;
            inner.voted_for = None;
            return false;
        }
        if inner.state != RaftState::Candidate || resp.term != inner.current_term {
            return false;
        }
        inner.votes_received.insert(from, resp.vote_granted);
        if self.config.has_quorum(&inner.votes_received) {
            inner.state = RaftState::Leader;
            inner.leader_id = Some(self.id);
            let next = inner.log.last_index() + 1;
            for peer in &self.config.members {
                if *peer != self.id {
                    inner.next_index.insert(*peer, next);
                    inner.match_index.insert(*peer, 0);
                }
            }
            return true;
        }
        false
    }

    pub fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut inner = self.inner.write();
        if req.term < inner.current_term {
            return AppendEntriesResponse { term: inner.current_term, success: false, match_index: None };
        }
        inner.current_term = req.term;
        inner.state = RaftState::Follower;
        inner.leader_id = Some(req.leader_id);
        inner.last_heartbeat_at = SystemTime::now();

        if req.prev_log_index > 0 {
            match inner.log.get(req.prev_log_index) {
                Some(entry) if entry.term == req.prev_log_term => {}
                _ => return AppendEntriesResponse { term: inner.current_term, success: false, match_index: None },
            }
        }

        inner.log.truncate_from(req.prev_log_index + 1);
        inner.log.entries.extend(req.entries);

        if req.leader_commit > inner.commit_index {
            inner.commit_index = req.leader_commit.min(inner.log.last_index());
        }

        AppendEntriesResponse {
            term: inner.current_term,
            success: true,
            match_index: Some(inner.log.last_index()),
        }
    }

    /// Leader-only: append a client command to the local log; the caller
    /// replicates it to peers via `send_append_entries`. Returns the new
    /// command's log index, or a `NotLeader` error including the current
    /// leader's id for the caller to redirect (spec 4.A command semantics).
    pub fn append_command(&self, command: Vec<u8>) -> Result<LogIndex> {
        let mut inner = self.inner.write();
        if inner.state != RaftState::Leader {
            return Err(RdbError::NotLeader {
                leader_addr: inner.leader_id.map(|id| id.to_string()),
                reason: "this node is not the raft leader".into(),
            });
        }
        let index = inner.log.last_index() + 1;
        let term = inner.current_term;
        inner.log.entries.push(LogEntry { term, index, command });
        Ok(index)
    }

    pub fn commit_index(&self) -> LogIndex {
        self.inner.read().commit_index
    }

    /// Leader-only: advance commit_index to the highest index replicated to
    /// a quorum of peers, given each peer's reported match_index.
    pub fn advance_commit_index(&self) {
        let mut inner = self.inner.write();
        if inner.state != RaftState::Leader {
            return;
        }
        let mut indices: Vec<LogIndex> = inner.match_index.values().copied().collect();
        indices.push(inner.log.last_index());
        indices.sort_unstable();
        let quorum_index = indices[indices.len() / 2];
        if quorum_index > inner.commit_index {
            if let Some(entry) = inner.log.get(quorum_index) {
                if entry.term == inner.current_term {
                    inner.commit_index = quorum_index;
                }
            }
        }
    }

    pub fn record_peer_match(&self, peer: RaftNodeId, match_index: LogIndex) {
        let mut inner = self.inner.write();
        inner.match_index.insert(peer, match_index);
        inner.next_index.insert(peer, match_index + 1);
    }

    pub fn entries_since(&self, index: LogIndex) -> Vec<LogEntry> {
        let inner = self.inner.read();
        inner
            .log
            .entries
            .iter()
            .filter(|e| e.index > index)
            .cloned()
            .collect()
    }

    pub fn millis_since_last_heartbeat(&self) -> u128 {
        let inner = self.inner.read();
        SystemTime::now()
            .duration_since(inner.last_heartbeat_at)
            .unwrap_or_default()
            .as_millis()
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Async transport a [`RaftNode`] driver uses to reach peers. Production
/// deployments implement this over the wire protocol in `crate::wire`; tests
/// use an in-process channel-backed transport.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_vote_request(&self, peer: RaftNodeId, req: VoteRequest) -> Result<VoteResponse>;
    async fn send_append_entries(
        &self,
        peer: RaftNodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;
}

pub type SharedRaftNode = Arc<RaftNode>;

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_cluster() -> (SharedRaftNode, SharedRaftNode, SharedRaftNode) {
        let cfg = ClusterConfiguration { members: vec![1, 2, 3] };
        (
            Arc::new(RaftNode::new(1, cfg.clone())),
            Arc::new(RaftNode::new(2, cfg.clone())),
            Arc::new(RaftNode::new(3, cfg)),
        )
    }

    #[test]
    fn election_reaches_quorum_and_becomes_leader() {
        let (n1, n2, n3) = three_node_cluster();
        let req = n1.start_election();
        let r2 = n2.handle_vote_request(req.clone());
        let r3 = n3.handle_vote_request(req);
        assert!(r2.vote_granted);
        assert!(r3.vote_granted);
        let became_leader_on_r2 = n1.handle_vote_response(2, r2);
        let became_leader_on_r3 = n1.handle_vote_response(3, r3);
        assert!(became_leader_on_r2 || became_leader_on_r3);
        assert_eq!(n1.state(), RaftState::Leader);
    }

    #[test]
    fn stale_term_vote_request_rejected() {
        let (n1, n2, _n3) = three_node_cluster();
        let mut req = n1.start_election();
        // n2 has already seen a higher term.
        n2.handle_append_entries(AppendEntriesRequest {
            term: 99,
            leader_id: 3,
            prev_log_index: 0,
            prev_log_term: 0,
            entries: vec![],
            leader_commit: 0,
        });
        req.term = 1;
        let resp = n2.handle_vote_request(req);
        assert!(!resp.vote_granted);
    }

    #[test]
    fn non_leader_cannot_append_commands() {
        let (n1, _n2, _n3) = three_node_cluster();
        let err = n1.append_command(vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, RdbError::NotLeader { .. }));
    }

    #[test]
    fn leader_commits_after_quorum_replication() {
        let (n1, _n2, _n3) = three_node_cluster();
        let req = n1.start_election();
        let r2 = VoteResponse { term: req.term, vote_granted: true };
        n1.handle_vote_response(2, r2);
        let r3 = VoteResponse { term: req.term, vote_granted: true };
        n1.handle_vote_response(3, r3);
        assert!(n1.is_leader());

        let idx = n1.append_command(b"cmd".to_vec()).unwrap();
        n1.record_peer_match(2, idx);
        n1.record_peer_match(3, idx);
        n1.advance_commit_index();
        assert_eq!(n1.commit_index(), idx);
    }
}
