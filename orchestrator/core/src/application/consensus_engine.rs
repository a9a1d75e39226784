// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consensus Engine - Application Layer
//!
//! Runs proposals for one swarm through `proposed -> voting -> decided|aborted`.
//! Open proposals live in memory only; resolved ones are committed to the
//! [`PersistentStore`] as immutable [`ConsensusDecision`] rows and announced
//! on the swarm bus.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Voting bookkeeping, deadlines and decision commit; the
//!   decision rules themselves live in `domain::consensus`

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::domain::agent::{Agent, AgentId, AgentRole, AgentStatus};
use crate::domain::consensus::{
    AbortReason, ConsensusAlgorithm, ConsensusDecision, ConsensusError, ConsensusTimeoutError,
    DecisionStatus, InvalidVoteError, InvalidVoteReason, Proposal, ProposalId, ProposalStatus,
    Resolution, Vote, VoteStatus,
};
use crate::domain::message::{topics, MessageType, SwarmMessage};
use crate::domain::repository::{retry_once, PersistentStore};
use crate::domain::swarm::SwarmId;
use crate::infrastructure::swarm_bus::SwarmBus;

pub const QUEEN_VOTE_WEIGHT: f64 = 3.0;
pub const WORKER_VOTE_WEIGHT: f64 = 1.0;

struct OpenProposal {
    proposal: Proposal,
    weights: HashMap<AgentId, f64>,
}

struct ClosedProposal {
    proposal: Proposal,
    weights: HashMap<AgentId, f64>,
    decision: ConsensusDecision,
}

#[derive(Default)]
struct Ledger {
    open: HashMap<ProposalId, OpenProposal>,
    closed: HashMap<ProposalId, ClosedProposal>,
}

#[derive(Clone)]
pub struct ConsensusEngine {
    store: Arc<dyn PersistentStore>,
    bus: SwarmBus,
    swarm_id: SwarmId,
    algorithm: ConsensusAlgorithm,
    voting_timeout: Duration,
    quorum_fraction: f64,
    ledger: Arc<Mutex<Ledger>>,
    resolved_signal: Arc<Notify>,
}

impl ConsensusEngine {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        bus: SwarmBus,
        swarm_id: SwarmId,
        algorithm: ConsensusAlgorithm,
    ) -> Self {
        Self {
            store,
            bus,
            swarm_id,
            algorithm,
            voting_timeout: Duration::from_secs(30),
            quorum_fraction: 0.6,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            resolved_signal: Arc::new(Notify::new()),
        }
    }

    pub fn with_voting_timeout(mut self, timeout: Duration) -> Self {
        self.voting_timeout = timeout;
        self
    }

    pub fn with_quorum_fraction(mut self, fraction: f64) -> Self {
        self.quorum_fraction = fraction;
        self
    }

    pub fn algorithm(&self) -> ConsensusAlgorithm {
        self.algorithm
    }

    /// Opens a vote among the swarm's live agents and returns its id.
    pub async fn propose(
        &self,
        topic: &str,
        options: Vec<String>,
        proposed_by: Option<AgentId>,
    ) -> Result<ProposalId, ConsensusError> {
        let agents = retry_once("list_agents", || self.store.list_agents(self.swarm_id)).await?;
        let voters: Vec<&Agent> = agents
            .iter()
            .filter(|a| !matches!(a.status, AgentStatus::Terminated | AgentStatus::Failed))
            .collect();

        let weights: HashMap<AgentId, f64> = voters
            .iter()
            .map(|a| {
                let weight = match a.role {
                    AgentRole::Queen => QUEEN_VOTE_WEIGHT,
                    AgentRole::Worker => WORKER_VOTE_WEIGHT,
                };
                (a.id, weight)
            })
            .collect();
        let eligible: BTreeSet<AgentId> = weights.keys().copied().collect();

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.voting_timeout).unwrap_or_else(|_| chrono::Duration::seconds(30));

        let mut proposal = Proposal::new(
            self.swarm_id,
            topic,
            options,
            self.algorithm,
            eligible,
            self.quorum_fraction,
            proposed_by,
            deadline,
        )?;
        proposal.open_voting();
        let id = proposal.id;

        self.publish(
            proposed_by,
            json!({
                "event": "proposed",
                "proposal_id": id,
                "topic": proposal.topic,
                "options": proposal.options,
                "algorithm": self.algorithm.as_str(),
                "deadline": deadline,
            }),
        );
        info!(swarm_id = %self.swarm_id, proposal_id = %id, topic, "Consensus proposal opened");

        self.ledger.lock().open.insert(id, OpenProposal { proposal, weights });
        Ok(id)
    }

    /// Casts a vote with the agent's role weight.
    ///
    /// Returns the decision when this vote resolved the proposal.
    pub async fn vote(
        &self,
        agent_id: AgentId,
        proposal_id: ProposalId,
        choice: &str,
        reason: Option<String>,
    ) -> Result<Option<ConsensusDecision>, ConsensusError> {
        self.cast(agent_id, proposal_id, choice, reason, None).await
    }

    /// Like [`vote`](Self::vote) with an explicit weight.
    pub async fn vote_weighted(
        &self,
        agent_id: AgentId,
        proposal_id: ProposalId,
        choice: &str,
        weight: f64,
        reason: Option<String>,
    ) -> Result<Option<ConsensusDecision>, ConsensusError> {
        self.cast(agent_id, proposal_id, choice, reason, Some(weight)).await
    }

    async fn cast(
        &self,
        agent_id: AgentId,
        proposal_id: ProposalId,
        choice: &str,
        reason: Option<String>,
        weight: Option<f64>,
    ) -> Result<Option<ConsensusDecision>, ConsensusError> {
        let decision = {
            let mut ledger = self.ledger.lock();
            let Some(open) = ledger.open.get_mut(&proposal_id) else {
                return Err(match ledger.closed.get(&proposal_id) {
                    Some(closed) => InvalidVoteError {
                        proposal_id,
                        agent_id,
                        reason: InvalidVoteReason::NotVoting(closed.proposal.status),
                    }
                    .into(),
                    None => ConsensusError::UnknownProposal(proposal_id),
                });
            };

            let weight = weight
                .or_else(|| open.weights.get(&agent_id).copied())
                .unwrap_or(WORKER_VOTE_WEIGHT);
            let mut vote = Vote::new(agent_id, choice, weight);
            vote.reason = reason;
            open.proposal.cast(vote)?;

            match open.proposal.evaluate(false) {
                Resolution::Pending => None,
                resolution => Self::finalize(&mut ledger, proposal_id, &resolution),
            }
        };

        counter!("hive_mind_consensus_votes_total").increment(1);
        if let Some(decision) = &decision {
            self.commit_or_reopen(decision).await?;
        }
        Ok(decision)
    }

    /// Moves a proposal out of the open set and records its decision.
    fn finalize(ledger: &mut Ledger, proposal_id: ProposalId, resolution: &Resolution) -> Option<ConsensusDecision> {
        let OpenProposal { mut proposal, weights } = ledger.open.remove(&proposal_id)?;
        proposal.status = match resolution {
            Resolution::Decided { .. } => ProposalStatus::Decided,
            _ => ProposalStatus::Aborted,
        };
        let decision = ConsensusDecision::from_proposal(&proposal, resolution);
        ledger.closed.insert(
            proposal_id,
            ClosedProposal {
                proposal,
                weights,
                decision: decision.clone(),
            },
        );
        Some(decision)
    }

    pub fn get_vote_status(&self, proposal_id: ProposalId) -> Result<VoteStatus, ConsensusError> {
        let ledger = self.ledger.lock();
        ledger
            .open
            .get(&proposal_id)
            .map(|o| &o.proposal)
            .or_else(|| ledger.closed.get(&proposal_id).map(|c| &c.proposal))
            .map(Proposal::tally)
            .ok_or(ConsensusError::UnknownProposal(proposal_id))
    }

    pub fn get_proposal(&self, proposal_id: ProposalId) -> Option<Proposal> {
        self.ledger.lock().open.get(&proposal_id).map(|o| o.proposal.clone())
    }

    pub fn open_proposals(&self) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self.ledger.lock().open.values().map(|o| o.proposal.clone()).collect();
        proposals.sort_by_key(|p| p.created_at);
        proposals
    }

    pub fn resolved(&self, proposal_id: ProposalId) -> Option<ConsensusDecision> {
        self.ledger.lock().closed.get(&proposal_id).map(|c| c.decision.clone())
    }

    /// Closes every proposal whose deadline has passed.
    ///
    /// Votes already cast are evaluated one last time; proposals that still
    /// cannot be decided are aborted and reported as timeouts.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ConsensusTimeoutError>, ConsensusError> {
        let closed: Vec<(ConsensusDecision, DateTime<Utc>)> = {
            let mut ledger = self.ledger.lock();
            let overdue: Vec<ProposalId> = ledger
                .open
                .values()
                .filter(|o| o.proposal.deadline <= now)
                .map(|o| o.proposal.id)
                .collect();

            overdue
                .into_iter()
                .filter_map(|id| {
                    let open = ledger.open.get(&id)?;
                    let deadline = open.proposal.deadline;
                    let resolution = open.proposal.evaluate(true);
                    Self::finalize(&mut ledger, id, &resolution).map(|d| (d, deadline))
                })
                .collect()
        };

        let mut timeouts = Vec::new();
        let mut failure = None;
        for (decision, deadline) in closed {
            if let Err(e) = self.commit_or_reopen(&decision).await {
                failure.get_or_insert(e);
                continue;
            }
            if decision.status == DecisionStatus::Aborted {
                let err = ConsensusTimeoutError {
                    proposal_id: decision.proposal_id,
                    topic: decision.topic.clone(),
                    deadline,
                    reason: decision.abort_reason.unwrap_or(AbortReason::QuorumNotReached),
                };
                warn!(swarm_id = %self.swarm_id, error = %err, "Consensus timed out");
                timeouts.push(err);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(timeouts),
        }
    }

    /// Waits until the proposal resolves.
    ///
    /// At the deadline the proposal is closed; if that aborts it the call
    /// fails with [`ConsensusTimeoutError`].
    pub async fn await_decision(&self, proposal_id: ProposalId) -> Result<ConsensusDecision, ConsensusError> {
        loop {
            let notified = self.resolved_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let ledger = self.ledger.lock();
                if let Some(closed) = ledger.closed.get(&proposal_id) {
                    return Ok(closed.decision.clone());
                }
                match ledger.open.get(&proposal_id) {
                    Some(open) => open.proposal.deadline,
                    None => return Err(ConsensusError::UnknownProposal(proposal_id)),
                }
            };

            let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if tokio::time::timeout(remaining, notified).await.is_err() {
                let timeouts = self.expire_overdue(Utc::now()).await?;
                if let Some(err) = timeouts.into_iter().find(|t| t.proposal_id == proposal_id) {
                    return Err(err.into());
                }
            }
        }
    }

    /// Commits a freshly finalized decision.
    ///
    /// A decision the store rejects is not resolved: the proposal goes back
    /// to the open set with its votes, so the next vote or deadline sweep
    /// retries the commit.
    async fn commit_or_reopen(&self, decision: &ConsensusDecision) -> Result<(), ConsensusError> {
        let result = self.commit(decision).await;
        if result.is_err() {
            let mut ledger = self.ledger.lock();
            if let Some(ClosedProposal { mut proposal, weights, .. }) = ledger.closed.remove(&decision.proposal_id) {
                proposal.status = ProposalStatus::Voting;
                warn!(swarm_id = %self.swarm_id, proposal_id = %proposal.id, "Decision not persisted, voting reopened");
                ledger.open.insert(proposal.id, OpenProposal { proposal, weights });
            }
        }
        result
    }

    /// Persists a resolved decision and announces it.
    pub async fn commit(&self, decision: &ConsensusDecision) -> Result<(), ConsensusError> {
        retry_once("append_consensus_decision", || self.store.append_consensus_decision(decision)).await?;

        counter!("hive_mind_consensus_decisions_total", "status" => decision.status.as_str()).increment(1);
        info!(
            swarm_id = %self.swarm_id,
            proposal_id = %decision.proposal_id,
            status = decision.status.as_str(),
            decision = ?decision.decision,
            confidence = decision.confidence,
            "Consensus resolved"
        );

        self.publish(
            None,
            json!({
                "event": decision.status.as_str(),
                "proposal_id": decision.proposal_id,
                "decision_id": decision.id,
                "topic": decision.topic,
                "decision": decision.decision,
                "confidence": decision.confidence,
            }),
        );
        self.resolved_signal.notify_waiters();
        Ok(())
    }

    fn publish(&self, sender: Option<AgentId>, payload: serde_json::Value) {
        self.bus.publish(SwarmMessage::new(
            self.swarm_id,
            sender,
            MessageType::Consensus,
            topics::consensus(self.swarm_id),
            payload,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentType;
    use crate::domain::consensus::InvalidVoteReason;
    use crate::domain::swarm::{QueenType, Swarm, Topology};
    use crate::domain::repository::WriteBatch;
    use crate::infrastructure::repositories::InMemoryStore;

    async fn setup(algorithm: ConsensusAlgorithm, workers: usize) -> (ConsensusEngine, Arc<InMemoryStore>, Vec<AgentId>) {
        let store = Arc::new(InMemoryStore::new());
        let swarm = Swarm::new("c", "decide", QueenType::Strategic, Topology::Mesh, algorithm, workers as u32);
        let queen = Agent::queen(swarm.id, "queen");
        let mut ids = vec![queen.id];
        let mut batch = WriteBatch::new().swarm(swarm.clone()).agent(queen);
        for i in 0..workers {
            let worker = Agent::worker(swarm.id, format!("w{i}"), AgentType::Analyst);
            ids.push(worker.id);
            batch = batch.agent(worker);
        }
        store.commit(batch).await.unwrap();

        let engine = ConsensusEngine::new(store.clone(), SwarmBus::new(64), swarm.id, algorithm);
        (engine, store, ids)
    }

    fn options() -> Vec<String> {
        vec!["for".to_string(), "against".to_string()]
    }

    #[tokio::test]
    async fn test_majority_decides_and_persists() {
        let (engine, store, ids) = setup(ConsensusAlgorithm::Majority, 4).await;
        let proposal = engine.propose("scale up", options(), Some(ids[0])).await.unwrap();

        assert!(engine.vote(ids[0], proposal, "for", None).await.unwrap().is_none());
        assert!(engine.vote(ids[1], proposal, "for", None).await.unwrap().is_none());
        let decision = engine
            .vote(ids[2], proposal, "for", Some("more throughput".into()))
            .await
            .unwrap()
            .expect("three of five is an unassailable majority");

        assert_eq!(decision.decision.as_deref(), Some("for"));
        assert_eq!(decision.status, DecisionStatus::Decided);
        assert_eq!(decision.votes.len(), 3);

        let stored = store.list_consensus_decisions(decision.swarm_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, decision.id);

        let err = engine.vote(ids[3], proposal, "against", None).await.unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidVote(ref e) if matches!(e.reason, InvalidVoteReason::NotVoting(ProposalStatus::Decided))));
    }

    #[tokio::test]
    async fn test_queen_vote_is_weighted() {
        let (engine, _, ids) = setup(ConsensusAlgorithm::Weighted, 2).await;
        let proposal = engine.propose("topology", options(), None).await.unwrap();
        engine.vote(ids[0], proposal, "against", None).await.unwrap();
        engine.vote(ids[1], proposal, "for", None).await.unwrap();
        let decision = engine.vote(ids[2], proposal, "for", None).await.unwrap().unwrap();
        assert_eq!(decision.decision.as_deref(), Some("against"));
        assert!((decision.confidence - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_vote_status_tracks_pending() {
        let (engine, _, ids) = setup(ConsensusAlgorithm::Unanimous, 2).await;
        let proposal = engine.propose("merge", options(), None).await.unwrap();
        engine.vote(ids[1], proposal, "for", None).await.unwrap();

        let status = engine.get_vote_status(proposal).unwrap();
        assert_eq!(status.for_votes, 1);
        assert_eq!(status.pending, 2);
        assert_eq!(status.details[0].agent_id, ids[1]);
    }

    #[tokio::test]
    async fn test_expire_overdue_aborts_with_timeout() {
        let (engine, store, ids) = setup(ConsensusAlgorithm::Byzantine, 3).await;
        let proposal = engine.propose("risky", options(), None).await.unwrap();
        engine.vote(ids[0], proposal, "for", None).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        let timeouts = engine.expire_overdue(later).await.unwrap();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].proposal_id, proposal);

        let decision = engine.resolved(proposal).unwrap();
        assert_eq!(decision.status, DecisionStatus::Aborted);
        assert!(decision.decision.is_none());
        assert_eq!(store.list_consensus_decisions(decision.swarm_id).await.unwrap().len(), 1);
        assert!(engine.open_proposals().is_empty());
    }

    #[tokio::test]
    async fn test_unpersisted_decision_reopens_voting() {
        let (engine, store, ids) = setup(ConsensusAlgorithm::Majority, 2).await;
        let swarm = store.list_swarms().await.unwrap().remove(0);
        let proposal = engine.propose("migrate", options(), None).await.unwrap();
        engine.vote(ids[0], proposal, "for", None).await.unwrap();

        store.delete_swarm(swarm.id).await.unwrap();
        let err = engine.vote(ids[1], proposal, "for", None).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Storage(_)));
        assert!(engine.resolved(proposal).is_none());
        assert_eq!(engine.get_proposal(proposal).unwrap().status, ProposalStatus::Voting);
        assert_eq!(engine.get_vote_status(proposal).unwrap().for_votes, 2);

        store.create_swarm(&swarm).await.unwrap();
        let decision = engine.vote(ids[1], proposal, "for", None).await.unwrap().unwrap();
        assert_eq!(decision.decision.as_deref(), Some("for"));
        assert_eq!(store.list_consensus_decisions(swarm.id).await.unwrap().len(), 1);
        assert!(engine.open_proposals().is_empty());
    }

    #[tokio::test]
    async fn test_await_decision_times_out() {
        let (engine, _, _) = setup(ConsensusAlgorithm::Majority, 2).await;
        let engine = engine.with_voting_timeout(Duration::from_millis(50));
        let proposal = engine.propose("silent", options(), None).await.unwrap();

        let err = engine.await_decision(proposal).await.unwrap_err();
        assert!(matches!(err, ConsensusError::Timeout(ref t) if t.proposal_id == proposal));
    }

    #[tokio::test]
    async fn test_await_decision_wakes_on_vote() {
        let (engine, _, ids) = setup(ConsensusAlgorithm::Majority, 2).await;
        let proposal = engine.propose("quick", options(), None).await.unwrap();

        let waiter = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.await_decision(proposal).await })
        };
        tokio::task::yield_now().await;
        for id in &ids[..2] {
            engine.vote(*id, proposal, "for", None).await.unwrap();
        }

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision.decision.as_deref(), Some("for"));
    }

    #[tokio::test]
    async fn test_propose_rejects_single_option() {
        let (engine, _, _) = setup(ConsensusAlgorithm::Majority, 1).await;
        let err = engine.propose("x", vec!["only".into()], None).await.unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidProposal(_)));
    }
}
