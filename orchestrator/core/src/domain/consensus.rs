// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Domain
//!
//! Proposals, votes and the pure decision rules behind every consensus
//! algorithm. The engine in `application::consensus_engine` owns the live
//! proposals; this module only answers "given these votes, what is decided?".
//!
//! ## Proposal State Machine
//!
//! ```text
//! proposed -> voting -> decided   (terminal)
//!                    -> aborted   (terminal)
//! ```
//!
//! ## Decision Rules
//!
//! Votes for an option literally named `abstain` never count as cast.
//!
//! | Algorithm | Decides when | Aborts when |
//! |-----------|--------------|-------------|
//! | `majority` | an option holds > 50% of cast votes | tie or no majority once voting closes |
//! | `weighted` | one option has the highest weighted sum | tie at the top |
//! | `byzantine` | an option reaches n - f votes, f = (n-1)/3 (so more than two thirds of n) | fewer than n - f agree once voting closes |
//! | `unanimous` | every eligible voter chose the same option | any dissent |
//! | `quorum` | the quorum fraction has voted and a strict majority of those agree | quorum missed or no majority |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::repository::StorageError;
use crate::domain::swarm::SwarmId;
use crate::domain::ParseEnumError;

pub const ABSTAIN: &str = "abstain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub Uuid);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusAlgorithm {
    #[default]
    Majority,
    Weighted,
    Byzantine,
    Unanimous,
    Quorum,
}

impl ConsensusAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusAlgorithm::Majority => "majority",
            ConsensusAlgorithm::Weighted => "weighted",
            ConsensusAlgorithm::Byzantine => "byzantine",
            ConsensusAlgorithm::Unanimous => "unanimous",
            ConsensusAlgorithm::Quorum => "quorum",
        }
    }
}

impl FromStr for ConsensusAlgorithm {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "majority" => Ok(ConsensusAlgorithm::Majority),
            "weighted" => Ok(ConsensusAlgorithm::Weighted),
            "byzantine" => Ok(ConsensusAlgorithm::Byzantine),
            "unanimous" => Ok(ConsensusAlgorithm::Unanimous),
            "quorum" => Ok(ConsensusAlgorithm::Quorum),
            other => Err(ParseEnumError::new("consensus algorithm", other)),
        }
    }
}

impl fmt::Display for ConsensusAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Voting,
    Decided,
    Aborted,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Voting => "voting",
            ProposalStatus::Decided => "decided",
            ProposalStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Decided | ProposalStatus::Aborted)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: AgentId,
    pub choice: String,
    pub weight: f64,
    pub reason: Option<String>,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(agent_id: AgentId, choice: impl Into<String>, weight: f64) -> Self {
        Self {
            agent_id,
            choice: choice.into(),
            weight,
            reason: None,
            cast_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn is_abstain(&self) -> bool {
        self.choice == ABSTAIN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Tie,
    NoMajority,
    NoVotes,
    InsufficientAgreement,
    Dissent,
    QuorumNotReached,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::Tie => "tie between leading options",
            AbortReason::NoMajority => "no option holds a majority",
            AbortReason::NoVotes => "no votes were cast",
            AbortReason::InsufficientAgreement => "not enough agreeing votes",
            AbortReason::Dissent => "dissenting vote",
            AbortReason::QuorumNotReached => "quorum not reached",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// More votes may still change the outcome.
    Pending,
    Decided { choice: String, confidence: f64 },
    Aborted { reason: AbortReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidVoteReason {
    NotVoting(ProposalStatus),
    UnknownOption(String),
    NotEligible,
}

impl fmt::Display for InvalidVoteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidVoteReason::NotVoting(status) => write!(f, "proposal is {status}, not voting"),
            InvalidVoteReason::UnknownOption(choice) => write!(f, "'{choice}' is not a proposed option"),
            InvalidVoteReason::NotEligible => f.write_str("agent is not an eligible voter"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("vote by {agent_id} on {proposal_id} rejected: {reason}")]
pub struct InvalidVoteError {
    pub proposal_id: ProposalId,
    pub agent_id: AgentId,
    pub reason: InvalidVoteReason,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("consensus on '{topic}' ({proposal_id}) timed out at {deadline}: {reason}")]
pub struct ConsensusTimeoutError {
    pub proposal_id: ProposalId,
    pub topic: String,
    pub deadline: DateTime<Utc>,
    pub reason: AbortReason,
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error(transparent)]
    InvalidVote(#[from] InvalidVoteError),

    #[error(transparent)]
    Timeout(#[from] ConsensusTimeoutError),

    #[error("unknown proposal {0}")]
    UnknownProposal(ProposalId),

    #[error("invalid proposal: {0}")]
    InvalidProposal(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Tally of a proposal's votes.
///
/// `for_votes` counts the first option (the motion), `abstain` counts votes for
/// an option named `abstain`, `against` counts everything else and `pending`
/// counts eligible voters who have not voted yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteStatus {
    pub for_votes: usize,
    pub against: usize,
    pub abstain: usize,
    pub pending: usize,
    pub per_option: BTreeMap<String, usize>,
    pub weighted: BTreeMap<String, f64>,
    pub details: Vec<Vote>,
}

/// A topic under vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub swarm_id: SwarmId,
    pub topic: String,
    pub options: Vec<String>,
    pub algorithm: ConsensusAlgorithm,
    pub status: ProposalStatus,
    /// One entry per agent, in first-vote order.
    pub votes: Vec<Vote>,
    pub eligible_voters: BTreeSet<AgentId>,
    /// Minimum share of eligible voters for `quorum`.
    pub quorum_fraction: f64,
    pub proposed_by: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Proposal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        swarm_id: SwarmId,
        topic: impl Into<String>,
        options: Vec<String>,
        algorithm: ConsensusAlgorithm,
        eligible_voters: BTreeSet<AgentId>,
        quorum_fraction: f64,
        proposed_by: Option<AgentId>,
        deadline: DateTime<Utc>,
    ) -> Result<Self, ConsensusError> {
        let mut seen = BTreeSet::new();
        let options: Vec<String> = options
            .into_iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty() && seen.insert(o.clone()))
            .collect();

        if options.len() < 2 {
            return Err(ConsensusError::InvalidProposal(
                "a proposal needs at least two distinct options".to_string(),
            ));
        }
        if eligible_voters.is_empty() {
            return Err(ConsensusError::InvalidProposal(
                "a proposal needs at least one eligible voter".to_string(),
            ));
        }

        Ok(Self {
            id: ProposalId::new(),
            swarm_id,
            topic: topic.into(),
            options,
            algorithm,
            status: ProposalStatus::Proposed,
            votes: Vec::new(),
            eligible_voters,
            quorum_fraction: quorum_fraction.clamp(0.0, 1.0),
            proposed_by,
            created_at: Utc::now(),
            deadline,
        })
    }

    /// `proposed -> voting`
    pub fn open_voting(&mut self) {
        if self.status == ProposalStatus::Proposed {
            self.status = ProposalStatus::Voting;
        }
    }

    /// Records a vote; a second vote by the same agent replaces the first.
    pub fn cast(&mut self, vote: Vote) -> Result<(), InvalidVoteError> {
        let reject = |reason| InvalidVoteError {
            proposal_id: self.id,
            agent_id: vote.agent_id,
            reason,
        };

        if self.status != ProposalStatus::Voting {
            return Err(reject(InvalidVoteReason::NotVoting(self.status)));
        }
        if !self.options.iter().any(|o| *o == vote.choice) {
            return Err(reject(InvalidVoteReason::UnknownOption(vote.choice.clone())));
        }
        if !self.eligible_voters.contains(&vote.agent_id) {
            return Err(reject(InvalidVoteReason::NotEligible));
        }

        match self.votes.iter_mut().find(|v| v.agent_id == vote.agent_id) {
            Some(existing) => *existing = vote,
            None => self.votes.push(vote),
        }
        Ok(())
    }

    pub fn tally(&self) -> VoteStatus {
        let mut status = VoteStatus {
            details: self.votes.clone(),
            ..VoteStatus::default()
        };
        let motion = self.options.first();

        for vote in &self.votes {
            *status.per_option.entry(vote.choice.clone()).or_default() += 1;
            *status.weighted.entry(vote.choice.clone()).or_default() += vote.weight;

            if vote.is_abstain() {
                status.abstain += 1;
            } else if Some(&vote.choice) == motion {
                status.for_votes += 1;
            } else {
                status.against += 1;
            }
        }
        status.pending = self.remaining_voters();
        status
    }

    fn remaining_voters(&self) -> usize {
        self.eligible_voters
            .iter()
            .filter(|id| !self.votes.iter().any(|v| v.agent_id == **id))
            .count()
    }

    /// Applies the algorithm's decision rule.
    ///
    /// With `closing` set, voting is over (deadline or explicit close) and the
    /// result is never `Pending`.
    pub fn evaluate(&self, closing: bool) -> Resolution {
        let remaining = self.remaining_voters();
        let finished = closing || remaining == 0;

        let resolution = match self.algorithm {
            ConsensusAlgorithm::Majority => self.evaluate_majority(remaining, finished),
            ConsensusAlgorithm::Weighted => self.evaluate_weighted(finished),
            ConsensusAlgorithm::Byzantine => self.evaluate_byzantine(finished),
            ConsensusAlgorithm::Unanimous => self.evaluate_unanimous(finished),
            ConsensusAlgorithm::Quorum => self.evaluate_quorum(finished),
        };

        match resolution {
            Resolution::Pending if closing => Resolution::Aborted {
                reason: AbortReason::QuorumNotReached,
            },
            other => other,
        }
    }

    fn cast_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for vote in self.votes.iter().filter(|v| !v.is_abstain()) {
            *counts.entry(vote.choice.as_str()).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> =
            counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    fn evaluate_majority(&self, remaining: usize, finished: bool) -> Resolution {
        let counts = self.cast_counts();
        let cast: usize = counts.iter().map(|(_, c)| c).sum();
        let Some((leader, top)) = counts.first().cloned() else {
            return if finished {
                Resolution::Aborted { reason: AbortReason::NoVotes }
            } else {
                Resolution::Pending
            };
        };

        // Lead that survives every outstanding vote going elsewhere.
        if top * 2 > cast + remaining {
            return decided(leader, top as f64 / (cast + remaining) as f64);
        }
        if !finished {
            return Resolution::Pending;
        }
        if top * 2 > cast {
            return decided(leader, top as f64 / cast as f64);
        }
        let tied = counts.get(1).is_some_and(|(_, second)| *second == top);
        Resolution::Aborted {
            reason: if tied { AbortReason::Tie } else { AbortReason::NoMajority },
        }
    }

    fn evaluate_weighted(&self, finished: bool) -> Resolution {
        if !finished {
            return Resolution::Pending;
        }
        let mut sums: BTreeMap<&str, f64> = BTreeMap::new();
        for vote in self.votes.iter().filter(|v| !v.is_abstain()) {
            *sums.entry(vote.choice.as_str()).or_default() += vote.weight.max(0.0);
        }
        let total: f64 = sums.values().sum();
        if sums.is_empty() || total <= 0.0 {
            return Resolution::Aborted { reason: AbortReason::NoVotes };
        }

        let mut ranked: Vec<(&str, f64)> = sums.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        let (leader, top) = ranked[0];
        if ranked.get(1).is_some_and(|(_, second)| (top - second).abs() < f64::EPSILON) {
            return Resolution::Aborted { reason: AbortReason::Tie };
        }
        decided(leader.to_string(), top / total)
    }

    fn evaluate_byzantine(&self, finished: bool) -> Resolution {
        let voters = self.eligible_voters.len().max(self.votes.len());
        // n - f is floor(2n/3) + 1, which is every voter below four.
        let faulty = voters.saturating_sub(1) / 3;
        let required = voters - faulty;

        let counts = self.cast_counts();
        if let Some((leader, top)) = counts.first() {
            if *top >= required {
                return decided(leader.clone(), *top as f64 / voters as f64);
            }
        }
        if finished {
            let reason = if counts.is_empty() {
                AbortReason::NoVotes
            } else {
                AbortReason::InsufficientAgreement
            };
            Resolution::Aborted { reason }
        } else {
            Resolution::Pending
        }
    }

    fn evaluate_unanimous(&self, finished: bool) -> Resolution {
        let choices: BTreeSet<&str> = self.votes.iter().map(|v| v.choice.as_str()).collect();
        if choices.len() > 1 {
            return Resolution::Aborted { reason: AbortReason::Dissent };
        }
        let all_voted = self.remaining_voters() == 0;
        match choices.into_iter().next() {
            Some(choice) if all_voted && choice != ABSTAIN => decided(choice.to_string(), 1.0),
            Some(_) if all_voted => Resolution::Aborted { reason: AbortReason::NoVotes },
            _ if finished && self.votes.is_empty() => Resolution::Aborted { reason: AbortReason::NoVotes },
            _ if finished => Resolution::Aborted {
                reason: AbortReason::QuorumNotReached,
            },
            _ => Resolution::Pending,
        }
    }

    fn evaluate_quorum(&self, finished: bool) -> Resolution {
        let eligible = self.eligible_voters.len();
        let participation = self.votes.len() as f64 / eligible as f64;
        if participation + f64::EPSILON < self.quorum_fraction {
            return if finished {
                Resolution::Aborted {
                    reason: AbortReason::QuorumNotReached,
                }
            } else {
                Resolution::Pending
            };
        }

        let counts = self.cast_counts();
        let cast: usize = counts.iter().map(|(_, c)| c).sum();
        match counts.first() {
            None => Resolution::Aborted { reason: AbortReason::NoVotes },
            Some((leader, top)) if top * 2 > cast => decided(leader.clone(), *top as f64 / cast as f64),
            Some((_, top)) => {
                let tied = counts.get(1).is_some_and(|(_, second)| second == top);
                Resolution::Aborted {
                    reason: if tied { AbortReason::Tie } else { AbortReason::NoMajority },
                }
            }
        }
    }
}

fn decided(choice: String, confidence: f64) -> Resolution {
    Resolution::Decided {
        choice,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Decided,
    Aborted,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Decided => "decided",
            DecisionStatus::Aborted => "aborted",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decided" => Ok(DecisionStatus::Decided),
            "aborted" => Ok(DecisionStatus::Aborted),
            other => Err(ParseEnumError::new("decision status", other)),
        }
    }
}

/// Immutable record of a resolved proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub id: DecisionId,
    pub swarm_id: SwarmId,
    pub proposal_id: ProposalId,
    pub topic: String,
    pub options: Vec<String>,
    /// Chosen option; absent when the proposal was aborted.
    pub decision: Option<String>,
    pub status: DecisionStatus,
    pub abort_reason: Option<AbortReason>,
    pub votes: Vec<Vote>,
    pub algorithm: ConsensusAlgorithm,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl ConsensusDecision {
    pub fn from_proposal(proposal: &Proposal, resolution: &Resolution) -> Self {
        let (decision, status, abort_reason, confidence) = match resolution {
            Resolution::Decided { choice, confidence } => {
                (Some(choice.clone()), DecisionStatus::Decided, None, *confidence)
            }
            Resolution::Aborted { reason } => (None, DecisionStatus::Aborted, Some(*reason), 0.0),
            Resolution::Pending => (
                None,
                DecisionStatus::Aborted,
                Some(AbortReason::QuorumNotReached),
                0.0,
            ),
        };

        Self {
            id: DecisionId::new(),
            swarm_id: proposal.swarm_id,
            proposal_id: proposal.id,
            topic: proposal.topic.clone(),
            options: proposal.options.clone(),
            decision,
            status,
            abort_reason,
            votes: proposal.votes.clone(),
            algorithm: proposal.algorithm,
            confidence,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(algorithm: ConsensusAlgorithm, voters: usize) -> (Proposal, Vec<AgentId>) {
        let ids: Vec<AgentId> = (0..voters).map(|_| AgentId::new()).collect();
        let mut proposal = Proposal::new(
            SwarmId::new(),
            "adopt plan",
            vec!["for".to_string(), "against".to_string()],
            algorithm,
            ids.iter().copied().collect(),
            0.6,
            None,
            Utc::now() + chrono::Duration::seconds(30),
        )
        .unwrap();
        proposal.open_voting();
        (proposal, ids)
    }

    fn cast_all(proposal: &mut Proposal, ids: &[AgentId], choices: &[&str]) {
        for (id, choice) in ids.iter().zip(choices) {
            proposal.cast(Vote::new(*id, *choice, 1.0)).unwrap();
        }
    }

    #[test]
    fn test_majority_three_to_two_decides_for() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Majority, 5);
        cast_all(&mut p, &ids, &["for", "for", "for", "against", "against"]);
        match p.evaluate(false) {
            Resolution::Decided { choice, confidence } => {
                assert_eq!(choice, "for");
                assert!((confidence - 0.6).abs() < 1e-9);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn test_majority_tie_aborts() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Majority, 4);
        cast_all(&mut p, &ids, &["for", "for", "against", "against"]);
        assert_eq!(p.evaluate(false), Resolution::Aborted { reason: AbortReason::Tie });
    }

    #[test]
    fn test_majority_decides_early_when_lead_is_safe() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Majority, 5);
        cast_all(&mut p, &ids[..2], &["for", "for"]);
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[2], "for", 1.0)).unwrap();
        assert!(matches!(p.evaluate(false), Resolution::Decided { .. }));
    }

    #[test]
    fn test_byzantine_four_voters_needs_three() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Byzantine, 4);
        cast_all(&mut p, &ids, &["for", "for", "against", "against"]);
        assert_eq!(
            p.evaluate(false),
            Resolution::Aborted {
                reason: AbortReason::InsufficientAgreement
            }
        );

        let (mut p, ids) = proposal(ConsensusAlgorithm::Byzantine, 4);
        cast_all(&mut p, &ids[..3], &["for", "for", "for"]);
        assert!(matches!(p.evaluate(false), Resolution::Decided { ref choice, .. } if choice == "for"));
    }

    #[test]
    fn test_byzantine_small_swarms_need_every_voter() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Byzantine, 3);
        p.cast(Vote::new(ids[0], "for", 1.0)).unwrap();
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[1], "for", 1.0)).unwrap();
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[2], "for", 1.0)).unwrap();
        assert!(matches!(p.evaluate(false), Resolution::Decided { ref choice, .. } if choice == "for"));

        let (mut p, ids) = proposal(ConsensusAlgorithm::Byzantine, 2);
        p.cast(Vote::new(ids[0], "for", 1.0)).unwrap();
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[1], "against", 1.0)).unwrap();
        assert_eq!(
            p.evaluate(false),
            Resolution::Aborted {
                reason: AbortReason::InsufficientAgreement
            }
        );
    }

    #[test]
    fn test_byzantine_seven_voters_need_five() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Byzantine, 7);
        cast_all(&mut p, &ids[..4], &["for", "for", "for", "for"]);
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[4], "for", 1.0)).unwrap();
        assert!(matches!(p.evaluate(false), Resolution::Decided { .. }));
    }

    #[test]
    fn test_weighted_queen_outweighs_two_workers() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Weighted, 3);
        p.cast(Vote::new(ids[0], "against", 3.0)).unwrap();
        p.cast(Vote::new(ids[1], "for", 1.0)).unwrap();
        p.cast(Vote::new(ids[2], "for", 1.0)).unwrap();
        match p.evaluate(false) {
            Resolution::Decided { choice, confidence } => {
                assert_eq!(choice, "against");
                assert!((confidence - 0.6).abs() < 1e-9);
            }
            other => panic!("expected decision, got {other:?}"),
        }
    }

    #[test]
    fn test_unanimous_aborts_on_first_dissent() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Unanimous, 3);
        cast_all(&mut p, &ids[..2], &["for", "against"]);
        assert_eq!(p.evaluate(false), Resolution::Aborted { reason: AbortReason::Dissent });

        let (mut p, ids) = proposal(ConsensusAlgorithm::Unanimous, 3);
        cast_all(&mut p, &ids[..2], &["for", "for"]);
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[2], "for", 1.0)).unwrap();
        assert!(matches!(p.evaluate(false), Resolution::Decided { .. }));
    }

    #[test]
    fn test_quorum_waits_for_participation() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Quorum, 5);
        cast_all(&mut p, &ids[..2], &["for", "for"]);
        assert_eq!(p.evaluate(false), Resolution::Pending);
        p.cast(Vote::new(ids[2], "against", 1.0)).unwrap();
        assert!(matches!(p.evaluate(false), Resolution::Decided { ref choice, .. } if choice == "for"));
    }

    #[test]
    fn test_closing_without_votes_aborts() {
        for algorithm in [
            ConsensusAlgorithm::Majority,
            ConsensusAlgorithm::Weighted,
            ConsensusAlgorithm::Byzantine,
            ConsensusAlgorithm::Unanimous,
            ConsensusAlgorithm::Quorum,
        ] {
            let (p, _) = proposal(algorithm, 3);
            assert!(
                matches!(p.evaluate(true), Resolution::Aborted { .. }),
                "{algorithm} did not abort"
            );
        }
    }

    #[test]
    fn test_revote_overwrites() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Majority, 3);
        p.cast(Vote::new(ids[0], "for", 1.0)).unwrap();
        p.cast(Vote::new(ids[0], "against", 1.0).with_reason("changed my mind")).unwrap();
        assert_eq!(p.votes.len(), 1);
        assert_eq!(p.votes[0].choice, "against");
    }

    #[test]
    fn test_invalid_votes_rejected() {
        let (mut p, ids) = proposal(ConsensusAlgorithm::Majority, 2);
        let err = p.cast(Vote::new(ids[0], "maybe", 1.0)).unwrap_err();
        assert_eq!(err.reason, InvalidVoteReason::UnknownOption("maybe".to_string()));

        let err = p.cast(Vote::new(AgentId::new(), "for", 1.0)).unwrap_err();
        assert_eq!(err.reason, InvalidVoteReason::NotEligible);

        p.status = ProposalStatus::Decided;
        let err = p.cast(Vote::new(ids[0], "for", 1.0)).unwrap_err();
        assert_eq!(err.reason, InvalidVoteReason::NotVoting(ProposalStatus::Decided));
    }

    #[test]
    fn test_tally_splits_for_against_abstain() {
        let ids: Vec<AgentId> = (0..4).map(|_| AgentId::new()).collect();
        let mut p = Proposal::new(
            SwarmId::new(),
            "ship it",
            vec!["yes".into(), "no".into(), ABSTAIN.into()],
            ConsensusAlgorithm::Majority,
            ids.iter().copied().collect(),
            0.5,
            None,
            Utc::now(),
        )
        .unwrap();
        p.open_voting();
        cast_all(&mut p, &ids[..3], &["yes", "no", ABSTAIN]);

        let tally = p.tally();
        assert_eq!((tally.for_votes, tally.against, tally.abstain, tally.pending), (1, 1, 1, 1));
        assert_eq!(tally.details.len(), 3);
    }

    #[test]
    fn test_proposal_requires_two_options() {
        let err = Proposal::new(
            SwarmId::new(),
            "only one",
            vec!["yes".into(), "yes".into()],
            ConsensusAlgorithm::Majority,
            [AgentId::new()].into_iter().collect(),
            0.5,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidProposal(_)));
    }
}
