// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind consensus`: decision history and topology votes.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use hive_mind_core::domain::consensus::{ConsensusDecision, DecisionStatus};
use hive_mind_core::domain::swarm::Topology;
use hive_mind_swarm::application::queen::QueenCoordinator;

use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct ConsensusArgs {
    /// Swarm id or name (default: most recent active swarm)
    pub swarm: Option<String>,

    /// Put a topology change to a vote and apply it if it wins
    #[arg(long, value_name = "TOPOLOGY")]
    pub propose_topology: Option<Topology>,

    /// Show every vote of each decision
    #[arg(long)]
    pub votes: bool,

    /// Print decisions as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ConsensusArgs, ctx: &HiveMindContext) -> Result<()> {
    let swarm = ctx.resolve_swarm(args.swarm.as_deref()).await?;

    if let Some(topology) = args.propose_topology {
        println!(
            "Voting on topology change {} → {} (timeout {:?})...",
            swarm.topology, topology, ctx.config.consensus.voting_timeout
        );
        let queen = QueenCoordinator::attach(ctx.swarm_context(), swarm.id).await?;
        let decision = queen
            .propose_topology_change(topology)
            .await
            .context("Topology vote failed")?;
        print_decision(&decision, true);
        return Ok(());
    }

    let decisions = ctx.store.list_consensus_decisions(swarm.id).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&decisions)?);
        return Ok(());
    }
    if decisions.is_empty() {
        println!("{}", format!("No consensus decisions in swarm '{}'.", swarm.name).dimmed());
        return Ok(());
    }

    println!("{} {}", "Consensus decisions of".bold(), swarm.name.bold());
    for decision in &decisions {
        print_decision(decision, args.votes);
    }
    Ok(())
}

fn print_decision(decision: &ConsensusDecision, with_votes: bool) {
    let outcome = match (decision.status, &decision.decision) {
        (DecisionStatus::Decided, Some(choice)) => format!("→ {choice}").green(),
        _ => match decision.abort_reason {
            Some(reason) => format!("aborted ({reason})").red(),
            None => "aborted".red(),
        },
    };
    println!(
        "  {}  {:<32} {:<10} {}  confidence {:.2}  {} votes",
        decision.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
        decision.topic,
        decision.algorithm,
        outcome,
        decision.confidence,
        decision.votes.len()
    );
    if with_votes {
        for vote in &decision.votes {
            let reason = vote.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
            println!("      {} voted {} x{:.1}{}", vote.agent_id, vote.choice, vote.weight, reason.dimmed());
        }
    }
}
