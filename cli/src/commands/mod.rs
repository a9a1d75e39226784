// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Hive Mind CLI

pub mod consensus;
pub mod init;
pub mod memory;
pub mod metrics;
pub mod resume;
pub mod sessions;
pub mod spawn;
pub mod status;

pub use self::consensus::ConsensusArgs;
pub use self::init::InitArgs;
pub use self::memory::MemoryArgs;
pub use self::metrics::MetricsArgs;
pub use self::resume::ResumeArgs;
pub use self::sessions::SessionsArgs;
pub use self::spawn::SpawnArgs;
pub use self::status::StatusArgs;

use anyhow::{bail, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hive_mind_swarm::application::queen::{QueenCoordinator, RunOutcome};
use hive_mind_swarm::application::session::SessionManager;

use crate::context::HiveMindContext;
use crate::monitor;

/// Runs the queen's control loop in the foreground until the swarm finishes.
/// Ctrl-C pauses the swarm so it can be resumed later.
pub(crate) async fn drive(ctx: &HiveMindContext, queen: QueenCoordinator) -> Result<()> {
    let cancel = CancellationToken::new();
    let watcher = if ctx.options.monitor {
        monitor::install_exporter(ctx.config.observability.metrics_port)?;
        Some(monitor::watch(&ctx.bus, cancel.child_token()))
    } else {
        None
    };

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    println!("{}", "Swarm running. Press Ctrl-C to pause.".dimmed());
    let outcome = queen.run(cancel.clone()).await;
    cancel.cancel();
    if let Some(watcher) = watcher {
        if let Err(e) = watcher.await {
            warn!(error = %e, "Monitor task ended abnormally");
        }
    }

    match outcome? {
        RunOutcome::Completed => {
            let report = queen.status().await?;
            println!();
            println!("{}", "✓ Swarm completed".green().bold());
            status::print_report(&report);
            Ok(())
        }
        RunOutcome::Failed => bail!("Swarm {} failed", queen.swarm_id()),
        RunOutcome::Cancelled => {
            info!(swarm_id = %queen.swarm_id(), "Interrupted, pausing swarm");
            let session = SessionManager::new(ctx.swarm_context()).pause(queen.swarm_id()).await?;
            println!();
            println!(
                "{} ({}% complete)",
                "⏸ Swarm paused".yellow().bold(),
                session.completion_percentage
            );
            println!("  Resume with: hive-mind resume {}", session.id);
            Ok(())
        }
    }
}
