// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `--monitor`: Prometheus endpoint plus a live feed of swarm traffic.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hive_mind_core::domain::message::{MessageType, SwarmMessage};
use hive_mind_core::infrastructure::swarm_bus::{BusError, SwarmBus};

pub fn install_exporter(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start Prometheus exporter")?;
    info!(%addr, "Serving metrics");
    Ok(())
}

/// Prints every message published on `bus` until `cancel` fires.
pub fn watch(bus: &SwarmBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut messages = bus.observe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = messages.recv() => match received {
                    Ok(message) => eprintln!("{}", render(&message)),
                    Err(BusError::Lagged(skipped)) => warn!(skipped, "Monitor fell behind"),
                    Err(_) => break,
                },
            }
        }
    })
}

fn render(message: &SwarmMessage) -> String {
    let kind = match message.message_type {
        MessageType::Task => "task".cyan(),
        MessageType::Status => "status".blue(),
        MessageType::Result => "result".green(),
        MessageType::Consensus => "consensus".magenta(),
        MessageType::Memory => "memory".yellow(),
        MessageType::Heartbeat => "heartbeat".dimmed(),
    };
    let sender = message
        .sender_id
        .map(|id| id.to_string()[..8].to_string())
        .unwrap_or_else(|| "queen".to_string());
    format!(
        "{} {:>9} {} {}",
        message.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        kind,
        sender,
        message.topic.dimmed()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watch_joins_cleanly_on_cancel() {
        let bus = SwarmBus::new(16);
        let cancel = CancellationToken::new();
        let watcher = watch(&bus, cancel.clone());

        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(1), watcher).await.unwrap();
        assert!(joined.is_ok());
    }
}
