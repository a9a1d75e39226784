// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive-mind memory`: inspect and maintain a swarm's collective memory.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use hive_mind_core::application::collective_memory::CollectiveMemory;
use hive_mind_core::domain::memory::{MemoryEntry, MemoryStats};

use crate::commands::status::truncate;
use crate::context::HiveMindContext;

#[derive(Args, Debug)]
pub struct MemoryArgs {
    /// Swarm id or name (default: most recent active swarm)
    pub swarm: Option<String>,

    /// Restrict to one namespace (default: every namespace)
    #[arg(long)]
    pub namespace: Option<String>,

    /// Key pattern; a trailing `*` matches a prefix, anything else a substring
    #[arg(long, value_name = "PATTERN")]
    pub search: Option<String>,

    /// Show statistics instead of entries
    #[arg(long)]
    pub stats: bool,

    /// Compress values above the configured threshold
    #[arg(long)]
    pub compress: bool,

    /// Evict entries beyond the configured memory size
    #[arg(long)]
    pub evict: bool,

    /// Print entries as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: MemoryArgs, ctx: &HiveMindContext) -> Result<()> {
    let swarm = ctx.resolve_swarm(args.swarm.as_deref()).await?;
    let memory = CollectiveMemory::new(ctx.store.clone(), ctx.bus.clone(), swarm.id)
        .with_namespace(ctx.config.memory.namespace.clone())
        .with_compression_threshold(ctx.config.memory.compression_threshold);

    if args.compress {
        let rewritten = memory.compress().await?;
        println!("{} {} entries compressed", "✓".green(), rewritten);
    }
    if args.evict {
        let removed = memory.evict(ctx.config.memory.memory_size).await?;
        println!(
            "{} {} entries evicted (limit {})",
            "✓".green(),
            removed,
            ctx.config.memory.memory_size
        );
    }
    if args.stats {
        print_stats(&memory.get_stats().await?, ctx.config.memory.memory_size);
        return Ok(());
    }
    if (args.compress || args.evict) && args.search.is_none() {
        return Ok(());
    }

    let pattern = args.search.as_deref().unwrap_or("*");
    let entries = memory.search_in(args.namespace.as_deref(), pattern).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("{}", "No matching memory entries.".dimmed());
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &MemoryEntry) {
    let value = serde_json::to_string(&entry.value).unwrap_or_default();
    println!(
        "  {}/{}  {}  conf {:.2}  {} reads{}",
        entry.namespace.dimmed(),
        entry.key.bold(),
        entry.memory_type.as_str().cyan(),
        entry.confidence,
        entry.access_count,
        if entry.compressed { "  [zstd]".dimmed().to_string() } else { String::new() }
    );
    println!("      {}", truncate(&value, 100));
}

fn print_stats(stats: &MemoryStats, limit: usize) {
    println!("{}", "Collective memory:".bold());
    println!("  Entries:     {} / {}", stats.total_entries, limit);
    println!("  Size:        {} bytes", stats.total_size);
    println!("  Compressed:  {}", stats.compressed_entries);
    println!("  Reads:       {}", stats.total_accesses);
    println!("  Confidence:  {:.2} avg", stats.average_confidence);
    if !stats.by_type.is_empty() {
        println!("  By type:");
        for (memory_type, count) in &stats.by_type {
            println!("    {memory_type:<14} {count}");
        }
    }
    if !stats.by_namespace.is_empty() {
        println!("  By namespace:");
        for (namespace, count) in &stats.by_namespace {
            println!("    {namespace:<14} {count}");
        }
    }
}
