// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Command handlers

use super::output::{ContentionFormatter, IssueFormatter, TableLocksFormatter};
use crate::repository::statements::{register_counter, register_issues, register_table_locks};
use crate::repository::{IssueRepository, SchemaRepository};
use crate::workload::{long_transaction, table_locks, ContentionConfig, TableLocksConfig};
use colored::Colorize;
use querykit::{ClientConfig, Connector, Context, Error, MemoryStore, QueryHelper, Result};
use std::time::Duration;

const MEMORY_SCHEME: &str = "memory://";

/// Open the configured target and build a helper from the retry settings
///
/// Only `memory://<name>` targets are available in this binary; the store is
/// created on the spot with the tutorial statements registered.
pub async fn connect(config: &ClientConfig) -> Result<(MemoryStore, QueryHelper)> {
    let name = config.target.strip_prefix(MEMORY_SCHEME).ok_or_else(|| {
        Error::Connection(format!(
            "unsupported target '{}', expected {}<name>",
            config.target, MEMORY_SCHEME
        ))
    })?;
    let store = MemoryStore::new(name);
    register_issues(&store);
    register_counter(&store);
    register_table_locks(&store);

    let ctx = Context::background().with_timeout(config.connect_timeout());
    let connection = store.open(&ctx, &config.target).await?;
    log::debug!("connected to {}", config.target);
    Ok((store, QueryHelper::from_config(connection, &config.retry)))
}

/// Issue tracker walkthrough
pub async fn handle_issues(config: ClientConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (_store, helper) = connect(&config).await?;
    let ctx = Context::background();
    let schema = SchemaRepository::new(helper.clone());
    let issues = IssueRepository::new(helper);

    println!("{}", "Issue tracker".bold().green());
    println!("  → Recreating schema...");
    schema.drop_schema(&ctx).await?;
    schema.create_schema(&ctx).await?;

    println!("  → Adding issues...");
    let mut added = Vec::new();
    for n in 1..=3 {
        let issue = issues
            .add_issue(&ctx, &format!("Ticket {}", n), &format!("Author {}", n))
            .await?;
        added.push(issue);
    }
    print!("{}", IssueFormatter::format_issues(&issues.find_all(&ctx).await?));

    let first = &added[0];
    println!("  → Looking up issue {}...", first.id);
    let found = issues.find_by_id(&ctx, first.id).await?;
    println!("    {} by {}", found.title, found.author.as_deref().unwrap_or("nobody"));

    println!("  → Moving issue {} to 'in progress'...", first.id);
    issues.update_status(&ctx, first.id, "in progress").await?;

    println!("  → Linking issues {} and {} (interactive)...", added[0].id, added[1].id);
    let counts = issues.link_issues(&ctx, added[0].id, added[1].id).await?;
    print!("{}", IssueFormatter::format_link_counts(&counts));

    println!("  → Linking issues {} and {} (single call)...", added[1].id, added[2].id);
    let counts = issues.link_issues_batch(&ctx, added[1].id, added[2].id).await?;
    print!("{}", IssueFormatter::format_link_counts(&counts));

    match issues.find_by_id(&ctx, -1).await {
        Err(Error::NotFound(what)) => println!("  → Lookup of a missing issue: {} not found", what),
        Err(err) => return Err(err.into()),
        Ok(issue) => println!("  → Unexpected issue {}", issue.id),
    }

    print!("{}", IssueFormatter::format_issues(&issues.find_all(&ctx).await?));
    println!("{}", "Done".green());
    Ok(())
}

/// Write contention demo
pub async fn handle_long_transaction(
    config: ClientConfig,
    workers: usize,
    interval_ms: u64,
    hold_ms: u64,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (store, helper) = connect(&config).await?;
    let ctx = Context::background();
    let contention = ContentionConfig {
        workers,
        interval: Duration::from_millis(interval_ms),
        hold: Duration::from_millis(hold_ms),
    };

    println!("{}", "Write contention".bold().green());
    println!(
        "  → {} workers, {} ms apart, each holding its transaction for {} ms",
        workers, interval_ms, hold_ms
    );
    long_transaction::prepare(&ctx, &helper).await?;

    let report = long_transaction::run(&ctx, &helper, &contention).await?;
    print!("{}", ContentionFormatter::format(&report));
    print_store_stats(&store);
    Ok(())
}

/// Full-table aggregate against single-row writers
pub async fn handle_whole_table_locks(
    config: ClientConfig,
    locks: TableLocksConfig,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let (store, helper) = connect(&config).await?;
    let ctx = Context::background();

    println!("{}", "Whole-table locks".bold().green());
    println!("  → Filling table with {} rows...", locks.rows);
    table_locks::prepare(&ctx, &helper, locks.rows).await?;

    println!(
        "  → {} scans holding {} ms against {} writers, {} writes each every {} ms",
        locks.scans,
        locks.scan_hold.as_millis(),
        locks.writers,
        locks.writes_per_writer,
        locks.write_interval.as_millis()
    );
    let report = table_locks::run(&ctx, &helper, &locks).await?;
    print!("{}", TableLocksFormatter::format(&report));
    print_store_stats(&store);
    Ok(())
}

fn print_store_stats(store: &MemoryStore) {
    let stats = store.stats();
    println!(
        "Store: {} commits, {} conflicts, {} rollbacks",
        stats.commits, stats.conflicts, stats.rollbacks
    );
}

/// Print the resolved configuration as JSON
pub fn handle_config(config: ClientConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory_target() {
        let config = ClientConfig {
            target: "memory://cli".to_string(),
            ..ClientConfig::default()
        };
        let (store, _helper) = connect(&config).await.unwrap();
        assert_eq!(store.name(), "cli");
    }

    #[tokio::test]
    async fn test_connect_rejects_other_schemes() {
        let config = ClientConfig {
            target: "grpc://localhost:2136".to_string(),
            ..ClientConfig::default()
        };
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }
}
