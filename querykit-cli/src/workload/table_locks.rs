// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Whole-table locks demo
//!
//! One worker aggregates every row of a table in a serializable transaction
//! while writers keep upserting single rows. The aggregate depends on the
//! whole table, so any write committed while the scan is open invalidates it:
//! the scan loses at commit with a conflict and is run again, until an attempt
//! fits between writes.

use super::AttemptOutcome;
use crate::repository::statements::{
    CREATE_LOCKS_TABLE, DROP_LOCKS_TABLE, FILL_LOCKS_TABLE, SUM_LOCKS_TABLE, UPSERT_LOCKS_ROW,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use querykit::{
    expect_single, read_all, Context, Error, Params, QueryHelper, Result, ResultBuffer, Row,
    Session, Transaction, TxControl, TxSettings, UnitOfWork, Value,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FILL_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLocksConfig {
    /// Rows in the table before the demo starts
    pub rows: usize,
    /// Aggregates run one after another by the scanning worker
    pub scans: usize,
    pub writers: usize,
    pub writes_per_writer: usize,
    /// Delay before each single-row write
    pub write_interval: Duration,
    /// How long the scan transaction stays open after reading
    pub scan_hold: Duration,
}

impl Default for TableLocksConfig {
    fn default() -> Self {
        Self {
            rows: 10_000,
            scans: 3,
            writers: 4,
            writes_per_writer: 20,
            write_interval: Duration::from_millis(100),
            scan_hold: Duration::from_millis(500),
        }
    }
}

/// Result of one full-table aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableTotal {
    pub row_count: i64,
    pub total: i64,
}

impl TableTotal {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            row_count: row.get_i64("row_count")?,
            total: row.get_i64("total")?,
        })
    }
}

#[derive(Debug)]
pub struct ScanReport {
    pub scan: usize,
    pub outcomes: Vec<AttemptOutcome>,
    pub result: Result<TableTotal>,
}

impl ScanReport {
    pub fn attempts(&self) -> usize {
        self.outcomes.len()
    }

    pub fn conflicts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| **outcome == AttemptOutcome::Conflict)
            .count()
    }
}

#[derive(Debug)]
pub struct TableLocksReport {
    pub scans: Vec<ScanReport>,
    /// Single-row writes committed by all writers
    pub writes: usize,
    pub final_total: TableTotal,
}

impl TableLocksReport {
    pub fn succeeded(&self) -> usize {
        self.scans.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn total_conflicts(&self) -> usize {
        self.scans.iter().map(ScanReport::conflicts).sum()
    }
}

/// Aggregate the whole table, hold the transaction open, then commit
struct SumTable {
    scan: usize,
    hold: Duration,
    attempts: AtomicU32,
    outcomes: Mutex<Vec<AttemptOutcome>>,
}

impl SumTable {
    async fn attempt(&self, ctx: &Context, session: &mut dyn Session) -> Result<TableTotal> {
        let mut tx = session.begin(ctx, TxSettings::serializable_rw()).await?;
        let total = read_total(ctx, tx.as_mut()).await?;
        ctx.sleep(self.hold).await?;
        tx.commit(ctx).await?;
        Ok(total)
    }
}

#[async_trait]
impl UnitOfWork<TableTotal> for SumTable {
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<TableTotal>,
    ) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.attempt(ctx, session).await;
        let outcome = AttemptOutcome::of(&result);
        self.outcomes.lock().push(outcome);

        log::info!(
            "scan: {}, attempt: {}, result: {}",
            self.scan,
            attempt,
            outcome.as_str()
        );
        rows.append(result?);
        Ok(())
    }
}

async fn read_total(ctx: &Context, tx: &mut dyn Transaction) -> Result<TableTotal> {
    let mut stream = tx.query(ctx, SUM_LOCKS_TABLE, &Params::new()).await?;
    let rows = read_all(ctx, stream.as_mut()).await?;
    TableTotal::from_row(&expect_single(rows)?)
}

fn fill_batch(ids: std::ops::Range<usize>) -> Params {
    let rows = ids
        .map(|id| {
            let id = id as i64;
            Value::Struct(vec![
                ("id".to_string(), Value::Int64(id)),
                ("val".to_string(), Value::Int64(id * 100)),
            ])
        })
        .collect();
    Params::new().with("rows", Value::List(rows))
}

/// Recreate the table with `rows` rows, `val = id * 100`
pub async fn prepare(ctx: &Context, helper: &QueryHelper, rows: usize) -> Result<()> {
    helper.execute(ctx, DROP_LOCKS_TABLE, &Params::new()).await?;
    helper.execute(ctx, CREATE_LOCKS_TABLE, &Params::new()).await?;

    let helper = helper.idempotent(true);
    let mut start = 0;
    while start < rows {
        let end = (start + FILL_BATCH).min(rows);
        helper
            .execute_tx(ctx, FILL_LOCKS_TABLE, TxControl::serializable_rw(), &fill_batch(start..end))
            .await?;
        start = end;
    }
    log::debug!("filled whole-table-locks table with {} rows", rows);
    Ok(())
}

/// Aggregate read from a snapshot, never invalidated
pub async fn current_total(ctx: &Context, helper: &QueryHelper) -> Result<TableTotal> {
    helper
        .idempotent(true)
        .query_single(
            ctx,
            SUM_LOCKS_TABLE,
            TxControl::snapshot_ro(),
            &Params::new(),
            TableTotal::from_row,
        )
        .await
}

async fn write_rows(
    ctx: Context,
    helper: QueryHelper,
    writer: usize,
    config: TableLocksConfig,
) -> Result<usize> {
    let mut rng = fastrand::Rng::with_seed(writer as u64);
    let rows = config.rows.max(1) as i64;
    for write in 0..config.writes_per_writer {
        ctx.sleep(config.write_interval).await?;
        let params = Params::new()
            .with("id", rng.i64(0..rows))
            .with("val", rng.i64(0..1_000_000));
        helper
            .execute_tx(&ctx, UPSERT_LOCKS_ROW, TxControl::serializable_rw(), &params)
            .await?;
        log::debug!("writer: {}, write: {}", writer, write + 1);
    }
    Ok(config.writes_per_writer)
}

/// Start the writers, run the scans against them, then read the final total
pub async fn run(
    ctx: &Context,
    helper: &QueryHelper,
    config: &TableLocksConfig,
) -> Result<TableLocksReport> {
    let mut writers = Vec::with_capacity(config.writers);
    for writer in 1..=config.writers {
        let helper = helper.idempotent(true);
        writers.push(tokio::spawn(write_rows(ctx.clone(), helper, writer, *config)));
    }

    let scanner = helper.idempotent(true);
    let mut scans = Vec::with_capacity(config.scans);
    for scan in 1..=config.scans {
        let unit = Arc::new(SumTable {
            scan,
            hold: config.scan_hold,
            attempts: AtomicU32::new(0),
            outcomes: Mutex::new(Vec::new()),
        });
        let result = scanner.run(ctx, unit.as_ref()).await.and_then(expect_single);
        let outcomes = std::mem::take(&mut *unit.outcomes.lock());
        match &result {
            Ok(total) => log::info!(
                "scan {} completed after {} attempts, total: {}",
                scan,
                outcomes.len(),
                total.total
            ),
            Err(err) => log::warn!(
                "scan {} failed after {} attempts, error: {}",
                scan,
                outcomes.len(),
                err
            ),
        }
        scans.push(ScanReport {
            scan,
            outcomes,
            result,
        });
    }

    let mut writes = 0;
    for handle in writers {
        writes += handle
            .await
            .map_err(|err| Error::Application(format!("writer task failed: {}", err)))??;
    }

    let final_total = current_total(ctx, helper).await?;
    Ok(TableLocksReport {
        scans,
        writes,
        final_total,
    })
}
