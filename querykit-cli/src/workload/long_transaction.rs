// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Long transaction demo
//!
//! Several workers start one after another and each increments the same
//! counter in a serializable transaction that stays open while the worker
//! "thinks". Overlapping transactions lose at commit time with a conflict
//! and are run again by the retry coordinator, so the counter always ends up
//! equal to the number of workers that succeeded.

use crate::repository::statements::{
    CREATE_COUNTER, DROP_COUNTER, SELECT_COUNTER, UPSERT_COUNTER,
};
use super::AttemptOutcome;
use async_trait::async_trait;
use querykit::{
    expect_single, read_all, Context, Error, Params, QueryHelper, Result, ResultBuffer, Row,
    Session, Transaction, TxControl, TxSettings, UnitOfWork,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const COUNTER_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentionConfig {
    pub workers: usize,
    /// Delay between worker starts
    pub interval: Duration,
    /// How long each transaction stays open between its read and its write
    pub hold: Duration,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            interval: Duration::from_secs(1),
            hold: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct WorkerReport {
    pub worker: usize,
    pub attempts: u32,
    /// Counter value written by the successful attempt
    pub result: Result<i64>,
}

#[derive(Debug)]
pub struct ContentionReport {
    pub workers: Vec<WorkerReport>,
    pub final_value: i64,
}

impl ContentionReport {
    pub fn succeeded(&self) -> usize {
        self.workers.iter().filter(|w| w.result.is_ok()).count()
    }

    pub fn total_attempts(&self) -> u32 {
        self.workers.iter().map(|w| w.attempts).sum()
    }
}

/// Read the counter, hold the transaction open, write the counter plus one
struct IncrementCounter {
    worker: usize,
    hold: Duration,
    attempts: AtomicU32,
}

#[async_trait]
impl UnitOfWork<i64> for IncrementCounter {
    async fn run(
        &self,
        ctx: &Context,
        session: &mut dyn Session,
        rows: &mut ResultBuffer<i64>,
    ) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tx = session.begin(ctx, TxSettings::serializable_rw()).await?;

        let val = read_counter(ctx, tx.as_mut()).await?;
        ctx.sleep(self.hold).await?;
        let result = tx
            .exec_commit(ctx, UPSERT_COUNTER, &counter_params(val + 1))
            .await;

        log::info!(
            "worker: {}, attempt: {}, val: {}, result: {}",
            self.worker,
            attempt,
            val,
            AttemptOutcome::of(&result).as_str()
        );
        result?;
        rows.append(val + 1);
        Ok(())
    }
}

fn counter_params(val: i64) -> Params {
    Params::new().with("id", COUNTER_ID).with("val", val)
}

async fn read_counter(ctx: &Context, tx: &mut dyn Transaction) -> Result<i64> {
    let mut stream = tx
        .query(ctx, SELECT_COUNTER, &Params::new().with("id", COUNTER_ID))
        .await?;
    let rows = read_all(ctx, stream.as_mut()).await?;
    expect_single(rows)?.get_i64("val")
}

/// Recreate the counter table with the counter at zero
pub async fn prepare(ctx: &Context, helper: &QueryHelper) -> Result<()> {
    helper.execute(ctx, DROP_COUNTER, &Params::new()).await?;
    helper.execute(ctx, CREATE_COUNTER, &Params::new()).await?;
    helper
        .idempotent(true)
        .execute_tx(ctx, UPSERT_COUNTER, TxControl::serializable_rw(), &counter_params(0))
        .await
}

pub async fn current_value(ctx: &Context, helper: &QueryHelper) -> Result<i64> {
    helper
        .idempotent(true)
        .query_single(
            ctx,
            SELECT_COUNTER,
            TxControl::snapshot_ro(),
            &Params::new().with("id", COUNTER_ID),
            |row: &Row| row.get_i64("val"),
        )
        .await
}

/// Start the workers, wait for all of them and read the final counter
pub async fn run(
    ctx: &Context,
    helper: &QueryHelper,
    config: &ContentionConfig,
) -> Result<ContentionReport> {
    let mut handles = Vec::with_capacity(config.workers);

    for worker in 1..=config.workers {
        if worker > 1 {
            ctx.sleep(config.interval).await?;
        }
        let helper = helper.idempotent(true);
        let ctx = ctx.clone();
        let unit = Arc::new(IncrementCounter {
            worker,
            hold: config.hold,
            attempts: AtomicU32::new(0),
        });
        log::debug!("starting worker {}", worker);

        handles.push(tokio::spawn(async move {
            let result = helper.run(&ctx, unit.as_ref()).await.and_then(expect_single);
            let attempts = unit.attempts.load(Ordering::SeqCst);
            match &result {
                Ok(_) => log::info!("retry completed for worker: {}, attempts: {}", worker, attempts),
                Err(err) => log::warn!(
                    "retry failed for worker: {}, attempts: {}, error: {}",
                    worker,
                    attempts,
                    err
                ),
            }
            WorkerReport {
                worker,
                attempts,
                result,
            }
        }));
    }

    let mut workers = Vec::with_capacity(handles.len());
    for handle in handles {
        let report = handle
            .await
            .map_err(|err| Error::Application(format!("worker task failed: {}", err)))?;
        workers.push(report);
    }

    let final_value = current_value(ctx, helper).await?;
    Ok(ContentionReport {
        workers,
        final_value,
    })
}
