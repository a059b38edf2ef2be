// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Result streams and the per-attempt materialization buffer
//!
//! Rows arrive from the store as a lazy stream of result-set parts. A stream
//! reports each step as a [`Production`] so that "no more data" and "the
//! stream failed" are never confused.
//!
//! Rows read during an attempt go into that attempt's [`ResultBuffer`]. The
//! coordinator creates a new buffer for every attempt and only hands the
//! rows to the caller when the attempt succeeded, so a stream that fails
//! half-way through can never leave rows behind for the next attempt.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::value::Row;
use async_trait::async_trait;

/// One step of a lazy stream
#[derive(Debug)]
pub enum Production<T> {
    /// Another item is available
    HasNext(T),
    /// The stream finished normally
    Exhausted,
    /// The stream failed; no further items will be produced
    Error(Error),
}

impl<T> Production<T> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Production::Exhausted)
    }
}

/// A chunk of rows belonging to one result set of a statement
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSetPart {
    /// Index of the result set within the statement's output
    pub index: usize,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// A complete result set, as produced by the store before streaming
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set, taking the column list from the first row
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.columns().map(str::to_string).collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Lazy, single-pass sequence of result-set parts
///
/// A stream cannot be restarted; reading the data again requires running the
/// statement again.
#[async_trait]
pub trait ResultStream: Send {
    async fn next(&mut self, ctx: &Context) -> Production<ResultSetPart>;
}

/// Attempt-scoped accumulator of materialized rows
#[derive(Debug)]
pub struct ResultBuffer<R> {
    rows: Vec<R>,
    attempt: u32,
}

impl<R> ResultBuffer<R> {
    /// A fresh, empty buffer owned by attempt number `attempt`
    pub(crate) fn for_attempt(attempt: u32) -> Self {
        Self {
            rows: Vec::new(),
            attempt,
        }
    }

    /// The attempt (1-based) this buffer belongs to
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Drop everything appended so far and start over with a new allocation
    pub fn reset(&mut self) {
        self.rows = Vec::new();
    }

    pub fn append(&mut self, row: R) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    /// Hand the rows over, consuming the buffer
    pub fn drain(self) -> Vec<R> {
        self.rows
    }
}

/// Read a result stream to the end, passing every row through `handler`
///
/// Returns the number of rows handled. The first stream or handler error
/// ends the read.
pub async fn materialize<R, F>(
    ctx: &Context,
    stream: &mut dyn ResultStream,
    buffer: &mut ResultBuffer<R>,
    handler: &F,
) -> Result<usize>
where
    F: Fn(&Row) -> Result<R> + ?Sized,
{
    let mut handled = 0;
    loop {
        match stream.next(ctx).await {
            Production::HasNext(part) => {
                for row in &part.rows {
                    buffer.append(handler(row)?);
                    handled += 1;
                }
            }
            Production::Exhausted => return Ok(handled),
            Production::Error(err) => return Err(err),
        }
    }
}

/// Read every row of a stream, for work running inside a transaction
pub async fn read_all(ctx: &Context, stream: &mut dyn ResultStream) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        match stream.next(ctx).await {
            Production::HasNext(part) => rows.extend(part.rows),
            Production::Exhausted => return Ok(rows),
            Production::Error(err) => return Err(err),
        }
    }
}
