// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! One-shot fault injection for the in-memory store

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Session acquisition
    Session,
    /// Statement execution without a result stream
    Exec,
    /// Statement execution that opens a result stream
    Query,
    /// Commit of an explicit or single-statement read-write transaction
    Commit,
    /// Inside a result stream, after `after_rows` rows were delivered
    Stream { after_rows: usize },
}

impl FaultPoint {
    fn same_kind(&self, other: &FaultPoint) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// FIFO of pending faults; each fires once
#[derive(Debug, Default)]
pub(crate) struct FaultQueue {
    pending: Mutex<VecDeque<(FaultPoint, Error)>>,
}

impl FaultQueue {
    pub(crate) fn push(&self, point: FaultPoint, error: Error) {
        self.pending.lock().push_back((point, error));
    }

    /// Fail with the oldest fault queued for `point`, consuming it
    pub(crate) fn check(&self, point: FaultPoint) -> Result<()> {
        match self.take(point) {
            Some((_, error)) => {
                log::debug!("injected fault at {:?}: {}", point, error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    /// Remove the oldest fault of the same kind as `point`
    ///
    /// For streams the queued `after_rows` is returned with the error.
    pub(crate) fn take(&self, point: FaultPoint) -> Option<(FaultPoint, Error)> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|(queued, _)| queued.same_kind(&point))?;
        pending.remove(index)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.pending.lock().clear();
    }
}
