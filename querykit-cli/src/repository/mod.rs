// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Repositories for the tutorial programs
//!
//! Each repository owns a [`querykit::QueryHelper`] and turns domain calls
//! into statements. Retries, sessions and result buffering stay inside the
//! helper.

pub mod issue;
pub mod schema;
pub mod statements;

pub use issue::{Issue, IssueLinkCount, IssueRepository};
pub use schema::SchemaRepository;

/// Where new issue ids come from
#[derive(Debug, Clone)]
pub enum IdSource {
    Random(fastrand::Rng),
    Sequential(i64),
}

impl IdSource {
    pub fn random() -> Self {
        IdSource::Random(fastrand::Rng::new())
    }

    pub fn seeded(seed: u64) -> Self {
        IdSource::Random(fastrand::Rng::with_seed(seed))
    }

    pub fn sequential(start: i64) -> Self {
        IdSource::Sequential(start)
    }

    /// Next id; always positive
    pub fn next_id(&mut self) -> i64 {
        match self {
            IdSource::Random(rng) => rng.i64(1..),
            IdSource::Sequential(next) => {
                let id = *next;
                *next += 1;
                id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut ids = IdSource::sequential(10);
        assert_eq!(ids.next_id(), 10);
        assert_eq!(ids.next_id(), 11);
    }

    #[test]
    fn test_seeded_ids_repeat() {
        let mut a = IdSource::seeded(7);
        let mut b = IdSource::seeded(7);
        for _ in 0..5 {
            let id = a.next_id();
            assert!(id > 0);
            assert_eq!(id, b.next_id());
        }
    }
}
