// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Issue tracker repository
//!
//! Linking two issues is available both as one interactive transaction with
//! three round trips ([`IssueRepository::link_issues`]) and as a single
//! multi-statement call ([`IssueRepository::link_issues_batch`]).

use super::statements::{
    INCREMENT_LINKS, INSERT_LINKS, LINK_ISSUES_BATCH, SELECT_ISSUES, SELECT_ISSUE_BY_ID,
    SELECT_LINK_COUNTS, UPDATE_STATUS, UPSERT_ISSUE,
};
use super::IdSource;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use querykit::{
    expect_single, materialize, tx_work, Context, Error, Params, QueryHelper, Result,
    ResultBuffer, Row, TxControl, TxSettings, Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub author: Option<String>,
    pub link_count: i64,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLinkCount {
    pub id: i64,
    pub link_count: i64,
}

impl IssueLinkCount {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("id")?,
            link_count: row.get_i64("link_count")?,
        })
    }
}

pub struct IssueRepository {
    helper: QueryHelper,
    ids: Mutex<IdSource>,
}

impl IssueRepository {
    pub fn new(helper: QueryHelper) -> Self {
        Self::with_ids(helper, IdSource::random())
    }

    pub fn with_ids(helper: QueryHelper, ids: IdSource) -> Self {
        Self {
            helper,
            ids: Mutex::new(ids),
        }
    }

    /// Create an issue with a fresh id
    ///
    /// The id is chosen before the first attempt, so a retried upsert writes
    /// the same row again.
    pub async fn add_issue(&self, ctx: &Context, title: &str, author: &str) -> Result<Issue> {
        let issue = Issue {
            id: self.ids.lock().next_id(),
            title: title.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
            author: Some(author.to_string()),
            link_count: 0,
            status: None,
        };
        let params = Params::new()
            .with("id", issue.id)
            .with("title", issue.title.as_str())
            .with("created_at", issue.created_at)
            .with("author", author);

        self.helper
            .idempotent(true)
            .execute_tx(ctx, UPSERT_ISSUE, TxControl::serializable_rw(), &params)
            .await?;
        log::info!("added issue {} '{}'", issue.id, issue.title);
        Ok(issue)
    }

    pub async fn find_by_id(&self, ctx: &Context, id: i64) -> Result<Issue> {
        let issues = self
            .helper
            .idempotent(true)
            .query_as::<Issue>(
                ctx,
                SELECT_ISSUE_BY_ID,
                TxControl::snapshot_ro(),
                &Params::new().with("id", id),
            )
            .await?;
        expect_single(issues).map_err(|err| match err {
            Error::NotFound(_) => Error::NotFound(format!("issue {}", id)),
            other => other,
        })
    }

    pub async fn find_all(&self, ctx: &Context) -> Result<Vec<Issue>> {
        self.helper
            .idempotent(true)
            .query_as::<Issue>(ctx, SELECT_ISSUES, TxControl::snapshot_ro(), &Params::new())
            .await
    }

    /// Set the status of an issue; a missing issue is left alone
    pub async fn update_status(&self, ctx: &Context, id: i64, status: &str) -> Result<()> {
        let params = Params::new().with("id", id).with("new_status", status);
        self.helper
            .idempotent(true)
            .execute_tx(ctx, UPDATE_STATUS, TxControl::serializable_rw(), &params)
            .await
    }

    /// Link two issues in one interactive transaction
    ///
    /// Declared non-idempotent, so a commit conflict is returned to the caller
    /// instead of being retried. Transport failures are still retried.
    pub async fn link_issues(&self, ctx: &Context, id1: i64, id2: i64) -> Result<Vec<IssueLinkCount>> {
        let params = link_params(id1, id2);
        let unit = tx_work(move |ctx, tx, rows: &mut ResultBuffer<IssueLinkCount>| {
            let params = params.clone();
            Box::pin(async move {
                tx.exec(ctx, INCREMENT_LINKS, &params).await?;
                tx.exec(ctx, INSERT_LINKS, &params).await?;
                let mut stream = tx.query(ctx, SELECT_LINK_COUNTS, &params).await?;
                materialize(ctx, stream.as_mut(), rows, &IssueLinkCount::from_row).await?;
                Ok(())
            })
        });

        self.helper
            .idempotent(false)
            .run_tx(ctx, TxSettings::serializable_rw(), &unit)
            .await
    }

    /// Link two issues with a single multi-statement call
    pub async fn link_issues_batch(
        &self,
        ctx: &Context,
        id1: i64,
        id2: i64,
    ) -> Result<Vec<IssueLinkCount>> {
        self.helper
            .idempotent(false)
            .query(
                ctx,
                LINK_ISSUES_BATCH,
                TxControl::serializable_rw(),
                &link_params(id1, id2),
                IssueLinkCount::from_row,
            )
            .await
    }
}

fn link_params(id1: i64, id2: i64) -> Params {
    Params::new()
        .with("t1", Value::Int64(id1))
        .with("t2", Value::Int64(id2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::statements::register_issues;
    use crate::repository::SchemaRepository;
    use querykit::{FaultPoint, MemoryStore, RetryCoordinator, RetryPolicy};
    use std::sync::Arc;

    async fn setup() -> (MemoryStore, IssueRepository, Context) {
        let store = MemoryStore::new("issues_test");
        register_issues(&store);
        let coordinator = Arc::new(RetryCoordinator::with_seed(store.connect(), 1));
        let helper = QueryHelper::with_coordinator(coordinator, RetryPolicy::default());
        let ctx = Context::background();

        SchemaRepository::new(helper.clone())
            .create_schema(&ctx)
            .await
            .unwrap();
        let repo = IssueRepository::with_ids(helper, IdSource::sequential(1));
        (store, repo, ctx)
    }

    #[tokio::test]
    async fn test_add_and_find_issue() {
        let (_store, repo, ctx) = setup().await;

        let added = repo.add_issue(&ctx, "Ticket 1", "Author 1").await.unwrap();
        let found = repo.find_by_id(&ctx, added.id).await.unwrap();

        assert_eq!(found, added);
        assert_eq!(found.link_count, 0);
        assert_eq!(found.status, None);
    }

    #[tokio::test]
    async fn test_find_missing_issue() {
        let (_store, repo, ctx) = setup().await;

        let err = repo.find_by_id(&ctx, 404).await.unwrap_err();
        assert_eq!(err, Error::NotFound("issue 404".to_string()));
    }

    #[tokio::test]
    async fn test_update_status() {
        let (_store, repo, ctx) = setup().await;
        let issue = repo.add_issue(&ctx, "Ticket 1", "Author 1").await.unwrap();

        repo.update_status(&ctx, issue.id, "in progress").await.unwrap();

        let found = repo.find_by_id(&ctx, issue.id).await.unwrap();
        assert_eq!(found.status.as_deref(), Some("in progress"));
        assert_eq!(found.title, "Ticket 1");
    }

    #[tokio::test]
    async fn test_link_issues_both_ways() {
        let (_store, repo, ctx) = setup().await;
        let a = repo.add_issue(&ctx, "Ticket 1", "Author 1").await.unwrap();
        let b = repo.add_issue(&ctx, "Ticket 2", "Author 2").await.unwrap();
        let c = repo.add_issue(&ctx, "Ticket 3", "Author 3").await.unwrap();

        let counts = repo.link_issues(&ctx, a.id, b.id).await.unwrap();
        assert_eq!(
            counts,
            vec![
                IssueLinkCount { id: a.id, link_count: 1 },
                IssueLinkCount { id: b.id, link_count: 1 },
            ]
        );

        let counts = repo.link_issues_batch(&ctx, b.id, c.id).await.unwrap();
        assert_eq!(
            counts,
            vec![
                IssueLinkCount { id: b.id, link_count: 2 },
                IssueLinkCount { id: c.id, link_count: 1 },
            ]
        );

        let err = repo.link_issues(&ctx, a.id, b.id).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidArgument(_)));
        assert_eq!(repo.find_by_id(&ctx, a.id).await.unwrap().link_count, 1);
    }

    #[tokio::test]
    async fn test_batch_link_broken_mid_stream_links_once() {
        let (store, repo, ctx) = setup().await;
        let a = repo.add_issue(&ctx, "Ticket 1", "Author 1").await.unwrap();
        let b = repo.add_issue(&ctx, "Ticket 2", "Author 2").await.unwrap();
        store.inject(
            FaultPoint::Stream { after_rows: 1 },
            Error::Transport("stream reset".into()),
        );

        let counts = repo.link_issues_batch(&ctx, a.id, b.id).await.unwrap();

        assert!(counts.iter().all(|count| count.link_count == 1));
        assert_eq!(repo.find_by_id(&ctx, b.id).await.unwrap().link_count, 1);
        assert_eq!(store.pending_faults(), 0);
    }

    #[tokio::test]
    async fn test_interactive_link_retries_transport_failure() {
        let (store, repo, ctx) = setup().await;
        let a = repo.add_issue(&ctx, "Ticket 1", "Author 1").await.unwrap();
        let b = repo.add_issue(&ctx, "Ticket 2", "Author 2").await.unwrap();
        store.inject(FaultPoint::Query, Error::Transport("connection reset".into()));

        let counts = repo.link_issues(&ctx, a.id, b.id).await.unwrap();

        // the failed attempt was rolled back, so each count moved once
        assert!(counts.iter().all(|count| count.link_count == 1));
        assert_eq!(store.pending_faults(), 0);
    }
}
