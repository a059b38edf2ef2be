//! Transaction control, snapshot isolation and single-row post-conditions

#[path = "testutils/mod.rs"]
mod testutils;

use querykit::{
    read_all, tx_work, Connection, Error, Params, ResultBuffer, Row, Session, Transaction,
    TxControl, TxSettings,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testutils::test_fixture::{read_val, row_params, TestFixture, SELECT_ALL, SELECT_ONE, UPSERT};

#[tokio::test]
async fn test_snapshot_reads_never_see_uncommitted_writes() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 0)]).await;
    let ctx = &fixture.ctx;

    let mut session = fixture.store.connect().session(ctx).await.unwrap();
    let mut tx = session
        .begin(ctx, TxSettings::serializable_rw())
        .await
        .unwrap();
    tx.exec(ctx, UPSERT, &row_params(1, 10)).await.unwrap();

    assert_eq!(fixture.rows().await.unwrap(), vec![(1, 0)]);

    tx.commit(ctx).await.unwrap();
    assert!(tx.is_finished());
    assert_eq!(fixture.rows().await.unwrap(), vec![(1, 10)]);
}

#[tokio::test]
async fn test_read_only_transaction_keeps_its_snapshot() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 0)]).await;
    let ctx = &fixture.ctx;

    let mut session = fixture.store.connect().session(ctx).await.unwrap();
    let mut ro = session.begin(ctx, TxSettings::snapshot_ro()).await.unwrap();

    assert_eq!(read_val(ctx, ro.as_mut(), 1).await.unwrap(), 0);
    fixture.seed(&[(1, 7)]).await;
    assert_eq!(read_val(ctx, ro.as_mut(), 1).await.unwrap(), 0);

    let err = ro.exec(ctx, UPSERT, &row_params(1, 8)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    ro.commit(ctx).await.unwrap();
    assert_eq!(fixture.value(1), Some(7));
}

#[tokio::test(start_paused = true)]
async fn test_two_writers_first_committer_wins() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 0)]).await;
    let attempts = Arc::new(AtomicU32::new(0));

    let mut workers = Vec::new();
    for worker in 0..2u64 {
        let helper = fixture.helper.idempotent(true);
        let ctx = fixture.ctx.clone();
        let attempts = attempts.clone();
        workers.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(worker)).await;
            let unit = tx_work(move |ctx, tx, _rows: &mut ResultBuffer<()>| {
                let attempts = attempts.clone();
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let val = read_val(ctx, tx, 1).await?;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    tx.exec(ctx, UPSERT, &row_params(1, val + 1)).await
                })
            });
            helper
                .run_tx(&ctx, TxSettings::serializable_rw(), &unit)
                .await
        }));
    }
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    // the second writer loses its first commit and succeeds on a retry
    assert_eq!(fixture.value(1), Some(2));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.store.stats().conflicts, 1);
}

#[tokio::test]
async fn test_failed_unit_of_work_rolls_back() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 0)]).await;
    let rollbacks_before = fixture.store.stats().rollbacks;

    let unit = tx_work(|ctx, tx, _rows: &mut ResultBuffer<()>| {
        Box::pin(async move {
            tx.exec(ctx, UPSERT, &row_params(1, 42)).await?;
            Err::<(), _>(Error::Application("status transition not allowed".into()))
        })
    });

    let err = fixture
        .helper
        .run_tx(&fixture.ctx, TxSettings::serializable_rw(), &unit)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), Error::Application(_)));
    assert_eq!(fixture.value(1), Some(0));
    assert_eq!(fixture.store.stats().rollbacks, rollbacks_before + 1);
}

#[tokio::test]
async fn test_exec_commit_is_not_committed_twice() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 0), (2, 0)]).await;
    let commits_before = fixture.store.stats().commits;

    let unit = tx_work(|ctx, tx, rows: &mut ResultBuffer<i64>| {
        Box::pin(async move {
            let first = read_val(ctx, tx, 1).await?;
            let second = read_val(ctx, tx, 2).await?;
            tx.exec(ctx, UPSERT, &row_params(1, first + 1)).await?;
            tx.exec_commit(ctx, UPSERT, &row_params(2, second + 1)).await?;
            rows.append(first + second + 2);
            Ok(())
        })
    });

    let total = fixture
        .helper
        .run_tx(&fixture.ctx, TxSettings::serializable_rw(), &unit)
        .await
        .unwrap();

    assert_eq!(total, vec![2]);
    assert_eq!(fixture.value(1), Some(1));
    assert_eq!(fixture.value(2), Some(1));
    assert_eq!(fixture.store.stats().commits, commits_before + 1);
}

#[tokio::test]
async fn test_query_single_post_conditions() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 10), (2, 20)]).await;
    let helper = fixture.helper.idempotent(true);
    let val = |row: &Row| row.get_i64("val");

    let found = helper
        .query_single(
            &fixture.ctx,
            SELECT_ONE,
            TxControl::snapshot_ro(),
            &Params::new().with("id", 2i64),
            val,
        )
        .await
        .unwrap();
    assert_eq!(found, 20);

    let missing = helper
        .query_single(
            &fixture.ctx,
            SELECT_ONE,
            TxControl::snapshot_ro(),
            &Params::new().with("id", 3i64),
            val,
        )
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::NotFound(_)));

    let many = helper
        .query_single(
            &fixture.ctx,
            SELECT_ALL,
            TxControl::snapshot_ro(),
            &Params::new(),
            val,
        )
        .await
        .unwrap_err();
    assert_eq!(many, Error::MultipleMatches { count: 2 });
}

#[tokio::test]
async fn test_query_as_decodes_rows() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Entry {
        id: i64,
        val: i64,
    }

    let fixture = TestFixture::new().await;
    fixture.seed(&[(2, 20), (1, 10)]).await;

    let entries: Vec<Entry> = fixture
        .helper
        .query_as(&fixture.ctx, SELECT_ALL, TxControl::snapshot_ro(), &Params::new())
        .await
        .unwrap();

    assert_eq!(
        entries,
        vec![Entry { id: 1, val: 10 }, Entry { id: 2, val: 20 }]
    );
}

#[tokio::test]
async fn test_missing_parameter_is_invalid_argument() {
    let fixture = TestFixture::new().await;

    let err = fixture
        .helper
        .execute_tx(
            &fixture.ctx,
            UPSERT,
            TxControl::serializable_rw(),
            &Params::new().with("id", 1i64),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root(), Error::InvalidArgument(_)));
    assert_eq!(err.attempts(), Some(1));
}

#[tokio::test]
async fn test_interactive_read_uses_read_all() {
    let fixture = TestFixture::new().await;
    fixture.seed(&[(1, 1), (2, 2), (3, 3)]).await;
    let ctx = &fixture.ctx;

    let mut session = fixture.store.connect().session(ctx).await.unwrap();
    let mut stream = session
        .query(ctx, SELECT_ALL, &Params::new(), TxControl::snapshot_ro())
        .await
        .unwrap();
    let rows = read_all(ctx, stream.as_mut()).await.unwrap();

    assert_eq!(rows.len(), 3);
}
