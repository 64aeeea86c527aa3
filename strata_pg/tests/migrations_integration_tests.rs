mod common;

use serial_test::serial;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use strata_core::prelude::*;
use strata_pg::{PgSchemaStore, migrations};

fn runner(pool: &PgPool) -> MigrationRunner<PgSchemaStore> {
    let config = RunnerConfig {
        lock_timeout: Duration::from_millis(500),
        lock_poll_interval: Duration::from_millis(50),
        ..RunnerConfig::default()
    };
    MigrationRunner::with_config(PgSchemaStore::new(pool.clone()), migrations::catalog(), config)
}

async fn relation_exists(pool: &PgPool, name: &str) -> bool {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM pg_class WHERE relname = $1 AND relnamespace = to_regnamespace(current_schema()))",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("Failed to query pg_class");
    exists
}

#[tokio::test]
#[serial]
async fn test_status_does_not_create_the_ledger() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;

    let status = runner(&pool).status().await.expect("Should read status");

    assert_eq!(status.current_version, 0);
    assert_eq!(status.pending_count, 4);
    assert!(!relation_exists(&pool, "schema_migrations").await);

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_apply_all_creates_the_incident_schema() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;

    let report = runner(&pool).apply_all().await.expect("Should apply");

    assert_eq!(report.completed, vec![1, 2, 3, 4]);
    for migration in migrations::MIGRATIONS {
        for object in migration.objects {
            assert!(relation_exists(&pool, object).await, "{object} should exist");
        }
    }

    let rows: Vec<(i32, String)> =
        sqlx::query_as("SELECT version, name FROM schema_migrations ORDER BY version")
            .fetch_all(&pool)
            .await
            .expect("Failed to read ledger");
    assert_eq!(
        rows,
        vec![
            (1, "create_uploads_table".to_string()),
            (2, "create_incidents_table".to_string()),
            (3, "create_indexes".to_string()),
            (4, "create_analytics_views".to_string()),
        ]
    );

    let second = runner(&pool).apply_all().await.expect("Second run should succeed");
    assert!(second.is_noop());

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_round_trip_to_zero() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;
    let runner = runner(&pool);

    runner.apply_all().await.expect("Should apply");
    let report = runner.rollback_to(0).await.expect("Should roll back");

    assert_eq!(report.completed, vec![4, 3, 2, 1]);
    assert!(!relation_exists(&pool, "uploads").await);
    assert!(!relation_exists(&pool, "incident_timeline").await);
    assert!(relation_exists(&pool, "schema_migrations").await);

    runner.apply_all().await.expect("Should re-apply");
    assert!(runner.verify().await.expect("Should verify").is_empty());

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_failed_migration_is_rolled_back() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;

    let catalog = Catalog::new(vec![
        migrations::CREATE_UPLOADS_TABLE,
        MigrationDefinition::new(
            2,
            "broken",
            "CREATE TABLE broken_a (id INT); CREATE TABLE broken_b (id NOT_A_TYPE);",
            "DROP TABLE IF EXISTS broken_b; DROP TABLE IF EXISTS broken_a;",
        ),
    ]);
    let runner = MigrationRunner::new(PgSchemaStore::new(pool.clone()), catalog);

    let err = runner.apply_all().await.unwrap_err();

    assert_eq!(err.completed, vec![1]);
    assert_eq!(err.kind(), ErrorKind::MigrationApplyFailed);
    assert!(!err.is_retryable());
    assert!(!relation_exists(&pool, "broken_a").await);
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await
        .expect("Failed to count ledger rows");
    assert_eq!(count, 1);

    sqlx::query("DROP TABLE IF EXISTS broken_a")
        .execute(&pool)
        .await
        .expect("Failed to clean up");
    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_statement_timeout_aborts_slow_migration_on_the_server() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;

    let catalog = Catalog::new(vec![
        migrations::CREATE_UPLOADS_TABLE,
        MigrationDefinition::new(
            2,
            "slow",
            "CREATE TABLE slow_a (id INT); SELECT pg_sleep(5);",
            "DROP TABLE IF EXISTS slow_a;",
        ),
    ]);
    let store =
        PgSchemaStore::new(pool.clone()).with_statement_timeout(Duration::from_millis(200));
    let runner = MigrationRunner::new(store, catalog);

    let started = Instant::now();
    let err = runner.apply_all().await.unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.completed, vec![1]);
    assert_eq!(err.failed_version(), Some(2));
    assert!(err.is_retryable());
    assert!(!relation_exists(&pool, "slow_a").await);
    let (sleeping,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM pg_stat_activity WHERE state = 'active' AND query LIKE '%pg_sleep(5)%' AND pid <> pg_backend_pid()",
    )
    .fetch_one(&pool)
    .await
    .expect("Failed to query pg_stat_activity");
    assert_eq!(sleeping, 0);

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_untracked_schema_is_refused() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;
    sqlx::query("CREATE TABLE uploads (id VARCHAR PRIMARY KEY)")
        .execute(&pool)
        .await
        .expect("Failed to create table");

    let err = runner(&pool).apply_all().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UntrackedSchema);
    assert!(!relation_exists(&pool, "incidents").await);

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_advisory_lock_excludes_other_runners() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;
    let store = PgSchemaStore::new(pool.clone());

    let lock = store
        .try_lock()
        .await
        .expect("Should query lock")
        .expect("Should take lock");
    assert!(
        store.try_lock().await.expect("Should query lock").is_none(),
        "Advisory lock should be exclusive across sessions"
    );

    let err = runner(&pool).apply_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockUnavailable);
    assert!(err.is_retryable());

    store.unlock(lock).await.expect("Should unlock");
    runner(&pool).apply_all().await.expect("Should apply once unlocked");

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_dropped_lock_is_released_by_the_server() {
    let pool = common::get_pg_pool().await;
    let store = PgSchemaStore::new(pool.clone());

    let lock = store.try_lock().await.expect("Should query lock");
    assert!(lock.is_some());
    drop(lock);

    // The detached connection is closed asynchronously.
    let mut reacquired = None;
    for _ in 0..50 {
        reacquired = store.try_lock().await.expect("Should query lock");
        if reacquired.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let lock = reacquired.expect("Lock should be released after its connection closed");
    store.unlock(lock).await.expect("Should unlock");
}

#[tokio::test]
#[serial]
async fn test_concurrent_runners_apply_once() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;
    let config = RunnerConfig {
        lock_timeout: Duration::from_secs(30),
        lock_poll_interval: Duration::from_millis(50),
        ..RunnerConfig::default()
    };
    let first = MigrationRunner::with_config(
        PgSchemaStore::new(pool.clone()),
        migrations::catalog(),
        config.clone(),
    );
    let second = MigrationRunner::with_config(
        PgSchemaStore::new(pool.clone()),
        migrations::catalog(),
        config,
    );

    let (a, b) = tokio::join!(first.apply_all(), second.apply_all());
    let total =
        a.expect("First runner").completed.len() + b.expect("Second runner").completed.len();
    assert_eq!(total, 4);

    common::teardown(&pool).await;
}
