//! Rollback round-trips for the database and cache adapters.
//!
//! The SQLite test is self-contained (a temp file). The Postgres and Redis
//! tests need live services and are skipped unless `ROAMGRAPH_PG_TEST_URL`
//! / `ROAMGRAPH_REDIS_TEST_URL` point at disposable test instances.

#[cfg(feature = "sqlite")]
mod sqlite {
    use roamgraph::adapters::{Rollbackable, SqliteFileAdapter};
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::path::Path;

    async fn run_sql(path: &Path, sql: &str) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true),
            )
            .await
            .unwrap();
        sqlx::query(sql).execute(&pool).await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn file_copy_rollback_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");
        run_sql(&path, "CREATE TABLE orders (id INTEGER PRIMARY KEY)").await;

        let adapter = SqliteFileAdapter::new("db", path.clone())
            .with_observation("orders", "SELECT count(*) FROM orders");
        adapter.begin().await.unwrap();

        let empty = adapter.observe().await.unwrap();
        assert_eq!(empty.field("orders"), Some(&json!(0)));
        let checkpoint = adapter.checkpoint("empty").await.unwrap();

        run_sql(&path, "INSERT INTO orders DEFAULT VALUES").await;
        let one = adapter.observe().await.unwrap();
        assert_eq!(one.field("orders"), Some(&json!(1)));

        adapter.rollback(&checkpoint).await.unwrap();
        assert_eq!(adapter.observe().await.unwrap(), empty);

        adapter.end().await.unwrap();
    }

    #[tokio::test]
    async fn checkpoints_restore_in_arbitrary_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");
        run_sql(&path, "CREATE TABLE orders (id INTEGER PRIMARY KEY)").await;

        let adapter = SqliteFileAdapter::new("db", path.clone())
            .with_observation("orders", "SELECT count(*) FROM orders");
        adapter.begin().await.unwrap();

        let at_zero = adapter.checkpoint("zero").await.unwrap();
        run_sql(&path, "INSERT INTO orders DEFAULT VALUES").await;
        let at_one = adapter.checkpoint("one").await.unwrap();
        run_sql(&path, "INSERT INTO orders DEFAULT VALUES").await;

        // Jump backwards two checkpoints, then forwards again.
        adapter.rollback(&at_zero).await.unwrap();
        assert_eq!(
            adapter.observe().await.unwrap().field("orders"),
            Some(&json!(0))
        );
        adapter.rollback(&at_one).await.unwrap();
        assert_eq!(
            adapter.observe().await.unwrap().field("orders"),
            Some(&json!(1))
        );

        adapter.end().await.unwrap();
    }

    #[tokio::test]
    async fn end_restores_the_fixture_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.db");
        run_sql(&path, "CREATE TABLE orders (id INTEGER PRIMARY KEY)").await;

        let adapter = SqliteFileAdapter::new("db", path.clone())
            .with_observation("orders", "SELECT count(*) FROM orders");
        adapter.begin().await.unwrap();
        run_sql(&path, "INSERT INTO orders DEFAULT VALUES").await;
        adapter.end().await.unwrap();

        let adapter = SqliteFileAdapter::new("db", path.clone())
            .with_observation("orders", "SELECT count(*) FROM orders");
        adapter.begin().await.unwrap();
        assert_eq!(
            adapter.observe().await.unwrap().field("orders"),
            Some(&json!(0))
        );
        adapter.end().await.unwrap();
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use roamgraph::adapters::{AdapterError, PostgresAdapter, Rollbackable};
    use serde_json::json;

    fn test_url() -> Option<String> {
        std::env::var("ROAMGRAPH_PG_TEST_URL").ok()
    }

    #[tokio::test]
    async fn savepoint_rollback_roundtrip() {
        let Some(url) = test_url() else {
            eprintln!("skipping: set ROAMGRAPH_PG_TEST_URL to run");
            return;
        };

        let adapter = PostgresAdapter::new("db", url)
            .with_observation("orders", "SELECT count(*) FROM roamgraph_test_orders");
        adapter.begin().await.unwrap();
        adapter
            .execute("CREATE TABLE roamgraph_test_orders (id SERIAL PRIMARY KEY)")
            .await
            .unwrap();

        let empty = adapter.observe().await.unwrap();
        let checkpoint = adapter.checkpoint("empty").await.unwrap();

        adapter
            .execute("INSERT INTO roamgraph_test_orders DEFAULT VALUES")
            .await
            .unwrap();
        assert_eq!(
            adapter.observe().await.unwrap().field("orders"),
            Some(&json!(1))
        );

        adapter.rollback(&checkpoint).await.unwrap();
        assert_eq!(adapter.observe().await.unwrap(), empty);

        // end() rolls the outer transaction back: the table never existed.
        adapter.end().await.unwrap();
    }

    #[tokio::test]
    async fn stack_rollback_invalidates_later_savepoints() {
        let Some(url) = test_url() else {
            eprintln!("skipping: set ROAMGRAPH_PG_TEST_URL to run");
            return;
        };

        let adapter = PostgresAdapter::new("db", url)
            .with_observation("orders", "SELECT count(*) FROM roamgraph_test_stack");
        adapter.begin().await.unwrap();
        adapter
            .execute("CREATE TABLE roamgraph_test_stack (id SERIAL PRIMARY KEY)")
            .await
            .unwrap();

        let earlier = adapter.checkpoint("earlier").await.unwrap();
        adapter
            .execute("INSERT INTO roamgraph_test_stack DEFAULT VALUES")
            .await
            .unwrap();
        let later = adapter.checkpoint("later").await.unwrap();

        adapter.rollback(&earlier).await.unwrap();

        let err = adapter.rollback(&later).await.unwrap_err();
        assert!(matches!(err, AdapterError::UnknownCheckpoint { .. }));

        adapter.end().await.unwrap();
    }
}

#[cfg(feature = "redis")]
mod redis_cache {
    use roamgraph::adapters::{RedisAdapter, Rollbackable};
    use serde_json::json;

    fn test_url() -> Option<String> {
        std::env::var("ROAMGRAPH_REDIS_TEST_URL").ok()
    }

    async fn set_key(url: &str, key: &str, value: &str) {
        let client = redis::Client::open(url).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dump_restore_roundtrip() {
        let Some(url) = test_url() else {
            eprintln!("skipping: set ROAMGRAPH_REDIS_TEST_URL to run");
            return;
        };

        let adapter = RedisAdapter::new("cache", url.clone());
        adapter.begin().await.unwrap();

        set_key(&url, "session:1", "alice").await;
        let with_session = adapter.observe().await.unwrap();
        assert_eq!(with_session.field("session:1"), Some(&json!("alice")));
        let checkpoint = adapter.checkpoint("with-session").await.unwrap();

        set_key(&url, "session:1", "mallory").await;
        set_key(&url, "session:2", "bob").await;

        adapter.rollback(&checkpoint).await.unwrap();
        assert_eq!(adapter.observe().await.unwrap(), with_session);

        adapter.end().await.unwrap();
    }
}
