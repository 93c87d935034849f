//! End-to-end tests against a live PostgreSQL instance.
//!
//! These run only when `FILMWORKS_TEST_DATABASE_URL` points at a disposable
//! database (the `content` schema is dropped and recreated); without it each
//! test is a no-op so the suite stays green on machines without PostgreSQL.

use filmworks_etl::records::{EntityKind, GenreFilmWork, RecordBatch};
use filmworks_etl::{EtlConfig, MigrationClient, PgLoader, SqliteExtractor};

const SOURCE_DDL: &str = r#"
    CREATE TABLE genre (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        created TEXT,
        modified TEXT
    );
    CREATE TABLE person (
        id TEXT PRIMARY KEY,
        full_name TEXT NOT NULL,
        created TEXT,
        modified TEXT
    );
    CREATE TABLE film_work (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        creation_date TEXT,
        rating REAL,
        type TEXT NOT NULL,
        created TEXT,
        modified TEXT
    );
    CREATE TABLE genre_film_work (
        id TEXT PRIMARY KEY,
        film_work_id TEXT NOT NULL,
        genre_id TEXT NOT NULL,
        created TEXT
    );
    CREATE TABLE person_film_work (
        id TEXT PRIMARY KEY,
        role TEXT NOT NULL,
        film_work_id TEXT NOT NULL,
        person_id TEXT NOT NULL,
        created TEXT
    );
"#;

const TS: &str = "2021-06-16 20:14:09.221838+00";

fn uuid_for(n: u32) -> String {
    format!("00000000-0000-0000-0000-{:012x}", n)
}

fn test_config() -> Option<EtlConfig> {
    let url = std::env::var("FILMWORKS_TEST_DATABASE_URL").ok()?;
    Some(
        EtlConfig::builder()
            .postgres_url(url)
            .batch_size(2) // small batches so the scenario spans several calls
            .build()
            .unwrap(),
    )
}

/// 3 genres, 2 persons, 1 film work linked to 2 genres and 1 person (actor).
fn seeded_source(batch_size: usize) -> SqliteExtractor {
    let ex = SqliteExtractor::open_in_memory(batch_size).unwrap();
    let conn = ex.connection();
    conn.execute_batch(SOURCE_DDL).unwrap();

    for (n, name) in ["Action", "Drama", "Sci-Fi"].iter().enumerate() {
        conn.execute(
            "INSERT INTO genre (id, name, created, modified) VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![uuid_for(n as u32 + 1), name, TS],
        )
        .unwrap();
    }
    for (n, name) in ["Denis Villeneuve", "Timothee Chalamet"].iter().enumerate() {
        conn.execute(
            "INSERT INTO person (id, full_name, created, modified) VALUES (?1, ?2, ?3, ?3)",
            rusqlite::params![uuid_for(n as u32 + 10), name, TS],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO film_work (id, title, type, rating, creation_date, created, modified)
         VALUES (?1, 'Dune', 'movie', 100.0, '2021-09-15', ?2, ?2)",
        rusqlite::params![uuid_for(100), TS],
    )
    .unwrap();
    for (n, genre) in [1u32, 2].iter().enumerate() {
        conn.execute(
            "INSERT INTO genre_film_work (id, film_work_id, genre_id, created) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![uuid_for(n as u32 + 200), uuid_for(100), uuid_for(*genre), TS],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO person_film_work (id, role, film_work_id, person_id, created)
         VALUES (?1, 'actor', ?2, ?3, ?4)",
        rusqlite::params![uuid_for(300), uuid_for(100), uuid_for(11), TS],
    )
    .unwrap();
    ex
}

async fn fresh_loader(config: &EtlConfig) -> PgLoader {
    let loader = PgLoader::connect(&config.postgres, &config.etl)
        .await
        .unwrap();
    loader
        .client()
        .batch_execute("DROP SCHEMA IF EXISTS content CASCADE")
        .await
        .unwrap();
    loader.ensure_schema().await.unwrap();
    loader
}

#[tokio::test]
async fn full_run_is_complete_and_idempotent() {
    let Some(config) = test_config() else {
        return;
    };

    let extractor = seeded_source(config.etl.batch_size);
    let loader = fresh_loader(&config).await;
    let client = MigrationClient::from_parts(config, extractor, loader);

    let first = client.run().await.unwrap();
    assert_eq!(first.total_extracted(), 9);
    assert_eq!(first.total_inserted(), 9);
    assert_eq!(first.total_skipped(), 0);

    // Second run: same destination row set, nothing inserted, no errors.
    let second = client.run().await.unwrap();
    assert_eq!(second.total_extracted(), 9);
    assert_eq!(second.total_inserted(), 0);
    assert_eq!(second.total_skipped(), 9);

    for status in client.status().await.unwrap() {
        assert_eq!(
            status.source_rows, status.destination_rows,
            "count mismatch for {}",
            status.table
        );
    }

    // The role survives the trip intact.
    let report = client.verify(true).await.unwrap();
    assert!(report.is_consistent());
}

#[tokio::test]
async fn join_rows_before_parents_are_rejected() {
    let Some(config) = test_config() else {
        return;
    };

    let loader = fresh_loader(&config).await;

    // Deliberately out of order: a join row whose parents were never loaded
    // must fail on referential integrity, not silently succeed.
    let orphan = GenreFilmWork {
        id: uuid::Uuid::new_v4(),
        film_work_id: uuid::Uuid::new_v4(),
        genre_id: uuid::Uuid::new_v4(),
        created: chrono::Utc::now(),
    };
    let err = loader
        .upsert(&RecordBatch::GenreFilmWorks(vec![orphan]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}

#[tokio::test]
async fn rating_bounds_load_and_out_of_range_is_rejected() {
    let Some(config) = test_config() else {
        return;
    };

    let loader = fresh_loader(&config).await;

    let extractor = SqliteExtractor::open_in_memory(config.etl.batch_size).unwrap();
    extractor.connection().execute_batch(SOURCE_DDL).unwrap();
    extractor
        .connection()
        .execute(
            "INSERT INTO film_work (id, title, type, rating) VALUES
                (?1, 'Floor', 'movie', 0.0),
                (?2, 'Ceiling', 'movie', 100.0)",
            rusqlite::params![uuid_for(1), uuid_for(2)],
        )
        .unwrap();

    // Both inclusive bounds load successfully.
    let batches = extractor.drain(EntityKind::FilmWork).unwrap();
    let outcome = loader.upsert(&batches[0]).await.unwrap();
    assert_eq!(outcome.inserted, 2);

    // Out of range: passed through by the pipeline, rejected by the
    // destination's CHECK constraint.
    let wild = SqliteExtractor::open_in_memory(config.etl.batch_size).unwrap();
    wild.connection().execute_batch(SOURCE_DDL).unwrap();
    wild.connection()
        .execute(
            "INSERT INTO film_work (id, title, type, rating) VALUES (?1, 'Broken', 'movie', 150.0)",
            rusqlite::params![uuid_for(3)],
        )
        .unwrap();
    let batches = wild.drain(EntityKind::FilmWork).unwrap();
    let err = loader.upsert(&batches[0]).await.unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
}
