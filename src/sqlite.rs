//! SQLite client and batched extraction for filmworks-etl.

use crate::config::SqliteConfig;
use crate::error::{Error, Result};
use crate::records::{
    EntityKind, FilmWork, Genre, GenreFilmWork, Person, PersonFilmWork, RecordBatch,
};
use rusqlite::{Connection, OpenFlags, Row};
use tracing::{debug, info, instrument};

/// Extraction cursor for one entity kind.
///
/// Owned by the orchestrator and threaded explicitly through every
/// [`SqliteExtractor::next_batch`] call. It is a plain value: per-kind
/// extraction state never lives on the extractor itself, so cursors cannot
/// leak between kinds or between concurrent callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Rows already yielded for this kind during the current run.
    pub offset: u64,
}

impl Cursor {
    /// Cursor advanced past `rows` additional rows.
    pub fn advanced(self, rows: u64) -> Self {
        Self {
            offset: self.offset + rows,
        }
    }
}

/// One extraction step: translated records plus the follow-up cursor.
#[derive(Debug)]
pub struct Batch {
    /// Translated records, at most `batch_size` of them.
    pub records: RecordBatch,
    /// Cursor to pass to the next call for this kind.
    pub next: Cursor,
    /// True once the source is drained for this kind; the caller must stop
    /// requesting further batches.
    pub exhausted: bool,
}

impl Batch {
    /// Number of records yielded by this step.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if this step yielded no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// SQLite client wrapper. Read-only; never writes to the source.
pub struct SqliteExtractor {
    conn: Connection,
    batch_size: usize,
}

impl std::fmt::Debug for SqliteExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExtractor")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl SqliteExtractor {
    /// Open the source database read-only.
    #[instrument(skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig, batch_size: usize) -> Result<Self> {
        info!("Opening SQLite source...");

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&config.path, flags)
            .map_err(|e| Error::sqlite_connection("Failed to open source database", e))?;

        info!("Opened SQLite source: {}", config.path);
        Ok(Self { conn, batch_size })
    }

    /// Open an in-memory database. Dev/test entry point: the caller is
    /// responsible for creating and filling the source tables.
    pub fn open_in_memory(batch_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::sqlite_connection("Failed to open in-memory database", e))?;
        Ok(Self { conn, batch_size })
    }

    /// Test connectivity.
    pub fn ping(&self) -> Result<()> {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::sqlite_query("", "Ping failed", e))?;
        Ok(())
    }

    /// Batch size used by [`Self::next_batch`]. Callers must not assume a
    /// larger yield per call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get table row count.
    pub fn count_rows(&self, kind: EntityKind) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", kind.source_table());
        self.conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| Error::sqlite_query(kind.source_table(), "Count failed", e))
    }

    /// Pull and translate the next batch for one entity kind.
    ///
    /// Rows come back in rowid order so that each row is yielded exactly
    /// once per run across the call sequence. `exhausted` is set as soon as
    /// a call yields fewer rows than the batch size (including zero).
    #[instrument(skip(self, cursor), fields(table = %kind, offset = cursor.offset))]
    pub fn next_batch(&self, kind: EntityKind, cursor: Cursor) -> Result<Batch> {
        let records = match kind {
            EntityKind::Genre => RecordBatch::Genres(self.fetch(kind, cursor, Genre::from_sqlite)?),
            EntityKind::Person => {
                RecordBatch::Persons(self.fetch(kind, cursor, Person::from_sqlite)?)
            }
            EntityKind::FilmWork => {
                RecordBatch::FilmWorks(self.fetch(kind, cursor, FilmWork::from_sqlite)?)
            }
            EntityKind::GenreFilmWork => {
                RecordBatch::GenreFilmWorks(self.fetch(kind, cursor, GenreFilmWork::from_sqlite)?)
            }
            EntityKind::PersonFilmWork => {
                RecordBatch::PersonFilmWorks(self.fetch(kind, cursor, PersonFilmWork::from_sqlite)?)
            }
        };

        let yielded = records.len();
        debug!("Fetched {} rows from {}", yielded, kind);

        Ok(Batch {
            next: cursor.advanced(yielded as u64),
            exhausted: yielded < self.batch_size,
            records,
        })
    }

    /// Drain every remaining batch for one kind into a single vector.
    ///
    /// Degenerate variant of the batched loop, behaviorally equivalent from
    /// the destination's point of view; differs only in peak memory. Used by
    /// the consistency check, which needs whole-table content anyway.
    pub fn drain(&self, kind: EntityKind) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        let mut cursor = Cursor::default();
        loop {
            let batch = self.next_batch(kind, cursor)?;
            cursor = batch.next;
            let exhausted = batch.exhausted;
            if !batch.is_empty() {
                batches.push(batch.records);
            }
            if exhausted {
                return Ok(batches);
            }
        }
    }

    fn fetch<T, F>(&self, kind: EntityKind, cursor: Cursor, translate: F) -> Result<Vec<T>>
    where
        F: Fn(&Row<'_>) -> rusqlite::Result<T>,
    {
        let query = format!(
            "SELECT {} FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
            kind.source_projection(),
            kind.source_table()
        );

        let mut stmt = self
            .conn
            .prepare(&query)
            .map_err(|e| Error::sqlite_query(kind.source_table(), "Prepare failed", e))?;

        let rows = stmt
            .query_map(
                rusqlite::params![self.batch_size as i64, cursor.offset as i64],
                |row| translate(row),
            )
            .map_err(|e| Error::sqlite_query(kind.source_table(), "Query failed", e))?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(|e| classify_row_error(kind, e))
    }

    /// Direct access to the underlying connection for advanced queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// A row that fails translation is a malformed row and fails the whole
/// batch; anything else is a source query error.
fn classify_row_error(kind: EntityKind, e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::InvalidColumnIndex(_)
        | rusqlite::Error::InvalidColumnName(_)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            Error::malformed_row(kind.source_table(), e.to_string())
        }
        other => Error::sqlite_query(kind.source_table(), "Row fetch failed", other),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::records::EntityKind;

    /// Source schema used by tests across the crate.
    pub(crate) const SOURCE_DDL: &str = r#"
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

    pub(crate) fn uuid_for(n: u32) -> String {
        format!("00000000-0000-0000-0000-{:012x}", n)
    }

    pub(crate) fn seeded_extractor(batch_size: usize, genres: u32) -> SqliteExtractor {
        let ex = SqliteExtractor::open_in_memory(batch_size).unwrap();
        ex.connection().execute_batch(SOURCE_DDL).unwrap();
        for n in 0..genres {
            ex.connection()
                .execute(
                    "INSERT INTO genre (id, name, description, created, modified)
                     VALUES (?1, ?2, NULL, '2021-06-16 20:14:09.221838+00', '2021-06-16 20:14:09.221838+00')",
                    rusqlite::params![uuid_for(n), format!("genre-{n}")],
                )
                .unwrap();
        }
        ex
    }

    #[test]
    fn test_batch_boundaries_exact_call_count() {
        // 1050 rows at batch size 500: exactly ceil(1050/500) = 3 calls,
        // union of batches is the full row set with no repeats.
        let ex = seeded_extractor(500, 1050);

        let mut cursor = Cursor::default();
        let mut calls = 0;
        let mut seen = std::collections::HashSet::new();
        loop {
            let batch = ex.next_batch(EntityKind::Genre, cursor).unwrap();
            calls += 1;
            for id in batch.records.ids() {
                assert!(seen.insert(id), "row yielded twice");
            }
            cursor = batch.next;
            if batch.exhausted {
                break;
            }
        }

        assert_eq!(calls, 3);
        assert_eq!(seen.len(), 1050);
    }

    #[test]
    fn test_empty_table_is_exhausted_immediately() {
        let ex = seeded_extractor(500, 0);
        let batch = ex.next_batch(EntityKind::Genre, Cursor::default()).unwrap();
        assert!(batch.is_empty());
        assert!(batch.exhausted);
        assert_eq!(batch.next, Cursor::default());
    }

    #[test]
    fn test_cursor_is_a_value_not_shared_state() {
        // Re-presenting an old cursor re-reads the same rows: extraction
        // state lives in the cursor, not on the extractor.
        let ex = seeded_extractor(2, 4);
        let first = ex.next_batch(EntityKind::Genre, Cursor::default()).unwrap();
        let again = ex.next_batch(EntityKind::Genre, Cursor::default()).unwrap();
        assert_eq!(first.records.ids(), again.records.ids());
    }

    #[test]
    fn test_malformed_uuid_fails_the_batch() {
        let ex = SqliteExtractor::open_in_memory(500).unwrap();
        ex.connection().execute_batch(SOURCE_DDL).unwrap();
        ex.connection()
            .execute(
                "INSERT INTO genre (id, name) VALUES ('definitely-not-a-uuid', 'Action')",
                [],
            )
            .unwrap();

        let err = ex
            .next_batch(EntityKind::Genre, Cursor::default())
            .unwrap_err();
        assert_eq!(err.code(), "MALFORMED_ROW");
    }

    #[test]
    fn test_null_identity_gets_generated_never_overridden() {
        let ex = SqliteExtractor::open_in_memory(500).unwrap();
        ex.connection().execute_batch(SOURCE_DDL).unwrap();
        let fixed = uuid_for(7);
        ex.connection()
            .execute(
                "INSERT INTO genre (id, name) VALUES (?1, 'Action'), (NULL, 'Drama')",
                rusqlite::params![fixed],
            )
            .unwrap();

        let batch = ex.next_batch(EntityKind::Genre, Cursor::default()).unwrap();
        let ids = batch.records.ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].to_string(), fixed);
        assert_ne!(ids[1].to_string(), fixed);
    }

    #[test]
    fn test_unknown_film_work_type_is_malformed() {
        let ex = SqliteExtractor::open_in_memory(500).unwrap();
        ex.connection().execute_batch(SOURCE_DDL).unwrap();
        ex.connection()
            .execute(
                "INSERT INTO film_work (id, title, type) VALUES (?1, 'Dune', 'radio_play')",
                rusqlite::params![uuid_for(1)],
            )
            .unwrap();

        let err = ex
            .next_batch(EntityKind::FilmWork, Cursor::default())
            .unwrap_err();
        assert_eq!(err.code(), "MALFORMED_ROW");
    }

    #[test]
    fn test_missing_source_file_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig {
            path: dir
                .path()
                .join("does-not-exist.sqlite")
                .to_string_lossy()
                .into_owned(),
        };
        let err = SqliteExtractor::open(&config, 500).unwrap_err();
        assert_eq!(err.code(), "SQLITE_CONNECTION_ERROR");
    }

    #[test]
    fn test_drain_equals_batched_union() {
        let ex = seeded_extractor(100, 250);
        let batches = ex.drain(EntityKind::Genre).unwrap();
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 250);
        assert_eq!(batches.len(), 3);
    }
}
