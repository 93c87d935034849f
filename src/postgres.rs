//! PostgreSQL client and idempotent bulk loading for filmworks-etl.

use crate::config::{EtlBehaviorConfig, PostgresConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::records::{
    EntityKind, FilmWork, Genre, GenreFilmWork, Person, PersonFilmWork, RecordBatch,
};
use crate::schema::DESTINATION_DDL;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_postgres::Client;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[cfg(feature = "tls-native")]
use native_tls::TlsConnector;
#[cfg(feature = "tls-native")]
use postgres_native_tls::MakeTlsConnector;

/// Outcome of one idempotent bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Upserted {
    /// Rows actually inserted
    pub inserted: u64,
    /// Rows skipped because their key already existed
    pub skipped: u64,
    /// Statement pages issued
    pub pages: u64,
}

/// PostgreSQL client wrapper. Owns the destination connection; one batch
/// upsert is one unit of work, with no locks held between calls.
pub struct PgLoader {
    client: Client,
    page_size: usize,
    statement_timeout: Option<Duration>,
}

impl PgLoader {
    /// Connect to PostgreSQL.
    #[instrument(skip(config, etl), fields(destination = %config.masked()))]
    pub async fn connect(config: &PostgresConfig, etl: &EtlBehaviorConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL...");

        let client_config = config.to_client_config()?;

        #[cfg(feature = "tls-native")]
        let (client, connection) = {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(true) // local/self-signed destinations
                .build()
                .map_err(|e| Error::config_with_source("TLS setup failed", e))?;
            let connector = MakeTlsConnector::new(connector);
            client_config
                .connect(connector)
                .await
                .map_err(|e| Error::postgres_connection_pg("Failed to connect", e))?
        };

        #[cfg(not(feature = "tls-native"))]
        let (client, connection) = {
            client_config
                .connect(tokio_postgres::NoTls)
                .await
                .map_err(|e| Error::postgres_connection_pg("Failed to connect", e))?
        };

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        info!("Connected to PostgreSQL");
        Ok(Self {
            client,
            page_size: etl.page_size,
            statement_timeout: etl.statement_timeout(),
        })
    }

    /// Connect with bounded exponential backoff. With `max_retries` at its
    /// default of zero this is a plain [`Self::connect`]; the pipeline never
    /// retries unless the configuration opts in.
    pub async fn connect_with_retry(
        config: &PostgresConfig,
        etl: &EtlBehaviorConfig,
        retry: &RetryConfig,
    ) -> Result<Self> {
        if retry.max_retries == 0 {
            return Self::connect(config, etl).await;
        }

        let policy = crate::migrate::create_backoff(retry);
        let attempts = AtomicU32::new(0);

        backoff::future::retry(policy, || async {
            match Self::connect(config, etl).await {
                Ok(loader) => Ok(loader),
                Err(e) => {
                    let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    if e.is_retryable() && n <= retry.max_retries {
                        warn!("Destination connect attempt {} failed: {}", n, e);
                        Err(backoff::Error::transient(e))
                    } else {
                        Err(backoff::Error::permanent(e))
                    }
                }
            }
        })
        .await
        .map_err(|e| {
            let n = attempts.load(Ordering::Relaxed);
            if n > 1 {
                Error::RetryExhausted {
                    attempts: n,
                    message: "destination connection".into(),
                    last_error: Some(Box::new(e)),
                }
            } else {
                e
            }
        })
    }

    /// Test connectivity.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::postgres_query("", "Ping failed", e))?;
        Ok(())
    }

    /// Create the destination schema and tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.client
            .batch_execute(DESTINATION_DDL)
            .await
            .map_err(|e| Error::postgres_query("", "Schema bootstrap failed", e))?;
        info!("Ensured destination schema exists");
        Ok(())
    }

    /// Get table row count.
    pub async fn count_rows(&self, kind: EntityKind) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", kind.target_table());
        let row = self
            .client
            .query_one(&query, &[])
            .await
            .map_err(|e| classify(kind, e))?;
        Ok(row.get(0))
    }

    /// Persist one translated batch with a single idempotent bulk operation.
    ///
    /// Inserts are keyed on each kind's natural uniqueness (identity for the
    /// entity kinds, the foreign-key pair for the join kinds) with conflicts
    /// skipped, so re-running the pipeline never duplicates rows and never
    /// errors on rows that already exist. The caller guarantees referenced
    /// kinds are fully loaded first; referential readiness is not re-checked
    /// here.
    #[instrument(skip(self, batch), fields(table = %batch.kind(), count = batch.len()))]
    pub async fn upsert(&self, batch: &RecordBatch) -> Result<Upserted> {
        let outcome = match batch {
            RecordBatch::Genres(rows) => self.upsert_rows(EntityKind::Genre, rows).await?,
            RecordBatch::Persons(rows) => self.upsert_rows(EntityKind::Person, rows).await?,
            RecordBatch::FilmWorks(rows) => self.upsert_rows(EntityKind::FilmWork, rows).await?,
            RecordBatch::GenreFilmWorks(rows) => {
                self.upsert_rows(EntityKind::GenreFilmWork, rows).await?
            }
            RecordBatch::PersonFilmWorks(rows) => {
                self.upsert_rows(EntityKind::PersonFilmWork, rows).await?
            }
        };

        debug!(
            "Upserted {} rows to {} ({} already present)",
            outcome.inserted,
            batch.kind().target_table(),
            outcome.skipped
        );
        Ok(outcome)
    }

    /// Identity values present in the destination for one kind.
    pub async fn fetch_ids(&self, kind: EntityKind) -> Result<HashSet<Uuid>> {
        let query = format!("SELECT id FROM {}", kind.target_table());
        let rows = self
            .client
            .query(&query, &[])
            .await
            .map_err(|e| classify(kind, e))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Timestamp-free content keys present in the destination for one kind,
    /// matching [`RecordBatch::content_keys`] on the source side.
    pub async fn fetch_content_keys(&self, kind: EntityKind) -> Result<HashSet<String>> {
        let query = match kind {
            EntityKind::Genre => "SELECT id, name FROM content.genre",
            EntityKind::Person => "SELECT id, full_name FROM content.person",
            EntityKind::FilmWork => "SELECT id, title, type FROM content.film_work",
            EntityKind::GenreFilmWork => {
                "SELECT film_work_id, genre_id FROM content.genre_film_work"
            }
            EntityKind::PersonFilmWork => {
                "SELECT film_work_id, person_id, role FROM content.person_film_work"
            }
        };

        let rows = self
            .client
            .query(query, &[])
            .await
            .map_err(|e| classify(kind, e))?;

        let keys = rows
            .iter()
            .map(|row| match kind {
                EntityKind::Genre | EntityKind::Person => {
                    format!("{}|{}", row.get::<_, Uuid>(0), row.get::<_, String>(1))
                }
                EntityKind::FilmWork => format!(
                    "{}|{}|{}",
                    row.get::<_, Uuid>(0),
                    row.get::<_, String>(1),
                    row.get::<_, String>(2)
                ),
                EntityKind::GenreFilmWork => {
                    format!("{}|{}", row.get::<_, Uuid>(0), row.get::<_, Uuid>(1))
                }
                EntityKind::PersonFilmWork => format!(
                    "{}|{}|{}",
                    row.get::<_, Uuid>(0),
                    row.get::<_, Uuid>(1),
                    row.get::<_, String>(2)
                ),
            })
            .collect();
        Ok(keys)
    }

    /// Direct access to the underlying client for advanced queries.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn upsert_rows<R: Persist>(&self, kind: EntityKind, rows: &[R]) -> Result<Upserted> {
        if rows.is_empty() {
            return Ok(Upserted::default());
        }

        let mut outcome = Upserted::default();
        for page in rows.chunks(self.page_size) {
            let sql = bulk_insert_sql(
                kind.target_table(),
                R::COLUMNS,
                R::CONFLICT_TARGET,
                page.len(),
            );
            let mut params: Vec<&(dyn ToSql + Sync)> =
                Vec::with_capacity(page.len() * R::COLUMNS.len());
            for row in page {
                row.push_params(&mut params);
            }

            outcome.inserted += self.execute_page(kind, &sql, &params).await?;
            outcome.pages += 1;
        }
        outcome.skipped = rows.len() as u64 - outcome.inserted;
        Ok(outcome)
    }

    async fn execute_page(
        &self,
        kind: EntityKind,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64> {
        let fut = self.client.execute(sql, params);
        let result = match self.statement_timeout {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| Error::timeout(kind.target_table(), deadline.as_secs()))?,
            None => fut.await,
        };
        result.map_err(|e| classify(kind, e))
    }
}

/// Trait tying each record type to its destination columns, named field by
/// field so that reordering a struct cannot silently corrupt a write.
trait Persist {
    /// Destination column list, in bind order.
    const COLUMNS: &'static [&'static str];
    /// Conflict target for the idempotent insert.
    const CONFLICT_TARGET: &'static str;
    /// Push this record's fields in `COLUMNS` order.
    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>);
}

impl Persist for Genre {
    const COLUMNS: &'static [&'static str] = &["name", "description", "id", "created", "modified"];
    const CONFLICT_TARGET: &'static str = "(id)";

    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
        params.push(&self.name);
        params.push(&self.description);
        params.push(&self.id);
        params.push(&self.created);
        params.push(&self.modified);
    }
}

impl Persist for Person {
    const COLUMNS: &'static [&'static str] = &["full_name", "id", "created", "modified"];
    const CONFLICT_TARGET: &'static str = "(id)";

    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
        params.push(&self.full_name);
        params.push(&self.id);
        params.push(&self.created);
        params.push(&self.modified);
    }
}

impl Persist for FilmWork {
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "description",
        "creation_date",
        "type",
        "id",
        "rating",
        "created",
        "modified",
    ];
    const CONFLICT_TARGET: &'static str = "(id)";

    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
        params.push(&self.title);
        params.push(&self.description);
        params.push(&self.creation_date);
        params.push(&self.kind);
        params.push(&self.id);
        params.push(&self.rating);
        params.push(&self.created);
        params.push(&self.modified);
    }
}

impl Persist for GenreFilmWork {
    const COLUMNS: &'static [&'static str] = &["film_work_id", "genre_id", "id", "created"];
    const CONFLICT_TARGET: &'static str = "(film_work_id, genre_id)";

    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
        params.push(&self.film_work_id);
        params.push(&self.genre_id);
        params.push(&self.id);
        params.push(&self.created);
    }
}

impl Persist for PersonFilmWork {
    const COLUMNS: &'static [&'static str] =
        &["role", "film_work_id", "person_id", "id", "created"];
    const CONFLICT_TARGET: &'static str = "(film_work_id, person_id)";

    fn push_params<'a>(&'a self, params: &mut Vec<&'a (dyn ToSql + Sync)>) {
        params.push(&self.role);
        params.push(&self.film_work_id);
        params.push(&self.person_id);
        params.push(&self.id);
        params.push(&self.created);
    }
}

/// Build the multi-row `INSERT ... ON CONFLICT ... DO NOTHING` statement for
/// one page of records.
pub fn bulk_insert_sql(
    table: &str,
    columns: &[&str],
    conflict_target: &str,
    rows: usize,
) -> String {
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, columns.join(", "));
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..columns.len() {
            if col > 0 {
                sql.push_str(", ");
            }
            let _ = write!(sql, "${}", row * columns.len() + col + 1);
        }
        sql.push(')');
    }
    let _ = write!(sql, " ON CONFLICT {} DO NOTHING", conflict_target);
    sql
}

/// Classify a destination error. The expected identity/uniqueness conflicts
/// never surface (the insert skips them); any constraint state that does is
/// a genuine data problem.
fn classify(kind: EntityKind, e: tokio_postgres::Error) -> Error {
    if let Some(state) = e.code() {
        if matches!(
            *state,
            SqlState::FOREIGN_KEY_VIOLATION
                | SqlState::UNIQUE_VIOLATION
                | SqlState::CHECK_VIOLATION
                | SqlState::NOT_NULL_VIOLATION
        ) {
            return Error::constraint_violation(
                kind.target_table(),
                format!("constraint {} violated", state.code()),
                e,
            );
        }
        return Error::postgres_query(kind.target_table(), "Statement failed", e);
    }
    if e.is_closed() {
        Error::postgres_connection_pg("Connection lost", e)
    } else {
        Error::postgres_query(kind.target_table(), "Statement failed", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_bulk_insert_sql_placeholders() {
        let sql = bulk_insert_sql("content.genre", Genre::COLUMNS, "(id)", 2);
        assert!(sql.starts_with(
            "INSERT INTO content.genre (name, description, id, created, modified) VALUES "
        ));
        assert!(sql.contains("($1, $2, $3, $4, $5)"));
        assert!(sql.contains("($6, $7, $8, $9, $10)"));
        assert!(sql.ends_with("ON CONFLICT (id) DO NOTHING"));
    }

    #[test]
    fn test_join_kind_conflicts_key_on_fk_pair() {
        let sql = bulk_insert_sql(
            "content.genre_film_work",
            GenreFilmWork::COLUMNS,
            GenreFilmWork::CONFLICT_TARGET,
            1,
        );
        assert!(sql.ends_with("ON CONFLICT (film_work_id, genre_id) DO NOTHING"));

        let sql = bulk_insert_sql(
            "content.person_film_work",
            PersonFilmWork::COLUMNS,
            PersonFilmWork::CONFLICT_TARGET,
            1,
        );
        assert!(sql.ends_with("ON CONFLICT (film_work_id, person_id) DO NOTHING"));
    }

    #[test]
    fn test_params_match_columns_field_for_field() {
        let genre = Genre {
            id: Uuid::new_v4(),
            name: "Action".into(),
            description: Some("boom".into()),
            created: Utc::now(),
            modified: Utc::now(),
        };
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        genre.push_params(&mut params);
        assert_eq!(params.len(), Genre::COLUMNS.len());

        let film = FilmWork {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            description: None,
            creation_date: None,
            kind: crate::records::FilmWorkKind::Movie,
            rating: Some(92.0),
            created: Utc::now(),
            modified: Utc::now(),
        };
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        film.push_params(&mut params);
        assert_eq!(params.len(), FilmWork::COLUMNS.len());

        let join = PersonFilmWork {
            id: Uuid::new_v4(),
            role: "actor".into(),
            film_work_id: Uuid::new_v4(),
            person_id: Uuid::new_v4(),
            created: Utc::now(),
        };
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        join.push_params(&mut params);
        assert_eq!(params.len(), PersonFilmWork::COLUMNS.len());
    }

    #[test]
    fn test_page_count_math() {
        // 5000-row pages over 12001 records: 3 statements
        let rows = 12001usize;
        let pages = rows.div_ceil(5000);
        assert_eq!(pages, 3);
    }
}
