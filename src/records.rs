//! Canonical record types and per-row translation for filmworks-etl.
//!
//! One struct per source table. Translation from a raw SQLite row is a pure,
//! stateless function per kind: defaults are generated only when a field is
//! genuinely absent at the source, never to override a present identity or
//! timestamp.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type as SqlType;
use serde::{Deserialize, Serialize};
use tokio_postgres::types::{IsNull, ToSql, Type as PgType, to_sql_checked};
use uuid::Uuid;

/// The five entity kinds moved by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Independent entity: genre
    Genre,
    /// Independent entity: person
    Person,
    /// Aggregate entity: film work
    FilmWork,
    /// Join entity: genre <-> film work
    GenreFilmWork,
    /// Join entity: person <-> film work (with role)
    PersonFilmWork,
}

impl EntityKind {
    /// Dependency order for loading: independent entities first, join
    /// entities last. Join rows must never load before both sides exist
    /// because the destination enforces referential integrity.
    pub const LOAD_ORDER: [EntityKind; 5] = [
        EntityKind::Genre,
        EntityKind::Person,
        EntityKind::FilmWork,
        EntityKind::GenreFilmWork,
        EntityKind::PersonFilmWork,
    ];

    /// Source table name in SQLite.
    pub fn source_table(&self) -> &'static str {
        match self {
            EntityKind::Genre => "genre",
            EntityKind::Person => "person",
            EntityKind::FilmWork => "film_work",
            EntityKind::GenreFilmWork => "genre_film_work",
            EntityKind::PersonFilmWork => "person_film_work",
        }
    }

    /// Target table in PostgreSQL (schema-qualified).
    pub fn target_table(&self) -> &'static str {
        match self {
            EntityKind::Genre => "content.genre",
            EntityKind::Person => "content.person",
            EntityKind::FilmWork => "content.film_work",
            EntityKind::GenreFilmWork => "content.genre_film_work",
            EntityKind::PersonFilmWork => "content.person_film_work",
        }
    }

    /// Column projection pulled from the source for this kind.
    pub fn source_projection(&self) -> &'static str {
        match self {
            EntityKind::Genre => "name, description, id, created, modified",
            EntityKind::Person => "full_name, id, created, modified",
            EntityKind::FilmWork => {
                "title, description, creation_date, type, id, rating, created, modified"
            }
            EntityKind::GenreFilmWork => "film_work_id, genre_id, id, created",
            EntityKind::PersonFilmWork => "role, film_work_id, person_id, id, created",
        }
    }

    /// True for the two many-to-many kinds.
    pub fn is_join(&self) -> bool {
        matches!(self, EntityKind::GenreFilmWork | EntityKind::PersonFilmWork)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source_table())
    }
}

/// Film work type, modeled as an enum in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilmWorkKind {
    /// Feature film
    Movie,
    /// Episodic work
    TvShow,
}

impl FilmWorkKind {
    /// Wire representation, identical in source and destination.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilmWorkKind::Movie => "movie",
            FilmWorkKind::TvShow => "tv_show",
        }
    }

    /// Parse the source text value.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "movie" => Some(FilmWorkKind::Movie),
            "tv_show" => Some(FilmWorkKind::TvShow),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilmWorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ToSql for FilmWorkKind {
    fn to_sql(
        &self,
        ty: &PgType,
        out: &mut bytes::BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        self.as_str().to_sql(ty, out)
    }

    fn accepts(ty: &PgType) -> bool {
        <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// Genre record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genre {
    /// Source-assigned identity
    pub id: Uuid,
    /// Genre name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation timestamp, copied verbatim
    pub created: DateTime<Utc>,
    /// Modification timestamp, copied verbatim
    pub modified: DateTime<Utc>,
}

/// Person record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Source-assigned identity
    pub id: Uuid,
    /// Full name
    pub full_name: String,
    /// Creation timestamp, copied verbatim
    pub created: DateTime<Utc>,
    /// Modification timestamp, copied verbatim
    pub modified: DateTime<Utc>,
}

/// Film work record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmWork {
    /// Source-assigned identity
    pub id: Uuid,
    /// Title
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Optional creation date
    pub creation_date: Option<NaiveDate>,
    /// movie or tv_show
    pub kind: FilmWorkKind,
    /// Rating in [0, 100], passed through unchanged
    pub rating: Option<f64>,
    /// Creation timestamp, copied verbatim
    pub created: DateTime<Utc>,
    /// Modification timestamp, copied verbatim
    pub modified: DateTime<Utc>,
}

/// Genre <-> film work join record, unique on (film_work_id, genre_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreFilmWork {
    /// Source-assigned identity
    pub id: Uuid,
    /// Referenced film work
    pub film_work_id: Uuid,
    /// Referenced genre
    pub genre_id: Uuid,
    /// Creation timestamp, copied verbatim
    pub created: DateTime<Utc>,
}

/// Person <-> film work join record, unique on (film_work_id, person_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonFilmWork {
    /// Source-assigned identity
    pub id: Uuid,
    /// Role played in the film work
    pub role: String,
    /// Referenced film work
    pub film_work_id: Uuid,
    /// Referenced person
    pub person_id: Uuid,
    /// Creation timestamp, copied verbatim
    pub created: DateTime<Utc>,
}

/// A translated batch of one entity kind.
#[derive(Debug, Clone)]
pub enum RecordBatch {
    /// Genre rows
    Genres(Vec<Genre>),
    /// Person rows
    Persons(Vec<Person>),
    /// Film work rows
    FilmWorks(Vec<FilmWork>),
    /// Genre join rows
    GenreFilmWorks(Vec<GenreFilmWork>),
    /// Person join rows
    PersonFilmWorks(Vec<PersonFilmWork>),
}

impl RecordBatch {
    /// Entity kind of this batch.
    pub fn kind(&self) -> EntityKind {
        match self {
            RecordBatch::Genres(_) => EntityKind::Genre,
            RecordBatch::Persons(_) => EntityKind::Person,
            RecordBatch::FilmWorks(_) => EntityKind::FilmWork,
            RecordBatch::GenreFilmWorks(_) => EntityKind::GenreFilmWork,
            RecordBatch::PersonFilmWorks(_) => EntityKind::PersonFilmWork,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Genres(v) => v.len(),
            RecordBatch::Persons(v) => v.len(),
            RecordBatch::FilmWorks(v) => v.len(),
            RecordBatch::GenreFilmWorks(v) => v.len(),
            RecordBatch::PersonFilmWorks(v) => v.len(),
        }
    }

    /// True if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp-free content keys used by the consistency check.
    pub fn content_keys(&self) -> Vec<String> {
        match self {
            RecordBatch::Genres(v) => v.iter().map(Genre::content_key).collect(),
            RecordBatch::Persons(v) => v.iter().map(Person::content_key).collect(),
            RecordBatch::FilmWorks(v) => v.iter().map(FilmWork::content_key).collect(),
            RecordBatch::GenreFilmWorks(v) => v.iter().map(GenreFilmWork::content_key).collect(),
            RecordBatch::PersonFilmWorks(v) => v.iter().map(PersonFilmWork::content_key).collect(),
        }
    }

    /// Identity values carried by the batch.
    pub fn ids(&self) -> Vec<Uuid> {
        match self {
            RecordBatch::Genres(v) => v.iter().map(|r| r.id).collect(),
            RecordBatch::Persons(v) => v.iter().map(|r| r.id).collect(),
            RecordBatch::FilmWorks(v) => v.iter().map(|r| r.id).collect(),
            RecordBatch::GenreFilmWorks(v) => v.iter().map(|r| r.id).collect(),
            RecordBatch::PersonFilmWorks(v) => v.iter().map(|r| r.id).collect(),
        }
    }
}

impl Genre {
    /// Translate one source row (projection: name, description, id, created, modified).
    pub fn from_sqlite(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            description: row.get(1)?,
            id: identity_uuid(row, 2)?,
            created: column_timestamp(row, 3)?,
            modified: column_timestamp(row, 4)?,
        })
    }

    /// Stable timestamp-free comparison key.
    pub fn content_key(&self) -> String {
        format!("{}|{}", self.id, self.name)
    }
}

impl Person {
    /// Translate one source row (projection: full_name, id, created, modified).
    pub fn from_sqlite(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            full_name: row.get(0)?,
            id: identity_uuid(row, 1)?,
            created: column_timestamp(row, 2)?,
            modified: column_timestamp(row, 3)?,
        })
    }

    /// Stable timestamp-free comparison key.
    pub fn content_key(&self) -> String {
        format!("{}|{}", self.id, self.full_name)
    }
}

impl FilmWork {
    /// Translate one source row (projection: title, description,
    /// creation_date, type, id, rating, created, modified).
    pub fn from_sqlite(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind_raw: String = row.get(3)?;
        let kind = FilmWorkKind::parse(&kind_raw).ok_or_else(|| {
            conversion(3, TranslateError(format!("unknown film work type '{kind_raw}'")))
        })?;

        let rating: Option<f64> = row.get(5)?;
        if let Some(r) = rating {
            // Range enforcement is the destination schema's concern; the
            // value is passed through unchanged.
            if !(0.0..=100.0).contains(&r) {
                tracing::warn!("film_work rating {} outside [0, 100]", r);
            }
        }

        Ok(Self {
            title: row.get(0)?,
            description: row.get(1)?,
            creation_date: column_date(row, 2)?,
            kind,
            id: identity_uuid(row, 4)?,
            rating,
            created: column_timestamp(row, 6)?,
            modified: column_timestamp(row, 7)?,
        })
    }

    /// Stable timestamp-free comparison key.
    pub fn content_key(&self) -> String {
        format!("{}|{}|{}", self.id, self.title, self.kind)
    }
}

impl GenreFilmWork {
    /// Translate one source row (projection: film_work_id, genre_id, id, created).
    pub fn from_sqlite(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            film_work_id: foreign_uuid(row, 0)?,
            genre_id: foreign_uuid(row, 1)?,
            id: identity_uuid(row, 2)?,
            created: column_timestamp(row, 3)?,
        })
    }

    /// Stable comparison key over the uniqueness pair.
    pub fn content_key(&self) -> String {
        format!("{}|{}", self.film_work_id, self.genre_id)
    }
}

impl PersonFilmWork {
    /// Translate one source row (projection: role, film_work_id, person_id, id, created).
    pub fn from_sqlite(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            role: row.get(0)?,
            film_work_id: foreign_uuid(row, 1)?,
            person_id: foreign_uuid(row, 2)?,
            id: identity_uuid(row, 3)?,
            created: column_timestamp(row, 4)?,
        })
    }

    /// Stable comparison key over the uniqueness pair plus role.
    pub fn content_key(&self) -> String {
        format!("{}|{}|{}", self.film_work_id, self.person_id, self.role)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct TranslateError(String);

fn conversion(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, SqlType::Text, Box::new(err))
}

/// Identity column: parse when present, generate only when genuinely absent.
fn identity_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(raw.trim()).map_err(|e| conversion(idx, e)),
        None => Ok(Uuid::new_v4()),
    }
}

/// Foreign-key column: must be present and parseable.
fn foreign_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(raw.trim()).map_err(|e| conversion(idx, e)),
        None => Err(conversion(
            idx,
            TranslateError("missing foreign key value".into()),
        )),
    }
}

/// Parse a source timestamp. Accepts RFC 3339 plus the space-separated
/// dump forms SQLite stores (`2021-06-16 20:14:09.221838+00`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    None
}

fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_timestamp(raw.trim()).ok_or_else(|| {
            conversion(idx, TranslateError(format!("bad timestamp '{raw}'")))
        }),
        None => Ok(Utc::now()),
    }
}

fn column_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|e| conversion(idx, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_order_puts_join_kinds_last() {
        let order = EntityKind::LOAD_ORDER;
        let film_work_pos = order.iter().position(|k| *k == EntityKind::FilmWork).unwrap();
        for (pos, kind) in order.iter().enumerate() {
            if kind.is_join() {
                assert!(pos > film_work_pos, "{kind} must load after film_work");
            }
        }
    }

    #[test]
    fn test_film_work_kind_round_trip() {
        assert_eq!(FilmWorkKind::parse("movie"), Some(FilmWorkKind::Movie));
        assert_eq!(FilmWorkKind::parse("tv_show"), Some(FilmWorkKind::TvShow));
        assert_eq!(FilmWorkKind::parse("radio"), None);
        assert_eq!(FilmWorkKind::TvShow.as_str(), "tv_show");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        // The dump format the original SQLite database carries
        let dump = parse_timestamp("2021-06-16 20:14:09.221838+00").unwrap();
        assert_eq!(dump.to_rfc3339(), "2021-06-16T20:14:09.221838+00:00");

        // RFC 3339
        assert!(parse_timestamp("2021-06-16T20:14:09+00:00").is_some());

        // Naive form, interpreted as UTC
        assert!(parse_timestamp("2021-06-16 20:14:09").is_some());

        assert!(parse_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn test_content_keys_ignore_timestamps() {
        let id = Uuid::parse_str("3d8d9bf5-0d90-4353-88ba-4ccc5d2c07ff").unwrap();
        let a = Genre {
            id,
            name: "Action".into(),
            description: None,
            created: Utc::now(),
            modified: Utc::now(),
        };
        let mut b = a.clone();
        b.created = Utc::now();
        assert_eq!(a.content_key(), b.content_key());
    }

    #[test]
    fn test_projection_matches_translator_arity() {
        assert_eq!(
            EntityKind::Genre.source_projection().split(", ").count(),
            5
        );
        assert_eq!(
            EntityKind::FilmWork.source_projection().split(", ").count(),
            8
        );
        assert_eq!(
            EntityKind::PersonFilmWork
                .source_projection()
                .split(", ")
                .count(),
            5
        );
    }
}
