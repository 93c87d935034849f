//! Destination DDL for filmworks-etl.
//!
//! The destination tables are normally created by external migration
//! tooling; this module carries the equivalent DDL so dev environments and
//! integration tests can bootstrap a database with
//! [`PgLoader::ensure_schema`](crate::postgres::PgLoader::ensure_schema).

/// DDL for the `content` schema and the five destination tables.
///
/// Primary keys are the source-assigned UUIDs. The join tables carry unique
/// indexes over their foreign-key pairs; those indexes are what the
/// `ON CONFLICT ... DO NOTHING` inserts key on. The rating CHECK mirrors the
/// destination's [0, 100] range rule, so out-of-range ratings are rejected
/// here rather than by the pipeline.
pub const DESTINATION_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS content;

CREATE TABLE IF NOT EXISTS content.genre (
    id uuid PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created timestamp with time zone,
    modified timestamp with time zone
);

CREATE TABLE IF NOT EXISTS content.person (
    id uuid PRIMARY KEY,
    full_name TEXT NOT NULL,
    created timestamp with time zone,
    modified timestamp with time zone
);

CREATE TABLE IF NOT EXISTS content.film_work (
    id uuid PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    creation_date DATE,
    rating FLOAT CHECK (rating IS NULL OR (rating >= 0 AND rating <= 100)),
    type TEXT NOT NULL,
    created timestamp with time zone,
    modified timestamp with time zone
);

CREATE TABLE IF NOT EXISTS content.genre_film_work (
    id uuid PRIMARY KEY,
    film_work_id uuid NOT NULL REFERENCES content.film_work (id) ON DELETE CASCADE,
    genre_id uuid NOT NULL REFERENCES content.genre (id) ON DELETE CASCADE,
    created timestamp with time zone
);

CREATE UNIQUE INDEX IF NOT EXISTS film_work_genre_idx
    ON content.genre_film_work (film_work_id, genre_id);

CREATE TABLE IF NOT EXISTS content.person_film_work (
    id uuid PRIMARY KEY,
    role TEXT NOT NULL,
    film_work_id uuid NOT NULL REFERENCES content.film_work (id) ON DELETE CASCADE,
    person_id uuid NOT NULL REFERENCES content.person (id) ON DELETE CASCADE,
    created timestamp with time zone
);

CREATE UNIQUE INDEX IF NOT EXISTS film_work_person_idx
    ON content.person_film_work (film_work_id, person_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EntityKind;

    #[test]
    fn test_ddl_creates_every_target_table() {
        for kind in EntityKind::LOAD_ORDER {
            assert!(
                DESTINATION_DDL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", kind.target_table())),
                "missing DDL for {}",
                kind.target_table()
            );
        }
    }

    #[test]
    fn test_join_tables_have_unique_pair_indexes() {
        assert!(DESTINATION_DDL.contains("ON content.genre_film_work (film_work_id, genre_id)"));
        assert!(DESTINATION_DDL.contains("ON content.person_film_work (film_work_id, person_id)"));
    }

    #[test]
    fn test_rating_range_is_a_destination_concern() {
        assert!(DESTINATION_DDL.contains("rating >= 0 AND rating <= 100"));
    }
}
