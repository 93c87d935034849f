//! # Filmworks ETL
//!
//! A Rust library for migrating a movies catalog from SQLite to PostgreSQL.
//!
//! ## Features
//!
//! - **Idempotent loading**: `ON CONFLICT ... DO NOTHING` keyed on each
//!   table's natural uniqueness, so re-runs never duplicate rows
//! - **Batched extraction**: bounded batches with an explicit cursor, no
//!   whole-table loads
//! - **Dependency ordering**: genres and persons before film works, join
//!   tables last
//! - **Consistency check**: independent re-query of both stores after a run
//! - **Retry logic**: opt-in bounded backoff for destination connection setup
//! - **Progress tracking**: real-time progress updates via callbacks
//! - **Metrics**: built-in counters for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filmworks_etl::{EtlConfig, MigrationClient};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EtlConfig::builder()
//!         .sqlite_path("db.sqlite")
//!         .user("app")
//!         .password("123qwe")
//!         .dbname("movies_database")
//!         .build()?;
//!
//!     let client = MigrationClient::new(config).await?;
//!     let result = client.run().await?;
//!
//!     println!("Migrated {} records", result.total_inserted());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod migrate;
pub mod postgres;
pub mod records;
pub mod schema;
pub mod sqlite;
pub mod verify;

// Re-exports for convenience
pub use config::{EtlConfig, EtlConfigBuilder};
pub use error::{Error, Result};
pub use migrate::{MigrateProgress, MigratePhase, MigrationClient, MigrationResult};
pub use postgres::PgLoader;
pub use records::{EntityKind, FilmWork, FilmWorkKind, Genre, GenreFilmWork, Person, PersonFilmWork, RecordBatch};
pub use sqlite::{Batch, Cursor, SqliteExtractor};
pub use verify::{ConsistencyChecker, ConsistencyReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
