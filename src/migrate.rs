//! Core migration logic for filmworks-etl.

use crate::config::{EtlConfig, RetryConfig};
use crate::error::Result;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::postgres::PgLoader;
use crate::records::EntityKind;
use crate::sqlite::{Cursor, SqliteExtractor};
use crate::verify::{ConsistencyChecker, ConsistencyReport};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument};

/// Result of a completed migration run.
///
/// A run that fails aborts with an error instead; whatever earlier upserts
/// committed stays committed, and a re-run relies on the destination's
/// idempotent insert policy rather than rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Per-table results, in load order
    pub tables: Vec<TableResult>,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Timestamp when the run completed
    pub completed_at: String,
}

impl MigrationResult {
    /// Get total rows extracted from the source.
    pub fn total_extracted(&self) -> u64 {
        self.tables.iter().map(|t| t.extracted).sum()
    }

    /// Get total rows inserted into the destination.
    pub fn total_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    /// Get total rows skipped as already present.
    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }
}

/// Per-table migration result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    /// Source table name
    pub table: String,
    /// Rows extracted
    pub extracted: u64,
    /// Rows inserted
    pub inserted: u64,
    /// Rows skipped as already present
    pub skipped: u64,
    /// Extraction calls made
    pub batches: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl TableResult {
    fn new(kind: EntityKind) -> Self {
        Self {
            table: kind.source_table().to_string(),
            extracted: 0,
            inserted: 0,
            skipped: 0,
            batches: 0,
            duration_ms: 0,
        }
    }
}

/// Per-table source/destination row counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    /// Source table name
    pub table: String,
    /// Rows in the source
    pub source_rows: i64,
    /// Rows in the destination
    pub destination_rows: i64,
}

/// Migration progress callback.
pub type ProgressCallback = Box<dyn Fn(MigrateProgress) + Send + Sync>;

/// Migration progress update.
#[derive(Debug, Clone)]
pub struct MigrateProgress {
    /// Current table being migrated
    pub table: String,
    /// Current phase
    pub phase: MigratePhase,
    /// Records processed so far
    pub records_processed: u64,
    /// Total records to process (if known)
    pub total_records: Option<u64>,
    /// Percentage complete (0-100)
    pub percent: u8,
}

/// Migration phase. The run alternates Extracting and Loading per table,
/// in dependency order, until every table is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigratePhase {
    /// Connecting to databases
    Connecting,
    /// Pulling a batch from SQLite
    Extracting,
    /// Writing a batch to PostgreSQL
    Loading,
    /// Running the consistency check
    Verifying,
    /// Completed
    Completed,
    /// Failed
    Failed,
}

impl std::fmt::Display for MigratePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigratePhase::Connecting => write!(f, "connecting"),
            MigratePhase::Extracting => write!(f, "extracting"),
            MigratePhase::Loading => write!(f, "loading"),
            MigratePhase::Verifying => write!(f, "verifying"),
            MigratePhase::Completed => write!(f, "completed"),
            MigratePhase::Failed => write!(f, "failed"),
        }
    }
}

/// Main migration client.
///
/// Owns one source connection and one destination connection for the whole
/// run. Extraction cursors are plain values scoped to a single
/// `migrate_table` call, so a full re-run always restarts every table from
/// the beginning and leans on the destination's idempotent inserts.
pub struct MigrationClient {
    config: EtlConfig,
    extractor: SqliteExtractor,
    loader: PgLoader,
    metrics: Arc<Metrics>,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl MigrationClient {
    /// Create a new migration client.
    #[instrument(skip(config))]
    pub async fn new(config: EtlConfig) -> Result<Self> {
        info!("Initializing migration client...");

        let extractor = SqliteExtractor::open(&config.sqlite, config.etl.batch_size)?;
        let loader =
            PgLoader::connect_with_retry(&config.postgres, &config.etl, &config.retry).await?;

        if config.etl.auto_create_tables {
            loader.ensure_schema().await?;
        }

        Ok(Self {
            config,
            extractor,
            loader,
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
        })
    }

    /// Assemble a client from already-connected stores.
    pub fn from_parts(config: EtlConfig, extractor: SqliteExtractor, loader: PgLoader) -> Self {
        Self {
            config,
            extractor,
            loader,
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
        }
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(MigrateProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Test connectivity to both databases.
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity...");

        self.extractor.ping()?;
        info!("SQLite: OK");

        self.loader.ping().await?;
        info!("PostgreSQL: OK");

        Ok(())
    }

    /// Run the migration: every entity kind in dependency order, each one
    /// drained fully before the next begins. Any component failure aborts
    /// the whole run; there is no cross-kind rollback.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<MigrationResult> {
        let start = Instant::now();
        info!(
            "Starting migration {} -> {}",
            self.config.sqlite.path,
            self.config.postgres.masked()
        );

        let mut tables = Vec::with_capacity(EntityKind::LOAD_ORDER.len());
        for kind in EntityKind::LOAD_ORDER {
            match self.migrate_table(kind).await {
                Ok(result) => tables.push(result),
                Err(e) => {
                    error!("Migration failed on table {}: {}", kind, e);
                    self.report_progress(MigrateProgress {
                        table: kind.source_table().to_string(),
                        phase: MigratePhase::Failed,
                        records_processed: 0,
                        total_records: None,
                        percent: 0,
                    });
                    self.metrics
                        .record_run(false, start.elapsed().as_millis() as u64);
                    return Err(e);
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_run(true, duration_ms);

        let result = MigrationResult {
            tables,
            duration_ms,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };

        info!(
            "Migration completed in {}ms. Extracted: {}, inserted: {}, already present: {}",
            duration_ms,
            result.total_extracted(),
            result.total_inserted(),
            result.total_skipped()
        );

        Ok(result)
    }

    /// Migrate a single table: alternate batched extraction and idempotent
    /// loading until the source is exhausted for this kind.
    #[instrument(skip(self), fields(table = %kind))]
    async fn migrate_table(&self, kind: EntityKind) -> Result<TableResult> {
        let start = Instant::now();
        let total = self.extractor.count_rows(kind)? as u64;

        self.report(kind, MigratePhase::Extracting, 0, total);

        let mut cursor = Cursor::default();
        let mut result = TableResult::new(kind);

        loop {
            let batch = self.extractor.next_batch(kind, cursor)?;
            self.metrics.record_batch(batch.len() as u64);
            result.extracted += batch.len() as u64;
            result.batches += 1;
            cursor = batch.next;
            let exhausted = batch.exhausted;

            if !batch.is_empty() {
                self.report(kind, MigratePhase::Loading, result.extracted, total);
                let outcome = self.loader.upsert(&batch.records).await?;
                self.metrics
                    .record_upsert(outcome.inserted, outcome.skipped, outcome.pages);
                result.inserted += outcome.inserted;
                result.skipped += outcome.skipped;
            }

            if exhausted {
                break;
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        self.report(kind, MigratePhase::Completed, result.extracted, total);

        info!(
            "Migrated {}: {} extracted, {} inserted, {} already present ({} batches, {}ms)",
            kind, result.extracted, result.inserted, result.skipped, result.batches, result.duration_ms
        );

        Ok(result)
    }

    /// Get source vs destination row counts for every table.
    pub async fn status(&self) -> Result<Vec<TableStatus>> {
        let mut statuses = Vec::with_capacity(EntityKind::LOAD_ORDER.len());
        for kind in EntityKind::LOAD_ORDER {
            statuses.push(TableStatus {
                table: kind.source_table().to_string(),
                source_rows: self.extractor.count_rows(kind)?,
                destination_rows: self.loader.count_rows(kind).await?,
            });
        }
        Ok(statuses)
    }

    /// Run the consistency check against both stores.
    pub async fn verify(&self, full_content: bool) -> Result<ConsistencyReport> {
        ConsistencyChecker::new(&self.extractor, &self.loader)
            .check(full_content)
            .await
    }

    /// Get a snapshot of run metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn report(&self, kind: EntityKind, phase: MigratePhase, processed: u64, total: u64) {
        let percent = match phase {
            MigratePhase::Completed => 100,
            _ if total > 0 => ((processed * 100) / total).min(100) as u8,
            _ => 0,
        };
        self.report_progress(MigrateProgress {
            table: kind.source_table().to_string(),
            phase,
            records_processed: processed,
            total_records: if total > 0 { Some(total) } else { None },
            percent,
        });
    }

    /// Report progress via callback.
    fn report_progress(&self, progress: MigrateProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }
}

/// Create exponential backoff from config.
pub fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_backoff())
        .with_max_interval(config.max_backoff())
        .with_multiplier(config.multiplier)
        .with_max_elapsed_time(Some(Duration::from_secs(300)))
        .build()
}
