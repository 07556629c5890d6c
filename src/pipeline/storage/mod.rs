//! Catalog persistence.
//!
//! The pipeline talks to the catalog only through [`Storage`]; [`SqliteStorage`]
//! is the production backend.

pub mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use crate::types::{CatalogRecord, IngestRun, VenueInfo};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Result of trying to take the run lock.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    /// The new run row was inserted; `released_stale` older rows were failed.
    Acquired { released_stale: usize },
    /// A fresh `running` row already exists.
    Held { run_id: Uuid, started_at: DateTime<Utc> },
}

/// Minimal view of a published record, as the deduplicator needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupCandidate {
    pub id: Uuid,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub venue_name: Option<String>,
}

/// Record currently holding a slug.
#[derive(Debug, Clone, PartialEq)]
pub struct SlugOwner {
    pub id: Uuid,
    pub source_name: String,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // Run operations
    /// Atomically check for a fresh `running` row, fail stale ones and insert `run`.
    async fn acquire_run_lock(&self, run: &IngestRun, stale_after: Duration) -> Result<LockOutcome, StorageError>;
    async fn finish_run(&self, run: &IngestRun) -> Result<(), StorageError>;
    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestRun>, StorageError>;

    // Venue operations
    /// Insert or refresh a venue keyed by the slug of `(name, city)`.
    async fn upsert_venue(&self, venue: &VenueInfo, city: &str, now: DateTime<Utc>) -> Result<Uuid, StorageError>;

    // Event lookups
    async fn find_by_source_identity(&self, source_name: &str, external_id: &str) -> Result<Option<Uuid>, StorageError>;
    /// Published records in `city` (case-insensitive) starting within `[from, to]`.
    async fn find_published_in_window(
        &self,
        city: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DedupCandidate>, StorageError>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<SlugOwner>, StorageError>;
    async fn find_series_id(
        &self,
        title: &str,
        venue_id: Option<Uuid>,
        source_name: &str,
    ) -> Result<Option<Uuid>, StorageError>;
    async fn get_event(&self, id: Uuid) -> Result<Option<CatalogRecord>, StorageError>;

    // Event writes
    /// Insert a record; on a source-identity conflict the existing row is
    /// updated instead. Returns the id of the stored row.
    async fn insert_event(&self, record: &CatalogRecord) -> Result<Uuid, StorageError>;
    async fn update_event(&self, record: &CatalogRecord) -> Result<(), StorageError>;

    // Maintenance
    /// Archive published records unseen since `seen_before` whose start has passed.
    async fn archive_stale(&self, seen_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize, StorageError>;
    /// Reset primary flags and mark the earliest published member of each
    /// series starting at or after `from`. Returns the number of primaries.
    async fn recompute_primary_occurrences(&self, from: DateTime<Utc>) -> Result<usize, StorageError>;
}
