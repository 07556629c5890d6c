use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Minimal listing-page data for one event, as produced by a source's `list()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawEventStub {
    pub title: String,
    /// Stable identity of the listing within its source
    pub url: String,
    pub date_hint: Option<String>,
    pub image_url: Option<String>,
    /// Year scraped from the surrounding page (e.g. a "December 2026" heading)
    pub context_year: Option<i32>,
}

/// Venue data as supplied by a source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VenueInfo {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
    pub kind: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

/// Optional enrichment of a stub, read from the event's own page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawEventDetail {
    pub description: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub venue: Option<VenueInfo>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    /// Language hint from the adapter (ISO 639-1)
    pub language: Option<String>,
}

/// Where a canonical field's value came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    Stub,
    Detail,
    Venue,
    /// Derived from text (date hint parsing, city or language detection)
    Inferred,
    Default,
    Absent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub start_at: FieldOrigin,
    pub city: FieldOrigin,
    pub language: FieldOrigin,
    pub description: FieldOrigin,
    pub image: FieldOrigin,
}

/// A fully resolved, source-agnostic event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub city: String,
    pub venue: Option<VenueInfo>,
    pub address: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub source_name: String,
    pub source_url: String,
    pub source_external_id: String,
    pub language: String,
    pub is_high_res: Option<bool>,
    pub image_size_kb: Option<u32>,
    pub provenance: Provenance,
}

impl CanonicalEvent {
    pub fn venue_name(&self) -> Option<&str> {
        self.venue.as_ref().map(|v| v.name.as_str()).filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Published,
    Archived,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Published => "published",
            RecordStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "published" => Some(RecordStatus::Published),
            "archived" => Some(RecordStatus::Archived),
            _ => None,
        }
    }
}

/// A persisted catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub city: String,
    pub venue_id: Option<Uuid>,
    pub address: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub image_local_path: Option<String>,
    pub ticket_url: Option<String>,
    pub source_name: String,
    pub source_url: String,
    pub source_external_id: String,
    pub language: String,
    pub is_high_res: Option<bool>,
    pub image_size_kb: Option<u32>,
    pub status: RecordStatus,
    pub series_id: Option<Uuid>,
    pub is_primary_occurrence: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome of one source within a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceResult {
    pub source_name: String,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// Set when the source failed as a whole (listing error, timeout, panic)
    pub fatal_error: Option<String>,
    pub duration_ms: u64,
}

/// One row of the run-history table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_events: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub source_results: BTreeMap<String, SourceResult>,
}

impl IngestRun {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: None,
            status: RunStatus::Running,
            total_events: 0,
            created_count: 0,
            updated_count: 0,
            skipped_count: 0,
            error_count: 0,
            errors: Vec::new(),
            source_results: BTreeMap::new(),
        }
    }

    /// Mark the run completed with the aggregated result.
    pub fn complete(&mut self, result: &IngestResult, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(now);
        self.total_events = result.total;
        self.created_count = result.created;
        self.updated_count = result.updated;
        self.skipped_count = result.skipped;
        self.error_count = result.errors.len();
        self.errors = result.errors.clone();
        self.source_results = result
            .sources
            .iter()
            .map(|s| (s.source_name.clone(), s.clone()))
            .collect();
    }

    /// Mark the run failed with the fatal error that ended it.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(now);
        self.errors.push(error);
        self.error_count = self.errors.len();
    }
}

/// Aggregated outcome of `run_ingestion`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResult {
    pub run_id: Uuid,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub sources: Vec<SourceResult>,
    pub archived: usize,
    pub primaries: usize,
}

impl IngestResult {
    pub fn absorb(&mut self, source: SourceResult) {
        self.total += source.total;
        self.created += source.created;
        self.updated += source.updated;
        self.skipped += source.skipped;
        if let Some(fatal) = &source.fatal_error {
            self.errors.push(format!("{}: {}", source.source_name, fatal));
        }
        self.errors.extend(source.errors.iter().cloned());
        self.sources.push(source);
    }
}
