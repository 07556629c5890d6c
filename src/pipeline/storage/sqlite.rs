use super::{DedupCandidate, LockOutcome, SlugOwner, Storage};
use crate::error::StorageError;
use crate::pipeline::processing::normalize::slugify;
use crate::types::{CatalogRecord, IngestRun, RecordStatus, RunStatus, VenueInfo};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS venues (
    id          TEXT PRIMARY KEY,
    slug        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    city        TEXT,
    address     TEXT,
    area        TEXT,
    kind        TEXT,
    phone       TEXT,
    email       TEXT,
    website     TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id                     TEXT PRIMARY KEY,
    slug                   TEXT NOT NULL UNIQUE,
    title                  TEXT NOT NULL,
    description            TEXT,
    start_at               INTEGER NOT NULL,
    end_at                 INTEGER,
    city                   TEXT NOT NULL,
    venue_id               TEXT REFERENCES venues(id),
    address                TEXT,
    category               TEXT,
    tags                   TEXT NOT NULL DEFAULT '[]',
    price_min              REAL,
    price_max              REAL,
    currency               TEXT,
    image_url              TEXT,
    image_local_path       TEXT,
    ticket_url             TEXT,
    source_name            TEXT NOT NULL,
    source_url             TEXT NOT NULL,
    source_external_id     TEXT NOT NULL,
    language               TEXT NOT NULL,
    is_high_res            INTEGER,
    image_size_kb          INTEGER,
    status                 TEXT NOT NULL DEFAULT 'published',
    series_id              TEXT,
    is_primary_occurrence  INTEGER NOT NULL DEFAULT 0,
    last_seen_at           INTEGER NOT NULL,
    created_at             INTEGER NOT NULL,
    updated_at             INTEGER NOT NULL,
    UNIQUE (source_name, source_external_id)
);
CREATE INDEX IF NOT EXISTS idx_events_start ON events (start_at);
CREATE INDEX IF NOT EXISTS idx_events_series ON events (series_id);
CREATE TABLE IF NOT EXISTS ingest_runs (
    id              TEXT PRIMARY KEY,
    started_at      INTEGER NOT NULL,
    finished_at     INTEGER,
    status          TEXT NOT NULL,
    total_events    INTEGER NOT NULL DEFAULT 0,
    created_count   INTEGER NOT NULL DEFAULT 0,
    updated_count   INTEGER NOT NULL DEFAULT 0,
    skipped_count   INTEGER NOT NULL DEFAULT 0,
    error_count     INTEGER NOT NULL DEFAULT 0,
    errors          TEXT NOT NULL DEFAULT '[]',
    source_results  TEXT NOT NULL DEFAULT '{}'
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_ingest_runs_single_running
    ON ingest_runs (status) WHERE status = 'running';
"#;

const EVENT_COLUMNS: &str = "id, slug, title, description, start_at, end_at, city, venue_id, address, \
     category, tags, price_min, price_max, currency, image_url, image_local_path, ticket_url, \
     source_name, source_url, source_external_id, language, is_high_res, image_size_kb, status, \
     series_id, is_primary_occurrence, last_seen_at, created_at, updated_at";

const RUN_COLUMNS: &str = "id, started_at, finished_at, status, total_events, created_count, \
     updated_count, skipped_count, error_count, errors, source_results";

pub const STALE_LOCK_MESSAGE: &str = "stale lock released";

/// SQLite-backed catalog. Statements run on the blocking pool behind a mutex.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        info!("Opened catalog database at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }

    /// Every event row, oldest start first.
    pub async fn list_events(&self) -> Result<Vec<CatalogRecord>, StorageError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY start_at, id");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(record_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Override when a record was last seen by a run.
    pub async fn set_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE events SET last_seen_at = ?2 WHERE id = ?1",
                params![id.to_string(), ts(at)],
            )?;
            Ok(())
        })
        .await
    }
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ts(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt(format!("invalid id '{raw}': {e}")))
}

fn blank_to_none(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn record_from_row(row: &Row<'_>) -> Result<CatalogRecord, StorageError> {
    let status: String = row.get("status")?;
    let tags: String = row.get("tags")?;
    Ok(CatalogRecord {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        slug: row.get("slug")?,
        title: row.get("title")?,
        description: row.get("description")?,
        start_at: from_ts(row.get("start_at")?)?,
        end_at: row.get::<_, Option<i64>>("end_at")?.map(from_ts).transpose()?,
        city: row.get("city")?,
        venue_id: row
            .get::<_, Option<String>>("venue_id")?
            .map(|v| parse_uuid(&v))
            .transpose()?,
        address: row.get("address")?,
        category: row.get("category")?,
        tags: serde_json::from_str(&tags)?,
        price_min: row.get("price_min")?,
        price_max: row.get("price_max")?,
        currency: row.get("currency")?,
        image_url: row.get("image_url")?,
        image_local_path: row.get("image_local_path")?,
        ticket_url: row.get("ticket_url")?,
        source_name: row.get("source_name")?,
        source_url: row.get("source_url")?,
        source_external_id: row.get("source_external_id")?,
        language: row.get("language")?,
        is_high_res: row.get("is_high_res")?,
        image_size_kb: row.get("image_size_kb")?,
        status: RecordStatus::parse(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown record status '{status}'")))?,
        series_id: row
            .get::<_, Option<String>>("series_id")?
            .map(|v| parse_uuid(&v))
            .transpose()?,
        is_primary_occurrence: row.get("is_primary_occurrence")?,
        last_seen_at: from_ts(row.get("last_seen_at")?)?,
        created_at: from_ts(row.get("created_at")?)?,
        updated_at: from_ts(row.get("updated_at")?)?,
    })
}

fn run_from_row(row: &Row<'_>) -> Result<IngestRun, StorageError> {
    let status: String = row.get("status")?;
    let errors: String = row.get("errors")?;
    let source_results: String = row.get("source_results")?;
    Ok(IngestRun {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        started_at: from_ts(row.get("started_at")?)?,
        finished_at: row.get::<_, Option<i64>>("finished_at")?.map(from_ts).transpose()?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown run status '{status}'")))?,
        total_events: row.get::<_, i64>("total_events")? as usize,
        created_count: row.get::<_, i64>("created_count")? as usize,
        updated_count: row.get::<_, i64>("updated_count")? as usize,
        skipped_count: row.get::<_, i64>("skipped_count")? as usize,
        error_count: row.get::<_, i64>("error_count")? as usize,
        errors: serde_json::from_str(&errors)?,
        source_results: serde_json::from_str(&source_results)?,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn acquire_run_lock(&self, run: &IngestRun, stale_after: Duration) -> Result<LockOutcome, StorageError> {
        let run = run.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let fresh: Option<(String, i64)> = tx
                .query_row(
                    "SELECT id, started_at FROM ingest_runs
                     WHERE status = 'running' AND started_at >= ?1
                     ORDER BY started_at DESC LIMIT 1",
                    params![ts(run.started_at - stale_after)],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            if let Some((id, started_at)) = fresh {
                return Ok(LockOutcome::Held {
                    run_id: parse_uuid(&id)?,
                    started_at: from_ts(started_at)?,
                });
            }

            let stale_errors = serde_json::to_string(&[STALE_LOCK_MESSAGE])?;
            let released_stale = tx.execute(
                "UPDATE ingest_runs SET status = 'failed', finished_at = ?1, errors = ?2, error_count = 1
                 WHERE status = 'running'",
                params![ts(run.started_at), stale_errors],
            )?;
            if released_stale > 0 {
                warn!(released_stale, "Released stale ingestion lock");
            }

            tx.execute(
                "INSERT INTO ingest_runs (id, started_at, status) VALUES (?1, ?2, ?3)",
                params![run.id.to_string(), ts(run.started_at), run.status.as_str()],
            )?;
            tx.commit()?;
            debug!(run_id = %run.id, "Acquired ingestion lock");
            Ok(LockOutcome::Acquired { released_stale })
        })
        .await
    }

    async fn finish_run(&self, run: &IngestRun) -> Result<(), StorageError> {
        let run = run.clone();
        self.with_conn(move |conn| {
            let errors = serde_json::to_string(&run.errors)?;
            let source_results = serde_json::to_string(&run.source_results)?;
            conn.execute(
                "UPDATE ingest_runs SET finished_at = ?2, status = ?3, total_events = ?4,
                     created_count = ?5, updated_count = ?6, skipped_count = ?7, error_count = ?8,
                     errors = ?9, source_results = ?10
                 WHERE id = ?1",
                params![
                    run.id.to_string(),
                    run.finished_at.map(ts),
                    run.status.as_str(),
                    run.total_events as i64,
                    run.created_count as i64,
                    run.updated_count as i64,
                    run.skipped_count as i64,
                    run.error_count as i64,
                    errors,
                    source_results,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestRun>, StorageError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {RUN_COLUMNS} FROM ingest_runs ORDER BY started_at DESC LIMIT ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(run_from_row(row)?);
            }
            Ok(out)
        })
        .await
    }

    async fn upsert_venue(&self, venue: &VenueInfo, city: &str, now: DateTime<Utc>) -> Result<Uuid, StorageError> {
        let venue = venue.clone();
        let slug = slugify(&format!("{} {}", venue.name, city));
        let city = blank_to_none(&venue.city).unwrap_or_else(|| city.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO venues (id, slug, name, city, address, area, kind, phone, email, website, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(slug) DO UPDATE SET
                     address = COALESCE(excluded.address, venues.address),
                     area = COALESCE(excluded.area, venues.area),
                     kind = COALESCE(excluded.kind, venues.kind),
                     phone = COALESCE(excluded.phone, venues.phone),
                     email = COALESCE(excluded.email, venues.email),
                     website = COALESCE(excluded.website, venues.website),
                     updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    slug,
                    venue.name.trim(),
                    city,
                    blank_to_none(&venue.address),
                    blank_to_none(&venue.area),
                    blank_to_none(&venue.kind),
                    blank_to_none(&venue.phone),
                    blank_to_none(&venue.email),
                    blank_to_none(&venue.website),
                    ts(now),
                ],
            )?;
            let id: String = conn.query_row("SELECT id FROM venues WHERE slug = ?1", params![slug], |r| r.get(0))?;
            parse_uuid(&id)
        })
        .await
    }

    async fn find_by_source_identity(&self, source_name: &str, external_id: &str) -> Result<Option<Uuid>, StorageError> {
        let (source_name, external_id) = (source_name.to_string(), external_id.to_string());
        self.with_conn(move |conn| {
            let id: Option<String> = conn
                .query_row(
                    "SELECT id FROM events WHERE source_name = ?1 AND source_external_id = ?2",
                    params![source_name, external_id],
                    |r| r.get(0),
                )
                .optional()?;
            id.map(|id| parse_uuid(&id)).transpose()
        })
        .await
    }

    async fn find_published_in_window(
        &self,
        city: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DedupCandidate>, StorageError> {
        let city = city.trim().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.title, e.start_at, e.end_at, v.name
                 FROM events e LEFT JOIN venues v ON v.id = e.venue_id
                 WHERE e.status = 'published' AND e.city = ?1 COLLATE NOCASE
                   AND e.start_at BETWEEN ?2 AND ?3",
            )?;
            let mut rows = stmt.query(params![city, ts(from), ts(to)])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(DedupCandidate {
                    id: parse_uuid(&row.get::<_, String>(0)?)?,
                    title: row.get(1)?,
                    start_at: from_ts(row.get(2)?)?,
                    end_at: row.get::<_, Option<i64>>(3)?.map(from_ts).transpose()?,
                    venue_name: row.get(4)?,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<SlugOwner>, StorageError> {
        let slug = slug.to_string();
        self.with_conn(move |conn| {
            let owner: Option<(String, String)> = conn
                .query_row(
                    "SELECT id, source_name FROM events WHERE slug = ?1",
                    params![slug],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            owner
                .map(|(id, source_name)| Ok(SlugOwner { id: parse_uuid(&id)?, source_name }))
                .transpose()
        })
        .await
    }

    async fn find_series_id(
        &self,
        title: &str,
        venue_id: Option<Uuid>,
        source_name: &str,
    ) -> Result<Option<Uuid>, StorageError> {
        let (title, source_name) = (title.to_string(), source_name.to_string());
        self.with_conn(move |conn| {
            let series: Option<String> = conn
                .query_row(
                    "SELECT series_id FROM events
                     WHERE status = 'published' AND series_id IS NOT NULL
                       AND title = ?1 AND venue_id IS ?2 AND source_name = ?3
                     ORDER BY start_at LIMIT 1",
                    params![title, venue_id.map(|v| v.to_string()), source_name],
                    |r| r.get(0),
                )
                .optional()?;
            series.map(|s| parse_uuid(&s)).transpose()
        })
        .await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<CatalogRecord>, StorageError> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(record_from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert_event(&self, record: &CatalogRecord) -> Result<Uuid, StorageError> {
        let r = record.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO events ({EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)
                 ON CONFLICT(source_name, source_external_id) DO UPDATE SET
                     title = excluded.title,
                     description = excluded.description,
                     start_at = excluded.start_at,
                     end_at = excluded.end_at,
                     city = excluded.city,
                     venue_id = excluded.venue_id,
                     address = excluded.address,
                     category = excluded.category,
                     tags = excluded.tags,
                     price_min = excluded.price_min,
                     price_max = excluded.price_max,
                     currency = excluded.currency,
                     image_url = excluded.image_url,
                     image_local_path = COALESCE(excluded.image_local_path, events.image_local_path),
                     ticket_url = excluded.ticket_url,
                     source_url = excluded.source_url,
                     language = excluded.language,
                     is_high_res = excluded.is_high_res,
                     image_size_kb = excluded.image_size_kb,
                     status = 'published',
                     last_seen_at = excluded.last_seen_at,
                     updated_at = excluded.updated_at"
            );
            conn.execute(
                &sql,
                params![
                    r.id.to_string(),
                    r.slug,
                    r.title,
                    r.description,
                    ts(r.start_at),
                    r.end_at.map(ts),
                    r.city,
                    r.venue_id.map(|v| v.to_string()),
                    r.address,
                    r.category,
                    serde_json::to_string(&r.tags)?,
                    r.price_min,
                    r.price_max,
                    r.currency,
                    r.image_url,
                    r.image_local_path,
                    r.ticket_url,
                    r.source_name,
                    r.source_url,
                    r.source_external_id,
                    r.language,
                    r.is_high_res,
                    r.image_size_kb,
                    r.status.as_str(),
                    r.series_id.map(|s| s.to_string()),
                    r.is_primary_occurrence,
                    ts(r.last_seen_at),
                    ts(r.created_at),
                    ts(r.updated_at),
                ],
            )?;
            let id: String = conn.query_row(
                "SELECT id FROM events WHERE source_name = ?1 AND source_external_id = ?2",
                params![r.source_name, r.source_external_id],
                |row| row.get(0),
            )?;
            parse_uuid(&id)
        })
        .await
    }

    async fn update_event(&self, record: &CatalogRecord) -> Result<(), StorageError> {
        let r = record.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE events SET
                     slug = ?2, title = ?3, description = ?4, start_at = ?5, end_at = ?6, city = ?7,
                     venue_id = ?8, address = ?9, category = ?10, tags = ?11, price_min = ?12,
                     price_max = ?13, currency = ?14, image_url = ?15, image_local_path = ?16,
                     ticket_url = ?17, source_url = ?18, language = ?19, is_high_res = ?20,
                     image_size_kb = ?21, status = ?22, series_id = ?23, last_seen_at = ?24,
                     updated_at = ?25, source_name = ?26, source_external_id = ?27
                 WHERE id = ?1",
                params![
                    r.id.to_string(),
                    r.slug,
                    r.title,
                    r.description,
                    ts(r.start_at),
                    r.end_at.map(ts),
                    r.city,
                    r.venue_id.map(|v| v.to_string()),
                    r.address,
                    r.category,
                    serde_json::to_string(&r.tags)?,
                    r.price_min,
                    r.price_max,
                    r.currency,
                    r.image_url,
                    r.image_local_path,
                    r.ticket_url,
                    r.source_url,
                    r.language,
                    r.is_high_res,
                    r.image_size_kb,
                    r.status.as_str(),
                    r.series_id.map(|s| s.to_string()),
                    ts(r.last_seen_at),
                    ts(r.updated_at),
                    r.source_name,
                    r.source_external_id,
                ],
            )?;
            if changed == 0 {
                return Err(StorageError::Corrupt(format!("event {} vanished before update", r.id)));
            }
            Ok(())
        })
        .await
    }

    async fn archive_stale(&self, seen_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            let archived = conn.execute(
                "UPDATE events SET status = 'archived', updated_at = ?3
                 WHERE status = 'published' AND last_seen_at < ?1 AND start_at < ?2",
                params![ts(seen_before), ts(now), ts(now)],
            )?;
            Ok(archived)
        })
        .await
    }

    async fn recompute_primary_occurrences(&self, from: DateTime<Utc>) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("UPDATE events SET is_primary_occurrence = 0 WHERE is_primary_occurrence = 1", [])?;
            let marked = tx.execute(
                "UPDATE events SET is_primary_occurrence = 1
                 WHERE id IN (
                     SELECT id FROM (
                         SELECT id, ROW_NUMBER() OVER (PARTITION BY series_id ORDER BY start_at, id) AS rn
                         FROM events
                         WHERE series_id IS NOT NULL AND status = 'published' AND start_at >= ?1
                     ) WHERE rn = 1
                 )",
                params![ts(from)],
            )?;
            tx.commit()?;
            Ok(marked)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, external_id: &str, slug: &str, start_at: DateTime<Utc>) -> CatalogRecord {
        let now = Utc::now();
        CatalogRecord {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            title: "Jazz Night".into(),
            description: None,
            start_at,
            end_at: None,
            city: "Limassol".into(),
            venue_id: None,
            address: None,
            category: None,
            tags: vec!["music".into()],
            price_min: Some(10.0),
            price_max: None,
            currency: Some("EUR".into()),
            image_url: None,
            image_local_path: None,
            ticket_url: None,
            source_name: source.to_string(),
            source_url: format!("https://{source}.example/e/{external_id}"),
            source_external_id: external_id.to_string(),
            language: "en".into(),
            is_high_res: None,
            image_size_kb: None,
            status: RecordStatus::Published,
            series_id: None,
            is_primary_occurrence: false,
            last_seen_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_run_lock_is_exclusive() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let first = IngestRun::start(Utc::now());
        assert_eq!(
            storage.acquire_run_lock(&first, Duration::hours(1)).await.unwrap(),
            LockOutcome::Acquired { released_stale: 0 }
        );

        let second = IngestRun::start(Utc::now());
        match storage.acquire_run_lock(&second, Duration::hours(1)).await.unwrap() {
            LockOutcome::Held { run_id, .. } => assert_eq!(run_id, first.id),
            other => panic!("expected held lock, got {:?}", other),
        }
        assert_eq!(storage.recent_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_lock_released() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let old = IngestRun::start(Utc::now() - Duration::hours(3));
        storage.acquire_run_lock(&old, Duration::hours(1)).await.unwrap();

        let fresh = IngestRun::start(Utc::now());
        assert_eq!(
            storage.acquire_run_lock(&fresh, Duration::hours(1)).await.unwrap(),
            LockOutcome::Acquired { released_stale: 1 }
        );
        let runs = storage.recent_runs(10).await.unwrap();
        let old_row = runs.iter().find(|r| r.id == old.id).unwrap();
        assert_eq!(old_row.status, RunStatus::Failed);
        assert_eq!(old_row.errors, vec![STALE_LOCK_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_finish_run_persists_counts() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let mut run = IngestRun::start(Utc::now());
        storage.acquire_run_lock(&run, Duration::hours(1)).await.unwrap();
        run.fail("boom".into(), Utc::now());
        storage.finish_run(&run).await.unwrap();

        let stored = &storage.recent_runs(1).await.unwrap()[0];
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.errors, vec!["boom".to_string()]);
        assert!(stored.finished_at.is_some());

        // lock is free again
        let next = IngestRun::start(Utc::now());
        assert!(matches!(
            storage.acquire_run_lock(&next, Duration::hours(1)).await.unwrap(),
            LockOutcome::Acquired { .. }
        ));
    }

    #[tokio::test]
    async fn test_insert_conflict_updates_existing_row() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let start = Utc::now() + Duration::days(3);
        let first = record("club", "abc", "jazz-night", start);
        let id = storage.insert_event(&first).await.unwrap();
        assert_eq!(id, first.id);

        let mut again = record("club", "abc", "jazz-night-other", start);
        again.title = "Jazz Night Live".into();
        let same = storage.insert_event(&again).await.unwrap();
        assert_eq!(same, first.id);

        let stored = storage.get_event(id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Jazz Night Live");
        assert_eq!(stored.slug, "jazz-night");
        assert_eq!(stored.tags, vec!["music".to_string()]);
        assert_eq!(storage.list_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_venue_upsert_converges_and_fills_blanks() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let bare = VenueInfo { name: "Rialto Theatre".into(), ..Default::default() };
        let a = storage.upsert_venue(&bare, "Limassol", now).await.unwrap();

        let richer = VenueInfo {
            name: "RIALTO theatre".into(),
            address: Some("Andrea Drousioti 19".into()),
            ..Default::default()
        };
        let b = storage.upsert_venue(&richer, "Limassol", now).await.unwrap();
        assert_eq!(a, b);

        let c = storage.upsert_venue(&bare, "Nicosia", now).await.unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_window_and_lookup_queries() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let start = Utc::now() + Duration::days(5);
        let mut rec = record("club", "abc", "jazz-night", start);
        rec.series_id = Some(Uuid::new_v4());
        storage.insert_event(&rec).await.unwrap();

        let hits = storage
            .find_published_in_window("LIMASSOL", start - Duration::days(1), start + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].venue_name, None);
        assert!(storage
            .find_published_in_window("Nicosia", start - Duration::days(1), start + Duration::days(1))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(storage.find_by_source_identity("club", "abc").await.unwrap(), Some(rec.id));
        assert_eq!(storage.find_by_source_identity("other", "abc").await.unwrap(), None);
        assert_eq!(
            storage.find_by_slug("jazz-night").await.unwrap(),
            Some(SlugOwner { id: rec.id, source_name: "club".into() })
        );
        // venue_id comparison is null-safe
        assert_eq!(
            storage.find_series_id("Jazz Night", None, "club").await.unwrap(),
            rec.series_id
        );
        assert_eq!(storage.find_series_id("Jazz Night", Some(Uuid::new_v4()), "club").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_archive_stale_only_touches_past_unseen_records() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let past_unseen = record("club", "a", "a", now - Duration::hours(5));
        let past_seen = record("club", "b", "b", now - Duration::hours(5));
        let future_unseen = record("club", "c", "c", now + Duration::days(2));
        for r in [&past_unseen, &past_seen, &future_unseen] {
            storage.insert_event(r).await.unwrap();
        }
        storage.set_last_seen(past_unseen.id, now - Duration::hours(48)).await.unwrap();
        storage.set_last_seen(future_unseen.id, now - Duration::hours(48)).await.unwrap();

        let archived = storage.archive_stale(now - Duration::hours(36), now).await.unwrap();
        assert_eq!(archived, 1);
        let status = |id| {
            let storage = storage.clone();
            async move { storage.get_event(id).await.unwrap().unwrap().status }
        };
        assert_eq!(status(past_unseen.id).await, RecordStatus::Archived);
        assert_eq!(status(past_seen.id).await, RecordStatus::Published);
        assert_eq!(status(future_unseen.id).await, RecordStatus::Published);
    }

    #[tokio::test]
    async fn test_primary_recompute_marks_earliest_upcoming() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let now = Utc::now();
        let series = Uuid::new_v4();
        let mut ids = Vec::new();
        for (i, offset) in [-24i64, 24, 48].iter().enumerate() {
            let mut r = record("club", &format!("s{i}"), &format!("s{i}"), now + Duration::hours(*offset));
            r.series_id = Some(series);
            r.is_primary_occurrence = i == 0;
            storage.insert_event(&r).await.unwrap();
            ids.push(r.id);
        }

        let marked = storage.recompute_primary_occurrences(now - Duration::hours(6)).await.unwrap();
        assert_eq!(marked, 1);
        let flags: Vec<bool> = storage
            .list_events()
            .await
            .unwrap()
            .iter()
            .map(|r| r.is_primary_occurrence)
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }
}
