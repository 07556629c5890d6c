/// Defaults shared by configuration and the pipeline stages.

// Run coordination
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_LOCK_STALE_AFTER_MINS: i64 = 60;
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 15 * 60;

// Catalog maintenance
pub const DEFAULT_ARCHIVE_AFTER_HOURS: i64 = 36;
pub const DEFAULT_PRIMARY_GRACE_HOURS: i64 = 6;

// Fetching
pub const DEFAULT_FETCH_RETRIES: u32 = 3;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_MIN_HOST_INTERVAL_MS: u64 = 1_500;
pub const DEFAULT_USER_AGENT: &str = concat!("event_ingest/", env!("CARGO_PKG_VERSION"));

// Normalization
pub const DEFAULT_FALLBACK_CITY: &str = "Limassol";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const MIN_PLAUSIBLE_YEAR: i32 = 2020;
pub const MAX_YEARS_AHEAD: i32 = 3;

// Images
pub const DEFAULT_HIGH_RES_MIN_KB: u32 = 150;

// Trigger endpoint
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SECRET_HEADER: &str = "x-ingest-secret";

/// Titles that describe a listing page rather than an event.
///
/// English only. Greek and Russian equivalents are deliberately left out
/// until someone confirms which words the sources actually use.
pub const GENERIC_TITLES: &[&str] = &[
    "agenda",
    "calendar",
    "event",
    "events",
    "upcoming events",
    "program",
    "programme",
    "schedule",
    "tickets",
    "whats on",
    "what s on",
    "untitled",
    "home",
    "news",
];
