use crate::constants::*;
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub fetch: FetchConfig,
    pub normalize: NormalizeConfig,
    pub images: ImageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data/catalog.db") }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of sources crawled at once
    pub concurrency: usize,
    /// A `running` row older than this no longer holds the lock
    pub lock_stale_after_mins: i64,
    pub source_timeout_secs: u64,
    pub archive_after_hours: i64,
    pub primary_grace_hours: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            lock_stale_after_mins: DEFAULT_LOCK_STALE_AFTER_MINS,
            source_timeout_secs: DEFAULT_SOURCE_TIMEOUT_SECS,
            archive_after_hours: DEFAULT_ARCHIVE_AFTER_HOURS,
            primary_grace_hours: DEFAULT_PRIMARY_GRACE_HOURS,
        }
    }
}

impl IngestConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub retries: u32,
    pub timeout_secs: u64,
    pub backoff_ms: u64,
    pub min_host_interval_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_FETCH_RETRIES,
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            min_host_interval_ms: DEFAULT_MIN_HOST_INTERVAL_MS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A city the text detector recognizes, with its spellings in other scripts.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CityAlias {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl CityAlias {
    fn new(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub fallback_city: String,
    pub default_language: String,
    /// Offset applied to wall-clock times parsed from date hints
    pub utc_offset_minutes: i32,
    pub cities: Vec<CityAlias>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            fallback_city: DEFAULT_FALLBACK_CITY.to_string(),
            default_language: DEFAULT_LANGUAGE.to_string(),
            utc_offset_minutes: 0,
            cities: vec![
                CityAlias::new("Limassol", &["Lemesos", "Λεμεσός", "Λεμεσο", "Лимассол"]),
                CityAlias::new("Nicosia", &["Lefkosia", "Λευκωσία", "Никосия"]),
                CityAlias::new("Larnaca", &["Larnaka", "Λάρνακα", "Ларнака"]),
                CityAlias::new("Paphos", &["Pafos", "Πάφος", "Пафос"]),
                CityAlias::new("Ayia Napa", &["Agia Napa", "Αγία Νάπα", "Айя-Напа"]),
                CityAlias::new("Protaras", &["Πρωταράς", "Протарас"]),
                CityAlias::new("Famagusta", &["Ammochostos", "Αμμόχωστος", "Фамагуста"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub high_res_min_kb: u32,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("data/images"),
            high_res_min_kb: DEFAULT_HIGH_RES_MIN_KB,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub secret_header: String,
    /// Shared secret for the trigger endpoint; usually supplied via INGEST_SECRET
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            secret_header: DEFAULT_SECRET_HEADER.to_string(),
            secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: "logs".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    JsonFeed,
    HtmlListing,
}

/// A configured source served by one of the generic adapters.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// JSON feeds: key holding the event array when the body is an object
    #[serde(default)]
    pub items_key: Option<String>,
    /// JSON feeds: overrides for `title`, `url`, `date`, `image` field names
    #[serde(default)]
    pub fields: HashMap<String, String>,
    /// HTML listings: CSS selectors keyed by `item`, `title`, `link`, `date`,
    /// `image`, `context_year`, `description`
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    /// HTML listings: fetch each event page for enrichment
    #[serde(default)]
    pub fetch_detail: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Loads `config.toml` (or the given path) and applies environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        config.check()?;
        Ok(config)
    }

    /// Like `load`, but falls back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.apply_env();
            Ok(config)
        }
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("INGEST_DB_PATH") {
            if !db.trim().is_empty() {
                self.database.path = PathBuf::from(db);
            }
        }
        if let Ok(secret) = std::env::var("INGEST_SECRET") {
            if !secret.trim().is_empty() {
                self.server.secret = Some(secret);
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.ingest.concurrency == 0 {
            return Err(IngestError::Config("ingest.concurrency must be at least 1".into()));
        }
        if self.fetch.retries == 0 {
            return Err(IngestError::Config("fetch.retries must be at least 1".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(IngestError::Config(format!("duplicate source name '{}'", source.name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_constants() {
        let config = Config::default();
        assert_eq!(config.ingest.concurrency, 2);
        assert_eq!(config.fetch.min_host_interval_ms, 1_500);
        assert_eq!(config.ingest.archive_after_hours, 36);
        assert_eq!(config.normalize.fallback_city, "Limassol");
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[ingest]
concurrency = 4

[[sources]]
name = "city_hall"
kind = "html_listing"
url = "https://example.com/agenda"
selectors = {{ item = ".event", title = "h3" }}
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.ingest.concurrency, 4);
        assert_eq!(config.fetch.retries, 3);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].kind, SourceKind::HtmlListing);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[0].selectors.get("item").map(String::as_str), Some(".event"));
    }

    #[test]
    fn test_rejects_duplicate_source_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[sources]]
name = "a"
kind = "json_feed"
url = "https://example.com/a.json"

[[sources]]
name = "a"
kind = "json_feed"
url = "https://example.com/b.json"
"#
        )
        .unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate source name"));
    }
}
