use super::{SourceAdapter, SourceContext};
use crate::config::SourceConfig;
use crate::error::{AdapterError, DetailError};
use crate::pipeline::processing::normalize::absolute_url;
use crate::types::{RawEventDetail, RawEventStub, VenueInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A source publishing its events as a JSON array of flat objects.
///
/// Besides the stub fields, items may carry `description`, `venue`, `city`
/// and an RFC 3339 `start`; these are served back as the item's detail.
pub struct JsonFeedSource {
    name: String,
    url: String,
    items_key: Option<String>,
    fields: HashMap<String, String>,
    details: Mutex<HashMap<String, RawEventDetail>>,
}

impl JsonFeedSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            items_key: config.items_key.clone(),
            fields: config.fields.clone(),
            details: Mutex::new(HashMap::new()),
        }
    }

    fn field(&self, item: &Map<String, Value>, key: &str) -> Option<String> {
        let name = self.fields.get(key).map(String::as_str).unwrap_or(key);
        match item.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Extract stubs (and inline details) from a feed body.
    pub fn parse_feed(&self, body: &str) -> Result<(Vec<RawEventStub>, HashMap<String, RawEventDetail>), AdapterError> {
        let value: Value = serde_json::from_str(body)?;
        let items = match (&value, &self.items_key) {
            (Value::Array(items), _) => items,
            (Value::Object(obj), Some(key)) => obj.get(key).and_then(Value::as_array).ok_or_else(|| {
                AdapterError::Listing { message: format!("feed has no array under '{key}'") }
            })?,
            _ => {
                return Err(AdapterError::Listing {
                    message: "feed body is not an array of events".to_string(),
                })
            }
        };

        let mut stubs = Vec::new();
        let mut details = HashMap::new();
        for item in items.iter().filter_map(Value::as_object) {
            let (Some(title), Some(url)) = (self.field(item, "title"), self.field(item, "url")) else {
                debug!(source = %self.name, "Skipping feed item without title or url");
                continue;
            };
            let url = absolute_url(&self.url, &url);
            let stub = RawEventStub {
                title,
                url: url.clone(),
                date_hint: self.field(item, "date"),
                image_url: self.field(item, "image"),
                context_year: None,
            };

            let start_at = self
                .field(item, "start")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let detail = RawEventDetail {
                description: self.field(item, "description"),
                start_at,
                venue: self.field(item, "venue").map(|name| VenueInfo { name, ..Default::default() }),
                city: self.field(item, "city"),
                ..Default::default()
            };
            if detail != RawEventDetail::default() {
                details.insert(url, detail);
            }
            stubs.push(stub);
        }
        Ok((stubs, details))
    }
}

#[async_trait]
impl SourceAdapter for JsonFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, ctx), fields(source = %self.name))]
    async fn list(&self, ctx: &SourceContext) -> Result<Vec<RawEventStub>, AdapterError> {
        let body = ctx.fetcher.get_text(&self.url).await?;
        let (stubs, details) = self.parse_feed(&body)?;
        info!("Feed listed {} events", stubs.len());
        match self.details.lock() {
            Ok(mut cache) => *cache = details,
            Err(_) => warn!("Detail cache lock poisoned; continuing without inline details"),
        }
        Ok(stubs)
    }

    async fn detail(&self, _ctx: &SourceContext, stub: &RawEventStub) -> Result<Option<RawEventDetail>, DetailError> {
        let cache = self.details.lock().map_err(|_| DetailError::Other {
            message: "detail cache lock poisoned".to_string(),
        })?;
        Ok(cache.get(&stub.url).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;

    fn config(items_key: Option<&str>, fields: &[(&str, &str)]) -> SourceConfig {
        SourceConfig {
            name: "feed".into(),
            kind: SourceKind::JsonFeed,
            url: "https://feed.example/api/events".into(),
            enabled: true,
            items_key: items_key.map(str::to_string),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            selectors: HashMap::new(),
            fetch_detail: false,
        }
    }

    #[test]
    fn test_parse_plain_array() {
        let source = JsonFeedSource::new(&config(None, &[]));
        let body = r#"[
            {"title": "Jazz Night", "url": "/e/1", "date": "14 Dec", "image": "https://cdn.example/1.jpg"},
            {"title": "", "url": "/e/2"},
            {"title": "Opera", "url": "https://feed.example/e/3", "venue": "Rialto", "start": "2026-12-20T19:00:00+02:00"}
        ]"#;
        let (stubs, details) = source.parse_feed(body).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].url, "https://feed.example/e/1");
        assert_eq!(stubs[0].date_hint.as_deref(), Some("14 Dec"));
        let opera = &details["https://feed.example/e/3"];
        assert_eq!(opera.venue.as_ref().map(|v| v.name.as_str()), Some("Rialto"));
        assert_eq!(opera.start_at.map(|s| s.to_rfc3339()).as_deref(), Some("2026-12-20T17:00:00+00:00"));
        assert!(!details.contains_key("https://feed.example/e/1"));
    }

    #[test]
    fn test_items_key_and_field_overrides() {
        let source = JsonFeedSource::new(&config(Some("data"), &[("title", "name"), ("url", "link")]));
        let body = r#"{"data": [{"name": "Jazz", "link": "https://x.example/1", "date": 20261214}]}"#;
        let (stubs, _) = source.parse_feed(body).unwrap();
        assert_eq!(stubs[0].title, "Jazz");
        assert_eq!(stubs[0].date_hint.as_deref(), Some("20261214"));
    }

    #[test]
    fn test_wrong_shape_is_a_listing_error() {
        let source = JsonFeedSource::new(&config(None, &[]));
        assert!(matches!(source.parse_feed(r#"{"events": []}"#), Err(AdapterError::Listing { .. })));
        assert!(matches!(source.parse_feed("not json"), Err(AdapterError::Json(_))));
    }
}
