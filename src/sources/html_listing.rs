use super::{SourceAdapter, SourceContext};
use crate::config::SourceConfig;
use crate::error::{AdapterError, DetailError, IngestError};
use crate::pipeline::processing::normalize::absolute_url;
use crate::types::{RawEventDetail, RawEventStub};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").unwrap());
static HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h1, h2").unwrap());
static OG_DESCRIPTION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:description"], meta[name="description"]"#).unwrap());
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).unwrap());

fn parse_selector(source: &str, key: &str, css: &str) -> Result<Selector, IngestError> {
    Selector::parse(css)
        .map_err(|e| IngestError::Config(format!("source '{source}': bad '{key}' selector '{css}': {e:?}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_year(text: &str) -> Option<i32> {
    YEAR_RE.captures(text).and_then(|c| c[1].parse().ok())
}

/// A source whose listing page is scraped with configured CSS selectors.
pub struct HtmlListingSource {
    name: String,
    url: String,
    item: Selector,
    title: Option<Selector>,
    link: Selector,
    date: Option<Selector>,
    image: Option<Selector>,
    context_year: Option<Selector>,
    description: Option<Selector>,
    fetch_detail: bool,
}

impl HtmlListingSource {
    pub fn new(config: &SourceConfig) -> Result<Self, IngestError> {
        let optional = |key: &str| -> Result<Option<Selector>, IngestError> {
            config
                .selectors
                .get(key)
                .map(|css| parse_selector(&config.name, key, css))
                .transpose()
        };
        let item = optional("item")?.ok_or_else(|| {
            IngestError::Config(format!("source '{}': html_listing needs an 'item' selector", config.name))
        })?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            item,
            title: optional("title")?,
            link: optional("link")?.unwrap_or(parse_selector(&config.name, "link", "a[href]")?),
            date: optional("date")?,
            image: optional("image")?,
            context_year: optional("context_year")?,
            description: optional("description")?,
            fetch_detail: config.fetch_detail,
        })
    }

    /// Extract stubs from a listing page.
    pub fn parse_listing(&self, html: &str) -> Vec<RawEventStub> {
        let document = Html::parse_document(html);
        let page_year = self
            .context_year
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .or_else(|| document.select(&HEADING).next())
            .and_then(|el| first_year(&text_of(el)));

        let mut stubs = Vec::new();
        for item in document.select(&self.item) {
            let link = item.select(&self.link).next();
            let Some(href) = link.and_then(|a| a.value().attr("href")) else {
                debug!(source = %self.name, "Skipping listing item without a link");
                continue;
            };
            let title = match &self.title {
                Some(sel) => item.select(sel).next().map(text_of),
                None => link.map(text_of),
            }
            .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let date_hint = self
                .date
                .as_ref()
                .and_then(|sel| item.select(sel).next())
                .map(text_of)
                .filter(|d| !d.is_empty());
            let image_url = self
                .image
                .as_ref()
                .and_then(|sel| item.select(sel).next())
                .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
                .map(|src| absolute_url(&self.url, src));

            stubs.push(RawEventStub {
                title,
                url: absolute_url(&self.url, href),
                date_hint,
                image_url,
                context_year: page_year,
            });
        }
        stubs
    }

    /// Read OpenGraph data and the configured description block from an event page.
    pub fn parse_detail(&self, html: &str, page_url: &str) -> Option<RawEventDetail> {
        let document = Html::parse_document(html);
        let description = self
            .description
            .as_ref()
            .and_then(|sel| document.select(sel).next())
            .map(|el| el.inner_html())
            .or_else(|| {
                document
                    .select(&OG_DESCRIPTION)
                    .find_map(|m| m.value().attr("content").map(str::to_string))
            })
            .filter(|d| !d.trim().is_empty());
        let image_url = document
            .select(&OG_IMAGE)
            .find_map(|m| m.value().attr("content"))
            .map(|src| absolute_url(page_url, src));

        if description.is_none() && image_url.is_none() {
            return None;
        }
        Some(RawEventDetail { description, image_url, ..Default::default() })
    }
}

#[async_trait]
impl SourceAdapter for HtmlListingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self, ctx), fields(source = %self.name))]
    async fn list(&self, ctx: &SourceContext) -> Result<Vec<RawEventStub>, AdapterError> {
        let html = ctx.fetcher.get_text(&self.url).await?;
        let stubs = self.parse_listing(&html);
        info!("Listing page yielded {} events", stubs.len());
        Ok(stubs)
    }

    async fn detail(&self, ctx: &SourceContext, stub: &RawEventStub) -> Result<Option<RawEventDetail>, DetailError> {
        if !self.fetch_detail {
            return Ok(None);
        }
        let html = ctx.fetcher.get_text(&stub.url).await?;
        Ok(self.parse_detail(&html, &stub.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceKind;
    use std::collections::HashMap;

    fn config(selectors: &[(&str, &str)]) -> SourceConfig {
        SourceConfig {
            name: "theatre".into(),
            kind: SourceKind::HtmlListing,
            url: "https://theatre.example/whats-on/".into(),
            enabled: true,
            items_key: None,
            fields: HashMap::new(),
            selectors: selectors.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            fetch_detail: true,
        }
    }

    const LISTING: &str = r#"
        <html><body>
          <h1>What's on - December 2026</h1>
          <div class="event">
            <a href="/show/swan-lake"><h3>Swan Lake</h3></a>
            <span class="date">14 Dec</span>
            <img data-src="/img/swan.jpg">
          </div>
          <div class="event">
            <a href="https://tickets.example/x"><h3>  Nutcracker  </h3></a>
            <span class="date">20 - 22 Dec</span>
          </div>
          <div class="event"><h3>No link here</h3></div>
        </body></html>"#;

    #[test]
    fn test_parse_listing() {
        let source = HtmlListingSource::new(&config(&[
            ("item", "div.event"),
            ("title", "h3"),
            ("date", ".date"),
            ("image", "img"),
        ]))
        .unwrap();
        let stubs = source.parse_listing(LISTING);
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].title, "Swan Lake");
        assert_eq!(stubs[0].url, "https://theatre.example/show/swan-lake");
        assert_eq!(stubs[0].date_hint.as_deref(), Some("14 Dec"));
        assert_eq!(stubs[0].image_url.as_deref(), Some("https://theatre.example/img/swan.jpg"));
        assert_eq!(stubs[0].context_year, Some(2026));
        assert_eq!(stubs[1].title, "Nutcracker");
        assert_eq!(stubs[1].url, "https://tickets.example/x");
    }

    #[test]
    fn test_missing_item_selector_is_config_error() {
        assert!(matches!(HtmlListingSource::new(&config(&[])), Err(IngestError::Config(_))));
        assert!(matches!(
            HtmlListingSource::new(&config(&[("item", "div[")])),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_parse_detail_reads_open_graph() {
        let source = HtmlListingSource::new(&config(&[("item", "div.event")])).unwrap();
        let page = r#"<html><head>
            <meta property="og:description" content="A classic ballet">
            <meta property="og:image" content="/img/og.jpg">
        </head><body></body></html>"#;
        let detail = source.parse_detail(page, "https://theatre.example/show/swan-lake").unwrap();
        assert_eq!(detail.description.as_deref(), Some("A classic ballet"));
        assert_eq!(detail.image_url.as_deref(), Some("https://theatre.example/img/og.jpg"));
        assert!(source.parse_detail("<html></html>", "https://theatre.example/").is_none());
    }
}
