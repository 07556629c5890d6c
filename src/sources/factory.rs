use super::{HtmlListingSource, JsonFeedSource, SourceAdapter};
use crate::config::{SourceConfig, SourceKind};
use crate::error::{IngestError, Result};
use std::sync::Arc;
use tracing::debug;

/// Build adapters for the enabled sources, optionally restricted to `only`.
///
/// Naming a source in `only` that is not configured is an error; naming a
/// disabled one runs it anyway.
pub fn build_adapters(configs: &[SourceConfig], only: Option<&[String]>) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    if let Some(names) = only {
        if let Some(unknown) = names.iter().find(|n| !configs.iter().any(|c| &c.name == *n)) {
            return Err(IngestError::Config(format!("unknown source '{unknown}'")));
        }
    }

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    for config in configs {
        let selected = match only {
            Some(names) => names.iter().any(|n| n == &config.name),
            None => config.enabled,
        };
        if !selected {
            debug!(source = %config.name, "Source not selected");
            continue;
        }
        let adapter: Arc<dyn SourceAdapter> = match config.kind {
            SourceKind::JsonFeed => Arc::new(JsonFeedSource::new(config)),
            SourceKind::HtmlListing => Arc::new(HtmlListingSource::new(config)?),
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}

/// Split a comma-separated source list (`a,b , c`).
pub fn parse_source_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(name: &str, enabled: bool) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            kind: SourceKind::JsonFeed,
            url: format!("https://{name}.example/feed.json"),
            enabled,
            items_key: None,
            fields: HashMap::new(),
            selectors: HashMap::new(),
            fetch_detail: false,
        }
    }

    #[test]
    fn test_enabled_sources_by_default() {
        let configs = vec![source("a", true), source("b", false), source("c", true)];
        let names: Vec<_> = build_adapters(&configs, None)
            .unwrap()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_explicit_selection() {
        let configs = vec![source("a", true), source("b", false)];
        let only = parse_source_list(" b, ");
        let adapters = build_adapters(&configs, Some(&only)).unwrap();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].name(), "b");

        let bad = vec!["zzz".to_string()];
        assert!(matches!(build_adapters(&configs, Some(&bad)), Err(IngestError::Config(_))));
    }
}
