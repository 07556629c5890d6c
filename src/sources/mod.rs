//! Source adapters: the only extension point of the pipeline.
//!
//! An adapter knows how to list one site's events and, optionally, how to
//! enrich a single listing from its detail page. All HTTP goes through the
//! shared [`Fetcher`] in [`SourceContext`].

pub mod factory;
pub mod html_listing;
pub mod json_feed;

pub use factory::{build_adapters, parse_source_list};
pub use html_listing::HtmlListingSource;
pub use json_feed::JsonFeedSource;

use crate::error::{AdapterError, DetailError};
use crate::pipeline::ingestion::Fetcher;
use crate::types::{RawEventDetail, RawEventStub};
use async_trait::async_trait;
use std::sync::Arc;

/// Shared services handed to every adapter call.
#[derive(Clone)]
pub struct SourceContext {
    pub fetcher: Arc<Fetcher>,
}

impl SourceContext {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique name of this source; recorded on every event it produces
    fn name(&self) -> &str;

    /// Listing page; relative stub URLs are resolved against it
    fn source_url(&self) -> &str;

    /// Fetch the current listing. Partial results are fine.
    async fn list(&self, ctx: &SourceContext) -> Result<Vec<RawEventStub>, AdapterError>;

    /// Enrich one stub. `Ok(None)` means the adapter has nothing to add.
    async fn detail(&self, _ctx: &SourceContext, _stub: &RawEventStub) -> Result<Option<RawEventDetail>, DetailError> {
        Ok(None)
    }
}
