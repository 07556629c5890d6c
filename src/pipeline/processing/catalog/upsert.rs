use crate::error::StorageError;
use crate::infra::AssetStore;
use crate::pipeline::processing::normalize::slugify;
use crate::pipeline::storage::Storage;
use crate::types::{CanonicalEvent, CatalogRecord, RecordStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const MAX_SLUG_SUFFIX: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub record_id: Uuid,
    pub created: bool,
}

enum SlugChoice {
    /// A record from the same source already owns the slug
    Reuse(Uuid),
    Fresh(String),
}

struct ImageInfo {
    is_high_res: Option<bool>,
    size_kb: Option<u32>,
    local_path: Option<String>,
}

/// Writes canonical events into the catalog.
pub struct UpsertEngine {
    storage: Arc<dyn Storage>,
    assets: Option<Arc<dyn AssetStore>>,
    high_res_min_kb: u32,
}

impl UpsertEngine {
    pub fn new(storage: Arc<dyn Storage>, assets: Option<Arc<dyn AssetStore>>, high_res_min_kb: u32) -> Self {
        Self { storage, assets, high_res_min_kb }
    }

    /// Insert `event`, or update `existing_id` (a dedup match) in place.
    pub async fn upsert(
        &self,
        event: &CanonicalEvent,
        existing_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        let venue_id = match &event.venue {
            Some(venue) if !venue.name.trim().is_empty() => {
                Some(self.storage.upsert_venue(venue, &event.city, now).await?)
            }
            _ => None,
        };

        if let Some(id) = existing_id {
            if self.update_existing(id, event, venue_id, now).await? {
                return Ok(UpsertOutcome { record_id: id, created: false });
            }
        }

        let base_slug = format!("{}-{}", slugify(&event.title), event.start_at.format("%Y-%m-%d"));
        let slug = match self.resolve_slug(&base_slug, &event.source_name).await? {
            SlugChoice::Reuse(id) => {
                if self.update_existing(id, event, venue_id, now).await? {
                    return Ok(UpsertOutcome { record_id: id, created: false });
                }
                base_slug
            }
            SlugChoice::Fresh(slug) => slug,
        };

        let series_id = self.series_for(event, venue_id).await?;
        let image = self.image_info(event, &slug, None).await;
        let record = build_record(Uuid::new_v4(), slug, event, venue_id, Some(series_id), image, now, now);
        let stored_id = self.storage.insert_event(&record).await?;
        let created = stored_id == record.id;
        debug!(record_id = %stored_id, slug = %record.slug, created, "Inserted catalog record");
        Ok(UpsertOutcome { record_id: stored_id, created })
    }

    /// Overwrite a stored record with fresh data. Returns false if it no longer exists.
    async fn update_existing(
        &self,
        id: Uuid,
        event: &CanonicalEvent,
        venue_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let Some(existing) = self.storage.get_event(id).await? else {
            return Ok(false);
        };
        let series_id = match existing.series_id {
            Some(series) => series,
            None => self.series_for(event, venue_id).await?,
        };
        let image = self.image_info(event, &existing.slug, existing.image_local_path.clone()).await;
        let mut record = build_record(
            id,
            existing.slug.clone(),
            event,
            venue_id,
            Some(series_id),
            image,
            existing.created_at,
            now,
        );
        record.is_primary_occurrence = existing.is_primary_occurrence;
        if existing.source_name != event.source_name {
            // a cross-source match keeps the owning source's identity
            record.source_name = existing.source_name;
            record.source_external_id = existing.source_external_id;
            record.source_url = existing.source_url;
        }
        self.storage.update_event(&record).await?;
        debug!(record_id = %id, slug = %record.slug, "Updated catalog record");
        Ok(true)
    }

    async fn resolve_slug(&self, base: &str, source_name: &str) -> Result<SlugChoice, StorageError> {
        for n in 1..=MAX_SLUG_SUFFIX {
            let candidate = if n == 1 { base.to_string() } else { format!("{base}-{n}") };
            match self.storage.find_by_slug(&candidate).await? {
                None => return Ok(SlugChoice::Fresh(candidate)),
                Some(owner) if owner.source_name == source_name => return Ok(SlugChoice::Reuse(owner.id)),
                Some(_) => continue,
            }
        }
        let short = Uuid::new_v4().simple().to_string();
        Ok(SlugChoice::Fresh(format!("{base}-{}", &short[..8])))
    }

    async fn series_for(&self, event: &CanonicalEvent, venue_id: Option<Uuid>) -> Result<Uuid, StorageError> {
        Ok(self
            .storage
            .find_series_id(&event.title, venue_id, &event.source_name)
            .await?
            .unwrap_or_else(Uuid::new_v4))
    }

    async fn image_info(&self, event: &CanonicalEvent, slug: &str, existing_local: Option<String>) -> ImageInfo {
        let unchanged = ImageInfo {
            is_high_res: event.is_high_res,
            size_kb: event.image_size_kb,
            local_path: existing_local.clone(),
        };
        let (Some(assets), Some(url)) = (&self.assets, event.image_url.as_deref()) else {
            return unchanged;
        };

        let size_kb = assets.head_size_kb(url).await.or(event.image_size_kb);
        let local_path = assets
            .download_image(url, slug)
            .await
            .map(|p| p.to_string_lossy().into_owned())
            .or(existing_local);
        ImageInfo {
            is_high_res: size_kb.map(|kb| kb >= self.high_res_min_kb).or(event.is_high_res),
            size_kb,
            local_path,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    id: Uuid,
    slug: String,
    event: &CanonicalEvent,
    venue_id: Option<Uuid>,
    series_id: Option<Uuid>,
    image: ImageInfo,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CatalogRecord {
    CatalogRecord {
        id,
        slug,
        title: event.title.clone(),
        description: event.description.clone(),
        start_at: event.start_at,
        end_at: event.end_at,
        city: event.city.clone(),
        venue_id,
        address: event.address.clone(),
        category: event.category.clone(),
        tags: event.tags.clone(),
        price_min: event.price_min,
        price_max: event.price_max,
        currency: event.currency.clone(),
        image_url: event.image_url.clone(),
        image_local_path: image.local_path,
        ticket_url: event.ticket_url.clone(),
        source_name: event.source_name.clone(),
        source_url: event.source_url.clone(),
        source_external_id: event.source_external_id.clone(),
        language: event.language.clone(),
        is_high_res: image.is_high_res,
        image_size_kb: image.size_kb,
        status: RecordStatus::Published,
        series_id,
        is_primary_occurrence: false,
        last_seen_at: now,
        created_at,
        updated_at: now,
    }
}
