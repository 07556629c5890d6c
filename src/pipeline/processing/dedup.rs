//! Cross-source duplicate detection.
//!
//! An exact source-identity hit wins; otherwise published records in the
//! same city are compared by start time and title. Ambiguous pairs do not merge.

use crate::error::StorageError;
use crate::pipeline::processing::normalize::{is_generic_title, normalize_title};
use crate::pipeline::storage::{DedupCandidate, Storage};
use crate::types::CanonicalEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

const JACCARD_THRESHOLD: f64 = 0.5;

/// Id of an existing record describing the same event, if any.
pub async fn find_duplicate(
    candidate: &CanonicalEvent,
    storage: &dyn Storage,
) -> Result<Option<Uuid>, StorageError> {
    if let Some(id) = storage
        .find_by_source_identity(&candidate.source_name, &candidate.source_external_id)
        .await?
    {
        return Ok(Some(id));
    }

    let start = candidate.start_at;
    let window_end = std::cmp::max(
        start + Duration::days(1),
        candidate.end_at.map(|end| end + Duration::days(1)).unwrap_or(start),
    );
    let mut nearby = storage
        .find_published_in_window(&candidate.city, start - Duration::days(1), window_end)
        .await?;
    nearby.sort_by_key(|c| (c.start_at - start).num_seconds().abs());

    let matched = nearby.into_iter().find(|existing| is_same_event(candidate, existing));
    if let Some(existing) = &matched {
        debug!(
            title = %candidate.title,
            source = %candidate.source_name,
            matched = %existing.id,
            "Fuzzy duplicate found"
        );
    }
    Ok(matched.map(|m| m.id))
}

/// Fuzzy comparison of a new event against one stored record.
pub fn is_same_event(candidate: &CanonicalEvent, existing: &DedupCandidate) -> bool {
    starts_close(candidate.start_at, candidate.end_at, existing.start_at)
        && titles_match(
            &candidate.title,
            &existing.title,
            candidate.venue_name(),
            existing.venue_name.as_deref(),
        )
}

fn starts_close(start: DateTime<Utc>, end: Option<DateTime<Utc>>, other: DateTime<Utc>) -> bool {
    if start.date_naive() == other.date_naive() {
        return true;
    }
    let gap = (start - other).abs();
    match end.filter(|end| *end - start >= Duration::days(1)) {
        Some(end) => gap <= std::cmp::max(Duration::days(7), end - start),
        None => gap <= Duration::hours(2),
    }
}

fn titles_match(a: &str, b: &str, venue_a: Option<&str>, venue_b: Option<&str>) -> bool {
    if is_generic_title(a) || is_generic_title(b) {
        return false;
    }
    let (a, b) = (normalize_title(a), normalize_title(b));
    if a == b {
        return true;
    }

    let venues = match (venue_a, venue_b) {
        (Some(x), Some(y)) => Some(venue_agrees(x, y)),
        _ => None,
    };
    if contains_words(&a, &b) || contains_words(&b, &a) {
        return venues != Some(false);
    }
    jaccard(&a, &b) >= JACCARD_THRESHOLD && venues == Some(true)
}

fn venue_agrees(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_title(a), normalize_title(b));
    !a.is_empty() && !b.is_empty() && (a == b || contains_words(&a, &b) || contains_words(&b, &a))
}

/// Whether `needle`'s words appear contiguously in `haystack`. Both are normalized.
fn contains_words(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && format!(" {haystack} ").contains(&format!(" {needle} "))
}

fn jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split(' ').filter(|w| !w.is_empty()).collect();
    let wb: HashSet<&str> = b.split(' ').filter(|w| !w.is_empty()).collect();
    let union = wa.union(&wb).count();
    if union == 0 {
        return 0.0;
    }
    wa.intersection(&wb).count() as f64 / union as f64
}
