//! Quality gate: decides whether a canonical event may enter the catalog.
//!
//! Errors reject the event; warnings are logged and the event proceeds.

use crate::constants::MIN_PLAUSIBLE_YEAR;
use crate::pipeline::processing::normalize::dates::month_from_token;
use crate::pipeline::processing::normalize::is_generic_title;
use crate::types::CanonicalEvent;
use chrono::{DateTime, Datelike, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

static DATE_RANGE_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\d{1,2}(?:\s+(\p{L}+))?\s*[-–—]\s*\d{1,2}(?:\s+(\p{L}+))?\s*$").unwrap()
});

/// Types of quality issues the gate detects
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingData,
    InvalidFormat,
    OutOfRange,
    TemporalInconsistency,
    SuspiciousValue,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityIssue {
    pub kind: IssueKind,
    pub field: &'static str,
    pub description: String,
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.description)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<QualityIssue>,
    pub warnings: Vec<QualityIssue>,
}

impl ValidationReport {
    fn error(&mut self, kind: IssueKind, field: &'static str, description: impl Into<String>) {
        self.errors.push(QualityIssue { kind, field, description: description.into() });
    }

    fn warn(&mut self, kind: IssueKind, field: &'static str, description: impl Into<String>) {
        self.warnings.push(QualityIssue { kind, field, description: description.into() });
    }

    /// Errors joined into one line for the run's error list.
    pub fn error_summary(&self) -> String {
        self.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
    }
}

/// Titles like `14 - 28` or `14 - 28 Dec` are listing artifacts, not events.
pub fn is_date_range_title(title: &str) -> bool {
    match DATE_RANGE_TITLE_RE.captures(title) {
        Some(caps) => [caps.get(1), caps.get(2)]
            .into_iter()
            .flatten()
            .all(|word| month_from_token(word.as_str()).is_some()),
        None => false,
    }
}

fn is_absolute_http(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Assess an event. Pure: the outcome depends only on `event` and `now`.
pub fn validate(event: &CanonicalEvent, now: DateTime<Utc>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let title = event.title.trim();

    if title.chars().count() < 3 {
        report.error(IssueKind::MissingData, "title", "title is missing or shorter than 3 characters");
    } else if is_date_range_title(title) {
        report.error(IssueKind::InvalidFormat, "title", format!("title '{}' is a bare date range", title));
    } else if is_generic_title(title) {
        report.warn(IssueKind::SuspiciousValue, "title", format!("title '{}' is generic", title));
    }

    if event.start_at.year() < MIN_PLAUSIBLE_YEAR {
        report.error(
            IssueKind::OutOfRange,
            "start_at",
            format!("start year {} is implausible", event.start_at.year()),
        );
    }
    if let Some(end) = event.end_at {
        if end < event.start_at {
            report.error(IssueKind::TemporalInconsistency, "end_at", "end is before start");
        }
    }
    let still_running = event.end_at.map(|end| end >= now).unwrap_or(false);
    if event.start_at < now && !still_running {
        report.error(
            IssueKind::TemporalInconsistency,
            "start_at",
            format!("event started at {} and is over", event.start_at),
        );
    }
    if event.start_at > now + Duration::days(730) {
        report.warn(IssueKind::OutOfRange, "start_at", "start is more than two years away");
    }

    if event.source_url.trim().is_empty() {
        report.error(IssueKind::MissingData, "source_url", "source URL is missing");
    } else if !is_absolute_http(&event.source_url) {
        report.error(
            IssueKind::InvalidFormat,
            "source_url",
            format!("'{}' is not an absolute http(s) URL", event.source_url),
        );
    }

    if event.city.trim().is_empty() {
        report.error(IssueKind::MissingData, "city", "city is missing");
    }

    if event.description.is_none() {
        report.warn(IssueKind::MissingData, "description", "no description");
    }
    if event.venue_name().is_none() {
        report.warn(IssueKind::MissingData, "venue", "no venue");
    }
    if event.image_url.is_none() {
        report.warn(IssueKind::MissingData, "image_url", "no image");
    }

    report.valid = report.errors.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldOrigin, Provenance, VenueInfo};

    fn event(title: &str, start_at: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            title: title.to_string(),
            description: Some("Live music".into()),
            start_at,
            end_at: None,
            city: "Limassol".into(),
            venue: Some(VenueInfo { name: "Rialto".into(), ..Default::default() }),
            address: None,
            category: None,
            tags: vec![],
            price_min: None,
            price_max: None,
            currency: None,
            image_url: Some("https://cdn.example/a.jpg".into()),
            ticket_url: None,
            source_name: "test".into(),
            source_url: "https://site.example/e/1".into(),
            source_external_id: "abc".into(),
            language: "en".into(),
            is_high_res: None,
            image_size_kb: None,
            provenance: Provenance {
                start_at: FieldOrigin::Detail,
                city: FieldOrigin::Detail,
                language: FieldOrigin::Default,
                description: FieldOrigin::Detail,
                image: FieldOrigin::Detail,
            },
        }
    }

    #[test]
    fn test_future_event_passes() {
        let now = Utc::now();
        let report = validate(&event("Jazz Night", now + Duration::hours(1)), now);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_started_event_rejected_unless_running() {
        let now = Utc::now();
        let mut e = event("Jazz Night", now - Duration::hours(2));
        assert!(!validate(&e, now).valid);

        e.end_at = Some(now + Duration::hours(1));
        assert!(validate(&e, now).valid);
    }

    #[test]
    fn test_date_range_titles_rejected() {
        let now = Utc::now();
        for title in ["14 - 28", "14 - 28 Dec", "1 Nov – 3 Nov"] {
            let report = validate(&event(title, now + Duration::days(3)), now);
            assert!(!report.valid, "{title} should be rejected");
            assert_eq!(report.errors[0].field, "title");
        }
        assert!(!is_date_range_title("12 - 14 Angry Men"));
        assert!(!is_date_range_title("Jazz 14 - 28"));
    }

    #[test]
    fn test_structural_errors() {
        let now = Utc::now();
        let mut e = event("Jo", now + Duration::days(1));
        e.source_url = "/relative/path".into();
        e.city = " ".into();
        e.end_at = Some(now);
        let report = validate(&e, now);
        let fields: Vec<_> = report.errors.iter().map(|i| i.field).collect();
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"source_url"));
        assert!(fields.contains(&"city"));
        assert!(fields.contains(&"end_at"));
    }

    #[test]
    fn test_warnings_do_not_reject() {
        let now = Utc::now();
        let mut e = event("Events", now + Duration::days(800));
        e.description = None;
        e.venue = None;
        e.image_url = None;
        let report = validate(&e, now);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 5);
    }
}
