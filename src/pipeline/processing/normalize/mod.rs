//! Normalization: merge a listing stub and its optional detail into one
//! [`CanonicalEvent`], recording where each resolved field came from.

pub mod city;
pub mod dates;
pub mod language;
pub mod text;

use crate::config::NormalizeConfig;
use crate::constants::DESCRIPTION_MAX_CHARS;
use crate::error::NormalizationError;
use crate::types::{CanonicalEvent, FieldOrigin, Provenance, RawEventDetail, RawEventStub};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use reqwest::Url;

pub use dates::{parse_date_hint, DateContext, ParsedDates};
pub use text::{is_generic_title, normalize_title, slugify, source_external_id};

/// Resolve `url` against `base` when it is relative.
pub fn absolute_url(base: &str, url: &str) -> String {
    let url = url.trim();
    if Url::parse(url).is_ok() {
        return url.to_string();
    }
    Url::parse(base)
        .and_then(|b| b.join(url))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Build a canonical event from a stub and (optionally) its detail.
///
/// `source_url` is the page the stub was listed on; relative stub URLs are
/// resolved against it and it is a fallback for year inference.
pub fn normalize(
    stub: &RawEventStub,
    source_name: &str,
    source_url: &str,
    detail: Option<&RawEventDetail>,
    now: DateTime<Utc>,
    config: &NormalizeConfig,
) -> Result<CanonicalEvent, NormalizationError> {
    let title = text::collapse_whitespace(&stub.title);
    let event_url = absolute_url(source_url, &stub.url);

    let (start_at, end_at, start_origin) = match detail.and_then(|d| d.start_at) {
        Some(start) => (start, detail.and_then(|d| d.end_at), FieldOrigin::Detail),
        None => {
            let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
                .unwrap_or_else(|| Utc.fix());
            let year_url = if dates::year_in_url(&event_url).is_some() {
                event_url.as_str()
            } else {
                source_url
            };
            let ctx = DateContext::new(now, year_url, stub.context_year, offset);
            let parsed = stub
                .date_hint
                .as_deref()
                .and_then(|hint| parse_date_hint(hint, &ctx))
                .ok_or_else(|| NormalizationError::NoDate { title: title.clone() })?;
            (parsed.start, parsed.end, FieldOrigin::Inferred)
        }
    };

    if start_at < now - Duration::days(1) {
        return Err(NormalizationError::PastEvent { title, start_at });
    }

    let description = detail
        .and_then(|d| d.description.as_deref())
        .and_then(|raw| text::clean_description(raw, DESCRIPTION_MAX_CHARS));
    let description_origin = if description.is_some() { FieldOrigin::Detail } else { FieldOrigin::Absent };

    let (city, city_origin) =
        city::resolve_city(&title, detail, &config.cities, &config.fallback_city);
    let (language, language_origin) = language::detect_language(
        &title,
        description.as_deref(),
        detail.and_then(|d| d.language.as_deref()),
        &config.default_language,
    );

    let detail_image = detail.and_then(|d| non_blank(d.image_url.as_deref()));
    let stub_image = non_blank(stub.image_url.as_deref());
    let (image_url, image_origin) = match (detail_image, stub_image) {
        (Some(img), _) => (Some(absolute_url(&event_url, img)), FieldOrigin::Detail),
        (None, Some(img)) => (Some(absolute_url(source_url, img)), FieldOrigin::Stub),
        (None, None) => (None, FieldOrigin::Absent),
    };

    let venue = detail
        .and_then(|d| d.venue.clone())
        .filter(|v| !v.name.trim().is_empty());
    let address = detail
        .and_then(|d| non_blank(d.address.as_deref()))
        .or_else(|| venue.as_ref().and_then(|v| non_blank(v.address.as_deref())))
        .map(str::to_string);

    Ok(CanonicalEvent {
        source_external_id: source_external_id(&event_url),
        title,
        description,
        start_at,
        end_at: end_at.filter(|end| *end >= start_at),
        city,
        venue,
        address,
        category: detail.and_then(|d| non_blank(d.category.as_deref())).map(str::to_string),
        tags: detail.map(|d| d.tags.clone()).unwrap_or_default(),
        price_min: detail.and_then(|d| d.price_min),
        price_max: detail.and_then(|d| d.price_max),
        currency: detail.and_then(|d| non_blank(d.currency.as_deref())).map(str::to_uppercase),
        image_url,
        ticket_url: detail.and_then(|d| non_blank(d.ticket_url.as_deref())).map(str::to_string),
        source_name: source_name.to_string(),
        source_url: event_url,
        language,
        is_high_res: None,
        image_size_kb: None,
        provenance: Provenance {
            start_at: start_origin,
            city: city_origin,
            language: language_origin,
            description: description_origin,
            image: image_origin,
        },
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VenueInfo;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    fn stub(title: &str, url: &str, hint: Option<&str>) -> RawEventStub {
        RawEventStub {
            title: title.to_string(),
            url: url.to_string(),
            date_hint: hint.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_stub_only_event() {
        let stub = stub("  Jazz   Night ", "/events/2026/jazz-night", Some("14 Dec"));
        let event = normalize(&stub, "jazzclub", "https://jazz.example/agenda", None, now(), &NormalizeConfig::default())
            .unwrap();

        assert_eq!(event.title, "Jazz Night");
        assert_eq!(event.source_url, "https://jazz.example/events/2026/jazz-night");
        assert_eq!(event.start_at, Utc.with_ymd_and_hms(2026, 12, 14, 0, 0, 0).unwrap());
        assert_eq!(event.city, "Limassol");
        assert_eq!(event.language, "en");
        assert_eq!(event.source_external_id.len(), 16);
        assert_eq!(event.provenance.start_at, FieldOrigin::Inferred);
        assert_eq!(event.provenance.city, FieldOrigin::Default);
        assert_eq!(event.provenance.description, FieldOrigin::Absent);
    }

    #[test]
    fn test_detail_fields_take_precedence() {
        let stub = RawEventStub {
            image_url: Some("/img/small.jpg".into()),
            ..stub("Θέατρο", "https://theatre.example/show/1", Some("14 Dec"))
        };
        let start = Utc.with_ymd_and_hms(2026, 6, 2, 18, 0, 0).unwrap();
        let detail = RawEventDetail {
            description: Some("<p>Ένα έργο</p>".into()),
            start_at: Some(start),
            venue: Some(VenueInfo {
                name: "Rialto".into(),
                city: Some("Lemesos".into()),
                address: Some("Andrea Drousioti 19".into()),
                ..Default::default()
            }),
            image_url: Some("https://cdn.example/big.jpg".into()),
            currency: Some("eur".into()),
            ..Default::default()
        };
        let event = normalize(&stub, "theatre", "https://theatre.example/", Some(&detail), now(), &NormalizeConfig::default())
            .unwrap();

        assert_eq!(event.start_at, start);
        assert_eq!(event.provenance.start_at, FieldOrigin::Detail);
        assert_eq!(event.description.as_deref(), Some("Ένα έργο"));
        assert_eq!(event.city, "Limassol");
        assert_eq!(event.provenance.city, FieldOrigin::Venue);
        assert_eq!(event.language, "el");
        assert_eq!(event.image_url.as_deref(), Some("https://cdn.example/big.jpg"));
        assert_eq!(event.provenance.image, FieldOrigin::Detail);
        assert_eq!(event.address.as_deref(), Some("Andrea Drousioti 19"));
        assert_eq!(event.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_missing_date_is_an_error() {
        let stub = stub("Jazz Night", "https://jazz.example/e/1", Some("soon"));
        let err = normalize(&stub, "jazzclub", "https://jazz.example/", None, now(), &NormalizeConfig::default())
            .unwrap_err();
        assert!(matches!(err, NormalizationError::NoDate { .. }));
    }

    #[test]
    fn test_past_event_rejected() {
        let stub = stub("Jazz Night", "https://jazz.example/e/1", None);
        let detail = RawEventDetail {
            start_at: Some(now() - Duration::days(2)),
            ..Default::default()
        };
        let err = normalize(&stub, "jazzclub", "https://jazz.example/", Some(&detail), now(), &NormalizeConfig::default())
            .unwrap_err();
        assert!(matches!(err, NormalizationError::PastEvent { .. }));

        // within the one-day grace window
        let detail = RawEventDetail {
            start_at: Some(now() - Duration::hours(20)),
            ..Default::default()
        };
        assert!(normalize(&stub, "jazzclub", "https://jazz.example/", Some(&detail), now(), &NormalizeConfig::default())
            .is_ok());
    }

    #[test]
    fn test_offset_applies_to_hint_times() {
        let config = NormalizeConfig { utc_offset_minutes: 180, ..Default::default() };
        let stub = stub("Jazz Night", "https://jazz.example/e/1", Some("14/12/2026 21:00"));
        let event = normalize(&stub, "jazzclub", "https://jazz.example/", None, now(), &config).unwrap();
        assert_eq!(event.start_at, Utc.with_ymd_and_hms(2026, 12, 14, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("https://a.example/list/", "e/1"), "https://a.example/list/e/1");
        assert_eq!(absolute_url("https://a.example/list", "https://b.example/x"), "https://b.example/x");
    }
}
