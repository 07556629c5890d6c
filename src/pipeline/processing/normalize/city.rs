use super::text::fold;
use crate::config::CityAlias;
use crate::types::{FieldOrigin, RawEventDetail};

/// Resolve an event's city: detail city, then venue city, then a city named
/// in the title or description, then the fallback.
pub fn resolve_city(
    title: &str,
    detail: Option<&RawEventDetail>,
    cities: &[CityAlias],
    fallback: &str,
) -> (String, FieldOrigin) {
    if let Some(city) = detail.and_then(|d| non_empty(d.city.as_deref())) {
        return (canonical_city(city, cities), FieldOrigin::Detail);
    }
    if let Some(city) = detail
        .and_then(|d| d.venue.as_ref())
        .and_then(|v| non_empty(v.city.as_deref()))
    {
        return (canonical_city(city, cities), FieldOrigin::Venue);
    }
    let description = detail.and_then(|d| d.description.as_deref()).unwrap_or("");
    if let Some(city) = detect_city(title, cities).or_else(|| detect_city(description, cities)) {
        return (city, FieldOrigin::Inferred);
    }
    (fallback.to_string(), FieldOrigin::Default)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// First configured city whose name or alias appears as a whole word in `text`.
pub fn detect_city(text: &str, cities: &[CityAlias]) -> Option<String> {
    let haystack = word_padded(text);
    cities
        .iter()
        .find(|city| {
            std::iter::once(&city.name)
                .chain(city.aliases.iter())
                .any(|spelling| haystack.contains(&word_padded(spelling)))
        })
        .map(|city| city.name.clone())
}

/// Map a supplied city spelling onto its configured display name.
pub fn canonical_city(raw: &str, cities: &[CityAlias]) -> String {
    let folded = fold(raw.trim());
    cities
        .iter()
        .find(|city| {
            std::iter::once(&city.name)
                .chain(city.aliases.iter())
                .any(|spelling| fold(spelling) == folded)
        })
        .map(|city| city.name.clone())
        .unwrap_or_else(|| raw.trim().to_string())
}

fn word_padded(text: &str) -> String {
    let words: String = fold(text)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", words.split_whitespace().collect::<Vec<_>>().join(" "))
}
