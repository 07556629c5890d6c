use crate::constants::GENERIC_TITLES;
use reqwest::Url;
use scraper::Html;
use sha2::{Digest, Sha256};

/// Map accented Greek vowels to their plain form so month names and titles
/// compare regardless of tonos/dialytika.
pub fn fold_greek_accents(c: char) -> char {
    match c {
        'ά' => 'α',
        'έ' => 'ε',
        'ή' => 'η',
        'ί' | 'ΐ' | 'ϊ' => 'ι',
        'ό' => 'ο',
        'ύ' | 'ΰ' | 'ϋ' => 'υ',
        'ώ' => 'ω',
        'ς' => 'σ',
        other => other,
    }
}

/// Lowercase and fold accents.
pub fn fold(input: &str) -> String {
    input.to_lowercase().chars().map(fold_greek_accents).collect()
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract visible text from an HTML fragment.
pub fn strip_html(input: &str) -> String {
    if !input.contains('<') && !input.contains('&') {
        return input.to_string();
    }
    let fragment = Html::parse_fragment(input);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters, ending with an ellipsis when cut.
pub fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let kept: String = input.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

/// HTML-stripped, whitespace-collapsed, length-capped description.
pub fn clean_description(raw: &str, max: usize) -> Option<String> {
    let text = collapse_whitespace(&strip_html(raw));
    if text.is_empty() {
        None
    } else {
        Some(truncate_chars(&text, max))
    }
}

/// Title reduced to lowercase words: punctuation dropped, accents folded.
pub fn normalize_title(title: &str) -> String {
    let spaced: String = fold(title)
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    collapse_whitespace(&spaced)
}

pub fn is_generic_title(title: &str) -> bool {
    let normalized = normalize_title(title);
    normalized.is_empty() || GENERIC_TITLES.contains(&normalized.as_str())
}

pub fn slugify(input: &str) -> String {
    let slug = normalize_title(input).replace(' ', "-");
    if slug.is_empty() {
        "event".to_string()
    } else {
        slug
    }
}

/// Stable identity for a listing URL: SHA-256 over its path (and query), hex, 16 chars.
pub fn source_external_id(url: &str) -> String {
    let key = match Url::parse(url.trim()) {
        Ok(parsed) => match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        },
        Err(_) => url.trim().to_string(),
    };
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_description_strips_markup() {
        let raw = "<p>Live <b>jazz</b>&nbsp;tonight</p>\n\n<p>Doors   at 8</p>";
        assert_eq!(
            clean_description(raw, 500).as_deref(),
            Some("Live jazz tonight Doors at 8")
        );
        assert_eq!(clean_description("   ", 500), None);
    }

    #[test]
    fn test_truncate_adds_ellipsis_within_limit() {
        let long = "a".repeat(600);
        let cut = truncate_chars(&long, 500);
        assert_eq!(cut.chars().count(), 500);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate_chars("short", 500), "short");
    }

    #[test]
    fn test_normalize_title_ignores_punctuation_and_accents() {
        assert_eq!(normalize_title("Jazz Night!"), "jazz night");
        assert_eq!(normalize_title("  JAZZ -- night "), "jazz night");
        assert_eq!(normalize_title("Συναυλία"), normalize_title("ΣΥΝΑΥΛΙΑ"));
        assert_eq!(normalize_title("Θέατρο"), "θεατρο");
    }

    #[test]
    fn test_generic_titles() {
        assert!(is_generic_title("Agenda"));
        assert!(is_generic_title("EVENTS"));
        assert!(is_generic_title("What's On"));
        assert!(is_generic_title("!!!"));
        assert!(!is_generic_title("Jazz Agenda Live"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Jazz Night @ The Port!"), "jazz-night-the-port");
        assert_eq!(slugify("???"), "event");
    }

    #[test]
    fn test_external_id_uses_path_only() {
        let a = source_external_id("https://example.com/events/jazz-night");
        let b = source_external_id("http://www.example.com/events/jazz-night#top");
        let c = source_external_id("https://example.com/events/other");
        assert_eq!(a.len(), 16);
        assert_eq!(a, source_external_id("https://example.com/events/jazz-night"));
        assert_ne!(a, c);
        // host and fragment do not participate
        assert_eq!(a, b);
        assert_ne!(
            source_external_id("https://example.com/event?id=1"),
            source_external_id("https://example.com/event?id=2")
        );
    }
}
