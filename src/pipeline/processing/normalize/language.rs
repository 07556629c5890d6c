use crate::types::FieldOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Greek,
    Cyrillic,
}

fn dominant_script(text: &str) -> Option<Script> {
    let (mut greek, mut cyrillic) = (0usize, 0usize);
    for c in text.chars() {
        match c {
            '\u{0370}'..='\u{03FF}' | '\u{1F00}'..='\u{1FFF}' => greek += 1,
            '\u{0400}'..='\u{04FF}' => cyrillic += 1,
            _ => {}
        }
    }
    match (greek, cyrillic) {
        (0, 0) => None,
        (g, c) if g >= c => Some(Script::Greek),
        _ => Some(Script::Cyrillic),
    }
}

fn code(script: Script) -> &'static str {
    match script {
        Script::Greek => "el",
        Script::Cyrillic => "ru",
    }
}

/// Language from script detection on the title, then the description, then
/// the adapter's hint, else the configured default.
pub fn detect_language(
    title: &str,
    description: Option<&str>,
    hint: Option<&str>,
    default: &str,
) -> (String, FieldOrigin) {
    if let Some(script) = dominant_script(title) {
        return (code(script).to_string(), FieldOrigin::Inferred);
    }
    if let Some(script) = description.and_then(dominant_script) {
        return (code(script).to_string(), FieldOrigin::Inferred);
    }
    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return (hint.to_lowercase(), FieldOrigin::Detail);
    }
    (default.to_string(), FieldOrigin::Default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_script_first() {
        assert_eq!(detect_language("Συναυλία", Some("English text"), Some("en"), "en").0, "el");
        assert_eq!(detect_language("Концерт", None, None, "en").0, "ru");
    }

    #[test]
    fn test_description_then_hint_then_default() {
        assert_eq!(detect_language("Jazz", Some("Ζωντανή μουσική"), Some("en"), "en").0, "el");
        let (lang, origin) = detect_language("Jazz", Some("Live music"), Some("FR"), "en");
        assert_eq!(lang, "fr");
        assert_eq!(origin, FieldOrigin::Detail);
        let (lang, origin) = detect_language("Jazz", None, None, "en");
        assert_eq!(lang, "en");
        assert_eq!(origin, FieldOrigin::Default);
    }
}
