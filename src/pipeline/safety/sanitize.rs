use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// What the sanitizer changed in a piece of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextModification {
    InvisibleUnicodeRemoved,
    ControlCharacterRemoved,
    InjectionPatternRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    pub modifications: Vec<TextModification>,
}

impl SanitizedText {
    pub fn was_modified(&self) -> bool {
        !self.modifications.is_empty()
    }
}

/// Clean free-text clinical narrative before it is placed in a reasoning
/// request. Clinical content is never shortened; only invisible characters,
/// control characters and instruction-override phrases are removed.
pub fn sanitize_narrative(raw: &str) -> SanitizedText {
    let mut text = raw.to_string();
    let mut modifications = Vec::new();

    let before = text.clone();
    text = remove_invisible_unicode(&text);
    if text != before {
        modifications.push(TextModification::InvisibleUnicodeRemoved);
    }

    let before = text.clone();
    text = remove_control_characters(&text);
    if text != before {
        modifications.push(TextModification::ControlCharacterRemoved);
    }

    let before = text.clone();
    text = remove_injection_patterns(&text);
    if text != before {
        modifications.push(TextModification::InjectionPatternRemoved);
    }

    SanitizedText {
        text,
        modifications,
    }
}

/// Remove zero-width and invisible Unicode characters.
fn remove_invisible_unicode(text: &str) -> String {
    text.chars()
        .filter(|c| {
            !matches!(
                *c,
                '\u{200B}'..='\u{200F}'  // Zero-width chars
                | '\u{202A}'..='\u{202E}' // Directional formatting
                | '\u{2060}'..='\u{2064}' // Invisible operators
                | '\u{2066}'..='\u{2069}' // Directional isolates
                | '\u{FEFF}'              // BOM
                | '\u{00AD}'              // Soft hyphen
                | '\u{034F}'              // Combining grapheme joiner
                | '\u{061C}'              // Arabic letter mark
                | '\u{180E}'              // Mongolian vowel separator
            )
        })
        .collect()
}

/// Remove control characters except newline and tab.
fn remove_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Replace instruction-override phrases and chat-template tags with
/// `[FILTERED]`. Role tags only match at line start so that exam findings
/// such as "Nervous system: intact" survive.
fn remove_injection_patterns(text: &str) -> String {
    static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        vec![
            Regex::new(r"(?i)ignore\s+(?:previous|above|all\s+prior|the\s+above)\s+(?:instructions?|rules?|prompts?)").unwrap(),
            Regex::new(r"(?i)disregard\s+(?:the\s+)?(?:previous|above|prior)\s+(?:instructions?|guidelines?)").unwrap(),
            Regex::new(r"(?i)forget\s+(?:everything|all|your)\s+(?:previous|prior)?").unwrap(),
            Regex::new(r"(?i)new\s+instructions?:").unwrap(),
            Regex::new(r"(?i)you\s+are\s+now\s+(?:a|an)\s+").unwrap(),
            Regex::new(r"(?im)^\s*(?:system|assistant)\s*:").unwrap(),
            Regex::new(r"(?i)(?:report|return|respond\s+with)\s+(?:no|zero)\s+(?:issues|findings)").unwrap(),
            Regex::new(r"<<SYS>>").unwrap(),
            Regex::new(r"\[INST\]").unwrap(),
            Regex::new(r"<\|im_start\|>").unwrap(),
            Regex::new(r"<\|im_end\|>").unwrap(),
        ]
    });

    let mut result = text.to_string();
    for pattern in INJECTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, "[FILTERED]").to_string();
    }
    result
}
