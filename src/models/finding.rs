use serde::{Deserialize, Serialize};

use super::enums::Severity;

/// A single detected issue (contraindication, omission, timing or dosing
/// risk). Only the response parser constructs these from reasoning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub issue: String,
    pub reasoning: String,
    pub severity: Severity,
    pub recommendations: Vec<String>,
    pub guideline_reference: Option<String>,
    pub requires_human_review: bool,
    #[serde(default)]
    pub affected_orders: Vec<String>,
}

/// Shortest file stem that may be cited on its own; shorter stems must be
/// cited with their extension.
const MIN_STEM_CHARS: usize = 4;

impl Finding {
    /// Whether `guideline_reference` names the given source document.
    ///
    /// Matching is case-insensitive and on whole words (`_` counts as a word
    /// character), against either the full file name or, for stems of at
    /// least `MIN_STEM_CHARS` characters, the stem alone.
    pub fn cites(&self, source_document: &str) -> bool {
        let Some(reference) = self.guideline_reference.as_deref() else {
            return false;
        };
        let reference = words(reference);
        let source = source_document.to_lowercase();
        let stem = source.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&source);

        let stem_words = words(stem);
        let stem_citable = stem.chars().filter(|c| c.is_alphanumeric()).count() >= MIN_STEM_CHARS;
        contains_run(&reference, &words(&source))
            || (stem_citable && contains_run(&reference, &stem_words))
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
