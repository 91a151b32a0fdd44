//! Prompt pairs and dispatch sanitization
//!
//! Every prompt that reaches the synthesis backend passes through
//! [`sanitize_text`]. The sanitizer never fails: oversize input is
//! truncated and a warning is emitted.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Positive/negative prompt pair under test
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptPair {
    /// What the artifact should show
    pub positive: String,
    /// What the artifact should avoid
    pub negative: String,
}

impl PromptPair {
    /// Create new prompt pair
    #[inline]
    #[must_use]
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive: positive.into(),
            negative: negative.into(),
        }
    }

    /// Sanitize both sides for dispatch
    #[must_use]
    pub fn sanitized(&self, limits: &PromptLimits) -> Self {
        Self {
            positive: sanitize_text(&self.positive, limits).text,
            negative: sanitize_text(&self.negative, limits).text,
        }
    }

    /// Replace the positive side, keeping the negative
    #[inline]
    #[must_use]
    pub fn with_positive(mut self, positive: impl Into<String>) -> Self {
        self.positive = positive.into();
        self
    }
}

/// Word and character budget applied before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    /// Maximum whitespace-separated words
    pub max_words: usize,
    /// Maximum characters (Unicode scalar values)
    pub max_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_words: 50,
            max_chars: 200,
        }
    }
}

/// Result of sanitizing one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitized {
    /// Cleaned text
    pub text: String,
    /// Words dropped by the word budget
    pub words_dropped: usize,
    /// Characters dropped by the character budget
    pub chars_dropped: usize,
}

impl Sanitized {
    /// Whether either budget truncated the text
    #[inline]
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.words_dropped > 0 || self.chars_dropped > 0
    }
}

fn parenthetical() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\(.*?\)").expect("static regex"))
}

/// Drop trailing whitespace, `.` and `,`
fn trim_trailing(text: &mut String) {
    let len = text
        .trim_end_matches(|c: char| c == '.' || c == ',' || c.is_whitespace())
        .len();
    text.truncate(len);
}

/// Clean a prompt for dispatch
///
/// Drops parenthetical asides, control characters and the shell-sensitive
/// characters `"`, `` ` `` and `$`. Turns `--` into an em dash, collapses
/// whitespace, trims trailing `.`/`,` and finally enforces the word budget
/// followed by the character budget.
#[must_use]
pub fn sanitize_text(text: &str, limits: &PromptLimits) -> Sanitized {
    let stripped = parenthetical().replace_all(text, "");

    let filtered: String = stripped
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '$'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let filtered = filtered.replace("--", "\u{2014}");

    let words: Vec<&str> = filtered.split_whitespace().collect();
    let mut collapsed = words.join(" ");
    trim_trailing(&mut collapsed);

    let mut words_dropped = 0;
    let word_count = collapsed.split_whitespace().count();
    if word_count > limits.max_words {
        words_dropped = word_count - limits.max_words;
        collapsed = collapsed
            .split_whitespace()
            .take(limits.max_words)
            .collect::<Vec<_>>()
            .join(" ");
        trim_trailing(&mut collapsed);
        tracing::warn!(max_words = limits.max_words, words_dropped, "prompt truncated to word budget");
    }

    let mut chars_dropped = 0;
    let char_count = collapsed.chars().count();
    if char_count > limits.max_chars {
        collapsed = collapsed.chars().take(limits.max_chars).collect();
        trim_trailing(&mut collapsed);
        chars_dropped = char_count - collapsed.chars().count();
        tracing::warn!(max_chars = limits.max_chars, chars_dropped, "prompt truncated to character budget");
    }

    Sanitized {
        text: collapsed,
        words_dropped,
        chars_dropped,
    }
}
