//! Emotion extraction interface.
//!
//! The avatar frontend owns the actual expression model; the pipeline only
//! needs something that maps sentence text to expression names. The
//! default implementation scans for bracketed expression tokens such as
//! `[joy]` against a configured expression list.

use once_cell::sync::Lazy;
use regex::Regex;

/// Detects avatar expressions in sentence text.
pub trait EmotionExtractor: Send + Sync {
    /// Expression names found in `text`, in order of appearance.
    fn extract(&self, text: &str) -> Vec<String>;
}

static BRACKET_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\w+)\]").expect("valid bracket token regex"));

/// Matches `[token]` markers against a known expression list.
pub struct KeywordEmotionExtractor {
    expressions: Vec<String>,
}

impl KeywordEmotionExtractor {
    pub fn new(expressions: Vec<String>) -> Self {
        Self { expressions }
    }

    /// A common default expression set for Live2D-style avatars.
    pub fn with_defaults() -> Self {
        Self::new(
            ["neutral", "joy", "anger", "sadness", "surprise", "fear", "disgust"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }
}

impl EmotionExtractor for KeywordEmotionExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        BRACKET_TOKEN
            .captures_iter(text)
            .filter_map(|caps| {
                let token = caps[1].to_lowercase();
                self.expressions.contains(&token).then_some(token)
            })
            .collect()
    }
}
