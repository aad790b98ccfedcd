//! LaTeX span protection.
//!
//! Formula bodies routinely contain `.` and `,`, so they are swapped for
//! opaque placeholders before segmentation and restored afterwards.
//! Placeholders are underscore-balanced so the Markdown parity counting in
//! the comma splitter is unaffected.

use once_cell::sync::Lazy;
use regex::Regex;

static BLOCK_FORMULA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$.+?\$\$").expect("valid block formula regex"));

static INLINE_FORMULA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$[^$\n]+?\$").expect("valid inline formula regex"));

/// Placeholder-to-formula mapping produced by [`protect`].
#[derive(Debug, Default)]
pub struct LatexGuard {
    replacements: Vec<(String, String)>,
}

impl LatexGuard {
    /// Restore all protected formulas in `text`.
    pub fn restore(&self, text: &str) -> String {
        let mut restored = text.to_string();
        for (placeholder, original) in &self.replacements {
            restored = restored.replace(placeholder, original);
        }
        restored
    }

    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

/// Replace `$$…$$` (multi-line) and `$…$` (single-line) formulas with
/// placeholders. Block formulas are handled first so an inline match can
/// never bite into a block delimiter.
pub fn protect(text: &str) -> (String, LatexGuard) {
    let mut guard = LatexGuard::default();
    let mut counter = 0usize;

    let protected = BLOCK_FORMULA.replace_all(text, |caps: &regex::Captures<'_>| {
        let placeholder = format!("__LATEX_BLOCK_{counter}__");
        counter += 1;
        guard
            .replacements
            .push((placeholder.clone(), caps[0].to_string()));
        placeholder
    });

    let protected = INLINE_FORMULA.replace_all(&protected, |caps: &regex::Captures<'_>| {
        let placeholder = format!("__LATEX_INLINE_{counter}__");
        counter += 1;
        guard
            .replacements
            .push((placeholder.clone(), caps[0].to_string()));
        placeholder
    });

    (protected.into_owned(), guard)
}
