//! Segmentation method dispatch.
//!
//! The statistical method gates a language-aware boundary scan behind
//! `whatlang` detection: only languages in the supported set take the
//! richer path (closing-quote attachment), everything else falls through
//! to the plain scan. Detection or scan failures also fall back to the
//! plain scan, so segmentation never aborts a turn.

use tracing::debug;

use super::boundary::segment_by_scan;
use super::latex;

/// How sentence boundaries are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentMethod {
    /// Language detection plus a language-aware scan for supported
    /// languages; plain scan otherwise.
    #[default]
    Statistical,
    /// Plain terminal-punctuation scan.
    Regex,
}

/// ISO 639-1 codes the statistical path accepts.
const SUPPORTED_LANGUAGES: &[&str] = &[
    "am", "ar", "bg", "da", "de", "el", "en", "es", "fa", "fr", "hi", "hy", "it", "ja", "kk", "mr",
    "my", "nl", "pl", "ru", "sk", "ur", "zh",
];

/// Detect the language of `text` and return its ISO 639-1 code when it is
/// in the supported set; `None` otherwise.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let info = whatlang::detect(text)?;
    let code = iso_639_1(info.lang().code())?;
    if SUPPORTED_LANGUAGES.contains(&code) {
        Some(code)
    } else {
        debug!(lang = code, "detected language outside supported set");
        None
    }
}

/// Map whatlang's ISO 639-3 codes to the two-letter codes of the
/// supported set. Unknown codes map to `None`.
fn iso_639_1(code: &str) -> Option<&'static str> {
    let mapped = match code {
        "amh" => "am",
        "ara" => "ar",
        "bul" => "bg",
        "dan" => "da",
        "deu" => "de",
        "ell" => "el",
        "eng" => "en",
        "spa" => "es",
        "pes" => "fa",
        "fra" => "fr",
        "hin" => "hi",
        "hye" => "hy",
        "ita" => "it",
        "jpn" => "ja",
        "kaz" => "kk",
        "mar" => "mr",
        "mya" => "my",
        "nld" => "nl",
        "pol" => "pl",
        "rus" => "ru",
        "slk" => "sk",
        "urd" => "ur",
        "cmn" => "zh",
        _ => return None,
    };
    Some(mapped)
}

/// Segment `text` into complete sentences plus a trailing remainder.
///
/// LaTeX spans are protected before the scan and restored in the output,
/// so formula-internal punctuation never produces a boundary.
pub fn segment(text: &str, method: SegmentMethod) -> (Vec<String>, String) {
    if text.is_empty() {
        return (Vec::new(), String::new());
    }

    let (protected, guard) = latex::protect(text);

    let (sentences, remaining) = match method {
        SegmentMethod::Regex => segment_by_scan(&protected, false),
        SegmentMethod::Statistical => match detect_language(&protected) {
            Some(lang) => {
                debug!(lang, "statistical segmentation");
                segment_by_scan(&protected, true)
            }
            None => segment_by_scan(&protected, false),
        },
    };

    if guard.is_empty() {
        return (sentences, remaining);
    }

    let restored = sentences.iter().map(|s| guard.restore(s)).collect();
    (restored, guard.restore(&remaining))
}
