//! Speech-oriented text projection.
//!
//! Display text keeps its full Markdown/LaTeX form for rendering; this
//! module computes the spoken counterpart: headings are read without
//! their `#` markers, formulas become readable variable names or a spoken
//! stand-in phrase, Markdown syntax is stripped while its content is
//! kept, and bracketed asides can be dropped per config. Changes here
//! affect only the synthesized audio, never subtitles or history.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::utils::ellipsize;

/// Flags controlling the optional projection steps.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtsPreprocessorConfig {
    pub remove_special_char: bool,
    pub ignore_brackets: bool,
    pub ignore_parentheses: bool,
    pub ignore_asterisks: bool,
    pub ignore_angle_brackets: bool,
}

impl Default for TtsPreprocessorConfig {
    fn default() -> Self {
        Self {
            remove_special_char: true,
            ignore_brackets: true,
            ignore_parentheses: true,
            ignore_asterisks: true,
            ignore_angle_brackets: true,
        }
    }
}

/// Spoken stand-ins for formulas too complex to read aloud.
const FORMULA_REPLACEMENTS: &[&str] = &["这个公式", "这个式子", "这个表达式"];

/// Project display text to TTS text.
pub fn tts_filter(text: &str, config: &TtsPreprocessorConfig) -> String {
    let mut text = text.to_string();

    // Headings are read without their markers; an empty heading is silent.
    if is_markdown_heading(&text) {
        match extract_heading_content(&text) {
            Some(content) => {
                debug!(heading = %ellipsize(&content, 60), "reading heading content");
                text = content;
            }
            None => return String::new(),
        }
    }

    text = replace_latex_formulas(&text);
    text = strip_markdown_symbols(&text);

    if config.ignore_asterisks {
        text = filter_asterisks(&text);
    }
    if config.ignore_brackets {
        text = filter_nested(&text, '[', ']');
    }
    if config.ignore_parentheses {
        text = filter_nested(&text, '(', ')');
    }
    if config.ignore_angle_brackets {
        text = filter_nested(&text, '<', '>');
    }
    if config.remove_special_char {
        text = remove_special_characters(&text);
    }

    remove_trailing_sentence_punctuation(&text)
}

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#+\s+").expect("valid heading regex"));
static HEADING_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#+\s*(.+)$").expect("valid heading content regex"));

/// Whether trimmed `text` is a Markdown heading line.
pub fn is_markdown_heading(text: &str) -> bool {
    HEADING.is_match(text.trim())
}

/// Heading content without the leading `#` markers; `None` when empty.
pub fn extract_heading_content(text: &str) -> Option<String> {
    let content = HEADING_CONTENT
        .captures(text.trim())
        .map(|caps| caps[1].trim().to_string())?;
    (!content.is_empty()).then_some(content)
}

// ── LaTeX ────────────────────────────────────────────────────────────

static BLOCK_FORMULA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$([^$]+)\$\$").expect("valid block formula regex"));
static INLINE_FORMULA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([^$\n]+)\$").expect("valid inline formula regex"));

fn spoken_formula_stand_in() -> String {
    FORMULA_REPLACEMENTS[rand::random_range(0..FORMULA_REPLACEMENTS.len())].to_string()
}

/// Replace LaTeX formulas with something speakable: a short variable name
/// when one can be extracted, otherwise a stand-in phrase.
pub fn replace_latex_formulas(text: &str) -> String {
    let text = BLOCK_FORMULA.replace_all(text, |_: &Captures<'_>| spoken_formula_stand_in());

    INLINE_FORMULA
        .replace_all(&text, |caps: &Captures<'_>| {
            extract_simple_variable(&caps[1]).unwrap_or_else(spoken_formula_stand_in)
        })
        .into_owned()
}

const GREEK_LETTERS: &[(&str, &str)] = &[
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("epsilon", "ε"),
    ("varepsilon", "ε"),
    ("zeta", "ζ"),
    ("eta", "η"),
    ("theta", "θ"),
    ("iota", "ι"),
    ("kappa", "κ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("nu", "ν"),
    ("xi", "ξ"),
    ("pi", "π"),
    ("rho", "ρ"),
    ("sigma", "σ"),
    ("tau", "τ"),
    ("phi", "φ"),
    ("chi", "χ"),
    ("psi", "ψ"),
    ("omega", "ω"),
    ("Phi", "Φ"),
    ("Psi", "Ψ"),
    ("Omega", "Ω"),
    ("Delta", "Δ"),
    ("Gamma", "Γ"),
    ("Theta", "Θ"),
    ("Lambda", "Λ"),
    ("Xi", "Ξ"),
    ("Pi", "Π"),
    ("Sigma", "Σ"),
];

static LATEX_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([a-zA-Z]+)").expect("valid latex command regex"));
static TEXT_WRAPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\text\{([^}]+)\}").expect("valid text wrapper regex"));
static SUBSCRIPT_BRACED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\{([^}]+)\}").expect("valid subscript regex"));
static SUBSCRIPT_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([a-zA-Z0-9])").expect("valid subscript regex"));
static SUPERSCRIPT_BRACED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^\{([^}]+)\}").expect("valid superscript regex"));
static SUPERSCRIPT_SINGLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\^([a-zA-Z0-9])").expect("valid superscript regex"));
static LATEX_LEFTOVERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[{}\\,;:\s]+").expect("valid leftover regex"));
static READABLE_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9α-ωΑ-Ω]").expect("valid readable char regex"));

/// Extract a readable variable name from a simple formula body.
///
/// `Q` stays `Q`, `\epsilon_0` becomes `ε下标0`. Returns `None` when the
/// result would exceed 15 visible characters or contains nothing readable,
/// in which case the caller falls back to a stand-in phrase.
pub fn extract_simple_variable(latex: &str) -> Option<String> {
    // Greek commands map to their symbols; the full command-name run is
    // matched so `\alphabet` is never half-replaced.
    let mut value = LATEX_COMMAND
        .replace_all(latex.trim(), |caps: &Captures<'_>| {
            match GREEK_LETTERS.iter().find(|(name, _)| *name == &caps[1]) {
                Some((_, symbol)) => (*symbol).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned();

    value = TEXT_WRAPPER.replace_all(&value, "$1").into_owned();
    value = SUBSCRIPT_BRACED.replace_all(&value, "下标$1").into_owned();
    value = SUBSCRIPT_SINGLE.replace_all(&value, "下标$1").into_owned();
    value = SUPERSCRIPT_BRACED.replace_all(&value, "").into_owned();
    value = SUPERSCRIPT_SINGLE.replace_all(&value, "").into_owned();
    value = LATEX_COMMAND.replace_all(&value, "").into_owned();
    value = LATEX_LEFTOVERS.replace_all(&value, "").into_owned();

    if value.chars().count() > 15 {
        return None;
    }
    if !READABLE_CHAR.is_match(&value) {
        return None;
    }
    Some(value)
}

// ── Markdown ─────────────────────────────────────────────────────────

static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#+\s+").expect("valid heading regex"));
static MD_BOLD_STARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid bold regex"));
static MD_BOLD_UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__([^_]+)__").expect("valid bold regex"));
static MD_ITALIC_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*]+)\*").expect("valid italic regex"));
static MD_ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([^_]+)_").expect("valid italic regex"));
static MD_CODE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("valid code span regex"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid link regex"));
static MD_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[*\-]\s+").expect("valid list marker regex"));
static MD_ORDERED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d+\.\s+").expect("valid ordered marker regex"));
static MD_CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("valid code fence regex"));

/// Strip Markdown syntax while keeping its content. A fenced code block
/// is read as `这段代码` instead of spelled out; fences go first so a
/// code-span match can never eat a fence delimiter.
pub fn strip_markdown_symbols(text: &str) -> String {
    let text = MD_CODE_FENCE.replace_all(text, "这段代码");
    let text = MD_HEADING.replace_all(&text, "");
    let text = MD_BOLD_STARS.replace_all(&text, "$1");
    let text = MD_BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = MD_ITALIC_STAR.replace_all(&text, "$1");
    let text = MD_ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = MD_CODE_SPAN.replace_all(&text, "$1");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_LIST_MARKER.replace_all(&text, "");
    MD_ORDERED_MARKER.replace_all(&text, "").into_owned()
}

static ASTERISK_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*+[^*]*?\*+").expect("valid asterisk span regex"));
static MULTI_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Drop text enclosed in asterisks of any strength (`*…*`, `**…**`, …).
pub fn filter_asterisks(text: &str) -> String {
    let filtered = ASTERISK_SPAN.replace_all(text, "");
    MULTI_SPACE.replace_all(filtered.trim(), " ").into_owned()
}

/// Drop content between `left` and `right`, counting nesting depth.
/// `[[nested] span]` disappears entirely, which a single regex cannot do.
pub fn filter_nested(text: &str, left: char, right: char) -> String {
    let mut result = String::with_capacity(text.len());
    let mut depth = 0usize;

    for c in text.chars() {
        if c == left {
            depth += 1;
        } else if c == right {
            depth = depth.saturating_sub(1);
        } else if depth == 0 {
            result.push(c);
        }
    }

    MULTI_SPACE.replace_all(result.trim(), " ").into_owned()
}

/// NFKC-normalize, then keep only letters, numbers, punctuation, and
/// whitespace.
pub fn remove_special_characters(text: &str) -> String {
    text.nfkc()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || is_punctuation(*c))
        .collect()
}

/// Approximation of the Unicode `P*` categories over the blocks that
/// show up in chat text: ASCII punctuation, general punctuation, CJK
/// symbols, and fullwidth forms.
fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(c, '\u{2000}'..='\u{206F}')
        || matches!(c, '\u{3000}'..='\u{303F}')
        || matches!(c, '\u{FF00}'..='\u{FF0F}' | '\u{FF1A}'..='\u{FF20}' | '\u{FF3B}'..='\u{FF40}' | '\u{FF5B}'..='\u{FF65}')
}

/// Punctuation the voice should not read at the end of a sentence.
const TRAILING_PUNCTUATION: &[char] = &[
    '。', '，', '、', '；', '：', '.', ',', ';', ':', '！', '？', '!', '?',
];

/// Repeatedly strip trailing sentence punctuation.
pub fn remove_trailing_sentence_punctuation(text: &str) -> String {
    text.trim()
        .trim_end_matches(TRAILING_PUNCTUATION)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TtsPreprocessorConfig {
        TtsPreprocessorConfig::default()
    }

    #[test]
    fn heading_content_is_read() {
        assert_eq!(tts_filter("## 高斯定律", &config()), "高斯定律");
    }

    #[test]
    fn empty_heading_is_silent() {
        assert_eq!(tts_filter("###  ", &config()), "");
    }

    #[test]
    fn heading_detection() {
        assert!(is_markdown_heading("# Title"));
        assert!(is_markdown_heading("  ### Deep title"));
        assert!(!is_markdown_heading("#hashtag"));
        assert!(!is_markdown_heading("plain"));
    }

    #[test]
    fn simple_variable_is_read_directly() {
        assert_eq!(extract_simple_variable("Q"), Some("Q".to_string()));
        assert_eq!(extract_simple_variable("x_0"), Some("x下标0".to_string()));
        assert_eq!(
            extract_simple_variable("\\epsilon_0"),
            Some("ε下标0".to_string())
        );
        assert_eq!(
            extract_simple_variable("Q_{enc}"),
            Some("Q下标enc".to_string())
        );
    }

    #[test]
    fn unreadable_formula_falls_back() {
        assert_eq!(extract_simple_variable("\\frac{}{}"), None);
        assert!(extract_simple_variable("a_very_long_variable_name_x").is_none());
    }

    #[test]
    fn long_formula_becomes_stand_in_phrase() {
        let spoken = tts_filter("看 $\\int_0^1 f(x) dx + g(y) - h(z)$ 这里", &config());
        assert!(
            FORMULA_REPLACEMENTS.iter().any(|p| spoken.contains(p)),
            "spoken was: {spoken}"
        );
        assert!(!spoken.contains('$'));
    }

    #[test]
    fn block_formula_becomes_stand_in_phrase() {
        let spoken = replace_latex_formulas("$$\\oint E \\cdot dA$$");
        assert!(FORMULA_REPLACEMENTS.contains(&spoken.as_str()));
    }

    #[test]
    fn short_inline_variable_survives_projection() {
        let spoken = tts_filter("电荷 $Q$ 产生电场", &config());
        assert_eq!(spoken, "电荷 Q 产生电场");
    }

    #[test]
    fn markdown_formatting_is_stripped() {
        assert_eq!(strip_markdown_symbols("**bold** and *italic*"), "bold and italic");
        assert_eq!(strip_markdown_symbols("`code` here"), "code here");
        assert_eq!(strip_markdown_symbols("[link text](https://example.com)"), "link text");
        assert_eq!(strip_markdown_symbols("- item one\n- item two"), "item one\nitem two");
    }

    #[test]
    fn code_fence_is_read_as_phrase() {
        let spoken = strip_markdown_symbols("看这段：```rust\nfn main() {}\n```完");
        assert_eq!(spoken, "看这段：这段代码完");
    }

    #[test]
    fn nested_brackets_are_dropped_entirely() {
        assert_eq!(filter_nested("a [[nested] span] b", '[', ']'), "a b");
        assert_eq!(filter_nested("keep (drop (this)) end", '(', ')'), "keep end");
        assert_eq!(filter_nested("x <tag<inner>> y", '<', '>'), "x y");
    }

    #[test]
    fn unbalanced_closer_is_ignored() {
        assert_eq!(filter_nested("a ] b", '[', ']'), "a b");
    }

    #[test]
    fn asterisk_spans_are_dropped() {
        assert_eq!(filter_asterisks("wave *waves hand* hello"), "wave hello");
        assert_eq!(filter_asterisks("**action** text"), "text");
    }

    #[test]
    fn special_characters_are_removed() {
        let spoken = remove_special_characters("hello 你好 ★ world™");
        assert!(!spoken.contains('★'));
        assert!(spoken.contains("hello"));
        assert!(spoken.contains("你好"));
        // NFKC maps ™ to "TM"
        assert!(spoken.contains("TM"));
    }

    #[test]
    fn trailing_punctuation_is_stripped_repeatedly() {
        assert_eq!(remove_trailing_sentence_punctuation("好的。！"), "好的");
        assert_eq!(remove_trailing_sentence_punctuation("Hi there."), "Hi there");
        assert_eq!(remove_trailing_sentence_punctuation("fine"), "fine");
    }

    #[test]
    fn full_projection_keeps_display_intent() {
        let display = "**高斯定律**：电通量 $\\Phi$ 不变。";
        let spoken = tts_filter(display, &config());
        // NFKC maps the fullwidth colon to its ASCII form.
        assert_eq!(spoken, "高斯定律:电通量 Φ 不变");
    }
}
