//! Sentence-boundary primitives.
//!
//! Terminal-punctuation scanning with abbreviation exclusion, the
//! Markdown-safe comma splitter used for faster first responses, and the
//! post-processing passes (isolated enumerator merging, trailing soft
//! punctuation stripping) applied to segmented output.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Characters that terminate a sentence. Runs of the same character
/// (`...`, `。。。`) are consumed as a single boundary.
pub const END_PUNCTUATIONS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Comma variants across scripts, candidates for the first-sentence split.
pub const COMMAS: &[char] = &[
    ',', '，', '、', ';', '‚', '﹐', '⹁', '︐', '﹑', '､', '،',
];

/// Abbreviations whose trailing dot must not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Dr.", "Prof.", "Inc.", "Ltd.", "Jr.", "Sr.", "e.g.", "i.e.", "vs.", "St.",
    "Rd.",
];

/// Whether `text` contains any sentence-terminating punctuation.
pub fn contains_end_punctuation(text: &str) -> bool {
    text.chars().any(|c| END_PUNCTUATIONS.contains(&c))
}

/// Whether `text` contains any comma from the supported set.
pub fn contains_comma(text: &str) -> bool {
    text.chars().any(|c| COMMAS.contains(&c))
}

/// Whether trimmed `text` ends with terminal punctuation and not with a
/// known abbreviation.
pub fn is_complete_sentence(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    if ends_with_abbreviation(text) {
        return false;
    }
    text.chars()
        .next_back()
        .is_some_and(|c| END_PUNCTUATIONS.contains(&c))
}

fn ends_with_abbreviation(text: &str) -> bool {
    ABBREVIATIONS.iter().any(|abbrev| {
        text.ends_with(abbrev)
            && text[..text.len() - abbrev.len()]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric())
    })
}

/// Byte indices of every `.` that belongs to an abbreviation occurrence.
///
/// Both interior dots (the first `.` of `e.g.`) and the final dot are
/// excluded from boundary consideration, so `e.g. apples` never splits
/// inside the abbreviation.
fn abbreviation_dot_indices(text: &str) -> HashSet<usize> {
    let mut excluded = HashSet::new();
    for abbrev in ABBREVIATIONS {
        let mut from = 0;
        while let Some(found) = text[from..].find(abbrev) {
            let start = from + found;
            let boundary_ok = text[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            if boundary_ok {
                for (i, c) in abbrev.char_indices() {
                    if c == '.' {
                        excluded.insert(start + i);
                    }
                }
            }
            from = start + abbrev.len();
        }
    }
    excluded
}

/// Greedy left-to-right boundary scan.
///
/// Returns the complete sentences found and the trailing incomplete
/// remainder. The remainder keeps its trailing whitespace: the next
/// fragment of an incremental stream may continue the same sentence.
/// When `attach_quotes` is set, a closing quote or bracket immediately
/// after the terminal punctuation is attached to the sentence.
pub fn segment_by_scan(text: &str, attach_quotes: bool) -> (Vec<String>, String) {
    let text = text.trim_start();
    if text.trim().is_empty() {
        return (Vec::new(), String::new());
    }

    let excluded_dots = abbreviation_dot_indices(text);
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !END_PUNCTUATIONS.contains(&c) {
            continue;
        }
        if c == '.' && excluded_dots.contains(&i) {
            continue;
        }

        // Consume the full run of the same terminal character.
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = iter.peek() {
            if next == c {
                end = j + next.len_utf8();
                iter.next();
            } else {
                break;
            }
        }

        if attach_quotes {
            while let Some(&(j, next)) = iter.peek() {
                if matches!(next, '"' | '\'' | '”' | '’' | '」' | '』' | '）' | ')') {
                    end = j + next.len_utf8();
                    iter.next();
                } else {
                    break;
                }
            }
        }

        let candidate = text[start..end].trim();
        if !candidate.is_empty() {
            sentences.push(candidate.to_string());
        }
        start = end;
    }

    (sentences, text[start..].trim_start().to_string())
}

static ENUMERATOR_AHEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[.)、]").expect("valid enumerator regex"));

static ISOLATED_ENUMERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\d+[.)）、]?|\(\d+\)|[\u{2460}-\u{2473}])$").expect("valid enumerator regex")
});

/// Parity count of Markdown emphasis and code markers in `prefix`.
///
/// An odd count of any marker means the position right after `prefix`
/// sits inside a span that must not be split.
fn is_inside_markdown_span(prefix: &str) -> bool {
    let bold_stars = prefix.matches("**").count();
    let bold_underscores = prefix.matches("__").count();
    if bold_stars % 2 == 1 || bold_underscores % 2 == 1 {
        return true;
    }

    let single_stars = prefix.matches('*').count() - bold_stars * 2;
    let single_underscores = prefix.matches('_').count() - bold_underscores * 2;
    if single_stars % 2 == 1 || single_underscores % 2 == 1 {
        return true;
    }

    let triple_backticks = prefix.matches("```").count();
    let backticks = prefix.matches('`').count() - triple_backticks * 3;
    backticks % 2 == 1 || triple_backticks % 2 == 1
}

fn should_skip_comma(text: &str, pos: usize, comma: char) -> bool {
    let before = &text[..pos];
    if is_inside_markdown_span(before) {
        return true;
    }

    // Heading lines are never split at commas.
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    if text[line_start..pos].trim_start().starts_with('#') {
        return true;
    }

    let after = text[pos + comma.len_utf8()..].trim_start();

    // A following list enumerator binds to the next sentence: take the split.
    if ENUMERATOR_AHEAD.is_match(after) {
        return false;
    }

    // Digit sequences like "1, 2, 3" stay together.
    let prev_is_digit = before
        .trim_end()
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_digit());
    let next_is_digit = after.chars().next().is_some_and(|c| c.is_ascii_digit());
    prev_is_digit && next_is_digit
}

/// Byte position of the first comma that is safe to split at, skipping
/// commas that are protected or would leave an empty head.
pub fn first_safe_comma(text: &str) -> Option<usize> {
    for (i, c) in text.char_indices() {
        if !COMMAS.contains(&c) {
            continue;
        }
        if should_skip_comma(text, i, c) {
            continue;
        }
        if text[..i].trim().is_empty() {
            continue;
        }
        return Some(i);
    }
    None
}

/// Split `text` at the first comma that is safe to split at.
///
/// The head excludes the comma itself. Returns `None` when every comma is
/// protected (Markdown span, heading line, or digit sequence) or the head
/// would be empty.
pub fn comma_splitter(text: &str) -> Option<(String, String)> {
    let i = first_safe_comma(text)?;
    let comma_len = text[i..].chars().next().map_or(1, char::len_utf8);
    let head = text[..i].trim().to_string();
    let rest = text[i + comma_len..].trim_start().to_string();
    Some((head, rest))
}

/// Merge isolated enumerators (`1.`, `(2)`, `①`) into the following
/// sentence so a list marker is never spoken on its own.
pub fn merge_isolated_enumerators(sentences: Vec<String>) -> Vec<String> {
    let mut merged = Vec::with_capacity(sentences.len());
    let mut pending: Option<String> = None;

    for sentence in sentences {
        let trimmed = sentence.trim();
        if ISOLATED_ENUMERATOR.is_match(trimmed) {
            pending = Some(match pending.take() {
                Some(prev) => format!("{prev} {trimmed}"),
                None => trimmed.to_string(),
            });
        } else if let Some(prefix) = pending.take() {
            merged.push(format!("{prefix} {trimmed}"));
        } else {
            merged.push(sentence);
        }
    }

    if let Some(prefix) = pending {
        merged.push(prefix);
    }
    merged
}

/// Strip trailing `。` and `，` from a sentence; the client renders the
/// text and the TTS voice pauses naturally without them.
pub fn strip_trailing_soft_punctuation(sentence: &str) -> &str {
    sentence.trim_end().trim_end_matches(['。', '，'])
}
