//! Wake-word and stop-word matching.
//!
//! Wake words gate a turn: the match is stripped from the front of the
//! transcript and the residue becomes the prompt. Stop words cancel the
//! running turn and are matched anywhere in the transcript. Both support
//! an optional pinyin-fuzzy mode so homophone mis-transcriptions (ASR
//! hearing 小艾 for 小爱) still match.

use once_cell::sync::Lazy;
use pinyin::ToPinyin;
use regex::Regex;
use tracing::{debug, info};

static LEADING_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[,，、。.!！?？\s]+").expect("valid separator regex"));

/// Outcome of a wake-word check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeWordMatch {
    pub matched_word: String,
    /// Transcript with the wake word and leading separators removed.
    /// Empty when only the wake word itself was uttered.
    pub clean_text: String,
}

/// Case-folded characters, one per input character.
fn normalized_chars(text: &str) -> Vec<char> {
    text.chars()
        .map(|c| c.to_lowercase().next().unwrap_or(c))
        .collect()
}

/// Romanization of one character: its pinyin when it has one, the
/// lowercased character otherwise.
fn char_pinyin(c: char) -> String {
    match c.to_pinyin() {
        Some(py) => py.plain().to_string(),
        None => c.to_lowercase().collect(),
    }
}

fn text_pinyin(chars: &[char]) -> String {
    chars.iter().map(|c| char_pinyin(*c)).collect()
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Locate `word` in `chars` via pinyin romanization; returns the char
/// range of the matched span.
fn find_by_pinyin(chars: &[char], word: &[char]) -> Option<(usize, usize)> {
    let haystack_pinyin = text_pinyin(chars);
    let needle_pinyin = text_pinyin(word);
    if needle_pinyin.is_empty() {
        return None;
    }

    let byte_pos = haystack_pinyin.find(&needle_pinyin)?;

    // Walk characters, accumulating romanization length, to map the
    // pinyin byte offset back onto character positions.
    let mut start = 0usize;
    let mut consumed = 0usize;
    for (i, c) in chars.iter().enumerate() {
        if consumed >= byte_pos {
            start = i;
            break;
        }
        consumed += char_pinyin(*c).len();
        start = i + 1;
    }

    let mut end = start;
    let mut matched_len = 0usize;
    for c in &chars[start..] {
        matched_len += char_pinyin(*c).len();
        end += 1;
        if matched_len >= needle_pinyin.len() {
            break;
        }
    }

    Some((start, end))
}

/// Strip separators left over after removing a wake word.
fn strip_leading_separators(text: &str) -> String {
    LEADING_SEPARATORS.replace(text, "").trim().to_string()
}

/// Check `text` for any configured wake word.
///
/// Exact (case-folded substring) matching runs first; pinyin matching
/// only when `fuzzy_pinyin` is set. The residue after the matched span
/// becomes `clean_text`.
pub fn check_wake_word(text: &str, words: &[String], fuzzy_pinyin: bool) -> Option<WakeWordMatch> {
    let chars: Vec<char> = text.chars().collect();
    let normalized = normalized_chars(text);

    for word in words {
        let word_trimmed = word.trim();
        if word_trimmed.is_empty() {
            continue;
        }
        let needle = normalized_chars(word_trimmed);

        if let Some(pos) = find_chars(&normalized, &needle) {
            let rest: String = chars[pos + needle.len()..].iter().collect();
            return Some(WakeWordMatch {
                matched_word: word.clone(),
                clean_text: strip_leading_separators(&rest),
            });
        }

        if fuzzy_pinyin {
            if let Some((start, end)) = find_by_pinyin(&normalized, &needle) {
                let matched: String = chars[start..end].iter().collect();
                info!(word = %word, matched = %matched, "wake word matched by pinyin");
                let rest: String = chars[end..].iter().collect();
                return Some(WakeWordMatch {
                    matched_word: word.clone(),
                    clean_text: strip_leading_separators(&rest),
                });
            }
        }
    }

    debug!(text = %text, "no wake word matched");
    None
}

/// Check `text` for any configured stop word. Stop-word matching is
/// looser than wake-word matching: any occurrence anywhere triggers.
pub fn check_stop_word(text: &str, words: &[String], fuzzy_pinyin: bool) -> Option<String> {
    let normalized = normalized_chars(text);

    for word in words {
        let word_trimmed = word.trim();
        if word_trimmed.is_empty() {
            continue;
        }
        let needle = normalized_chars(word_trimmed);

        if find_chars(&normalized, &needle).is_some() {
            info!(word = %word, "stop word matched");
            return Some(word.clone());
        }

        if fuzzy_pinyin && find_by_pinyin(&normalized, &needle).is_some() {
            info!(word = %word, "stop word matched by pinyin");
            return Some(word.clone());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wake_word_prefix_is_stripped() {
        let m = check_wake_word("小助手，今天天气怎么样", &words(&["小助手"]), false).unwrap();
        assert_eq!(m.matched_word, "小助手");
        assert_eq!(m.clean_text, "今天天气怎么样");
    }

    #[test]
    fn wake_word_mid_text_takes_the_tail() {
        let m = check_wake_word("你好小助手 今天如何", &words(&["小助手"]), false).unwrap();
        assert_eq!(m.clean_text, "今天如何");
    }

    #[test]
    fn wake_word_only_gives_empty_clean_text() {
        let m = check_wake_word("小助手！", &words(&["小助手"]), false).unwrap();
        assert_eq!(m.clean_text, "");
    }

    #[test]
    fn wake_word_matching_is_case_insensitive() {
        let m = check_wake_word("Hey Ava, what time is it", &words(&["hey ava"]), false).unwrap();
        assert_eq!(m.clean_text, "what time is it");
    }

    #[test]
    fn no_wake_word_is_none() {
        assert!(check_wake_word("今天天气怎么样", &words(&["小助手"]), false).is_none());
    }

    #[test]
    fn pinyin_fuzzy_matches_homophones() {
        // ASR heard 小艾 (xiao ai) for the configured 小爱 (xiao ai).
        let m = check_wake_word("小艾今天天气", &words(&["小爱"]), true).unwrap();
        assert_eq!(m.matched_word, "小爱");
        assert_eq!(m.clean_text, "今天天气");
    }

    #[test]
    fn pinyin_fuzzy_disabled_without_flag() {
        assert!(check_wake_word("小艾今天天气", &words(&["小爱"]), false).is_none());
    }

    #[test]
    fn stop_word_matches_anywhere() {
        assert_eq!(
            check_stop_word("please stop talking", &words(&["stop"]), false),
            Some("stop".to_string())
        );
        assert_eq!(
            check_stop_word("别说了停止吧", &words(&["停止"]), false),
            Some("停止".to_string())
        );
    }

    #[test]
    fn stop_word_absent_is_none() {
        assert!(check_stop_word("keep going", &words(&["stop"]), false).is_none());
    }

    #[test]
    fn stop_word_pinyin_fuzzy() {
        // 听指 romanizes to tingzhi, same as 停止.
        assert_eq!(
            check_stop_word("听指", &words(&["停止"]), true),
            Some("停止".to_string())
        );
    }

    #[test]
    fn empty_word_list_never_matches() {
        assert!(check_wake_word("anything", &[], false).is_none());
        assert!(check_stop_word("anything", &[], true).is_none());
    }
}
