/// Truncate a string to at most `max_bytes` bytes without splitting a
/// multi-byte character. Returns the original string if it already fits.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Shorten a string for log output, appending an ellipsis when truncated.
///
/// Used for previewing sentence text in structured log fields so long
/// model output does not flood the logs.
pub fn ellipsize(s: &str, max_bytes: usize) -> String {
    let truncated = safe_truncate(s, max_bytes);
    if truncated.len() < s.len() {
        format!("{truncated}…")
    } else {
        truncated.to_string()
    }
}
