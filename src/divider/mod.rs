//! Incremental sentence divider for streaming model output.
//!
//! Accumulates text fragments in a buffer and emits well-formed sentence
//! units as soon as the buffer permits, while out-of-band records pass
//! through in their original position. Understands a nested tag grammar
//! (default tag: `think`), protects LaTeX and Markdown spans from
//! mis-segmentation, and supports a dual-stream `<show>/<say>` mode that
//! separates display text from spoken text.

pub mod boundary;
pub mod latex;
pub mod segment;
pub mod tags;

use anyhow::Result;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::utils::ellipsize;
pub use segment::SegmentMethod;
pub use tags::{TagInfo, TagState};

/// One item of raw model output: a text fragment or an out-of-band record.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Text(String),
    Record(Value),
}

/// One item of divider output: a segmented sentence or a passed-through
/// record.
#[derive(Debug, Clone)]
pub enum DividedItem {
    Sentence(SentenceUnit),
    Record(Value),
}

/// A segmented unit with its tag context.
///
/// `tags` lists active tags from outermost to innermost; a tag boundary
/// itself is represented as a unit with empty text and a single
/// start/end/self-closing entry. `tts_text` is set only by the
/// dual-stream `<show>/<say>` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    pub text: String,
    pub tags: Vec<TagInfo>,
    pub tts_text: Option<String>,
}

impl SentenceUnit {
    fn with_tags(text: impl Into<String>, tags: Vec<TagInfo>) -> Self {
        Self {
            text: text.into(),
            tags,
            tts_text: None,
        }
    }

    fn tag_boundary(info: TagInfo) -> Self {
        Self {
            text: String::new(),
            tags: vec![info],
            tts_text: None,
        }
    }

    fn dual(text: impl Into<String>, tts_text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tags: vec![TagInfo::none()],
            tts_text: Some(tts_text.into()),
        }
    }

    /// Whether this unit is a tag boundary rather than sentence text.
    pub fn is_tag_boundary(&self) -> bool {
        self.tags
            .iter()
            .any(|t| matches!(t.state, TagState::Start | TagState::End | TagState::SelfClosing))
    }

    /// Whether the unit sits inside (or is a boundary of) the named tag.
    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }
}

/// Divider tuning knobs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DividerConfig {
    /// Split the first sentence of a turn at a safe comma to shorten the
    /// time to first audio.
    pub faster_first_response: bool,
    pub segment_method: SegmentMethod,
    /// Tag names recognized by the tag grammar.
    pub valid_tags: Vec<String>,
    /// Match `<show>…</show><say>…</say>` pairs instead of the tag grammar.
    pub dual_stream: bool,
}

impl Default for DividerConfig {
    fn default() -> Self {
        Self {
            faster_first_response: true,
            segment_method: SegmentMethod::default(),
            valid_tags: vec!["think".to_string()],
            dual_stream: false,
        }
    }
}

static DUAL_STREAM_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<show>(.*?)</show>\s*<say>(.*?)</say>").expect("valid dual stream regex")
});

static DANGLING_SHOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<show>(.*?)(?:</show>|$)").expect("valid show regex"));

/// Incremental tokenizer/segmenter turning a fragment stream into a
/// sentence stream.
pub struct SentenceDivider {
    config: DividerConfig,
    buffer: String,
    is_first_sentence: bool,
    tag_stack: Vec<String>,
}

impl SentenceDivider {
    pub fn new(config: DividerConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            is_first_sentence: true,
            tag_stack: Vec::new(),
        }
    }

    /// Reset divider state for a new conversation turn.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.is_first_sentence = true;
        self.tag_stack.clear();
    }

    /// Append a fragment and emit every unit the buffer now permits.
    pub fn push_fragment(&mut self, fragment: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(fragment);
        self.drain()
    }

    /// Emit everything still held in the buffer at end of stream.
    pub fn flush(&mut self) -> Vec<SentenceUnit> {
        if self.config.dual_stream {
            self.flush_dual()
        } else {
            self.flush_tagged()
        }
    }

    fn drain(&mut self) -> Vec<SentenceUnit> {
        if self.config.dual_stream {
            self.drain_dual()
        } else {
            self.drain_tagged()
        }
    }

    /// Active tag context from outermost to innermost, or the empty
    /// context when no tag is open.
    fn current_tags(&self) -> Vec<TagInfo> {
        if self.tag_stack.is_empty() {
            vec![TagInfo::none()]
        } else {
            self.tag_stack
                .iter()
                .map(|name| TagInfo::new(name.clone(), TagState::Inside))
                .collect()
        }
    }

    fn apply_tag(&mut self, m: &tags::TagMatch) {
        match m.state {
            TagState::Start => self.tag_stack.push(m.name.clone()),
            TagState::End => {
                if self.tag_stack.last().map(String::as_str) == Some(m.name.as_str()) {
                    self.tag_stack.pop();
                } else {
                    warn!(tag = %m.name, "mismatched closing tag, keeping tag stack");
                }
            }
            _ => {}
        }
    }

    // ── Tagged mode ──────────────────────────────────────────────────

    fn drain_tagged(&mut self) -> Vec<SentenceUnit> {
        let mut out = Vec::new();

        loop {
            if self.buffer.trim().is_empty() {
                break;
            }

            match tags::find_first_tag(&self.buffer, &self.config.valid_tags) {
                Some(m) if self.buffer[..m.start].trim().is_empty() => {
                    // Tag at the (effective) start of the buffer.
                    self.apply_tag(&m);
                    out.push(SentenceUnit::tag_boundary(TagInfo::new(
                        m.name.clone(),
                        m.state,
                    )));
                    self.buffer = self.buffer[m.end..].trim_start().to_string();
                }
                Some(m) => {
                    // Text precedes the tag: the tag bounds it, so all of it
                    // can be emitted before the tag itself is processed.
                    let before = self.buffer[..m.start].to_string();
                    let context = self.current_tags();

                    if boundary::contains_end_punctuation(&before) {
                        let (sentences, rest) = self.segment_text(&before);
                        self.is_first_sentence = false;
                        for sentence in sentences {
                            out.push(SentenceUnit::with_tags(sentence, context.clone()));
                        }
                        if !rest.trim().is_empty() {
                            out.push(SentenceUnit::with_tags(rest.trim(), context));
                        }
                    } else if !before.trim().is_empty() {
                        out.push(SentenceUnit::with_tags(before.trim(), context));
                    }
                    self.buffer.drain(..m.start);
                }
                None => {
                    if self.is_first_sentence
                        && self.config.faster_first_response
                        && self.has_leading_safe_comma()
                    {
                        if let Some((head, rest)) = boundary::comma_splitter(&self.buffer) {
                            debug!(head = %ellipsize(&head, 60), "first-sentence comma split");
                            out.push(SentenceUnit::with_tags(head, self.current_tags()));
                            self.buffer = rest;
                            continue;
                        }
                    }

                    if boundary::contains_end_punctuation(&self.buffer) {
                        let buffered = std::mem::take(&mut self.buffer);
                        let (sentences, rest) = self.segment_text(&buffered);
                        self.buffer = rest;
                        if sentences.is_empty() {
                            break;
                        }
                        self.is_first_sentence = false;
                        let context = self.current_tags();
                        for sentence in sentences {
                            out.push(SentenceUnit::with_tags(sentence, context.clone()));
                        }
                        continue;
                    }

                    break;
                }
            }
        }

        out
    }

    /// Whether a safe split comma occurs before the first terminal
    /// punctuation. A comma after a sentence boundary belongs to the
    /// next sentence and must not pre-empt normal segmentation.
    fn has_leading_safe_comma(&self) -> bool {
        let Some(comma_pos) = boundary::first_safe_comma(&self.buffer) else {
            return false;
        };
        let first_end = self
            .buffer
            .char_indices()
            .find(|(_, c)| boundary::END_PUNCTUATIONS.contains(c))
            .map(|(i, _)| i);
        first_end.is_none_or(|end| comma_pos < end)
    }

    fn flush_tagged(&mut self) -> Vec<SentenceUnit> {
        let mut out = self.drain_tagged();

        let residue = self.buffer.trim().to_string();
        if !residue.is_empty() {
            debug!(residue = %ellipsize(&residue, 60), "flushing final fragment");
            out.push(SentenceUnit::with_tags(residue, self.current_tags()));
        }
        self.buffer.clear();

        out
    }

    /// Segment buffered text line by line; a newline is itself a sentence
    /// boundary, so a non-final line's remainder is emitted as complete.
    /// The final line's remainder keeps trailing whitespace so the next
    /// fragment continues the same sentence.
    fn segment_text(&self, text: &str) -> (Vec<String>, String) {
        let lines: Vec<&str> = text.split('\n').collect();
        let last_index = lines.len().saturating_sub(1);
        let mut all_sentences = Vec::new();
        let mut last_remaining = String::new();

        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let (sentences, remaining) = segment::segment(line, self.config.segment_method);
            all_sentences.extend(sentences);

            if i == last_index {
                last_remaining = remaining;
            } else if !remaining.trim().is_empty() {
                all_sentences.push(remaining.trim().to_string());
            }
        }

        let merged = boundary::merge_isolated_enumerators(all_sentences);
        let cleaned = merged
            .iter()
            .map(|s| boundary::strip_trailing_soft_punctuation(s).to_string())
            .filter(|s| !s.is_empty())
            .collect();

        (cleaned, last_remaining)
    }

    // ── Dual-stream mode ─────────────────────────────────────────────

    fn drain_dual(&mut self) -> Vec<SentenceUnit> {
        let mut out = Vec::new();

        while let Some(caps) = DUAL_STREAM_PAIR.captures(&self.buffer) {
            let display_text = caps[1].trim().to_string();
            let tts = caps[2].trim().to_string();
            let end = caps.get(0).expect("full match").end();

            debug!(
                display = %ellipsize(&display_text, 60),
                tts = %ellipsize(&tts, 60),
                "dual-stream pair"
            );
            out.push(SentenceUnit::dual(display_text, tts));
            self.buffer.drain(..end);
            self.is_first_sentence = false;
        }

        out
    }

    fn flush_dual(&mut self) -> Vec<SentenceUnit> {
        let mut out = self.drain_dual();

        let residue = self.buffer.trim().to_string();
        if !residue.is_empty() {
            if let Some(caps) = DANGLING_SHOW.captures(&residue) {
                // Unclosed <show>: speak the display text as-is.
                let display_text = caps[1].trim().to_string();
                if !display_text.is_empty() {
                    debug!(display = %ellipsize(&display_text, 60), "flushing unclosed show tag");
                    out.push(SentenceUnit::dual(display_text.clone(), display_text));
                }
            } else if !residue.starts_with('<') {
                warn!(
                    residue = %ellipsize(&residue, 60),
                    "dual-stream residue without show/say tags"
                );
                out.push(SentenceUnit::dual(residue.clone(), residue));
            }
        }
        self.buffer.clear();

        out
    }

    // ── Stream adapter ───────────────────────────────────────────────

    /// Convert a fragment-or-record stream into a sentence-or-record
    /// stream. Records are forwarded in their original position after any
    /// sentences already formed by the preceding text.
    pub fn divide(
        mut self,
        input: Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>,
    ) -> Pin<Box<dyn Stream<Item = Result<DividedItem>> + Send>> {
        let (tx, rx) = mpsc::channel::<Result<DividedItem>>(32);

        tokio::spawn(async move {
            let mut input = input;

            while let Some(item) = input.next().await {
                match item {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                    Ok(StreamItem::Record(record)) => {
                        for unit in self.drain() {
                            if tx.send(Ok(DividedItem::Sentence(unit))).await.is_err() {
                                return;
                            }
                        }
                        if tx.send(Ok(DividedItem::Record(record))).await.is_err() {
                            return;
                        }
                    }
                    Ok(StreamItem::Text(fragment)) => {
                        for unit in self.push_fragment(&fragment) {
                            if tx.send(Ok(DividedItem::Sentence(unit))).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }

            for unit in self.flush() {
                if tx.send(Ok(DividedItem::Sentence(unit))).await.is_err() {
                    return;
                }
            }
        });

        Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
    }
}

impl Default for SentenceDivider {
    fn default() -> Self {
        Self::new(DividerConfig::default())
    }
}
