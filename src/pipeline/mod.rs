//! Transformer chain: sentence units → display/actions/TTS triplets.
//!
//! A linear composition of stream adapters. Every stage consumes one
//! upstream item type and produces one downstream type; out-of-band
//! records are forwarded untouched at every stage, so control events
//! keep their position relative to the sentences around them.

pub mod emotion;
pub mod output;

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::divider::{DividedItem, SentenceUnit, TagState};
use crate::tts::preprocessor::{self, TtsPreprocessorConfig};
use crate::utils::ellipsize;
pub use emotion::{EmotionExtractor, KeywordEmotionExtractor};
pub use output::{Actions, DisplayText, SentenceOutput};

type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// Sentence with extracted avatar actions.
#[derive(Debug, Clone)]
pub enum ActionedItem {
    Sentence(SentenceUnit, Actions),
    Record(Value),
}

/// Sentence with display text resolved.
#[derive(Debug, Clone)]
pub enum DisplayedItem {
    Sentence(SentenceUnit, DisplayText, Actions),
    Record(Value),
}

/// Final chain output.
#[derive(Debug, Clone)]
pub enum PipelineItem {
    Sentence(SentenceOutput),
    Record(Value),
}

/// Scan sentence text for avatar expression cues.
///
/// Tag-boundary units carry no text of their own, so they skip extraction.
pub fn extract_actions(
    input: BoxedStream<DividedItem>,
    extractor: Arc<dyn EmotionExtractor>,
) -> BoxedStream<ActionedItem> {
    Box::pin(stream! {
        let mut input = input;
        while let Some(item) = input.next().await {
            match item {
                Err(e) => yield Err(e),
                Ok(DividedItem::Record(record)) => yield Ok(ActionedItem::Record(record)),
                Ok(DividedItem::Sentence(unit)) => {
                    let mut actions = Actions::default();
                    if !unit.is_tag_boundary() {
                        let expressions = extractor.extract(&unit.text);
                        if !expressions.is_empty() {
                            debug!(?expressions, "extracted avatar expressions");
                            actions.expressions = Some(expressions);
                        }
                    }
                    yield Ok(ActionedItem::Sentence(unit, actions));
                }
            }
        }
    })
}

/// Resolve UI-facing display text.
///
/// A `think` boundary renders as an opening or closing parenthesis so the
/// client can show the reasoning span without the tag markup.
pub fn process_display(input: BoxedStream<ActionedItem>) -> BoxedStream<DisplayedItem> {
    Box::pin(stream! {
        let mut input = input;
        while let Some(item) = input.next().await {
            match item {
                Err(e) => yield Err(e),
                Ok(ActionedItem::Record(record)) => yield Ok(DisplayedItem::Record(record)),
                Ok(ActionedItem::Sentence(unit, actions)) => {
                    let mut text = unit.text.clone();
                    for tag in &unit.tags {
                        if tag.name == "think" {
                            match tag.state {
                                TagState::Start => text = "(".to_string(),
                                TagState::End => text = ")".to_string(),
                                _ => {}
                            }
                        }
                    }
                    let display = DisplayText::new(text);
                    yield Ok(DisplayedItem::Sentence(unit, display, actions));
                }
            }
        }
    })
}

/// Project display text to speech text per the preprocessor config.
///
/// `think` content is never spoken; dual-stream sentences use their
/// `<say>` text (minus trailing punctuation) verbatim.
pub fn filter_tts(
    input: BoxedStream<DisplayedItem>,
    config: TtsPreprocessorConfig,
) -> BoxedStream<PipelineItem> {
    Box::pin(stream! {
        let mut input = input;
        while let Some(item) = input.next().await {
            match item {
                Err(e) => yield Err(e),
                Ok(DisplayedItem::Record(record)) => yield Ok(PipelineItem::Record(record)),
                Ok(DisplayedItem::Sentence(unit, display_text_item, actions)) => {
                    let tts_text = if unit.has_tag("think") {
                        String::new()
                    } else if let Some(say) = &unit.tts_text {
                        preprocessor::remove_trailing_sentence_punctuation(say)
                    } else {
                        preprocessor::tts_filter(&display_text_item.text, &config)
                    };

                    debug!(
                        display = %ellipsize(&display_text_item.text, 60),
                        tts = %ellipsize(&tts_text, 60),
                        "sentence transformed"
                    );

                    yield Ok(PipelineItem::Sentence(SentenceOutput {
                        display_text: display_text_item,
                        tts_text,
                        actions,
                    }));
                }
            }
        }
    })
}

/// The full chain: actions extraction, display processing, TTS projection.
pub fn transform(
    input: BoxedStream<DividedItem>,
    extractor: Arc<dyn EmotionExtractor>,
    config: TtsPreprocessorConfig,
) -> BoxedStream<PipelineItem> {
    filter_tts(process_display(extract_actions(input, extractor)), config)
}
