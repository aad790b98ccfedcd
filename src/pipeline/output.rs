//! Output types produced by the transformer chain.

use serde::Serialize;

/// UI-facing text for one sentence, with optional speaker attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DisplayText {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl DisplayText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            name: None,
            avatar: None,
        }
    }
}

/// Avatar cues extracted from a sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Actions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<String>>,
}

impl Actions {
    pub fn is_empty(&self) -> bool {
        self.expressions.as_ref().is_none_or(Vec::is_empty)
    }
}

/// The transformer chain's output triplet for one sentence.
///
/// An empty `tts_text` means the sentence is display-only (silent payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceOutput {
    pub display_text: DisplayText,
    pub tts_text: String,
    pub actions: Actions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_serializes_without_empty_fields() {
        let json = serde_json::to_value(DisplayText::new("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"text": "hi"}));
    }

    #[test]
    fn display_text_serializes_attribution() {
        let display = DisplayText {
            text: "hi".into(),
            name: Some("Mio".into()),
            avatar: Some("mio.png".into()),
        };
        let json = serde_json::to_value(display).unwrap();
        assert_eq!(json["name"], "Mio");
        assert_eq!(json["avatar"], "mio.png");
    }

    #[test]
    fn actions_emptiness() {
        assert!(Actions::default().is_empty());
        assert!(
            !Actions {
                expressions: Some(vec!["joy".into()])
            }
            .is_empty()
        );
    }
}
