//! Tag grammar support for the sentence divider.
//!
//! Recognizes `<tag>`, `</tag>` and `<tag/>` for a configurable set of tag
//! names, tracks nesting with a stack, and carries tag context on every
//! emitted sentence.

use serde::Serialize;

/// Position of a tag boundary relative to the text that carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
    /// `<tag>`
    Start,
    /// Text between an opening and closing tag.
    Inside,
    /// `</tag>`
    End,
    /// `<tag/>`
    SelfClosing,
    /// No tag context.
    None,
}

/// A recognized tag boundary or active tag context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub state: TagState,
}

impl TagInfo {
    pub fn new(name: impl Into<String>, state: TagState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }

    /// The empty tag context (`name=""` iff state is `None`).
    pub fn none() -> Self {
        Self {
            name: String::new(),
            state: TagState::None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.state == TagState::None
    }
}

impl std::fmt::Display for TagInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state {
            TagState::None => write!(f, "none"),
            TagState::Start => write!(f, "{}:start", self.name),
            TagState::Inside => write!(f, "{}:inside", self.name),
            TagState::End => write!(f, "{}:end", self.name),
            TagState::SelfClosing => write!(f, "{}:self", self.name),
        }
    }
}

/// A tag match inside a buffer: byte span plus the recognized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    pub start: usize,
    pub end: usize,
    pub name: String,
    pub state: TagState,
}

/// Find the earliest occurrence of any valid tag form in `text`.
///
/// Self-closing forms are probed first so `<t/>` is never mistaken for an
/// opening `<t>` followed by stray characters.
pub fn find_first_tag(text: &str, valid_tags: &[String]) -> Option<TagMatch> {
    let mut best: Option<TagMatch> = None;

    for tag in valid_tags {
        let patterns = [
            (format!("<{tag}/>"), TagState::SelfClosing),
            (format!("<{tag}>"), TagState::Start),
            (format!("</{tag}>"), TagState::End),
        ];
        for (pattern, state) in patterns {
            if let Some(pos) = text.find(&pattern) {
                let replace = match &best {
                    Some(current) => {
                        pos < current.start || (pos == current.start && state == TagState::SelfClosing)
                    }
                    None => true,
                };
                if replace {
                    best = Some(TagMatch {
                        start: pos,
                        end: pos + pattern.len(),
                        name: tag.clone(),
                        state,
                    });
                }
            }
        }
    }

    best
}
