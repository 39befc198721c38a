//! Field detection, matching and filling for the recurring sign-up form.

pub mod actuate;
pub mod group;
pub mod matcher;
pub mod message;
pub mod question;
pub mod scan;
pub mod session;

use crate::dom::NodeId;

/// Returned when no question text could be recovered for a control.
pub const UNKNOWN_QUESTION: &str = "Unknown Question";

/// How a logical field is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    /// One text input, textarea or editable textbox.
    Text,
    /// Radio buttons; exactly one option is selected.
    SingleChoice,
    /// Checkboxes; any subset of options is selected.
    MultiChoice,
}

/// One question discovered in the document together with its controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub question_text: String,
    /// Document order. Exactly one control for [`FieldKind::Text`].
    pub controls: Vec<NodeId>,
}

impl Field {
    pub fn text(control: NodeId, question_text: String) -> Self {
        Self {
            kind: FieldKind::Text,
            question_text,
            controls: vec![control],
        }
    }
}

/// The value a field should receive.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchResult {
    /// No rule applies; the field is left untouched.
    NoValue,
    /// A text value or the label of the option to select. An empty string is
    /// an explicit blank: the field was recognised and must stay clear.
    Scalar(String),
    /// Option labels to tick in a multi-choice field.
    Set(Vec<String>),
}

impl MatchResult {
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Scalar(value) if value.is_empty())
    }
}

/// Collapse runs of whitespace and trim.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_an_empty_scalar_only() {
        assert!(MatchResult::Scalar(String::new()).is_blank());
        assert!(!MatchResult::Scalar("Sam".into()).is_blank());
        assert!(!MatchResult::NoValue.is_blank());
        assert!(!MatchResult::Set(Vec::new()).is_blank());
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(normalize_whitespace("  Full \n  Name\t*  "), "Full Name *");
    }
}
