//! Recover the human-readable question that labels a control.
//!
//! The host form renders each question inside class-obfuscated wrappers whose
//! names change between releases, so resolution leans on roles and on the
//! shape of the text rather than on any fixed structure.

use crate::dom::{Dom, NodeId, Selector};

use super::{normalize_whitespace, UNKNOWN_QUESTION};

/// Upper bound on the ancestor climb.
pub const MAX_ANCESTOR_LEVELS: usize = 20;

const ARIA_LABEL_MIN_CHARS: usize = 3;
const ARIA_LABEL_MAX_CHARS: usize = 500;
/// Headings must be longer than this. Kept loose so "Name" still qualifies.
const HEADING_MIN_CHARS: usize = 2;
const BLOCK_MIN_CHARS: usize = 20;
const BLOCK_MAX_CHARS: usize = 800;
/// "name" only marks a line as a question on short lines.
const NAME_LINE_MAX_CHARS: usize = 50;

/// Phrase fragments drawn from the known question set.
const QUESTION_PHRASES: &[&str] = &[
    "select",
    "would you like",
    "who would you like",
    "attendance",
    "challenging",
    "partner",
];

/// Labels that belong to individual options, never to a question.
const OPTION_LABELS: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "yes",
    "no",
    "challenge",
    "chalenge",
    "battle",
    "challenge as a team",
    "chalenge as a team",
    "battle as a team",
    "team",
    "doubles",
    "other",
];

fn heading_selectors() -> Vec<Selector> {
    vec![
        Selector::any().attr_eq("role", "heading"),
        Selector::any().class("freebirdFormviewerViewItemsItemItemTitle"),
        Selector::any().class("freebirdFormviewerComponentsQuestionBaseTitle"),
        Selector::tag("h1"),
        Selector::tag("h2"),
        Selector::tag("h3"),
    ]
}

/// Question text for a standalone control such as a text input.
///
/// Never fails: DOM errors and unrecognisable markup both resolve to
/// [`UNKNOWN_QUESTION`].
pub async fn resolve_question_text<D: Dom>(dom: &D, control: NodeId) -> String {
    match resolve(dom, control, Strategy::Standalone).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            log::debug!("no question text for control {control:?}");
            UNKNOWN_QUESTION.to_string()
        }
        Err(err) => {
            log::debug!("question lookup for control {control:?} failed: {err}");
            UNKNOWN_QUESTION.to_string()
        }
    }
}

/// Question text shared by all options of a radio or checkbox group.
///
/// Skips the control's own label and any heading or line that is merely an
/// option label, so the result can serve as a grouping key.
pub async fn resolve_group_question_text<D: Dom>(dom: &D, control: NodeId) -> String {
    match resolve(dom, control, Strategy::Group).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            log::debug!("no group question text for control {control:?}");
            UNKNOWN_QUESTION.to_string()
        }
        Err(err) => {
            log::debug!("group question lookup for control {control:?} failed: {err}");
            UNKNOWN_QUESTION.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Standalone,
    Group,
}

async fn resolve<D: Dom>(
    dom: &D,
    control: NodeId,
    strategy: Strategy,
) -> crate::dom::Result<Option<String>> {
    if strategy == Strategy::Standalone {
        if let Some(label) = dom.attribute(control, "aria-label").await? {
            let label = normalize_whitespace(&label);
            let len = label.chars().count();
            if (ARIA_LABEL_MIN_CHARS..=ARIA_LABEL_MAX_CHARS).contains(&len) {
                log::debug!("question via aria-label: {label}");
                return Ok(Some(label));
            }
        }
    }

    let exclude_options = strategy == Strategy::Group;
    let headings = heading_selectors();
    let mut current = dom.parent(control).await?;
    for _ in 0..MAX_ANCESTOR_LEVELS {
        let Some(ancestor) = current else {
            break;
        };

        for heading in dom.query_all(Some(ancestor), &headings).await? {
            let text = normalize_whitespace(&dom.text(heading).await?);
            if text.chars().count() <= HEADING_MIN_CHARS {
                continue;
            }
            if exclude_options && is_option_label(&text) {
                continue;
            }
            log::debug!("question via heading: {text}");
            return Ok(Some(text));
        }

        let block = dom.text(ancestor).await?;
        if let Some(line) = question_line(&block, exclude_options) {
            log::debug!("question via text block: {line}");
            return Ok(Some(line));
        }

        current = dom.parent(ancestor).await?;
    }
    Ok(None)
}

/// Pick the question line out of an ancestor's text block.
///
/// The block must be of plausible single-question length and carry a marker;
/// the first line that itself carries a marker is returned, which keeps help
/// text and option labels out of the result.
pub fn question_line(block: &str, exclude_options: bool) -> Option<String> {
    let trimmed = block.trim();
    let len = trimmed.chars().count();
    if len <= BLOCK_MIN_CHARS || len >= BLOCK_MAX_CHARS {
        return None;
    }
    if !block_has_marker(&trimmed.to_lowercase()) {
        return None;
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| line_has_marker(line) && !(exclude_options && is_option_label(line)))
        .map(normalize_whitespace)
}

fn block_has_marker(lower: &str) -> bool {
    lower.contains('*')
        || lower.contains('?')
        || lower.contains("name")
        || QUESTION_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

fn line_has_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains('*')
        || lower.contains('?')
        || (lower.contains("name") && line.chars().count() < NAME_LINE_MAX_CHARS)
        || QUESTION_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Whether `text` is one of the known option labels of the form.
pub fn is_option_label(text: &str) -> bool {
    let lower = normalize_whitespace(text).to_lowercase();
    let lower = lower.trim_end_matches(['*', ' ']);
    OPTION_LABELS.contains(&lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::synthetic::{Element, SyntheticDom};

    #[test]
    fn question_line_prefers_the_marked_line() {
        let block = "Practice Attendance *\nSelect all that apply\nMonday\nTuesday";
        assert_eq!(
            question_line(block, false).as_deref(),
            Some("Practice Attendance *")
        );
    }

    #[test]
    fn question_line_rejects_short_and_unmarked_blocks() {
        assert_eq!(question_line("Name *", false), None);
        assert_eq!(
            question_line("Lorem ipsum dolor sit amet consectetur", false),
            None
        );
    }

    #[test]
    fn question_line_ignores_long_lines_that_only_mention_name() {
        let block = "This line mentions the name of the club in a long sentence\nYour name here";
        assert_eq!(question_line(block, false).as_deref(), Some("Your name here"));
    }

    #[test]
    fn option_labels_are_recognised_case_insensitively() {
        assert!(is_option_label("Monday"));
        assert!(is_option_label("  Challenge as a team "));
        assert!(is_option_label("Chalenge"));
        assert!(!is_option_label("Would you like to challenge or battle?"));
    }

    #[tokio::test]
    async fn aria_label_wins_for_standalone_controls() {
        let dom = SyntheticDom::form_page();
        let item = dom.append(dom.body(), Element::new("div").attr("role", "listitem"));
        dom.append(item, Element::new("div").attr("role", "heading").text("Something else"));
        let input = dom.append(
            item,
            Element::new("input").attr("type", "text").attr("aria-label", "Full Name"),
        );
        assert_eq!(resolve_question_text(&dom, input).await, "Full Name");
    }

    #[tokio::test]
    async fn short_heading_like_name_is_accepted() {
        let dom = SyntheticDom::form_page();
        let item = dom.append(dom.body(), Element::new("div").attr("role", "listitem"));
        dom.append(item, Element::new("div").attr("role", "heading").text("Name"));
        let wrapper = dom.append(item, Element::new("div"));
        let input = dom.append(wrapper, Element::new("input").attr("type", "text"));
        assert_eq!(resolve_question_text(&dom, input).await, "Name");
    }

    #[tokio::test]
    async fn text_block_fallback_without_headings() {
        let dom = SyntheticDom::form_page();
        let item = dom.append(dom.body(), Element::new("div"));
        dom.append(item, Element::new("span").text("Who would you like to challenge? *"));
        dom.append(item, Element::new("span").text("Leave blank if none"));
        let input = dom.append(item, Element::new("input").attr("type", "text"));
        assert_eq!(
            resolve_question_text(&dom, input).await,
            "Who would you like to challenge? *"
        );
    }

    #[tokio::test]
    async fn group_resolution_skips_option_labels() {
        let dom = SyntheticDom::form_page();
        let item = dom.append(dom.body(), Element::new("div").attr("role", "listitem"));
        dom.append(
            item,
            Element::new("div")
                .attr("role", "heading")
                .text("Practice Attendance *"),
        );
        let option = dom.append(item, Element::new("label"));
        dom.append(option, Element::new("span").attr("role", "heading").text("Monday"));
        let checkbox = dom.append(
            option,
            Element::new("div").attr("role", "checkbox").attr("aria-label", "Monday"),
        );
        assert_eq!(
            resolve_group_question_text(&dom, checkbox).await,
            "Practice Attendance *"
        );
        // The standalone variant trusts the option's own label.
        assert_eq!(resolve_question_text(&dom, checkbox).await, "Monday");
    }

    #[tokio::test]
    async fn unresolvable_controls_get_the_sentinel() {
        let dom = SyntheticDom::form_page();
        let input = dom.append(dom.body(), Element::new("input").attr("type", "text"));
        assert_eq!(resolve_question_text(&dom, input).await, UNKNOWN_QUESTION);
    }

    #[tokio::test]
    async fn climb_is_bounded() {
        let dom = SyntheticDom::form_page();
        dom.append(dom.body(), Element::new("h2").text("Far away heading"));
        let mut parent = dom.body();
        for _ in 0..(MAX_ANCESTOR_LEVELS + 5) {
            parent = dom.append(parent, Element::new("div"));
        }
        let input = dom.append(parent, Element::new("input").attr("type", "text"));
        assert_eq!(resolve_question_text(&dom, input).await, UNKNOWN_QUESTION);
    }
}
