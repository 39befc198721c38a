//! Drive controls the way a user would, so the host page's own handlers
//! accept the new value.
//!
//! The host form intercepts the `value` property on its inputs and only
//! enables some controls after a first interaction. Text goes through the
//! prototype setter followed by input/change/blur; choices get a full
//! focus/mouse/click/change/blur sequence after being force-enabled.

use std::time::Duration;

use crate::config::Timing;
use crate::dom::{self, Dom, DomEvent, NodeId, Selector};

use super::scan::{checkbox_selectors, radio_selectors};
use super::{normalize_whitespace, Field, FieldKind, MatchResult};

/// Option wording that must also appear in the target for the option to be
/// picked by the fuzzy pass. Keeps "Challenge as a team" away from a plain
/// "challenge".
const QUALIFIERS: &[&str] = &["team", "doubles"];

/// Misspellings the live form is known to use, as (correct, as-printed).
const KNOWN_TYPOS: &[(&str, &str)] = &[("challenge", "chalenge")];

/// Levels searched upward for the role-marked wrapper of a native option.
const OPTION_WRAPPER_LEVELS: usize = 3;

/// Apply `value` to `field`. Returns whether the field now carries it.
///
/// `NoValue`, the blank scalar, and value shapes that do not fit the field
/// kind all return `Ok(false)` without touching the document.
pub async fn apply<D: Dom>(
    dom: &D,
    field: &Field,
    value: &MatchResult,
    timing: &Timing,
) -> dom::Result<bool> {
    match (field.kind, value) {
        (_, MatchResult::NoValue) => Ok(false),
        (_, result) if result.is_blank() => Ok(false),
        (FieldKind::Text, MatchResult::Scalar(text)) => match field.controls.first() {
            Some(&control) => fill_text(dom, control, text, timing).await,
            None => Ok(false),
        },
        (FieldKind::SingleChoice, MatchResult::Scalar(target)) => {
            select_option(dom, &field.controls, target).await
        }
        (FieldKind::MultiChoice, MatchResult::Set(days)) => {
            check_days(dom, &field.controls, days, timing).await
        }
        (FieldKind::MultiChoice, MatchResult::Scalar(target)) => {
            check_one(dom, &field.controls, target).await
        }
        (kind, value) => {
            log::debug!("value {value:?} does not fit a {kind:?} field");
            Ok(false)
        }
    }
}

async fn settle(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Clear `disabled` and `aria-disabled` when either is set.
async fn ensure_enabled<D: Dom>(dom: &D, control: NodeId) -> dom::Result<()> {
    let disabled = dom.control_state(control).await?.disabled
        || dom
            .attribute(control, "aria-disabled")
            .await?
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if disabled {
        log::debug!("enabling {control:?}");
        dom.enable(control).await?;
    }
    Ok(())
}

async fn fill_text<D: Dom>(
    dom: &D,
    control: NodeId,
    value: &str,
    timing: &Timing,
) -> dom::Result<bool> {
    if value.is_empty() {
        return Ok(false);
    }
    ensure_enabled(dom, control).await?;
    dom.focus(control).await?;
    settle(timing.focus_settle()).await;

    let editable = dom
        .attribute(control, "contenteditable")
        .await?
        .is_some_and(|v| !v.eq_ignore_ascii_case("false"));
    if editable {
        dom.set_text_content(control, value).await?;
        dom.dispatch(control, DomEvent::Input).await?;
        dom.dispatch(control, DomEvent::Change).await?;
        dom.dispatch(control, DomEvent::Blur).await?;
    } else {
        dom.set_value_native(control, "").await?;
        dom.set_value_native(control, value).await?;
        dom.dispatch(control, DomEvent::Input).await?;
        settle(timing.input_settle()).await;
        dom.dispatch(control, DomEvent::Change).await?;
        dom.dispatch(control, DomEvent::Blur).await?;
    }
    log::debug!("filled text {control:?}");
    Ok(true)
}

/// Full pointer interaction on a choice control.
async fn press<D: Dom>(dom: &D, control: NodeId) -> dom::Result<()> {
    ensure_enabled(dom, control).await?;
    dom.focus(control).await?;
    for event in [
        DomEvent::MouseDown,
        DomEvent::MouseUp,
        DomEvent::Click,
        DomEvent::Change,
        DomEvent::Blur,
    ] {
        dom.dispatch(control, event).await?;
    }
    Ok(())
}

/// Labels an option is known by, lower-cased and whitespace-collapsed.
#[derive(Debug)]
struct OptionLabel {
    aria: Option<String>,
    /// Text of the role-marked wrapper, or of the parent element.
    text: String,
    value: Option<String>,
}

impl OptionLabel {
    fn candidates(&self) -> impl Iterator<Item = &str> {
        self.aria
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.text.as_str()))
            .filter(|label| !label.is_empty())
    }

    fn equals(&self, target: &str) -> bool {
        self.candidates().any(|label| label == target)
    }

    fn contains(&self, needle: &str) -> bool {
        self.candidates().any(|label| label.contains(needle))
    }

    /// Like [`Self::contains`], also consulting the `value` attribute.
    fn mentions(&self, needle: &str) -> bool {
        self.contains(needle) || self.value.as_deref().is_some_and(|v| v.contains(needle))
    }
}

async fn option_label<D: Dom>(dom: &D, control: NodeId) -> dom::Result<OptionLabel> {
    let clean = |text: &str| normalize_whitespace(text).to_lowercase();
    let aria = dom
        .attribute(control, "aria-label")
        .await?
        .map(|label| clean(&label))
        .filter(|label| !label.is_empty());

    let wrappers = [
        Selector::any().attr_eq("role", "radio"),
        Selector::any().attr_eq("role", "checkbox"),
    ];
    let mut wrapper = None;
    for selector in &wrappers {
        wrapper = dom::closest(dom, control, selector, OPTION_WRAPPER_LEVELS).await?;
        if wrapper.is_some() {
            break;
        }
    }
    let wrapper = match wrapper {
        Some(node) => Some(node),
        None => sole_option_parent(dom, control).await?,
    };
    let text = match wrapper {
        Some(node) => clean(&dom.text(node).await?),
        None => String::new(),
    };
    let value = dom
        .attribute(control, "value")
        .await?
        .map(|v| clean(&v))
        .filter(|v| !v.is_empty());
    Ok(OptionLabel { aria, text, value })
}

/// The parent of a native option, when that parent wraps no other option.
/// A container shared by several options carries every option's text.
async fn sole_option_parent<D: Dom>(dom: &D, control: NodeId) -> dom::Result<Option<NodeId>> {
    let Some(parent) = dom.parent(control).await? else {
        return Ok(None);
    };
    let mut options = radio_selectors();
    options.extend(checkbox_selectors());
    let wrapped = dom.query_all(Some(parent), &options).await?;
    Ok((wrapped == [control]).then_some(parent))
}

/// Whether the fuzzy pass may consider `label` for `target`.
fn qualifiers_agree(label: &OptionLabel, target: &str) -> bool {
    QUALIFIERS
        .iter()
        .all(|q| target.contains(q) || !label.contains(q))
}

fn fuzzy_matches(label: &OptionLabel, target: &str) -> bool {
    if !qualifiers_agree(label, target) {
        return false;
    }
    let typo_hit = KNOWN_TYPOS.iter().any(|(correct, printed)| {
        target.contains(correct) && label.contains(&target.replace(correct, printed))
    });
    typo_hit || label.contains(target)
}

async fn select_option<D: Dom>(
    dom: &D,
    controls: &[NodeId],
    target: &str,
) -> dom::Result<bool> {
    let target = normalize_whitespace(target).to_lowercase();
    let mut labels = Vec::with_capacity(controls.len());
    for &control in controls {
        let label = option_label(dom, control).await?;
        log::debug!("option {control:?}: {:?} / {:?}", label.aria, label.text);
        labels.push((control, label));
    }

    let chosen = labels
        .iter()
        .find(|(_, label)| label.equals(&target))
        .or_else(|| labels.iter().find(|(_, label)| fuzzy_matches(label, &target)));
    match chosen {
        Some((control, _)) => {
            log::debug!("selecting {control:?} for {target:?}");
            press(dom, *control).await?;
            Ok(true)
        }
        None => {
            log::debug!("no option matches {target:?}");
            Ok(false)
        }
    }
}

async fn check_days<D: Dom>(
    dom: &D,
    controls: &[NodeId],
    days: &[String],
    timing: &Timing,
) -> dom::Result<bool> {
    let mut labels = Vec::with_capacity(controls.len());
    for &control in controls {
        labels.push((control, option_label(dom, control).await?));
    }

    let mut newly_checked = 0;
    for day in days {
        let day = day.trim().to_lowercase();
        if day.is_empty() {
            continue;
        }
        let Some((control, _)) = labels.iter().find(|(_, label)| label.mentions(&day)) else {
            log::debug!("no checkbox for {day:?}");
            continue;
        };
        let control = *control;
        if dom::is_checked(dom, control).await? {
            continue;
        }
        press(dom, control).await?;
        settle(timing.verify_delay()).await;
        if !dom::is_checked(dom, control).await? {
            log::debug!("checkbox {control:?} for {day:?} did not take, retrying");
            press(dom, control).await?;
            settle(timing.verify_delay()).await;
        }
        if dom::is_checked(dom, control).await? {
            newly_checked += 1;
        } else {
            log::warn!("could not check {day:?}");
        }
    }
    log::debug!("checked {newly_checked} of {} days", days.len());
    Ok(newly_checked > 0)
}

async fn check_one<D: Dom>(
    dom: &D,
    controls: &[NodeId],
    target: &str,
) -> dom::Result<bool> {
    let target = normalize_whitespace(target).to_lowercase();
    for &control in controls {
        let label = option_label(dom, control).await?;
        if !label.mentions(&target) {
            continue;
        }
        if !dom::is_checked(dom, control).await? {
            press(dom, control).await?;
        }
        return Ok(true);
    }
    Ok(false)
}
