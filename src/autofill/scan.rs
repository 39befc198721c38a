//! Discover candidate controls in the live document.

use std::collections::BTreeSet;

use crate::dom::{Dom, NodeId, PageLocation, Selector};

use super::group::group;
use super::question::resolve_question_text;
use super::{Field, FieldKind};

pub const FORM_HOST: &str = "docs.google.com";
pub const FORM_PATH_FRAGMENT: &str = "/forms/";

/// Input types that never hold free text.
const NON_TEXT_INPUT_TYPES: &[&str] = &[
    "radio", "checkbox", "hidden", "submit", "button", "reset", "image", "file",
];

/// How far up a native choice input may sit inside a role-marked option
/// before it is considered a separate control.
const NESTED_CHOICE_LEVELS: usize = 3;

pub fn text_selectors() -> Vec<Selector> {
    vec![
        Selector::tag("input").attr_eq("type", "text"),
        Selector::tag("input").attr_eq("type", "email"),
        Selector::tag("textarea"),
        Selector::tag("input").attr("aria-labelledby"),
        Selector::tag("input").attr("data-initial-value"),
        Selector::any()
            .attr_eq("role", "textbox")
            .attr("contenteditable"),
    ]
}

pub fn radio_selectors() -> Vec<Selector> {
    vec![
        Selector::any().attr_eq("role", "radio"),
        Selector::tag("input").attr_eq("type", "radio"),
    ]
}

pub fn checkbox_selectors() -> Vec<Selector> {
    vec![
        Selector::any().attr_eq("role", "checkbox"),
        Selector::tag("input").attr_eq("type", "checkbox"),
    ]
}

/// Whether the page is the form this tool is built for.
pub fn is_recognized_form(location: &PageLocation) -> bool {
    location.host.eq_ignore_ascii_case(FORM_HOST) && location.path.contains(FORM_PATH_FRAGMENT)
}

/// Find every logical field currently in the document.
///
/// Text controls each become one field; radios and checkboxes are grouped by
/// their shared question. Fields come out as text fields, then single-choice
/// groups, then multi-choice groups, each in document order.
pub async fn scan<D: Dom>(dom: &D) -> crate::dom::Result<Vec<Field>> {
    let mut fields = Vec::new();

    for node in dom.query_all(None, &text_selectors()).await? {
        match text_candidate(dom, node).await {
            Ok(true) => {
                let question = resolve_question_text(dom, node).await;
                log::debug!("text field {node:?}: {question}");
                fields.push(Field::text(node, question));
            }
            Ok(false) => {}
            Err(err) => log::debug!("skipping text control {node:?}: {err}"),
        }
    }

    let radios = choice_candidates(dom, &radio_selectors()).await?;
    fields.extend(group(dom, &radios, FieldKind::SingleChoice).await);

    let checkboxes = choice_candidates(dom, &checkbox_selectors()).await?;
    fields.extend(group(dom, &checkboxes, FieldKind::MultiChoice).await);

    log::debug!("scan found {} fields", fields.len());
    Ok(fields)
}

/// Read-only and `type="hidden"` controls are excluded. Disabled controls are
/// kept: the host form disables inputs until the user interacts.
async fn is_present_control<D: Dom>(dom: &D, node: NodeId) -> crate::dom::Result<bool> {
    let state = dom.control_state(node).await?;
    if state.read_only || state.input_type.as_deref() == Some("hidden") {
        return Ok(false);
    }
    Ok(dom.visibility(node).await?.is_present())
}

async fn text_candidate<D: Dom>(dom: &D, node: NodeId) -> crate::dom::Result<bool> {
    let state = dom.control_state(node).await?;
    if let Some(input_type) = state.input_type.as_deref() {
        if NON_TEXT_INPUT_TYPES.contains(&input_type) {
            return Ok(false);
        }
    }
    is_present_control(dom, node).await
}

async fn choice_candidates<D: Dom>(
    dom: &D,
    selectors: &[Selector],
) -> crate::dom::Result<Vec<NodeId>> {
    let mut present = Vec::new();
    for node in dom.query_all(None, selectors).await? {
        match is_present_control(dom, node).await {
            Ok(true) => present.push(node),
            Ok(false) => {}
            Err(err) => log::debug!("skipping choice control {node:?}: {err}"),
        }
    }

    let collected: BTreeSet<NodeId> = present.iter().copied().collect();
    let mut controls = Vec::with_capacity(present.len());
    for node in present {
        match nested_in_collected(dom, node, &collected).await {
            Ok(false) => controls.push(node),
            Ok(true) => log::debug!("folding {node:?} into its option wrapper"),
            Err(err) => log::debug!("skipping choice control {node:?}: {err}"),
        }
    }
    Ok(controls)
}

async fn nested_in_collected<D: Dom>(
    dom: &D,
    node: NodeId,
    collected: &BTreeSet<NodeId>,
) -> crate::dom::Result<bool> {
    let mut ancestor = dom.parent(node).await?;
    for _ in 0..NESTED_CHOICE_LEVELS {
        let Some(current) = ancestor else {
            break;
        };
        if collected.contains(&current) {
            return Ok(true);
        }
        ancestor = dom.parent(current).await?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::synthetic::{Element, SyntheticDom};

    fn question(dom: &SyntheticDom, heading: &str) -> NodeId {
        let item = dom.append(dom.body(), Element::new("div").attr("role", "listitem"));
        dom.append(item, Element::new("div").attr("role", "heading").text(heading));
        item
    }

    async fn scan_ok(dom: &SyntheticDom) -> Vec<Field> {
        scan(dom)
            .await
            .unwrap_or_else(|err| panic!("scan failed: {err}"))
    }

    #[tokio::test]
    async fn hidden_and_readonly_controls_are_excluded_but_disabled_kept() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "Name *");
        let disabled = dom.append(
            item,
            Element::new("input").attr("type", "text").attr("disabled", ""),
        );
        dom.append(item, Element::new("input").attr("type", "hidden").attr("data-initial-value", "x"));
        dom.append(
            item,
            Element::new("input").attr("type", "text").attr("readonly", ""),
        );

        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].controls, vec![disabled]);
        assert_eq!(fields[0].kind, FieldKind::Text);
        assert_eq!(fields[0].question_text, "Name *");
    }

    #[tokio::test]
    async fn presence_accepts_style_hidden_but_not_display_none() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "Name *");
        let loading = dom.append(
            item,
            Element::new("input").attr("type", "text").without_layout_box(),
        );
        dom.append(
            item,
            Element::new("input").attr("type", "email").display_none(),
        );
        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].controls, vec![loading]);
    }

    #[tokio::test]
    async fn choice_inputs_are_not_text_fields() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "Would you like to challenge? *");
        dom.append(
            item,
            Element::new("input")
                .attr("type", "radio")
                .attr("aria-labelledby", "opt"),
        );
        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].kind, FieldKind::SingleChoice);
    }

    #[tokio::test]
    async fn nested_native_input_is_folded_into_role_option() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "Practice Attendance *");
        let option = dom.append(
            item,
            Element::new("div").attr("role", "checkbox").attr("aria-label", "Monday"),
        );
        dom.append(option, Element::new("input").attr("type", "checkbox"));
        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].kind, FieldKind::MultiChoice);
        assert_eq!(fields[0].controls, vec![option]);
    }

    #[tokio::test]
    async fn editable_textbox_is_a_text_field() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "If challenging as a team, list your team *");
        let textbox = dom.append(
            item,
            Element::new("div")
                .attr("role", "textbox")
                .attr("contenteditable", "true"),
        );
        dom.append(item, Element::new("div").attr("role", "textbox"));
        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].kind, FieldKind::Text);
        assert_eq!(fields[0].controls, vec![textbox]);
        assert_eq!(
            fields[0].question_text,
            "If challenging as a team, list your team *"
        );
    }

    #[tokio::test]
    async fn stale_choice_control_is_skipped_not_fatal() {
        let dom = SyntheticDom::form_page();
        let item = question(&dom, "Would you like to challenge or battle? *");
        let group = dom.append(item, Element::new("div").attr("role", "radiogroup"));
        let kept = dom.append(
            group,
            Element::new("div").attr("role", "radio").attr("aria-label", "Battle"),
        );
        let gone = dom.append(
            group,
            Element::new("div").attr("role", "radio").attr("aria-label", "Chalenge"),
        );
        dom.detach_on_walk(gone);

        let fields = scan_ok(&dom).await;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].kind, FieldKind::SingleChoice);
        assert_eq!(fields[0].controls, vec![kept]);
    }

    #[tokio::test]
    async fn empty_document_yields_no_fields() {
        let dom = SyntheticDom::form_page();
        assert!(scan_ok(&dom).await.is_empty());
    }

    #[test]
    fn recognizes_only_the_form_host() {
        assert!(is_recognized_form(&PageLocation {
            host: "docs.google.com".into(),
            path: "/forms/d/e/abc/viewform".into(),
        }));
        assert!(!is_recognized_form(&PageLocation {
            host: "docs.google.com".into(),
            path: "/document/d/abc".into(),
        }));
        assert!(!is_recognized_form(&PageLocation {
            host: "example.com".into(),
            path: "/forms/".into(),
        }));
    }
}
