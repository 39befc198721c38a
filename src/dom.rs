//! Minimal capability interface over a live document.
//!
//! The autofill engine never touches a rendering engine directly. Everything
//! it needs (querying controls, climbing ancestors, reading text and state,
//! writing values, dispatching events, watching for subtree mutations) goes
//! through [`Dom`], which is implemented for a Chromium tab in [`cdp`] and for
//! an in-memory tree in [`synthetic`].

pub mod cdp;
pub mod synthetic;

use std::time::Duration;

use tokio::sync::watch;

/// Opaque handle to an element in a [`Dom`].
///
/// Handles are only valid for the document that produced them. A navigation
/// invalidates every handle; operations on a stale handle fail with
/// [`DomError::StaleNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct NodeId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum DomError {
    #[error("node {0:?} is no longer attached to the document")]
    StaleNode(NodeId),
    #[error("evaluate failed: {0}")]
    Evaluate(String),
    #[error("unexpected result from page: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, DomError>;

/// One attribute test inside a [`Selector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrTest {
    /// `[name]`
    Present,
    /// `[name="value"]`
    Equals(String),
    /// `[name*="value"]`
    Contains(String),
    /// `[name~="value"]`, whitespace-separated word match (class names).
    Word(String),
}

/// A compound selector: optional tag plus attribute tests.
///
/// This is the subset of CSS the engine needs. It renders to CSS for the
/// browser backend and can be evaluated directly against any [`Dom`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    tag: Option<String>,
    attrs: Vec<(String, AttrTest)>,
}

impl Selector {
    pub fn tag(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_ascii_lowercase()),
            attrs: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &str) -> Self {
        self.attrs.push((name.to_string(), AttrTest::Present));
        self
    }

    pub fn attr_eq(mut self, name: &str, value: &str) -> Self {
        self.attrs
            .push((name.to_string(), AttrTest::Equals(value.to_string())));
        self
    }

    pub fn attr_contains(mut self, name: &str, value: &str) -> Self {
        self.attrs
            .push((name.to_string(), AttrTest::Contains(value.to_string())));
        self
    }

    pub fn class(mut self, class_name: &str) -> Self {
        self.attrs
            .push(("class".to_string(), AttrTest::Word(class_name.to_string())));
        self
    }

    /// Render as a CSS compound selector.
    pub fn to_css(&self) -> String {
        let mut css = self.tag.clone().unwrap_or_default();
        for (name, test) in &self.attrs {
            let quoted = |value: &str| {
                serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
            };
            match test {
                AttrTest::Present => css.push_str(&format!("[{name}]")),
                AttrTest::Equals(v) => css.push_str(&format!("[{name}={}]", quoted(v))),
                AttrTest::Contains(v) => css.push_str(&format!("[{name}*={}]", quoted(v))),
                AttrTest::Word(v) => css.push_str(&format!("[{name}~={}]", quoted(v))),
            }
        }
        if css.is_empty() {
            css.push('*');
        }
        css
    }

    /// Test a tag name and attribute lookup against this selector.
    pub fn matches_with<'a>(
        &self,
        tag: &str,
        mut attribute: impl FnMut(&str) -> Option<&'a str>,
    ) -> bool {
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.attrs.iter().all(|(name, test)| {
            let Some(actual) = attribute(name) else {
                return false;
            };
            match test {
                AttrTest::Present => true,
                AttrTest::Equals(v) => actual == v,
                AttrTest::Contains(v) => actual.contains(v.as_str()),
                AttrTest::Word(v) => actual.split_whitespace().any(|word| word == v),
            }
        })
    }

    /// Evaluate this selector against a node of `dom`.
    pub async fn matches<D: Dom>(&self, dom: &D, node: NodeId) -> Result<bool> {
        let tag = dom.tag_name(node).await?;
        if let Some(expected) = &self.tag {
            if !expected.eq_ignore_ascii_case(&tag) {
                return Ok(false);
            }
        }
        let mut values = Vec::with_capacity(self.attrs.len());
        for (name, _) in &self.attrs {
            values.push((name.as_str(), dom.attribute(node, name).await?));
        }
        Ok(self.matches_with(&tag, |name| {
            values
                .iter()
                .find(|(n, _)| *n == name)
                .and_then(|(_, v)| v.as_deref())
        }))
    }
}

/// Render a selector list as a comma-joined CSS selector group.
pub fn selector_list_css(selectors: &[Selector]) -> String {
    selectors
        .iter()
        .map(Selector::to_css)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Layout facts used for the scanner's presence test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    /// `offsetParent !== null`
    pub has_layout_box: bool,
    /// computed `display` is `none`
    pub display_none: bool,
}

impl Visibility {
    /// A control counts as present when it has a layout box or is not
    /// `display: none`. Controls hidden by style during load still count.
    pub fn is_present(&self) -> bool {
        self.has_layout_box || !self.display_none
    }
}

/// Form-control state relevant to scanning and actuation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    /// Lower-cased `type` of an `<input>`, `None` for other elements.
    pub input_type: Option<String>,
    pub disabled: bool,
    pub read_only: bool,
    /// The `checked` property. Role-based controls report via `aria-checked`.
    pub checked: bool,
}

/// Synthetic events the actuator dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEvent {
    Focus,
    Input,
    Change,
    Blur,
    MouseDown,
    MouseUp,
    /// Activation click (`element.click()`), which also runs default actions.
    Click,
}

impl DomEvent {
    pub fn name(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Input => "input",
            Self::Change => "change",
            Self::Blur => "blur",
            Self::MouseDown => "mousedown",
            Self::MouseUp => "mouseup",
            Self::Click => "click",
        }
    }
}

/// Host and path of the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct PageLocation {
    pub host: String,
    pub path: String,
}

/// Capability interface over a live document.
///
/// All calls happen on a single task; implementations may use interior
/// mutability without synchronisation.
#[allow(async_fn_in_trait)]
pub trait Dom {
    async fn location(&self) -> Result<PageLocation>;

    /// All elements under `scope` (or the whole document) matching any of
    /// `selectors`, in document order, without duplicates.
    async fn query_all(&self, scope: Option<NodeId>, selectors: &[Selector])
        -> Result<Vec<NodeId>>;

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>>;

    /// Lower-cased tag name.
    async fn tag_name(&self, node: NodeId) -> Result<String>;

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>>;

    /// Rendered text, with line breaks between block-level children.
    async fn text(&self, node: NodeId) -> Result<String>;

    async fn visibility(&self, node: NodeId) -> Result<Visibility>;

    async fn control_state(&self, node: NodeId) -> Result<ControlState>;

    /// Clear the `disabled` property and `aria-disabled` attribute.
    async fn enable(&self, node: NodeId) -> Result<()>;

    async fn focus(&self, node: NodeId) -> Result<()>;

    /// Write `value` through the platform's own property setter, bypassing
    /// any accessor the page installed on the instance.
    async fn set_value_native(&self, node: NodeId, value: &str) -> Result<()>;

    async fn set_text_content(&self, node: NodeId, text: &str) -> Result<()>;

    async fn dispatch(&self, node: NodeId, event: DomEvent) -> Result<()>;

    /// Show a transient on-page banner, removed after `duration`.
    async fn show_notice(&self, message: &str, duration: Duration) -> Result<()>;

    /// A counter that changes whenever the document subtree mutates.
    fn subscribe_mutations(&self) -> watch::Receiver<u64>;
}

/// Walk up from `node` to the nearest element (itself included) matching
/// `selector`, giving up after `max_levels` parents.
pub async fn closest<D: Dom>(
    dom: &D,
    node: NodeId,
    selector: &Selector,
    max_levels: usize,
) -> Result<Option<NodeId>> {
    let mut current = Some(node);
    for _ in 0..=max_levels {
        let Some(candidate) = current else {
            break;
        };
        if selector.matches(dom, candidate).await? {
            return Ok(Some(candidate));
        }
        current = dom.parent(candidate).await?;
    }
    Ok(None)
}

/// Whether a choice control reports itself checked, either through the
/// `checked` property or `aria-checked="true"`.
pub async fn is_checked<D: Dom>(dom: &D, node: NodeId) -> Result<bool> {
    if dom.control_state(node).await?.checked {
        return Ok(true);
    }
    Ok(dom
        .attribute(node, "aria-checked")
        .await?
        .is_some_and(|v| v.eq_ignore_ascii_case("true")))
}
