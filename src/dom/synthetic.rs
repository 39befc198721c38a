//! In-memory document used by tests and offline dry runs.
//!
//! The tree mimics the few browser behaviours the engine depends on:
//! disabled controls ignore clicks, radios inside a `radiogroup` are mutually
//! exclusive, role-marked controls mirror their state into `aria-checked`,
//! and every write is recorded so tests can assert on exact interactions.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tokio::sync::watch;

use super::{ControlState, Dom, DomError, DomEvent, NodeId, PageLocation, Result, Selector, Visibility};

/// Builder for an element to be appended to a [`SyntheticDom`].
#[derive(Debug, Clone, Default)]
pub struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    checked: bool,
    has_layout_box: bool,
    display_none: bool,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            has_layout_box: true,
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Own text, rendered before the text of any children.
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }

    /// No layout box, as for content styled invisible before hydration.
    pub fn without_layout_box(mut self) -> Self {
        self.has_layout_box = false;
        self
    }

    pub fn display_none(mut self) -> Self {
        self.display_none = true;
        self.has_layout_box = false;
        self
    }
}

/// One recorded write against the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Enable(NodeId),
    Focus(NodeId),
    SetValue(NodeId, String),
    SetText(NodeId, String),
    Dispatch(NodeId, DomEvent),
    Notice(String),
}

#[derive(Debug)]
struct Node {
    element: Element,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Clicks still to be swallowed, simulating a page that drops the first
    /// synthetic click.
    dropped_clicks: u32,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
    location: PageLocation,
    interactions: Vec<Interaction>,
    /// Nodes whose writes fail, as when the page throws from a handler.
    failing: BTreeSet<NodeId>,
    /// Nodes detached between a query and a later ancestor walk.
    detached: BTreeSet<NodeId>,
}

/// A document tree held in memory. The root is a `<body>` element.
pub struct SyntheticDom {
    tree: RefCell<Tree>,
    mutations: watch::Sender<u64>,
}

impl SyntheticDom {
    pub fn new(host: &str, path: &str) -> Self {
        let body = Node {
            element: Element::new("body"),
            parent: None,
            children: Vec::new(),
            dropped_clicks: 0,
        };
        let (mutations, _) = watch::channel(0);
        Self {
            tree: RefCell::new(Tree {
                nodes: vec![body],
                location: PageLocation {
                    host: host.to_string(),
                    path: path.to_string(),
                },
                interactions: Vec::new(),
                failing: BTreeSet::new(),
                detached: BTreeSet::new(),
            }),
            mutations,
        }
    }

    /// A document located on the recognised form host.
    pub fn form_page() -> Self {
        Self::new("docs.google.com", "/forms/d/e/example/viewform")
    }

    pub fn body(&self) -> NodeId {
        NodeId(0)
    }

    /// Append `element` under `parent` and signal a subtree mutation.
    pub fn append(&self, parent: NodeId, element: Element) -> NodeId {
        let id = {
            let mut tree = self.tree.borrow_mut();
            let id = NodeId(tree.nodes.len() as u64);
            tree.nodes.push(Node {
                element,
                parent: Some(parent),
                children: Vec::new(),
                dropped_clicks: 0,
            });
            if let Some(parent_node) = tree.nodes.get_mut(parent.0 as usize) {
                parent_node.children.push(id);
            }
            id
        };
        self.mutations.send_modify(|count| *count += 1);
        id
    }

    /// Make `node` swallow its next `count` clicks.
    pub fn drop_clicks(&self, node: NodeId, count: u32) {
        if let Some(n) = self.tree.borrow_mut().nodes.get_mut(node.0 as usize) {
            n.dropped_clicks = count;
        }
    }

    /// Make every write to `node` fail with [`DomError::Evaluate`].
    pub fn fail_on(&self, node: NodeId) {
        self.tree.borrow_mut().failing.insert(node);
    }

    /// Make `parent(node)` report the node as stale while queries still
    /// return it.
    pub fn detach_on_walk(&self, node: NodeId) {
        self.tree.borrow_mut().detached.insert(node);
    }

    pub fn value_of(&self, node: NodeId) -> String {
        self.with_node(node, |n| n.element.value.clone())
            .unwrap_or_default()
    }

    pub fn text_of(&self, node: NodeId) -> String {
        self.with_node(node, |n| n.element.text.clone())
            .unwrap_or_default()
    }

    pub fn is_checked(&self, node: NodeId) -> bool {
        self.with_node(node, |n| {
            n.element.checked
                || n.element.attrs.get("aria-checked").map(String::as_str) == Some("true")
        })
        .unwrap_or(false)
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.tree.borrow().interactions.clone()
    }

    pub fn clear_interactions(&self) {
        self.tree.borrow_mut().interactions.clear();
    }

    fn with_node<T>(&self, node: NodeId, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.tree.borrow().nodes.get(node.0 as usize).map(f)
    }

    fn record(&self, interaction: Interaction) {
        self.tree.borrow_mut().interactions.push(interaction);
    }

    fn checked_node(&self, node: NodeId) -> Result<()> {
        if self.tree.borrow().nodes.len() > node.0 as usize {
            Ok(())
        } else {
            Err(DomError::StaleNode(node))
        }
    }

    /// Existence check plus the injected write failure.
    fn writable(&self, node: NodeId) -> Result<()> {
        self.checked_node(node)?;
        if self.tree.borrow().failing.contains(&node) {
            return Err(DomError::Evaluate(format!("write to {node:?} was rejected")));
        }
        Ok(())
    }
}

impl Tree {
    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(DomError::StaleNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(DomError::StaleNode(id))
    }

    fn preorder(&self, root: NodeId, out: &mut Vec<NodeId>) {
        if let Ok(node) = self.node(root) {
            for &child in &node.children {
                out.push(child);
                self.preorder(child, out);
            }
        }
    }

    fn rendered_text(&self, id: NodeId) -> String {
        let Ok(node) = self.node(id) else {
            return String::new();
        };
        let mut lines = Vec::new();
        if !node.element.text.trim().is_empty() {
            lines.push(node.element.text.clone());
        }
        for &child in &node.children {
            let text = self.rendered_text(child);
            if !text.trim().is_empty() {
                lines.push(text);
            }
        }
        lines.join("\n")
    }

    fn is_role(&self, id: NodeId, role: &str) -> bool {
        self.node(id)
            .map(|n| n.element.attrs.get("role").map(String::as_str) == Some(role))
            .unwrap_or(false)
    }

    fn choice_kind(&self, id: NodeId) -> Option<&'static str> {
        let node = self.node(id).ok()?;
        let role = node.element.attrs.get("role").map(String::as_str);
        let input_type = (node.element.tag == "input")
            .then(|| node.element.attrs.get("type").map(String::as_str))
            .flatten();
        match (role, input_type) {
            (Some("radio"), _) | (_, Some("radio")) => Some("radio"),
            (Some("checkbox"), _) | (_, Some("checkbox")) => Some("checkbox"),
            _ => None,
        }
    }

    fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Ok(node) = self.node_mut(id) {
            node.element.checked = checked;
            if node.element.attrs.contains_key("role") {
                node.element
                    .attrs
                    .insert("aria-checked".to_string(), checked.to_string());
            }
        }
    }

    /// Default action of a click on a choice control.
    fn activate(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.dropped_clicks > 0 {
            node.dropped_clicks -= 1;
            return Ok(());
        }
        if node.element.attrs.contains_key("disabled")
            || node.element.attrs.get("aria-disabled").map(String::as_str) == Some("true")
        {
            return Ok(());
        }
        match self.choice_kind(id) {
            Some("radio") => {
                let mut group_root = self.node(id)?.parent;
                while let Some(candidate) = group_root {
                    if self.is_role(candidate, "radiogroup") {
                        break;
                    }
                    group_root = self.node(candidate)?.parent;
                }
                if let Some(root) = group_root {
                    let mut members = Vec::new();
                    self.preorder(root, &mut members);
                    for member in members {
                        if self.choice_kind(member) == Some("radio") {
                            self.set_checked(member, false);
                        }
                    }
                }
                self.set_checked(id, true);
            }
            Some(_) => {
                let current = self.node(id)?.element.checked
                    || self.node(id)?.element.attrs.get("aria-checked").map(String::as_str)
                        == Some("true");
                self.set_checked(id, !current);
            }
            None => {}
        }
        Ok(())
    }
}

impl Dom for SyntheticDom {
    async fn location(&self) -> Result<PageLocation> {
        Ok(self.tree.borrow().location.clone())
    }

    async fn query_all(
        &self,
        scope: Option<NodeId>,
        selectors: &[Selector],
    ) -> Result<Vec<NodeId>> {
        let tree = self.tree.borrow();
        let root = scope.unwrap_or(NodeId(0));
        tree.node(root)?;
        let mut descendants = Vec::new();
        tree.preorder(root, &mut descendants);
        Ok(descendants
            .into_iter()
            .filter(|id| {
                let Ok(node) = tree.node(*id) else {
                    return false;
                };
                selectors.iter().any(|selector| {
                    selector.matches_with(&node.element.tag, |name| {
                        node.element.attrs.get(name).map(String::as_str)
                    })
                })
            })
            .collect())
    }

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        let tree = self.tree.borrow();
        if tree.detached.contains(&node) {
            return Err(DomError::StaleNode(node));
        }
        Ok(tree.node(node)?.parent)
    }

    async fn tag_name(&self, node: NodeId) -> Result<String> {
        Ok(self.tree.borrow().node(node)?.element.tag.clone())
    }

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        Ok(self.tree.borrow().node(node)?.element.attrs.get(name).cloned())
    }

    async fn text(&self, node: NodeId) -> Result<String> {
        let tree = self.tree.borrow();
        tree.node(node)?;
        Ok(tree.rendered_text(node))
    }

    async fn visibility(&self, node: NodeId) -> Result<Visibility> {
        let tree = self.tree.borrow();
        let element = &tree.node(node)?.element;
        Ok(Visibility {
            has_layout_box: element.has_layout_box,
            display_none: element.display_none,
        })
    }

    async fn control_state(&self, node: NodeId) -> Result<ControlState> {
        let tree = self.tree.borrow();
        let element = &tree.node(node)?.element;
        let input_type = (element.tag == "input").then(|| {
            element
                .attrs
                .get("type")
                .map(|t| t.to_ascii_lowercase())
                .unwrap_or_else(|| "text".to_string())
        });
        Ok(ControlState {
            input_type,
            disabled: element.attrs.contains_key("disabled"),
            read_only: element.attrs.contains_key("readonly"),
            checked: element.checked,
        })
    }

    async fn enable(&self, node: NodeId) -> Result<()> {
        self.writable(node)?;
        {
            let mut tree = self.tree.borrow_mut();
            let element = &mut tree.node_mut(node)?.element;
            element.attrs.remove("disabled");
            element.attrs.remove("aria-disabled");
        }
        self.record(Interaction::Enable(node));
        Ok(())
    }

    async fn focus(&self, node: NodeId) -> Result<()> {
        self.writable(node)?;
        self.record(Interaction::Focus(node));
        Ok(())
    }

    async fn set_value_native(&self, node: NodeId, value: &str) -> Result<()> {
        self.writable(node)?;
        self.tree.borrow_mut().node_mut(node)?.element.value = value.to_string();
        self.record(Interaction::SetValue(node, value.to_string()));
        Ok(())
    }

    async fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        self.writable(node)?;
        {
            let mut tree = self.tree.borrow_mut();
            let n = tree.node_mut(node)?;
            n.element.text = text.to_string();
            n.children.clear();
        }
        self.record(Interaction::SetText(node, text.to_string()));
        Ok(())
    }

    async fn dispatch(&self, node: NodeId, event: DomEvent) -> Result<()> {
        self.writable(node)?;
        if event == DomEvent::Click {
            self.tree.borrow_mut().activate(node)?;
        }
        self.record(Interaction::Dispatch(node, event));
        Ok(())
    }

    async fn show_notice(&self, message: &str, _duration: Duration) -> Result<()> {
        self.record(Interaction::Notice(message.to_string()));
        Ok(())
    }

    fn subscribe_mutations(&self) -> watch::Receiver<u64> {
        self.mutations.subscribe()
    }
}
