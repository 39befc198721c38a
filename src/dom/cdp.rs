use std::time::Duration;

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::{
    selector_list_css, ControlState, Dom, DomError, DomEvent, NodeId, PageLocation, Result,
    Selector, Visibility,
};

const MUTATION_POLL_INTERVAL_MS: u64 = 100;

/// Page-side registry that hands out stable numeric ids for elements and
/// counts subtree mutations. Installing it is idempotent, and a navigation
/// simply starts a fresh registry, so old ids turn stale. Entries are weak:
/// a removed element can be collected and its id then reads as stale.
const HELPER_JS: &str = r#"(() => {
    let s = window.__signupAutofill;
    if (!s) {
        s = { nodes: [], ids: new WeakMap(), mutations: 0, observer: null };
        s.idOf = (el) => {
            let id = s.ids.get(el);
            if (id === undefined) {
                id = s.nodes.length;
                s.nodes.push(new WeakRef(el));
                s.ids.set(el, id);
            }
            return id;
        };
        s.get = (id) => {
            const ref = s.nodes[id];
            const el = ref && ref.deref();
            if (!el || !el.isConnected) throw new Error('stale:' + id);
            return el;
        };
        window.__signupAutofill = s;
    }
    if (!s.observer && document.documentElement) {
        s.observer = new MutationObserver(() => { s.mutations += 1; });
        s.observer.observe(document.documentElement, { childList: true, subtree: true });
    }
    return s;
})()"#;

#[derive(serde::Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// [`Dom`] over a Chromium tab, one `Runtime.evaluate` per operation.
pub struct CdpDom {
    page: Page,
    mutations: watch::Receiver<u64>,
    poller: tokio::task::JoinHandle<()>,
}

impl CdpDom {
    /// Install the page helper and start watching for mutations.
    pub async fn attach(page: Page) -> Result<Self> {
        evaluate_value(&page, &format!("(() => {{ const s = {HELPER_JS}; return s.mutations; }})()"))
            .await?;
        let (tx, rx) = watch::channel(0u64);
        let poll_page = page.clone();
        let poller = tokio::spawn(async move {
            let expression = format!("(() => {{ const s = {HELPER_JS}; return s.mutations; }})()");
            loop {
                tokio::time::sleep(Duration::from_millis(MUTATION_POLL_INTERVAL_MS)).await;
                if tx.is_closed() {
                    break;
                }
                match evaluate_value(&poll_page, &expression).await {
                    Ok(value) => {
                        let count = value.as_u64().unwrap_or(0);
                        tx.send_if_modified(|current| {
                            if *current != count {
                                *current = count;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Err(err) => {
                        log::debug!("mutation poll failed: {err}");
                    }
                }
            }
        });
        Ok(Self {
            page,
            mutations: rx,
            poller,
        })
    }

    /// Run `body` as a function body with the helper bound to `s`.
    async fn call<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let expression = format!(
            r#"(() => {{
                const s = {HELPER_JS};
                try {{
                    return {{ ok: (() => {{ {body} }})() ?? null }};
                }} catch (e) {{
                    return {{ error: String((e && e.message) || e) }};
                }}
            }})()"#
        );
        let value = evaluate_value(&self.page, &expression).await?;
        let envelope: Envelope =
            serde_json::from_value(value).map_err(|e| DomError::Decode(e.to_string()))?;
        if let Some(error) = envelope.error {
            if let Some(id) = error.strip_prefix("stale:") {
                let id = id.trim().parse::<u64>().unwrap_or_default();
                return Err(DomError::StaleNode(NodeId(id)));
            }
            return Err(DomError::Evaluate(error));
        }
        serde_json::from_value(envelope.ok).map_err(|e| DomError::Decode(e.to_string()))
    }
}

impl Drop for CdpDom {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

async fn evaluate_value(page: &Page, expression: &str) -> Result<serde_json::Value> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(|e| DomError::Evaluate(format!("invalid evaluate params: {e}")))?;
    let result = page
        .evaluate_expression(params)
        .await
        .map_err(|e| DomError::Evaluate(e.to_string()))?;
    Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

impl Dom for CdpDom {
    async fn location(&self) -> Result<PageLocation> {
        self.call("return { host: location.hostname, path: location.pathname };")
            .await
    }

    async fn query_all(
        &self,
        scope: Option<NodeId>,
        selectors: &[Selector],
    ) -> Result<Vec<NodeId>> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }
        let css = js_string(&selector_list_css(selectors));
        let root = match scope {
            Some(NodeId(id)) => format!("s.get({id})"),
            None => "document".to_string(),
        };
        let ids: Vec<u64> = self
            .call(&format!(
                "return Array.from({root}.querySelectorAll({css})).map(s.idOf);"
            ))
            .await?;
        Ok(ids.into_iter().map(NodeId).collect())
    }

    async fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        let id: Option<u64> = self
            .call(&format!(
                "const p = s.get({}).parentElement; return p ? s.idOf(p) : null;",
                node.0
            ))
            .await?;
        Ok(id.map(NodeId))
    }

    async fn tag_name(&self, node: NodeId) -> Result<String> {
        self.call(&format!("return s.get({}).tagName.toLowerCase();", node.0))
            .await
    }

    async fn attribute(&self, node: NodeId, name: &str) -> Result<Option<String>> {
        self.call(&format!(
            "return s.get({}).getAttribute({});",
            node.0,
            js_string(name)
        ))
        .await
    }

    async fn text(&self, node: NodeId) -> Result<String> {
        self.call(&format!(
            "const el = s.get({}); return el.innerText ?? el.textContent ?? '';",
            node.0
        ))
        .await
    }

    async fn visibility(&self, node: NodeId) -> Result<Visibility> {
        self.call(&format!(
            r#"const el = s.get({});
            const style = window.getComputedStyle(el);
            return {{ hasLayoutBox: el.offsetParent !== null, displayNone: !style || style.display === 'none' }};"#,
            node.0
        ))
        .await
    }

    async fn control_state(&self, node: NodeId) -> Result<ControlState> {
        self.call(&format!(
            r#"const el = s.get({});
            const isInput = el instanceof HTMLInputElement;
            return {{
                inputType: isInput ? String(el.type || 'text').toLowerCase() : null,
                disabled: !!el.disabled,
                readOnly: !!el.readOnly,
                checked: !!el.checked,
            }};"#,
            node.0
        ))
        .await
    }

    async fn enable(&self, node: NodeId) -> Result<()> {
        self.call(&format!(
            r#"const el = s.get({});
            if ('disabled' in el) el.disabled = false;
            el.removeAttribute('disabled');
            el.removeAttribute('aria-disabled');
            return null;"#,
            node.0
        ))
        .await
    }

    async fn focus(&self, node: NodeId) -> Result<()> {
        self.call(&format!("s.get({}).focus(); return null;", node.0))
            .await
    }

    async fn set_value_native(&self, node: NodeId, value: &str) -> Result<()> {
        // Frameworks may shadow `value` on the instance; the prototype setter
        // is the one the browser's own input tracking observes.
        self.call(&format!(
            r#"const el = s.get({});
            const proto = el instanceof HTMLTextAreaElement
                ? HTMLTextAreaElement.prototype
                : HTMLInputElement.prototype;
            const desc = Object.getOwnPropertyDescriptor(proto, 'value');
            if (desc && desc.set) desc.set.call(el, {value}); else el.value = {value};
            return null;"#,
            node.0,
            value = js_string(value)
        ))
        .await
    }

    async fn set_text_content(&self, node: NodeId, text: &str) -> Result<()> {
        self.call(&format!(
            "s.get({}).textContent = {}; return null;",
            node.0,
            js_string(text)
        ))
        .await
    }

    async fn dispatch(&self, node: NodeId, event: DomEvent) -> Result<()> {
        let body = match event {
            DomEvent::Click => format!("s.get({}).click(); return null;", node.0),
            DomEvent::MouseDown | DomEvent::MouseUp => format!(
                "s.get({}).dispatchEvent(new MouseEvent('{}', {{ bubbles: true, cancelable: true, view: window }})); return null;",
                node.0,
                event.name()
            ),
            DomEvent::Focus | DomEvent::Blur => format!(
                "s.get({}).dispatchEvent(new FocusEvent('{}', {{ bubbles: false }})); return null;",
                node.0,
                event.name()
            ),
            DomEvent::Input | DomEvent::Change => format!(
                "s.get({}).dispatchEvent(new Event('{}', {{ bubbles: true }})); return null;",
                node.0,
                event.name()
            ),
        };
        self.call(&body).await
    }

    async fn show_notice(&self, message: &str, duration: Duration) -> Result<()> {
        self.call(&format!(
            r#"const banner = document.createElement('div');
            banner.textContent = {};
            banner.setAttribute('data-signup-autofill-notice', '');
            Object.assign(banner.style, {{
                position: 'fixed', top: '16px', right: '16px', zIndex: '2147483647',
                background: '#28a745', color: '#fff', padding: '10px 16px',
                borderRadius: '6px', font: '14px sans-serif',
                boxShadow: '0 2px 8px rgba(0,0,0,0.25)',
            }});
            (document.body || document.documentElement).appendChild(banner);
            setTimeout(() => banner.remove(), {});
            return null;"#,
            js_string(message),
            duration.as_millis()
        ))
        .await
    }

    fn subscribe_mutations(&self) -> watch::Receiver<u64> {
        self.mutations.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string("a\"b\nc"), r#""a\"b\nc""#);
    }

    #[test]
    fn helper_registry_holds_elements_weakly() {
        assert!(HELPER_JS.contains("s.idOf"));
        assert!(HELPER_JS.contains("'stale:'"));
        assert!(HELPER_JS.contains("MutationObserver"));
        assert!(HELPER_JS.contains("new WeakRef(el)"));
        assert!(!HELPER_JS.contains("s.nodes.push(el)"));
    }
}
