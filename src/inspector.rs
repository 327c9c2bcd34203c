use crate::config::EngineConfig;
use crate::tab::Tab;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Integer page coordinate. Centers are rounded because input dispatch and
/// marker placement both work in whole CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One element from a broad interactivity scan: identity, truncated text,
/// and the center coordinate a caller would click.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub center: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Clickable,
    Input,
}

/// One element from the clickable/input classification pass.
///
/// `in_viewport` means the whole rectangle sits inside the visible scroll
/// region; `exposed` means the element won the hit test at its own center.
/// The two are independent: a half-scrolled button can be exposed without
/// being fully in-viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub kind: ElementKind,
    pub center: Point,
    pub rect: Rect,
    pub in_viewport: bool,
    pub exposed: bool,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Result of point-based hit testing plus the interactive-ancestor walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementHit {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Runs in-page scans that enumerate, filter, and geometrically describe
/// interactive elements. Every query degrades to an empty result on
/// evaluation failure rather than failing the calling session.
pub struct ElementInspector {
    config: EngineConfig,
}

impl ElementInspector {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Single scan over the whole document: skip structural tags, then keep
    /// only elements that have on-screen area, are not hidden by computed
    /// style, win the hit test at their own center, and carry some identity
    /// (id, class, or text) so anonymous wrappers do not flood the result.
    pub async fn enumerate_elements(
        &self,
        tab: &Tab,
        max_text_length: Option<usize>,
    ) -> Vec<ElementSummary> {
        let max_len = max_text_length.unwrap_or(self.config.max_text_length);
        let script = format!(
            r#"(() => {{
                const SKIP = new Set([
                    'html', 'head', 'body', 'meta', 'title', 'base', 'link',
                    'style', 'script', 'noscript', 'template', 'slot',
                    'svg', 'path', 'g', 'defs', 'use', 'lineargradient', 'stop',
                    'br', 'wbr', 'source', 'track', 'param',
                ]);
                const vw = window.innerWidth;
                const vh = window.innerHeight;
                const out = [];
                for (const el of document.querySelectorAll('*')) {{
                    const tag = el.tagName.toLowerCase();
                    if (SKIP.has(tag)) continue;
                    if (tag === 'input' && el.type === 'hidden') continue;
                    const r = el.getBoundingClientRect();
                    if (r.width === 0 || r.height === 0) continue;
                    if (r.bottom < 0 || r.top > vh || r.right < 0 || r.left > vw) continue;
                    const cs = window.getComputedStyle(el);
                    if (cs.display === 'none' || cs.visibility === 'hidden') continue;
                    if (parseFloat(cs.opacity) === 0) continue;
                    const cx = r.left + r.width / 2;
                    const cy = r.top + r.height / 2;
                    const top = document.elementFromPoint(cx, cy);
                    if (!top || (top !== el && !el.contains(top))) continue;
                    const raw = (el.innerText || el.value || '').trim();
                    const cls = typeof el.className === 'string' ? el.className.trim() : '';
                    if (!el.id && !cls && !raw) continue;
                    out.push({{
                        tag,
                        id: el.id || null,
                        class: cls || null,
                        text: raw ? raw.slice(0, {max_len}) : null,
                        center: {{ x: Math.round(cx), y: Math.round(cy) }},
                    }});
                }}
                return out;
            }})()"#
        );
        self.run_list_query(tab, &script, "enumerate_elements").await
    }

    /// Narrower pass that classifies elements as clickable controls versus
    /// text-entry surfaces, using the same style and occlusion tests.
    pub async fn enumerate_clickable_and_input(&self, tab: &Tab) -> Vec<InteractiveElement> {
        let max_len = self.config.max_text_length;
        let script = format!(
            r#"(() => {{
                const CLICKABLE =
                    'a, button, summary, ' +
                    '[role="button"], [role="link"], [role="tab"], [role="menuitem"], ' +
                    '[role="checkbox"], [role="radio"], [role="switch"], [role="option"], ' +
                    'input[type="submit"], input[type="button"], input[type="reset"], ' +
                    'input[type="checkbox"], input[type="radio"]';
                const INPUT =
                    'input:not([type="hidden"]):not([type="submit"]):not([type="button"])' +
                    ':not([type="reset"]):not([type="checkbox"]):not([type="radio"]), ' +
                    'textarea, select, [contenteditable="true"], [contenteditable=""]';
                const vw = window.innerWidth;
                const vh = window.innerHeight;
                const out = [];
                const seen = new Set();
                const describe = (el, kind) => {{
                    if (seen.has(el)) return;
                    seen.add(el);
                    const r = el.getBoundingClientRect();
                    if (r.width === 0 || r.height === 0) return;
                    if (r.bottom < 0 || r.top > vh || r.right < 0 || r.left > vw) return;
                    const cs = window.getComputedStyle(el);
                    if (cs.display === 'none' || cs.visibility === 'hidden') return;
                    if (parseFloat(cs.opacity) === 0) return;
                    const cx = r.left + r.width / 2;
                    const cy = r.top + r.height / 2;
                    const top = document.elementFromPoint(cx, cy);
                    const exposed = !!top && (top === el || el.contains(top));
                    if (!exposed) return;
                    const inViewport =
                        r.top >= 0 && r.left >= 0 && r.bottom <= vh && r.right <= vw;
                    const attrs = {{}};
                    for (const a of el.attributes) {{
                        attrs[a.name] = a.value.slice(0, {max_len});
                    }}
                    const raw = (el.innerText || el.value || el.placeholder || '').trim();
                    const cls = typeof el.className === 'string' ? el.className.trim() : '';
                    out.push({{
                        tag: el.tagName.toLowerCase(),
                        id: el.id || null,
                        class: cls || null,
                        text: raw ? raw.slice(0, {max_len}) : null,
                        kind,
                        center: {{ x: Math.round(cx), y: Math.round(cy) }},
                        rect: {{ x: r.left, y: r.top, width: r.width, height: r.height }},
                        in_viewport: inViewport,
                        exposed: true,
                        attributes: attrs,
                    }});
                }};
                for (const el of document.querySelectorAll(CLICKABLE)) {{
                    describe(el, 'clickable');
                }}
                for (const el of document.querySelectorAll(INPUT)) {{
                    describe(el, 'input');
                }}
                return out;
            }})()"#
        );
        self.run_list_query(tab, &script, "enumerate_clickable_and_input")
            .await
    }

    /// Hit-test the given coordinate, then walk up toward `<body>` looking
    /// for the first node that passes the interactivity ruleset: native
    /// interactive tags (anchors need an href, inputs must not be hidden),
    /// an explicit ARIA role, a handler attribute, or a labeling attribute
    /// paired with a non-negative tab index.
    pub async fn element_at_point(&self, tab: &Tab, x: f64, y: f64) -> Option<ElementHit> {
        let max_len = self.config.max_text_length;
        let script = format!(
            r#"(() => {{
                const hit = document.elementFromPoint({x}, {y});
                if (!hit) return null;
                const TAGS = new Set(['button', 'select', 'textarea', 'summary', 'label', 'option']);
                const ROLES = new Set([
                    'button', 'link', 'tab', 'menuitem', 'checkbox', 'radio',
                    'switch', 'option', 'combobox', 'slider', 'textbox',
                ]);
                const HANDLERS = ['onclick', 'onmousedown', 'onmouseup', 'onkeydown', 'onkeyup'];
                const interactive = (node) => {{
                    const tag = node.tagName.toLowerCase();
                    if (tag === 'a') return node.hasAttribute('href');
                    if (tag === 'input') return node.type !== 'hidden';
                    if (TAGS.has(tag)) return true;
                    const role = node.getAttribute('role');
                    if (role && ROLES.has(role)) return true;
                    if (HANDLERS.some((h) => node.hasAttribute(h))) return true;
                    const labeled =
                        node.hasAttribute('aria-label') || node.hasAttribute('aria-labelledby');
                    return labeled && node.tabIndex >= 0;
                }};
                let node = hit;
                while (node && node !== document.body) {{
                    if (interactive(node)) {{
                        const attrs = {{}};
                        for (const name of [
                            'href', 'type', 'role', 'name', 'value',
                            'placeholder', 'title', 'aria-label',
                        ]) {{
                            const v = node.getAttribute(name);
                            if (v !== null) attrs[name] = v.slice(0, {max_len});
                        }}
                        const raw = (node.innerText || node.value || '').trim();
                        const cls = typeof node.className === 'string' ? node.className.trim() : '';
                        return {{
                            tag: node.tagName.toLowerCase(),
                            id: node.id || null,
                            class: cls || null,
                            text: raw ? raw.slice(0, {max_len}) : null,
                            attributes: attrs,
                        }};
                    }}
                    node = node.parentElement;
                }}
                return null;
            }})()"#
        );
        match tab.eval(&script).await {
            Ok(value) => match serde_json::from_value::<Option<ElementHit>>(value) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!("element_at_point returned unexpected shape: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("element_at_point evaluation failed: {}", e);
                None
            }
        }
    }

    async fn run_list_query<T: serde::de::DeserializeOwned>(
        &self,
        tab: &Tab,
        script: &str,
        op: &str,
    ) -> Vec<T> {
        match tab.eval(script).await {
            Ok(value) => match serde_json::from_value::<Vec<T>>(value) {
                Ok(list) => list,
                Err(e) => {
                    warn!("{} returned unexpected shape: {}", op, e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("{} evaluation failed: {}", op, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn element_summary_deserializes_from_page_shape() {
        let raw = serde_json::json!({
            "tag": "button",
            "id": "submit",
            "class": null,
            "text": "Send",
            "center": { "x": 120.0, "y": 340.0 },
        });
        let summary: ElementSummary = serde_json::from_value(raw).unwrap();
        assert_eq!(summary.tag, "button");
        assert_eq!(summary.id.as_deref(), Some("submit"));
        assert_eq!(summary.class, None);
        assert_eq!(summary.center, Point { x: 120.0, y: 340.0 });
    }

    #[test]
    fn interactive_element_carries_both_visibility_flags() {
        let raw = serde_json::json!({
            "tag": "input",
            "text": null,
            "kind": "input",
            "center": { "x": 50.0, "y": 60.0 },
            "rect": { "x": 10.0, "y": 40.0, "width": 80.0, "height": 40.0 },
            "in_viewport": false,
            "exposed": true,
            "attributes": { "type": "email", "placeholder": "you@example.com" },
        });
        let el: InteractiveElement = serde_json::from_value(raw).unwrap();
        assert_eq!(el.kind, ElementKind::Input);
        assert!(!el.in_viewport);
        assert!(el.exposed);
        assert_eq!(el.attributes.get("type").map(String::as_str), Some("email"));
    }

    #[test]
    fn missing_hit_deserializes_to_none() {
        let hit: Option<ElementHit> = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(hit.is_none());
    }
}
