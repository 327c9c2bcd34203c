use crate::BrowserError;
use crate::Result;
use crate::config::EngineConfig;
use crate::cursor::CursorSimulator;
use crate::inspector::ElementHit;
use crate::inspector::ElementInspector;
use crate::inspector::ElementSummary;
use crate::inspector::InteractiveElement;
use crate::marker::MarkOptions;
use crate::marker::MarkResult;
use crate::marker::VisualMarker;
use crate::registry::SessionRegistry;
use crate::screenshot::ScreenshotService;
use crate::supervisor::ProcessSupervisor;
use crate::tab::GotoResult;
use crate::tab::Tab;
use rand::rngs::StdRng;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Result shape every interaction primitive resolves to. Failures are data,
/// not exceptions: nothing past the primitive boundary panics or throws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

fn outcome(result: Result<()>) -> ActionOutcome {
    match result {
        Ok(()) => ActionOutcome::ok(),
        Err(e) => ActionOutcome::fail(e.to_string()),
    }
}

/// A click lands either at an exact coordinate or on the element matching a
/// CSS selector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClickTarget {
    Coordinate { x: f64, y: f64 },
    Selector(String),
}

/// Session-scoped facade over the whole engine: lifecycle, tab registry,
/// inspection, marking, cursor, input, and screenshots. Callers are expected
/// to serialize operations within one session; operations across different
/// sessions may run concurrently.
pub struct Engine {
    config: EngineConfig,
    registry: SessionRegistry,
    inspector: ElementInspector,
    marker: VisualMarker,
    cursor: CursorSimulator,
    screenshots: ScreenshotService,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(config.clone()));
        Self {
            registry: SessionRegistry::new(supervisor, config.clone()),
            inspector: ElementInspector::new(config.clone()),
            marker: VisualMarker::new(config.clone()),
            cursor: CursorSimulator::new(config.clone()),
            screenshots: ScreenshotService::new(config.clone()),
            config,
        }
    }

    /// Fixed marker random source, for deterministic overlay colors.
    pub fn with_marker_rng(config: EngineConfig, rng: StdRng) -> Self {
        let mut engine = Self::new(config.clone());
        engine.marker = VisualMarker::with_rng(config, rng);
        engine
    }

    async fn active_tab(&self, session: &str) -> Result<Arc<Tab>> {
        self.registry.get_active_tab(session).await
    }

    /// Navigate the session's active tab, creating the session on first use.
    /// The URL is validated before any browser work happens.
    pub async fn navigate(&self, session: &str, url: &str) -> Result<GotoResult> {
        let parsed = url::Url::parse(url)
            .map_err(|e| BrowserError::ConfigError(format!("invalid url {url}: {e}")))?;
        let tab = self.active_tab(session).await?;
        tab.goto(parsed.as_str(), None).await
    }

    pub async fn current_url(&self, session: &str) -> Result<String> {
        self.active_tab(session).await?.current_url().await
    }

    /// Click at a coordinate or on a selector's element. A selector click
    /// first resolves the element's current center so the cursor lands on
    /// it, then triggers the element's own click; a coordinate click
    /// dispatches a raw pointer click at exactly that point.
    pub async fn click(&self, session: &str, target: ClickTarget) -> ActionOutcome {
        outcome(self.click_inner(session, target).await)
    }

    async fn click_inner(&self, session: &str, target: ClickTarget) -> Result<()> {
        let tab = self.active_tab(session).await?;
        match target {
            ClickTarget::Coordinate { x, y } => {
                if self.registry.cursor_visible(session).await {
                    self.cursor.move_to(&tab, x, y).await?;
                }
                tab.click_at(x, y).await
            }
            ClickTarget::Selector(selector) => {
                let selector_json = serde_json::to_string(&selector)
                    .map_err(|e| BrowserError::EvalError(e.to_string()))?;
                let script = format!(
                    r#"(() => {{
                        const el = document.querySelector({selector_json});
                        if (!el) return null;
                        const r = el.getBoundingClientRect();
                        return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }};
                    }})()"#
                );
                let center = tab.eval(&script).await?;
                if center.is_null() {
                    return Err(BrowserError::EvalError(format!(
                        "no element matches selector {selector}"
                    )));
                }
                let x = center.get("x").and_then(serde_json::Value::as_f64);
                let y = center.get("y").and_then(serde_json::Value::as_f64);
                if let (Some(x), Some(y)) = (x, y) {
                    if self.registry.cursor_visible(session).await {
                        self.cursor.move_to(&tab, x, y).await?;
                    }
                }
                let click = format!(
                    r#"(() => {{
                        const el = document.querySelector({selector_json});
                        if (!el) return false;
                        el.click();
                        return true;
                    }})()"#
                );
                tab.eval(&click).await?;
                Ok(())
            }
        }
    }

    /// Send keystrokes to whatever currently holds focus. Does not click
    /// first; positioning focus is the caller's job.
    pub async fn type_text(&self, session: &str, text: &str) -> ActionOutcome {
        outcome(async { self.active_tab(session).await?.type_text(text).await }.await)
    }

    /// Press a named key ("Enter", "Tab", "ArrowDown", ...) at the focused
    /// element.
    pub async fn press_key(&self, session: &str, key: &str) -> ActionOutcome {
        outcome(async { self.active_tab(session).await?.press_key(key).await }.await)
    }

    pub async fn go_back(&self, session: &str) -> ActionOutcome {
        outcome(async { self.active_tab(session).await?.go_back().await }.await)
    }

    pub async fn go_forward(&self, session: &str) -> ActionOutcome {
        outcome(async { self.active_tab(session).await?.go_forward().await }.await)
    }

    /// Select-all then delete at the focused element.
    pub async fn clear(&self, session: &str) -> ActionOutcome {
        outcome(
            async {
                self.active_tab(session)
                    .await?
                    .select_all_and_delete()
                    .await
            }
            .await,
        )
    }

    /// Scroll by a pixel delta; the cursor marker shifts inversely on the
    /// vertical axis so it keeps tracking the same page location.
    pub async fn scroll_by(&self, session: &str, dx: f64, dy: f64) -> ActionOutcome {
        outcome(self.scroll_inner(session, dx, dy).await)
    }

    /// Scroll forward by exactly one viewport height.
    pub async fn scroll_to_next_chunk(&self, session: &str) -> ActionOutcome {
        outcome(self.scroll_chunk(session, 1.0).await)
    }

    /// Scroll backward by exactly one viewport height.
    pub async fn scroll_to_prev_chunk(&self, session: &str) -> ActionOutcome {
        outcome(self.scroll_chunk(session, -1.0).await)
    }

    async fn scroll_chunk(&self, session: &str, direction: f64) -> Result<()> {
        let tab = self.active_tab(session).await?;
        let chunk = tab.viewport_height().await;
        drop(tab);
        self.scroll_inner(session, 0.0, chunk * direction).await
    }

    async fn scroll_inner(&self, session: &str, dx: f64, dy: f64) -> Result<()> {
        let tab = self.active_tab(session).await?;
        tab.scroll_by(dx, dy).await?;
        if self.registry.cursor_visible(session).await {
            self.cursor.shift_vertical(&tab, dy).await?;
        }
        Ok(())
    }

    /// Close the active tab. Fails explicitly when it is the session's only
    /// tab; a session always retains at least one.
    pub async fn close_current_tab(&self, session: &str) -> ActionOutcome {
        outcome(self.registry.close_active_tab(session).await)
    }

    pub async fn tab_count(&self, session: &str) -> usize {
        self.registry.tab_count(session).await
    }

    /// While hidden, cursor position updates are skipped entirely.
    pub async fn set_cursor_visibility(&self, session: &str, visible: bool) {
        self.registry.set_cursor_visible(session, visible).await;
    }

    pub async fn enumerate_elements(
        &self,
        session: &str,
        max_text_length: Option<usize>,
    ) -> Vec<ElementSummary> {
        match self.active_tab(session).await {
            Ok(tab) => {
                self.inspector
                    .enumerate_elements(&tab, max_text_length)
                    .await
            }
            Err(e) => {
                warn!(session = %session, "enumerate_elements unavailable: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn enumerate_clickable_and_input(&self, session: &str) -> Vec<InteractiveElement> {
        match self.active_tab(session).await {
            Ok(tab) => self.inspector.enumerate_clickable_and_input(&tab).await,
            Err(e) => {
                warn!(session = %session, "enumerate_clickable_and_input unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Hit-test a coordinate and describe the nearest interactive ancestor.
    pub async fn element_at_point(&self, session: &str, x: f64, y: f64) -> Result<ElementHit> {
        let tab = self.active_tab(session).await?;
        self.inspector
            .element_at_point(&tab, x, y)
            .await
            .ok_or_else(|| {
                BrowserError::EvalError(format!("no interactive element at ({x}, {y})"))
            })
    }

    pub async fn mark_visible_elements(&self, session: &str, options: &MarkOptions) -> MarkResult {
        match self.active_tab(session).await {
            Ok(tab) => self.marker.mark_visible_elements(&tab, options).await,
            Err(e) => {
                warn!(session = %session, "mark_visible_elements unavailable: {}", e);
                MarkResult {
                    count: 0,
                    marks: Vec::new(),
                }
            }
        }
    }

    pub async fn remove_element_markers(&self, session: &str) {
        if let Ok(tab) = self.active_tab(session).await {
            self.marker.remove_element_markers(&tab).await;
        }
    }

    /// Capture the visible viewport as base64, or None when no frame is
    /// available. `min_wait_ms` defaults to 1000.
    pub async fn capture(&self, session: &str, min_wait_ms: Option<u64>) -> Option<String> {
        let tab = match self.active_tab(session).await {
            Ok(tab) => tab,
            Err(e) => {
                warn!(session = %session, "capture unavailable: {}", e);
                return None;
            }
        };
        let min_wait = Duration::from_millis(min_wait_ms.unwrap_or(1000));
        self.screenshots
            .capture(&tab, min_wait)
            .await
            .map(|shot| shot.to_base64())
    }

    /// Close every tab in the session, dispose its context, and forget it.
    pub async fn close_session(&self, session: &str) -> ActionOutcome {
        outcome(self.registry.close_session(session).await)
    }

    /// Tear down the shared browser process, invalidating every session.
    pub async fn shutdown_all(&self) -> Result<()> {
        self.registry.shutdown_all().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn outcome_serializes_without_error_field_on_success() {
        let ok = serde_json::to_value(ActionOutcome::ok()).unwrap();
        assert_eq!(ok, serde_json::json!({ "success": true }));

        let fail = serde_json::to_value(ActionOutcome::fail("tab closed")).unwrap();
        assert_eq!(
            fail,
            serde_json::json!({ "success": false, "error": "tab closed" })
        );
    }

    #[test]
    fn click_target_accepts_both_shapes() {
        let coord: ClickTarget = serde_json::from_value(serde_json::json!({
            "x": 100.0,
            "y": 200.0,
        }))
        .unwrap();
        assert_eq!(coord, ClickTarget::Coordinate { x: 100.0, y: 200.0 });

        let selector: ClickTarget =
            serde_json::from_value(serde_json::json!("#submit")).unwrap();
        assert_eq!(selector, ClickTarget::Selector("#submit".to_string()));
    }
}
