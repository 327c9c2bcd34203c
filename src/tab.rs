use crate::BrowserError;
use crate::Result;
use crate::config::EngineConfig;
use crate::config::WaitStrategy;
use chromiumoxide::cdp::browser_protocol::input::DispatchKeyEventParams;
use chromiumoxide::cdp::browser_protocol::input::DispatchKeyEventType;
use chromiumoxide::cdp::browser_protocol::input::DispatchMouseEventParams;
use chromiumoxide::cdp::browser_protocol::input::DispatchMouseEventType;
use chromiumoxide::cdp::browser_protocol::input::MouseButton;
use chromiumoxide::cdp::browser_protocol::page::CloseParams;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::page::Page as CdpPage;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tokio::time::Duration;
use tracing::debug;

static NEXT_TAB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-local tab identity, stable for the tab's lifetime. Used by the
/// registry to remove a tab from its session's stack wherever it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(u64);

impl TabId {
    fn next() -> Self {
        TabId(NEXT_TAB_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        TabId(raw)
    }
}

/// One browsable surface belonging to a session.
pub struct Tab {
    id: TabId,
    page: CdpPage,
    config: EngineConfig,
}

impl Tab {
    pub fn new(page: CdpPage, config: EngineConfig) -> Self {
        Self {
            id: TabId::next(),
            page,
            config,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn page(&self) -> &CdpPage {
        &self.page
    }

    pub fn target(&self) -> &TargetId {
        self.page.target_id()
    }

    /// Evaluate a script in the page, bounded by the configured eval timeout.
    /// Any failure surfaces as [`BrowserError::EvalError`].
    pub async fn eval(&self, script: &str) -> Result<serde_json::Value> {
        let bound = Duration::from_millis(self.config.timeouts.eval_ms);
        let result = tokio::time::timeout(bound, self.page.evaluate(script.to_string()))
            .await
            .map_err(|_| BrowserError::EvalError("evaluation timed out".to_string()))?
            .map_err(|e| BrowserError::EvalError(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    pub async fn goto(&self, url: &str, wait: Option<WaitStrategy>) -> Result<GotoResult> {
        debug!("navigating to {}", url);
        let wait_strategy = wait.unwrap_or_else(|| self.config.wait.clone());

        self.page.goto(url).await?;

        match wait_strategy {
            WaitStrategy::Event(event) => match event.as_str() {
                "domcontentloaded" | "load" => {
                    let bound = Duration::from_millis(self.config.timeouts.load_ms);
                    let _ = tokio::time::timeout(bound, self.page.wait_for_navigation()).await;
                }
                other => {
                    return Err(BrowserError::ConfigError(format!(
                        "unknown wait event: {other}"
                    )));
                }
            },
            WaitStrategy::Delay { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        let title = self.page.get_title().await.ok().flatten();
        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(GotoResult {
            url: final_url,
            title,
        })
    }

    /// Best-effort wait for the tab's content load; timing out is fine.
    pub async fn wait_for_load(&self, bound: Duration) {
        let _ = tokio::time::timeout(bound, self.page.wait_for_navigation()).await;
    }

    pub async fn current_url(&self) -> Result<String> {
        match self.page.url().await? {
            Some(url) => Ok(url),
            None => Err(BrowserError::PageNotLoaded),
        }
    }

    pub async fn title(&self) -> Option<String> {
        self.page.get_title().await.ok().flatten()
    }

    /// Dispatch a pointer click at the exact coordinate.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        debug!("clicking at ({}, {})", x, y);

        let move_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(BrowserError::CdpError)?;
        self.page.execute(move_params).await?;

        let down_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(BrowserError::CdpError)?;
        self.page.execute(down_params).await?;

        tokio::time::sleep(Duration::from_millis(40)).await;

        let up_params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(BrowserError::CdpError)?;
        self.page.execute(up_params).await?;

        Ok(())
    }

    /// Type text at whatever element currently holds focus. Newlines and
    /// tabs are routed through [`Tab::press_key`].
    pub async fn type_text(&self, text: &str) -> Result<()> {
        debug!("typing {} chars", text.chars().count());

        for ch in text.chars() {
            if ch == '\n' {
                self.press_key("Enter").await?;
            } else if ch == '\t' {
                self.press_key("Tab").await?;
            } else {
                let params = DispatchKeyEventParams::builder()
                    .r#type(DispatchKeyEventType::Char)
                    .text(ch.to_string())
                    .build()
                    .map_err(BrowserError::CdpError)?;
                self.page.execute(params).await?;
            }
        }

        Ok(())
    }

    /// Press a named key (e.g. "Enter", "Tab", "Delete", "ArrowDown").
    pub async fn press_key(&self, key: &str) -> Result<()> {
        debug!("pressing key: {}", key);

        let (code, text, virtual_key) = match key {
            "Enter" => ("Enter", Some("\r"), Some(13)),
            "Tab" => ("Tab", Some("\t"), Some(9)),
            "Escape" => ("Escape", None, Some(27)),
            "Backspace" => ("Backspace", None, Some(8)),
            "Delete" => ("Delete", None, Some(46)),
            "ArrowUp" => ("ArrowUp", None, Some(38)),
            "ArrowDown" => ("ArrowDown", None, Some(40)),
            "ArrowLeft" => ("ArrowLeft", None, Some(37)),
            "ArrowRight" => ("ArrowRight", None, Some(39)),
            "Home" => ("Home", None, Some(36)),
            "End" => ("End", None, Some(35)),
            "PageUp" => ("PageUp", None, Some(33)),
            "PageDown" => ("PageDown", None, Some(34)),
            _ => (key, None, None),
        };

        let mut down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .key(key.to_string())
            .code(code.to_string());
        if let Some(vk) = virtual_key {
            down = down.windows_virtual_key_code(vk).native_virtual_key_code(vk);
        }
        self.page
            .execute(down.build().map_err(BrowserError::CdpError)?)
            .await?;

        if let Some(text_str) = text {
            let char_params = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::Char)
                .key(key.to_string())
                .code(code.to_string())
                .text(text_str.to_string())
                .build()
                .map_err(BrowserError::CdpError)?;
            self.page.execute(char_params).await?;
        }

        let mut up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .key(key.to_string())
            .code(code.to_string());
        if let Some(vk) = virtual_key {
            up = up.windows_virtual_key_code(vk).native_virtual_key_code(vk);
        }
        self.page
            .execute(up.build().map_err(BrowserError::CdpError)?)
            .await?;

        Ok(())
    }

    /// Select-all (platform modifier) then Delete, at the focused element.
    pub async fn select_all_and_delete(&self) -> Result<()> {
        // CDP modifier bitmask: Alt=1, Ctrl=2, Meta=4, Shift=8.
        let modifier: i64 = if cfg!(target_os = "macos") { 4 } else { 2 };

        self.page
            .execute(select_all_params(DispatchKeyEventType::KeyDown, modifier)?)
            .await?;
        self.page
            .execute(select_all_params(DispatchKeyEventType::KeyUp, modifier)?)
            .await?;

        self.press_key("Delete").await
    }

    /// Scroll the page by a pixel delta.
    pub async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()> {
        debug!("scrolling by ({}, {})", dx, dy);
        let js = format!(
            "(function() {{ window.scrollBy({dx}, {dy}); return {{ x: window.scrollX, y: window.scrollY }}; }})()"
        );
        let _ = self.eval(&js).await?;
        Ok(())
    }

    /// Current CSS viewport height, falling back to the configured value.
    pub async fn viewport_height(&self) -> f64 {
        self.eval("(() => window.innerHeight)()")
            .await
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::from(self.config.viewport.height))
    }

    pub async fn go_back(&self) -> Result<()> {
        let _ = self.eval("history.back();").await?;
        Ok(())
    }

    pub async fn go_forward(&self) -> Result<()> {
        let _ = self.eval("history.forward();").await?;
        Ok(())
    }

    /// Close this tab via CDP. The registry's close hook removes it from the
    /// owning session's stack.
    pub async fn close(&self) -> Result<()> {
        self.page.execute(CloseParams::default()).await?;
        Ok(())
    }
}

/// Accelerator key event for select-all. The virtual key code must be set:
/// Chrome matches editing accelerators off it, not the key string, so
/// without it Ctrl/Cmd+A does not select.
fn select_all_params(kind: DispatchKeyEventType, modifier: i64) -> Result<DispatchKeyEventParams> {
    DispatchKeyEventParams::builder()
        .r#type(kind)
        .key("a".to_string())
        .code("KeyA".to_string())
        .modifiers(modifier)
        .windows_virtual_key_code(65)
        .native_virtual_key_code(65)
        .build()
        .map_err(BrowserError::CdpError)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GotoResult {
    pub url: String,
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn select_all_dispatch_carries_the_virtual_key_code() {
        let down = select_all_params(DispatchKeyEventType::KeyDown, 2).unwrap();
        assert_eq!(down.windows_virtual_key_code, Some(65));
        assert_eq!(down.native_virtual_key_code, Some(65));
        assert_eq!(down.modifiers, Some(2));
        assert_eq!(down.key.as_deref(), Some("a"));
        assert_eq!(down.code.as_deref(), Some("KeyA"));

        let up = select_all_params(DispatchKeyEventType::KeyUp, 4).unwrap();
        assert_eq!(up.modifiers, Some(4));
        assert_eq!(up.windows_virtual_key_code, Some(65));
    }
}
