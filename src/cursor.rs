use crate::Result;
use crate::config::EngineConfig;
use crate::tab::Tab;

const CURSOR_ID: &str = "__tp_cursor";

/// Maintains one synthetic pointer element per page so screenshots show
/// where synthetic input lands. Purely observational: it never dispatches
/// input itself, it only mirrors it.
pub struct CursorSimulator {
    config: EngineConfig,
}

impl CursorSimulator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Create the pointer element if the page does not have one yet. Safe to
    /// call repeatedly; navigation wipes it and the next call recreates it.
    async fn ensure(&self, tab: &Tab) -> Result<()> {
        let ms = self.config.cursor_transition_ms;
        let script = format!(
            r#"(() => {{
                const cur = window.{CURSOR_ID};
                if (cur && document.body.contains(cur.el)) return true;
                const el = document.createElement('div');
                el.id = '{CURSOR_ID}';
                el.style.cssText =
                    'position:fixed;width:14px;height:14px;border-radius:50%;' +
                    'background:rgba(255,64,64,0.85);border:2px solid #fff;' +
                    'pointer-events:none;z-index:2147483647;' +
                    'transform:translate(-50%,-50%);left:0px;top:0px;' +
                    'transition:left {ms}ms ease, top {ms}ms ease, transform 80ms ease;';
                document.body.appendChild(el);
                window.{CURSOR_ID} = {{ el, x: 0, y: 0 }};
                return true;
            }})()"#
        );
        tab.eval(&script).await?;
        Ok(())
    }

    /// Glide the pointer to the coordinate with a brief scale pulse, the
    /// visual stand-in for a click ripple.
    pub async fn move_to(&self, tab: &Tab, x: f64, y: f64) -> Result<()> {
        self.ensure(tab).await?;
        let script = format!(
            r#"(() => {{
                const cur = window.{CURSOR_ID};
                if (!cur) return false;
                cur.x = {x};
                cur.y = {y};
                cur.el.style.left = {x} + 'px';
                cur.el.style.top = {y} + 'px';
                cur.el.style.transform = 'translate(-50%,-50%) scale(1.4)';
                setTimeout(() => {{
                    cur.el.style.transform = 'translate(-50%,-50%)';
                }}, 120);
                return true;
            }})()"#
        );
        tab.eval(&script).await?;
        Ok(())
    }

    /// After a scroll of `dy` pixels the content under the pointer moved up
    /// by that much, so the pointer shifts up to keep tracking the same page
    /// location. No-op if the pointer was never created.
    pub async fn shift_vertical(&self, tab: &Tab, dy: f64) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const cur = window.{CURSOR_ID};
                if (!cur) return false;
                cur.y -= {dy};
                cur.el.style.top = cur.y + 'px';
                return true;
            }})()"#
        );
        tab.eval(&script).await?;
        Ok(())
    }
}
