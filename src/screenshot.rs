use crate::BrowserError;
use crate::Result;
use crate::config::EngineConfig;
use crate::config::ImageFormat;
use crate::tab::Tab;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotParams;
use std::time::Duration;
use std::time::Instant;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

/// How long the capture still has to sleep to honor the minimum settle time.
fn remaining_wait(elapsed: Duration, min_wait: Duration) -> Duration {
    min_wait.saturating_sub(elapsed)
}

/// A captured viewport frame, decoded from the wire encoding.
pub struct Screenshot {
    pub data: Vec<u8>,
    pub format: ImageFormat,
}

impl Screenshot {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// Captures the visible viewport after a readiness heuristic and a minimum
/// settle time. Readiness is advisory: every signal is individually bounded
/// and a timeout never blocks the capture.
pub struct ScreenshotService {
    config: EngineConfig,
}

impl ScreenshotService {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Wait for readiness, enforce the `min_wait` floor measured from the
    /// start of the call, then capture. Returns None when the frame cannot
    /// be produced (for example a tab that closed underneath us); callers
    /// must treat that as "no frame available", not as an empty image.
    pub async fn capture(&self, tab: &Tab, min_wait: Duration) -> Option<Screenshot> {
        let started = Instant::now();
        self.await_readiness(tab).await;

        let rest = remaining_wait(started.elapsed(), min_wait);
        if !rest.is_zero() {
            sleep(rest).await;
        }

        match self.capture_viewport(tab).await {
            Ok(shot) => Some(shot),
            Err(e) => {
                warn!("screenshot capture failed: {}", e);
                None
            }
        }
    }

    /// Three independent signals in parallel, each with its own bound: the
    /// load event, network quiescence, and document.readyState.
    async fn await_readiness(&self, tab: &Tab) {
        let ready_bound = Duration::from_millis(self.config.timeouts.ready_ms);
        let idle_bound = Duration::from_millis(self.config.timeouts.idle_ms);

        let load = async {
            let _ = timeout(ready_bound, tab.page().wait_for_navigation()).await;
        };
        let idle = async {
            let _ = timeout(idle_bound, wait_network_idle(tab)).await;
        };
        let ready = async {
            let _ = timeout(ready_bound, wait_ready_state(tab)).await;
        };
        futures::join!(load, idle, ready);
    }

    /// Viewport-only raster. Tries the compositor path first since it does
    /// not flash a visible window, then falls back to surface capture.
    async fn capture_viewport(&self, tab: &Tab) -> Result<Screenshot> {
        let format = match self.config.format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Webp => CaptureScreenshotFormat::Webp,
        };
        let builder = CaptureScreenshotParams::builder().format(format);

        let params = builder.clone().from_surface(false).build();
        let resp = match tab.page().execute(params).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("compositor capture failed: {}. retrying from surface", e);
                let retry = builder.from_surface(true).build();
                tab.page().execute(retry).await?
            }
        };

        let data_b64: &str = resp.data.as_ref();
        let data = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| BrowserError::ScreenshotError(format!("base64 decode failed: {e}")))?;
        Ok(Screenshot {
            data,
            format: self.config.format,
        })
    }
}

/// Resolves once no resource has landed for 500ms, watching the resource
/// timing stream from inside the page.
async fn wait_network_idle(tab: &Tab) {
    let script = r#"new Promise((resolve) => {
        let last = performance.now();
        const obs = new PerformanceObserver(() => { last = performance.now(); });
        try {
            obs.observe({ entryTypes: ['resource'] });
        } catch (e) {
            resolve(true);
            return;
        }
        const tick = () => {
            if (performance.now() - last >= 500) {
                obs.disconnect();
                resolve(true);
            } else {
                setTimeout(tick, 100);
            }
        };
        tick();
    })"#;
    let _ = tab.eval(script).await;
}

async fn wait_ready_state(tab: &Tab) {
    loop {
        if let Ok(value) = tab.eval("document.readyState").await {
            if value.as_str() == Some("complete") {
                return;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn floor_sleeps_the_remainder() {
        let rest = remaining_wait(Duration::from_millis(300), Duration::from_millis(1000));
        assert_eq!(rest, Duration::from_millis(700));
    }

    #[test]
    fn floor_is_zero_once_elapsed() {
        let rest = remaining_wait(Duration::from_millis(1500), Duration::from_millis(1000));
        assert_eq!(rest, Duration::ZERO);
        let exact = remaining_wait(Duration::from_millis(1000), Duration::from_millis(1000));
        assert_eq!(exact, Duration::ZERO);
    }

    #[test]
    fn base64_round_trip() {
        let shot = Screenshot {
            data: vec![0x89, 0x50, 0x4e, 0x47],
            format: ImageFormat::Png,
        };
        assert_eq!(shot.to_base64(), "iVBORw==");
    }
}
