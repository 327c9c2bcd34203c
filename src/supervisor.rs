use crate::BrowserError;
use crate::Result;
use crate::config::EngineConfig;
use chromiumoxide::Browser;
use chromiumoxide::BrowserConfig as CdpConfig;
use chromiumoxide::browser::HeadlessMode;
use futures::StreamExt;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Owns the single shared Chrome process.
///
/// Explicitly constructed and passed by reference so tests (and embedders)
/// can run isolated instances; there is no process-wide singleton. `ensure`
/// launches at most once no matter how many sessions race it; `shutdown` is
/// the only teardown path.
pub struct ProcessSupervisor {
    config: EngineConfig,
    browser: Arc<Mutex<Option<Browser>>>,
    event_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    profile_dir: Mutex<Option<TempDir>>,
}

impl ProcessSupervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            browser: Arc::new(Mutex::new(None)),
            event_task: Mutex::new(None),
            profile_dir: Mutex::new(None),
        }
    }

    /// Launch the shared browser process if it is not already running.
    ///
    /// The browser mutex is held across the launch, so concurrent callers
    /// serialize here and all but the first observe the running process.
    pub async fn ensure(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        info!("launching shared browser process");
        let profile = tempfile::Builder::new()
            .prefix("tabpilot-profile-")
            .tempdir()?;

        let mut builder = CdpConfig::builder().user_data_dir(profile.path());
        if self.config.headless {
            builder = builder.headless_mode(HeadlessMode::New);
        }
        builder = builder
            .window_size(self.config.viewport.width, self.config.viewport.height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-hang-monitor")
            .arg("--disable-background-timer-throttling")
            .request_timeout(Duration::from_secs(60));

        let cdp_config = builder.build().map_err(BrowserError::LaunchFailed)?;
        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Drain the CDP event stream for the lifetime of the process.
        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("browser event: {:?}", event);
            }
        });

        *self.event_task.lock().await = Some(task);
        *self.profile_dir.lock().await = Some(profile);
        *guard = Some(browser);
        info!("browser process ready");
        Ok(())
    }

    /// Whether the shared process is currently running.
    pub async fn is_running(&self) -> bool {
        self.browser.lock().await.is_some()
    }

    /// Shared handle to the browser slot. Callers lock it, check for `Some`,
    /// and treat `None` as [`BrowserError::NotInitialized`].
    pub(crate) fn shared(&self) -> Arc<Mutex<Option<Browser>>> {
        Arc::clone(&self.browser)
    }

    /// Close the browser process and discard its temporary profile.
    /// Idempotent; every session and tab is invalid afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(task) = self.event_task.lock().await.take() {
            task.abort();
        }

        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            info!("closing shared browser process");
            if let Err(e) = browser.close().await {
                warn!("browser close reported an error: {}", e);
            }
        }
        drop(guard);

        // TempDir removal happens on drop.
        *self.profile_dir.lock().await = None;
        Ok(())
    }
}
