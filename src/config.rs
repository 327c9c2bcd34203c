use serde::Deserialize;
use serde::Serialize;

/// Engine-wide configuration. Everything has a serde default so partial
/// config files deserialize cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_viewport")]
    pub viewport: ViewportConfig,

    #[serde(default = "default_wait")]
    pub wait: WaitStrategy,

    #[serde(default = "default_format")]
    pub format: ImageFormat,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub marker: MarkerConfig,

    /// Maximum element text captured by inspection queries before truncation.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Duration of the simulated cursor's positional transition.
    #[serde(default = "default_cursor_transition_ms")]
    pub cursor_transition_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            viewport: default_viewport(),
            wait: default_wait(),
            format: default_format(),
            timeouts: TimeoutsConfig::default(),
            marker: MarkerConfig::default(),
            max_text_length: default_max_text_length(),
            cursor_transition_ms: default_cursor_transition_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,

    #[serde(default = "default_device_scale_factor")]
    pub device_scale_factor: f64,

    #[serde(default)]
    pub mobile: bool,
}

/// Per-sub-operation timeouts. Readiness signals are advisory; these only
/// bound how long the engine is willing to wait for each of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_load_ms")]
    pub load_ms: u64,

    #[serde(default = "default_ready_ms")]
    pub ready_ms: u64,

    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,

    /// Best-effort wait for a hook-adopted tab's initial content load.
    #[serde(default = "default_new_tab_load_ms")]
    pub new_tab_load_ms: u64,

    #[serde(default = "default_eval_ms")]
    pub eval_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            load_ms: default_load_ms(),
            ready_ms: default_ready_ms(),
            idle_ms: default_idle_ms(),
            new_tab_load_ms: default_new_tab_load_ms(),
            eval_ms: default_eval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    #[serde(default = "default_max_marks")]
    pub max_marks: usize,

    /// Elements smaller than this (either axis, CSS px) are not marked.
    #[serde(default = "default_min_size_px")]
    pub min_size_px: f64,

    /// Clear the previous pass's overlays before drawing a new pass.
    #[serde(default = "default_remove_existing")]
    pub remove_existing: bool,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            max_marks: default_max_marks(),
            min_size_px: default_min_size_px(),
            remove_existing: default_remove_existing(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitStrategy {
    Event(String),
    Delay { delay_ms: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Webp,
}

fn default_headless() -> bool {
    true
}

fn default_viewport() -> ViewportConfig {
    ViewportConfig {
        width: 1024,
        height: 768,
        device_scale_factor: 1.0,
        mobile: false,
    }
}

fn default_wait() -> WaitStrategy {
    WaitStrategy::Event("load".to_string())
}

fn default_format() -> ImageFormat {
    ImageFormat::Png
}

fn default_device_scale_factor() -> f64 {
    1.0
}

fn default_load_ms() -> u64 {
    10_000
}

fn default_ready_ms() -> u64 {
    5_000
}

fn default_idle_ms() -> u64 {
    5_000
}

fn default_new_tab_load_ms() -> u64 {
    5_000
}

fn default_eval_ms() -> u64 {
    5_000
}

fn default_max_marks() -> usize {
    50
}

fn default_min_size_px() -> f64 {
    8.0
}

fn default_remove_existing() -> bool {
    true
}

fn default_max_text_length() -> usize {
    80
}

fn default_cursor_transition_ms() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sensible() {
        let config = EngineConfig::default();
        assert!(config.headless);
        assert_eq!(config.viewport.width, 1024);
        assert_eq!(config.viewport.height, 768);
        assert_eq!(config.marker.max_marks, 50);
        assert!(config.marker.remove_existing);
        assert_eq!(config.max_text_length, 80);
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "headless": false, "viewport": { "width": 1280, "height": 800 } }"#,
        )
        .unwrap();
        assert!(!config.headless);
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.device_scale_factor, 1.0);
        assert_eq!(config.timeouts.load_ms, 10_000);
    }

    #[test]
    fn wait_strategy_accepts_event_or_delay() {
        let event: WaitStrategy = serde_json::from_str(r#""domcontentloaded""#).unwrap();
        assert!(matches!(event, WaitStrategy::Event(e) if e == "domcontentloaded"));

        let delay: WaitStrategy = serde_json::from_str(r#"{ "delay_ms": 250 }"#).unwrap();
        assert!(matches!(delay, WaitStrategy::Delay { delay_ms: 250 }));
    }
}
