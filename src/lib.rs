//! Browser session and interaction engine over the Chrome DevTools Protocol.
//!
//! One shared Chrome process serves any number of logical sessions. Each
//! session owns an isolated browser context and a LIFO stack of tabs whose
//! top is the "active" tab that every session-scoped operation targets. On
//! top of that the crate provides element inspection under real-world
//! visibility constraints, numbered visual markers for screenshot-based
//! inference, a simulated on-page cursor, coordinate/selector interaction
//! primitives, and readiness-gated viewport screenshots.

pub mod config;
pub mod cursor;
pub mod engine;
pub mod inspector;
pub mod marker;
pub mod registry;
pub mod screenshot;
pub mod supervisor;
pub mod tab;

pub use config::EngineConfig;
pub use config::ImageFormat;
pub use config::ViewportConfig;
pub use config::WaitStrategy;
pub use cursor::CursorSimulator;
pub use engine::ActionOutcome;
pub use engine::ClickTarget;
pub use engine::Engine;
pub use inspector::ElementHit;
pub use inspector::ElementInspector;
pub use inspector::ElementKind;
pub use inspector::ElementSummary;
pub use inspector::InteractiveElement;
pub use inspector::Point;
pub use inspector::Rect;
pub use marker::ElementMark;
pub use marker::MarkOptions;
pub use marker::MarkResult;
pub use marker::VisualMarker;
pub use registry::SessionRegistry;
pub use screenshot::Screenshot;
pub use screenshot::ScreenshotService;
pub use supervisor::ProcessSupervisor;
pub use tab::GotoResult;
pub use tab::Tab;
pub use tab::TabId;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("browser not initialized")]
    NotInitialized,

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("unknown session: {0}")]
    SessionNotFound(String),

    #[error("session has only one tab; refusing to close it")]
    LastTab,

    #[error("page not loaded")]
    PageNotLoaded,

    #[error("CDP error: {0}")]
    CdpError(String),

    #[error("in-page evaluation failed: {0}")]
    EvalError(String),

    #[error("screenshot failed: {0}")]
    ScreenshotError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        BrowserError::CdpError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrowserError>;
