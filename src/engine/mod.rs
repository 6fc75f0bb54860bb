//! Rendering-engine boundary.
//!
//! The capture pipeline never talks to a browser directly. It drives a [`PageSession`] obtained
//! from a [`RenderEngine`], and classifies every failure through [`EngineError`] so the
//! orchestrator can decide what to retry.

use std::time::Duration;

use async_trait::async_trait;

/// W3C WebDriver implementation of the engine boundary.
pub mod webdriver;

/// Result alias for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by a rendering engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out after {}ms waiting for {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("no element matches '{0}'")]
    NotFound(String),

    #[error("not supported by this engine: {0}")]
    Unsupported(String),

    #[error("page crashed: {0}")]
    Crashed(String),

    #[error("engine protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Build an [`EngineError::Timeout`].
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Whether a fresh attempt against a new page may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Navigation(_) | Self::Timeout { .. } | Self::Network(_) | Self::Crashed(_)
        )
    }

    /// Whether the page is gone and no further calls on it can succeed.
    pub fn is_fatal_to_page(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }
}

/// Page load milestone a navigation can wait for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// `DOMContentLoaded` fired.
    DomContentLoaded,
    /// `load` fired.
    Load,
    /// No in-flight requests for a quiet window.
    NetworkIdle,
}

/// Browser viewport for a page.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Viewport {
    /// CSS pixel width.
    pub width: u32,
    /// CSS pixel height.
    pub height: u32,
    /// Device pixels per CSS pixel.
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            device_scale_factor: 1.0,
        }
    }
}

/// Element bounding box in CSS pixels relative to the document.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A rendering engine able to open isolated pages.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Open a fresh page (own cookies/storage) sized to `viewport`.
    async fn open_page(&self, viewport: &Viewport) -> EngineResult<Box<dyn PageSession>>;
}

/// One live page.
///
/// Implementations should honor the `timeout` arguments, but callers also bound every call
/// externally, so an engine that ignores them only loses precision.
#[async_trait]
pub trait PageSession: Send {
    /// Navigate to `url` and wait for `wait` (normally DOM-content-loaded).
    async fn navigate(&mut self, url: &str, wait: WaitUntil, timeout: Duration)
    -> EngineResult<()>;

    /// Wait for a later load milestone after navigation.
    async fn wait_for_load_state(&mut self, state: WaitUntil, timeout: Duration)
    -> EngineResult<()>;

    /// Evaluate a JavaScript expression and return its JSON value.
    ///
    /// `script` is an expression (for example an arrow function call), not a statement list.
    async fn evaluate(&mut self, script: &str) -> EngineResult<serde_json::Value>;

    /// Wait until `selector` is attached and visible.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> EngineResult<()>;

    /// Whether the first element matching `selector` is visible.
    async fn is_visible(&mut self, selector: &str) -> EngineResult<bool>;

    /// Bounding box of the first element matching `selector`, if any.
    async fn bounding_box(&mut self, selector: &str) -> EngineResult<Option<BoundingBox>>;

    /// Click the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> EngineResult<()>;

    /// Capture the page as encoded PNG bytes.
    async fn screenshot(&mut self, full_page: bool) -> EngineResult<Vec<u8>>;

    /// Release the page.
    async fn close(&mut self) -> EngineResult<()>;
}

#[cfg(test)]
#[path = "../../tests/unit/engine/error.rs"]
mod tests;
