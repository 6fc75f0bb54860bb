//! Render-readiness sequencer.
//!
//! [`await_ready`] walks a freshly opened page through an ordered list of wait stages and reports
//! one [`StageOutcome`] per stage. Only the initial navigation (and a crashed page) is fatal;
//! every later stage degrades to `TimedOut`/`Failed` and the capture proceeds.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::capture::HostThrottle;
use crate::engine::{EngineError, EngineResult, PageSession, WaitUntil};

pub mod handlers;
pub mod probes;

pub use handlers::{DomainHandler, HandlerBudget, HandlerOutcome, HandlerRegistry, OverlayHandler};
pub use probes::{SelectorProbe, activate_first};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const IMAGES_LOADED_JS: &str = r#"(() => {
  const imgs = Array.from(document.images);
  return imgs.every(img => img.complete && img.naturalWidth > 0 && img.naturalHeight > 0);
})()"#;

const FONTS_LOADED_JS: &str = "(!document.fonts || document.fonts.status === 'loaded')";

/// Hides loading spinners and modal layers that cover at least a quarter of the viewport.
/// Navigation bars and map controls are never touched. Returns the number of hidden elements.
const HIDE_OBSTRUCTIONS_JS: &str = r#"(() => {
  const vw = window.innerWidth, vh = window.innerHeight;
  const keep = 'nav, header, [role="navigation"], .leaflet-control-container, .mapboxgl-control-container, .ol-control';
  const candidates = document.querySelectorAll(
    '[class*="loading"], [class*="spinner"], [class*="loader"], [aria-busy="true"], ' +
    '.modal, .popup, .overlay, [class*="cookie"], [role="dialog"]'
  );
  let hidden = 0;
  for (const el of candidates) {
    if (el.closest(keep) || el.querySelector(keep)) continue;
    const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') continue;
    const r = el.getBoundingClientRect();
    const w = Math.max(0, Math.min(r.right, vw) - Math.max(r.left, 0));
    const h = Math.max(0, Math.min(r.bottom, vh) - Math.max(r.top, 0));
    if (w * h >= 0.25 * vw * vh) {
      el.style.setProperty('display', 'none', 'important');
      hidden++;
    }
  }
  return hidden;
})()"#;

/// Per-attempt readiness configuration (the job's `render_wait` block).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Load milestones to wait for. DOM-content-loaded is always awaited by navigation.
    pub wait_until: Vec<WaitUntil>,
    pub ensure_images_loaded: bool,
    pub ensure_fonts_loaded: bool,
    /// Fixed stabilization sleep after every other stage.
    pub extra_wait_ms: u64,
    /// Overall budget the stage budgets are carved from.
    pub timeout_ms: u64,
    pub hide_obstructions: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            wait_until: vec![WaitUntil::DomContentLoaded, WaitUntil::NetworkIdle],
            ensure_images_loaded: true,
            ensure_fonts_loaded: true,
            extra_wait_ms: 300,
            timeout_ms: 30_000,
            hide_obstructions: true,
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What happened to one readiness stage.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    TimedOut,
    Failed(String),
    /// Stage not configured for this attempt.
    Skipped,
}

impl StageOutcome {
    /// `true` for passed or skipped stages.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

/// Per-stage record of one readiness run.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RenderReadinessResult {
    pub dom_ready: StageOutcome,
    pub load: StageOutcome,
    pub network_idle: StageOutcome,
    pub images_loaded: StageOutcome,
    pub fonts_loaded: StageOutcome,
    pub handler: Option<HandlerOutcome>,
    pub selector_ready: StageOutcome,
    pub obstructions: StageOutcome,
    pub obstructions_hidden: u64,
    pub stabilization: Duration,
    pub elapsed: Duration,
}

impl RenderReadinessResult {
    fn pending() -> Self {
        Self {
            dom_ready: StageOutcome::Skipped,
            load: StageOutcome::Skipped,
            network_idle: StageOutcome::Skipped,
            images_loaded: StageOutcome::Skipped,
            fonts_loaded: StageOutcome::Skipped,
            handler: None,
            selector_ready: StageOutcome::Skipped,
            obstructions: StageOutcome::Skipped,
            obstructions_hidden: 0,
            stabilization: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    /// Names of stages that did not pass.
    pub fn degraded_stages(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        let stages = [
            ("dom_ready", &self.dom_ready),
            ("load", &self.load),
            ("network_idle", &self.network_idle),
            ("images_loaded", &self.images_loaded),
            ("fonts_loaded", &self.fonts_loaded),
            ("selector_ready", &self.selector_ready),
            ("obstructions", &self.obstructions),
        ];
        for (name, outcome) in stages {
            if !outcome.is_ok() {
                out.push(name);
            }
        }
        if let Some(h) = &self.handler {
            if !h.overlay.is_ok() {
                out.push("overlay");
            }
        }
        out
    }
}

/// Overall deadline the stage budgets are carved from.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Budget {
    total: Duration,
    deadline: Instant,
}

impl Budget {
    pub(crate) fn start(total: Duration) -> Self {
        Self {
            total,
            deadline: Instant::now() + total,
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `numer/denom` of the total budget, capped by what is left.
    pub(crate) fn share(&self, numer: u32, denom: u32) -> Duration {
        (self.total * numer / denom).min(self.remaining())
    }
}

/// Drive `page` to a capturable state.
///
/// `selector`, when set, must become visible before capture (it is also the crop selector).
/// `handler` is the domain handler matched for the URL, if any. Returns an error only when the
/// page never reaches DOM-content-loaded within the overall budget, or when it crashes.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn await_ready(
    page: &mut dyn PageSession,
    url: &str,
    cfg: &ReadinessConfig,
    selector: Option<&str>,
    handler: Option<&dyn DomainHandler>,
    throttle: &HostThrottle,
) -> Result<RenderReadinessResult, EngineError> {
    let started = Instant::now();
    let budget = Budget::start(cfg.timeout());
    let mut result = RenderReadinessResult::pending();

    throttle.acquire().await;
    let nav_limit = budget.remaining();
    match tokio::time::timeout(
        nav_limit,
        page.navigate(url, WaitUntil::DomContentLoaded, nav_limit),
    )
    .await
    {
        Ok(Ok(())) => result.dom_ready = StageOutcome::Passed,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(EngineError::timeout("DOMContentLoaded", nav_limit)),
    }

    if cfg.wait_until.contains(&WaitUntil::Load) {
        let limit = budget.share(1, 3);
        result.load = stage("load", limit, page.wait_for_load_state(WaitUntil::Load, limit)).await?;
    }

    if cfg.wait_until.contains(&WaitUntil::NetworkIdle) {
        let limit = budget.share(1, 3);
        result.network_idle = stage(
            "network_idle",
            limit,
            page.wait_for_load_state(WaitUntil::NetworkIdle, limit),
        )
        .await?;
    }

    if cfg.ensure_images_loaded {
        let limit = budget.share(1, 3);
        result.images_loaded =
            stage("images_loaded", limit, poll_until_true(page, IMAGES_LOADED_JS)).await?;
    }

    if cfg.ensure_fonts_loaded {
        let limit = budget.share(1, 3);
        result.fonts_loaded =
            stage("fonts_loaded", limit, poll_until_true(page, FONTS_LOADED_JS)).await?;
    }

    if let Some(handler) = handler {
        let handler_budget = HandlerBudget {
            control: budget.share(1, 3),
            overlay: budget.share(2, 3),
        };
        let outcome = handler.run(page, handler_budget, throttle).await?;
        if !outcome.overlay.is_ok() {
            tracing::warn!(handler = %outcome.handler, overlay = ?outcome.overlay, "overlay did not become ready; capturing anyway");
        }
        result.handler = Some(outcome);
    }

    if let Some(selector) = selector {
        let limit = budget.share(1, 3);
        result.selector_ready = stage(
            "selector_ready",
            limit,
            page.wait_for_selector(selector, limit),
        )
        .await?;
    }

    if cfg.hide_obstructions {
        let limit = budget.share(1, 3);
        let hidden = tokio::time::timeout(limit, page.evaluate(HIDE_OBSTRUCTIONS_JS)).await;
        result.obstructions = match hidden {
            Ok(Ok(v)) => {
                result.obstructions_hidden = v.as_u64().unwrap_or(0);
                StageOutcome::Passed
            }
            Ok(Err(e)) => classify(e)?,
            Err(_) => StageOutcome::TimedOut,
        };
        if result.obstructions_hidden > 0 {
            tracing::debug!(hidden = result.obstructions_hidden, "hid obstructing overlays");
        }
    }

    if cfg.extra_wait_ms > 0 {
        let pause = Duration::from_millis(cfg.extra_wait_ms);
        tokio::time::sleep(pause).await;
        result.stabilization = pause;
    }

    result.elapsed = started.elapsed();
    let degraded = result.degraded_stages();
    if degraded.is_empty() {
        tracing::debug!(elapsed_ms = result.elapsed.as_millis() as u64, "page ready");
    } else {
        tracing::warn!(?degraded, elapsed_ms = result.elapsed.as_millis() as u64, "page ready with degraded stages");
    }
    Ok(result)
}

/// Run one non-critical stage under `limit`.
async fn stage<F>(name: &'static str, limit: Duration, fut: F) -> Result<StageOutcome, EngineError>
where
    F: Future<Output = EngineResult<()>>,
{
    let outcome = if limit.is_zero() {
        StageOutcome::TimedOut
    } else {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(())) => StageOutcome::Passed,
            Ok(Err(e)) => classify(e)?,
            Err(_) => StageOutcome::TimedOut,
        }
    };
    if !outcome.is_ok() {
        tracing::warn!(stage = name, outcome = ?outcome, "readiness stage degraded");
    }
    Ok(outcome)
}

/// Crashes stay fatal; everything else becomes a degraded outcome.
fn classify(e: EngineError) -> Result<StageOutcome, EngineError> {
    match e {
        e if e.is_fatal_to_page() => Err(e),
        EngineError::Timeout { .. } => Ok(StageOutcome::TimedOut),
        e => Ok(StageOutcome::Failed(e.to_string())),
    }
}

async fn poll_until_true(page: &mut dyn PageSession, script: &str) -> EngineResult<()> {
    loop {
        if page.evaluate(script).await? == serde_json::Value::Bool(true) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/readiness/budget.rs"]
mod tests;
