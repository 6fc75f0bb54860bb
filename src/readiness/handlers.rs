use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use url::Url;

use crate::capture::HostThrottle;
use crate::engine::{EngineResult, PageSession};
use crate::readiness::StageOutcome;
use crate::readiness::probes::{SelectorProbe, activate_first};

/// Time granted to a domain handler's two phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerBudget {
    /// Locating and activating the control.
    pub control: Duration,
    /// Waiting for the overlay content.
    pub overlay: Duration,
}

/// What a domain handler did on one page.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct HandlerOutcome {
    pub handler: String,
    /// Label of the probe that activated the control, if any.
    pub control: Option<String>,
    pub overlay: StageOutcome,
}

/// Site-specific interaction run between the generic load waits and capture.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, url: &Url) -> bool;

    /// Run the interaction. Must only fail when the page itself is gone.
    async fn run(
        &self,
        page: &mut dyn PageSession,
        budget: HandlerBudget,
        throttle: &HostThrottle,
    ) -> EngineResult<HandlerOutcome>;
}

/// Hexagon layer check for gpsjam.org's Leaflet map.
const GPSJAM_OVERLAY_JS: &str = r#"(() => {
  const pane = document.querySelector('.leaflet-overlay-pane');
  if (!pane) return { ready: false, count: 0, valid: 0 };
  const paths = pane.querySelectorAll('path');
  let valid = 0;
  for (const p of paths) {
    const d = p.getAttribute('d');
    const style = window.getComputedStyle(p);
    if (d && d.length > 10 && style.display !== 'none' && style.opacity !== '0') valid++;
  }
  const count = paths.length;
  return { ready: count > 0 && valid >= Math.min(5, count * 0.8), count, valid };
})()"#;

/// Clicks the first button-like element whose text is exactly "More".
const MORE_TEXT_JS: &str = r#"(() => {
  const els = document.querySelectorAll('button, a, [role="button"]');
  for (const el of els) {
    if ((el.innerText || '').trim().toLowerCase() === 'more' && el.offsetParent !== null) {
      el.click();
      return true;
    }
  }
  return false;
})()"#;

/// Last resort: any button whose text mentions loading more data.
const LOAD_KEYWORD_JS: &str = r#"(() => {
  const words = ['more', 'show', 'load', 'data', 'layer'];
  const els = document.querySelectorAll('button, a[role="button"], .btn');
  for (const el of els) {
    const text = (el.innerText || '').toLowerCase();
    if (text && words.some(w => text.includes(w)) && el.offsetParent !== null) {
      el.click();
      return true;
    }
  }
  return false;
})()"#;

/// Handler for pages that hide data behind a "load more" control and draw it into an overlay.
///
/// The control is activated through an ordered probe list. The overlay script must return
/// `{ ready: bool, valid: number }`; the overlay counts as ready when the script says so or when
/// the valid count has been non-zero and unchanged for `stable_for`.
#[derive(Clone, Debug)]
pub struct OverlayHandler {
    name: String,
    domains: Vec<String>,
    probes: Vec<SelectorProbe>,
    overlay_script: String,
    poll_interval: Duration,
    stable_for: Duration,
    settle_after_click: Duration,
}

impl OverlayHandler {
    pub fn new(
        name: impl Into<String>,
        domains: Vec<String>,
        probes: Vec<SelectorProbe>,
        overlay_script: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            domains: domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            probes,
            overlay_script: overlay_script.into(),
            poll_interval: Duration::from_millis(500),
            stable_for: Duration::from_secs(3),
            settle_after_click: Duration::from_millis(500),
        }
    }

    /// gpsjam.org: "More" sidebar control, hexagon paths in the Leaflet overlay pane.
    pub fn gpsjam() -> Self {
        let probes = vec![
            SelectorProbe::css("[data-testid*=\"more\"]"),
            SelectorProbe::css(".more-button"),
            SelectorProbe::css("#more-button"),
            SelectorProbe::css("button[class*=\"more\"]"),
            SelectorProbe::css("a[class*=\"more\"]"),
            SelectorProbe::script("text=More", MORE_TEXT_JS),
            SelectorProbe::script("keyword button", LOAD_KEYWORD_JS),
        ];
        Self::new("gpsjam", vec!["gpsjam.org".into()], probes, GPSJAM_OVERLAY_JS)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stable_for(mut self, stable_for: Duration) -> Self {
        self.stable_for = stable_for;
        self
    }

    pub fn with_settle_after_click(mut self, settle: Duration) -> Self {
        self.settle_after_click = settle;
        self
    }

    async fn wait_overlay(&self, page: &mut dyn PageSession) -> EngineResult<()> {
        let mut last_valid: Option<u64> = None;
        let mut stable_since = Instant::now();
        loop {
            let state = page.evaluate(&self.overlay_script).await?;
            if state.get("ready").and_then(|v| v.as_bool()) == Some(true) {
                return Ok(());
            }
            let valid = state.get("valid").and_then(|v| v.as_u64()).unwrap_or(0);
            if valid > 0 && last_valid == Some(valid) {
                if stable_since.elapsed() >= self.stable_for {
                    tracing::debug!(handler = %self.name, valid, "overlay count stabilized");
                    return Ok(());
                }
            } else {
                last_valid = Some(valid);
                stable_since = Instant::now();
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl DomainHandler for OverlayHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.domains
            .iter()
            .any(|d| host == *d || host.strip_suffix(d.as_str()).is_some_and(|p| p.ends_with('.')))
    }

    async fn run(
        &self,
        page: &mut dyn PageSession,
        budget: HandlerBudget,
        throttle: &HostThrottle,
    ) -> EngineResult<HandlerOutcome> {
        let control = match tokio::time::timeout(
            budget.control,
            activate_first(page, &self.probes, throttle),
        )
        .await
        {
            Ok(found) => found?,
            Err(_) => None,
        };
        match &control {
            Some(label) => {
                tracing::info!(handler = %self.name, probe = %label, "activated control");
                tokio::time::sleep(self.settle_after_click).await;
            }
            None => tracing::warn!(handler = %self.name, "control not found; waiting for overlay anyway"),
        }

        let overlay = if budget.overlay.is_zero() {
            StageOutcome::TimedOut
        } else {
            match tokio::time::timeout(budget.overlay, self.wait_overlay(page)).await {
                Ok(Ok(())) => StageOutcome::Passed,
                Ok(Err(e)) if e.is_fatal_to_page() => return Err(e),
                Ok(Err(e)) => StageOutcome::Failed(e.to_string()),
                Err(_) => StageOutcome::TimedOut,
            }
        };

        Ok(HandlerOutcome {
            handler: self.name.clone(),
            control,
            overlay,
        })
    }
}

/// Domain handlers consulted for each capture URL; first match wins.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn DomainHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register(mut self, handler: Arc<dyn DomainHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn find(&self, url: &Url) -> Option<Arc<dyn DomainHandler>> {
        self.handlers.iter().find(|h| h.matches(url)).cloned()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::empty().register(Arc::new(OverlayHandler::gpsjam()))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/readiness/handlers.rs"]
mod tests;
