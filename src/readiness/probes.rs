use crate::capture::HostThrottle;
use crate::engine::{EngineError, EngineResult, PageSession};

/// One strategy for locating and activating an interactive control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectorProbe {
    /// Click the first visible element matching a CSS selector.
    Css(String),
    /// Script that finds and clicks the control itself, returning `true` when it did.
    Script { label: String, script: String },
}

impl SelectorProbe {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn script(label: impl Into<String>, script: impl Into<String>) -> Self {
        Self::Script {
            label: label.into(),
            script: script.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Css(sel) => sel,
            Self::Script { label, .. } => label,
        }
    }

    /// Returns `Ok(true)` when the control was activated.
    async fn try_activate(
        &self,
        page: &mut dyn PageSession,
        throttle: &HostThrottle,
    ) -> EngineResult<bool> {
        match self {
            Self::Css(selector) => {
                if !page.is_visible(selector).await? {
                    return Ok(false);
                }
                throttle.acquire().await;
                page.click(selector).await?;
                Ok(true)
            }
            Self::Script { script, .. } => {
                throttle.acquire().await;
                Ok(page.evaluate(script).await? == serde_json::Value::Bool(true))
            }
        }
    }
}

/// Try `probes` in order and stop at the first that activates its control.
///
/// Returns the label of the winning probe, or `None` when every probe missed. A probe that errors
/// counts as a miss (engines reject selector syntax they do not support); only a crashed page
/// aborts the search.
pub async fn activate_first(
    page: &mut dyn PageSession,
    probes: &[SelectorProbe],
    throttle: &HostThrottle,
) -> EngineResult<Option<String>> {
    for probe in probes {
        match probe.try_activate(page, throttle).await {
            Ok(true) => {
                tracing::debug!(probe = probe.label(), "control activated");
                return Ok(Some(probe.label().to_string()));
            }
            Ok(false) => {}
            Err(e) if e.is_fatal_to_page() => return Err(e),
            Err(EngineError::NotFound(_) | EngineError::Unsupported(_)) => {}
            Err(e) => tracing::debug!(probe = probe.label(), error = %e, "probe failed"),
        }
    }
    Ok(None)
}
