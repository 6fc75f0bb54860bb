use std::path::PathBuf;

use chrono::NaiveDate;
use url::Url;

use crate::capture::retry::RetryPolicy;
use crate::capture::url::ensure_date_param;
use crate::engine::Viewport;
use crate::foundation::dates::{DateFormat, Timezone, inclusive_date_range};
use crate::foundation::error::{DatelapseError, DatelapseResult};
use crate::readiness::ReadinessConfig;
use crate::transform::{CropBox, FrameTransform, Watermark};

/// Hard ceiling on concurrent capture attempts, whatever a job requests.
pub const MAX_CONCURRENCY: usize = 5;

fn default_date_param() -> String {
    "date".to_string()
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    2
}

fn default_rps() -> u32 {
    4
}

/// Crop applied to every captured frame.
///
/// When both are set the selector's bounding box wins; the box is the fallback when the selector
/// matches nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CropSpec {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default, rename = "box")]
    pub region: Option<CropBox>,
}

/// One request to screenshot a URL across a date range. Immutable once built.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CaptureJob {
    pub url: Url,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub timezone: Timezone,
    #[serde(default = "default_date_param")]
    pub date_param_name: String,
    #[serde(default)]
    pub date_format: DateFormat,
    pub slug: String,
    /// Frames directory; when empty the caller fills it from the configured frames root.
    #[serde(default)]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default = "default_true")]
    pub full_page: bool,
    #[serde(default)]
    pub render_wait: ReadinessConfig,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_rps")]
    pub per_host_rate_limit_rps: u32,
    #[serde(default)]
    pub retries: RetryPolicy,
    #[serde(default)]
    pub crop: Option<CropSpec>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
    #[serde(default)]
    pub overwrite: bool,
    /// Abort the remaining queue on the first failed date.
    #[serde(default)]
    pub strict: bool,
}

impl CaptureJob {
    /// Minimal job with request-model defaults for everything else.
    pub fn new(
        url: Url,
        start_date: NaiveDate,
        end_date: NaiveDate,
        slug: impl Into<String>,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url,
            start_date,
            end_date,
            timezone: Timezone::default(),
            date_param_name: default_date_param(),
            date_format: DateFormat::default(),
            slug: slug.into(),
            out_dir: out_dir.into(),
            viewport: Viewport::default(),
            full_page: true,
            render_wait: ReadinessConfig::default(),
            concurrency: default_concurrency(),
            per_host_rate_limit_rps: default_rps(),
            retries: RetryPolicy::default(),
            crop: None,
            watermark: None,
            overwrite: false,
            strict: false,
        }
    }

    /// Reject configurations that cannot run, before any task is scheduled.
    pub fn validate(&self) -> DatelapseResult<()> {
        if self.end_date < self.start_date {
            return Err(DatelapseError::config(format!(
                "end_date {} is before start_date {}",
                self.end_date, self.start_date
            )));
        }
        if self.concurrency == 0 {
            return Err(DatelapseError::config("concurrency must be at least 1"));
        }
        if self.per_host_rate_limit_rps == 0 {
            return Err(DatelapseError::config(
                "per_host_rate_limit_rps must be at least 1",
            ));
        }
        if self.url.host_str().is_none() {
            return Err(DatelapseError::config(format!(
                "url '{}' has no host",
                self.url
            )));
        }
        if self.date_param_name.trim().is_empty() {
            return Err(DatelapseError::config("date_param_name must not be empty"));
        }
        if self.slug.trim().is_empty() || self.slug.contains(['/', '\\']) {
            return Err(DatelapseError::config(format!(
                "slug '{}' must be a non-empty single path segment",
                self.slug
            )));
        }
        if self.out_dir.as_os_str().is_empty() {
            return Err(DatelapseError::config("out_dir must be set"));
        }
        let scale = self.viewport.device_scale_factor;
        if self.viewport.width == 0 || self.viewport.height == 0 || !scale.is_finite() || scale <= 0.0
        {
            return Err(DatelapseError::config("viewport must have a positive size and scale"));
        }
        if let Some(CropSpec {
            selector: None,
            region: Some(b),
        }) = &self.crop
        {
            if b.width == 0 || b.height == 0 {
                return Err(DatelapseError::config("crop box must have a non-zero area"));
            }
        }
        if let Some(w) = &self.watermark {
            w.validate()?;
        }
        self.retries.validate()
    }

    /// Every date of the inclusive range.
    pub fn dates(&self) -> DatelapseResult<Vec<NaiveDate>> {
        inclusive_date_range(self.start_date, self.end_date)
    }

    /// Capture URL for `date`.
    pub fn url_for(&self, date: NaiveDate) -> Url {
        ensure_date_param(
            &self.url,
            &self.date_param_name,
            date,
            &self.date_format,
            self.timezone,
        )
    }

    /// Stored frame location: `<out_dir>/<YYYY-MM-DD>.png`.
    pub fn frame_path(&self, date: NaiveDate) -> PathBuf {
        self.out_dir.join(format!("{}.png", date.format("%Y-%m-%d")))
    }

    /// Worker pool size: requested concurrency capped at [`MAX_CONCURRENCY`].
    pub fn pool_size(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Selector the page must show before capture, which is also the crop selector.
    pub fn crop_selector(&self) -> Option<&str> {
        self.crop.as_ref().and_then(|c| c.selector.as_deref())
    }

    /// Frame transform with the crop box resolved from `selector_box` when the selector matched.
    pub fn frame_transform(&self, selector_box: Option<CropBox>) -> FrameTransform {
        let crop = selector_box.or_else(|| self.crop.as_ref().and_then(|c| c.region));
        FrameTransform {
            crop,
            watermark: self
                .watermark
                .clone()
                .filter(|w| !w.text.trim().is_empty()),
        }
    }
}

/// Final state of one date.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Pending,
    Succeeded { path: PathBuf },
    /// Frame already existed and `overwrite` was off.
    Skipped,
    Failed { error: String, attempts: u32 },
    /// Abandoned by cancellation or a strict-mode abort.
    NotAttempted,
}

impl TaskOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Unit of work for one date of a [`CaptureJob`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct DateTask {
    pub date: NaiveDate,
    pub url: Url,
    pub path: PathBuf,
    attempts: u32,
    outcome: TaskOutcome,
}

impl DateTask {
    pub fn new(date: NaiveDate, url: Url, path: PathBuf) -> Self {
        Self {
            date,
            url,
            path,
            attempts: 0,
            outcome: TaskOutcome::Pending,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn outcome(&self) -> &TaskOutcome {
        &self.outcome
    }

    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Move to a terminal outcome. Returns `false`, leaving the task untouched, if it already
    /// settled.
    pub(crate) fn settle(&mut self, outcome: TaskOutcome) -> bool {
        if self.outcome.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.outcome = outcome;
        true
    }
}

#[cfg(test)]
#[path = "../../tests/unit/capture/job.rs"]
mod tests;
