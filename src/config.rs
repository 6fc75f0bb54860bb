//! Runtime settings and the persisted output layout.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::assemble::Container;
use crate::engine::webdriver::BrowserKind;
use crate::foundation::error::{DatelapseError, DatelapseResult};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// Process-wide settings. The binary fills these from flags, `DATELAPSE_*` variables and `.env`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub page_timeout_ms: u64,
    pub concurrency: usize,
    pub per_host_rate_limit_rps: u32,
    pub headless: bool,
    pub browser: BrowserKind,
    pub webdriver_url: String,
    /// Frames of job `<slug>` live in `<frames_root>/<slug>/`.
    pub frames_root: PathBuf,
    pub gif_root: PathBuf,
    pub video_root: PathBuf,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            page_timeout_ms: 30_000,
            concurrency: 2,
            per_host_rate_limit_rps: 4,
            headless: true,
            browser: BrowserKind::Chrome,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            frames_root: PathBuf::from("converter/images"),
            gif_root: PathBuf::from("results/gifs"),
            video_root: PathBuf::from("results/videos"),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> DatelapseResult<()> {
        if self.page_timeout_ms == 0 {
            return Err(DatelapseError::config("page_timeout_ms must be > 0"));
        }
        if self.concurrency == 0 {
            return Err(DatelapseError::config("concurrency must be at least 1"));
        }
        if self.per_host_rate_limit_rps == 0 {
            return Err(DatelapseError::config(
                "per_host_rate_limit_rps must be at least 1",
            ));
        }
        self.webdriver_endpoint().map(|_| ())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn webdriver_endpoint(&self) -> DatelapseResult<Url> {
        Url::parse(&self.webdriver_url).map_err(|e| {
            DatelapseError::config(format!("invalid webdriver url '{}': {e}", self.webdriver_url))
        })
    }

    pub fn frames_dir(&self, slug: &str) -> PathBuf {
        self.frames_root.join(slug)
    }

    pub fn gif_path(&self, name: &str) -> PathBuf {
        self.gif_root.join(format!("{name}.gif"))
    }

    pub fn video_path(&self, name: &str, container: Container) -> PathBuf {
        self.video_root
            .join(format!("{name}.{}", container.extension()))
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
