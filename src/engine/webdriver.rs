use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Method;
use serde_json::{Value, json};
use url::Url;

use crate::engine::{
    BoundingBox, EngineError, EngineResult, PageSession, RenderEngine, Viewport, WaitUntil,
};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const MAX_FULL_PAGE_DIM: u64 = 16_384;

/// Browser the WebDriver endpoint drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
}

/// Options for [`WebDriverEngine`].
#[derive(Clone, Debug)]
pub struct WebDriverOptions {
    /// WebDriver server root, e.g. `http://localhost:9515` for chromedriver.
    pub endpoint: Url,
    pub browser: BrowserKind,
    pub headless: bool,
    /// HTTP timeout for a single WebDriver command.
    pub command_timeout: Duration,
    /// A page counts as network-idle once its resource count has not changed for this long.
    pub network_quiet: Duration,
    pub poll_interval: Duration,
}

impl WebDriverOptions {
    /// Defaults for a local chromedriver at `endpoint`.
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            browser: BrowserKind::Chrome,
            headless: true,
            command_timeout: Duration::from_secs(60),
            network_quiet: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// [`RenderEngine`] speaking the W3C WebDriver protocol (chromedriver, geckodriver, Selenium).
///
/// Each page is its own WebDriver session, so pages never share cookies or storage.
#[derive(Clone, Debug)]
pub struct WebDriverEngine {
    http: reqwest::Client,
    opts: WebDriverOptions,
}

impl WebDriverEngine {
    pub fn new(mut opts: WebDriverOptions) -> EngineResult<Self> {
        if !opts.endpoint.path().ends_with('/') {
            let path = format!("{}/", opts.endpoint.path());
            opts.endpoint.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(opts.command_timeout)
            .build()
            .map_err(|e| EngineError::Protocol(format!("failed to build http client: {e}")))?;
        Ok(Self { http, opts })
    }

    fn capabilities(&self, viewport: &Viewport) -> Value {
        let window = format!("--window-size={},{}", viewport.width, viewport.height);
        let scale = format!("--force-device-scale-factor={}", viewport.device_scale_factor);
        match self.opts.browser {
            BrowserKind::Chrome => {
                let mut args = vec![window, scale, "--hide-scrollbars".to_string()];
                if self.opts.headless {
                    args.push("--headless=new".to_string());
                }
                json!({
                    "capabilities": { "alwaysMatch": {
                        "browserName": "chrome",
                        "pageLoadStrategy": "eager",
                        "goog:chromeOptions": { "args": args },
                    }}
                })
            }
            BrowserKind::Firefox => {
                let mut args = Vec::new();
                if self.opts.headless {
                    args.push("-headless".to_string());
                }
                json!({
                    "capabilities": { "alwaysMatch": {
                        "browserName": "firefox",
                        "pageLoadStrategy": "eager",
                        "moz:firefoxOptions": {
                            "args": args,
                            "prefs": { "layout.css.devPixelsPerPx": viewport.device_scale_factor.to_string() },
                        },
                    }}
                })
            }
        }
    }
}

#[async_trait]
impl RenderEngine for WebDriverEngine {
    async fn open_page(&self, viewport: &Viewport) -> EngineResult<Box<dyn PageSession>> {
        let created = send(
            &self.http,
            Method::POST,
            join(&self.opts.endpoint, "session")?,
            Some(self.capabilities(viewport)),
        )
        .await?;
        let session_id = created
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Protocol("new session response has no sessionId".into()))?;
        let base = join(&self.opts.endpoint, &format!("session/{session_id}/"))?;
        tracing::debug!(session = session_id, "opened webdriver session");

        let mut page = WebDriverPage {
            http: self.http.clone(),
            base,
            viewport: *viewport,
            opts: self.opts.clone(),
            closed: false,
        };
        if let Err(e) = page
            .set_window(viewport.width as u64, viewport.height as u64)
            .await
        {
            if let Err(close_err) = page.close().await {
                tracing::warn!(session = session_id, error = %close_err, "failed to delete session");
            }
            return Err(e);
        }
        Ok(Box::new(page))
    }
}

struct WebDriverPage {
    http: reqwest::Client,
    base: Url,
    viewport: Viewport,
    opts: WebDriverOptions,
    closed: bool,
}

impl WebDriverPage {
    async fn cmd(&self, method: Method, path: &str, body: Option<Value>) -> EngineResult<Value> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            join(&self.base, path)?
        };
        send(&self.http, method, url, body).await
    }

    async fn find(&self, selector: &str) -> EngineResult<String> {
        let found = self
            .cmd(
                Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await
            .map_err(|e| match e {
                EngineError::NotFound(_) => EngineError::NotFound(selector.to_string()),
                other => other,
            })?;
        found
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::Protocol("element response has no element id".into()))
    }

    async fn set_window(&self, width: u64, height: u64) -> EngineResult<()> {
        self.cmd(
            Method::POST,
            "window/rect",
            Some(json!({ "width": width, "height": height })),
        )
        .await
        .map(|_| ())
    }

    async fn poll_script(&mut self, script: &str, what: &str, timeout: Duration) -> EngineResult<()> {
        let poll = self.opts.poll_interval;
        let result = tokio::time::timeout(timeout, async {
            loop {
                if self.evaluate(script).await? == Value::Bool(true) {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        result.unwrap_or_else(|_| Err(EngineError::timeout(what, timeout)))
    }

    async fn wait_network_idle(&mut self, timeout: Duration) -> EngineResult<()> {
        let quiet = self.opts.network_quiet;
        let poll = self.opts.poll_interval;
        let result = tokio::time::timeout(timeout, async {
            let mut last = None;
            let mut stable_since = tokio::time::Instant::now();
            loop {
                let count = self
                    .evaluate("performance.getEntriesByType('resource').length")
                    .await?
                    .as_u64();
                if count != last {
                    last = count;
                    stable_since = tokio::time::Instant::now();
                } else if stable_since.elapsed() >= quiet {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        result.unwrap_or_else(|_| Err(EngineError::timeout("network idle", timeout)))
    }
}

#[async_trait]
impl PageSession for WebDriverPage {
    async fn navigate(
        &mut self,
        url: &str,
        wait: WaitUntil,
        timeout: Duration,
    ) -> EngineResult<()> {
        self.cmd(
            Method::POST,
            "timeouts",
            Some(json!({ "pageLoad": timeout.as_millis() as u64 })),
        )
        .await?;
        self.cmd(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map_err(|e| match e {
                EngineError::Script(msg) | EngineError::Protocol(msg) => {
                    EngineError::Navigation(msg)
                }
                other => other,
            })?;
        match wait {
            WaitUntil::DomContentLoaded => Ok(()),
            other => self.wait_for_load_state(other, timeout).await,
        }
    }

    async fn wait_for_load_state(
        &mut self,
        state: WaitUntil,
        timeout: Duration,
    ) -> EngineResult<()> {
        match state {
            WaitUntil::DomContentLoaded => {
                self.poll_script(
                    "document.readyState !== 'loading'",
                    "DOMContentLoaded",
                    timeout,
                )
                .await
            }
            WaitUntil::Load => {
                self.poll_script("document.readyState === 'complete'", "load", timeout)
                    .await
            }
            WaitUntil::NetworkIdle => self.wait_network_idle(timeout).await,
        }
    }

    async fn evaluate(&mut self, script: &str) -> EngineResult<Value> {
        self.cmd(
            Method::POST,
            "execute/sync",
            Some(json!({ "script": format!("return ({script});"), "args": [] })),
        )
        .await
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> EngineResult<()> {
        let poll = self.opts.poll_interval;
        let result = tokio::time::timeout(timeout, async {
            loop {
                match self.is_visible(selector).await {
                    Ok(true) => return Ok(()),
                    Ok(false) | Err(EngineError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        result.unwrap_or_else(|_| Err(EngineError::timeout(format!("selector '{selector}'"), timeout)))
    }

    async fn is_visible(&mut self, selector: &str) -> EngineResult<bool> {
        let id = match self.find(selector).await {
            Ok(id) => id,
            Err(EngineError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let shown = self
            .cmd(Method::GET, &format!("element/{id}/displayed"), None)
            .await?;
        Ok(shown.as_bool().unwrap_or(false))
    }

    async fn bounding_box(&mut self, selector: &str) -> EngineResult<Option<BoundingBox>> {
        let id = match self.find(selector).await {
            Ok(id) => id,
            Err(EngineError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let rect = self
            .cmd(Method::GET, &format!("element/{id}/rect"), None)
            .await?;
        serde_json::from_value(rect)
            .map(Some)
            .map_err(|e| EngineError::Protocol(format!("malformed element rect: {e}")))
    }

    async fn click(&mut self, selector: &str) -> EngineResult<()> {
        let id = self.find(selector).await?;
        self.cmd(Method::POST, &format!("element/{id}/click"), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn screenshot(&mut self, full_page: bool) -> EngineResult<Vec<u8>> {
        if full_page {
            let dims = self
                .evaluate(
                    "[document.documentElement.scrollWidth, document.documentElement.scrollHeight]",
                )
                .await?;
            let w = dims.get(0).and_then(Value::as_u64).unwrap_or(0);
            let h = dims.get(1).and_then(Value::as_u64).unwrap_or(0);
            let w = w.clamp(self.viewport.width as u64, MAX_FULL_PAGE_DIM);
            let h = h.clamp(self.viewport.height as u64, MAX_FULL_PAGE_DIM);
            self.set_window(w, h).await?;
        }

        let shot = self.cmd(Method::GET, "screenshot", None).await;

        if full_page {
            self.set_window(self.viewport.width as u64, self.viewport.height as u64)
                .await?;
        }

        let encoded = shot?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| EngineError::Protocol("screenshot response is not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EngineError::Protocol(format!("screenshot is not valid base64: {e}")))
    }

    async fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cmd(Method::DELETE, "", None).await.map(|_| ())
    }
}

fn join(base: &Url, path: &str) -> EngineResult<Url> {
    base.join(path)
        .map_err(|e| EngineError::Protocol(format!("invalid webdriver url '{path}': {e}")))
}

async fn send(
    http: &reqwest::Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> EngineResult<Value> {
    let mut req = http.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await.map_err(map_http_error)?;
    let status = resp.status();
    let payload: Value = resp.json().await.map_err(map_http_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(code) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(map_w3c_error(code, message));
    }
    if !status.is_success() {
        return Err(EngineError::Protocol(format!(
            "webdriver returned http {status}"
        )));
    }
    Ok(value)
}

fn map_http_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::timeout("webdriver command", Duration::ZERO)
    } else if e.is_decode() {
        EngineError::Protocol(format!("malformed webdriver response: {e}"))
    } else {
        EngineError::Network(e.to_string())
    }
}

/// Map a W3C WebDriver error code to the engine taxonomy.
pub(crate) fn map_w3c_error(code: &str, message: &str) -> EngineError {
    let detail = if message.is_empty() {
        code.to_string()
    } else {
        format!("{code}: {message}")
    };
    match code {
        "no such element" | "stale element reference" => EngineError::NotFound(detail),
        "timeout" | "script timeout" => EngineError::timeout(detail, Duration::ZERO),
        "javascript error" => EngineError::Script(detail),
        "unknown command" | "unknown method" | "unsupported operation" => {
            EngineError::Unsupported(detail)
        }
        "invalid session id" | "no such window" => EngineError::Crashed(detail),
        "unknown error" if message.contains("crashed") => EngineError::Crashed(detail),
        "unknown error" if message.contains("net::ERR_") => EngineError::Navigation(detail),
        "insecure certificate" => EngineError::Navigation(detail),
        _ => EngineError::Protocol(detail),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/webdriver.rs"]
mod tests;
