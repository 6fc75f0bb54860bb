#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datelapse::{
    BoundingBox, EngineError, EngineResult, PageSession, RenderEngine, Viewport, WaitUntil,
};
use serde_json::Value;
use tokio::time::Instant;

/// What the fake page does for a given date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Ok,
    /// Navigation fails with a retryable error.
    Transient,
    /// Screenshot bytes are not an image (non-retryable).
    BadFrame,
    /// Navigation never completes.
    Hang,
}

#[derive(Default)]
pub struct Stats {
    pub pages_opened: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub navigations: Mutex<Vec<(String, Instant)>>,
    pub clicks: Mutex<Vec<String>>,
}

impl Stats {
    pub fn navigation_count(&self) -> usize {
        self.navigations.lock().unwrap().len()
    }

    pub fn navigations_for(&self, date: &str) -> Vec<Instant> {
        self.navigations
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains(date))
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct Script {
    default: Behavior,
    per_date: HashMap<String, Behavior>,
    navigate_delay: Duration,
    visible: HashSet<String>,
    eval: HashMap<String, Value>,
    bounding_boxes: HashMap<String, BoundingBox>,
    frame: (u32, u32),
}

/// In-process engine whose pages follow a per-date script and record what they were asked to do.
#[derive(Clone)]
pub struct FakeEngine {
    script: Arc<Script>,
    pub stats: Arc<Stats>,
}

pub struct FakeEngineBuilder {
    script: Script,
}

impl FakeEngine {
    pub fn builder() -> FakeEngineBuilder {
        FakeEngineBuilder {
            script: Script {
                default: Behavior::Ok,
                per_date: HashMap::new(),
                navigate_delay: Duration::ZERO,
                visible: HashSet::new(),
                eval: HashMap::new(),
                bounding_boxes: HashMap::new(),
                frame: (16, 8),
            },
        }
    }

    /// Page that is not counted against any engine, for driving readiness directly.
    pub fn page(&self) -> FakePage {
        FakePage {
            script: self.script.clone(),
            stats: self.stats.clone(),
            behavior: self.script.default,
            open: false,
        }
    }
}

impl FakeEngineBuilder {
    pub fn default_behavior(mut self, b: Behavior) -> Self {
        self.script.default = b;
        self
    }

    /// `date` is matched against the navigated URL, e.g. `"2025-08-03"`.
    pub fn on(mut self, date: &str, b: Behavior) -> Self {
        self.script.per_date.insert(date.to_string(), b);
        self
    }

    pub fn navigate_delay(mut self, d: Duration) -> Self {
        self.script.navigate_delay = d;
        self
    }

    pub fn visible(mut self, selector: &str) -> Self {
        self.script.visible.insert(selector.to_string());
        self
    }

    pub fn eval(mut self, script: &str, value: Value) -> Self {
        self.script.eval.insert(script.to_string(), value);
        self
    }

    pub fn bounding_box(mut self, selector: &str, bbox: BoundingBox) -> Self {
        self.script.bounding_boxes.insert(selector.to_string(), bbox);
        self
    }

    pub fn frame_size(mut self, w: u32, h: u32) -> Self {
        self.script.frame = (w, h);
        self
    }

    pub fn build(self) -> FakeEngine {
        FakeEngine {
            script: Arc::new(self.script),
            stats: Arc::new(Stats::default()),
        }
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_page(&self, _viewport: &Viewport) -> EngineResult<Box<dyn PageSession>> {
        self.stats.pages_opened.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut page = self.page();
        page.open = true;
        Ok(Box::new(page))
    }
}

pub struct FakePage {
    script: Arc<Script>,
    stats: Arc<Stats>,
    behavior: Behavior,
    open: bool,
}

impl FakePage {
    fn release(&mut self) {
        if std::mem::take(&mut self.open) {
            self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PageSession for FakePage {
    async fn navigate(
        &mut self,
        url: &str,
        _wait: WaitUntil,
        _timeout: Duration,
    ) -> EngineResult<()> {
        self.stats
            .navigations
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        self.behavior = self
            .script
            .per_date
            .iter()
            .find(|(date, _)| url.contains(date.as_str()))
            .map(|(_, b)| *b)
            .unwrap_or(self.script.default);

        if !self.script.navigate_delay.is_zero() {
            tokio::time::sleep(self.script.navigate_delay).await;
        }
        match self.behavior {
            Behavior::Transient => Err(EngineError::Navigation("connection reset".to_string())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Ok | Behavior::BadFrame => Ok(()),
        }
    }

    async fn wait_for_load_state(
        &mut self,
        _state: WaitUntil,
        _timeout: Duration,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> EngineResult<Value> {
        Ok(self
            .script
            .eval
            .get(script)
            .cloned()
            .unwrap_or(Value::Bool(true)))
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> EngineResult<()> {
        if self.script.visible.contains(selector) {
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn is_visible(&mut self, selector: &str) -> EngineResult<bool> {
        Ok(self.script.visible.contains(selector))
    }

    async fn bounding_box(&mut self, selector: &str) -> EngineResult<Option<BoundingBox>> {
        Ok(self.script.bounding_boxes.get(selector).copied())
    }

    async fn click(&mut self, selector: &str) -> EngineResult<()> {
        self.stats.clicks.lock().unwrap().push(selector.to_string());
        Ok(())
    }

    async fn screenshot(&mut self, _full_page: bool) -> EngineResult<Vec<u8>> {
        if self.behavior == Behavior::BadFrame {
            return Ok(b"definitely not a png".to_vec());
        }
        let (w, h) = self.script.frame;
        Ok(png_bytes(w, h, [40, 120, 200, 255]))
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.release();
        Ok(())
    }
}

pub fn png_bytes(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub fn write_png(path: &std::path::Path, w: u32, h: u32, rgba: [u8; 4]) {
    std::fs::write(path, png_bytes(w, h, rgba)).unwrap();
}
