use std::collections::VecDeque;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::assemble::{publish, temp_beside};
use crate::capture::job::{CaptureJob, DateTask, TaskOutcome};
use crate::capture::limiter::{HostRateLimiter, HostThrottle};
use crate::engine::{EngineError, PageSession, RenderEngine};
use crate::foundation::error::{DatelapseError, DatelapseResult};
use crate::readiness::{DomainHandler, HandlerRegistry, await_ready};
use crate::transform::{CropBox, FrameTransform, decode_oriented};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
const PAGE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why one capture attempt failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("frame processing failed: {0}")]
    Frame(String),

    #[error("failed to store frame: {0}")]
    Io(String),
}

impl CaptureError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Engine(e) => e.is_transient(),
            Self::Frame(_) | Self::Io(_) => false,
        }
    }
}

/// A date that exhausted its attempts or hit a non-retryable error.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FailedDate {
    pub date: NaiveDate,
    pub error: String,
    pub attempts: u32,
}

/// Per-date results of a capture run, each list in date order.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CaptureReport {
    pub saved: Vec<(NaiveDate, PathBuf)>,
    pub skipped: Vec<NaiveDate>,
    pub failed: Vec<FailedDate>,
    pub not_attempted: Vec<NaiveDate>,
    /// Strict mode stopped the queue after a failure.
    pub aborted: bool,
    /// The caller cancelled the run.
    pub cancelled: bool,
}

impl CaptureReport {
    pub fn total(&self) -> usize {
        self.saved.len() + self.skipped.len() + self.failed.len() + self.not_attempted.len()
    }

    /// `Err` when the run stopped before every date was attempted.
    pub fn ensure_finished(&self) -> DatelapseResult<()> {
        if self.cancelled {
            return Err(DatelapseError::Cancelled);
        }
        if self.aborted {
            return Err(DatelapseError::capture(format!(
                "strict mode aborted the run: {} failed, {} not attempted",
                self.failed.len(),
                self.not_attempted.len()
            )));
        }
        Ok(())
    }

    fn from_tasks(tasks: Vec<DateTask>, aborted: bool, cancelled: bool) -> Self {
        let mut report = Self {
            aborted,
            cancelled,
            ..Self::default()
        };
        for task in tasks {
            match task.outcome().clone() {
                TaskOutcome::Succeeded { path } => report.saved.push((task.date, path)),
                TaskOutcome::Skipped => report.skipped.push(task.date),
                TaskOutcome::Failed { error, attempts } => report.failed.push(FailedDate {
                    date: task.date,
                    error,
                    attempts,
                }),
                TaskOutcome::NotAttempted | TaskOutcome::Pending => {
                    report.not_attempted.push(task.date)
                }
            }
        }
        report
    }
}

/// Shared state of one run.
struct RunCtx<'a> {
    job: &'a CaptureJob,
    throttle: HostThrottle,
    handler: Option<Arc<dyn DomainHandler>>,
    /// Cancelled by the caller or by a strict-mode failure.
    abort: CancellationToken,
    queue: Mutex<VecDeque<usize>>,
    tasks: Mutex<Vec<DateTask>>,
}

enum AttemptEnd {
    Done(Result<PathBuf, CaptureError>),
    Abandoned,
}

/// Drives capture jobs against a rendering engine.
pub struct CaptureOrchestrator {
    engine: Arc<dyn RenderEngine>,
    handlers: HandlerRegistry,
    grace_period: Duration,
}

impl CaptureOrchestrator {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            handlers: HandlerRegistry::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// How long in-flight attempts may keep running after cancellation.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Capture one frame per date of `job`.
    ///
    /// Configuration problems fail before any page is opened. Per-date failures never fail the
    /// call; they are reported in [`CaptureReport::failed`]. Cancelling `cancel` stops the queue,
    /// lets in-flight attempts run for the grace period, and reports the rest as not attempted.
    #[tracing::instrument(skip_all, fields(slug = %job.slug))]
    pub async fn run(
        &self,
        job: &CaptureJob,
        cancel: CancellationToken,
    ) -> DatelapseResult<CaptureReport> {
        job.validate()?;
        let dates = job.dates()?;
        tokio::fs::create_dir_all(&job.out_dir)
            .await
            .with_context(|| format!("create frames directory '{}'", job.out_dir.display()))?;

        let limiter = HostRateLimiter::new(job.per_host_rate_limit_rps)?;
        let host = job
            .url
            .host_str()
            .ok_or_else(|| DatelapseError::config(format!("url '{}' has no host", job.url)))?;
        let handler = self.handlers.find(&job.url);
        if let Some(h) = &handler {
            tracing::debug!(handler = h.name(), "domain handler matched");
        }

        let mut tasks: Vec<DateTask> = dates
            .into_iter()
            .map(|d| DateTask::new(d, job.url_for(d), job.frame_path(d)))
            .collect();
        let mut queue = VecDeque::with_capacity(tasks.len());
        for (idx, task) in tasks.iter_mut().enumerate() {
            let exists = !job.overwrite
                && tokio::fs::try_exists(&task.path)
                    .await
                    .with_context(|| format!("check frame '{}'", task.path.display()))?;
            if exists {
                tracing::info!(date = %task.date, path = %task.path.display(), "frame exists, skipping");
                task.settle(TaskOutcome::Skipped);
            } else {
                queue.push_back(idx);
            }
        }

        let pool = job.pool_size().min(queue.len().max(1));
        tracing::info!(
            dates = tasks.len(),
            queued = queue.len(),
            pool,
            rps = limiter.requests_per_second(),
            "starting capture"
        );

        let ctx = RunCtx {
            job,
            throttle: limiter.throttle(host),
            handler,
            abort: cancel.child_token(),
            queue: Mutex::new(queue),
            tasks: Mutex::new(tasks),
        };
        futures::future::join_all((0..pool).map(|id| self.worker(id, &ctx))).await;

        let cancelled = cancel.is_cancelled();
        let aborted = ctx.abort.is_cancelled() && !cancelled;
        let mut tasks = ctx.tasks.into_inner();
        for task in &mut tasks {
            task.settle(TaskOutcome::NotAttempted);
        }
        let report = CaptureReport::from_tasks(tasks, aborted, cancelled);
        tracing::info!(
            saved = report.saved.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted.len(),
            aborted,
            cancelled,
            "capture finished"
        );
        Ok(report)
    }

    async fn worker(&self, id: usize, ctx: &RunCtx<'_>) {
        loop {
            if ctx.abort.is_cancelled() {
                break;
            }
            let Some(idx) = ctx.queue.lock().await.pop_front() else {
                break;
            };
            let (date, url, path) = {
                let tasks = ctx.tasks.lock().await;
                let t = &tasks[idx];
                (t.date, t.url.clone(), t.path.clone())
            };
            tracing::debug!(worker = id, date = %date, "picked task");

            let outcome = self.run_task(ctx, idx, date, &url, &path).await;
            let failed = matches!(outcome, TaskOutcome::Failed { .. });
            ctx.tasks.lock().await[idx].settle(outcome);
            if failed && ctx.job.strict {
                tracing::warn!(date = %date, "strict mode: aborting remaining dates");
                ctx.abort.cancel();
            }
        }
    }

    /// Attempt one date until it succeeds, fails for good, or the run is stopped.
    #[tracing::instrument(skip_all, fields(date = %date))]
    async fn run_task(
        &self,
        ctx: &RunCtx<'_>,
        idx: usize,
        date: NaiveDate,
        url: &Url,
        path: &Path,
    ) -> TaskOutcome {
        let policy = &ctx.job.retries;
        loop {
            let attempt = ctx.tasks.lock().await[idx].begin_attempt();
            let err = match self.attempt_with_grace(ctx, url, path).await {
                AttemptEnd::Abandoned => return TaskOutcome::NotAttempted,
                AttemptEnd::Done(Ok(saved)) => {
                    tracing::info!(attempt, path = %saved.display(), "saved frame");
                    return TaskOutcome::Succeeded { path: saved };
                }
                AttemptEnd::Done(Err(e)) => e,
            };

            if ctx.abort.is_cancelled() {
                return TaskOutcome::NotAttempted;
            }
            if !err.is_transient() || attempt >= policy.max_attempts {
                tracing::warn!(attempt, error = %err, url = %url, "capture failed");
                return TaskOutcome::Failed {
                    error: err.to_string(),
                    attempts: attempt,
                };
            }

            let delay = policy.delay_for(attempt - 1);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            tokio::select! {
                _ = ctx.abort.cancelled() => return TaskOutcome::NotAttempted,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt on a fresh page. The page is closed on every path, including abandonment.
    async fn attempt_with_grace(&self, ctx: &RunCtx<'_>, url: &Url, path: &Path) -> AttemptEnd {
        let mut page = match self.within_grace(ctx, self.engine.open_page(&ctx.job.viewport)).await {
            Some(Ok(page)) => page,
            Some(Err(e)) => return AttemptEnd::Done(Err(e.into())),
            None => {
                tracing::info!(url = %url, "page open abandoned after grace period");
                return AttemptEnd::Abandoned;
            }
        };

        let end = if ctx.abort.is_cancelled() {
            AttemptEnd::Abandoned
        } else {
            match self
                .within_grace(ctx, self.capture_on(page.as_mut(), ctx, url, path))
                .await
            {
                Some(res) => AttemptEnd::Done(res),
                None => {
                    tracing::info!(url = %url, "attempt abandoned after grace period");
                    AttemptEnd::Abandoned
                }
            }
        };

        match tokio::time::timeout(PAGE_CLOSE_TIMEOUT, page.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "failed to close page"),
            Err(_) => tracing::warn!(url = %url, "page close timed out"),
        }
        end
    }

    /// Drive `fut` to completion, or give up once the grace period after an abort has run out.
    async fn within_grace<F: Future>(&self, ctx: &RunCtx<'_>, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        tokio::select! {
            res = &mut fut => Some(res),
            _ = ctx.abort.cancelled() => tokio::time::timeout(self.grace_period, &mut fut).await.ok(),
        }
    }

    async fn capture_on(
        &self,
        page: &mut dyn PageSession,
        ctx: &RunCtx<'_>,
        url: &Url,
        path: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let job = ctx.job;
        let selector = job.crop_selector();
        await_ready(
            page,
            url.as_str(),
            &job.render_wait,
            selector,
            ctx.handler.as_deref(),
            &ctx.throttle,
        )
        .await?;

        let selector_box = match selector {
            Some(sel) => match page.bounding_box(sel).await {
                Ok(b) => b.map(|b| CropBox::from_bounding_box(&b, job.viewport.device_scale_factor)),
                Err(e) if e.is_fatal_to_page() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(selector = sel, error = %e, "crop selector lookup failed");
                    None
                }
            },
            None => None,
        };
        if selector.is_some() && selector_box.is_none() {
            tracing::warn!("crop selector not found; falling back to crop box");
        }

        let png = page.screenshot(job.full_page).await?;
        let transform = job.frame_transform(selector_box);
        let dest = path.to_path_buf();
        tokio::task::spawn_blocking(move || store_frame(&png, &transform, &dest))
            .await
            .map_err(|e| CaptureError::Frame(format!("frame task failed: {e}")))?
    }
}

/// Decode, transform, and atomically write one frame as PNG.
fn store_frame(
    bytes: &[u8],
    transform: &FrameTransform,
    dest: &Path,
) -> Result<PathBuf, CaptureError> {
    let img = decode_oriented(bytes).map_err(|e| CaptureError::Frame(e.to_string()))?;
    let img = transform
        .apply(img)
        .map_err(|e| CaptureError::Frame(e.to_string()))?;

    let tmp = temp_beside(dest).map_err(|e| CaptureError::Io(e.to_string()))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        img.write_to(&mut w, image::ImageFormat::Png)
            .map_err(|e| CaptureError::Io(format!("encode png: {e}")))?;
        w.flush()
            .map_err(|e| CaptureError::Io(format!("flush png: {e}")))?;
    }
    publish(tmp, dest).map_err(|e| CaptureError::Io(e.to_string()))?;
    Ok(dest.to_path_buf())
}

#[cfg(test)]
#[path = "../../tests/unit/capture/orchestrator.rs"]
mod tests;
