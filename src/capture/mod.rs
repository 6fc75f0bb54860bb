//! Capture orchestration: one [`CaptureJob`] in, one frame per date out.

pub mod job;
pub mod limiter;
pub mod orchestrator;
pub mod retry;
pub mod url;

pub use job::{CaptureJob, CropSpec, DateTask, MAX_CONCURRENCY, TaskOutcome};
pub use limiter::{HostRateLimiter, HostThrottle};
pub use orchestrator::{CaptureError, CaptureOrchestrator, CaptureReport, FailedDate};
pub use retry::RetryPolicy;
