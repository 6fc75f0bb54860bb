#![forbid(unsafe_code)]

pub mod assemble;
pub mod capture;
pub mod config;
pub mod engine;
pub mod foundation;
pub mod order;
pub mod readiness;
pub mod transform;
pub mod upload;

pub use assemble::{
    AssemblyReport, Container, GifOptions, MediaFormat, MediaJob, VideoCodec, VideoOptions,
    assemble, recompress_gif,
};
pub use capture::{
    CaptureError, CaptureJob, CaptureOrchestrator, CaptureReport, CropSpec, DateTask, FailedDate,
    HostRateLimiter, HostThrottle, MAX_CONCURRENCY, RetryPolicy, TaskOutcome,
};
pub use config::Settings;
pub use engine::webdriver::{BrowserKind, WebDriverEngine, WebDriverOptions};
pub use engine::{
    BoundingBox, EngineError, EngineResult, PageSession, RenderEngine, Viewport, WaitUntil,
};
pub use foundation::dates::{DateFormat, Timezone, inclusive_date_range};
pub use foundation::error::{DatelapseError, DatelapseResult};
pub use order::{FrameRef, OrderStrategy, OrderedSequence, order, scan_dir};
pub use readiness::{
    DomainHandler, HandlerRegistry, OverlayHandler, ReadinessConfig, RenderReadinessResult,
    SelectorProbe, StageOutcome, await_ready,
};
pub use transform::{CropBox, FrameTransform, Watermark, WatermarkPosition, load_oriented};
pub use upload::{DirectoryUploader, UploadConnector};
