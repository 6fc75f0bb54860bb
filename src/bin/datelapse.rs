use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use datelapse::{
    AssemblyReport, BrowserKind, CaptureJob, CaptureOrchestrator, CaptureReport, Container,
    DirectoryUploader, GifOptions, MediaFormat, MediaJob, OrderStrategy, OrderedSequence,
    Settings, UploadConnector, VideoCodec, VideoOptions, WebDriverEngine, WebDriverOptions,
};

#[derive(Parser, Debug)]
#[command(name = "datelapse", version, about = "Date-range screenshots to GIF or video")]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "DATELAPSE_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture one screenshot per date of a job file.
    Capture(CaptureArgs),
    /// Assemble frames into a looping GIF.
    Gif(GifArgs),
    /// Assemble frames into a video (requires `ffmpeg`).
    Video(VideoArgs),
    /// Print the resolved frame order.
    Order(InputArgs),
    /// Capture a job, then assemble its frames.
    Timelapse(TimelapseArgs),
    /// Re-encode an existing GIF under a size ceiling.
    Compress(CompressArgs),
}

/// Overrides for [`Settings`]; unset flags keep the defaults.
#[derive(Args, Debug)]
struct SettingsArgs {
    #[arg(long, global = true, env = "DATELAPSE_WEBDRIVER_URL")]
    webdriver_url: Option<String>,

    #[arg(long, global = true, value_enum, env = "DATELAPSE_BROWSER")]
    browser: Option<BrowserChoice>,

    #[arg(long, global = true, env = "DATELAPSE_HEADLESS")]
    headless: Option<bool>,

    #[arg(long, global = true, env = "DATELAPSE_PAGE_TIMEOUT_MS")]
    page_timeout_ms: Option<u64>,

    #[arg(long, global = true, env = "DATELAPSE_CONCURRENCY")]
    concurrency: Option<usize>,

    #[arg(long, global = true, env = "DATELAPSE_RPS")]
    rps: Option<u32>,

    #[arg(long, global = true, env = "DATELAPSE_FRAMES_ROOT")]
    frames_root: Option<PathBuf>,

    #[arg(long, global = true, env = "DATELAPSE_GIF_ROOT")]
    gif_root: Option<PathBuf>,

    #[arg(long, global = true, env = "DATELAPSE_VIDEO_ROOT")]
    video_root: Option<PathBuf>,

    #[arg(long, global = true, env = "DATELAPSE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl SettingsArgs {
    fn resolve(&self) -> Settings {
        let mut s = Settings::default();
        if let Some(v) = &self.webdriver_url {
            s.webdriver_url = v.clone();
        }
        if let Some(v) = self.browser {
            s.browser = match v {
                BrowserChoice::Chrome => BrowserKind::Chrome,
                BrowserChoice::Firefox => BrowserKind::Firefox,
            };
        }
        if let Some(v) = self.headless {
            s.headless = v;
        }
        if let Some(v) = self.page_timeout_ms {
            s.page_timeout_ms = v;
        }
        if let Some(v) = self.concurrency {
            s.concurrency = v;
        }
        if let Some(v) = self.rps {
            s.per_host_rate_limit_rps = v;
        }
        if let Some(v) = &self.frames_root {
            s.frames_root = v.clone();
        }
        if let Some(v) = &self.gif_root {
            s.gif_root = v.clone();
        }
        if let Some(v) = &self.video_root {
            s.video_root = v.clone();
        }
        if let Some(v) = &self.log_level {
            s.log_level = v.clone();
        }
        s
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BrowserChoice {
    Chrome,
    Firefox,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Capture job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Re-capture dates whose frame already exists.
    #[arg(long)]
    overwrite: bool,

    /// Abort the remaining dates on the first failure.
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Directory of frames.
    #[arg(long, conflicts_with = "files")]
    dir: Option<PathBuf>,

    /// Frame files; taken verbatim with `--strategy explicit`.
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// auto, date, natural or explicit.
    #[arg(long, default_value = "auto")]
    strategy: OrderStrategy,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// Mirror the artifact into this directory.
    #[arg(long, env = "DATELAPSE_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    #[arg(long, requires = "upload_dir")]
    upload_folder: Option<String>,

    /// Make the uploaded artifact publicly readable.
    #[arg(long, requires = "upload_dir")]
    share: bool,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output file; defaults to `<root>/<name>.<ext>`.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Artifact name under the configured output root.
    #[arg(long, default_value = "timelapse")]
    name: String,

    #[arg(long, default_value_t = 1.0)]
    seconds_per_image: f64,
}

#[derive(Args, Debug)]
struct GifArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    gif: GifFlags,

    #[command(flatten)]
    upload: UploadArgs,
}

#[derive(Args, Debug)]
struct GifFlags {
    /// 0 loops forever.
    #[arg(long, default_value_t = 0)]
    loop_count: u16,

    /// Skip duplicate-frame merging and use the faster quantizer.
    #[arg(long)]
    no_optimize: bool,

    /// Shrink the palette until the file is at most this many bytes.
    #[arg(long)]
    max_bytes: Option<u64>,

    #[arg(long, default_value_t = 4)]
    min_palette_bits: u8,

    /// Downscale frames when the smallest palette still exceeds `--max-bytes`.
    #[arg(long, requires = "max_bytes")]
    allow_resize: bool,

    #[arg(long, default_value_t = 1920)]
    max_width: u32,

    #[arg(long, default_value_t = 1080)]
    max_height: u32,
}

impl GifFlags {
    fn options(&self) -> GifOptions {
        GifOptions {
            loop_count: self.loop_count,
            optimize: !self.no_optimize,
            max_bytes: self.max_bytes,
            min_palette_bits: self.min_palette_bits,
            allow_resize: self.allow_resize,
            max_width: self.max_width,
            max_height: self.max_height,
        }
    }
}

#[derive(Args, Debug)]
struct VideoFlags {
    /// mp4 or webm.
    #[arg(long, default_value = "mp4")]
    container: Container,

    /// libx264, libvpx-vp9 or libaom-av1.
    #[arg(long, default_value = "libx264")]
    codec: VideoCodec,

    #[arg(long, default_value_t = 18)]
    crf: u8,

    #[arg(long, default_value = "medium")]
    preset: String,

    #[arg(long, default_value = "yuv420p")]
    pix_fmt: String,

    #[arg(long, env = "DATELAPSE_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl VideoFlags {
    fn options(&self) -> VideoOptions {
        VideoOptions {
            container: self.container,
            codec: self.codec,
            crf: self.crf,
            preset: self.preset.clone(),
            pix_fmt: self.pix_fmt.clone(),
            ffmpeg_bin: self.ffmpeg.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct VideoArgs {
    #[command(flatten)]
    input: InputArgs,

    #[command(flatten)]
    output: OutputArgs,

    #[command(flatten)]
    video: VideoFlags,

    #[command(flatten)]
    upload: UploadArgs,
}

#[derive(Args, Debug)]
struct CompressArgs {
    /// GIF to re-encode.
    input: PathBuf,

    /// Output file; defaults to `<input stem>_compressed.gif` beside the input.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    gif: GifFlags,

    #[command(flatten)]
    upload: UploadArgs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ArtifactKind {
    Gif,
    Video,
}

#[derive(Args, Debug)]
struct TimelapseArgs {
    #[command(flatten)]
    capture: CaptureArgs,

    #[arg(long, value_enum, default_value_t = ArtifactKind::Gif)]
    format: ArtifactKind,

    /// Output file; defaults to `<root>/<slug>.<ext>`.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, default_value_t = 1.0)]
    seconds_per_image: f64,

    #[command(flatten)]
    gif: GifFlags,

    #[command(flatten)]
    video: VideoFlags,

    #[command(flatten)]
    upload: UploadArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let settings = cli.settings.resolve();
    init_logging(&settings.log_level, cli.json_logs);
    settings.validate()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.cmd {
        Command::Capture(args) => {
            let report = cmd_capture(&cli.settings, &settings, &args, cancel).await?;
            print_json(&report)?;
            report.ensure_finished()?;
        }
        Command::Gif(args) => {
            let seq = resolve_order(&args.input)?;
            let out = output_path(&args.output, || settings.gif_path(&args.output.name));
            let job = MediaJob::new(
                &seq,
                out,
                args.output.seconds_per_image,
                MediaFormat::Gif(args.gif.options()),
            );
            let report = run_assembly(job, cancel).await?;
            finish_artifact(&report, &args.upload).await?;
        }
        Command::Video(args) => {
            let opts = args.video.options();
            let seq = resolve_order(&args.input)?;
            let out = output_path(&args.output, || {
                settings.video_path(&args.output.name, opts.container)
            });
            let job = MediaJob::new(
                &seq,
                out,
                args.output.seconds_per_image,
                MediaFormat::Video(opts),
            );
            let report = run_assembly(job, cancel).await?;
            finish_artifact(&report, &args.upload).await?;
        }
        Command::Order(args) => {
            let seq = resolve_order(&args)?;
            for path in seq.paths() {
                println!("{}", path.display());
            }
            for path in &seq.excluded {
                eprintln!("excluded {}", path.display());
            }
        }
        Command::Timelapse(args) => {
            let job = read_job(&args.capture, &cli.settings, &settings)?;
            let report = capture(&settings, &job, cancel.clone()).await?;
            if report.cancelled {
                print_json(&report)?;
                anyhow::bail!("capture cancelled");
            }
            for f in &report.failed {
                tracing::warn!(date = %f.date, error = %f.error, "date missing from timelapse");
            }
            let format = match args.format {
                ArtifactKind::Gif => MediaFormat::Gif(args.gif.options()),
                ArtifactKind::Video => MediaFormat::Video(args.video.options()),
            };
            let out = args.out.clone().unwrap_or_else(|| match &format {
                MediaFormat::Gif(_) => settings.gif_path(&job.slug),
                MediaFormat::Video(v) => settings.video_path(&job.slug, v.container),
            });
            let media =
                MediaJob::from_capture(&report, &job, out, args.seconds_per_image, format);
            let assembled = run_assembly(media, cancel).await?;
            finish_artifact(&assembled, &args.upload).await?;
        }
        Command::Compress(args) => {
            let out = args.out.clone().unwrap_or_else(|| compressed_path(&args.input));
            let opts = args.gif.options();
            let input = args.input.clone();
            let report = tokio::task::spawn_blocking(move || {
                datelapse::recompress_gif(&input, &out, &opts, Some(&cancel))
            })
            .await
            .context("compression task panicked")??;
            finish_artifact(&report, &args.upload).await?;
        }
    }
    Ok(())
}

fn compressed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}_compressed.gif"))
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{out}");
    Ok(())
}

/// Read a job file, filling fields the file leaves out from `settings`.
fn read_job(
    args: &CaptureArgs,
    overrides: &SettingsArgs,
    settings: &Settings,
) -> anyhow::Result<CaptureJob> {
    let f = File::open(&args.job).with_context(|| format!("open job '{}'", args.job.display()))?;
    let mut raw: serde_json::Value =
        serde_json::from_reader(BufReader::new(f)).context("parse job JSON")?;
    let obj = raw
        .as_object_mut()
        .context("job file must contain a JSON object")?;

    let mut fill = |key: &str, value: serde_json::Value, explicit: bool| {
        if explicit {
            obj.insert(key.to_string(), value);
        } else {
            obj.entry(key).or_insert(value);
        }
    };
    fill(
        "concurrency",
        settings.concurrency.into(),
        overrides.concurrency.is_some(),
    );
    fill(
        "per_host_rate_limit_rps",
        settings.per_host_rate_limit_rps.into(),
        overrides.rps.is_some(),
    );
    if args.overwrite {
        fill("overwrite", true.into(), true);
    }
    if args.strict {
        fill("strict", true.into(), true);
    }
    let wait = obj
        .entry("render_wait")
        .or_insert_with(|| serde_json::json!({}));
    if let Some(wait) = wait.as_object_mut() {
        let timeout = serde_json::Value::from(settings.page_timeout_ms);
        if overrides.page_timeout_ms.is_some() {
            wait.insert("timeout_ms".to_string(), timeout);
        } else {
            wait.entry("timeout_ms").or_insert(timeout);
        }
    }

    let mut job: CaptureJob = serde_json::from_value(raw).context("invalid capture job")?;
    if job.out_dir.as_os_str().is_empty() {
        job.out_dir = settings.frames_dir(&job.slug);
    }
    Ok(job)
}

async fn cmd_capture(
    overrides: &SettingsArgs,
    settings: &Settings,
    args: &CaptureArgs,
    cancel: CancellationToken,
) -> anyhow::Result<CaptureReport> {
    let job = read_job(args, overrides, settings)?;
    capture(settings, &job, cancel).await
}

async fn capture(
    settings: &Settings,
    job: &CaptureJob,
    cancel: CancellationToken,
) -> anyhow::Result<CaptureReport> {
    let mut opts = WebDriverOptions::new(settings.webdriver_endpoint()?);
    opts.headless = settings.headless;
    opts.browser = settings.browser;
    let engine = WebDriverEngine::new(opts).context("start webdriver client")?;
    let orchestrator = CaptureOrchestrator::new(Arc::new(engine));
    let report = orchestrator.run(job, cancel).await?;
    Ok(report)
}

fn resolve_order(args: &InputArgs) -> anyhow::Result<OrderedSequence> {
    let seq = match (&args.dir, args.strategy) {
        (_, OrderStrategy::Explicit) => {
            datelapse::order(&[], OrderStrategy::Explicit, Some(&args.files))?
        }
        (Some(dir), strategy) => {
            let files = datelapse::scan_dir(dir)?;
            datelapse::order(&files, strategy, None)?
        }
        (None, strategy) => datelapse::order(&args.files, strategy, None)?,
    };
    tracing::info!(
        frames = seq.len(),
        excluded = seq.excluded.len(),
        strategy = %seq.strategy,
        "resolved frame order"
    );
    Ok(seq)
}

fn output_path(args: &OutputArgs, default: impl FnOnce() -> PathBuf) -> PathBuf {
    args.out.clone().unwrap_or_else(default)
}

async fn run_assembly(job: MediaJob, cancel: CancellationToken) -> anyhow::Result<AssemblyReport> {
    let report = tokio::task::spawn_blocking(move || datelapse::assemble(&job, Some(&cancel)))
        .await
        .context("assembly task panicked")??;
    Ok(report)
}

async fn finish_artifact(report: &AssemblyReport, upload: &UploadArgs) -> anyhow::Result<()> {
    print_json(report)?;
    if let Some(dir) = &upload.upload_dir {
        let id = upload_to(&DirectoryUploader::new(dir), &report.path, upload).await?;
        eprintln!("uploaded {id}");
    }
    Ok(())
}

async fn upload_to(
    connector: &dyn UploadConnector,
    path: &Path,
    args: &UploadArgs,
) -> anyhow::Result<String> {
    Ok(connector
        .upload(path, args.upload_folder.as_deref(), args.share)
        .await?)
}
