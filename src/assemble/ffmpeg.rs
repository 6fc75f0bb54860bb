use std::ffi::OsString;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context as _;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::assemble::{MediaJob, check_cancel, fit_to_canvas, publish, temp_beside};
use crate::foundation::error::{DatelapseError, DatelapseResult};
use crate::transform::load_oriented;

const WAIT_POLL: Duration = Duration::from_millis(50);

/// Video container.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Webm,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

/// Video codec, named as ffmpeg names its encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VideoCodec {
    #[default]
    #[serde(rename = "libx264")]
    Libx264,
    #[serde(rename = "libvpx-vp9")]
    LibvpxVp9,
    #[serde(rename = "libaom-av1")]
    LibaomAv1,
}

impl VideoCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Libx264 => "libx264",
            Self::LibvpxVp9 => "libvpx-vp9",
            Self::LibaomAv1 => "libaom-av1",
        }
    }

    fn max_crf(self) -> u8 {
        match self {
            Self::Libx264 => 51,
            Self::LibvpxVp9 | Self::LibaomAv1 => 63,
        }
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = DatelapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "libx264" => Ok(Self::Libx264),
            "libvpx-vp9" => Ok(Self::LibvpxVp9),
            "libaom-av1" => Ok(Self::LibaomAv1),
            other => Err(DatelapseError::config(format!("unsupported codec '{other}'"))),
        }
    }
}

impl std::str::FromStr for Container {
    type Err = DatelapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            other => Err(DatelapseError::config(format!("unsupported container '{other}'"))),
        }
    }
}

/// Encoder parameters for the video form.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VideoOptions {
    pub container: Container,
    pub codec: VideoCodec,
    pub crf: u8,
    /// x264 only.
    pub preset: String,
    pub pix_fmt: String,
    /// ffmpeg executable; looked up on `PATH` when not absolute.
    pub ffmpeg_bin: PathBuf,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            codec: VideoCodec::Libx264,
            crf: 18,
            preset: "medium".to_string(),
            pix_fmt: "yuv420p".to_string(),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
        }
    }
}

impl VideoOptions {
    pub fn validate(&self) -> DatelapseResult<()> {
        if self.container == Container::Webm && self.codec == VideoCodec::Libx264 {
            return Err(DatelapseError::config(
                "codec libx264 cannot be muxed into webm (use libvpx-vp9 or libaom-av1)",
            ));
        }
        if self.crf > self.codec.max_crf() {
            return Err(DatelapseError::config(format!(
                "crf {} is out of range for {} (max {})",
                self.crf,
                self.codec.as_str(),
                self.codec.max_crf()
            )));
        }
        if self.pix_fmt.trim().is_empty() {
            return Err(DatelapseError::config("pix_fmt must not be empty"));
        }
        Ok(())
    }

    fn chroma_subsampled(&self) -> bool {
        self.pix_fmt.contains("420") || self.pix_fmt.contains("422")
    }
}

/// Resolve the encoder executable, searching `PATH` for a bare name, before any frame is staged.
pub(crate) fn locate_ffmpeg(bin: &Path) -> DatelapseResult<PathBuf> {
    let candidate = |p: PathBuf| {
        if p.is_file() {
            return Some(p);
        }
        let exe = p.with_extension(std::env::consts::EXE_EXTENSION);
        (cfg!(windows) && exe.is_file()).then_some(exe)
    };
    let found = if bin.components().count() > 1 || bin.is_absolute() {
        candidate(bin.to_path_buf())
    } else {
        std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| candidate(dir.join(bin)))
        })
    };
    found.ok_or_else(|| {
        DatelapseError::assembly(format!(
            "ffmpeg '{}' not found (is it installed and on PATH?)",
            bin.display()
        ))
    })
}

/// Input frame rate `1 / seconds_per_image`, as an exact millisecond rational.
pub(crate) fn input_rate(seconds_per_image: f64) -> String {
    let ms = ((seconds_per_image * 1000.0).round() as u64).max(1);
    format!("1000/{ms}")
}

/// Full ffmpeg argument list for encoding `%06d.<ext>` frames in `stage_dir` into `output`.
pub(crate) fn ffmpeg_args(
    opts: &VideoOptions,
    seconds_per_image: f64,
    stage_dir: &Path,
    ext: &str,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-f", "image2", "-framerate"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input_rate(seconds_per_image).into());
    args.extend(["-start_number", "0", "-i"].map(OsString::from));
    args.push(stage_dir.join(format!("%06d.{ext}")).into_os_string());
    if opts.chroma_subsampled() {
        args.extend(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"].map(OsString::from));
    }
    args.extend(["-an", "-c:v", opts.codec.as_str(), "-crf"].map(OsString::from));
    args.push(opts.crf.to_string().into());
    match opts.codec {
        VideoCodec::Libx264 => {
            args.push("-preset".into());
            args.push(opts.preset.clone().into());
        }
        VideoCodec::LibvpxVp9 | VideoCodec::LibaomAv1 => {
            args.extend(["-b:v", "0"].map(OsString::from));
        }
    }
    args.push("-pix_fmt".into());
    args.push(opts.pix_fmt.clone().into());
    if opts.container == Container::Mp4 {
        args.extend(["-movflags", "+faststart"].map(OsString::from));
    }
    args.extend(["-f", opts.container.extension()].map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Stage frames as `000000.<ext>`, `000001.<ext>`, ... in sequence order.
///
/// Frames are byte-copied when none needs transforming, orienting, or resizing (same
/// PNG/BMP extension and dimensions); otherwise every frame is decoded, transformed, fitted to
/// the first frame's size and written as PNG. Returns the staged extension.
pub(crate) fn stage_frames(job: &MediaJob, dir: &Path) -> DatelapseResult<String> {
    if job.transform.is_none() {
        if let Some(ext) = copyable_extension(&job.frames) {
            job.frames
                .par_iter()
                .enumerate()
                .try_for_each(|(i, src)| -> DatelapseResult<()> {
                    let dst = dir.join(format!("{i:06}.{ext}"));
                    std::fs::copy(src, &dst).with_context(|| {
                        format!("stage '{}' as '{}'", src.display(), dst.display())
                    })?;
                    Ok(())
                })?;
            return Ok(ext);
        }
    }

    let first = load_oriented(&job.frames[0])?;
    let first = match &job.transform {
        Some(t) => t.apply(first)?,
        None => first,
    };
    let (w, h) = (first.width(), first.height());

    job.frames
        .par_iter()
        .enumerate()
        .try_for_each(|(i, src)| -> DatelapseResult<()> {
            let img = load_oriented(src)?;
            let img = match &job.transform {
                Some(t) => t.apply(img)?,
                None => img,
            };
            let img = fit_to_canvas(img.into_rgba8(), w, h);
            let dst = dir.join(format!("{i:06}.png"));
            img.save_with_format(&dst, image::ImageFormat::Png)
                .with_context(|| format!("write staged frame '{}'", dst.display()))?;
            Ok(())
        })?;
    Ok("png".to_string())
}

fn copyable_extension(frames: &[PathBuf]) -> Option<String> {
    let ext_of = |p: &PathBuf| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    };
    let ext = ext_of(frames.first()?)?;
    if !matches!(ext.as_str(), "png" | "bmp") {
        return None;
    }
    let dims = image::image_dimensions(&frames[0]).ok()?;
    for f in &frames[1..] {
        if ext_of(f).as_deref() != Some(ext.as_str()) {
            return None;
        }
        if image::image_dimensions(f).ok()? != dims {
            return None;
        }
    }
    Some(ext)
}

pub(crate) fn write_video(
    job: &MediaJob,
    opts: &VideoOptions,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<u64> {
    let ffmpeg = locate_ffmpeg(&opts.ffmpeg_bin)?;
    let stage = tempfile::Builder::new()
        .prefix("datelapse-frames-")
        .tempdir()
        .context("create frame staging directory")?;
    let ext = stage_frames(job, stage.path())?;
    check_cancel(cancel)?;

    let tmp = temp_beside(&job.output_path)?;
    let args = ffmpeg_args(opts, job.seconds_per_image, stage.path(), &ext, tmp.path());
    run_ffmpeg(&ffmpeg, &args, cancel)?;

    let size = tmp
        .as_file()
        .metadata()
        .context("stat encoder output")?
        .len();
    if size == 0 {
        return Err(DatelapseError::assembly(
            "ffmpeg reported success but produced an empty file",
        ));
    }
    publish(tmp, &job.output_path)
}

fn run_ffmpeg(
    bin: &Path,
    args: &[OsString],
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<()> {
    tracing::debug!(bin = %bin.display(), ?args, "spawning ffmpeg");
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            DatelapseError::assembly(format!(
                "failed to spawn ffmpeg '{}' (is it installed and on PATH?): {e}",
                bin.display()
            ))
        })?;

    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| DatelapseError::assembly("failed to open ffmpeg stderr (unexpected)"))?;
    let stderr_drain = std::thread::spawn(move || {
        let mut bytes = Vec::new();
        stderr.read_to_end(&mut bytes)?;
        Ok::<_, std::io::Error>(bytes)
    });

    let status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| DatelapseError::assembly(format!("failed to poll ffmpeg: {e}")))?
        {
            break status;
        }
        if cancel.is_some_and(|c| c.is_cancelled()) {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_drain.join();
            tracing::info!("ffmpeg cancelled");
            return Err(DatelapseError::Cancelled);
        }
        std::thread::sleep(WAIT_POLL);
    };

    let stderr_bytes = stderr_drain
        .join()
        .map_err(|_| DatelapseError::assembly("ffmpeg stderr drain thread panicked"))?
        .map_err(|e| DatelapseError::assembly(format!("ffmpeg stderr read failed: {e}")))?;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&stderr_bytes);
        return Err(DatelapseError::assembly(format!(
            "ffmpeg exited with status {status}: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/assemble/ffmpeg.rs"]
mod tests;
