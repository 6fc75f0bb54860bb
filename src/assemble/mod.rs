//! Media assembler.
//!
//! Turns an ordered frame list into one looping GIF or one video file. Output is always written
//! to a temporary file next to the destination and renamed into place only after the encoder
//! succeeded, so the published path never holds a partial artifact.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::NaiveDate;
use image::RgbaImage;
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureJob, CaptureReport};
use crate::foundation::error::{DatelapseError, DatelapseResult};
use crate::order::OrderedSequence;
use crate::transform::{FrameTransform, load_oriented};

pub mod ffmpeg;
pub mod gif;

pub use ffmpeg::{Container, VideoCodec, VideoOptions};
pub use gif::{GifOptions, recompress_gif};

/// Artifact kind and its encoder parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaFormat {
    Gif(GifOptions),
    Video(VideoOptions),
}

/// One conversion request.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaJob {
    pub frames: Vec<PathBuf>,
    pub output_path: PathBuf,
    /// Display time of each frame.
    pub seconds_per_image: f64,
    pub format: MediaFormat,
    /// Applied to every frame before encoding.
    pub transform: Option<FrameTransform>,
}

impl MediaJob {
    pub fn new(
        sequence: &OrderedSequence,
        output_path: impl Into<PathBuf>,
        seconds_per_image: f64,
        format: MediaFormat,
    ) -> Self {
        Self {
            frames: sequence.paths().map(Path::to_path_buf).collect(),
            output_path: output_path.into(),
            seconds_per_image,
            format,
            transform: None,
        }
    }

    /// Job over the frames a capture run left on disk (saved or skipped as already present), in
    /// date order.
    ///
    /// Captured frames are stored after their crop/watermark was applied, so no transform is
    /// carried over.
    pub fn from_capture(
        report: &CaptureReport,
        capture: &CaptureJob,
        output_path: impl Into<PathBuf>,
        seconds_per_image: f64,
        format: MediaFormat,
    ) -> Self {
        let mut dated: Vec<(NaiveDate, PathBuf)> = report.saved.clone();
        dated.extend(report.skipped.iter().map(|d| (*d, capture.frame_path(*d))));
        dated.sort_by_key(|(d, _)| *d);
        Self {
            frames: dated.into_iter().map(|(_, p)| p).collect(),
            output_path: output_path.into(),
            seconds_per_image,
            format,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: FrameTransform) -> Self {
        self.transform = (!transform.is_identity()).then_some(transform);
        self
    }

    pub fn validate(&self) -> DatelapseResult<()> {
        if self.frames.is_empty() {
            return Err(DatelapseError::assembly("no frames to assemble"));
        }
        if !self.seconds_per_image.is_finite() || self.seconds_per_image < 0.001 {
            return Err(DatelapseError::config(format!(
                "seconds_per_image must be at least 0.001, got {}",
                self.seconds_per_image
            )));
        }
        if self.output_path.file_name().is_none() {
            return Err(DatelapseError::config(format!(
                "output path '{}' has no file name",
                self.output_path.display()
            )));
        }
        match &self.format {
            MediaFormat::Gif(opts) => opts.validate(),
            MediaFormat::Video(opts) => opts.validate(),
        }
    }

    /// Per-frame display time in whole milliseconds.
    pub fn frame_delay_ms(&self) -> u32 {
        (self.seconds_per_image * 1000.0).round() as u32
    }
}

/// Outcome of a successful conversion.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AssemblyReport {
    pub path: PathBuf,
    pub frames: usize,
    pub duration_s: f64,
    pub bytes: u64,
    /// Bits per channel kept in the GIF palette (GIF only).
    pub palette_bits: Option<u8>,
    pub warnings: Vec<String>,
}

/// Build the artifact described by `job`.
///
/// `cancel` is polled between frames and while the external encoder runs; a cancelled job
/// returns [`DatelapseError::Cancelled`] and leaves nothing at the output path.
#[tracing::instrument(skip_all, fields(output = %job.output_path.display(), frames = job.frames.len()))]
pub fn assemble(
    job: &MediaJob,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<AssemblyReport> {
    job.validate()?;
    ensure_parent_dir(&job.output_path)?;

    let (bytes, palette_bits, warnings) = match &job.format {
        MediaFormat::Gif(opts) => {
            let out = gif::write_gif(job, opts, cancel)?;
            (out.bytes, Some(out.palette_bits), out.warnings)
        }
        MediaFormat::Video(opts) => (ffmpeg::write_video(job, opts, cancel)?, None, Vec::new()),
    };

    for w in &warnings {
        tracing::warn!(warning = %w, "assembly warning");
    }
    tracing::info!(bytes, "wrote {}", job.output_path.display());

    Ok(AssemblyReport {
        path: job.output_path.clone(),
        frames: job.frames.len(),
        duration_s: job.frames.len() as f64 * job.seconds_per_image,
        bytes,
        palette_bits,
        warnings,
    })
}

pub fn ensure_parent_dir(path: &Path) -> DatelapseResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Temporary file in the destination's directory, removed on drop unless published.
pub(crate) fn temp_beside(output: &Path) -> DatelapseResult<NamedTempFile> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".part")
        .tempfile_in(dir)
        .with_context(|| format!("create temporary file in '{}'", dir.display()))
        .map_err(DatelapseError::from)
}

/// Atomically move `tmp` to `output`; returns the published size.
pub(crate) fn publish(tmp: NamedTempFile, output: &Path) -> DatelapseResult<u64> {
    tmp.persist(output)
        .map_err(|e| e.error)
        .with_context(|| format!("publish '{}'", output.display()))?;
    let len = std::fs::metadata(output)
        .with_context(|| format!("stat '{}'", output.display()))?
        .len();
    Ok(len)
}

pub(crate) fn check_cancel(cancel: Option<&CancellationToken>) -> DatelapseResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(DatelapseError::Cancelled),
        _ => Ok(()),
    }
}

/// Decode, orient, and transform every frame in parallel, then fit all of them to the first
/// frame's canvas.
pub(crate) fn load_frames(
    paths: &[PathBuf],
    transform: Option<&FrameTransform>,
) -> DatelapseResult<Vec<RgbaImage>> {
    let frames = paths
        .par_iter()
        .map(|p| {
            let img = load_oriented(p)?;
            let img = match transform {
                Some(t) => t.apply(img)?,
                None => img,
            };
            Ok(img.into_rgba8())
        })
        .collect::<DatelapseResult<Vec<_>>>()?;

    let Some(first) = frames.first() else {
        return Ok(frames);
    };
    let (w, h) = first.dimensions();
    Ok(frames
        .into_par_iter()
        .map(|f| fit_to_canvas(f, w, h))
        .collect())
}

/// Scale `img` to fit inside `w`x`h` keeping its aspect ratio, centered on opaque black.
pub(crate) fn fit_to_canvas(img: RgbaImage, w: u32, h: u32) -> RgbaImage {
    if img.dimensions() == (w, h) {
        return img;
    }
    let scale = (w as f64 / img.width() as f64).min(h as f64 / img.height() as f64);
    let sw = ((img.width() as f64 * scale).round() as u32).clamp(1, w);
    let sh = ((img.height() as f64 * scale).round() as u32).clamp(1, h);
    let scaled = image::imageops::resize(&img, sw, sh, image::imageops::FilterType::Triangle);
    let mut canvas = RgbaImage::from_pixel(w, h, image::Rgba([0, 0, 0, 255]));
    image::imageops::overlay(
        &mut canvas,
        &scaled,
        ((w - sw) / 2) as i64,
        ((h - sh) / 2) as i64,
    );
    canvas
}

#[cfg(test)]
#[path = "../../tests/unit/assemble/job.rs"]
mod tests;
