use std::io::{BufReader, Write as _};
use std::path::Path;

use anyhow::Context as _;
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{AnimationDecoder as _, Delay, Frame, RgbaImage};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::assemble::{
    AssemblyReport, MediaJob, check_cancel, ensure_parent_dir, load_frames, publish, temp_beside,
};
use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Palette depths tried, in bits per channel, when shrinking towards a size ceiling.
const PALETTE_LADDER: [u8; 5] = [8, 6, 5, 4, 3];

/// Downscaling rounds tried after the palette floor still misses the size ceiling.
const MAX_RESIZE_PASSES: usize = 3;

/// Each downscale aims this far below the ceiling to absorb fixed per-file overhead.
const RESIZE_HEADROOM: f64 = 0.9;

/// Animated GIF parameters.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GifOptions {
    /// Number of loops; 0 loops forever.
    pub loop_count: u16,
    /// Merge identical consecutive frames and spend more time on palette quantization.
    pub optimize: bool,
    /// Size ceiling in bytes; palette depth is reduced until the file fits.
    pub max_bytes: Option<u64>,
    /// Lowest palette depth the size ceiling may reduce to.
    pub min_palette_bits: u8,
    /// Downscale frames when the palette floor still misses `max_bytes`.
    pub allow_resize: bool,
    /// Upper bounds for downscaled frames.
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            loop_count: 0,
            optimize: true,
            max_bytes: None,
            min_palette_bits: 4,
            allow_resize: false,
            max_width: 1920,
            max_height: 1080,
        }
    }
}

impl GifOptions {
    pub fn validate(&self) -> DatelapseResult<()> {
        if !(3..=8).contains(&self.min_palette_bits) {
            return Err(DatelapseError::config(format!(
                "min_palette_bits must be within 3..=8, got {}",
                self.min_palette_bits
            )));
        }
        if self.max_bytes == Some(0) {
            return Err(DatelapseError::config("max_bytes must be > 0"));
        }
        if self.max_width == 0 || self.max_height == 0 {
            return Err(DatelapseError::config("max_width and max_height must be > 0"));
        }
        Ok(())
    }

    fn ladder(&self) -> impl Iterator<Item = u8> + '_ {
        PALETTE_LADDER
            .into_iter()
            .filter(move |b| *b >= self.min_palette_bits)
    }
}

/// A frame and its display time in milliseconds.
type TimedFrame = (RgbaImage, u32);

pub(crate) struct GifOutput {
    pub bytes: u64,
    pub palette_bits: u8,
    pub warnings: Vec<String>,
}

struct Compressed {
    encoded: Vec<u8>,
    bits: u8,
    warnings: Vec<String>,
}

pub(crate) fn write_gif(
    job: &MediaJob,
    opts: &GifOptions,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<GifOutput> {
    let frames = load_frames(&job.frames, job.transform.as_ref())?;
    check_cancel(cancel)?;
    let delay_ms = job.frame_delay_ms();
    let timed = frames.into_iter().map(|f| (f, delay_ms)).collect();

    let out = compress(timed, opts, cancel)?;
    let bytes = write_out(&out.encoded, &job.output_path, cancel)?;
    Ok(GifOutput {
        bytes,
        palette_bits: out.bits,
        warnings: out.warnings,
    })
}

/// Re-encode an existing GIF through the palette ladder and resize step, keeping each frame's
/// delay. `input` and `output` may be the same file.
#[tracing::instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn recompress_gif(
    input: &Path,
    output: &Path,
    opts: &GifOptions,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<AssemblyReport> {
    opts.validate()?;
    let file = std::fs::File::open(input)
        .with_context(|| format!("open gif '{}'", input.display()))?;
    let original = file.metadata().context("stat input gif")?.len();
    let decoder = GifDecoder::new(BufReader::new(file))
        .map_err(|e| DatelapseError::assembly(format!("'{}' is not a gif: {e}", input.display())))?;
    let frames: Vec<TimedFrame> = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| DatelapseError::assembly(format!("failed to decode '{}': {e}", input.display())))?
        .into_iter()
        .map(|f| {
            let (num, den) = f.delay().numer_denom_ms();
            (f.into_buffer(), num / den.max(1))
        })
        .collect();
    if frames.is_empty() {
        return Err(DatelapseError::assembly(format!(
            "'{}' has no frames",
            input.display()
        )));
    }
    check_cancel(cancel)?;

    let count = frames.len();
    let total_ms: u64 = frames.iter().map(|(_, d)| u64::from(*d)).sum();
    let out = compress(frames, opts, cancel)?;
    ensure_parent_dir(output)?;
    let bytes = write_out(&out.encoded, output, cancel)?;
    for w in &out.warnings {
        tracing::warn!(warning = %w, "recompression warning");
    }
    tracing::info!(original, bytes, bits = out.bits, "recompressed gif");

    Ok(AssemblyReport {
        path: output.to_path_buf(),
        frames: count,
        duration_s: total_ms as f64 / 1000.0,
        bytes,
        palette_bits: Some(out.bits),
        warnings: out.warnings,
    })
}

/// Walk the palette ladder, then downscale if allowed, until `max_bytes` is met.
fn compress(
    mut frames: Vec<TimedFrame>,
    opts: &GifOptions,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<Compressed> {
    let mut chosen: Option<(u8, Vec<u8>)> = None;
    for bits in opts.ladder() {
        check_cancel(cancel)?;
        let encoded = encode(&frames, bits, opts, cancel)?;
        let size = encoded.len() as u64;
        let fits = opts.max_bytes.is_none_or(|max| size <= max);
        tracing::debug!(bits, size, fits, "encoded gif candidate");
        chosen = Some((bits, encoded));
        if fits {
            break;
        }
    }
    let Some((bits, mut encoded)) = chosen else {
        return Err(DatelapseError::assembly("no palette depth available"));
    };

    let mut warnings = Vec::new();
    let Some(max) = opts.max_bytes else {
        return Ok(Compressed {
            encoded,
            bits,
            warnings,
        });
    };

    if opts.allow_resize {
        for _ in 0..MAX_RESIZE_PASSES {
            let size = encoded.len() as u64;
            if size <= max {
                break;
            }
            let Some(first) = frames.first() else { break };
            let Some((w, h)) = shrunk_dims(first.0.dimensions(), size, max, opts) else {
                break;
            };
            check_cancel(cancel)?;
            frames = frames
                .into_par_iter()
                .map(|(f, d)| (imageops::resize(&f, w, h, FilterType::Lanczos3), d))
                .collect();
            encoded = encode(&frames, bits, opts, cancel)?;
            tracing::info!(width = w, height = h, size = encoded.len(), "downscaled gif");
            warnings.push(format!("frames downscaled to {w}x{h} to meet the size ceiling"));
        }
    }
    if encoded.len() as u64 > max {
        warnings.push(format!(
            "size ceiling not met: {} bytes > {max} bytes at the {bits}-bit palette floor",
            encoded.len()
        ));
    }
    Ok(Compressed {
        encoded,
        bits,
        warnings,
    })
}

/// Frame size expected to bring a `size`-byte GIF under `max` bytes, assuming bytes scale with
/// pixel count. Keeps the aspect ratio and the configured bounds; `None` when no smaller size
/// exists.
pub(crate) fn shrunk_dims(
    (w, h): (u32, u32),
    size: u64,
    max: u64,
    opts: &GifOptions,
) -> Option<(u32, u32)> {
    let scale = RESIZE_HEADROOM * (max as f64 / size as f64).sqrt();
    let mut nw = ((f64::from(w) * scale) as u32).clamp(1, opts.max_width);
    let mut nh = ((f64::from(h) * scale) as u32).clamp(1, opts.max_height);
    let aspect = f64::from(w) / f64::from(h);
    if f64::from(nw) / f64::from(nh) > aspect {
        nw = ((f64::from(nh) * aspect) as u32).max(1);
    } else {
        nh = ((f64::from(nw) / aspect) as u32).max(1);
    }
    (nw <= w && nh <= h && (nw, nh) != (w, h)).then_some((nw, nh))
}

fn write_out(
    encoded: &[u8],
    output: &Path,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<u64> {
    let mut tmp = temp_beside(output)?;
    tmp.write_all(encoded)
        .map_err(|e| DatelapseError::assembly(format!("failed to write gif: {e}")))?;
    tmp.flush()
        .map_err(|e| DatelapseError::assembly(format!("failed to flush gif: {e}")))?;
    check_cancel(cancel)?;
    publish(tmp, output)
}

/// Encode `frames` into an in-memory GIF with `bits` bits per channel.
fn encode(
    frames: &[TimedFrame],
    bits: u8,
    opts: &GifOptions,
    cancel: Option<&CancellationToken>,
) -> DatelapseResult<Vec<u8>> {
    let mut prepared: Vec<TimedFrame> = Vec::with_capacity(frames.len());
    for (frame, delay_ms) in frames {
        let frame = posterize(frame, bits);
        match prepared.last_mut() {
            Some((prev, delay)) if opts.optimize && *prev == frame => *delay += *delay_ms,
            _ => prepared.push((frame, *delay_ms)),
        }
    }

    let speed = if opts.optimize { 10 } else { 30 };
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, speed);
        let repeat = match opts.loop_count {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        };
        encoder
            .set_repeat(repeat)
            .map_err(|e| DatelapseError::assembly(format!("gif encoder rejected loop count: {e}")))?;
        for (frame, delay) in prepared {
            check_cancel(cancel)?;
            let delay = Delay::from_numer_denom_ms(delay, 1);
            encoder
                .encode_frame(Frame::from_parts(frame, 0, 0, delay))
                .map_err(|e| DatelapseError::assembly(format!("gif encoding failed: {e}")))?;
        }
    }
    Ok(out)
}

/// Keep the top `bits` bits of each color channel; alpha is untouched.
pub(crate) fn posterize(img: &RgbaImage, bits: u8) -> RgbaImage {
    if bits >= 8 {
        return img.clone();
    }
    let mask = 0xFFu8 << (8 - bits);
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in &mut px.0[..3] {
            *c &= mask;
        }
    }
    out
}

#[cfg(test)]
#[path = "../../tests/unit/assemble/gif.rs"]
mod tests;
