//! Per-frame post-processing: orientation normalization, crop, watermark.

use std::io::Cursor;
use std::path::Path;

use anyhow::Context as _;
use image::{DynamicImage, ImageDecoder as _, ImageReader};

use crate::engine::BoundingBox;
use crate::foundation::error::{DatelapseError, DatelapseResult};

pub mod watermark;

pub use watermark::{Watermark, WatermarkPosition};

/// Read an image from disk and rotate/flip it upright according to its EXIF orientation.
pub fn load_oriented(path: &Path) -> DatelapseResult<DynamicImage> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("open image '{}'", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("sniff image format of '{}'", path.display()))?;
    decode_with_orientation(reader)
        .with_context(|| format!("decode image '{}'", path.display()))
        .map_err(DatelapseError::from)
}

/// Decode encoded image bytes (e.g. a screenshot) and normalize orientation.
pub fn decode_oriented(bytes: &[u8]) -> DatelapseResult<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context("sniff image format")?;
    decode_with_orientation(reader)
        .context("decode image bytes")
        .map_err(DatelapseError::from)
}

fn decode_with_orientation<R>(reader: ImageReader<R>) -> image::ImageResult<DynamicImage>
where
    R: std::io::BufRead + std::io::Seek,
{
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Pixel rectangle to keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    /// Device-pixel box covering an element's CSS-pixel bounding box.
    pub fn from_bounding_box(bbox: &BoundingBox, device_scale_factor: f64) -> Self {
        let s = device_scale_factor.max(f64::MIN_POSITIVE);
        let left = (bbox.x * s).floor().max(0.0);
        let top = (bbox.y * s).floor().max(0.0);
        let right = ((bbox.x + bbox.width) * s).ceil().max(left);
        let bottom = ((bbox.y + bbox.height) * s).ceil().max(top);
        Self {
            left: left as u32,
            top: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        }
    }

    /// Intersect with a `width` x `height` image. An empty intersection is an error.
    pub fn clamp_to(self, width: u32, height: u32) -> DatelapseResult<Self> {
        let right = self.left.saturating_add(self.width).min(width);
        let bottom = self.top.saturating_add(self.height).min(height);
        if right <= self.left || bottom <= self.top {
            return Err(DatelapseError::config(format!(
                "crop box {}x{}+{}+{} does not intersect a {width}x{height} image",
                self.width, self.height, self.left, self.top
            )));
        }
        Ok(Self {
            left: self.left,
            top: self.top,
            width: right - self.left,
            height: bottom - self.top,
        })
    }
}

/// Transform applied to every frame before it is stored or encoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameTransform {
    pub crop: Option<CropBox>,
    pub watermark: Option<Watermark>,
}

impl FrameTransform {
    pub fn is_identity(&self) -> bool {
        self.crop.is_none() && self.watermark.as_ref().is_none_or(|w| w.text.trim().is_empty())
    }

    /// Crop first, then watermark, so the mark lands inside the kept area.
    pub fn apply(&self, img: DynamicImage) -> DatelapseResult<DynamicImage> {
        let mut img = img;
        if let Some(crop) = self.crop {
            let c = crop.clamp_to(img.width(), img.height())?;
            img = img.crop_imm(c.left, c.top, c.width, c.height);
        }
        if let Some(mark) = &self.watermark {
            img = mark.apply(img)?;
        }
        Ok(img)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/transform/crop.rs"]
mod tests;
