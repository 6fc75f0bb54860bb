use std::sync::{Arc, OnceLock};

use anyhow::Context as _;
use image::{DynamicImage, RgbaImage};

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Where the watermark text is anchored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// Semi-transparent white text stamped onto each frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Watermark {
    pub text: String,
    pub position: WatermarkPosition,
    pub opacity: f32,
    pub font_size: u32,
    pub margin_px: u32,
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: WatermarkPosition::default(),
            opacity: 0.3,
            font_size: 18,
            margin_px: 12,
        }
    }
}

impl Watermark {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DatelapseResult<()> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(DatelapseError::config(format!(
                "watermark opacity {} is outside [0, 1]",
                self.opacity
            )));
        }
        if self.font_size == 0 {
            return Err(DatelapseError::config("watermark font_size must be > 0"));
        }
        Ok(())
    }

    /// Stamp the text onto `img`. Images without alpha stay without alpha.
    pub fn apply(&self, img: DynamicImage) -> DatelapseResult<DynamicImage> {
        if self.text.trim().is_empty() || self.opacity <= 0.0 {
            return Ok(img);
        }
        let had_alpha = img.color().has_alpha();
        let mut base = img.into_rgba8();
        let overlay = self.rasterize(base.width(), base.height())?;
        composite_premul_over(&mut base, &overlay);

        let out = DynamicImage::ImageRgba8(base);
        Ok(if had_alpha {
            out
        } else {
            DynamicImage::ImageRgb8(out.into_rgb8())
        })
    }

    fn rasterize(&self, width: u32, height: u32) -> DatelapseResult<Vec<u8>> {
        let svg = self.svg(width, height);
        let opts = usvg::Options {
            fontdb: system_fonts(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(&svg, &opts).context("parse watermark svg")?;
        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| DatelapseError::assembly("failed to allocate watermark pixmap"))?;
        resvg::render(&tree, resvg::tiny_skia::Transform::identity(), &mut pixmap.as_mut());
        Ok(pixmap.take())
    }

    fn svg(&self, width: u32, height: u32) -> String {
        let m = self.margin_px;
        let (x, anchor) = match self.position {
            WatermarkPosition::TopLeft | WatermarkPosition::BottomLeft => (m, "start"),
            WatermarkPosition::TopRight | WatermarkPosition::BottomRight => {
                (width.saturating_sub(m), "end")
            }
            WatermarkPosition::Center => (width / 2, "middle"),
        };
        let (y, baseline) = match self.position {
            WatermarkPosition::TopLeft | WatermarkPosition::TopRight => (m, "text-before-edge"),
            WatermarkPosition::BottomLeft | WatermarkPosition::BottomRight => {
                (height.saturating_sub(m), "text-after-edge")
            }
            WatermarkPosition::Center => (height / 2, "central"),
        };
        format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}"><text x="{x}" y="{y}" font-family="DejaVu Sans, sans-serif" font-size="{size}" fill="#ffffff" fill-opacity="{op}" text-anchor="{anchor}" dominant-baseline="{baseline}">{text}</text></svg>"##,
            size = self.font_size,
            op = self.opacity,
            text = escape_xml(&self.text),
        )
    }
}

fn system_fonts() -> Arc<usvg::fontdb::Database> {
    static FONTS: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    FONTS
        .get_or_init(|| {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            if db.faces().next().is_none() {
                tracing::warn!("no system fonts found; watermarks will render empty");
            }
            Arc::new(db)
        })
        .clone()
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Source-over composite of a premultiplied RGBA8 buffer onto a straight-alpha image.
fn composite_premul_over(dst: &mut RgbaImage, src: &[u8]) {
    for (px, s) in dst.pixels_mut().zip(src.chunks_exact(4)) {
        let sa = s[3] as f32 / 255.0;
        if sa == 0.0 {
            continue;
        }
        let da = px[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        for c in 0..3 {
            let sc = s[c] as f32 / 255.0;
            let dc = px[c] as f32 / 255.0 * da;
            let premul = sc + dc * (1.0 - sa);
            px[c] = ((premul / out_a) * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        px[3] = (out_a * 255.0).round() as u8;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/transform/watermark.rs"]
mod tests;
