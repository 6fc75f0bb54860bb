use super::*;

#[test]
fn svg_anchors_follow_position() {
    let mut w = Watermark::new("a < b & c");
    w.position = WatermarkPosition::BottomRight;
    let svg = w.svg(200, 100);
    assert!(svg.contains(r#"x="188" y="88""#));
    assert!(svg.contains(r#"text-anchor="end""#));
    assert!(svg.contains(r#"dominant-baseline="text-after-edge""#));
    assert!(svg.contains("a &lt; b &amp; c"));

    w.position = WatermarkPosition::TopLeft;
    let svg = w.svg(200, 100);
    assert!(svg.contains(r#"x="12" y="12""#));
    assert!(svg.contains(r#"text-anchor="start""#));

    w.position = WatermarkPosition::Center;
    assert!(w.svg(200, 100).contains(r#"x="100" y="50""#));
}

#[test]
fn positions_deserialize_kebab_case() {
    let w: Watermark = serde_json::from_str(r#"{"text":"x","position":"top-right"}"#).unwrap();
    assert_eq!(w.position, WatermarkPosition::TopRight);
    assert_eq!((w.font_size, w.margin_px), (18, 12));
    assert!((w.opacity - 0.3).abs() < f32::EPSILON);
}

#[test]
fn composite_blends_white_over_opaque_black() {
    let mut dst = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 255]));
    // 50% white, premultiplied.
    composite_premul_over(&mut dst, &[128, 128, 128, 128]);
    let px = dst.get_pixel(0, 0);
    assert_eq!(px[3], 255);
    assert!((127..=129).contains(&px[0]));
}

#[test]
fn transparent_source_leaves_pixel_untouched() {
    let mut dst = RgbaImage::from_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
    composite_premul_over(&mut dst, &[0, 0, 0, 0]);
    assert_eq!(dst.get_pixel(0, 0).0, [10, 20, 30, 255]);
}

#[test]
fn apply_keeps_dimensions_and_color_type() {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(64, 32));
    let out = Watermark::new("2025-08-01").apply(img).unwrap();
    assert_eq!((out.width(), out.height()), (64, 32));
    assert!(!out.color().has_alpha());
}

#[test]
fn empty_text_is_a_no_op() {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
    let out = Watermark::default().apply(img.clone()).unwrap();
    assert_eq!(out, img);
}

#[test]
fn opacity_out_of_range_rejected() {
    let mut w = Watermark::new("x");
    w.opacity = 1.5;
    assert!(w.validate().is_err());
}
