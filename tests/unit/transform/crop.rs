use super::*;

#[test]
fn clamp_trims_to_image_bounds() {
    let c = CropBox {
        left: 50,
        top: 10,
        width: 100,
        height: 100,
    };
    let clamped = c.clamp_to(120, 60).unwrap();
    assert_eq!(
        clamped,
        CropBox {
            left: 50,
            top: 10,
            width: 70,
            height: 50
        }
    );
}

#[test]
fn clamp_rejects_boxes_outside_or_empty() {
    let outside = CropBox {
        left: 200,
        top: 0,
        width: 10,
        height: 10,
    };
    assert!(outside.clamp_to(100, 100).is_err());

    let empty = CropBox {
        left: 0,
        top: 0,
        width: 0,
        height: 10,
    };
    assert!(empty.clamp_to(100, 100).is_err());
}

#[test]
fn bounding_box_scales_by_device_pixels() {
    let bbox = BoundingBox {
        x: 10.5,
        y: -4.0,
        width: 100.2,
        height: 50.0,
    };
    let c = CropBox::from_bounding_box(&bbox, 2.0);
    assert_eq!(
        c,
        CropBox {
            left: 21,
            top: 0,
            width: 201,
            height: 92
        }
    );
}

#[test]
fn transform_crops_before_watermarking() {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(40, 30));
    let t = FrameTransform {
        crop: Some(CropBox {
            left: 5,
            top: 5,
            width: 10,
            height: 8,
        }),
        watermark: None,
    };
    let out = t.apply(img).unwrap();
    assert_eq!((out.width(), out.height()), (10, 8));
    assert!(!t.is_identity());
    assert!(FrameTransform::default().is_identity());
}

#[test]
fn decode_oriented_reads_png_bytes() {
    let img = image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    let back = decode_oriented(&bytes).unwrap();
    assert_eq!((back.width(), back.height()), (3, 2));
}

#[test]
fn load_oriented_reports_missing_files() {
    let err = load_oriented(Path::new("/definitely/not/here.png")).unwrap_err();
    assert!(err.to_string().contains("not/here.png"));
}
