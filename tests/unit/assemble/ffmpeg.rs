use super::*;

use crate::assemble::MediaFormat;
use crate::transform::{CropBox, FrameTransform};

fn strs(args: &[OsString]) -> Vec<String> {
    args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
}

fn write_png(path: &Path, w: u32, h: u32, shade: u8) {
    image::RgbImage::from_pixel(w, h, image::Rgb([shade, shade, shade]))
        .save(path)
        .unwrap();
}

fn job(frames: Vec<PathBuf>, out: PathBuf) -> MediaJob {
    MediaJob {
        frames,
        output_path: out,
        seconds_per_image: 0.5,
        format: MediaFormat::Video(VideoOptions::default()),
        transform: None,
    }
}

#[test]
fn x264_argument_contract() {
    let opts = VideoOptions::default();
    let args = strs(&ffmpeg_args(
        &opts,
        0.5,
        Path::new("/stage"),
        "png",
        Path::new("/out/v.mp4.part"),
    ));
    let joined = args.join(" ");
    assert!(joined.starts_with("-y -loglevel error -f image2 -framerate 1000/500 -start_number 0 -i /stage/%06d.png"));
    assert!(joined.contains("-vf scale=trunc(iw/2)*2:trunc(ih/2)*2"));
    assert!(joined.contains("-c:v libx264 -crf 18 -preset medium -pix_fmt yuv420p"));
    assert!(joined.ends_with("-f mp4 /out/v.mp4.part"));
}

#[test]
fn vp9_uses_constant_quality_and_no_preset() {
    let opts = VideoOptions {
        container: Container::Webm,
        codec: VideoCodec::LibvpxVp9,
        crf: 30,
        pix_fmt: "yuv444p".into(),
        ..VideoOptions::default()
    };
    let args = strs(&ffmpeg_args(&opts, 2.0, Path::new("/s"), "png", Path::new("/o.webm")));
    assert!(args.windows(2).any(|w| w == ["-b:v", "0"]));
    assert!(!args.iter().any(|a| a == "-preset"));
    assert!(!args.iter().any(|a| a == "-vf"));
    assert!(!args.iter().any(|a| a == "-movflags"));
    assert!(args.windows(2).any(|w| w == ["-framerate", "1000/2000"]));
}

#[test]
fn codec_container_and_crf_validation() {
    let bad = VideoOptions {
        container: Container::Webm,
        codec: VideoCodec::Libx264,
        ..VideoOptions::default()
    };
    assert!(bad.validate().is_err());

    let crf = VideoOptions {
        crf: 60,
        ..VideoOptions::default()
    };
    assert!(crf.validate().is_err());

    let av1 = VideoOptions {
        codec: VideoCodec::LibaomAv1,
        crf: 60,
        ..VideoOptions::default()
    };
    assert!(av1.validate().is_ok());

    assert_eq!("libvpx-vp9".parse::<VideoCodec>().unwrap(), VideoCodec::LibvpxVp9);
    assert!("h265".parse::<VideoCodec>().is_err());
}

#[test]
fn uniform_pngs_are_copied_in_sequence_order() {
    let src = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let a = src.path().join("a.png");
    let b = src.path().join("b.png");
    write_png(&a, 4, 4, 10);
    write_png(&b, 4, 4, 200);

    let ext = stage_frames(&job(vec![b.clone(), a.clone()], src.path().join("o.mp4")), stage.path())
        .unwrap();
    assert_eq!(ext, "png");
    assert_eq!(
        std::fs::read(stage.path().join("000000.png")).unwrap(),
        std::fs::read(&b).unwrap()
    );
    assert_eq!(
        std::fs::read(stage.path().join("000001.png")).unwrap(),
        std::fs::read(&a).unwrap()
    );
}

#[test]
fn mixed_sizes_and_transforms_are_transcoded() {
    let src = tempfile::tempdir().unwrap();
    let stage = tempfile::tempdir().unwrap();
    let a = src.path().join("a.png");
    let b = src.path().join("b.jpg");
    write_png(&a, 8, 6, 10);
    image::RgbImage::from_pixel(16, 12, image::Rgb([90, 90, 90]))
        .save(&b)
        .unwrap();

    let mut j = job(vec![a, b], src.path().join("o.mp4"));
    j.transform = Some(FrameTransform {
        crop: Some(CropBox {
            left: 0,
            top: 0,
            width: 4,
            height: 4,
        }),
        watermark: None,
    });
    let ext = stage_frames(&j, stage.path()).unwrap();
    assert_eq!(ext, "png");
    for name in ["000000.png", "000001.png"] {
        let dims = image::image_dimensions(stage.path().join(name)).unwrap();
        assert_eq!(dims, (4, 4));
    }
}

#[test]
fn missing_binary_is_an_assembly_error() {
    let err = run_ffmpeg(Path::new("/nonexistent/ffmpeg-bin"), &[], None).unwrap_err();
    assert!(err.to_string().starts_with("assembly error: failed to spawn ffmpeg"));
}

#[test]
fn encoder_path_is_resolved_before_staging() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("my-ffmpeg");
    std::fs::write(&bin, b"").unwrap();
    assert_eq!(locate_ffmpeg(&bin).unwrap(), bin);

    let missing = dir.path().join("nope").join("ffmpeg");
    let err = locate_ffmpeg(&missing).unwrap_err();
    assert!(matches!(err, DatelapseError::Assembly(_)));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn missing_encoder_fails_without_touching_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let frame = dir.path().join("a.png");
    write_png(&frame, 4, 4, 10);
    let out = dir.path().join("clip.mp4");
    let mut job = job(vec![frame], out.clone());
    let opts = VideoOptions {
        ffmpeg_bin: PathBuf::from("datelapse-no-such-encoder"),
        ..VideoOptions::default()
    };
    job.format = MediaFormat::Video(opts.clone());

    let err = write_video(&job, &opts, None).unwrap_err();
    assert!(err.to_string().contains("datelapse-no-such-encoder"));
    assert!(!out.exists());
}
