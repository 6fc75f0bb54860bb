use super::*;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn job() -> CaptureJob {
    CaptureJob::new(
        Url::parse("https://gpsjam.org/?lat=1").unwrap(),
        d(2025, 8, 1),
        d(2025, 8, 3),
        "gpsjam",
        "/tmp/frames/gpsjam",
    )
}

#[test]
fn deserializes_with_request_defaults() {
    let j: CaptureJob = serde_json::from_str(
        r#"{"url":"https://gpsjam.org/","start_date":"2025-08-01","end_date":"2025-08-02","slug":"g"}"#,
    )
    .unwrap();
    assert_eq!(j.date_param_name, "date");
    assert_eq!(j.date_format.as_str(), "YYYY-MM-DD");
    assert_eq!(j.timezone, Timezone::utc());
    assert_eq!((j.viewport.width, j.viewport.height), (1920, 1080));
    assert!(j.full_page);
    assert_eq!(j.concurrency, 2);
    assert_eq!(j.per_host_rate_limit_rps, 4);
    assert_eq!(j.retries, RetryPolicy::default());
    assert!(!j.overwrite && !j.strict);
    assert!(j.out_dir.as_os_str().is_empty());
}

#[test]
fn crop_box_field_is_named_box() {
    let spec: CropSpec =
        serde_json::from_str(r#"{"box":{"left":1,"top":2,"width":3,"height":4}}"#).unwrap();
    assert_eq!(spec.region.map(|b| b.width), Some(3));
    assert!(spec.selector.is_none());
}

#[test]
fn reversed_range_and_zero_concurrency_fail_fast() {
    let mut j = job();
    j.end_date = d(2025, 7, 31);
    assert!(j.validate().unwrap_err().to_string().starts_with("configuration error:"));

    let mut j = job();
    j.concurrency = 0;
    assert!(j.validate().is_err());
}

#[test]
fn pool_size_is_capped_at_five() {
    let mut j = job();
    j.concurrency = 12;
    assert_eq!(j.pool_size(), MAX_CONCURRENCY);
    j.concurrency = 3;
    assert_eq!(j.pool_size(), 3);
}

#[test]
fn url_and_path_per_date() {
    let j = job();
    assert_eq!(
        j.url_for(d(2025, 8, 2)).as_str(),
        "https://gpsjam.org/?lat=1&date=2025-08-02"
    );
    assert_eq!(
        j.frame_path(d(2025, 8, 2)),
        PathBuf::from("/tmp/frames/gpsjam/2025-08-02.png")
    );
    assert_eq!(j.dates().unwrap().len(), 3);
}

#[test]
fn selector_box_wins_over_configured_box() {
    let mut j = job();
    let configured = CropBox {
        left: 0,
        top: 0,
        width: 10,
        height: 10,
    };
    j.crop = Some(CropSpec {
        selector: Some("#map".into()),
        region: Some(configured),
    });
    let from_selector = CropBox {
        left: 5,
        top: 5,
        width: 50,
        height: 50,
    };
    assert_eq!(j.frame_transform(Some(from_selector)).crop, Some(from_selector));
    assert_eq!(j.frame_transform(None).crop, Some(configured));
    assert_eq!(j.crop_selector(), Some("#map"));
}

#[test]
fn outcome_is_write_once() {
    let mut t = DateTask::new(d(2025, 8, 1), Url::parse("https://x.org/").unwrap(), "a.png".into());
    assert!(!t.settle(TaskOutcome::Pending));
    assert!(t.settle(TaskOutcome::Skipped));
    assert!(!t.settle(TaskOutcome::Succeeded {
        path: "a.png".into()
    }));
    assert_eq!(t.outcome(), &TaskOutcome::Skipped);
    assert_eq!(t.begin_attempt(), 1);
}
