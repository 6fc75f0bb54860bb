use super::*;

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

fn names(seq: &OrderedSequence) -> Vec<&str> {
    seq.frames.iter().map(|f| f.file_name.as_str()).collect()
}

#[test]
fn natural_puts_2_before_10() {
    let seq = order(&paths(&["10.jpg", "2.jpg", "1.jpg"]), OrderStrategy::Natural, None).unwrap();
    assert_eq!(names(&seq), ["1.jpg", "2.jpg", "10.jpg"]);
}

#[test]
fn natural_is_case_folded_and_mixed() {
    let seq = order(
        &paths(&["img10.png", "IMG2.png", "img1.png", "a.png"]),
        OrderStrategy::Natural,
        None,
    )
    .unwrap();
    assert_eq!(names(&seq), ["a.png", "img1.png", "IMG2.png", "img10.png"]);
}

#[test]
fn date_orders_by_parsed_date_not_listing_order() {
    let seq = order(
        &paths(&["2025-08-02.png", "2025-08-01.png", "2025-08-10.png"]),
        OrderStrategy::Date,
        None,
    )
    .unwrap();
    assert_eq!(names(&seq), ["2025-08-01.png", "2025-08-02.png", "2025-08-10.png"]);
    assert_eq!(seq.strategy, OrderStrategy::Date);
}

#[test]
fn date_strategy_fails_on_undated_file() {
    let err = order(&paths(&["2025-08-01.png", "cover.png"]), OrderStrategy::Date, None)
        .unwrap_err();
    assert!(err.to_string().starts_with("ordering error:"));
    assert!(err.to_string().contains("cover.png"));
}

#[test]
fn auto_prefers_date_and_falls_back_to_natural() {
    let dated = order(
        &paths(&["shot_2025_01_10.png", "shot_2025_01_02.png"]),
        OrderStrategy::Auto,
        None,
    )
    .unwrap();
    assert_eq!(dated.strategy, OrderStrategy::Date);
    assert_eq!(names(&dated), ["shot_2025_01_02.png", "shot_2025_01_10.png"]);

    let mixed = order(&paths(&["2025-01-10.png", "img2.png"]), OrderStrategy::Auto, None).unwrap();
    assert_eq!(mixed.strategy, OrderStrategy::Natural);
}

#[test]
fn unsupported_extensions_are_excluded_and_recorded() {
    let seq = order(
        &paths(&["b.png", "notes.txt", "a.JPG", "clip.gif"]),
        OrderStrategy::Natural,
        None,
    )
    .unwrap();
    assert_eq!(names(&seq), ["a.JPG", "b.png"]);
    assert_eq!(seq.excluded, paths(&["notes.txt", "clip.gif"]));
}

#[test]
fn explicit_requires_list_and_existing_files() {
    let err = order(&[], OrderStrategy::Explicit, None).unwrap_err();
    assert!(err.to_string().starts_with("configuration error:"));

    let dir = tempfile::tempdir().unwrap();
    let c = dir.path().join("c.png");
    let a = dir.path().join("a.png");
    std::fs::write(&c, b"x").unwrap();
    std::fs::write(&a, b"x").unwrap();

    let list = vec![c.clone(), a.clone()];
    let seq = order(&[], OrderStrategy::Explicit, Some(&list)).unwrap();
    assert_eq!(seq.paths().collect::<Vec<_>>(), [c.as_path(), a.as_path()]);

    let missing = vec![c, dir.path().join("gone.png")];
    let err = order(&[], OrderStrategy::Explicit, Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("gone.png"));

    let wrong_ext = vec![dir.path().join("a.tiff")];
    assert!(order(&[], OrderStrategy::Explicit, Some(&wrong_ext)).is_err());
}

#[test]
fn detect_date_variants() {
    let d = NaiveDate::from_ymd_opt(2025, 8, 1);
    assert_eq!(detect_date("2025-08-01.png"), d);
    assert_eq!(detect_date("gpsjam_2025_08_01.png"), d);
    assert_eq!(detect_date("IMG_20250801_1200.jpg"), d);
    assert_eq!(detect_date("2025-13-01.png"), None);
    assert_eq!(detect_date("2025-08_01.png"), None);
    assert_eq!(detect_date("frame12.png"), None);
}

#[test]
fn natural_cmp_handles_leading_zeros_and_huge_numbers() {
    assert_eq!(natural_cmp("007", "7"), Ordering::Equal);
    assert_eq!(
        natural_cmp("99999999999999999999999", "100000000000000000000000"),
        Ordering::Less
    );
    assert_eq!(natural_cmp("a", "a1"), Ordering::Less);
}

#[test]
fn strategy_parse_rejects_unknown() {
    assert_eq!("Natural".parse::<OrderStrategy>().unwrap(), OrderStrategy::Natural);
    assert!("random".parse::<OrderStrategy>().is_err());
}

#[test]
fn scan_dir_lists_files_only() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.png"), b"x").unwrap();
    std::fs::write(dir.path().join("a.png"), b"x").unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    let files = scan_dir(dir.path()).unwrap();
    assert_eq!(files, vec![dir.path().join("a.png"), dir.path().join("b.png")]);
}
