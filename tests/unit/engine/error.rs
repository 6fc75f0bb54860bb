use super::*;

#[test]
fn transient_classification() {
    assert!(EngineError::Navigation("dns".into()).is_transient());
    assert!(EngineError::timeout("load", Duration::from_secs(1)).is_transient());
    assert!(EngineError::Network("reset".into()).is_transient());
    assert!(EngineError::Crashed("oom".into()).is_transient());

    assert!(!EngineError::Script("syntax".into()).is_transient());
    assert!(!EngineError::NotFound("#x".into()).is_transient());
    assert!(!EngineError::Unsupported("text".into()).is_transient());
    assert!(!EngineError::Protocol("bad json".into()).is_transient());
}

#[test]
fn timeout_display_includes_millis() {
    let err = EngineError::timeout("network idle", Duration::from_millis(1500));
    assert_eq!(
        err.to_string(),
        "timed out after 1500ms waiting for network idle"
    );
}

#[test]
fn viewport_defaults_to_full_hd() {
    let vp: Viewport = serde_json::from_str(r#"{ "width": 800 }"#).unwrap();
    assert_eq!(vp.width, 800);
    assert_eq!(vp.height, 1080);
    assert_eq!(vp.device_scale_factor, 1.0);
}
