use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        DatelapseError::config("x")
            .to_string()
            .contains("configuration error:")
    );
    assert!(
        DatelapseError::capture("x")
            .to_string()
            .contains("capture error:")
    );
    assert!(
        DatelapseError::ordering("x")
            .to_string()
            .contains("ordering error:")
    );
    assert!(
        DatelapseError::assembly("x")
            .to_string()
            .contains("assembly error:")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = DatelapseError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
