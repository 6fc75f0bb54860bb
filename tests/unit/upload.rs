use super::*;

#[tokio::test]
async fn directory_upload_mirrors_file_under_folder() {
    let src_dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let local = src_dir.path().join("gpsjam.gif");
    std::fs::write(&local, b"GIF89a").unwrap();

    let up = DirectoryUploader::new(root.path());
    let id = up.upload(&local, Some("maps/2025"), false).await.unwrap();

    assert_eq!(id, "maps/2025/gpsjam.gif");
    let dest = root.path().join("maps").join("2025").join("gpsjam.gif");
    assert_eq!(std::fs::read(&dest).unwrap(), b"GIF89a");
    assert!(!root.path().join("maps/2025/.gpsjam.gif.part").exists());
}

#[tokio::test]
async fn directory_upload_without_folder_lands_in_root() {
    let src_dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let local = src_dir.path().join("clip.mp4");
    std::fs::write(&local, b"mp4").unwrap();

    let id = DirectoryUploader::new(root.path())
        .upload(&local, None, true)
        .await
        .unwrap();
    assert_eq!(id, "clip.mp4");
    assert!(root.path().join("clip.mp4").is_file());
}

#[tokio::test]
async fn directory_upload_rejects_escaping_folder() {
    let src_dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let local = src_dir.path().join("a.gif");
    std::fs::write(&local, b"x").unwrap();

    let err = DirectoryUploader::new(root.path())
        .upload(&local, Some("../outside"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DatelapseError::Config(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn shared_uploads_are_world_readable() {
    use std::os::unix::fs::PermissionsExt as _;

    let src_dir = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let local = src_dir.path().join("a.gif");
    std::fs::write(&local, b"x").unwrap();

    let up = DirectoryUploader::new(root.path());
    up.upload(&local, Some("public"), true).await.unwrap();
    up.upload(&local, Some("private"), false).await.unwrap();

    let mode = |p: &str| {
        std::fs::metadata(root.path().join(p).join("a.gif"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    };
    assert_eq!(mode("public"), 0o644);
    assert_eq!(mode("private"), 0o600);
}
