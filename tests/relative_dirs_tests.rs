#![cfg(unix)]
//! Runs in its own test binary because it changes the process working directory.

use audiobook_dl_web::config::CONFIG_FILE_NAME;
use audiobook_dl_web::{DownloadManager, DownloadOptions, DownloadStatus};
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn relative_directories_resolve_against_the_launch_directory() {
    let dir = TempDir::new().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();

    // Fails the download unless --config points at the real config file.
    let script = dir.path().join("abdl.sh");
    std::fs::write(
        &script,
        r#"#!/bin/sh
[ -f "$2" ] || { echo "ERROR: missing config $2" >&2; exit 1; }
out="$4"
mkdir -p "$(dirname "$out")"
printf 'audio' > "$out.m4b"
echo "Saved to: $out.m4b"
"#,
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    std::fs::create_dir_all("config").unwrap();
    std::fs::write(std::path::Path::new("config").join(CONFIG_FILE_NAME), "").unwrap();

    let manager = DownloadManager::new("./config", "./downloads")
        .unwrap()
        .with_downloader_program(script.to_string_lossy().into_owned());
    assert!(manager.downloads_dir().is_absolute());

    let options = DownloadOptions {
        output_template: Some("Book".to_string()),
        ..Default::default()
    };
    let task = manager
        .add_download("https://www.storytel.com/books/1", options)
        .await
        .unwrap();

    let mut finished = None;
    for _ in 0..500 {
        let snapshot = manager.get_task(&task.task_id).await.unwrap();
        if snapshot.status.is_terminal() {
            finished = Some(snapshot);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let task = finished.expect("download did not finish");

    assert_eq!(task.status, DownloadStatus::Completed, "{:?}", task.error);
    assert_eq!(task.output_file.as_deref(), Some("Book.m4b"));
    assert!(dir.path().join("downloads/Book.m4b").exists());
    assert!(!dir.path().join("downloads/downloads").exists());
}
