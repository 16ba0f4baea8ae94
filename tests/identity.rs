use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use keiba_terminal::identity::DeviceToken;

fn scratch_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("keiba_terminal_{tag}_{}_{nanos}", std::process::id()))
}

#[test]
fn token_is_created_once_and_reused() {
    let dir = scratch_dir("reuse");
    let path = dir.join("nested").join("token");

    let first = DeviceToken::load_or_create(&path).expect("token created");
    assert_eq!(first.as_str().len(), 21);
    assert!(first.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    assert!(path.exists());

    let second = DeviceToken::load_or_create(&path).expect("token loaded");
    assert_eq!(first, second);

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn existing_token_is_trimmed() {
    let dir = scratch_dir("trim");
    fs::create_dir_all(&dir).expect("scratch dir");
    let path = dir.join("token");
    fs::write(&path, "  abc123\n").expect("seed token");

    let token = DeviceToken::load_or_create(&path).expect("token loaded");
    assert_eq!(token.as_str(), "abc123");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn blank_token_file_is_replaced() {
    let dir = scratch_dir("blank");
    fs::create_dir_all(&dir).expect("scratch dir");
    let path = dir.join("token");
    fs::write(&path, "\n").expect("seed token");

    let token = DeviceToken::load_or_create(&path).expect("token created");
    assert_eq!(token.as_str().len(), 21);
    let stored = fs::read_to_string(&path).expect("token persisted");
    assert_eq!(stored, token.as_str());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn debug_output_hides_token() {
    let token = DeviceToken::generate();
    let shown = format!("{token:?}");
    assert!(!shown.contains(token.as_str()));
}
