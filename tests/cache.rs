use std::fs;
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::json;

use usi_resolver::cache::{ResolutionCache, digest};

fn open(temp: &tempfile::TempDir) -> ResolutionCache {
    let root = Utf8PathBuf::from_path_buf(temp.path().join("usi-cache")).unwrap();
    ResolutionCache::open(root).unwrap()
}

#[test]
fn entries_are_named_by_key_digest() {
    let temp = tempfile::tempdir().unwrap();
    let cache = open(&temp);
    let key = "mzspec:MASSBANK::accession:SM858102";
    cache.put(key, &json!({"precursor_mz": 301.1})).unwrap();

    let path = cache.root().join("entries").join(format!("{}.json", digest(key)));
    assert_eq!(cache.entry_path(key), path);
    let stored: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(stored["key"], key);
    assert_eq!(stored["value"]["precursor_mz"], 301.1);
}

#[test]
fn entry_for_a_different_key_is_ignored() {
    let temp = tempfile::tempdir().unwrap();
    let cache = open(&temp);
    let path = cache.entry_path("mine");
    fs::write(
        path.as_std_path(),
        json!({"key": "someone-else", "value": 1}).to_string(),
    )
    .unwrap();
    assert_eq!(cache.get("mine").unwrap(), None);
}

#[test]
fn unreadable_entry_is_a_miss() {
    let temp = tempfile::tempdir().unwrap();
    let cache = open(&temp);
    fs::write(cache.entry_path("k").as_std_path(), b"{not json").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
}

#[test]
fn first_writer_wins_across_instances() {
    let temp = tempfile::tempdir().unwrap();
    let first = open(&temp);
    let second = open(&temp);
    first.put("k", &json!("first")).unwrap();
    second.put("k", &json!("second")).unwrap();
    assert_eq!(second.get("k").unwrap(), Some(json!("first")));
}

#[test]
fn stale_lock_is_reclaimed() {
    let temp = tempfile::tempdir().unwrap();
    let cache = open(&temp);
    let held = cache.try_lock("k", Duration::from_secs(60)).unwrap().unwrap();
    let lock_file = held.path().to_path_buf();
    std::mem::forget(held);

    assert!(cache.try_lock("k", Duration::from_secs(60)).unwrap().is_none());
    thread::sleep(Duration::from_millis(50));
    let reclaimed = cache.try_lock("k", Duration::from_millis(10)).unwrap();
    assert!(reclaimed.is_some());
    drop(reclaimed);
    assert!(!lock_file.exists());
}
