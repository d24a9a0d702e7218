use std::path::Path;

use chrono::Utc;
use tempfile::TempDir;
use tunevault_core::{SqliteTrackStore, TrackError, TrackRecord, TransferStats};

fn temp_store(dir: &Path) -> SqliteTrackStore {
    let store = SqliteTrackStore::builder()
        .path(dir.join("tracks.sqlite"))
        .create_if_missing(true)
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn sample_record(id: &str) -> TrackRecord {
    let mut record = TrackRecord::new(id, "Song Title", "Artist Name");
    record.duration_seconds = Some(245);
    record.view_count = Some(1_204_332);
    record.thumbnail_url = Some("https://img.example/hq.jpg".to_string());
    record.accent_color = Some("#c82020".to_string());
    record.checksum_sha256 = Some("ab".repeat(32));
    record.transfer = Some(TransferStats {
        transferred_bytes: 4_194_304,
        elapsed_ms: 2_100,
        bytes_per_second: 1_997_287.6,
    });
    record.updated_at = Some(Utc::now());
    record
}

#[test]
fn put_get_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    let record = sample_record("pbMwTqkKSps");
    store.put(&record).unwrap();

    let loaded = store.get("pbMwTqkKSps").unwrap().expect("record present");
    assert_eq!(loaded.title, "Song Title");
    assert_eq!(loaded.artist, "Artist Name");
    assert_eq!(loaded.duration_seconds, Some(245));
    assert_eq!(loaded.accent_color.as_deref(), Some("#c82020"));
    let transfer = loaded.transfer.expect("transfer stats");
    assert_eq!(transfer.transferred_bytes, 4_194_304);
    assert!(loaded.created_at.is_some());
}

#[test]
fn get_missing_returns_none() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    assert!(store.get("nothing-here").unwrap().is_none());
}

#[test]
fn put_is_an_upsert() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store.put(&sample_record("abc")).unwrap();
    let mut updated = sample_record("abc");
    updated.title = "Remastered".to_string();
    updated.accent_color = None;
    store.put(&updated).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    let loaded = store.get("abc").unwrap().unwrap();
    assert_eq!(loaded.title, "Remastered");
    assert!(loaded.accent_color.is_none());
}

#[test]
fn delete_and_not_found() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store.put(&sample_record("abc")).unwrap();
    store.delete("abc").unwrap();
    assert!(store.get("abc").unwrap().is_none());
    assert!(matches!(store.delete("abc"), Err(TrackError::NotFound(_))));
}

#[test]
fn list_honors_limit() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    for id in ["one", "two", "three"] {
        store.put(&sample_record(id)).unwrap();
    }
    assert_eq!(store.list(None).unwrap().len(), 3);
    assert_eq!(store.list(Some(2)).unwrap().len(), 2);
}

#[test]
fn backups_produce_files() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    store.put(&sample_record("abc")).unwrap();

    let dump_path = dir.path().join("tracks_backup.sql.gz");
    store.export_backup(&dump_path).unwrap();
    assert!(dump_path.exists());

    let copy_path = dir.path().join("tracks_copy.sqlite");
    store.backup_to(&copy_path).unwrap();
    let copy = SqliteTrackStore::new(&copy_path).unwrap();
    assert_eq!(copy.count().unwrap(), 1);
}
