//! Store persistence, queue rollback, and listing behaviour.

use chrono::{TimeZone, Utc};
use nimbus_nzb::{Nzb, NzbFile, NzbStatus, compute_id};
use nimbus_store::UsenetStore;

fn sample_nzb(name: &str, category: &str, minute: u32) -> Nzb {
    let id = compute_id(name, 1_000, category, "");
    Nzb {
        id: id.clone(),
        name: name.to_owned(),
        title: String::new(),
        category: category.to_owned(),
        password: String::new(),
        total_size: 1_000,
        added_on: Utc.with_ymd_and_hms(2026, 7, 1, 12, minute, 0).single().expect("timestamp"),
        status: NzbStatus::Parsed,
        completed_on: None,
        progress: 0,
        downloaded: false,
        storage: String::new(),
        files: vec![NzbFile {
            nzb_id: id,
            name: format!("{name}.mkv"),
            size: 1_000,
            segment_size: 0,
            start_offset: 0,
            is_rar_archive: false,
            password: String::new(),
            groups: vec!["alt.binaries.test".to_owned()],
            segments: Vec::new(),
            deleted: false,
        }],
        is_bad: false,
    }
}

#[tokio::test]
async fn add_persists_and_reload_rebuilds_indices() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);

    let nzb = sample_nzb("Alpha Show", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");

    let path = dir.path().join("sonarr").join(format!("{}.json", nzb.id));
    assert!(path.exists(), "document must be on disk");

    // A fresh store instance over the same root sees the record.
    let reloaded = UsenetStore::new(dir.path().to_path_buf(), None);
    assert_eq!(reloaded.load().await.expect("load"), 1);
    let by_name = reloaded.get_by_name("Alpha Show").await.expect("indexed");
    assert_eq!(by_name.id, nzb.id);
    assert_eq!(reloaded.listing_all().await.len(), 1);
}

#[tokio::test]
async fn listings_sort_by_name_then_added_on() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);

    store.add(sample_nzb("Beta", "sonarr", 1)).await.expect("add");
    store.add(sample_nzb("Alpha", "sonarr", 2)).await.expect("add");
    let listing = store.listing_all().await;
    let names: Vec<&str> = listing.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
}

#[tokio::test]
async fn completed_status_stamps_time_and_progress() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Show", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");

    store
        .update_status(&nzb.id, NzbStatus::Completed)
        .await
        .expect("update");
    let updated = store.get(&nzb.id).await.expect("present");
    assert_eq!(updated.status, NzbStatus::Completed);
    assert_eq!(updated.progress, 100);
    assert!(updated.completed_on.is_some());
    assert!(updated.downloaded);
}

#[tokio::test]
async fn failed_status_deletes_the_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Doomed", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");

    store
        .update_status(&nzb.id, NzbStatus::Failed)
        .await
        .expect("update");
    assert!(store.get(&nzb.id).await.is_none());
    let trashed = dir.path().join("trash").join(format!("{}.json", nzb.id));
    assert!(trashed.exists(), "failed records land in trash");
}

#[tokio::test]
async fn mark_as_completed_moves_queue_to_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Queued Show", "sonarr", 0);

    store.enqueue(nzb.clone()).await;
    assert_eq!(store.queue_snapshot().await.len(), 1);

    store
        .mark_as_completed(&nzb.id, "/mnt/media/Queued Show")
        .await
        .expect("complete");

    assert!(store.queue_snapshot().await.is_empty());
    let stored = store.get(&nzb.id).await.expect("persisted");
    assert_eq!(stored.status, NzbStatus::Completed);
    assert_eq!(stored.storage, "/mnt/media/Queued Show");
}

#[tokio::test]
async fn mark_as_completed_rolls_back_on_persist_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Unwritable", "sonarr", 0);
    store.enqueue(nzb.clone()).await;

    // Occupy the record path with a directory so the write must fail.
    let record_path = dir.path().join("sonarr").join(format!("{}.json", nzb.id));
    std::fs::create_dir_all(&record_path).expect("collision dir");

    let err = store
        .mark_as_completed(&nzb.id, "/mnt/media/x")
        .await
        .expect_err("write must fail");
    let _ = err;

    // Rollback: the queue still owns the download, untouched.
    let queue = store.queue_snapshot().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, nzb.id);
    assert_eq!(queue[0].status, NzbStatus::Queued);
    assert!(store.get(&nzb.id).await.is_none());
}

#[tokio::test]
async fn remove_file_hides_without_deleting_the_record() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Show", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");

    store
        .remove_file(&nzb.id, "Show.mkv")
        .await
        .expect("remove file");
    let updated = store.get(&nzb.id).await.expect("present");
    assert!(updated.files[0].deleted);
    assert!(updated.file("Show.mkv").is_none(), "deleted files are hidden");
}

#[tokio::test]
async fn atomic_delete_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Gone", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");

    store.atomic_delete(&nzb.id).await.expect("first delete");
    assert!(store.get(&nzb.id).await.is_none());
    assert!(store.get_by_name("Gone").await.is_none());

    // Second delete of the same id is a no-op.
    store.atomic_delete(&nzb.id).await.expect("second delete");
}

#[tokio::test]
async fn filter_scans_by_status_with_a_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    for index in 0..5_u32 {
        let mut nzb = sample_nzb(&format!("Show {index}"), "sonarr", index);
        if index % 2 == 0 {
            nzb.status = NzbStatus::Completed;
        }
        store.add(nzb).await.expect("add");
    }

    let completed = store
        .filter("sonarr", 10, &[NzbStatus::Completed])
        .await;
    assert_eq!(completed.len(), 3);

    let limited = store.filter("sonarr", 2, &[NzbStatus::Completed]).await;
    assert_eq!(limited.len(), 2);

    let any = store.filter("sonarr", 10, &[]).await;
    assert_eq!(any.len(), 5);
}

#[tokio::test]
async fn bad_records_surface_in_the_bad_listing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = UsenetStore::new(dir.path().to_path_buf(), None);
    let nzb = sample_nzb("Broken", "sonarr", 0);
    store.add(nzb.clone()).await.expect("add");
    assert!(store.listing_bad().await.is_empty());

    store.mark_bad(&nzb.id).await.expect("mark bad");
    let bad = store.listing_bad().await;
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].name, "Broken");
}
