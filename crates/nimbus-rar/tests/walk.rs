//! Walking and ranged extraction over fixture archives.

use nimbus_core::ErrorKind;
use nimbus_rar::{RarError, RarReader};
use nimbus_test_support::rar::{build_store_rar, first_payload_offset};
use nimbus_test_support::yenc::patterned_payload;

#[tokio::test]
async fn walks_entries_and_tracks_payload_offsets() {
    let nfo = b"release notes".to_vec();
    let movie = patterned_payload(64 * 1024, 3);
    let archive = build_store_rar(&[("release.nfo", &nfo), ("movie.mkv", &movie)]);

    let mut reader = RarReader::new(archive.as_slice(), None);
    let first = reader
        .next_entry()
        .await
        .expect("walk")
        .expect("first entry");
    assert_eq!(first.name, "release.nfo");
    assert_eq!(first.unpacked_size, nfo.len() as u64);
    assert!(first.is_store);
    assert_eq!(first.data_offset, first_payload_offset("release.nfo"));

    reader.skip_entry(&first).await.expect("skip");
    let second = reader
        .next_entry()
        .await
        .expect("walk")
        .expect("second entry");
    assert_eq!(second.name, "movie.mkv");
    assert_eq!(second.data_offset, reader.position());

    assert!(reader.next_entry().await.expect("walk past data").is_none());
}

#[tokio::test]
async fn copies_an_interior_range_exactly() {
    let movie = patterned_payload(256 * 1024, 9);
    let archive = build_store_rar(&[("movie.mkv", &movie)]);

    let mut reader = RarReader::new(archive.as_slice(), None);
    let entry = reader.next_entry().await.expect("walk").expect("entry");

    let start = 100_000_u64;
    let len = 50_000_u64;
    let mut sink = Vec::new();
    let copied = reader
        .copy_range(&entry, start, len, &mut sink)
        .await
        .expect("copy");
    assert_eq!(copied, len);
    let start = usize::try_from(start).expect("fits");
    let len = usize::try_from(len).expect("fits");
    assert_eq!(sink, &movie[start..start + len]);
}

#[tokio::test]
async fn range_past_the_entry_is_truncated() {
    let movie = patterned_payload(4_096, 1);
    let archive = build_store_rar(&[("movie.mkv", &movie)]);

    let mut reader = RarReader::new(archive.as_slice(), None);
    let entry = reader.next_entry().await.expect("walk").expect("entry");
    let mut sink = Vec::new();
    let err = reader
        .copy_range(&entry, 4_000, 1_000, &mut sink)
        .await
        .expect_err("range exceeds payload");
    assert_eq!(err.kind(), ErrorKind::Truncated);
}

#[tokio::test]
async fn non_rar_input_is_rejected() {
    let mut reader = RarReader::new(&b"PK\x03\x04zipzipzip"[..], None);
    let err = reader.next_entry().await.expect_err("not rar");
    assert!(matches!(err, RarError::InvalidSignature));
    assert_eq!(err.kind(), ErrorKind::InvalidArchive);
}

#[tokio::test]
async fn truncated_archive_surfaces_mid_walk() {
    let movie = patterned_payload(64 * 1024, 5);
    let mut archive = build_store_rar(&[("movie.mkv", &movie)]);
    archive.truncate(archive.len() / 2);

    let mut reader = RarReader::new(archive.as_slice(), None);
    let entry = reader.next_entry().await.expect("walk").expect("entry");
    let mut sink = Vec::new();
    let err = reader
        .copy_range(&entry, 0, entry.packed_size, &mut sink)
        .await
        .expect_err("payload is cut short");
    assert_eq!(err.kind(), ErrorKind::Truncated);
}
