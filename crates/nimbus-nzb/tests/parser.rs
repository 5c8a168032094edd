//! Parser behaviour with and without a probing client.

use std::net::SocketAddr;
use std::sync::Arc;

use nimbus_nntp::{Client, ProviderSettings};
use nimbus_nzb::{NzbParser, NzbStatus, compute_id};
use nimbus_test_support::nntp::{StubArticle, StubNntpServer};
use nimbus_test_support::nzb::{NzbFixtureFile, build_nzb};
use nimbus_test_support::rar::{build_store_rar, first_payload_offset};
use nimbus_test_support::yenc::{encode_part, patterned_payload};

fn settings_for(addr: SocketAddr) -> ProviderSettings {
    ProviderSettings {
        name: "stub".to_owned(),
        address: addr.ip().to_string(),
        port: addr.port(),
        ssl: false,
        use_tls: false,
        username: String::new(),
        password: String::new(),
        max_connections: 4,
    }
}

async fn client_for(server: &StubNntpServer) -> Arc<Client> {
    Arc::new(
        Client::connect(vec![settings_for(server.addr())])
            .await
            .expect("client"),
    )
}

#[tokio::test]
async fn estimation_parse_groups_rar_sets_and_drops_noise() {
    let xml = build_nzb(
        Some("My Show S01"),
        None,
        &[
            NzbFixtureFile::simple("release.part01.rar", &[10_000, 10_000]),
            NzbFixtureFile::simple("release.part02.rar", &[10_000, 5_000]),
            NzbFixtureFile::simple("release.par2", &[2_000]),
            NzbFixtureFile::simple("release.nfo", &[500]),
        ],
    );

    let parser = NzbParser::new(None);
    let nzb = parser.parse(&xml, "My Show S01.nzb", "sonarr").await.expect("parse");

    assert_eq!(nzb.name, "My Show S01");
    assert_eq!(nzb.category, "sonarr");
    assert_eq!(nzb.status, NzbStatus::Parsed);
    assert_eq!(nzb.files.len(), 1, "par2 and nfo must be dropped");

    let file = &nzb.files[0];
    assert!(file.is_rar_archive);
    assert_eq!(file.start_offset, 0, "no probe, no inner offset");
    assert_eq!(file.segments.len(), 4);

    // Estimated offsets are contiguous and start at zero.
    assert_eq!(file.segments[0].start_offset, 0);
    for window in file.segments.windows(2) {
        assert_eq!(window[0].end_offset, window[1].start_offset);
    }
    assert_eq!(file.segments.last().expect("segments").end_offset, file.size);

    // 96.8 % density estimate over 35 000 wire bytes.
    let expected = (35_000_f64 * 0.968) as u64;
    assert!(file.size.abs_diff(expected) <= 4);
}

#[tokio::test]
async fn id_matches_the_sha256_prefix_and_is_idempotent() {
    let xml = build_nzb(None, None, &[NzbFixtureFile::simple("episode.mkv", &[1_000])]);
    let parser = NzbParser::new(None);

    let first = parser.parse(&xml, "My Show S01.nzb", "sonarr").await.expect("parse");
    let second = parser.parse(&xml, "My Show S01.nzb", "sonarr").await.expect("parse");
    assert_eq!(first.id, second.id);
    assert_eq!(
        first.id,
        compute_id("My Show S01", first.total_size, "sonarr", "")
    );
}

#[tokio::test]
async fn media_probe_learns_chunk_size_and_exact_offsets() {
    let server = StubNntpServer::start().await;

    // Two raw files of the same logical show: 800 B then 500 B, 400 B parts.
    let first_part = patterned_payload(400, 1);
    let last_part = patterned_payload(400, 2);
    server
        .add_article(
            "<show.mkv.1@fixture>",
            StubArticle::with_body(encode_part("show.mkv", 1, 2, 800, 1, &first_part)),
        )
        .await;
    server
        .add_article(
            "<show2.mkv.1@fixture>",
            StubArticle::with_body(encode_part("show.mkv", 1, 2, 500, 1, &last_part)),
        )
        .await;

    let files = vec![
        NzbFixtureFile {
            subject: "post [1/2] - \"show.mkv\" yEnc (1/2)".to_owned(),
            groups: vec!["alt.binaries.test".to_owned()],
            segments: vec![
                (1, 413, "show.mkv.1@fixture".to_owned()),
                (2, 413, "show.mkv.2@fixture".to_owned()),
            ],
        },
        NzbFixtureFile {
            subject: "post [2/2] - \"show.mkv\" yEnc (1/2)".to_owned(),
            groups: vec!["alt.binaries.test".to_owned()],
            segments: vec![
                (1, 413, "show2.mkv.1@fixture".to_owned()),
                (2, 103, "show2.mkv.2@fixture".to_owned()),
            ],
        },
    ];
    let xml = build_nzb(Some("Show"), None, &files);

    let client = client_for(&server).await;
    let parser = NzbParser::new(Some(client));
    let nzb = parser.parse(&xml, "Show.nzb", "sonarr").await.expect("parse");

    assert_eq!(nzb.files.len(), 1);
    let file = &nzb.files[0];
    assert!(!file.is_rar_archive);
    assert_eq!(file.segment_size, 400, "chunk size from the first =ypart");
    assert_eq!(file.size, 800 + 500, "(n-1) * first + last");

    let offsets: Vec<(u64, u64)> = file
        .segments
        .iter()
        .map(|segment| (segment.start_offset, segment.end_offset))
        .collect();
    assert_eq!(offsets, vec![(0, 400), (400, 800), (800, 1_200), (1_200, 1_300)]);
}

#[tokio::test]
async fn unknown_files_classify_by_content_magic() {
    let server = StubNntpServer::start().await;

    // EBML magic marks the payload as Matroska despite the opaque name.
    let mut payload = b"\x1A\x45\xDF\xA3".to_vec();
    payload.extend_from_slice(&patterned_payload(1_000, 4));
    server
        .add_article(
            "<obfuscated.1@fixture>",
            StubArticle::with_body(encode_part("abc123xyz.bin", 1, 1, 1_004, 1, &payload)),
        )
        .await;

    let files = vec![NzbFixtureFile {
        subject: "post [1/1] - \"abc123xyz.bin\" yEnc (1/1)".to_owned(),
        groups: vec!["alt.binaries.test".to_owned()],
        segments: vec![(1, 1_040, "obfuscated.1@fixture".to_owned())],
    }];
    let xml = build_nzb(Some("Obfuscated"), None, &files);

    let client = client_for(&server).await;
    let parser = NzbParser::new(Some(client));
    let nzb = parser.parse(&xml, "Obfuscated.nzb", "radarr").await.expect("parse");

    assert_eq!(nzb.files.len(), 1);
    assert!(!nzb.files[0].is_rar_archive, "magic says media, not rar");
}

#[tokio::test]
async fn rar_probe_finds_the_inner_payload_offset() {
    let server = StubNntpServer::start().await;

    let movie = patterned_payload(200 * 1024, 8);
    let archive = build_store_rar(&[("movie.mkv", &movie)]);

    // Split the archive into 50 KiB posts.
    let chunk = 50 * 1024;
    let mut fixture = NzbFixtureFile {
        subject: "post [1/1] - \"release.rar\" yEnc (1/5)".to_owned(),
        groups: vec!["alt.binaries.test".to_owned()],
        segments: Vec::new(),
    };
    for (index, part) in archive.chunks(chunk).enumerate() {
        let number = u32::try_from(index + 1).expect("few parts");
        let message_id = format!("release.rar.{number}@fixture");
        let begin = u64::try_from(index * chunk).expect("offset") + 1;
        let body = encode_part(
            "release.rar",
            u64::from(number),
            u64::try_from(archive.chunks(chunk).count()).expect("count"),
            u64::try_from(archive.len()).expect("len"),
            begin,
            part,
        );
        fixture.segments.push((
            number,
            u64::try_from(body.len()).expect("len"),
            message_id.clone(),
        ));
        server
            .add_article(&format!("<{message_id}>"), StubArticle::with_body(body))
            .await;
    }
    let xml = build_nzb(Some("Release"), None, &[fixture]);

    let client = client_for(&server).await;
    let parser = NzbParser::new(Some(client));
    let nzb = parser.parse(&xml, "Release.nzb", "radarr").await.expect("parse");

    assert_eq!(nzb.files.len(), 1);
    let file = &nzb.files[0];
    assert!(file.is_rar_archive);
    assert_eq!(file.name, "movie.mkv", "inner name becomes the logical name");
    assert_eq!(file.size, movie.len() as u64);
    assert_eq!(file.start_offset, first_payload_offset("movie.mkv"));
}
