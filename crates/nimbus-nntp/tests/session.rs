//! End-to-end NNTP session tests against the in-process stub server.

use std::net::SocketAddr;
use std::time::Duration;

use nimbus_core::ErrorKind;
use nimbus_nntp::{Client, Connection, NntpError, Pool, ProviderSettings};
use nimbus_test_support::nntp::{StubArticle, StubNntpServer};
use nimbus_test_support::yenc::{encode_single, patterned_payload};

fn settings_for(addr: SocketAddr, max_connections: usize) -> ProviderSettings {
    ProviderSettings {
        name: "stub".to_owned(),
        address: addr.ip().to_string(),
        port: addr.port(),
        ssl: false,
        use_tls: false,
        username: String::new(),
        password: String::new(),
        max_connections,
    }
}

#[tokio::test]
async fn authenticated_article_round_trip() {
    let server = StubNntpServer::start().await;
    server.require_auth("u", "p").await;
    server
        .add_article(
            "<mid@example>",
            StubArticle {
                headers: vec!["Subject: X".to_owned(), "From: a".to_owned()],
                body: b"body1\r\nbody2\r\n".to_vec(),
            },
        )
        .await;

    let mut settings = settings_for(server.addr(), 1);
    settings.username = "u".to_owned();
    settings.password = "p".to_owned();

    let mut connection = Connection::connect(&settings).await.expect("connect");
    let article = connection.get_article("mid@example").await.expect("article");
    assert_eq!(article.message_id, "<mid@example>");
    assert_eq!(article.subject, "X");
    assert_eq!(article.from, "a");
    assert_eq!(article.body, "body1\nbody2");
}

#[tokio::test]
async fn wrong_password_is_an_auth_error() {
    let server = StubNntpServer::start().await;
    server.require_auth("u", "p").await;

    let mut settings = settings_for(server.addr(), 1);
    settings.username = "u".to_owned();
    settings.password = "wrong".to_owned();

    let err = Connection::connect(&settings).await.expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(!err.retryable());
}

#[tokio::test]
async fn missing_article_maps_to_article_not_found() {
    let server = StubNntpServer::start().await;
    let settings = settings_for(server.addr(), 1);

    let mut connection = Connection::connect(&settings).await.expect("connect");
    let err = connection
        .get_body("gone@example")
        .await
        .expect_err("article is missing");
    assert_eq!(err.kind(), ErrorKind::ArticleNotFound);
    assert!(!err.retryable());
    assert!(matches!(
        err,
        NntpError::UnexpectedStatus { code: 430, .. }
    ));
}

#[tokio::test]
async fn body_preserves_crlf_framing_and_dot_unstuffing() {
    let server = StubNntpServer::start().await;
    server
        .add_article(
            "<dots@example>",
            StubArticle::with_body(b".leading dot\r\nplain\r\n".to_vec()),
        )
        .await;

    let settings = settings_for(server.addr(), 1);
    let mut connection = Connection::connect(&settings).await.expect("connect");
    let body = connection.get_body("dots@example").await.expect("body");
    assert_eq!(body, b".leading dot\r\nplain\r\n");
}

#[tokio::test]
async fn segments_decode_through_the_connection() {
    let server = StubNntpServer::start().await;
    let payload = patterned_payload(4_096, 7);
    server
        .add_article(
            "<seg1@example>",
            StubArticle::with_body(encode_single("movie.mkv", &payload)),
        )
        .await;

    let settings = settings_for(server.addr(), 1);
    let mut connection = Connection::connect(&settings).await.expect("connect");
    let decoded = connection
        .get_segment(Some("alt.binaries.test"), "seg1@example")
        .await
        .expect("segment");
    assert_eq!(decoded.header.name, "movie.mkv");
    assert_eq!(decoded.data, payload);
}

#[tokio::test]
async fn pool_replaces_connections_and_tracks_counters() {
    let server = StubNntpServer::start().await;
    let pool = Pool::connect(settings_for(server.addr(), 2))
        .await
        .expect("pool");
    assert_eq!(pool.total(), 2);
    assert!(pool.is_free());

    let first = pool.get(Duration::from_secs(2)).await.expect("checkout");
    assert_eq!(pool.active(), 1);
    pool.put(first).await;
    assert_eq!(pool.active(), 0);

    pool.close().await;
    let err = pool.get(Duration::from_millis(100)).await.expect_err("closed");
    assert!(matches!(err, NntpError::PoolClosed));
}

#[tokio::test]
async fn client_falls_through_to_the_next_provider() {
    let primary = StubNntpServer::start().await;
    let secondary = StubNntpServer::start().await;

    let mut first = settings_for(primary.addr(), 1);
    first.name = "primary".to_owned();
    let mut second = settings_for(secondary.addr(), 1);
    second.name = "secondary".to_owned();

    let client = Client::connect(vec![first, second]).await.expect("client");
    assert_eq!(client.provider_count(), 2);
    assert_eq!(client.minimum_max_conns(), 1);

    // Occupy the primary; the next checkout must come from the secondary.
    let held = client.get_connection().await.expect("first checkout");
    assert_eq!(held.provider(), "primary");
    let fallback = client.get_connection().await.expect("second checkout");
    assert_eq!(fallback.provider(), "secondary");
    drop(fallback);
    drop(held);

    client.close().await;
}

#[tokio::test]
async fn client_surfaces_when_every_provider_is_down() {
    let server = StubNntpServer::start().await;
    let addr = server.addr();
    drop(server);

    let err = Client::connect(vec![settings_for(addr, 1)])
        .await
        .expect_err("no provider reachable");
    assert!(err.kind().retryable() || err.kind() == ErrorKind::Connection);
}
