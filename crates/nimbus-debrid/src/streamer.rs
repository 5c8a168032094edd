//! Upstream HTTP range streaming with relink-on-failure.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{DebridError, DebridResult, InvalidReason};
use crate::model::DownloadLink;

/// Relink attempts (fresh link from the supplier) before giving up.
const MAX_LINK_RETRIES: usize = 10;
/// Transient upstream retries on the same link.
const MAX_NETWORK_RETRIES: usize = 5;
/// Connection-level retries before an attempt counts as failed.
const CONNECT_RETRIES: usize = 3;

/// A resolved link handed out by the supplier.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    /// The direct download URL to fetch.
    pub url: String,
    /// The full link record, for invalidation bookkeeping.
    pub record: DownloadLink,
}

/// Source of fresh download links during a stream.
///
/// The torrent cache implements this; the streamer never talks to the
/// cache types directly so it can be tested with a bare closure-backed
/// supplier.
#[async_trait]
pub trait LinkSupplier: Send + Sync {
    /// Produce a usable direct link, resolving or re-resolving as needed.
    async fn fresh_link(&self) -> DebridResult<ResolvedLink>;

    /// Record that a link failed with the given reason.
    async fn mark_invalid(&self, link: &DownloadLink, reason: InvalidReason);
}

/// Outcome of a successful upstream request.
pub struct StreamDisposition {
    /// The upstream response, positioned at the body start.
    pub response: reqwest::Response,
    /// The link that served it, for later invalidation.
    pub link: DownloadLink,
}

/// Proxies ranged GETs against provider download URLs.
pub struct DebridStreamer {
    http: reqwest::Client,
}

impl DebridStreamer {
    /// Construct a streamer with its own connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Open an upstream response for `[start, end]`; `end == 0` requests an
    /// open-ended range.
    ///
    /// 404 invalidates the link as `link_not_found` and asks the supplier
    /// for a fresh one; a 503 whose body mentions bandwidth or traffic
    /// invalidates as `bandwidth_exceeded` (which disables the issuing
    /// account); other 503/429/5xx answers retry on the same link with
    /// jittered backoff.
    ///
    /// # Errors
    ///
    /// Non-retryable 4xx answers are fatal; retry exhaustion surfaces the
    /// last classified error.
    pub async fn open(
        &self,
        start: u64,
        end: u64,
        supplier: &dyn LinkSupplier,
    ) -> DebridResult<StreamDisposition> {
        let range_header = if end == 0 {
            format!("bytes={start}-")
        } else {
            format!("bytes={start}-{end}")
        };

        let mut link_retries = 0_usize;
        let mut network_retries = 0_usize;
        let mut attempt = 0_usize;
        let mut resolved = supplier.fresh_link().await?;

        loop {
            attempt += 1;
            let response = match self.send_with_connect_retries(&resolved.url, &range_header).await
            {
                Ok(response) => response,
                Err(err) => return Err(err),
            };
            let status = response.status().as_u16();

            match status {
                200 | 206 => {
                    return Ok(StreamDisposition {
                        response,
                        link: resolved.record,
                    });
                }
                404 => {
                    link_retries += 1;
                    if link_retries > MAX_LINK_RETRIES {
                        return Err(DebridError::Api {
                            status,
                            message: "link retries exhausted".to_owned(),
                        });
                    }
                    debug!(attempt, "upstream 404; relinking");
                    supplier
                        .mark_invalid(&resolved.record, InvalidReason::LinkNotFound)
                        .await;
                    resolved = supplier.fresh_link().await?;
                }
                503 | 429 => {
                    let body = response.text().await.unwrap_or_default();
                    if status == 503 && (body.contains("bandwidth") || body.contains("traffic")) {
                        link_retries += 1;
                        if link_retries > MAX_LINK_RETRIES {
                            return Err(DebridError::TrafficExceeded);
                        }
                        warn!(attempt, "upstream reports exhausted bandwidth; relinking");
                        supplier
                            .mark_invalid(&resolved.record, InvalidReason::BandwidthExceeded)
                            .await;
                        resolved = supplier.fresh_link().await?;
                    } else {
                        network_retries += 1;
                        if network_retries > MAX_NETWORK_RETRIES {
                            return Err(DebridError::Api {
                                status,
                                message: body,
                            });
                        }
                    }
                    tokio::time::sleep(backoff_for(attempt)).await;
                }
                500.. => {
                    network_retries += 1;
                    if network_retries > MAX_NETWORK_RETRIES {
                        return Err(DebridError::Api {
                            status,
                            message: "upstream retries exhausted".to_owned(),
                        });
                    }
                    tokio::time::sleep(backoff_for(attempt)).await;
                }
                _ => {
                    return Err(DebridError::Api {
                        status,
                        message: "fatal upstream status".to_owned(),
                    });
                }
            }
        }
    }

    /// One GET with short retries on connection-level failures.
    async fn send_with_connect_retries(
        &self,
        url: &str,
        range_header: &str,
    ) -> DebridResult<reqwest::Response> {
        let mut last = None;
        for attempt in 1..=CONNECT_RETRIES {
            match self
                .http
                .get(url)
                .header(reqwest::header::RANGE, range_header)
                .send()
                .await
            {
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() || err.is_timeout() || err.is_request() => {
                    debug!(attempt, error = %err, "upstream connection failed");
                    last = Some(err);
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(err) => return Err(DebridError::Http { source: err }),
            }
        }
        Err(DebridError::Http {
            source: last.expect("at least one attempt"),
        })
    }
}

impl Default for DebridStreamer {
    fn default() -> Self {
        Self::new()
    }
}

/// `(attempt + 1) s` plus up to a second of uniform jitter.
fn backoff_for(attempt: usize) -> Duration {
    let jitter_ms = rand::rng().random_range(0..1_000);
    Duration::from_secs(attempt as u64 + 1) + Duration::from_millis(jitter_ms)
}

/// Whether an IO failure during body copy means the client went away.
#[must_use]
#[allow(dead_code, unreachable_pub)]
pub fn is_client_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    struct ScriptedSupplier {
        issued: AtomicUsize,
        urls: Vec<String>,
        invalidated: Mutex<Vec<InvalidReason>>,
    }

    #[async_trait]
    impl LinkSupplier for ScriptedSupplier {
        async fn fresh_link(&self) -> DebridResult<ResolvedLink> {
            let index = self.issued.fetch_add(1, Ordering::SeqCst);
            let url = self.urls[index.min(self.urls.len() - 1)].clone();
            Ok(ResolvedLink {
                url: url.clone(),
                record: DownloadLink {
                    id: format!("dl{index}"),
                    token: String::new(),
                    link: "https://restricted/a".into(),
                    download_link: url,
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                    account_id: 0,
                },
            })
        }

        async fn mark_invalid(&self, _link: &DownloadLink, reason: InvalidReason) {
            self.invalidated.lock().expect("lock").push(reason);
        }
    }

    /// Minimal HTTP server answering each connection with one scripted
    /// status line.
    async fn scripted_http(responses: Vec<&'static str>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let payload = response.to_owned();
                tokio::spawn(async move {
                    let mut buf = [0_u8; 4096];
                    use tokio::io::AsyncReadExt;
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(payload.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn relinks_after_404_and_serves_the_fresh_link() {
        let dead = scripted_http(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        ])
        .await;
        let live = scripted_http(vec![
            "HTTP/1.1 206 Partial Content\r\nContent-Length: 5\r\nContent-Range: bytes 0-4/10\r\n\r\nhello",
        ])
        .await;

        let supplier = ScriptedSupplier {
            issued: AtomicUsize::new(0),
            urls: vec![format!("http://{dead}/f"), format!("http://{live}/f")],
            invalidated: Mutex::new(Vec::new()),
        };

        let streamer = DebridStreamer::new();
        let disposition = streamer.open(0, 4, &supplier).await.expect("stream");
        assert_eq!(disposition.response.status().as_u16(), 206);
        let body = disposition.response.text().await.expect("body");
        assert_eq!(body, "hello");

        let invalidated = supplier.invalidated.lock().expect("lock");
        assert_eq!(invalidated.as_slice(), &[InvalidReason::LinkNotFound]);
    }

    #[tokio::test]
    async fn fatal_4xx_is_not_retried() {
        let addr = scripted_http(vec![
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n",
        ])
        .await;
        let supplier = ScriptedSupplier {
            issued: AtomicUsize::new(0),
            urls: vec![format!("http://{addr}/f")],
            invalidated: Mutex::new(Vec::new()),
        };

        let streamer = DebridStreamer::new();
        let err = streamer.open(0, 0, &supplier).await.expect_err("fatal");
        assert!(matches!(err, DebridError::Api { status: 403, .. }));
        assert!(supplier.invalidated.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn bandwidth_503_invalidates_with_the_right_reason() {
        let exhausted = scripted_http(vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 24\r\n\r\nbandwidth limit exceeded",
        ])
        .await;
        let live = scripted_http(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        ])
        .await;

        let supplier = ScriptedSupplier {
            issued: AtomicUsize::new(0),
            urls: vec![format!("http://{exhausted}/f"), format!("http://{live}/f")],
            invalidated: Mutex::new(Vec::new()),
        };

        let streamer = DebridStreamer::new();
        let disposition = streamer.open(0, 0, &supplier).await.expect("stream");
        assert_eq!(disposition.response.status().as_u16(), 200);
        let invalidated = supplier.invalidated.lock().expect("lock");
        assert_eq!(
            invalidated.as_slice(),
            &[InvalidReason::BandwidthExceeded]
        );
    }
}
