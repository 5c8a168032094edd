//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to Nimbus services.

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    webdav_requests_total: IntCounterVec,
    nntp_commands_total: IntCounterVec,
    segment_cache_hits_total: IntCounter,
    segment_cache_misses_total: IntCounter,
    segments_fetched_total: IntCounter,
    stream_bytes_total: IntCounter,
    stream_errors_total: IntCounterVec,
    repair_operations_total: IntCounterVec,
    download_links_issued_total: IntCounter,
    active_nntp_connections: IntGauge,
    cached_torrents: IntGauge,
    cached_nzbs: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Currently checked-out NNTP connections.
    pub active_nntp_connections: i64,
    /// Torrents resident in the per-provider caches.
    pub cached_torrents: i64,
    /// NZB records resident in the usenet store.
    pub cached_nzbs: i64,
    /// Segment cache hits since startup.
    pub segment_cache_hits_total: u64,
    /// Segment cache misses since startup.
    pub segment_cache_misses_total: u64,
    /// Bytes written to streaming sinks since startup.
    pub stream_bytes_total: u64,
    /// Direct download links issued since startup.
    pub download_links_issued_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let webdav_requests_total = IntCounterVec::new(
            Opts::new("webdav_requests_total", "WebDAV requests by method and code"),
            &["method", "code"],
        )?;
        let nntp_commands_total = IntCounterVec::new(
            Opts::new("nntp_commands_total", "NNTP commands issued by verb and outcome"),
            &["command", "outcome"],
        )?;
        let segment_cache_hits_total = IntCounter::with_opts(Opts::new(
            "segment_cache_hits_total",
            "Decoded segments served from the in-memory cache",
        ))?;
        let segment_cache_misses_total = IntCounter::with_opts(Opts::new(
            "segment_cache_misses_total",
            "Segment lookups that required a download",
        ))?;
        let segments_fetched_total = IntCounter::with_opts(Opts::new(
            "segments_fetched_total",
            "Article bodies downloaded and decoded",
        ))?;
        let stream_bytes_total = IntCounter::with_opts(Opts::new(
            "stream_bytes_total",
            "Bytes written to streaming sinks",
        ))?;
        let stream_errors_total = IntCounterVec::new(
            Opts::new("stream_errors_total", "Streaming failures by error kind"),
            &["kind"],
        )?;
        let repair_operations_total = IntCounterVec::new(
            Opts::new("repair_operations_total", "Repair pipeline operations by type and outcome"),
            &["operation", "outcome"],
        )?;
        let download_links_issued_total = IntCounter::with_opts(Opts::new(
            "download_links_issued_total",
            "Direct download links resolved from debrid providers",
        ))?;
        let active_nntp_connections = IntGauge::with_opts(Opts::new(
            "active_nntp_connections",
            "NNTP connections currently checked out of the pools",
        ))?;
        let cached_torrents = IntGauge::with_opts(Opts::new(
            "cached_torrents",
            "Torrents resident in the per-provider caches",
        ))?;
        let cached_nzbs = IntGauge::with_opts(Opts::new(
            "cached_nzbs",
            "NZB records resident in the usenet store",
        ))?;

        registry.register(Box::new(webdav_requests_total.clone()))?;
        registry.register(Box::new(nntp_commands_total.clone()))?;
        registry.register(Box::new(segment_cache_hits_total.clone()))?;
        registry.register(Box::new(segment_cache_misses_total.clone()))?;
        registry.register(Box::new(segments_fetched_total.clone()))?;
        registry.register(Box::new(stream_bytes_total.clone()))?;
        registry.register(Box::new(stream_errors_total.clone()))?;
        registry.register(Box::new(repair_operations_total.clone()))?;
        registry.register(Box::new(download_links_issued_total.clone()))?;
        registry.register(Box::new(active_nntp_connections.clone()))?;
        registry.register(Box::new(cached_torrents.clone()))?;
        registry.register(Box::new(cached_nzbs.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                webdav_requests_total,
                nntp_commands_total,
                segment_cache_hits_total,
                segment_cache_misses_total,
                segments_fetched_total,
                stream_bytes_total,
                stream_errors_total,
                repair_operations_total,
                download_links_issued_total,
                active_nntp_connections,
                cached_torrents,
                cached_nzbs,
            }),
        })
    }

    /// Increment the WebDAV request counter for the given method and status.
    pub fn inc_webdav_request(&self, method: &str, status: u16) {
        self.inner
            .webdav_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    /// Increment the NNTP command counter.
    pub fn inc_nntp_command(&self, command: &str, outcome: &str) {
        self.inner
            .nntp_commands_total
            .with_label_values(&[command, outcome])
            .inc();
    }

    /// Record a segment cache hit.
    pub fn inc_segment_cache_hit(&self) {
        self.inner.segment_cache_hits_total.inc();
    }

    /// Record a segment cache miss.
    pub fn inc_segment_cache_miss(&self) {
        self.inner.segment_cache_misses_total.inc();
    }

    /// Record a downloaded and decoded article body.
    pub fn inc_segment_fetched(&self) {
        self.inner.segments_fetched_total.inc();
    }

    /// Add bytes written to a streaming sink.
    pub fn add_stream_bytes(&self, bytes: u64) {
        self.inner.stream_bytes_total.inc_by(bytes);
    }

    /// Record a streaming failure by taxonomy kind.
    pub fn inc_stream_error(&self, kind: &str) {
        self.inner
            .stream_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Record a repair pipeline operation.
    pub fn inc_repair_operation(&self, operation: &str, outcome: &str) {
        self.inner
            .repair_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Record a resolved direct download link.
    pub fn inc_download_link_issued(&self) {
        self.inner.download_links_issued_total.inc();
    }

    /// Set the active NNTP connection gauge.
    pub fn set_active_nntp_connections(&self, count: i64) {
        self.inner.active_nntp_connections.set(count);
    }

    /// Set the cached torrent gauge.
    pub fn set_cached_torrents(&self, count: i64) {
        self.inner.cached_torrents.set(count);
    }

    /// Set the cached NZB gauge.
    pub fn set_cached_nzbs(&self, count: i64) {
        self.inner.cached_nzbs.set(count);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_nntp_connections: self.inner.active_nntp_connections.get(),
            cached_torrents: self.inner.cached_torrents.get(),
            cached_nzbs: self.inner.cached_nzbs.get(),
            segment_cache_hits_total: self.inner.segment_cache_hits_total.get(),
            segment_cache_misses_total: self.inner.segment_cache_misses_total.get(),
            stream_bytes_total: self.inner.stream_bytes_total.get(),
            download_links_issued_total: self.inner.download_links_issued_total.get(),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_webdav_request("GET", 206);
        metrics.inc_nntp_command("BODY", "ok");
        metrics.inc_segment_cache_hit();
        metrics.inc_segment_cache_miss();
        metrics.inc_segment_fetched();
        metrics.add_stream_bytes(1_024);
        metrics.inc_stream_error("timeout");
        metrics.inc_repair_operation("reinsert", "ok");
        metrics.inc_download_link_issued();
        metrics.set_active_nntp_connections(3);
        metrics.set_cached_torrents(10);
        metrics.set_cached_nzbs(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_nntp_connections, 3);
        assert_eq!(snapshot.cached_torrents, 10);
        assert_eq!(snapshot.cached_nzbs, 4);
        assert_eq!(snapshot.segment_cache_hits_total, 1);
        assert_eq!(snapshot.segment_cache_misses_total, 1);
        assert_eq!(snapshot.stream_bytes_total, 1_024);
        assert_eq!(snapshot.download_links_issued_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("webdav_requests_total"));
        assert!(rendered.contains("nntp_commands_total"));
        assert!(rendered.contains("segment_cache_hits_total"));
        Ok(())
    }
}
