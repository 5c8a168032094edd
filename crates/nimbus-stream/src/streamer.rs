//! Range-to-segment mapping and ordered concurrent download.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use nimbus_nzb::{NzbFile, NzbSegment};
use nimbus_nntp::Client;
use nimbus_telemetry::Metrics;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::cache::SegmentCache;
use crate::error::{StreamError, StreamResult};
use crate::rar;

/// Per-attempt download deadline.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Base backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(2_000);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Streamer tunables.
#[derive(Debug, Clone, Copy)]
pub struct StreamerConfig {
    /// Segments downloaded concurrently per ordered chunk.
    pub chunk_size: usize,
    /// Download attempts per segment.
    pub max_retries: u32,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16,
            max_retries: 3,
        }
    }
}

/// Result of a completed stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOutcome {
    /// Bytes written to the sink.
    pub bytes_written: u64,
    /// Segment size learned from a header fetch, for the caller to persist.
    pub learned_segment_size: Option<u64>,
}

/// A byte range of one segment's decoded body.
#[derive(Debug, Clone)]
struct SegmentRange {
    segment: NzbSegment,
    byte_start: u64,
    byte_end: u64,
}

/// Streams byte ranges of logical NZB files to a sink.
#[derive(Clone)]
pub struct SegmentStreamer {
    client: Arc<Client>,
    cache: Arc<SegmentCache>,
    config: StreamerConfig,
    metrics: Metrics,
}

impl SegmentStreamer {
    /// Construct a streamer over the shared client and cache.
    #[must_use]
    pub fn new(
        client: Arc<Client>,
        cache: Arc<SegmentCache>,
        config: StreamerConfig,
        metrics: Metrics,
    ) -> Self {
        Self {
            client,
            cache,
            config,
            metrics,
        }
    }

    /// Stream `[start, end]` (inclusive) of `file` into `sink`.
    ///
    /// RAR-wrapped files are routed through the range extractor; plain
    /// files map the range onto covering segments, download each chunk
    /// concurrently, and write strictly in order, flushing after every
    /// chunk.
    ///
    /// # Errors
    ///
    /// `InvalidRange` when `start > end` after clamping; a segment error
    /// aborts the stream at that point.
    pub async fn stream<W: AsyncWrite + Unpin + Send>(
        &self,
        file: &NzbFile,
        start: u64,
        end: u64,
        sink: &mut W,
    ) -> StreamResult<StreamOutcome> {
        if file.is_rar_archive {
            return rar::extract_range(self, file, start, end, sink).await;
        }

        let mut outcome = StreamOutcome::default();
        let mut segments = file.segments.clone();
        if file.segment_size == 0 {
            if let Some(learned) = self.learn_segment_size(file).await {
                rebuild_offsets(&mut segments, learned, file.size);
                outcome.learned_segment_size = Some(learned);
            }
        }

        let end = end.min(file.size.saturating_sub(1));
        if start > end {
            return Err(StreamError::InvalidRange { start, end });
        }

        let ranges = covering_ranges(&segments, start, end);
        outcome.bytes_written = self.write_ranges(&ranges, sink).await?;
        Ok(outcome)
    }

    /// Stream the entire decoded bodies of `segments[from..=to]` in order.
    ///
    /// Used by the RAR extractor, which consumes whole segments and seeks
    /// inside the decoded archive itself.
    pub(crate) async fn stream_whole_segments<W: AsyncWrite + Unpin + Send>(
        &self,
        file: &NzbFile,
        from: usize,
        to: usize,
        sink: &mut W,
    ) -> StreamResult<u64> {
        let ranges: Vec<SegmentRange> = file.segments[from..=to]
            .iter()
            .map(|segment| SegmentRange {
                segment: segment.clone(),
                byte_start: 0,
                byte_end: u64::MAX,
            })
            .collect();
        self.write_ranges(&ranges, sink).await
    }

    async fn write_ranges<W: AsyncWrite + Unpin + Send>(
        &self,
        ranges: &[SegmentRange],
        sink: &mut W,
    ) -> StreamResult<u64> {
        let mut written = 0_u64;
        let mut chunk_written;
        for chunk in ranges.chunks(self.config.chunk_size.max(1)) {
            chunk_written = 0_u64;
            // Fan the chunk out, then write strictly in chunk order.
            let downloads = join_all(chunk.iter().map(|range| {
                let group = range.segment.group.clone();
                let message_id = range.segment.message_id.clone();
                async move { self.fetch_segment(&group, &message_id).await }
            }))
            .await;

            for (range, downloaded) in chunk.iter().zip(downloads) {
                let data = downloaded?;
                let len = data.len() as u64;
                let local_start = range.byte_start.min(len);
                let local_end = range.byte_end.min(len.saturating_sub(1));
                if local_start > local_end {
                    continue;
                }
                let slice = &data[usize::try_from(local_start).unwrap_or(usize::MAX)
                    ..=usize::try_from(local_end).unwrap_or(usize::MAX)];
                sink.write_all(slice)
                    .await
                    .map_err(|source| StreamError::Sink { source })?;
                chunk_written += slice.len() as u64;
            }
            sink.flush()
                .await
                .map_err(|source| StreamError::Sink { source })?;
            self.metrics.add_stream_bytes(chunk_written);
            written += chunk_written;
        }
        Ok(written)
    }

    /// Download one decoded segment body, retrying with exponential backoff.
    async fn fetch_segment(&self, group: &str, message_id: &str) -> StreamResult<Arc<Vec<u8>>> {
        if let Some(hit) = self.cache.get(message_id) {
            self.metrics.inc_segment_cache_hit();
            trace!(message_id, "segment cache hit");
            return Ok(hit.data);
        }
        self.metrics.inc_segment_cache_miss();

        let group = (!group.is_empty()).then_some(group);
        let mut last_error = None;
        for attempt in 1..=self.config.max_retries.max(1) {
            let download = async {
                let mut connection = self.client.get_connection().await?;
                connection.get_segment(group, message_id).await
            };
            match tokio::time::timeout(ATTEMPT_TIMEOUT, download).await {
                Ok(Ok(decoded)) => {
                    let declared = decoded
                        .part
                        .map_or(decoded.header.size, |part| part.len());
                    let data = Arc::new(decoded.data);
                    self.cache.put(message_id, Arc::clone(&data), declared);
                    self.metrics.inc_segment_fetched();
                    return Ok(data);
                }
                Ok(Err(err)) => {
                    if !err.retryable() {
                        self.metrics.inc_stream_error(err.kind().as_str());
                        return Err(StreamError::Segment {
                            message_id: message_id.to_owned(),
                            source: err,
                        });
                    }
                    debug!(message_id, attempt, error = %err, "segment attempt failed");
                    last_error = Some(err);
                }
                Err(_) => {
                    debug!(message_id, attempt, "segment attempt timed out");
                    last_error = Some(nimbus_nntp::NntpError::Timeout {
                        operation: "segment download",
                    });
                }
            }
            if attempt < self.config.max_retries.max(1) {
                tokio::time::sleep(backoff_for(attempt)).await;
            }
        }
        let source = last_error.unwrap_or(nimbus_nntp::NntpError::NoAvailableConnection);
        self.metrics.inc_stream_error(source.kind().as_str());
        Err(StreamError::Segment {
            message_id: message_id.to_owned(),
            source,
        })
    }

    /// Fetch the first segment's yEnc headers to learn the chunk size.
    async fn learn_segment_size(&self, file: &NzbFile) -> Option<u64> {
        let first = file.segments.first()?;
        let group = (!first.group.is_empty()).then_some(first.group.as_str());
        let download = async {
            let mut connection = self.client.get_connection().await.ok()?;
            connection
                .get_segment(group, &first.message_id)
                .await
                .ok()
        };
        let decoded = tokio::time::timeout(ATTEMPT_TIMEOUT, download)
            .await
            .ok()
            .flatten()?;
        let learned = decoded
            .part
            .map_or(decoded.header.size, |part| part.len());
        (learned > 0).then_some(learned)
    }
}

/// Backoff `2000 ms × 2^(attempt-1)` capped at five seconds.
fn backoff_for(attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

/// The minimal list of segment sub-ranges covering `[start, end]`.
fn covering_ranges(segments: &[NzbSegment], start: u64, end: u64) -> Vec<SegmentRange> {
    segments
        .iter()
        .filter(|segment| segment.end_offset > start && segment.start_offset <= end)
        .map(|segment| SegmentRange {
            segment: segment.clone(),
            byte_start: start.saturating_sub(segment.start_offset),
            byte_end: end.min(segment.end_offset.saturating_sub(1)) - segment.start_offset,
        })
        .collect()
}

/// Reassign contiguous offsets from a freshly learned segment size.
fn rebuild_offsets(segments: &mut [NzbSegment], segment_size: u64, file_size: u64) {
    let mut offset = 0_u64;
    let count = segments.len();
    for (index, segment) in segments.iter_mut().enumerate() {
        segment.start_offset = offset;
        let end = if index + 1 == count && file_size > offset {
            file_size
        } else {
            offset + segment_size
        };
        segment.end_offset = end;
        offset = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(number: u32, start: u64, end: u64) -> NzbSegment {
        NzbSegment {
            number,
            message_id: format!("seg{number}@x"),
            bytes: end - start,
            start_offset: start,
            end_offset: end,
            group: "alt.binaries.test".to_owned(),
        }
    }

    #[test]
    fn covering_ranges_match_the_range_math_scenario() {
        // size 1024, segments [0..400), [400..800), [800..1024).
        let segments = vec![
            segment(1, 0, 400),
            segment(2, 400, 800),
            segment(3, 800, 1_024),
        ];
        let ranges = covering_ranges(&segments, 200, 900);
        assert_eq!(ranges.len(), 3);
        assert_eq!((ranges[0].byte_start, ranges[0].byte_end), (200, 399));
        assert_eq!((ranges[1].byte_start, ranges[1].byte_end), (0, 399));
        assert_eq!((ranges[2].byte_start, ranges[2].byte_end), (0, 100));

        let total: u64 = ranges
            .iter()
            .map(|range| range.byte_end - range.byte_start + 1)
            .sum();
        assert_eq!(total, 701);
    }

    #[test]
    fn covering_ranges_skip_unrelated_segments() {
        let segments = vec![
            segment(1, 0, 400),
            segment(2, 400, 800),
            segment(3, 800, 1_024),
        ];
        let ranges = covering_ranges(&segments, 450, 500);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].segment.number, 2);
        assert_eq!((ranges[0].byte_start, ranges[0].byte_end), (50, 100));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(1), Duration::from_millis(2_000));
        assert_eq!(backoff_for(2), Duration::from_millis(4_000));
        assert_eq!(backoff_for(3), Duration::from_secs(5));
        assert_eq!(backoff_for(10), Duration::from_secs(5));
    }

    #[test]
    fn rebuild_assigns_contiguous_offsets() {
        let mut segments = vec![segment(1, 0, 0), segment(2, 0, 0), segment(3, 0, 0)];
        rebuild_offsets(&mut segments, 400, 1_024);
        assert_eq!(segments[0].start_offset, 0);
        assert_eq!(segments[0].end_offset, 400);
        assert_eq!(segments[1].start_offset, 400);
        assert_eq!(segments[2].start_offset, 800);
        assert_eq!(segments[2].end_offset, 1_024);
    }
}
