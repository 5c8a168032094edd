//! Byte ranges of RAR-wrapped media without materialising the archive.
//!
//! The streamer feeds whole decoded archive segments into an in-memory
//! pipe; the reading side drives the streaming RAR walker. Two paths exist:
//! ranges anchored at zero (or archives without a discovered inner offset)
//! walk the headers, skip to the target entry, and copy; interior seeks on
//! archives with a known `start_offset` map inner bytes onto archive
//! offsets directly, which store mode makes exact for single-volume sets.

use std::time::Duration;

use nimbus_nzb::NzbFile;
use nimbus_rar::RarReader;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::{StreamError, StreamResult};
use crate::streamer::{SegmentStreamer, StreamOutcome};

/// Pipe buffer between the segment feed and the archive walker.
const PIPE_CAPACITY: usize = 1024 * 1024;
/// Overhead margin applied to archive range estimates.
const ARCHIVE_MARGIN: f64 = 1.10;
/// Minimum pre/post buffer around a seek, in segments.
const SEEK_BUFFER_SEGMENTS: usize = 10;
/// Minimum selection width when seeking, in segments.
const MIN_SEEK_SEGMENTS: usize = 20;
/// Forward footer allowance as a fraction of total segments.
const FOOTER_FRACTION: f64 = 0.02;
/// Grace period for the walker after the feed ends with a disconnect.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Extract `[start, end]` of the inner media file to `sink`.
pub(crate) async fn extract_range<W: AsyncWrite + Unpin + Send>(
    streamer: &SegmentStreamer,
    file: &NzbFile,
    start: u64,
    end: u64,
    sink: &mut W,
) -> StreamResult<StreamOutcome> {
    let end = end.min(file.size.saturating_sub(1));
    if start > end {
        return Err(StreamError::InvalidRange { start, end });
    }
    if file.segments.is_empty() {
        return Err(StreamError::Truncated);
    }

    if start > 0 && file.start_offset > 0 {
        direct_seek(streamer, file, start, end, sink).await
    } else {
        walk_and_copy(streamer, file, start, end, sink).await
    }
}

/// Header-walking path: stream from segment zero, find the target entry,
/// skip into it, copy the range.
async fn walk_and_copy<W: AsyncWrite + Unpin + Send>(
    streamer: &SegmentStreamer,
    file: &NzbFile,
    start: u64,
    end: u64,
    sink: &mut W,
) -> StreamResult<StreamOutcome> {
    let last = selection_end(file, end);
    let (feed, handle) = spawn_feed(streamer, file, 0, last);

    let mut reader = RarReader::new(
        BufReader::new(feed),
        (!file.password.is_empty()).then(|| file.password.clone()),
    );

    let target = &file.name;
    let result = async {
        loop {
            let entry = reader
                .next_entry()
                .await
                .map_err(|source| StreamError::Rar { source })?
                .ok_or_else(|| StreamError::EntryNotFound {
                    name: target.clone(),
                })?;
            if entry.is_dir {
                reader
                    .skip_entry(&entry)
                    .await
                    .map_err(|source| StreamError::Rar { source })?;
                continue;
            }
            let is_target = entry.name == *target
                || nimbus_nzb::classify_name(&entry.name) == nimbus_nzb::FileClass::Media;
            if !is_target {
                reader
                    .skip_entry(&entry)
                    .await
                    .map_err(|source| StreamError::Rar { source })?;
                continue;
            }
            debug!(entry = %entry.name, start, end, "extracting archive range");
            let copied = reader
                .copy_range(&entry, start, end - start + 1, sink)
                .await
                .map_err(|source| StreamError::Rar { source })?;
            return Ok(copied);
        }
    }
    .await;

    finish_feed(handle, result.is_ok()).await;
    result.map(|bytes_written| StreamOutcome {
        bytes_written,
        learned_segment_size: None,
    })
}

/// Store-mode seek path: inner byte `i` lives at archive offset
/// `start_offset + i`, so the covering archive segments can be streamed and
/// trimmed without walking the headers again.
async fn direct_seek<W: AsyncWrite + Unpin + Send>(
    streamer: &SegmentStreamer,
    file: &NzbFile,
    start: u64,
    end: u64,
    sink: &mut W,
) -> StreamResult<StreamOutcome> {
    let archive_start = file.start_offset + start;
    let archive_end = file.start_offset + end;

    let (first, last) = seek_selection(file, archive_start, archive_end);
    let skip = archive_start.saturating_sub(selection_offset(file, first));
    let want = end - start + 1;

    let (feed, handle) = spawn_feed(streamer, file, first, last);
    let mut reader = BufReader::new(feed);

    let result = async {
        discard(&mut reader, skip).await?;
        let mut copied = 0_u64;
        let mut buf = vec![0_u8; 64 * 1024];
        while copied < want {
            let cap = usize::try_from((want - copied).min(buf.len() as u64))
                .unwrap_or(buf.len());
            let read = reader
                .read(&mut buf[..cap])
                .await
                .map_err(|source| StreamError::Sink { source })?;
            if read == 0 {
                return Err(StreamError::Truncated);
            }
            sink.write_all(&buf[..read])
                .await
                .map_err(|source| StreamError::Sink { source })?;
            copied += read as u64;
        }
        sink.flush()
            .await
            .map_err(|source| StreamError::Sink { source })?;
        Ok(copied)
    }
    .await;

    finish_feed(handle, result.is_ok()).await;
    result.map(|bytes_written| StreamOutcome {
        bytes_written,
        learned_segment_size: None,
    })
}

/// Spawn the feeding task writing whole segments `[from..=to]` to a pipe.
fn spawn_feed(
    streamer: &SegmentStreamer,
    file: &NzbFile,
    from: usize,
    to: usize,
) -> (
    tokio::io::DuplexStream,
    tokio::task::JoinHandle<StreamResult<u64>>,
) {
    let (read_half, mut write_half) = tokio::io::duplex(PIPE_CAPACITY);
    let streamer = streamer.clone();
    let file = file.clone();
    let handle = tokio::spawn(async move {
        let fed = streamer
            .stream_whole_segments(&file, from, to, &mut write_half)
            .await?;
        write_half
            .shutdown()
            .await
            .map_err(|source| StreamError::Sink { source })?;
        Ok(fed)
    });
    (read_half, handle)
}

/// Join the feed after extraction, tolerating pipe-closed failures once the
/// extraction already succeeded and granting a drain window otherwise.
async fn finish_feed(
    handle: tokio::task::JoinHandle<StreamResult<u64>>,
    extraction_succeeded: bool,
) {
    if extraction_succeeded {
        // The reader may have stopped early; the feed's broken-pipe error
        // carries no signal once the range is fully written.
        handle.abort();
        let _ = handle.await;
        return;
    }
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(Ok(_))) | Ok(Err(_)) => {}
        Ok(Ok(Err(err))) => {
            if !err.is_client_disconnect() {
                warn!(error = %err, "segment feed failed during extraction");
            }
        }
        Err(_) => warn!("segment feed did not drain within the grace period"),
    }
}

/// Last selected segment index for a header-anchored walk.
fn selection_end(file: &NzbFile, end: u64) -> usize {
    let count = file.segments.len();
    if count == 0 {
        return 0;
    }
    let archive_total = file
        .segments
        .last()
        .map_or(0, |segment| segment.end_offset);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let estimated = ((file.start_offset + end) as f64 * ARCHIVE_MARGIN) as u64;
    let index = index_for_offset(file, estimated.min(archive_total.saturating_sub(1)));
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let footer = ((count as f64) * FOOTER_FRACTION).ceil() as usize;
    index
        .saturating_add(footer.max(SEEK_BUFFER_SEGMENTS))
        .min(count - 1)
}

/// Covering segment window for a direct store-mode seek.
fn seek_selection(file: &NzbFile, archive_start: u64, archive_end: u64) -> (usize, usize) {
    let count = file.segments.len();
    if count == 0 {
        return (0, 0);
    }
    let mut first = index_for_offset(file, archive_start);
    let mut last = index_for_offset(file, archive_end);

    // Seek context behind, footer allowance ahead.
    first = first.saturating_sub(SEEK_BUFFER_SEGMENTS.min(first));
    let span = last.saturating_sub(first) + 1;
    if span < MIN_SEEK_SEGMENTS {
        last = (first + MIN_SEEK_SEGMENTS - 1).min(count - 1);
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let footer = ((count as f64) * FOOTER_FRACTION).ceil() as usize;
    last = last.saturating_add(footer).min(count - 1);
    (first, last)
}

/// Archive offset at which the selection begins.
fn selection_offset(file: &NzbFile, index: usize) -> u64 {
    file.segments
        .get(index)
        .map_or(0, |segment| segment.start_offset)
}

/// Segment index whose decoded span contains `offset`.
fn index_for_offset(file: &NzbFile, offset: u64) -> usize {
    file.segments
        .iter()
        .position(|segment| segment.end_offset > offset)
        .unwrap_or(file.segments.len().saturating_sub(1))
}

async fn discard<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    mut remaining: u64,
) -> StreamResult<()> {
    let mut buf = vec![0_u8; 64 * 1024];
    while remaining > 0 {
        let cap = usize::try_from(remaining.min(buf.len() as u64)).unwrap_or(buf.len());
        let read = reader
            .read(&mut buf[..cap])
            .await
            .map_err(|source| StreamError::Sink { source })?;
        if read == 0 {
            return Err(StreamError::Truncated);
        }
        remaining -= read as u64;
    }
    Ok(())
}
