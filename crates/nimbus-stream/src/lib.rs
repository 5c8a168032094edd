#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Byte-range streaming over segmented Usenet content.
//!
//! The streamer maps a requested range on a logical file onto the covering
//! article segments, downloads and decodes them concurrently through an LRU
//! byte cache, and writes the range to a sink strictly in order. RAR-wrapped
//! files are routed through the range extractor, which drives the streaming
//! RAR reader over an in-memory pipe.

mod cache;
mod error;
mod rar;
mod streamer;

pub use cache::{CachedSegment, SegmentCache};
pub use error::{StreamError, StreamResult};
pub use streamer::{SegmentStreamer, StreamOutcome, StreamerConfig};
