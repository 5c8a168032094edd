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

//! Streaming reader for store-mode RAR archives.
//!
//! The engine never materialises an archive: the reader walks RAR4 and RAR5
//! headers over any [`tokio::io::AsyncRead`], tracks its absolute position,
//! and exposes entry payloads for skipping or ranged copying. Only the
//! store method (no compression) is supported for payload access, which is
//! what permits byte-accurate seeks into the inner file; compressed entries
//! can still be enumerated and skipped.

mod error;
mod reader;

pub use error::{RarError, RarResult};
pub use reader::{RarEntry, RarReader};
