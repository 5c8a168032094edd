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

//! NZB parsing and metadata extraction.
//!
//! An NZB is an XML manifest of Usenet article segments. This crate turns
//! one into logical files: segments are grouped by base name, classified
//! (media, RAR, droppable), and — when an NNTP client is available — the
//! first and last segments are probed for their yEnc headers to learn true
//! sizes, real file names, and, for store-mode RAR archives, the exact
//! archive-internal offset at which the inner media payload begins.

mod classify;
mod error;
mod model;
mod parse;
mod probe;

pub use classify::{FileClass, base_name, classify_magic, classify_name, file_number};
pub use error::{NzbError, NzbResult};
pub use model::{Nzb, NzbFile, NzbSegment, NzbStatus, compute_id};
pub use parse::{RawNzb, RawNzbFile, RawSegment, parse_xml, subject_filename};
pub use probe::{NzbParser, ParserLimits};
