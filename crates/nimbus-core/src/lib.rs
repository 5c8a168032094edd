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

//! Shared types for the Nimbus content access engine.
//!
//! This crate sits at the root of the workspace dependency graph and carries
//! the pieces every backend needs: the engine-wide error taxonomy, the
//! virtual-filesystem listing entry, filename sanitisation, and the media
//! content-type map used when serving ranges.

mod error;
mod model;
mod naming;

pub use error::ErrorKind;
pub use model::{BuildInfo, FileInfo};
pub use naming::{content_type_for, sanitize_file_name};
