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
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! Shared test helpers used across integration suites.
//!
//! Layout: `nntp.rs` (scripted NNTP stub server), `yenc.rs` (encoder for
//! fixture bodies), `rar.rs` (store-mode RAR4 builder), `nzb.rs` (NZB XML
//! builder).

pub mod nntp;
pub mod nzb;
pub mod rar;
pub mod yenc;
