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

//! Read-only WebDAV façade over the Nimbus backends.
//!
//! Two backends implement the same [`DavBackend`] contract: the debrid
//! variant serves torrent caches, the usenet variant serves the NZB store.
//! The server is a single axum fallback handler dispatching on the HTTP
//! method, which is what lets PROPFIND through without router support.
//! Writes are rejected wholesale; DELETE maps to logical removal.

mod backend;
mod debrid;
mod error;
mod html;
mod propfind;
mod range;
mod server;
mod usenet;

pub use backend::{DavBackend, DavNode, DavPath, ServeOutcome};
pub use debrid::DebridDavBackend;
pub use error::{DavError, DavResult};
pub use range::parse_range;
pub use server::{DavServer, router};
pub use usenet::UsenetDavBackend;
