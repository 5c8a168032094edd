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

//! Debrid provider integration: torrent cache, account rotation, link
//! resolution, repair pipeline, and the upstream HTTP range streamer.
//!
//! Providers are polymorphic behind [`DebridClient`]; the cache and the
//! WebDAV layer never see a concrete REST surface. Per-provider state is a
//! [`TorrentCache`] mirroring the usenet store: one JSON document per
//! torrent on disk, name and id indices in memory, derived listings
//! recomputed lazily behind a dirty flag.

mod accounts;
mod cache;
mod client;
mod error;
mod model;
mod realdebrid;
mod repair;
mod streamer;

pub use accounts::{Account, Accounts};
pub use cache::{CacheOptions, TorrentCache};
pub use client::{DebridClient, Profile};
pub use error::{DebridError, DebridResult, InvalidReason};
pub use model::{CachedTorrent, DownloadLink, Torrent, TorrentFile, folder_name_for};
pub use realdebrid::RealDebridClient;
pub use repair::{RepairKind, RepairRequest};
pub use streamer::{DebridStreamer, LinkSupplier, ResolvedLink, StreamDisposition};
