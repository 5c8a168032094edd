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

//! Persistent store for Usenet releases.
//!
//! One compact JSON document per NZB under `<cache>/<category>/<id>.json`;
//! deletions move the document into a `trash/` sibling. In-memory state is
//! a pair of sorted listings (`__all__`, `__bad__`) swapped atomically, a
//! name-to-id index, and a queue of in-flight downloads. An optional rclone
//! remote-control hook invalidates an external VFS cache best-effort.

mod error;
mod rclone;
mod store;

pub use error::{StoreError, StoreResult};
pub use rclone::RcloneNotifier;
pub use store::UsenetStore;
