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

//! File-based configuration for the Nimbus engine.
//!
//! A single YAML document describes the Usenet providers, debrid providers,
//! WebDAV surface, and streaming tunables. `load` reads and validates it in
//! one step; validation failures are fatal at startup.

mod defaults;
mod error;
mod loader;
mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load;
pub use model::{
    AppConfig, CheckPolicy, DebridProviderConfig, FilterOp, FolderFilter, FolderNaming,
    RcloneConfig, StreamingConfig, UsenetProviderConfig, VirtualFolderConfig, WebdavConfig,
};
