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

//! Nimbus application wiring.
//!
//! Layout: `bootstrap.rs` (service wiring and the serve loop), `engine.rs`
//! (the owning struct for all per-provider state), `imports.rs` (engine-side
//! import intake), `scheduler.rs` (global periodic jobs).

/// Application bootstrap and the serve loop.
pub mod bootstrap;
/// The engine owning all per-provider state.
pub mod engine;
mod error;
/// Import intake: magnets and NZBs handed over by the import surface.
pub mod imports;
/// Global periodic jobs.
pub mod scheduler;

pub use bootstrap::run_app;
pub use engine::Engine;
pub use error::{AppError, AppResult};
