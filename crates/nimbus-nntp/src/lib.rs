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

//! NNTP transport for the Nimbus engine.
//!
//! Three layers, used strictly top-down by callers:
//!
//! - [`Client`]: ordered list of provider pools with round-robin fallback
//!   and a hard checkout ceiling.
//! - [`Pool`]: fixed-size set of connections per provider with health
//!   probing and transparent replacement.
//! - [`Connection`]: one pipelined RFC 3977/4643 text session carrying
//!   authentication, TLS upgrade, and yEnc-bodied article retrieval.
//!
//! yEnc decoding lives here too ([`yenc`]) because body framing and decoding
//! are inseparable: the connection must preserve exact CRLF line breaks for
//! the decoder to see the original encoded stream.

mod client;
mod connection;
mod error;
mod pool;
pub mod yenc;

pub use client::{Client, PooledConnection};
pub use connection::{Article, Connection, normalize_message_id};
pub use error::{NntpError, NntpResult};
pub use pool::{Pool, ProviderSettings};
