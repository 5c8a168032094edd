//! Default values applied when the configuration document omits a field.

use std::net::SocketAddr;

pub(crate) fn log_level() -> String {
    "info".to_owned()
}

pub(crate) fn bind_addr() -> SocketAddr {
    ([0, 0, 0, 0], 8282).into()
}

pub(crate) fn categories() -> Vec<String> {
    vec!["default".to_owned()]
}

pub(crate) const fn segment_cache_mib() -> u64 {
    50
}

pub(crate) const fn chunk_size() -> usize {
    16
}

pub(crate) const fn max_retries() -> u32 {
    3
}

pub(crate) const fn max_connections() -> usize {
    10
}

pub(crate) const fn workers() -> usize {
    8
}

pub(crate) const fn torrent_refresh_secs() -> u64 {
    900
}

pub(crate) const fn link_refresh_secs() -> u64 {
    2_400
}

pub(crate) const fn link_expiry_hours() -> u64 {
    48
}
