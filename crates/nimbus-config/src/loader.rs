//! Reading and deserialising the configuration document.

use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;
use crate::validate;

/// Load and validate the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] when the file is unreadable,
/// [`ConfigError::Parse`] when the YAML does not match the model, and
/// [`ConfigError::Invalid`] when a semantic constraint is violated.
pub fn load(path: &Path) -> ConfigResult<AppConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AppConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r"
cache_dir: /tmp/nimbus
usenet_providers:
  - name: primary
    address: news.example.com
    port: 563
    ssl: true
debrid_providers:
  - name: realdebrid
    api_url: https://api.real-debrid.com/rest/1.0
    tokens: [tok]
";

    #[test]
    fn minimal_document_loads_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(MINIMAL.as_bytes()).expect("write");
        let config = load(file.path()).expect("load");

        assert_eq!(config.log_level, "info");
        assert_eq!(config.streaming.segment_cache_mib, 50);
        assert_eq!(config.streaming.chunk_size, 16);
        assert_eq!(config.usenet_providers.len(), 1);
        assert_eq!(config.usenet_providers[0].max_connections, 10);
        assert_eq!(config.debrid_providers[0].auto_expire_links_after_hours, 48);
        assert_eq!(config.debrid_providers[0].torrent_refresh_secs, 900);
    }

    #[test]
    fn missing_file_maps_to_read_error() {
        let err = load(Path::new("/nonexistent/nimbus.yaml")).expect_err("should fail");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_yaml_maps_to_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"cache_dir: [unclosed").expect("write");
        let err = load(file.path()).expect_err("should fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
