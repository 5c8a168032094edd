//! Semantic validation applied after deserialisation.

use std::collections::HashSet;

use regex::Regex;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AppConfig, FilterOp};

/// Reserved parent names a custom folder must not shadow.
const RESERVED_PARENTS: &[&str] = &["__all__", "__bad__", "torrents", "version.txt"];

pub(crate) fn validate(config: &AppConfig) -> ConfigResult<()> {
    if config.cache_dir.as_os_str().is_empty() {
        return Err(ConfigError::invalid("cache_dir must not be empty"));
    }
    if config.usenet_providers.is_empty() && config.debrid_providers.is_empty() {
        return Err(ConfigError::invalid(
            "at least one usenet or debrid provider is required",
        ));
    }

    let mut seen = HashSet::new();
    for provider in &config.usenet_providers {
        if provider.name.is_empty() || provider.address.is_empty() {
            return Err(ConfigError::invalid(
                "usenet providers require a name and address",
            ));
        }
        if provider.max_connections == 0 {
            return Err(ConfigError::invalid(format!(
                "usenet provider '{}' must allow at least one connection",
                provider.name
            )));
        }
        if !seen.insert(provider.name.clone()) {
            return Err(ConfigError::invalid(format!(
                "duplicate usenet provider name '{}'",
                provider.name
            )));
        }
    }

    let mut seen = HashSet::new();
    for provider in &config.debrid_providers {
        if provider.name.is_empty() || provider.api_url.is_empty() {
            return Err(ConfigError::invalid(
                "debrid providers require a name and api_url",
            ));
        }
        if provider.tokens.iter().all(String::is_empty) {
            return Err(ConfigError::invalid(format!(
                "debrid provider '{}' has no usable tokens",
                provider.name
            )));
        }
        if !seen.insert(provider.name.clone()) {
            return Err(ConfigError::invalid(format!(
                "duplicate debrid provider name '{}'",
                provider.name
            )));
        }
        for folder in &provider.folders {
            if RESERVED_PARENTS.contains(&folder.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "custom folder '{}' shadows a reserved parent",
                    folder.name
                )));
            }
            for filter in &folder.filters {
                validate_filter(&folder.name, filter.op, &filter.value)?;
            }
        }
    }
    Ok(())
}

fn validate_filter(folder: &str, op: FilterOp, value: &str) -> ConfigResult<()> {
    match op {
        FilterOp::Regex => {
            Regex::new(value).map_err(|err| {
                ConfigError::invalid(format!(
                    "folder '{folder}' has an invalid regex filter: {err}"
                ))
            })?;
        }
        FilterOp::SizeGt | FilterOp::SizeLt | FilterOp::LastAdded => {
            value.parse::<u64>().map_err(|_| {
                ConfigError::invalid(format!(
                    "folder '{folder}' filter '{value}' requires a numeric operand"
                ))
            })?;
        }
        FilterOp::Include
        | FilterOp::Exclude
        | FilterOp::StartsWith
        | FilterOp::EndsWith
        | FilterOp::ExactMatch => {
            if value.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "folder '{folder}' has an empty filter operand"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DebridProviderConfig, FolderFilter, VirtualFolderConfig};
    use std::path::PathBuf;

    fn base_config() -> AppConfig {
        AppConfig {
            log_level: "info".into(),
            log_format: String::new(),
            cache_dir: PathBuf::from("/tmp/nimbus"),
            webdav: crate::model::WebdavConfig::default(),
            streaming: crate::model::StreamingConfig::default(),
            usenet_providers: Vec::new(),
            categories: vec!["default".into()],
            debrid_providers: vec![DebridProviderConfig {
                name: "realdebrid".into(),
                api_url: "https://api.real-debrid.com/rest/1.0".into(),
                tokens: vec!["tok".into()],
                folder_naming: crate::model::FolderNaming::default(),
                workers: 8,
                torrent_refresh_secs: 900,
                download_links_refresh_secs: 2_400,
                auto_expire_links_after_hours: 48,
                serve_from_rclone: false,
                check_policy: crate::model::CheckPolicy::default(),
                folders: Vec::new(),
            }],
            rclone: None,
        }
    }

    #[test]
    fn base_config_passes() {
        validate(&base_config()).expect("valid");
    }

    #[test]
    fn no_providers_at_all_is_rejected() {
        let mut config = base_config();
        config.debrid_providers.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn reserved_folder_names_are_rejected() {
        let mut config = base_config();
        config.debrid_providers[0].folders.push(VirtualFolderConfig {
            name: "__all__".into(),
            filters: Vec::new(),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn bad_regex_filter_is_rejected() {
        let mut config = base_config();
        config.debrid_providers[0].folders.push(VirtualFolderConfig {
            name: "shows".into(),
            filters: vec![FolderFilter {
                op: FilterOp::Regex,
                value: "[unclosed".into(),
            }],
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn numeric_filters_require_numbers() {
        let mut config = base_config();
        config.debrid_providers[0].folders.push(VirtualFolderConfig {
            name: "big".into(),
            filters: vec![FolderFilter {
                op: FilterOp::SizeGt,
                value: "huge".into(),
            }],
        });
        assert!(validate(&config).is_err());
    }
}
