use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::CalsyncError;
use crate::layout::{CacheLayout, NamingOrder, Partition, default_cache_root};

pub const DEFAULT_CONFIG_FILE: &str = "calsync.json";
pub const DEFAULT_BASE_URL: &str = "https://datasets.iqcc.cloud/api/v1";
pub const DEFAULT_DATASTORE: &str = "iqcc";
pub const DEFAULT_MAX_EXPERIMENTS: usize = 1000;
/// Calendar dates for partition folders are taken in GMT+3, matching the
/// lab's local time.
pub const DEFAULT_DATE_OFFSET_HOURS: i64 = 3;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub remote: Option<RemoteSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub max_experiments: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RemoteSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub datastore: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub partition: Option<Partition>,
    #[serde(default)]
    pub naming: Option<NamingOrder>,
    #[serde(default)]
    pub date_offset_hours: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub datastore: String,
    pub cache_root: Utf8PathBuf,
    pub partition: Partition,
    pub naming: NamingOrder,
    pub date_offset_hours: i64,
    pub max_experiments: usize,
}

impl ResolvedConfig {
    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(
            self.cache_root.clone(),
            self.partition,
            self.naming,
            self.date_offset_hours,
        )
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolve configuration from an explicit path, the default
    /// `calsync.json` in the current directory, or built-in defaults when no
    /// file exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CalsyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CalsyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CalsyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CalsyncError> {
        let remote = config.remote.unwrap_or_default();
        let cache = config.cache.unwrap_or_default();

        let cache_root = match cache.root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_cache_root()?,
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            base_url: remote.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            datastore: remote
                .datastore
                .unwrap_or_else(|| DEFAULT_DATASTORE.to_string()),
            cache_root,
            partition: cache.partition.unwrap_or(Partition::Flat),
            naming: cache.naming.unwrap_or(NamingOrder::IdFirst),
            date_offset_hours: cache.date_offset_hours.unwrap_or(DEFAULT_DATE_OFFSET_HOURS),
            max_experiments: config.max_experiments.unwrap_or(DEFAULT_MAX_EXPERIMENTS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.base_url, DEFAULT_BASE_URL);
        assert_eq!(resolved.datastore, DEFAULT_DATASTORE);
        assert_eq!(resolved.partition, Partition::Flat);
        assert_eq!(resolved.naming, NamingOrder::IdFirst);
        assert_eq!(resolved.date_offset_hours, DEFAULT_DATE_OFFSET_HOURS);
        assert_eq!(resolved.max_experiments, DEFAULT_MAX_EXPERIMENTS);
    }

    #[test]
    fn resolve_config_sections() {
        let config: Config = serde_json::from_str(
            r#"{
                "remote": {"base_url": "https://staging.example/api", "datastore": "lab"},
                "cache": {
                    "root": "/tmp/exp-cache",
                    "partition": "by-date",
                    "naming": "name-first",
                    "date_offset_hours": 0
                },
                "max_experiments": 50
            }"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.base_url, "https://staging.example/api");
        assert_eq!(resolved.datastore, "lab");
        assert_eq!(resolved.cache_root, Utf8PathBuf::from("/tmp/exp-cache"));
        assert_eq!(resolved.partition, Partition::ByDate);
        assert_eq!(resolved.naming, NamingOrder::NameFirst);
        assert_eq!(resolved.date_offset_hours, 0);
        assert_eq!(resolved.max_experiments, 50);
    }
}
