use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::ValueEnum;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::ExperimentId;
use crate::error::CalsyncError;

/// Directory name under the home directory used when no cache root is
/// configured.
pub const DEFAULT_CACHE_DIR_NAME: &str = ".from_cloud_storage";

/// How cache entries are grouped under the cache root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    /// Entries sit directly under the cache root.
    Flat,
    /// Entries nest under a `YYYY-MM-DD` folder derived from `created_at`.
    ByDate,
}

/// Which side of the `_` separator carries the experiment id in an entry
/// directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NamingOrder {
    /// `<id>_<name>`
    IdFirst,
    /// `<name>_<id>`
    NameFirst,
}

/// Deterministic mapping from experiment identity to a cache directory, plus
/// watermark inspection over whatever is already on disk.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    cache_root: Utf8PathBuf,
    partition: Partition,
    naming: NamingOrder,
    date_offset_hours: i64,
}

impl CacheLayout {
    pub fn new(
        cache_root: Utf8PathBuf,
        partition: Partition,
        naming: NamingOrder,
        date_offset_hours: i64,
    ) -> Self {
        Self {
            cache_root,
            partition,
            naming,
            date_offset_hours,
        }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn ensure_cache_root(&self) -> Result<(), CalsyncError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| CalsyncError::Filesystem(err.to_string()))
    }

    /// The entry directory for one experiment. Injective over `id` for a
    /// fixed cache root: the id component is preserved verbatim even when the
    /// name needs sanitizing.
    pub fn directory_for(
        &self,
        id: ExperimentId,
        name: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Utf8PathBuf {
        let entry = self.entry_name(id, name);
        match (self.partition, created_at) {
            (Partition::ByDate, Some(created_at)) => self
                .cache_root
                .join(self.date_folder(created_at))
                .join(entry),
            // No timestamp means no date folder; the entry lands at the root.
            _ => self.cache_root.join(entry),
        }
    }

    pub fn entry_name(&self, id: ExperimentId, name: &str) -> String {
        let name = sanitize_name(name);
        match self.naming {
            NamingOrder::IdFirst => format!("{id}_{name}"),
            NamingOrder::NameFirst => format!("{name}_{id}"),
        }
    }

    /// The date-partition folder for a timestamp, shifted by the configured
    /// offset before taking the calendar date.
    pub fn date_folder(&self, created_at: DateTime<Utc>) -> String {
        let shifted = created_at + Duration::hours(self.date_offset_hours);
        shifted.format("%Y-%m-%d").to_string()
    }

    /// Parse the experiment id out of an entry directory name under the
    /// configured naming order. Returns `None` for anything that does not
    /// follow the convention.
    pub fn parse_entry_id(&self, dir_name: &str) -> Option<ExperimentId> {
        let candidate = match self.naming {
            NamingOrder::IdFirst => dir_name.split_once('_').map(|(id, _)| id)?,
            NamingOrder::NameFirst => dir_name.rsplit_once('_').map(|(_, id)| id)?,
        };
        candidate.parse().ok()
    }

    /// The highest experiment id already present in the cache, or `None`
    /// when the cache is empty or does not exist yet. With date partitioning
    /// enabled the scan descends one level into partition folders.
    pub fn current_watermark(&self) -> Result<Option<ExperimentId>, CalsyncError> {
        if !self.cache_root.as_std_path().exists() {
            return Ok(None);
        }
        let mut watermark: Option<ExperimentId> = None;
        for name in list_dir_names(&self.cache_root)? {
            if let Some(id) = self.parse_entry_id(&name) {
                watermark = watermark.max(Some(id));
            } else if self.partition == Partition::ByDate {
                let partition_dir = self.cache_root.join(&name);
                for nested in list_dir_names(&partition_dir)? {
                    if let Some(id) = self.parse_entry_id(&nested) {
                        watermark = watermark.max(Some(id));
                    }
                }
            }
        }
        Ok(watermark)
    }

    /// Count cache entries (same traversal as the watermark scan).
    pub fn entry_count(&self) -> Result<usize, CalsyncError> {
        if !self.cache_root.as_std_path().exists() {
            return Ok(0);
        }
        let mut count = 0usize;
        for name in list_dir_names(&self.cache_root)? {
            if self.parse_entry_id(&name).is_some() {
                count += 1;
            } else if self.partition == Partition::ByDate {
                let partition_dir = self.cache_root.join(&name);
                count += list_dir_names(&partition_dir)?
                    .into_iter()
                    .filter(|nested| self.parse_entry_id(nested).is_some())
                    .count();
            }
        }
        Ok(count)
    }
}

/// The default cache root, `~/.from_cloud_storage`.
pub fn default_cache_root() -> Result<Utf8PathBuf, CalsyncError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(DEFAULT_CACHE_DIR_NAME)).ok()
        })
        .ok_or_else(|| CalsyncError::Filesystem("unable to resolve home directory".to_string()))
}

/// True when a directory name looks like a `YYYY-MM-DD` partition folder.
pub fn is_date_folder(name: &str) -> bool {
    NaiveDate::parse_from_str(name, "%Y-%m-%d").is_ok()
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_whitespace() || ch == '/' || ch == '\\' {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

pub(crate) fn list_dir_names(root: &Utf8Path) -> Result<Vec<String>, CalsyncError> {
    let entries =
        fs::read_dir(root.as_std_path()).map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
