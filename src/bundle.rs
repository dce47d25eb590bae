use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::Builder;

use crate::domain::ExperimentBundle;
use crate::error::CalsyncError;

pub const NODE_FILE: &str = "node.json";
pub const STATE_DIR: &str = "quam_state";
pub const STATE_FILE: &str = "state.json";
pub const WIRING_FILE: &str = "wiring.json";

/// Load an experiment bundle from its on-disk layout: `node.json` at the
/// root, `state.json` and `wiring.json` under `quam_state/`, and every
/// `*.png` at the root as a figure.
pub fn load_bundle(dir: &Utf8Path) -> Result<ExperimentBundle, CalsyncError> {
    let metadata = read_json(&dir.join(NODE_FILE))?;
    let name = ExperimentBundle::name_from_metadata(&metadata)
        .ok_or(CalsyncError::MissingExperimentName)?
        .to_string();

    let state = read_json(&dir.join(STATE_DIR).join(STATE_FILE))?;
    let wiring = read_json(&dir.join(STATE_DIR).join(WIRING_FILE))?;

    let mut figures = BTreeMap::new();
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().map(|ext| ext != "png").unwrap_or(true) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let bytes =
            fs::read(&path).map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
        figures.insert(file_name, bytes);
    }

    Ok(ExperimentBundle {
        name,
        metadata,
        state,
        wiring,
        figures,
    })
}

/// Write a bundle to `target` atomically: everything goes into a fresh temp
/// directory next to the target first, then one rename moves it into place,
/// so an interrupted run never leaves a half-populated entry.
pub fn write_bundle(target: &Utf8Path, bundle: &ExperimentBundle) -> Result<(), CalsyncError> {
    let parent = target
        .parent()
        .ok_or_else(|| CalsyncError::Filesystem("invalid cache entry path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;

    let temp_dir = Builder::new()
        .prefix("calsync-entry")
        .tempdir_in(parent.as_std_path())
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;

    write_json(&temp_dir.path().join(NODE_FILE), &bundle.metadata)?;
    let state_dir = temp_dir.path().join(STATE_DIR);
    fs::create_dir_all(&state_dir).map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    write_json(&state_dir.join(STATE_FILE), &bundle.state)?;
    write_json(&state_dir.join(WIRING_FILE), &bundle.wiring)?;

    for (file_name, bytes) in &bundle.figures {
        fs::write(temp_dir.path().join(file_name), bytes)
            .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    }

    atomic_rename_dir(temp_dir.path(), target.as_std_path())
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))
}

/// Read just the node document of a cache entry.
pub fn read_node_document(dir: &Utf8Path) -> Result<Value, CalsyncError> {
    read_json(&dir.join(NODE_FILE))
}

/// The `created_at` timestamp recorded in a node document, if present and
/// parseable as RFC 3339.
pub fn node_created_at(metadata: &Value) -> Option<DateTime<Utc>> {
    metadata
        .get("created_at")
        .and_then(|value| value.as_str())
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

fn read_json(path: &Utf8Path) -> Result<Value, CalsyncError> {
    if !path.as_std_path().exists() {
        return Err(CalsyncError::NotFound(path.to_string()));
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    serde_json::from_str(&content).map_err(|err| {
        CalsyncError::MalformedBundle(format!("{}: {err}", path.file_name().unwrap_or("json")))
    })
}

fn write_json(path: &Path, value: &Value) -> Result<(), CalsyncError> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
    fs::write(path, &content).map_err(|err| CalsyncError::Filesystem(err.to_string()))
}
