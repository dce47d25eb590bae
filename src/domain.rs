use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CalsyncError;

/// Identifier assigned to an experiment by the remote store. Ids are
/// digits-only and monotonically increasing in creation order, which is what
/// makes the watermark comparison sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(u64);

impl ExperimentId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ExperimentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for ExperimentId {
    type Err = CalsyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(CalsyncError::InvalidExperimentId(value.to_string()));
        }
        let numeric = trimmed
            .parse::<u64>()
            .map_err(|_| CalsyncError::InvalidExperimentId(value.to_string()))?;
        Ok(Self(numeric))
    }
}

/// The four child kinds of the remote hierarchy plus the parent kind itself.
/// `node_info`, `state` and `wiring` are singletons under a parent; `figure`
/// repeats once per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Node,
    NodeInfo,
    State,
    Wiring,
    Figure,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Node => "node",
            DatasetKind::NodeInfo => "node_info",
            DatasetKind::State => "state",
            DatasetKind::Wiring => "wiring",
            DatasetKind::Figure => "figure",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One experiment's worth of data: the unit of synchronization.
///
/// A bundle is well-formed only when `metadata`, `state` and `wiring` are all
/// present, which this type guarantees by construction; partial pulls live in
/// `hierarchy::PulledBundle` until they are complete.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentBundle {
    pub name: String,
    pub metadata: Value,
    pub state: Value,
    pub wiring: Value,
    pub figures: BTreeMap<String, Vec<u8>>,
}

impl ExperimentBundle {
    /// Extract the experiment name from a node metadata document
    /// (`metadata.name` within the document, as the calibration tool writes it).
    pub fn name_from_metadata(metadata: &Value) -> Option<&str> {
        metadata
            .get("metadata")
            .and_then(|meta| meta.get("name"))
            .and_then(|name| name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_experiment_id_valid() {
        let id: ExperimentId = "3987".parse().unwrap();
        assert_eq!(id.value(), 3987);
        assert_eq!(id.to_string(), "3987");
    }

    #[test]
    fn parse_experiment_id_invalid() {
        let err = "ramsey".parse::<ExperimentId>().unwrap_err();
        assert_matches!(err, CalsyncError::InvalidExperimentId(_));
        let err = "".parse::<ExperimentId>().unwrap_err();
        assert_matches!(err, CalsyncError::InvalidExperimentId(_));
        let err = "12_34".parse::<ExperimentId>().unwrap_err();
        assert_matches!(err, CalsyncError::InvalidExperimentId(_));
    }

    #[test]
    fn experiment_id_orders_numerically() {
        let small: ExperimentId = "99".parse().unwrap();
        let large: ExperimentId = "108".parse().unwrap();
        assert!(small < large);
    }

    #[test]
    fn dataset_kind_wire_names() {
        assert_eq!(DatasetKind::NodeInfo.as_str(), "node_info");
        assert_eq!(DatasetKind::Figure.to_string(), "figure");
    }

    #[test]
    fn name_from_metadata_nested_path() {
        let doc = json!({"metadata": {"name": "ramsey_flux_calibration"}});
        assert_eq!(
            ExperimentBundle::name_from_metadata(&doc),
            Some("ramsey_flux_calibration")
        );
        assert_eq!(ExperimentBundle::name_from_metadata(&json!({})), None);
        assert_eq!(
            ExperimentBundle::name_from_metadata(&json!({"metadata": {"name": ""}})),
            None
        );
    }
}
