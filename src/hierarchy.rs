use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::codec;
use crate::domain::{DatasetKind, ExperimentBundle};
use crate::error::CalsyncError;
use crate::remote::DatasetStore;

/// What a pull recovered. Singleton parts may be absent; whether that is
/// acceptable is the caller's decision, not this type's.
#[derive(Debug, Clone, Default)]
pub struct PulledBundle {
    pub metadata: Option<Value>,
    pub state: Option<Value>,
    pub wiring: Option<Value>,
    pub figures: BTreeMap<String, Vec<u8>>,
}

impl PulledBundle {
    pub fn missing_parts(&self) -> Vec<DatasetKind> {
        let mut missing = Vec::new();
        if self.metadata.is_none() {
            missing.push(DatasetKind::NodeInfo);
        }
        if self.state.is_none() {
            missing.push(DatasetKind::State);
        }
        if self.wiring.is_none() {
            missing.push(DatasetKind::Wiring);
        }
        missing
    }

    /// Convert a complete pull into a bundle, failing when any required part
    /// is absent.
    pub fn into_bundle(self, name: String) -> Result<ExperimentBundle, CalsyncError> {
        let missing = self.missing_parts();
        if !missing.is_empty() {
            let parts = missing
                .iter()
                .map(DatasetKind::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CalsyncError::MalformedBundle(format!(
                "missing parts: {parts}"
            )));
        }
        Ok(ExperimentBundle {
            name,
            metadata: self.metadata.unwrap_or_default(),
            state: self.state.unwrap_or_default(),
            wiring: self.wiring.unwrap_or_default(),
            figures: self.figures,
        })
    }
}

/// Per-pull bookkeeping surfaced to the caller alongside the data.
#[derive(Debug, Clone, Default)]
pub struct PullReport {
    pub missing: Vec<DatasetKind>,
    pub figures_fetched: usize,
    pub figures_skipped: usize,
}

/// Translates one experiment bundle to and from the parent/child dataset
/// shape, over an injected store.
pub struct HierarchyMapper<'a, S: DatasetStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: DatasetStore + ?Sized> HierarchyMapper<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Push a bundle as one parent `node` plus its children. Returns the
    /// parent dataset id. All children exist once this returns; their
    /// relative order is not part of the contract.
    pub fn push(&self, bundle: &ExperimentBundle, local_dir: &str) -> Result<String, CalsyncError> {
        let parent = self.store.push(
            DatasetKind::Node,
            &json!({"local_dir": local_dir, "name": bundle.name}),
            None,
        )?;

        self.store
            .push(DatasetKind::NodeInfo, &bundle.metadata, Some(&parent.id))?;
        self.store
            .push(DatasetKind::State, &bundle.state, Some(&parent.id))?;
        self.store
            .push(DatasetKind::Wiring, &bundle.wiring, Some(&parent.id))?;

        for (file_name, bytes) in &bundle.figures {
            let record = codec::encode_figure(file_name, bytes);
            self.store
                .push(DatasetKind::Figure, &record, Some(&parent.id))?;
        }

        Ok(parent.id)
    }

    /// Pull the children of `dataset_id` back into bundle parts.
    ///
    /// Singleton lookups take the first child of each kind; zero children
    /// leaves that part absent and records it in the report. Under
    /// `strict = false` a figure whose record cannot be decoded (wrong type
    /// tag, missing file name) is skipped and counted; under `strict = true`
    /// any absent singleton is a `MalformedBundle` error and any unsupported
    /// figure type fails the pull with `UnexpectedFigureType`.
    pub fn pull(
        &self,
        dataset_id: &str,
        strict: bool,
    ) -> Result<(PulledBundle, PullReport), CalsyncError> {
        let mut pulled = PulledBundle {
            metadata: self.pull_singleton(DatasetKind::NodeInfo, dataset_id)?,
            state: self.pull_singleton(DatasetKind::State, dataset_id)?,
            wiring: self.pull_singleton(DatasetKind::Wiring, dataset_id)?,
            figures: BTreeMap::new(),
        };
        let mut report = PullReport {
            missing: pulled.missing_parts(),
            figures_fetched: 0,
            figures_skipped: 0,
        };

        if strict && !report.missing.is_empty() {
            let parts = report
                .missing
                .iter()
                .map(DatasetKind::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CalsyncError::MalformedBundle(format!(
                "missing parts: {parts}"
            )));
        }

        for child in self
            .store
            .list_children(DatasetKind::Figure, dataset_id)?
        {
            let record = self.store.get(&child.id)?;
            match codec::decode_figure(&record.data) {
                Ok((file_name, bytes)) => {
                    pulled.figures.insert(file_name, bytes);
                    report.figures_fetched += 1;
                }
                Err(CalsyncError::UnsupportedFigureType(tag)) => {
                    if strict {
                        return Err(CalsyncError::UnexpectedFigureType(tag));
                    }
                    report.figures_skipped += 1;
                }
                Err(CalsyncError::MissingFileName) => {
                    if strict {
                        return Err(CalsyncError::MissingFileName);
                    }
                    report.figures_skipped += 1;
                }
                // Corrupt payload data fails the pull in either mode.
                Err(err) => return Err(err),
            }
        }

        Ok((pulled, report))
    }

    fn pull_singleton(
        &self,
        kind: DatasetKind,
        parent: &str,
    ) -> Result<Option<Value>, CalsyncError> {
        let children = self.store.list_children(kind, parent)?;
        // Duplicates are not meaningful under this model; first child wins.
        let Some(first) = children.first() else {
            return Ok(None);
        };
        let record = self.store.get(&first.id)?;
        Ok(Some(record.data))
    }
}
