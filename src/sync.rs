use std::fs;
use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;

use crate::bundle;
use crate::domain::{DatasetKind, ExperimentId};
use crate::error::CalsyncError;
use crate::hierarchy::HierarchyMapper;
use crate::layout::{CacheLayout, is_date_folder, list_dir_names};
use crate::remote::{DatasetStore, NodeHandle};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Outcome of one collection or fetch pass.
#[derive(Debug, Clone, Serialize)]
pub struct CollectReport {
    pub listed: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub dataset_id: String,
    pub name: String,
    pub figures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub dataset_id: String,
    pub figures_checked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeReport {
    pub moved: usize,
    pub skipped: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub cache_root: String,
    pub watermark: Option<u64>,
    pub entries: usize,
}

enum Materialized {
    Written,
    AlreadyPresent,
}

/// Drives synchronization between the remote dataset store and the local
/// cache. One engine per (store, cache layout) pair; every operation is a
/// single sequential pass.
pub struct SyncEngine<S: DatasetStore> {
    remote: S,
    layout: CacheLayout,
}

impl<S: DatasetStore> SyncEngine<S> {
    pub fn new(remote: S, layout: CacheLayout) -> Self {
        Self { remote, layout }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// One incremental collection pass: list up to `max_experiments` remote
    /// experiments (newest first), take the prefix above the current
    /// watermark, pull and materialize each, and report counts.
    ///
    /// The cutoff relies on the store returning the list sorted newest
    /// first; the engine never re-sorts (sorting here would need unbounded
    /// history to be sound). A failed experiment is recorded and skipped,
    /// never fatal to the pass, and leaves nothing behind on disk. Note that
    /// a failure below the next run's watermark is not retried automatically;
    /// `fetch_latest` re-materializes such gaps on demand.
    pub fn collect(
        &self,
        max_experiments: usize,
        sink: &dyn ProgressSink,
    ) -> Result<CollectReport, CalsyncError> {
        self.layout.ensure_cache_root()?;
        let watermark = self.layout.current_watermark()?;
        if let Some(watermark) = watermark {
            sink.event(ProgressEvent {
                message: format!("phase=Filter; watermark={watermark}"),
                elapsed: None,
            });
        }
        self.run_pass(max_experiments, watermark, sink)
    }

    /// Fetch the newest `limit` experiments unconditionally, skipping only
    /// entries that already exist on disk.
    pub fn fetch_latest(
        &self,
        limit: usize,
        sink: &dyn ProgressSink,
    ) -> Result<CollectReport, CalsyncError> {
        self.layout.ensure_cache_root()?;
        self.run_pass(limit, None, sink)
    }

    fn run_pass(
        &self,
        limit: usize,
        watermark: Option<ExperimentId>,
        sink: &dyn ProgressSink,
    ) -> Result<CollectReport, CalsyncError> {
        sink.event(ProgressEvent {
            message: "phase=List; listing remote experiments".to_string(),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let handles = self.remote.list(DatasetKind::Node, limit)?;
        sink.event(ProgressEvent {
            message: format!("datasets.list count={}", handles.len()),
            elapsed: Some(start.elapsed()),
        });

        let listed = handles.len();
        let mut report = CollectReport {
            listed,
            skipped: 0,
            processed: 0,
            failed: 0,
            failed_ids: Vec::new(),
        };

        for (index, handle) in handles.iter().enumerate() {
            let id = match handle.id.parse::<ExperimentId>() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(id = %handle.id, %err, "unparseable experiment id");
                    report.failed += 1;
                    report.failed_ids.push(handle.id.clone());
                    continue;
                }
            };

            if let Some(watermark) = watermark {
                if id <= watermark {
                    // The list is newest first, so everything from here on
                    // is at or below the watermark.
                    report.skipped += listed - index;
                    sink.event(ProgressEvent {
                        message: format!("phase=Filter; reached cached id {id}, stopping"),
                        elapsed: None,
                    });
                    break;
                }
            }

            match self.materialize(id, handle, sink) {
                Ok(Materialized::Written) => report.processed += 1,
                Ok(Materialized::AlreadyPresent) => report.skipped += 1,
                Err(err) => {
                    tracing::warn!(%id, %err, "experiment failed");
                    sink.event(ProgressEvent {
                        message: format!("phase=Pull; experiment {id} failed: {err}"),
                        elapsed: None,
                    });
                    report.failed += 1;
                    report.failed_ids.push(id.to_string());
                }
            }
        }

        Ok(report)
    }

    fn materialize(
        &self,
        id: ExperimentId,
        handle: &NodeHandle,
        sink: &dyn ProgressSink,
    ) -> Result<Materialized, CalsyncError> {
        let name = match &handle.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.parent_name(&handle.id)?,
        };
        sink.event(ProgressEvent {
            message: format!("phase=Pull; experiment {id} ({name})"),
            elapsed: None,
        });

        let target = self.layout.directory_for(id, &name, handle.created_at);
        if target.as_std_path().exists() {
            return Ok(Materialized::AlreadyPresent);
        }

        let mapper = HierarchyMapper::new(&self.remote);
        let (pulled, pull_report) = mapper.pull(&handle.id, false)?;
        if pull_report.figures_skipped > 0 {
            tracing::warn!(
                %id,
                skipped = pull_report.figures_skipped,
                "figures with undecodable records skipped"
            );
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Pull; {} figure record(s) skipped",
                    pull_report.figures_skipped
                ),
                elapsed: None,
            });
        }

        // An incomplete bundle is never persisted; into_bundle turns missing
        // parts into a MalformedBundle failure for this one experiment.
        let bundle = pulled.into_bundle(name)?;
        bundle::write_bundle(&target, &bundle)?;
        sink.event(ProgressEvent {
            message: format!("phase=Store; wrote {target}"),
            elapsed: None,
        });
        Ok(Materialized::Written)
    }

    fn parent_name(&self, dataset_id: &str) -> Result<String, CalsyncError> {
        let record = self.remote.get(dataset_id)?;
        record
            .data
            .get("name")
            .and_then(|value| value.as_str())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .ok_or(CalsyncError::MissingExperimentName)
    }

    /// Push one local experiment directory to the remote store.
    pub fn upload(
        &self,
        dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<UploadReport, CalsyncError> {
        sink.event(ProgressEvent {
            message: format!("phase=Prepare; loading bundle from {dir}"),
            elapsed: None,
        });
        let bundle = bundle::load_bundle(dir)?;
        let figures = bundle.figures.len();

        sink.event(ProgressEvent {
            message: format!("phase=Push; uploading {}", bundle.name),
            elapsed: None,
        });
        let mapper = HierarchyMapper::new(&self.remote);
        let dataset_id = mapper.push(&bundle, dir.as_str())?;

        Ok(UploadReport {
            dataset_id,
            name: bundle.name,
            figures,
        })
    }

    /// Round-trip self-test: push a local bundle, pull it straight back in
    /// strict mode and compare every part byte for byte.
    pub fn verify(
        &self,
        dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<VerifyReport, CalsyncError> {
        let bundle = bundle::load_bundle(dir)?;
        let mapper = HierarchyMapper::new(&self.remote);
        let dataset_id = mapper.push(&bundle, dir.as_str())?;
        sink.event(ProgressEvent {
            message: format!("phase=Verify; re-pulling dataset {dataset_id}"),
            elapsed: None,
        });

        let (pulled, _) = mapper.pull(&dataset_id, true)?;
        let round = pulled.into_bundle(bundle.name.clone())?;

        if round.metadata != bundle.metadata {
            return Err(CalsyncError::Verification("node document mismatch".to_string()));
        }
        if round.state != bundle.state {
            return Err(CalsyncError::Verification("state document mismatch".to_string()));
        }
        if round.wiring != bundle.wiring {
            return Err(CalsyncError::Verification("wiring document mismatch".to_string()));
        }
        if round.figures != bundle.figures {
            return Err(CalsyncError::Verification("figure content mismatch".to_string()));
        }

        Ok(VerifyReport {
            dataset_id,
            figures_checked: bundle.figures.len(),
        })
    }

    /// Migrate flat cache entries into date-partition folders, reading each
    /// entry's node document for its timestamp. Entries without a readable
    /// timestamp stay where they are with a warning; an entry whose target
    /// already exists is skipped, never overwritten.
    pub fn organize(&self, sink: &dyn ProgressSink) -> Result<OrganizeReport, CalsyncError> {
        let root = self.layout.cache_root();
        let mut report = OrganizeReport {
            moved: 0,
            skipped: 0,
            warnings: 0,
        };
        if !root.as_std_path().exists() {
            return Ok(report);
        }

        for name in list_dir_names(root)? {
            if is_date_folder(&name) {
                continue;
            }
            let entry_dir = root.join(&name);

            let created_at = match bundle::read_node_document(&entry_dir) {
                Ok(doc) => bundle::node_created_at(&doc),
                Err(err) => {
                    tracing::warn!(entry = %name, %err, "skipping entry without node document");
                    report.warnings += 1;
                    continue;
                }
            };
            let Some(created_at) = created_at else {
                tracing::warn!(entry = %name, "skipping entry without created_at");
                report.warnings += 1;
                continue;
            };

            let date_folder = self.layout.date_folder(created_at);
            let target_dir = root.join(&date_folder);
            let target = target_dir.join(&name);
            if target.as_std_path().exists() {
                report.skipped += 1;
                continue;
            }

            fs::create_dir_all(target_dir.as_std_path())
                .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
            fs::rename(entry_dir.as_std_path(), target.as_std_path())
                .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
            sink.event(ProgressEvent {
                message: format!("phase=Store; moved {name} to {date_folder}"),
                elapsed: None,
            });
            report.moved += 1;
        }

        Ok(report)
    }

    /// Cache root, watermark and entry count, for operator inspection.
    pub fn status(&self) -> Result<StatusReport, CalsyncError> {
        Ok(StatusReport {
            cache_root: self.layout.cache_root().to_string(),
            watermark: self.layout.current_watermark()?.map(|id| id.value()),
            entries: self.layout.entry_count()?,
        })
    }
}
