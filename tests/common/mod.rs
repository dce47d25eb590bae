//! Shared in-memory `DatasetStore` for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use calsync::codec;
use calsync::domain::DatasetKind;
use calsync::error::CalsyncError;
use calsync::remote::{DatasetStore, NodeHandle, NodeRecord};

#[derive(Debug, Clone)]
struct StoredNode {
    id: u64,
    kind: DatasetKind,
    data: Value,
    parent: Option<u64>,
    name: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    nodes: Vec<StoredNode>,
    failing_parents: HashSet<u64>,
}

/// In-memory dataset store. `list` returns `node` entries newest first
/// (highest id first), matching the remote store's ordering contract.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        // Auto-assigned ids start high so seeded experiment ids (small
        // numbers picked by tests) never collide with child ids.
        Self {
            inner: Mutex::new(Inner {
                next_id: 1000,
                ..Inner::default()
            }),
        }
    }

    /// Seed one complete experiment (parent + three singletons + figures)
    /// with an explicit parent id. Returns the parent id as a string.
    pub fn seed_experiment(
        &self,
        id: u64,
        name: &str,
        created_at: Option<DateTime<Utc>>,
        figures: &[(&str, &[u8])],
    ) -> String {
        let parent = self.insert_with_id(
            id,
            DatasetKind::Node,
            json!({"name": name}),
            None,
            Some(name.to_string()),
            created_at,
        );
        self.insert(
            DatasetKind::NodeInfo,
            json!({"metadata": {"name": name}, "created_at": created_at.map(|t| t.to_rfc3339())}),
            Some(parent),
        );
        self.insert(DatasetKind::State, json!({"qubits": id}), Some(parent));
        self.insert(DatasetKind::Wiring, json!({"feedline": 1}), Some(parent));
        for (file_name, bytes) in figures {
            self.insert(
                DatasetKind::Figure,
                codec::encode_figure(file_name, bytes),
                Some(parent),
            );
        }
        parent.to_string()
    }

    /// Seed an experiment missing some singleton children.
    pub fn seed_partial_experiment(
        &self,
        id: u64,
        name: &str,
        with_state: bool,
        with_wiring: bool,
    ) -> String {
        let parent = self.insert_with_id(
            id,
            DatasetKind::Node,
            json!({"name": name}),
            None,
            Some(name.to_string()),
            None,
        );
        self.insert(
            DatasetKind::NodeInfo,
            json!({"metadata": {"name": name}}),
            Some(parent),
        );
        if with_state {
            self.insert(DatasetKind::State, json!({"qubits": id}), Some(parent));
        }
        if with_wiring {
            self.insert(DatasetKind::Wiring, json!({"feedline": 1}), Some(parent));
        }
        parent.to_string()
    }

    /// Attach an arbitrary child record to an existing parent.
    pub fn add_child(&self, parent: &str, kind: DatasetKind, data: Value) {
        let parent: u64 = parent.parse().expect("numeric parent id");
        self.insert(kind, data, Some(parent));
    }

    /// Make every `list_children` call for this parent fail, simulating a
    /// transport error while pulling that one experiment.
    pub fn fail_children_of(&self, parent: &str) {
        let parent: u64 = parent.parse().expect("numeric parent id");
        self.inner.lock().unwrap().failing_parents.insert(parent);
    }

    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failing_parents.clear();
    }

    /// Count stored nodes of one kind, for push-shape assertions.
    pub fn count_of_kind(&self, kind: DatasetKind) -> usize {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .iter()
            .filter(|node| node.kind == kind)
            .count()
    }

    /// Data documents of every child of `parent` with the given kind.
    pub fn child_data(&self, parent: &str, kind: DatasetKind) -> Vec<Value> {
        let parent: u64 = parent.parse().expect("numeric parent id");
        self.inner
            .lock()
            .unwrap()
            .nodes
            .iter()
            .filter(|node| node.kind == kind && node.parent == Some(parent))
            .map(|node| node.data.clone())
            .collect()
    }

    fn insert(&self, kind: DatasetKind, data: Value, parent: Option<u64>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.push(StoredNode {
            id,
            kind,
            data,
            parent,
            name: None,
            created_at: None,
        });
        id
    }

    fn insert_with_id(
        &self,
        id: u64,
        kind: DatasetKind,
        data: Value,
        parent: Option<u64>,
        name: Option<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id = inner.next_id.max(id + 1);
        inner.nodes.push(StoredNode {
            id,
            kind,
            data,
            parent,
            name,
            created_at,
        });
        id
    }
}

impl DatasetStore for MemoryStore {
    fn push(
        &self,
        kind: DatasetKind,
        data: &Value,
        parent: Option<&str>,
    ) -> Result<NodeHandle, CalsyncError> {
        let parent = match parent {
            Some(parent) => Some(
                parent
                    .parse::<u64>()
                    .map_err(|_| CalsyncError::RemoteUnavailable("bad parent id".to_string()))?,
            ),
            None => None,
        };
        let name = data
            .get("name")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string());
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.nodes.push(StoredNode {
            id,
            kind,
            data: data.clone(),
            parent,
            name: name.clone(),
            created_at: Some(Utc::now()),
        });
        Ok(NodeHandle {
            id: id.to_string(),
            name,
            created_at: None,
        })
    }

    fn list(&self, kind: DatasetKind, limit: usize) -> Result<Vec<NodeHandle>, CalsyncError> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<&StoredNode> = inner
            .nodes
            .iter()
            .filter(|node| node.kind == kind)
            .collect();
        nodes.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(nodes
            .into_iter()
            .take(limit)
            .map(|node| NodeHandle {
                id: node.id.to_string(),
                name: node.name.clone(),
                created_at: node.created_at,
            })
            .collect())
    }

    fn list_children(
        &self,
        kind: DatasetKind,
        parent: &str,
    ) -> Result<Vec<NodeHandle>, CalsyncError> {
        let parent: u64 = parent
            .parse()
            .map_err(|_| CalsyncError::RemoteUnavailable("bad parent id".to_string()))?;
        let inner = self.inner.lock().unwrap();
        if inner.failing_parents.contains(&parent) {
            return Err(CalsyncError::RemoteUnavailable(
                "injected transport failure".to_string(),
            ));
        }
        Ok(inner
            .nodes
            .iter()
            .filter(|node| node.kind == kind && node.parent == Some(parent))
            .map(|node| NodeHandle {
                id: node.id.to_string(),
                name: node.name.clone(),
                created_at: node.created_at,
            })
            .collect())
    }

    fn get(&self, id: &str) -> Result<NodeRecord, CalsyncError> {
        let id: u64 = id
            .parse()
            .map_err(|_| CalsyncError::RemoteUnavailable("bad dataset id".to_string()))?;
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .iter()
            .find(|node| node.id == id)
            .map(|node| NodeRecord {
                id: node.id.to_string(),
                data: node.data.clone(),
            })
            .ok_or(CalsyncError::RemoteStatus {
                status: 404,
                message: format!("dataset {id} not found"),
            })
    }
}
