use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::DatasetKind;
use crate::error::CalsyncError;

/// A node reference as returned by listing calls. `name` and `created_at`
/// are only populated for parent (`node`) entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHandle {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A fully fetched node with its data document.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub data: Value,
}

/// The remote hierarchical dataset store boundary. The HTTP implementation
/// below talks to the real service; tests inject in-memory stores.
///
/// `list` returns entries newest first. That ordering is the store's
/// contract, not something this crate enforces or re-checks.
pub trait DatasetStore: Send + Sync {
    fn push(
        &self,
        kind: DatasetKind,
        data: &Value,
        parent: Option<&str>,
    ) -> Result<NodeHandle, CalsyncError>;

    fn list(&self, kind: DatasetKind, limit: usize) -> Result<Vec<NodeHandle>, CalsyncError>;

    fn list_children(
        &self,
        kind: DatasetKind,
        parent: &str,
    ) -> Result<Vec<NodeHandle>, CalsyncError>;

    fn get(&self, id: &str) -> Result<NodeRecord, CalsyncError>;
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    datatype: &'a str,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct HttpDatasetStore {
    client: Client,
    base_url: String,
    backend: String,
    datastore: String,
}

impl HttpDatasetStore {
    pub fn new(base_url: &str, backend: &str, datastore: &str) -> Result<Self, CalsyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("calsync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CalsyncError::Filesystem(err.to_string()))?,
        );

        if let Ok(token) = std::env::var("CALSYNC_API_TOKEN") {
            if !token.trim().is_empty() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .map_err(|err| CalsyncError::Filesystem(err.to_string()))?;
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CalsyncError::RemoteUnavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            backend: backend.to_string(),
            datastore: datastore.to_string(),
        })
    }

    fn datasets_url(&self) -> String {
        format!(
            "{}/datastores/{}/backends/{}/datasets",
            self.base_url, self.datastore, self.backend
        )
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, CalsyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "dataset store request failed".to_string());
        Err(CalsyncError::RemoteStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, CalsyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CalsyncError::RemoteUnavailable(err.to_string()));
                }
            }
        }
    }
}

impl DatasetStore for HttpDatasetStore {
    fn push(
        &self,
        kind: DatasetKind,
        data: &Value,
        parent: Option<&str>,
    ) -> Result<NodeHandle, CalsyncError> {
        let url = self.datasets_url();
        let body = PushRequest {
            datatype: kind.as_str(),
            data,
            parent_id: parent,
        };
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| CalsyncError::RemoteUnavailable(err.to_string()))
    }

    fn list(&self, kind: DatasetKind, limit: usize) -> Result<Vec<NodeHandle>, CalsyncError> {
        let url = self.datasets_url();
        let limit = limit.to_string();
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("datatype", kind.as_str()), ("limit", limit.as_str())])
        })?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| CalsyncError::RemoteUnavailable(err.to_string()))
    }

    fn list_children(
        &self,
        kind: DatasetKind,
        parent: &str,
    ) -> Result<Vec<NodeHandle>, CalsyncError> {
        let url = format!("{}/{}/children", self.datasets_url(), parent);
        let response = self
            .send_with_retries(|| self.client.get(&url).query(&[("datatype", kind.as_str())]))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| CalsyncError::RemoteUnavailable(err.to_string()))
    }

    fn get(&self, id: &str) -> Result<NodeRecord, CalsyncError> {
        let url = format!("{}/{}", self.datasets_url(), id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| CalsyncError::RemoteUnavailable(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
