use async_trait::async_trait;
use pinax_types::EntitySnapshot;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::retry::{backoff_delay, retry_after_delay, should_retry_status, HTTP_RETRIES};

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("object store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response shape: {0}")]
    Shape(String),
    #[error("version conflict appending to {pi}: expected tip {expected}")]
    Conflict { pi: String, expected: String },
}

#[derive(Debug, Deserialize)]
struct UploadEntry {
    cid: String,
}

#[derive(Debug, Deserialize)]
struct AppendVersionResponse {
    tip: String,
    version: u64,
}

/// The four content-addressed operations the chunk engine needs. Kept
/// narrow and behind a trait so the worker and context fetcher can be tested
/// against an in-memory double instead of a live object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_entity(&self, pi: &str) -> Result<EntitySnapshot, ObjectStoreError>;
    async fn download(&self, cid: &str) -> Result<String, ObjectStoreError>;
    async fn upload(&self, content: &str, filename: &str) -> Result<String, ObjectStoreError>;
    async fn append_version(
        &self,
        pi: &str,
        expect_tip: &str,
        components: BTreeMap<String, String>,
        note: &str,
    ) -> Result<(String, u64), ObjectStoreError>;
}

pub struct ObjectStoreClient {
    client: Client,
    base_url: String,
}

impl ObjectStoreClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build object store http client"),
            base_url,
        }
    }

    /// Executes `request_factory` up to [`HTTP_RETRIES`] times, retrying on
    /// network errors and `429`/`5xx` responses with exponential backoff,
    /// honoring `Retry-After` when present. Non-retryable statuses are
    /// returned to the caller on the first attempt.
    async fn send_with_retry(
        &self,
        request_factory: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        let mut last_err = None;
        for attempt in 0..HTTP_RETRIES {
            match request_factory().send().await {
                Ok(resp) => {
                    if should_retry_status(resp.status()) {
                        let delay = retry_after_delay(resp.headers())
                            .unwrap_or_else(|| backoff_delay(attempt as u32));
                        last_err = Some(ObjectStoreError::Status {
                            status: resp.status().as_u16(),
                            body: String::new(),
                        });
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_err = Some(ObjectStoreError::Transport(e.to_string()));
                    tokio::time::sleep(backoff_delay(attempt as u32)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ObjectStoreError::Transport("retries exhausted".into())))
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ObjectStoreError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ObjectStoreError::Status { status, body })
        }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreClient {
    async fn get_entity(&self, pi: &str) -> Result<EntitySnapshot, ObjectStoreError> {
        let url = format!("{}/entities/{}", self.base_url, pi);
        let resp = self
            .send_with_retry(|| self.client.get(&url))
            .await?;
        let resp = Self::check_status(resp).await?;

        let mut value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Shape(e.to_string()))?;

        // Some snapshots report the CAS head under `manifest_cid` rather
        // than `tip`; normalize before typed deserialization.
        if value.get("tip").is_none() {
            if let Some(manifest) = value.get("manifest_cid").cloned() {
                value["tip"] = manifest;
            }
        }

        serde_json::from_value(value).map_err(|e| ObjectStoreError::Shape(e.to_string()))
    }

    async fn download(&self, cid: &str) -> Result<String, ObjectStoreError> {
        let url = format!("{}/cas/{}", self.base_url, cid);
        let resp = self.send_with_retry(|| self.client.get(&url)).await?;
        let resp = Self::check_status(resp).await?;
        resp.text().await.map_err(|e| ObjectStoreError::Transport(e.to_string()))
    }

    async fn upload(&self, content: &str, filename: &str) -> Result<String, ObjectStoreError> {
        let url = format!("{}/cas", self.base_url);
        let body = content.to_string();
        let name = filename.to_string();
        let resp = self
            .send_with_retry(|| {
                let part = reqwest::multipart::Part::text(body.clone())
                    .file_name(name.clone());
                let form = reqwest::multipart::Form::new().part("file", part);
                self.client.post(&url).multipart(form)
            })
            .await?;
        let resp = Self::check_status(resp).await?;

        let entries: Vec<UploadEntry> = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Shape(e.to_string()))?;
        entries
            .into_iter()
            .next()
            .map(|e| e.cid)
            .ok_or_else(|| ObjectStoreError::Shape("upload response was empty".into()))
    }

    async fn append_version(
        &self,
        pi: &str,
        expect_tip: &str,
        components: BTreeMap<String, String>,
        note: &str,
    ) -> Result<(String, u64), ObjectStoreError> {
        let url = format!("{}/entities/{}/versions", self.base_url, pi);
        let payload = json!({
            "expect_tip": expect_tip,
            "components": components,
            "note": note,
        });
        let resp = self
            .send_with_retry(|| self.client.post(&url).json(&payload))
            .await?;

        if resp.status().as_u16() == 409 {
            return Err(ObjectStoreError::Conflict {
                pi: pi.to_string(),
                expected: expect_tip.to_string(),
            });
        }
        let resp = Self::check_status(resp).await?;

        let decoded: AppendVersionResponse = resp
            .json()
            .await
            .map_err(|e| ObjectStoreError::Shape(e.to_string()))?;
        Ok((decoded.tip, decoded.version))
    }
}
