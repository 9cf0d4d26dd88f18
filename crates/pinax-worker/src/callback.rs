//! The orchestrator callback: a single best-effort POST per call, with all
//! retry scheduling left to the chunk worker's `CALLBACK` phase.

use async_trait::async_trait;
use pinax_types::{
    CallbackPayload, CallbackResult, CallbackStatus, CallbackSummary, ChunkState, PiCallbackStatus,
    PiState, PiStatus,
};
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CallbackTransportError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("orchestrator returned {status}: {body}")]
    BadStatus { status: u16, body: String },
}

/// Delivers one chunk-summary payload to the orchestrator. Implementations
/// make exactly one attempt; the chunk worker owns the retry schedule.
#[async_trait]
pub trait OrchestratorCallback: Send + Sync {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), CallbackTransportError>;
}

pub struct HttpOrchestratorCallback {
    client: Client,
    base_url: String,
}

impl HttpOrchestratorCallback {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build orchestrator callback http client"),
            base_url,
        }
    }
}

#[async_trait]
impl OrchestratorCallback for HttpOrchestratorCallback {
    async fn deliver(&self, payload: &CallbackPayload) -> Result<(), CallbackTransportError> {
        let url = format!("{}/callback/pinax/{}", self.base_url, payload.batch_id);
        let resp = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| CallbackTransportError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(CallbackTransportError::BadStatus { status, body })
    }
}

/// Assembles the chunk-summary payload from the chunk row and the current
/// snapshot of every PI row, per the §6 callback payload shape.
pub fn build_payload(chunk: &ChunkState, pis: &[PiState]) -> CallbackPayload {
    let elapsed_ms = (pinax_types::time::now_millis() - chunk.started_at).max(0) as u64;

    let mut results = Vec::with_capacity(pis.len());
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for p in pis {
        if p.status == PiStatus::Done {
            succeeded += 1;
            results.push(CallbackResult {
                pi: p.pi.clone(),
                status: PiCallbackStatus::Success,
                new_tip: p.new_tip.clone(),
                new_version: p.new_version,
                error: None,
            });
        } else {
            failed += 1;
            results.push(CallbackResult {
                pi: p.pi.clone(),
                status: PiCallbackStatus::Error,
                new_tip: None,
                new_version: None,
                error: Some(
                    p.error
                        .clone()
                        .unwrap_or_else(|| "did not complete".to_string()),
                ),
            });
        }
    }

    let status = if failed == 0 {
        CallbackStatus::Success
    } else if succeeded == 0 {
        CallbackStatus::Error
    } else {
        CallbackStatus::Partial
    };

    CallbackPayload {
        batch_id: chunk.batch_id.clone(),
        chunk_id: chunk.chunk_id.clone(),
        status,
        results,
        summary: CallbackSummary {
            total: pis.len(),
            succeeded,
            failed,
            processing_time_ms: elapsed_ms,
        },
        error: chunk.global_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinax_types::ChunkPhase;

    fn chunk() -> ChunkState {
        ChunkState {
            batch_id: "b1".into(),
            chunk_id: "c1".into(),
            prefix: "prefix".into(),
            custom_prompt: None,
            institution: None,
            phase: ChunkPhase::Callback,
            started_at: 0,
            completed_at: None,
            callback_retry_count: 0,
            global_error: None,
        }
    }

    #[test]
    fn status_is_success_when_no_failures() {
        let mut a = PiState::new("a");
        a.status = PiStatus::Done;
        a.new_tip = Some("tip-a".into());
        a.new_version = Some(1);
        let payload = build_payload(&chunk(), &[a]);
        assert_eq!(payload.status, CallbackStatus::Success);
        assert_eq!(payload.summary.succeeded, 1);
        assert_eq!(payload.summary.failed, 0);
    }

    #[test]
    fn status_is_partial_when_some_succeed_and_some_fail() {
        let mut a = PiState::new("a");
        a.status = PiStatus::Done;
        a.new_tip = Some("tip-a".into());
        let mut b = PiState::new("b");
        b.status = PiStatus::Error;
        b.error = Some("boom".into());
        let payload = build_payload(&chunk(), &[a, b]);
        assert_eq!(payload.status, CallbackStatus::Partial);
        assert_eq!(payload.summary.total, 2);
        assert_eq!(payload.summary.succeeded + payload.summary.failed, payload.summary.total);
    }

    #[test]
    fn status_is_error_when_nothing_succeeds() {
        let mut a = PiState::new("a");
        a.status = PiStatus::Error;
        a.error = Some("boom".into());
        let payload = build_payload(&chunk(), &[a]);
        assert_eq!(payload.status, CallbackStatus::Error);
    }
}
