//! The chunk worker: a durable, single-writer state machine that takes a
//! chunk of PIs from `PROCESSING` through `PUBLISHING` and `CALLBACK` to
//! `DONE`, persisting every transition so a crashed process can resume
//! exactly where it left off.

pub mod callback;
pub mod pipeline;
pub mod publish;
mod worker;

pub use callback::{build_payload, CallbackTransportError, HttpOrchestratorCallback, OrchestratorCallback};
pub use pipeline::{run_one_pi, PiTaskError};
pub use publish::publish_pi;
pub use worker::ChunkWorker;

use pinax_clients::ObjectStore;
use pinax_context::ContextFetcher;
use pinax_extractor::Extractor;
use pinax_store::ChunkStore;
use pinax_types::{
    ChunkPhase, ChunkState, Config, PiState, Progress, ProcessRequest, ProcessResponse,
    StatusResponse, StoreError,
};
use std::sync::Arc;

/// Everything a chunk worker needs, shared behind `Arc`s so the dispatcher
/// and every in-flight worker task can hold their own handle.
#[derive(Clone)]
pub struct Deps {
    pub store: Arc<ChunkStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub context_fetcher: Arc<ContextFetcher>,
    pub extractor: Arc<Extractor>,
    pub callback: Arc<dyn OrchestratorCallback>,
    pub config: Arc<Config>,
}

/// Admits a new chunk: writes the singleton chunk row and one `pending` PI
/// row per entity, all in a single transaction so a half-admitted chunk can
/// never exist. A live chunk row (not yet `DONE`/`ERROR`) is reported back
/// as `AlreadyProcessing`; a chunk id whose prior run finished but whose
/// cleanup pass hasn't caught up yet is treated as stale and wiped before
/// re-admission.
pub fn admit_chunk(deps: &Deps, req: ProcessRequest) -> Result<ProcessResponse, StoreError> {
    if let Some(existing) = deps.store.get_chunk(&req.chunk_id)? {
        if !matches!(existing.phase, ChunkPhase::Done | ChunkPhase::Error) {
            return Ok(ProcessResponse::AlreadyProcessing {
                chunk_id: existing.chunk_id,
                phase: existing.phase,
            });
        }
        deps.store.cleanup_chunk(&req.chunk_id)?;
    }

    let chunk = ChunkState {
        batch_id: req.batch_id,
        chunk_id: req.chunk_id.clone(),
        prefix: req.prefix,
        custom_prompt: req.custom_prompt,
        institution: req.institution,
        phase: ChunkPhase::Processing,
        started_at: pinax_types::time::now_millis(),
        completed_at: None,
        callback_retry_count: 0,
        global_error: None,
    };

    let pis: Vec<PiState> = req.pis.iter().map(PiState::new).collect();
    let total_pis = pis.len();

    deps.store.put_pis(&req.chunk_id, &pis)?;
    deps.store.put_chunk(&chunk)?;

    Ok(ProcessResponse::Accepted {
        chunk_id: req.chunk_id,
        total_pis,
    })
}

/// Spawns the worker task that drives one chunk to completion. Fire-and-forget:
/// the dispatcher does not wait on the returned handle, it only needs the
/// chunk to be durably admitted before responding to the caller.
pub fn spawn_chunk_worker(chunk_id: String, deps: Deps) -> tokio::task::JoinHandle<()> {
    tokio::spawn(ChunkWorker::new(chunk_id, deps).run())
}

/// Scans every chunk row left on disk and respawns a worker for any that
/// isn't already `DONE`/`ERROR`. Meant to run once at startup, before the
/// dispatcher starts accepting new `/process` calls, so a process restart
/// picks back up mid-flight chunks rather than abandoning them.
pub fn resume_incomplete_chunks(deps: &Deps) -> Result<usize, StoreError> {
    let chunks = deps.store.list_chunks()?;
    let mut resumed = 0;
    for chunk in chunks {
        if matches!(chunk.phase, ChunkPhase::Done | ChunkPhase::Error) {
            continue;
        }
        tracing::info!(chunk_id = %chunk.chunk_id, phase = ?chunk.phase, "resuming chunk worker after restart");
        spawn_chunk_worker(chunk.chunk_id, deps.clone());
        resumed += 1;
    }
    Ok(resumed)
}

/// Builds the `GET /status/<chunk_id>` response by tallying the current
/// status of every PI row belonging to the chunk.
pub fn compute_progress(deps: &Deps, chunk_id: &str) -> Result<Option<StatusResponse>, StoreError> {
    let chunk = match deps.store.get_chunk(chunk_id)? {
        Some(c) => c,
        None => return Ok(None),
    };
    let pis = deps.store.list_pis(chunk_id)?;

    let mut progress = Progress {
        total: pis.len(),
        ..Default::default()
    };
    for pi in &pis {
        match pi.status {
            pinax_types::PiStatus::Pending => progress.pending += 1,
            pinax_types::PiStatus::Processing => progress.processing += 1,
            pinax_types::PiStatus::Done => progress.done += 1,
            pinax_types::PiStatus::Error => progress.failed += 1,
        }
    }

    Ok(Some(StatusResponse {
        phase: chunk.phase,
        progress,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pinax_clients::object_store::ObjectStoreError;
    use pinax_types::EntitySnapshot;
    use std::collections::BTreeMap;

    struct UnusedStore;

    #[async_trait]
    impl ObjectStore for UnusedStore {
        async fn get_entity(&self, _pi: &str) -> Result<EntitySnapshot, ObjectStoreError> {
            unimplemented!()
        }
        async fn download(&self, _cid: &str) -> Result<String, ObjectStoreError> {
            unimplemented!()
        }
        async fn upload(&self, _content: &str, _filename: &str) -> Result<String, ObjectStoreError> {
            unimplemented!()
        }
        async fn append_version(
            &self,
            _pi: &str,
            _expect_tip: &str,
            _components: BTreeMap<String, String>,
            _note: &str,
        ) -> Result<(String, u64), ObjectStoreError> {
            unimplemented!()
        }
    }

    struct UnusedCallback;

    #[async_trait]
    impl OrchestratorCallback for UnusedCallback {
        async fn deliver(
            &self,
            _payload: &pinax_types::CallbackPayload,
        ) -> Result<(), CallbackTransportError> {
            unimplemented!()
        }
    }

    fn test_config() -> Config {
        Config {
            deepinfra_api_key: "key".into(),
            deepinfra_base_url: "https://example.test".into(),
            model_name: "model".into(),
            model_max_tokens: 128_000,
            content_token_proportion: 0.5,
            max_retries_per_pi: 3,
            max_callback_retries: 3,
            alarm_interval_ms: 100,
            object_store_base_url: "https://store.test".into(),
            orchestrator_base_url: "https://orch.test".into(),
            store_path: "unused".into(),
            listen_addr: "0.0.0.0:8080".into(),
            metrics_addr: "0.0.0.0:9090".into(),
        }
    }

    fn sample_request(chunk_id: &str) -> ProcessRequest {
        ProcessRequest {
            batch_id: "batch-1".into(),
            chunk_id: chunk_id.into(),
            pis: vec!["pi-a".into(), "pi-b".into()],
            prefix: "prefix".into(),
            custom_prompt: None,
            institution: None,
        }
    }

    fn deps_with_store(store: Arc<ChunkStore>) -> Deps {
        let object_store: Arc<dyn ObjectStore> = Arc::new(UnusedStore);
        Deps {
            store,
            object_store: object_store.clone(),
            context_fetcher: Arc::new(ContextFetcher::new(object_store, 128_000, 0.5)),
            extractor: Arc::new(Extractor::new(Arc::new(
                pinax_clients::ModelGatewayClient::new(
                    "https://example.test".into(),
                    "key".into(),
                    "model".into(),
                ),
            ))),
            callback: Arc::new(UnusedCallback),
            config: Arc::new(test_config()),
        }
    }

    #[test]
    fn admits_a_new_chunk_with_one_pending_row_per_pi() {
        let (store, _guard) = ChunkStore::open_temp().unwrap();
        let deps = deps_with_store(Arc::new(store));

        let response = admit_chunk(&deps, sample_request("c1")).unwrap();
        match response {
            ProcessResponse::Accepted { chunk_id, total_pis } => {
                assert_eq!(chunk_id, "c1");
                assert_eq!(total_pis, 2);
            }
            other => panic!("expected Accepted, got {other:?}"),
        }

        let pis = deps.store.list_pis("c1").unwrap();
        assert_eq!(pis.len(), 2);
        assert!(pis.iter().all(|p| p.status == pinax_types::PiStatus::Pending));
    }

    #[test]
    fn admitting_an_existing_chunk_id_reports_already_processing() {
        let (store, _guard) = ChunkStore::open_temp().unwrap();
        let deps = deps_with_store(Arc::new(store));

        admit_chunk(&deps, sample_request("c1")).unwrap();
        let response = admit_chunk(&deps, sample_request("c1")).unwrap();
        match response {
            ProcessResponse::AlreadyProcessing { chunk_id, phase } => {
                assert_eq!(chunk_id, "c1");
                assert_eq!(phase, ChunkPhase::Processing);
            }
            other => panic!("expected AlreadyProcessing, got {other:?}"),
        }
    }

    #[test]
    fn compute_progress_tallies_every_pi_status() {
        let (store, _guard) = ChunkStore::open_temp().unwrap();
        let deps = deps_with_store(Arc::new(store));
        admit_chunk(&deps, sample_request("c1")).unwrap();

        let mut pis = deps.store.list_pis("c1").unwrap();
        pis[0].status = pinax_types::PiStatus::Done;
        deps.store.put_pi("c1", &pis[0]).unwrap();

        let status = compute_progress(&deps, "c1").unwrap().unwrap();
        assert_eq!(status.progress.total, 2);
        assert_eq!(status.progress.done, 1);
        assert_eq!(status.progress.pending, 1);
    }

    #[test]
    fn readmits_a_stale_done_chunk_id() {
        let (store, _guard) = ChunkStore::open_temp().unwrap();
        let deps = deps_with_store(Arc::new(store));

        admit_chunk(&deps, sample_request("c1")).unwrap();
        let mut chunk = deps.store.get_chunk("c1").unwrap().unwrap();
        chunk.phase = ChunkPhase::Done;
        deps.store.put_chunk(&chunk).unwrap();

        let response = admit_chunk(&deps, sample_request("c1")).unwrap();
        match response {
            ProcessResponse::Accepted { chunk_id, total_pis } => {
                assert_eq!(chunk_id, "c1");
                assert_eq!(total_pis, 2);
            }
            other => panic!("expected Accepted, got {other:?}"),
        }
        let fresh = deps.store.get_chunk("c1").unwrap().unwrap();
        assert_eq!(fresh.phase, ChunkPhase::Processing);
    }

    #[test]
    fn compute_progress_returns_none_for_unknown_chunk() {
        let (store, _guard) = ChunkStore::open_temp().unwrap();
        let deps = deps_with_store(Arc::new(store));
        assert!(compute_progress(&deps, "missing").unwrap().is_none());
    }
}
