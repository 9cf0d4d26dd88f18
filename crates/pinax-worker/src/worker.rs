//! The chunk worker state machine: `PROCESSING → PUBLISHING → CALLBACK →
//! DONE`, with `ERROR` as a short-circuit to `CALLBACK`. Each phase is a
//! self-contained "pass" over the rows belonging to one chunk; the worker
//! task loops, re-reading chunk state from the durable store at the top of
//! every iteration so a crash mid-pass only ever loses in-flight work, never
//! corrupts recorded progress.

use crate::callback::{build_payload, OrchestratorCallback};
use crate::pipeline::{run_one_pi, PiTaskError};
use crate::publish::publish_pi;
use crate::Deps;
use pinax_types::{ChunkPhase, ChunkState, GlobalError, PiState, PiStatus, PinaxRecord, PublishError};
use std::time::Duration;
use std::time::Instant;

/// What the worker does immediately after one pass: wait out the alarm
/// interval before the next pass, or loop again right away because the
/// phase already advanced.
enum Tick {
    Sleep,
    Immediate,
}

pub struct ChunkWorker {
    chunk_id: String,
    deps: Deps,
}

impl ChunkWorker {
    pub fn new(chunk_id: String, deps: Deps) -> Self {
        Self { chunk_id, deps }
    }

    pub async fn run(self) {
        loop {
            let chunk = match self.deps.store.get_chunk(&self.chunk_id) {
                Ok(Some(c)) => c,
                Ok(None) => {
                    tracing::warn!(chunk_id = %self.chunk_id, "chunk row missing, worker exiting");
                    return;
                }
                Err(e) => {
                    tracing::error!(chunk_id = %self.chunk_id, error = %e, "failed to read chunk row, worker exiting");
                    return;
                }
            };

            pinax_telemetry::metrics().record_chunk_phase(phase_label(chunk.phase));

            let tick = match chunk.phase {
                ChunkPhase::Processing => self.run_processing_pass(chunk).await,
                ChunkPhase::Publishing => self.run_publishing_pass(chunk).await,
                ChunkPhase::Callback => self.run_callback_pass(chunk).await,
                ChunkPhase::Done | ChunkPhase::Error => {
                    if let Err(e) = self.deps.store.cleanup_chunk(&self.chunk_id) {
                        tracing::error!(chunk_id = %self.chunk_id, error = %e, "cleanup failed");
                    }
                    return;
                }
            };

            match tick {
                Tick::Immediate => continue,
                Tick::Sleep => {
                    tokio::time::sleep(Duration::from_millis(self.deps.config.alarm_interval_ms))
                        .await
                }
            }
        }
    }

    /// Persists `global_error` and short-circuits straight to `CALLBACK`,
    /// matching "any uncaught exception during a phase" in the spec.
    async fn fail_chunk(&self, mut chunk: ChunkState, err: GlobalError) -> Tick {
        tracing::error!(chunk_id = %self.chunk_id, error = %err, "phase failed, short-circuiting to callback");
        chunk.global_error = Some(err.0);
        chunk.phase = ChunkPhase::Callback;
        if let Err(e) = self.deps.store.put_chunk(&chunk) {
            tracing::error!(chunk_id = %self.chunk_id, error = %e, "failed to persist global error");
            return Tick::Sleep;
        }
        Tick::Immediate
    }

    /// Borrows `&self` for the lifetime of one per-PI fetch+extract task;
    /// safe to run many of these concurrently since each only takes shared
    /// references into `self.deps`.
    async fn process_one(
        &self,
        pi: String,
        custom_prompt: Option<String>,
        institution: Option<String>,
    ) -> (String, Result<PinaxRecord, PiTaskError>) {
        let result = run_one_pi(
            &self.chunk_id,
            &pi,
            &self.deps.store,
            &self.deps.context_fetcher,
            &self.deps.extractor,
            custom_prompt.as_deref(),
            institution.as_deref(),
        )
        .await;
        (pi, result)
    }

    async fn publish_one(&self, mut state: PiState) -> (PiState, Result<(), PublishError>, Duration) {
        let start = Instant::now();
        let result = publish_pi(&mut state, self.deps.object_store.as_ref()).await;
        (state, result, start.elapsed())
    }

    async fn run_processing_pass(&self, chunk: ChunkState) -> Tick {
        let pis = match self.deps.store.list_pis(&self.chunk_id) {
            Ok(v) => v,
            Err(e) => return self.fail_chunk(chunk, e.into()).await,
        };

        let pending: Vec<PiState> = pis
            .into_iter()
            .filter(|p| p.status == PiStatus::Pending)
            .collect();

        for p in &pending {
            let mut marked = p.clone();
            marked.status = PiStatus::Processing;
            if let Err(e) = self.deps.store.put_pi(&self.chunk_id, &marked) {
                return self.fail_chunk(chunk, e.into()).await;
            }
        }

        if !pending.is_empty() {
            let custom_prompt = chunk.custom_prompt.clone();
            let institution = chunk.institution.clone();

            let tasks = pending
                .iter()
                .map(|p| self.process_one(p.pi.clone(), custom_prompt.clone(), institution.clone()));

            let outcomes = futures::future::join_all(tasks).await;

            for (pi, outcome) in outcomes {
                let mut state = match self.deps.store.get_pi(&self.chunk_id, &pi) {
                    Ok(Some(s)) => s,
                    Ok(None) => PiState::new(pi.clone()),
                    Err(e) => return self.fail_chunk(chunk, e.into()).await,
                };

                match outcome {
                    Ok(record) => {
                        state.status = PiStatus::Done;
                        state.pinax_record = Some(record);
                        state.error = None;
                        if let Err(e) = self.deps.store.put_pi(&self.chunk_id, &state) {
                            return self.fail_chunk(chunk, e.into()).await;
                        }
                        let _ = self.deps.store.delete_context(&self.chunk_id, &pi);
                        pinax_telemetry::metrics().record_pi_outcome("done");
                    }
                    Err(PiTaskError::Global(e)) => return self.fail_chunk(chunk, e).await,
                    Err(PiTaskError::Extraction(e)) => {
                        state.retry_count += 1;
                        if state.retry_count >= self.deps.config.max_retries_per_pi {
                            state.status = PiStatus::Error;
                            state.error = Some(e.to_string());
                            let _ = self.deps.store.delete_context(&self.chunk_id, &pi);
                            pinax_telemetry::metrics().record_pi_outcome("error");
                        } else {
                            state.status = PiStatus::Pending;
                            state.error = Some(e.to_string());
                            pinax_telemetry::metrics().record_pi_outcome("retry");
                        }
                        if let Err(e) = self.deps.store.put_pi(&self.chunk_id, &state) {
                            return self.fail_chunk(chunk, e.into()).await;
                        }
                    }
                }
            }
        }

        let after = match self.deps.store.list_pis(&self.chunk_id) {
            Ok(v) => v,
            Err(e) => return self.fail_chunk(chunk, e.into()).await,
        };
        let still_running = after
            .iter()
            .any(|p| matches!(p.status, PiStatus::Pending | PiStatus::Processing));

        if still_running {
            Tick::Sleep
        } else {
            let mut advanced = chunk;
            advanced.phase = ChunkPhase::Publishing;
            if let Err(e) = self.deps.store.put_chunk(&advanced) {
                return self.fail_chunk(advanced, e.into()).await;
            }
            Tick::Immediate
        }
    }

    async fn run_publishing_pass(&self, chunk: ChunkState) -> Tick {
        let pis = match self.deps.store.list_pis(&self.chunk_id) {
            Ok(v) => v,
            Err(e) => return self.fail_chunk(chunk, e.into()).await,
        };

        let to_publish: Vec<PiState> = pis
            .into_iter()
            .filter(|p| p.status == PiStatus::Done && p.pinax_cid.is_none())
            .collect();

        if !to_publish.is_empty() {
            let tasks = to_publish.into_iter().map(|state| self.publish_one(state));
            let results = futures::future::join_all(tasks).await;

            for (mut state, result, elapsed) in results {
                match result {
                    Ok(()) => {
                        pinax_telemetry::metrics().observe_publish_seconds(elapsed.as_secs_f64());
                        pinax_telemetry::metrics().record_pi_outcome("published");
                    }
                    Err(e) => {
                        state.status = PiStatus::Error;
                        state.error = Some(e.to_string());
                        pinax_telemetry::metrics().record_pi_outcome("publish_error");
                    }
                }
                if let Err(e) = self.deps.store.put_pi(&self.chunk_id, &state) {
                    return self.fail_chunk(chunk, e.into()).await;
                }
            }
        }

        let after = match self.deps.store.list_pis(&self.chunk_id) {
            Ok(v) => v,
            Err(e) => return self.fail_chunk(chunk, e.into()).await,
        };
        let ready = after
            .iter()
            .filter(|p| p.status == PiStatus::Done)
            .all(|p| p.new_tip.is_some());

        if ready {
            let mut advanced = chunk;
            advanced.phase = ChunkPhase::Callback;
            if let Err(e) = self.deps.store.put_chunk(&advanced) {
                return self.fail_chunk(advanced, e.into()).await;
            }
            Tick::Immediate
        } else {
            Tick::Sleep
        }
    }

    async fn run_callback_pass(&self, chunk: ChunkState) -> Tick {
        let pis = match self.deps.store.list_pis(&self.chunk_id) {
            Ok(v) => v,
            Err(e) => return self.fail_chunk(chunk, e.into()).await,
        };

        let payload = build_payload(&chunk, &pis);

        match self.deps.callback.deliver(&payload).await {
            Ok(()) => {
                pinax_telemetry::metrics().record_callback_attempt("success");
                let mut done = chunk;
                done.phase = ChunkPhase::Done;
                done.completed_at = Some(pinax_types::time::now_millis());
                if let Err(e) = self.deps.store.put_chunk(&done) {
                    tracing::error!(chunk_id = %self.chunk_id, error = %e, "failed to persist DONE");
                    return Tick::Sleep;
                }
                Tick::Immediate
            }
            Err(e) => {
                pinax_telemetry::metrics().record_callback_attempt("failure");
                tracing::warn!(chunk_id = %self.chunk_id, error = %e, "callback attempt failed");

                let mut updated = chunk;
                updated.callback_retry_count += 1;

                if updated.callback_retry_count < self.deps.config.max_callback_retries {
                    if let Err(e) = self.deps.store.put_chunk(&updated) {
                        return self.fail_chunk(updated, e.into()).await;
                    }
                    let backoff_ms = 1000u64 * (1u64 << updated.callback_retry_count.min(16));
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    Tick::Immediate
                } else {
                    tracing::warn!(chunk_id = %self.chunk_id, "callback retries exhausted, marking chunk done anyway");
                    updated.phase = ChunkPhase::Done;
                    updated.completed_at = Some(pinax_types::time::now_millis());
                    if let Err(e) = self.deps.store.put_chunk(&updated) {
                        tracing::error!(chunk_id = %self.chunk_id, error = %e, "failed to persist DONE after exhausting callback retries");
                        return Tick::Sleep;
                    }
                    Tick::Immediate
                }
            }
        }
    }
}

fn phase_label(phase: ChunkPhase) -> &'static str {
    match phase {
        ChunkPhase::Processing => "processing",
        ChunkPhase::Publishing => "publishing",
        ChunkPhase::Callback => "callback",
        ChunkPhase::Done => "done",
        ChunkPhase::Error => "error",
    }
}
