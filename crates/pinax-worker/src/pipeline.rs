//! The per-PI fetch-then-extract task run inside the `PROCESSING` phase.

use pinax_context::ContextFetcher;
use pinax_extractor::Extractor;
use pinax_store::ChunkStore;
use pinax_types::{CachedContext, ContextBundle, ExtractionError, GlobalError, PinaxRecord};

/// Distinguishes a per-PI retryable outcome (counted against
/// `retry_count`) from a systemic failure (store I/O) that should escalate
/// straight to the chunk's `global_error`.
#[derive(Debug)]
pub enum PiTaskError {
    Extraction(ExtractionError),
    Global(GlobalError),
}

impl From<pinax_types::StoreError> for PiTaskError {
    fn from(e: pinax_types::StoreError) -> Self {
        PiTaskError::Global(e.into())
    }
}

impl From<ExtractionError> for PiTaskError {
    fn from(e: ExtractionError) -> Self {
        PiTaskError::Extraction(e)
    }
}

/// Loads cached context if present, else fetches and persists it, then
/// runs the extractor. `institution`, if set, becomes a field override the
/// model output cannot win against.
pub async fn run_one_pi(
    chunk_id: &str,
    pi: &str,
    store: &ChunkStore,
    context_fetcher: &ContextFetcher,
    extractor: &Extractor,
    custom_prompt: Option<&str>,
    institution: Option<&str>,
) -> Result<PinaxRecord, PiTaskError> {
    let bundle = match store.get_context(chunk_id, pi)? {
        Some(cached) => ContextBundle {
            directory_name: cached.directory_name,
            files: cached.files,
            existing_pinax: cached.existing_pinax,
        },
        None => {
            let bundle = context_fetcher
                .fetch(pi)
                .await
                .map_err(ExtractionError::Fetch)?;
            let cache = CachedContext {
                directory_name: bundle.directory_name.clone(),
                files: bundle.files.clone(),
                existing_pinax: bundle.existing_pinax.clone(),
            };
            store.put_context(chunk_id, pi, &cache)?;
            bundle
        }
    };

    let overrides = institution.map(|inst| PinaxRecord {
        institution: Some(inst.to_string()),
        ..Default::default()
    });

    let (record, _report) = extractor
        .extract(&bundle, custom_prompt, overrides.as_ref(), None)
        .await?;

    Ok(record)
}
