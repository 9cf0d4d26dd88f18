use thiserror::Error;

/// Object-store read/download problem. Retryable per PI.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("entity snapshot unavailable for pi {pi}: {message}")]
    SnapshotUnavailable { pi: String, message: String },

    #[error("download failed for cid {cid}: {message}")]
    DownloadFailed { cid: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Model gateway returned a non-2xx status or an empty response. Retryable.
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("model gateway returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("model gateway returned no choices")]
    EmptyChoices,

    #[error("model gateway transport error: {0}")]
    Transport(String),
}

/// The model returned content that isn't valid JSON, or isn't shaped like a
/// record. Retryable.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("model response is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("model response is not a JSON object")]
    NotAnObject,
}

/// Upload or CAS append failed after the inner retry budget was spent.
/// Terminal for the PI that raised it.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("upload failed for pi {pi}: {message}")]
    UploadFailed { pi: String, message: String },

    #[error("appendVersion exhausted {attempts} attempts for pi {pi}: {message}")]
    CasExhausted {
        pi: String,
        attempts: u32,
        message: String,
    },
}

/// Orchestrator unreachable or returned non-2xx. Retried at the chunk level,
/// not per PI.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("callback transport error: {0}")]
    Transport(String),
}

/// Uncaught exception during a phase pass. Short-circuits the chunk straight
/// to `CALLBACK` with this recorded as `global_error`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct GlobalError(pub String);

impl From<FetchError> for GlobalError {
    fn from(e: FetchError) -> Self {
        GlobalError(e.to_string())
    }
}

impl From<LLMError> for GlobalError {
    fn from(e: LLMError) -> Self {
        GlobalError(e.to_string())
    }
}

impl From<ParseError> for GlobalError {
    fn from(e: ParseError) -> Self {
        GlobalError(e.to_string())
    }
}

impl From<PublishError> for GlobalError {
    fn from(e: PublishError) -> Self {
        GlobalError(e.to_string())
    }
}

impl From<CallbackError> for GlobalError {
    fn from(e: CallbackError) -> Self {
        GlobalError(e.to_string())
    }
}

impl From<StoreError> for GlobalError {
    fn from(e: StoreError) -> Self {
        GlobalError(e.to_string())
    }
}

/// Everything that can go wrong while running one PI through fetch and
/// extraction. Retryable at the PI level — the worker counts these against
/// `retry_count` rather than aborting the chunk.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Llm(#[from] LLMError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors from the store crate. Kept separate from the per-PI taxonomy above
/// since a store failure is an operational problem, not a retryable outcome
/// for a single entity.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("no chunk row for key {0}")]
    NotFound(String),
}
