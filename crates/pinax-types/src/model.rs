use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The 12-value DCMI Type controlled vocabulary. `type` on a PINAX record
/// must be one of these, case-sensitive.
pub const DCMI_TYPES: [&str; 12] = [
    "Collection",
    "Dataset",
    "Event",
    "Image",
    "InteractiveResource",
    "MovingImage",
    "PhysicalObject",
    "Service",
    "Software",
    "Sound",
    "StillImage",
    "Text",
];

/// Entity snapshot as returned by the object store for a PI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub pi: String,
    pub tip: String,
    pub version: u64,
    pub components: BTreeMap<String, String>,
    pub children_pi: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One file folded into a PI's context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFile {
    pub name: String,
    pub content: String,
}

/// Everything the Extractor needs to synthesize one metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub directory_name: String,
    pub files: Vec<ContextFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_pinax: Option<serde_json::Value>,
}

/// `creator` may be a bare string or a non-empty list; represent both and
/// normalize on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn is_empty(&self) -> bool {
        match self {
            StringOrList::One(s) => s.is_empty(),
            StringOrList::Many(v) => v.is_empty() || v.iter().all(|s| s.is_empty()),
        }
    }
}

/// The emitted Dublin-Core-derived metadata record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PinaxRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<StringOrList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rights: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place: Option<StringOrList>,

    /// Fields the model emitted that aren't part of the fixed schema are kept
    /// here rather than silently dropped, so overrides can still see them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Output of the pure validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing_required: Vec<String>,
    pub warnings: Vec<String>,
    pub field_validations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkPhase {
    Processing,
    Publishing,
    Callback,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiStatus {
    Pending,
    Processing,
    Done,
    Error,
}

/// Durable per-PI row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiState {
    pub pi: String,
    pub status: PiStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinax_record: Option<PinaxRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinax_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PiState {
    pub fn new(pi: impl Into<String>) -> Self {
        Self {
            pi: pi.into(),
            status: PiStatus::Pending,
            retry_count: 0,
            pinax_record: None,
            pinax_cid: None,
            new_tip: None,
            new_version: None,
            error: None,
        }
    }
}

/// Singleton durable row describing the chunk as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub batch_id: String,
    pub chunk_id: String,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    pub phase: ChunkPhase,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    pub callback_retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_error: Option<String>,
}

/// Cached fetch result for one PI, persisted so a restart doesn't re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedContext {
    pub directory_name: String,
    pub files: Vec<ContextFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_pinax: Option<serde_json::Value>,
}

/// Request body for `POST /process`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub batch_id: String,
    pub chunk_id: String,
    pub pis: Vec<String>,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessResponse {
    Accepted {
        chunk_id: String,
        total_pis: usize,
    },
    AlreadyProcessing {
        chunk_id: String,
        phase: ChunkPhase,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub phase: ChunkPhase,
    pub progress: Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiCallbackStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResult {
    pub pi: String,
    pub status: PiCallbackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub batch_id: String,
    pub chunk_id: String,
    pub status: CallbackStatus,
    pub results: Vec<CallbackResult>,
    pub summary: CallbackSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
