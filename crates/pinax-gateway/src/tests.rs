use crate::build_router;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pinax_clients::model_gateway::{ModelGatewayError, Usage};
use pinax_clients::object_store::ObjectStoreError;
use pinax_clients::{ModelGateway, ObjectStore};
use pinax_context::ContextFetcher;
use pinax_extractor::Extractor;
use pinax_store::ChunkStore;
use pinax_types::{Config, EntitySnapshot};
use pinax_worker::{CallbackTransportError, Deps, OrchestratorCallback};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

/// Not wired to anything real: the routing/admission tests below never
/// drive a chunk past admission, but `/process` does spawn a real worker
/// task, so every method returns an error instead of panicking.
struct UnusedStore;

#[async_trait]
impl ObjectStore for UnusedStore {
    async fn get_entity(&self, _pi: &str) -> Result<EntitySnapshot, ObjectStoreError> {
        Err(ObjectStoreError::Transport("not wired in this test".into()))
    }
    async fn download(&self, _cid: &str) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Transport("not wired in this test".into()))
    }
    async fn upload(&self, _content: &str, _filename: &str) -> Result<String, ObjectStoreError> {
        Err(ObjectStoreError::Transport("not wired in this test".into()))
    }
    async fn append_version(
        &self,
        _pi: &str,
        _expect_tip: &str,
        _components: BTreeMap<String, String>,
        _note: &str,
    ) -> Result<(String, u64), ObjectStoreError> {
        Err(ObjectStoreError::Transport("not wired in this test".into()))
    }
}

struct UnusedCallback;

#[async_trait]
impl OrchestratorCallback for UnusedCallback {
    async fn deliver(
        &self,
        _payload: &pinax_types::CallbackPayload,
    ) -> Result<(), CallbackTransportError> {
        Err(CallbackTransportError::Transport("not wired in this test".into()))
    }
}

struct StubGateway {
    response: String,
}

#[async_trait]
impl ModelGateway for StubGateway {
    async fn chat_json(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<(String, Usage), ModelGatewayError> {
        Ok((self.response.clone(), Usage::default()))
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

fn test_deps(gateway_response: &str) -> Deps {
    let (store, _guard) = ChunkStore::open_temp().unwrap();
    let object_store: Arc<dyn ObjectStore> = Arc::new(UnusedStore);
    Deps {
        store: Arc::new(store),
        object_store: object_store.clone(),
        context_fetcher: Arc::new(ContextFetcher::new(object_store, 128_000, 0.5)),
        extractor: Arc::new(Extractor::new(Arc::new(StubGateway {
            response: gateway_response.to_string(),
        }))),
        callback: Arc::new(UnusedCallback),
        config: Arc::new(test_config()),
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn process_admits_a_new_chunk_and_returns_202() {
    let app = build_router(test_deps(""));
    let req = json_request(
        "POST",
        "/process",
        serde_json::json!({
            "batch_id": "b1",
            "chunk_id": "c1",
            "pis": ["pi-a", "pi-b"],
            "prefix": "prefix",
        }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["chunk_id"], "c1");
    assert_eq!(body["total_pis"], 2);
}

#[tokio::test]
async fn process_reports_already_processing_for_a_repeat_chunk_id() {
    let app = build_router(test_deps(""));

    let first = json_request(
        "POST",
        "/process",
        serde_json::json!({"batch_id": "b1", "chunk_id": "c1", "pis": ["pi-a"], "prefix": "p"}),
    );
    app.clone().oneshot(first).await.unwrap();

    let second = json_request(
        "POST",
        "/process",
        serde_json::json!({"batch_id": "b1", "chunk_id": "c1", "pis": ["pi-a"], "prefix": "p"}),
    );
    let response = app.oneshot(second).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "already_processing");
}

#[tokio::test]
async fn status_returns_404_for_an_unknown_chunk() {
    let app = build_router(test_deps(""));
    let req = Request::builder()
        .method("GET")
        .uri("/status/missing")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_metadata_flags_missing_optional_fields() {
    let app = build_router(test_deps(""));
    let req = json_request(
        "POST",
        "/validate-metadata",
        serde_json::json!({
            "id": "01HABCDEF0123456789JKMNPQR",
            "title": "X",
            "type": "StillImage",
            "creator": "A",
            "institution": "I",
            "created": "1927",
            "access_url": "https://x/y",
        }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["valid"], true);
    assert!(!body["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn extract_metadata_runs_the_pipeline_over_an_inline_bundle() {
    let app = build_router(test_deps(
        r#"{"title":"A photo","type":"photo","creator":"Jane","institution":"Archive","created":"1950"}"#,
    ));
    let req = json_request(
        "POST",
        "/extract-metadata",
        serde_json::json!({
            "directory_name": "dir",
            "files": [{"name": "a.txt", "content": "some text"}],
        }),
    );
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["record"]["type"], "StillImage");
    assert_eq!(body["validation"]["valid"], true);
}

#[tokio::test]
async fn malformed_json_is_rejected_with_400() {
    let app = build_router(test_deps(""));
    let req = Request::builder()
        .method("POST")
        .uri("/validate-metadata")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_rejected_with_405() {
    let app = build_router(test_deps(""));
    let req = Request::builder()
        .method("GET")
        .uri("/process")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
