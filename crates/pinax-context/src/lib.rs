//! Assembles the bundle of text the extractor reasons over for one entity:
//! its previous PINAX record, its text and OCR components, and its
//! children's already-computed PINAX records — then fits the bundle to the
//! model's token budget with the progressive-tax truncator.

use futures::future::join_all;
use pinax_clients::ObjectStore;
use pinax_truncate::{truncate, Item};
use pinax_types::{ContextBundle, ContextFile, EntitySnapshot, FetchError};
use std::sync::Arc;

/// Names that are never treated as free text even though they otherwise
/// match an extension below.
const RESERVED_NAMES: [&str; 3] = ["pinax.json", "cheimarros.json", "description.md"];

const TEXT_EXTENSIONS: [&str; 20] = [
    ".txt", ".md", ".json", ".xml", ".html", ".htm", ".csv", ".tsv", ".yaml", ".yml", ".toml",
    ".ini", ".cfg", ".conf", ".log", ".rst", ".tex", ".rtf", ".asc", ".nfo",
];

fn is_text_component(label: &str) -> bool {
    if RESERVED_NAMES.contains(&label) || label.ends_with(".ref.json") {
        return false;
    }
    let lower = label.to_ascii_lowercase();
    TEXT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn directory_name(snapshot: &EntitySnapshot) -> String {
    match &snapshot.label {
        Some(label) if !label.is_empty() => label.clone(),
        _ => {
            let pi = &snapshot.pi;
            let start = pi.len().saturating_sub(8);
            pi[start..].to_string()
        }
    }
}

pub struct ContextFetcher {
    object_store: Arc<dyn ObjectStore>,
    model_max_tokens: i64,
    content_token_proportion: f64,
}

impl ContextFetcher {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        model_max_tokens: i64,
        content_token_proportion: f64,
    ) -> Self {
        Self {
            object_store,
            model_max_tokens,
            content_token_proportion,
        }
    }

    fn truncation_target(&self) -> i64 {
        (self.model_max_tokens as f64 * self.content_token_proportion) as i64
    }

    /// Fetches the entity snapshot, then fans out the previous-PINAX, text,
    /// OCR-sidecar, and child-PINAX fetches concurrently. Any individual
    /// fetch failure is logged and dropped — the bundle is always
    /// best-effort, never all-or-nothing.
    pub async fn fetch(&self, pi: &str) -> Result<ContextBundle, FetchError> {
        let snapshot = self
            .object_store
            .get_entity(pi)
            .await
            .map_err(|e| FetchError::SnapshotUnavailable {
                pi: pi.to_string(),
                message: e.to_string(),
            })?;

        let object_store = self.object_store.clone();

        let mut tasks: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = Option<ContextFile>> + Send>>> =
            Vec::new();

        if let Some(cid) = snapshot.components.get("pinax.json") {
            let cid = cid.clone();
            let object_store = object_store.clone();
            let pi = pi.to_string();
            tasks.push(Box::pin(async move {
                match object_store.download(&cid).await {
                    Ok(content) => Some(ContextFile {
                        name: "[PREVIOUS] pinax.json".to_string(),
                        content,
                    }),
                    Err(e) => {
                        tracing::warn!(pi, cid, error = %e, "failed to fetch previous pinax.json");
                        None
                    }
                }
            }));
        }

        for (label, cid) in &snapshot.components {
            if !is_text_component(label) && !label.ends_with(".ref.json") {
                continue;
            }
            let label = label.clone();
            let cid = cid.clone();
            let object_store = object_store.clone();
            let pi = pi.to_string();
            tasks.push(Box::pin(async move {
                match object_store.download(&cid).await {
                    Ok(content) => Some(ContextFile { name: label, content }),
                    Err(e) => {
                        tracing::warn!(pi, cid, label, error = %e, "failed to fetch component");
                        None
                    }
                }
            }));
        }

        for child_pi in &snapshot.children_pi {
            let child_pi = child_pi.clone();
            let object_store = object_store.clone();
            let pi = pi.to_string();
            tasks.push(Box::pin(async move {
                let child_snapshot = match object_store.get_entity(&child_pi).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(pi, child_pi, error = %e, "child entity unavailable");
                        return None;
                    }
                };
                let cid = child_snapshot.components.get("pinax.json")?;
                match object_store.download(cid).await {
                    Ok(content) => {
                        let child_label = child_snapshot
                            .label
                            .clone()
                            .unwrap_or_else(|| child_pi.clone());
                        Some(ContextFile {
                            name: format!("child_pinax_{child_label}.json"),
                            content,
                        })
                    }
                    Err(e) => {
                        tracing::warn!(pi, child_pi, error = %e, "failed to fetch child pinax.json");
                        None
                    }
                }
            }));
        }

        let fetched = join_all(tasks).await;
        let files: Vec<ContextFile> = fetched.into_iter().flatten().collect();

        let existing_pinax = files
            .iter()
            .find(|f| f.name == "[PREVIOUS] pinax.json")
            .and_then(|f| serde_json::from_str(&f.content).ok());

        let bundle = ContextBundle {
            directory_name: directory_name(&snapshot),
            files,
            existing_pinax,
        };

        Ok(self.apply_truncation(bundle))
    }

    fn apply_truncation(&self, mut bundle: ContextBundle) -> ContextBundle {
        let items: Vec<Item> = bundle
            .files
            .iter()
            .map(|f| Item::new(f.name.clone(), f.content.clone()))
            .collect();
        let result = truncate(&items, self.truncation_target());
        bundle.files = result
            .allocations
            .into_iter()
            .map(|a| ContextFile {
                name: a.name,
                content: a.rendered,
            })
            .collect();
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pinax_clients::object_store::ObjectStoreError;
    use std::collections::BTreeMap;

    struct FakeStore {
        entities: BTreeMap<String, EntitySnapshot>,
        blobs: BTreeMap<String, String>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn get_entity(&self, pi: &str) -> Result<EntitySnapshot, ObjectStoreError> {
            self.entities
                .get(pi)
                .cloned()
                .ok_or_else(|| ObjectStoreError::Status {
                    status: 404,
                    body: "not found".into(),
                })
        }

        async fn download(&self, cid: &str) -> Result<String, ObjectStoreError> {
            self.blobs
                .get(cid)
                .cloned()
                .ok_or_else(|| ObjectStoreError::Status {
                    status: 404,
                    body: "not found".into(),
                })
        }

        async fn upload(&self, _content: &str, _filename: &str) -> Result<String, ObjectStoreError> {
            unimplemented!("not used by context fetcher tests")
        }

        async fn append_version(
            &self,
            _pi: &str,
            _expect_tip: &str,
            _components: BTreeMap<String, String>,
            _note: &str,
        ) -> Result<(String, u64), ObjectStoreError> {
            unimplemented!("not used by context fetcher tests")
        }
    }

    fn snapshot(pi: &str, components: &[(&str, &str)], children: &[&str]) -> EntitySnapshot {
        EntitySnapshot {
            pi: pi.to_string(),
            tip: "tip-0".to_string(),
            version: 1,
            components: components
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children_pi: children.iter().map(|s| s.to_string()).collect(),
            parent_pi: None,
            label: None,
        }
    }

    #[tokio::test]
    async fn assembles_text_and_ocr_components_and_skips_reserved_names() {
        let mut blobs = BTreeMap::new();
        blobs.insert("cid-notes".to_string(), "hello".to_string());
        blobs.insert("cid-ocr".to_string(), "{\"text\":\"ocr\"}".to_string());
        blobs.insert("cid-image-ref".to_string(), "binary-marker".to_string());

        let mut entities = BTreeMap::new();
        entities.insert(
            "pi-1".to_string(),
            snapshot(
                "pi-1",
                &[
                    ("notes.txt", "cid-notes"),
                    ("photo.jpg.ref.json", "cid-ocr"),
                    ("photo.jpg", "cid-image-ref"),
                ],
                &[],
            ),
        );

        let store = Arc::new(FakeStore { entities, blobs });
        let fetcher = ContextFetcher::new(store, 128_000, 0.5);
        let bundle = fetcher.fetch("pi-1").await.unwrap();

        let names: Vec<&str> = bundle.files.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"notes.txt"));
        assert!(names.contains(&"photo.jpg.ref.json"));
        assert!(!names.contains(&"photo.jpg"));
    }

    #[tokio::test]
    async fn best_effort_skips_failed_child_fetch() {
        let mut entities = BTreeMap::new();
        entities.insert("pi-1".to_string(), snapshot("pi-1", &[], &["missing-child"]));

        let store = Arc::new(FakeStore {
            entities,
            blobs: BTreeMap::new(),
        });
        let fetcher = ContextFetcher::new(store, 128_000, 0.5);
        let bundle = fetcher.fetch("pi-1").await.unwrap();
        assert!(bundle.files.is_empty());
    }

    #[tokio::test]
    async fn directory_name_falls_back_to_last_eight_characters_of_pi() {
        let mut entities = BTreeMap::new();
        entities.insert(
            "archive-entity-0001".to_string(),
            snapshot("archive-entity-0001", &[], &[]),
        );
        let store = Arc::new(FakeStore {
            entities,
            blobs: BTreeMap::new(),
        });
        let fetcher = ContextFetcher::new(store, 128_000, 0.5);
        let bundle = fetcher.fetch("archive-entity-0001").await.unwrap();
        assert_eq!(bundle.directory_name, "ity-0001");
    }
}
