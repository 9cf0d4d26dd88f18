//! CAS-with-refresh: upload the record, then append a new entity version,
//! re-reading the tip and retrying on conflict up to a bounded attempt
//! count.

use pinax_clients::ObjectStore;
use pinax_types::{PiState, PublishError};
use std::collections::BTreeMap;
use std::time::Duration;

const CAS_ATTEMPTS: u32 = 3;
const CAS_BASE_DELAY_MS: u64 = 500;

/// Uploads `pi_state.pinax_record` as `pinax.json`, then appends a new
/// version with compare-and-swap, refreshing the tip before every retry.
/// On success, fills in `pinax_cid`, `new_tip`, and `new_version` on
/// `pi_state`; on exhausted retries, returns the error for the caller to
/// record as a terminal status.
pub async fn publish_pi(
    pi_state: &mut PiState,
    object_store: &dyn ObjectStore,
) -> Result<(), PublishError> {
    let record = pi_state
        .pinax_record
        .as_ref()
        .expect("a PI reaching the publishing pass must have a pinax_record");

    let json = serde_json::to_string_pretty(record).map_err(|e| PublishError::UploadFailed {
        pi: pi_state.pi.clone(),
        message: e.to_string(),
    })?;

    let cid = object_store
        .upload(&json, "pinax.json")
        .await
        .map_err(|e| PublishError::UploadFailed {
            pi: pi_state.pi.clone(),
            message: e.to_string(),
        })?;
    pi_state.pinax_cid = Some(cid.clone());

    let mut components = BTreeMap::new();
    components.insert("pinax.json".to_string(), cid);

    let mut last_message = String::new();
    for attempt in 0..CAS_ATTEMPTS {
        if attempt > 0 {
            let delay_ms = CAS_BASE_DELAY_MS.saturating_mul(1u64 << (attempt - 1));
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let snapshot = match object_store.get_entity(&pi_state.pi).await {
            Ok(s) => s,
            Err(e) => {
                last_message = e.to_string();
                continue;
            }
        };

        match object_store
            .append_version(
                &pi_state.pi,
                &snapshot.tip,
                components.clone(),
                "Added PINAX metadata",
            )
            .await
        {
            Ok((tip, version)) => {
                pi_state.new_tip = Some(tip);
                pi_state.new_version = Some(version);
                return Ok(());
            }
            Err(e) => {
                last_message = e.to_string();
            }
        }
    }

    Err(PublishError::CasExhausted {
        pi: pi_state.pi.clone(),
        attempts: CAS_ATTEMPTS,
        message: last_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pinax_clients::object_store::ObjectStoreError;
    use pinax_types::{EntitySnapshot, PinaxRecord};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakyStore {
        tip_calls: AtomicU32,
        append_calls: AtomicU32,
        fail_appends: u32,
        tips: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn get_entity(&self, pi: &str) -> Result<EntitySnapshot, ObjectStoreError> {
            self.tip_calls.fetch_add(1, Ordering::SeqCst);
            let tip = self.tips.lock().unwrap().last().cloned().unwrap();
            Ok(EntitySnapshot {
                pi: pi.to_string(),
                tip,
                version: 1,
                components: Default::default(),
                children_pi: vec![],
                parent_pi: None,
                label: None,
            })
        }

        async fn download(&self, _cid: &str) -> Result<String, ObjectStoreError> {
            unimplemented!()
        }

        async fn upload(&self, _content: &str, _filename: &str) -> Result<String, ObjectStoreError> {
            Ok("cid-1".to_string())
        }

        async fn append_version(
            &self,
            pi: &str,
            expect_tip: &str,
            _components: BTreeMap<String, String>,
            _note: &str,
        ) -> Result<(String, u64), ObjectStoreError> {
            let call = self.append_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_appends {
                return Err(ObjectStoreError::Conflict {
                    pi: pi.to_string(),
                    expected: expect_tip.to_string(),
                });
            }
            let new_tip = format!("tip-{}", call + 1);
            self.tips.lock().unwrap().push(new_tip.clone());
            Ok((new_tip, call as u64 + 2))
        }
    }

    fn pi_state_with_record(pi: &str) -> PiState {
        let mut state = PiState::new(pi);
        state.status = pinax_types::PiStatus::Done;
        state.pinax_record = Some(PinaxRecord {
            title: Some("Title".into()),
            ..Default::default()
        });
        state
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_when_tip_matches() {
        let store = FlakyStore {
            tip_calls: AtomicU32::new(0),
            append_calls: AtomicU32::new(0),
            fail_appends: 0,
            tips: Mutex::new(vec!["tip-0".to_string()]),
        };
        let mut state = pi_state_with_record("pi-1");
        publish_pi(&mut state, &store).await.unwrap();
        assert_eq!(state.new_tip.as_deref(), Some("tip-1"));
        assert_eq!(state.new_version, Some(2));
        assert!(state.pinax_cid.is_some());
    }

    #[tokio::test]
    async fn refreshes_tip_and_retries_on_conflict() {
        let store = FlakyStore {
            tip_calls: AtomicU32::new(0),
            append_calls: AtomicU32::new(0),
            fail_appends: 1,
            tips: Mutex::new(vec!["tip-0".to_string()]),
        };
        let mut state = pi_state_with_record("pi-1");
        publish_pi(&mut state, &store).await.unwrap();
        assert!(state.new_tip.is_some());
        assert_eq!(store.tip_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.append_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_cas_exhausted() {
        let store = FlakyStore {
            tip_calls: AtomicU32::new(0),
            append_calls: AtomicU32::new(0),
            fail_appends: 10,
            tips: Mutex::new(vec!["tip-0".to_string()]),
        };
        let mut state = pi_state_with_record("pi-1");
        let err = publish_pi(&mut state, &store).await.unwrap_err();
        assert!(matches!(err, PublishError::CasExhausted { attempts: 3, .. }));
        assert!(state.new_tip.is_none());
    }
}
