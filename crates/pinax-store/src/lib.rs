//! Durable storage for the chunk worker.
//!
//! Backed by `redb`, a pure-Rust embedded single-writer key-value store —
//! the canonical choice per the project's storage design, since per-item
//! cached context can run well past what a pure blob store comfortably
//! holds per value. One [`Database`] file backs every chunk the process
//! ever sees; rows are namespaced by `chunk_id` inside composite keys so a
//! single writer thread can serve many concurrently-running chunk workers
//! without cross-chunk contention ever reaching the backend.

use pinax_types::{CachedContext, ChunkState, PiState, StoreError};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const BATCH_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("batch_state");
const PI_STATE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pi_state");
const CONTEXT_CACHE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("context_cache");

/// Composite key `chunk_id \0 rest`. `redb` orders keys lexicographically by
/// byte value, so a prefix scan over `key(chunk_id, "")..` bounded by
/// `next_prefix` enumerates every row belonging to one chunk.
fn key(chunk_id: &str, rest: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(chunk_id.len() + 1 + rest.len());
    k.extend_from_slice(chunk_id.as_bytes());
    k.push(0);
    k.extend_from_slice(rest.as_bytes());
    k
}

fn chunk_prefix(chunk_id: &str) -> Vec<u8> {
    key(chunk_id, "")
}

/// The lexicographic successor of every key starting with `prefix`, used as
/// an exclusive upper bound for a prefix range scan.
fn next_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        if end[i] != 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return end;
        }
    }
    // All 0xff: no finite successor: scan to the end of the keyspace.
    vec![0xff; prefix.len() + 1]
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Serde(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serde(e.to_string()))
}

pub struct ChunkStore {
    db: Arc<Database>,
}

impl ChunkStore {
    /// Opens (creating if absent) the backing database file and ensures all
    /// tables exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let txn = db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(BATCH_STATE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(PI_STATE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.open_table(CONTEXT_CACHE)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            txn.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    /// Opens a store backed by a freshly created temp file. Used by tests in
    /// this crate and its dependents; not part of the production path.
    #[cfg(test)]
    pub fn open_temp() -> Result<(Self, tempfile::TempPath), StoreError> {
        let file = tempfile::NamedTempFile::new()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let path = file.into_temp_path();
        let store = Self::open(&path)?;
        Ok((store, path))
    }

    // --- batch_state (singleton per chunk) ---

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkState>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(BATCH_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
        match table.get(chunk_id.as_bytes()).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_chunk(&self, state: &ChunkState) -> Result<(), StoreError> {
        let bytes = encode(state)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(BATCH_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .insert(state.chunk_id.as_bytes(), bytes.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Every chunk row currently on disk, in no particular order. Used at
    /// startup to resume workers for chunks a prior process instance left
    /// mid-flight.
    pub fn list_chunks(&self) -> Result<Vec<ChunkState>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(BATCH_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut out = Vec::new();
        for row in table.iter().map_err(|e| StoreError::Backend(e.to_string()))? {
            let (_, v) = row.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    // --- pi_state ---

    pub fn get_pi(&self, chunk_id: &str, pi: &str) -> Result<Option<PiState>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(PI_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
        let k = key(chunk_id, pi);
        match table.get(k.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_pi(&self, chunk_id: &str, state: &PiState) -> Result<(), StoreError> {
        let k = key(chunk_id, &state.pi);
        let bytes = encode(state)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(PI_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .insert(k.as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Inserts one fresh `pending` row per PI in a single write transaction,
    /// so admission is all-or-nothing.
    pub fn put_pis(&self, chunk_id: &str, states: &[PiState]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(PI_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
            for state in states {
                let k = key(chunk_id, &state.pi);
                let bytes = encode(state)?;
                table
                    .insert(k.as_slice(), bytes.as_slice())
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub fn list_pis(&self, chunk_id: &str) -> Result<Vec<PiState>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(PI_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
        let start = chunk_prefix(chunk_id);
        let end = next_prefix(&start);
        let mut out = Vec::new();
        for row in table
            .range(start.as_slice()..end.as_slice())
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let (_, v) = row.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    // --- context_cache ---

    pub fn get_context(&self, chunk_id: &str, pi: &str) -> Result<Option<CachedContext>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = txn.open_table(CONTEXT_CACHE).map_err(|e| StoreError::Backend(e.to_string()))?;
        let k = key(chunk_id, pi);
        match table.get(k.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_context(
        &self,
        chunk_id: &str,
        pi: &str,
        context: &CachedContext,
    ) -> Result<(), StoreError> {
        let k = key(chunk_id, pi);
        let bytes = encode(context)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(CONTEXT_CACHE).map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .insert(k.as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Deleted as soon as a PI reaches a terminal status, to bound memory
    /// and storage growth held on behalf of one chunk.
    pub fn delete_context(&self, chunk_id: &str, pi: &str) -> Result<(), StoreError> {
        let k = key(chunk_id, pi);
        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut table = txn.open_table(CONTEXT_CACHE).map_err(|e| StoreError::Backend(e.to_string()))?;
            table
                .remove(k.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Deletes every durable row belonging to `chunk_id`: the chunk row
    /// itself, every PI row, and any leftover cached context. Called once
    /// the worker reaches `DONE`/`ERROR`.
    pub fn cleanup_chunk(&self, chunk_id: &str) -> Result<(), StoreError> {
        let start = chunk_prefix(chunk_id);
        let end = next_prefix(&start);

        let txn = self.db.begin_write().map_err(|e| StoreError::Backend(e.to_string()))?;
        {
            let mut batch = txn.open_table(BATCH_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
            batch
                .remove(chunk_id.as_bytes())
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut pis = txn.open_table(PI_STATE).map_err(|e| StoreError::Backend(e.to_string()))?;
            let stale: Vec<Vec<u8>> = pis
                .range(start.as_slice()..end.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(|row| row.map(|(k, _)| k.value().to_vec()))
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            for k in &stale {
                pis.remove(k.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))?;
            }

            let mut ctx = txn.open_table(CONTEXT_CACHE).map_err(|e| StoreError::Backend(e.to_string()))?;
            let stale: Vec<Vec<u8>> = ctx
                .range(start.as_slice()..end.as_slice())
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .map(|row| row.map(|(k, _)| k.value().to_vec()))
                .collect::<Result<_, _>>()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            for k in &stale {
                ctx.remove(k.as_slice()).map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinax_types::{ChunkPhase, PiStatus};

    fn fresh_store() -> (ChunkStore, tempfile::TempPath) {
        ChunkStore::open_temp().unwrap()
    }

    fn sample_chunk(chunk_id: &str) -> ChunkState {
        ChunkState {
            batch_id: "batch-1".into(),
            chunk_id: chunk_id.into(),
            prefix: "prefix".into(),
            custom_prompt: None,
            institution: None,
            phase: ChunkPhase::Processing,
            started_at: 0,
            completed_at: None,
            callback_retry_count: 0,
            global_error: None,
        }
    }

    #[test]
    fn round_trips_chunk_row() {
        let (store, _guard) = fresh_store();
        let chunk = sample_chunk("c1");
        store.put_chunk(&chunk).unwrap();
        let back = store.get_chunk("c1").unwrap().unwrap();
        assert_eq!(back.batch_id, "batch-1");
        assert_eq!(back.phase, ChunkPhase::Processing);
    }

    #[test]
    fn lists_only_pis_for_the_requested_chunk() {
        let (store, _guard) = fresh_store();
        store
            .put_pis("c1", &[PiState::new("pi-a"), PiState::new("pi-b")])
            .unwrap();
        store.put_pis("c2", &[PiState::new("pi-c")]).unwrap();

        let c1_pis = store.list_pis("c1").unwrap();
        assert_eq!(c1_pis.len(), 2);
        assert!(c1_pis.iter().all(|p| p.status == PiStatus::Pending));

        let c2_pis = store.list_pis("c2").unwrap();
        assert_eq!(c2_pis.len(), 1);
        assert_eq!(c2_pis[0].pi, "pi-c");
    }

    #[test]
    fn list_chunks_returns_every_chunk_row() {
        let (store, _guard) = fresh_store();
        store.put_chunk(&sample_chunk("c1")).unwrap();
        store.put_chunk(&sample_chunk("c2")).unwrap();
        let mut ids: Vec<String> = store.list_chunks().unwrap().into_iter().map(|c| c.chunk_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[test]
    fn cleanup_removes_every_row_for_the_chunk_only() {
        let (store, _guard) = fresh_store();
        store.put_chunk(&sample_chunk("c1")).unwrap();
        store.put_chunk(&sample_chunk("c2")).unwrap();
        store
            .put_pis("c1", &[PiState::new("pi-a")])
            .unwrap();
        store
            .put_pis("c2", &[PiState::new("pi-b")])
            .unwrap();
        store
            .put_context(
                "c1",
                "pi-a",
                &CachedContext {
                    directory_name: "dir".into(),
                    files: vec![],
                    existing_pinax: None,
                },
            )
            .unwrap();

        store.cleanup_chunk("c1").unwrap();

        assert!(store.get_chunk("c1").unwrap().is_none());
        assert!(store.list_pis("c1").unwrap().is_empty());
        assert!(store.get_context("c1", "pi-a").unwrap().is_none());

        assert!(store.get_chunk("c2").unwrap().is_some());
        assert_eq!(store.list_pis("c2").unwrap().len(), 1);
    }
}
