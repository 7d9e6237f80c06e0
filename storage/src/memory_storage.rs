use std::{
    collections::{BTreeMap, HashMap},
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use tracing::debug;
use utilities::chunk::Chunk;

use crate::{
    error::StoreError,
    storage::{ChunkStore, Result, check_upload_id},
};

pub struct MemoryStorage {
    uploads: RwLock<HashMap<String, BTreeMap<u64, Chunk>>>,
    capacity_bytes: u64,
}

impl MemoryStorage {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            uploads: RwLock::new(HashMap::new()),
            capacity_bytes,
        }
    }
    fn used_unlocked(uploads: &HashMap<String, BTreeMap<u64, Chunk>>) -> u64 {
        uploads
            .values()
            .flat_map(|chunks| chunks.values())
            .map(Chunk::len)
            .sum()
    }
}

#[async_trait]
impl ChunkStore for MemoryStorage {
    async fn store(&self, chunk: &Chunk) -> Result<u64> {
        chunk.validate()?;
        check_upload_id(&chunk.upload_id)?;
        let mut uploads = self.uploads.write().unwrap_or_else(PoisonError::into_inner);
        let used = Self::used_unlocked(&uploads);
        let previous = uploads
            .get(&chunk.upload_id)
            .and_then(|chunks| chunks.get(&chunk.chunk_number))
            .map_or(0, Chunk::len);
        let needed = chunk.len().saturating_sub(previous);
        if used + needed > self.capacity_bytes {
            return Err(StoreError::CapacityExceeded {
                needed,
                available: self.capacity_bytes.saturating_sub(used),
            });
        }
        debug!(upload_id = %chunk.upload_id, chunk_number = chunk.chunk_number, "storing chunk in memory");
        uploads
            .entry(chunk.upload_id.clone())
            .or_default()
            .insert(chunk.chunk_number, chunk.clone());
        Ok(chunk.len())
    }

    async fn used_bytes(&self) -> Result<u64> {
        Ok(Self::used_unlocked(
            &self.uploads.read().unwrap_or_else(PoisonError::into_inner),
        ))
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    async fn chunk_numbers(&self, upload_id: &str) -> Result<Vec<u64>> {
        let uploads = self.uploads.read().unwrap_or_else(PoisonError::into_inner);
        Ok(uploads
            .get(upload_id)
            .map(|chunks| chunks.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn read(&self, upload_id: &str, chunk_number: u64) -> Result<Chunk> {
        let uploads = self.uploads.read().unwrap_or_else(PoisonError::into_inner);
        uploads
            .get(upload_id)
            .and_then(|chunks| chunks.get(&chunk_number))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                upload_id: upload_id.to_owned(),
                chunk_number,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{chunk, storage_test};

    #[tokio::test]
    async fn memory_storage_test() -> Result<()> {
        storage_test(MemoryStorage::new(1 << 20)).await
    }

    #[tokio::test]
    async fn keeps_serving_after_a_writer_panicked() -> Result<()> {
        let storage = MemoryStorage::new(1 << 20);
        storage.store(&chunk("upload-a", 1, 2, b"hello")).await?;
        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = storage.uploads.write().unwrap();
                panic!("writer died holding the lock");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(storage.uploads.is_poisoned());
        assert_eq!(storage.used_bytes().await?, 5);
        storage.store(&chunk("upload-a", 2, 2, b"world")).await?;
        assert_eq!(storage.chunk_numbers("upload-a").await?, vec![1, 2]);
        Ok(())
    }
}
