use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, instrument, trace};
use utilities::chunk::Chunk;

use crate::{
    error::StoreError,
    storage::{ChunkStore, Result, check_upload_id},
};

const PAYLOAD_EXTENSION: &str = "chunk";
const METADATA_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    upload_id: String,
    chunk_number: u64,
    total_chunks: u64,
    total_file_size: u64,
    filename: String,
}

pub struct FileStorageConfig {
    pub root: PathBuf,
    pub capacity_bytes: u64,
}

/// Stores each upload in its own directory:
/// `<root>/<upload_id>/<chunk_number>.chunk` plus a `.json` sidecar.
/// Files are written under `<root>/staged` first and renamed into place,
/// the sidecar is renamed last so a listed chunk always has its payload.
#[derive(Clone)]
pub struct FileStorage {
    root: PathBuf,
    capacity_bytes: u64,
    used: Arc<AtomicU64>,
}

impl FileStorage {
    pub async fn new(config: FileStorageConfig) -> Result<Self> {
        fs::create_dir_all(config.root.join("staged")).await?;
        let used = scan_used_bytes(&config.root).await?;
        info!(root = %config.root.display(), used, "Opened file storage");
        Ok(Self {
            root: config.root,
            capacity_bytes: config.capacity_bytes,
            used: Arc::new(AtomicU64::new(used)),
        })
    }
    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }
    fn committed_path(&self, upload_id: &str, chunk_number: u64, extension: &str) -> PathBuf {
        self.upload_dir(upload_id)
            .join(format!("{chunk_number:010}.{extension}"))
    }
    fn staged_path(&self, upload_id: &str, chunk_number: u64, extension: &str) -> PathBuf {
        self.root
            .join("staged")
            .join(format!("{upload_id}-{chunk_number:010}.{extension}"))
    }
    async fn existing_len(&self, upload_id: &str, chunk_number: u64) -> Result<u64> {
        let path = self.committed_path(upload_id, chunk_number, PAYLOAD_EXTENSION);
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

async fn scan_used_bytes(root: &Path) -> Result<u64> {
    let mut used = 0;
    let mut uploads = fs::read_dir(root).await?;
    while let Some(upload) = uploads.next_entry().await? {
        if !upload.file_type().await?.is_dir() || upload.file_name() == "staged" {
            continue;
        }
        let mut chunks = fs::read_dir(upload.path()).await?;
        while let Some(chunk) = chunks.next_entry().await? {
            if chunk.path().extension().is_some_and(|e| e == PAYLOAD_EXTENSION) {
                used += chunk.metadata().await?.len();
            }
        }
    }
    Ok(used)
}

#[async_trait]
impl ChunkStore for FileStorage {
    #[instrument(name = "file_storage_store", skip(self, chunk), fields(upload_id = %chunk.upload_id, chunk_number = chunk.chunk_number))]
    async fn store(&self, chunk: &Chunk) -> Result<u64> {
        chunk.validate()?;
        check_upload_id(&chunk.upload_id)?;
        let (upload_id, chunk_number) = (chunk.upload_id.as_str(), chunk.chunk_number);

        let previous = self.existing_len(upload_id, chunk_number).await?;
        let used = self.used.load(Ordering::SeqCst);
        let needed = chunk.len().saturating_sub(previous);
        if used + needed > self.capacity_bytes {
            return Err(StoreError::CapacityExceeded {
                needed,
                available: self.capacity_bytes.saturating_sub(used),
            });
        }

        let record = ChunkRecord {
            upload_id: chunk.upload_id.clone(),
            chunk_number,
            total_chunks: chunk.total_chunks,
            total_file_size: chunk.total_file_size,
            filename: chunk.filename.clone(),
        };
        let staged_payload = self.staged_path(upload_id, chunk_number, PAYLOAD_EXTENSION);
        let staged_metadata = self.staged_path(upload_id, chunk_number, METADATA_EXTENSION);
        fs::write(&staged_payload, &chunk.data).await?;
        fs::write(&staged_metadata, serde_json::to_vec(&record)?).await?;

        fs::create_dir_all(self.upload_dir(upload_id)).await?;
        fs::rename(
            staged_payload,
            self.committed_path(upload_id, chunk_number, PAYLOAD_EXTENSION),
        )
        .await?;
        fs::rename(
            staged_metadata,
            self.committed_path(upload_id, chunk_number, METADATA_EXTENSION),
        )
        .await?;

        self.used.fetch_add(chunk.len(), Ordering::SeqCst);
        self.used.fetch_sub(previous, Ordering::SeqCst);
        trace!(bytes = chunk.len(), "chunk committed");
        Ok(chunk.len())
    }

    async fn used_bytes(&self) -> Result<u64> {
        Ok(self.used.load(Ordering::SeqCst))
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    #[instrument(name = "file_storage_chunk_numbers", skip(self))]
    async fn chunk_numbers(&self, upload_id: &str) -> Result<Vec<u64>> {
        check_upload_id(upload_id)?;
        let mut entries = match fs::read_dir(self.upload_dir(upload_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut chunk_numbers = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == METADATA_EXTENSION) {
                if let Some(n) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse().ok())
                {
                    chunk_numbers.push(n);
                }
            }
        }
        chunk_numbers.sort_unstable();
        Ok(chunk_numbers)
    }

    #[instrument(name = "file_storage_read", skip(self))]
    async fn read(&self, upload_id: &str, chunk_number: u64) -> Result<Chunk> {
        check_upload_id(upload_id)?;
        let not_found = |e: std::io::Error| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound {
                    upload_id: upload_id.to_owned(),
                    chunk_number,
                }
            } else {
                e.into()
            }
        };
        let record = fs::read(self.committed_path(upload_id, chunk_number, METADATA_EXTENSION))
            .await
            .map_err(not_found)?;
        let record: ChunkRecord = serde_json::from_slice(&record)?;
        let data = fs::read(self.committed_path(upload_id, chunk_number, PAYLOAD_EXTENSION))
            .await
            .map_err(not_found)?;
        Ok(Chunk {
            upload_id: record.upload_id,
            chunk_number: record.chunk_number,
            total_chunks: record.total_chunks,
            total_file_size: record.total_file_size,
            filename: record.filename,
            data,
        })
    }
}
