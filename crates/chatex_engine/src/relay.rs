//! Download relay: hands finished artifacts to a sink, optionally across a
//! message boundary in fixed-size base64 chunks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chatex_logging::chatex_debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

/// Base64 characters per chunk.
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;
pub const FALLBACK_DOWNLOAD_NAME: &str = "chat-conversation";
const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid chunk payload")]
    InvalidChunk,
    #[error("chunk transfer failed: {0}")]
    Transfer(String),
    #[error("chunk decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("write failed: {0}")]
    Persist(#[from] PersistError),
}

/// A finished export ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub file_name: String,
    pub path: Option<PathBuf>,
    pub byte_len: usize,
}

pub trait DownloadSink: Send + Sync {
    fn deliver(&self, artifact: Artifact) -> Result<Delivered, RelayError>;
}

/// Removes characters file systems reject, collapses whitespace to `-`.
pub fn sanitize_download_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control())
        .collect();
    let safe = stripped.split_whitespace().collect::<Vec<_>>().join("-");
    if safe.is_empty() {
        FALLBACK_DOWNLOAD_NAME.to_string()
    } else {
        safe
    }
}

/// Writes artifacts into a directory atomically.
pub struct DirectorySink {
    writer: AtomicFileWriter,
}

impl DirectorySink {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            writer: AtomicFileWriter::new(dir),
        }
    }
}

impl DownloadSink for DirectorySink {
    fn deliver(&self, artifact: Artifact) -> Result<Delivered, RelayError> {
        let file_name = sanitize_download_name(&artifact.file_name);
        let path = self.writer.write(&file_name, &artifact.bytes)?;
        Ok(Delivered {
            file_name,
            path: Some(path),
            byte_len: artifact.bytes.len(),
        })
    }
}

/// Wire form of one slice of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadChunk {
    pub file_id: String,
    pub chunk: String,
    pub index: usize,
    pub total: usize,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime: Option<String>,
}

/// Splits an artifact into base64 chunks of at most `chunk_size` characters.
/// An empty artifact still yields one (empty) chunk.
pub fn chunk_artifact(artifact: &Artifact, file_id: &str, chunk_size: usize) -> Vec<DownloadChunk> {
    let encoded = STANDARD.encode(&artifact.bytes);
    let chunk_size = chunk_size.max(4);
    let total = encoded.len().div_ceil(chunk_size).max(1);
    (0..total)
        .map(|index| {
            let start = (index * chunk_size).min(encoded.len());
            let end = ((index + 1) * chunk_size).min(encoded.len());
            DownloadChunk {
                file_id: file_id.to_string(),
                chunk: encoded[start..end].to_string(),
                index,
                total,
                file_name: Some(artifact.file_name.clone()),
                mime: Some(artifact.mime.clone()),
            }
        })
        .collect()
}

struct PendingFile {
    parts: Vec<Option<String>>,
    received: usize,
    file_name: String,
    mime: String,
}

/// Receiving side of the relay. Duplicate chunks are ignored; the artifact
/// is returned once every index has arrived.
#[derive(Default)]
pub struct ChunkReassembler {
    store: Mutex<HashMap<String, PendingFile>>,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingFile>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    pub fn receive(&self, chunk: DownloadChunk) -> Result<Option<Artifact>, RelayError> {
        if chunk.file_id.is_empty() || chunk.total == 0 || chunk.index >= chunk.total {
            return Err(RelayError::InvalidChunk);
        }
        let mut store = self.lock();
        let entry = store.entry(chunk.file_id.clone()).or_insert_with(|| PendingFile {
            parts: vec![None; chunk.total],
            received: 0,
            file_name: chunk
                .file_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| FALLBACK_DOWNLOAD_NAME.to_string()),
            mime: chunk
                .mime
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| FALLBACK_MIME.to_string()),
        });
        if entry.parts.len() != chunk.total {
            return Err(RelayError::InvalidChunk);
        }
        if entry.parts[chunk.index].is_none() {
            entry.parts[chunk.index] = Some(chunk.chunk);
            entry.received += 1;
        }
        if entry.received < chunk.total {
            return Ok(None);
        }
        let Some(done) = store.remove(&chunk.file_id) else {
            return Ok(None);
        };
        let encoded: String = done.parts.into_iter().flatten().collect();
        let bytes = STANDARD.decode(encoded.as_bytes())?;
        Ok(Some(Artifact {
            file_name: sanitize_download_name(&done.file_name),
            mime: done.mime,
            bytes,
        }))
    }

    /// Receives a chunk in its JSON wire form.
    pub fn receive_message(&self, message: &str) -> Result<Option<Artifact>, RelayError> {
        let chunk: DownloadChunk = serde_json::from_str(message).map_err(|_| RelayError::InvalidChunk)?;
        self.receive(chunk)
    }
}

/// Sends artifacts to `sink` through a [`ChunkReassembler`], serializing
/// every chunk to JSON on the way.
pub struct ChunkedRelay {
    reassembler: Arc<ChunkReassembler>,
    sink: Arc<dyn DownloadSink>,
    chunk_size: usize,
    counter: AtomicU64,
}

impl ChunkedRelay {
    pub fn new(sink: Arc<dyn DownloadSink>) -> Self {
        Self::with_chunk_size(sink, CHUNK_SIZE)
    }

    pub fn with_chunk_size(sink: Arc<dyn DownloadSink>, chunk_size: usize) -> Self {
        Self {
            reassembler: Arc::new(ChunkReassembler::new()),
            sink,
            chunk_size,
            counter: AtomicU64::new(0),
        }
    }

    fn next_file_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("ced-{millis}-{n}")
    }
}

impl DownloadSink for ChunkedRelay {
    fn deliver(&self, artifact: Artifact) -> Result<Delivered, RelayError> {
        let file_id = self.next_file_id();
        let chunks = chunk_artifact(&artifact, &file_id, self.chunk_size);
        chatex_debug!(
            "Relaying {} ({} bytes) in {} chunk(s)",
            artifact.file_name,
            artifact.bytes.len(),
            chunks.len()
        );
        let mut assembled = None;
        for chunk in chunks {
            let message = serde_json::to_string(&chunk).map_err(|e| RelayError::Transfer(e.to_string()))?;
            if let Some(done) = self.reassembler.receive_message(&message)? {
                assembled = Some(done);
            }
        }
        let artifact = assembled.ok_or_else(|| RelayError::Transfer("Chunk transfer failed".to_string()))?;
        self.sink.deliver(artifact)
    }
}

/// Keeps delivered artifacts in memory.
#[derive(Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Artifact>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<Artifact> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl DownloadSink for MemorySink {
    fn deliver(&self, artifact: Artifact) -> Result<Delivered, RelayError> {
        let delivered = Delivered {
            file_name: artifact.file_name.clone(),
            path: None,
            byte_len: artifact.bytes.len(),
        };
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(artifact);
        Ok(delivered)
    }
}
