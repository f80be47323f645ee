//! Chunked upload sessions.
//!
//! Large decks arrive as independently-submitted numbered chunks. Each
//! chunk is persisted to a per-session temp directory as it lands; once
//! every chunk is present (or the caller marks the last one) the chunks
//! are concatenated **in index order** into the completed directory and
//! the temp state is deleted. Sessions idle past their timeout are
//! purged by the shared sweep.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::UploadError;

/// A chunk submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUpload {
    /// Omitted on the first chunk of a new upload; the manager assigns
    /// one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub file_name: String,
    pub chunk_index: u32,
    /// Expected chunk count. May be omitted when the uploader streams
    /// with an unknown total and finishes with `is_last`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default)]
    pub is_last: bool,
    #[serde(with = "serde_bytes_base64")]
    pub data: Vec<u8>,
}

mod serde_bytes_base64 {
    // Chunk bytes travel as JSON, so they are base64-coded strings on
    // the wire.
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Reply to a chunk submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub session_id: String,
    pub received_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    pub is_complete: bool,
    /// Set once the session has merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_path: Option<PathBuf>,
    /// MIME type guessed from the file name, once merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Progress of an in-flight session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub received_chunks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    /// 0.0 to 1.0; None until the total is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<f64>,
}

struct UploadSession {
    owner_id: Option<String>,
    file_name: String,
    total_chunks: Option<u32>,
    received: HashSet<u32>,
    temp_dir: PathBuf,
    #[allow(dead_code)]
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl UploadSession {
    fn is_complete(&self) -> bool {
        match self.total_chunks {
            Some(total) => self.received.len() as u32 == total,
            None => false,
        }
    }

    fn check_owner(&self, session_id: &str, owner_id: Option<&str>) -> Result<(), UploadError> {
        if self.owner_id.as_deref() != owner_id {
            return Err(UploadError::WrongOwner {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }
}

fn chunk_file_name(index: u32) -> String {
    format!("chunk_{:05}", index)
}

/// Accumulates chunked uploads and merges them on completion.
pub struct UploadManager {
    sessions: Mutex<HashMap<String, UploadSession>>,
    config: UploadConfig,
}

impl UploadManager {
    pub fn new(config: UploadConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Accepts one chunk. Creates the session on the first chunk of a
    /// new session id; merges and tears the session down when the last
    /// chunk lands.
    pub async fn submit_chunk(&self, upload: ChunkUpload) -> Result<ChunkReceipt, UploadError> {
        if upload.file_name.trim().is_empty() {
            return Err(UploadError::InvalidChunk(
                "file_name must not be empty".to_string(),
            ));
        }
        if let Some(total) = upload.total_chunks {
            if total == 0 {
                return Err(UploadError::InvalidChunk(
                    "total_chunks must be at least 1".to_string(),
                ));
            }
            if upload.chunk_index >= total {
                return Err(UploadError::InvalidChunk(format!(
                    "chunk index {} exceeds total chunks {}",
                    upload.chunk_index, total
                )));
            }
        }

        let mut sessions = self.sessions.lock().await;

        let session_id = match &upload.session_id {
            Some(id) => {
                if !sessions.contains_key(id) {
                    return Err(UploadError::SessionNotFound(id.clone()));
                }
                id.clone()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let temp_dir = self.config.tmp_dir.join(&id);
                tokio::fs::create_dir_all(&temp_dir)
                    .await
                    .map_err(|e| UploadError::Io {
                        path: temp_dir.clone(),
                        source: e,
                    })?;
                log::debug!("Created upload session {} for '{}'", id, upload.file_name);
                sessions.insert(
                    id.clone(),
                    UploadSession {
                        owner_id: upload.owner_id.clone(),
                        file_name: upload.file_name.clone(),
                        total_chunks: upload.total_chunks,
                        received: HashSet::new(),
                        temp_dir,
                        started_at: Utc::now(),
                        last_activity_at: Utc::now(),
                    },
                );
                id
            }
        };

        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.clone()))?;
        session.check_owner(&session_id, upload.owner_id.as_deref())?;

        if let (Some(known), Some(given)) = (session.total_chunks, upload.total_chunks) {
            if known != given {
                return Err(UploadError::InvalidChunk(format!(
                    "total chunks changed mid-session: {} then {}",
                    known, given
                )));
            }
        }
        if session.total_chunks.is_none() {
            session.total_chunks = upload.total_chunks;
        }
        // An explicit last chunk fixes the total for open-ended uploads.
        // Anything already received past it means the client and the
        // marker disagree; the session could never complete.
        if upload.is_last && session.total_chunks.is_none() {
            let total = upload.chunk_index + 1;
            if let Some(&stray) = session.received.iter().find(|&&index| index >= total) {
                return Err(UploadError::InvalidChunk(format!(
                    "last chunk fixes total at {} but chunk {} was already received",
                    total, stray
                )));
            }
            session.total_chunks = Some(total);
        }
        if let Some(total) = session.total_chunks {
            if upload.chunk_index >= total {
                return Err(UploadError::InvalidChunk(format!(
                    "chunk index {} exceeds total chunks {}",
                    upload.chunk_index, total
                )));
            }
        }

        let chunk_path = session.temp_dir.join(chunk_file_name(upload.chunk_index));
        tokio::fs::write(&chunk_path, &upload.data)
            .await
            .map_err(|e| UploadError::Io {
                path: chunk_path,
                source: e,
            })?;
        session.received.insert(upload.chunk_index);
        session.last_activity_at = Utc::now();

        let received_chunks = session.received.len() as u32;
        let total_chunks = session.total_chunks;

        if session.is_complete() {
            // Remove the session before merging so a merge failure
            // cannot leave it half-alive; artifacts are cleaned either
            // way.
            let session = match sessions.remove(&session_id) {
                Some(session) => session,
                None => return Err(UploadError::SessionNotFound(session_id)),
            };
            drop(sessions);

            let content_type = mime_guess::from_path(&session.file_name)
                .first()
                .map(|mime| mime.essence_str().to_string());
            let merged_path = self.merge(&session_id, session).await?;
            log::info!(
                "Upload session {} merged {} chunks into {}",
                session_id,
                received_chunks,
                merged_path.display()
            );
            return Ok(ChunkReceipt {
                session_id,
                received_chunks,
                total_chunks,
                is_complete: true,
                merged_path: Some(merged_path),
                content_type,
            });
        }

        Ok(ChunkReceipt {
            session_id,
            received_chunks,
            total_chunks,
            is_complete: false,
            merged_path: None,
            content_type: None,
        })
    }

    /// Concatenates chunk files by index into the completed directory.
    async fn merge(
        &self,
        session_id: &str,
        session: UploadSession,
    ) -> Result<PathBuf, UploadError> {
        let result = self.merge_inner(session_id, &session).await;
        // Chunk files and the temp dir go away on success and failure
        // alike.
        if let Err(e) = tokio::fs::remove_dir_all(&session.temp_dir).await {
            log::warn!(
                "Failed to remove temp dir {}: {}",
                session.temp_dir.display(),
                e
            );
        }
        result
    }

    async fn merge_inner(
        &self,
        session_id: &str,
        session: &UploadSession,
    ) -> Result<PathBuf, UploadError> {
        let total = session.total_chunks.ok_or_else(|| UploadError::MergeFailed {
            session_id: session_id.to_string(),
            reason: "total chunk count never established".to_string(),
        })?;

        tokio::fs::create_dir_all(&self.config.completed_dir)
            .await
            .map_err(|e| UploadError::Io {
                path: self.config.completed_dir.clone(),
                source: e,
            })?;

        let file_name = Path::new(&session.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        let merged_path = self
            .config
            .completed_dir
            .join(format!("{}_{}", session_id, file_name));

        let mut out =
            tokio::fs::File::create(&merged_path)
                .await
                .map_err(|e| UploadError::Io {
                    path: merged_path.clone(),
                    source: e,
                })?;

        // Read back by index, never by arrival order.
        for index in 0..total {
            let chunk_path = session.temp_dir.join(chunk_file_name(index));
            let bytes = tokio::fs::read(&chunk_path)
                .await
                .map_err(|_| UploadError::MergeFailed {
                    session_id: session_id.to_string(),
                    reason: format!("missing chunk {}", index),
                })?;
            out.write_all(&bytes).await.map_err(|e| UploadError::Io {
                path: merged_path.clone(),
                source: e,
            })?;
        }
        out.flush().await.map_err(|e| UploadError::Io {
            path: merged_path.clone(),
            source: e,
        })?;

        Ok(merged_path)
    }

    /// Returns how far along a session is.
    pub async fn get_progress(
        &self,
        session_id: &str,
        owner_id: Option<&str>,
    ) -> Result<SessionProgress, UploadError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        session.check_owner(session_id, owner_id)?;

        let received_chunks = session.received.len() as u32;
        let fraction = session
            .total_chunks
            .map(|total| received_chunks as f64 / total as f64);
        Ok(SessionProgress {
            session_id: session_id.to_string(),
            received_chunks,
            total_chunks: session.total_chunks,
            fraction,
        })
    }

    /// Cancels a session and deletes its partial artifacts.
    pub async fn cancel(&self, session_id: &str, owner_id: Option<&str>) -> Result<(), UploadError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| UploadError::SessionNotFound(session_id.to_string()))?;
        session.check_owner(session_id, owner_id)?;

        if let Some(session) = sessions.remove(session_id) {
            drop(sessions);
            if let Err(e) = tokio::fs::remove_dir_all(&session.temp_dir).await {
                log::warn!(
                    "Failed to remove temp dir {}: {}",
                    session.temp_dir.display(),
                    e
                );
            }
        }
        log::debug!("Upload session {} cancelled", session_id);
        Ok(())
    }

    /// Purges sessions idle past the configured timeout, deleting their
    /// chunk files. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - self.config.session_timeout();

        let expired: Vec<(String, PathBuf)> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.last_activity_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s.temp_dir)))
                .collect()
        };

        for (id, temp_dir) in &expired {
            log::info!("Purging expired upload session {}", id);
            if let Err(e) = tokio::fs::remove_dir_all(temp_dir).await {
                log::warn!("Failed to remove temp dir {}: {}", temp_dir.display(), e);
            }
        }
        expired.len()
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
